//! Robots.txt generator
//!
//! `Sitemap:` directives take precedence: each listed sitemap runs through the
//! sitemap machinery in order. Without them, every `Allow:` path becomes one
//! request against the configured host.

use crate::input::fetch::{fetch_document, ROBOTS_CONTENT_TYPES};
use crate::input::sitemap::{process_location, MalformedNodes};
use crate::input::{GeneratorContext, RequestSink};
use crate::SnapshotError;

/// Directives extracted from a robots.txt document, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsDirectives {
    pub sitemaps: Vec<String>,
    pub allows: Vec<String>,
}

impl RobotsDirectives {
    pub fn is_empty(&self) -> bool {
        self.sitemaps.is_empty() && self.allows.is_empty()
    }
}

/// Extracts `Sitemap:` and `Allow:` values from robots.txt content
///
/// Keys match case-insensitively and `#` comments are ignored. Allow values
/// containing `*` or `$` are patterns rather than pages and are left out.
///
/// # Example
///
/// ```
/// use html_snapshots::input::parse_directives;
///
/// let directives = parse_directives("User-agent: *\nAllow: /about\nAllow: /*.js$\n");
/// assert_eq!(directives.allows, vec!["/about"]);
/// assert!(directives.sitemaps.is_empty());
/// ```
pub fn parse_directives(content: &str) -> RobotsDirectives {
    let mut directives = RobotsDirectives::default();

    for line in content.lines() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim().to_ascii_lowercase().as_str() {
            "sitemap" => directives.sitemaps.push(value.to_string()),
            "allow" if !value.contains(['*', '$']) => directives.allows.push(value.to_string()),
            _ => {}
        }
    }

    directives
}

pub(crate) async fn run(ctx: &GeneratorContext, sink: &RequestSink) -> crate::Result<()> {
    let location = ctx.source_location()?;
    let bytes = fetch_document(ctx.client(), location, ROBOTS_CONTENT_TYPES).await?;
    let directives = parse_directives(&String::from_utf8_lossy(&bytes));

    if directives.is_empty() {
        return Err(SnapshotError::Document {
            source_url: location.to_string(),
            message: "no Sitemap or Allow directives found".to_string(),
        });
    }

    if !directives.sitemaps.is_empty() {
        tracing::info!(
            "{} lists {} sitemaps",
            location,
            directives.sitemaps.len()
        );
        for sitemap in &directives.sitemaps {
            process_location(ctx, sink, sitemap, MalformedNodes::Abort).await?;
        }
        return Ok(());
    }

    let mut emitted = 0usize;
    for path in &directives.allows {
        match ctx.absolute_url(path) {
            Ok(url) => {
                sink.emit(ctx.request_for(url))?;
                emitted += 1;
            }
            Err(e) => tracing::warn!("Skipping Allow path '{}' from {}: {}", path, location, e),
        }
    }
    tracing::info!("{} requests generated from {}", emitted, location);
    Ok(())
}
