//! Array and text-file generators
//!
//! Both map each entry 1:1 to a capture request. Entries that are not valid
//! URLs or paths are skipped with a warning.

use crate::config::Source;
use crate::input::{GeneratorContext, RequestSink};
use crate::SnapshotError;

/// Emits one request per configured URL
pub(crate) fn run_array(ctx: &GeneratorContext, sink: &RequestSink) -> crate::Result<()> {
    let entries: Vec<&str> = match &ctx.config().input.source {
        Source::Many(urls) => urls.iter().map(String::as_str).collect(),
        Source::One(url) => vec![url.as_str()],
    };
    emit_entries(ctx, sink, "array input", entries)
}

/// Emits one request per non-empty, non-comment line of a local file
pub(crate) async fn run_textfile(ctx: &GeneratorContext, sink: &RequestSink) -> crate::Result<()> {
    let location = ctx.source_location()?;
    let content = tokio::fs::read_to_string(location)
        .await
        .map_err(|e| SnapshotError::Fetch {
            source_url: location.to_string(),
            message: e.to_string(),
        })?;

    let entries = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));
    emit_entries(ctx, sink, location, entries)
}

fn emit_entries<'a>(
    ctx: &GeneratorContext,
    sink: &RequestSink,
    origin: &str,
    entries: impl IntoIterator<Item = &'a str>,
) -> crate::Result<()> {
    let mut emitted = 0usize;
    for entry in entries {
        match ctx.absolute_url(entry) {
            Ok(url) => {
                sink.emit(ctx.request_for(url))?;
                emitted += 1;
            }
            Err(e) => tracing::warn!("Skipping entry '{}' from {}: {}", entry, origin, e),
        }
    }
    tracing::info!("{} requests generated from {}", emitted, origin);
    Ok(())
}
