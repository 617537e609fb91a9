//! Sitemap and sitemap-index generators
//!
//! Every fetched document goes through the same classification step; the
//! result feeds one of two emission strategies:
//! - url set: emit one request per qualifying `<url>`
//! - index: fetch every qualifying child sitemap concurrently as one batch
//!   that fails on the first child error
//!
//! A top-level url set aborts on its first malformed entry. Children of an
//! index skip malformed entries instead; only a failure to fetch or parse a
//! whole child aborts the batch.

mod document;

pub use document::{parse_document, DocumentKind, RawEntry, SourceDocument};

use crate::input::fetch::{fetch_document, SITEMAP_CONTENT_TYPES};
use crate::input::{GeneratorContext, RequestSink};
use crate::policy::{prior_output_time, still_current, UrlNode};
use crate::SnapshotError;
use chrono::Utc;
use futures::future::{try_join_all, BoxFuture, FutureExt};

/// Nesting limit for indexes that reference further indexes
const MAX_INDEX_DEPTH: usize = 4;

/// What a url set does with an entry that fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedNodes {
    /// Stop at the first bad entry with a document error
    Abort,
    /// Log the bad entry and continue
    Skip,
}

/// Entry point for the `sitemap` and `sitemap-index` inputs
///
/// The document root decides the strategy, so a sitemap input that turns out
/// to be an index is handled as one (and vice versa).
pub(crate) async fn run(ctx: &GeneratorContext, sink: &RequestSink) -> crate::Result<()> {
    let location = ctx.source_location()?;
    process_location(ctx, sink, location, MalformedNodes::Abort).await
}

/// Fetches, classifies and emits one top-level sitemap location
pub(crate) async fn process_location(
    ctx: &GeneratorContext,
    sink: &RequestSink,
    location: &str,
    malformed: MalformedNodes,
) -> crate::Result<()> {
    let bytes = fetch_document(ctx.client(), location, SITEMAP_CONTENT_TYPES).await?;
    let document = parse_document(location, &bytes)?;
    dispatch(ctx, sink, location.to_string(), document, malformed, 0).await
}

fn dispatch<'a>(
    ctx: &'a GeneratorContext,
    sink: &'a RequestSink,
    source_url: String,
    document: SourceDocument,
    malformed: MalformedNodes,
    depth: usize,
) -> BoxFuture<'a, crate::Result<()>> {
    async move {
        match document.kind {
            DocumentKind::UrlSet => {
                emit_url_set(ctx, sink, &source_url, &document.entries, malformed).await
            }
            DocumentKind::Index => {
                if depth >= MAX_INDEX_DEPTH {
                    return Err(SnapshotError::Document {
                        source_url,
                        message: format!("sitemap indexes nested deeper than {}", MAX_INDEX_DEPTH),
                    });
                }
                emit_index(ctx, sink, &source_url, &document.entries, depth).await
            }
        }
    }
    .boxed()
}

/// Emits a request for every entry whose earlier capture is not current
async fn emit_url_set(
    ctx: &GeneratorContext,
    sink: &RequestSink,
    source_url: &str,
    entries: &[RawEntry],
    malformed: MalformedNodes,
) -> crate::Result<()> {
    let policy = ctx.config().input.sitemap_policy;
    let mut emitted = 0usize;
    let mut current = 0usize;

    for (index, entry) in entries.iter().enumerate() {
        let node = match entry.to_node() {
            Ok(node) => node,
            Err(message) => match malformed {
                MalformedNodes::Abort => {
                    return Err(SnapshotError::Document {
                        source_url: source_url.to_string(),
                        message: format!("entry {}: {}", index + 1, message),
                    });
                }
                MalformedNodes::Skip => {
                    tracing::warn!(
                        "Skipping entry {} of {}: {}",
                        index + 1,
                        source_url,
                        message
                    );
                    continue;
                }
            },
        };

        if policy {
            let output_file = ctx.output_file_for(&node.loc);
            let prior = prior_output_time(&output_file).await;
            if still_current(&node, prior, Utc::now()) {
                tracing::debug!("Capture of {} is current, skipping", node.loc);
                current += 1;
                continue;
            }
        }

        sink.emit(ctx.request_for(node.loc))?;
        emitted += 1;
    }

    tracing::info!(
        "{} requests generated from {} ({} current)",
        emitted,
        source_url,
        current
    );
    Ok(())
}

/// Processes the qualifying children of an index concurrently
///
/// The batch fails as soon as any child fails. Requests emitted by other
/// children before that point stay emitted.
async fn emit_index(
    ctx: &GeneratorContext,
    sink: &RequestSink,
    source_url: &str,
    entries: &[RawEntry],
    depth: usize,
) -> crate::Result<()> {
    let policy = ctx.config().input.sitemap_policy;
    let mut children = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let node = entry.to_node().map_err(|message| SnapshotError::Document {
            source_url: source_url.to_string(),
            message: format!("sitemap entry {}: {}", index + 1, message),
        })?;

        if policy {
            let prior = match ctx.sitemap_store_path(&node.loc) {
                Some(stored) => prior_output_time(&stored).await,
                None => None,
            };
            if still_current(&node, prior, Utc::now()) {
                tracing::debug!("Child sitemap {} is current, skipping", node.loc);
                continue;
            }
        }
        children.push(node);
    }

    tracing::info!(
        "Processing {} of {} child sitemaps from {}",
        children.len(),
        entries.len(),
        source_url
    );

    try_join_all(
        children
            .iter()
            .map(|child| process_child(ctx, sink, child, depth)),
    )
    .await?;
    Ok(())
}

async fn process_child(
    ctx: &GeneratorContext,
    sink: &RequestSink,
    child: &UrlNode,
    depth: usize,
) -> crate::Result<()> {
    let location = child.loc.as_str();
    let bytes = fetch_document(ctx.client(), location, SITEMAP_CONTENT_TYPES).await?;

    if let Some(stored) = ctx.sitemap_store_path(&child.loc) {
        persist(&stored, &bytes).await?;
    }

    let document = parse_document(location, &bytes)?;
    dispatch(
        ctx,
        sink,
        location.to_string(),
        document,
        MalformedNodes::Skip,
        depth + 1,
    )
    .await
}

async fn persist(path: &std::path::Path, bytes: &[u8]) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    tracing::trace!("Stored child sitemap at {}", path.display());
    Ok(())
}
