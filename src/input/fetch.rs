//! Document fetcher for robots.txt and sitemap sources
//!
//! Sources are either remote http(s) URLs or local paths. Remote fetches check
//! the status code and Content-Type; documents whose name ends in `.gz` are
//! gunzipped after reading.

use crate::config::FetchConfig;
use crate::SnapshotError;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Content types accepted for robots.txt documents
pub const ROBOTS_CONTENT_TYPES: &[&str] = &["text/plain"];

/// Content types accepted for sitemap documents (matched as substrings)
pub const SITEMAP_CONTENT_TYPES: &[&str] = &["xml", "gzip", "octet-stream"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Builds an HTTP client for document fetches
///
/// # Example
///
/// ```no_run
/// use html_snapshots::config::FetchConfig;
/// use html_snapshots::input::build_http_client;
///
/// let client = build_http_client(&FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_millis(config.timeout))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a document from a URL or local path
///
/// # Arguments
///
/// * `client` - The HTTP client to use for remote locations
/// * `location` - An http(s) or file URL, or a local path
/// * `expected_types` - Acceptable Content-Type fragments for remote responses
///
/// # Returns
///
/// The document bytes, gunzipped when the location names a `.gz` file. Any
/// failure is a `Fetch` error annotated with the location.
pub async fn fetch_document(
    client: &Client,
    location: &str,
    expected_types: &[&str],
) -> Result<Vec<u8>, SnapshotError> {
    let fetch_error = |message: String| SnapshotError::Fetch {
        source_url: location.to_string(),
        message,
    };

    let (bytes, name) = match Url::parse(location) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            let bytes = fetch_remote(client, &url, expected_types)
                .await
                .map_err(fetch_error)?;
            (bytes, url.path().to_string())
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| fetch_error("invalid file URL".to_string()))?;
            (read_local(&path).await.map_err(fetch_error)?, location.to_string())
        }
        _ => {
            let path = PathBuf::from(location);
            (read_local(&path).await.map_err(fetch_error)?, location.to_string())
        }
    };

    tracing::debug!("Fetched {} ({} bytes)", location, bytes.len());

    if name.ends_with(".gz") && bytes.starts_with(&GZIP_MAGIC) {
        return gunzip(&bytes).map_err(|e| SnapshotError::Document {
            source_url: location.to_string(),
            message: format!("invalid gzip data: {}", e),
        });
    }

    Ok(bytes)
}

async fn fetch_remote(
    client: &Client,
    url: &Url,
    expected_types: &[&str],
) -> Result<Vec<u8>, String> {
    let response = client.get(url.clone()).send().await.map_err(|e| {
        if e.is_timeout() {
            "request timeout".to_string()
        } else if e.is_connect() {
            "connection refused".to_string()
        } else {
            e.to_string()
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if !content_type.is_empty() && !expected_types.iter().any(|t| content_type.contains(t)) {
        return Err(format!("unexpected content type '{}'", content_type));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| e.to_string())
}

async fn read_local(path: &Path) -> Result<Vec<u8>, String> {
    tokio::fs::read(path)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
