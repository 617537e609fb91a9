//! Input generators
//!
//! Each generator turns a configured source into a stream of capture requests:
//! - `array`: a list of URLs from the configuration
//! - `textfile`: one URL or path per line of a local file
//! - `robots`: `Sitemap:` directives of a robots.txt, or its `Allow:` paths
//! - `sitemap` / `sitemap-index`: sitemap documents, optionally filtered by the
//!   staleness policy
//!
//! Requests are pushed into a [`RequestSink`] scoped to one run. The sink is
//! owned by the generator task; dropping it closes the stream, which is the
//! end-of-input signal.

mod fetch;
mod list;
mod robots;
mod sitemap;

pub use fetch::{build_http_client, fetch_document, ROBOTS_CONTENT_TYPES, SITEMAP_CONTENT_TYPES};
pub use robots::{parse_directives, RobotsDirectives};
pub use sitemap::{parse_document, DocumentKind, MalformedNodes, RawEntry, SourceDocument};

use crate::config::{lookup_keys, Config, Source};
use crate::{ConfigError, SnapshotError, UrlError, UrlResult};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use url::Url;

/// Input generator variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    Array,
    Textfile,
    #[default]
    Robots,
    Sitemap,
    SitemapIndex,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Textfile => "textfile",
            Self::Robots => "robots",
            Self::Sitemap => "sitemap",
            Self::SitemapIndex => "sitemap-index",
        }
    }

    /// Runs the generator to completion, pushing every request into `sink`
    ///
    /// Returns once no further requests will be produced. Requests emitted
    /// before an error stay emitted.
    pub async fn run(&self, ctx: &GeneratorContext, sink: &RequestSink) -> crate::Result<()> {
        tracing::info!("Generating capture requests from {} input", self);
        match self {
            Self::Array => list::run_array(ctx, sink),
            Self::Textfile => list::run_textfile(ctx, sink).await,
            Self::Robots => robots::run(ctx, sink).await,
            Self::Sitemap | Self::SitemapIndex => sitemap::run(ctx, sink).await,
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page to capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub url: Url,
    /// Identity of the request; unique within a run
    pub output_file: PathBuf,
    pub selector: String,
    pub timeout: Duration,
    pub check_interval: Duration,
}

/// Run-scoped channel end that generators emit requests into
#[derive(Debug, Clone)]
pub struct RequestSink {
    tx: mpsc::UnboundedSender<CaptureRequest>,
}

impl RequestSink {
    pub fn new(tx: mpsc::UnboundedSender<CaptureRequest>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CaptureRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Emits a request; fails once the consumer has stopped listening
    pub fn emit(&self, request: CaptureRequest) -> crate::Result<()> {
        tracing::trace!("Emitting request for {}", request.url);
        self.tx
            .send(request)
            .map_err(|_| SnapshotError::ReceiverClosed)
    }
}

/// Sending half of the end-of-input signal
#[derive(Debug)]
pub struct InputSignal(oneshot::Sender<()>);

impl InputSignal {
    /// Signals that no further requests will be registered
    pub fn close(self) {
        let _ = self.0.send(());
    }
}

/// Receiving half of the end-of-input signal, handed to the tracker
///
/// Resolves when the signal is closed or dropped.
#[derive(Debug)]
pub struct InputHandle(pub(crate) oneshot::Receiver<()>);

/// Creates a linked end-of-input signal and handle
pub fn end_of_input() -> (InputSignal, InputHandle) {
    let (tx, rx) = oneshot::channel();
    (InputSignal(tx), InputHandle(rx))
}

/// Shared state for one generator run
pub struct GeneratorContext {
    config: Arc<Config>,
    client: Client,
}

impl GeneratorContext {
    pub fn new(config: Arc<Config>) -> crate::Result<Self> {
        let client = build_http_client(&config.fetch)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The single source location of non-array generators
    pub fn source_location(&self) -> crate::Result<&str> {
        match &self.config.input.source {
            Source::One(location) => Ok(location),
            Source::Many(_) => Err(ConfigError::Validation(format!(
                "{} input requires a single source location",
                self.config.input.kind
            ))
            .into()),
        }
    }

    /// Base URL built from the configured protocol, hostname and port
    pub fn base_url(&self) -> UrlResult<Url> {
        let input = &self.config.input;
        let port = input.port.map(|p| format!(":{}", p)).unwrap_or_default();
        let base = format!("{}://{}{}/", input.protocol, input.hostname, port);
        Url::parse(&base).map_err(|e| UrlError::Parse(format!("{}: {}", base, e)))
    }

    /// Makes an entry absolute: full http(s) URLs pass through, paths are
    /// resolved against the configured host
    pub fn absolute_url(&self, entry: &str) -> UrlResult<Url> {
        let entry = entry.trim();
        if entry.is_empty() || entry.chars().any(char::is_whitespace) {
            return Err(UrlError::Malformed(entry.to_string()));
        }

        match Url::parse(entry) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                if url.host_str().is_none() {
                    return Err(UrlError::Malformed(entry.to_string()));
                }
                Ok(url)
            }
            Ok(url) => Err(UrlError::InvalidScheme(url.scheme().to_string())),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let path = if entry.starts_with('/') {
                    entry.to_string()
                } else {
                    format!("/{}", entry)
                };
                self.base_url()?
                    .join(&path)
                    .map_err(|e| UrlError::Parse(format!("{}: {}", entry, e)))
            }
            Err(e) => Err(UrlError::Parse(format!("{}: {}", entry, e))),
        }
    }

    /// Output file for a URL
    ///
    /// Explicit `[output.paths]` entries win; otherwise the file is addressed by
    /// the SHA-256 of the URL below a per-host directory.
    pub fn output_file_for(&self, url: &Url) -> PathBuf {
        let output = &self.config.output;
        let dir = output.dir();

        if let Some(relative) = lookup_keys(url)
            .iter()
            .find_map(|key| output.paths.get(key.as_str()))
        {
            return dir.join(relative);
        }

        let host = url.host_str().unwrap_or("_");
        dir.join(host).join(format!("{}.html", url_digest(url)))
    }

    /// Where a fetched child sitemap is kept between runs, if persistence is on
    pub fn sitemap_store_path(&self, url: &Url) -> Option<PathBuf> {
        let store = &self.config.input.sitemap_output_dir;
        if store.is_empty() {
            return None;
        }
        Some(
            self.config
                .output
                .dir()
                .join(store)
                .join(format!("{}.xml", url_digest(url))),
        )
    }

    /// Builds the capture request for a URL with its resolved per-URL options
    pub fn request_for(&self, url: Url) -> CaptureRequest {
        let capture = &self.config.capture;
        CaptureRequest {
            output_file: self.output_file_for(&url),
            selector: capture.selector_for(&url),
            timeout: capture.timeout_for(&url),
            check_interval: capture.check_interval_for(&url),
            url,
        }
    }
}

fn url_digest(url: &Url) -> String {
    hex::encode(Sha256::digest(url.as_str().as_bytes()))
}
