use crate::input::InputKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Key used inside per-URL tables for the fallback value
pub const DEFAULT_KEY: &str = "__default";

/// Main configuration structure for html-snapshots
///
/// Every section is optional; missing keys fall back to the defaults below,
/// so a partial file is merged over the built-in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub capture: CaptureConfig,
    pub renderer: RendererConfig,
    pub fetch: FetchConfig,
}

/// Where capture requests come from
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InputConfig {
    /// Input generator variant
    pub kind: InputKind,

    /// Generator-specific source: a URL or path, or a list of URLs
    pub source: Source,

    /// Host used to make relative paths absolute
    pub hostname: String,

    /// Scheme used to make relative paths absolute
    pub protocol: String,

    /// Port used to make relative paths absolute
    pub port: Option<u16>,

    /// Skip pages whose previous capture is still current per sitemap hints
    pub sitemap_policy: bool,

    /// Directory (relative to the output dir) where fetched child sitemaps are kept.
    /// Empty disables persistence.
    pub sitemap_output_dir: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            kind: InputKind::Robots,
            source: Source::One("./robots.txt".to_string()),
            hostname: "localhost".to_string(),
            protocol: "http".to_string(),
            port: None,
            sitemap_policy: false,
            sitemap_output_dir: "_sitemaps".to_string(),
        }
    }
}

/// A single location or a list of URLs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Source {
    One(String),
    Many(Vec<String>),
}

/// Capture destination
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root of the capture tree
    pub dir: String,

    /// Remove the output directory recursively before the run
    pub clean: bool,

    /// Explicit output paths (relative to `dir`), keyed by URL or URL path
    pub paths: HashMap<String, String>,
}

impl OutputConfig {
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

/// Per-capture settings handed to the renderer
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CaptureConfig {
    /// Selector the renderer waits for before writing the page
    pub selector: PerUrl<String>,

    /// Renderer timeout in milliseconds
    pub timeout: PerUrl<u64>,

    /// Renderer polling interval in milliseconds
    pub check_interval: PerUrl<u64>,

    /// Maximum concurrent renderer processes (<= 0 means unbounded)
    pub process_limit: i64,

    /// How often the tracker scans for written files, in milliseconds
    pub poll_interval: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            selector: PerUrl::Global("body".to_string()),
            timeout: PerUrl::Global(10_000),
            check_interval: PerUrl::Global(250),
            process_limit: 0,
            poll_interval: 500,
        }
    }
}

impl CaptureConfig {
    pub fn selector_for(&self, url: &Url) -> String {
        self.selector
            .resolve(url)
            .cloned()
            .unwrap_or_else(|| "body".to_string())
    }

    pub fn timeout_for(&self, url: &Url) -> Duration {
        Duration::from_millis(self.timeout.resolve(url).copied().unwrap_or(10_000))
    }

    pub fn check_interval_for(&self, url: &Url) -> Duration {
        Duration::from_millis(self.check_interval.resolve(url).copied().unwrap_or(250))
    }

    /// Returns the process limit, or `None` when unbounded
    pub fn process_limit(&self) -> Option<usize> {
        usize::try_from(self.process_limit).ok().filter(|n| *n > 0)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }
}

/// External renderer invocation
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RendererConfig {
    /// Executable to run (e.g. a headless browser)
    pub program: String,

    /// Entry script passed as the first argument, if any
    pub snapshot_script: Option<PathBuf>,

    /// Passthrough arguments appended after the positional ones
    pub args: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "phantomjs".to_string(),
            snapshot_script: None,
            args: Vec::new(),
        }
    }
}

/// HTTP settings for robots.txt and sitemap fetches
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchConfig {
    pub user_agent: String,

    /// Request timeout in milliseconds
    pub timeout: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("html-snapshots/{}", env!("CARGO_PKG_VERSION")),
            timeout: 30_000,
        }
    }
}

/// An option given either globally or per URL
///
/// Tables are keyed by full URL or by URL path, with `__default` as the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PerUrl<T> {
    Global(T),
    ByUrl(HashMap<String, T>),
}

impl<T> PerUrl<T> {
    /// Looks up the value for a URL: exact URL, then path with query, then path,
    /// then `__default`
    pub fn resolve(&self, url: &Url) -> Option<&T> {
        match self {
            Self::Global(value) => Some(value),
            Self::ByUrl(map) => lookup_keys(url)
                .iter()
                .find_map(|key| map.get(key.as_str()))
                .or_else(|| map.get(DEFAULT_KEY)),
        }
    }

    /// Iterates over every configured value
    pub fn values(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Self::Global(value) => Box::new(std::iter::once(value)),
            Self::ByUrl(map) => Box::new(map.values()),
        }
    }
}

/// Candidate keys for per-URL lookups, most specific first
pub(crate) fn lookup_keys(url: &Url) -> Vec<String> {
    let full = url.as_str();
    let mut keys = vec![full.to_string()];
    if let Some(trimmed) = full.strip_suffix('/') {
        keys.push(trimmed.to_string());
    }
    if let Some(query) = url.query() {
        keys.push(format!("{}?{}", url.path(), query));
    }
    keys.push(url.path().to_string());
    keys
}
