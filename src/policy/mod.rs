//! Sitemap staleness policy
//!
//! Decides whether a previously captured page is recent enough to skip, given the
//! `lastmod` and `changefreq` hints of its sitemap entry and the modification
//! time of the earlier capture. All arithmetic is done on Unix-epoch
//! milliseconds; a missing timestamp counts as the epoch itself.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::path::Path;
use url::Url;

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

/// Sitemap `changefreq` hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

/// How long a capture may age before it is stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tolerance {
    Millis(i64),
    Infinite,
}

impl Tolerance {
    fn admits(self, age_ms: i64) -> bool {
        match self {
            Self::Millis(limit) => age_ms <= limit,
            Self::Infinite => true,
        }
    }
}

impl ChangeFreq {
    /// Parses a `changefreq` value; unrecognized values count as `always`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Self::Always,
            "hourly" => Self::Hourly,
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "yearly" => Self::Yearly,
            "never" => Self::Never,
            other => {
                tracing::debug!("Unrecognized changefreq '{}', treating as always", other);
                Self::Always
            }
        }
    }

    fn tolerance(self) -> Tolerance {
        match self {
            Self::Always => Tolerance::Millis(0),
            Self::Hourly => Tolerance::Millis(HOUR_MS),
            Self::Daily => Tolerance::Millis(DAY_MS),
            Self::Weekly => Tolerance::Millis(7 * DAY_MS),
            // 30.44 days
            Self::Monthly => Tolerance::Millis(2_630_016_000),
            // 365.25 days
            Self::Yearly => Tolerance::Millis(31_557_600_000),
            Self::Never => Tolerance::Infinite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for ChangeFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<url>` or `<sitemap>` entry of a sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlNode {
    pub loc: Url,
    pub lastmod: Option<DateTime<Utc>>,
    pub changefreq: Option<ChangeFreq>,
}

/// Returns true when the capture made at `prior_output` is still current
///
/// | lastmod | changefreq | compared                         |
/// |---------|------------|----------------------------------|
/// | yes     | no         | output age vs. `now - lastmod`   |
/// | no      | yes        | output age vs. changefreq bucket |
/// | yes     | yes        | `now - lastmod` vs. bucket       |
/// | no      | no         | `now - epoch` vs. zero (never)   |
pub fn still_current(
    node: &UrlNode,
    prior_output: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let now_ms = now.timestamp_millis();
    let output_age = now_ms - prior_output.map_or(0, |t| t.timestamp_millis());

    match (node.lastmod, node.changefreq) {
        (Some(lastmod), None) => {
            Tolerance::Millis(now_ms - lastmod.timestamp_millis()).admits(output_age)
        }
        (None, Some(freq)) => freq.tolerance().admits(output_age),
        (lastmod, freq) => {
            let since_modified = now_ms - lastmod.map_or(0, |t| t.timestamp_millis());
            freq.unwrap_or(ChangeFreq::Always)
                .tolerance()
                .admits(since_modified)
        }
    }
}

/// Parses a W3C datetime as used by sitemap `lastmod` values
///
/// Accepts RFC 3339, a bare date (`2024-05-01`) and minute precision with an
/// offset (`2024-05-01T10:30+02:00`).
pub fn parse_lastmod(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(minutes) = value.strip_suffix('Z') {
        if let Ok(dt) = DateTime::parse_from_str(&format!("{}+00:00", minutes), "%Y-%m-%dT%H:%M%:z") {
            return Some(dt.with_timezone(&Utc));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Modification time of an earlier capture, if one exists
pub async fn prior_output_time(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}
