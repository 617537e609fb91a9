//! Sitemap document classification
//!
//! A single pass over the XML decides whether a document is a url set or a
//! sitemap index and collects its entries. Entries are kept raw so each
//! emission strategy can choose how to treat a malformed one.

use crate::policy::{parse_lastmod, ChangeFreq, UrlNode};
use crate::SnapshotError;
use quick_xml::events::Event;
use quick_xml::Reader;
use url::Url;

/// Root element of a sitemap document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// `<urlset>`: entries are pages
    UrlSet,
    /// `<sitemapindex>`: entries are further sitemap documents
    Index,
}

/// A classified sitemap document with its entries in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub kind: DocumentKind,
    pub entries: Vec<RawEntry>,
}

/// Text content of one `<url>` or `<sitemap>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub loc: Option<String>,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
}

impl RawEntry {
    /// Validates the entry into a `UrlNode`
    ///
    /// Fails when `loc` is missing or not an absolute http(s) URL, or when
    /// `lastmod` is present but not a W3C datetime.
    pub fn to_node(&self) -> Result<UrlNode, String> {
        let loc = self
            .loc
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "entry has no <loc>".to_string())?;

        let url = Url::parse(loc).map_err(|e| format!("invalid <loc> '{}': {}", loc, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("unsupported <loc> scheme '{}'", url.scheme()));
        }

        let lastmod = match self.lastmod.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Some(
                parse_lastmod(value).ok_or_else(|| format!("invalid <lastmod> '{}'", value))?,
            ),
            _ => None,
        };

        let changefreq = self
            .changefreq
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ChangeFreq::parse);

        Ok(UrlNode {
            loc: url,
            lastmod,
            changefreq,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Loc,
    Lastmod,
    Changefreq,
}

/// Parses and classifies a sitemap document
///
/// # Arguments
///
/// * `source_url` - Where the document came from (used in errors)
/// * `bytes` - The raw (already gunzipped) document
///
/// # Returns
///
/// * `Ok(SourceDocument)` - The document kind and its entries
/// * `Err(SnapshotError::Document)` - Not XML, or the root is neither
///   `urlset` nor `sitemapindex`
pub fn parse_document(source_url: &str, bytes: &[u8]) -> Result<SourceDocument, SnapshotError> {
    let document_error = |message: String| SnapshotError::Document {
        source_url: source_url.to_string(),
        message,
    };

    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut kind: Option<DocumentKind> = None;
    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut field: Option<Field> = None;
    // root = 1, entry = 2, entry fields = 3
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = e.local_name();
                match (kind, depth) {
                    (None, _) => kind = Some(classify_root(name.as_ref()).map_err(document_error)?),
                    (Some(_), 2) if is_entry(name.as_ref()) => current = Some(RawEntry::default()),
                    (Some(_), 3) => {
                        field = match name.as_ref() {
                            b"loc" => Some(Field::Loc),
                            b"lastmod" => Some(Field::Lastmod),
                            b"changefreq" => Some(Field::Changefreq),
                            _ => None,
                        }
                    }
                    _ => field = None,
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                match kind {
                    None => kind = Some(classify_root(name.as_ref()).map_err(document_error)?),
                    Some(_) if depth == 1 && is_entry(name.as_ref()) => {
                        entries.push(RawEntry::default());
                    }
                    Some(_) => {}
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| document_error(format!("XML parse error: {}", e)))?;
                append_text(current.as_mut(), field, &text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                append_text(current.as_mut(), field, &text);
            }
            Ok(Event::End(e)) => {
                if depth == 2 && is_entry(e.local_name().as_ref()) {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = None;
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(document_error(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    let kind = kind.ok_or_else(|| document_error("document has no root element".to_string()))?;
    Ok(SourceDocument { kind, entries })
}

fn classify_root(name: &[u8]) -> Result<DocumentKind, String> {
    match name {
        b"urlset" => Ok(DocumentKind::UrlSet),
        b"sitemapindex" => Ok(DocumentKind::Index),
        other => Err(format!(
            "unexpected root element <{}>",
            String::from_utf8_lossy(other)
        )),
    }
}

fn is_entry(name: &[u8]) -> bool {
    matches!(name, b"url" | b"sitemap")
}

fn append_text(entry: Option<&mut RawEntry>, field: Option<Field>, text: &str) {
    let (Some(entry), Some(field)) = (entry, field) else {
        return;
    };
    let slot = match field {
        Field::Loc => &mut entry.loc,
        Field::Lastmod => &mut entry.lastmod,
        Field::Changefreq => &mut entry.changefreq,
    };
    slot.get_or_insert_with(String::new).push_str(text);
}
