use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder for a field no extraction strategy could fill.
pub const UNKNOWN: &str = "Unknown";

static FREE_DOWNLOAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\bfree\s+download\b").unwrap());

fn unknown() -> String {
    String::from(UNKNOWN)
}

/// One catalogued title. `uris` keeps insertion order; duplicates are removed by
/// [`normalize`] before a record reaches the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub title: String,
    #[serde(default = "unknown")]
    pub upload_date: String,
    #[serde(default = "unknown")]
    pub file_size: String,
    #[serde(default, alias = "sources")]
    pub uris: Vec<String>,
}

impl GameRecord {
    /// Deduplication key: the case-folded, trimmed title.
    pub fn key(&self) -> String {
        title_key(&self.title)
    }
}

pub fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    pub downloads: Vec<GameRecord>,
}

impl Catalog {
    pub fn new(name: impl Into<String>) -> Self {
        Catalog {
            name: name.into(),
            downloads: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn uri_count(&self) -> usize {
        self.downloads.iter().map(|record| record.uris.len()).sum()
    }
}

/// Strips the site's "Free Download" suffix and collapses whitespace.
/// Returns `None` when nothing is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let stripped = FREE_DOWNLOAD_RE.replace_all(raw, "");
    let title = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if title.is_empty() { None } else { Some(title) }
}

/// Brings a mirror href to an absolute `http(s)` or `magnet` form.
///
/// Protocol-relative links get `https:`, bare hosts get `https://`. Empty hrefs and
/// `javascript:` placeholders yield `None`.
pub fn canonical_uri(raw: &str) -> Option<String> {
    let uri = raw.trim();
    let lower = uri.to_ascii_lowercase();

    if uri.is_empty() || lower.starts_with("javascript:") || lower.starts_with('#') {
        return None;
    }

    if ["http://", "https://", "magnet:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        Some(uri.to_owned())
    } else if let Some(rest) = uri.strip_prefix("//") {
        Some(format!("https://{}", rest))
    } else {
        Some(format!("https://{}", uri.trim_start_matches('/')))
    }
}

/// Cleans the title, canonicalizes every URI and drops repeats, keeping first
/// occurrence order. A record whose title cleans down to nothing is rejected.
pub fn normalize(record: GameRecord) -> Option<GameRecord> {
    let title = clean_title(&record.title)?;

    let mut seen = HashSet::new();
    let uris = record
        .uris
        .iter()
        .filter_map(|uri| canonical_uri(uri))
        .filter(|uri| seen.insert(uri.clone()))
        .collect();

    let upload_date = match record.upload_date.trim() {
        "" => unknown(),
        date => date.to_owned(),
    };

    let file_size = match record.file_size.trim() {
        "" => unknown(),
        size => size.to_owned(),
    };

    Some(GameRecord {
        title,
        upload_date,
        file_size,
        uris,
    })
}
