use std::collections::HashSet;
use std::path::{Path, PathBuf};

use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::{Value, ser::PrettyFormatter};

use crate::error::{INFO, Log, Res, ResExt, WARN};
use crate::record::{Catalog, GameRecord};

const NOT_RECOVERED: &str = "Re-initializing; previous contents are NOT recovered";

pub trait CatalogRepo {
    /// Loads the catalog, falling back to an empty one when it is missing or unusable.
    async fn load(&self) -> Res<Catalog>;

    async fn persist(&self, catalog: &Catalog) -> Res<()>;
}

/// Catalog kept as one pretty-printed JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileRepo {
    path: PathBuf,
    default_name: String,
}

impl JsonFileRepo {
    pub fn new(path: impl Into<PathBuf>, default_name: impl Into<String>) -> Self {
        JsonFileRepo {
            path: path.into(),
            default_name: default_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn reset(&self, reason: String) -> Res<Catalog> {
        reason.log(WARN).await?;

        let catalog = Catalog::new(self.default_name.clone());
        self.persist(&catalog)
            .await
            .with_context(format_args!(
                "Failed to write default catalog to: {}",
                self.path.display().red().bold()
            ))
            .log(WARN)
            .await?;

        Ok(catalog)
    }
}

impl CatalogRepo for JsonFileRepo {
    async fn load(&self) -> Res<Catalog> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .with_context(format_args!(
                "Failed to check catalog file: {}",
                self.path.display().red().bold()
            ))?;

        if !exists {
            format!(
                "No catalog found at {}, creating an empty one",
                self.path.display().bright_blue()
            )
            .log(INFO)
            .await?;
            return self.reset(String::from("Starting from an empty catalog")).await;
        }

        let raw = tokio::fs::read(&self.path).await.with_context(format_args!(
            "Failed to read catalog file: {}",
            self.path.display().red().bold()
        ))?;

        let value = match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => value,
            Err(err) => {
                return self
                    .reset(format!(
                        "Catalog {} is not valid JSON ({}). {}",
                        self.path.display().red().bold(),
                        err,
                        NOT_RECOVERED
                    ))
                    .await;
            }
        };

        let (catalog, warnings) = decode_catalog(value, &self.default_name);

        for warning in warnings {
            warning.log(WARN).await?;
        }

        match catalog {
            Some(catalog) => {
                format!(
                    "Loaded {} existing downloads from {}",
                    catalog.len(),
                    self.path.display().bright_blue()
                )
                .log(INFO)
                .await?;
                Ok(catalog)
            }
            None => {
                self.reset(format!(
                    "Catalog {} is missing a 'downloads' list or is malformed. {}",
                    self.path.display().red().bold(),
                    NOT_RECOVERED
                ))
                .await
            }
        }
    }

    async fn persist(&self, catalog: &Catalog) -> Res<()> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(format_args!(
                    "Failed to create directory: {}",
                    parent.display().red().bold()
                ))?;
        }

        let json = to_pretty_json(catalog)?;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, json)
            .await
            .with_context(format_args!(
                "Failed to write catalog to: {}",
                tmp.display().red().bold()
            ))?;

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(format_args!(
                "Failed to move catalog into place: {}",
                self.path.display().red().bold()
            ))
    }
}

/// Four-space indented JSON, non-ASCII left as is.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Res<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));

    value
        .serialize(&mut ser)
        .context("Failed to serialize catalog as JSON")?;

    buf.push(b'\n');
    Ok(buf)
}

/// Reads a catalog out of any JSON value the tool has ever written.
///
/// Accepts `{name, downloads}` and a bare `downloads` array. Records that do not decode,
/// have a blank title, or repeat an earlier title are dropped with a warning. Returns
/// `None` for any other top-level shape.
pub fn decode_catalog(value: Value, default_name: &str) -> (Option<Catalog>, Vec<String>) {
    let mut warnings = Vec::new();

    let (name, entries) = match value {
        Value::Object(mut map) => match map.remove("downloads") {
            Some(Value::Array(entries)) => {
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(default_name)
                    .to_owned();
                (name, entries)
            }
            _ => return (None, warnings),
        },
        Value::Array(entries) => {
            warnings.push(String::from(
                "Catalog contains a bare list of downloads, converting to the named format",
            ));
            (default_name.to_owned(), entries)
        }
        _ => return (None, warnings),
    };

    let mut seen = HashSet::new();
    let mut catalog = Catalog::new(name);

    for (idx, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<GameRecord>(entry) {
            Ok(record) if record.title.trim().is_empty() => {
                warnings.push(format!("Dropping catalog entry #{} with a blank title", idx));
            }
            Ok(record) if !seen.insert(record.key()) => {
                warnings.push(format!(
                    "Dropping catalog entry #{} repeating title {:?}",
                    idx, record.title
                ));
            }
            Ok(record) => catalog.downloads.push(record),
            Err(err) => {
                warnings.push(format!("Dropping unreadable catalog entry #{}: {}", idx, err));
            }
        }
    }

    (Some(catalog), warnings)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CatalogRepo, JsonFileRepo, decode_catalog};
    use crate::error::{Res, ResExt};
    use crate::record::{Catalog, GameRecord};

    fn sample() -> Catalog {
        Catalog {
            name: String::from("SteamRip"),
            downloads: vec![
                GameRecord {
                    title: String::from("Ōkami HD"),
                    upload_date: String::from("2024-12-23"),
                    file_size: String::from("9.1 GB"),
                    uris: vec![
                        String::from("https://buzzheavier.com/f/1"),
                        String::from("magnet:?xt=urn:btih:abc"),
                    ],
                },
                GameRecord {
                    title: String::from("Celeste"),
                    upload_date: String::from("Unknown"),
                    file_size: String::from("Unknown"),
                    uris: Vec::new(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_round_trip() -> Res<()> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let repo = JsonFileRepo::new(dir.path().join("catalog.json"), "Default");

        repo.persist(&sample()).await?;
        let loaded = repo.load().await?;

        assert_eq!(loaded, sample());

        repo.persist(&loaded).await?;
        assert_eq!(repo.load().await?, sample());

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_creates_default() -> Res<()> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let path = dir.path().join("nested").join("catalog.json");
        let repo = JsonFileRepo::new(&path, "SteamRip");

        let catalog = repo.load().await?;

        assert_eq!(catalog, Catalog::new("SteamRip"));
        assert!(path.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_resets() -> Res<()> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let path = dir.path().join("catalog.json");

        let corrupt_files: [&[u8]; 4] = [
            b"{not json",
            br#"{"name": "X", "downloads": 5}"#,
            b"42",
            b"{\"name\": \"X\", \"downloads\": [\"\xff\xfe\"]}",
        ];

        for corrupt in corrupt_files {
            std::fs::write(&path, corrupt).context("Failed to write fixture")?;
            let repo = JsonFileRepo::new(&path, "SteamRip");

            assert_eq!(repo.load().await?, Catalog::new("SteamRip"));

            let rewritten = std::fs::read_to_string(&path).context("Failed to read back")?;
            assert!(rewritten.contains("\"downloads\": []"));
        }

        Ok(())
    }

    #[test]
    fn test_decode_legacy_list() {
        let (catalog, warnings) = decode_catalog(
            json!([
                {"title": "Hades", "uploadDate": "2020-09-17", "fileSize": "15 GB", "uris": []},
                {"title": "hades", "uris": []},
                {"title": "   "},
                {"uris": ["https://gofile.io/d/1"]},
                "garbage",
                {"title": "Portal", "sources": ["https://pixeldrain.com/u/2"]}
            ]),
            "SteamRip",
        );
        let catalog = catalog.unwrap();

        assert_eq!(catalog.name, "SteamRip");
        assert_eq!(
            catalog
                .downloads
                .iter()
                .map(|record| record.title.as_str())
                .collect::<Vec<_>>(),
            vec!["Hades", "Portal"]
        );
        assert_eq!(catalog.downloads[1].uris, vec!["https://pixeldrain.com/u/2"]);
        assert_eq!(warnings.len(), 5);
    }

    #[test]
    fn test_decode_keeps_name_and_rejects_bad_shapes() {
        let (catalog, _) =
            decode_catalog(json!({"name": "HydraSteam", "downloads": []}), "SteamRip");
        assert_eq!(catalog.unwrap().name, "HydraSteam");

        assert!(decode_catalog(json!({"downloads": {}}), "SteamRip").0.is_none());
        assert!(decode_catalog(json!("text"), "SteamRip").0.is_none());
    }
}
