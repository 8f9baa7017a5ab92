use std::path::{Path, PathBuf};

use owo_colors::OwoColorize;
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};

use crate::error::{INFO, Log, Res, ResExt, WARN};
use crate::fetch::host_matches;
use crate::record::{Catalog, GameRecord, title_key};
use crate::repo::to_pretty_json;

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub primary: PathBuf,
    pub broad: PathBuf,
    pub preferred_host: String,
    /// When set, every written partition is also split into pages under this directory.
    pub split_dir: Option<PathBuf>,
    pub per_page: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    pub primary: Catalog,
    pub broad: Catalog,
}

/// Published records carry a fixed key order: title, fileSize, uploadDate, uris.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishedRecord<'a> {
    title: &'a str,
    file_size: &'a str,
    upload_date: &'a str,
    uris: &'a [String],
}

#[derive(Serialize)]
struct PublishedCatalog<'a> {
    name: &'a str,
    downloads: Vec<PublishedRecord<'a>>,
}

impl<'a> From<&'a Catalog> for PublishedCatalog<'a> {
    fn from(catalog: &'a Catalog) -> Self {
        PublishedCatalog {
            name: &catalog.name,
            downloads: catalog
                .downloads
                .iter()
                .map(|record| PublishedRecord {
                    title: &record.title,
                    file_size: &record.file_size,
                    upload_date: &record.upload_date,
                    uris: &record.uris,
                })
                .collect(),
        }
    }
}

/// Splits the catalog by mirror host.
///
/// `primary` holds records with at least one `preferred_host` URI, restricted to those
/// URIs. `broad` holds the remaining URIs of every record that has any, plus records
/// with no URIs at all; a record whose URIs are all preferred is left out of it.
pub fn partition(catalog: &Catalog, preferred_host: &str) -> Partitions {
    let mut primary = Catalog::new(catalog.name.clone());
    let mut broad = Catalog::new(format!("{} (Broad)", catalog.name));

    for record in &catalog.downloads {
        let (preferred, others): (Vec<String>, Vec<String>) = record
            .uris
            .iter()
            .cloned()
            .partition(|uri| host_matches(uri, preferred_host));

        if !preferred.is_empty() {
            primary.downloads.push(GameRecord {
                uris: preferred.clone(),
                ..record.clone()
            });
        }

        if !others.is_empty() || preferred.is_empty() {
            broad.downloads.push(GameRecord {
                uris: others,
                ..record.clone()
            });
        }
    }

    Partitions { primary, broad }
}

/// Pages of at most `per_page` records, sorted by case-insensitive title and named
/// `<name>_part_<n>` starting from 1.
pub fn paginate(catalog: &Catalog, per_page: usize) -> Vec<Catalog> {
    let mut downloads = catalog.downloads.clone();
    downloads.sort_by_key(|record| title_key(&record.title));

    downloads
        .chunks(per_page.max(1))
        .enumerate()
        .map(|(idx, chunk)| Catalog {
            name: format!("{}_part_{}", catalog.name, idx + 1),
            downloads: chunk.to_vec(),
        })
        .collect()
}

/// Writes both partitions; a partition without records produces no file. Each write
/// stands alone, failures are logged and the file is left out of the returned list.
pub async fn publish(catalog: &Catalog, config: &PublishConfig) -> Res<Vec<PathBuf>> {
    let Partitions { primary, broad } = partition(catalog, &config.preferred_host);
    let mut written = Vec::new();

    for (label, partition, path) in [
        ("primary", &primary, &config.primary),
        ("broad", &broad, &config.broad),
    ] {
        if partition.is_empty() {
            format!("No records for the {} partition, not writing {}", label, path.display())
                .log(INFO)
                .await?;
            continue;
        }

        let res = write_partition(partition, path, config)
            .await
            .with_context(format_args!("Failed to publish the {} partition", label))
            .log(WARN)
            .await?;

        if res.is_some() {
            format!(
                "Published {} partition: {} games, {} links -> {}",
                label,
                partition.len(),
                partition.uri_count(),
                path.display().bright_blue()
            )
            .log(INFO)
            .await?;
            written.push(path.clone());
        }
    }

    Ok(written)
}

async fn write_partition(partition: &Catalog, path: &Path, config: &PublishConfig) -> Res<()> {
    write_json(path, partition).await?;

    if let Some(split_dir) = &config.split_dir {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("downloads"));
        let dir = split_dir.join(&stem);

        for (idx, page) in paginate(partition, config.per_page).iter().enumerate() {
            write_json(&dir.join(format!("{}_part_{}.json", stem, idx + 1)), page).await?;
        }
    }

    Ok(())
}

async fn write_json(path: &Path, catalog: &Catalog) -> Res<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(format_args!(
                "Failed to create directory: {}",
                parent.display().red().bold()
            ))?;
    }

    let file = File::create(path).await.with_context(format_args!(
        "Failed to open output file: {}",
        path.display().red().bold()
    ))?;
    let mut wtr = BufWriter::new(file);

    wtr.write_all(&to_pretty_json(&PublishedCatalog::from(catalog))?)
        .await?;

    wtr.flush()
        .await
        .context("Failed to flush writer into output file")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{PublishConfig, paginate, partition, publish};
    use crate::error::{Res, ResExt};
    use crate::record::{Catalog, GameRecord};

    const PREFERRED: &str = "buzzheavier.com";

    fn record(title: &str, uris: &[&str]) -> GameRecord {
        GameRecord {
            title: title.to_owned(),
            upload_date: String::from("2024-12-23"),
            file_size: String::from("2 GB"),
            uris: uris.iter().map(|uri| uri.to_string()).collect(),
        }
    }

    fn catalog() -> Catalog {
        Catalog {
            name: String::from("SteamRip"),
            downloads: vec![
                record(
                    "Mixed",
                    &["https://buzzheavier.com/f/1", "https://gofile.io/d/1"],
                ),
                record("Only Preferred", &["https://dl.buzzheavier.com/f/2"]),
                record("Only Other", &["https://pixeldrain.com/u/3"]),
                record("No Links", &[]),
            ],
        }
    }

    fn titles(catalog: &Catalog) -> Vec<&str> {
        catalog
            .downloads
            .iter()
            .map(|record| record.title.as_str())
            .collect()
    }

    #[test]
    fn test_partition_rules() {
        let parts = partition(&catalog(), PREFERRED);

        assert_eq!(titles(&parts.primary), vec!["Mixed", "Only Preferred"]);
        assert_eq!(
            parts.primary.downloads[0].uris,
            vec!["https://buzzheavier.com/f/1"]
        );

        assert_eq!(titles(&parts.broad), vec!["Mixed", "Only Other", "No Links"]);
        assert_eq!(parts.broad.downloads[0].uris, vec!["https://gofile.io/d/1"]);
        assert!(parts.broad.downloads[2].uris.is_empty());
        assert_eq!(parts.broad.name, "SteamRip (Broad)");
    }

    #[test]
    fn test_partition_covers_every_uri() {
        let source = catalog();
        let parts = partition(&source, PREFERRED);

        assert_eq!(
            parts.primary.uri_count() + parts.broad.uri_count(),
            source.uri_count()
        );
    }

    #[test]
    fn test_paginate_sorts_and_names() {
        let mut source = Catalog::new("SteamRip");
        for title in ["delta", "Alpha", "charlie", "Bravo", "echo"] {
            source.downloads.push(record(title, &[]));
        }

        let pages = paginate(&source, 2);

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].name, "SteamRip_part_1");
        assert_eq!(titles(&pages[0]), vec!["Alpha", "Bravo"]);
        assert_eq!(titles(&pages[2]), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_publish_skips_empty_partition_and_orders_fields() -> Res<()> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let config = PublishConfig {
            primary: dir.path().join("out.json"),
            broad: dir.path().join("out_broad.json"),
            preferred_host: String::from(PREFERRED),
            split_dir: Some(dir.path().join("split")),
            per_page: 50,
        };

        let source = Catalog {
            name: String::from("SteamRip"),
            downloads: vec![record("Only Other", &["https://pixeldrain.com/u/3"])],
        };

        let written = publish(&source, &config).await?;

        assert_eq!(written, vec![config.broad.clone()]);
        assert!(!config.primary.exists());
        assert!(Path::new(&dir.path().join("split/out_broad/out_broad_part_1.json")).exists());

        let json = std::fs::read_to_string(&config.broad).context("Failed to read output")?;
        let title = json.find("\"title\"").unwrap();
        let size = json.find("\"fileSize\"").unwrap();
        let date = json.find("\"uploadDate\"").unwrap();
        let uris = json.find("\"uris\"").unwrap();

        assert!(title < size && size < date && date < uris);

        Ok(())
    }
}
