use clap::ValueHint;
use std::path::{Path, PathBuf};
use std::time::Duration;

use owo_colors::OwoColorize;
use url::Url;

use crate::crawler::CrawlConfig;
use crate::error::{Res, ResExt};
use crate::fetch::HttpConfig;
use crate::output::PublishConfig;
use crate::resolve::ResolverConfig;

static LONG_ABT: &str = r#"
ripcat - Crawls a game-download listing site into a deduplicated JSON catalog

• ripcat discovers game pages from a listing page, extracts title, upload date, file size and mirror links with layered fallbacks, and merges them into a catalog keyed by title.
• The catalog is checkpointed while crawling and published as two partitions: links on the preferred host, and everything else.
"#;

const PAGE_JITTER: Duration = Duration::from_millis(500);
const RESOLVE_JITTER: Duration = Duration::from_millis(500);

#[derive(clap::Parser)]
#[command(
    author,
    version,
    about = "Crawls a game-download listing site into a deduplicated JSON catalog",
    long_about = LONG_ABT
)]
pub struct Args {
    #[arg(long, default_value = "https://steamrip.com/games-list-page/", value_hint = ValueHint::Url)]
    pub listing_url: String,

    #[arg(long, value_hint = ValueHint::FilePath)]
    pub local_html: Option<PathBuf>,

    #[arg(short, long, default_value = "hydrasteam.json", value_hint = ValueHint::FilePath)]
    pub catalog: PathBuf,

    #[arg(long, default_value = "SteamRip")]
    pub name: String,

    #[arg(long, value_hint = ValueHint::FilePath)]
    pub primary: Option<PathBuf>,

    #[arg(long, value_hint = ValueHint::FilePath)]
    pub broad: Option<PathBuf>,

    #[arg(long, default_value = "buzzheavier.com")]
    pub preferred_host: String,

    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub resolve_delay_ms: u64,

    #[arg(long, default_value_t = 20)]
    pub timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub checkpoint_every: usize,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub no_resolve: bool,

    #[arg(long, value_hint = ValueHint::DirPath)]
    pub split_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u64).range(1..))]
    pub per_page: u64,

    #[arg(long)]
    pub git: bool,

    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// `scheme://host/` of the listing page, sent as `Referer`.
    pub fn origin(&self) -> Res<String> {
        let url = Url::parse(&self.listing_url).with_context(format_args!(
            "Failed to parse listing URL: {}",
            self.listing_url.bright_blue().italic()
        ))?;

        Ok(format!("{}/", url.origin().ascii_serialization()))
    }

    pub fn crawl_config(&self) -> Res<CrawlConfig> {
        Ok(CrawlConfig {
            listing_url: self.listing_url.clone(),
            local_html: self.local_html.clone(),
            referer: self.origin()?,
            page_delay: Duration::from_millis(self.delay_ms),
            jitter: PAGE_JITTER,
            checkpoint_every: self.checkpoint_every,
            limit: self.limit,
        })
    }

    /// `None` with `--no-resolve`.
    pub fn resolver_config(&self) -> Res<Option<ResolverConfig>> {
        if self.no_resolve {
            return Ok(None);
        }

        Ok(Some(ResolverConfig {
            delay: Duration::from_millis(self.resolve_delay_ms),
            jitter: RESOLVE_JITTER,
            referer: self.origin()?,
        }))
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            primary: self
                .primary
                .clone()
                .unwrap_or_else(|| sibling(&self.catalog, "primary")),
            broad: self
                .broad
                .clone()
                .unwrap_or_else(|| sibling(&self.catalog, "broad")),
            preferred_host: self.preferred_host.clone(),
            split_dir: self.split_dir.clone(),
            per_page: self.per_page as usize,
        }
    }
}

/// `<dir>/<stem>_<suffix>.json` next to `catalog`.
fn sibling(catalog: &Path, suffix: &str) -> PathBuf {
    let stem = catalog
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("catalog"));

    catalog.with_file_name(format!("{}_{}.json", stem, suffix))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::Parser;

    use super::Args;
    use crate::error::Res;

    #[test]
    fn test_defaults() -> Res<()> {
        let args = Args::parse_from(["ripcat"]);

        assert_eq!(args.origin()?, "https://steamrip.com/");

        let publish = args.publish_config();
        assert_eq!(publish.primary, PathBuf::from("hydrasteam_primary.json"));
        assert_eq!(publish.broad, PathBuf::from("hydrasteam_broad.json"));
        assert_eq!(publish.preferred_host, "buzzheavier.com");
        assert_eq!(publish.per_page, 50);

        let crawl = args.crawl_config()?;
        assert_eq!(crawl.page_delay, Duration::from_millis(1500));
        assert_eq!(crawl.checkpoint_every, 10);
        assert!(args.resolver_config()?.is_some());

        Ok(())
    }

    #[test]
    fn test_overrides() -> Res<()> {
        let args = Args::parse_from([
            "ripcat",
            "-c",
            "data/games.json",
            "--broad",
            "out/all.json",
            "--no-resolve",
            "-n",
            "5",
            "--listing-url",
            "http://localhost:8080/list/",
        ]);

        let publish = args.publish_config();
        assert_eq!(publish.primary, PathBuf::from("data/games_primary.json"));
        assert_eq!(publish.broad, PathBuf::from("out/all.json"));
        assert_eq!(args.crawl_config()?.limit, Some(5));
        assert_eq!(args.origin()?, "http://localhost:8080/");
        assert!(args.resolver_config()?.is_none());

        Ok(())
    }
}
