use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use owo_colors::OwoColorize;
use rand::Rng;
use scraper::{Html, Selector};
use tokio::sync::watch;
use url::Url;

use crate::error::{DEBUG, INFO, Log, Res, ResExt, WARN};
use crate::extract::{Extraction, Extractor};
use crate::fetch::{PageSource, extract_links, fetch_html, host_of, normalize_url, selector};
use crate::reconcile::{Outcome, reconcile};
use crate::record::{Catalog, GameRecord, canonical_uri, normalize};
use crate::repo::CatalogRepo;
use crate::resolve::Resolver;

/// Listing-page layouts, most specific first. The first one yielding a link wins.
const LISTING_SELECTORS: [&str; 6] = [
    "div.all-games-list-single-item > a[href]",
    "div.post-inner > div.post-content > h2.post-title > a[href]",
    "article.post > h2.entry-title > a[href]",
    "li.game-item > a[href]",
    "div.game-entry > a[href]",
    "a.game-link[href]",
];

const CONTENT_FALLBACK: &str =
    "div[class*='content'] a[href], main[class*='content'] a[href], section[class*='content'] a[href]";

/// Path segments of listing-navigation pages rather than game pages.
const EXCLUDED_SEGMENTS: [&str; 3] = ["page", "category", "tag"];

const BACKOFF_STEP: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub listing_url: String,
    /// Saved copy of the listing page, read instead of fetching `listing_url`.
    pub local_html: Option<PathBuf>,
    /// Sent as `Referer` with every game-page request.
    pub referer: String,
    pub page_delay: Duration,
    pub jitter: Duration,
    pub checkpoint_every: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Interrupted,
    NothingDiscovered,
}

#[derive(Debug)]
pub struct RunReport {
    pub end: RunEnd,
    pub stats: RunStats,
    pub catalog: Catalog,
}

/// Mutable state of one run.
#[derive(Debug, Default)]
struct RunContext {
    stats: RunStats,
    processed: HashSet<String>,
    new_since_checkpoint: usize,
}

pub struct Crawler<'a, S: PageSource, R: CatalogRepo> {
    source: &'a S,
    repo: &'a R,
    extractor: Extractor,
    resolver: Option<Resolver>,
    listing_selectors: Vec<(&'static str, Selector)>,
    content_fallback: Selector,
    config: CrawlConfig,
}

impl<'a, S: PageSource, R: CatalogRepo> Crawler<'a, S, R> {
    /// Without a `resolver`, mirror links are stored as found on the page.
    pub fn new(
        source: &'a S,
        repo: &'a R,
        resolver: Option<Resolver>,
        config: CrawlConfig,
    ) -> Res<Self> {
        let listing_selectors = LISTING_SELECTORS
            .iter()
            .map(|&css| Ok((css, selector(css)?)))
            .collect::<Res<Vec<_>>>()?;

        Ok(Crawler {
            source,
            repo,
            extractor: Extractor::new()?,
            resolver,
            listing_selectors,
            content_fallback: selector(CONTENT_FALLBACK)?,
            config,
        })
    }

    pub async fn run(&self, mut interrupt: watch::Receiver<bool>) -> Res<RunReport> {
        let mut catalog = self.repo.load().await?;
        let mut ctx = RunContext::default();

        let listing_url = Url::parse(&self.config.listing_url).with_context(format_args!(
            "Failed to parse listing URL: {}",
            self.config.listing_url.bright_blue().italic()
        ))?;

        let links = self.discover(&listing_url).await?;

        if links.is_empty() {
            String::from("No game links found on the listing page, check the listing selectors")
                .log(WARN)
                .await?;

            return Ok(RunReport {
                end: RunEnd::NothingDiscovered,
                stats: ctx.stats,
                catalog,
            });
        }

        let total = self.config.limit.map_or(links.len(), |limit| limit.min(links.len()));

        format!(
            "Starting with {} existing games, {} pages to visit",
            catalog.len(),
            total
        )
        .log(INFO)
        .await?;

        for (idx, link) in links.iter().take(total).enumerate() {
            if ctx.processed.contains(link) {
                continue;
            }

            if idx > 0 {
                self.pause(ctx.stats.errors, &mut interrupt).await;
            }

            if *interrupt.borrow() {
                return self.interrupted(ctx, catalog).await;
            }

            format!("Processing {}/{}: {}", idx + 1, total, link.bright_blue().italic())
                .log(INFO)
                .await?;

            let res = tokio::select! {
                res = self.scrape(link) => Some(res),
                Ok(_) = interrupt.wait_for(|stop| *stop) => None,
            };

            let Some(res) = res else {
                return self.interrupted(ctx, catalog).await;
            };

            let record = match res
                .with_context(format_args!(
                    "Failed to process page: {}",
                    link.bright_blue().italic()
                ))
                .log(WARN)
                .await?
            {
                Some(record) => record,
                None => {
                    ctx.stats.errors += 1;
                    continue;
                }
            };

            ctx.processed.insert(link.clone());

            let Some(record) = record else {
                ctx.stats.skipped += 1;
                format!("Skipping page without a usable title: {}", link)
                    .log(WARN)
                    .await?;
                continue;
            };

            self.apply(&mut ctx, &mut catalog, record).await?;
        }

        self.finish(ctx, catalog).await
    }

    /// Reads the listing page from disk or the network and collects game-page links.
    async fn discover(&self, listing_url: &Url) -> Res<Vec<String>> {
        let body = match &self.config.local_html {
            Some(path) => {
                format!("Parsing local listing page: {}", path.display().bright_blue())
                    .log(INFO)
                    .await?;

                tokio::fs::read_to_string(path)
                    .await
                    .with_context(format_args!(
                        "Failed to read local listing page: {}",
                        path.display().red().bold()
                    ))?
            }
            None => {
                format!("Fetching game list from {}", listing_url.as_str().bright_blue().italic())
                    .log(INFO)
                    .await?;

                fetch_html(self.source, listing_url.as_str(), None)
                    .await
                    .context("Failed to fetch the listing page")?
            }
        };

        let (links, strategy) = {
            let document = Html::parse_document(&body);
            self.discover_links(&document, listing_url)
        };

        if let Some(strategy) = strategy {
            format!(
                "Found {} game links using selector: {}",
                links.len(),
                strategy.yellow()
            )
            .log(INFO)
            .await?;
        }

        Ok(links)
    }

    /// Tries each listing selector in order, then any link inside a content container.
    /// Also returns the selector that produced the links.
    pub fn discover_links(
        &self,
        document: &Html,
        listing_url: &Url,
    ) -> (Vec<String>, Option<&'static str>) {
        let strategies = self
            .listing_selectors
            .iter()
            .map(|(css, sel)| (*css, sel))
            .chain(std::iter::once((CONTENT_FALLBACK, &self.content_fallback)));

        for (css, sel) in strategies {
            let mut seen = HashSet::new();
            let links = extract_links(document, listing_url, sel)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|url| is_game_link(listing_url, url))
                .filter_map(|url| normalize_url(url).ok())
                .filter(|link| seen.insert(link.clone()))
                .collect::<Vec<_>>();

            if !links.is_empty() {
                return (links, Some(css));
            }
        }

        (Vec::new(), None)
    }

    /// Fetch, extract, resolve and normalize one game page. `Ok(None)` means the page
    /// has no usable title.
    async fn scrape(&self, url: &str) -> Res<Option<GameRecord>> {
        let body = fetch_html(self.source, url, Some(&self.config.referer)).await?;

        let Extraction { record, warnings } = {
            let document = Html::parse_document(&body);
            self.extractor.extract(&document, url)
        };

        for warning in warnings {
            warning.log(WARN).await?;
        }

        let Some(mut record) = record else {
            return Ok(None);
        };

        let uris = record
            .uris
            .iter()
            .filter_map(|uri| canonical_uri(uri))
            .collect::<Vec<_>>();

        record.uris = match &self.resolver {
            Some(resolver) => {
                let mut resolved = Vec::with_capacity(uris.len());
                for uri in &uris {
                    resolved.push(resolver.resolve(self.source, uri).await?);
                }
                resolved
            }
            None => uris,
        };

        Ok(normalize(record))
    }

    async fn apply(
        &self,
        ctx: &mut RunContext,
        catalog: &mut Catalog,
        record: GameRecord,
    ) -> Res<()> {
        let title = record.title.clone();

        match reconcile(catalog, record) {
            Outcome::New => {
                ctx.stats.new += 1;
                ctx.new_since_checkpoint += 1;
                format!("Added new game: {}", title.green()).log(INFO).await?;
            }
            Outcome::Updated => {
                ctx.stats.updated += 1;
                format!("Updated existing game: {}", title.cyan()).log(INFO).await?;
            }
            Outcome::Unchanged => {
                ctx.stats.unchanged += 1;
                format!("No changes detected for: {}", title).log(DEBUG).await?;
            }
        }

        let every = self.config.checkpoint_every;

        if every > 0 && ctx.new_since_checkpoint >= every {
            ctx.new_since_checkpoint = 0;
            self.checkpoint(catalog, "checkpoint").await?;
        }

        Ok(())
    }

    async fn checkpoint(&self, catalog: &Catalog, label: &str) -> Res<bool> {
        let saved = self
            .repo
            .persist(catalog)
            .await
            .with_context(format_args!("Failed to save catalog ({})", label))
            .log(WARN)
            .await?;

        if saved.is_some() {
            format!("Saved {} games ({})", catalog.len(), label)
                .log(INFO)
                .await?;
        }

        Ok(saved.is_some())
    }

    async fn interrupted(&self, ctx: RunContext, catalog: Catalog) -> Res<RunReport> {
        format!(
            "Interrupt received, saving {} games before exit",
            catalog.len()
        )
        .log(WARN)
        .await?;

        self.checkpoint(&catalog, "interrupted").await?;

        Ok(RunReport {
            end: RunEnd::Interrupted,
            stats: ctx.stats,
            catalog,
        })
    }

    async fn finish(&self, ctx: RunContext, catalog: Catalog) -> Res<RunReport> {
        self.checkpoint(&catalog, "final").await?;

        let RunStats {
            new,
            updated,
            unchanged,
            skipped,
            errors,
        } = ctx.stats;

        format!(
            "Processing complete. New: {}, updated: {}, unchanged: {}, skipped: {}, errors: {}\n\
             Catalog now holds {} games with {} links",
            new.green(),
            updated.cyan(),
            unchanged,
            skipped.yellow(),
            errors.red(),
            catalog.len(),
            catalog.uri_count()
        )
        .log(INFO)
        .await?;

        Ok(RunReport {
            end: RunEnd::Completed,
            stats: ctx.stats,
            catalog,
        })
    }

    /// Inter-page wait, growing with the error count. Returns early on interrupt.
    async fn pause(&self, errors: usize, interrupt: &mut watch::Receiver<bool>) {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));

        tokio::select! {
            _ = tokio::time::sleep(self.config.page_delay + backoff(errors) + jitter) => {}
            Ok(_) = interrupt.wait_for(|stop| *stop) => {}
        }
    }
}

/// Extra inter-page wait after `errors` failed pages, capped at [`MAX_BACKOFF`].
fn backoff(errors: usize) -> Duration {
    let errors = u32::try_from(errors).unwrap_or(u32::MAX);
    BACKOFF_STEP.saturating_mul(errors).min(MAX_BACKOFF)
}

/// Same site as the listing (ignoring `www.`), not the listing itself, not the site
/// root, and not a pagination, category or tag page.
fn is_game_link(listing_url: &Url, candidate: &Url) -> bool {
    if !matches!(candidate.scheme(), "http" | "https") {
        return false;
    }

    match (host_of(candidate.as_str()), host_of(listing_url.as_str())) {
        (Some(host), Some(site)) if host == site => {}
        _ => return false,
    }

    let path = candidate.path().trim_end_matches('/');

    if path.is_empty() || path == listing_url.path().trim_end_matches('/') {
        return false;
    }

    !path
        .split('/')
        .any(|segment| EXCLUDED_SEGMENTS.contains(&segment.to_ascii_lowercase().as_str()))
}

/// Interrupt flag for [`Crawler::run`], set to `true` on Ctrl+C.
pub fn interrupt_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tx.send_replace(true);
        }
    });

    rx
}
