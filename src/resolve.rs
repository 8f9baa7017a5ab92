use std::sync::LazyLock;
use std::time::Duration;

use owo_colors::OwoColorize;
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::error::{DEBUG, Log, Res, ResExt, WARN};
use crate::fetch::{Page, PageSource, host_matches, join_href, selector};

/// Download-anchor selectors for mirror hosts whose landing page links to the file.
const HOST_RULES: [(&str, &str); 5] = [
    (
        "megadb.net",
        r#"a#downloadbtn[href], a.btn-download[href], a[href*="/download/"]"#,
    ),
    ("pixeldrain.com", r#"a[href*="/api/file/"]"#),
    ("1fichier.com", r#"a.ok.btn-general[href], a.btn-orange[href]"#),
    (
        "buzzheavier.com",
        r#"a.link-button[href], a[href*="/download"]"#,
    ),
    ("gofile.io", r#"a[href*="/download/"]"#),
];

const FILE_EXTENSIONS: [&str; 9] = [
    ".zip", ".rar", ".7z", ".exe", ".iso", ".tar", ".gz", ".msi", ".bin",
];

static REFRESH_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)url\s*=\s*['"]?([^'"\s;]+)"#).unwrap());
static SCRIPT_REDIRECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:(?:window|document|top)\.)?location(?:\.href)?\s*=\s*["']([^"']+)["']|location\.(?:replace|assign)\(\s*["']([^"']+)["']\s*\)"#,
    )
    .unwrap()
});

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Mandatory wait before every mirror-page request.
    pub delay: Duration,
    /// Upper bound of the random extra wait added to `delay`.
    pub jitter: Duration,
    /// Sent as `Referer`, normally the origin of the crawled site.
    pub referer: String,
}

struct HostRule {
    domain: &'static str,
    anchors: Selector,
}

/// Follows mirror landing pages to a more direct download URI.
pub struct Resolver {
    config: ResolverConfig,
    rules: Vec<HostRule>,
    anchor: Selector,
    script: Selector,
    meta: Selector,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Res<Self> {
        let rules = HOST_RULES
            .iter()
            .map(|&(domain, css)| {
                Ok(HostRule {
                    domain,
                    anchors: selector(css)?,
                })
            })
            .collect::<Res<Vec<_>>>()?;

        Ok(Resolver {
            config,
            rules,
            anchor: selector("a[href]")?,
            script: selector("script")?,
            meta: selector("meta[http-equiv][content]")?,
        })
    }

    /// Returns the resolved target, or `uri` unchanged when nothing better is found or
    /// anything goes wrong. Resolution failures are logged; only a failing log write
    /// is returned as an error.
    pub async fn resolve<S: PageSource>(&self, source: &S, uri: &str) -> Res<String> {
        match self.try_resolve(source, uri).await {
            Ok(Some(target)) => {
                format!("Resolved {} -> {}", uri, target.bright_blue().italic())
                    .log(DEBUG)
                    .await?;
                Ok(target)
            }
            Ok(None) => Ok(uri.to_owned()),
            Err(err) => {
                Err::<(), _>(err)
                    .with_context(format_args!(
                        "Keeping original mirror URI: {}",
                        uri.bright_blue().italic()
                    ))
                    .log(WARN)
                    .await?;
                Ok(uri.to_owned())
            }
        }
    }

    async fn try_resolve<S: PageSource>(&self, source: &S, uri: &str) -> Res<Option<String>> {
        let base = Url::parse(uri).with_context(format_args!(
            "Failed to parse mirror URI: {}",
            uri.bright_blue().italic()
        ))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Ok(None);
        }

        self.pause().await;

        let body = match source.fetch(uri, Some(&self.config.referer)).await? {
            Page::Html(body) => body,
            Page::Forbidden => {
                format!(
                    "Mirror page answered 403 Forbidden, keeping original URI: {}",
                    uri.bright_blue().italic()
                )
                .log(WARN)
                .await?;
                return Ok(None);
            }
        };

        let document = Html::parse_document(&body);

        Ok(self.find_target(&document, &base).map(String::from))
    }

    async fn pause(&self) {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));

        tokio::time::sleep(self.config.delay + jitter).await;
    }

    /// Host-specific anchor, then meta refresh, then script redirect for recognised
    /// hosts; any page falls back to the first link to an archive or installer.
    pub fn find_target(&self, document: &Html, base: &Url) -> Option<Url> {
        let rule = self
            .rules
            .iter()
            .find(|rule| host_matches(base.as_str(), rule.domain));

        rule.and_then(|rule| {
            self.anchor_target(document, base, &rule.anchors)
                .or_else(|| self.refresh_target(document, base))
                .or_else(|| self.script_target(document, base))
        })
        .or_else(|| self.file_target(document, base))
    }

    fn anchor_target(&self, document: &Html, base: &Url, anchors: &Selector) -> Option<Url> {
        document
            .select(anchors)
            .filter_map(|anchor| join_href(anchor, base).ok())
            .find(is_web_url)
    }

    fn refresh_target(&self, document: &Html, base: &Url) -> Option<Url> {
        document
            .select(&self.meta)
            .filter(|meta| {
                meta.attr("http-equiv")
                    .is_some_and(|equiv| equiv.trim().eq_ignore_ascii_case("refresh"))
            })
            .filter_map(|meta| meta.attr("content"))
            .filter_map(|content| REFRESH_URL_RE.captures(content))
            .filter_map(|caps| caps.get(1).and_then(|target| base.join(target.as_str()).ok()))
            .find(is_web_url)
    }

    fn script_target(&self, document: &Html, base: &Url) -> Option<Url> {
        document
            .select(&self.script)
            .map(|script| script.text().collect::<String>())
            .find_map(|code| {
                SCRIPT_REDIRECT_RE
                    .captures_iter(&code)
                    .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
                    .filter_map(|target| base.join(target.as_str()).ok())
                    .find(is_web_url)
            })
    }

    fn file_target(&self, document: &Html, base: &Url) -> Option<Url> {
        document
            .select(&self.anchor)
            .filter_map(|anchor| join_href(anchor, base).ok())
            .filter(is_web_url)
            .find(|url| {
                let path = url.path().to_ascii_lowercase();
                FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            })
    }
}

fn is_web_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Resolver, ResolverConfig};
    use crate::error::Res;
    use crate::fetch::testing::FixtureSource;

    const REFERER: &str = "https://steamrip.com/";

    fn resolver() -> Res<Resolver> {
        Resolver::new(ResolverConfig {
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
            referer: String::from(REFERER),
        })
    }

    #[tokio::test]
    async fn test_host_specific_anchor() -> Res<()> {
        let source = FixtureSource::new().page(
            "https://pixeldrain.com/u/abc",
            r#"<html><body><a href="/">home</a><a href="/api/file/abc?download">Download</a></body></html>"#,
        );

        let resolved = resolver()?
            .resolve(&source, "https://pixeldrain.com/u/abc")
            .await?;

        assert_eq!(resolved, "https://pixeldrain.com/api/file/abc?download");
        assert_eq!(
            source.requests.borrow()[0].1.as_deref(),
            Some(REFERER)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_and_script_redirects() -> Res<()> {
        let source = FixtureSource::new()
            .page(
                "https://gofile.io/d/xyz",
                r#"<html><head><meta http-equiv="Refresh" content="0; url=https://store1.gofile.io/file/xyz.rar"></head></html>"#,
            )
            .page(
                "https://megadb.net/f/1",
                r#"<html><body><script>setTimeout(function () { window.location.href = "/dl/1/game.part1"; }, 10);</script></body></html>"#,
            );
        let resolver = resolver()?;

        assert_eq!(
            resolver.resolve(&source, "https://gofile.io/d/xyz").await?,
            "https://store1.gofile.io/file/xyz.rar"
        );
        assert_eq!(
            resolver.resolve(&source, "https://megadb.net/f/1").await?,
            "https://megadb.net/dl/1/game.part1"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_generic_file_link_fallback() -> Res<()> {
        let source = FixtureSource::new()
            .page(
                "https://files.example/page/7",
                r#"<a href="/about">About</a><a href="dl/Game-Setup.EXE">Get it</a>"#,
            )
            .page(
                "https://files.example/page/8",
                r#"<a href="/about">About</a><meta http-equiv="refresh" content="0; url=/elsewhere.zip">"#,
            );
        let resolver = resolver()?;

        assert_eq!(
            resolver.resolve(&source, "https://files.example/page/7").await?,
            "https://files.example/page/dl/Game-Setup.EXE"
        );
        // Redirect directives are only honoured for recognised mirror hosts.
        assert_eq!(
            resolver.resolve(&source, "https://files.example/page/8").await?,
            "https://files.example/page/8"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_failures_keep_original() -> Res<()> {
        let source = FixtureSource::new()
            .forbidden("https://buzzheavier.com/f/1")
            .failing("https://1fichier.com/?dead")
            .page("https://mega.nz/file/q", "<<<not really html");
        let resolver = resolver()?;

        for uri in [
            "https://buzzheavier.com/f/1",
            "https://1fichier.com/?dead",
            "https://mega.nz/file/q",
            "https://unknown.example/never-registered",
            "not a uri at all",
        ] {
            assert_eq!(resolver.resolve(&source, uri).await?, uri);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_magnet_is_not_fetched() -> Res<()> {
        let source = FixtureSource::new();
        let magnet = "magnet:?xt=urn:btih:0123456789abcdef";

        assert_eq!(resolver()?.resolve(&source, magnet).await?, magnet);
        assert!(source.requests.borrow().is_empty());

        Ok(())
    }
}
