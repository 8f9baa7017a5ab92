use std::time::Duration;

use owo_colors::OwoColorize;
use rand::seq::IndexedRandom;
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT},
};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{Res, ResErr, ResExt};

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const TOO_MANY_REQUESTS_PAUSE: Duration = Duration::from_millis(2500);

/// Body of a fetched page. A 403 is kept apart from other failures because mirror
/// hosts use it to refuse scripted clients, which callers treat as "keep what you have".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Html(String),
    Forbidden,
}

pub trait PageSource {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Res<Page>;
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(config: &HttpConfig) -> Res<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build client")?;

        Ok(HttpSource { client })
    }
}

impl PageSource for HttpSource {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> Res<Page> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, BROWSER_ACCEPT)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");

        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let res = request.send().await.with_context(format_args!(
            "Failed to send request to URL: {}",
            url.bright_blue().italic()
        ))?;
        let stat = res.status();

        if stat == StatusCode::FORBIDDEN {
            return Ok(Page::Forbidden);
        }

        if !stat.is_success() {
            if let StatusCode::TOO_MANY_REQUESTS = stat {
                tokio::time::sleep(TOO_MANY_REQUESTS_PAUSE).await;
                res.error_for_status_ref()
                    .with_context(format_args!(
                        "Failed to fetch URL: {}",
                        url.bright_blue().italic()
                    ))
                    .with_context(format_args!(
                        "Server returned {} response, status code: {}",
                        "`TOO_MANY_REQUESTS`".yellow(),
                        "429".red().bold()
                    ))
                    .context("Waited 2.5 seconds before continuing to avoid more bad responses")?;
            } else {
                res.error_for_status_ref()
                    .with_context(format_args!(
                        "Failed to fetch URL: {}",
                        url.bright_blue().italic()
                    ))
                    .with_context(format_args!(
                        "Server returned status code: {}",
                        stat.as_str().red().bold()
                    ))?;
            }
        }

        let text = res.text().await.with_context(format_args!(
            "Failed to fetch HTML (content) from URL: {}",
            url.bright_blue().italic()
        ))?;

        Ok(Page::Html(text))
    }
}

/// Fetches a page that must be readable; a 403 becomes an error.
pub async fn fetch_html<S: PageSource>(
    source: &S,
    url: &str,
    referer: Option<&str>,
) -> Res<String> {
    match source.fetch(url, referer).await? {
        Page::Html(body) => Ok(body),
        Page::Forbidden => Err(ResErr::new(
            "Failed to fetch page",
            format!("Server returned 403 Forbidden for URL: {}", url),
        )),
    }
}

pub fn selector(css: &'static str) -> Res<Selector> {
    Selector::parse(css)
        .with_context(format_args!("Failed to parse CSS selector: {}", css.yellow()))
}

/// Resolves the `href` of every element matched by `anchor_selector` against `base`.
pub fn extract_links(document: &Html, base: &Url, anchor_selector: &Selector) -> Vec<Res<Url>> {
    document
        .select(anchor_selector)
        .map(|anchor| join_href(anchor, base))
        .collect()
}

pub fn join_href(anchor: ElementRef<'_>, base: &Url) -> Res<Url> {
    let href = anchor.attr("href").ok_or_else(|| {
        ResErr::new(
            "Failed to extract URL from HTML anchor tag (link)",
            String::from("Failed to select 'href' from anchor tag"),
        )
    })?;

    base.join(href.trim()).with_context(format_args!(
        "Failed to resolve relative URL: {}",
        href.bright_blue().italic()
    ))
}

pub fn normalize_url(mut url: Url) -> Res<String> {
    if let Some(domain) = url.domain() {
        let res = url.set_host(Some(&domain.to_lowercase()));
        res.context("Failed to set host domain for URL")?;
    } else {
        return Err(url::ParseError::EmptyHost).context(
            "Failed to normalize host domain for URL as it does not contain a valid host domain",
        );
    }

    url.set_fragment(None);

    Ok(url.to_string())
}

/// Host of `uri` without a leading `www.`, lowercased. `None` for magnets and garbage.
pub fn host_of(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    Some(host.strip_prefix("www.").map(str::to_owned).unwrap_or(host))
}

/// True when `uri`'s host is `domain` or one of its subdomains.
pub fn host_matches(uri: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches("www.").to_ascii_lowercase();

    host_of(uri).is_some_and(|host| host == domain || host.ends_with(&format!(".{}", domain)))
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::{Page, PageSource};
    use crate::error::{Res, ResErr};

    pub enum Fixture {
        Html(String),
        Forbidden,
        Fail,
    }

    /// In-memory site: URL -> canned response. Unknown URLs fail like a dead host.
    #[derive(Default)]
    pub struct FixtureSource {
        pages: HashMap<String, Fixture>,
        pub requests: RefCell<Vec<(String, Option<String>)>>,
    }

    impl FixtureSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, html: &str) -> Self {
            self.pages
                .insert(url.to_owned(), Fixture::Html(html.to_owned()));
            self
        }

        pub fn forbidden(mut self, url: &str) -> Self {
            self.pages.insert(url.to_owned(), Fixture::Forbidden);
            self
        }

        pub fn failing(mut self, url: &str) -> Self {
            self.pages.insert(url.to_owned(), Fixture::Fail);
            self
        }

        pub fn requested(&self, url: &str) -> bool {
            self.requests.borrow().iter().any(|(requested, _)| requested == url)
        }
    }

    impl PageSource for FixtureSource {
        async fn fetch(&self, url: &str, referer: Option<&str>) -> Res<Page> {
            self.requests
                .borrow_mut()
                .push((url.to_owned(), referer.map(str::to_owned)));

            match self.pages.get(url) {
                Some(Fixture::Html(html)) => Ok(Page::Html(html.clone())),
                Some(Fixture::Forbidden) => Ok(Page::Forbidden),
                Some(Fixture::Fail) | None => Err(ResErr::new(
                    "Failed to fetch URL",
                    format!("Connection refused: {}", url),
                )),
            }
        }
    }
}
