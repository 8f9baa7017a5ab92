//! Page to [`GameRecord`] extraction.
//!
//! Every field is read through an ordered list of independent strategies; the first one
//! that yields a value wins. Reaching past the first strategy, or running out of
//! strategies, is reported through [`Extraction::warnings`] instead of failing, except
//! for the title: a page without one produces no record at all.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::date::normalize_date;
use crate::error::Res;
use crate::fetch::selector;
use crate::record::{GameRecord, UNKNOWN};

/// Mirror hosts recognised anywhere on a page.
pub const KNOWN_HOSTS: [&str; 6] = [
    "megadb.net",
    "pixeldrain.com",
    "gofile.io",
    "1fichier.com",
    "mega.nz",
    "buzzheavier.com",
];

static LABELED_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:published|released|date|posted on):?\s*([a-z]+\s+\d{1,2},\s+\d{4})")
        .unwrap()
});
static DATE_SHAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]+\s+\d{1,2},\s+\d{4}").unwrap());
static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:game\s+size|size)\s*:\s*(\d+(?:[.,]\d+)?\s*(?:TB|GB|MB|KB))\b").unwrap()
});
static DOWNLOAD_HERE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)download\s+here").unwrap());
static SECTION_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)download|links|buttons|mirror").unwrap());

/// Longest unlabeled text node still considered a standalone date.
const MAX_BARE_DATE_LEN: usize = 30;
const SIZE_LABELS: [&str; 2] = ["game size:", "size:"];
const SECTION_WORDS: [&str; 3] = ["download", "mirror", "link"];
const NON_CONTENT_TAGS: [&str; 5] = ["script", "style", "a", "link", "title"];

type Strategy<T> = (&'static str, fn(&Extractor, &Html) -> Option<T>);

const TITLE_STRATEGIES: [Strategy<String>; 3] = [
    ("entry heading", Extractor::title_from_entry_heading),
    ("post container heading", Extractor::title_from_post_container),
    ("page <title>", Extractor::title_from_head),
];

const DATE_STRATEGIES: [Strategy<String>; 5] = [
    ("JSON-LD metadata", Extractor::date_from_json_ld),
    ("published-time meta tag", Extractor::date_from_meta),
    ("date label element", Extractor::date_from_label_element),
    ("labeled date text", Extractor::date_from_labeled_text),
    ("unlabeled date text", Extractor::date_from_bare_text),
];

const SIZE_STRATEGIES: [Strategy<String>; 3] = [
    ("GAME INFO block", Extractor::size_from_game_info),
    ("labeled size element", Extractor::size_from_label),
    ("size text pattern", Extractor::size_from_text),
];

const LINK_STRATEGIES: [Strategy<Vec<String>>; 3] = [
    ("download buttons", Extractor::links_from_buttons),
    ("known mirror hosts", Extractor::links_from_known_hosts),
    ("download sections", Extractor::links_from_sections),
];

/// Outcome of reading one page. `record` is `None` only when no title was found.
#[derive(Debug, Default)]
pub struct Extraction {
    pub record: Option<GameRecord>,
    pub warnings: Vec<String>,
}

struct Selectors {
    entry_title: Selector,
    post_inner_heading: Selector,
    head_title: Selector,
    json_ld: Selector,
    published_meta: Selector,
    date_labels: [Selector; 2],
    h4: Selector,
    list_item: Selector,
    strong: Selector,
    anchor: Selector,
    shortcode_button: Selector,
    section: Selector,
}

pub struct Extractor {
    selectors: Selectors,
}

impl Extractor {
    pub fn new() -> Res<Self> {
        Ok(Extractor {
            selectors: Selectors {
                entry_title: selector("h1.entry-title")?,
                post_inner_heading: selector("div.post-inner h1")?,
                head_title: selector("title")?,
                json_ld: selector(r#"script[type="application/ld+json"]"#)?,
                published_meta: selector(r#"meta[property="article:published_time"]"#)?,
                date_labels: [
                    selector("span.date.meta-item.tie-icon")?,
                    selector("div.single-post-meta span.date")?,
                ],
                h4: selector("h4")?,
                list_item: selector("li")?,
                strong: selector("strong")?,
                anchor: selector("a[href]")?,
                shortcode_button: selector(r#"a[class*="shortc-button"][href]"#)?,
                section: selector("div, p")?,
            },
        })
    }

    pub fn extract(&self, document: &Html, source_url: &str) -> Extraction {
        let mut fields = Cascade {
            extractor: self,
            document,
            source_url,
            warnings: Vec::new(),
        };

        let Some(title) = fields.run("title", &TITLE_STRATEGIES) else {
            fields.warnings.push(format!(
                "Title NOT FOUND for {} after all fallbacks, skipping page",
                source_url
            ));
            return Extraction {
                record: None,
                warnings: fields.warnings,
            };
        };

        let raw_date = fields.run("upload date", &DATE_STRATEGIES);
        let upload_date = match raw_date.as_deref().and_then(normalize_date) {
            Some(date) => date,
            None => {
                fields.warnings.push(format!(
                    "Upload date NOT FOUND or PARSED for {}, raw date string was: {:?}",
                    source_url, raw_date
                ));
                String::from(UNKNOWN)
            }
        };

        let file_size = fields.run("file size", &SIZE_STRATEGIES).unwrap_or_else(|| {
            fields
                .warnings
                .push(format!("File size NOT FOUND for {}", source_url));
            String::from(UNKNOWN)
        });

        let uris = match fields.run("download links", &LINK_STRATEGIES) {
            Some(uris) => uris,
            None => {
                fields.warnings.push(format!(
                    "Found title {:?} for {} but NO download URLs, keeping partial record",
                    title, source_url
                ));
                Vec::new()
            }
        };

        Extraction {
            record: Some(GameRecord {
                title,
                upload_date,
                file_size,
                uris,
            }),
            warnings: fields.warnings,
        }
    }

    fn title_from_entry_heading(&self, document: &Html) -> Option<String> {
        first_text(document, &self.selectors.entry_title)
    }

    fn title_from_post_container(&self, document: &Html) -> Option<String> {
        first_text(document, &self.selectors.post_inner_heading)
    }

    /// Page titles read "<Game> » <Site>"; the part before the glyph is the game.
    fn title_from_head(&self, document: &Html) -> Option<String> {
        let full = first_text(document, &self.selectors.head_title)?;

        match full.split('»').next().map(str::trim) {
            Some(head) if !head.is_empty() => Some(head.to_owned()),
            _ => Some(full),
        }
    }

    fn date_from_json_ld(&self, document: &Html) -> Option<String> {
        document.select(&self.selectors.json_ld).find_map(|script| {
            let json = script.text().collect::<String>();
            serde_json::from_str::<serde_json::Value>(&json)
                .ok()
                .as_ref()
                .and_then(json_ld_date)
        })
    }

    fn date_from_meta(&self, document: &Html) -> Option<String> {
        document
            .select(&self.selectors.published_meta)
            .filter_map(|meta| meta.attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty())
            .map(str::to_owned)
    }

    fn date_from_label_element(&self, document: &Html) -> Option<String> {
        self.selectors
            .date_labels
            .iter()
            .find_map(|label| first_text(document, label))
    }

    fn date_from_labeled_text(&self, document: &Html) -> Option<String> {
        text_nodes(document)
            .filter(|(_, parent)| !is_tag(*parent, &["script", "style"]))
            .find_map(|(text, _)| {
                LABELED_DATE_RE
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|date| date.as_str().to_owned())
            })
    }

    fn date_from_bare_text(&self, document: &Html) -> Option<String> {
        text_nodes(document)
            .filter(|(text, parent)| {
                !is_tag(*parent, &NON_CONTENT_TAGS) && text.trim().len() < MAX_BARE_DATE_LEN
            })
            .find_map(|(text, _)| DATE_SHAPE_RE.find(text).map(|date| date.as_str().to_owned()))
    }

    /// `<h4>GAME INFO</h4>` followed by a `div.plus.tie-list-shortcode` list whose
    /// items look like `<li><strong>Game Size: </strong>2.8 GB</li>`.
    fn size_from_game_info(&self, document: &Html) -> Option<String> {
        let heading = document
            .select(&self.selectors.h4)
            .find(|h4| squash(h4.text()).to_uppercase().contains("GAME INFO"))?;

        let list = heading.next_siblings().filter_map(ElementRef::wrap).find(|el| {
            el.value().name() == "div" && {
                let classes = el.value().classes().collect::<Vec<_>>();
                classes.contains(&"plus") && classes.contains(&"tie-list-shortcode")
            }
        })?;

        list.select(&self.selectors.list_item).find_map(|li| {
            let label = li
                .select(&self.selectors.strong)
                .find(|strong| squash(strong.text()).contains("Game Size:"))?;

            let after = following_text(label);
            let value = if after.is_empty() {
                squash(li.text()).replace(&squash(label.text()), "").trim().to_owned()
            } else {
                after
            };

            has_digit(&value).then_some(value)
        })
    }

    fn size_from_label(&self, document: &Html) -> Option<String> {
        SIZE_LABELS.iter().find_map(|keyword| {
            document
                .select(&self.selectors.strong)
                .filter(|strong| squash(strong.text()).eq_ignore_ascii_case(keyword))
                .find_map(|strong| {
                    let sibling = strong
                        .next_siblings()
                        .map(|node| match ElementRef::wrap(node) {
                            Some(element) => squash(element.text()),
                            None => node
                                .value()
                                .as_text()
                                .map(|text| text.trim().to_owned())
                                .unwrap_or_default(),
                        })
                        .find(|text| !text.is_empty());

                    if let Some(value) = sibling.filter(|value| has_digit(value)) {
                        return Some(value);
                    }

                    let parent = strong.parent().and_then(ElementRef::wrap)?;
                    let value = squash(parent.text())
                        .replace(&squash(strong.text()), "")
                        .trim()
                        .to_owned();

                    has_digit(&value).then_some(value)
                })
        })
    }

    fn size_from_text(&self, document: &Html) -> Option<String> {
        let text = text_nodes(document)
            .filter(|(_, parent)| !is_tag(*parent, &["script", "style"]))
            .map(|(text, _)| text)
            .collect::<Vec<_>>()
            .join(" ");

        SIZE_RE
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|size| size.as_str().trim().to_owned())
    }

    fn links_from_buttons(&self, document: &Html) -> Option<Vec<String>> {
        let mut buttons = document
            .select(&self.selectors.shortcode_button)
            .collect::<Vec<_>>();

        if buttons.is_empty() {
            buttons = document
                .select(&self.selectors.anchor)
                .filter(|anchor| DOWNLOAD_HERE_RE.is_match(&squash(anchor.text())))
                .collect();
        }

        collect_hrefs(buttons.into_iter(), is_absolute_mirror)
    }

    fn links_from_known_hosts(&self, document: &Html) -> Option<Vec<String>> {
        collect_hrefs(document.select(&self.selectors.anchor), |href| {
            KNOWN_HOSTS.iter().any(|host| href.contains(host))
        })
    }

    fn links_from_sections(&self, document: &Html) -> Option<Vec<String>> {
        let mut sections = document
            .select(&self.selectors.section)
            .filter(|el| el.attr("class").is_some_and(|class| SECTION_CLASS_RE.is_match(class)))
            .collect::<Vec<_>>();

        if sections.is_empty() {
            sections = document
                .select(&self.selectors.section)
                .filter(|el| {
                    let text = el.text().collect::<String>().to_lowercase();
                    SECTION_WORDS.iter().any(|word| text.contains(word))
                })
                .collect();
        }

        collect_hrefs(
            sections
                .into_iter()
                .flat_map(|section| section.select(&self.selectors.anchor)),
            is_absolute_mirror,
        )
    }
}

/// One page's trip through the strategy lists, collecting fallback warnings.
struct Cascade<'a> {
    extractor: &'a Extractor,
    document: &'a Html,
    source_url: &'a str,
    warnings: Vec<String>,
}

impl Cascade<'_> {
    fn run<T>(&mut self, field: &str, strategies: &[Strategy<T>]) -> Option<T> {
        for (tier, (name, strategy)) in strategies.iter().enumerate() {
            if let Some(value) = strategy(self.extractor, self.document) {
                if tier > 0 {
                    self.warnings.push(format!(
                        "Used fallback #{} ({}) for {} on {}",
                        tier, name, field, self.source_url
                    ));
                }
                return Some(value);
            }
        }

        None
    }
}

fn json_ld_date(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => ["datePublished", "dateModified"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(|date| date.as_str()))
            .map(str::trim)
            .find(|date| !date.is_empty())
            .map(str::to_owned)
            .or_else(|| map.get("@graph").and_then(json_ld_date)),
        serde_json::Value::Array(items) => items.iter().find_map(json_ld_date),
        _ => None,
    }
}

/// Every text node with its parent element.
fn text_nodes(document: &Html) -> impl Iterator<Item = (&str, Option<ElementRef<'_>>)> {
    document.root_element().descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        Some((&**text, node.parent().and_then(ElementRef::wrap)))
    })
}

fn is_tag(element: Option<ElementRef<'_>>, names: &[&str]) -> bool {
    element.is_some_and(|el| names.contains(&el.value().name()))
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|el| squash(el.text()))
        .find(|text| !text.is_empty())
}

/// Joins text fragments with single spaces.
fn squash<'a>(fragments: impl Iterator<Item = &'a str>) -> String {
    fragments
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn following_text(element: ElementRef<'_>) -> String {
    squash(element.next_siblings().flat_map(|node| {
        let fragments: Vec<&str> = match ElementRef::wrap(node) {
            Some(el) => el.text().collect(),
            None => node.value().as_text().map(|text| &**text).into_iter().collect(),
        };
        fragments
    }))
}

fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

fn is_inert(href: &str) -> bool {
    href.to_ascii_lowercase().contains("javascript:void(0)")
}

fn is_absolute_mirror(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http") || lower.starts_with("magnet")
}

/// Distinct, sorted hrefs of `anchors` passing `keep`; `None` when nothing passes.
fn collect_hrefs<'a>(
    anchors: impl Iterator<Item = ElementRef<'a>>,
    keep: impl Fn(&str) -> bool,
) -> Option<Vec<String>> {
    let hrefs = anchors
        .filter_map(|anchor| anchor.attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !is_inert(href) && keep(href))
        .map(str::to_owned)
        .collect::<BTreeSet<_>>();

    if hrefs.is_empty() {
        None
    } else {
        Some(hrefs.into_iter().collect())
    }
}
