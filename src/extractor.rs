use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

use crate::normalize::{normalize_image, normalize_link};
use crate::sites::SiteDescriptor;
use crate::utils::collapse_whitespace;

/// Generic selectors tried when a site's own selector comes up empty
const FALLBACK_TITLE_SELECTOR: &str = "h2, h3, .title";
const FALLBACK_LINK_SELECTOR: &str = "a";
const FALLBACK_DATE_SELECTOR: &str = ".date, .post-date, .article-date, time";
const DATETIME_SELECTOR: &str = "[datetime]";

/// Image attributes in the order they are tried. Lazy-loading themes leave `src`
/// empty or pointing at a placeholder and keep the real source in `data-*`.
const IMAGE_SOURCE_ATTRS: &[&str] = &["src", "data-src", "data-lazy-src"];

static BACKGROUND_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"background(?:-image)?\s*:[^;]*?url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).ok()
});

/// One harvested article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub source: String,
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid article selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid site address '{url}': {source}")]
    InvalidBase {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Per-site selectors, parsed once per document
struct SiteSelectors {
    article: Selector,
    title: Option<Selector>,
    link: Option<Selector>,
    image: Option<Selector>,
    date: Option<Selector>,
    fallback_title: Option<Selector>,
    fallback_link: Option<Selector>,
    datetime: Option<Selector>,
}

impl SiteSelectors {
    fn parse(site: &SiteDescriptor) -> Result<Self, ExtractError> {
        let article = Selector::parse(&site.article_selector).map_err(|e| {
            ExtractError::InvalidSelector {
                selector: site.article_selector.clone(),
                reason: format!("{:?}", e),
            }
        })?;

        let date = site
            .date_selector
            .as_deref()
            .and_then(|s| parse_optional(s, &site.name))
            .or_else(|| parse_optional(FALLBACK_DATE_SELECTOR, &site.name));

        Ok(Self {
            article,
            title: parse_optional(&site.title_selector, &site.name),
            link: parse_optional(&site.link_selector, &site.name),
            image: parse_optional(&site.image_selector, &site.name),
            date,
            fallback_title: parse_optional(FALLBACK_TITLE_SELECTOR, &site.name),
            fallback_link: parse_optional(FALLBACK_LINK_SELECTOR, &site.name),
            datetime: parse_optional(DATETIME_SELECTOR, &site.name),
        })
    }
}

/// A selector that fails to parse behaves like one that matches nothing
fn parse_optional(selector: &str, site_name: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::debug!("Ignoring invalid selector '{}' for {}: {:?}", selector, site_name, e);
            None
        }
    }
}

/// Extract every usable article from a listing page.
///
/// Items without a title or a resolvable link are skipped; only an unusable
/// article selector or site address fails the whole document.
pub fn extract_records(html: &str, site: &SiteDescriptor) -> Result<Vec<Record>, ExtractError> {
    let base = Url::parse(&site.url).map_err(|source| ExtractError::InvalidBase {
        url: site.url.clone(),
        source,
    })?;
    let selectors = SiteSelectors::parse(site)?;
    let document = Html::parse_document(html);

    let records = document
        .select(&selectors.article)
        .filter_map(|item| extract_item(item, &selectors, site, &base))
        .collect();

    Ok(records)
}

fn extract_item(
    item: ElementRef<'_>,
    selectors: &SiteSelectors,
    site: &SiteDescriptor,
    base: &Url,
) -> Option<Record> {
    let title = extract_title(item, selectors);
    if title.is_empty() {
        log::debug!("Skipping item without title on {}", site.name);
        return None;
    }

    let Some(raw_link) = extract_link(item, selectors) else {
        log::debug!("Skipping '{}' on {}: no link", title, site.name);
        return None;
    };

    let link = match normalize_link(raw_link, base) {
        Ok(url) => url.to_string(),
        Err(e) => {
            log::warn!("❗ Could not parse URL '{}' from {}: {}", raw_link, site.name, e);
            return None;
        }
    };

    let image = selectors
        .image
        .as_ref()
        .and_then(|s| item.select(s).next())
        .and_then(image_source)
        .and_then(|raw| match normalize_image(&raw, base) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                log::warn!("❗ Invalid image URL '{}' from {}: {}", raw, site.name, e);
                None
            }
        });

    Some(Record {
        source: site.name.clone(),
        title,
        link,
        image,
        date: extract_date(item, selectors),
    })
}

/// Concatenated text of every match, whitespace-collapsed
fn select_text(item: ElementRef<'_>, selector: Option<&Selector>) -> String {
    let Some(selector) = selector else {
        return String::new();
    };
    let text: String = item.select(selector).flat_map(|el| el.text()).collect();
    collapse_whitespace(&text)
}

fn first_attr<'a>(item: ElementRef<'a>, selector: Option<&Selector>, attr: &str) -> Option<&'a str> {
    selector
        .and_then(|s| item.select(s).next())
        .and_then(|el| el.value().attr(attr))
        .filter(|value| !value.trim().is_empty())
}

fn extract_title(item: ElementRef<'_>, selectors: &SiteSelectors) -> String {
    let title = select_text(item, selectors.title.as_ref());
    if !title.is_empty() {
        return title;
    }
    select_text(item, selectors.fallback_title.as_ref())
}

fn extract_link<'a>(item: ElementRef<'a>, selectors: &SiteSelectors) -> Option<&'a str> {
    first_attr(item, selectors.link.as_ref(), "href")
        .or_else(|| first_attr(item, selectors.fallback_link.as_ref(), "href"))
}

fn extract_date(item: ElementRef<'_>, selectors: &SiteSelectors) -> Option<String> {
    let text = select_text(item, selectors.date.as_ref());
    if !text.is_empty() {
        return Some(text);
    }
    first_attr(item, selectors.datetime.as_ref(), "datetime").map(|d| d.trim().to_string())
}

/// Walk the image fallback chain: direct and lazy sources, lazy srcset,
/// the parent's `data-bg`, then an inline background style.
fn image_source(img: ElementRef<'_>) -> Option<String> {
    let element = img.value();

    IMAGE_SOURCE_ATTRS
        .iter()
        .filter_map(|attr| element.attr(attr))
        .map(str::trim)
        .find(|value| is_usable_source(value))
        .map(str::to_string)
        .or_else(|| element.attr("data-srcset").and_then(first_srcset_candidate))
        .or_else(|| {
            img.parent()
                .and_then(ElementRef::wrap)
                .and_then(|parent| parent.value().attr("data-bg"))
                .map(str::trim)
                .filter(|value| is_usable_source(value))
                .map(str::to_string)
        })
        .or_else(|| element.attr("style").and_then(background_image_url))
}

// Inline `data:` URIs are lazy-load placeholders, never the real picture
fn is_usable_source(value: &str) -> bool {
    !value.is_empty() && !value.starts_with("data:")
}

fn first_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()
        .and_then(|candidate| candidate.split_whitespace().next())
        .filter(|url| is_usable_source(url))
        .map(str::to_string)
}

fn background_image_url(style: &str) -> Option<String> {
    BACKGROUND_URL
        .as_ref()?
        .captures(style)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| is_usable_source(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteDescriptor {
        SiteDescriptor::new("Example", "https://example.com/news/", ".post", "h2", "a", "img")
    }

    fn one(html: &str, site: &SiteDescriptor) -> Record {
        let mut records = extract_records(html, site).unwrap();
        assert_eq!(records.len(), 1, "expected exactly one record: {:?}", records);
        records.remove(0)
    }

    #[test]
    fn test_basic_post_without_image() {
        let html = r#"<div class="post"><h2>Title A</h2><a href="/x">Read</a></div>"#;
        let record = one(html, &site());

        assert_eq!(record.source, "Example");
        assert_eq!(record.title, "Title A");
        assert_eq!(record.link, "https://example.com/x");
        assert_eq!(record.image, None);
        assert_eq!(record.date, None);
    }

    #[test]
    fn test_title_whitespace_collapsed() {
        let html = "<div class=\"post\"><h2>\n  Big \t\n news\n</h2><a href=\"/x\"></a></div>";
        assert_eq!(one(html, &site()).title, "Big news");
    }

    #[test]
    fn test_title_falls_back_to_generic_headings() {
        let site = SiteDescriptor::new("Example", "https://example.com/", ".post", ".headline", "a", "img");
        let html = r#"<div class="post"><h3>Fallback</h3><a href="/y"></a></div>"#;
        assert_eq!(one(html, &site).title, "Fallback");
    }

    #[test]
    fn test_link_falls_back_to_any_anchor() {
        let site = SiteDescriptor::new("Example", "https://example.com/", ".post", "h2", "a.more", "img");
        let html = r#"<div class="post"><h2>T</h2><a href="/fallback">x</a></div>"#;
        assert_eq!(one(html, &site).link, "https://example.com/fallback");
    }

    #[test]
    fn test_items_without_title_or_link_are_skipped() {
        let html = r#"
            <div class="post"><a href="/no-title"></a></div>
            <div class="post"><h2>No link</h2></div>
            <div class="post"><h2>Kept</h2><a href="/kept"></a></div>
        "#;
        let records = extract_records(html, &site()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Kept");
    }

    #[test]
    fn test_non_navigable_link_discards_item() {
        let html = r#"<div class="post"><h2>Bad</h2><a href="javascript:void(0)"></a></div>"#;
        assert!(extract_records(html, &site()).unwrap().is_empty());
    }

    #[test]
    fn test_no_matches_yield_no_records() {
        let html = "<html><body><article><h2>Other layout</h2></article></body></html>";
        assert!(extract_records(html, &site()).unwrap().is_empty());
        assert!(extract_records("", &site()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_article_selector_is_an_error() {
        let site = SiteDescriptor::new("Broken", "https://example.com/", "div[", "h2", "a", "img");
        let err = extract_records("<div></div>", &site).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidSelector { .. }));
    }

    #[test]
    fn test_invalid_inner_selector_falls_back() {
        let site = SiteDescriptor::new("Example", "https://example.com/", ".post", "h2[", "a[", "img");
        let html = r#"<div class="post"><h2>Still here</h2><a href="/z"></a></div>"#;
        let record = one(html, &site);
        assert_eq!(record.title, "Still here");
        assert_eq!(record.link, "https://example.com/z");
    }

    #[test]
    fn test_invalid_base_is_an_error() {
        let site = SiteDescriptor::new("Broken", "not a url", ".post", "h2", "a", "img");
        assert!(matches!(
            extract_records("", &site),
            Err(ExtractError::InvalidBase { .. })
        ));
    }

    #[test]
    fn test_image_src_resolved() {
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a><img src="img/a.jpg"></div>"#;
        assert_eq!(
            one(html, &site()).image.as_deref(),
            Some("https://example.com/news/img/a.jpg")
        );
    }

    #[test]
    fn test_image_lazy_sources_beat_placeholders() {
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=" data-src="//cdn.example.net/real.jpg">
        </div>"#;
        assert_eq!(
            one(html, &site()).image.as_deref(),
            Some("https://cdn.example.net/real.jpg")
        );
    }

    #[test]
    fn test_image_lazy_srcset_first_candidate() {
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <img data-srcset="/small.jpg 300w, /large.jpg 1024w">
        </div>"#;
        assert_eq!(
            one(html, &site()).image.as_deref(),
            Some("https://example.com/small.jpg")
        );
    }

    #[test]
    fn test_image_data_lazy_src_used_when_earlier_attrs_unusable() {
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <img src="" data-lazy-src="/lazy.jpg">
        </div>"#;
        assert_eq!(
            one(html, &site()).image.as_deref(),
            Some("https://example.com/lazy.jpg")
        );

        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=" data-src="data:," data-lazy-src="/lazy-2.jpg">
        </div>"#;
        assert_eq!(
            one(html, &site()).image.as_deref(),
            Some("https://example.com/lazy-2.jpg")
        );
    }

    #[test]
    fn test_image_placeholder_src_falls_through_to_srcset() {
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=" data-srcset="/a.jpg 1x, /b.jpg 2x">
        </div>"#;
        assert_eq!(
            one(html, &site()).image.as_deref(),
            Some("https://example.com/a.jpg")
        );
    }

    #[test]
    fn test_image_background_fallbacks() {
        let site = SiteDescriptor::new("Example", "https://example.com/", ".post", "h2", "a", ".thumb");
        let parent_bg = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <div data-bg="/bg.jpg"><span class="thumb"></span></div>
        </div>"#;
        assert_eq!(
            one(parent_bg, &site).image.as_deref(),
            Some("https://example.com/bg.jpg")
        );

        let inline_style = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <span class="thumb" style="background-image: url('/style.jpg')"></span>
        </div>"#;
        assert_eq!(
            one(inline_style, &site).image.as_deref(),
            Some("https://example.com/style.jpg")
        );
    }

    #[test]
    fn test_malformed_image_dropped_but_record_kept() {
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a><img src="http://[broken"></div>"#;
        let record = one(html, &site());
        assert_eq!(record.link, "https://example.com/x");
        assert_eq!(record.image, None);
    }

    #[test]
    fn test_date_from_site_selector() {
        let site = site().with_date_selector("span.when");
        let html = r#"<div class="post"><h2>T</h2><a href="/x"></a>
            <span class="when"> 12 mars
                2025 </span><time>ignored</time></div>"#;
        assert_eq!(one(html, &site).date.as_deref(), Some("12 mars 2025"));
    }

    #[test]
    fn test_date_generic_then_datetime_attribute() {
        let generic = r#"<div class="post"><h2>T</h2><a href="/x"></a><p class="post-date">Today</p></div>"#;
        assert_eq!(one(generic, &site()).date.as_deref(), Some("Today"));

        let attr_only = r#"<div class="post"><h2>T</h2><a href="/x"></a><time datetime="2025-03-12"></time></div>"#;
        assert_eq!(one(attr_only, &site()).date.as_deref(), Some("2025-03-12"));
    }

    #[test]
    fn test_background_image_url_parsing() {
        assert_eq!(
            background_image_url("color: red; background-image:url(\"/a.png\")").as_deref(),
            Some("/a.png")
        );
        assert_eq!(
            background_image_url("background: #fff url(/b.png) no-repeat").as_deref(),
            Some("/b.png")
        );
        assert_eq!(background_image_url("color: red"), None);
    }
}
