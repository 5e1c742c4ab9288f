use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// One news source and the selectors used to pull articles out of its listing page.
///
/// Selectors are kept as raw strings and only parsed by the extractor, so a broken
/// selector affects its own site and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDescriptor {
    pub name: String,
    pub url: String,
    pub article_selector: String,
    pub title_selector: String,
    pub link_selector: String,
    pub image_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_selector: Option<String>,
}

impl SiteDescriptor {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        article_selector: impl Into<String>,
        title_selector: impl Into<String>,
        link_selector: impl Into<String>,
        image_selector: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            article_selector: article_selector.into(),
            title_selector: title_selector.into(),
            link_selector: link_selector.into(),
            image_selector: image_selector.into(),
            date_selector: None,
        }
    }

    pub fn with_date_selector(mut self, selector: impl Into<String>) -> Self {
        self.date_selector = Some(selector.into());
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate site name: {0}")]
    DuplicateName(String),
    #[error("site name must not be empty (url: {0})")]
    EmptyName(String),
}

/// Read-only list of sources, shared by every harvest run
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: Vec<SiteDescriptor>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<SiteDescriptor>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for site in &sites {
            if site.name.trim().is_empty() {
                return Err(RegistryError::EmptyName(site.url.clone()));
            }
            if !seen.insert(site.name.as_str()) {
                return Err(RegistryError::DuplicateName(site.name.clone()));
            }
        }
        Ok(Self { sites })
    }

    /// The sources harvested when no `[[sites]]` are configured
    pub fn builtin() -> Self {
        Self {
            sites: builtin_sites(),
        }
    }

    pub fn sites(&self) -> &[SiteDescriptor] {
        &self.sites
    }

    pub fn get(&self, name: &str) -> Option<&SiteDescriptor> {
        self.sites.iter().find(|site| site.name == name)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

fn builtin_sites() -> Vec<SiteDescriptor> {
    vec![
        SiteDescriptor::new("Carenews", "https://www.carenews.com/rse", ".article", "h2", "a", "img"),
        SiteDescriptor::new(
            "Mediatico",
            "https://mediatico.fr/category/actualite/",
            ".post-list-archive__post__hero",
            "h4",
            "a",
            "img",
        ),
        SiteDescriptor::new("Green IT", "https://www.greenit.fr/", "article", ".h2", "a", "img"),
        SiteDescriptor::new(
            "L'Info Durable",
            "https://www.linfodurable.fr/aujourdhui/actualites",
            "article",
            "h2",
            "a",
            "img",
        )
        .with_date_selector("time.fs-14.color-grey-semidark"),
        SiteDescriptor::new(
            "Agence Déclic",
            "https://www.agence-declic.fr/categories/actualite-article-rse/",
            ".c-actualites__item",
            ".c-actualites__itemtitle",
            "a",
            "img",
        )
        .with_date_selector("span.c-actualites__itemdate"),
        SiteDescriptor::new(
            "Innovation24",
            "https://www.innovation24.news/category/rse/",
            ".post",
            ".entry-title",
            "a",
            "img",
        )
        .with_date_selector(".updated"),
        SiteDescriptor::new(
            "Ross Engineering",
            "https://www.ross-eng.com/news/",
            "article",
            "h2",
            "a",
            "img",
        )
        .with_date_selector(".b-card__top--left"),
    ]
}
