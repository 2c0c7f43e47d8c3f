use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Feed configuration, usually loaded from a TOML file. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub site_origin: String,
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout_secs: u64,
    /// Rows kept per category after each successful fetch.
    pub retention_per_category: u32,
    /// Host fragments that mark an address as a stream even without a
    /// recognizable file extension.
    pub cdn_hosts: Vec<String>,
    pub categories: BTreeMap<String, CategoryConfig>,
    pub selectors: ListingSelectors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Path below `site_origin`; `{page}` is replaced with the page number.
    pub listing_path: String,
}

/// CSS selectors used to pull item fields out of a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    pub container: String,
    pub title_anchor: String,
    pub title_fallback: String,
    pub thumbnail: String,
    pub thumbnail_lazy_attr: String,
    pub thumbnail_eager_attr: String,
    pub duration: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            container: "div.thumb-block".into(),
            title_anchor: "p.title a".into(),
            title_fallback: "p.title".into(),
            thumbnail: "div.thumb img".into(),
            thumbnail_lazy_attr: "data-src".into(),
            thumbnail_eager_attr: "src".into(),
            duration: "span.duration".into(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert("new".to_string(), CategoryConfig { listing_path: "/new/{page}/".into() });
        Self {
            site_origin: "https://www.example.com".into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.into(),
            request_timeout_secs: 30,
            retention_per_category: 100,
            cdn_hosts: vec!["googlevideo.com".into()],
            categories,
            selectors: ListingSelectors::default(),
        }
    }
}

impl FeedConfig {
    /// Read a TOML file, or fall back to defaults when `path` is `None`.
    /// Environment overrides are applied in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config file: {}", p.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config file: {}", p.display()))?
            }
            None => Self::default(),
        };
        Ok(cfg.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(origin) = std::env::var("PAGEFEED_SITE_ORIGIN").ok().filter(|s| !s.trim().is_empty()) {
            self.site_origin = origin;
        }
        if let Some(n) = std::env::var("PAGEFEED_RETENTION").ok().and_then(|s| s.parse().ok()) {
            self.retention_per_category = n;
        }
        if let Some(secs) = std::env::var("PAGEFEED_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(ua) = std::env::var("PAGEFEED_USER_AGENT").ok().filter(|s| !s.trim().is_empty()) {
            self.user_agent = ua;
        }
        self
    }

    pub fn category(&self, name: &str) -> Result<&CategoryConfig, FeedError> {
        self.categories
            .get(name)
            .ok_or_else(|| FeedError::UnknownCategory(name.to_string()))
    }

    /// Absolute URL of listing page `page` for `category`.
    pub fn listing_url(&self, category: &str, page: u32) -> Result<String, FeedError> {
        let cat = self.category(category)?;
        let path = cat.listing_path.replace("{page}", &page.to_string());
        Ok(format!("{}{}", self.site_origin.trim_end_matches('/'), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_category_builds_page_urls() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.listing_url("new", 1).unwrap(), "https://www.example.com/new/1/");
        assert_eq!(cfg.listing_url("new", 3).unwrap(), "https://www.example.com/new/3/");
    }

    #[test]
    fn unknown_category_is_rejected() {
        let cfg = FeedConfig::default();
        assert!(matches!(cfg.listing_url("best", 1), Err(FeedError::UnknownCategory(c)) if c == "best"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            site_origin = "https://videos.test/"
            retention_per_category = 20

            [categories.top]
            listing_path = "/top?p={page}"

            [selectors]
            container = "li.card"
        "#;
        let cfg: FeedConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.retention_per_category, 20);
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.selectors.container, "li.card");
        assert_eq!(cfg.selectors.duration, "span.duration");
        assert_eq!(cfg.listing_url("top", 2).unwrap(), "https://videos.test/top?p=2");
        assert!(cfg.category("new").is_err());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.toml");
        std::fs::write(&path, "accept_language = \"de-DE\"\n").unwrap();
        let cfg = FeedConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.accept_language, "de-DE");
        assert!(cfg.categories.contains_key("new"));
    }
}
