//! Listing page extraction.
//!
//! Each item container on the page is handled on its own: a container that
//! lacks a usable title, link or thumbnail is logged and skipped, and the
//! remaining containers are still extracted in page order.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::ListingSelectors;
use crate::error::{FeedError, Result};
use crate::types::ListingEntry;

/// Outcome of one listing page: accepted entries plus counts for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingReport {
    pub entries: Vec<ListingEntry>,
    /// Containers matched by the container selector.
    pub containers: usize,
    /// Containers skipped because a required field was missing or malformed.
    pub dropped: usize,
}

/// Why a single container did not yield an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CandidateError {
    MissingTitle,
    MissingLink,
    MalformedLink(String),
    MissingThumbnail,
}

impl std::fmt::Display for CandidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateError::MissingTitle => write!(f, "missing title"),
            CandidateError::MissingLink => write!(f, "missing detail link"),
            CandidateError::MalformedLink(href) => write!(f, "unexpected link format: {href}"),
            CandidateError::MissingThumbnail => write!(f, "missing thumbnail"),
        }
    }
}

/// Compiled selectors plus the site origin used to absolutize links.
pub struct ListingExtractor {
    origin: Url,
    container: Selector,
    title_anchor: Selector,
    title_fallback: Selector,
    thumbnail: Selector,
    duration: Selector,
    lazy_attr: String,
    eager_attr: String,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| FeedError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl ListingExtractor {
    pub fn new(site_origin: &str, selectors: &ListingSelectors) -> Result<Self> {
        let origin = Url::parse(site_origin).map_err(|e| FeedError::InvalidUrl(format!("{site_origin}: {e}")))?;
        Ok(Self {
            origin,
            container: compile(&selectors.container)?,
            title_anchor: compile(&selectors.title_anchor)?,
            title_fallback: compile(&selectors.title_fallback)?,
            thumbnail: compile(&selectors.thumbnail)?,
            duration: compile(&selectors.duration)?,
            lazy_attr: selectors.thumbnail_lazy_attr.clone(),
            eager_attr: selectors.thumbnail_eager_attr.clone(),
        })
    }

    /// Parse one listing page. A page without any container is a valid,
    /// empty report.
    pub fn extract(&self, html: &str) -> ListingReport {
        let document = Html::parse_document(html);
        let mut report = ListingReport::default();

        for (index, container) in document.select(&self.container).enumerate() {
            report.containers += 1;
            match self.extract_one(container, index) {
                Ok(entry) => {
                    debug!("added: {} -> {}", entry.title, entry.detail_url);
                    report.entries.push(entry);
                }
                Err(reason) => {
                    report.dropped += 1;
                    warn!("skipped item {}: {}", index, reason);
                }
            }
        }

        if report.containers == 0 {
            warn!("no item containers matched the container selector");
        } else {
            debug!("found {} containers, kept {}", report.containers, report.entries.len());
        }
        report
    }

    fn extract_one(&self, container: ElementRef<'_>, position: usize) -> Result<ListingEntry, CandidateError> {
        let anchor = container.select(&self.title_anchor).next();

        let title = anchor
            .and_then(|a| non_empty(a.value().attr("title")))
            .or_else(|| anchor.and_then(|a| non_empty(Some(element_text(a).as_str()))))
            .or_else(|| {
                container
                    .select(&self.title_fallback)
                    .next()
                    .and_then(|el| non_empty(Some(element_text(el).as_str())))
            })
            .ok_or(CandidateError::MissingTitle)?;

        let href = anchor
            .and_then(|a| non_empty(a.value().attr("href")))
            .ok_or(CandidateError::MissingLink)?;
        let detail_url = self.absolutize(&href)?;

        let img = container.select(&self.thumbnail).next();
        let thumbnail_url = img
            .and_then(|i| non_empty(i.value().attr(&self.lazy_attr)))
            .or_else(|| img.and_then(|i| non_empty(i.value().attr(&self.eager_attr))))
            .ok_or(CandidateError::MissingThumbnail)?;

        let duration_label = container
            .select(&self.duration)
            .next()
            .map(element_text)
            .unwrap_or_default();

        Ok(ListingEntry { detail_url, title, thumbnail_url, duration_label, position })
    }

    /// Absolute links pass through; origin-rooted links get the site origin.
    fn absolutize(&self, href: &str) -> Result<String, CandidateError> {
        if href.starts_with("http://") || href.starts_with("https://") {
            return Ok(href.to_string());
        }
        if href.starts_with('/') && !href.starts_with("//") {
            return self
                .origin
                .join(href)
                .map(|u| u.to_string())
                .map_err(|_| CandidateError::MalformedLink(href.to_string()));
        }
        Err(CandidateError::MalformedLink(href.to_string()))
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new("https://www.example.com", &ListingSelectors::default()).unwrap()
    }

    fn block(title_attr: &str, href: &str, img: &str, duration: &str) -> String {
        format!(
            r#"<div class="thumb-block">
                 <div class="thumb"><a href="{href}">{img}</a></div>
                 <p class="title"><a href="{href}" {title_attr}>Anchor text</a></p>
                 {duration}
               </div>"#
        )
    }

    #[test]
    fn drops_container_without_thumbnail() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            block(r#"title="Complete""#, "/video1/complete", r#"<img data-src="https://img.test/1.jpg" src="lazy.gif">"#, r#"<span class="duration">10 min</span>"#),
            block(r#"title="No thumb""#, "/video2/no-thumb", "", ""),
        );
        let report = extractor().extract(&html);
        assert_eq!(report.containers, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.title, "Complete");
        assert_eq!(entry.detail_url, "https://www.example.com/video1/complete");
        assert_eq!(entry.thumbnail_url, "https://img.test/1.jpg");
        assert_eq!(entry.duration_label, "10 min");
        assert_eq!(entry.position, 0);
    }

    #[test]
    fn malformed_containers_do_not_stop_extraction() {
        let html = format!(
            "<div>{}{}{}{}</div>",
            block("", "video-relative", r#"<img src="https://img.test/a.jpg">"#, ""),
            block(r#"title="First""#, "/v/1", r#"<img src="https://img.test/1.jpg">"#, ""),
            block(r#"title="Proto""#, "//cdn.test/v/2", r#"<img src="https://img.test/2.jpg">"#, ""),
            block(r#"title="Second""#, "https://other.test/v/3", r#"<img src="https://img.test/3.jpg">"#, ""),
        );
        let report = extractor().extract(&html);
        assert_eq!(report.containers, 4);
        let titles: Vec<_> = report.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
        assert_eq!(report.entries[0].position, 1);
        assert_eq!(report.entries[1].position, 3);
        assert_eq!(report.entries[1].detail_url, "https://other.test/v/3");
    }

    #[test]
    fn title_falls_back_to_anchor_text_then_title_element() {
        let with_text = block("", "/v/1", r#"<img src="https://img.test/1.jpg">"#, "");
        let report = extractor().extract(&with_text);
        assert_eq!(report.entries[0].title, "Anchor text");

        let no_anchor_text = r#"<div class="thumb-block">
              <div class="thumb"><img src="https://img.test/2.jpg"></div>
              <p class="title"><a href="/v/2"> </a> Fallback title</p>
            </div>"#;
        let report = extractor().extract(no_anchor_text);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].title, "Fallback title");
        assert_eq!(report.entries[0].duration_label, "");
    }

    #[test]
    fn eager_src_used_when_lazy_attribute_is_blank() {
        let html = block(r#"title="T""#, "/v/1", r#"<img data-src="  " src="https://img.test/eager.jpg">"#, "");
        let report = extractor().extract(&html);
        assert_eq!(report.entries[0].thumbnail_url, "https://img.test/eager.jpg");
    }

    #[test]
    fn page_without_containers_is_empty_not_error() {
        let report = extractor().extract("<html><body><p>maintenance</p></body></html>");
        assert_eq!(report, ListingReport::default());
    }

    #[test]
    fn invalid_selector_is_reported() {
        let selectors = ListingSelectors { container: "div[".into(), ..ListingSelectors::default() };
        let err = ListingExtractor::new("https://www.example.com", &selectors).err().unwrap();
        assert!(matches!(err, FeedError::InvalidSelector { selector, .. } if selector == "div["));
    }
}
