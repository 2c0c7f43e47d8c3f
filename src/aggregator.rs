use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Context;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::FeedConfig;
use crate::db::Database;
use crate::error::{FeedError, Result};
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::listing::ListingExtractor;
use crate::mapping::{items_from_entries, with_resolved_stream, Stamper};
use crate::resolver::StreamResolver;
use crate::storage::{ItemStore, StoreChange};
use crate::types::{FeedStatus, Item, PageCursor};

/// Result of one `refresh` or `load_more` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Rows written to the cache.
    Stored(usize),
    /// The page had no usable items.
    Empty,
    /// Fetch or persist failed; the message is in `FeedStatus::last_error`.
    Failed,
    /// Dropped: another fetch was in flight or the feed reached its last page.
    Skipped,
}

/// Owns the store, fetcher and per-category pagination state.
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

struct Inner {
    config: FeedConfig,
    store: Arc<dyn ItemStore>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: ListingExtractor,
    resolver: StreamResolver,
    stamper: Stamper,
    categories: Mutex<HashMap<String, Arc<CategoryState>>>,
    // per-key in-flight markers for stream resolution
    resolving: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct CategoryState {
    name: String,
    // Cursor and phase live in the status value; `send_if_modified` is the
    // check-and-set that keeps one fetch per category in flight.
    status: watch::Sender<FeedStatus>,
    items: watch::Sender<Vec<Item>>,
    pump_started: AtomicBool,
}

impl CategoryState {
    fn new(name: &str) -> Self {
        let initial = FeedStatus { current_page: 1, ..FeedStatus::default() };
        Self {
            name: name.to_string(),
            status: watch::Sender::new(initial),
            items: watch::Sender::new(Vec::new()),
            pump_started: AtomicBool::new(false),
        }
    }
}

impl Aggregator {
    pub fn new(config: FeedConfig, store: Arc<dyn ItemStore>, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        let extractor = ListingExtractor::new(&config.site_origin, &config.selectors)?;
        let resolver = StreamResolver::new(&config.cdn_hosts);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                fetcher,
                extractor,
                resolver,
                stamper: Stamper::new(),
                categories: Mutex::new(HashMap::new()),
                resolving: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Wire the default SQLite store and HTTP fetcher.
    pub async fn connect(config: FeedConfig, database_url: Option<&str>) -> Result<Self> {
        let db = Database::connect(database_url).await?;
        db.run_migrations().await?;
        let fetcher = HttpFetcher::new(&config)?;
        Self::new(config, Arc::new(db), Arc::new(fetcher))
    }

    pub fn config(&self) -> &FeedConfig { &self.inner.config }

    pub fn categories(&self) -> Vec<String> {
        self.inner.config.categories.keys().cloned().collect()
    }

    /// Handle for one configured category.
    pub fn feed(&self, category: &str) -> Result<Feed> {
        self.inner.config.category(category)?;
        let mut map = self.inner.categories.lock().unwrap_or_else(|p| p.into_inner());
        let state = map
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(CategoryState::new(category)))
            .clone();
        Ok(Feed { inner: self.inner.clone(), state })
    }

    /// Playable address for `item`. Each item is fetched from the network at
    /// most once successfully; later calls are served from the cache.
    pub async fn resolve_stream(&self, item: &Item) -> Result<Option<String>> {
        if let Some(url) = &item.resolved_stream_url {
            return Ok(Some(url.clone()));
        }
        let key = item.detail_url.as_str();
        if let Some(url) = self.cached_stream(key).await? {
            return Ok(Some(url));
        }

        let marker = self.resolve_marker(key);
        let result = {
            let _guard = marker.lock().await;
            self.resolve_locked(item).await
        };
        self.release_marker(key, marker);
        result
    }

    /// Stored record for a detail page, if cached.
    pub async fn cached_item(&self, detail_url: &str) -> Result<Option<Item>> {
        Ok(self.inner.store.get_by_key(detail_url).await?)
    }

    /// Forget the cached address of one item.
    pub async fn invalidate_stream(&self, detail_url: &str) -> Result<bool> {
        Ok(self.inner.store.invalidate_stream(detail_url).await?)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.inner.store.clear_all().await?;
        let states: Vec<_> = {
            let map = self.inner.categories.lock().unwrap_or_else(|p| p.into_inner());
            map.values().cloned().collect()
        };
        for state in states {
            reset_cursor(&state);
        }
        Ok(removed)
    }

    async fn cached_stream(&self, key: &str) -> Result<Option<String>> {
        let stored = self.inner.store.get_by_key(key).await?;
        Ok(stored.and_then(|i| i.resolved_stream_url))
    }

    async fn resolve_locked(&self, item: &Item) -> Result<Option<String>> {
        let inner = &self.inner;
        // A concurrent caller may have finished while we waited for the marker.
        let stored = inner.store.get_by_key(&item.detail_url).await?;
        if let Some(url) = stored.as_ref().and_then(|i| i.resolved_stream_url.clone()) {
            debug!("stream for {} resolved by a concurrent caller", item.detail_url);
            return Ok(Some(url));
        }

        info!("resolving stream from detail page {}", item.detail_url);
        let body = match inner.fetcher.fetch(&item.detail_url).await {
            Ok(body) => body,
            Err(FeedError::EmptyResponse { url }) => {
                warn!("detail page {} had no body", url);
                return Ok(None);
            }
            Err(e) => {
                error!("fetching detail page {} failed: {}", item.detail_url, e);
                return Err(e);
            }
        };

        let Some(stream) = inner.resolver.resolve(&body) else {
            warn!("could not find any stream address on {}", item.detail_url);
            return Ok(None);
        };

        // Only listing-complete records are cached; an unknown item just gets its address.
        let base = match stored {
            Some(stored) => stored,
            None if item.is_complete() => item.clone(),
            None => {
                debug!("not caching stream for incomplete record {}", item.detail_url);
                return Ok(Some(stream.url));
            }
        };
        let updated = with_resolved_stream(&base, stream.url.clone(), inner.stamper.next());
        inner
            .store
            .upsert_one(&updated)
            .await
            .with_context(|| format!("persisting stream for {}", item.detail_url))?;
        Ok(Some(stream.url))
    }

    fn resolve_marker(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.resolving.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    fn release_marker(&self, key: &str, marker: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.inner.resolving.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&marker) <= 2 {
            map.remove(key);
        }
    }
}

/// One category's feed: pagination commands plus observable state.
#[derive(Clone)]
pub struct Feed {
    inner: Arc<Inner>,
    state: Arc<CategoryState>,
}

impl Feed {
    pub fn category(&self) -> &str { &self.state.name }

    /// Loading flags, cursor and last error.
    pub fn status(&self) -> watch::Receiver<FeedStatus> { self.state.status.subscribe() }

    pub fn cursor(&self) -> PageCursor { self.state.status.borrow().cursor() }

    /// Cached items of this category, newest first, updated whenever the
    /// store changes the category.
    pub async fn items(&self) -> Result<watch::Receiver<Vec<Item>>> {
        let rx = self.state.items.subscribe();
        if !self.state.pump_started.swap(true, Ordering::SeqCst) {
            // Subscribe before the first query so no change slips in between.
            let changes = self.inner.store.changes();
            match self.inner.store.query_by_category(&self.state.name).await {
                Ok(items) => {
                    self.state.items.send_replace(items);
                }
                Err(e) => {
                    self.state.pump_started.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
            tokio::spawn(pump_items(Arc::downgrade(&self.inner.store), self.state.clone(), changes));
        }
        Ok(rx)
    }

    /// Current cached items, newest first.
    pub async fn snapshot(&self) -> Result<Vec<Item>> {
        Ok(self.inner.store.query_by_category(&self.state.name).await?)
    }

    /// Fetch page 1 and replace the cached category with it.
    pub async fn refresh(&self) -> FetchOutcome {
        let admitted = self.state.status.send_if_modified(|s| {
            if s.is_busy() {
                return false;
            }
            s.is_refreshing = true;
            s.current_page = 1;
            s.is_last_page = false;
            s.last_error = None;
            true
        });
        if !admitted {
            debug!("refresh of {} skipped: fetch already in flight", self.state.name);
            return FetchOutcome::Skipped;
        }

        match self.fetch_page(1).await {
            Ok(items) if !items.is_empty() => match self.store_page(&items, true).await {
                Ok(()) => {
                    self.finish(|s| s.current_page = 2);
                    FetchOutcome::Stored(items.len())
                }
                Err(e) => self.fail(e, false),
            },
            Ok(_) => {
                warn!("no items found on refresh of {}", self.state.name);
                let cache_empty = self.snapshot().await.map(|v| v.is_empty()).unwrap_or(true);
                self.finish(|s| {
                    if cache_empty {
                        s.last_error = Some("no items found".to_string());
                    }
                });
                FetchOutcome::Empty
            }
            Err(e) => self.fail(e, false),
        }
    }

    /// Fetch the next page and append it. An empty page or a failure marks
    /// the feed as exhausted.
    pub async fn load_more(&self) -> FetchOutcome {
        let mut page = 0;
        let admitted = self.state.status.send_if_modified(|s| {
            if s.is_busy() || s.is_last_page {
                return false;
            }
            s.is_loading_more = true;
            s.last_error = None;
            page = s.current_page;
            true
        });
        if !admitted {
            let s = self.state.status.borrow().clone();
            debug!(
                "load more of {} skipped: refreshing={}, loading_more={}, last_page={}",
                self.state.name, s.is_refreshing, s.is_loading_more, s.is_last_page
            );
            return FetchOutcome::Skipped;
        }

        match self.fetch_page(page).await {
            Ok(items) if !items.is_empty() => match self.store_page(&items, false).await {
                Ok(()) => {
                    self.finish(|s| s.current_page = page + 1);
                    FetchOutcome::Stored(items.len())
                }
                Err(e) => self.fail(e, true),
            },
            Ok(_) => {
                info!("reached last page of {} at page {}", self.state.name, page);
                self.finish(|s| s.is_last_page = true);
                FetchOutcome::Empty
            }
            Err(e) => self.fail(e, true),
        }
    }

    /// Drop the cached items of this category.
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.inner.store.clear_category(&self.state.name).await?;
        reset_cursor(&self.state);
        Ok(removed)
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Item>> {
        let inner = &self.inner;
        let url = inner.config.listing_url(&self.state.name, page)?;
        info!("fetching {} page {}: {}", self.state.name, page, url);

        let body = match inner.fetcher.fetch(&url).await {
            Ok(body) => body,
            Err(FeedError::EmptyResponse { url }) => {
                warn!("response body was empty for {}", url);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let report = inner.extractor.extract(&body);
        if report.entries.is_empty() && !body.trim().is_empty() {
            warn!(
                "{} yielded no items from a non-empty response ({} containers, {} dropped)",
                url, report.containers, report.dropped
            );
        }
        debug!("parsed {} items from {}", report.entries.len(), url);
        Ok(items_from_entries(report.entries, &self.state.name, &inner.stamper))
    }

    async fn store_page(&self, items: &[Item], replace: bool) -> Result<()> {
        let store = &self.inner.store;
        let name = &self.state.name;
        if replace {
            store.replace_category(name, items).await?;
        } else {
            store.upsert_many(name, items).await?;
        }
        let removed = store
            .trim_to_most_recent(name, self.inner.config.retention_per_category)
            .await?;
        if removed > 0 {
            debug!("trimmed {} old items from {}", removed, name);
        }
        Ok(())
    }

    fn finish(&self, update: impl FnOnce(&mut FeedStatus)) {
        self.state.status.send_modify(|s| {
            s.is_refreshing = false;
            s.is_loading_more = false;
            update(s);
        });
    }

    fn fail(&self, e: FeedError, freeze: bool) -> FetchOutcome {
        error!("fetching {} failed: {}", self.state.name, e);
        let message = e.to_string();
        self.finish(|s| {
            s.last_error = Some(message);
            if freeze {
                s.is_last_page = true;
            }
        });
        FetchOutcome::Failed
    }
}

fn reset_cursor(state: &CategoryState) {
    state.status.send_if_modified(|s| {
        if s.is_busy() {
            return false;
        }
        s.current_page = 1;
        s.is_last_page = false;
        true
    });
}

/// Re-query the category whenever the store reports a change touching it.
/// Ends when the store goes away.
async fn pump_items(store: Weak<dyn ItemStore>, state: Arc<CategoryState>, mut changes: broadcast::Receiver<StoreChange>) {
    loop {
        let relevant = match changes.recv().await {
            Ok(change) => change.touches(&state.name),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("item watcher for {} lagged by {} changes", state.name, skipped);
                true
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !relevant {
            continue;
        }
        let Some(store) = store.upgrade() else { break };
        match store.query_by_category(&state.name).await {
            Ok(items) => {
                state.items.send_replace(items);
            }
            Err(e) => {
                warn!("reloading cached items for {} failed: {}", state.name, e);
                state.status.send_modify(|s| s.last_error = Some(format!("unable to load cached items: {e}")));
            }
        }
    }
    debug!("item watcher for {} stopped", state.name);
}
