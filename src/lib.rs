pub mod aggregator;
pub mod config;
pub mod dao;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod listing;
pub mod mapping;
pub mod resolver;
pub mod storage;
pub mod types;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::aggregator::{Aggregator, Feed, FetchOutcome};
    pub use crate::config::{CategoryConfig, FeedConfig, ListingSelectors};
    pub use crate::error::{FeedError, Result};
    pub use crate::fetcher::{HttpFetcher, PageFetcher};
    pub use crate::resolver::{ResolvedStream, StreamResolver, Tier};
    pub use crate::storage::{ItemStore, StoreChange};
    pub use crate::types::{FeedStatus, Item, ListingEntry, PageCursor};
}

pub use aggregator::{Aggregator, Feed, FetchOutcome};
pub use error::FeedError;
