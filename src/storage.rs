use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::Item;

/// Notification sent after a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Category(String),
    All,
}

impl StoreChange {
    pub fn touches(&self, category: &str) -> bool {
        match self {
            StoreChange::Category(c) => c == category,
            StoreChange::All => true,
        }
    }
}

/// Durable item cache keyed by `detail_url`.
///
/// Mutations are atomic with respect to readers; `replace_category` in
/// particular never exposes a half-replaced category.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn upsert_many(&self, category: &str, items: &[Item]) -> Result<()>;
    async fn upsert_one(&self, item: &Item) -> Result<()>;
    /// Evict the category and insert `items` in one transaction.
    async fn replace_category(&self, category: &str, items: &[Item]) -> Result<()>;
    /// Items of a category, newest `inserted_at` first.
    async fn query_by_category(&self, category: &str) -> Result<Vec<Item>>;
    async fn get_by_key(&self, detail_url: &str) -> Result<Option<Item>>;
    /// Drop a cached stream address. Returns whether a row was touched.
    async fn invalidate_stream(&self, detail_url: &str) -> Result<bool>;
    /// Keep only the `keep` most recent rows of a category. Returns rows removed.
    async fn trim_to_most_recent(&self, category: &str, keep: u32) -> Result<u64>;
    async fn clear_category(&self, category: &str) -> Result<u64>;
    async fn clear_all(&self) -> Result<u64>;
    /// Subscribe to change notifications; this is what makes
    /// `query_by_category` observable.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_scope() {
        assert!(StoreChange::All.touches("new"));
        assert!(StoreChange::Category("new".into()).touches("new"));
        assert!(!StoreChange::Category("top".into()).touches("new"));
    }
}
