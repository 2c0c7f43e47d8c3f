use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::{Item, ListingEntry};

/// Issues strictly increasing millisecond stamps, even when the wall clock
/// stalls or steps back.
#[derive(Debug, Default)]
pub struct Stamper {
    last: AtomicI64,
}

impl Stamper {
    pub fn new() -> Self { Self::default() }

    /// Reserve `n` consecutive stamps and return the first one.
    pub fn reserve(&self, n: usize) -> i64 {
        let n = n.max(1) as i64;
        let now = current_epoch_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let start = now.max(prev + 1);
            match self.last.compare_exchange_weak(prev, start + n - 1, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return start,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn next(&self) -> i64 { self.reserve(1) }
}

/// Turn one page of entries into records for `category`. The first entry on
/// the page gets the highest stamp so newest-first ordering keeps page order.
pub fn items_from_entries(entries: Vec<ListingEntry>, category: &str, stamper: &Stamper) -> Vec<Item> {
    let count = entries.len();
    let first = stamper.reserve(count);
    entries
        .into_iter()
        .enumerate()
        .map(|(i, e)| Item {
            detail_url: e.detail_url,
            title: e.title,
            thumbnail_url: e.thumbnail_url,
            duration_label: e.duration_label,
            category: category.to_string(),
            resolved_stream_url: None,
            inserted_at: first + (count - 1 - i) as i64,
        })
        .filter(Item::is_complete)
        .collect()
}

/// Copy of `item` carrying a freshly resolved stream address.
pub fn with_resolved_stream(item: &Item, url: String, inserted_at: i64) -> Item {
    Item { resolved_stream_url: Some(url), inserted_at, ..item.clone() }
}

fn current_epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
