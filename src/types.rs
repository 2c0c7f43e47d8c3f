use serde::{Deserialize, Serialize};

/// One listing entry as found on a page, before the controller assigns
/// category and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub detail_url: String,
    pub title: String,
    pub thumbnail_url: String,
    pub duration_label: String,
    /// Container index on the page.
    pub position: usize,
}

/// A cached item record. `detail_url` is the stable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub detail_url: String,
    pub title: String,
    pub thumbnail_url: String,
    pub duration_label: String,
    pub category: String,
    pub resolved_stream_url: Option<String>,
    /// Milliseconds since the epoch; ordering and retention key.
    pub inserted_at: i64,
}

impl Item {
    /// Records missing any of the identifying fields are never cached.
    pub fn is_complete(&self) -> bool {
        !self.detail_url.is_empty() && !self.title.is_empty() && !self.thumbnail_url.is_empty()
    }
}

/// Pagination cursor for one category. Lives for the process, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub current_page: u32,
    pub is_last_page: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self { current_page: 1, is_last_page: false }
    }
}

/// Observable loading state of one category feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub is_refreshing: bool,
    pub is_loading_more: bool,
    pub last_error: Option<String>,
    pub current_page: u32,
    pub is_last_page: bool,
}

impl FeedStatus {
    pub fn is_busy(&self) -> bool {
        self.is_refreshing || self.is_loading_more
    }

    pub fn cursor(&self) -> PageCursor {
        PageCursor { current_page: self.current_page, is_last_page: self.is_last_page }
    }
}
