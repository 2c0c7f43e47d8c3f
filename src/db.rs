use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::{any::AnyConnectOptions, AnyPool, ConnectOptions, migrate::Migrator};
use sqlx::any::AnyPoolOptions;
use std::{path::PathBuf, str::FromStr};
use std::sync::Once;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::dao;
use crate::storage::{ItemStore, StoreChange};
use crate::types::Item;

// Ensure drivers are installed exactly once for sqlx::any
static INSTALL_DRIVERS: Once = Once::new();

// Embed SQL migrations from the migrations/ directory
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// SQLite-backed item cache. Cloning shares the pool and the change channel.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    changes: broadcast::Sender<StoreChange>,
}

impl Database {
    // Create a connection pool. If database_url is None, use a sensible default
    // (SQLite file in the user's data directory).
    pub async fn connect(database_url: Option<&str>) -> Result<Self> {
        // Register compiled-in drivers for sqlx::any
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let url = match database_url {
            Some(u) if !u.trim().is_empty() => u.to_string(),
            _ => default_sqlite_url()?,
        };

        // Quiet by default; callers can enable SQLX_LOG if they want
        let opts = AnyConnectOptions::from_str(&url)
            .with_context(|| format!("invalid database URL: {url}"))?
            .disable_statement_logging();

        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await
            .with_context(|| format!("failed to connect to database: {url}"))?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        debug!("connected to {}", url);
        Ok(Self { pool, changes })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        match MIGRATOR.run(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                let looks_modified = msg.contains("was previously applied but has been modified");
                let duplicate_version = msg.contains("UNIQUE constraint failed: _sqlx_migrations.version");
                if looks_modified || duplicate_version {
                    warn!("migration ledger out of sync, resetting: {}", msg);
                    if let Err(reset) = sqlx::query("DELETE FROM _sqlx_migrations").execute(&self.pool).await {
                        warn!("clearing migration ledger failed: {}", reset);
                    }
                    MIGRATOR.run(&self.pool).await.context("running migrations after ledger reset")
                } else {
                    Err(e).context("running migrations")
                }
            }
        }
    }

    pub async fn count_by_category(&self, category: &str) -> Result<i64> {
        dao::count_by_category(&self.pool, category).await
    }

    pub async fn vacuum(&self) -> Result<()> {
        // Best-effort: works on SQLite
        if let Err(e) = sqlx::query("VACUUM").execute(&self.pool).await {
            warn!("vacuum skipped: {}", e);
        }
        Ok(())
    }

    fn notify(&self, change: StoreChange) {
        // No receivers is fine: nobody is watching.
        let _ = self.changes.send(change);
    }
}

#[async_trait::async_trait]
impl ItemStore for Database {
    async fn upsert_many(&self, category: &str, items: &[Item]) -> Result<()> {
        dao::upsert_items(&self.pool, category, items).await?;
        self.notify(StoreChange::Category(category.to_string()));
        Ok(())
    }

    async fn upsert_one(&self, item: &Item) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        dao::upsert_item(&mut conn, &item.category, item).await?;
        self.notify(StoreChange::Category(item.category.clone()));
        Ok(())
    }

    async fn replace_category(&self, category: &str, items: &[Item]) -> Result<()> {
        dao::replace_category(&self.pool, category, items).await?;
        self.notify(StoreChange::Category(category.to_string()));
        Ok(())
    }

    async fn query_by_category(&self, category: &str) -> Result<Vec<Item>> {
        dao::list_by_category(&self.pool, category).await
    }

    async fn get_by_key(&self, detail_url: &str) -> Result<Option<Item>> {
        dao::find_item(&self.pool, detail_url).await
    }

    async fn invalidate_stream(&self, detail_url: &str) -> Result<bool> {
        let touched = dao::clear_stream(&self.pool, detail_url).await? > 0;
        if touched {
            if let Some(item) = dao::find_item(&self.pool, detail_url).await? {
                self.notify(StoreChange::Category(item.category));
            }
        }
        Ok(touched)
    }

    async fn trim_to_most_recent(&self, category: &str, keep: u32) -> Result<u64> {
        let removed = dao::trim_category(&self.pool, category, keep).await?;
        if removed > 0 {
            self.notify(StoreChange::Category(category.to_string()));
        }
        Ok(removed)
    }

    async fn clear_category(&self, category: &str) -> Result<u64> {
        let removed = dao::delete_category(&self.pool, category).await?;
        self.notify(StoreChange::Category(category.to_string()));
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<u64> {
        let removed = dao::delete_all(&self.pool).await?;
        self.notify(StoreChange::All);
        Ok(removed)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn default_sqlite_url() -> Result<String> {
    let proj = ProjectDirs::from("dev", "pagefeed", "pagefeed")
        .context("unable to determine data directory for default sqlite path")?;
    let mut path: PathBuf = proj.data_dir().to_path_buf();
    std::fs::create_dir_all(&path).with_context(|| format!("creating data dir: {}", path.display()))?;
    path.push("pagefeed.db");
    Ok(sqlite_url_for(&path))
}

/// `sqlite://` URL for a file path, creating the file on first open.
pub fn sqlite_url_for(path: &std::path::Path) -> String {
    // Encode spaces in the path for a valid sqlite URL
    let path_str = path.to_string_lossy().replace(' ', "%20");
    format!("sqlite://{path_str}?mode=rwc")
}

#[cfg(test)]
pub(crate) async fn test_database() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url_for(&dir.path().join("test.db"));
    let db = Database::connect(Some(&url)).await.unwrap();
    db.run_migrations().await.unwrap();
    (dir, db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, category: &str, inserted_at: i64) -> Item {
        Item {
            detail_url: format!("https://www.example.com/{key}"),
            title: format!("title {key}"),
            thumbnail_url: format!("https://img.example.com/{key}.jpg"),
            duration_label: "5 min".into(),
            category: category.into(),
            resolved_stream_url: None,
            inserted_at,
        }
    }

    #[tokio::test]
    async fn query_orders_newest_first() {
        let (_dir, db) = test_database().await;
        db.upsert_many("new", &[item("a", "new", 10), item("b", "new", 30), item("c", "new", 20)]).await.unwrap();
        db.upsert_many("top", &[item("d", "top", 40)]).await.unwrap();

        let keys: Vec<_> = db.query_by_category("new").await.unwrap().into_iter().map(|i| i.title).collect();
        assert_eq!(keys, vec!["title b", "title c", "title a"]);
        assert_eq!(db.count_by_category("top").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_resolved_stream() {
        let (_dir, db) = test_database().await;
        let mut resolved = item("a", "new", 1);
        resolved.resolved_stream_url = Some("https://cdn.example.com/a.m3u8".into());
        db.upsert_one(&resolved).await.unwrap();

        db.upsert_many("new", &[item("a", "new", 2)]).await.unwrap();
        let stored = db.get_by_key(&resolved.detail_url).await.unwrap().unwrap();
        assert_eq!(stored.resolved_stream_url.as_deref(), Some("https://cdn.example.com/a.m3u8"));
        assert_eq!(stored.inserted_at, 2);

        assert!(db.invalidate_stream(&resolved.detail_url).await.unwrap());
        let stored = db.get_by_key(&resolved.detail_url).await.unwrap().unwrap();
        assert_eq!(stored.resolved_stream_url, None);
        assert!(!db.invalidate_stream("https://www.example.com/missing").await.unwrap());
    }

    #[tokio::test]
    async fn epoch_millis_stamps_survive_a_round_trip() {
        let (_dir, db) = test_database().await;
        let stamper = crate::mapping::Stamper::new();
        let older = stamper.next();
        let newer = older + 1_000_000_000;
        db.upsert_many("new", &[item("old", "new", older), item("new", "new", newer)]).await.unwrap();

        let stored = db.get_by_key("https://www.example.com/old").await.unwrap().unwrap();
        assert_eq!(stored.inserted_at, older);
        assert!(older > i64::from(i32::MAX));
        let stamps: Vec<_> = db.query_by_category("new").await.unwrap().into_iter().map(|i| i.inserted_at).collect();
        assert_eq!(stamps, vec![newer, older]);
    }

    #[tokio::test]
    async fn replace_evicts_rows_missing_from_new_set() {
        let (_dir, db) = test_database().await;
        db.upsert_many("new", &[item("a", "new", 1), item("b", "new", 2)]).await.unwrap();
        db.upsert_many("top", &[item("t", "top", 3)]).await.unwrap();

        db.replace_category("new", &[item("b", "new", 5), item("c", "new", 6)]).await.unwrap();
        let titles: Vec<_> = db.query_by_category("new").await.unwrap().into_iter().map(|i| i.title).collect();
        assert_eq!(titles, vec!["title c", "title b"]);
        assert_eq!(db.count_by_category("top").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trim_keeps_most_recent() {
        let (_dir, db) = test_database().await;
        let items: Vec<_> = (0..7).map(|i| item(&format!("k{i}"), "new", i)).collect();
        db.upsert_many("new", &items).await.unwrap();

        assert_eq!(db.trim_to_most_recent("new", 5).await.unwrap(), 2);
        let stamps: Vec<_> = db.query_by_category("new").await.unwrap().into_iter().map(|i| i.inserted_at).collect();
        assert_eq!(stamps, vec![6, 5, 4, 3, 2]);
    }

    #[tokio::test]
    async fn clear_operations_notify_watchers() {
        let (_dir, db) = test_database().await;
        let mut rx = db.changes();
        db.upsert_many("new", &[item("a", "new", 1)]).await.unwrap();
        db.upsert_many("top", &[item("b", "top", 1)]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), StoreChange::Category("new".into()));
        assert_eq!(rx.recv().await.unwrap(), StoreChange::Category("top".into()));

        assert_eq!(db.clear_category("new").await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), StoreChange::Category("new".into()));
        assert_eq!(db.clear_all().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), StoreChange::All);
    }
}
