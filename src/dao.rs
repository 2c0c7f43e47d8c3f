use anyhow::Result;
use sqlx::{AnyConnection, AnyPool};

use crate::types::Item;

type ItemRow = (String, String, String, String, String, String, i64);

// Use COALESCE to avoid decoding NULL directly into Option<String> with the Any driver
const SELECT_ITEM: &str = "SELECT detail_url, category, title, thumbnail_url, duration_label,\n         COALESCE(resolved_stream_url, ''), inserted_at FROM items";

fn item_from_row(row: ItemRow) -> Item {
    let (detail_url, category, title, thumbnail_url, duration_label, resolved, inserted_at) = row;
    Item {
        detail_url,
        category,
        title,
        thumbnail_url,
        duration_label,
        resolved_stream_url: Some(resolved).filter(|s| !s.is_empty()),
        inserted_at,
    }
}

/// Insert or update one row. A stored stream address survives an update
/// that does not carry one.
pub async fn upsert_item(conn: &mut AnyConnection, category: &str, item: &Item) -> Result<()> {
    sqlx::query(
        "INSERT INTO items(detail_url, category, title, thumbnail_url, duration_label, resolved_stream_url, inserted_at)\n         VALUES(?, ?, ?, ?, ?, ?, ?)\n         ON CONFLICT(detail_url) DO UPDATE SET\n           category=excluded.category, title=excluded.title, thumbnail_url=excluded.thumbnail_url,\n           duration_label=excluded.duration_label,\n           resolved_stream_url=COALESCE(excluded.resolved_stream_url, items.resolved_stream_url),\n           inserted_at=excluded.inserted_at",
    )
    .bind(&item.detail_url)
    .bind(category)
    .bind(&item.title)
    .bind(&item.thumbnail_url)
    .bind(&item.duration_label)
    .bind(&item.resolved_stream_url)
    .bind(item.inserted_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn upsert_items(pool: &AnyPool, category: &str, items: &[Item]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for item in items {
        upsert_item(&mut tx, category, item).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Evict every row of `category` not present in `items`, then upsert
/// `items`, as one transaction.
pub async fn replace_category(pool: &AnyPool, category: &str, items: &[Item]) -> Result<()> {
    let mut tx = pool.begin().await?;
    if items.is_empty() {
        sqlx::query("DELETE FROM items WHERE category = ?")
            .bind(category)
            .execute(&mut *tx)
            .await?;
    } else {
        let placeholders = vec!["?"; items.len()].join(", ");
        let sql = format!("DELETE FROM items WHERE category = ? AND detail_url NOT IN ({placeholders})");
        let mut query = sqlx::query(&sql).bind(category);
        for item in items {
            query = query.bind(&item.detail_url);
        }
        query.execute(&mut *tx).await?;
        for item in items {
            upsert_item(&mut tx, category, item).await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

pub async fn list_by_category(pool: &AnyPool, category: &str) -> Result<Vec<Item>> {
    let sql = format!("{SELECT_ITEM} WHERE category = ? ORDER BY inserted_at DESC, detail_url");
    let rows = sqlx::query_as::<_, ItemRow>(&sql)
        .bind(category)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(item_from_row).collect())
}

pub async fn find_item(pool: &AnyPool, detail_url: &str) -> Result<Option<Item>> {
    let sql = format!("{SELECT_ITEM} WHERE detail_url = ? LIMIT 1");
    let row = sqlx::query_as::<_, ItemRow>(&sql)
        .bind(detail_url)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(item_from_row))
}

pub async fn count_by_category(pool: &AnyPool, category: &str) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE category = ?")
        .bind(category)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn trim_category(pool: &AnyPool, category: &str, keep: u32) -> Result<u64> {
    let res = sqlx::query(
        "DELETE FROM items WHERE category = ? AND detail_url NOT IN (\n           SELECT detail_url FROM items WHERE category = ? ORDER BY inserted_at DESC, detail_url LIMIT ?\n         )",
    )
    .bind(category)
    .bind(category)
    .bind(i64::from(keep))
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn clear_stream(pool: &AnyPool, detail_url: &str) -> Result<u64> {
    let res = sqlx::query("UPDATE items SET resolved_stream_url = NULL WHERE detail_url = ?")
        .bind(detail_url)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn delete_category(pool: &AnyPool, category: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM items WHERE category = ?")
        .bind(category)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn delete_all(pool: &AnyPool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM items").execute(pool).await?;
    Ok(res.rows_affected())
}
