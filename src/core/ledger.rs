//! 传输台账 - 以内容哈希为主键的去重记录

use crate::db::{LedgerEntry, LedgerRow};
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

/// 台账管理器
pub struct Ledger {
    db: Arc<SqlitePool>,
}

impl Ledger {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// 写入或替换条目（哈希冲突时整体替换元数据）
    pub async fn upsert(&self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO ledger_entries (content_hash, source_path, file_name, file_size, transferred_at, destination, category_id, remote_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(content_hash) DO UPDATE SET
                   source_path = excluded.source_path,
                   file_name = excluded.file_name,
                   file_size = excluded.file_size,
                   transferred_at = excluded.transferred_at,
                   destination = excluded.destination,
                   category_id = excluded.category_id,
                   remote_id = excluded.remote_id"#,
        )
        .bind(&entry.content_hash)
        .bind(&entry.source_path)
        .bind(&entry.file_name)
        .bind(entry.file_size_bytes)
        .bind(entry.transferred_at_epoch_ms)
        .bind(&entry.destination_descriptor)
        .bind(&entry.category_id)
        .bind(&entry.remote_object_id)
        .execute(&*self.db)
        .await?;

        debug!("台账写入: {} -> {}", entry.file_name, entry.content_hash);
        Ok(())
    }

    /// 按哈希查找
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>(
            "SELECT * FROM ledger_entries WHERE content_hash = ?",
        )
        .bind(hash)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    /// 哈希是否已登记
    pub async fn exists(&self, hash: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM ledger_entries WHERE content_hash = ? LIMIT 1")
                .bind(hash)
                .fetch_optional(&*self.db)
                .await?;

        Ok(found.is_some())
    }

    pub async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn count_by_category(&self, category_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE category_id = ?")
                .bind(category_id)
                .fetch_one(&*self.db)
                .await?;
        Ok(count)
    }

    /// 列出类别下的条目，最近传输的在前
    pub async fn list_by_category(&self, category_id: &str) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT * FROM ledger_entries WHERE category_id = ? ORDER BY transferred_at DESC, rowid DESC",
        )
        .bind(category_id)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// 删除条目，返回是否存在被删除的记录
    pub async fn delete_by_hash(&self, hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE content_hash = ?")
            .bind(hash)
            .execute(&*self.db)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!("已从台账移除: {}", hash);
        }
        Ok(removed)
    }

    /// 所有已登记的哈希
    pub async fn all_hashes(&self) -> Result<Vec<String>> {
        let hashes: Vec<String> =
            sqlx::query_scalar("SELECT content_hash FROM ledger_entries ORDER BY content_hash")
                .fetch_all(&*self.db)
                .await?;
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("ledger.db")).await.unwrap();
        (dir, Ledger::new(Arc::new(pool)))
    }

    fn entry(hash: &str, category: Option<&str>, at: i64) -> LedgerEntry {
        LedgerEntry {
            content_hash: hash.to_string(),
            source_path: format!("/src/{}.jpg", hash),
            file_name: format!("{}.jpg", hash),
            file_size_bytes: 42,
            transferred_at_epoch_ms: at,
            destination_descriptor: "/backup".to_string(),
            category_id: category.map(str::to_string),
            remote_object_id: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_same_hash() {
        let (_dir, ledger) = ledger().await;
        ledger.upsert(&entry("aaa", Some("photo"), 1)).await.unwrap();

        let mut replaced = entry("aaa", Some("photo"), 2);
        replaced.destination_descriptor = "cloud".to_string();
        replaced.remote_object_id = Some("r1".to_string());
        ledger.upsert(&replaced).await.unwrap();

        assert_eq!(ledger.count_all().await.unwrap(), 1);
        let found = ledger.find_by_hash("aaa").await.unwrap().unwrap();
        assert_eq!(found, replaced);
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let (_dir, ledger) = ledger().await;
        assert!(!ledger.exists("bbb").await.unwrap());

        ledger.upsert(&entry("bbb", None, 1)).await.unwrap();
        assert!(ledger.exists("bbb").await.unwrap());

        assert!(ledger.delete_by_hash("bbb").await.unwrap());
        assert!(!ledger.delete_by_hash("bbb").await.unwrap());
        assert!(ledger.find_by_hash("bbb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_category_queries() {
        let (_dir, ledger) = ledger().await;
        ledger.upsert(&entry("h1", Some("photo"), 10)).await.unwrap();
        ledger.upsert(&entry("h2", Some("photo"), 30)).await.unwrap();
        ledger.upsert(&entry("h3", Some("music"), 20)).await.unwrap();
        ledger.upsert(&entry("h4", None, 40)).await.unwrap();

        assert_eq!(ledger.count_by_category("photo").await.unwrap(), 2);
        assert_eq!(ledger.count_by_category("document").await.unwrap(), 0);

        let photos = ledger.list_by_category("photo").await.unwrap();
        let hashes: Vec<_> = photos.iter().map(|e| e.content_hash.as_str()).collect();
        assert_eq!(hashes, vec!["h2", "h1"]);

        assert_eq!(ledger.all_hashes().await.unwrap(), vec!["h1", "h2", "h3", "h4"]);
    }
}
