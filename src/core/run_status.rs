//! 最近一次运行状态

use crate::db::{RunStatusRow, RunSummary};
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

/// 只保留最后一次运行结果，每次运行覆盖
pub struct RunStatusStore {
    db: Arc<SqlitePool>,
}

impl RunStatusStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn save(&self, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO run_status (id, timestamp, success, success_count, skip_count, fail_count, error_message)
               VALUES (1, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   timestamp = excluded.timestamp,
                   success = excluded.success,
                   success_count = excluded.success_count,
                   skip_count = excluded.skip_count,
                   fail_count = excluded.fail_count,
                   error_message = excluded.error_message"#,
        )
        .bind(summary.timestamp)
        .bind(summary.success)
        .bind(summary.success_count as i64)
        .bind(summary.skip_count as i64)
        .bind(summary.fail_count as i64)
        .bind(&summary.error_message)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    pub async fn last(&self) -> Result<Option<RunSummary>> {
        let row = sqlx::query_as::<_, RunStatusRow>(
            "SELECT timestamp, success, success_count, skip_count, fail_count, error_message FROM run_status WHERE id = 1",
        )
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_last_run_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("status.db")).await.unwrap();
        let store = RunStatusStore::new(Arc::new(pool));

        assert!(store.last().await.unwrap().is_none());

        let first = RunSummary {
            timestamp: 1_000,
            success: true,
            success_count: 3,
            skip_count: 1,
            fail_count: 0,
            error_message: None,
        };
        store.save(&first).await.unwrap();
        assert_eq!(store.last().await.unwrap(), Some(first));

        let second = RunSummary {
            timestamp: 2_000,
            success: false,
            success_count: 0,
            skip_count: 0,
            fail_count: 0,
            error_message: Some("配置错误: 没有源文件夹".to_string()),
        };
        store.save(&second).await.unwrap();
        assert_eq!(store.last().await.unwrap(), Some(second));
    }
}
