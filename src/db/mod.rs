pub mod models;
pub use models::*;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
pub use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// 打开（必要时创建）数据库并执行迁移
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite 连接字符串格式: sqlite://path 或 sqlite:path
    // Windows 路径需要转换反斜杠为正斜杠
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
        .replace('\\', "/");

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path_str))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5) // SQLite 单文件，不需要太多连接
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// 类别配置仓库
pub struct CategoryRepository {
    db: Arc<SqlitePool>,
}

impl CategoryRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// 列出全部类别；首次访问时写入三个默认类别
    pub async fn list(&self) -> Result<Vec<Category>> {
        let rows = self.load_rows().await?;
        if rows.is_empty() {
            let defaults = Category::defaults();
            for category in &defaults {
                self.upsert(category).await?;
            }
            tracing::info!("已初始化默认类别");
            return Ok(defaults);
        }

        let mut categories = Vec::with_capacity(rows.len());
        for row in rows {
            categories.push(row.try_into()?);
        }
        Ok(categories)
    }

    async fn load_rows(&self) -> Result<Vec<CategoryRow>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT * FROM categories ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// 加载单个类别
    pub async fn get(&self, id: &str) -> Result<Option<Category>> {
        // 保证默认类别已写入
        self.list().await?;

        let row = sqlx::query_as::<_, CategoryRow>("SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    /// 保存类别（存在则替换）
    pub async fn upsert(&self, category: &Category) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let source_folders = serde_json::to_string(&category.source_folders)?;
        let destinations = serde_json::to_string(&category.destinations)?;

        sqlx::query(
            r#"
            INSERT INTO categories (id, name, media_type, source_folders, destinations, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                media_type = excluded.media_type,
                source_folders = excluded.source_folders,
                destinations = excluded.destinations,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(category.media_type.as_str())
        .bind(&source_folders)
        .bind(&destinations)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    /// 新增自定义类别
    pub async fn add_custom(&self, name: &str) -> Result<Category> {
        self.list().await?;

        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let id = format!("{}{}", PREFIX_CUSTOM, suffix);
        let category = Category::new(&id, name.trim(), MediaType::Custom);
        self.upsert(&category).await?;

        tracing::info!("新增自定义类别: {} ({})", category.name, category.id);
        Ok(category)
    }

    /// 删除类别，内置类别不可删除；返回是否删除了记录
    pub async fn remove(&self, id: &str) -> Result<bool> {
        if Category::is_builtin_id(id) {
            tracing::debug!("忽略删除内置类别: {}", id);
            return Ok(false);
        }

        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 设置源文件夹（去重并保持顺序）
    pub async fn set_source_folders(&self, id: &str, folders: &[String]) -> Result<Category> {
        let mut category = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("类别不存在: {}", id))?;

        let mut deduped: Vec<String> = Vec::new();
        for folder in folders.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            if !deduped.iter().any(|existing| existing == folder) {
                deduped.push(folder.to_string());
            }
        }

        category.source_folders = deduped;
        self.upsert(&category).await?;
        Ok(category)
    }

    /// 设置备份目标
    pub async fn set_destinations(&self, id: &str, destinations: &[String]) -> Result<Category> {
        let mut category = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("类别不存在: {}", id))?;

        category.destinations = destinations
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        self.upsert(&category).await?;
        Ok(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> (tempfile::TempDir, CategoryRepository) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("test.db")).await.unwrap();
        (dir, CategoryRepository::new(Arc::new(pool)))
    }

    #[tokio::test]
    async fn test_seeds_defaults_on_first_access() {
        let (_dir, repo) = repo().await;
        let categories = repo.list().await.unwrap();
        let ids: Vec<_> = categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![ID_PHOTO, ID_MUSIC, ID_DOCUMENT]);

        // 第二次访问不重复写入
        assert_eq!(repo.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_builtin_cannot_be_removed() {
        let (_dir, repo) = repo().await;
        assert!(!repo.remove(ID_PHOTO).await.unwrap());
        assert!(repo.get(ID_PHOTO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_custom_category_lifecycle() {
        let (_dir, repo) = repo().await;
        let custom = repo.add_custom("  旅行  ").await.unwrap();
        assert!(custom.id.starts_with(PREFIX_CUSTOM));
        assert_eq!(custom.id.len(), PREFIX_CUSTOM.len() + 8);
        assert_eq!(custom.name, "旅行");
        assert_eq!(custom.media_type, MediaType::Custom);
        assert_eq!(repo.list().await.unwrap().len(), 4);

        assert!(repo.remove(&custom.id).await.unwrap());
        assert!(repo.get(&custom.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_folders_dedupes_and_persists() {
        let (_dir, repo) = repo().await;
        let folders = vec![
            "/data/a".to_string(),
            " /data/b ".to_string(),
            "/data/a".to_string(),
            "".to_string(),
        ];
        repo.set_source_folders(ID_PHOTO, &folders).await.unwrap();
        repo.set_destinations(ID_PHOTO, &["cloud".to_string(), " ".to_string()])
            .await
            .unwrap();

        let loaded = repo.get(ID_PHOTO).await.unwrap().unwrap();
        assert_eq!(loaded.source_folders, vec!["/data/a", "/data/b"]);
        assert_eq!(loaded.destinations, vec!["cloud"]);
    }
}
