use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{RunReport, SyncConfig, SyncEngine, TransferRequest};
pub use crate::db::{Category, LedgerEntry, MediaType, RunSummary};
pub use crate::error::{RunDisposition, SyncError};

use crate::config::{CloudConfig, SyncSettings};
use crate::core::{Ledger, RunStatusStore};
use crate::db::{CategoryRepository, SqlitePool};
use crate::storage::BackendSelector;

/// 数据库文件名
pub const DB_FILE: &str = "mediasync.db";

/// 应用状态：进程启动时构造一次，显式传递给各命令
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub categories: Arc<CategoryRepository>,
    pub ledger: Arc<Ledger>,
    pub status: Arc<RunStatusStore>,
    pub selector: Arc<BackendSelector>,
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    /// 使用默认配置目录
    pub async fn new() -> anyhow::Result<Self> {
        Self::open(&default_config_dir()).await
    }

    /// 在指定配置目录下打开数据库并组装各组件
    pub async fn open(config_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config_dir)?;

        // 尝试读取自定义数据路径
        let data_dir = config::data_path(config_dir)
            .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
            .unwrap_or_else(|| config_dir.to_path_buf());

        let db = Arc::new(db::connect(&data_dir.join(DB_FILE)).await?);

        let cloud = CloudConfig::load(config_dir);
        let settings = SyncSettings::load(config_dir);

        let categories = Arc::new(CategoryRepository::new(db.clone()));
        let ledger = Arc::new(Ledger::new(db.clone()));
        let status = Arc::new(RunStatusStore::new(db.clone()));
        let selector = Arc::new(BackendSelector::new(cloud)?);
        let engine = Arc::new(SyncEngine::with_config(
            ledger.clone(),
            selector.clone(),
            status.clone(),
            SyncConfig::from(&settings),
        ));

        Ok(Self {
            db,
            config_dir: config_dir.to_path_buf(),
            data_dir,
            categories,
            ledger,
            status,
            selector,
            engine,
        })
    }

    /// 清理资源（进程退出前调用）
    pub async fn cleanup(&self) {
        tracing::debug!("关闭数据库连接池...");
        self.db.close().await;
    }
}

/// 配置目录：优先 `$MEDIASYNC_HOME`，否则为平台配置目录下的 `mediasync`
pub fn default_config_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("MEDIASYNC_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::config_dir()
        .map(|p| p.join("mediasync"))
        .unwrap_or_else(|| PathBuf::from(".mediasync"))
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux: 遵循 XDG_CONFIG_HOME
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
