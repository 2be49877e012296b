use crate::db::MediaType;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 每遍历多少个条目检查一次取消状态
const CANCEL_CHECK_INTERVAL: usize = 100;

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 媒体类型（决定扩展名集合）
    pub media_type: MediaType,
    /// 是否跟随符号链接
    pub follow_links: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            media_type: MediaType::Photo,
            follow_links: false,
        }
    }
}

/// 按媒体类型递归收集源文件夹中的文件
pub struct FileScanner {
    config: ScanConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl FileScanner {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            config: ScanConfig {
                media_type,
                ..Default::default()
            },
            cancel_flag: None,
        }
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self {
            config,
            cancel_flag: None,
        }
    }

    /// 附加取消标志
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 扩展名是否在当前媒体类型内
    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.config.media_type.accepts(ext))
            .unwrap_or(false)
    }

    /// 扫描单个文件夹（阻塞）
    fn scan_folder(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut excluded_count = 0usize;

        for (walked, entry) in WalkDir::new(folder)
            .follow_links(self.config.follow_links)
            .sort_by_file_name()
            .into_iter()
            .enumerate()
        {
            // 按遍历的条目数检查取消状态，不符合类型的文件也算在内
            if walked % CANCEL_CHECK_INTERVAL == 0 && self.is_cancelled() {
                return Err(anyhow::anyhow!("操作已取消"));
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("遍历目录失败: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if self.is_eligible(entry.path()) {
                files.push(entry.into_path());
            } else {
                excluded_count += 1;
            }
        }

        debug!(
            "扫描文件夹: {:?}, 找到 {} 个文件, {} 个被排除",
            folder,
            files.len(),
            excluded_count
        );

        Ok(files)
    }

    /// 按顺序扫描所有源文件夹；不存在或不是目录的文件夹记录日志后跳过
    pub fn scan_folders(&self, folders: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut all_files = Vec::new();

        for folder in folders {
            if self.is_cancelled() {
                return Err(anyhow::anyhow!("操作已取消"));
            }

            if !folder.is_dir() {
                warn!("文件夹不存在或无效，跳过: {:?}", folder);
                continue;
            }

            all_files.extend(self.scan_folder(folder)?);
        }

        info!(
            "扫描完成: {} 个文件夹, 共 {} 个待处理文件 (类型: {})",
            folders.len(),
            all_files.len(),
            self.config.media_type.as_str()
        );

        Ok(all_files)
    }

    /// 在阻塞线程池中扫描
    pub async fn scan_folders_async(self, folders: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
        tokio::task::spawn_blocking(move || self.scan_folders(&folders)).await?
    }

    /// 统计符合媒体类型的本地文件数量
    pub fn count(&self, folders: &[PathBuf]) -> usize {
        self.scan_folders(folders).map(|f| f.len()).unwrap_or(0)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self {
            config: ScanConfig::default(),
            cancel_flag: None,
        }
    }
}
