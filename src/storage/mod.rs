pub mod local;
pub mod remote;

use crate::config::CloudConfig;
use crate::db::LedgerEntry;
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use local::LocalDirectoryBackend;
pub use remote::RemoteHttpBackend;

// ============ 公共常量 ============

/// 表示云端目标的保留描述符
pub const CLOUD_SENTINEL: &str = "cloud";
/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
/// 读取超时（秒）
pub const IO_TIMEOUT_SECS: u64 = 60;

/// 上传结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub success: bool,
    /// 仅云端上传时有值
    pub remote_id: Option<String>,
}

impl UploadResult {
    pub fn ok(remote_id: Option<String>) -> Self {
        Self {
            success: true,
            remote_id,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

/// 传输后端接口
///
/// 失败不会以错误形式逃出后端，调用方只看到 `UploadResult` / `bool`。
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// 上传单个文件
    async fn upload(&self, source: &Path, category_hint: Option<&str>) -> UploadResult;

    /// 把台账条目对应的文件取回到本地目录
    async fn download(&self, entry: &LedgerEntry, dest_dir: &Path) -> bool;

    /// 获取后端名称（用于日志）
    fn name(&self) -> &str;
}

/// 备份目标
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// 本地目录
    Local(PathBuf),
    /// 云端存储，类别在选择后端时绑定
    Remote,
}

impl Destination {
    /// 解析目标描述符；空白描述符返回 None
    pub fn parse(descriptor: &str) -> Option<Self> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            None
        } else if descriptor == CLOUD_SENTINEL {
            Some(Destination::Remote)
        } else {
            Some(Destination::Local(PathBuf::from(descriptor)))
        }
    }

    /// 解析逗号分隔的描述符列表
    pub fn parse_list(descriptors: &str) -> Vec<Self> {
        descriptors.split(',').filter_map(Self::parse).collect()
    }

    /// 写入台账时使用的描述符
    pub fn descriptor(&self) -> String {
        match self {
            Destination::Local(path) => path.to_string_lossy().to_string(),
            Destination::Remote => CLOUD_SENTINEL.to_string(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Destination::Remote)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local(path) => write!(f, "{}", path.display()),
            Destination::Remote => write!(f, "{}", CLOUD_SENTINEL),
        }
    }
}

/// 根据目标描述符选择传输后端，绑定持久化的云端凭据
pub struct BackendSelector {
    cloud: CloudConfig,
    client: reqwest::Client,
}

impl BackendSelector {
    pub fn new(cloud: CloudConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()?;
        Ok(Self { cloud, client })
    }

    pub fn cloud(&self) -> &CloudConfig {
        &self.cloud
    }

    /// 为目标创建后端实例
    pub fn select(
        &self,
        destination: &Destination,
        category_hint: Option<&str>,
    ) -> Result<Arc<dyn TransferBackend>, SyncError> {
        match destination {
            Destination::Local(path) => {
                Ok(Arc::new(LocalDirectoryBackend::new(path.clone())) as Arc<dyn TransferBackend>)
            }
            Destination::Remote => {
                let category = category_hint
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| SyncError::Config("云端目标缺少类别".to_string()))?;
                let backend = RemoteHttpBackend::with_client(
                    self.client.clone(),
                    &self.cloud.base_url,
                    &self.cloud.user_id,
                    category,
                )?;
                tracing::info!("初始化云端存储: {} (类别: {})", backend.base_url(), category);
                Ok(Arc::new(backend) as Arc<dyn TransferBackend>)
            }
        }
    }

    /// 按描述符字符串选择后端
    pub fn get(
        &self,
        descriptor: &str,
        category_hint: Option<&str>,
    ) -> Result<Arc<dyn TransferBackend>, SyncError> {
        let destination = Destination::parse(descriptor)
            .ok_or_else(|| SyncError::Config("目标描述符为空".to_string()))?;
        self.select(&destination, category_hint)
    }
}

// ============ 文件名冲突处理 ============

/// 在扩展名前追加毫秒时间戳: `photo.jpg` -> `photo_1700000000000.jpg`
pub fn timestamped_name(file_name: &str, epoch_ms: i64) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, epoch_ms, ext.to_string_lossy()),
        None => format!("{}_{}", stem, epoch_ms),
    }
}

/// 目录中可用的目标路径：同名文件已存在时改用带时间戳的名字，从不覆盖
pub fn unique_target(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let mut epoch_ms = chrono::Utc::now().timestamp_millis();
    loop {
        let candidate = dir.join(timestamped_name(file_name, epoch_ms));
        if !candidate.exists() {
            return candidate;
        }
        epoch_ms += 1;
    }
}

/// 写入过程中使用的临时文件名（隐藏文件，不与正式文件名冲突）
pub(crate) fn temp_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!(
        ".{}.{}.part",
        file_name,
        uuid::Uuid::new_v4().simple()
    ))
}

/// 临时文件写完后改名到无冲突的正式路径
///
/// 先以 `create_new` 独占创建占位文件锁定名字，再用临时文件替换占位；
/// 名字在检查之后被其他进程占用时换下一个名字，已有文件从不被替换。
pub(crate) async fn commit_temp(temp: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    loop {
        let target = unique_target(dir, file_name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = tokio::fs::rename(temp, &target).await {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e.into());
        }
        return Ok(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_destination() {
        assert_eq!(Destination::parse(" cloud "), Some(Destination::Remote));
        assert_eq!(
            Destination::parse("Cloud"),
            Some(Destination::Local(PathBuf::from("Cloud")))
        );
        assert_eq!(Destination::parse("   "), None);

        let list = Destination::parse_list("/a, ,cloud,/b");
        assert_eq!(list.len(), 3);
        assert!(list[1].is_remote());
        assert_eq!(list[2].descriptor(), "/b");
    }

    #[test]
    fn test_timestamped_name() {
        assert_eq!(timestamped_name("a.jpg", 123), "a_123.jpg");
        assert_eq!(timestamped_name("archive.tar.gz", 5), "archive.tar_5.gz");
        assert_eq!(timestamped_name("README", 7), "README_7");
    }

    #[test]
    fn test_unique_target_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_target(dir.path(), "a.jpg"), dir.path().join("a.jpg"));

        std::fs::write(dir.path().join("a.jpg"), b"old").unwrap();
        let target = unique_target(dir.path(), "a.jpg");
        let name = target.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("a_") && name.ends_with(".jpg"));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_commit_temp_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"old").unwrap();

        let temp = temp_path(dir.path(), "a.jpg");
        std::fs::write(&temp, b"new").unwrap();
        let target = commit_temp(&temp, dir.path(), "a.jpg").await.unwrap();

        assert_ne!(target, dir.path().join("a.jpg"));
        assert_eq!(std::fs::read(dir.path().join("a.jpg")).unwrap(), b"old");
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!temp.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_commit_temp_failure_releases_name() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(".gone.part");

        assert!(commit_temp(&missing, dir.path(), "a.jpg").await.is_err());
        assert!(!dir.path().join("a.jpg").exists());
    }

    #[test]
    fn test_selector_requires_category_and_credentials() {
        let selector = BackendSelector::new(CloudConfig::new("http://localhost:1", "u")).unwrap();
        assert!(matches!(
            selector.get("cloud", None),
            Err(SyncError::Config(_))
        ));
        assert!(selector.get("cloud", Some("照片")).is_ok());
        assert_eq!(selector.get("/tmp/x", None).unwrap().name(), "local:/tmp/x");

        let blank = BackendSelector::new(CloudConfig::new("  ", "u")).unwrap();
        assert!(matches!(
            blank.get("cloud", Some("照片")),
            Err(SyncError::Config(_))
        ));
    }
}
