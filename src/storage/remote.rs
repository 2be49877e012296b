use super::{commit_temp, temp_path, TransferBackend, UploadResult};
use super::{CONNECT_TIMEOUT_SECS, IO_TIMEOUT_SECS};
use crate::core::hash::{hash_file_async, HashAlgorithm};
use crate::db::LedgerEntry;
use crate::error::SyncError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const UPLOAD_PATH: &str = "/api/file/upload";
const DOWNLOAD_PATH: &str = "/api/file/download";

/// 云端内容存储后端（HTTP）
pub struct RemoteHttpBackend {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
    category: String,
    name: String,
}

impl RemoteHttpBackend {
    pub fn new(base_url: &str, user_id: &str, category: &str) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()?;
        Self::with_client(client, base_url, user_id, category)
    }

    /// 复用已有的 HTTP 客户端；地址或用户标识为空时立即失败
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        user_id: &str,
        category: &str,
    ) -> Result<Self, SyncError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::Config("未配置云端地址".to_string()));
        }
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(SyncError::Config("未配置云端用户标识".to_string()));
        }

        let name = format!("cloud:{}", base_url);
        Ok(Self {
            client,
            base_url,
            user_id,
            category: category.to_string(),
            name,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// 上传文件，返回云端文件 ID
    async fn try_upload(&self, source: &Path, category: &str) -> Result<String, SyncError> {
        let sha1 = hash_file_async(source.to_path_buf(), HashAlgorithm::Sha1).await?;
        let file_name = file_name_of(source)?;

        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(format!("{}{}", self.base_url, UPLOAD_PATH))
            .header("userid", self.user_id.as_str())
            .header("category", encode(category))
            .header("sha1sum", sha1.as_str())
            .header("filename", encode(&file_name))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SyncError::Remote {
                status: status.as_u16(),
                message: text,
            });
        }

        Ok(parse_file_id(&text).unwrap_or(sha1))
    }

    async fn try_download(&self, entry: &LedgerEntry, dest_dir: &Path) -> Result<PathBuf, SyncError> {
        let file_id = entry
            .remote_object_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SyncError::Internal(format!("缺少云端文件 ID: {}", entry.file_name)))?;

        let response = self
            .client
            .get(format!(
                "{}{}?fileId={}",
                self.base_url,
                DOWNLOAD_PATH,
                urlencoding::encode(file_id)
            ))
            .header("userid", self.user_id.as_str())
            .header("category", encode(&self.category))
            .header("filename", encode(&entry.file_name))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Remote {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let temp = temp_path(dest_dir, &entry.file_name);
        let guard = scopeguard::guard(temp.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });

        let mut file = tokio::fs::File::create(&temp).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        let target = commit_temp(&temp, dest_dir, &entry.file_name)
            .await
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        scopeguard::ScopeGuard::into_inner(guard);
        Ok(target)
    }
}

/// 请求头中的非 ASCII 值需要百分号编码
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn file_name_of(path: &Path) -> Result<String, SyncError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| SyncError::Internal(format!("无效的源文件: {}", path.display())))
}

/// 解析响应中的 `fileId`，缺失或为空时返回 None
fn parse_file_id(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("fileId")?
        .as_str()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

#[async_trait]
impl TransferBackend for RemoteHttpBackend {
    async fn upload(&self, source: &Path, category_hint: Option<&str>) -> UploadResult {
        let category = category_hint
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.category);

        match self.try_upload(source, category).await {
            Ok(remote_id) => {
                debug!("上传完成: {} -> {}", source.display(), remote_id);
                UploadResult::ok(Some(remote_id))
            }
            Err(e) => {
                warn!("上传失败: {} ({})", source.display(), e);
                UploadResult::failed()
            }
        }
    }

    async fn download(&self, entry: &LedgerEntry, dest_dir: &Path) -> bool {
        match self.try_download(entry, dest_dir).await {
            Ok(target) => {
                debug!("下载完成: {} -> {}", entry.file_name, target.display());
                true
            }
            Err(e) => {
                warn!("下载失败: {} ({})", entry.file_name, e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
