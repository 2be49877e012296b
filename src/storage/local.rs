use super::{commit_temp, temp_path, TransferBackend, UploadResult};
use crate::db::LedgerEntry;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// 复制到本地目录的后端
pub struct LocalDirectoryBackend {
    dest_dir: PathBuf,
    name: String,
}

impl LocalDirectoryBackend {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        let dest_dir = dest_dir.into();
        let name = format!("local:{}", dest_dir.display());
        Self { dest_dir, name }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// 确保目标目录存在且可写
    async fn ensure_writable(&self) -> Result<()> {
        fs::create_dir_all(&self.dest_dir).await?;

        let metadata = fs::metadata(&self.dest_dir).await?;
        if !metadata.is_dir() {
            anyhow::bail!("目标不是目录: {}", self.dest_dir.display());
        }
        if metadata.permissions().readonly() {
            anyhow::bail!("目标目录不可写: {}", self.dest_dir.display());
        }
        Ok(())
    }

    async fn try_upload(&self, source: &Path) -> Result<PathBuf> {
        self.ensure_writable().await?;

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("无效的源文件: {}", source.display()))?;

        copy_into(source, &self.dest_dir, &file_name).await
    }

    /// 查找之前备份的文件：先找同名文件，再找 `{stem}_{毫秒时间戳}.{ext}` 形式的改名副本
    pub async fn find_backup_file(&self, file_name: &str) -> Option<PathBuf> {
        let exact = self.dest_dir.join(file_name);
        if fs::metadata(&exact).await.map(|m| m.is_file()).unwrap_or(false) {
            return Some(exact);
        }

        let mut entries = fs::read_dir(&self.dest_dir).await.ok()?;
        let mut candidates = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_timestamped_variant(&name, file_name)
                && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false)
            {
                candidates.push(entry.path());
            }
        }

        // 目录遍历顺序不固定，取名字最小的以保证结果稳定
        candidates.sort();
        candidates.into_iter().next()
    }

    async fn try_download(&self, entry: &LedgerEntry, dest_dir: &Path) -> Result<PathBuf> {
        let backup = self
            .find_backup_file(&entry.file_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("备份文件不存在: {}", entry.file_name))?;

        fs::create_dir_all(dest_dir).await?;
        copy_into(&backup, dest_dir, &entry.file_name).await
    }
}

/// `candidate` 是否为 `timestamped_name(original, ms)` 生成的名字
fn is_timestamped_variant(candidate: &str, original: &str) -> bool {
    let path = Path::new(original);
    let stem = match path.file_stem() {
        Some(stem) => stem.to_string_lossy(),
        None => return false,
    };
    let rest = match candidate.strip_prefix(&format!("{}_", stem)) {
        Some(rest) => rest,
        None => return false,
    };
    let timestamp = match path.extension() {
        Some(ext) => match rest.strip_suffix(&format!(".{}", ext.to_string_lossy())) {
            Some(timestamp) => timestamp,
            None => return false,
        },
        None => rest,
    };
    !timestamp.is_empty() && timestamp.bytes().all(|b| b.is_ascii_digit())
}

/// 先复制到临时文件再改名，目标目录中不会出现写了一半的文件
pub(crate) async fn copy_into(source: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    let temp = temp_path(dir, file_name);
    let guard = scopeguard::guard(temp.clone(), |path| {
        let _ = std::fs::remove_file(path);
    });

    fs::copy(source, &temp).await?;
    let target = commit_temp(&temp, dir, file_name).await?;

    // 已改名，无需清理
    scopeguard::ScopeGuard::into_inner(guard);
    Ok(target)
}

#[async_trait]
impl TransferBackend for LocalDirectoryBackend {
    async fn upload(&self, source: &Path, _category_hint: Option<&str>) -> UploadResult {
        match self.try_upload(source).await {
            Ok(target) => {
                debug!("复制完成: {} -> {}", source.display(), target.display());
                UploadResult::ok(None)
            }
            Err(e) => {
                warn!("复制到 {} 失败: {} ({})", self.name, source.display(), e);
                UploadResult::failed()
            }
        }
    }

    async fn download(&self, entry: &LedgerEntry, dest_dir: &Path) -> bool {
        match self.try_download(entry, dest_dir).await {
            Ok(target) => {
                debug!("恢复完成: {} -> {}", entry.file_name, target.display());
                true
            }
            Err(e) => {
                warn!("从 {} 恢复失败: {} ({})", self.name, entry.file_name, e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file_name: &str, destination: &Path) -> LedgerEntry {
        LedgerEntry {
            content_hash: "h".to_string(),
            source_path: format!("/src/{}", file_name),
            file_name: file_name.to_string(),
            file_size_bytes: 0,
            transferred_at_epoch_ms: 0,
            destination_descriptor: destination.to_string_lossy().to_string(),
            category_id: None,
            remote_object_id: None,
        }
    }

    fn visible_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_upload_creates_directory_and_keeps_name() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let source = src.path().join("a.jpg");
        std::fs::write(&source, b"X").unwrap();

        let backend = LocalDirectoryBackend::new(dst.path().join("nested/backup"));
        let result = backend.upload(&source, None).await;

        assert!(result.success);
        assert!(result.remote_id.is_none());
        let copied = std::fs::read(dst.path().join("nested/backup/a.jpg")).unwrap();
        assert_eq!(copied, b"X");
    }

    #[tokio::test]
    async fn test_upload_collision_is_renamed() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let source = src.path().join("a.jpg");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(dst.path().join("a.jpg"), b"old").unwrap();

        let backend = LocalDirectoryBackend::new(dst.path());
        assert!(backend.upload(&source, None).await.success);

        let names = visible_files(dst.path());
        assert_eq!(names.len(), 2);
        assert_eq!(std::fs::read(dst.path().join("a.jpg")).unwrap(), b"old");
        let renamed = names.iter().find(|n| n.as_str() != "a.jpg").unwrap();
        assert!(renamed.starts_with("a_") && renamed.ends_with(".jpg"));
        assert_eq!(std::fs::read(dst.path().join(renamed)).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_upload_into_file_fails() {
        let src = tempfile::tempdir().unwrap();
        let source = src.path().join("a.jpg");
        std::fs::write(&source, b"X").unwrap();
        let blocker = src.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let backend = LocalDirectoryBackend::new(&blocker);
        assert!(!backend.upload(&source, None).await.success);
    }

    #[tokio::test]
    async fn test_find_backup_file_variants() {
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(dst.path().join("a_1700000000000.jpg"), b"X").unwrap();
        std::fs::write(dst.path().join("a_note.txt"), b"T").unwrap();

        let backend = LocalDirectoryBackend::new(dst.path());
        let found = backend.find_backup_file("a.jpg").await.unwrap();
        assert_eq!(found, dst.path().join("a_1700000000000.jpg"));
        assert!(backend.find_backup_file("b.jpg").await.is_none());
    }

    #[tokio::test]
    async fn test_find_backup_file_ignores_unrelated_names() {
        let dst = tempfile::tempdir().unwrap();
        // 名字排序在时间戳副本之前，但不是改名副本
        std::fs::write(dst.path().join("a_b.jpg"), b"other").unwrap();
        std::fs::write(dst.path().join("a_.jpg"), b"other").unwrap();

        let backend = LocalDirectoryBackend::new(dst.path());
        assert!(backend.find_backup_file("a.jpg").await.is_none());

        std::fs::write(dst.path().join("a_1700000000000.jpg"), b"X").unwrap();
        let found = backend.find_backup_file("a.jpg").await.unwrap();
        assert_eq!(found, dst.path().join("a_1700000000000.jpg"));
    }

    #[test]
    fn test_timestamped_variant_matching() {
        assert!(is_timestamped_variant("a_1700000000000.jpg", "a.jpg"));
        assert!(is_timestamped_variant("README_7", "README"));
        assert!(is_timestamped_variant("archive.tar_5.gz", "archive.tar.gz"));
        assert!(!is_timestamped_variant("a_b.jpg", "a.jpg"));
        assert!(!is_timestamped_variant("a_12.png", "a.jpg"));
        assert!(!is_timestamped_variant("ab_12.jpg", "a.jpg"));
    }

    #[tokio::test]
    async fn test_download_to_directory() {
        let backup = tempfile::tempdir().unwrap();
        let restore = tempfile::tempdir().unwrap();
        std::fs::write(backup.path().join("song.mp3"), b"M").unwrap();
        std::fs::write(restore.path().join("song.mp3"), b"existing").unwrap();

        let backend = LocalDirectoryBackend::new(backup.path());
        let ok = backend
            .download(&entry("song.mp3", backup.path()), restore.path())
            .await;
        assert!(ok);

        let names = visible_files(restore.path());
        assert_eq!(names.len(), 2);
        assert_eq!(
            std::fs::read(restore.path().join("song.mp3")).unwrap(),
            b"existing"
        );

        assert!(
            !backend
                .download(&entry("missing.mp3", backup.path()), restore.path())
                .await
        );
    }
}
