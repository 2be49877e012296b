use crate::config::SyncSettings;
use crate::core::hash::{hash_file_async, HashAlgorithm};
use crate::core::ledger::Ledger;
use crate::core::request::TransferRequest;
use crate::core::run_status::RunStatusStore;
use crate::core::scanner::FileScanner;
use crate::db::{LedgerEntry, RunSummary};
use crate::error::{RunDisposition, SyncError};
use crate::storage::{BackendSelector, Destination, TransferBackend};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数，1 表示按枚举顺序逐个处理
    pub max_concurrent_transfers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 1,
        }
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_concurrent_transfers: settings.max_concurrent_transfers.max(1),
        }
    }
}

/// 运行进度 (title, message, progress, max)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub title: String,
    pub message: String,
    pub progress: u64,
    pub max: u64,
}

/// 运行报告：持久化的结果快照加上给调度方的建议
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: RunSummary,
    pub disposition: RunDisposition,
}

/// 恢复结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub success_count: u32,
    pub fail_count: u32,
}

/// 可跨任务传递的取消句柄
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 运行计数
#[derive(Debug, Default)]
struct RunStats {
    success: AtomicU32,
    skip: AtomicU32,
    fail: AtomicU32,
}

/// 单个文件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Transferred,
    Skipped,
    Failed,
    /// 本次运行中已处理过相同内容，不计数
    Duplicate,
    /// 运行被取消，不计数
    Abandoned,
}

/// 一次运行内各文件任务共享的上下文
struct RunContext {
    ledger: Arc<Ledger>,
    /// (台账描述符, 后端)，运行开始前一次性解析
    backends: Vec<(String, Arc<dyn TransferBackend>)>,
    category_id: Option<String>,
    category_hint: Option<String>,
    stats: Arc<RunStats>,
    /// 本次运行已处理的内容哈希
    seen: StdMutex<HashSet<String>>,
    cancelled: Arc<AtomicBool>,
    fatal: StdMutex<Option<SyncError>>,
}

impl RunContext {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn has_fatal(&self) -> bool {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 只保留第一个致命错误
    fn record_fatal(&self, err: SyncError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            error!("运行中止: {}", err);
            *fatal = Some(err);
        }
    }

    /// 首次出现的哈希返回 true
    fn first_seen(&self, hash: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.to_string())
    }

    fn take_fatal(&self) -> Option<SyncError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn count(&self, outcome: FileOutcome) {
        let counter = match outcome {
            FileOutcome::Transferred => &self.stats.success,
            FileOutcome::Skipped => &self.stats.skip,
            FileOutcome::Failed => &self.stats.fail,
            FileOutcome::Duplicate | FileOutcome::Abandoned => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// 同步引擎
pub struct SyncEngine {
    ledger: Arc<Ledger>,
    selector: Arc<BackendSelector>,
    status: Arc<RunStatusStore>,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        selector: Arc<BackendSelector>,
        status: Arc<RunStatusStore>,
    ) -> Self {
        Self::with_config(ledger, selector, status, SyncConfig::default())
    }

    pub fn with_config(
        ledger: Arc<Ledger>,
        selector: Arc<BackendSelector>,
        status: Arc<RunStatusStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            ledger,
            selector,
            status,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
            run_lock: Mutex::new(()),
        }
    }

    /// 取消正在进行的运行；空闲时调用不影响之后的运行
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// 是否有运行正在进行
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// 执行一次运行；已有运行时排队等待
    pub async fn run(
        &self,
        request: &TransferRequest,
        progress_tx: Option<mpsc::Sender<RunProgress>>,
    ) -> RunReport {
        let _guard = self.run_lock.lock().await;
        self.run_exclusive(request, progress_tx).await
    }

    /// 执行一次运行；已有运行时直接拒绝
    pub async fn try_run(
        &self,
        request: &TransferRequest,
        progress_tx: Option<mpsc::Sender<RunProgress>>,
    ) -> Result<RunReport, SyncError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(self.run_exclusive(request, progress_tx).await)
    }

    async fn run_exclusive(
        &self,
        request: &TransferRequest,
        progress_tx: Option<mpsc::Sender<RunProgress>>,
    ) -> RunReport {
        // 空闲期间的取消请求不属于本次运行
        self.cancelled.store(false, Ordering::SeqCst);

        info!(
            "开始运行: 类别 {}, {} 个源文件夹, {} 个目标",
            request.category_hint().unwrap_or("-"),
            request.source_folders.len(),
            request.destinations.len()
        );

        let stats = Arc::new(RunStats::default());
        let result = self.execute(request, stats.clone(), &progress_tx).await;

        let (success, error_message, disposition) = match result {
            Ok(()) => (true, None, RunDisposition::Success),
            Err(e) => {
                let disposition = e.disposition();
                if disposition == RunDisposition::Cancelled {
                    warn!("运行已取消");
                } else {
                    error!("运行失败 ({}): {}", disposition, e);
                }
                (false, Some(e.to_string()), disposition)
            }
        };

        let summary = RunSummary {
            timestamp: chrono::Utc::now().timestamp_millis(),
            success,
            success_count: stats.success.load(Ordering::Relaxed),
            skip_count: stats.skip.load(Ordering::Relaxed),
            fail_count: stats.fail.load(Ordering::Relaxed),
            error_message,
        };

        if let Err(e) = self.status.save(&summary).await {
            warn!("保存运行状态失败: {}", e);
        }

        info!(
            "运行结束: 成功 {}, 跳过 {}, 失败 {}",
            summary.success_count, summary.skip_count, summary.fail_count
        );

        RunReport {
            summary,
            disposition,
        }
    }

    /// 校验输入、解析后端、枚举并处理文件
    async fn execute(
        &self,
        request: &TransferRequest,
        stats: Arc<RunStats>,
        progress_tx: &Option<mpsc::Sender<RunProgress>>,
    ) -> Result<(), SyncError> {
        if request.source_folders.is_empty() {
            return Err(SyncError::Config("没有配置源文件夹".to_string()));
        }
        if request.destinations.is_empty() {
            return Err(SyncError::Config("没有配置备份目标".to_string()));
        }

        let category_hint = request.category_hint().map(str::to_string);
        let backends = self.resolve_backends(request, category_hint.as_deref())?;

        let scanner = FileScanner::new(request.media_type).with_cancel(self.cancelled.clone());
        let files = match scanner
            .scan_folders_async(request.source_folders.clone())
            .await
        {
            Ok(files) => files,
            Err(_) if self.is_cancelled() => return Err(SyncError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let ctx = Arc::new(RunContext {
            ledger: self.ledger.clone(),
            backends,
            category_id: request.category_id.clone(),
            category_hint,
            stats,
            seen: StdMutex::new(HashSet::new()),
            cancelled: self.cancelled.clone(),
            fatal: StdMutex::new(None),
        });

        self.process_files(ctx.clone(), files, progress_tx).await;

        if let Some(fatal) = ctx.take_fatal() {
            return Err(fatal);
        }
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// 云端模式只上传云端；否则依次传到每个目标
    fn resolve_backends(
        &self,
        request: &TransferRequest,
        category_hint: Option<&str>,
    ) -> Result<Vec<(String, Arc<dyn TransferBackend>)>, SyncError> {
        let targets: Vec<Destination> = if request.is_cloud_mode() {
            vec![Destination::Remote]
        } else {
            request.destinations.clone()
        };

        targets
            .iter()
            .map(|destination| {
                let backend = self.selector.select(destination, category_hint)?;
                debug!("目标后端: {}", backend.name());
                Ok((destination.descriptor(), backend))
            })
            .collect()
    }

    /// 有界并发处理文件；并发数为 1 时严格按枚举顺序执行
    async fn process_files(
        &self,
        ctx: Arc<RunContext>,
        files: Vec<PathBuf>,
        progress_tx: &Option<mpsc::Sender<RunProgress>>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let total = files.len() as u64;
        let title = format!("正在备份 {}", ctx.category_hint.as_deref().unwrap_or(""));
        let mut handles = Vec::with_capacity(files.len());

        for (index, path) in files.into_iter().enumerate() {
            if ctx.is_cancelled() || ctx.has_fatal() {
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            // 等待许可期间可能已取消或中止
            if ctx.is_cancelled() || ctx.has_fatal() {
                break;
            }

            self.send_progress(
                progress_tx,
                RunProgress {
                    title: title.clone(),
                    message: path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    progress: index as u64,
                    max: total,
                },
            )
            .await;
            // 进度接收方可能在发送期间取消
            if ctx.is_cancelled() {
                break;
            }

            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                match Self::process_file(&ctx, &path).await {
                    Ok(outcome) => ctx.count(outcome),
                    Err(e) => ctx.record_fatal(e),
                }
                drop(permit);
            }));
        }

        // 等待所有任务完成
        for handle in handles {
            if let Err(e) = handle.await {
                ctx.record_fatal(SyncError::Internal(format!("文件任务异常退出: {}", e)));
            }
        }

        self.send_progress(
            progress_tx,
            RunProgress {
                title,
                message: "完成".to_string(),
                progress: total,
                max: total,
            },
        )
        .await;
    }

    /// 处理单个文件；只有台账错误会以 Err 返回并中止整个运行
    async fn process_file(ctx: &RunContext, path: &Path) -> Result<FileOutcome, SyncError> {
        let hash = match hash_file_async(path.to_path_buf(), HashAlgorithm::Md5).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!("计算哈希失败: {} ({})", path.display(), e);
                return Ok(FileOutcome::Failed);
            }
        };

        // 同一内容在一次运行中只处理一次，并发时也不会重复传输
        if !ctx.first_seen(&hash) {
            debug!("本次运行已处理相同内容: {}", path.display());
            return Ok(FileOutcome::Duplicate);
        }

        if ctx.ledger.exists(&hash).await? {
            debug!("已备份，跳过: {}", path.display());
            return Ok(FileOutcome::Skipped);
        }

        let mut remote_id = None;
        for (descriptor, backend) in &ctx.backends {
            if ctx.is_cancelled() {
                return Ok(FileOutcome::Abandoned);
            }

            let result = backend.upload(path, ctx.category_hint.as_deref()).await;
            if !result.success {
                // 不回滚已写入其他目标的副本
                warn!("传输失败: {} -> {}", path.display(), descriptor);
                return Ok(FileOutcome::Failed);
            }
            if remote_id.is_none() {
                remote_id = result.remote_id;
            }
        }

        let file_size = tokio::fs::metadata(path)
            .await
            .map(|m| m.len() as i64)
            .unwrap_or(0);
        let destination = ctx
            .backends
            .first()
            .map(|(descriptor, _)| descriptor.clone())
            .unwrap_or_default();

        let entry = LedgerEntry {
            content_hash: hash,
            source_path: path.to_string_lossy().to_string(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_size_bytes: file_size,
            transferred_at_epoch_ms: chrono::Utc::now().timestamp_millis(),
            destination_descriptor: destination,
            category_id: ctx.category_id.clone(),
            remote_object_id: remote_id,
        };
        ctx.ledger.upsert(&entry).await?;

        info!("已备份: {}", path.display());
        Ok(FileOutcome::Transferred)
    }

    /// 把台账条目取回到本地目录，不修改台账
    ///
    /// `category_names` 把类别 ID 映射到云端使用的类别名。
    pub async fn restore(
        &self,
        entries: &[LedgerEntry],
        dest_dir: &Path,
        category_names: &HashMap<String, String>,
    ) -> RestoreSummary {
        let mut summary = RestoreSummary::default();
        let mut backends: HashMap<(String, Option<String>), Arc<dyn TransferBackend>> =
            HashMap::new();

        info!("开始恢复 {} 个文件到 {}", entries.len(), dest_dir.display());

        for entry in entries {
            let hint = entry
                .category_id
                .as_ref()
                .map(|id| category_names.get(id).cloned().unwrap_or_else(|| id.clone()));
            let key = (entry.destination_descriptor.clone(), hint.clone());

            let backend = match backends.get(&key) {
                Some(backend) => backend.clone(),
                None => match self
                    .selector
                    .get(&entry.destination_descriptor, hint.as_deref())
                {
                    Ok(backend) => {
                        backends.insert(key, backend.clone());
                        backend
                    }
                    Err(e) => {
                        warn!("无法恢复 {}: {}", entry.file_name, e);
                        summary.fail_count += 1;
                        continue;
                    }
                },
            };

            if backend.download(entry, dest_dir).await {
                summary.success_count += 1;
            } else {
                summary.fail_count += 1;
            }
        }

        info!(
            "恢复结束: 成功 {}, 失败 {}",
            summary.success_count, summary.fail_count
        );
        summary
    }

    /// 发送进度更新
    async fn send_progress(&self, tx: &Option<mpsc::Sender<RunProgress>>, progress: RunProgress) {
        if let Some(tx) = tx {
            let _ = tx.send(progress).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_never_zero() {
        let config = SyncConfig::from(&SyncSettings {
            max_concurrent_transfers: 0,
        });
        assert_eq!(config.max_concurrent_transfers, 1);
    }

    #[test]
    fn test_cancel_handle_shares_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let handle = CancelHandle(flag.clone());
        handle.clone().cancel();
        assert!(handle.is_cancelled());
        assert!(flag.load(Ordering::SeqCst));
    }
}
