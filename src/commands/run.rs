use crate::config::SchedulerConfig;
use crate::core::{RunProgress, RunReport, TransferRequest};
use crate::db::{MediaType, RunSummary};
use crate::error::RunDisposition;
use crate::AppState;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// 启动进度转发任务，把进度写入日志
fn progress_logger() -> mpsc::Sender<RunProgress> {
    let (progress_tx, mut progress_rx) = mpsc::channel::<RunProgress>(100);
    tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            tracing::info!(
                "{} [{}/{}] {}",
                progress.title,
                progress.progress,
                progress.max,
                progress.message
            );
        }
    });
    progress_tx
}

/// 按类别运行一次
pub async fn run_category(state: &AppState, category_id: &str) -> Result<RunReport, String> {
    let request = category_request(state, category_id).await?;
    Ok(state.engine.run(&request, Some(progress_logger())).await)
}

async fn category_request(state: &AppState, category_id: &str) -> Result<TransferRequest, String> {
    let category = state
        .categories
        .get(category_id)
        .await
        .map_err(|e| format!("加载类别失败: {}", e))?
        .ok_or_else(|| format!("类别不存在: {}", category_id))?;
    Ok(TransferRequest::from_category(&category))
}

/// 依次运行所有已配置源文件夹的类别
pub async fn run_all(state: &AppState) -> Result<Vec<(String, RunReport)>, String> {
    let categories = state
        .categories
        .list()
        .await
        .map_err(|e| format!("加载类别失败: {}", e))?;

    let mut reports = Vec::new();
    for category in categories.iter().filter(|c| !c.source_folders.is_empty()) {
        let request = TransferRequest::from_category(category);
        let report = state.engine.run(&request, Some(progress_logger())).await;
        let cancelled = report.disposition == RunDisposition::Cancelled;
        reports.push((category.id.clone(), report));
        if cancelled {
            break;
        }
    }
    Ok(reports)
}

/// 使用逗号分隔的文件夹与目标运行一次（不绑定类别）
pub async fn run_adhoc(
    state: &AppState,
    folders: &str,
    destinations: &str,
    media_type: MediaType,
    category: Option<String>,
) -> Result<RunReport, String> {
    let request =
        TransferRequest::parse(folders, destinations, media_type).with_category(None, category);
    Ok(state.engine.run(&request, Some(progress_logger())).await)
}

/// 周期运行类别，间隔受调度下限约束；收到停止信号后退出
pub async fn run_every(
    state: &AppState,
    category_id: &str,
    interval_minutes: u32,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Vec<RunReport>, String> {
    let scheduler = SchedulerConfig::load(&state.config_dir);
    let request = category_request(state, category_id)
        .await?
        .scheduled(interval_minutes);
    let interval = scheduler.effective_interval(request.interval_minutes, request.manual);
    if interval != interval_minutes {
        tracing::warn!("间隔 {} 分钟低于下限，使用 {} 分钟", interval_minutes, interval);
    }

    let mut reports = Vec::new();
    loop {
        let report = state.engine.run(&request, Some(progress_logger())).await;
        let stop = report.disposition == RunDisposition::Cancelled;
        reports.push(report);
        if stop || *shutdown.borrow() {
            break;
        }

        tracing::info!("下一次运行将在 {} 分钟后", interval);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval as u64 * 60)) => {}
            _ = shutdown.changed() => break,
        }
    }
    Ok(reports)
}

/// 获取最近一次运行状态
pub async fn last_status(state: &AppState) -> Result<Option<RunSummary>, String> {
    state
        .status
        .last()
        .await
        .map_err(|e| format!("读取运行状态失败: {}", e))
}
