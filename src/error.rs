//! 错误分类与重试判定

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// 同步错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 配置错误（缺少文件夹、目标或云端凭据）
    #[error("配置错误: {0}")]
    Config(String),

    /// 文件系统错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 台账/数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 网络传输错误
    #[error("网络错误: {0}")]
    Http(#[from] reqwest::Error),

    /// 远端返回非成功状态
    #[error("远端错误: {status} - {message}")]
    Remote { status: u16, message: String },

    /// 运行已取消
    #[error("运行已取消")]
    Cancelled,

    /// 已有运行在进行中
    #[error("已有同步任务在运行")]
    AlreadyRunning,

    /// 未预期的内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 配置错误（需要修改配置，不自动重试）
    Configuration,
    /// 临时错误（可重试）
    Transient,
    /// 永久错误（本次运行终止）
    Permanent,
    /// 取消
    Cancelled,
}

/// 一次运行结束后给调度方的建议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDisposition {
    Success,
    Retry,
    Failure,
    Cancelled,
}

impl std::fmt::Display for RunDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunDisposition::Success => write!(f, "success"),
            RunDisposition::Retry => write!(f, "retry"),
            RunDisposition::Failure => write!(f, "failure"),
            RunDisposition::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl SyncError {
    /// 获取错误分类
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Config(_) => ErrorCategory::Configuration,
            SyncError::Cancelled => ErrorCategory::Cancelled,
            other if is_transient_message(&other.to_string()) => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }

    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// 运行级致命错误对应的调度建议
    pub fn disposition(&self) -> RunDisposition {
        match self.category() {
            ErrorCategory::Transient => RunDisposition::Retry,
            ErrorCategory::Cancelled => RunDisposition::Cancelled,
            ErrorCategory::Configuration | ErrorCategory::Permanent => RunDisposition::Failure,
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<sqlx::Error>() {
            Ok(e) => return SyncError::Database(e),
            Err(err) => err,
        };
        match err.downcast::<std::io::Error>() {
            Ok(e) => SyncError::Io(e),
            Err(err) => SyncError::Internal(format!("{:#}", err)),
        }
    }
}

fn transient_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)temporar|retry|try again|timed out|timeout|busy|locked|unavailable")
            .expect("transient pattern is a valid regex")
    })
}

/// 错误消息是否命中临时性关键字白名单
pub fn is_transient_message(message: &str) -> bool {
    transient_pattern().is_match(message)
}
