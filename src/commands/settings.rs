//! 配置相关命令

use crate::config::{CloudConfig, SchedulerConfig};
use crate::logging::LogConfig;
use crate::AppState;

/// 获取云端配置
pub fn get_cloud_config(state: &AppState) -> CloudConfig {
    CloudConfig::load(&state.config_dir)
}

/// 设置云端配置，下次启动生效
pub fn set_cloud_config(
    state: &AppState,
    base_url: Option<String>,
    user_id: Option<String>,
) -> Result<CloudConfig, String> {
    let mut config = CloudConfig::load(&state.config_dir);

    if let Some(url) = base_url {
        let url = url.trim().trim_end_matches('/').to_string();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("无效的云端地址: {}", url));
        }
        config.base_url = url;
    }
    if let Some(user) = user_id {
        config.user_id = user.trim().to_string();
    }

    config.save(&state.config_dir).map_err(|e| e.to_string())?;

    Ok(config)
}

/// 获取日志配置
pub fn get_log_config(state: &AppState) -> LogConfig {
    LogConfig::load(&state.config_dir)
}

/// 设置日志配置
pub fn set_log_config(
    state: &AppState,
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<String>,
) -> Result<LogConfig, String> {
    let mut config = LogConfig::load(&state.config_dir);

    if let Some(e) = enabled {
        config.enabled = e;
    }
    if let Some(size) = max_size_mb {
        config.max_size_mb = size;
    }
    if let Some(level) = level {
        config.set_level(&level).map_err(|e| e.to_string())?;
    }

    config.save(&state.config_dir).map_err(|e| e.to_string())?;

    // 返回规范化后的值
    Ok(LogConfig::load(&state.config_dir))
}

/// 设置周期运行的最小间隔
pub fn set_scheduler_config(
    state: &AppState,
    min_interval_minutes: u32,
) -> Result<SchedulerConfig, String> {
    let config = SchedulerConfig {
        min_interval_minutes: min_interval_minutes.max(1),
    };
    config.save(&state.config_dir).map_err(|e| e.to_string())?;
    Ok(config)
}
