//! 应用配置模块
//!
//! 所有配置保存在配置目录下的 `config.json`，每个模块独立一个顶层键，
//! 读取失败时回退默认值，保存时只覆盖自己的键。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// 读取 `config.json` 中的某个配置段，缺失或格式错误时使用默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, key: &str) -> T {
    let config_file = config_dir.join(CONFIG_FILE);
    fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get(key).cloned())
        .and_then(|section| serde_json::from_value::<T>(section).ok())
        .unwrap_or_default()
}

/// 合并写入某个配置段，保留其他键
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> anyhow::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;
    Ok(())
}

/// 读取自定义数据路径（数据库与日志所在目录）
pub fn data_path(config_dir: &Path) -> Option<PathBuf> {
    fs::read_to_string(config_dir.join(CONFIG_FILE))
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get("data_path")?.as_str().map(PathBuf::from))
        .filter(|p| p.is_dir())
}

/// 云端存储凭据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub user_id: String,
}

impl CloudConfig {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "cloud")
    }

    pub fn save(&self, config_dir: &Path) -> anyhow::Result<()> {
        save_section(config_dir, "cloud", self)
    }

    /// 去掉首尾空白和末尾的 `/`
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }

    pub fn is_complete(&self) -> bool {
        !self.normalized_base_url().is_empty() && !self.user_id.trim().is_empty()
    }
}

/// 同步引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 最大并发传输数，1 为逐个顺序处理
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
}

fn default_max_concurrent_transfers() -> usize {
    1
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
        }
    }
}

impl SyncSettings {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "sync")
    }

    pub fn save(&self, config_dir: &Path) -> anyhow::Result<()> {
        save_section(config_dir, "sync", self)
    }
}

/// 调度配置：周期间隔下限只在调度层生效
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_min_interval_minutes")]
    pub min_interval_minutes: u32,
}

fn default_min_interval_minutes() -> u32 {
    15
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_minutes: default_min_interval_minutes(),
        }
    }
}

impl SchedulerConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "scheduler")
    }

    pub fn save(&self, config_dir: &Path) -> anyhow::Result<()> {
        save_section(config_dir, "scheduler", self)
    }

    /// 实际使用的间隔（分钟）；手动运行不受下限约束
    pub fn effective_interval(&self, requested_minutes: u32, manual: bool) -> u32 {
        if manual {
            requested_minutes
        } else {
            requested_minutes.max(self.min_interval_minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        CloudConfig::new("http://nas:8080/", "u1").save(dir.path()).unwrap();
        SyncSettings {
            max_concurrent_transfers: 4,
        }
        .save(dir.path())
        .unwrap();

        let cloud = CloudConfig::load(dir.path());
        assert_eq!(cloud.user_id, "u1");
        assert_eq!(cloud.normalized_base_url(), "http://nas:8080");
        assert_eq!(SyncSettings::load(dir.path()).max_concurrent_transfers, 4);
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!CloudConfig::load(dir.path()).is_complete());
        assert_eq!(SyncSettings::load(dir.path()).max_concurrent_transfers, 1);
        assert_eq!(SchedulerConfig::load(dir.path()).min_interval_minutes, 15);
    }

    #[test]
    fn test_interval_floor() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.effective_interval(5, false), 15);
        assert_eq!(scheduler.effective_interval(60, false), 60);
        assert_eq!(scheduler.effective_interval(5, true), 5);
    }

    #[test]
    fn test_data_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(data_path(dir.path()).is_none());

        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            serde_json::json!({ "data_path": data }).to_string(),
        )
        .unwrap();
        assert_eq!(data_path(dir.path()), Some(data));
    }
}
