//! 日志配置与按大小轮转的日志文件

use crate::config::{load_section, save_section};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 日志文件名
pub const LOG_FILE: &str = "mediasync.log";

/// 可选的日志级别
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// 日志文件大小上限的取值范围（MB）
const MAX_SIZE_RANGE: (u32, u32) = (1, 100);

/// 日志配置，保存在 `config.json` 的 `log` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub enabled: bool,
    /// 单个日志文件的上限（MB）
    pub max_size_mb: u32,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: 5,
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section::<LogConfig>(config_dir, "log").normalized()
    }

    pub fn save(&self, config_dir: &Path) -> anyhow::Result<()> {
        save_section(config_dir, "log", &self.clone().normalized())
    }

    /// 校验并设置日志级别（大小写不敏感）
    pub fn set_level(&mut self, level: &str) -> anyhow::Result<()> {
        let level = level.trim().to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            anyhow::bail!("无效的日志级别: {}", level);
        }
        self.level = level;
        Ok(())
    }

    /// 无法识别的级别按 info 处理
    pub fn tracing_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }

    fn normalized(mut self) -> Self {
        self.max_size_mb = self.max_size_mb.clamp(MAX_SIZE_RANGE.0, MAX_SIZE_RANGE.1);
        self
    }
}

/// 带大小限制的日志写入器，超限后把当前文件改名为 `.log.old` 重新开始
///
/// 由 `tracing_appender::non_blocking` 的后台线程独占使用。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE);
        let max_size = u64::from(max_size_mb.clamp(MAX_SIZE_RANGE.0, MAX_SIZE_RANGE.1)) << 20;

        let mut writer = Self {
            file_path,
            max_size,
            written: 0,
            writer: None,
        };
        writer.open()?;
        Ok(writer)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn open(&mut self) -> io::Result<()> {
        let existing = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        if existing > self.max_size {
            self.rotate()?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// 当前文件改名为 `.log.old`，覆盖上一份备份
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }

        let backup = self.file_path.with_extension("log.old");
        match fs::remove_file(&backup) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        match fs::rename(&self.file_path, &backup) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > self.max_size {
            self.rotate()?;
            self.open()?;
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// 日志与数据库放在同一目录
pub fn get_log_dir(config_dir: &Path) -> PathBuf {
    crate::config::data_path(config_dir).unwrap_or_else(|| config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotates_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::new(dir.path(), 1).unwrap();

        let line = vec![b'x'; 64 * 1024];
        for _ in 0..17 {
            writer.write_all(&line).unwrap();
        }
        writer.write_all(b"after rotation\n").unwrap();
        writer.flush().unwrap();

        assert!(dir.path().join("mediasync.log.old").exists());
        let current = fs::read(writer.file_path()).unwrap();
        assert!(current.len() < 1024 * 1024);
        assert!(current.ends_with(b"after rotation\n"));
    }

    #[test]
    fn test_config_clamped() {
        let dir = tempfile::tempdir().unwrap();
        LogConfig {
            enabled: false,
            max_size_mb: 500,
            level: "debug".to_string(),
        }
        .save(dir.path())
        .unwrap();

        let loaded = LogConfig::load(dir.path());
        assert!(!loaded.enabled);
        assert_eq!(loaded.max_size_mb, 100);
        assert_eq!(loaded.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_set_level() {
        let mut config = LogConfig::default();
        config.set_level(" WARN ").unwrap();
        assert_eq!(config.level, "warn");
        assert_eq!(config.tracing_level(), tracing::Level::WARN);
        assert!(config.set_level("verbose").is_err());
        assert_eq!(config.level, "warn");
    }
}
