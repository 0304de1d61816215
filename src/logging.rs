//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

const LOG_FILE_NAME: &str = "foldercmp.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从配置文件的 `log` 字段加载
    pub fn load(config_dir: &Path) -> Self {
        fs::read_to_string(config_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("log").cloned())
            .and_then(|log| serde_json::from_value::<LogConfig>(log).ok())
            .unwrap_or_default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl RotatingFile {
    fn open(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// 当前日志改名为 .old，再重新打开
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }

        let backup = self.path.with_extension("log.old");
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(&self.path, &backup)?;
        self.open()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.writer.is_none() {
            self.open()?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Writer not available"))?;

        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;

        if self.written > self.max_size {
            self.rotate()?;
        }
        Ok(n)
    }
}

/// 带大小限制的日志写入器
#[derive(Debug, Clone)]
pub struct SizeRotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let mut file = RotatingFile {
            path: log_dir.join(LOG_FILE_NAME),
            max_size: u64::from(max_size_mb) * 1024 * 1024,
            written: 0,
            writer: None,
        };
        file.open()?;
        if file.written > file.max_size {
            file.rotate()?;
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RotatingFile> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 单次日志写入
pub struct LogWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.inner.clone(),
        }
    }
}

/// 日志目录（跟随配置目录）
pub fn get_log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}
