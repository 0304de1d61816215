//! 应用配置模块

use crate::core::engine::{JobConfig, DEFAULT_OUTPUT_LABEL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 比较配置，保存在 config.json 的 `compare` 字段下
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// 输出目录的父目录，未设置时使用当前工作目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_base_dir: Option<PathBuf>,
    #[serde(default = "default_output_label")]
    pub output_label: String,
    /// 扫描超时（秒），0 表示不限制
    #[serde(default = "default_timeout_secs")]
    pub scan_timeout_secs: u64,
    /// 单个文件复制超时（秒），0 表示不限制
    #[serde(default = "default_timeout_secs")]
    pub copy_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub parallel_copy: bool,
}

fn default_output_label() -> String {
    DEFAULT_OUTPUT_LABEL.to_string()
}

fn default_timeout_secs() -> u64 {
    300 // 5 分钟
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_base_dir: None,
            output_label: default_output_label(),
            scan_timeout_secs: default_timeout_secs(),
            copy_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            parallel_copy: false,
        }
    }
}

impl AppConfig {
    /// 从配置文件加载，读取失败时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        fs::read_to_string(config_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("compare").cloned())
            .and_then(|compare| serde_json::from_value::<AppConfig>(compare).ok())
            .unwrap_or_default()
    }

    /// 保存配置，保留文件中的其他字段
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join("config.json");

        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };
        if !config.is_object() {
            config = serde_json::json!({});
        }

        config["compare"] = serde_json::to_value(self)?;
        fs::write(&config_file, serde_json::to_string_pretty(&config)?)
    }

    /// 转换为比较任务使用的配置
    pub fn job_config(&self) -> JobConfig {
        let defaults = JobConfig::default();
        JobConfig {
            output_base_dir: self
                .output_base_dir
                .clone()
                .unwrap_or(defaults.output_base_dir),
            output_label: self.output_label.clone(),
            scan_timeout: secs(self.scan_timeout_secs),
            copy_timeout: secs(self.copy_timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            parallel_copy: self.parallel_copy,
        }
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}
