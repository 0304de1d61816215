pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use crate::core::{
    CompareJob, CompareRequest, CompareSession, ComparisonEvent, ComparisonResult, JobConfig,
};
pub use config::AppConfig;
pub use error::CompareError;

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }

    /// 应用配置目录，无法确定时使用当前目录下的 .foldercmp
    pub fn app_config_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join("foldercmp"))
            .unwrap_or_else(|| PathBuf::from(".foldercmp"))
    }
}
