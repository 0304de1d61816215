//! 错误类型

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 比较任务中可能出现的错误
///
/// 只有 `Access`、`Timeout`（扫描阶段）、`Cancelled` 会终止一次比较；
/// 其余错误在发生处被记录日志，任务继续产出尽可能完整的结果。
#[derive(Debug, Error)]
pub enum CompareError {
    /// 请求参数无效（例如路径为空）
    #[error("无效的比较请求: {0}")]
    InvalidRequest(String),

    /// 目录不存在或无法读取
    #[error("无法访问文件夹 {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 无法创建输出目录
    #[error("创建输出目录失败 {}: {source}", path.display())]
    OutputCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 报告写入失败
    #[error("保存报告失败 {}: {source}", path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 单个文件复制失败
    #[error("复制失败 {name}: {source}")]
    Copy {
        name: String,
        #[source]
        source: io::Error,
    },

    /// 操作超时，可重试
    #[error("{op} 超时 ({limit:?})")]
    Timeout { op: String, limit: Duration },

    #[error("操作已取消")]
    Cancelled,

    /// 已有比较任务在运行
    #[error("已有比较任务正在运行")]
    Busy,
}

impl CompareError {
    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompareError::Timeout { .. })
    }

    pub(crate) fn access(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompareError::Access {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        let timeout = CompareError::Timeout {
            op: "扫描".to_string(),
            limit: Duration::from_secs(3),
        };
        assert!(timeout.is_retryable());
        assert!(!CompareError::Cancelled.is_retryable());
        assert!(!CompareError::access(
            "/nope",
            io::Error::new(io::ErrorKind::NotFound, "missing")
        )
        .is_retryable());
    }

    #[test]
    fn sub_second_timeouts_keep_their_unit() {
        let err = CompareError::Timeout {
            op: "复制 slow".to_string(),
            limit: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "复制 slow 超时 (200ms)");
    }

    #[test]
    fn access_error_names_the_path() {
        let err = CompareError::access(
            "/data/a",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/data/a"));
    }
}
