//! 比较过程中的事件流
//!
//! 事件通过无界 channel 按发出顺序交给唯一的消费者（界面层），
//! 发送永不阻塞，消费者提前退出也不会影响比较任务。

use crate::core::comparator::Category;
use crate::core::scanner::FileEntry;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// 遍历阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    OnlyA,
    OnlyB,
    Common,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::OnlyA => "正在处理文件夹1独有文件...",
            Phase::OnlyB => "正在处理文件夹2独有文件...",
            Phase::Common => "正在处理共有文件...",
        }
    }
}

impl From<Category> for Phase {
    fn from(category: Category) -> Self {
        match category {
            Category::OnlyA => Phase::OnlyA,
            Category::OnlyB => Phase::OnlyB,
            Category::Common => Phase::Common,
        }
    }
}

/// 单个文件的分类记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum ClassifiedFile {
    OnlyA { entry: FileEntry },
    OnlyB { entry: FileEntry },
    #[serde(rename_all = "camelCase")]
    Common {
        a: FileEntry,
        b: FileEntry,
        /// 两边大小不同，仅作提示，不影响分类
        size_mismatch: bool,
    },
}

impl ClassifiedFile {
    pub fn common(a: FileEntry, b: FileEntry) -> Self {
        let size_mismatch = a.size != b.size;
        ClassifiedFile::Common {
            a,
            b,
            size_mismatch,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            ClassifiedFile::OnlyA { .. } => Category::OnlyA,
            ClassifiedFile::OnlyB { .. } => Category::OnlyB,
            ClassifiedFile::Common { .. } => Category::Common,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ClassifiedFile::OnlyA { entry } | ClassifiedFile::OnlyB { entry } => &entry.name,
            ClassifiedFile::Common { a, .. } => &a.name,
        }
    }

    /// (文件夹1中的大小, 文件夹2中的大小)
    pub fn sizes(&self) -> (Option<u64>, Option<u64>) {
        match self {
            ClassifiedFile::OnlyA { entry } => (Some(entry.size), None),
            ClassifiedFile::OnlyB { entry } => (None, Some(entry.size)),
            ClassifiedFile::Common { a, b, .. } => (Some(a.size), Some(b.size)),
        }
    }

    pub fn size_mismatch(&self) -> bool {
        matches!(
            self,
            ClassifiedFile::Common {
                size_mismatch: true,
                ..
            }
        )
    }
}

impl std::fmt::Display for ClassifiedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifiedFile::OnlyA { entry } | ClassifiedFile::OnlyB { entry } => {
                write!(f, "{} ({})", entry.name, format_size(entry.size))
            }
            ClassifiedFile::Common {
                a,
                b,
                size_mismatch: true,
            } => write!(
                f,
                "{} (⚠ 大小不同 {} vs {})",
                a.name,
                format_size(a.size),
                format_size(b.size)
            ),
            ClassifiedFile::Common { a, .. } => {
                write!(f, "{} (相同大小: {})", a.name, format_size(a.size))
            }
        }
    }
}

/// 比较事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ComparisonEvent {
    Progress {
        done: usize,
        total: usize,
        phase: Phase,
    },
    FileClassified {
        file: ClassifiedFile,
    },
    Log {
        message: String,
        severity: Severity,
    },
}

/// 事件发送端
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ComparisonEvent>>,
}

impl EventSink {
    /// 创建一对发送端和事件流
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, UnboundedReceiverStream::new(rx))
    }

    /// 丢弃所有事件的发送端
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ComparisonEvent) {
        if let Some(tx) = &self.tx {
            // 消费者已关闭时直接丢弃
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        self.emit(ComparisonEvent::Log {
            message: message.into(),
            severity,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }
}

pub type EventStream = UnboundedReceiverStream<ComparisonEvent>;

/// 格式化文件大小
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn entry(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: format!("/x/{}", name).into(),
            size,
        }
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(2048 * 1024 * 1024 * 1024 * 1024), "2048.00 TB");
    }

    #[test]
    fn common_record_flags_size_mismatch() {
        let differs = ClassifiedFile::common(entry("a.txt", 3), entry("a.txt", 4));
        assert!(differs.size_mismatch());
        assert_eq!(differs.sizes(), (Some(3), Some(4)));
        assert_eq!(differs.category(), Category::Common);
        assert!(differs.to_string().contains("大小不同"));

        let same = ClassifiedFile::common(entry("b.txt", 4), entry("b.txt", 4));
        assert!(!same.size_mismatch());
    }

    #[test]
    fn events_serialize_with_tags() {
        let event = ComparisonEvent::FileClassified {
            file: ClassifiedFile::common(entry("a", 1), entry("a", 2)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "fileClassified");
        assert_eq!(json["file"]["category"], "common");
        assert_eq!(json["file"]["sizeMismatch"], true);

        let log = serde_json::to_value(ComparisonEvent::Log {
            message: "m".into(),
            severity: Severity::Warning,
        })
        .unwrap();
        assert_eq!(log["severity"], "warning");
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, stream) = EventSink::channel();
        sink.info("first");
        sink.emit(ComparisonEvent::Progress {
            done: 1,
            total: 1,
            phase: Phase::OnlyA,
        });
        sink.error("last");
        drop(sink);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ComparisonEvent::Log { message, .. } if message == "first"));
        assert!(matches!(events[1], ComparisonEvent::Progress { done: 1, .. }));
        assert!(matches!(
            &events[2],
            ComparisonEvent::Log {
                severity: Severity::Error,
                ..
            }
        ));
    }

    #[test]
    fn emitting_after_consumer_dropped_is_harmless() {
        let (sink, stream) = EventSink::channel();
        drop(stream);
        sink.info("nobody listens");
        EventSink::disabled().warning("also fine");
    }
}
