//! 分类复制 - 把文件按比较结果复制到三个子目录

use crate::core::comparator::Category;
use crate::core::engine::{ComparisonResult, JobConfig};
use crate::core::events::EventSink;
use crate::error::{CompareError, Result};
use filetime::FileTime;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 单个文件的复制失败记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFailure {
    pub category: Category,
    pub name: String,
    pub error: String,
}

/// 分类复制结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyOutcome {
    pub copied: usize,
    pub bytes_copied: u64,
    pub failures: Vec<CopyFailure>,
}

impl ClassifyOutcome {
    /// 有文件复制失败（已复制的文件不会回滚）
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    fn merge(&mut self, other: ClassifyOutcome) {
        self.copied += other.copied;
        self.bytes_copied += other.bytes_copied;
        self.failures.extend(other.failures);
    }
}

/// 一次待执行的复制
#[derive(Debug, Clone)]
struct CopyTask {
    category: Category,
    name: String,
    source: PathBuf,
    dest: PathBuf,
}

/// 分类复制器
#[derive(Debug, Clone)]
pub struct Classifier {
    copy_timeout: Option<Duration>,
    max_retries: u32,
    retry_base_delay_ms: u64,
    parallel: bool,
}

impl Classifier {
    pub fn new(config: &JobConfig) -> Self {
        Self {
            copy_timeout: config.copy_timeout,
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
            parallel: config.parallel_copy,
        }
    }

    /// 执行分类复制
    ///
    /// 共有文件总是复制文件夹1中的版本。单个文件失败只记录日志，
    /// 不影响其余文件；子目录创建失败则整体失败。
    pub async fn classify(
        &self,
        result: &ComparisonResult,
        destination: &Path,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<ClassifyOutcome> {
        for category in Category::ALL {
            let dir = destination.join(category.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| CompareError::OutputCreation { path: dir, source })?;
        }

        let [only_a, only_b, common] = Category::ALL.map(|c| plan(result, destination, c));
        info!(
            "开始分类复制: {} / {} / {} 个文件",
            only_a.len(),
            only_b.len(),
            common.len()
        );

        let mut outcome = ClassifyOutcome::default();
        if self.parallel {
            let (a, b, c) = futures::future::join3(
                self.run_tasks(only_a, events, cancel),
                self.run_tasks(only_b, events, cancel),
                self.run_tasks(common, events, cancel),
            )
            .await;
            outcome.merge(a);
            outcome.merge(b);
            outcome.merge(c);
        } else {
            for tasks in [only_a, only_b, common] {
                outcome.merge(self.run_tasks(tasks, events, cancel).await);
            }
        }

        if cancel.is_cancelled() {
            return Err(CompareError::Cancelled);
        }

        info!(
            "分类复制完成: 成功 {}, 失败 {}",
            outcome.copied,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn run_tasks(
        &self,
        tasks: Vec<CopyTask>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> ClassifyOutcome {
        let mut outcome = ClassifyOutcome::default();

        for task in tasks {
            if cancel.is_cancelled() {
                break;
            }

            match self.copy_with_retry(&task, events).await {
                Ok(bytes) => {
                    outcome.copied += 1;
                    outcome.bytes_copied += bytes;
                }
                Err(e) => {
                    events.warning(format!("⚠ 复制失败 {}: {}", task.name, e));
                    outcome.failures.push(CopyFailure {
                        category: task.category,
                        name: task.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        outcome
    }

    /// 带重试的复制，只有超时会重试
    async fn copy_with_retry(&self, task: &CopyTask, events: &EventSink) -> Result<u64> {
        let mut attempt = 0u32;
        loop {
            match self.copy_once(task, attempt).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay_ms * 2_u64.pow(attempt);
                    warn!(
                        "复制超时，{}ms 后重试 ({}/{}): {}",
                        delay,
                        attempt + 1,
                        self.max_retries,
                        task.name
                    );
                    events.warning(format!(
                        "复制 {} 超时，正在重试 ({}/{})",
                        task.name,
                        attempt + 1,
                        self.max_retries
                    ));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// 复制一次
    ///
    /// 先写入本次尝试独占的临时文件，成功后再改名为目标文件。
    /// 超时后阻塞线程仍可能在运行，它结束时会删除自己的临时文件，
    /// 所以目标文件只会来自成功的那次尝试。
    async fn copy_once(&self, task: &CopyTask, attempt: u32) -> Result<u64> {
        let part = part_path(&task.dest, attempt);
        let abandoned = Arc::new(AtomicBool::new(false));

        let job = {
            let source = task.source.clone();
            let part = part.clone();
            let abandoned = abandoned.clone();
            tokio::task::spawn_blocking(move || {
                let copied = copy_preserving_times(&source, &part);
                if copied.is_err() || abandoned.load(Ordering::SeqCst) {
                    let _ = fs::remove_file(&part);
                }
                copied
            })
        };

        let joined = match self.copy_timeout {
            Some(limit) => match tokio::time::timeout(limit, job).await {
                Ok(joined) => joined,
                Err(_) => {
                    abandoned.store(true, Ordering::SeqCst);
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(CompareError::Timeout {
                        op: format!("复制 {}", task.name),
                        limit,
                    });
                }
            },
            None => job.await,
        };

        let copied = joined
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
            .and_then(|r| r);
        let renamed = match copied {
            Ok(bytes) => tokio::fs::rename(&part, &task.dest).await.map(|()| bytes),
            Err(e) => Err(e),
        };

        renamed.map_err(|source| {
            debug!("清理临时文件: {}", part.display());
            let _ = fs::remove_file(&part);
            CompareError::Copy {
                name: task.name.clone(),
                source,
            }
        })
    }
}

/// 第 n 次尝试使用的临时文件：`<目标文件名>.part<n>`
fn part_path(dest: &Path, attempt: u32) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".part{}", attempt));
    dest.with_file_name(name)
}

fn plan(result: &ComparisonResult, destination: &Path, category: Category) -> Vec<CopyTask> {
    // 共有文件取文件夹1的版本
    let snapshot = match category {
        Category::OnlyB => &result.snapshot_b,
        Category::OnlyA | Category::Common => &result.snapshot_a,
    };
    let dir = destination.join(category.dir_name());

    result
        .partition
        .names(category)
        .iter()
        .filter_map(|name| {
            let entry = snapshot.get(name)?;
            let file_name = entry.path.file_name()?;
            Some(CopyTask {
                category,
                name: name.clone(),
                source: entry.path.clone(),
                dest: dir.join(file_name),
            })
        })
        .collect()
}

/// 复制文件内容和权限，并尽量保留访问/修改时间
fn copy_preserving_times(source: &Path, dest: &Path) -> io::Result<u64> {
    let bytes = fs::copy(source, dest)?;

    match fs::metadata(source) {
        Ok(meta) => {
            let atime = FileTime::from_last_access_time(&meta);
            let mtime = FileTime::from_last_modification_time(&meta);
            if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
                debug!("无法保留文件时间 {}: {}", dest.display(), e);
            }
        }
        Err(e) => debug!("读取源文件元数据失败 {}: {}", source.display(), e),
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::DirectoryScanner;
    use futures::StreamExt;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &[u8]) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn scan_pair(a: &Path, b: &Path) -> ComparisonResult {
        let scanner = DirectoryScanner::new();
        ComparisonResult::new(
            a.to_path_buf(),
            b.to_path_buf(),
            scanner.scan(a).unwrap(),
            scanner.scan(b).unwrap(),
        )
    }

    #[tokio::test]
    async fn copies_each_category_and_prefers_folder_a() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(a.path(), "only_a.txt", b"aaa");
        write(b.path(), "only_b.txt", b"bbb");
        write(a.path(), "a.txt", b"version from A");
        write(b.path(), "a.txt", b"B!");

        let result = scan_pair(a.path(), b.path());
        let classifier = Classifier::new(&JobConfig::default());
        let outcome = classifier
            .classify(&result, out.path(), &EventSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.copied, 3);
        assert!(!outcome.is_partial());
        assert_eq!(
            fs::read(out.path().join(Category::OnlyA.dir_name()).join("only_a.txt")).unwrap(),
            b"aaa"
        );
        assert_eq!(
            fs::read(out.path().join(Category::OnlyB.dir_name()).join("only_b.txt")).unwrap(),
            b"bbb"
        );
        assert_eq!(
            fs::read(out.path().join(Category::Common.dir_name()).join("a.txt")).unwrap(),
            b"version from A"
        );
    }

    #[tokio::test]
    async fn one_failed_copy_does_not_stop_the_rest() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for name in ["1.txt", "2.txt", "3.txt"] {
            write(a.path(), name, name.as_bytes());
        }
        let result = scan_pair(a.path(), b.path());
        // 扫描之后源文件消失
        fs::remove_file(a.path().join("2.txt")).unwrap();

        let (sink, stream) = EventSink::channel();
        let outcome = Classifier::new(&JobConfig::default())
            .classify(&result, out.path(), &sink, &CancellationToken::new())
            .await
            .unwrap();
        drop(sink);

        assert_eq!(outcome.copied, 2);
        assert!(outcome.is_partial());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].name, "2.txt");
        assert_eq!(outcome.failures[0].category, Category::OnlyA);

        let dir = out.path().join(Category::OnlyA.dir_name());
        assert!(dir.join("1.txt").exists());
        assert!(dir.join("3.txt").exists());

        let warnings: Vec<_> = stream.collect().await;
        assert_eq!(warnings.len(), 1);
        assert!(format!("{:?}", warnings[0]).contains("2.txt"));
    }

    #[tokio::test]
    async fn parallel_copy_gives_same_result() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(a.path(), "shared", b"from a");
        write(b.path(), "shared", b"from b, longer");
        write(a.path(), "left", b"l");
        write(b.path(), "right", b"r");

        let config = JobConfig {
            parallel_copy: true,
            ..Default::default()
        };
        let outcome = Classifier::new(&config)
            .classify(
                &scan_pair(a.path(), b.path()),
                out.path(),
                &EventSink::disabled(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.copied, 3);
        assert_eq!(
            fs::read(out.path().join(Category::Common.dir_name()).join("shared")).unwrap(),
            b"from a"
        );
    }

    #[tokio::test]
    async fn preserves_modification_time() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(a.path(), "old.txt", b"old");
        let stamp = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(a.path().join("old.txt"), stamp).unwrap();

        Classifier::new(&JobConfig::default())
            .classify(
                &scan_pair(a.path(), b.path()),
                out.path(),
                &EventSink::disabled(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let copied = fs::metadata(out.path().join(Category::OnlyA.dir_name()).join("old.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), stamp);
    }

    #[test]
    fn each_attempt_has_its_own_temp_file() {
        let dest = Path::new("/out/共有的文件/report.txt");
        assert_eq!(part_path(dest, 0), Path::new("/out/共有的文件/report.txt.part0"));
        assert_eq!(part_path(dest, 2), Path::new("/out/共有的文件/report.txt.part2"));
    }

    /// 没有写端的 FIFO：读端的 open 会一直阻塞
    #[cfg(unix)]
    fn make_fifo(path: &Path) -> bool {
        std::process::Command::new("mkfifo")
            .arg(path)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn timed_out_copy_is_retried_then_recorded_as_failure() {
        use crate::core::scanner::{DirectorySnapshot, FileEntry};

        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(a.path(), "a1", b"first");
        write(a.path(), "z9", b"last");
        let fifo = a.path().join("slow");
        if !make_fifo(&fifo) {
            return;
        }

        let entry = |name: &str, size: u64| FileEntry {
            name: name.to_string(),
            path: a.path().join(name),
            size,
        };
        let result = ComparisonResult::new(
            a.path().to_path_buf(),
            b.path().to_path_buf(),
            DirectorySnapshot::from_entries(a.path(), [entry("a1", 5), entry("slow", 0), entry("z9", 4)]),
            DirectorySnapshot::from_entries(b.path(), Vec::<FileEntry>::new()),
        );
        let config = JobConfig {
            copy_timeout: Some(Duration::from_millis(150)),
            max_retries: 1,
            retry_base_delay_ms: 10,
            ..Default::default()
        };

        let (sink, stream) = EventSink::channel();
        let outcome = Classifier::new(&config)
            .classify(&result, out.path(), &sink, &CancellationToken::new())
            .await
            .unwrap();
        drop(sink);
        let messages: Vec<String> = stream
            .filter_map(|e| async move {
                match e {
                    crate::core::events::ComparisonEvent::Log { message, .. } => Some(message),
                    _ => None,
                }
            })
            .collect()
            .await;

        assert_eq!(outcome.copied, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].name, "slow");
        assert!(outcome.failures[0].error.contains("150ms"));
        assert_eq!(
            messages.iter().filter(|m| m.contains("正在重试")).count(),
            1
        );

        let dir = out.path().join(Category::OnlyA.dir_name());
        assert_eq!(fs::read(dir.join("a1")).unwrap(), b"first");
        assert_eq!(fs::read(dir.join("z9")).unwrap(), b"last");
        assert!(!dir.join("slow").exists());

        // 放行仍阻塞在 open 上的复制线程，它们结束后不能留下任何文件
        drop(
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&fifo)
                .unwrap(),
        );
        let mut leftovers = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            leftovers = fs::read_dir(&dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with("slow"))
                .collect();
            if leftovers.is_empty() {
                break;
            }
        }
        assert!(leftovers.is_empty(), "残留文件: {:?}", leftovers);
    }

    #[tokio::test]
    async fn cancelled_token_stops_copying() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write(a.path(), "x", b"x");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Classifier::new(&JobConfig::default())
            .classify(&scan_pair(a.path(), b.path()), out.path(), &EventSink::disabled(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CompareError::Cancelled));
        assert!(!out.path().join(Category::OnlyA.dir_name()).join("x").exists());
    }
}
