use crate::core::classifier::{ClassifyOutcome, Classifier};
use crate::core::comparator::{self, Category, Partition, PartitionSummary};
use crate::core::events::{ClassifiedFile, ComparisonEvent, EventSink, EventStream, Phase};
use crate::core::report::ReportWriter;
use crate::core::scanner::{DirectoryScanner, DirectorySnapshot};
use crate::error::{CompareError, Result};
use chrono::Local;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_OUTPUT_LABEL: &str = "文件夹比较分析";

/// 同一秒内重复创建输出目录时最多尝试的后缀数
const MAX_DIR_SUFFIX: u32 = 100;

/// 比较任务配置
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// 输出目录的父目录
    pub output_base_dir: PathBuf,
    /// 输出目录名前缀
    pub output_label: String,
    /// 单个目录扫描超时，None 表示不限制
    pub scan_timeout: Option<Duration>,
    /// 单个文件复制超时，None 表示不限制
    pub copy_timeout: Option<Duration>,
    /// 超时后的最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    /// 三个分类并行复制
    pub parallel_copy: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            output_base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            output_label: DEFAULT_OUTPUT_LABEL.to_string(),
            scan_timeout: Some(Duration::from_secs(300)),
            copy_timeout: Some(Duration::from_secs(300)),
            max_retries: 2,
            retry_base_delay_ms: 500,
            parallel_copy: false,
        }
    }
}

/// 比较请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub folder_a: PathBuf,
    pub folder_b: PathBuf,
    pub save_report: bool,
    pub classify: bool,
}

impl CompareRequest {
    /// 创建请求，去掉路径两端的空白和引号
    pub fn new(folder_a: &str, folder_b: &str, save_report: bool, classify: bool) -> Result<Self> {
        let folder_a = normalize_path_input(folder_a);
        let folder_b = normalize_path_input(folder_b);

        if folder_a.is_empty() || folder_b.is_empty() {
            return Err(CompareError::InvalidRequest("请先选择两个文件夹".to_string()));
        }

        Ok(Self {
            folder_a: PathBuf::from(folder_a),
            folder_b: PathBuf::from(folder_b),
            save_report,
            classify,
        })
    }

    fn wants_output(&self) -> bool {
        self.save_report || self.classify
    }
}

fn normalize_path_input(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

/// 一次比较的最终结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub run_id: Uuid,
    pub folder_a: PathBuf,
    pub folder_b: PathBuf,
    pub partition: Partition,
    pub snapshot_a: DirectorySnapshot,
    pub snapshot_b: DirectorySnapshot,
    /// 生成了报告或分类复制时才有值
    pub output_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub classification: Option<ClassifyOutcome>,
}

impl ComparisonResult {
    pub fn new(
        folder_a: PathBuf,
        folder_b: PathBuf,
        snapshot_a: DirectorySnapshot,
        snapshot_b: DirectorySnapshot,
    ) -> Self {
        let partition = comparator::diff(&snapshot_a, &snapshot_b);
        Self {
            run_id: Uuid::new_v4(),
            folder_a,
            folder_b,
            partition,
            snapshot_a,
            snapshot_b,
            output_dir: None,
            report_path: None,
            classification: None,
        }
    }

    pub fn summary(&self) -> PartitionSummary {
        self.partition.summary()
    }

    /// 按遍历顺序（文件夹1独有、文件夹2独有、共有）生成分类记录
    pub fn classified_files(&self) -> impl Iterator<Item = ClassifiedFile> + '_ {
        Category::ALL.into_iter().flat_map(move |category| {
            self.partition
                .names(category)
                .iter()
                .filter_map(move |name| self.record(category, name))
        })
    }

    fn record(&self, category: Category, name: &str) -> Option<ClassifiedFile> {
        match category {
            Category::OnlyA => Some(ClassifiedFile::OnlyA {
                entry: self.snapshot_a.get(name)?.clone(),
            }),
            Category::OnlyB => Some(ClassifiedFile::OnlyB {
                entry: self.snapshot_b.get(name)?.clone(),
            }),
            Category::Common => Some(ClassifiedFile::common(
                self.snapshot_a.get(name)?.clone(),
                self.snapshot_b.get(name)?.clone(),
            )),
        }
    }

    /// 两边大小不同的共有文件
    pub fn size_mismatches(&self) -> Vec<&str> {
        self.partition
            .common
            .iter()
            .filter(|name| {
                match (self.snapshot_a.get(name), self.snapshot_b.get(name)) {
                    (Some(a), Some(b)) => a.size != b.size,
                    _ => false,
                }
            })
            .map(String::as_str)
            .collect()
    }
}

/// 一次比较任务
pub struct CompareJob {
    run_id: Uuid,
    request: CompareRequest,
    config: JobConfig,
    scanner: DirectoryScanner,
    events: EventSink,
    cancel: CancellationToken,
}

impl CompareJob {
    /// 创建任务，返回任务和它的事件流
    pub fn new(request: CompareRequest, config: JobConfig) -> (Self, EventStream) {
        let (events, stream) = EventSink::channel();
        let job = Self {
            run_id: Uuid::new_v4(),
            request,
            config,
            scanner: DirectoryScanner::new(),
            events,
            cancel: CancellationToken::new(),
        };
        (job, stream)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// 取消令牌，在各阶段之间检查
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 在后台任务中运行
    pub fn spawn(self) -> JoinHandle<Result<ComparisonResult>> {
        tokio::spawn(async move { self.run().await })
    }

    /// 运行比较
    ///
    /// 扫描失败时只发出错误日志并返回错误，不产生结果；
    /// 其余失败都在发生处记录，任务继续。
    pub async fn run(&self) -> Result<ComparisonResult> {
        let span = tracing::info_span!("compare", run_id = %self.run_id);
        async move {
            info!(
                "开始比较: {} <-> {}",
                self.request.folder_a.display(),
                self.request.folder_b.display()
            );

            let snapshot_a = self.scan_side("文件夹1", &self.request.folder_a).await?;
            self.check_cancelled()?;
            let snapshot_b = self.scan_side("文件夹2", &self.request.folder_b).await?;
            self.check_cancelled()?;

            self.process(snapshot_a, snapshot_b).await
        }
        .instrument(span)
        .await
    }

    async fn scan_side(&self, label: &str, path: &Path) -> Result<DirectorySnapshot> {
        self.events
            .info(format!("正在扫描{}: {}", label, path.display()));

        let mut attempt = 0u32;
        let scanned = loop {
            match self.scan_with_timeout(path).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay_ms * 2_u64.pow(attempt);
                    warn!("扫描超时，{}ms 后重试 ({}/{})", delay, attempt + 1, self.config.max_retries);
                    self.events.warning(format!(
                        "扫描{}超时，正在重试 ({}/{})",
                        label,
                        attempt + 1,
                        self.config.max_retries
                    ));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                other => break other,
            }
        };

        scanned.map_err(|e| {
            error!("扫描{}失败: {}", label, e);
            self.events.error(format!("❌ 无法访问{}: {}", label, e));
            e
        })
    }

    async fn scan_with_timeout(&self, path: &Path) -> Result<DirectorySnapshot> {
        let scan = self.scanner.scan_async(path.to_path_buf());
        match self.config.scan_timeout {
            Some(limit) => tokio::time::timeout(limit, scan)
                .await
                .unwrap_or_else(|_| {
                    Err(CompareError::Timeout {
                        op: format!("扫描 {}", path.display()),
                        limit,
                    })
                }),
            None => scan.await,
        }
    }

    /// 扫描之后的所有步骤：比较、发出事件、生成输出
    pub(crate) async fn process(
        &self,
        snapshot_a: DirectorySnapshot,
        snapshot_b: DirectorySnapshot,
    ) -> Result<ComparisonResult> {
        for name in snapshot_a.degraded.iter().chain(snapshot_b.degraded.iter()) {
            self.events
                .warning(format!("⚠ 无法读取文件大小，按 0 处理: {}", name));
        }
        for path in snapshot_a.shadowed.iter().chain(snapshot_b.shadowed.iter()) {
            self.events
                .warning(format!("⚠ 文件名无法区分，已忽略: {}", path.display()));
        }

        self.events.info("正在比较文件...");
        let mut result = ComparisonResult::new(
            self.request.folder_a.clone(),
            self.request.folder_b.clone(),
            snapshot_a,
            snapshot_b,
        );
        result.run_id = self.run_id;
        self.check_cancelled()?;

        self.walk(&result);

        if self.request.wants_output() {
            self.check_cancelled()?;
            self.write_outputs(&mut result).await?;
        }

        let summary = result.summary();
        info!(
            "比较完成: 文件夹1 {} 个, 文件夹2 {} 个, 共同 {} 个, 差异 {} 个",
            summary.total_a, summary.total_b, summary.common, summary.diff
        );
        self.events.success(format!(
            "✅ 比较完成! 统计: 文件夹1有 {} 个文件, 文件夹2有 {} 个文件, 共同文件 {} 个, 差异文件 {} 个",
            summary.total_a, summary.total_b, summary.common, summary.diff
        ));

        Ok(result)
    }

    /// 按顺序发出分类和进度事件
    fn walk(&self, result: &ComparisonResult) {
        let total = result.partition.total();
        for (index, file) in result.classified_files().enumerate() {
            let phase = Phase::from(file.category());
            self.events.emit(ComparisonEvent::FileClassified { file });
            self.events.emit(ComparisonEvent::Progress {
                done: index + 1,
                total,
                phase,
            });
        }
        debug!("已发出 {} 个文件事件", total);
    }

    async fn write_outputs(&self, result: &mut ComparisonResult) -> Result<()> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let output_dir =
            match create_output_dir(&self.config.output_base_dir, &self.config.output_label, &stamp)
                .await
            {
                Ok(dir) => dir,
                Err(e) => {
                    error!("{}", e);
                    self.events.error(format!("❌ {}", e));
                    return Ok(());
                }
            };

        let mut produced = false;

        if self.request.save_report {
            let report_path = output_dir.join(ReportWriter::file_name(&stamp));
            match ReportWriter::write(result, &report_path).await {
                Ok(()) => {
                    self.events
                        .success(format!("✅ 报告已保存: {}", report_path.display()));
                    result.report_path = Some(report_path);
                    produced = true;
                }
                Err(e) => {
                    error!("{}", e);
                    self.events.error(format!("❌ {}", e));
                }
            }
        }

        if self.request.classify {
            let classifier = Classifier::new(&self.config);
            match classifier
                .classify(result, &output_dir, &self.events, &self.cancel)
                .await
            {
                Ok(outcome) => {
                    if outcome.is_partial() {
                        self.events.warning(format!(
                            "⚠ 文件分类复制部分完成: 成功 {} 个, 失败 {} 个",
                            outcome.copied,
                            outcome.failures.len()
                        ));
                    } else {
                        self.events.success("✅ 文件分类复制完成!");
                    }
                    result.classification = Some(outcome);
                    produced = true;
                }
                Err(CompareError::Cancelled) => return self.cancelled(),
                Err(e) => {
                    error!("文件分类复制失败: {}", e);
                    self.events.error(format!("❌ 文件分类复制失败: {}", e));
                }
            }
        }

        if produced {
            result.output_dir = Some(output_dir);
        } else {
            // 什么都没生成，目录为空时顺手删掉
            let _ = tokio::fs::remove_dir(&output_dir).await;
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        Ok(())
    }

    fn cancelled<T>(&self) -> Result<T> {
        warn!("比较任务已取消");
        self.events.error("❌ 比较已取消");
        Err(CompareError::Cancelled)
    }
}

/// 创建 `<base>/<label>_<stamp>` 目录，同名已存在时追加 `_2`、`_3` ...
pub async fn create_output_dir(base: &Path, label: &str, stamp: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(base)
        .await
        .map_err(|source| CompareError::OutputCreation {
            path: base.to_path_buf(),
            source,
        })?;

    for n in 1..=MAX_DIR_SUFFIX {
        let name = if n == 1 {
            format!("{}_{}", label, stamp)
        } else {
            format!("{}_{}_{}", label, stamp, n)
        };
        let path = base.join(name);

        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                info!("创建输出目录: {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(CompareError::OutputCreation { path, source }),
        }
    }

    Err(CompareError::OutputCreation {
        path: base.join(format!("{}_{}", label, stamp)),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "输出目录名已用尽"),
    })
}
