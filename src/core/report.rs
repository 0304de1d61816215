use crate::core::engine::ComparisonResult;
use crate::error::{CompareError, Result};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

const RULE_WIDTH: usize = 60;
const EMPTY_PLACEHOLDER: &str = "  (无)";

pub const TITLE: &str = "文件夹比较结果报告";
pub const SECTION_ONLY_A: &str = "只在文件夹1中的文件:";
pub const SECTION_ONLY_B: &str = "只在文件夹2中的文件:";
pub const SECTION_COMMON: &str = "两个文件夹都有的文件:";
pub const SECTION_STATS: &str = "统计:";

/// 比较报告生成器
pub struct ReportWriter;

impl ReportWriter {
    /// 报告文件名，带时间戳
    pub fn file_name(stamp: &str) -> String {
        format!("文件夹比较报告_{}.txt", stamp)
    }

    /// 生成报告文本
    pub fn render(result: &ComparisonResult, generated_at: DateTime<Local>) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let summary = result.partition.summary();
        let mut out = String::new();

        // 写入 String 不会失败
        let _ = writeln!(out, "{}", TITLE);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "生成时间: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "文件夹1: {}", result.folder_a.display());
        let _ = writeln!(out, "文件夹2: {}", result.folder_b.display());
        let _ = writeln!(out, "{}", rule);
        out.push('\n');

        let sections = [
            (SECTION_ONLY_A, &result.partition.only_a),
            (SECTION_ONLY_B, &result.partition.only_b),
            (SECTION_COMMON, &result.partition.common),
        ];
        for (i, (title, names)) in sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}", title);
            if names.is_empty() {
                let _ = writeln!(out, "{}", EMPTY_PLACEHOLDER);
            } else {
                for name in names.iter() {
                    let _ = writeln!(out, "  {}", name);
                }
            }
        }

        out.push('\n');
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{}", SECTION_STATS);
        let _ = writeln!(out, "文件夹1中的文件总数: {}", summary.total_a);
        let _ = writeln!(out, "文件夹2中的文件总数: {}", summary.total_b);
        let _ = writeln!(out, "共同文件数: {}", summary.common);
        let _ = writeln!(out, "差异文件数: {}", summary.diff);

        out
    }

    /// 写入报告
    ///
    /// 先写临时文件再重命名，失败时不会留下半份报告。
    pub async fn write(result: &ComparisonResult, destination: &Path) -> Result<()> {
        let content = Self::render(result, Local::now());
        let temp_path = destination.with_extension("txt.tmp");

        let written = async {
            fs::write(&temp_path, content.as_bytes()).await?;
            fs::rename(&temp_path, destination).await
        }
        .await;

        if let Err(source) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CompareError::ReportWrite {
                path: destination.to_path_buf(),
                source,
            });
        }

        debug!("报告写入 {} 字节", content.len());
        info!("报告已保存: {}", destination.display());
        Ok(())
    }
}
