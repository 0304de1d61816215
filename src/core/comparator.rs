use crate::core::scanner::DirectorySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 文件分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// 只在文件夹1中
    OnlyA,
    /// 只在文件夹2中
    OnlyB,
    /// 两边都有
    Common,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::OnlyA, Category::OnlyB, Category::Common];

    /// 分类复制时使用的子目录名
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::OnlyA => "文件夹1独有的文件",
            Category::OnlyB => "文件夹2独有的文件",
            Category::Common => "共有的文件",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::OnlyA => write!(f, "only_a"),
            Category::OnlyB => write!(f, "only_b"),
            Category::Common => write!(f, "common"),
        }
    }
}

/// 三路划分结果，每组按字节序排序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub only_a: Vec<String>,
    pub only_b: Vec<String>,
    pub common: Vec<String>,
}

impl Partition {
    pub fn names(&self, category: Category) -> &[String] {
        match category {
            Category::OnlyA => &self.only_a,
            Category::OnlyB => &self.only_b,
            Category::Common => &self.common,
        }
    }

    /// 遍历时的文件总数
    pub fn total(&self) -> usize {
        self.only_a.len() + self.only_b.len() + self.common.len()
    }

    pub fn summary(&self) -> PartitionSummary {
        PartitionSummary {
            total_a: self.only_a.len() + self.common.len(),
            total_b: self.only_b.len() + self.common.len(),
            common: self.common.len(),
            diff: self.only_a.len() + self.only_b.len(),
        }
    }
}

/// 统计数字
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSummary {
    pub total_a: usize,
    pub total_b: usize,
    pub common: usize,
    pub diff: usize,
}

/// 按文件名比较两个快照
///
/// 只看名字是否存在，大小和内容不影响分类。
pub fn diff(a: &DirectorySnapshot, b: &DirectorySnapshot) -> Partition {
    let mut partition = Partition {
        only_a: missing_from(&a.files, &b.files),
        only_b: missing_from(&b.files, &a.files),
        common: a
            .files
            .keys()
            .filter(|name| b.files.contains_key(*name))
            .cloned()
            .collect(),
    };

    // String 的 Ord 就是字节序比较，不受 locale 影响
    partition.only_a.sort_unstable();
    partition.only_b.sort_unstable();
    partition.common.sort_unstable();

    tracing::debug!(
        "比较完成: 文件夹1独有 {}, 文件夹2独有 {}, 共有 {}",
        partition.only_a.len(),
        partition.only_b.len(),
        partition.common.len()
    );

    partition
}

fn missing_from<V>(left: &HashMap<String, V>, right: &HashMap<String, V>) -> Vec<String> {
    left.keys()
        .filter(|name| !right.contains_key(*name))
        .cloned()
        .collect()
}
