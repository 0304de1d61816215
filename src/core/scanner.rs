use crate::error::{CompareError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 单个文件条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// 一个目录在扫描时刻的顶层文件列表
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    pub root: PathBuf,
    pub files: HashMap<String, FileEntry>,
    /// 大小读取失败（按 0 处理）的文件名
    pub degraded: Vec<String>,
    /// 文件名转为 UTF-8 后与其他文件重名而被忽略的路径
    pub shadowed: Vec<PathBuf>,
}

impl DirectorySnapshot {
    pub fn from_entries(root: impl Into<PathBuf>, entries: impl IntoIterator<Item = FileEntry>) -> Self {
        Self {
            root: root.into(),
            files: entries.into_iter().map(|e| (e.name.clone(), e)).collect(),
            degraded: Vec::new(),
            shadowed: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.files.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}

/// 目录扫描器，只列出目录下的直接文件
#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner;

impl DirectoryScanner {
    pub fn new() -> Self {
        Self
    }

    /// 扫描目录（阻塞调用）
    ///
    /// 子目录和非普通文件会被跳过；符号链接按其指向的文件处理，
    /// 指向失效时跳过。条目按原始文件名的字节序遍历，
    /// 非 UTF-8 文件名转换后重名时保留先遍历到的那个。
    pub fn scan(&self, path: &Path) -> Result<DirectorySnapshot> {
        let meta = fs::metadata(path).map_err(|e| CompareError::access(path, e))?;
        if !meta.is_dir() {
            return Err(CompareError::access(
                path,
                io::Error::new(io::ErrorKind::Other, "不是文件夹"),
            ));
        }
        // 提前打开一次，确保权限问题以 AccessError 的形式返回
        fs::read_dir(path).map_err(|e| CompareError::access(path, e))?;

        info!("开始扫描文件夹: {}", path.display());

        let mut snapshot = DirectorySnapshot {
            root: path.to_path_buf(),
            ..Default::default()
        };
        let mut skipped = 0usize;

        for item in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "遍历失败"));
                    return Err(CompareError::access(path, source));
                }
                Err(e) => {
                    // 失效的符号链接等
                    debug!("跳过无法解析的条目: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                skipped += 1;
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if snapshot.files.contains_key(&name) {
                warn!("文件名转换后重名，已忽略: {}", entry.path().display());
                snapshot.shadowed.push(entry.into_path());
                continue;
            }
            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("读取文件大小失败，按 0 处理: {} - {}", name, e);
                    snapshot.degraded.push(name.clone());
                    0
                }
            };

            snapshot.files.insert(
                name.clone(),
                FileEntry {
                    name,
                    path: entry.into_path(),
                    size,
                },
            );
        }

        snapshot.degraded.sort();
        info!(
            "扫描完成: {} 个文件, {} 个条目被跳过, {} 个重名",
            snapshot.len(),
            skipped,
            snapshot.shadowed.len()
        );

        Ok(snapshot)
    }

    /// 在阻塞线程池中扫描，避免阻塞 async runtime
    pub async fn scan_async(&self, path: PathBuf) -> Result<DirectorySnapshot> {
        let scanner = self.clone();
        let display = path.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&path))
            .await
            .map_err(|e| {
                CompareError::access(display, io::Error::new(io::ErrorKind::Other, e.to_string()))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_only_immediate_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("b.bin"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("nested.txt"), b"x").unwrap();

        let snapshot = DirectoryScanner::new().scan(dir.path()).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a.txt").unwrap().size, 5);
        assert_eq!(snapshot.get("b.bin").unwrap().size, 0);
        assert!(!snapshot.contains("sub"));
        assert!(!snapshot.contains("nested.txt"));
        assert_eq!(snapshot.get("a.txt").unwrap().path, dir.path().join("a.txt"));
        assert!(snapshot.degraded.is_empty());
    }

    #[test]
    fn missing_directory_is_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let err = DirectoryScanner::new().scan(&missing).unwrap_err();
        assert!(matches!(err, CompareError::Access { .. }));
    }

    #[test]
    fn file_path_is_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        let err = DirectoryScanner::new().scan(&file).unwrap_err();
        assert!(matches!(err, CompareError::Access { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_resolve_or_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        fs::write(&target, b"1234").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("dangling")).unwrap();

        let snapshot = DirectoryScanner::new().scan(dir.path()).unwrap();

        assert_eq!(snapshot.get("link.txt").unwrap().size, 4);
        assert!(!snapshot.contains("dangling"));
        assert_eq!(snapshot.len(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lossy_name_collisions_are_reported() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xfe")), b"first").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xff")), b"second").unwrap();
        fs::write(dir.path().join("b"), b"").unwrap();

        let snapshot = DirectoryScanner::new().scan(dir.path()).unwrap();

        assert_eq!(snapshot.len(), 2);
        let kept = snapshot.get("a\u{FFFD}").unwrap();
        assert_eq!(kept.path, dir.path().join(OsStr::from_bytes(b"a\xfe")));
        assert_eq!(kept.size, 5);
        assert_eq!(
            snapshot.shadowed,
            vec![dir.path().join(OsStr::from_bytes(b"a\xff"))]
        );
    }

    #[tokio::test]
    async fn scan_async_matches_blocking_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one"), b"1").unwrap();
        let snapshot = DirectoryScanner::new()
            .scan_async(dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(snapshot.contains("one"));
    }
}
