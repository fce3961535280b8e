#![allow(dead_code)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// 创建测试用的临时目录结构
pub fn create_test_structure() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("dir1/subdir1")).unwrap();
    fs::create_dir_all(root.join("dir2")).unwrap();
    fs::create_dir_all(root.join("empty_dir")).unwrap();

    fs::write(root.join("file1.txt"), b"content1").unwrap();
    fs::write(root.join("dir1/file2.txt"), b"content2").unwrap();
    fs::write(root.join("dir1/subdir1/file3.txt"), b"content3").unwrap();
    fs::write(root.join("dir2/scratch.tmp"), b"tmp").unwrap();

    temp_dir
}

/// dirA/link -> dirB, dirB/link -> dirA
#[cfg(unix)]
pub fn create_cycle_structure() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("dirA")).unwrap();
    fs::create_dir_all(root.join("dirB")).unwrap();
    fs::write(root.join("dirA/a.txt"), b"a").unwrap();
    fs::write(root.join("dirB/b.txt"), b"b").unwrap();
    std::os::unix::fs::symlink(root.join("dirB"), root.join("dirA/link")).unwrap();
    std::os::unix::fs::symlink(root.join("dirA"), root.join("dirB/link")).unwrap();

    temp_dir
}

/// Root-relative path with `/` separators.
pub fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap()
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
