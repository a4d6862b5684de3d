//! Collision-free destination naming: `name.ext`, `name (1).ext`, `name (2).ext`, ...

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

pub const MAX_SUFFIX_DEFAULT: u32 = 9999;

/// `report.pdf` + 2 -> `report (2).pdf`; `README` + 1 -> `README (1)`.
///
/// Only the last extension is kept after the suffix, so `a.tar.gz` becomes
/// `a.tar (1).gz`.
pub fn suffixed_name(file_name: &OsStr, n: u32) -> OsString {
    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name);

    let mut out = OsString::with_capacity(file_name.len() + 8);
    out.push(stem);
    out.push(format!(" ({n})"));
    if let Some(ext) = name.extension() {
        out.push(".");
        out.push(ext);
    }
    out
}

/// First free path for `file_name` inside `dir`, or `None` once `max_suffix`
/// is exhausted. Anything present at a path, including a dangling symlink,
/// counts as taken.
///
/// `from` skips candidates already found taken: 0 starts at the plain name,
/// `n` starts at `name (n).ext`.
pub(crate) fn free_destination(
    dir: &Path,
    file_name: &OsStr,
    from: u32,
    max_suffix: u32,
) -> Option<(PathBuf, Option<u32>)> {
    if from == 0 {
        let plain = dir.join(file_name);
        if !is_taken(&plain) {
            return Some((plain, None));
        }
    }

    (from.max(1)..=max_suffix)
        .map(|n| (dir.join(suffixed_name(file_name, n)), n))
        .find(|(candidate, _)| !is_taken(candidate))
        .map(|(candidate, n)| (candidate, Some(n)))
}

fn is_taken(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_suffixed_names() {
        assert_eq!(suffixed_name(OsStr::new("a.txt"), 1), "a (1).txt");
        assert_eq!(suffixed_name(OsStr::new("a.txt"), 12), "a (12).txt");
        assert_eq!(suffixed_name(OsStr::new("README"), 1), "README (1)");
        assert_eq!(suffixed_name(OsStr::new(".bashrc"), 2), ".bashrc (2)");
        assert_eq!(suffixed_name(OsStr::new("a.tar.gz"), 1), "a.tar (1).gz");
    }

    #[test]
    fn test_free_destination_walks_suffixes() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let (path, n) = free_destination(dir, OsStr::new("a.txt"), 0, 10).unwrap();
        assert_eq!(path, dir.join("a.txt"));
        assert_eq!(n, None);

        fs::write(dir.join("a.txt"), "0").unwrap();
        fs::write(dir.join("a (1).txt"), "1").unwrap();

        let (path, n) = free_destination(dir, OsStr::new("a.txt"), 0, 10).unwrap();
        assert_eq!(path, dir.join("a (2).txt"));
        assert_eq!(n, Some(2));
    }

    #[test]
    fn test_free_destination_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("a.txt"), "0").unwrap();
        fs::write(dir.join("a (1).txt"), "1").unwrap();

        assert!(free_destination(dir, OsStr::new("a.txt"), 0, 1).is_none());
    }

    #[test]
    fn test_free_destination_resumes_after_taken_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        // Suffixes below 3 were already found taken
        let (path, n) = free_destination(dir, OsStr::new("a.txt"), 3, 10).unwrap();
        assert_eq!(path, dir.join("a (3).txt"));
        assert_eq!(n, Some(3));
        assert!(free_destination(dir, OsStr::new("a.txt"), 11, 10).is_none());
    }
}
