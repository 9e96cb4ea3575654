//! Atomic file publication.
//!
//! A file visible at its final path is always either the previous content or
//! the fully-written new content: writes land in a `.{name}.tmp` sibling and
//! are renamed over the target. The temp file is removed on any failure.

use std::io;
use std::path::{Path, PathBuf};

fn temp_sibling(target: &Path) -> io::Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{name}.tmp")))
}

/// Write `content` to `target` atomically. Parent directories are created.
pub fn atomic_write(content: &[u8], target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_sibling(target)?;
    let result = std::fs::write(&temp, content).and_then(|()| std::fs::rename(&temp, target));
    if result.is_err() && temp.exists() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}

/// Copy `src` to `dst` atomically, same temp-then-rename discipline.
pub fn atomic_copy(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_sibling(dst)?;
    let result = std::fs::copy(src, &temp)
        .map(|_| ())
        .and_then(|()| std::fs::rename(&temp, dst));
    if result.is_err() && temp.exists() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub/dir/out.json");
        atomic_write(b"{\"ok\":true}", &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"{\"ok\":true}");
        // no temp file left behind
        assert!(!dir.path().join("sub/dir/.out.json.tmp").exists());
    }

    #[test]
    fn overwrite_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        atomic_write(b"old", &target).unwrap();
        atomic_write(b"new", &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn copy_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("nested/dst.bin");
        std::fs::write(&src, b"payload").unwrap();
        atomic_copy(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }
}
