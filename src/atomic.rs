//! Content hashing and atomic single-file replacement.
//!
//! Every mutation of the manifest, a book's metadata, or a chunk file goes
//! through [`atomic_write`]: write a `.tmp` sibling, then a single rename.
//! A failure before the rename leaves the target path untouched; after
//! success the temporary no longer exists. There is never a multi-file
//! transaction anywhere in the crate.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Suffix reserved for in-flight writes. Repair prunes leftovers.
pub const TMP_SUFFIX: &str = ".tmp";

/// SHA-256 of a file's raw bytes, hex-encoded. This is the content address:
/// hashing the same bytes twice always yields the same id.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open source for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read source: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory byte slice, hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Write `content` to `path` atomically.
///
/// Creates parent directories as needed. On any failure before the rename the
/// target is untouched and the temporary is removed.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let tmp = tmp_sibling(path);
    let write_result = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(content)?;
        f.sync_all()?;
        Ok(())
    })();
    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to write temporary: {}", tmp.display()));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to replace: {}", path.display()));
    }
    Ok(())
}

/// Copy `src` into `dst` with the same tmp-then-rename discipline.
pub fn atomic_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let tmp = tmp_sibling(dst);
    if let Err(e) = fs::copy(src, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to copy {}", src.display()));
    }
    if let Err(e) = fs::rename(&tmp, dst) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to replace: {}", dst.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_is_pure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        fs::write(&path, b"the same bytes").unwrap();
        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1, hash_bytes(b"the same bytes"));
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep/nested/file.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("file.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!tmp.path().join("file.json.tmp").exists());
    }

    #[test]
    fn test_failed_rename_leaves_target_untouched() {
        let tmp = TempDir::new().unwrap();
        // A directory at the target path makes the final rename fail
        // deterministically on every platform.
        let target = tmp.path().join("occupied");
        fs::create_dir(&target).unwrap();

        let result = atomic_write(&target, b"payload");
        assert!(result.is_err());
        assert!(target.is_dir(), "target must be untouched after failure");
        assert!(
            !tmp.path().join("occupied.tmp").exists(),
            "temporary must be cleaned up"
        );
    }

    #[test]
    fn test_atomic_copy() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        let dst = tmp.path().join("books/abc/source");
        fs::write(&src, b"raw bytes").unwrap();
        atomic_copy(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"raw bytes");
    }
}
