//! Filesystem helpers shared by the sync engine
//!
//! Every write goes through a temporary name in the target directory
//! followed by a rename, so an interrupted run can never leave a
//! half-written file that looks complete.

use sha1::{Digest, Sha1};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Suffix of in-progress write targets; anything carrying it is garbage
/// from an interrupted run and is safe to delete.
pub(crate) const PARTIAL_SUFFIX: &str = ".part";

/// Write `bytes` to `path` atomically (temp file in the same directory,
/// then rename into place).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = partial_path(path);
    if let Err(err) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}{}", file_name, PARTIAL_SUFFIX))
}

/// Delete leftover partial files in `dir` from previously interrupted runs.
pub fn clear_partials(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// SHA-1 of a byte slice, lowercase hex
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex_string(&hasher.finalize())
}

/// SHA-1 of a file's content, read in chunks
pub fn sha1_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex_string(&hasher.finalize()))
}

fn hex_string(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Move a directory, creating the target's parent first
pub fn move_dir(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}

/// Remove `dir` and its parents up to (but excluding) `root`, as long as
/// they are empty.
pub fn remove_empty_parents(dir: &Path, root: &Path) -> io::Result<()> {
    let mut current = dir.to_path_buf();
    while current != root && current.starts_with(root) {
        match fs::read_dir(&current) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => break,
            Err(err) => return Err(err),
        }
        fs::remove_dir(&current)?;
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    Ok(())
}

/// Whether `path` is a plain relative path without parent or root jumps
pub fn is_clean_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
