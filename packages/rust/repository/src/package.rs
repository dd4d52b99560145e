//! Module package (zip) handling.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use scriptorium_shared::{Result, ScriptoriumError};

/// Unpack a zip package into `dest`.
///
/// Every entry name is checked before anything is written: one entry that
/// would land outside `dest` rejects the whole package.
pub fn extract_package(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ScriptoriumError::format(format!("package: {e}")))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ScriptoriumError::format(format!("package entry {i}: {e}")))?;
        let Some(name) = entry.enclosed_name() else {
            return Err(ScriptoriumError::validation(format!(
                "package entry escapes the module store: {}",
                entry.name()
            )));
        };
        names.push((name, entry.is_dir()));
    }

    let mut written = Vec::new();
    for (i, (name, is_dir)) in names.into_iter().enumerate() {
        let target = dest.join(&name);
        if is_dir {
            std::fs::create_dir_all(&target).map_err(|e| ScriptoriumError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScriptoriumError::io(parent, e))?;
        }
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ScriptoriumError::format(format!("package entry {i}: {e}")))?;
        let mut out = File::create(&target).map_err(|e| ScriptoriumError::io(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| ScriptoriumError::io(&target, e))?;
        written.push(name);
    }
    debug!(files = written.len(), dest = %dest.display(), "extracted package");
    Ok(written)
}

/// Total size in bytes of the regular files under `dir`.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// True when `dir` holds at least one regular file.
pub fn has_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
