//! Remote module indexes (`mods.d.tar.gz`) and their on-disk cache.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use scriptorium_shared::{ModuleDescriptor, Result, ScriptoriumError, parse_conf};

use crate::store::write_atomic;

/// One module offered by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIndexEntry {
    pub source: String,
    pub descriptor: ModuleDescriptor,
    /// The conf as served; written verbatim on install when the package lacks one.
    pub conf_text: String,
}

/// A conf in the archive that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIndex {
    pub source: String,
    pub entries: Vec<ModuleIndexEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<IndexFailure>,
}

impl SourceIndex {
    /// Entries whose id matches `name`, ignoring case.
    pub fn find(&self, name: &str) -> Option<&ModuleIndexEntry> {
        self.entries
            .iter()
            .find(|e| e.descriptor.id.eq_ignore_ascii_case(name))
    }
}

/// Parse a gzip-compressed tar of conf files.
///
/// Malformed confs are recorded in `failures`; only an unreadable archive
/// is an error.
pub fn parse_index_archive(source: &str, bytes: &[u8]) -> Result<SourceIndex> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut entries = Vec::new();
    let mut failures = Vec::new();

    let iter = archive
        .entries()
        .map_err(|e| ScriptoriumError::format(format!("index archive: {e}")))?;
    for item in iter {
        let mut item = item.map_err(|e| ScriptoriumError::format(format!("index archive: {e}")))?;
        let path = item
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !item.header().entry_type().is_file() || !path.ends_with(".conf") {
            continue;
        }

        let mut raw = Vec::new();
        if let Err(e) = item.read_to_end(&mut raw) {
            failures.push(IndexFailure {
                file: path,
                reason: e.to_string(),
            });
            continue;
        }
        let text = decode_conf_bytes(raw);
        let file = path.rsplit('/').next().unwrap_or(&path).to_string();
        match parse_conf(&text, &file) {
            Ok(descriptor) => entries.push(ModuleIndexEntry {
                source: source.to_string(),
                descriptor,
                conf_text: text,
            }),
            Err(e) => {
                warn!(source, file = %file, error = %e, "skipping malformed conf");
                failures.push(IndexFailure {
                    file,
                    reason: e.to_string(),
                });
            }
        }
    }

    entries.sort_by(|a, b| a.descriptor.key().cmp(&b.descriptor.key()));
    debug!(source, modules = entries.len(), failures = failures.len(), "parsed index");
    Ok(SourceIndex {
        source: source.to_string(),
        entries,
        failures,
    })
}

/// UTF-8, falling back to Latin-1.
fn decode_conf_bytes(raw: Vec<u8>) -> String {
    match String::from_utf8(raw) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// `<root>/index/<source>.json`, with the name reduced to a safe file stem.
pub fn index_path(root: &Path, source: &str) -> PathBuf {
    let stem: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    root.join("index").join(format!("{stem}.json"))
}

pub fn save_index(root: &Path, index: &SourceIndex) -> Result<PathBuf> {
    let path = index_path(root, &index.source);
    let json = serde_json::to_string_pretty(index)
        .map_err(|e| ScriptoriumError::format(format!("serialize index: {e}")))?;
    write_atomic(&path, json.as_bytes())?;
    Ok(path)
}

/// The cached index for `source`, or `None` if it was never refreshed.
pub fn load_index(root: &Path, source: &str) -> Result<Option<SourceIndex>> {
    let path = index_path(root, source);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ScriptoriumError::io(&path, e)),
    };
    let index = serde_json::from_str(&text)
        .map_err(|e| ScriptoriumError::format(format!("{}: {e}", path.display())))?;
    Ok(Some(index))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a `mods.d.tar.gz` from `(file name, contents)` pairs.
    pub(crate) fn index_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("mods.d/{name}"), body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    pub(crate) fn conf(id: &str, size: Option<u64>) -> String {
        let lower = id.to_ascii_lowercase();
        let mut text = format!(
            "[{id}]\nDataPath=./modules/texts/ztext/{lower}/\nModDrv=zText\n\
             BlockType=BOOK\nCompressType=ZIP\nSourceType=OSIS\nLang=en\nDescription={id} Bible\n"
        );
        if let Some(size) = size {
            text.push_str(&format!("InstallSize={size}\n"));
        }
        text
    }

    #[test]
    fn malformed_confs_are_recorded_not_fatal() {
        let kjv = conf("KJV", Some(100));
        let web = conf("WEB", None);
        let asv = conf("ASV", None);
        let archive = index_archive(&[
            ("web.conf", &web),
            ("kjv.conf", &kjv),
            ("broken.conf", "no section header\nModDrv=zText\n"),
            ("asv.conf", &asv),
            ("README", "not a conf"),
        ]);

        let index = parse_index_archive("Test", &archive).unwrap();
        let ids: Vec<&str> = index.entries.iter().map(|e| e.descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["ASV", "KJV", "WEB"]);
        assert_eq!(index.failures.len(), 1);
        assert_eq!(index.failures[0].file, "broken.conf");
        assert_eq!(index.find("kjv").unwrap().descriptor.install_size, Some(100));
    }

    #[test]
    fn modules_with_other_drivers_are_indexed() {
        let kjv = conf("KJV", None);
        let personal = "[Personal]\nDataPath=./modules/comments/rawfiles/personal/\n\
                        ModDrv=RawFiles\nDescription=Personal notes\n";
        let archive = index_archive(&[("kjv.conf", &kjv), ("personal.conf", personal)]);

        let index = parse_index_archive("Test", &archive).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert!(index.failures.is_empty());
        let entry = index.find("Personal").unwrap();
        assert_eq!(entry.descriptor.driver.as_str(), "RawFiles");
        assert!(!entry.descriptor.driver.is_supported());
    }

    #[test]
    fn garbage_archive_is_an_error() {
        assert!(parse_index_archive("Test", b"not gzip at all").is_err());
    }

    #[test]
    fn index_cache_round_trip() {
        let tmp = std::env::temp_dir().join(format!("scriptorium-index-{}", uuid::Uuid::now_v7()));
        assert!(load_index(&tmp, "CrossWire Beta").unwrap().is_none());

        let kjv = conf("KJV", None);
        let index = parse_index_archive("CrossWire Beta", &index_archive(&[("kjv.conf", &kjv)])).unwrap();
        let path = save_index(&tmp, &index).unwrap();
        assert!(path.ends_with("index/crosswire_beta.json"));

        let loaded = load_index(&tmp, "CrossWire Beta").unwrap().unwrap();
        assert_eq!(loaded, index);
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
