//! Module descriptor ("conf") parsing.
//!
//! A conf is INI-style: one `[ModuleId]` section followed by `Key=Value`
//! lines. Values may continue onto the next line with a trailing backslash.
//! `Feature` and `GlobalOptionFilter` repeat; unknown keys are kept verbatim
//! in [`ModuleDescriptor::extra`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, ScriptoriumError};
use crate::types::{Dialect, ModuleKind};

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Storage driver named by `ModDrv`.
///
/// Drivers without a decoder (`RawFiles`, `HREFCom`, …) are kept as
/// [`Driver::Other`] so their modules can still be indexed and installed;
/// opening one for reading fails with `UnknownDriver`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Driver {
    ZText,
    ZText4,
    RawText,
    RawText4,
    ZCom,
    ZCom4,
    RawCom,
    RawCom4,
    ZLD,
    RawLD,
    RawLD4,
    RawGenBook,
    Other(String),
}

impl Driver {
    /// Parse a `ModDrv` value (case-insensitive).
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "ztext" => Self::ZText,
            "ztext4" => Self::ZText4,
            "rawtext" => Self::RawText,
            "rawtext4" => Self::RawText4,
            "zcom" => Self::ZCom,
            "zcom4" => Self::ZCom4,
            "rawcom" => Self::RawCom,
            "rawcom4" => Self::RawCom4,
            "zld" => Self::ZLD,
            "rawld" => Self::RawLD,
            "rawld4" => Self::RawLD4,
            "rawgenbook" => Self::RawGenBook,
            _ => Self::Other(value.to_string()),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::ZText | Self::ZText4 | Self::RawText | Self::RawText4 => ModuleKind::Bible,
            Self::ZCom | Self::ZCom4 | Self::RawCom | Self::RawCom4 => ModuleKind::Commentary,
            Self::ZLD | Self::RawLD | Self::RawLD4 => ModuleKind::Dictionary,
            Self::RawGenBook => ModuleKind::GenBook,
            Self::Other(name) => match name.to_ascii_lowercase().as_str() {
                "rawfiles" | "hrefcom" => ModuleKind::Commentary,
                _ => ModuleKind::Bible,
            },
        }
    }

    /// Canonical spelling, as written in confs and used for store directories.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ZText => "zText",
            Self::ZText4 => "zText4",
            Self::RawText => "RawText",
            Self::RawText4 => "RawText4",
            Self::ZCom => "zCom",
            Self::ZCom4 => "zCom4",
            Self::RawCom => "RawCom",
            Self::RawCom4 => "RawCom4",
            Self::ZLD => "zLD",
            Self::RawLD => "RawLD",
            Self::RawLD4 => "RawLD4",
            Self::RawGenBook => "RawGenBook",
            Self::Other(name) => name,
        }
    }

    /// Whether a decoder exists for this driver.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Block-compressed drivers (`z*`).
    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            Self::ZText | Self::ZText4 | Self::ZCom | Self::ZCom4 | Self::ZLD
        )
    }
}

impl From<String> for Driver {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Driver> for String {
    fn from(driver: Driver) -> Self {
        driver.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// ModuleDescriptor
// ---------------------------------------------------------------------------

/// Parsed module descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Section name as written (e.g. `KJV`).
    pub id: String,
    pub driver: Driver,
    /// Raw `DataPath`, usually `./modules/texts/ztext/kjv/`.
    pub data_path: String,
    pub source_type: Option<String>,
    pub compress_type: Option<String>,
    pub block_type: Option<String>,
    pub encoding: Option<String>,
    pub language: Option<String>,
    /// Versification id; `KJV` when the conf does not say.
    pub versification: String,
    pub install_size: Option<u64>,
    pub description: Option<String>,
    pub about: Option<String>,
    pub version: Option<String>,
    pub sword_version_date: Option<String>,
    pub copyright: Option<String>,
    pub distribution_license: Option<String>,
    pub category: Option<String>,
    pub lcsh: Option<String>,
    pub minimum_version: Option<String>,
    pub features: Vec<String>,
    pub global_option_filters: Vec<String>,
    /// Unrecognized keys, passed through untouched.
    pub extra: BTreeMap<String, String>,
}

impl ModuleDescriptor {
    pub fn kind(&self) -> ModuleKind {
        self.driver.kind()
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::from_source_type(self.source_type.as_deref())
    }

    /// Lower-cased id, as used for conf file names and store directories.
    pub fn key(&self) -> String {
        self.id.to_ascii_lowercase()
    }

    /// `DataPath` relative to the store root, without the leading `./`.
    pub fn relative_data_path(&self) -> PathBuf {
        let trimmed = self
            .data_path
            .trim()
            .trim_start_matches("./")
            .trim_start_matches('/');
        PathBuf::from(trimmed)
    }

    /// Absolute location of the module's data under `root`.
    ///
    /// For dictionary and genbook drivers `DataPath` names a file prefix
    /// (`./modules/lexdict/zld/strongs/dict`); the owning directory is returned.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        let rel = self.relative_data_path();
        let path = root.join(&rel);
        if self.data_path.trim_end().ends_with('/') {
            return path;
        }
        match self.kind() {
            ModuleKind::Dictionary | ModuleKind::GenBook => {
                path.parent().map(Path::to_path_buf).unwrap_or(path)
            }
            _ => path,
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f.eq_ignore_ascii_case(feature))
    }

    /// SPDX identifier for `DistributionLicense`, if one can be derived.
    pub fn license_spdx(&self) -> Option<String> {
        self.distribution_license.as_deref().and_then(to_spdx_license)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse conf text. `file` is only used in error messages.
pub fn parse_conf(text: &str, file: &str) -> Result<ModuleDescriptor> {
    let malformed = |reason: &str| -> ScriptoriumError {
        ConfigError::MalformedConf {
            file: file.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    let mut id: Option<String> = None;
    let mut entries: Vec<(String, String)> = Vec::new();

    for line in logical_lines(text) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            if !line.ends_with(']') || line.len() < 3 {
                return Err(malformed("unterminated section header"));
            }
            if id.is_some() {
                // A second section starts another module; one conf, one module.
                break;
            }
            id = Some(line[1..line.len() - 1].trim().to_string());
            continue;
        }
        if id.is_none() {
            return Err(malformed("key before section header"));
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(malformed(&format!("line without '=': {line}")));
        };
        entries.push((key.trim().to_string(), value.trim().to_string()));
    }

    let id = id.ok_or_else(|| malformed("no [section] header"))?;
    if id.is_empty() {
        return Err(malformed("empty section name"));
    }

    let mut driver = None;
    let mut data_path = None;
    let mut desc = ModuleDescriptor {
        id,
        driver: Driver::ZText,
        data_path: String::new(),
        source_type: None,
        compress_type: None,
        block_type: None,
        encoding: None,
        language: None,
        versification: "KJV".into(),
        install_size: None,
        description: None,
        about: None,
        version: None,
        sword_version_date: None,
        copyright: None,
        distribution_license: None,
        category: None,
        lcsh: None,
        minimum_version: None,
        features: Vec::new(),
        global_option_filters: Vec::new(),
        extra: BTreeMap::new(),
    };

    for (key, value) in entries {
        match key.as_str() {
            "ModDrv" => driver = non_empty(&value).map(|v| Driver::parse(&v)),
            "DataPath" => data_path = Some(value),
            "SourceType" => desc.source_type = non_empty(&value),
            "CompressType" => desc.compress_type = non_empty(&value).map(|v| v.to_ascii_uppercase()),
            "BlockType" => desc.block_type = non_empty(&value),
            "Encoding" => desc.encoding = non_empty(&value),
            "Lang" => desc.language = non_empty(&value),
            "Versification" if !value.is_empty() => desc.versification = value,
            "InstallSize" => {
                desc.install_size = Some(value.parse::<u64>().map_err(|_| {
                    malformed(&format!("InstallSize is not a number: {value}"))
                })?);
            }
            "Description" => desc.description = non_empty(&value),
            "About" => desc.about = Some(about_text(&value)),
            "Version" => desc.version = non_empty(&value),
            "SwordVersionDate" => desc.sword_version_date = non_empty(&value),
            "Copyright" => desc.copyright = non_empty(&value),
            "DistributionLicense" => desc.distribution_license = non_empty(&value),
            "Category" => desc.category = non_empty(&value),
            "LCSH" => desc.lcsh = non_empty(&value),
            "MinimumVersion" => desc.minimum_version = non_empty(&value),
            "Feature" => desc.features.push(value),
            "GlobalOptionFilter" => desc.global_option_filters.push(value),
            _ => {
                // Repeated unknown keys keep every value, newline-joined.
                desc.extra
                    .entry(key)
                    .and_modify(|v| {
                        v.push('\n');
                        v.push_str(&value);
                    })
                    .or_insert(value);
            }
        }
    }

    desc.driver = driver.ok_or_else(|| malformed("missing ModDrv"))?;
    desc.data_path = data_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| malformed("missing DataPath"))?;

    if desc.description.is_none() {
        desc.description = desc.about.as_deref().map(|a| truncate_description(a, 200));
    }

    Ok(desc)
}

/// Read and parse a conf file from disk.
pub fn parse_conf_file(path: &Path) -> Result<ModuleDescriptor> {
    let bytes = std::fs::read(path).map_err(|e| ScriptoriumError::io(path, e))?;
    // Older confs are Latin-1; fall back byte-for-char rather than failing.
    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_conf(&text, &name)
}

/// Join backslash-continued lines.
fn logical_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for raw in text.lines() {
        let raw = raw.trim_end_matches('\r');
        if let Some(stripped) = raw.strip_suffix('\\') {
            current.push_str(stripped);
            current.push('\n');
        } else {
            current.push_str(raw);
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Convert the RTF-ish `About` markup to plain text.
fn about_text(value: &str) -> String {
    value
        .replace("\\par\\par", "\n\n")
        .replace("\\par ", "\n")
        .replace("\\par", "\n")
        .replace("\\pard", "")
        .replace("\\qc", "")
        .trim()
        .to_string()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn truncate_description(text: &str, max_len: usize) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() <= max_len {
        return first.to_string();
    }
    let cut: String = first.chars().take(max_len).collect();
    let cut = match cut.rfind(' ') {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{cut}...")
}

/// Map a `DistributionLicense` string to an SPDX identifier.
pub fn to_spdx_license(license: &str) -> Option<String> {
    let lower = license.trim().to_ascii_lowercase();
    let v4 = lower.contains("4.0");
    let id = match () {
        _ if lower.is_empty() || lower == "-" => return None,
        _ if lower.contains("public domain") => "CC-PDDC",
        _ if lower == "gpl" => "GPL-3.0-or-later",
        _ if lower == "unrestricted" => "Unlicense",
        _ if lower.contains("cc0") => "CC0-1.0",
        _ if lower.contains("by-nc-nd") => {
            if v4 { "CC-BY-NC-ND-4.0" } else { "CC-BY-NC-ND-3.0" }
        }
        _ if lower.contains("by-nc-sa") => {
            if v4 { "CC-BY-NC-SA-4.0" } else { "CC-BY-NC-SA-3.0" }
        }
        _ if lower.contains("by-sa") => {
            if v4 { "CC-BY-SA-4.0" } else { "CC-BY-SA-3.0" }
        }
        _ if lower.contains("by-nd") => {
            if v4 { "CC-BY-ND-4.0" } else { "CC-BY-ND-3.0" }
        }
        _ if lower.contains("by 4.0") || (lower.contains("attribution") && v4) => "CC-BY-4.0",
        _ if lower.contains("creative commons: by") => "CC-BY-3.0",
        _ if lower.contains("copyrighted") && lower.contains("free") => {
            "LicenseRef-Copyrighted-Free"
        }
        _ if lower.contains("copyrighted") => "LicenseRef-Copyrighted",
        _ => return Some(license.trim().to_string()),
    };
    Some(id.to_string())
}
