//! Remote sources: where module indexes and packages are fetched from.
//!
//! Package locations differ between repositories, so each source carries a
//! list of path templates tried in order:
//!
//! ```text
//! {dir}     base directory without trailing slash   /pub/sword/raw
//! {parent}  {dir} minus a trailing "raw"            /pub/sword/
//! {id}      module id as written in its conf         KJV
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use scriptorium_shared::{ConfigError, Result, ScriptoriumError, SourceEntry, validate_sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Http,
    Https,
}

impl Protocol {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Self::Ftp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(ConfigError::Invalid(format!("unknown protocol '{other}'")).into()),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Ftp => "ftp",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// A remote module repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSource {
    pub name: String,
    pub protocol: Protocol,
    /// Host, optionally with `:port`.
    pub host: String,
    /// Directory holding `mods.d.tar.gz`.
    pub directory: String,
    pub package_patterns: Vec<String>,
}

impl RemoteSource {
    /// A source with the package patterns for its directory layout.
    pub fn new(name: &str, protocol: Protocol, host: &str, directory: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            protocol,
            host: host.trim().to_string(),
            directory: directory.trim().to_string(),
            package_patterns: default_patterns(directory),
        }
    }

    pub fn from_entry(entry: &SourceEntry) -> Result<Self> {
        if entry.name.trim().is_empty() || entry.host.trim().is_empty() {
            return Err(ConfigError::Invalid("source name and host must not be empty".into()).into());
        }
        let mut source = Self::new(
            &entry.name,
            Protocol::parse(&entry.protocol)?,
            &entry.host,
            &entry.directory,
        );
        if !entry.package_patterns.is_empty() {
            source.package_patterns = entry.package_patterns.clone();
        }
        Ok(source)
    }

    /// `{dir}`: the base directory, rooted, without a trailing slash.
    fn dir(&self) -> String {
        let trimmed = self.directory.trim_end_matches('/');
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }

    fn parent(&self) -> String {
        let dir = self.dir();
        match dir.strip_suffix("raw") {
            Some(parent) => parent.to_string(),
            None => match dir.rfind('/') {
                Some(at) => dir[..=at].to_string(),
                None => "/".into(),
            },
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let raw = format!("{}://{}{path}", self.protocol.scheme(), self.host);
        Url::parse(&raw)
            .map_err(|e| ConfigError::Invalid(format!("source {}: bad URL {raw}: {e}", self.name)).into())
    }

    /// `{dir}/mods.d.tar.gz`.
    pub fn index_url(&self) -> Result<Url> {
        self.url(&format!("{}/mods.d.tar.gz", self.dir()))
    }

    /// Candidate package URLs for `id`, in the order they are tried.
    pub fn package_urls(&self, id: &str) -> Result<Vec<Url>> {
        let dir = self.dir();
        let parent = self.parent();
        self.package_patterns
            .iter()
            .map(|pattern| {
                let path = pattern
                    .replace("{dir}", &dir)
                    .replace("{parent}", &parent)
                    .replace("{id}", id);
                self.url(&path)
            })
            .collect()
    }
}

fn default_patterns(directory: &str) -> Vec<String> {
    let raw_layout = directory.trim().trim_end_matches('/').ends_with("raw");
    let patterns: &[&str] = if raw_layout {
        &[
            "{parent}packages/rawzip/{id}.zip",
            "{parent}packages/{id}.zip",
            "{parent}rawzip/{id}.zip",
        ]
    } else {
        &["{dir}/zip/{id}.zip", "{dir}/packages/rawzip/{id}.zip"]
    };
    patterns.iter().map(|p| p.to_string()).collect()
}

/// The built-in source list.
pub fn default_sources() -> Vec<RemoteSource> {
    use Protocol::Ftp;
    [
        ("Bible.org", "ftp.crosswire.org", "/pub/bible.org/sword"),
        ("CrossWire", "ftp.crosswire.org", "/pub/sword/raw"),
        ("CrossWire Attic", "ftp.crosswire.org", "/pub/sword/atticraw"),
        ("CrossWire Beta", "ftp.crosswire.org", "/pub/sword/betaraw"),
        ("CrossWire Wycliffe", "ftp.crosswire.org", "/pub/sword/wyclifferaw"),
        ("Deutsche Bibelgesellschaft", "ftp.crosswire.org", "/pub/sword/dbgraw"),
        ("IBT", "ftp.ibt.org.ru", "/pub/modsword/raw"),
        ("Lockman Foundation", "ftp.crosswire.org", "/pub/sword/lockmanraw"),
        ("STEP Bible", "ftp.stepbible.org", "/pub/sword"),
        ("Xiphos", "ftp.xiphos.org", "/pub/xiphos"),
        ("eBible.org", "ftp.ebible.org", "/sword"),
    ]
    .into_iter()
    .map(|(name, host, dir)| RemoteSource::new(name, Ftp, host, dir))
    .collect()
}

/// Configured sources, or the built-in list when none are configured.
pub fn resolve_sources(entries: &[SourceEntry]) -> Result<Vec<RemoteSource>> {
    if entries.is_empty() {
        return Ok(default_sources());
    }
    validate_sources(entries)?;
    entries.iter().map(RemoteSource::from_entry).collect()
}

/// Sources from `install.conf`-style `FTPSource=host|dir|name` lines
/// (also `HTTPSource=` and `HTTPSSource=`). Other lines are ignored.
pub fn parse_install_conf(text: &str) -> Result<Vec<RemoteSource>> {
    let mut sources: Vec<RemoteSource> = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let protocol = match key.trim() {
            "FTPSource" => Protocol::Ftp,
            "HTTPSource" => Protocol::Http,
            "HTTPSSource" => Protocol::Https,
            _ => continue,
        };
        let parts: Vec<&str> = value.split('|').map(str::trim).collect();
        let [host, dir, name, ..] = parts.as_slice() else {
            return Err(ScriptoriumError::config(format!(
                "install.conf line {}: expected host|directory|name",
                number + 1
            )));
        };
        if sources.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
            return Err(ConfigError::DuplicateSource(name.to_string()).into());
        }
        sources.push(RemoteSource::new(name, protocol, host, dir));
    }
    Ok(sources)
}
