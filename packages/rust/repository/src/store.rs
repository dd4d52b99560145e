//! The local record of installed modules (`<root>/installed.json`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;

use scriptorium_shared::{ModuleDescriptor, Result, ScriptoriumError, VerificationError};

const STORE_FILE: &str = "installed.json";

/// Result of the last `verify` on a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Pass,
    Fail { error: VerificationError },
}

impl VerifyOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    pub id: String,
    /// Source it was installed from; `None` for modules found on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub descriptor: ModuleDescriptor,
    pub conf_path: PathBuf,
    pub data_dir: PathBuf,
    pub installed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerifyOutcome>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    modules: BTreeMap<String, InstalledModule>,
}

/// Installed-module records keyed by lower-cased id.
///
/// Readers share the lock; every mutation holds the write lock across the
/// file rewrite so the on-disk copy never interleaves. A failed rewrite
/// leaves the in-memory records untouched.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    modules: RwLock<BTreeMap<String, InstalledModule>>,
}

impl LocalStore {
    /// Load `<root>/installed.json`, or start empty if it does not exist.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(STORE_FILE);
        let modules = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let file: StoreFile = serde_json::from_str(&text)
                    .map_err(|e| ScriptoriumError::format(format!("{}: {e}", path.display())))?;
                file.modules
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(ScriptoriumError::io(&path, e)),
        };
        debug!(path = %path.display(), modules = modules.len(), "opened local store");
        Ok(Self {
            path,
            modules: RwLock::new(modules),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, id: &str) -> Option<InstalledModule> {
        self.modules
            .read()
            .await
            .get(&id.to_ascii_lowercase())
            .cloned()
    }

    pub async fn list(&self) -> Vec<InstalledModule> {
        self.modules.read().await.values().cloned().collect()
    }

    /// Take the write lock. Changes made through the writer reach memory only
    /// after `installed.json` has been rewritten.
    pub async fn writer(&self) -> StoreWriter<'_> {
        StoreWriter {
            path: &self.path,
            modules: self.modules.write().await,
        }
    }

    pub async fn upsert(&self, module: InstalledModule) -> Result<()> {
        self.writer().await.upsert(module)
    }

    pub async fn remove(&self, id: &str) -> Result<Option<InstalledModule>> {
        self.writer().await.remove(id)
    }

    /// Record a verification result. Returns false if the module is unknown.
    pub async fn set_verification(&self, id: &str, outcome: VerifyOutcome) -> Result<bool> {
        self.writer().await.set_verification(id, outcome)
    }
}

/// Exclusive access to the store; see [`LocalStore::writer`].
pub struct StoreWriter<'a> {
    path: &'a Path,
    modules: RwLockWriteGuard<'a, BTreeMap<String, InstalledModule>>,
}

impl StoreWriter<'_> {
    pub fn get(&self, id: &str) -> Option<&InstalledModule> {
        self.modules.get(&id.to_ascii_lowercase())
    }

    pub fn upsert(&mut self, module: InstalledModule) -> Result<()> {
        let mut next = self.modules.clone();
        next.insert(module.id.to_ascii_lowercase(), module);
        self.replace(next)
    }

    pub fn remove(&mut self, id: &str) -> Result<Option<InstalledModule>> {
        let mut next = self.modules.clone();
        let removed = next.remove(&id.to_ascii_lowercase());
        if removed.is_some() {
            self.replace(next)?;
        }
        Ok(removed)
    }

    pub fn set_verification(&mut self, id: &str, outcome: VerifyOutcome) -> Result<bool> {
        let mut next = self.modules.clone();
        let Some(module) = next.get_mut(&id.to_ascii_lowercase()) else {
            return Ok(false);
        };
        module.verification = Some(outcome);
        self.replace(next)?;
        Ok(true)
    }

    fn replace(&mut self, next: BTreeMap<String, InstalledModule>) -> Result<()> {
        let file = StoreFile { modules: next };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ScriptoriumError::format(format!("serialize store: {e}")))?;
        write_atomic(self.path, json.as_bytes())?;
        *self.modules = file.modules;
        Ok(())
    }
}

/// Write `bytes` to `.{name}.tmp` beside `path`, then rename over it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| ScriptoriumError::io(parent, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.tmp"));
    std::fs::write(&tmp, bytes).map_err(|e| ScriptoriumError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(ScriptoriumError::io(path, e));
    }
    Ok(())
}
