//! Repository operations over one module store root.
//!
//! Layout under the root:
//!
//! ```text
//! mods.d/<id>.conf        installed descriptors
//! modules/...             module data, per each conf's DataPath
//! installed.json          LocalStore records
//! index/<source>.json     cached source indexes
//! .staging/               in-flight installs, removed when done
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use scriptorium_shared::{
    ConfigError, ModuleDescriptor, NetworkError, RepositoryConfig, Result, ScriptoriumError,
    VerificationError, parse_conf_file,
};

use crate::client::TransferClient;
use crate::index::{ModuleIndexEntry, SourceIndex, load_index, parse_index_archive, save_index};
use crate::package::{dir_size, extract_package, has_files, sha256_hex};
use crate::source::{RemoteSource, resolve_sources};
use crate::store::{InstalledModule, LocalStore, VerifyOutcome};

const STAGING_DIR: &str = ".staging";

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Done,
    /// Indexed, but no package exists under any candidate URL.
    Unavailable,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub status: InstallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl InstallReport {
    fn failed(module: &str, source: Option<&str>, error: &ScriptoriumError) -> Self {
        Self {
            module: module.to_string(),
            source: source.map(str::to_string),
            status: InstallStatus::Failed,
            detail: Some(error.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == InstallStatus::Failed
    }
}

/// One module to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub source: Option<String>,
    pub module: String,
    /// Recorded as the install time; supplied by the caller.
    pub installed_at: String,
}

impl InstallRequest {
    pub fn new(source: Option<&str>, module: impl Into<String>, installed_at: impl Into<String>) -> Self {
        Self {
            source: source.map(str::to_string),
            module: module.into(),
            installed_at: installed_at.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<VerifyOutcome>,
    /// Set when the check itself could not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Some(VerifyOutcome::Pass))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    pub module: String,
    pub removed: Vec<PathBuf>,
    /// Data directories left in place because another module uses them.
    pub kept: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescription {
    pub descriptor: ModuleDescriptor,
    /// Refreshed sources offering the module.
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed: Option<InstalledModule>,
}

// ---------------------------------------------------------------------------
// RepositoryManager
// ---------------------------------------------------------------------------

pub struct RepositoryManager {
    config: RepositoryConfig,
    sources: Vec<RemoteSource>,
    client: TransferClient,
    store: LocalStore,
}

impl RepositoryManager {
    pub fn new(config: RepositoryConfig) -> Result<Self> {
        let sources = resolve_sources(&config.sources)?;
        let client = TransferClient::new(&config)?;
        let store = LocalStore::open(&config.root)?;
        debug!(root = %config.root.display(), sources = sources.len(), "repository manager ready");
        Ok(Self {
            config,
            sources,
            client,
            store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn list_sources(&self) -> &[RemoteSource] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Result<&RemoteSource> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()).into())
    }

    /// Download and cache the module index of one source.
    #[instrument(skip_all, fields(source = %name))]
    pub async fn refresh_index(&self, name: &str) -> Result<SourceIndex> {
        let source = self.source(name)?;
        let bytes = self.client.fetch(&source.index_url()?).await?;
        let index = parse_index_archive(&source.name, &bytes)?;
        save_index(&self.config.root, &index)?;
        info!(
            modules = index.entries.len(),
            failures = index.failures.len(),
            "index refreshed"
        );
        Ok(index)
    }

    /// The last refreshed index of `name`.
    pub fn list_modules(&self, name: &str) -> Result<SourceIndex> {
        let source = self.source(name)?;
        load_index(&self.config.root, &source.name)?
            .ok_or_else(|| ConfigError::SourceNotRefreshed(source.name.clone()).into())
    }

    /// Find `name` in one source, or across every refreshed source.
    pub fn resolve_module(&self, source: Option<&str>, name: &str) -> Result<ModuleIndexEntry> {
        let unknown = || ScriptoriumError::from(ConfigError::UnknownModule(name.to_string()));
        if let Some(source) = source {
            return self.list_modules(source)?.find(name).cloned().ok_or_else(unknown);
        }

        let mut matches = Vec::new();
        for source in &self.sources {
            if let Some(index) = load_index(&self.config.root, &source.name)? {
                if let Some(entry) = index.find(name) {
                    matches.push(entry.clone());
                }
            }
        }
        match matches.len() {
            0 => Err(unknown()),
            1 => Ok(matches.remove(0)),
            _ => Err(ConfigError::AmbiguousModule {
                module: name.to_string(),
                sources: matches.into_iter().map(|e| e.source).collect(),
            }
            .into()),
        }
    }

    // -----------------------------------------------------------------------
    // Install
    // -----------------------------------------------------------------------

    /// Install one module. Failures are reported, never returned.
    #[instrument(skip_all, fields(module = %request.module))]
    pub async fn install(&self, request: &InstallRequest) -> InstallReport {
        let (source, name) = (request.source.as_deref(), request.module.as_str());
        let entry = match self.resolve_module(source, name) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "cannot resolve module");
                return InstallReport::failed(name, source, &e);
            }
        };
        let id = entry.descriptor.id.clone();
        match self.install_entry(&entry, &request.installed_at).await {
            Ok(status) => {
                info!(source = %entry.source, ?status, "install finished");
                InstallReport {
                    module: id,
                    source: Some(entry.source),
                    status,
                    detail: None,
                }
            }
            Err(e) => {
                warn!(source = %entry.source, error = %e, "install failed");
                InstallReport::failed(&id, Some(entry.source.as_str()), &e)
            }
        }
    }

    /// Install several modules, at most `concurrency` at a time.
    ///
    /// Reports come back in request order. When the batch deadline passes,
    /// unfinished modules fail with `DeadlineExceeded` and their staging
    /// directories are discarded.
    pub async fn install_many(self: &Arc<Self>, requests: Vec<InstallRequest>) -> Vec<InstallReport> {
        let (reports, expired) = self
            .run_batch(
                requests,
                |manager, request: InstallRequest| async move { manager.install(&request).await },
                |request, e| InstallReport::failed(&request.module, request.source.as_deref(), &e),
            )
            .await;
        if expired {
            self.discard_staging();
        }
        reports
    }

    /// Install every module a refreshed source offers.
    pub async fn install_all(
        self: &Arc<Self>,
        source: &str,
        installed_at: &str,
    ) -> Result<Vec<InstallReport>> {
        let index = self.list_modules(source)?;
        info!(source = %index.source, modules = index.entries.len(), "installing all");
        let requests = index
            .entries
            .iter()
            .map(|entry| InstallRequest::new(Some(&index.source), &entry.descriptor.id, installed_at))
            .collect();
        Ok(self.install_many(requests).await)
    }

    async fn install_entry(&self, entry: &ModuleIndexEntry, installed_at: &str) -> Result<InstallStatus> {
        let source = self.source(&entry.source)?;
        let Some(package) = self.download_package(source, &entry.descriptor.id).await? else {
            info!(module = %entry.descriptor.id, "no package on server");
            return Ok(InstallStatus::Unavailable);
        };

        let staging = self.config.root.join(STAGING_DIR).join(format!(
            "{}-{}",
            entry.descriptor.key(),
            uuid::Uuid::now_v7()
        ));
        let result = self.stage_and_commit(entry, &package, &staging, installed_at).await;
        let _ = std::fs::remove_dir_all(&staging);
        let _ = std::fs::remove_dir(self.config.root.join(STAGING_DIR));
        result?;
        Ok(InstallStatus::Done)
    }

    /// The first package found among the candidate URLs.
    async fn download_package(&self, source: &RemoteSource, id: &str) -> Result<Option<Vec<u8>>> {
        for url in source.package_urls(id)? {
            match self.client.fetch(&url).await {
                Ok(bytes) => {
                    debug!(%url, bytes = bytes.len(), "package found");
                    return Ok(Some(bytes));
                }
                Err(e) if e.is_not_found() => debug!(%url, "no package at candidate"),
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn stage_and_commit(
        &self,
        entry: &ModuleIndexEntry,
        package: &[u8],
        staging: &Path,
        installed_at: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(staging).map_err(|e| ScriptoriumError::io(staging, e))?;
        extract_package(package, staging)?;

        let key = entry.descriptor.key();
        let staged_mods = staging.join("mods.d");
        let staged_conf = match find_conf(&staged_mods, &key) {
            Some(path) => path,
            None => {
                std::fs::create_dir_all(&staged_mods)
                    .map_err(|e| ScriptoriumError::io(&staged_mods, e))?;
                let path = staged_mods.join(format!("{key}.conf"));
                std::fs::write(&path, entry.conf_text.as_bytes())
                    .map_err(|e| ScriptoriumError::io(&path, e))?;
                path
            }
        };

        let descriptor = parse_conf_file(&staged_conf)?;
        let staged_data = descriptor.data_dir(staging);
        if !has_files(&staged_data) {
            return Err(VerificationError::EmptyDataDir {
                path: descriptor.data_path.clone(),
            }
            .into());
        }

        let root = &self.config.root;
        let record = InstalledModule {
            id: descriptor.id.clone(),
            source: Some(entry.source.clone()),
            conf_path: root.join("mods.d").join(format!("{key}.conf")),
            data_dir: descriptor.data_dir(root),
            installed_at: installed_at.to_string(),
            package_sha256: Some(sha256_hex(package)),
            verification: None,
            descriptor,
        };
        let placement = Placement {
            staged_data: &staged_data,
            data_dir: &record.data_dir,
            staged_conf: &staged_conf,
            conf_path: &record.conf_path,
            backup: staging.join("previous"),
        };

        // No await between moving files into the store and recording them: a
        // cancelled install either did both or neither.
        let mut store = self.store.writer().await;
        placement.commit()?;
        if let Err(e) = store.upsert(record.clone()) {
            warn!(error = %e, "cannot record install, rolling back");
            placement.undo();
            return Err(e);
        }
        Ok(())
    }

    fn discard_staging(&self) {
        let staging = self.config.root.join(STAGING_DIR);
        if staging.exists() {
            debug!(path = %staging.display(), "discarding staging");
            let _ = std::fs::remove_dir_all(&staging);
        }
    }

    // -----------------------------------------------------------------------
    // Uninstall
    // -----------------------------------------------------------------------

    /// Remove a module's conf and any data directory no other module uses.
    #[instrument(skip_all, fields(module = %name))]
    pub async fn uninstall(&self, name: &str) -> Result<UninstallReport> {
        let key = name.to_ascii_lowercase();
        let (id, conf_path, data_dir) = match self.store.get(name).await {
            Some(module) => (module.id, module.conf_path, module.data_dir),
            None => {
                let conf_path = self.config.root.join("mods.d").join(format!("{key}.conf"));
                if !conf_path.is_file() {
                    return Err(ConfigError::UnknownModule(name.to_string()).into());
                }
                let descriptor = parse_conf_file(&conf_path)?;
                let data_dir = descriptor.data_dir(&self.config.root);
                (descriptor.id, conf_path, data_dir)
            }
        };

        let others = self.other_data_dirs(&key, &conf_path).await;
        let shared = others
            .iter()
            .any(|other| other.starts_with(&data_dir) || data_dir.starts_with(other));

        let mut report = UninstallReport {
            module: id.clone(),
            removed: Vec::new(),
            kept: Vec::new(),
        };
        if shared {
            info!(data_dir = %data_dir.display(), "data directory shared, keeping");
            report.kept.push(data_dir);
        } else if data_dir.exists() {
            std::fs::remove_dir_all(&data_dir).map_err(|e| ScriptoriumError::io(&data_dir, e))?;
            report.removed.push(data_dir);
        }
        if conf_path.exists() {
            std::fs::remove_file(&conf_path).map_err(|e| ScriptoriumError::io(&conf_path, e))?;
            report.removed.push(conf_path);
        }
        self.store.remove(&id).await?;
        info!(removed = report.removed.len(), kept = report.kept.len(), "uninstalled");
        Ok(report)
    }

    /// Data directories of every other module, recorded or on disk.
    async fn other_data_dirs(&self, key: &str, conf_path: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|m| m.id.to_ascii_lowercase() != key)
            .map(|m| m.data_dir)
            .collect();

        let mods_d = self.config.root.join("mods.d");
        let Ok(read) = std::fs::read_dir(&mods_d) else {
            return dirs;
        };
        for entry in read.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path == conf_path || path.extension().is_none_or(|ext| ext != "conf") {
                continue;
            }
            match parse_conf_file(&path) {
                Ok(desc) if desc.key() != key => dirs.push(desc.data_dir(&self.config.root)),
                Ok(_) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "ignoring unreadable conf"),
            }
        }
        dirs
    }

    // -----------------------------------------------------------------------
    // Verify
    // -----------------------------------------------------------------------

    /// Check one installed module and record the outcome.
    #[instrument(skip_all, fields(module = %name))]
    pub async fn verify(&self, name: &str) -> Result<VerifyOutcome> {
        let module = self
            .store
            .get(name)
            .await
            .ok_or_else(|| ScriptoriumError::from(ConfigError::UnknownModule(name.to_string())))?;
        let outcome = match check_module(&module) {
            Ok(()) => VerifyOutcome::Pass,
            Err(error) => VerifyOutcome::Fail { error },
        };
        self.store.set_verification(&module.id, outcome.clone()).await?;
        info!(passed = outcome.is_pass(), "verified");
        Ok(outcome)
    }

    /// Verify every installed module.
    pub async fn verify_all(self: &Arc<Self>) -> Vec<VerifyReport> {
        let ids: Vec<String> = self.store.list().await.into_iter().map(|m| m.id).collect();
        let (reports, _) = self
            .run_batch(
                ids,
                |manager, id: String| async move {
                    match manager.verify(&id).await {
                        Ok(outcome) => VerifyReport {
                            module: id,
                            outcome: Some(outcome),
                            error: None,
                        },
                        Err(e) => VerifyReport {
                            module: id,
                            outcome: None,
                            error: Some(e.to_string()),
                        },
                    }
                },
                |id, e| VerifyReport {
                    module: id.clone(),
                    outcome: None,
                    error: Some(e.to_string()),
                },
            )
            .await;
        reports
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Descriptor of an installed or indexed module.
    pub async fn describe(&self, name: &str) -> Result<ModuleDescription> {
        let installed = self.store.get(name).await;
        let mut sources = Vec::new();
        let mut indexed = None;
        for source in &self.sources {
            if let Some(index) = load_index(&self.config.root, &source.name)? {
                if let Some(entry) = index.find(name) {
                    sources.push(source.name.clone());
                    indexed.get_or_insert_with(|| entry.descriptor.clone());
                }
            }
        }
        let descriptor = match (&installed, indexed) {
            (Some(module), _) => module.descriptor.clone(),
            (None, Some(descriptor)) => descriptor,
            (None, None) => return Err(ConfigError::UnknownModule(name.to_string()).into()),
        };
        Ok(ModuleDescription {
            descriptor,
            sources,
            installed,
        })
    }

    pub async fn installed(&self) -> Vec<InstalledModule> {
        self.store.list().await
    }

    // -----------------------------------------------------------------------
    // Batch runner
    // -----------------------------------------------------------------------

    /// One task per item, bounded by the semaphore and the batch deadline.
    /// Returns reports in item order and whether the deadline cut any short.
    async fn run_batch<T, R, F, Fut, E>(
        self: &Arc<Self>,
        items: Vec<T>,
        op: F,
        on_error: E,
    ) -> (Vec<R>, bool)
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(Arc<Self>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        E: Fn(&T, ScriptoriumError) -> R,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let deadline = self.config.batch_deadline.map(|d| Instant::now() + d);
        let op = Arc::new(op);

        let mut handles = Vec::with_capacity(items.len());
        for item in items.iter().cloned() {
            let manager = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let op = Arc::clone(&op);
            handles.push(tokio::spawn(async move {
                let work = async {
                    let _permit = semaphore.acquire_owned().await.ok();
                    op(manager, item).await
                };
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, work).await.ok(),
                    None => Some(work.await),
                }
            }));
        }

        let mut expired = false;
        let mut reports = Vec::with_capacity(handles.len());
        for (item, handle) in items.iter().zip(handles) {
            let report = match handle.await {
                Ok(Some(report)) => report,
                Ok(None) => {
                    expired = true;
                    on_error(item, NetworkError::DeadlineExceeded.into())
                }
                Err(e) => on_error(item, ScriptoriumError::validation(format!("task failed: {e}"))),
            };
            reports.push(report);
        }
        if expired {
            warn!("batch deadline exceeded");
        }
        (reports, expired)
    }
}

/// The staged conf for `key`, matched case-insensitively on the file stem.
fn find_conf(mods_d: &Path, key: &str) -> Option<PathBuf> {
    let exact = mods_d.join(format!("{key}.conf"));
    if exact.is_file() {
        return Some(exact);
    }
    std::fs::read_dir(mods_d)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.extension().is_some_and(|ext| ext == "conf")
                && p.file_stem()
                    .is_some_and(|stem| stem.to_string_lossy().eq_ignore_ascii_case(key))
        })
}

/// Where an install's files move from and to. Whatever the store held
/// before is parked under `backup` until the staging directory goes.
struct Placement<'a> {
    staged_data: &'a Path,
    data_dir: &'a Path,
    staged_conf: &'a Path,
    conf_path: &'a Path,
    backup: PathBuf,
}

impl Placement<'_> {
    /// Move staged data and conf into place, restoring the previous state if
    /// either move fails.
    fn commit(&self) -> Result<()> {
        for dir in [self.data_dir.parent(), self.conf_path.parent(), Some(self.backup.as_path())]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir).map_err(|e| ScriptoriumError::io(dir, e))?;
        }

        let (old_data, old_conf) = (self.backup.join("data"), self.backup.join("conf"));
        if self.data_dir.exists() {
            std::fs::rename(self.data_dir, &old_data).map_err(|e| ScriptoriumError::io(self.data_dir, e))?;
        }
        if self.conf_path.exists() {
            if let Err(e) = std::fs::rename(self.conf_path, &old_conf) {
                self.restore();
                return Err(ScriptoriumError::io(self.conf_path, e));
            }
        }

        if let Err(e) = std::fs::rename(self.staged_data, self.data_dir) {
            self.restore();
            return Err(ScriptoriumError::io(self.data_dir, e));
        }
        if let Err(e) = std::fs::rename(self.staged_conf, self.conf_path) {
            let _ = std::fs::rename(self.data_dir, self.staged_data);
            self.restore();
            return Err(ScriptoriumError::io(self.conf_path, e));
        }
        Ok(())
    }

    /// Reverse a successful [`commit`](Self::commit).
    fn undo(&self) {
        let _ = std::fs::rename(self.conf_path, self.staged_conf);
        let _ = std::fs::rename(self.data_dir, self.staged_data);
        self.restore();
    }

    fn restore(&self) {
        let (old_data, old_conf) = (self.backup.join("data"), self.backup.join("conf"));
        if old_data.exists() {
            let _ = std::fs::rename(&old_data, self.data_dir);
        }
        if old_conf.exists() {
            let _ = std::fs::rename(&old_conf, self.conf_path);
        }
    }
}

fn check_module(module: &InstalledModule) -> std::result::Result<(), VerificationError> {
    if !module.conf_path.is_file() {
        return Err(VerificationError::MissingConf {
            path: module.conf_path.display().to_string(),
        });
    }
    if !has_files(&module.data_dir) {
        return Err(VerificationError::EmptyDataDir {
            path: module.data_dir.display().to_string(),
        });
    }
    if let Some(expected) = module.descriptor.install_size.filter(|size| *size > 0) {
        let actual = dir_size(&module.data_dir);
        if actual != expected {
            return Err(VerificationError::SizeMismatch { expected, actual });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{conf, index_archive};
    use crate::package::tests::zip_package;
    use scriptorium_shared::SourceEntry;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DATA_SIZE: u64 = 12 + 20 + 30;
    const INSTALLED_AT: &str = "2026-03-01T12:00:00Z";

    fn request(source: Option<&str>, module: &str) -> InstallRequest {
        InstallRequest::new(source, module, INSTALLED_AT)
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("scriptorium-repo-{}", uuid::Uuid::now_v7()))
    }

    fn config(root: &Path, server: &MockServer, dirs: &[(&str, &str)]) -> RepositoryConfig {
        let mut config = RepositoryConfig::with_root(root);
        config.initial_backoff = Duration::from_millis(5);
        config.max_backoff = Duration::from_millis(10);
        config.max_attempts = 2;
        config.sources = dirs
            .iter()
            .map(|(name, dir)| SourceEntry {
                name: name.to_string(),
                protocol: "http".into(),
                host: server.address().to_string(),
                directory: dir.to_string(),
                package_patterns: Vec::new(),
            })
            .collect();
        config
    }

    fn package(id: &str) -> Vec<u8> {
        let lower = id.to_ascii_lowercase();
        let conf_text = conf(id, Some(DATA_SIZE));
        let data = format!("modules/texts/ztext/{lower}");
        zip_package(&[
            (&format!("mods.d/{lower}.conf"), conf_text.as_bytes()),
            (&format!("{data}/ot.bzs"), &[1u8; 12]),
            (&format!("{data}/ot.bzv"), &[2u8; 20]),
            (&format!("{data}/ot.bzz"), &[3u8; 30]),
        ])
    }

    async fn serve_index(server: &MockServer, dir: &str, ids: &[&str]) {
        let confs: Vec<(String, String)> = ids
            .iter()
            .map(|id| (format!("{}.conf", id.to_ascii_lowercase()), conf(id, Some(DATA_SIZE))))
            .collect();
        let files: Vec<(&str, &str)> = confs.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
        Mock::given(method("GET"))
            .and(path(format!("{dir}/mods.d.tar.gz")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(index_archive(&files)))
            .mount(server)
            .await;
    }

    async fn serve_package(server: &MockServer, dir: &str, id: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("{dir}/zip/{id}.zip")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn install_then_verify() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();

        let index = manager.refresh_index("local").await.unwrap();
        assert_eq!(index.entries.len(), 1);

        let report = manager.install(&request(None, "tiny")).await;
        assert_eq!(report.status, InstallStatus::Done, "{report:?}");
        assert_eq!(report.source.as_deref(), Some("Local"));
        assert!(root.join("mods.d/tiny.conf").is_file());
        assert!(root.join("modules/texts/ztext/tiny/ot.bzz").is_file());
        assert!(!root.join(STAGING_DIR).exists());

        let installed = manager.installed().await;
        assert_eq!(installed.len(), 1);
        assert!(installed[0].package_sha256.is_some());
        assert_eq!(installed[0].installed_at, INSTALLED_AT);
        assert_eq!(manager.verify("Tiny").await.unwrap(), VerifyOutcome::Pass);

        let described = manager.describe("TINY").await.unwrap();
        assert_eq!(described.sources, vec!["Local"]);
        assert!(described.installed.is_some());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn verify_detects_size_mismatch_and_missing_conf() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();
        manager.refresh_index("Local").await.unwrap();
        assert_eq!(manager.install(&request(Some("Local"), "Tiny")).await.status, InstallStatus::Done);

        let data = root.join("modules/texts/ztext/tiny/ot.bzz");
        let mut bytes = std::fs::read(&data).unwrap();
        bytes.extend_from_slice(b"xyz");
        std::fs::write(&data, bytes).unwrap();

        let expected = VerifyOutcome::Fail {
            error: VerificationError::SizeMismatch {
                expected: DATA_SIZE,
                actual: DATA_SIZE + 3,
            },
        };
        assert_eq!(manager.verify("Tiny").await.unwrap(), expected);
        let stored = manager.installed().await;
        assert_eq!(stored[0].verification, Some(expected));

        std::fs::remove_file(root.join("mods.d/tiny.conf")).unwrap();
        assert!(matches!(
            manager.verify("Tiny").await.unwrap(),
            VerifyOutcome::Fail {
                error: VerificationError::MissingConf { .. }
            }
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_package_is_unavailable_and_leaves_nothing() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Gone"]).await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();
        manager.refresh_index("Local").await.unwrap();

        let report = manager.install(&request(None, "Gone")).await;
        assert_eq!(report.status, InstallStatus::Unavailable);
        assert!(!report.is_failure());
        assert!(!root.join("mods.d").exists());
        assert!(!root.join("modules").exists());
        assert!(!root.join(STAGING_DIR).exists());
        assert!(manager.installed().await.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn listing_requires_refresh() {
        let server = MockServer::start().await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();
        assert!(matches!(
            manager.list_modules("Local").unwrap_err(),
            ScriptoriumError::Config(ConfigError::SourceNotRefreshed(_))
        ));
        assert!(matches!(
            manager.list_modules("Elsewhere").unwrap_err(),
            ScriptoriumError::Config(ConfigError::UnknownSource(_))
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn colliding_names_need_a_source() {
        let server = MockServer::start().await;
        serve_index(&server, "/a", &["Tiny"]).await;
        serve_index(&server, "/b", &["Tiny"]).await;
        serve_package(&server, "/b", "Tiny", package("Tiny")).await;
        let root = temp_root();
        let manager =
            RepositoryManager::new(config(&root, &server, &[("Alpha", "/a"), ("Beta", "/b")])).unwrap();
        manager.refresh_index("Alpha").await.unwrap();
        manager.refresh_index("Beta").await.unwrap();

        match manager.resolve_module(None, "Tiny").unwrap_err() {
            ScriptoriumError::Config(ConfigError::AmbiguousModule { sources, .. }) => {
                assert_eq!(sources, vec!["Alpha", "Beta"]);
            }
            other => panic!("expected ambiguity, got {other}"),
        }
        let report = manager.install(&request(None, "Tiny")).await;
        assert!(report.is_failure());
        assert!(report.detail.unwrap().contains("several sources"));
        assert!(!root.join("mods.d").exists());

        let report = manager.install(&request(Some("beta"), "Tiny")).await;
        assert_eq!(report.status, InstallStatus::Done);
        assert_eq!(report.source.as_deref(), Some("Beta"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn escaping_package_is_rejected() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Evil"]).await;
        let conf_text = conf("Evil", None);
        let body = zip_package(&[
            ("mods.d/evil.conf", conf_text.as_bytes()),
            ("modules/texts/ztext/evil/ot.bzz", b"data"),
            ("../../outside.conf", b"escaped"),
        ]);
        serve_package(&server, "/repo", "Evil", body).await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();
        manager.refresh_index("Local").await.unwrap();

        let report = manager.install(&request(None, "Evil")).await;
        assert!(report.is_failure());
        assert!(!root.join("mods.d").exists());
        assert!(!root.join("modules").exists());
        assert!(!root.join(STAGING_DIR).exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn uninstall_keeps_shared_data() {
        let server = MockServer::start().await;
        let root = temp_root();
        let shared = root.join("modules/texts/ztext/shared");
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(shared.join("ot.bzz"), b"data").unwrap();
        std::fs::create_dir_all(root.join("mods.d")).unwrap();
        for id in ["A", "B"] {
            let text = format!("[{id}]\nDataPath=./modules/texts/ztext/shared/\nModDrv=zText\n");
            std::fs::write(root.join(format!("mods.d/{}.conf", id.to_lowercase())), text).unwrap();
        }
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();

        let report = manager.uninstall("A").await.unwrap();
        assert_eq!(report.kept, vec![shared.clone()]);
        assert!(shared.join("ot.bzz").is_file());
        assert!(!root.join("mods.d/a.conf").exists());

        let report = manager.uninstall("b").await.unwrap();
        assert!(report.kept.is_empty());
        assert!(report.removed.contains(&shared));
        assert!(!shared.exists());

        assert!(matches!(
            manager.uninstall("C").await.unwrap_err(),
            ScriptoriumError::Config(ConfigError::UnknownModule(_))
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn batch_reports_keep_order_and_honor_deadline() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny", "Slow"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        Mock::given(method("GET"))
            .and(path("/repo/zip/Slow.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(package("Slow"))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;
        let root = temp_root();
        let mut config = config(&root, &server, &[("Local", "/repo")]);
        config.batch_deadline = Some(Duration::from_secs(2));
        let manager = Arc::new(RepositoryManager::new(config).unwrap());
        manager.refresh_index("Local").await.unwrap();

        let requests = ["Slow", "Tiny", "Nope"]
            .into_iter()
            .map(|m| request(None, m))
            .collect();
        let reports = manager.install_many(requests).await;
        let modules: Vec<&str> = reports.iter().map(|r| r.module.as_str()).collect();
        assert_eq!(modules, vec!["Slow", "Tiny", "Nope"]);
        assert!(reports[0].detail.as_deref().unwrap().contains("deadline exceeded"));
        assert_eq!(reports[1].status, InstallStatus::Done);
        assert!(reports[2].is_failure());
        assert!(!root.join(STAGING_DIR).exists());

        let verified = manager.verify_all().await;
        assert_eq!(verified.len(), 1);
        assert!(verified[0].passed());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn deadline_while_waiting_for_the_store_installs_nothing() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        let root = temp_root();
        let mut config = config(&root, &server, &[("Local", "/repo")]);
        config.batch_deadline = Some(Duration::from_millis(800));
        let manager = Arc::new(RepositoryManager::new(config).unwrap());
        manager.refresh_index("Local").await.unwrap();

        let holder = Arc::clone(&manager);
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let held = tokio::spawn(async move {
            let _writer = holder.store.writer().await;
            let _ = locked_tx.send(());
            tokio::time::sleep(Duration::from_millis(1500)).await;
        });
        locked_rx.await.unwrap();

        let reports = manager.install_many(vec![request(None, "Tiny")]).await;
        assert!(reports[0].is_failure());
        assert!(reports[0].detail.as_deref().unwrap().contains("deadline exceeded"));

        held.await.unwrap();
        assert!(!root.join("mods.d/tiny.conf").exists());
        assert!(!root.join("modules/texts/ztext/tiny").exists());
        assert!(!root.join(STAGING_DIR).exists());
        assert!(manager.installed().await.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unrecordable_install_is_rolled_back() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();
        manager.refresh_index("Local").await.unwrap();
        std::fs::create_dir_all(root.join("installed.json/blocker")).unwrap();

        let report = manager.install(&request(None, "Tiny")).await;
        assert!(report.is_failure());
        assert!(!root.join("mods.d/tiny.conf").exists());
        assert!(!root.join("modules/texts/ztext/tiny").exists());
        assert!(!root.join(STAGING_DIR).exists());
        assert!(manager.installed().await.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn reinstall_replaces_files_and_clears_verification() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        let root = temp_root();
        let manager = RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap();
        manager.refresh_index("Local").await.unwrap();

        assert_eq!(manager.install(&request(None, "Tiny")).await.status, InstallStatus::Done);
        std::fs::write(root.join("modules/texts/ztext/tiny/stale.txt"), b"old").unwrap();
        assert!(!manager.verify("Tiny").await.unwrap().is_pass());

        let later = InstallRequest::new(None, "Tiny", "2026-04-01T00:00:00Z");
        assert_eq!(manager.install(&later).await.status, InstallStatus::Done);
        assert!(!root.join("modules/texts/ztext/tiny/stale.txt").exists());
        let installed = manager.installed().await;
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].installed_at, "2026-04-01T00:00:00Z");
        assert_eq!(installed[0].verification, None);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn install_all_takes_every_indexed_module() {
        let server = MockServer::start().await;
        serve_index(&server, "/repo", &["Tiny", "Small", "Gone"]).await;
        serve_package(&server, "/repo", "Tiny", package("Tiny")).await;
        serve_package(&server, "/repo", "Small", package("Small")).await;
        let root = temp_root();
        let manager = Arc::new(RepositoryManager::new(config(&root, &server, &[("Local", "/repo")])).unwrap());

        assert!(matches!(
            manager.install_all("Local", INSTALLED_AT).await.unwrap_err(),
            ScriptoriumError::Config(ConfigError::SourceNotRefreshed(_))
        ));
        manager.refresh_index("Local").await.unwrap();

        let reports = manager.install_all("local", INSTALLED_AT).await.unwrap();
        let outcomes: Vec<(&str, InstallStatus)> =
            reports.iter().map(|r| (r.module.as_str(), r.status)).collect();
        assert_eq!(
            outcomes,
            vec![
                ("Gone", InstallStatus::Unavailable),
                ("Small", InstallStatus::Done),
                ("Tiny", InstallStatus::Done),
            ]
        );
        assert!(reports.iter().all(|r| r.source.as_deref() == Some("Local")));
        assert_eq!(manager.installed().await.len(), 2);
        let _ = std::fs::remove_dir_all(&root);
    }
}
