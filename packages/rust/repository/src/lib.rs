//! Remote module repositories and the local module store.
//!
//! This crate provides:
//! - [`source`]: remote sources and package URL templates
//! - [`client`]: HTTP(S)/FTP transfers with bounded retry
//! - [`index`]: `mods.d.tar.gz` parsing and the per-source index cache
//! - [`store`]: the installed-module record (`installed.json`)
//! - [`manager`]: install, uninstall and verify over one store root

pub mod client;
pub mod ftp;
pub mod index;
pub mod manager;
pub mod package;
pub mod source;
pub mod store;

pub use client::{Backoff, TransferClient, with_retry};
pub use index::{IndexFailure, ModuleIndexEntry, SourceIndex, parse_index_archive};
pub use manager::{
    InstallReport, InstallRequest, InstallStatus, ModuleDescription, RepositoryManager,
    UninstallReport, VerifyReport,
};
pub use source::{Protocol, RemoteSource, default_sources, parse_install_conf, resolve_sources};
pub use store::{InstalledModule, LocalStore, StoreWriter, VerifyOutcome};
