//! Shared types, error model, and configuration for Scriptorium.
//!
//! This crate is the foundation depended on by all other Scriptorium crates.
//! It provides:
//! - [`ScriptoriumError`] — the unified error type and its four families
//! - Domain types ([`VerseAddress`], [`RawRecord`], [`ConvertedRecord`], …)
//! - Module descriptor parsing ([`ModuleDescriptor`], [`parse_conf`])
//! - Configuration ([`AppConfig`], [`RepositoryConfig`], config loading)

pub mod conf;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use conf::{Driver, ModuleDescriptor, parse_conf, parse_conf_file, to_spdx_license};
pub use config::{
    AppConfig, OutputConfig, RepositoryConfig, RepositorySettings, SourceEntry, StoreConfig,
    VersificationConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_sources,
};
pub use error::{
    ConfigError, FormatError, NetworkError, Result, ScriptoriumError, VerificationError,
};
pub use types::{
    Annotation, AnnotationKind, ConversionWarning, ConvertedRecord, Dialect, ModuleKind,
    RawRecord, RecordKey, Testament, VerseAddress, WarningKind,
};
