//! Binary module decoder.
//!
//! Reads the on-disk formats named by a descriptor's `ModDrv` and yields
//! [`RawRecord`]s whose bytes view the decompressed block (or the mapped data
//! file) they came from:
//!
//! - [`VerseDecoder`]: zText, zCom, RawText, RawCom (and `*4` variants)
//! - [`DictionaryDecoder`]: zLD, RawLD, RawLD4
//! - [`GenBookDecoder`]: RawGenBook
//!
//! [`open_module`] picks the right one for an installed module.

mod codec;
pub mod dictionary;
pub mod genbook;
mod index;
mod layout;
pub mod verse;
pub mod writer;

use std::path::Path;

use tracing::instrument;

use scriptorium_shared::{FormatError, ModuleDescriptor, ModuleKind, RawRecord, Result};
use scriptorium_versification::Registry;

pub use codec::Codec;
pub use dictionary::{DictionaryDecoder, normalize_key, strongs_prefix};
pub use genbook::GenBookDecoder;
pub use verse::{RangeIter, VerseDecoder};

/// An opened module of any kind.
#[derive(Debug)]
pub enum ModuleReader {
    Verse(VerseDecoder),
    Dictionary(DictionaryDecoder),
    GenBook(GenBookDecoder),
}

impl ModuleReader {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Verse(d) => d.kind(),
            Self::Dictionary(_) => ModuleKind::Dictionary,
            Self::GenBook(_) => ModuleKind::GenBook,
        }
    }

    /// Every record of the module: verses in canonical order, dictionary
    /// entries in key order, genbook entries in index order.
    pub fn records(&mut self) -> Box<dyn Iterator<Item = Result<RawRecord>> + '_> {
        match self {
            Self::Verse(d) => Box::new(d.records()),
            Self::Dictionary(d) => Box::new(d.records()),
            Self::GenBook(d) => Box::new(d.records()),
        }
    }

    /// Blocks decompressed so far; always 0 for uncompressed modules.
    pub fn decompressions(&self) -> u64 {
        match self {
            Self::Verse(d) => d.decompressions(),
            Self::Dictionary(d) => d.decompressions(),
            Self::GenBook(_) => 0,
        }
    }
}

/// Open an installed module under the store `root`.
///
/// The descriptor's versification must exist in `registry`, whatever the
/// module kind; otherwise this fails with `UnknownVersification` before any
/// file is read. A driver with no decoder fails with `UnknownDriver`.
#[instrument(skip_all, fields(module = %descriptor.id, driver = descriptor.driver.as_str()))]
pub fn open_module(
    root: &Path,
    descriptor: &ModuleDescriptor,
    registry: &Registry,
) -> Result<ModuleReader> {
    let system = registry.get(&descriptor.versification)?;
    if !descriptor.driver.is_supported() {
        return Err(FormatError::UnknownDriver(descriptor.driver.as_str().to_string()).into());
    }
    let path = root.join(descriptor.relative_data_path());

    let reader = match descriptor.kind() {
        ModuleKind::Bible | ModuleKind::Commentary => {
            ModuleReader::Verse(VerseDecoder::open(&path, descriptor, system)?)
        }
        ModuleKind::Dictionary => ModuleReader::Dictionary(DictionaryDecoder::open(&path, descriptor)?),
        ModuleKind::GenBook => ModuleReader::GenBook(GenBookDecoder::open(&path, descriptor)?),
    };
    Ok(reader)
}
