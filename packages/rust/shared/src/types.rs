//! Core domain types shared by the decoders, converters, and assembler.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};

// ---------------------------------------------------------------------------
// Testament / ModuleKind / Dialect
// ---------------------------------------------------------------------------

/// Testament or section tag of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Testament {
    #[serde(rename = "OT")]
    Old,
    #[serde(rename = "NT")]
    New,
    /// Apocrypha / deuterocanon. Stored alongside the Old Testament in module files.
    #[serde(rename = "AP")]
    Apocrypha,
}

impl Testament {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Old => "OT",
            Self::New => "NT",
            Self::Apocrypha => "AP",
        }
    }
}

/// Broad category of a module, derived from its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Bible,
    Commentary,
    Dictionary,
    GenBook,
}

impl ModuleKind {
    /// Directory name under `modules/` in the on-disk store.
    pub fn store_dir(&self) -> &'static str {
        match self {
            Self::Bible => "texts",
            Self::Commentary => "comments",
            Self::Dictionary => "lexdict",
            Self::GenBook => "genbook",
        }
    }

    /// Whether records of this kind are keyed by verse address.
    pub fn is_versified(&self) -> bool {
        matches!(self, Self::Bible | Self::Commentary)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bible => "Bible",
            Self::Commentary => "Commentary",
            Self::Dictionary => "Dictionary",
            Self::GenBook => "GenBook",
        };
        f.write_str(s)
    }
}

/// Markup dialect of a record's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Osis,
    Gbf,
    Thml,
    Tei,
    Rtf,
    Plain,
}

impl Dialect {
    /// Map a conf `SourceType` value. Missing or unknown types are plain text.
    pub fn from_source_type(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("osis") => Self::Osis,
            Some("gbf") => Self::Gbf,
            Some("thml") => Self::Thml,
            Some("tei") => Self::Tei,
            Some("rtf") => Self::Rtf,
            _ => Self::Plain,
        }
    }
}

// ---------------------------------------------------------------------------
// VerseAddress / RecordKey
// ---------------------------------------------------------------------------

/// A (book, chapter, verse) triple. Chapter and verse are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VerseAddress {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
}

impl VerseAddress {
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Self {
        Self {
            book: book.into(),
            chapter,
            verse,
        }
    }
}

impl fmt::Display for VerseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)
    }
}

/// Identity of a record within its module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKey {
    /// Verse-addressed Bible or commentary entry.
    Verse(VerseAddress),
    /// Normalized lexical key of a dictionary entry.
    Lexical { key: String },
    /// Position in a general book, with its tree path when known.
    Entry { index: usize, path: Option<String> },
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verse(addr) => addr.fmt(f),
            Self::Lexical { key } => f.write_str(key),
            Self::Entry { index, path: Some(p) } => write!(f, "#{index} {p}"),
            Self::Entry { index, path: None } => write!(f, "#{index}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RawRecord
// ---------------------------------------------------------------------------

/// Undecoded record bytes, viewed as `offset..offset+len` of a shared arena.
///
/// The arena is usually one decompressed block; every record sliced from that
/// block shares the same allocation.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: RecordKey,
    /// Last address covered, for entries that span a verse range.
    pub end: Option<VerseAddress>,
    pub dialect: Dialect,
    arena: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl RawRecord {
    /// View `offset..offset+len` of `arena`. Fails with `CorruptIndex` when the
    /// range does not fit.
    pub fn slice(
        key: RecordKey,
        dialect: Dialect,
        arena: Arc<[u8]>,
        offset: usize,
        len: usize,
    ) -> Result<Self> {
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= arena.len());
        if !in_bounds {
            return Err(FormatError::CorruptIndex(format!(
                "{key}: entry {offset}+{len} exceeds arena of {} bytes",
                arena.len()
            ))
            .into());
        }
        Ok(Self {
            key,
            end: None,
            dialect,
            arena,
            offset,
            len,
        })
    }

    /// Wrap owned bytes as a record spanning the whole buffer.
    pub fn owned(key: RecordKey, dialect: Dialect, bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            key,
            end: None,
            dialect,
            arena: Arc::from(bytes),
            offset: 0,
            len,
        }
    }

    /// A legitimately empty record (e.g. a commentary verse with no comment).
    pub fn empty(key: RecordKey, dialect: Dialect) -> Self {
        Self::owned(key, dialect, Vec::new())
    }

    pub fn with_end(mut self, end: Option<VerseAddress>) -> Self {
        self.end = end;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.arena[self.offset..self.offset + self.len]
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when both records view the same arena allocation.
    pub fn shares_arena(&self, other: &RawRecord) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena)
    }

    /// Decode as UTF-8, failing with `InvalidEncoding`.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(self.bytes())
            .map_err(|e| FormatError::InvalidEncoding(format!("{}: {e}", self.key)).into())
    }
}

impl PartialEq for RawRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.end == other.end
            && self.dialect == other.dialect
            && self.bytes() == other.bytes()
    }
}

impl Eq for RawRecord {}

// ---------------------------------------------------------------------------
// ConvertedRecord
// ---------------------------------------------------------------------------

/// Kind of a structured annotation over normalized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Strongs,
    Morphology,
    RedLetter,
    DivineName,
    CrossReference,
    Note,
    Title,
    Added,
    Foreign,
    Emphasis,
    Headword,
    PartOfSpeech,
    Etymology,
}

/// A structured annotation over `start..end` bytes of the normalized text.
///
/// Both offsets sit on UTF-8 character boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Annotation {
    pub start: usize,
    pub end: usize,
    pub kind: AnnotationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Non-fatal conversion diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Overlapping spans; the innermost one was kept.
    NestedMarkup,
    /// Markup could not be parsed; the record was tag-stripped instead.
    Fallback,
    /// A lexical tag had no preceding word to attach to.
    DanglingAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionWarning {
    pub kind: WarningKind,
    pub message: String,
}

/// A record after markup conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedRecord {
    pub key: RecordKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<VerseAddress>,
    pub text: String,
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ConversionWarning>,
}

impl ConvertedRecord {
    /// Annotations of one kind, in text order.
    pub fn annotations_of(&self, kind: AnnotationKind) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.kind == kind)
    }

    /// The text covered by an annotation.
    pub fn span_text(&self, annotation: &Annotation) -> &str {
        self.text.get(annotation.start..annotation.end).unwrap_or("")
    }
}
