//! Content assembler.
//!
//! Groups converted records into one JSON document at book, chapter or verse
//! granularity. Versified content always follows the canonical book order of
//! the module's versification, whatever order the records arrived in, and the
//! same input always serializes to the same bytes:
//!
//! ```text
//! {
//!   "meta": { "module": "KJV", "granularity": "chapter", ... },
//!   "books": [ { "id": "Gen", "chapters": [ { "number": 1, "verses": [...] } ] } ],
//!   "excluded_books": [ { "id": "Tob", "reason": "no content in source module" } ],
//!   "failures": [ { "key": "Gen 51:1", "reason": "..." } ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use scriptorium_shared::{
    Annotation, ConversionWarning, ConvertedRecord, ModuleKind, RecordKey, Result,
    ScriptoriumError, Testament, VerseAddress,
};
use scriptorium_versification::VersificationSystem;

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// Unit the verses of a versified module are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// `books[].verses[]`, each verse carrying its chapter.
    Book,
    /// `books[].chapters[].verses[]`.
    #[default]
    Chapter,
    /// A flat `verses[]` list.
    Verse,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Chapter => "chapter",
            Self::Verse => "verse",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ScriptoriumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "book" => Ok(Self::Book),
            "chapter" => Ok(Self::Chapter),
            "verse" => Ok(Self::Verse),
            other => Err(ScriptoriumError::config(format!(
                "unknown granularity '{other}' (expected book, chapter or verse)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Descriptive fields of the module being assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMeta {
    pub module: String,
    pub kind: ModuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// SPDX identifier when the declared license maps to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// RFC 3339 timestamp supplied by the caller.
    pub generated: String,
    pub tool_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(flatten)]
    pub module: ModuleMeta,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    pub number: u32,
    /// Last verse covered by a commentary entry spanning a range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<VerseAddress>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ConversionWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub number: u32,
    pub verses: Vec<VerseContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookContent {
    pub id: String,
    pub name: String,
    pub testament: Testament,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<ChapterContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verses: Vec<VerseContent>,
}

/// A book of the versification with no content in this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedBook {
    pub id: String,
    pub name: String,
    pub testament: Testament,
    pub reason: String,
}

/// A dictionary or general-book entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContent {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ConversionWarning>,
}

/// A record that could not be decoded or placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Unknown when the decoder failed before the key was read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub reason: String,
}

impl RecordFailure {
    pub fn new(key: Option<&RecordKey>, reason: impl Into<String>) -> Self {
        Self {
            key: key.map(ToString::to_string),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub meta: DocumentMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub books: Vec<BookContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verses: Vec<VerseContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_books: Vec<ExcludedBook>,
    #[serde(default)]
    pub failures: Vec<RecordFailure>,
}

impl Document {
    /// Verses and entries carried by the document.
    pub fn record_count(&self) -> usize {
        let in_books: usize = self
            .books
            .iter()
            .map(|b| b.verses.len() + b.chapters.iter().map(|c| c.verses.len()).sum::<usize>())
            .sum();
        in_books + self.verses.len() + self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// (book position, chapter, verse) in canonical order.
type VerseSlot = (usize, u32, u32);

/// Dictionary entries sort by key, general-book entries by index.
type EntrySlot = (Option<usize>, String);

enum Slot {
    Verse(VerseSlot),
    Entry(EntrySlot),
}

/// Assemble converted records into a [`Document`].
///
/// `system` is the module's versification; without one, verse-keyed records
/// are reported as failures. Records that fail to place (out of range,
/// duplicated) are recorded in `failures` and never abort assembly. Records
/// with no annotations whose text is blank, or only a bare reference such as
/// `Genesis 1:1:`, are dropped.
#[instrument(skip_all, fields(module = %meta.module, granularity = %granularity))]
pub fn assemble(
    records: impl IntoIterator<Item = std::result::Result<ConvertedRecord, RecordFailure>>,
    granularity: Granularity,
    meta: ModuleMeta,
    system: Option<&VersificationSystem>,
) -> Document {
    let mut failures = Vec::new();
    let mut verses: BTreeMap<VerseSlot, ConvertedRecord> = BTreeMap::new();
    let mut entries: BTreeMap<EntrySlot, ConvertedRecord> = BTreeMap::new();

    for item in records {
        let record = match item {
            Ok(record) => record,
            Err(failure) => {
                failures.push(failure);
                continue;
            }
        };
        if is_blank(&record) {
            continue;
        }

        let slot = match &record.key {
            RecordKey::Verse(address) => match place(system, address) {
                Ok(slot) => Slot::Verse(slot),
                Err(reason) => {
                    failures.push(RecordFailure::new(Some(&record.key), reason));
                    continue;
                }
            },
            RecordKey::Lexical { key } => Slot::Entry((None, key.clone())),
            RecordKey::Entry { index, path } => {
                Slot::Entry((Some(*index), path.clone().unwrap_or_default()))
            }
        };

        let duplicate = match slot {
            Slot::Verse(slot) => insert_new(&mut verses, slot, record),
            Slot::Entry(slot) => insert_new(&mut entries, slot, record),
        };
        if let Some(record) = duplicate {
            failures.push(RecordFailure::new(Some(&record.key), "duplicate record"));
        }
    }

    let mut document = Document {
        meta: DocumentMeta {
            module: meta,
            granularity,
        },
        books: Vec::new(),
        verses: Vec::new(),
        entries: entries.into_iter().map(|((index, _), r)| entry_content(index, r)).collect(),
        excluded_books: Vec::new(),
        failures,
    };
    if let Some(system) = system {
        place_verses(&mut document, system, verses, granularity);
    }

    info!(
        books = document.books.len(),
        records = document.record_count(),
        excluded = document.excluded_books.len(),
        failures = document.failures.len(),
        "document assembled"
    );
    document
}

/// Insert unless the slot is taken; a rejected record is handed back.
/// Matches the reference stubs some modules store in place of missing
/// verses: `Genesis 1:1:`, `II Chronicles 19:2:`, `Song of Songs 1:1`.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[1-4]\s+|I{1,3}V?\s+)?[A-Za-z]+(?:\s+(?:of\s+)?[A-Za-z]+)*\s+\d+:\d+:?$")
        .expect("valid regex")
});

fn is_blank(record: &ConvertedRecord) -> bool {
    if !record.annotations.is_empty() {
        return false;
    }
    let text = record.text.trim();
    text.is_empty() || (matches!(record.key, RecordKey::Verse(_)) && PLACEHOLDER_RE.is_match(text))
}

fn insert_new<K: Ord>(
    map: &mut BTreeMap<K, ConvertedRecord>,
    slot: K,
    record: ConvertedRecord,
) -> Option<ConvertedRecord> {
    use std::collections::btree_map::Entry;
    match map.entry(slot) {
        Entry::Vacant(v) => {
            v.insert(record);
            None
        }
        Entry::Occupied(_) => Some(record),
    }
}

fn place(
    system: Option<&VersificationSystem>,
    address: &VerseAddress,
) -> std::result::Result<VerseSlot, String> {
    let system = system.ok_or_else(|| "verse record in a module without versification".to_string())?;
    system.index_for_address(address).map_err(|e| e.to_string())?;
    let position = system
        .book_position(&address.book)
        .ok_or_else(|| format!("unknown book {}", address.book))?;
    Ok((position, address.chapter, address.verse))
}

fn place_verses(
    document: &mut Document,
    system: &VersificationSystem,
    verses: BTreeMap<VerseSlot, ConvertedRecord>,
    granularity: Granularity,
) {
    let mut by_book: BTreeMap<usize, Vec<(u32, u32, ConvertedRecord)>> = BTreeMap::new();
    for ((position, chapter, verse), record) in verses {
        by_book.entry(position).or_default().push((chapter, verse, record));
    }

    for (position, book) in system.books().iter().enumerate() {
        let Some(content) = by_book.remove(&position) else {
            document.excluded_books.push(ExcludedBook {
                id: book.id.clone(),
                name: book.name.clone(),
                testament: book.testament,
                reason: "no content in source module".into(),
            });
            continue;
        };

        let mut out = BookContent {
            id: book.id.clone(),
            name: book.name.clone(),
            testament: book.testament,
            chapters: Vec::new(),
            verses: Vec::new(),
        };
        for (chapter, verse, record) in content {
            let mut item = verse_content(verse, record);
            match granularity {
                Granularity::Chapter => {
                    if out.chapters.last().is_none_or(|c| c.number != chapter) {
                        out.chapters.push(ChapterContent {
                            number: chapter,
                            verses: Vec::new(),
                        });
                    }
                    if let Some(current) = out.chapters.last_mut() {
                        current.verses.push(item);
                    }
                }
                Granularity::Book => {
                    item.chapter = Some(chapter);
                    out.verses.push(item);
                }
                Granularity::Verse => {
                    item.book = Some(book.id.clone());
                    item.chapter = Some(chapter);
                    document.verses.push(item);
                }
            }
        }
        if granularity != Granularity::Verse {
            document.books.push(out);
        }
    }
    debug!(excluded = document.excluded_books.len(), "versified content placed");
}

fn verse_content(number: u32, record: ConvertedRecord) -> VerseContent {
    VerseContent {
        book: None,
        chapter: None,
        number,
        through: record.end,
        text: record.text,
        annotations: record.annotations,
        warnings: record.warnings,
    }
}

fn entry_content(index: Option<usize>, record: ConvertedRecord) -> EntryContent {
    let key = match &record.key {
        RecordKey::Entry { path: Some(path), .. } => path.clone(),
        other => other.to_string(),
    };
    EntryContent {
        key,
        index,
        text: record.text,
        annotations: record.annotations,
        warnings: record.warnings,
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Pretty-printed JSON of `document`.
pub fn to_json(document: &Document) -> Result<String> {
    serde_json::to_string_pretty(document)
        .map_err(|e| ScriptoriumError::validation(format!("JSON serialization failed: {e}")))
}

/// Write `document` to `path` atomically: a sibling temp file, then rename.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_output(path: &Path, document: &Document) -> Result<()> {
    let json = to_json(document)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ScriptoriumError::validation(format!("{} is not a file path", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| ScriptoriumError::io(dir, e))?;

    let temp = dir.join(format!(".{name}.tmp"));
    std::fs::write(&temp, json.as_bytes()).map_err(|e| ScriptoriumError::io(&temp, e))?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(ScriptoriumError::io(path, e));
    }
    debug!(bytes = json.len(), "document written");
    Ok(())
}
