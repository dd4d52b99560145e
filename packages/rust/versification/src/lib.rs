//! Versification registry: canonical book/chapter/verse tables per tradition.
//!
//! Systems are described by [`SystemDefinition`]s (TOML data). A definition may
//! `extends` an already-loaded system; the parent's books are copied and the
//! child's insertions, overrides and removals applied once, at load time. The
//! resulting [`VersificationSystem`] is flat and immutable.
//!
//! Every verse of a system has a 0-based *ordinal* in canonical order.
//! [`VersificationSystem::index_for_address`] and
//! [`VersificationSystem::address_for_index`] are exact inverses over that range.
//! [`map_reference`] carries a reference across traditions (KJV ↔ Vulgate).

mod aliases;
mod definition;
mod mapping;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use scriptorium_shared::{ConfigError, Result, ScriptoriumError, Testament, VerseAddress};

pub use aliases::{canonical_book_id, normalize_system_name};
pub use definition::{BookDefinition, SystemDefinition};
pub use mapping::{MappedVerse, MappingType, map_reference};

const BUILTIN_DEFINITIONS: [(&str, &str); 3] = [
    ("kjv.toml", include_str!("canon/kjv.toml")),
    ("kjva.toml", include_str!("canon/kjva.toml")),
    ("vulg.toml", include_str!("canon/vulg.toml")),
];

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

/// One book of a materialized system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: String,
    pub name: String,
    pub testament: Testament,
    /// Verse count per chapter; index 0 is chapter 1.
    pub chapters: Vec<u32>,
}

impl Book {
    pub fn chapter_count(&self) -> u32 {
        self.chapters.len() as u32
    }

    /// Verses in `chapter`, or `None` outside the book.
    pub fn verses_in(&self, chapter: u32) -> Option<u32> {
        chapter
            .checked_sub(1)
            .and_then(|i| self.chapters.get(i as usize))
            .copied()
    }

    pub fn total_verses(&self) -> u64 {
        self.chapters.iter().map(|&v| u64::from(v)).sum()
    }
}

// ---------------------------------------------------------------------------
// VersificationSystem
// ---------------------------------------------------------------------------

/// A fully materialized, immutable versification table.
#[derive(Debug, Clone)]
pub struct VersificationSystem {
    id: String,
    parent: Option<String>,
    books: Vec<Book>,
    by_id: HashMap<String, usize>,
    /// Ordinal of the first verse of each book.
    book_starts: Vec<u64>,
    /// Per book, ordinal (relative to the book) of the first verse of each chapter.
    chapter_starts: Vec<Vec<u64>>,
    total: u64,
}

impl VersificationSystem {
    fn build(id: String, parent: Option<String>, books: Vec<Book>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(books.len());
        let mut book_starts = Vec::with_capacity(books.len());
        let mut chapter_starts = Vec::with_capacity(books.len());
        let mut total = 0u64;

        for (i, book) in books.iter().enumerate() {
            if book.chapters.is_empty() {
                return Err(ScriptoriumError::validation(format!(
                    "{id}: book {} has no chapters",
                    book.id
                )));
            }
            if book.chapters.contains(&0) {
                return Err(ScriptoriumError::validation(format!(
                    "{id}: book {} has an empty chapter",
                    book.id
                )));
            }
            if by_id.insert(book.id.clone(), i).is_some() {
                return Err(ScriptoriumError::validation(format!(
                    "{id}: book {} listed twice",
                    book.id
                )));
            }
            book_starts.push(total);
            let mut starts = Vec::with_capacity(book.chapters.len());
            let mut within = 0u64;
            for &count in &book.chapters {
                starts.push(within);
                within += u64::from(count);
            }
            chapter_starts.push(starts);
            total += within;
        }

        Ok(Self {
            id,
            parent,
            books,
            by_id,
            book_starts,
            chapter_starts,
            total,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The system this one was derived from, kept for display only.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    /// Look a book up by OSIS id, or by a common alias (`genesis`, `psalm`).
    pub fn book(&self, name: &str) -> Option<&Book> {
        self.book_position(name).map(|i| &self.books[i])
    }

    /// Canonical position of a book within this system.
    pub fn book_position(&self, name: &str) -> Option<usize> {
        if let Some(&i) = self.by_id.get(name) {
            return Some(i);
        }
        if let Some(id) = canonical_book_id(name) {
            if let Some(&i) = self.by_id.get(id) {
                return Some(i);
            }
        }
        self.books
            .iter()
            .position(|b| b.id.eq_ignore_ascii_case(name))
    }

    pub fn books_in(&self, testament: Testament) -> impl Iterator<Item = &Book> {
        self.books.iter().filter(move |b| b.testament == testament)
    }

    /// Number of verses in the whole system.
    pub fn total_verses(&self) -> u64 {
        self.total
    }

    /// Ordinal of `address`; fails with `AddressOutOfRange` outside declared bounds.
    pub fn index_for_address(&self, address: &VerseAddress) -> Result<u64> {
        let out_of_range = || ScriptoriumError::AddressOutOfRange {
            system: self.id.clone(),
            address: address.to_string(),
        };

        let b = self.book_position(&address.book).ok_or_else(out_of_range)?;
        let book = &self.books[b];
        let count = book.verses_in(address.chapter).ok_or_else(out_of_range)?;
        if address.verse == 0 || address.verse > count {
            return Err(out_of_range());
        }
        let chapter_start = self.chapter_starts[b][(address.chapter - 1) as usize];
        Ok(self.book_starts[b] + chapter_start + u64::from(address.verse - 1))
    }

    /// Inverse of [`index_for_address`](Self::index_for_address).
    pub fn address_for_index(&self, ordinal: u64) -> Result<VerseAddress> {
        if ordinal >= self.total {
            return Err(ScriptoriumError::AddressOutOfRange {
                system: self.id.clone(),
                address: format!("ordinal {ordinal}"),
            });
        }
        // Last book starting at or before the ordinal.
        let b = self.book_starts.partition_point(|&s| s <= ordinal) - 1;
        let within = ordinal - self.book_starts[b];
        let c = self.chapter_starts[b].partition_point(|&s| s <= within) - 1;
        let verse = within - self.chapter_starts[b][c];
        Ok(VerseAddress::new(
            self.books[b].id.clone(),
            c as u32 + 1,
            verse as u32 + 1,
        ))
    }

    /// Validate an address and return its canonical form (aliases resolved).
    pub fn resolve(&self, book: &str, chapter: u32, verse: u32) -> Result<u64> {
        self.index_for_address(&VerseAddress::new(book, chapter, verse))
    }

    /// Every address, in canonical order.
    pub fn addresses(&self) -> impl Iterator<Item = VerseAddress> + '_ {
        self.books.iter().flat_map(|book| {
            book.chapters.iter().enumerate().flat_map(move |(c, &count)| {
                (1..=count).map(move |v| VerseAddress::new(book.id.clone(), c as u32 + 1, v))
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Loaded systems, keyed by id. Populated once at startup, read-only after.
#[derive(Debug, Default)]
pub struct Registry {
    systems: BTreeMap<String, Arc<VersificationSystem>>,
    aliases: HashMap<String, String>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in KJV, KJVA and Vulgate systems.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for (name, text) in BUILTIN_DEFINITIONS {
            registry.load_toml(text, name)?;
        }
        Ok(registry)
    }

    /// Built-ins plus definition files from config.
    pub fn with_extra_definitions(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut registry = Self::builtin()?;
        for path in paths {
            registry.load_file(path.as_ref())?;
        }
        Ok(registry)
    }

    /// Materialize a definition and register it.
    #[instrument(skip_all, fields(system = %definition.id))]
    pub fn load_system(&mut self, definition: SystemDefinition) -> Result<Arc<VersificationSystem>> {
        if self.systems.contains_key(&definition.id) {
            return Err(ScriptoriumError::validation(format!(
                "versification {} is already loaded",
                definition.id
            )));
        }

        let parent_books = match &definition.extends {
            Some(parent) => {
                let parent_system =
                    self.systems
                        .get(parent)
                        .ok_or_else(|| ConfigError::UnknownParent {
                            system: definition.id.clone(),
                            parent: parent.clone(),
                        })?;
                Some(parent_system.books().to_vec())
            }
            None => None,
        };

        let books = definition::materialize(&definition, parent_books)?;
        let system = Arc::new(VersificationSystem::build(
            definition.id.clone(),
            definition.extends.clone(),
            books,
        )?);

        for alias in &definition.aliases {
            self.aliases.insert(alias.to_ascii_lowercase(), definition.id.clone());
        }
        self.systems.insert(definition.id.clone(), Arc::clone(&system));

        info!(
            books = system.books().len(),
            verses = system.total_verses(),
            extends = ?definition.extends,
            "versification loaded"
        );
        Ok(system)
    }

    /// Parse and load a TOML definition. `origin` is only used in messages.
    pub fn load_toml(&mut self, text: &str, origin: &str) -> Result<Arc<VersificationSystem>> {
        let definition: SystemDefinition = toml::from_str(text).map_err(|e| {
            ScriptoriumError::validation(format!("invalid versification definition {origin}: {e}"))
        })?;
        self.load_system(definition)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Arc<VersificationSystem>> {
        let text = std::fs::read_to_string(path).map_err(|e| ScriptoriumError::io(path, e))?;
        debug!(path = %path.display(), "loading versification definition");
        self.load_toml(&text, &path.display().to_string())
    }

    /// Look a system up by id or alias. Fails with `UnknownVersification`.
    pub fn get(&self, name: &str) -> Result<Arc<VersificationSystem>> {
        let name = name.trim();
        if let Some(s) = self.systems.get(name) {
            return Ok(Arc::clone(s));
        }
        let lowered = name.to_ascii_lowercase();
        let id = self
            .aliases
            .get(&lowered)
            .map(String::as_str)
            .unwrap_or_else(|| normalize_system_name(name));
        self.systems
            .get(id)
            .map(Arc::clone)
            .ok_or_else(|| ConfigError::UnknownVersification(name.to_string()).into())
    }

    /// Ordinal of an address under the named system.
    pub fn resolve(&self, system: &str, book: &str, chapter: u32, verse: u32) -> Result<u64> {
        self.get(system)?.resolve(book, chapter, verse)
    }

    /// Loaded system ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }
}
