//! Entry numbering inside the per-testament index files.
//!
//! Each testament file starts with two heading entries. Every book then takes
//! one intro entry, and every chapter one intro entry followed by its verses.
//! Old Testament and apocrypha books share the `ot` file; the `nt` file counts
//! only New Testament books, so its numbering starts over at the first NT book.

use scriptorium_shared::{Result, ScriptoriumError, Testament, VerseAddress};
use scriptorium_versification::VersificationSystem;

/// Which of the two index files holds an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TestamentFile {
    Old = 0,
    New = 1,
}

impl TestamentFile {
    pub(crate) const ALL: [TestamentFile; 2] = [Self::Old, Self::New];

    pub(crate) fn of(testament: Testament) -> Self {
        match testament {
            Testament::New => Self::New,
            Testament::Old | Testament::Apocrypha => Self::Old,
        }
    }

    /// File stem: `ot` or `nt`.
    pub(crate) fn stem(self) -> &'static str {
        match self {
            Self::Old => "ot",
            Self::New => "nt",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

const HEADING_ENTRIES: u64 = 2;

/// Precomputed book bases for one versification system.
#[derive(Debug, Clone)]
pub(crate) struct EntryLayout {
    /// Per book position: file and entry of the book intro.
    bases: Vec<(TestamentFile, u64)>,
    /// Entry count of each file.
    totals: [u64; 2],
}

impl EntryLayout {
    pub(crate) fn new(system: &VersificationSystem) -> Self {
        let mut next = [HEADING_ENTRIES; 2];
        let bases = system
            .books()
            .iter()
            .map(|book| {
                let file = TestamentFile::of(book.testament);
                let base = next[file.slot()];
                next[file.slot()] += 1 + u64::from(book.chapter_count()) + book.total_verses();
                (file, base)
            })
            .collect();
        Self {
            bases,
            totals: next,
        }
    }

    /// Number of entries a complete index for `file` holds.
    pub(crate) fn total(&self, file: TestamentFile) -> u64 {
        self.totals[file.slot()]
    }

    /// File and entry number of `address`. Fails with `AddressOutOfRange`
    /// when the address is not valid in `system`.
    pub(crate) fn entry(
        &self,
        system: &VersificationSystem,
        address: &VerseAddress,
    ) -> Result<(TestamentFile, u64)> {
        system.index_for_address(address)?;
        let position = system.book_position(&address.book).ok_or_else(|| {
            ScriptoriumError::AddressOutOfRange {
                system: system.id().to_string(),
                address: address.to_string(),
            }
        })?;
        let book = &system.books()[position];
        let (file, base) = self.bases[position];

        let before: u64 = book.chapters[..(address.chapter - 1) as usize]
            .iter()
            .map(|&v| 1 + u64::from(v))
            .sum();
        let chapter_intro = base + 1 + before;
        Ok((file, chapter_intro + u64::from(address.verse)))
    }
}
