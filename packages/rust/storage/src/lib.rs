//! e-Sword module reader over libSQL.
//!
//! e-Sword modules are SQLite databases, one table per module kind:
//!
//! | Extension | Table | Columns |
//! |---|---|---|
//! | `.bblx` | `Bible` | Book, Chapter, Verse, Scripture |
//! | `.cmtx` | `Commentary` | Book, ChapterBegin, VerseBegin, ChapterEnd, VerseEnd, Comments |
//! | `.dctx` | `Dictionary` | Topic, Definition |
//!
//! Book numbers 1-66 follow the KJV book order. An optional `Details` table
//! carries module metadata. Rows become [`RawRecord`]s in the RTF dialect, so
//! the rest of the pipeline does not care which format a module came from.
//!
//! **Access rules:** modules are only ever read; nothing here writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::{Connection, Database, Value, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use scriptorium_shared::{
    Dialect, FormatError, ModuleKind, RawRecord, RecordKey, Result, ScriptoriumError, VerseAddress,
};
use scriptorium_versification::VersificationSystem;

fn storage_err(e: libsql::Error) -> ScriptoriumError {
    ScriptoriumError::Storage(e.to_string())
}

/// Module kind, from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ESwordKind {
    Bible,
    Commentary,
    Dictionary,
}

impl ESwordKind {
    /// `bblx`, `cmtx` or `dctx` (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "bblx" => Some(Self::Bible),
            "cmtx" => Some(Self::Commentary),
            "dctx" => Some(Self::Dictionary),
            _ => None,
        }
    }

    pub fn module_kind(&self) -> ModuleKind {
        match self {
            Self::Bible => ModuleKind::Bible,
            Self::Commentary => ModuleKind::Commentary,
            Self::Dictionary => ModuleKind::Dictionary,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::Bible => "Bible",
            Self::Commentary => "Commentary",
            Self::Dictionary => "Dictionary",
        }
    }
}

/// Contents of the optional `Details` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ESwordDetails {
    pub description: Option<String>,
    pub abbreviation: Option<String>,
    pub information: Option<String>,
    pub version: Option<String>,
    pub font: Option<String>,
    pub right_to_left: bool,
}

/// An opened e-Sword module.
pub struct ESwordModule {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    path: PathBuf,
    kind: ESwordKind,
    details: Option<ESwordDetails>,
    /// Book numbering; book `n` is `books()[n - 1]`.
    system: Arc<VersificationSystem>,
}

impl ESwordModule {
    /// Open `path` for reading. `system` supplies the book numbering and is
    /// expected to be KJV.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path, system: Arc<VersificationSystem>) -> Result<Self> {
        let kind = ESwordKind::from_path(path).ok_or_else(|| {
            FormatError::UnknownDriver(format!("{} is not an e-Sword module", path.display()))
        })?;
        // Opening a missing file would create an empty database.
        if !path.is_file() {
            return Err(ScriptoriumError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "module file not found"),
            ));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let mut module = Self {
            db,
            conn,
            path: path.to_path_buf(),
            kind,
            details: None,
            system,
        };
        if !module.has_table(kind.table()).await? {
            return Err(FormatError::Malformed(format!(
                "{}: missing {} table",
                path.display(),
                kind.table()
            ))
            .into());
        }
        if module.has_table("Details").await? {
            module.details = Some(module.load_details().await?);
        }
        info!(kind = ?kind, details = module.details.is_some(), "e-Sword module opened");
        Ok(module)
    }

    pub fn kind(&self) -> ESwordKind {
        self.kind
    }

    pub fn details(&self) -> Option<&ESwordDetails> {
        self.details.as_ref()
    }

    /// Module id: the file stem.
    pub fn id(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    async fn has_table(&self, name: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? > 0),
            None => Ok(false),
        }
    }

    /// Read the first `Details` row by column name; columns vary between
    /// module kinds.
    async fn load_details(&self) -> Result<ESwordDetails> {
        let mut rows = self
            .conn
            .query("SELECT * FROM Details LIMIT 1", params![])
            .await
            .map_err(storage_err)?;
        let names: Vec<String> = (0..rows.column_count())
            .map(|i| rows.column_name(i).unwrap_or_default().to_ascii_lowercase())
            .collect();

        let mut details = ESwordDetails::default();
        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(details);
        };
        for (i, name) in names.iter().enumerate() {
            let value = row.get_value(i as i32).map_err(storage_err)?;
            let text = match &value {
                Value::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Integer(n) => Some(n.to_string()),
                _ => None,
            };
            match name.as_str() {
                "description" | "title" => details.description = text,
                "abbreviation" => details.abbreviation = text,
                "information" | "comments" => details.information = text,
                "version" => details.version = text,
                "font" => details.font = text,
                "righttoleft" => {
                    details.right_to_left = matches!(value, Value::Integer(n) if n != 0)
                }
                _ => {}
            }
        }
        Ok(details)
    }

    // -----------------------------------------------------------------------
    // Addressing
    // -----------------------------------------------------------------------

    fn book_id(&self, number: i64) -> Result<&str> {
        usize::try_from(number)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.system.books().get(i))
            .map(|b| b.id.as_str())
            .ok_or_else(|| {
                FormatError::Malformed(format!(
                    "book number {number} outside 1-{}",
                    self.system.books().len()
                ))
                .into()
            })
    }

    fn book_number(&self, address: &VerseAddress) -> Result<i64> {
        self.system.index_for_address(address)?;
        self.system
            .book_position(&address.book)
            .map(|p| p as i64 + 1)
            .ok_or_else(|| FormatError::AddressNotInModule(address.to_string()).into())
    }

    /// Build and validate an address from row columns.
    fn address(&self, book: i64, chapter: i64, verse: i64) -> Result<VerseAddress> {
        let id = self.book_id(book)?;
        let (Ok(chapter), Ok(verse)) = (u32::try_from(chapter), u32::try_from(verse)) else {
            return Err(FormatError::Malformed(format!("{id} {chapter}:{verse}: negative reference")).into());
        };
        let address = VerseAddress::new(id, chapter, verse);
        self.system
            .index_for_address(&address)
            .map_err(|_| FormatError::Malformed(format!("{address} outside {}", self.system.id())))?;
        Ok(address)
    }

    fn record(&self, key: RecordKey, text: Option<String>) -> RawRecord {
        RawRecord::owned(key, Dialect::Rtf, text.unwrap_or_default().into_bytes())
    }

    // -----------------------------------------------------------------------
    // Bible
    // -----------------------------------------------------------------------

    /// One verse of a `.bblx` Bible.
    pub async fn get_verse(&self, address: &VerseAddress) -> Result<RawRecord> {
        self.expect_kind(ESwordKind::Bible)?;
        let book = self.book_number(address)?;
        let mut rows = self
            .conn
            .query(
                "SELECT Scripture FROM Bible WHERE Book = ?1 AND Chapter = ?2 AND Verse = ?3",
                params![book, i64::from(address.chapter), i64::from(address.verse)],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(self.record(RecordKey::Verse(address.clone()), row.get::<String>(0).ok())),
            None => Err(FormatError::AddressNotInModule(address.to_string()).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Commentary
    // -----------------------------------------------------------------------

    /// The commentary entry covering `address`, keyed by its start address
    /// and carrying its end address.
    pub async fn get_comment(&self, address: &VerseAddress) -> Result<RawRecord> {
        self.expect_kind(ESwordKind::Commentary)?;
        let book = self.book_number(address)?;
        let (c, v) = (i64::from(address.chapter), i64::from(address.verse));
        let mut rows = self
            .conn
            .query(
                "SELECT Book, ChapterBegin, VerseBegin, ChapterEnd, VerseEnd, Comments
                 FROM Commentary
                 WHERE Book = ?1
                   AND (ChapterBegin < ?2 OR (ChapterBegin = ?2 AND VerseBegin <= ?3))
                   AND (ChapterEnd > ?2 OR (ChapterEnd = ?2 AND VerseEnd >= ?3))
                 ORDER BY ChapterBegin DESC, VerseBegin DESC
                 LIMIT 1",
                params![book, c, v],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => self.comment_row(&row),
            None => Err(FormatError::AddressNotInModule(address.to_string()).into()),
        }
    }

    fn comment_row(&self, row: &libsql::Row) -> Result<RawRecord> {
        let int = |i: i32| row.get::<i64>(i).map_err(storage_err);
        let book = int(0)?;
        let start = self.address(book, int(1)?, int(2)?)?;
        // A missing or degenerate end collapses to the start verse.
        let end = match (row.get::<i64>(3), row.get::<i64>(4)) {
            (Ok(ce), Ok(ve)) if ce > 0 && ve > 0 => Some(self.address(book, ce, ve)?),
            _ => None,
        }
        .filter(|end| end != &start);
        Ok(self
            .record(RecordKey::Verse(start), row.get::<String>(5).ok())
            .with_end(end))
    }

    // -----------------------------------------------------------------------
    // Dictionary
    // -----------------------------------------------------------------------

    /// Case-insensitive topic lookup. Strong's-style numbers also match their
    /// unprefixed and zero-padded forms.
    pub async fn lookup(&self, topic: &str) -> Result<RawRecord> {
        self.expect_kind(ESwordKind::Dictionary)?;
        for candidate in topic_candidates(topic) {
            let mut rows = self
                .conn
                .query(
                    "SELECT Topic, Definition FROM Dictionary WHERE Topic = ?1 COLLATE NOCASE LIMIT 1",
                    params![candidate.as_str()],
                )
                .await
                .map_err(storage_err)?;
            if let Some(row) = rows.next().await.map_err(storage_err)? {
                return self.topic_row(&row);
            }
        }
        Err(FormatError::AddressNotInModule(topic.trim().to_string()).into())
    }

    fn topic_row(&self, row: &libsql::Row) -> Result<RawRecord> {
        let topic = row.get::<String>(0).map_err(storage_err)?;
        let key = RecordKey::Lexical {
            key: topic.trim().to_uppercase(),
        };
        Ok(self.record(key, row.get::<String>(1).ok()))
    }

    // -----------------------------------------------------------------------
    // Full scans
    // -----------------------------------------------------------------------

    /// Every row, in table key order. Rows with invalid book numbers or
    /// references outside the versification come back as per-record errors.
    pub async fn records(&self) -> Result<Vec<Result<RawRecord>>> {
        let sql = match self.kind {
            ESwordKind::Bible => "SELECT Book, Chapter, Verse, Scripture FROM Bible ORDER BY Book, Chapter, Verse",
            ESwordKind::Commentary => {
                "SELECT Book, ChapterBegin, VerseBegin, ChapterEnd, VerseEnd, Comments
                 FROM Commentary ORDER BY Book, ChapterBegin, VerseBegin"
            }
            ESwordKind::Dictionary => "SELECT Topic, Definition FROM Dictionary ORDER BY Topic",
        };
        let mut rows = self.conn.query(sql, params![]).await.map_err(storage_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let record = match self.kind {
                ESwordKind::Bible => self.bible_row(&row),
                ESwordKind::Commentary => self.comment_row(&row),
                ESwordKind::Dictionary => self.topic_row(&row),
            };
            out.push(record);
        }
        debug!(rows = out.len(), "e-Sword rows read");
        Ok(out)
    }

    fn bible_row(&self, row: &libsql::Row) -> Result<RawRecord> {
        let int = |i: i32| row.get::<i64>(i).map_err(storage_err);
        let address = self.address(int(0)?, int(1)?, int(2)?)?;
        Ok(self.record(RecordKey::Verse(address), row.get::<String>(3).ok()))
    }

    fn expect_kind(&self, kind: ESwordKind) -> Result<()> {
        if self.kind == kind {
            return Ok(());
        }
        Err(FormatError::UnknownDriver(format!(
            "{} is a {:?} module, not {:?}",
            self.path.display(),
            self.kind,
            kind
        ))
        .into())
    }
}

/// Lookup forms of a topic: as given, and for `H430`/`G2316`-style numbers
/// the bare and zero-padded variants (e-Sword lexicons usually pad to four).
fn topic_candidates(topic: &str) -> Vec<String> {
    let topic = topic.trim().to_uppercase();
    let mut out = vec![topic.clone()];
    let (prefix, digits) = match topic.chars().next() {
        Some(c @ ('H' | 'G')) => (c.to_string(), &topic[1..]),
        _ => (String::new(), topic.as_str()),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return out;
    }
    let bare = digits.trim_start_matches('0');
    let forms = [
        bare.to_string(),
        format!("{prefix}{bare:0>4}"),
        format!("{prefix}{bare:0>5}"),
        format!("{bare:0>4}"),
        format!("{bare:0>5}"),
    ];
    for candidate in forms {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
