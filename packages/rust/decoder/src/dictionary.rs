//! Lexicons and dictionaries: zLD, RawLD and RawLD4.
//!
//! Every driver has a key index (`.idx`) of offset/size pairs into `.dat`.
//! A `.dat` record starts with the entry key, terminated by CR, LF or NUL.
//!
//! - RawLD: the entry body follows the key terminator directly.
//! - zLD: the key is followed by a block number and an entry number (u32
//!   each). `.zdx` locates the compressed block in `.zdt`; the decompressed
//!   block starts with an entry count, then one offset/size pair per entry,
//!   offsets counted from the start of the block.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use scriptorium_shared::{
    Dialect, Driver, FormatError, ModuleDescriptor, ModuleKind, RawRecord, RecordKey, Result,
    ScriptoriumError,
};

use crate::codec::{BlockCache, Codec};
use crate::index::{self, SpanEntry};

#[derive(Debug, Clone)]
struct KeyEntry {
    key: String,
    /// Start of the bytes after the key terminator, within `.dat`.
    rest: usize,
    rest_len: usize,
}

#[derive(Debug)]
struct CompressedBlocks {
    zdx: Vec<SpanEntry>,
    zdt: Vec<u8>,
}

/// Reader for a dictionary module. Keys are kept sorted for binary search.
#[derive(Debug)]
pub struct DictionaryDecoder {
    module: String,
    dialect: Dialect,
    codec: Codec,
    strongs: Option<char>,
    keys: Vec<KeyEntry>,
    dat: Arc<[u8]>,
    blocks: Option<CompressedBlocks>,
    cache: BlockCache,
}

impl DictionaryDecoder {
    /// Open a dictionary whose files are `<prefix>.idx`, `<prefix>.dat` (and
    /// `.zdx`/`.zdt` for zLD). `path` may also be the directory holding them.
    #[instrument(skip_all, fields(module = %descriptor.id, path = %path.display()))]
    pub fn open(path: &Path, descriptor: &ModuleDescriptor) -> Result<Self> {
        if descriptor.kind() != ModuleKind::Dictionary {
            return Err(FormatError::UnknownDriver(format!(
                "{} is not a dictionary driver",
                descriptor.driver.as_str()
            ))
            .into());
        }
        let codec = Codec::for_descriptor(descriptor)?;
        let prefix = index::find_prefix(path, "idx")?;
        let wide = descriptor.driver != Driver::RawLD;

        let idx = index::span_entries(
            &index::read_file(&index::with_ext(&prefix, "idx"))?,
            wide,
            "key index",
        )?;
        let dat: Arc<[u8]> = Arc::from(index::read_file(&index::with_ext(&prefix, "dat"))?);
        let strongs = strongs_prefix(&descriptor.id);

        let mut keys = Vec::with_capacity(idx.len());
        for entry in &idx {
            let record = index::span(&dat, entry.offset as usize, entry.size as usize, "key record")?;
            if let Some(parsed) = split_key(record, entry.offset as usize, strongs) {
                keys.push(parsed);
            }
        }
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        let before = keys.len();
        keys.dedup_by(|later, earlier| later.key == earlier.key);
        if keys.len() != before {
            warn!(duplicates = before - keys.len(), "duplicate dictionary keys ignored");
        }

        let blocks = if descriptor.driver == Driver::ZLD {
            Some(CompressedBlocks {
                zdx: index::span_entries(
                    &index::read_file(&index::with_ext(&prefix, "zdx"))?,
                    true,
                    "block index",
                )?,
                zdt: index::read_file(&index::with_ext(&prefix, "zdt"))?,
            })
        } else {
            None
        };

        info!(
            keys = keys.len(),
            codec = codec.name(),
            strongs = strongs.is_some(),
            "dictionary opened"
        );

        Ok(Self {
            module: descriptor.id.clone(),
            dialect: descriptor.dialect(),
            codec,
            strongs,
            keys,
            dat,
            blocks,
            cache: BlockCache::default(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Normalized keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.key.as_str())
    }

    pub fn decompressions(&self) -> u64 {
        self.cache.decompressions()
    }

    /// Look up `key` after normalization. Unknown keys fail with
    /// `AddressNotInModule`.
    pub fn get(&mut self, key: &str) -> Result<RawRecord> {
        let needle = normalize_key(key, self.strongs);
        let position = self
            .keys
            .binary_search_by(|k| k.key.as_str().cmp(&needle))
            .map_err(|_| FormatError::AddressNotInModule(format!("{} in {}", needle, self.module)))?;
        self.record_at(position)
    }

    /// Every entry in key order.
    pub fn records(&mut self) -> impl Iterator<Item = Result<RawRecord>> + '_ {
        (0..self.keys.len()).map(move |i| self.record_at(i))
    }

    fn record_at(&mut self, position: usize) -> Result<RawRecord> {
        let Self {
            keys,
            dat,
            blocks,
            cache,
            codec,
            dialect,
            ..
        } = self;
        let entry = &keys[position];
        let key = RecordKey::Lexical {
            key: entry.key.clone(),
        };

        let Some(blocks) = blocks else {
            let body = index::span(dat, entry.rest, entry.rest_len, "dictionary body")?;
            return RawRecord::slice(key, *dialect, Arc::clone(dat), entry.rest, trimmed_len(body));
        };

        if entry.rest_len < 8 {
            return Err(ScriptoriumError::corrupt_index(format!(
                "{}: key record has no block reference",
                entry.key
            )));
        }
        let block = index::u32_at(dat, entry.rest, "block number")? as usize;
        let slot = index::u32_at(dat, entry.rest + 4, "entry number")? as usize;

        let location = blocks.zdx.get(block).ok_or_else(|| {
            ScriptoriumError::corrupt_index(format!(
                "{}: block {block} beyond {} blocks",
                entry.key,
                blocks.zdx.len()
            ))
        })?;
        let compressed = index::span(
            &blocks.zdt,
            location.offset as usize,
            location.size as usize,
            "dictionary block",
        )?;
        let arena = cache.fetch(0, block, *codec, compressed, 0)?;

        let count = index::u32_at(&arena, 0, "block entry count")? as usize;
        if slot >= count {
            return Err(ScriptoriumError::corrupt_index(format!(
                "{}: entry {slot} beyond {count} in block {block}",
                entry.key
            )));
        }
        let offset = index::u32_at(&arena, 4 + slot * 8, "entry offset")? as usize;
        let size = index::u32_at(&arena, 8 + slot * 8, "entry size")? as usize;
        let body = index::span(&arena, offset, size, "dictionary entry")?;
        let len = trimmed_len(body);
        RawRecord::slice(key, *dialect, arena, offset, len)
    }
}

/// `H` for Hebrew and `G` for Greek Strong's lexicons, judged by module id.
pub fn strongs_prefix(module_id: &str) -> Option<char> {
    let id = module_id.to_ascii_lowercase();
    if id.contains("hebrew") {
        Some('H')
    } else if id.contains("greek") {
        Some('G')
    } else {
        None
    }
}

/// Trim and upper-case a key. In Strong's lexicons numeric keys, bare or
/// prefixed, become the prefix plus five zero-padded digits (`H00430`).
pub fn normalize_key(raw: &str, strongs: Option<char>) -> String {
    let key = raw.trim().to_uppercase();
    let Some(prefix) = strongs else {
        return key;
    };
    let digits = key.strip_prefix(prefix).unwrap_or(&key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return key;
    }
    format!("{prefix}{:0>5}", digits.trim_start_matches('0'))
}

/// Split a `.dat` record at the first CR, LF or NUL.
fn split_key(record: &[u8], base: usize, strongs: Option<char>) -> Option<KeyEntry> {
    let end = record
        .iter()
        .position(|&b| matches!(b, b'\r' | b'\n' | 0))
        .unwrap_or(record.len());
    let key = normalize_key(&String::from_utf8_lossy(&record[..end]), strongs);
    if key.is_empty() {
        return None;
    }
    let skip = match record.get(end..end + 2) {
        Some(b"\r\n") => 2,
        _ if end < record.len() => 1,
        _ => 0,
    };
    let rest = end + skip;
    Some(KeyEntry {
        key,
        rest: base + rest,
        rest_len: record.len() - rest,
    })
}

/// Length of `body` without trailing NULs.
fn trimmed_len(body: &[u8]) -> usize {
    body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::DictionaryWriter;
    use scriptorium_shared::parse_conf;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scriptorium-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn descriptor(id: &str, driver: &str) -> ModuleDescriptor {
        let conf = format!("[{id}]\nDataPath=./modules/lexdict/x/{id}/dict\nModDrv={driver}\nSourceType=TEI\n");
        parse_conf(&conf, "test.conf").unwrap()
    }

    fn sample() -> DictionaryWriter {
        let mut writer = DictionaryWriter::new(2);
        writer.entry("Aaron", b"<entryFree>Brother of Moses</entryFree>");
        writer.entry("abba", b"<entryFree>Father</entryFree>");
        writer.entry("Zion", b"<entryFree>Mount of Jerusalem</entryFree>");
        writer
    }

    #[test]
    fn compressed_lookup_is_case_insensitive() {
        let dir = temp_dir("zld");
        sample().write_compressed(&dir.join("dict"), Codec::Zlib).unwrap();

        let mut dict = DictionaryDecoder::open(&dir.join("dict"), &descriptor("Easton", "zLD")).unwrap();
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["AARON", "ABBA", "ZION"]);

        let record = dict.get("  zion ").unwrap();
        assert_eq!(record.as_str().unwrap(), "<entryFree>Mount of Jerusalem</entryFree>");
        assert_eq!(record.key, RecordKey::Lexical { key: "ZION".into() });
        assert_eq!(record.dialect, Dialect::Tei);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn entries_in_one_block_decompress_once() {
        let dir = temp_dir("zld-cache");
        sample().write_compressed(&dir.join("dict"), Codec::Zlib).unwrap();

        let mut dict = DictionaryDecoder::open(&dir, &descriptor("Easton", "zLD")).unwrap();
        dict.get("aaron").unwrap();
        dict.get("abba").unwrap();
        assert_eq!(dict.decompressions(), 1);
        dict.get("zion").unwrap();
        assert_eq!(dict.decompressions(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn raw_dictionary_reads_body_after_key() {
        let dir = temp_dir("rawld");
        sample().write_raw(&dir.join("dict"), false).unwrap();

        let mut dict = DictionaryDecoder::open(&dir.join("dict"), &descriptor("Easton", "RawLD")).unwrap();
        let bodies: Vec<String> = dict
            .records()
            .map(|r| r.unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[1], "<entryFree>Father</entryFree>");
        assert_eq!(dict.decompressions(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn strongs_numbers_accept_bare_and_padded_forms() {
        let dir = temp_dir("zld-strongs");
        let mut writer = DictionaryWriter::new(10);
        writer.entry("00430", b"elohim");
        writer.entry("07225", b"reshith");
        writer.write_compressed(&dir.join("dict"), Codec::Zlib).unwrap();

        let mut dict =
            DictionaryDecoder::open(&dir.join("dict"), &descriptor("StrongsHebrew", "zLD")).unwrap();
        for key in ["430", "H430", "h0430", "00430"] {
            assert_eq!(dict.get(key).unwrap().as_str().unwrap(), "elohim", "{key}");
        }
        assert_eq!(dict.keys().next(), Some("H00430"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_key_is_not_in_module() {
        let dir = temp_dir("zld-missing");
        sample().write_compressed(&dir.join("dict"), Codec::Zlib).unwrap();

        let mut dict = DictionaryDecoder::open(&dir.join("dict"), &descriptor("Easton", "zLD")).unwrap();
        let err = dict.get("Babylon").unwrap_err();
        assert!(matches!(
            err,
            ScriptoriumError::Format(FormatError::AddressNotInModule(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn key_splitting() {
        let entry = split_key(b"abba\r\nbody", 100, None).unwrap();
        assert_eq!(entry.key, "ABBA");
        assert_eq!(entry.rest, 106);
        assert_eq!(entry.rest_len, 4);

        let entry = split_key(b"lonely", 0, None).unwrap();
        assert_eq!(entry.rest_len, 0);
        assert!(split_key(b"  \n", 0, None).is_none());
    }

    #[test]
    fn strongs_prefixes() {
        assert_eq!(strongs_prefix("StrongsGreek"), Some('G'));
        assert_eq!(strongs_prefix("Easton"), None);
        assert_eq!(normalize_key("G2316", Some('G')), "G02316");
        assert_eq!(normalize_key("g2316a", Some('G')), "G2316A");
        assert_eq!(normalize_key("logos", None), "LOGOS");
    }
}
