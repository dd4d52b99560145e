//! Verse-addressed modules: zText, zCom, RawText, RawCom and their `*4` variants.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use scriptorium_shared::{
    Dialect, Driver, FormatError, ModuleDescriptor, ModuleKind, RawRecord, RecordKey, Result,
    ScriptoriumError, Testament, VerseAddress,
};
use scriptorium_versification::VersificationSystem;

use crate::codec::{BlockCache, Codec};
use crate::index::{self, BlockIndex, BufferEntry, SpanEntry};
use crate::layout::{EntryLayout, TestamentFile};

/// Index and data of one testament file.
#[derive(Debug)]
enum TestamentStore {
    Compressed {
        blocks: BlockIndex,
        buffers: Vec<BufferEntry>,
        blob: Vec<u8>,
    },
    Raw {
        entries: Vec<SpanEntry>,
        text: Arc<[u8]>,
    },
}

/// Reader for a verse-addressed module, bound to one versification system.
///
/// Reads take `&mut self` because the decoder caches the most recently
/// decompressed block; use one decoder per worker.
#[derive(Debug)]
pub struct VerseDecoder {
    module: String,
    kind: ModuleKind,
    dialect: Dialect,
    system: Arc<VersificationSystem>,
    layout: EntryLayout,
    codec: Codec,
    files: [Option<TestamentStore>; 2],
    cache: BlockCache,
}

impl VerseDecoder {
    /// Open the module whose data lives in `dir`.
    ///
    /// Only the testament files present on disk are loaded; a module with
    /// neither fails with `CorruptIndex`.
    #[instrument(skip_all, fields(module = %descriptor.id, dir = %dir.display()))]
    pub fn open(
        dir: &Path,
        descriptor: &ModuleDescriptor,
        system: Arc<VersificationSystem>,
    ) -> Result<Self> {
        if !descriptor.kind().is_versified() || !descriptor.driver.is_supported() {
            return Err(FormatError::UnknownDriver(format!(
                "{} is not a verse driver",
                descriptor.driver.as_str()
            ))
            .into());
        }
        let codec = Codec::for_descriptor(descriptor)?;
        let wide = matches!(
            descriptor.driver,
            Driver::ZText4 | Driver::ZCom4 | Driver::RawText4 | Driver::RawCom4
        );

        let mut files = [None, None];
        for file in TestamentFile::ALL {
            files[file.slot()] = if descriptor.driver.is_compressed() {
                load_compressed(dir, file, wide)?
            } else {
                load_raw(dir, file, wide)?
            };
        }
        if files.iter().all(Option::is_none) {
            return Err(ScriptoriumError::corrupt_index(format!(
                "{}: no testament index in {}",
                descriptor.id,
                dir.display()
            )));
        }

        let layout = EntryLayout::new(&system);
        info!(
            versification = system.id(),
            codec = codec.name(),
            ot = files[0].is_some(),
            nt = files[1].is_some(),
            "verse module opened"
        );

        Ok(Self {
            module: descriptor.id.clone(),
            kind: descriptor.kind(),
            dialect: descriptor.dialect(),
            system,
            layout,
            codec,
            files,
            cache: BlockCache::default(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Bible or commentary.
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn system(&self) -> &Arc<VersificationSystem> {
        &self.system
    }

    /// Number of blocks decompressed since open.
    pub fn decompressions(&self) -> u64 {
        self.cache.decompressions()
    }

    /// Testaments with an index file in this module.
    pub fn testaments(&self) -> Vec<Testament> {
        let mut out = Vec::new();
        if self.files[TestamentFile::Old.slot()].is_some() {
            out.extend([Testament::Old, Testament::Apocrypha]);
        }
        if self.files[TestamentFile::New.slot()].is_some() {
            out.push(Testament::New);
        }
        out
    }

    /// Whether `address` is valid and its testament file is present.
    pub fn covers(&self, address: &VerseAddress) -> bool {
        self.layout
            .entry(&self.system, address)
            .is_ok_and(|(file, _)| self.files[file.slot()].is_some())
    }

    /// Fetch one verse.
    ///
    /// Empty entries (common in commentaries) yield an empty record.
    pub fn get_verse(&mut self, address: &VerseAddress) -> Result<RawRecord> {
        let (file, entry) = self.layout.entry(&self.system, address)?;
        let key = RecordKey::Verse(address.clone());
        let Self {
            files,
            cache,
            codec,
            dialect,
            ..
        } = self;

        let store = files[file.slot()]
            .as_ref()
            .ok_or_else(|| FormatError::AddressNotInModule(address.to_string()))?;
        let entry = usize::try_from(entry)
            .map_err(|_| ScriptoriumError::corrupt_index(format!("{address}: entry {entry}")))?;

        match store {
            TestamentStore::Raw { entries, text } => {
                let span = entries.get(entry).ok_or_else(|| beyond_index(address, entry))?;
                if span.size == 0 {
                    return Ok(RawRecord::empty(key, *dialect));
                }
                RawRecord::slice(
                    key,
                    *dialect,
                    Arc::clone(text),
                    span.offset as usize,
                    span.size as usize,
                )
            }
            TestamentStore::Compressed {
                blocks,
                buffers,
                blob,
            } => {
                let buffer = buffers.get(entry).ok_or_else(|| beyond_index(address, entry))?;
                if buffer.size == 0 {
                    return Ok(RawRecord::empty(key, *dialect));
                }
                let (number, block) = blocks.locate(entry, buffer)?;
                let compressed = index::span(
                    blob,
                    block.offset as usize,
                    block.compressed as usize,
                    "compressed block",
                )?;
                let arena = cache.fetch(
                    file.slot(),
                    number,
                    *codec,
                    compressed,
                    block.uncompressed as usize,
                )?;
                RawRecord::slice(
                    key,
                    *dialect,
                    arena,
                    buffer.start as usize,
                    buffer.size as usize,
                )
            }
        }
    }

    /// Lazily fetch `start..=end` in canonical order, skipping addresses whose
    /// testament the module does not carry.
    pub fn get_range(&mut self, start: &VerseAddress, end: &VerseAddress) -> Result<RangeIter<'_>> {
        let first = self.system.index_for_address(start)?;
        let last = self.system.index_for_address(end)?;
        if first > last {
            return Err(ScriptoriumError::validation(format!(
                "range start {start} comes after {end}"
            )));
        }
        Ok(RangeIter {
            decoder: self,
            next: first,
            end: last + 1,
        })
    }

    /// Every verse of the versification system the module covers.
    pub fn records(&mut self) -> RangeIter<'_> {
        let end = self.system.total_verses();
        RangeIter {
            decoder: self,
            next: 0,
            end,
        }
    }
}

fn beyond_index(address: &VerseAddress, entry: usize) -> ScriptoriumError {
    ScriptoriumError::corrupt_index(format!("{address}: entry {entry} beyond index"))
}

/// Forward-only iterator returned by [`VerseDecoder::get_range`].
#[derive(Debug)]
pub struct RangeIter<'a> {
    decoder: &'a mut VerseDecoder,
    next: u64,
    /// Exclusive.
    end: u64,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.end {
            let ordinal = self.next;
            self.next += 1;
            let address = match self.decoder.system.address_for_index(ordinal) {
                Ok(a) => a,
                Err(e) => return Some(Err(e)),
            };
            if self.decoder.covers(&address) {
                return Some(self.decoder.get_verse(&address));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn load_compressed(dir: &Path, file: TestamentFile, wide: bool) -> Result<Option<TestamentStore>> {
    // zCom modules sometimes ship `.czs/.czv/.czz` instead of `.bzs/...`.
    let Some(prefix) = ['b', 'c']
        .into_iter()
        .find(|p| dir.join(format!("{}.{p}zs", file.stem())).is_file())
    else {
        return Ok(None);
    };
    let path = |suffix: &str| -> PathBuf { dir.join(format!("{}.{prefix}{suffix}", file.stem())) };

    let blocks = index::block_entries(&index::read_file(&path("zs"))?)?;
    let buffers = index::buffer_entries(&index::read_file(&path("zv"))?, wide)?;
    let blob = index::read_file(&path("zz"))?;
    let blocks = BlockIndex::build(blocks, &buffers);
    debug!(
        file = file.stem(),
        blocks = blocks.len(),
        entries = buffers.len(),
        blob = blob.len(),
        "testament index loaded"
    );

    Ok(Some(TestamentStore::Compressed {
        blocks,
        buffers,
        blob,
    }))
}

fn load_raw(dir: &Path, file: TestamentFile, wide: bool) -> Result<Option<TestamentStore>> {
    let vss = dir.join(format!("{}.vss", file.stem()));
    if !vss.is_file() {
        return Ok(None);
    }
    let entries = index::span_entries(&index::read_file(&vss)?, wide, "verse index")?;
    let text = index::read_file(&dir.join(file.stem()))?;
    debug!(file = file.stem(), entries = entries.len(), "raw testament loaded");
    Ok(Some(TestamentStore::Raw {
        entries,
        text: Arc::from(text),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::VerseModuleWriter;
    use scriptorium_shared::parse_conf;
    use scriptorium_versification::Registry;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scriptorium-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn descriptor(driver: &str, extra: &str) -> ModuleDescriptor {
        let conf = format!(
            "[Test]\nDataPath=./modules/texts/ztext/test/\nModDrv={driver}\nSourceType=OSIS\n{extra}"
        );
        parse_conf(&conf, "test.conf").unwrap()
    }

    fn kjv() -> Arc<VersificationSystem> {
        Registry::builtin().unwrap().get("KJV").unwrap()
    }

    fn gen1(verse: u32) -> VerseAddress {
        VerseAddress::new("Gen", 1, verse)
    }

    const GEN_1: [&str; 5] = [
        "In the beginning God created the heaven and the earth.",
        "And the earth was without form, and void.",
        "And God said, Let there be light: and there was light.",
        "And God saw the light, that it was good.",
        "And God called the light Day.",
    ];

    fn write_genesis_block(dir: &Path) {
        let verses: Vec<(VerseAddress, &[u8])> = GEN_1
            .iter()
            .enumerate()
            .map(|(i, t)| (gen1(i as u32 + 1), t.as_bytes()))
            .collect();
        let mut writer = VerseModuleWriter::new(kjv(), Codec::Zlib);
        writer.block(&verses).unwrap();
        writer.write_compressed(dir, 'b').unwrap();
    }

    #[test]
    fn verse_three_decompresses_its_block_once() {
        let dir = temp_dir("ztext-e2e");
        write_genesis_block(&dir);

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        let record = decoder.get_verse(&gen1(3)).unwrap();
        assert_eq!(decoder.decompressions(), 1);
        assert_eq!(record.as_str().unwrap(), GEN_1[2]);

        // The slice must be exactly what the buffer index records for the entry.
        let layout = EntryLayout::new(&kjv());
        let (_, entry) = layout.entry(&kjv(), &gen1(3)).unwrap();
        let bzv = std::fs::read(dir.join("ot.bzv")).unwrap();
        let buffers = index::buffer_entries(&bzv, false).unwrap();
        let recorded = buffers[entry as usize];
        assert_eq!(record.offset(), recorded.start as usize);
        assert_eq!(record.len(), recorded.size as usize);
        assert_eq!(record.key, RecordKey::Verse(gen1(3)));
        assert_eq!(record.dialect, Dialect::Osis);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn two_verses_from_one_block_share_one_decompression() {
        let dir = temp_dir("ztext-cache");
        write_genesis_block(&dir);

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        let a = decoder.get_verse(&gen1(1)).unwrap();
        let b = decoder.get_verse(&gen1(5)).unwrap();
        assert_eq!(decoder.decompressions(), 1);
        assert!(a.shares_arena(&b));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_verse_twice_is_identical() {
        let dir = temp_dir("ztext-repeat");
        write_genesis_block(&dir);

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        let first = decoder.get_verse(&gen1(2)).unwrap();
        let second = decoder.get_verse(&gen1(2)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.bytes(), second.bytes());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn range_is_lazy_and_ordered() {
        let dir = temp_dir("ztext-range");
        write_genesis_block(&dir);

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        let texts: Vec<String> = decoder
            .get_range(&gen1(2), &gen1(4))
            .unwrap()
            .map(|r| r.unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, GEN_1[1..4].to_vec());
        assert_eq!(decoder.decompressions(), 1);

        assert!(decoder.get_range(&gen1(4), &gen1(2)).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unwritten_verse_is_empty() {
        let dir = temp_dir("ztext-empty");
        write_genesis_block(&dir);

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zCom", ""), kjv()).unwrap();
        let record = decoder.get_verse(&gen1(6)).unwrap();
        assert!(record.is_empty());
        assert_eq!(decoder.decompressions(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn old_testament_only_module_rejects_new_testament() {
        let dir = temp_dir("ztext-ot-only");
        write_genesis_block(&dir);

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        assert_eq!(decoder.testaments(), vec![Testament::Old, Testament::Apocrypha]);
        let err = decoder.get_verse(&VerseAddress::new("John", 1, 1)).unwrap_err();
        assert!(matches!(
            err,
            ScriptoriumError::Format(FormatError::AddressNotInModule(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn new_testament_only_module_is_indexed_from_matthew() {
        let dir = temp_dir("ztext-nt-only");
        let mut writer = VerseModuleWriter::new(kjv(), Codec::Zlib);
        writer
            .block(&[
                (VerseAddress::new("Matt", 1, 1), b"The book of the generation".as_slice()),
                (VerseAddress::new("John", 3, 16), b"For God so loved the world".as_slice()),
            ])
            .unwrap();
        writer.write_compressed(&dir, 'b').unwrap();
        assert!(!dir.join("ot.bzs").exists());

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        let record = decoder.get_verse(&VerseAddress::new("John", 3, 16)).unwrap();
        assert_eq!(record.as_str().unwrap(), "For God so loved the world");
        assert!(!decoder.covers(&gen1(1)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn commentary_reads_czs_files() {
        let dir = temp_dir("zcom-c");
        let mut writer = VerseModuleWriter::new(kjv(), Codec::Zlib);
        writer
            .block(&[(gen1(1), b"<p>Creation.</p>".as_slice())])
            .unwrap();
        writer.write_compressed(&dir, 'c').unwrap();

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zCom", ""), kjv()).unwrap();
        assert_eq!(decoder.get_verse(&gen1(1)).unwrap().as_str().unwrap(), "<p>Creation.</p>");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bzip2_and_wide_entries() {
        let dir = temp_dir("ztext4-bzip2");
        let mut writer = VerseModuleWriter::new(kjv(), Codec::Bzip2).wide();
        writer.block(&[(gen1(1), GEN_1[0].as_bytes())]).unwrap();
        writer.write_compressed(&dir, 'b').unwrap();

        let desc = descriptor("zText4", "CompressType=BZIP2\n");
        let mut decoder = VerseDecoder::open(&dir, &desc, kjv()).unwrap();
        assert_eq!(decoder.get_verse(&gen1(1)).unwrap().as_str().unwrap(), GEN_1[0]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn raw_text_slices_the_text_file() {
        let dir = temp_dir("rawtext");
        let mut writer = VerseModuleWriter::new(kjv(), Codec::Identity);
        writer
            .block(&[(gen1(1), GEN_1[0].as_bytes()), (gen1(2), GEN_1[1].as_bytes())])
            .unwrap();
        writer.write_raw(&dir).unwrap();

        let mut decoder = VerseDecoder::open(&dir, &descriptor("RawText", ""), kjv()).unwrap();
        let a = decoder.get_verse(&gen1(1)).unwrap();
        let b = decoder.get_verse(&gen1(2)).unwrap();
        assert_eq!(b.as_str().unwrap(), GEN_1[1]);
        assert!(a.shares_arena(&b));
        assert_eq!(decoder.decompressions(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn block_beyond_blob_is_corrupt() {
        let dir = temp_dir("ztext-corrupt");
        write_genesis_block(&dir);
        // Claim the single block is far larger than the blob.
        let mut bzs = std::fs::read(dir.join("ot.bzs")).unwrap();
        bzs[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(dir.join("ot.bzs"), bzs).unwrap();

        let mut decoder = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap();
        let err = decoder.get_verse(&gen1(1)).unwrap_err();
        assert!(matches!(err, ScriptoriumError::Format(FormatError::CorruptIndex(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unsupported_compression_fails_at_open() {
        let dir = temp_dir("ztext-xz");
        write_genesis_block(&dir);
        let err = VerseDecoder::open(&dir, &descriptor("zText", "CompressType=XZ\n"), kjv())
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptoriumError::Format(FormatError::UnsupportedCompression(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_directory_is_corrupt() {
        let dir = temp_dir("ztext-missing");
        let err = VerseDecoder::open(&dir, &descriptor("zText", ""), kjv()).unwrap_err();
        assert!(matches!(err, ScriptoriumError::Format(FormatError::CorruptIndex(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
