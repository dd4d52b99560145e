//! Writers for the binary module formats.
//!
//! Used to build fixtures; they produce exactly the layouts the decoders read.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use scriptorium_shared::{Result, ScriptoriumError, VerseAddress};
use scriptorium_versification::VersificationSystem;

use crate::codec::Codec;
use crate::index::with_ext;
use crate::layout::{EntryLayout, TestamentFile};

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ScriptoriumError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| ScriptoriumError::io(path, e))
}

fn narrow(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| ScriptoriumError::validation(format!("{what} {value} needs a wide index")))
}

fn le32(out: &mut Vec<u8>, value: usize) -> Result<()> {
    let v = u32::try_from(value)
        .map_err(|_| ScriptoriumError::validation(format!("{value} does not fit in u32")))?;
    out.extend_from_slice(&v.to_le_bytes());
    Ok(())
}

// ---------------------------------------------------------------------------
// Verse modules
// ---------------------------------------------------------------------------

/// Builds zText/zCom and RawText/RawCom testament files.
///
/// Each call to [`VerseModuleWriter::block`] becomes one compressed block.
/// Only testament files that received verses are written; the index of a
/// written file covers every entry of that testament.
#[derive(Debug)]
pub struct VerseModuleWriter {
    system: Arc<VersificationSystem>,
    layout: EntryLayout,
    codec: Codec,
    wide: bool,
    /// Per file slot: blocks of (entry, text).
    blocks: [Vec<Vec<(u64, Vec<u8>)>>; 2],
}

impl VerseModuleWriter {
    pub fn new(system: Arc<VersificationSystem>, codec: Codec) -> Self {
        let layout = EntryLayout::new(&system);
        Self {
            system,
            layout,
            codec,
            wide: false,
            blocks: [Vec::new(), Vec::new()],
        }
    }

    /// Use the 4-byte size fields of the `*4` drivers.
    pub fn wide(mut self) -> Self {
        self.wide = true;
        self
    }

    /// Add one block. All verses must belong to the same testament file.
    pub fn block(&mut self, verses: &[(VerseAddress, &[u8])]) -> Result<&mut Self> {
        let mut file = None;
        let mut block = Vec::with_capacity(verses.len());
        for (address, text) in verses {
            let (f, entry) = self.layout.entry(&self.system, address)?;
            if file.is_some_and(|prev| prev != f) {
                return Err(ScriptoriumError::validation(format!(
                    "{address} is in a different testament file than the rest of the block"
                )));
            }
            file = Some(f);
            block.push((entry, text.to_vec()));
        }
        if let Some(f) = file {
            self.blocks[f.slot()].push(block);
        }
        Ok(self)
    }

    /// Write `{ot,nt}.{p}zs/{p}zv/{p}zz` into `dir`, `p` being `b` or `c`.
    pub fn write_compressed(&self, dir: &Path, prefix: char) -> Result<()> {
        for file in TestamentFile::ALL {
            let blocks = &self.blocks[file.slot()];
            if blocks.is_empty() {
                continue;
            }
            let total = self.layout.total(file) as usize;
            let width = if self.wide { 12 } else { 10 };
            let mut bzv = vec![0u8; total * width];
            let mut bzs = Vec::new();
            let mut bzz = Vec::new();

            for (number, block) in blocks.iter().enumerate() {
                let mut text = Vec::new();
                for (entry, bytes) in block {
                    let at = *entry as usize * width;
                    let slot = &mut bzv[at..at + width];
                    slot[..4].copy_from_slice(&(number as u32).to_le_bytes());
                    slot[4..8].copy_from_slice(&(text.len() as u32).to_le_bytes());
                    if self.wide {
                        slot[8..12].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                    } else {
                        slot[8..10].copy_from_slice(&narrow(bytes.len(), "verse size")?.to_le_bytes());
                    }
                    text.extend_from_slice(bytes);
                }
                let packed = self.codec.compress(&text)?;
                le32(&mut bzs, bzz.len())?;
                le32(&mut bzs, packed.len())?;
                le32(&mut bzs, text.len())?;
                bzz.extend_from_slice(&packed);
            }

            let name = |suffix: &str| dir.join(format!("{}.{prefix}{suffix}", file.stem()));
            write(&name("zs"), &bzs)?;
            write(&name("zv"), &bzv)?;
            write(&name("zz"), &bzz)?;
        }
        Ok(())
    }

    /// Write `{ot,nt}.vss` plus the `ot`/`nt` text files. Block grouping is
    /// ignored.
    pub fn write_raw(&self, dir: &Path) -> Result<()> {
        for file in TestamentFile::ALL {
            let blocks = &self.blocks[file.slot()];
            if blocks.is_empty() {
                continue;
            }
            let total = self.layout.total(file) as usize;
            let width = if self.wide { 8 } else { 6 };
            let mut vss = vec![0u8; total * width];
            let mut text = Vec::new();
            for (entry, bytes) in blocks.iter().flatten() {
                let at = *entry as usize * width;
                let slot = &mut vss[at..at + width];
                slot[..4].copy_from_slice(&(text.len() as u32).to_le_bytes());
                if self.wide {
                    slot[4..8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                } else {
                    slot[4..6].copy_from_slice(&narrow(bytes.len(), "verse size")?.to_le_bytes());
                }
                text.extend_from_slice(bytes);
            }
            write(&dir.join(format!("{}.vss", file.stem())), &vss)?;
            write(&dir.join(file.stem()), &text)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dictionaries
// ---------------------------------------------------------------------------

/// Builds zLD and RawLD files. Keys are written upper-cased and sorted.
#[derive(Debug)]
pub struct DictionaryWriter {
    per_block: usize,
    entries: BTreeMap<String, Vec<u8>>,
}

impl DictionaryWriter {
    /// `per_block` entries share one compressed block (zLD only).
    pub fn new(per_block: usize) -> Self {
        Self {
            per_block: per_block.max(1),
            entries: BTreeMap::new(),
        }
    }

    pub fn entry(&mut self, key: &str, body: &[u8]) -> &mut Self {
        self.entries.insert(key.trim().to_uppercase(), body.to_vec());
        self
    }

    /// Write `<prefix>.idx/.dat/.zdx/.zdt`.
    pub fn write_compressed(&self, prefix: &Path, codec: Codec) -> Result<()> {
        let mut idx = Vec::new();
        let mut dat = Vec::new();
        let mut zdx = Vec::new();
        let mut zdt = Vec::new();

        let entries: Vec<(&String, &Vec<u8>)> = self.entries.iter().collect();
        for (number, chunk) in entries.chunks(self.per_block).enumerate() {
            let header_len = 4 + chunk.len() * 8;
            let mut header = Vec::with_capacity(header_len);
            let mut bodies = Vec::new();
            le32(&mut header, chunk.len())?;

            for (slot, (key, body)) in chunk.iter().enumerate() {
                le32(&mut header, header_len + bodies.len())?;
                le32(&mut header, body.len() + 1)?;
                bodies.extend_from_slice(body);
                bodies.push(0);

                le32(&mut idx, dat.len())?;
                le32(&mut idx, key.len() + 1 + 8)?;
                dat.extend_from_slice(key.as_bytes());
                dat.push(b'\n');
                le32(&mut dat, number)?;
                le32(&mut dat, slot)?;
            }

            header.extend_from_slice(&bodies);
            let packed = codec.compress(&header)?;
            le32(&mut zdx, zdt.len())?;
            le32(&mut zdx, packed.len())?;
            zdt.extend_from_slice(&packed);
        }

        write(&with_ext(prefix, "idx"), &idx)?;
        write(&with_ext(prefix, "dat"), &dat)?;
        write(&with_ext(prefix, "zdx"), &zdx)?;
        write(&with_ext(prefix, "zdt"), &zdt)
    }

    /// Write `<prefix>.idx/.dat` with the body stored after each key.
    /// `wide` selects the RawLD4 index.
    pub fn write_raw(&self, prefix: &Path, wide: bool) -> Result<()> {
        let mut idx = Vec::new();
        let mut dat = Vec::new();
        for (key, body) in &self.entries {
            let size = key.len() + 1 + body.len();
            le32(&mut idx, dat.len())?;
            if wide {
                le32(&mut idx, size)?;
            } else {
                idx.extend_from_slice(&narrow(size, "entry size")?.to_le_bytes());
            }
            dat.extend_from_slice(key.as_bytes());
            dat.push(b'\n');
            dat.extend_from_slice(body);
        }
        write(&with_ext(prefix, "idx"), &idx)?;
        write(&with_ext(prefix, "dat"), &dat)
    }
}

// ---------------------------------------------------------------------------
// General books
// ---------------------------------------------------------------------------

/// Builds RawGenBook files with a flat tree: every entry is a child of the root.
#[derive(Debug, Default)]
pub struct GenBookWriter {
    entries: Vec<(String, Vec<u8>)>,
}

impl GenBookWriter {
    pub fn entry(&mut self, name: &str, body: &[u8]) -> &mut Self {
        self.entries.push((name.to_string(), body.to_vec()));
        self
    }

    /// Write `<prefix>.idx/.bdt/.dat`.
    pub fn write(&self, prefix: &Path) -> Result<()> {
        let mut idx = Vec::new();
        let mut bdt = Vec::new();
        for (_, body) in &self.entries {
            le32(&mut idx, bdt.len())?;
            bdt.extend_from_slice(body);
        }

        let mut dat = Vec::new();
        let node_len = |name: &str| 12 + name.len() + 1 + 2 + 8;
        let root_len = node_len("");
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut at = root_len;
        for (name, _) in &self.entries {
            offsets.push(at);
            at += node_len(name);
        }

        let link = |o: Option<&usize>| o.map_or(-1i32, |&v| v as i32);
        push_node(&mut dat, -1, -1, link(offsets.first()), "", (0, 0));
        let mut bdt_at = 0usize;
        for (i, (name, body)) in self.entries.iter().enumerate() {
            push_node(&mut dat, 0, link(offsets.get(i + 1)), -1, name, (bdt_at, body.len()));
            bdt_at += body.len();
        }

        write(&with_ext(prefix, "idx"), &idx)?;
        write(&with_ext(prefix, "bdt"), &bdt)?;
        write(&with_ext(prefix, "dat"), &dat)
    }
}

fn push_node(dat: &mut Vec<u8>, parent: i32, next: i32, child: i32, name: &str, data: (usize, usize)) {
    dat.extend_from_slice(&parent.to_le_bytes());
    dat.extend_from_slice(&next.to_le_bytes());
    dat.extend_from_slice(&child.to_le_bytes());
    dat.extend_from_slice(name.as_bytes());
    dat.push(0);
    dat.extend_from_slice(&8u16.to_le_bytes());
    dat.extend_from_slice(&(data.0 as u32).to_le_bytes());
    dat.extend_from_slice(&(data.1 as u32).to_le_bytes());
}
