//! Fixed-width little-endian index tables and module file helpers.
//!
//! | Table | Width | Fields |
//! |---|---|---|
//! | block index (`.bzs`) | 12 | offset u32, compressed u32, uncompressed u32 |
//! | buffer index (`.bzv`) | 10 / 12 | block u32, start u32, size u16 / u32 |
//! | raw verse index (`.vss`) | 6 / 8 | offset u32, size u16 / u32 |
//! | key index (`.idx`), block index (`.zdx`) | 8 | offset u32, size u32 |
//! | raw key index (`.idx` for RawLD) | 6 | offset u32, size u16 |
//! | genbook index (`.idx`) | 4 | offset u32 |

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use scriptorium_shared::{Result, ScriptoriumError};

// ---------------------------------------------------------------------------
// Table decoding
// ---------------------------------------------------------------------------

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

/// Split `bytes` into `width`-sized records. A trailing partial record means
/// the table is truncated.
fn records<T>(bytes: &[u8], width: usize, what: &str, decode: impl Fn(&[u8]) -> T) -> Result<Vec<T>> {
    if bytes.len() % width != 0 {
        return Err(ScriptoriumError::corrupt_index(format!(
            "{what}: {} bytes is not a multiple of {width}",
            bytes.len()
        )));
    }
    Ok(bytes.chunks_exact(width).map(decode).collect())
}

/// Read a little-endian u32 at `at`, bounds-checked.
pub(crate) fn u32_at(bytes: &[u8], at: usize, what: &str) -> Result<u32> {
    at.checked_add(4)
        .and_then(|end| bytes.get(at..end))
        .map(le_u32)
        .ok_or_else(|| {
            ScriptoriumError::corrupt_index(format!(
                "{what}: u32 at {at} beyond {} bytes",
                bytes.len()
            ))
        })
}

/// Bounds-checked `bytes[offset..offset+len]`.
pub(crate) fn span<'a>(bytes: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| {
            ScriptoriumError::corrupt_index(format!(
                "{what}: {offset}+{len} exceeds {} bytes",
                bytes.len()
            ))
        })
}

/// One compressed block of a zText/zCom testament file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockEntry {
    pub offset: u32,
    pub compressed: u32,
    pub uncompressed: u32,
}

pub(crate) fn block_entries(bytes: &[u8]) -> Result<Vec<BlockEntry>> {
    records(bytes, 12, "block index", |b| BlockEntry {
        offset: le_u32(b),
        compressed: le_u32(&b[4..]),
        uncompressed: le_u32(&b[8..]),
    })
}

/// Location of one verse entry inside a decompressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferEntry {
    pub block: u32,
    pub start: u32,
    pub size: u32,
}

/// `wide` selects the 12-byte layout used by the `*4` drivers.
pub(crate) fn buffer_entries(bytes: &[u8], wide: bool) -> Result<Vec<BufferEntry>> {
    if wide {
        records(bytes, 12, "buffer index", |b| BufferEntry {
            block: le_u32(b),
            start: le_u32(&b[4..]),
            size: le_u32(&b[8..]),
        })
    } else {
        records(bytes, 10, "buffer index", |b| BufferEntry {
            block: le_u32(b),
            start: le_u32(&b[4..]),
            size: u32::from(le_u16(&b[8..])),
        })
    }
}

/// Offset/size pair into an uncompressed data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpanEntry {
    pub offset: u32,
    pub size: u32,
}

/// `.vss`, `.idx` and `.zdx` tables. `wide` selects 8-byte entries over 6.
pub(crate) fn span_entries(bytes: &[u8], wide: bool, what: &str) -> Result<Vec<SpanEntry>> {
    if wide {
        records(bytes, 8, what, |b| SpanEntry {
            offset: le_u32(b),
            size: le_u32(&b[4..]),
        })
    } else {
        records(bytes, 6, what, |b| SpanEntry {
            offset: le_u32(b),
            size: u32::from(le_u16(&b[4..])),
        })
    }
}

/// Genbook `.idx`: bare 4-byte offsets.
pub(crate) fn offsets(bytes: &[u8]) -> Result<Vec<u32>> {
    records(bytes, 4, "genbook index", le_u32)
}

// ---------------------------------------------------------------------------
// BlockIndex
// ---------------------------------------------------------------------------

/// Range of entry ordinals stored in one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockSpan {
    block: u32,
    first: usize,
    last: usize,
}

/// Block table plus the entry span of each block, derived from the buffer
/// index at open.
#[derive(Debug, Clone)]
pub(crate) struct BlockIndex {
    blocks: Vec<BlockEntry>,
    /// Sorted by `first`.
    spans: Vec<BlockSpan>,
    /// False when spans overlap (out-of-order or linked entries); lookups
    /// then trust the buffer entry alone.
    ordered: bool,
}

impl BlockIndex {
    pub(crate) fn build(blocks: Vec<BlockEntry>, buffers: &[BufferEntry]) -> Self {
        let mut spans: Vec<BlockSpan> = Vec::new();
        let mut by_block: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();

        for (ordinal, entry) in buffers.iter().enumerate() {
            if entry.size == 0 {
                continue;
            }
            match by_block.get(&entry.block) {
                Some(&i) => {
                    let span = &mut spans[i];
                    span.first = span.first.min(ordinal);
                    span.last = span.last.max(ordinal);
                }
                None => {
                    by_block.insert(entry.block, spans.len());
                    spans.push(BlockSpan {
                        block: entry.block,
                        first: ordinal,
                        last: ordinal,
                    });
                }
            }
        }

        spans.sort_by_key(|s| s.first);
        let ordered = spans.windows(2).all(|w| w[0].last < w[1].first);
        Self {
            blocks,
            spans,
            ordered,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Find the block holding entry `ordinal` and check it against `entry`.
    ///
    /// With non-overlapping spans the search must land on the entry's own
    /// block; a miss or a different block is `CorruptIndex`. Overlapping
    /// spans (linked entries) fall back to the buffer entry.
    pub(crate) fn locate(&self, ordinal: usize, entry: &BufferEntry) -> Result<(usize, BlockEntry)> {
        if self.ordered && entry.size > 0 {
            let i = self.spans.partition_point(|s| s.last < ordinal);
            let searched = self
                .spans
                .get(i)
                .filter(|s| s.first <= ordinal)
                .map(|s| s.block);
            match searched {
                Some(block) if block == entry.block => {}
                Some(block) => {
                    return Err(ScriptoriumError::corrupt_index(format!(
                        "entry {ordinal} names block {}, its span lies in block {block}",
                        entry.block
                    )));
                }
                None => {
                    return Err(ScriptoriumError::corrupt_index(format!(
                        "entry {ordinal} lies outside every block span"
                    )));
                }
            }
        }
        let number = entry.block as usize;

        let block = self.blocks.get(number).copied().ok_or_else(|| {
            ScriptoriumError::corrupt_index(format!(
                "entry {ordinal} names block {number}, index has {}",
                self.blocks.len()
            ))
        })?;
        Ok((number, block))
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// `prefix` with `.ext` appended (not replacing any existing extension).
pub(crate) fn with_ext(prefix: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| ScriptoriumError::io(path, e))
}

/// Resolve the file prefix of a dictionary or genbook module.
///
/// `path` is tried as a prefix first (`<path>.<ext>`). When it is a
/// directory, the first `*.<ext>` file inside it (by name) is used.
pub(crate) fn find_prefix(path: &Path, ext: &str) -> Result<PathBuf> {
    if with_ext(path, ext).is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        let read = std::fs::read_dir(path).map_err(|e| ScriptoriumError::io(path, e))?;
        let mut stems: Vec<PathBuf> = read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == ext))
            .filter_map(|p| p.file_stem().map(|s| path.join(s)))
            .collect();
        stems.sort();
        if let Some(first) = stems.into_iter().next() {
            return Ok(first);
        }
    }
    Err(ScriptoriumError::corrupt_index(format!(
        "no .{ext} file at {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(block: u32, size: u32) -> BufferEntry {
        BufferEntry {
            block,
            start: 0,
            size,
        }
    }

    fn blocks(n: usize) -> Vec<BlockEntry> {
        vec![
            BlockEntry {
                offset: 0,
                compressed: 0,
                uncompressed: 0
            };
            n
        ]
    }

    #[test]
    fn narrow_and_wide_buffer_entries() {
        let mut narrow = Vec::new();
        narrow.extend_from_slice(&7u32.to_le_bytes());
        narrow.extend_from_slice(&40u32.to_le_bytes());
        narrow.extend_from_slice(&12u16.to_le_bytes());
        assert_eq!(
            buffer_entries(&narrow, false).unwrap(),
            vec![BufferEntry {
                block: 7,
                start: 40,
                size: 12
            }]
        );
        assert!(buffer_entries(&narrow, true).is_err());
    }

    #[test]
    fn truncated_table_is_corrupt() {
        let err = block_entries(&[0u8; 13]).unwrap_err();
        assert!(err.to_string().contains("corrupt index"));
    }

    #[test]
    fn span_checks_bounds() {
        let data = [1u8, 2, 3, 4];
        assert_eq!(span(&data, 1, 2, "t").unwrap(), &[2, 3]);
        assert!(span(&data, 3, 2, "t").is_err());
        assert!(span(&data, usize::MAX, 2, "t").is_err());
        assert!(u32_at(&data, 1, "t").is_err());
    }

    #[test]
    fn locate_uses_entry_spans() {
        // Entries 0-1 headings, 2-4 in block 0, 5-6 empty, 7-8 in block 1.
        let buffers = vec![
            buffer(0, 0),
            buffer(0, 0),
            buffer(0, 5),
            buffer(0, 5),
            buffer(0, 5),
            buffer(0, 0),
            buffer(0, 0),
            buffer(1, 5),
            buffer(1, 5),
        ];
        let index = BlockIndex::build(blocks(2), &buffers);
        assert!(index.ordered);
        assert_eq!(index.locate(3, &buffers[3]).unwrap().0, 0);
        assert_eq!(index.locate(8, &buffers[8]).unwrap().0, 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn linked_entry_falls_back_to_buffer_block() {
        let buffers = vec![buffer(0, 5), buffer(1, 5), buffer(0, 5)];
        let index = BlockIndex::build(blocks(2), &buffers);
        assert!(!index.ordered);
        assert_eq!(index.locate(2, &buffers[2]).unwrap().0, 0);
    }

    #[test]
    fn entry_disagreeing_with_its_span_is_corrupt() {
        let buffers = vec![buffer(0, 5), buffer(0, 5), buffer(1, 5), buffer(1, 5)];
        let index = BlockIndex::build(blocks(2), &buffers);
        assert!(index.ordered);

        // Ordinal 1 sits in block 0's span but the entry names block 1.
        let err = index.locate(1, &buffer(1, 5)).unwrap_err();
        assert!(err.to_string().contains("corrupt index"));

        // Beyond the last span.
        let err = index.locate(9, &buffer(1, 5)).unwrap_err();
        assert!(err.to_string().contains("corrupt index"));

        assert_eq!(index.locate(1, &buffers[1]).unwrap().0, 0);
    }

    #[test]
    fn block_number_beyond_table_is_corrupt() {
        let buffers = vec![buffer(4, 5)];
        let index = BlockIndex::build(blocks(1), &buffers);
        assert!(index.locate(0, &buffers[0]).is_err());
    }
}
