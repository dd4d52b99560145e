//! General books (RawGenBook): a flat, ordered sequence of entries.
//!
//! `.idx` holds one u32 offset per entry into `.bdt`; an entry runs to the
//! next offset, the last one to the end of the file. `.dat`, when present,
//! holds the tree of entry names as a sequence of nodes:
//!
//! ```text
//! parent i32 | next sibling i32 | first child i32 | name NUL | userdata len u16 | userdata
//! ```
//!
//! Links are byte offsets into `.dat` (-1 for none). The root node has no
//! parent; every other node, in file order, names the entry with the same
//! position.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use scriptorium_shared::{
    Dialect, FormatError, ModuleDescriptor, ModuleKind, RawRecord, RecordKey, Result,
    ScriptoriumError,
};

use crate::index;

#[derive(Debug)]
pub struct GenBookDecoder {
    module: String,
    dialect: Dialect,
    bdt: Arc<[u8]>,
    /// (offset, len) per entry.
    entries: Vec<(usize, usize)>,
    paths: Vec<Option<String>>,
}

impl GenBookDecoder {
    #[instrument(skip_all, fields(module = %descriptor.id, path = %path.display()))]
    pub fn open(path: &Path, descriptor: &ModuleDescriptor) -> Result<Self> {
        if descriptor.kind() != ModuleKind::GenBook {
            return Err(FormatError::UnknownDriver(format!(
                "{} is not a genbook driver",
                descriptor.driver.as_str()
            ))
            .into());
        }
        let prefix = index::find_prefix(path, "idx")?;
        let offsets = index::offsets(&index::read_file(&index::with_ext(&prefix, "idx"))?)?;
        let bdt: Arc<[u8]> = Arc::from(index::read_file(&index::with_ext(&prefix, "bdt"))?);

        let mut entries = Vec::with_capacity(offsets.len());
        for (i, &start) in offsets.iter().enumerate() {
            let start = start as usize;
            let end = offsets.get(i + 1).map_or(bdt.len(), |&next| next as usize);
            if start > end || end > bdt.len() {
                return Err(ScriptoriumError::corrupt_index(format!(
                    "genbook entry {i}: {start}..{end} outside {} bytes",
                    bdt.len()
                )));
            }
            entries.push((start, end - start));
        }

        let dat_path = index::with_ext(&prefix, "dat");
        let mut paths = vec![None; entries.len()];
        if dat_path.is_file() {
            match tree_paths(&index::read_file(&dat_path)?) {
                Ok(found) => {
                    if found.len() != entries.len() {
                        warn!(
                            nodes = found.len(),
                            entries = entries.len(),
                            "tree and index disagree on entry count"
                        );
                    }
                    for (slot, p) in paths.iter_mut().zip(found) {
                        *slot = Some(p);
                    }
                }
                Err(e) => warn!(error = %e, "tree keys unreadable, using entry numbers"),
            }
        }

        info!(entries = entries.len(), "genbook opened");
        Ok(Self {
            module: descriptor.id.clone(),
            dialect: descriptor.dialect(),
            bdt,
            entries,
            paths,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tree path of entry `index`, when `.dat` provided one.
    pub fn path(&self, index: usize) -> Option<&str> {
        self.paths.get(index).and_then(|p| p.as_deref())
    }

    /// Entry index for a tree path.
    pub fn find(&self, path: &str) -> Option<usize> {
        self.paths.iter().position(|p| p.as_deref() == Some(path))
    }

    pub fn get(&self, index: usize) -> Result<RawRecord> {
        let &(offset, len) = self.entries.get(index).ok_or_else(|| {
            FormatError::AddressNotInModule(format!("entry {index} of {}", self.module))
        })?;
        let body = index::span(&self.bdt, offset, len, "genbook entry")?;
        let len = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let key = RecordKey::Entry {
            index,
            path: self.paths[index].clone(),
        };
        RawRecord::slice(key, self.dialect, Arc::clone(&self.bdt), offset, len)
    }

    pub fn records(&self) -> impl Iterator<Item = Result<RawRecord>> + '_ {
        (0..self.entries.len()).map(|i| self.get(i))
    }
}

struct Node {
    parent: i32,
    name: String,
}

/// Full paths of every non-root node, in file order.
fn tree_paths(dat: &[u8]) -> Result<Vec<String>> {
    let mut nodes: Vec<(usize, Node)> = Vec::new();
    let mut at = 0usize;
    while at < dat.len() {
        let start = at;
        index::span(dat, at, 12, "tree node header")?;
        let parent = index::u32_at(dat, at, "tree node")? as i32;
        at += 12;
        let name_len = dat
            .get(at..)
            .and_then(|rest| rest.iter().position(|&b| b == 0))
            .ok_or_else(|| ScriptoriumError::corrupt_index(format!("tree node at {start}: unterminated name")))?;
        let name = String::from_utf8_lossy(&dat[at..at + name_len]).into_owned();
        at += name_len + 1;
        let user_len = index::span(dat, at, 2, "tree userdata length")?;
        let user_len = u16::from_le_bytes([user_len[0], user_len[1]]) as usize;
        index::span(dat, at + 2, user_len, "tree userdata")?;
        at += 2 + user_len;
        nodes.push((start, Node { parent, name }));
    }

    let by_offset: HashMap<usize, usize> = nodes.iter().enumerate().map(|(i, (o, _))| (*o, i)).collect();
    let mut paths = Vec::new();
    for (_, node) in &nodes {
        if node.parent < 0 {
            continue;
        }
        let mut parts = vec![node.name.as_str()];
        let mut parent = node.parent;
        // A well-formed tree is never deeper than its node count.
        for _ in 0..nodes.len() {
            if parent < 0 {
                break;
            }
            let &i = by_offset.get(&(parent as usize)).ok_or_else(|| {
                ScriptoriumError::corrupt_index(format!("tree parent {parent} is not a node"))
            })?;
            let (_, p) = &nodes[i];
            if p.parent >= 0 {
                parts.push(p.name.as_str());
            }
            parent = p.parent;
        }
        parts.reverse();
        paths.push(format!("/{}", parts.join("/")));
    }
    debug!(nodes = nodes.len(), "tree keys read");
    Ok(paths)
}
