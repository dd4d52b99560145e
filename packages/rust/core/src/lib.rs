//! Extraction workflows for Scriptorium.
//!
//! This crate ties the decoders, the markup converters and the content
//! assembler together into end-to-end workflows (e.g., `extract_module`).

pub mod assembler;
pub mod pipeline;

pub use assembler::{
    BookContent, ChapterContent, Document, DocumentMeta, EntryContent, ExcludedBook, Granularity,
    ModuleMeta, RecordFailure, VerseContent, assemble, to_json, write_output,
};
pub use pipeline::{ExtractOptions, ExtractSummary, Extraction, ProgressReporter, SilentProgress, extract_module};
