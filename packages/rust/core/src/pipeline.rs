//! End-to-end `extract` pipeline: installed module → decoder → markup
//! conversion → assembled document.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use scriptorium_decoder::open_module;
use scriptorium_shared::{
    ModuleDescriptor, RawRecord, Result, ScriptoriumError, WarningKind, parse_conf_file,
};
use scriptorium_storage::{ESwordKind, ESwordModule};
use scriptorium_versification::{Registry, VersificationSystem};

use crate::assembler::{self, Document, Granularity, ModuleMeta, RecordFailure};

/// Book numbering used by e-Sword files.
const ESWORD_VERSIFICATION: &str = "KJV";

/// Configuration for the `extract_module` pipeline.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub granularity: Granularity,
    /// Store root for a conf file that does not sit in `<root>/mods.d/`.
    pub store_root: Option<PathBuf>,
    /// RFC 3339 timestamp recorded in the document.
    pub generated: String,
    pub tool_version: String,
    /// Also write the document here.
    pub output: Option<PathBuf>,
}

/// Result counters of one extraction.
#[derive(Debug, Clone)]
pub struct ExtractSummary {
    pub module: String,
    /// Records with content read from the module.
    pub records: usize,
    /// Verses and entries in the document.
    pub assembled: usize,
    /// Records whose markup was stripped to plain text.
    pub fallbacks: usize,
    pub failures: usize,
    pub output: Option<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Extraction {
    pub document: Document,
    pub summary: ExtractSummary,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each record is converted.
    fn record_converted(&self, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, summary: &ExtractSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record_converted(&self, _current: usize, _total: usize) {}
    fn done(&self, _summary: &ExtractSummary) {}
}

type RawOutcome = std::result::Result<RawRecord, RecordFailure>;

/// Everything read from a module before conversion.
struct ModuleContent {
    meta: ModuleMeta,
    system: Option<Arc<VersificationSystem>>,
    records: Vec<RawOutcome>,
}

enum Source {
    Sword {
        root: PathBuf,
        descriptor: ModuleDescriptor,
    },
    ESword(PathBuf),
}

/// Run the full `extract` pipeline.
///
/// `path` is one of:
/// - a conf file, normally `<root>/mods.d/<id>.conf`
/// - an unpacked module directory holding exactly one `mods.d/*.conf`
/// - an e-Sword file (`.bblx`, `.cmtx`, `.dctx`)
///
/// Per-record decode failures are collected into the document and never
/// abort the run.
#[instrument(skip_all, fields(path = %path.display(), granularity = %options.granularity))]
pub async fn extract_module(
    path: &Path,
    options: &ExtractOptions,
    registry: &Registry,
    progress: &dyn ProgressReporter,
) -> Result<Extraction> {
    let start = Instant::now();

    progress.phase("Opening module");
    let content = match resolve_source(path, options.store_root.as_deref())? {
        Source::Sword { root, descriptor } => read_sword(&root, &descriptor, registry, options)?,
        Source::ESword(file) => read_esword(&file, registry, options).await?,
    };
    let module = content.meta.module.clone();
    let records = content.records.iter().filter(|r| r.is_ok()).count();
    info!(%module, records, "module read");

    progress.phase("Converting markup");
    let total = content.records.len();
    let mut fallbacks = 0;
    let mut converted = Vec::with_capacity(total);
    for (i, item) in content.records.into_iter().enumerate() {
        converted.push(item.map(|raw| {
            let record = scriptorium_markup::convert(&raw);
            if record.warnings.iter().any(|w| w.kind == WarningKind::Fallback) {
                fallbacks += 1;
            }
            record
        }));
        progress.record_converted(i + 1, total);
    }

    progress.phase("Assembling");
    let document = assembler::assemble(
        converted,
        options.granularity,
        content.meta,
        content.system.as_deref(),
    );

    if let Some(out) = &options.output {
        progress.phase("Writing output");
        assembler::write_output(out, &document)?;
    }

    let summary = ExtractSummary {
        module,
        records,
        assembled: document.record_count(),
        fallbacks,
        failures: document.failures.len(),
        output: options.output.clone(),
        elapsed: start.elapsed(),
    };
    if summary.failures > 0 {
        warn!(failures = summary.failures, "some records could not be extracted");
    }
    info!(
        module = %summary.module,
        assembled = summary.assembled,
        fallbacks = summary.fallbacks,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "extraction complete"
    );
    progress.done(&summary);
    Ok(Extraction { document, summary })
}

fn resolve_source(path: &Path, store_root: Option<&Path>) -> Result<Source> {
    if ESwordKind::from_path(path).is_some() {
        return Ok(Source::ESword(path.to_path_buf()));
    }

    if path.is_dir() {
        let confs = conf_files(&path.join("mods.d"))?;
        return match confs.as_slice() {
            [conf] => Ok(Source::Sword {
                root: store_root.unwrap_or(path).to_path_buf(),
                descriptor: parse_conf_file(conf)?,
            }),
            [] => Err(ScriptoriumError::validation(format!(
                "no module conf under {}",
                path.join("mods.d").display()
            ))),
            many => Err(ScriptoriumError::validation(format!(
                "{} holds {} modules; pass one conf file",
                path.display(),
                many.len()
            ))),
        };
    }

    if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("conf")) {
        let descriptor = parse_conf_file(path)?;
        let root = match store_root {
            Some(root) => root.to_path_buf(),
            None => path
                .parent()
                .filter(|dir| dir.file_name().is_some_and(|n| n == "mods.d"))
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    ScriptoriumError::validation(format!(
                        "cannot tell the store root of {}; pass it explicitly",
                        path.display()
                    ))
                })?,
        };
        return Ok(Source::Sword { root, descriptor });
    }

    Err(ScriptoriumError::validation(format!(
        "{} is not a module directory, conf file or e-Sword module",
        path.display()
    )))
}

fn conf_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut confs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| ScriptoriumError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("conf")))
        .collect();
    confs.sort();
    Ok(confs)
}

fn read_sword(
    root: &Path,
    descriptor: &ModuleDescriptor,
    registry: &Registry,
    options: &ExtractOptions,
) -> Result<ModuleContent> {
    let mut reader = open_module(root, descriptor, registry)?;
    let system = if descriptor.kind().is_versified() {
        Some(registry.get(&descriptor.versification)?)
    } else {
        None
    };

    let mut records = Vec::new();
    for item in reader.records() {
        match item {
            Ok(record) if record.is_empty() => {}
            Ok(record) => records.push(Ok(record)),
            Err(e) => {
                warn!(module = %descriptor.id, error = %e, "record skipped");
                records.push(Err(RecordFailure::new(None, e.to_string())));
            }
        }
    }
    debug!(decompressions = reader.decompressions(), "module decoded");

    Ok(ModuleContent {
        meta: ModuleMeta {
            module: descriptor.id.clone(),
            kind: descriptor.kind(),
            versification: system.as_ref().map(|s| s.id().to_string()),
            description: descriptor.description.clone(),
            language: descriptor.language.clone(),
            license: descriptor.license_spdx(),
            generated: options.generated.clone(),
            tool_version: options.tool_version.clone(),
        },
        system,
        records,
    })
}

async fn read_esword(file: &Path, registry: &Registry, options: &ExtractOptions) -> Result<ModuleContent> {
    let system = registry.get(ESWORD_VERSIFICATION)?;
    let module = ESwordModule::open(file, Arc::clone(&system)).await?;
    let kind = module.kind().module_kind();

    let records = module
        .records()
        .await?
        .into_iter()
        .filter_map(|row| match row {
            Ok(record) if record.is_empty() => None,
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                warn!(error = %e, "row skipped");
                Some(Err(RecordFailure::new(None, e.to_string())))
            }
        })
        .collect();

    let versified = kind.is_versified();
    Ok(ModuleContent {
        meta: ModuleMeta {
            module: module.id(),
            kind,
            versification: versified.then(|| system.id().to_string()),
            description: module.details().and_then(|d| d.description.clone()),
            language: None,
            license: None,
            generated: options.generated.clone(),
            tool_version: options.tool_version.clone(),
        },
        system: versified.then_some(system),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use scriptorium_decoder::Codec;
    use scriptorium_decoder::writer::{DictionaryWriter, VerseModuleWriter};
    use scriptorium_shared::{AnnotationKind, ModuleKind, VerseAddress};

    const TINY_CONF: &str = "[Tiny]\nDataPath=./modules/texts/ztext/tiny/\nModDrv=zText\nSourceType=OSIS\n\
        Lang=en\nDescription=Tiny test Bible\nVersification=KJV\n";

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scriptorium-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn options() -> ExtractOptions {
        ExtractOptions {
            granularity: Granularity::Chapter,
            store_root: None,
            generated: "2026-01-01T00:00:00Z".into(),
            tool_version: "0.1.0-test".into(),
            output: None,
        }
    }

    /// A zText Bible with Gen 1:1-2 in one block and Matt 1:1 in the NT file.
    fn tiny_store(root: &Path, registry: &Registry) {
        std::fs::create_dir_all(root.join("mods.d")).unwrap();
        std::fs::write(root.join("mods.d/tiny.conf"), TINY_CONF).unwrap();

        let mut writer = VerseModuleWriter::new(registry.get("KJV").unwrap(), Codec::Zlib);
        writer
            .block(&[
                (
                    VerseAddress::new("Gen", 1, 1),
                    br#"In the <w lemma="strong:H7225">beginning</w> God"#.as_slice(),
                ),
                (
                    VerseAddress::new("Gen", 1, 2),
                    b"And the earth was without form".as_slice(),
                ),
            ])
            .unwrap();
        writer
            .block(&[(
                VerseAddress::new("Matt", 1, 1),
                br#"The <w lemma="strong:G976">book</q> of the generation"#.as_slice(),
            )])
            .unwrap();
        writer
            .write_compressed(&root.join("modules/texts/ztext/tiny"), 'b')
            .unwrap();
    }

    #[derive(Default)]
    struct CountingProgress {
        phases: AtomicUsize,
        converted: AtomicUsize,
        done: AtomicUsize,
    }

    impl ProgressReporter for CountingProgress {
        fn phase(&self, _name: &str) {
            self.phases.fetch_add(1, Ordering::SeqCst);
        }
        fn record_converted(&self, _current: usize, _total: usize) {
            self.converted.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _summary: &ExtractSummary) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn extracts_a_bible_from_its_conf() {
        let root = temp_dir("extract-conf");
        let registry = Registry::builtin().unwrap();
        tiny_store(&root, &registry);

        let result = extract_module(&root.join("mods.d/tiny.conf"), &options(), &registry, &SilentProgress)
            .await
            .unwrap();
        let doc = &result.document;

        assert_eq!(doc.meta.module.module, "Tiny");
        assert_eq!(doc.meta.module.kind, ModuleKind::Bible);
        assert_eq!(doc.meta.module.description.as_deref(), Some("Tiny test Bible"));
        let ids: Vec<&str> = doc.books.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["Gen", "Matt"]);

        let first = &doc.books[0].chapters[0].verses[0];
        assert_eq!(first.text, "In the beginning God");
        assert_eq!(first.annotations[0].kind, AnnotationKind::Strongs);
        assert_eq!(first.annotations[0].value.as_deref(), Some("H7225"));

        let matthew = &doc.books[1].chapters[0].verses[0];
        assert_eq!(matthew.text, "The book of the generation");
        assert_eq!(result.summary.records, 3);
        assert_eq!(result.summary.assembled, 3);
        assert_eq!(result.summary.fallbacks, 1);
        assert!(doc.excluded_books.iter().any(|b| b.id == "Exod"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn extracts_from_module_dir_and_writes_output() {
        let root = temp_dir("extract-dir");
        let registry = Registry::builtin().unwrap();
        tiny_store(&root, &registry);
        let out = root.join("out/tiny.json");
        let opts = ExtractOptions {
            granularity: Granularity::Verse,
            output: Some(out.clone()),
            ..options()
        };
        let progress = CountingProgress::default();

        let result = extract_module(&root, &opts, &registry, &progress).await.unwrap();

        assert_eq!(result.document.verses.len(), 3);
        assert_eq!(result.summary.output.as_deref(), Some(out.as_path()));
        let written: Document = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written, result.document);
        assert_eq!(progress.converted.load(Ordering::SeqCst), 3);
        assert_eq!(progress.phases.load(Ordering::SeqCst), 4);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn extracts_dictionary_entries() {
        let root = temp_dir("extract-dict");
        let registry = Registry::builtin().unwrap();
        std::fs::create_dir_all(root.join("mods.d")).unwrap();
        std::fs::write(
            root.join("mods.d/names.conf"),
            "[Names]\nDataPath=./modules/lexdict/zld/names/dict\nModDrv=zLD\n",
        )
        .unwrap();
        let mut writer = DictionaryWriter::new(4);
        writer.entry("Adam", b"man").entry("Abel", b"breath");
        writer
            .write_compressed(&root.join("modules/lexdict/zld/names/dict"), Codec::Zlib)
            .unwrap();

        let result = extract_module(&root, &options(), &registry, &SilentProgress)
            .await
            .unwrap();
        let doc = &result.document;

        assert_eq!(doc.meta.module.kind, ModuleKind::Dictionary);
        assert_eq!(doc.meta.module.versification, None);
        assert!(doc.books.is_empty());
        assert!(doc.excluded_books.is_empty());
        let texts: Vec<&str> = doc.entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["breath", "man"]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn conf_outside_a_store_needs_a_root() {
        let root = temp_dir("extract-loose");
        let registry = Registry::builtin().unwrap();
        tiny_store(&root, &registry);
        let loose = root.join("tiny.conf");
        std::fs::copy(root.join("mods.d/tiny.conf"), &loose).unwrap();

        let err = extract_module(&loose, &options(), &registry, &SilentProgress).await;
        assert!(err.is_err());

        let opts = ExtractOptions {
            store_root: Some(root.clone()),
            ..options()
        };
        let result = extract_module(&loose, &opts, &registry, &SilentProgress).await.unwrap();
        assert_eq!(result.summary.assembled, 3);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unknown_paths_are_rejected() {
        let root = temp_dir("extract-unknown");
        let registry = Registry::builtin().unwrap();
        let file = root.join("notes.txt");
        std::fs::write(&file, "hello").unwrap();

        assert!(extract_module(&file, &options(), &registry, &SilentProgress).await.is_err());
        assert!(extract_module(&root, &options(), &registry, &SilentProgress).await.is_err());

        let _ = std::fs::remove_dir_all(&root);
    }
}
