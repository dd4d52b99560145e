//! Markup conversion: embedded markup dialects to normalized text plus
//! structured annotations.
//!
//! Every dialect implements [`Converter`]. Conversion never fails: markup
//! the dialect cannot parse (unterminated or unbalanced tags, invalid UTF-8)
//! is tag-stripped for that one record and a `Fallback` warning is attached.
//!
//! ```text
//! <w lemma="strong:G2316">God</w>  →  text "God", Strongs "G2316" over 0..3
//! ```

mod builder;
mod gbf;
mod lexer;
mod osis;
mod rtf;
mod tei;
mod thml;
mod xml;

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use scriptorium_shared::{ConvertedRecord, Dialect, RawRecord, Result, WarningKind};

pub use builder::{SpanId, TextBuilder};
pub use gbf::GbfConverter;
pub use lexer::decode_entities;
pub use osis::OsisConverter;
pub use rtf::RtfConverter;
pub use tei::TeiConverter;
pub use thml::ThmlConverter;

pub trait Converter: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Strict conversion into `out`. An error means the markup is malformed;
    /// whatever was written to `out` is discarded.
    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()>;

    /// Best-effort text for markup [`Converter::render`] rejected.
    fn strip(&self, markup: &str) -> String {
        strip_tags(markup)
    }

    fn convert(&self, raw: &RawRecord) -> ConvertedRecord {
        let reason = match std::str::from_utf8(raw.bytes()) {
            Ok(markup) => {
                let mut out = TextBuilder::new();
                match self.render(markup, &mut out) {
                    Ok(()) => return out.finish(raw.key.clone(), raw.end.clone()),
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => format!("invalid UTF-8: {e}"),
        };

        warn!(key = %raw.key, dialect = ?self.dialect(), reason = %reason, "markup stripped to plain text");
        let markup = String::from_utf8_lossy(raw.bytes());
        let mut out = TextBuilder::new();
        out.push_text(&self.strip(&markup));
        out.warn(WarningKind::Fallback, reason);
        out.finish(raw.key.clone(), raw.end.clone())
    }
}

/// Text with no markup at all; only whitespace is normalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainConverter;

impl Converter for PlainConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Plain
    }

    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()> {
        out.push_text(markup);
        Ok(())
    }
}

pub fn converter_for(dialect: Dialect) -> &'static dyn Converter {
    match dialect {
        Dialect::Osis => &OsisConverter,
        Dialect::Gbf => &GbfConverter,
        Dialect::Thml => &ThmlConverter,
        Dialect::Tei => &TeiConverter,
        Dialect::Rtf => &RtfConverter,
        Dialect::Plain => &PlainConverter,
    }
}

/// Convert a record with the converter for its own dialect.
pub fn convert(raw: &RawRecord) -> ConvertedRecord {
    converter_for(raw.dialect).convert(raw)
}

// ---------------------------------------------------------------------------
// Fallback tag stripping
// ---------------------------------------------------------------------------

/// Note and footnote bodies, dropped whole.
static ASIDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<note\b[^>]*>.*?</note>|<RF>.*?<Rf>|<RX>.*?<Rx>").expect("valid regex")
});

/// Block-level tags, replaced by a space so words do not run together.
static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:p|br|l|lg|lb|div|li|h[1-6]|title|verse|CM|CL)\b[^>]*>").expect("valid regex")
});

/// Any other tag, including one cut off at the end of the record.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>?").expect("valid regex"));

pub(crate) fn strip_tags(markup: &str) -> String {
    let text = ASIDE_RE.replace_all(markup, "");
    let text = BLOCK_TAG_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, "");
    decode_entities(&text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_shared::{AnnotationKind, RecordKey, VerseAddress};

    fn raw(dialect: Dialect, markup: &[u8]) -> RawRecord {
        RawRecord::owned(
            RecordKey::Verse(VerseAddress::new("John", 11, 35)),
            dialect,
            markup.to_vec(),
        )
    }

    #[test]
    fn dispatches_on_the_record_dialect() {
        for dialect in [
            Dialect::Osis,
            Dialect::Gbf,
            Dialect::Thml,
            Dialect::Tei,
            Dialect::Rtf,
            Dialect::Plain,
        ] {
            assert_eq!(converter_for(dialect).dialect(), dialect);
        }
        let record = convert(&raw(Dialect::Plain, b"Jesus\n   wept."));
        assert_eq!(record.text, "Jesus wept.");
        assert!(record.annotations.is_empty());
        assert!(record.warnings.is_empty());
    }

    #[test]
    fn key_and_range_end_carry_over() {
        let record = RawRecord::owned(
            RecordKey::Verse(VerseAddress::new("Gen", 1, 1)),
            Dialect::Plain,
            b"note".to_vec(),
        )
        .with_end(Some(VerseAddress::new("Gen", 1, 3)));
        let converted = convert(&record);
        assert_eq!(converted.key, record.key);
        assert_eq!(converted.end, Some(VerseAddress::new("Gen", 1, 3)));
    }

    #[test]
    fn fallback_drops_note_bodies_and_keeps_words_apart() {
        let text = strip_tags(r#"In the<note n="a">Heb. at first</note> beginning<br/>God &amp; <w lemma="x">man</w> <unterminated"#);
        let mut out = TextBuilder::new();
        out.push_text(&text);
        let record = out.finish(RecordKey::Lexical { key: "X".into() }, None);
        assert_eq!(record.text, "In the beginning God & man");
    }

    #[test]
    fn one_bad_record_does_not_affect_the_next() {
        let bad = convert(&raw(Dialect::Osis, b"<w lemma=\"strong:G1\">a</q>"));
        let good = convert(&raw(Dialect::Osis, b"<w lemma=\"strong:G1\">a</w>"));
        assert_eq!(bad.warnings[0].kind, WarningKind::Fallback);
        assert!(good.warnings.is_empty());
        assert_eq!(good.annotations_of(AnnotationKind::Strongs).count(), 1);
    }
}
