//! OSIS: `<w lemma morph>`, `<divineName>`, `<q who="Jesus">`,
//! `<transChange>`, `<note>`, `<reference>`, `<title>`, poetry and
//! paragraph structure.

use scriptorium_shared::{AnnotationKind, Dialect, Result};

use crate::Converter;
use crate::builder::TextBuilder;
use crate::lexer::Tag;
use crate::xml::{self, Element, Vocabulary};

#[derive(Debug, Clone, Copy, Default)]
pub struct OsisConverter;

impl Converter for OsisConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Osis
    }

    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()> {
        xml::walk(markup, self, out)
    }
}

impl Vocabulary for OsisConverter {
    fn element(&self, tag: &Tag<'_>) -> Element {
        use AnnotationKind::*;
        match tag.name {
            "w" => Element::Word(lexical_tags(tag)),
            "divineName" => Element::Span(DivineName, None),
            "q" => quote(tag),
            "transChange" => Element::Span(Added, None),
            "note" => Element::Aside(Note),
            "reference" => Element::Span(CrossReference, tag.attr("osisRef").map(str::to_string)),
            "title" => Element::BlockSpan(Title, None),
            "foreign" => Element::Span(Foreign, None),
            "hi" => Element::Span(Emphasis, None),
            "p" | "l" | "lg" | "lb" | "div" | "list" | "item" | "table" | "row" | "cell"
            | "closer" | "salute" | "speaker" => Element::Break,
            "milestone" if tag.attr("type") == Some("x-p") => Element::Break,
            _ => Element::Transparent,
        }
    }
}

/// Red letter is either a `<q who="Jesus">` container or a pair of empty
/// `sID`/`eID` markers that may span other elements.
fn quote(tag: &Tag<'_>) -> Element {
    let jesus = tag.attr("who").is_some_and(|w| w.eq_ignore_ascii_case("jesus"));
    if tag.empty {
        if let Some(end) = tag.attr("eID") {
            return Element::MilestoneEnd(end.to_string());
        }
        if let (true, Some(start)) = (jesus, tag.attr("sID")) {
            return Element::MilestoneStart(start.to_string(), AnnotationKind::RedLetter, None);
        }
        return Element::Transparent;
    }
    if jesus {
        Element::Span(AnnotationKind::RedLetter, None)
    } else {
        Element::Transparent
    }
}

/// Strong's numbers from `lemma` and codes from `morph`, scheme prefixes
/// removed: `strong:G2316` becomes `G2316`, `robinson:N-NSM` becomes `N-NSM`.
fn lexical_tags(tag: &Tag<'_>) -> Vec<(AnnotationKind, String)> {
    let mut tags = Vec::new();
    for part in tag.attr("lemma").unwrap_or_default().split_whitespace() {
        let Some((scheme, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.split('!').next().unwrap_or_default();
        if scheme.to_ascii_lowercase().contains("strong") && !value.is_empty() {
            tags.push((AnnotationKind::Strongs, value.to_string()));
        }
    }
    for part in tag.attr("morph").unwrap_or_default().split_whitespace() {
        let value = part.split_once(':').map_or(part, |(_, v)| v);
        if !value.is_empty() {
            tags.push((AnnotationKind::Morphology, value.to_string()));
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_shared::{
        ConvertedRecord, RawRecord, RecordKey, VerseAddress, WarningKind,
    };

    fn convert(markup: &str) -> ConvertedRecord {
        let raw = RawRecord::owned(
            RecordKey::Verse(VerseAddress::new("John", 1, 1)),
            Dialect::Osis,
            markup.as_bytes().to_vec(),
        );
        OsisConverter.convert(&raw)
    }

    fn spans(record: &ConvertedRecord, kind: AnnotationKind) -> Vec<(String, Option<String>)> {
        record
            .annotations_of(kind)
            .map(|a| (record.span_text(a).to_string(), a.value.clone()))
            .collect()
    }

    #[test]
    fn strongs_survives_nesting() {
        let record = convert(
            r#"<q who="Jesus"><transChange type="added"><w lemma="strong:G2316" morph="robinson:N-NSM">God</w></transChange> is a Spirit</q>"#,
        );
        assert_eq!(record.text, "God is a Spirit");
        assert_eq!(
            spans(&record, AnnotationKind::Strongs),
            vec![("God".to_string(), Some("G2316".to_string()))]
        );
        assert_eq!(
            spans(&record, AnnotationKind::Morphology),
            vec![("God".to_string(), Some("N-NSM".to_string()))]
        );
        assert_eq!(spans(&record, AnnotationKind::Added)[0].0, "God");
        assert_eq!(spans(&record, AnnotationKind::RedLetter)[0].0, "is a Spirit");
        assert!(record.warnings.iter().any(|w| w.kind == WarningKind::NestedMarkup));
    }

    #[test]
    fn multiple_lemmas_each_become_annotations() {
        let record = convert(
            r#"<w lemma="strong:G3588 strong:G3056" morph="robinson:T-NSM robinson:N-NSM">the Word</w>"#,
        );
        let strongs: Vec<Option<String>> = spans(&record, AnnotationKind::Strongs)
            .into_iter()
            .map(|(text, value)| {
                assert_eq!(text, "Word");
                value
            })
            .collect();
        assert_eq!(strongs, vec![Some("G3056".into()), Some("G3588".into())]);
    }

    #[test]
    fn note_bodies_leave_the_text() {
        let record = convert(
            r#"And God called the light Day<note type="explanation">Or, <hi type="italic">daytime</hi></note>, and the darkness"#,
        );
        assert_eq!(record.text, "And God called the light Day, and the darkness");
        let notes = spans(&record, AnnotationKind::Note);
        assert_eq!(notes, vec![(String::new(), Some("Or, daytime".to_string()))]);
    }

    #[test]
    fn divine_name_and_reference_spans() {
        let record = convert(
            r#"<title>A Psalm</title>The <divineName>LORD</divineName> is my shepherd; see <reference osisRef="John.10.11">John 10:11</reference>."#,
        );
        assert_eq!(
            record.text,
            "A Psalm The LORD is my shepherd; see John 10:11."
        );
        assert_eq!(spans(&record, AnnotationKind::Title)[0].0, "A Psalm");
        assert_eq!(spans(&record, AnnotationKind::DivineName)[0].0, "LORD");
        assert_eq!(
            spans(&record, AnnotationKind::CrossReference),
            vec![("John 10:11".to_string(), Some("John.10.11".to_string()))]
        );
        assert!(record.warnings.is_empty());
    }

    #[test]
    fn red_letter_milestones() {
        let record = convert(
            r#"Jesus saith unto him, <q marker="" who="Jesus" sID="q1"/>Follow me.<q eID="q1" marker=""/> And he arose"#,
        );
        assert_eq!(spans(&record, AnnotationKind::RedLetter)[0].0, "Follow me.");
    }

    #[test]
    fn milestone_end_from_an_earlier_verse_is_ignored() {
        let record = convert(r#"the end.<q eID="q0"/> Then"#);
        assert_eq!(record.text, "the end. Then");
        assert!(record.warnings.is_empty());
    }

    #[test]
    fn unbalanced_end_tag_falls_back_to_stripped_text() {
        let record = convert(r#"<w lemma="strong:H430">God</w> created</divineName> the heaven"#);
        assert_eq!(record.text, "God created the heaven");
        assert!(record.annotations.is_empty());
        assert_eq!(record.warnings.len(), 1);
        assert_eq!(record.warnings[0].kind, WarningKind::Fallback);
    }

    #[test]
    fn invalid_utf8_falls_back() {
        let raw = RawRecord::owned(
            RecordKey::Verse(VerseAddress::new("Gen", 1, 1)),
            Dialect::Osis,
            b"In the <w>beginning</w> \xff".to_vec(),
        );
        let record = OsisConverter.convert(&raw);
        assert!(record.text.starts_with("In the beginning"));
        assert_eq!(record.warnings[0].kind, WarningKind::Fallback);
    }

    #[test]
    fn poetry_lines_are_separated() {
        let record = convert("<lg><l level=\"1\">The heavens declare</l><l level=\"2\">the glory of God</l></lg>");
        assert_eq!(record.text, "The heavens declare the glory of God");
    }
}
