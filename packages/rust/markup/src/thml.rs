//! ThML: HTML-flavoured markup with `<sync>` lexical tags, `<scripRef>`
//! references and `<note>` bodies. Element names compare case-insensitively.

use scriptorium_shared::{AnnotationKind, Dialect, Result};

use crate::Converter;
use crate::builder::TextBuilder;
use crate::lexer::Tag;
use crate::xml::{self, Element, Vocabulary};

#[derive(Debug, Clone, Copy, Default)]
pub struct ThmlConverter;

impl Converter for ThmlConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Thml
    }

    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()> {
        xml::walk(markup, self, out)
    }
}

impl Vocabulary for ThmlConverter {
    fn element(&self, tag: &Tag<'_>) -> Element {
        use AnnotationKind::*;
        let name = tag.name.to_ascii_lowercase();
        match name.as_str() {
            "sync" => sync(tag),
            "scripref" => Element::Span(CrossReference, tag.attr("passage").map(str::to_string)),
            "note" => Element::Aside(Note),
            "foreign" => Element::Span(Foreign, tag.attr("lang").map(str::to_string)),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Element::BlockSpan(Title, None),
            "em" | "i" | "b" | "strong" | "u" => Element::Span(Emphasis, None),
            "font" if tag.attr("color").is_some_and(is_red) => Element::Span(RedLetter, None),
            "span" => match tag.attr("class").map(str::to_ascii_lowercase) {
                Some(class) if class.contains("jesus") => Element::Span(RedLetter, None),
                Some(class) if class.contains("divine") => Element::Span(DivineName, None),
                _ => Element::Transparent,
            },
            "p" | "br" | "div" | "blockquote" | "li" | "ul" | "ol" | "table" | "tr" | "td"
            | "hr" | "verse" => Element::Break,
            _ => Element::Transparent,
        }
    }

    fn is_void(&self, name: &str) -> bool {
        ["br", "hr", "img", "sync"]
            .iter()
            .any(|v| v.eq_ignore_ascii_case(name))
    }
}

/// `<sync type="Strongs" value="G2316"/>` or `<sync type="morph" value="…"/>`.
fn sync(tag: &Tag<'_>) -> Element {
    let Some(value) = tag.attr("value").filter(|v| !v.is_empty()) else {
        return Element::Transparent;
    };
    let kind = match tag.attr("type").map(str::to_ascii_lowercase).as_deref() {
        Some("strongs") => AnnotationKind::Strongs,
        Some("morph") => AnnotationKind::Morphology,
        _ => return Element::Transparent,
    };
    Element::Word(vec![(kind, value.to_string())])
}

fn is_red(color: &str) -> bool {
    matches!(
        color.trim().to_ascii_lowercase().as_str(),
        "red" | "#f00" | "#ff0000" | "#c00" | "#cc0000"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_shared::{ConvertedRecord, RawRecord, RecordKey, VerseAddress, WarningKind};

    fn convert(markup: &str) -> ConvertedRecord {
        let raw = RawRecord::owned(
            RecordKey::Verse(VerseAddress::new("Rom", 1, 1)),
            Dialect::Thml,
            markup.as_bytes().to_vec(),
        );
        ThmlConverter.convert(&raw)
    }

    #[test]
    fn sync_tags_survive_nesting() {
        let record = convert(
            r#"<font color="red"><i>the <b>God<sync type="Strongs" value="G2316"/><sync type="morph" value="N-GSM"/></b></i> of peace</font>"#,
        );
        assert_eq!(record.text, "the God of peace");
        let strongs = record.annotations_of(AnnotationKind::Strongs).next().unwrap();
        assert_eq!(record.span_text(strongs), "God");
        assert_eq!(strongs.value.as_deref(), Some("G2316"));
        let morph = record.annotations_of(AnnotationKind::Morphology).next().unwrap();
        assert_eq!(morph.value.as_deref(), Some("N-GSM"));
        assert!(record.warnings.iter().any(|w| w.kind == WarningKind::NestedMarkup));
    }

    #[test]
    fn void_elements_need_no_end_tag() {
        let record = convert(
            r#"<p>Paul, a servant<sync type="Strongs" value="1401">, called<br>to be an apostle</p>"#,
        );
        assert_eq!(record.text, "Paul, a servant, called to be an apostle");
        assert!(record.warnings.is_empty());
        let strongs = record.annotations_of(AnnotationKind::Strongs).next().unwrap();
        assert_eq!(record.span_text(strongs), "servant");
    }

    #[test]
    fn references_notes_and_headings() {
        let record = convert(
            r#"<H2>Preface</H2>As it is written,<note>Isaiah</note> <scripRef passage="Rom 3:10">none righteous</scripRef>"#,
        );
        assert_eq!(record.text, "Preface As it is written, none righteous");
        let title = record.annotations_of(AnnotationKind::Title).next().unwrap();
        assert_eq!(record.span_text(title), "Preface");
        let xref = record.annotations_of(AnnotationKind::CrossReference).next().unwrap();
        assert_eq!(record.span_text(xref), "none righteous");
        assert_eq!(xref.value.as_deref(), Some("Rom 3:10"));
        let note = record.annotations_of(AnnotationKind::Note).next().unwrap();
        assert_eq!(note.value.as_deref(), Some("Isaiah"));
    }
}
