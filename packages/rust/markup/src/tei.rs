//! TEI dictionary entries: headword, part of speech, etymology, senses and
//! references.

use scriptorium_shared::{AnnotationKind, Dialect, Result};

use crate::Converter;
use crate::builder::TextBuilder;
use crate::lexer::Tag;
use crate::xml::{self, Element, Vocabulary};

#[derive(Debug, Clone, Copy, Default)]
pub struct TeiConverter;

impl Converter for TeiConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Tei
    }

    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()> {
        xml::walk(markup, self, out)
    }
}

impl Vocabulary for TeiConverter {
    fn element(&self, tag: &Tag<'_>) -> Element {
        use AnnotationKind::*;
        match tag.name {
            "orth" => Element::Span(Headword, None),
            "pos" => Element::Span(PartOfSpeech, None),
            "etym" => Element::Span(Etymology, None),
            "ref" => Element::Span(
                CrossReference,
                tag.attr("target")
                    .or_else(|| tag.attr("osisRef"))
                    .map(str::to_string),
            ),
            "foreign" => Element::Span(Foreign, tag.attr("xml:lang").map(str::to_string)),
            "hi" | "emph" => Element::Span(Emphasis, None),
            "title" => Element::BlockSpan(Title, None),
            "note" => Element::Aside(Note),
            "entry" | "superEntry" | "sense" | "def" | "p" | "lb" | "cit" | "form" | "re" => {
                Element::Break
            }
            _ => Element::Transparent,
        }
    }
}
