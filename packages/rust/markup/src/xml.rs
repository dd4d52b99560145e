//! Element-stack walk shared by the XML dialects.
//!
//! Each dialect only says what an element means ([`Element`]); the walk
//! keeps the stack, rejects unbalanced end tags and drives the builder.

use tracing::debug;

use scriptorium_shared::{AnnotationKind, Result};

use crate::builder::{SpanId, TextBuilder};
use crate::lexer::{Tag, Token, decode_entities, malformed, tokenize};

/// Meaning of one element in a dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Element {
    /// Contents flow into the text as-is.
    Transparent,
    /// Block boundary around the contents.
    Break,
    /// Contents form a styled span.
    Span(AnnotationKind, Option<String>),
    /// A styled span that is also a block, such as a heading.
    BlockSpan(AnnotationKind, Option<String>),
    /// Contents are a word carrying lexical tags. When empty, the tags go to
    /// the preceding word.
    Word(Vec<(AnnotationKind, String)>),
    /// Contents become the value of a zero-width annotation.
    Aside(AnnotationKind),
    /// Empty marker opening a span that a later [`Element::MilestoneEnd`]
    /// with the same id closes.
    MilestoneStart(String, AnnotationKind, Option<String>),
    MilestoneEnd(String),
}

pub(crate) trait Vocabulary {
    fn element(&self, tag: &Tag<'_>) -> Element;

    /// Elements that never have an end tag (`<br>`).
    fn is_void(&self, _name: &str) -> bool {
        false
    }
}

enum Open {
    Plain,
    Break,
    Span(SpanId),
    BlockSpan(SpanId),
    Word(usize, Vec<(AnnotationKind, String)>),
    Aside(AnnotationKind),
}

pub(crate) fn walk(markup: &str, vocabulary: &impl Vocabulary, out: &mut TextBuilder) -> Result<()> {
    let mut stack: Vec<(&str, Open)> = Vec::new();

    for token in tokenize(markup)? {
        match token {
            Token::Text(text) => out.push_text(&decode_entities(text)),
            Token::Start(tag) if tag.empty || vocabulary.is_void(tag.name) => {
                empty_element(vocabulary.element(&tag), out);
            }
            Token::Start(tag) => {
                let open = match vocabulary.element(&tag) {
                    Element::Transparent | Element::MilestoneEnd(_) => Open::Plain,
                    Element::Break => {
                        out.push_break();
                        Open::Break
                    }
                    Element::Span(kind, value) | Element::MilestoneStart(_, kind, value) => {
                        Open::Span(out.open_span(kind, value))
                    }
                    Element::BlockSpan(kind, value) => {
                        out.push_break();
                        Open::BlockSpan(out.open_span(kind, value))
                    }
                    Element::Word(tags) => Open::Word(out.position(), tags),
                    Element::Aside(kind) => {
                        out.begin_capture();
                        Open::Aside(kind)
                    }
                };
                stack.push((tag.name, open));
            }
            Token::End(name) => {
                let Some((open_name, open)) = stack.pop() else {
                    return Err(malformed(format!("</{name}> closes nothing")));
                };
                if !open_name.eq_ignore_ascii_case(name) {
                    return Err(malformed(format!("</{name}> closes <{open_name}>")));
                }
                close(open, out);
            }
        }
    }

    // Fragments may stop inside an element; close what is left.
    while let Some((_, open)) = stack.pop() {
        close(open, out);
    }
    Ok(())
}

fn close(open: Open, out: &mut TextBuilder) {
    match open {
        Open::Plain => {}
        Open::Break => out.push_break(),
        Open::Span(id) => out.close_span(id),
        Open::BlockSpan(id) => {
            out.close_span(id);
            out.push_break();
        }
        Open::Word(from, tags) => {
            for (kind, value) in tags {
                out.attach(from, kind, value);
            }
        }
        Open::Aside(kind) => {
            let body = out.end_capture();
            out.mark(kind, (!body.is_empty()).then_some(body));
        }
    }
}

fn empty_element(element: Element, out: &mut TextBuilder) {
    match element {
        Element::Break => out.push_break(),
        Element::Word(tags) => {
            for (kind, value) in tags {
                out.attach_preceding(kind, value);
            }
        }
        Element::MilestoneStart(id, kind, value) => out.open_milestone(&id, kind, value),
        Element::MilestoneEnd(id) => {
            if !out.close_milestone(&id) {
                debug!(id = %id, "milestone end without a start in this record");
            }
        }
        Element::Transparent | Element::Span(..) | Element::BlockSpan(..) | Element::Aside(_) => {}
    }
}
