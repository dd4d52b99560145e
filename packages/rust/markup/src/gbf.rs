//! GBF (General Bible Format): two-letter codes in angle brackets. An
//! upper-case pair opens (`<FR>`), the same pair with a lower-case second
//! letter closes (`<Fr>`). Strong's and morphology codes follow the word they
//! tag: `God<WG2316><WTN-NSM>`.

use tracing::debug;

use scriptorium_shared::{AnnotationKind, Dialect, Result};

use crate::Converter;
use crate::builder::{SpanId, TextBuilder};
use crate::lexer::{Token, decode_entities, malformed, tokenize};

#[derive(Debug, Clone, Copy, Default)]
pub struct GbfConverter;

impl Converter for GbfConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Gbf
    }

    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()> {
        let mut spans: Vec<(&str, SpanId)> = Vec::new();
        let mut asides: Vec<(&str, AnnotationKind)> = Vec::new();

        for token in tokenize(markup)? {
            let code = match token {
                Token::Text(text) => {
                    out.push_text(&decode_entities(text));
                    continue;
                }
                Token::End(name) => {
                    debug!(tag = name, "end tag in GBF ignored");
                    continue;
                }
                Token::Start(tag) => tag.name,
            };

            if let Some(kind) = span_kind(code) {
                spans.push((code, out.open_span(kind, None)));
            } else if let Some(kind) = aside_kind(code) {
                out.begin_capture();
                asides.push((code, kind));
            } else if let Some(opening) = closing_pair(code) {
                if span_kind(&opening).is_some() {
                    let at = spans
                        .iter()
                        .rposition(|(open, _)| *open == opening)
                        .ok_or_else(|| malformed(format!("<{code}> closes nothing")))?;
                    let (_, id) = spans.remove(at);
                    out.close_span(id);
                } else if aside_kind(&opening).is_some() {
                    match asides.pop() {
                        Some((open, kind)) if open == opening => {
                            let body = out.end_capture();
                            out.mark(kind, (!body.is_empty()).then_some(body));
                        }
                        _ => return Err(malformed(format!("<{code}> closes nothing"))),
                    }
                } else {
                    debug!(code, "closing GBF code ignored");
                }
            } else {
                lexical_or_layout(code, out);
            }
        }

        while let Some((_, kind)) = asides.pop() {
            let body = out.end_capture();
            out.mark(kind, (!body.is_empty()).then_some(body));
        }
        Ok(())
    }
}

fn span_kind(code: &str) -> Option<AnnotationKind> {
    match code {
        "FR" => Some(AnnotationKind::RedLetter),
        "FI" => Some(AnnotationKind::Added),
        "FB" | "FU" | "FO" => Some(AnnotationKind::Emphasis),
        "TS" | "TT" => Some(AnnotationKind::Title),
        _ => None,
    }
}

fn aside_kind(code: &str) -> Option<AnnotationKind> {
    match code {
        "RF" => Some(AnnotationKind::Note),
        "RX" => Some(AnnotationKind::CrossReference),
        _ => None,
    }
}

/// `Fr` → `FR`; `None` unless `code` is a two-letter closing code.
fn closing_pair(code: &str) -> Option<String> {
    let mut chars = code.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(a), Some(b), None) if a.is_ascii_uppercase() && b.is_ascii_lowercase() => {
            Some(format!("{a}{}", b.to_ascii_uppercase()))
        }
        _ => None,
    }
}

fn lexical_or_layout(code: &str, out: &mut TextBuilder) {
    let strongs = code
        .strip_prefix("WH")
        .or_else(|| code.strip_prefix("WG"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    if strongs {
        // "WG2316" → "G2316"
        out.attach_preceding(AnnotationKind::Strongs, code[1..].to_string());
        return;
    }
    match code.strip_prefix("WT") {
        Some(morph) if !morph.is_empty() => {
            out.attach_preceding(AnnotationKind::Morphology, morph.to_string());
        }
        _ => match code {
            "CM" | "CL" | "CI" | "CG" | "CT" => out.push_break(),
            _ => debug!(code, "GBF code ignored"),
        },
    }
}
