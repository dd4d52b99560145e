//! Accumulates the normalized text and annotations of one record.
//!
//! Whitespace is collapsed as text arrives: runs become one ASCII space, and
//! nothing leads or trails. Styled spans (red letter, divine name, titles, …)
//! may nest or overlap while building; [`TextBuilder::finish`] resolves them
//! innermost-wins so every byte carries at most one style.

use std::collections::{BTreeSet, HashMap};

use scriptorium_shared::{
    Annotation, AnnotationKind, ConversionWarning, ConvertedRecord, RecordKey, VerseAddress,
    WarningKind,
};

/// Handle to a span opened with [`TextBuilder::open_span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanId(usize);

#[derive(Debug)]
struct Span {
    kind: AnnotationKind,
    value: Option<String>,
    start: usize,
    end: Option<usize>,
}

#[derive(Debug, Default)]
struct Buffer {
    text: String,
    pending_space: bool,
}

impl Buffer {
    fn push(&mut self, s: &str) {
        for c in s.chars() {
            if c.is_whitespace() || c.is_control() {
                self.pending_space = true;
                continue;
            }
            if self.pending_space && !self.text.is_empty() {
                self.text.push(' ');
            }
            self.pending_space = false;
            self.text.push(c);
        }
    }
}

#[derive(Debug, Default)]
pub struct TextBuilder {
    main: Buffer,
    /// Open note/reference bodies; text goes to the innermost one.
    captures: Vec<Buffer>,
    spans: Vec<Span>,
    milestones: HashMap<String, SpanId>,
    annotations: Vec<Annotation>,
    warnings: Vec<ConversionWarning>,
}

impl TextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&mut self) -> &mut Buffer {
        match self.captures.last_mut() {
            Some(capture) => capture,
            None => &mut self.main,
        }
    }

    pub fn push_text(&mut self, text: &str) {
        self.buffer().push(text);
    }

    /// Paragraph, line or block boundary.
    pub fn push_break(&mut self) {
        self.buffer().pending_space = true;
    }

    /// Byte offset in the main text where the next character lands.
    pub fn position(&self) -> usize {
        self.main.text.len()
    }

    pub fn open_span(&mut self, kind: AnnotationKind, value: Option<String>) -> SpanId {
        self.spans.push(Span {
            kind,
            value,
            start: self.position(),
            end: None,
        });
        SpanId(self.spans.len() - 1)
    }

    pub fn close_span(&mut self, id: SpanId) {
        let end = self.position();
        if let Some(span) = self.spans.get_mut(id.0) {
            span.end.get_or_insert(end);
        }
    }

    /// Open a span delimited by empty start/end markers sharing `id`.
    pub fn open_milestone(&mut self, id: &str, kind: AnnotationKind, value: Option<String>) {
        let span = self.open_span(kind, value);
        if let Some(previous) = self.milestones.insert(id.to_string(), span) {
            self.close_span(previous);
        }
    }

    /// Close the milestone span `id`. Returns false when it was never opened
    /// in this record.
    pub fn close_milestone(&mut self, id: &str) -> bool {
        match self.milestones.remove(id) {
            Some(span) => {
                self.close_span(span);
                true
            }
            None => false,
        }
    }

    /// Divert text into a side buffer until [`TextBuilder::end_capture`].
    pub fn begin_capture(&mut self) {
        self.captures.push(Buffer::default());
    }

    pub fn end_capture(&mut self) -> String {
        self.captures.pop().map(|b| b.text).unwrap_or_default()
    }

    /// Zero-width annotation at the current position, e.g. a note anchor.
    pub fn mark(&mut self, kind: AnnotationKind, value: Option<String>) {
        let at = self.position();
        self.annotations.push(Annotation {
            start: at,
            end: at,
            kind,
            value,
        });
    }

    /// Attach a lexical tag to the last word written since `from`, or to the
    /// nearest preceding word when there is none. With no word at all the
    /// tag is kept as a zero-width annotation and a warning is recorded.
    pub fn attach(&mut self, from: usize, kind: AnnotationKind, value: String) {
        let text = &self.main.text;
        match last_word(text, from).or_else(|| last_word(text, 0)) {
            Some((start, end)) => self.annotations.push(Annotation {
                start,
                end,
                kind,
                value: Some(value),
            }),
            None => {
                self.warn(
                    WarningKind::DanglingAnnotation,
                    format!("{kind:?} {value} has no preceding word"),
                );
                self.mark(kind, Some(value));
            }
        }
    }

    pub fn attach_preceding(&mut self, kind: AnnotationKind, value: String) {
        let from = self.position();
        self.attach(from, kind, value);
    }

    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        self.warnings.push(ConversionWarning {
            kind,
            message: message.into(),
        });
    }

    pub fn finish(mut self, key: RecordKey, end: Option<VerseAddress>) -> ConvertedRecord {
        let text = std::mem::take(&mut self.main.text);

        let styled: Vec<(usize, usize, usize)> = self
            .spans
            .iter()
            .enumerate()
            .map(|(seq, span)| {
                let (start, end) = trim_range(&text, span.start, span.end.unwrap_or(text.len()));
                (seq, start, end)
            })
            .filter(|&(_, start, end)| start < end)
            .collect();
        let (runs, contested) = innermost_runs(&styled);

        if !contested.is_empty() {
            let kinds: BTreeSet<String> = contested
                .iter()
                .map(|&seq| format!("{:?}", self.spans[seq].kind))
                .collect();
            let kinds: Vec<String> = kinds.into_iter().collect();
            self.warn(
                WarningKind::NestedMarkup,
                format!("overlapping {} spans; innermost kept", kinds.join("/")),
            );
        }

        let mut annotations = self.annotations;
        for (seq, start, end) in runs {
            let (start, end) = trim_range(&text, start, end);
            if start < end {
                let span = &self.spans[seq];
                annotations.push(Annotation {
                    start,
                    end,
                    kind: span.kind,
                    value: span.value.clone(),
                });
            }
        }
        annotations.sort();
        annotations.dedup();

        ConvertedRecord {
            key,
            end,
            text,
            annotations,
            warnings: self.warnings,
        }
    }
}

/// Shrink `start..end` past the single-space separators at either edge.
fn trim_range(text: &str, mut start: usize, end: usize) -> (usize, usize) {
    let bytes = text.as_bytes();
    let mut end = end.min(text.len());
    while start < end && bytes[start] == b' ' {
        start += 1;
    }
    while end > start && bytes[end - 1] == b' ' {
        end -= 1;
    }
    (start, end)
}

/// Split `(seq, start, end)` spans at every boundary and give each piece to
/// the covering span opened last. Returns the merged runs plus every span
/// that shared a piece with another.
fn innermost_runs(spans: &[(usize, usize, usize)]) -> (Vec<(usize, usize, usize)>, BTreeSet<usize>) {
    let mut points: Vec<usize> = spans.iter().flat_map(|&(_, s, e)| [s, e]).collect();
    points.sort_unstable();
    points.dedup();

    let mut runs: Vec<(usize, usize, usize)> = Vec::new();
    let mut contested = BTreeSet::new();
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let covering: Vec<usize> = spans
            .iter()
            .filter(|&&(_, s, e)| s <= a && b <= e)
            .map(|&(seq, _, _)| seq)
            .collect();
        let Some(&winner) = covering.iter().max() else {
            continue;
        };
        if covering.len() > 1 {
            contested.extend(covering.iter().copied());
        }
        match runs.last_mut() {
            Some(last) if last.0 == winner && last.2 == a => last.2 = b,
            _ => runs.push((winner, a, b)),
        }
    }
    (runs, contested)
}

fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '\u{2019}')
}

fn is_word_char(c: char) -> bool {
    is_apostrophe(c)
        || !(c.is_whitespace()
            || c.is_ascii_punctuation()
            || matches!(
                c,
                '\u{00A1}'..='\u{00BF}'
                    | '\u{037E}'
                    | '\u{0387}'
                    | '\u{05BE}'
                    | '\u{05C0}'
                    | '\u{05C3}'
                    | '\u{2010}'..='\u{205E}'
                    | '\u{3000}'..='\u{3003}'
            ))
}

/// Byte range of the last word in `text[from..]`, apostrophes trimmed.
fn last_word(text: &str, from: usize) -> Option<(usize, usize)> {
    let mut upto = text.len();
    while upto > from {
        let tail = text.get(from..upto)?;
        let mut end = None;
        let mut start = 0;
        for (i, c) in tail.char_indices().rev() {
            if is_word_char(c) {
                if end.is_none() {
                    end = Some(i + c.len_utf8());
                }
                start = i;
            } else if end.is_some() {
                break;
            }
        }
        let end = end?;
        let word = &tail[start..end];
        let trimmed = word.trim_matches(is_apostrophe);
        if !trimmed.is_empty() {
            let lead = word.len() - word.trim_start_matches(is_apostrophe).len();
            let s = from + start + lead;
            return Some((s, s + trimmed.len()));
        }
        upto = from + start;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RecordKey {
        RecordKey::Verse(VerseAddress::new("Gen", 1, 1))
    }

    #[test]
    fn collapses_whitespace_without_edges() {
        let mut b = TextBuilder::new();
        b.push_text("  In the\n\tbeginning ");
        b.push_break();
        b.push_text("God\r\n");
        let record = b.finish(key(), None);
        assert_eq!(record.text, "In the beginning God");
    }

    #[test]
    fn span_opened_before_a_pending_space_starts_at_the_word() {
        let mut b = TextBuilder::new();
        b.push_text("said ");
        let id = b.open_span(AnnotationKind::DivineName, None);
        b.push_text("LORD");
        b.close_span(id);
        let record = b.finish(key(), None);
        let span = &record.annotations[0];
        assert_eq!(record.span_text(span), "LORD");
    }

    #[test]
    fn nested_spans_resolve_innermost_wins() {
        let mut b = TextBuilder::new();
        let outer = b.open_span(AnnotationKind::RedLetter, None);
        b.push_text("I am the ");
        let inner = b.open_span(AnnotationKind::DivineName, None);
        b.push_text("LORD");
        b.close_span(inner);
        b.push_text(" thy God");
        b.close_span(outer);
        let record = b.finish(key(), None);

        let pieces: Vec<(&str, AnnotationKind)> = record
            .annotations
            .iter()
            .map(|a| (record.span_text(a), a.kind))
            .collect();
        assert_eq!(
            pieces,
            vec![
                ("I am the", AnnotationKind::RedLetter),
                ("LORD", AnnotationKind::DivineName),
                ("thy God", AnnotationKind::RedLetter),
            ]
        );
        assert_eq!(record.warnings.len(), 1);
        assert_eq!(record.warnings[0].kind, WarningKind::NestedMarkup);
    }

    #[test]
    fn overlapping_spans_give_the_shared_piece_to_the_later_one() {
        let mut b = TextBuilder::new();
        let red = b.open_span(AnnotationKind::RedLetter, None);
        b.push_text("one ");
        let added = b.open_span(AnnotationKind::Added, None);
        b.push_text("two ");
        b.close_span(red);
        b.push_text("three");
        b.close_span(added);
        let record = b.finish(key(), None);
        let added: Vec<&str> = record
            .annotations_of(AnnotationKind::Added)
            .map(|a| record.span_text(a))
            .collect();
        assert_eq!(added, vec!["two three"]);
        let red: Vec<&str> = record
            .annotations_of(AnnotationKind::RedLetter)
            .map(|a| record.span_text(a))
            .collect();
        assert_eq!(red, vec!["one"]);
    }

    #[test]
    fn attaches_to_the_nearest_preceding_word() {
        let mut b = TextBuilder::new();
        b.push_text("the Word, ");
        b.attach_preceding(AnnotationKind::Strongs, "G3056".into());
        let record = b.finish(key(), None);
        let strongs = &record.annotations[0];
        assert_eq!(record.span_text(strongs), "Word");
        assert_eq!(strongs.value.as_deref(), Some("G3056"));
    }

    #[test]
    fn word_ranges_respect_multibyte_characters() {
        let mut b = TextBuilder::new();
        b.push_text("ὁ θεός·");
        b.attach_preceding(AnnotationKind::Strongs, "G2316".into());
        let record = b.finish(key(), None);
        assert_eq!(record.span_text(&record.annotations[0]), "θεός");
    }

    #[test]
    fn apostrophes_stay_inside_words_only() {
        assert_eq!(last_word("the Lord's '", 0), Some((4, 10)));
        assert_eq!(last_word("'", 0), None);
    }

    #[test]
    fn dangling_tag_is_kept_with_a_warning() {
        let mut b = TextBuilder::new();
        b.attach_preceding(AnnotationKind::Strongs, "H430".into());
        b.push_text("God");
        let record = b.finish(key(), None);
        assert_eq!(record.annotations.len(), 1);
        assert_eq!(record.annotations[0].value.as_deref(), Some("H430"));
        assert_eq!(record.warnings[0].kind, WarningKind::DanglingAnnotation);
    }

    #[test]
    fn captured_text_stays_out_of_the_main_text() {
        let mut b = TextBuilder::new();
        b.push_text("light");
        b.begin_capture();
        b.push_text("  Heb. lamps ");
        let body = b.end_capture();
        b.mark(AnnotationKind::Note, Some(body));
        b.push_text(" to rule");
        let record = b.finish(key(), None);
        assert_eq!(record.text, "light to rule");
        let note = &record.annotations[0];
        assert_eq!((note.start, note.end), (5, 5));
        assert_eq!(note.value.as_deref(), Some("Heb. lamps"));
    }

    #[test]
    fn unmatched_milestone_end_is_reported() {
        let mut b = TextBuilder::new();
        b.open_milestone("q1", AnnotationKind::RedLetter, None);
        b.push_text("Follow me");
        assert!(b.close_milestone("q1"));
        assert!(!b.close_milestone("q2"));
        let record = b.finish(key(), None);
        assert_eq!(record.span_text(&record.annotations[0]), "Follow me");
    }
}
