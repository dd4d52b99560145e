//! RTF fragments as stored by e-Sword: control words, `{}` groups, `\'hh`
//! and `\uN` escapes. Bold and italic become emphasis, `\par`/`\line` become
//! breaks, superscript Strong's numbers (`{\cf6\super H430}`) attach to the
//! preceding word. Colour, font and size changes carry no meaning here.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use scriptorium_shared::{AnnotationKind, Dialect, Result};

use crate::Converter;
use crate::builder::{SpanId, TextBuilder};
use crate::lexer::malformed;

#[derive(Debug, Clone, Copy, Default)]
pub struct RtfConverter;

impl Converter for RtfConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Rtf
    }

    fn render(&self, markup: &str, out: &mut TextBuilder) -> Result<()> {
        let mut reader = Reader {
            out,
            stack: Vec::new(),
            state: State::default(),
            emphasis: None,
            superscript: String::new(),
        };
        reader.run(markup)
    }

    fn strip(&self, markup: &str) -> String {
        strip_rtf(markup)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct State {
    bold: bool,
    italic: bool,
    superscript: bool,
    /// Inside a destination such as `\fonttbl` or `\*`.
    skip: bool,
}

struct Reader<'o> {
    out: &'o mut TextBuilder,
    stack: Vec<State>,
    state: State,
    emphasis: Option<SpanId>,
    superscript: String,
}

impl Reader<'_> {
    fn run(&mut self, input: &str) -> Result<()> {
        let mut chars = input.char_indices().peekable();
        let mut text = String::new();

        while let Some((at, c)) = chars.next() {
            match c {
                '{' => {
                    self.emit(&mut text);
                    self.stack.push(self.state);
                }
                '}' => {
                    self.emit(&mut text);
                    let outer = self
                        .stack
                        .pop()
                        .ok_or_else(|| malformed(format!("unbalanced }} at byte {at}")))?;
                    self.set_state(outer);
                }
                '\\' => match chars.peek().copied() {
                    Some((_, letter)) if letter.is_ascii_alphabetic() => {
                        let mut word = String::new();
                        while let Some(&(_, l)) = chars.peek().filter(|(_, l)| l.is_ascii_alphabetic()) {
                            word.push(l);
                            chars.next();
                        }
                        let mut param = String::new();
                        if let Some(&(_, '-')) = chars.peek() {
                            param.push('-');
                            chars.next();
                        }
                        while let Some(&(_, d)) = chars.peek().filter(|(_, d)| d.is_ascii_digit()) {
                            param.push(d);
                            chars.next();
                        }
                        let param: Option<i32> = param.parse().ok();
                        if let Some(&(_, ' ')) = chars.peek() {
                            chars.next();
                        }
                        if word == "u" {
                            if let Some(c) = param.and_then(unicode_char) {
                                text.push(c);
                            }
                            // Skip the single fallback character.
                            if chars
                                .peek()
                                .is_some_and(|&(_, f)| !matches!(f, '\\' | '{' | '}'))
                            {
                                chars.next();
                            }
                            continue;
                        }
                        self.emit(&mut text);
                        self.control_word(&word, param);
                    }
                    Some((_, '\'')) => {
                        chars.next();
                        let hex: String = chars.by_ref().take(2).map(|(_, h)| h).collect();
                        let byte = u8::from_str_radix(&hex, 16)
                            .map_err(|_| malformed(format!("bad hex escape at byte {at}")))?;
                        text.push(char::from(byte));
                    }
                    Some((_, symbol)) => {
                        chars.next();
                        match symbol {
                            '\\' | '{' | '}' => text.push(symbol),
                            '~' => text.push('\u{a0}'),
                            '_' => text.push('-'),
                            '*' => self.state.skip = true,
                            '\n' | '\r' => {
                                self.emit(&mut text);
                                self.out.push_break();
                            }
                            _ => {}
                        }
                    }
                    None => {}
                },
                '\r' | '\n' => {}
                _ => text.push(c),
            }
        }

        self.emit(&mut text);
        self.set_state(State::default());
        Ok(())
    }

    fn emit(&mut self, text: &mut String) {
        if text.is_empty() {
            return;
        }
        if self.state.skip {
            text.clear();
        } else if self.state.superscript {
            self.superscript.push_str(text);
            text.clear();
        } else {
            self.out.push_text(text);
            text.clear();
        }
    }

    fn control_word(&mut self, word: &str, param: Option<i32>) {
        let on = param != Some(0);
        let mut next = self.state;
        match word {
            "par" | "line" | "sect" | "page" | "tab" | "cell" | "row" => {
                if !self.state.skip {
                    self.out.push_break();
                }
                return;
            }
            "emdash" => return self.out.push_text("\u{2014}"),
            "endash" => return self.out.push_text("\u{2013}"),
            "lquote" => return self.out.push_text("\u{2018}"),
            "rquote" => return self.out.push_text("\u{2019}"),
            "ldblquote" => return self.out.push_text("\u{201C}"),
            "rdblquote" => return self.out.push_text("\u{201D}"),
            "b" => next.bold = on,
            "i" => next.italic = on,
            "super" | "up" => next.superscript = on,
            "nosupersub" => next.superscript = false,
            "plain" => {
                next.bold = false;
                next.italic = false;
                next.superscript = false;
            }
            "fonttbl" | "colortbl" | "stylesheet" | "info" | "pict" | "header" | "footer" => {
                next.skip = true
            }
            _ => {
                debug!(word, "RTF control word ignored");
                return;
            }
        }
        self.set_state(next);
    }

    /// Move to `next`, opening or closing the emphasis span and flushing a
    /// finished superscript run.
    fn set_state(&mut self, next: State) {
        if self.state.superscript && !next.superscript {
            self.flush_superscript();
        }
        let emphasized = next.bold || next.italic;
        match (emphasized && !next.skip, self.emphasis) {
            (true, None) => self.emphasis = Some(self.out.open_span(AnnotationKind::Emphasis, None)),
            (false, Some(id)) => {
                self.out.close_span(id);
                self.emphasis = None;
            }
            _ => {}
        }
        self.state = next;
    }

    /// Superscript Strong's numbers become annotations; any other
    /// superscript text stays in the text.
    fn flush_superscript(&mut self) {
        let run = std::mem::take(&mut self.superscript);
        let numbers: Vec<&str> = run.split_whitespace().collect();
        if !numbers.is_empty() && numbers.iter().all(|n| STRONGS_RE.is_match(n)) {
            for number in numbers {
                self.out
                    .attach_preceding(AnnotationKind::Strongs, number.to_ascii_uppercase());
            }
        } else {
            self.out.push_text(&run);
        }
    }
}

static STRONGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[HGhg]?\d{1,5}$").expect("valid regex"));

fn unicode_char(code: i32) -> Option<char> {
    let code = if code < 0 { code + 65536 } else { code };
    u32::try_from(code).ok().and_then(char::from_u32)
}

// ---------------------------------------------------------------------------
// Fallback cleanup
// ---------------------------------------------------------------------------

static RTF_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:par|line)\b ?").expect("valid regex"));

static RTF_HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\'([0-9a-fA-F]{2})").expect("valid regex"));

static RTF_CONTROL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+-?\d*|\\[^a-zA-Z]").expect("valid regex"));

static RTF_BRACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[{}]").expect("valid regex"));

/// Drop control words and braces, keeping the text between them.
pub(crate) fn strip_rtf(markup: &str) -> String {
    let text = RTF_BREAK_RE.replace_all(markup, " ");
    let text = RTF_HEX_RE.replace_all(&text, |caps: &regex::Captures<'_>| {
        u8::from_str_radix(&caps[1], 16).map_or_else(|_| String::new(), |b| char::from(b).to_string())
    });
    let text = RTF_CONTROL_RE.replace_all(&text, "");
    RTF_BRACE_RE.replace_all(&text, "").into_owned()
}
