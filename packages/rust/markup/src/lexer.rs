//! Tag/text tokenizer for the angle-bracket dialects (OSIS, GBF, ThML, TEI).
//!
//! Works on `&str`, so every token boundary is a UTF-8 character boundary:
//! tags only start at `<` and end at `>`, both ASCII.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use scriptorium_shared::{FormatError, Result, ScriptoriumError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    Text(&'a str),
    Start(Tag<'a>),
    End(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tag<'a> {
    pub name: &'a str,
    pub attrs: Vec<(&'a str, String)>,
    /// Written as `<name ... />`.
    pub empty: bool,
}

impl Tag<'_> {
    /// Attribute value, matched case-insensitively; entities already decoded.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub(crate) fn malformed(message: String) -> ScriptoriumError {
    FormatError::Malformed(message).into()
}

/// Split markup into text runs and tags. Comments and processing
/// instructions are dropped. A `<` not followed by a tag character is text.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut at = 0;

    while let Some(rel) = input[at..].find('<') {
        let lt = at + rel;
        let next = bytes.get(lt + 1).copied();
        let is_markup = matches!(next, Some(b) if b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'));
        if !is_markup {
            at = lt + 1;
            continue;
        }
        if text_start < lt {
            tokens.push(Token::Text(&input[text_start..lt]));
        }

        if input[lt..].starts_with("<!--") {
            let close = input[lt + 4..]
                .find("-->")
                .ok_or_else(|| malformed(format!("unterminated comment at byte {lt}")))?;
            at = lt + 4 + close + 3;
        } else {
            let gt = tag_end(bytes, lt)
                .ok_or_else(|| malformed(format!("unterminated tag at byte {lt}")))?;
            if !matches!(next, Some(b'!' | b'?')) {
                tokens.push(parse_tag(&input[lt + 1..gt], lt)?);
            }
            at = gt + 1;
        }
        text_start = at;
    }

    if text_start < input.len() {
        tokens.push(Token::Text(&input[text_start..]));
    }
    Ok(tokens)
}

/// Index of the `>` closing the tag opened at `lt`. Quoted attribute values
/// may contain `>`; a bare `<` before the close means the tag never ended.
fn tag_end(bytes: &[u8], lt: usize) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(lt + 1) {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), b) if b == q => quote = None,
            (None, b'>') => return Some(i),
            (None, b'<') => return None,
            _ => {}
        }
    }
    None
}

fn parse_tag(body: &str, at: usize) -> Result<Token<'_>> {
    if let Some(name) = body.strip_prefix('/') {
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed(format!("empty end tag at byte {at}")));
        }
        return Ok(Token::End(name));
    }

    let (body, empty) = match body.strip_suffix('/') {
        Some(inner) => (inner, true),
        None => (body, false),
    };
    let name_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let name = &body[..name_end];
    let mut rest = body[name_end..].trim_start();
    let mut attrs = Vec::new();

    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        rest = rest[key_end..].trim_start();
        let Some(after_eq) = rest.strip_prefix('=') else {
            attrs.push((key, String::new()));
            continue;
        };
        let after_eq = after_eq.trim_start();
        let (value, remaining) = match after_eq.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let close = after_eq[1..].find(q).ok_or_else(|| {
                    malformed(format!("unterminated value of {key} at byte {at}"))
                })?;
                (&after_eq[1..1 + close], &after_eq[close + 2..])
            }
            _ => {
                let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };
        attrs.push((key, decode_entities(value).into_owned()));
        rest = remaining.trim_start();
    }

    Ok(Token::Start(Tag { name, attrs, empty }))
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z]{2,8});").expect("valid regex")
});

/// Decode the XML entities plus `&nbsp;` and numeric references.
/// Unknown names are left as written.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    ENTITY_RE.replace_all(text, |caps: &Captures<'_>| {
        let decoded = match &caps[1] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            other => numeric(other),
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
}

fn numeric(name: &str) -> Option<char> {
    let digits = name.strip_prefix('#')?;
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start<'a, 'b>(token: &'a Token<'b>) -> &'a Tag<'b> {
        match token {
            Token::Start(tag) => tag,
            other => panic!("expected a start tag, got {other:?}"),
        }
    }

    #[test]
    fn splits_text_and_tags() {
        let tokens = tokenize(r#"In <w lemma="strong:G746">beginning</w>."#).unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], Token::Text("In "));
        let w = start(&tokens[1]);
        assert_eq!(w.name, "w");
        assert_eq!(w.attr("LEMMA"), Some("strong:G746"));
        assert!(!w.empty);
        assert_eq!(tokens[3], Token::End("w"));
        assert_eq!(tokens[4], Token::Text("."));
    }

    #[test]
    fn quoted_values_may_hold_angle_brackets() {
        let tokens = tokenize(r#"<note n='a>b' type="x"/>"#).unwrap();
        let note = start(&tokens[0]);
        assert!(note.empty);
        assert_eq!(note.attr("n"), Some("a>b"));
        assert_eq!(note.attr("type"), Some("x"));
    }

    #[test]
    fn multibyte_text_is_never_split() {
        let input = "ἐν ἀρχῇ<br/>ἦν ὁ λόγος";
        let tokens = tokenize(input).unwrap();
        assert_eq!(tokens[0], Token::Text("ἐν ἀρχῇ"));
        assert_eq!(tokens[2], Token::Text("ἦν ὁ λόγος"));
    }

    #[test]
    fn stray_less_than_is_text_and_comments_vanish() {
        let tokens = tokenize("1 < 2<!-- hidden -->!").unwrap();
        assert_eq!(tokens, vec![Token::Text("1 < 2"), Token::Text("!")]);
    }

    #[test]
    fn unterminated_tag_is_malformed() {
        let err = tokenize(r#"word <w lemma="G1">x"#).unwrap_err();
        assert!(matches!(err, ScriptoriumError::Format(FormatError::Malformed(_))));
        assert!(tokenize("a <b c <d>").is_err());
    }

    #[test]
    fn gbf_codes_tokenize_as_bare_names() {
        let tokens = tokenize("God<WG2316><WTN-NSM>").unwrap();
        assert_eq!(start(&tokens[1]).name, "WG2316");
        assert_eq!(start(&tokens[2]).name, "WTN-NSM");
    }

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#233;t&#xE9;"), "été");
        assert_eq!(decode_entities("&quot;x&apos;"), "\"x'");
        assert_eq!(decode_entities("&bogus; &"), "&bogus; &");
        assert!(matches!(decode_entities("plain"), Cow::Borrowed(_)));
    }
}
