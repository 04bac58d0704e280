//! Line-level lexing of ASB assembly text.

use crate::error::{AsbError, Result};
use crate::nls::Nls;

/// A non-empty, comment-free, trimmed source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine<'a> {
    /// 1-based line number in the original text.
    pub number: usize,
    pub text: &'a str,
}

/// Cut a trailing `;` comment that is not inside a quoted string.
pub fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, ';') => return &line[..i],
            _ => {}
        }
    }
    line
}

pub fn tokenize(source: &str) -> Vec<SourceLine<'_>> {
    source
        .lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = strip_comment(raw).trim();
            (!text.is_empty()).then_some(SourceLine { number: i + 1, text })
        })
        .collect()
}

/// Split `name = value` at the first `=`.
pub fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once('=')?;
    Some((name.trim(), value.trim()))
}

/// One run of a quoted literal: text to be encoded, or a raw `\xNN` byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Byte(u8),
}

/// A parsed quoted literal, still independent of any text encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quoted {
    pub pieces: Vec<Piece>,
}

impl Quoted {
    fn push_char(&mut self, c: char) {
        match self.pieces.last_mut() {
            Some(Piece::Text(text)) => text.push(c),
            _ => self.pieces.push(Piece::Text(c.to_string())),
        }
    }

    /// Encode text runs with `nls` and splice raw bytes in between. `None`
    /// if some text has no representation in `nls`.
    pub fn encode(&self, nls: Nls) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.extend(nls.encode(text)?),
                Piece::Byte(b) => out.push(*b),
            }
        }
        Some(out)
    }
}

fn hex_digit(c: Option<char>) -> Option<u8> {
    c?.to_digit(16).map(|d| d as u8)
}

/// Parse a complete double-quoted literal, resolving escapes.
pub fn parse_quoted(text: &str, line: usize) -> Result<Quoted> {
    let inner = text
        .strip_prefix('"')
        .ok_or_else(|| AsbError::syntax(line, format!("expected a quoted string, found `{text}`")))?;

    let mut out = Quoted::default();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let rest = chars.as_str().trim();
                if !rest.is_empty() {
                    return Err(AsbError::syntax(
                        line,
                        format!("unexpected `{rest}` after string literal"),
                    ));
                }
                return Ok(out);
            }
            '\\' => {
                let escaped = match chars.next() {
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('"') => '"',
                    Some('\'') => '\'',
                    Some('\\') => '\\',
                    Some('x') => {
                        let byte = hex_digit(chars.next())
                            .zip(hex_digit(chars.next()))
                            .map(|(hi, lo)| (hi << 4) | lo)
                            .ok_or_else(|| {
                                AsbError::syntax(line, "`\\x` needs two hex digits")
                            })?;
                        out.pieces.push(Piece::Byte(byte));
                        continue;
                    }
                    Some(other) => {
                        return Err(AsbError::syntax(
                            line,
                            format!("unknown escape sequence `\\{other}`"),
                        ))
                    }
                    None => break,
                };
                out.push_char(escaped);
            }
            c => out.push_char(c),
        }
    }

    Err(AsbError::syntax(line, "unterminated string literal"))
}

fn escape_char(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '"' => out.push_str("\\\""),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c => out.push(c),
    }
}

/// The shortest prefix of `bytes` that is one character which `nls` encodes
/// back to exactly that prefix.
fn exact_char(nls: Nls, bytes: &[u8]) -> Option<(char, usize)> {
    (1..=bytes.len().min(4)).find_map(|n| {
        let text = nls.decode_strict(&bytes[..n])?;
        let mut chars = text.chars();
        let c = chars.next()?;
        (chars.next().is_none() && nls.reproduces(&text, &bytes[..n])).then_some((c, n))
    })
}

/// Escape raw string bytes so that [`parse_quoted`] followed by
/// [`Quoted::encode`] with the same `nls` gives them back unchanged. Bytes
/// that do not survive a decode/encode cycle, and control characters other
/// than `\n`, `\r` and `\t`, are written as `\xNN`.
pub fn escape_bytes(nls: Nls, bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match exact_char(nls, &bytes[i..]) {
            Some((c, n)) if !c.is_control() || matches!(c, '\n' | '\r' | '\t') => {
                escape_char(&mut out, c);
                i += n;
            }
            _ => {
                out.push_str(&format!("\\x{:02x}", bytes[i]));
                i += 1;
            }
        }
    }
    out
}

/// Parse a numeric literal: decimal or `0x` lowercase hex, with an optional
/// leading `-`.
pub fn parse_number(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let magnitude = if let Some(hex) = body.strip_prefix("0x") {
        if hex.is_empty() || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()?
    } else {
        if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        body.parse::<u64>().ok()?
    };

    let value = i64::try_from(magnitude).ok()?;
    Some(if negative { -value } else { value })
}

pub fn is_number(text: &str) -> bool {
    parse_number(text).is_some()
}
