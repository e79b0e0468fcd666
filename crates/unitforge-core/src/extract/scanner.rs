//! Lexical helpers for the tolerant C++ scanner.
//!
//! The scanner never builds an AST. It blanks out comments, literal contents
//! and preprocessor lines (preserving byte offsets) and then walks the text
//! statement by statement.

use std::sync::OnceLock;

use regex::Regex;

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*"([^"]+)""#).expect("valid regex"))
}

/// Quoted `#include "..."` targets, in order of appearance.
pub fn quoted_includes(text: &str) -> Vec<String> {
    include_re()
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Whether the text defines a `main` function (after blanking).
pub fn defines_main(clean: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bint\s+main\s*\(").expect("valid regex"))
        .is_match(clean)
}

/// Replace comments, string/char literal contents and preprocessor lines with
/// spaces. Newlines are kept so offsets and line numbers stay valid.
pub fn blank_noise(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut line_start = true;

    while i < bytes.len() {
        let b = bytes[i];

        if line_start && b == b'#' {
            // Preprocessor directive, including backslash continuations.
            while i < bytes.len() && bytes[i] != b'\n' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                    out.push(b' ');
                    out.push(b'\n');
                    i += 2;
                    continue;
                }
                out.push(b' ');
                i += 1;
            }
            continue;
        }

        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(b' ');
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.extend_from_slice(b"  ");
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    out.push(if bytes[i] == b'\n' { b'\n' } else { b' ' });
                    i += 1;
                }
                if i < bytes.len() {
                    out.extend_from_slice(b"  ");
                    i += 2;
                }
            }
            b'"' | b'\'' => {
                // Digit separator (1'000) is not a char literal.
                let digit_sep = b == b'\''
                    && i > 0
                    && bytes[i - 1].is_ascii_hexdigit()
                    && bytes.get(i + 1).map_or(false, u8::is_ascii_hexdigit);
                if digit_sep {
                    out.push(b' ');
                    i += 1;
                    continue;
                }
                out.push(b);
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        out.extend_from_slice(b"  ");
                        i += 2;
                        continue;
                    }
                    if bytes[i] == b'\n' {
                        // Unterminated literal; stop at end of line.
                        break;
                    }
                    out.push(b' ');
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b {
                    out.push(b);
                    i += 1;
                }
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }

        if let Some(&last) = out.last() {
            if last == b'\n' {
                line_start = true;
            } else if !last.is_ascii_whitespace() {
                line_start = false;
            }
        }
    }

    // Only ASCII bytes were substituted for ASCII/UTF-8 sequences in place;
    // multi-byte characters inside blanked regions became multiple spaces.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Index of the bracket matching the opener at `open`, honouring nesting of
/// the same bracket pair only.
pub fn matching_close(text: &str, open: usize, opener: u8, closer: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes.get(open), Some(&opener));
    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        if b == opener {
            depth += 1;
        } else if b == closer {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Split at `delim` occurrences that are not nested inside `()`, `[]`, `{}`
/// or `<>`.
pub fn split_top_level(text: &str, delim: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth = (depth - 1).max(0),
            _ => {}
        }
        if ch == delim && depth == 0 {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
}

/// One statement-level chunk of a scope body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk<'a> {
    /// Text up to (not including) a top-level `;`.
    Declaration(&'a str),
    /// Text before a `{`, plus the brace body (without braces).
    Block { head: &'a str, body: &'a str },
}

/// Error raised when a `{` has no matching `}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unbalanced {
    pub offset: usize,
}

/// Split a blanked scope body into declarations and braced blocks.
///
/// Brace-initialisers inside a constructor's member-initializer list
/// (`: a_{x}, b_(y) {`) stay part of the head.
pub fn chunks(text: &str) -> Result<Vec<Chunk<'_>>, Unbalanced> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut paren_depth = 0i32;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => paren_depth += 1,
            b')' => paren_depth = (paren_depth - 1).max(0),
            b';' if paren_depth == 0 => {
                let head = &text[start..i];
                if !head.trim().is_empty() {
                    out.push(Chunk::Declaration(head));
                }
                start = i + 1;
            }
            b'{' => {
                let close = matching_close(text, i, b'{', b'}').ok_or(Unbalanced { offset: i })?;
                if paren_depth > 0 || is_member_brace_init(&text[start..i]) {
                    i = close + 1;
                    continue;
                }
                out.push(Chunk::Block {
                    head: &text[start..i],
                    body: &text[i + 1..close],
                });
                start = close + 1;
                i = close + 1;
                continue;
            }
            b'}' => return Err(Unbalanced { offset: i }),
            _ => {}
        }
        i += 1;
    }

    let tail = &text[start..];
    if !tail.trim().is_empty() {
        out.push(Chunk::Declaration(tail));
    }
    Ok(out)
}

/// `Foo(int x) : a_(x), b_` followed by `{` is a brace-init of `b_`, not a body.
/// Also covers `= {` aggregate initialisers.
fn is_member_brace_init(head: &str) -> bool {
    static INIT_LIST: OnceLock<Regex> = OnceLock::new();
    let trimmed = head.trim_end();
    if trimmed.ends_with('=') {
        return true;
    }
    let re = INIT_LIST.get_or_init(|| {
        Regex::new(r"\)\s*(?:const\s*)?(?:noexcept\s*)?:[^:]").expect("valid regex")
    });
    if !re.is_match(head) {
        return false;
    }
    trimmed
        .chars()
        .last()
        .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_' || c == '>')
}

/// Tokenise a type/declarator string at angle-depth zero: whitespace
/// separates tokens and `*`, `&`, `&&` are their own tokens.
pub fn type_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '<' | '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            '>' | ')' | ']' => {
                depth -= 1;
                if current.ends_with(' ') {
                    current.pop();
                }
                current.push(ch);
            }
            c if depth > 0 => {
                if c.is_whitespace() {
                    if !current.ends_with([' ', '<', '(', '[']) {
                        current.push(' ');
                    }
                } else if c == ',' {
                    if current.ends_with(' ') {
                        current.pop();
                    }
                    current.push_str(", ");
                } else {
                    current.push(c);
                }
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            '*' | '&' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                if ch == '&' && chars.get(i + 1) == Some(&'&') {
                    tokens.push("&&".to_string());
                    i += 1;
                } else {
                    tokens.push(ch.to_string());
                }
            }
            _ => current.push(ch),
        }
        i += 1;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `a::b::C` or `C`, optionally with a leading `::`.
pub fn is_qualified_identifier(token: &str) -> bool {
    let token = token.strip_prefix("::").unwrap_or(token);
    !token.is_empty() && token.split("::").all(is_identifier)
}
