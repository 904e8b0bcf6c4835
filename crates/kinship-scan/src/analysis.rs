//! Static analysis over scanner output
//!
//! Finds what a bundler needs to know about a module without parsing it:
//! whether it opens with a `"use strict"` directive, which single-literal
//! `require()` calls it makes, and which ambient globals of the original
//! host environment it touches.

use crate::error::ScanResult;
use crate::scanner::scan;
use crate::token::{join, Token, TokenKind};

/// Globals that a browser does not provide and that need a polyfill segment.
pub const AMBIENT_IDENTIFIERS: &[&str] = &["process", "Buffer"];

/// Everything the analysis passes found out about one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub strict: bool,
    /// Specifiers of static `require('...')` calls, in source order, duplicates kept.
    pub requires: Vec<String>,
    /// Ambient identifiers used, in `AMBIENT_IDENTIFIERS` order.
    pub ambient: Vec<&'static str>,
    pub tokens: Vec<Token>,
    /// The module body, normalized when requested.
    pub body: String,
}

/// Scans and analyses a code module.
///
/// With `normalize`, the directive prologue is stripped (the wrapper emits its
/// own) and the body is trimmed.
pub fn analyse(source: &str, normalize: bool) -> ScanResult<Analysis> {
    let mut tokens = scan(source)?;

    let (strict, patched) = check_strict_mode(&mut tokens, normalize);
    let requires = detect_static_requires(&tokens);
    let ambient = detect_ambient_identifiers(&tokens);

    let mut body = if patched { join(&tokens) } else { source.to_string() };
    if normalize {
        body = body.trim().to_string();
    }

    Ok(Analysis {
        strict,
        requires,
        ambient,
        tokens,
        body,
    })
}

/// Looks for a `"use strict"` directive before any code. Returns whether it
/// was found and whether the token list was modified.
pub fn check_strict_mode(tokens: &mut Vec<Token>, strip: bool) -> (bool, bool) {
    let Some(index) = tokens.iter().position(|t| t.is_significant()) else {
        return (false, false);
    };

    let token = &tokens[index];
    if token.kind != TokenKind::String || token.inner != "use strict" {
        return (false, false);
    }
    if !strip {
        return (true, false);
    }

    // Same-line whitespace after the directive goes with it
    let mut next = index + 1;
    while next < tokens.len() && tokens[next].kind == TokenKind::Whitespace && !tokens[next].has_newline {
        next += 1;
    }

    let mut count = next - index;
    if let Some(code) = tokens.get_mut(next).filter(|t| t.kind == TokenKind::Code) {
        let rest = strip_leading_semicolon(&code.text);
        if rest.len() != code.text.len() {
            code.span.start += code.text.len() - rest.len();
            code.text = rest.to_string();
            code.inner = code.text.clone();
            if code.text.is_empty() {
                count += 1;
            }
        }
    }

    tokens.drain(index..index + count);
    (true, true)
}

fn strip_leading_semicolon(text: &str) -> &str {
    let trimmed = text.trim_start_matches(' ');
    match trimmed.strip_prefix(';') {
        Some(rest) => rest.trim_start_matches(' '),
        None => text,
    }
}

/// Collects the specifier of every `require( '<literal>' )` call.
pub fn detect_static_requires(tokens: &[Token]) -> Vec<String> {
    let mut requires = Vec::new();
    let mut index = 0;

    while index < tokens.len() {
        if tokens[index].kind != TokenKind::Code || !ends_with_require_call(&tokens[index].text) {
            index += 1;
            continue;
        }

        let literal = skip_whitespace(tokens, index + 1);
        if tokens.get(literal).map(|t| t.kind) != Some(TokenKind::String) {
            index += 1;
            continue;
        }

        let closing = skip_whitespace(tokens, literal + 1);
        match tokens.get(closing) {
            Some(t) if t.kind == TokenKind::Code && t.text.trim_start().starts_with(')') => {
                requires.push(tokens[literal].inner.clone());
                // The closing code token may itself end with the next call
                index = closing;
            }
            _ => index += 1,
        }
    }

    requires
}

fn skip_whitespace(tokens: &[Token], mut index: usize) -> usize {
    while index < tokens.len() && tokens[index].kind == TokenKind::Whitespace {
        index += 1;
    }
    index
}

fn ends_with_require_call(text: &str) -> bool {
    let Some(before_paren) = text.trim_end().strip_suffix('(') else {
        return false;
    };
    let Some(before) = before_paren.trim_end().strip_suffix("require") else {
        return false;
    };
    !before.chars().next_back().is_some_and(|c| is_identifier_char(c) || c == '.')
}

/// Reports which ambient identifiers appear as free-standing words in code.
///
/// A name the module declares itself (`var`, `let`, `const`, `function`,
/// `class` or a parameter) shadows the global and is not reported, wherever
/// the declaration sits.
pub fn detect_ambient_identifiers(tokens: &[Token]) -> Vec<&'static str> {
    let code = code_view(tokens);
    AMBIENT_IDENTIFIERS
        .iter()
        .copied()
        .filter(|name| free_words(&code, name).next().is_some() && !declares(&code, name))
        .collect()
}

/// Code and whitespace as written, with every literal replaced by `0` and
/// every comment by a space.
fn code_view(tokens: &[Token]) -> String {
    let mut code = String::new();
    for token in tokens {
        match token.kind {
            TokenKind::Code | TokenKind::Whitespace => code.push_str(&token.text),
            TokenKind::Comment => code.push(' '),
            TokenKind::String | TokenKind::Template | TokenKind::Regex => code.push('0'),
        }
    }
    code
}

/// Byte offsets of `word` where it is neither part of a longer identifier
/// nor a property access.
fn free_words<'a>(text: &'a str, word: &'a str) -> impl Iterator<Item = usize> + 'a {
    text.match_indices(word).map(|(at, _)| at).filter(move |&at| {
        let before = text[..at].chars().next_back();
        let after = text[at + word.len()..].chars().next();
        !before.is_some_and(|c| is_identifier_char(c) || c == '.')
            && !after.is_some_and(is_identifier_char)
    })
}

const DECLARING_KEYWORDS: &[&str] = &["var", "let", "const", "function", "class"];

fn declares(code: &str, name: &str) -> bool {
    free_words(code, name).any(|at| {
        let before = code[..at].trim_end();
        let after = code[at + name.len()..].trim_start();
        DECLARING_KEYWORDS.iter().any(|keyword| ends_with_word(before, keyword))
            || after.starts_with("=>")
            || in_parameter_list(code, at, name.len())
            || in_destructuring(code, at, name.len())
    })
}

fn is_list_char(c: char) -> bool {
    is_identifier_char(c) || c.is_whitespace() || c == ','
}

/// `const { a, Buffer } = ...`: the word is bound by an object pattern
/// without renaming.
fn in_destructuring(code: &str, at: usize, len: usize) -> bool {
    let head = &code[..at];
    let Some(open) = head.rfind(|c: char| !is_list_char(c)) else {
        return false;
    };
    let tail = &code[at + len..];
    head[open..].starts_with('{')
        && tail.trim_start_matches(is_list_char).starts_with('}')
        && ["var", "let", "const"]
            .iter()
            .any(|keyword| ends_with_word(head[..open].trim_end(), keyword))
}

fn ends_with_word(text: &str, word: &str) -> bool {
    text.strip_suffix(word)
        .is_some_and(|rest| !rest.chars().next_back().is_some_and(|c| is_identifier_char(c) || c == '.'))
}

/// Whether the word at `at` sits in the parameter list of a `function` or
/// of a parenthesized arrow function. Default values are not followed.
fn in_parameter_list(code: &str, at: usize, len: usize) -> bool {
    let head = &code[..at];
    let Some(open) = head.rfind(|c: char| !is_list_char(c)) else {
        return false;
    };
    if !head[open..].starts_with('(') {
        return false;
    }

    let tail = &code[at + len..];
    let Some(close) = tail.find(|c: char| !is_list_char(c)) else {
        return false;
    };
    if !tail[close..].starts_with(')') {
        return false;
    }

    if tail[close + 1..].trim_start().starts_with("=>") {
        return true;
    }
    let callee = head[..open].trim_end();
    let callee = callee.trim_end_matches(is_identifier_char).trim_end();
    ends_with_word(callee, "function") || ends_with_word(head[..open].trim_end(), "function")
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Drops comments and collapses whitespace runs, leaving literals untouched.
///
/// A run containing a line break becomes one line break, so that code relying
/// on automatic semicolon insertion keeps working.
pub fn shrink(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut pending: Option<&'static str> = None;

    for token in tokens {
        match token.kind {
            TokenKind::Whitespace | TokenKind::Comment => {
                widen_gap(&mut pending, token.has_newline);
            }
            TokenKind::Code => {
                for piece in split_whitespace_runs(&token.text) {
                    match piece {
                        Piece::Gap(newline) => widen_gap(&mut pending, newline),
                        Piece::Text(text) => {
                            flush_gap(&mut out, &mut pending);
                            out.push_str(text);
                        }
                    }
                }
            }
            _ => {
                flush_gap(&mut out, &mut pending);
                out.push_str(&token.text);
            }
        }
    }

    out
}

fn widen_gap(pending: &mut Option<&'static str>, newline: bool) {
    if newline {
        *pending = Some("\n");
    } else if pending.is_none() {
        *pending = Some(" ");
    }
}

fn flush_gap(out: &mut String, pending: &mut Option<&'static str>) {
    if let Some(gap) = pending.take() {
        if !out.is_empty() {
            out.push_str(gap);
        }
    }
}

enum Piece<'a> {
    Text(&'a str),
    /// A whitespace run; `true` when it holds a line break.
    Gap(bool),
}

fn split_whitespace_runs(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        if !c.is_whitespace() {
            continue;
        }
        if start < at {
            pieces.push(Piece::Text(&text[start..at]));
        }
        let mut newline = c == '\n' || c == '\r';
        let mut end = at + c.len_utf8();
        while let Some(&(next_at, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            newline = newline || next == '\n' || next == '\r';
            end = next_at + next.len_utf8();
            chars.next();
        }
        pieces.push(Piece::Gap(newline));
        start = end;
    }

    if start < text.len() {
        pieces.push(Piece::Text(&text[start..]));
    }
    pieces
}
