use tracing::warn;

use crate::error::{ScanError, ScanResult};
use crate::token::{Span, Token, TokenKind};

// Several of these cannot legally be followed by a slash at all, but a divide
// after any of them is never meant.
const KEYWORDS_ALLOWING_REGEX: &[&str] = &[
    "return", "throw", "catch", "if", "else", "do", "while", "for", "of", "in", "switch", "case",
    "new", "delete", "typeof", "instanceof", "void", "with",
];

const PUNCTUATION_ALLOWING_REGEX: &[u8] = b"&|=!?:,;([{<>";

// Bytes that end an identifier-like run.
const PUNCTUATION: &[u8] = b"&~#{}()[]<>-|\\/'\"`^+=%,.;:!?*@";

/// The last significant thing the scanner went through, kept up to date as
/// code is consumed so that a slash can be classified without looking back.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LastToken {
    Nothing,
    Word(Vec<u8>),
    Punct(u8),
    Literal(u8),
}

/// The scanner separating source text into code, whitespace, literals and comments.
pub struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    last: LastToken,
    in_word: bool,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner over source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            last: LastToken::Nothing,
            in_word: false,
        }
    }

    /// Scans the entire source and returns all tokens.
    pub fn scan(mut self) -> ScanResult<Vec<Token>> {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'/' => self.read_slash()?,
                quote @ (b'\'' | b'"') => self.read_quoted(quote),
                b'`' => self.read_template()?,
                _ => self.read_code(),
            }
        }
        Ok(self.tokens)
    }

    // Accumulator

    fn track(&mut self, byte: u8) {
        if is_whitespace(byte) {
            self.in_word = false;
        } else if PUNCTUATION.contains(&byte) {
            self.last = LastToken::Punct(byte);
            self.in_word = false;
        } else if self.in_word {
            if let LastToken::Word(word) = &mut self.last {
                word.push(byte);
            }
        } else {
            self.last = LastToken::Word(vec![byte]);
            self.in_word = true;
        }
    }

    fn regex_allowed(&self) -> bool {
        match &self.last {
            LastToken::Nothing => true,
            LastToken::Word(word) => KEYWORDS_ALLOWING_REGEX
                .iter()
                .any(|keyword| keyword.as_bytes() == word.as_slice()),
            LastToken::Punct(byte) => PUNCTUATION_ALLOWING_REGEX.contains(byte),
            LastToken::Literal(_) => false,
        }
    }

    // Emission

    fn push(&mut self, kind: TokenKind, start: usize, end: usize, inner: Span) -> &mut Token {
        let token = Token::new(
            kind,
            Span::new(start, end),
            &self.source[start..end],
            &self.source[inner.start..inner.end],
        );
        self.tokens.push(token);
        let index = self.tokens.len() - 1;
        &mut self.tokens[index]
    }

    /// Code runs are merged with a preceding code token, so that a divide
    /// operator never splits an expression in two.
    fn push_code(&mut self, start: usize, end: usize) {
        let source = self.source;
        let text = &source[start..end];
        match self.tokens.last_mut() {
            Some(previous) if previous.kind == TokenKind::Code => previous.extend(text, end),
            _ => {
                self.push(TokenKind::Code, start, end, Span::new(start, end));
            }
        }
    }

    fn push_literal(&mut self, kind: TokenKind, start: usize, end: usize, inner: Span) {
        let quote = self.bytes[start];
        self.push(kind, start, end, inner);
        self.last = LastToken::Literal(quote);
        self.in_word = false;
    }

    // Readers

    fn read_code(&mut self) {
        let start = self.pos;
        let mut end = start;
        let mut blank = true;

        while end < self.bytes.len() {
            let byte = self.bytes[end];
            if matches!(byte, b'/' | b'\'' | b'"' | b'`') {
                break;
            }
            blank = blank && is_whitespace(byte);
            self.track(byte);
            end += 1;
        }

        if blank {
            self.push(TokenKind::Whitespace, start, end, Span::new(start, end));
        } else {
            self.push_code(start, end);
        }
        self.pos = end;
    }

    fn read_slash(&mut self) -> ScanResult<()> {
        match self.bytes.get(self.pos + 1) {
            Some(b'/') => {
                self.read_line_comment();
                Ok(())
            }
            Some(b'*') => self.read_block_comment(),
            _ if self.regex_allowed() => {
                self.read_regex();
                Ok(())
            }
            _ => {
                // Just a divide operator
                let start = self.pos;
                self.track(b'/');
                self.push_code(start, start + 1);
                self.pos += 1;
                Ok(())
            }
        }
    }

    /// The line break is left out of the comment, so that dropping comments
    /// never glues two lines together.
    fn read_line_comment(&mut self) {
        let start = self.pos;
        let mut end = start + 2;

        while end < self.bytes.len() && !matches!(self.bytes[end], b'\n' | b'\r') {
            end += 1;
        }

        self.push(TokenKind::Comment, start, end, Span::new(start + 2, end));
        self.in_word = false;
        self.pos = end;
    }

    fn read_block_comment(&mut self) -> ScanResult<()> {
        let start = self.pos;
        let mut end = start + 2;

        while end + 1 < self.bytes.len() {
            if self.bytes[end] == b'*' && self.bytes[end + 1] == b'/' {
                self.push(TokenKind::Comment, start, end + 2, Span::new(start + 2, end));
                self.in_word = false;
                self.pos = end + 2;
                return Ok(());
            }
            end += 1;
        }

        Err(ScanError::UnterminatedComment {
            span: Span::new(start, self.bytes.len()),
        })
    }

    /// Single and double quoted strings end at the closing quote or at the
    /// first raw line break, whichever comes first. The line break belongs
    /// to the string.
    fn read_quoted(&mut self, quote: u8) {
        let start = self.pos;
        let len = self.bytes.len();
        let mut end = start + 1;

        while end < len {
            match self.bytes[end] {
                byte if byte == quote => {
                    self.push_literal(TokenKind::String, start, end + 1, Span::new(start + 1, end));
                    self.pos = end + 1;
                    return;
                }
                b'\n' => {
                    self.push_literal(TokenKind::String, start, end + 1, Span::new(start + 1, end));
                    self.pos = end + 1;
                    return;
                }
                b'\r' => {
                    let stop = if self.bytes.get(end + 1) == Some(&b'\n') { end + 2 } else { end + 1 };
                    self.push_literal(TokenKind::String, start, stop, Span::new(start + 1, end));
                    self.pos = stop;
                    return;
                }
                b'\\' => end += 2,
                _ => end += 1,
            }
        }

        // Unterminated at end of input: the string swallows the rest
        self.push_literal(TokenKind::String, start, len, Span::new(start + 1, len));
        self.pos = len;
    }

    fn read_template(&mut self) -> ScanResult<()> {
        let start = self.pos;
        let len = self.bytes.len();
        let mut end = start + 1;

        while end < len {
            match self.bytes[end] {
                b'`' => {
                    self.push_literal(TokenKind::Template, start, end + 1, Span::new(start + 1, end));
                    self.pos = end + 1;
                    return Ok(());
                }
                b'\\' => end += 2,
                _ => end += 1,
            }
        }

        Err(ScanError::UnterminatedTemplate {
            span: Span::new(start, len),
        })
    }

    fn read_regex(&mut self) {
        let start = self.pos;
        let len = self.bytes.len();
        let mut end = start + 1;
        let mut in_class = false;

        while end < len {
            match self.bytes[end] {
                b'\\' => {
                    end += 2;
                    continue;
                }
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => {
                    let mut flags_end = end + 1;
                    while flags_end < len && self.bytes[flags_end].is_ascii_lowercase() {
                        flags_end += 1;
                    }
                    let flags = self.source[end + 1..flags_end].to_string();
                    let token =
                        self.push(TokenKind::Regex, start, flags_end, Span::new(start + 1, end));
                    token.flags = flags;
                    self.last = LastToken::Literal(b'/');
                    self.in_word = false;
                    self.pos = flags_end;
                    return;
                }
                b'\n' => {
                    warn!(offset = start, "expecting a regex end, got a line break: falling back to code");
                    self.push_code(start, end + 1);
                    self.in_word = false;
                    self.pos = end + 1;
                    return;
                }
                b'\r' => {
                    warn!(offset = start, "expecting a regex end, got a carriage return: falling back to code");
                    let stop = if self.bytes.get(end + 1) == Some(&b'\n') { end + 2 } else { end + 1 };
                    self.push_code(start, stop);
                    self.in_word = false;
                    self.pos = stop;
                    return;
                }
                _ => {}
            }
            end += 1;
        }

        warn!(offset = start, "expecting a regex end, got end of input: falling back to code");
        self.push_code(start, len);
        self.pos = len;
    }
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Scans source text in one go.
pub fn scan(source: &str) -> ScanResult<Vec<Token>> {
    Scanner::new(source).scan()
}
