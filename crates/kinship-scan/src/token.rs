use std::fmt;

/// Byte range of a token in the scanned source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The coarse categories the scanner separates source text into.
///
/// The scanner does not tokenize code itself: everything that is not a
/// literal, a comment or pure whitespace is lumped into `Code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Code,
    Whitespace,
    String,
    Template,
    Comment,
    Regex,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Code => "code",
            TokenKind::Whitespace => "whitespace",
            TokenKind::String => "string",
            TokenKind::Template => "template",
            TokenKind::Comment => "comment",
            TokenKind::Regex => "regex",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scanned piece of source.
///
/// `text` is the verbatim source slice; `inner` drops the delimiters
/// (quotes, comment markers, regex slashes) and is equal to `text` for code
/// and whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
    pub inner: String,
    /// Regex flags, empty for every other kind.
    pub flags: String,
    pub has_newline: bool,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, span: Span, text: &str, inner: &str) -> Self {
        Self {
            kind,
            span,
            text: text.to_string(),
            inner: inner.to_string(),
            flags: String::new(),
            has_newline: text.contains(&['\n', '\r'][..]),
        }
    }

    /// Whitespace and comments carry no meaning for the analysis passes.
    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub(crate) fn extend(&mut self, text: &str, end: usize) {
        self.text.push_str(text);
        self.inner.push_str(text);
        self.span.end = end;
        self.has_newline = self.has_newline || text.contains(&['\n', '\r'][..]);
    }
}

/// Concatenates the verbatim text of every token.
pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}
