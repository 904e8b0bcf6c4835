//! Lexical scanning and static analysis of CommonJS modules.
//!
//! The scanner is not a JavaScript tokenizer. It only tells code apart from
//! literals and comments, which is all the bundler needs to find `require`
//! calls, strip a directive prologue or shrink a module body.

pub mod analysis;
pub mod error;
pub mod scanner;
pub mod token;

pub use analysis::{analyse, shrink, Analysis, AMBIENT_IDENTIFIERS};
pub use error::{ScanError, ScanResult};
pub use scanner::{scan, Scanner};
pub use token::{join, Span, Token, TokenKind};
