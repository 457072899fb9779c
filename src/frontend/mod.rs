//! Source text to AST: lexing, parsing, and token dumps for debugging.

pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod token;
pub mod token_dumper;

pub use lexer::{LexError, Lexer, Span, Spanned};
pub use parser::Parser;
pub use parser_error::SyntaxError;
pub use token::{FStringPart, Token, TokenKind};
