use std::fmt::Write as _;

use crate::frontend::lexer::Spanned;
use crate::frontend::token::{FStringPart, Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints source-like lexemes
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    /// One line per token: `[line:col] KIND value`.
    pub fn render(&self, tokens: &[Spanned]) -> String {
        let mut out = String::new();
        for s in tokens {
            self.render_one(&mut out, s);
        }
        out
    }

    fn render_one(&self, out: &mut String, s: &Spanned) {
        let kind = s.token.kind();
        let colr = if self.color { Self::color(kind) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let text = if self.show_debug_repr {
            format!("{:?}", s.token)
        } else {
            Self::pretty_text(&s.token)
        };

        let _ = writeln!(
            out,
            "[{:02}:{:02}] {}{:<8} {}{}",
            s.span.line,
            s.span.col,
            colr,
            kind.label(),
            text,
            reset
        );
    }

    fn pretty_text(token: &Token) -> String {
        match token {
            Token::FString(parts) => {
                let holes = parts
                    .iter()
                    .filter(|p| matches!(p, FStringPart::Hole { .. }))
                    .count();
                format!("{} ({} holes)", token, holes)
            }
            _ => token.to_string(),
        }
    }

    fn color(kind: TokenKind) -> &'static str {
        match kind {
            TokenKind::Eof => Self::DIM,
            TokenKind::String | TokenKind::FString => Self::GRN,
            TokenKind::Number => Self::CYN,
            TokenKind::Identifier => Self::YEL,
            TokenKind::Operator => Self::MAG,
            TokenKind::Keyword => Self::BLU,
            TokenKind::Punctuation => Self::RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    #[test]
    fn test_pretty_plain_dump() {
        let tokens = Lexer::new("var x = 1").tokenize().unwrap();
        let out = TokenDumper::new().no_color().pretty().render(&tokens);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[01:01] KEYWORD  var",
                "[01:05] IDENT    x",
                "[01:07] OP       =",
                "[01:09] NUMBER   1",
                "[01:10] EOF      EOF",
            ]
        );
    }

    #[test]
    fn test_debug_dump_with_color() {
        let tokens = Lexer::new("\"s\"").tokenize().unwrap();
        let out = TokenDumper::new().render(&tokens);
        assert!(out.contains("String(\"s\")"));
        assert!(out.contains(TokenDumper::GRN));
        assert!(out.contains(TokenDumper::RESET));
    }
}
