use crate::frontend::token::{FStringPart, Token};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

/// Lexing failure. Lexing stops at the first one.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{line}:{col}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self::starting_at(source, 1, 1)
    }

    /// Creates a lexer whose first character sits at `line:col`.
    ///
    /// Used to re-lex f-string holes so that positions point into the
    /// enclosing file rather than into the hole text.
    pub fn starting_at(source: &str, line: usize, col: usize) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line,
            col,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error_at(&self, message: impl Into<String>, line: usize, col: usize) -> LexError {
        LexError {
            message: message.into(),
            line,
            col,
        }
    }

    fn error_here(&self, message: impl Into<String>) -> LexError {
        self.error_at(message, self.line, self.col)
    }

    /// Skips whitespace (newlines included) and `#` comments.
    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    /// Consumes the character after a backslash and returns what it stands for.
    fn read_escape(&mut self) -> Result<char, LexError> {
        let (line, col) = (self.line, self.col);
        self.advance(); // consume '\'
        let resolved = match self.current() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some(ch) => {
                return Err(self.error_at(format!("unknown escape sequence: \\{}", ch), line, col));
            }
            None => {
                return Err(self.error_here("unexpected EOF in escape sequence"));
            }
        };
        self.advance();
        Ok(resolved)
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;
        let quote = self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some(ch) if Some(ch) == quote => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => string.push(self.read_escape()?),
                Some('\n') | None => {
                    return Err(self.error_at(
                        "unterminated string literal",
                        start_line,
                        start_col,
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_fstring(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance(); // 'f'
        let quote = self.advance();

        let mut parts = Vec::new();
        let mut text = String::new();

        loop {
            match self.current() {
                Some(ch) if Some(ch) == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => text.push(self.read_escape()?),
                Some('{') if self.peek() == Some('{') => {
                    self.advance();
                    self.advance();
                    text.push('{');
                }
                Some('}') if self.peek() == Some('}') => {
                    self.advance();
                    self.advance();
                    text.push('}');
                }
                Some('}') => {
                    return Err(self.error_here("single '}' is not allowed in f-string"));
                }
                Some('{') => {
                    if !text.is_empty() {
                        parts.push(FStringPart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(self.read_fstring_hole(quote)?);
                }
                Some('\n') | None => {
                    return Err(self.error_at(
                        "unterminated f-string literal",
                        start_line,
                        start_col,
                    ));
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }

        if !text.is_empty() {
            parts.push(FStringPart::Text(text));
        }
        Ok(Token::FString(parts))
    }

    /// Captures the raw text of one `{...}` span. The opening brace is current.
    fn read_fstring_hole(&mut self, quote: Option<char>) -> Result<FStringPart, LexError> {
        let open_line = self.line;
        let open_col = self.col;
        self.advance(); // '{'

        let line = self.line;
        let col = self.col;
        let mut source = String::new();
        let mut depth = 1usize;
        let mut inner_quote: Option<char> = None;

        loop {
            let ch = match self.current() {
                Some('\n') | None => {
                    return Err(self.error_at("unterminated '{' in f-string", open_line, open_col));
                }
                Some(ch) => ch,
            };

            if let Some(q) = inner_quote {
                if ch == q {
                    inner_quote = None;
                }
            } else if Some(ch) == quote {
                return Err(self.error_at("unterminated '{' in f-string", open_line, open_col));
            } else if ch == '"' || ch == '\'' {
                inner_quote = Some(ch);
            } else if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    break;
                }
            }

            source.push(ch);
            self.advance();
        }

        if source.trim().is_empty() {
            return Err(self.error_at("empty expression in f-string", open_line, open_col));
        }

        Ok(FStringPart::Hole { source, line, col })
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;

        // Hex: 0x... or 0X...
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance(); // '0'
            self.advance(); // 'x' or 'X'

            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }

            if hex.is_empty() {
                return Err(self.error_at("expected hex digits after 0x", start_line, start_col));
            }

            let value = i64::from_str_radix(&hex, 16).map_err(|_| {
                self.error_at(format!("invalid hex number: 0x{}", hex), start_line, start_col)
            })?;
            return Ok(Token::Integer(value));
        }

        let mut digits = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // Only treat '.' as a decimal point if followed by a digit
        if self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            digits.push('.');
            self.advance();
            while let Some(ch) = self.current() {
                if ch.is_ascii_digit() {
                    digits.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        // Exponent: e10, E-3, e+7
        if matches!(self.current(), Some('e') | Some('E')) {
            let sign_len = usize::from(matches!(self.peek(), Some('+') | Some('-')));
            if self.peek_at(1 + sign_len).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                digits.push('e');
                self.advance();
                if sign_len == 1 {
                    if let Some(sign) = self.advance() {
                        digits.push(sign);
                    }
                }
                while let Some(ch) = self.current() {
                    if ch.is_ascii_digit() {
                        digits.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        if is_float {
            let value: f64 = digits.parse().map_err(|_| {
                self.error_at(format!("invalid float: {}", digits), start_line, start_col)
            })?;
            Ok(Token::Float(value))
        } else {
            let value: i64 = digits.parse().map_err(|_| {
                self.error_at(
                    format!("integer literal out of range: {}", digits),
                    start_line,
                    start_col,
                )
            })?;
            Ok(Token::Integer(value))
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::keyword(&ident).unwrap_or(Token::Ident(ident))
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    /// Lexes the whole source. The result always ends with `Token::Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    return Ok(tokens);
                }
                Some('"') | Some('\'') => self.read_string()?,
                Some('f') if matches!(self.peek(), Some('"') | Some('\'')) => {
                    self.read_fstring()?
                }
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
                Some(ch) => match self.read_operator() {
                    Some(token) => token,
                    None => {
                        return Err(self.error_here(format!("unexpected character '{}'", ch)));
                    }
                },
            };

            tokens.push(Spanned { token, span });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens: Vec<Token> = lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect();
        assert_eq!(tokens.pop(), Some(Token::Eof));
        tokens
    }

    fn lex_err(source: &str) -> LexError {
        Lexer::new(source).tokenize().unwrap_err()
    }

    #[test]
    fn test_var_declaration() {
        let t = tokens("var x = 42");
        assert_eq!(
            t,
            vec![
                Token::Var,
                Token::Ident("x".to_string()),
                Token::Assign,
                Token::Integer(42)
            ]
        );
    }

    #[test]
    fn test_all_keywords() {
        let t = tokens(
            "and or not if elif else while for in func return var true false null",
        );
        assert_eq!(
            t,
            vec![
                Token::And,
                Token::Or,
                Token::Not,
                Token::If,
                Token::Elif,
                Token::Else,
                Token::While,
                Token::For,
                Token::In,
                Token::Func,
                Token::Return,
                Token::Var,
                Token::True,
                Token::False,
                Token::Null,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let t = tokens("iffy formula nullable");
        assert_eq!(
            t,
            vec![
                Token::Ident("iffy".to_string()),
                Token::Ident("formula".to_string()),
                Token::Ident("nullable".to_string()),
            ]
        );
    }

    #[test]
    fn test_comparison_operators() {
        let t = tokens("== != < > <= >= =");
        assert_eq!(
            t,
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::Lt,
                Token::Gt,
                Token::LtEq,
                Token::GtEq,
                Token::Assign
            ]
        );
    }

    #[test]
    fn test_punctuation() {
        let t = tokens("( ) [ ] { } , : ;");
        assert_eq!(
            t,
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBracket,
                Token::RBracket,
                Token::LBrace,
                Token::RBrace,
                Token::Comma,
                Token::Colon,
                Token::Semicolon
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let t = tokens("7 3.25 1e3 2.5E-2 0x2A");
        assert_eq!(
            t,
            vec![
                Token::Integer(7),
                Token::Float(3.25),
                Token::Float(1000.0),
                Token::Float(0.025),
                Token::Integer(42),
            ]
        );
    }

    #[test]
    fn test_minus_is_separate_token() {
        let t = tokens("-5");
        assert_eq!(t, vec![Token::Minus, Token::Integer(5)]);
    }

    #[test]
    fn test_exponent_needs_digits() {
        // `e` without digits is an identifier, not part of the number
        let t = tokens("2e");
        assert_eq!(t, vec![Token::Integer(2), Token::Ident("e".to_string())]);
    }

    #[test]
    fn test_integer_out_of_range() {
        let e = lex_err("99999999999999999999");
        assert!(e.message.contains("out of range"));
    }

    #[test]
    fn test_string_escapes() {
        let t = tokens(r#""a\nb\tc\\\"" 'it\'s'"#);
        assert_eq!(
            t,
            vec![
                Token::String("a\nb\tc\\\"".to_string()),
                Token::String("it's".to_string())
            ]
        );
    }

    #[test]
    fn test_comments_are_discarded() {
        let t = tokens("var a = 1 # trailing\n# full line\nvar b = 2");
        assert_eq!(t.len(), 8);
        assert!(!t.iter().any(|tok| matches!(tok, Token::Ident(s) if s == "trailing")));
    }

    #[test]
    fn test_spans_track_lines_and_columns() {
        let spanned = Lexer::new("var x\n  print(x)").tokenize().unwrap();
        assert_eq!(spanned[0].span, Span { line: 1, col: 1 });
        assert_eq!(spanned[1].span, Span { line: 1, col: 5 });
        assert_eq!(spanned[2].span, Span { line: 2, col: 3 });
    }

    #[test]
    fn test_fstring_parts() {
        let t = tokens(r#"f"hi {name}, {{x}} {a + 1}!""#);
        assert_eq!(
            t,
            vec![Token::FString(vec![
                FStringPart::Text("hi ".to_string()),
                FStringPart::Hole {
                    source: "name".to_string(),
                    line: 1,
                    col: 7
                },
                FStringPart::Text(", {x} ".to_string()),
                FStringPart::Hole {
                    source: "a + 1".to_string(),
                    line: 1,
                    col: 21
                },
                FStringPart::Text("!".to_string()),
            ])]
        );
    }

    #[test]
    fn test_fstring_hole_with_nested_string() {
        let t = tokens(r#"f"{d['k']}""#);
        assert_eq!(
            t,
            vec![Token::FString(vec![FStringPart::Hole {
                source: "d['k']".to_string(),
                line: 1,
                col: 4
            }])]
        );
    }

    #[test]
    fn test_identifier_f_is_not_fstring() {
        let t = tokens("f(x)");
        assert_eq!(t[0], Token::Ident("f".to_string()));
    }

    #[test]
    fn test_unterminated_string_error() {
        let e = lex_err("var s = \"abc");
        assert_eq!((e.line, e.col), (1, 9));
        assert!(e.message.contains("unterminated"));
    }

    #[test]
    fn test_unterminated_string_newline_error() {
        let e = lex_err("'abc\n'");
        assert!(e.message.contains("unterminated"));
    }

    #[test]
    fn test_unknown_escape_error() {
        let e = lex_err(r#""\q""#);
        assert!(e.message.contains("unknown escape"));
    }

    #[test]
    fn test_unexpected_character_error() {
        let e = lex_err("var x = 1\nx = $");
        assert_eq!((e.line, e.col), (2, 5));
        assert!(e.message.contains("'$'"));
    }

    #[test]
    fn test_fstring_errors() {
        assert!(lex_err(r#"f"{x""#).message.contains("unterminated"));
        assert!(lex_err(r#"f"}""#).message.contains("single '}'"));
        assert!(lex_err(r#"f"{ }""#).message.contains("empty expression"));
    }

    #[test]
    fn test_starting_at_offsets_positions() {
        let spanned = Lexer::starting_at("a + b", 4, 10).tokenize().unwrap();
        assert_eq!(spanned[0].span, Span { line: 4, col: 10 });
        assert_eq!(spanned[2].span, Span { line: 4, col: 14 });
    }
}
