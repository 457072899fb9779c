/// One piece of an f-string literal.
///
/// Text pieces already have their escapes resolved. Holes keep the raw
/// source of the `{...}` span together with its position so the parser can
/// lex and parse it as an expression and still report real locations.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Text(String),
    Hole {
        source: String,
        line: usize,
        col: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    String(std::string::String),
    FString(Vec<FStringPart>),

    // Keywords
    And,
    Or,
    Not,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Func,
    Return,
    Var,
    True,
    False,
    Null,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Comparison
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Assignment
    Assign,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Comma,
    Colon,
    Semicolon,

    // Identifier (user-defined name)
    Ident(std::string::String),

    Eof,
}

/// Coarse token classification used by diagnostics and the token dumper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    Number,
    String,
    FString,
    Operator,
    Punctuation,
    Eof,
}

impl TokenKind {
    pub fn label(self) -> &'static str {
        match self {
            TokenKind::Keyword => "KEYWORD",
            TokenKind::Identifier => "IDENT",
            TokenKind::Number => "NUMBER",
            TokenKind::String => "STRING",
            TokenKind::FString => "FSTRING",
            TokenKind::Operator => "OP",
            TokenKind::Punctuation => "PUNCT",
            TokenKind::Eof => "EOF",
        }
    }
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        use Token::*;
        match self {
            Integer(_) | Float(_) => TokenKind::Number,
            String(_) => TokenKind::String,
            FString(_) => TokenKind::FString,
            Ident(_) => TokenKind::Identifier,
            And | Or | Not | If | Elif | Else | While | For | In | Func | Return | Var | True
            | False | Null => TokenKind::Keyword,
            Plus | Minus | Star | Slash | Percent | EqEq | NotEq | Lt | Gt | LtEq | GtEq
            | Assign => TokenKind::Operator,
            LParen | RParen | LBracket | RBracket | LBrace | RBrace | Comma | Colon
            | Semicolon => TokenKind::Punctuation,
            Eof => TokenKind::Eof,
        }
    }

    /// Looks up the reserved word spelled `ident`, if any.
    pub fn keyword(ident: &str) -> Option<Token> {
        let token = match ident {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "if" => Token::If,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "in" => Token::In,
            "func" => Token::Func,
            "return" => Token::Return,
            "var" => Token::Var,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => return None,
        };
        Some(token)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::FString(parts) => {
                write!(f, "f\"")?;
                for part in parts {
                    match part {
                        FStringPart::Text(text) => write!(f, "{}", text)?,
                        FStringPart::Hole { source, .. } => write!(f, "{{{}}}", source)?,
                    }
                }
                write!(f, "\"")
            }
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Func => write!(f, "func"),
            Token::Return => write!(f, "return"),
            Token::Var => write!(f, "var"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::LtEq => write!(f, "<="),
            Token::GtEq => write!(f, ">="),
            Token::Assign => write!(f, "="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Eof => write!(f, "EOF"),
        }
    }
}
