use crate::frontend::lexer::{Lexer, Span, Spanned};
use crate::frontend::parser_error::SyntaxError;
use crate::frontend::token::{FStringPart, Token};
use crate::lang::node::{BinaryOp, Block, Expr, FStringSegment, Literal, Stmt, UnaryOp};
use crate::lang::program::Program;

/// Binding power of each binary operator, low to high.
fn binary_precedence(token: &Token) -> Option<(BinaryOp, u8)> {
    let entry = match token {
        Token::Or => (BinaryOp::Or, 1),
        Token::And => (BinaryOp::And, 2),
        Token::EqEq => (BinaryOp::Eq, 3),
        Token::NotEq => (BinaryOp::Ne, 3),
        Token::Lt => (BinaryOp::Lt, 4),
        Token::Gt => (BinaryOp::Gt, 4),
        Token::LtEq => (BinaryOp::Le, 4),
        Token::GtEq => (BinaryOp::Ge, 4),
        Token::Plus => (BinaryOp::Add, 5),
        Token::Minus => (BinaryOp::Sub, 5),
        Token::Star => (BinaryOp::Mul, 6),
        Token::Slash => (BinaryOp::Div, 6),
        Token::Percent => (BinaryOp::Mod, 6),
        _ => return None,
    };
    Some(entry)
}

/// Recursive-descent parser for AquaScript.
///
/// Statements are parsed by recursive descent; expressions use precedence
/// climbing over the ladder `or < and < ==,!= < comparisons < +,- < *,/,% <
/// unary < primary`. All binary operators are left-associative.
///
/// The first grammar violation aborts parsing with a [`SyntaxError`].
/// Deepest nesting of blocks, brackets, unary operators and chained binary
/// operators that the parser accepts.
pub const MAX_NESTING: usize = 256;

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Current syntactic nesting, bounded by [`MAX_NESTING`].
    depth: usize,
    /// Span of the most recently consumed token.
    ///
    /// Used to provide stable source locations for errors that occur after
    /// advancing past the last token or at end-of-file.
    last_span: Option<Span>,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            last_span: None,
        }
    }

    /// Returns the current token without consuming it.
    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    /// Advances the token stream by one and returns the consumed token.
    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if let Some(s) = &token {
            self.last_span = Some(s.span);
        }
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.current().map(|s| &s.token)
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Eof))
    }

    /// Constructs a `SyntaxError` at the most relevant location.
    ///
    /// Priority:
    /// 1. If `current()` exists, use its span.
    /// 2. Else, use `last_span` (e.g. after consuming EOF or falling off the end).
    /// 3. Else, default to (1,1) for truly empty input.
    fn enter(&mut self) -> Result<(), SyntaxError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "nesting too deep (more than {} levels)",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let span = self
            .current()
            .map(|s| s.span)
            .or(self.last_span)
            .unwrap_or(Span { line: 1, col: 1 });
        SyntaxError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            None | Some(Token::Eof) => "end of input".to_string(),
            Some(token) => format!("'{}'", token),
        }
    }

    fn expect(&mut self, token: Token) -> Result<Spanned, SyntaxError> {
        if self.at(&token) {
            // `at` guarantees the token exists
            self.advance()
                .ok_or_else(|| self.error(format!("expected '{}'", token)))
        } else {
            Err(self.error(format!(
                "expected '{}', found {}",
                token,
                self.describe_current()
            )))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!(
                "expected {}, found {}",
                what,
                self.describe_current()
            ))),
        }
    }

    /// Parses a complete program up to `Token::Eof`.
    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let mut body = Vec::new();
        loop {
            while self.at(&Token::Semicolon) {
                self.advance();
            }
            if self.at_eof() {
                break;
            }
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error("unexpected end of input")),
        };

        match token {
            Token::Var => self.parse_var(),
            Token::Func => self.parse_function(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::For => self.parse_for(),
            Token::Return => self.parse_return(),
            Token::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            Token::Ident(_)
            | Token::Integer(_)
            | Token::Float(_)
            | Token::String(_)
            | Token::FString(_)
            | Token::True
            | Token::False
            | Token::Null
            | Token::LParen
            | Token::LBracket
            | Token::Minus
            | Token::Not => self.parse_expression_statement(),
            other => Err(self.error(format!(
                "unexpected token '{}' at start of statement",
                other
            ))),
        }
    }

    /// `var name [= expr]`
    fn parse_var(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance(); // consume 'var'
        let name = self.expect_ident("variable name after 'var'")?;
        let value = if self.at(&Token::Assign) {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Stmt::VarDecl { name, value })
    }

    /// `func name(a, b) { ... }`
    fn parse_function(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance(); // consume 'func'
        let name = self.expect_ident("function name after 'func'")?;
        self.expect(Token::LParen)?;

        let mut params = Vec::new();
        if !self.at(&Token::RParen) {
            loop {
                let param = self.expect_ident("parameter name")?;
                if params.contains(&param) {
                    return Err(self.error(format!("duplicate parameter '{}'", param)));
                }
                params.push(param);
                if self.at(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        let body = self.parse_block()?;
        Ok(Stmt::FunctionDef { name, params, body })
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance(); // consume 'if'
        let condition = self.parse_expression()?;
        let then_block = self.parse_block()?;

        let mut elifs = Vec::new();
        while self.at(&Token::Elif) {
            self.advance();
            let cond = self.parse_expression()?;
            let block = self.parse_block()?;
            elifs.push((cond, block));
        }

        let else_block = if self.at(&Token::Else) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_block,
            elifs,
            else_block,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance(); // consume 'while'
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { condition, body })
    }

    /// `for x in expr { ... }`
    fn parse_for(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance(); // consume 'for'
        let var = self.expect_ident("loop variable after 'for'")?;
        self.expect(Token::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            iterable,
            body,
        })
    }

    /// `return [expr]`
    ///
    /// The value is omitted when the next token closes the block, separates
    /// statements, ends the input, or starts on a later line.
    fn parse_return(&mut self) -> Result<Stmt, SyntaxError> {
        let span = match self.advance() {
            Some(s) => s.span,
            None => return Err(self.error("expected 'return'")),
        };

        let ends_here = match self.current() {
            None => true,
            Some(next) => {
                matches!(next.token, Token::RBrace | Token::Semicolon | Token::Eof)
                    || next.span.line > span.line
            }
        };

        let value = if ends_here {
            None
        } else {
            Some(self.parse_expression()?)
        };
        Ok(Stmt::Return { value, span })
    }

    /// `{ stmt* }`
    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        self.expect(Token::LBrace)?;
        self.enter()?;
        let block = self.parse_block_body();
        self.leave(1);
        block
    }

    fn parse_block_body(&mut self) -> Result<Block, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            while self.at(&Token::Semicolon) {
                self.advance();
            }
            if self.at(&Token::RBrace) {
                self.advance();
                return Ok(Block { stmts });
            }
            if self.at_eof() {
                return Err(self.error("unexpected EOF, expected '}'"));
            }
            stmts.push(self.parse_statement()?);
        }
    }

    /// Expression statement, plain assignment, or subscript assignment.
    fn parse_expression_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let expr = self.parse_expression()?;
        if !self.at(&Token::Assign) {
            return Ok(Stmt::Expr(expr));
        }

        if !matches!(expr, Expr::Identifier(_) | Expr::Subscript { .. }) {
            return Err(self.error(format!("cannot assign to {}", expr.kind_name())));
        }
        self.advance(); // consume '='
        let value = self.parse_expression()?;
        Ok(Stmt::Assign {
            target: expr,
            value,
        })
    }

    pub fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let expr = self.parse_binary(1);
        self.leave(1);
        expr
    }

    /// Each folded operator deepens the left operand, so it counts as one
    /// level of nesting until the chain ends.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        let mut levels = 0;

        let result = loop {
            let Some((op, prec)) = self.peek().and_then(binary_precedence) else {
                break Ok(left);
            };
            if prec < min_prec {
                break Ok(left);
            }
            if let Err(e) = self.enter() {
                break Err(e);
            }
            levels += 1;
            self.advance();
            let right = match self.parse_binary(prec + 1) {
                Ok(right) => right,
                Err(e) => break Err(e),
            };
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        };

        self.leave(levels);
        result
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave(1);
        let operand = operand?;
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    /// Primary expression followed by any number of `[index]` suffixes.
    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        while self.at(&Token::LBracket) {
            self.advance();
            let index = self.parse_expression()?;
            self.expect(Token::RBracket)?;
            expr = Expr::Subscript {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let spanned = match self.current() {
            Some(s) if !matches!(s.token, Token::Eof) => s.clone(),
            _ => return Err(self.error("unexpected end of input, expected an expression")),
        };

        let expr = match spanned.token {
            Token::Integer(n) => Expr::Literal(Literal::Int(n)),
            Token::Float(n) => Expr::Literal(Literal::Float(n)),
            Token::String(s) => Expr::Literal(Literal::Str(s)),
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::Null => Expr::Literal(Literal::Null),
            Token::FString(parts) => {
                self.advance();
                return self.parse_fstring(parts);
            }
            Token::Ident(name) => {
                self.advance();
                if self.at(&Token::LParen) {
                    let args = self.parse_arguments()?;
                    return Ok(Expr::Call { callee: name, args });
                }
                return Ok(Expr::Identifier(name));
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            Token::LBracket => return self.parse_list(),
            Token::LBrace => return self.parse_dict(),
            other => {
                return Err(self.error(format!(
                    "unexpected token '{}', expected an expression",
                    other
                )));
            }
        };

        self.advance();
        Ok(expr)
    }

    /// `(arg, arg, ...)` after a callee name.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        while !self.at(&Token::RParen) {
            if self.at_eof() {
                return Err(self.error("unexpected EOF, expected ')'"));
            }
            args.push(self.parse_expression()?);
            if self.at(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// `[a, b, c]` with an optional trailing comma.
    fn parse_list(&mut self) -> Result<Expr, SyntaxError> {
        self.advance(); // consume '['
        let mut items = Vec::new();
        while !self.at(&Token::RBracket) {
            if self.at_eof() {
                return Err(self.error("unexpected EOF, expected ']'"));
            }
            items.push(self.parse_expression()?);
            if self.at(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RBracket)?;
        Ok(Expr::ListLiteral(items))
    }

    /// `{k: v, ...}` with an optional trailing comma.
    fn parse_dict(&mut self) -> Result<Expr, SyntaxError> {
        self.advance(); // consume '{'
        let mut pairs = Vec::new();
        while !self.at(&Token::RBrace) {
            if self.at_eof() {
                return Err(self.error("unexpected EOF, expected '}'"));
            }
            let key = self.parse_expression()?;
            self.expect(Token::Colon)?;
            let value = self.parse_expression()?;
            pairs.push((key, value));
            if self.at(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::DictLiteral(pairs))
    }

    /// Re-lexes and parses every hole of an f-string as a standalone expression.
    fn parse_fstring(&self, parts: Vec<FStringPart>) -> Result<Expr, SyntaxError> {
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                FStringPart::Text(text) => segments.push(FStringSegment::Text(text)),
                FStringPart::Hole { source, line, col } => {
                    let tokens = Lexer::starting_at(&source, line, col)
                        .tokenize()
                        .map_err(|e| SyntaxError {
                            message: format!("in f-string expression: {}", e.message),
                            line: e.line,
                            col: e.col,
                        })?;
                    let mut inner = Parser::new(tokens);
                    inner.depth = self.depth;
                    let expr = inner.parse_expression()?;
                    if !inner.at_eof() {
                        return Err(inner.error(format!(
                            "unexpected {} in f-string expression",
                            inner.describe_current()
                        )));
                    }
                    segments.push(FStringSegment::Expr(expr));
                }
            }
        }
        Ok(Expr::FStringLiteral(segments))
    }
}
