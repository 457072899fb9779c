use crate::frontend::lexer::Span;

/// A literal value written directly in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// One segment of an f-string: literal text or an embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringSegment {
    Text(String),
    Expr(Expr),
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `42`, `1.5`, `"s"`, `true`, `null`
    Literal(Literal),

    /// A variable reference, resolved to a local or global slot by codegen.
    Identifier(String),

    /// `left op right`. `and`/`or` short-circuit.
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `not x`, `-x`
    UnaryOp { op: UnaryOp, operand: Box<Expr> },

    /// `[a, b, c]`
    ListLiteral(Vec<Expr>),

    /// `{k: v, ...}` with pairs in source order.
    DictLiteral(Vec<(Expr, Expr)>),

    /// `target[index]`. Chains nest: `a[i][j]` is `Subscript(Subscript(a, i), j)`.
    Subscript { target: Box<Expr>, index: Box<Expr> },

    /// `f"text {expr} text"`
    FStringLiteral(Vec<FStringSegment>),

    /// `name(args...)`. Callees are resolved by name when the call executes.
    Call { callee: String, args: Vec<Expr> },
}

/// A brace-delimited statement list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// Statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `var name = value` (value defaults to `null`)
    VarDecl { name: String, value: Option<Expr> },

    /// `name = value` or `container[index] = value`
    Assign { target: Expr, value: Expr },

    /// `func name(params) { body }`
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Block,
    },

    /// `if c { } elif c { } else { }`
    If {
        condition: Expr,
        then_block: Block,
        elifs: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },

    /// `while c { }`
    While { condition: Expr, body: Block },

    /// `for var in iterable { }`
    For {
        var: String,
        iterable: Expr,
        body: Block,
    },

    /// `return` or `return value`
    Return { value: Option<Expr>, span: Span },

    /// An expression evaluated for its side effects.
    Expr(Expr),

    /// A nested block.
    Block(Block),
}

impl Stmt {
    /// Short name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::VarDecl { .. } => "var declaration",
            Stmt::Assign { .. } => "assignment",
            Stmt::FunctionDef { .. } => "function definition",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::For { .. } => "for",
            Stmt::Return { .. } => "return",
            Stmt::Expr(_) => "expression statement",
            Stmt::Block(_) => "block",
        }
    }
}

impl Expr {
    /// Short name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Identifier(_) => "identifier",
            Expr::BinaryOp { .. } => "binary operation",
            Expr::UnaryOp { .. } => "unary operation",
            Expr::ListLiteral(_) => "list literal",
            Expr::DictLiteral(_) => "dict literal",
            Expr::Subscript { .. } => "subscript",
            Expr::FStringLiteral(_) => "f-string",
            Expr::Call { .. } => "call",
        }
    }
}
