//! Checked construct tree consumed by the translator.
//!
//! Every node carries its [`Span`]; expressions also carry the type class
//! and symbol the checker resolved for them. The small constructor helpers
//! exist so trees can be written out by hand in tests and benchmarks.

use kiln_core::{NodeKind, SourceNode, Span, SymbolId, TypeClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `#`
    Len,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A function literal or the body of a function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    /// Line of the closing token, when the front end knows it.
    pub end_line: u32,
}

impl FunctionExpr {
    pub fn new(params: &[&str], body: Vec<Stmt>) -> Self {
        Self {
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
            end_line: 0,
        }
    }

    /// Last line the function covers, starting at `line_defined`.
    pub fn last_line(&self, line_defined: u32) -> u32 {
        self.body
            .iter()
            .map(|stmt| stmt.span.line)
            .fold(self.end_line.max(line_defined), u32::max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Assign(String, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Function(FunctionExpr),
    Tuple(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: TypeClass,
    pub symbol: Option<SymbolId>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        let ty = match &kind {
            ExprKind::Nil => TypeClass::Null,
            ExprKind::Bool(_) | ExprKind::Logical(..) => TypeClass::Boolean,
            ExprKind::Integer(_) | ExprKind::Float(_) => TypeClass::Number,
            ExprKind::Str(_) => TypeClass::String,
            ExprKind::Function(_) => TypeClass::Function,
            ExprKind::Tuple(_) => TypeClass::Tuple,
            ExprKind::Object(_) => TypeClass::Anonymous,
            ExprKind::Binary(op, ..) if op.is_comparison() => TypeClass::Boolean,
            ExprKind::Binary(BinaryOp::Concat, ..) => TypeClass::String,
            _ => TypeClass::Unknown,
        };
        Self {
            kind,
            span: Span::default(),
            ty,
            symbol: None,
        }
    }

    pub fn nil() -> Self {
        Self::new(ExprKind::Nil)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprKind::Float(value))
    }

    pub fn string(value: &str) -> Self {
        Self::new(ExprKind::Str(value.to_string()))
    }

    pub fn ident(name: &str) -> Self {
        Self::new(ExprKind::Ident(name.to_string()))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(ExprKind::Unary(op, Box::new(operand)))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs)))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Logical(LogicalOp::Or, Box::new(lhs), Box::new(rhs)))
    }

    pub fn assign(name: &str, value: Expr) -> Self {
        Self::new(ExprKind::Assign(name.to_string(), Box::new(value)))
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call(Box::new(callee), args))
    }

    pub fn function(params: &[&str], body: Vec<Stmt>) -> Self {
        Self::new(ExprKind::Function(FunctionExpr::new(params, body)))
    }

    /// Place the node at `line:column`.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.span = Span::new(line, column);
        self
    }

    pub fn with_type(mut self, ty: TypeClass) -> Self {
        self.ty = ty;
        self
    }

    pub fn with_symbol(mut self, symbol: SymbolId) -> Self {
        self.symbol = Some(symbol);
        self
    }
}

impl SourceNode for Expr {
    fn kind(&self) -> NodeKind {
        match &self.kind {
            ExprKind::Nil => NodeKind::NilLiteral,
            ExprKind::Bool(_) => NodeKind::BooleanLiteral,
            ExprKind::Integer(_) | ExprKind::Float(_) => NodeKind::NumericLiteral,
            ExprKind::Str(_) => NodeKind::StringLiteral,
            ExprKind::Ident(_) => NodeKind::Identifier,
            ExprKind::Unary(..) => NodeKind::UnaryExpression,
            ExprKind::Binary(..) => NodeKind::BinaryExpression,
            ExprKind::Logical(..) => NodeKind::LogicalExpression,
            ExprKind::Assign(..) => NodeKind::AssignmentExpression,
            ExprKind::Call(..) => NodeKind::CallExpression,
            ExprKind::Function(_) => NodeKind::FunctionExpression,
            ExprKind::Tuple(_) => NodeKind::TupleExpression,
            ExprKind::Object(_) => NodeKind::ObjectLiteral,
        }
    }

    fn span(&self) -> Span {
        self.span
    }

    fn type_class(&self) -> TypeClass {
        self.ty
    }

    fn symbol(&self) -> Option<SymbolId> {
        self.symbol
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let name = init;`
    Let(String, Option<Expr>),
    Expr(Expr),
    /// `function name(params) { body }`, bound as a local.
    Function(String, FunctionExpr),
    Return(Option<Expr>),
    If(Expr, Vec<Stmt>, Option<Vec<Stmt>>),
    While(Expr, Vec<Stmt>),
    Break,
    Continue,
    Block(Vec<Stmt>),
    Class(String),
    Try(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    pub fn local(name: &str, init: Option<Expr>) -> Self {
        Self::new(StmtKind::Let(name.to_string(), init))
    }

    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    pub fn function(name: &str, params: &[&str], body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Function(name.to_string(), FunctionExpr::new(params, body)))
    }

    pub fn return_value(value: Expr) -> Self {
        Self::new(StmtKind::Return(Some(value)))
    }

    pub fn return_nothing() -> Self {
        Self::new(StmtKind::Return(None))
    }

    pub fn if_else(cond: Expr, then: Vec<Stmt>, otherwise: Option<Vec<Stmt>>) -> Self {
        Self::new(StmtKind::If(cond, then, otherwise))
    }

    pub fn while_loop(cond: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::While(cond, body))
    }

    pub fn break_loop() -> Self {
        Self::new(StmtKind::Break)
    }

    pub fn continue_loop() -> Self {
        Self::new(StmtKind::Continue)
    }

    pub fn block(body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(body))
    }

    /// Place the node at `line:column`.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.span = Span::new(line, column);
        self
    }
}

impl SourceNode for Stmt {
    fn kind(&self) -> NodeKind {
        match &self.kind {
            StmtKind::Let(..) => NodeKind::VariableStatement,
            StmtKind::Expr(_) => NodeKind::ExpressionStatement,
            StmtKind::Function(..) => NodeKind::FunctionDeclaration,
            StmtKind::Return(_) => NodeKind::ReturnStatement,
            StmtKind::If(..) => NodeKind::IfStatement,
            StmtKind::While(..) => NodeKind::WhileStatement,
            StmtKind::Break => NodeKind::BreakStatement,
            StmtKind::Continue => NodeKind::ContinueStatement,
            StmtKind::Block(_) => NodeKind::Block,
            StmtKind::Class(_) => NodeKind::ClassDeclaration,
            StmtKind::Try(_) => NodeKind::TryStatement,
        }
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// A whole source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
    /// Last line of the file.
    pub end_line: u32,
}

impl Program {
    pub fn new(body: Vec<Stmt>) -> Self {
        let end_line = body.iter().map(|stmt| stmt.span.line).max().unwrap_or(0);
        Self { body, end_line }
    }
}
