//! Facts the front end supplies about each source node.
//!
//! The code generator consumes a checked tree through [`SourceNode`]: the
//! syntactic kind of a node, the classification of its resolved type, the
//! declaration its name refers to, and where it sits in the source.

use std::fmt;

use crate::{Span, SymbolId};

/// Syntactic kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // Statements
    Block,
    VariableStatement,
    ExpressionStatement,
    FunctionDeclaration,
    ReturnStatement,
    IfStatement,
    WhileStatement,
    BreakStatement,
    ContinueStatement,
    ClassDeclaration,
    TryStatement,

    // Expressions
    NilLiteral,
    BooleanLiteral,
    NumericLiteral,
    StringLiteral,
    Identifier,
    UnaryExpression,
    BinaryExpression,
    LogicalExpression,
    AssignmentExpression,
    CallExpression,
    FunctionExpression,
    TupleExpression,
    ObjectLiteral,
}

impl NodeKind {
    /// Human readable name, used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Block => "block",
            NodeKind::VariableStatement => "variable statement",
            NodeKind::ExpressionStatement => "expression statement",
            NodeKind::FunctionDeclaration => "function declaration",
            NodeKind::ReturnStatement => "return statement",
            NodeKind::IfStatement => "if statement",
            NodeKind::WhileStatement => "while statement",
            NodeKind::BreakStatement => "break statement",
            NodeKind::ContinueStatement => "continue statement",
            NodeKind::ClassDeclaration => "class declaration",
            NodeKind::TryStatement => "try statement",
            NodeKind::NilLiteral => "null literal",
            NodeKind::BooleanLiteral => "boolean literal",
            NodeKind::NumericLiteral => "numeric literal",
            NodeKind::StringLiteral => "string literal",
            NodeKind::Identifier => "identifier",
            NodeKind::UnaryExpression => "unary expression",
            NodeKind::BinaryExpression => "binary expression",
            NodeKind::LogicalExpression => "logical expression",
            NodeKind::AssignmentExpression => "assignment",
            NodeKind::CallExpression => "call expression",
            NodeKind::FunctionExpression => "function expression",
            NodeKind::TupleExpression => "tuple expression",
            NodeKind::ObjectLiteral => "object literal",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a node's resolved static type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TypeClass {
    Boolean,
    Number,
    String,
    Null,
    Tuple,
    /// Structural object type without a declared name.
    Anonymous,
    /// Instance of a declared class.
    NamedClass,
    Function,
    #[default]
    Unknown,
}

/// Kind of a named lexical region.
///
/// Scopes only label diagnostics; register allocation does not depend on
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    File,
    Module,
    Class,
    Function,
    Block,
}

/// Read-only view of a checked source node.
pub trait SourceNode {
    fn kind(&self) -> NodeKind;

    fn span(&self) -> Span;

    /// Resolved type classification. Statements report [`TypeClass::Unknown`].
    fn type_class(&self) -> TypeClass {
        TypeClass::Unknown
    }

    /// Declaration the node's name resolves to, if it names one.
    fn symbol(&self) -> Option<SymbolId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf(Span);

    impl SourceNode for Leaf {
        fn kind(&self) -> NodeKind {
            NodeKind::NumericLiteral
        }

        fn span(&self) -> Span {
            self.0
        }
    }

    #[test]
    fn default_facts() {
        let leaf = Leaf(Span::new(4, 2));
        assert_eq!(leaf.type_class(), TypeClass::Unknown);
        assert_eq!(leaf.symbol(), None);
        assert_eq!(leaf.kind().to_string(), "numeric literal");
    }
}
