//! Error type for code generation.
//!
//! Every error here is fatal for the compilation unit that raised it: a
//! function context either finalizes cleanly or is discarded whole.
//!
//! ```text
//! CodegenError
//! ├── OperandRange        - a value does not fit its encoding field or table
//! ├── UnresolvedReference - a strict local/upvalue/constant lookup failed
//! ├── StackDiscipline     - the driver broke a LIFO contract
//! ├── Redeclaration       - duplicate name in the innermost scope
//! └── NotImplemented      - construct the driver does not translate
//! ```

use std::fmt;

use thiserror::Error;

use crate::Span;

/// Result alias used throughout the code generator.
pub type Result<T> = std::result::Result<T, CodegenError>;

/// The operand or table slot an [`CodegenError::OperandRange`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandField {
    A,
    B,
    C,
    Bx,
    SBx,
    Ax,
    /// A register index in the evaluation stack.
    Register,
    /// An index into the function's upvalue list.
    Upvalue,
    /// An index into the function's constant pool.
    Constant,
    /// An index into the function's child prototype table.
    Prototype,
    /// The opcode bits of an encoded word.
    Opcode,
}

impl OperandField {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperandField::A => "A",
            OperandField::B => "B",
            OperandField::C => "C",
            OperandField::Bx => "Bx",
            OperandField::SBx => "sBx",
            OperandField::Ax => "Ax",
            OperandField::Register => "register",
            OperandField::Upvalue => "upvalue",
            OperandField::Constant => "constant",
            OperandField::Prototype => "prototype",
            OperandField::Opcode => "opcode",
        }
    }
}

impl fmt::Display for OperandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of name a lookup or declaration was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Local,
    Upvalue,
    Constant,
    /// A `break` or `continue` target.
    LoopTarget,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceKind::Local => "local",
            ReferenceKind::Upvalue => "upvalue",
            ReferenceKind::Constant => "constant",
            ReferenceKind::LoopTarget => "loop target",
        })
    }
}

/// Errors raised by the code generator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    /// A value does not fit the field or table it is destined for.
    #[error("line {line}: {context} operand {field} = {value} is outside {min}..={max}")]
    OperandRange {
        /// Opcode name, or the allocator that ran out.
        context: &'static str,
        field: OperandField,
        value: i64,
        min: i64,
        max: i64,
        line: u32,
    },

    /// A strict lookup found nothing.
    #[error("unresolved {kind} '{name}'")]
    UnresolvedReference { kind: ReferenceKind, name: String },

    /// The caller broke a stack-shaped contract (register release order,
    /// scope nesting, pending jumps).
    #[error("stack discipline violated: {message}")]
    StackDiscipline { message: String },

    /// A name was declared twice in the same innermost scope.
    #[error("line {line}: {kind} '{name}' is already declared in this scope")]
    Redeclaration {
        kind: ReferenceKind,
        name: String,
        line: u32,
    },

    /// The translation driver has no lowering for a construct.
    #[error("at {span}: {construct} is not implemented")]
    NotImplemented { construct: String, span: Span },
}

impl CodegenError {
    /// Build an [`CodegenError::OperandRange`] for `value` outside `min..=max`.
    pub fn out_of_range(
        context: &'static str,
        field: OperandField,
        value: i64,
        min: i64,
        max: i64,
        line: u32,
    ) -> Self {
        CodegenError::OperandRange {
            context,
            field,
            value,
            min,
            max,
            line,
        }
    }

    pub fn unresolved(kind: ReferenceKind, name: impl Into<String>) -> Self {
        CodegenError::UnresolvedReference {
            kind,
            name: name.into(),
        }
    }

    pub fn stack_discipline(message: impl Into<String>) -> Self {
        CodegenError::StackDiscipline {
            message: message.into(),
        }
    }

    pub fn not_implemented(construct: impl Into<String>, span: Span) -> Self {
        CodegenError::NotImplemented {
            construct: construct.into(),
            span,
        }
    }

    /// Whether this error marks a gap in the driver rather than a core defect.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, CodegenError::NotImplemented { .. })
    }
}
