//! Kiln core types
//!
//! Shared vocabulary between the front end and the code generator:
//!
//! - [`Span`]: source positions
//! - [`CodegenError`]: the single error type of code generation
//! - [`SourceNode`]: facts the checked tree exposes about each node
//! - [`SourceId`] / [`SymbolId`]: deterministic identifiers

mod error;
mod ids;
mod node;
mod span;

pub use error::{CodegenError, OperandField, ReferenceKind, Result};
pub use ids::{SourceId, SymbolId};
pub use node::{NodeKind, ScopeKind, SourceNode, TypeClass};
pub use span::Span;
