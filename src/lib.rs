//! Kiln
//!
//! Register bytecode generation for the Lua 5.3 instruction layout.
//!
//! The work is split across two crates, re-exported here:
//!
//! - [`kiln_core`]: spans, identifiers, the [`SourceNode`] view of a checked
//!   tree and the [`CodegenError`] type
//! - [`kiln_compiler`]: encoding, per-function state, name resolution,
//!   chunk dumps and the reference [`Translator`]
//!
//! [`compile`] runs the whole pipeline for one program.
//!
//! ```ignore
//! use kiln::prelude::*;
//!
//! let program = Program::new(vec![Stmt::local("x", Some(Expr::int(1)))]);
//! let chunk = compile(&program, CodegenOptions::for_file("main.kn"))?;
//! std::fs::write("main.luac", &chunk.bytes)?;
//! ```

pub use kiln_compiler::driver::Translator;
pub use kiln_compiler::{CodegenOptions, FunctionPrototype, SourceMap};
pub use kiln_core::{CodegenError, Result, SourceNode};

use tracing::debug;

/// Everything produced for one program.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledChunk {
    pub prototype: FunctionPrototype,
    /// The prototype tree as a binary chunk.
    pub bytes: Vec<u8>,
    /// Generated-line to source mappings recorded during translation.
    pub source_map: SourceMap,
}

/// Translate `program` and dump the result.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn compile(program: &kiln_compiler::driver::Program, options: CodegenOptions) -> Result<CompiledChunk> {
    let dump_options = options.dump_options();
    let mut source_map = SourceMap::new();
    let prototype = Translator::with_sink(options, &mut source_map).translate(program)?;
    let bytes = kiln_compiler::dump(&prototype, dump_options);
    debug!(
        bytes = bytes.len(),
        functions = prototype.count_functions(),
        mappings = source_map.len(),
        "compiled chunk"
    );
    Ok(CompiledChunk {
        prototype,
        bytes,
        source_map,
    })
}

// Re-export main types
pub mod prelude {
    pub use crate::{CompiledChunk, compile};
    pub use kiln_compiler::driver::{
        BinaryOp, Expr, ExprKind, FunctionExpr, LogicalOp, Program, Stmt, StmtKind, UnaryOp,
    };
    pub use kiln_compiler::{
        BuildCache, CodegenOptions, Constant, DumpOptions, FunctionContext, FunctionPrototype,
        FunctionStack, OpCode, ResolvedValue, SourceMap, Translator, UpvalueDesc, dump,
    };
    pub use kiln_core::{CodegenError, OperandField, ReferenceKind, Result, SourceId, Span};
}
