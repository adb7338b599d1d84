//! Kiln Compiler
//!
//! Code generation core that lowers a checked construct tree into register
//! bytecode using the Lua 5.3 instruction layout.
//!
//! ## Modules
//!
//! - [`bytecode`]: Opcodes, instruction encoding, constants, prototypes and chunk dumps
//! - [`emit`]: Instruction stream with jump patching and rollback sections
//! - [`scope`]: Lexical scopes and the debug-locals log
//! - [`function`]: Per-function registers, upvalues, constants and finalization
//! - [`unit`]: The stack of functions being compiled and name resolution
//! - [`source_map`]: Generated-to-original line mappings
//! - [`options`]: Per-chunk settings
//! - [`build`]: Content-hash cache for incremental builds
//! - [`driver`]: Reference translator from a construct tree to prototypes

pub mod build;
pub mod bytecode;
pub mod driver;
pub mod emit;
pub mod function;
pub mod options;
pub mod scope;
pub mod source_map;
pub mod unit;

pub use build::BuildCache;
pub use bytecode::{
    Constant, ConstantPool, DumpOptions, FunctionPrototype, Instruction, LocalVarInfo, OpCode,
    UpvalueDesc, dump,
};
pub use driver::{Program, Translator};
pub use emit::{InstructionStream, JumpLabel, JumpManager};
pub use function::{FunctionContext, FunctionId, LiteralValue, ResolvedValue};
pub use options::CodegenOptions;
pub use scope::{Local, ScopeStack};
pub use source_map::{SourceMap, SourceMapSink, SourceMapping};
pub use unit::FunctionStack;

// Re-export the error type from core for convenience
pub use kiln_core::{CodegenError, Result};
