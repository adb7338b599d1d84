//! Bytecode types for the Kiln code generator.
//!
//! - [`OpCode`] - the 47-opcode instruction set and its operand modes
//! - [`Instruction`] - a decoded instruction and the word encoder/decoder
//! - [`Constant`] and [`ConstantPool`] - per-function literal storage
//! - [`FunctionPrototype`] - a finished function
//! - [`dump`] - binary chunk serialization

mod constant;
pub mod dump;
pub mod instruction;
mod opcode;
mod proto;

pub use constant::{Constant, ConstantPool};
pub use dump::{DumpOptions, dump};
pub use instruction::{Instruction, OperandBounds, decode, encode};
pub use opcode::{NUM_OPCODES, OpArgMode, OpCode, OpFlags, OpMode};
pub use proto::{FunctionPrototype, LocalVarInfo, UpvalueDesc};
