//! Finished function prototypes.
//!
//! A [`FunctionPrototype`] is what a function context becomes once its body
//! has been compiled: encoded code, constants, capture descriptors, nested
//! prototypes and debug records. It is plain owned data; the enclosing
//! function holds it by index in its prototype table.

use std::fmt;

use kiln_core::Result;

use super::constant::Constant;
use super::instruction::{self, Instruction, SIZE_OP};
use super::opcode::{OpArgMode, OpCode, OpMode};

/// Capture descriptor for one upvalue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub name: String,
    /// `true` when `index` is a register of the immediately enclosing
    /// function, `false` when it is one of that function's upvalues.
    pub in_stack: bool,
    pub index: u8,
}

impl UpvalueDesc {
    pub fn new(name: impl Into<String>, in_stack: bool, index: u8) -> Self {
        Self {
            name: name.into(),
            in_stack,
            index,
        }
    }
}

/// Debug record of a local variable's live range, in instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVarInfo {
    pub name: String,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// A compiled function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionPrototype {
    /// Chunk name. Only the outermost prototype carries one.
    pub source: Option<String>,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    /// Encoded instruction words.
    pub code: Vec<u32>,
    /// Debug line per instruction (parallel to `code`).
    pub lines: Vec<u32>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalueDesc>,
    pub prototypes: Vec<FunctionPrototype>,
    /// Debug-locals log, in the order scopes were closed.
    pub locals: Vec<LocalVarInfo>,
}

impl FunctionPrototype {
    /// Decode every instruction word.
    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        self.code
            .iter()
            .zip(&self.lines)
            .map(|(&word, &line)| {
                instruction::decode(word).map(|mut instruction| {
                    instruction.line = line;
                    instruction
                })
            })
            .collect()
    }

    /// Opcodes of the encoded words, in order.
    pub fn opcodes(&self) -> Vec<OpCode> {
        self.code
            .iter()
            .filter_map(|&word| OpCode::from_u8((word & ((1 << SIZE_OP) - 1)) as u8))
            .collect()
    }

    /// Total number of prototypes in this tree, including `self`.
    pub fn count_functions(&self) -> usize {
        1 + self
            .prototypes
            .iter()
            .map(FunctionPrototype::count_functions)
            .sum::<usize>()
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, mode: OpArgMode, value: i32) -> fmt::Result {
        if mode != OpArgMode::N {
            write!(f, " {value}")
        } else {
            Ok(())
        }
    }

    fn fmt_listing(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(
            f,
            "{indent}function <{}:{},{}> ({} instructions)",
            self.source.as_deref().unwrap_or("?"),
            self.line_defined,
            self.last_line_defined,
            self.code.len()
        )?;
        writeln!(
            f,
            "{indent}{}{} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
            self.num_params,
            if self.is_vararg { "+" } else { "" },
            self.max_stack_size,
            self.upvalues.len(),
            self.locals.len(),
            self.constants.len(),
            self.prototypes.len()
        )?;

        for (pc, (&word, &line)) in self.code.iter().zip(&self.lines).enumerate() {
            write!(f, "{indent}\t{}\t[{line}]\t", pc + 1)?;
            let Ok(ins) = instruction::decode(word) else {
                writeln!(f, "<invalid {word:#010x}>")?;
                continue;
            };
            write!(f, "{:<9}", ins.op.name())?;
            match ins.op.mode() {
                OpMode::ABC => {
                    write!(f, " {}", ins.a)?;
                    self.fmt_operand(f, ins.op.arg_b(), ins.b)?;
                    self.fmt_operand(f, ins.op.arg_c(), ins.c)?;
                }
                OpMode::ABx => write!(f, " {} {}", ins.a, ins.bx())?,
                OpMode::AsBx => write!(f, " {} {}", ins.a, ins.sbx())?,
                OpMode::Ax => write!(f, " {}", ins.a)?,
            }
            if ins.op == OpCode::LoadK {
                if let Some(k) = self.constants.get(ins.bx() as usize) {
                    write!(f, "\t; {k}")?;
                }
            }
            if ins.op.is_jump() {
                write!(f, "\t; to {}", pc as i32 + 2 + ins.sbx())?;
            }
            writeln!(f)?;
        }

        for (i, k) in self.constants.iter().enumerate() {
            writeln!(f, "{indent}\tconstant {i}\t{k}")?;
        }
        for (i, local) in self.locals.iter().enumerate() {
            writeln!(
                f,
                "{indent}\tlocal {i}\t{}\t{}\t{}",
                local.name,
                local.start_pc + 1,
                local.end_pc + 1
            )?;
        }
        for (i, up) in self.upvalues.iter().enumerate() {
            writeln!(
                f,
                "{indent}\tupvalue {i}\t{}\t{}\t{}",
                up.name, up.in_stack as u8, up.index
            )?;
        }
        for child in &self.prototypes {
            child.fmt_listing(f, depth + 1)?;
        }
        Ok(())
    }
}

/// `luac -l` style listing of the whole prototype tree.
impl fmt::Display for FunctionPrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_listing(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::{encode, rk_constant};

    fn sample() -> FunctionPrototype {
        FunctionPrototype {
            source: Some("@main.kn".into()),
            max_stack_size: 2,
            is_vararg: true,
            code: vec![
                encode(OpCode::LoadK, 0, 0, 0, 1).unwrap(),
                encode(OpCode::Add, 1, 0, rk_constant(0), 2).unwrap(),
                encode(OpCode::Jmp, 0, -2, 0, 2).unwrap(),
                encode(OpCode::Return, 0, 1, 0, 3).unwrap(),
            ],
            lines: vec![1, 2, 2, 3],
            constants: vec![Constant::Integer(7)],
            upvalues: vec![UpvalueDesc::new("_ENV", true, 0)],
            locals: vec![LocalVarInfo {
                name: "x".into(),
                start_pc: 1,
                end_pc: 3,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn opcodes_in_order() {
        assert_eq!(
            sample().opcodes(),
            vec![OpCode::LoadK, OpCode::Add, OpCode::Jmp, OpCode::Return]
        );
    }

    #[test]
    fn instructions_carry_lines() {
        let decoded = sample().instructions().unwrap();
        assert_eq!(decoded[1].c, rk_constant(0));
        assert_eq!(decoded[1].line, 2);
        assert_eq!(decoded[2].sbx(), -2);
    }

    #[test]
    fn count_functions_includes_children() {
        let mut root = sample();
        root.prototypes.push(FunctionPrototype::default());
        root.prototypes[0].prototypes.push(FunctionPrototype::default());
        assert_eq!(root.count_functions(), 3);
    }

    #[test]
    fn listing_shows_constants_and_jumps() {
        let listing = sample().to_string();
        assert!(listing.starts_with("function <@main.kn:0,0> (4 instructions)"));
        assert!(listing.contains("LOADK"));
        assert!(listing.contains("; 7"));
        assert!(listing.contains("; to 2"));
        assert!(listing.contains("upvalue 0\t_ENV\t1\t0"));
    }
}
