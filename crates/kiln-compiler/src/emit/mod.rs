//! Instruction stream for a single function.
//!
//! The [`InstructionStream`] is append-only apart from three escape hatches:
//! back-patching an operand of an earlier instruction, popping the last
//! instruction, and rolling back a section that nothing depends on yet.
//! Every instruction is validated when it goes in, using the same encoder
//! that produces the final words, so a malformed operand is reported at the
//! point of emission.
//!
//! ```ignore
//! let mut stream = InstructionStream::new();
//! stream.set_line(3);
//! let jump = stream.emit_jump(&bounds)?;
//! stream.append(Instruction::abc(OpCode::Move, 1, 0, 0), &bounds)?;
//! stream.patch_to_here(jump, &bounds)?;
//! ```

mod jumps;

pub use jumps::{JumpManager, LoopExit};

use kiln_core::{CodegenError, Result};
use tracing::trace;

use crate::bytecode::{Instruction, OpCode, OperandBounds};

/// Index of an emitted jump whose offset still needs patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JumpLabel(pub(crate) usize);

impl JumpLabel {
    /// Instruction index of the jump.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Ordered instructions of one function with their debug lines.
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
    /// Line stamped onto the next appended instruction.
    current_line: u32,
    /// Start index of each open section, innermost last.
    sections: Vec<usize>,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the line stamped onto subsequently appended instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    // ==========================================================================
    // Emission
    // ==========================================================================

    /// Validate `instruction`, stamp it with the current line and append it.
    ///
    /// Returns the new instruction's index. Nothing is appended on error.
    pub fn append(&mut self, mut instruction: Instruction, bounds: &OperandBounds) -> Result<usize> {
        instruction.line = self.current_line;
        instruction.validate(bounds, self.instructions.last())?;

        let index = self.instructions.len();
        trace!(
            index,
            op = instruction.op.name(),
            a = instruction.a,
            b = instruction.b,
            c = instruction.c,
            line = instruction.line,
            "append"
        );
        self.instructions.push(instruction);
        Ok(index)
    }

    /// Remove and return the last instruction.
    pub fn pop(&mut self) -> Option<Instruction> {
        let popped = self.instructions.pop();
        // A section whose content was popped away starts at the new end.
        let len = self.instructions.len();
        for start in &mut self.sections {
            if *start > len {
                *start = len;
            }
        }
        popped
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Replace the instruction at `index`, keeping its original line.
    ///
    /// The replacement is validated like an append.
    pub fn set(&mut self, index: usize, mut instruction: Instruction, bounds: &OperandBounds) -> Result<()> {
        let Some(slot) = self.instructions.get(index) else {
            return Err(CodegenError::stack_discipline(format!(
                "instruction {index} does not exist (stream has {})",
                self.instructions.len()
            )));
        };
        instruction.line = slot.line;
        let previous = index.checked_sub(1).and_then(|i| self.instructions.get(i));
        instruction.validate(bounds, previous)?;

        trace!(index, op = instruction.op.name(), "overwrite");
        self.instructions[index] = instruction;
        Ok(())
    }

    // ==========================================================================
    // Jumps
    // ==========================================================================

    /// Append `JMP 0 0` to be patched later.
    pub fn emit_jump(&mut self, bounds: &OperandBounds) -> Result<JumpLabel> {
        self.append(Instruction::asbx(OpCode::Jmp, 0, 0), bounds)
            .map(JumpLabel)
    }

    /// Append a jump to an already known `target`.
    pub fn emit_jump_to(&mut self, target: usize, bounds: &OperandBounds) -> Result<usize> {
        let offset = target as i64 - (self.instructions.len() as i64 + 1);
        self.append(Instruction::asbx(OpCode::Jmp, 0, offset as i32), bounds)
    }

    /// Point the jump at `label` to instruction `target`.
    ///
    /// The offset is relative to the instruction after the jump.
    pub fn patch_jump(&mut self, label: JumpLabel, target: usize, bounds: &OperandBounds) -> Result<()> {
        let Some(jump) = self.instructions.get(label.0).copied() else {
            return Err(CodegenError::stack_discipline(format!(
                "jump {} was discarded before it was patched",
                label.0
            )));
        };
        if !jump.op.is_jump() {
            return Err(CodegenError::stack_discipline(format!(
                "instruction {} is {}, not a jump",
                label.0,
                jump.op.name()
            )));
        }

        let offset = target as i64 - (label.0 as i64 + 1);
        trace!(index = label.0, target, offset, "patch jump");
        self.set(label.0, Instruction::asbx(jump.op, jump.a, offset as i32), bounds)
    }

    /// Point the jump at `label` to the next instruction to be appended.
    pub fn patch_to_here(&mut self, label: JumpLabel, bounds: &OperandBounds) -> Result<()> {
        self.patch_jump(label, self.instructions.len(), bounds)
    }

    // ==========================================================================
    // Sections
    // ==========================================================================

    /// Open a section at the current end of the stream.
    pub fn begin_section(&mut self) {
        self.sections.push(self.instructions.len());
    }

    /// Index at which the innermost open section began.
    pub fn section_start(&self) -> Option<usize> {
        self.sections.last().copied()
    }

    /// Whether anything was appended since the innermost section began.
    ///
    /// Without an open section this reports whether the stream has content.
    pub fn section_has_content(&self) -> bool {
        let start = self.sections.last().copied().unwrap_or(0);
        self.instructions.len() > start
    }

    /// Close the innermost section, keeping its instructions.
    pub fn close_section(&mut self) -> Result<()> {
        self.sections
            .pop()
            .map(|_| ())
            .ok_or_else(|| CodegenError::stack_discipline("no open section to close"))
    }

    /// Close the innermost section and discard its instructions.
    ///
    /// `pending` lists jumps still waiting for a target; none of them may
    /// lie in the discarded region. Returns the number of instructions
    /// removed.
    pub fn rollback_section(&mut self, pending: &[JumpLabel]) -> Result<usize> {
        let Some(&start) = self.sections.last() else {
            return Err(CodegenError::stack_discipline("no open section to roll back"));
        };
        if let Some(label) = pending.iter().find(|label| label.0 >= start) {
            return Err(CodegenError::stack_discipline(format!(
                "cannot discard instructions from {start}: pending jump at {} depends on them",
                label.0
            )));
        }

        self.sections.pop();
        let removed = self.instructions.len() - start;
        self.instructions.truncate(start);
        Ok(removed)
    }

    /// Open section count.
    pub fn section_depth(&self) -> usize {
        self.sections.len()
    }

    /// Encode every instruction into its final word, with the line table.
    pub fn encode_all(&self) -> Result<(Vec<u32>, Vec<u32>)> {
        let mut code = Vec::with_capacity(self.instructions.len());
        let mut lines = Vec::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            code.push(instruction.encode()?);
            lines.push(instruction.line);
        }
        Ok((code, lines))
    }
}
