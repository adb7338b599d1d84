//! Loop bookkeeping for `break` and `continue`.
//!
//! Tracks a stack of loop contexts so nested loops patch their own exits.
//! A `continue` whose target is already known is emitted as a backward
//! jump by the caller; only forward `continue` jumps are parked here.

use kiln_core::{CodegenError, ReferenceKind, Result};

use super::JumpLabel;

/// Manages jump targets for control flow.
#[derive(Debug, Default)]
pub struct JumpManager {
    /// Innermost last.
    loops: Vec<LoopContext>,
}

#[derive(Debug)]
struct LoopContext {
    /// Instruction index `continue` jumps back to, once known.
    continue_target: Option<usize>,
    breaks: Vec<JumpLabel>,
    continues: Vec<JumpLabel>,
}

/// Jumps still waiting for a target when a loop is closed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoopExit {
    pub breaks: Vec<JumpLabel>,
    pub continues: Vec<JumpLabel>,
    pub continue_target: Option<usize>,
}

impl JumpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new loop context.
    pub fn enter_loop(&mut self, continue_target: Option<usize>) {
        self.loops.push(LoopContext {
            continue_target,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    /// Exit the current loop context, handing back its pending jumps.
    pub fn exit_loop(&mut self) -> Result<LoopExit> {
        let ctx = self
            .loops
            .pop()
            .ok_or_else(|| CodegenError::stack_discipline("exit_loop without a matching enter_loop"))?;
        Ok(LoopExit {
            breaks: ctx.breaks,
            continues: ctx.continues,
            continue_target: ctx.continue_target,
        })
    }

    pub fn in_loop(&self) -> bool {
        !self.loops.is_empty()
    }

    pub fn loop_depth(&self) -> usize {
        self.loops.len()
    }

    /// Park a `break` jump until the loop exits.
    pub fn add_break(&mut self, label: JumpLabel) -> Result<()> {
        self.current_mut("break")?.breaks.push(label);
        Ok(())
    }

    /// Park a forward `continue` jump until its target is known.
    pub fn add_continue(&mut self, label: JumpLabel) -> Result<()> {
        self.current_mut("continue")?.continues.push(label);
        Ok(())
    }

    /// Continue target of the innermost loop, if already known.
    pub fn continue_target(&self) -> Result<Option<usize>> {
        self.loops
            .last()
            .map(|ctx| ctx.continue_target)
            .ok_or_else(|| CodegenError::unresolved(ReferenceKind::LoopTarget, "continue"))
    }

    /// Fix the continue target of the innermost loop.
    pub fn set_continue_target(&mut self, target: usize) -> Result<()> {
        self.current_mut("continue")?.continue_target = Some(target);
        Ok(())
    }

    /// Every parked jump across all open loops.
    pub fn pending(&self) -> Vec<JumpLabel> {
        self.loops
            .iter()
            .flat_map(|ctx| ctx.breaks.iter().chain(&ctx.continues))
            .copied()
            .collect()
    }

    /// Forget every parked jump at or after instruction index `start`, across
    /// all open loops. Returns how many were dropped.
    ///
    /// Used when the instructions holding those jumps are discarded.
    pub fn discard_from(&mut self, start: usize) -> usize {
        let mut dropped = 0;
        for ctx in &mut self.loops {
            for labels in [&mut ctx.breaks, &mut ctx.continues] {
                let before = labels.len();
                labels.retain(|label| label.0 < start);
                dropped += before - labels.len();
            }
        }
        dropped
    }

    /// Whether a parked jump lives at instruction index `index`.
    pub fn is_pending(&self, index: usize) -> bool {
        self.loops
            .iter()
            .flat_map(|ctx| ctx.breaks.iter().chain(&ctx.continues))
            .any(|label| label.0 == index)
    }

    fn current_mut(&mut self, what: &str) -> Result<&mut LoopContext> {
        self.loops
            .last_mut()
            .ok_or_else(|| CodegenError::unresolved(ReferenceKind::LoopTarget, what))
    }
}
