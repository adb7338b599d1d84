//! Lexical scopes and named locals of one function.
//!
//! [`ScopeStack`] binds names to registers inside nested blocks. It does not
//! allocate registers itself; the owning function context hands it the
//! register for each new local and reclaims registers when a scope closes.
//!
//! Closed scopes feed the debug-locals log. Each closing scope's locals are
//! put in front of the log in declaration order, so inner scopes (which
//! close first) end up after the scopes that enclose them.

use kiln_core::{CodegenError, ReferenceKind, Result};

use crate::bytecode::LocalVarInfo;

// ============================================================================
// Types
// ============================================================================

/// A named local bound to a register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    pub name: String,
    pub register: u8,
    /// Instruction index at which the local becomes visible.
    pub start_pc: u32,
    /// Instruction index at which it stops being visible, once known.
    pub end_pc: Option<u32>,
    /// Bound to a location the caller supplied rather than a fresh register.
    /// Synthetic locals never drive register reclamation.
    pub synthetic: bool,
}

#[derive(Debug)]
struct ScopeFrame {
    name: String,
    locals: Vec<Local>,
}

// ============================================================================
// ScopeStack
// ============================================================================

/// Nested scopes of a function being compiled.
#[derive(Debug, Default)]
pub struct ScopeStack {
    /// Innermost last.
    frames: Vec<ScopeFrame>,
    debug_locals: Vec<LocalVarInfo>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope labelled `name`.
    pub fn enter(&mut self, name: impl Into<String>) {
        self.frames.push(ScopeFrame {
            name: name.into(),
            locals: Vec::new(),
        });
    }

    /// Close the innermost scope at instruction index `pc`.
    ///
    /// Returns the lowest register held by one of the scope's own
    /// non-synthetic locals, which is where allocation resumes.
    pub fn exit(&mut self, pc: u32) -> Result<Option<u8>> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CodegenError::stack_discipline("exit_scope with no open scope"))?;

        let lowest = frame
            .locals
            .iter()
            .filter(|local| !local.synthetic)
            .map(|local| local.register)
            .min();

        // Walk backwards and prepend, leaving the frame in declaration order
        // at the front of the log.
        for local in frame.locals.into_iter().rev() {
            let end_pc = local.end_pc.unwrap_or(pc);
            self.debug_locals.insert(
                0,
                LocalVarInfo {
                    name: local.name,
                    start_pc: local.start_pc,
                    end_pc,
                },
            );
        }

        Ok(lowest)
    }

    /// Open scope count.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Label of the innermost scope.
    pub fn current_name(&self) -> Option<&str> {
        self.frames.last().map(|frame| frame.name.as_str())
    }

    /// Fail if `name` is already declared in the innermost scope.
    pub fn check_redeclaration(&self, name: &str, line: u32) -> Result<()> {
        let frame = self.innermost()?;
        if frame.locals.iter().any(|local| local.name == name) {
            return Err(CodegenError::Redeclaration {
                kind: ReferenceKind::Local,
                name: name.to_string(),
                line,
            });
        }
        Ok(())
    }

    /// Bind `name` in the innermost scope.
    pub fn declare(&mut self, local: Local, line: u32) -> Result<()> {
        self.check_redeclaration(&local.name, line)?;
        self.frames
            .last_mut()
            .ok_or_else(|| CodegenError::stack_discipline("declare_local with no open scope"))?
            .locals
            .push(local);
        Ok(())
    }

    /// Register of the innermost visible local called `name`.
    pub fn lookup_register(&self, name: &str) -> Option<u8> {
        self.lookup(name).map(|local| local.register)
    }

    /// Innermost visible local called `name`.
    pub fn lookup(&self, name: &str) -> Option<&Local> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.locals.iter().rev().find(|local| local.name == name))
    }

    /// Like [`ScopeStack::lookup`], failing when nothing matches.
    pub fn lookup_strict(&self, name: &str) -> Result<&Local> {
        self.lookup(name)
            .ok_or_else(|| CodegenError::unresolved(ReferenceKind::Local, name))
    }

    /// Whether `register` currently backs any visible local, synthetic ones
    /// included.
    pub fn is_local_register(&self, register: u8) -> bool {
        self.frames
            .iter()
            .flat_map(|frame| &frame.locals)
            .any(|local| local.register == register)
    }

    /// Whether `register` was handed out for a non-synthetic local and is
    /// reclaimed by scope exit rather than by release.
    pub fn owns_register(&self, register: u8) -> bool {
        self.frames
            .iter()
            .flat_map(|frame| &frame.locals)
            .any(|local| local.register == register && !local.synthetic)
    }

    /// Pull every recorded pc back to at most `len` after the instruction
    /// stream was truncated to `len`.
    pub fn clamp_pcs(&mut self, len: u32) {
        for info in &mut self.debug_locals {
            info.start_pc = info.start_pc.min(len);
            info.end_pc = info.end_pc.min(len);
        }
        for local in self.frames.iter_mut().flat_map(|frame| &mut frame.locals) {
            local.start_pc = local.start_pc.min(len);
            if let Some(end_pc) = &mut local.end_pc {
                *end_pc = (*end_pc).min(len);
            }
        }
    }

    /// Debug-locals log accumulated so far.
    pub fn debug_locals(&self) -> &[LocalVarInfo] {
        &self.debug_locals
    }

    pub fn into_debug_locals(self) -> Vec<LocalVarInfo> {
        self.debug_locals
    }

    fn innermost(&self) -> Result<&ScopeFrame> {
        self.frames
            .last()
            .ok_or_else(|| CodegenError::stack_discipline("no open scope"))
    }
}
