//! Per-function compilation state.
//!
//! A [`FunctionContext`] owns everything that belongs to one function while
//! its body is being compiled: the register file, the scope stack, the
//! upvalue list, the constant pool, the instruction stream, loop targets and
//! the prototypes of already finished nested functions. Finalizing it
//! produces a [`FunctionPrototype`].
//!
//! Registers are handed out LIFO. `available_register` is the first free
//! register; everything below it is in use. Named locals keep their
//! register until the scope that declared them closes.

use kiln_core::{CodegenError, OperandField, ReferenceKind, Result, SourceNode};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::bytecode::instruction::{MAXARG_BX, MAXARG_AX, MAXINDEXRK, rk_constant};
use crate::bytecode::{
    Constant, ConstantPool, FunctionPrototype, Instruction, OpCode, OperandBounds, UpvalueDesc,
};
use crate::emit::{InstructionStream, JumpLabel, JumpManager};
use crate::scope::{Local, ScopeStack};

/// Registers available to one function, numbered `0..MAX_REGISTERS`.
///
/// The chunk stores the stack size in one byte, so the count tops out at
/// 255 and register 254 is the last one handed out.
pub const MAX_REGISTERS: u32 = 255;
/// Upvalues one function may capture.
pub const MAX_UPVALUES: usize = 255;
/// Name of the environment upvalue of the outermost function.
pub const ENV: &str = "_ENV";

/// Position of a live function context in its function stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) usize);

impl FunctionId {
    /// The outermost function.
    pub const ROOT: FunctionId = FunctionId(0);

    pub fn depth(&self) -> usize {
        self.0
    }
}

/// A literal that needs no constant slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralValue {
    Bool(bool),
    Nil,
}

/// Where an expression's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedValue {
    Register(u8),
    Constant(u32),
    Upvalue(u8),
    /// A free name nobody declares; read through the environment.
    Global(String),
    Literal(LiteralValue),
}

impl ResolvedValue {
    /// The value as a register-or-constant operand, if it can be one.
    pub fn rk_operand(&self) -> Option<i32> {
        match self {
            ResolvedValue::Register(r) => Some(*r as i32),
            ResolvedValue::Constant(k) if *k as i32 <= MAXINDEXRK => Some(rk_constant(*k)),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<u8> {
        match self {
            ResolvedValue::Register(r) => Some(*r),
            _ => None,
        }
    }
}

/// Compilation state of one function.
#[derive(Debug)]
pub struct FunctionContext {
    name: String,
    container: Option<FunctionId>,
    line_defined: u32,
    num_params: u8,
    is_vararg: bool,

    /// First free register.
    available: u32,
    /// High-water mark of `available`.
    max_stack: u32,
    /// Registers pushed by `allocate_push`, most recent last.
    temporaries: Vec<u8>,

    scopes: ScopeStack,
    upvalues: Vec<UpvalueDesc>,
    upvalue_index: FxHashMap<String, u8>,
    constants: ConstantPool,
    stream: InstructionStream,
    jumps: JumpManager,
    prototypes: Vec<FunctionPrototype>,
}

impl FunctionContext {
    /// Start compiling a function nested in `container`.
    ///
    /// The function's own scope is already open.
    pub fn new(name: impl Into<String>, container: Option<FunctionId>, line_defined: u32) -> Self {
        let name = name.into();
        let mut scopes = ScopeStack::new();
        scopes.enter(name.clone());
        Self {
            name,
            container,
            line_defined,
            num_params: 0,
            is_vararg: false,
            available: 0,
            max_stack: 0,
            temporaries: Vec::new(),
            scopes,
            upvalues: Vec::new(),
            upvalue_index: FxHashMap::default(),
            constants: ConstantPool::new(),
            stream: InstructionStream::new(),
            jumps: JumpManager::new(),
            prototypes: Vec::new(),
        }
    }

    /// The outermost function of a chunk: no container, vararg, and the
    /// environment as upvalue 0.
    pub fn root(name: impl Into<String>) -> Self {
        let mut ctx = Self::new(name, None, 0);
        ctx.is_vararg = true;
        ctx.upvalues.push(UpvalueDesc::new(ENV, true, 0));
        ctx.upvalue_index.insert(ENV.to_string(), 0);
        ctx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> Option<FunctionId> {
        self.container
    }

    pub fn line_defined(&self) -> u32 {
        self.line_defined
    }

    pub fn num_params(&self) -> u8 {
        self.num_params
    }

    pub fn is_vararg(&self) -> bool {
        self.is_vararg
    }

    pub fn set_vararg(&mut self, is_vararg: bool) {
        self.is_vararg = is_vararg;
    }

    /// Bounds every appended instruction is validated against.
    pub fn bounds(&self) -> OperandBounds {
        OperandBounds {
            constants: self.constants.len(),
            upvalues: self.upvalues.len(),
            prototypes: self.prototypes.len(),
            has_container: self.container.is_some(),
        }
    }

    // ==========================================================================
    // Registers
    // ==========================================================================

    /// First free register.
    pub fn available_register(&self) -> u32 {
        self.available
    }

    /// Highest register count reached so far.
    pub fn max_stack_size(&self) -> u32 {
        self.max_stack
    }

    /// Allocate the next free register.
    pub fn allocate_register(&mut self) -> Result<u8> {
        if self.available >= MAX_REGISTERS {
            return Err(CodegenError::out_of_range(
                "register allocator",
                OperandField::Register,
                self.available as i64,
                0,
                MAX_REGISTERS as i64 - 1,
                self.stream.current_line(),
            ));
        }
        let register = self.available as u8;
        self.available += 1;
        self.max_stack = self.max_stack.max(self.available);
        trace!(function = %self.name, register, "allocate register");
        Ok(register)
    }

    /// Allocate a register and remember it as the newest temporary.
    pub fn allocate_push(&mut self) -> Result<u8> {
        let register = self.allocate_register()?;
        self.temporaries.push(register);
        Ok(register)
    }

    /// Release the newest temporary from [`FunctionContext::allocate_push`].
    pub fn pop_temporary(&mut self) -> Result<u8> {
        let register = self
            .temporaries
            .pop()
            .ok_or_else(|| CodegenError::stack_discipline("pop_temporary with no pushed temporary"))?;
        self.release_register(register)?;
        Ok(register)
    }

    /// Hand `register` back to the allocator.
    ///
    /// Only the most recently allocated register may be released. A register
    /// backing a named local is left alone until its scope closes.
    pub fn release_register(&mut self, register: u8) -> Result<()> {
        if self.scopes.owns_register(register) {
            return Ok(());
        }

        let register = register as u32;
        if register > self.available {
            return Err(CodegenError::stack_discipline(format!(
                "release of register {register} which was never allocated (available is {})",
                self.available
            )));
        }
        if self.available - register > 1 {
            return Err(CodegenError::stack_discipline(format!(
                "release of register {register} out of order (available is {})",
                self.available
            )));
        }

        trace!(function = %self.name, register, "release register");
        self.available = register;
        Ok(())
    }

    // ==========================================================================
    // Scopes and locals
    // ==========================================================================

    pub fn enter_scope(&mut self, name: impl Into<String>) {
        self.scopes.enter(name);
    }

    /// Close the innermost scope and reclaim its locals' registers.
    pub fn exit_scope(&mut self) -> Result<()> {
        let pc = self.stream.len() as u32;
        let name = self.scopes.current_name().unwrap_or_default().to_string();
        if let Some(lowest) = self.scopes.exit(pc)? {
            self.available = lowest as u32;
        }
        debug!(
            function = %self.name,
            scope = %name,
            pc,
            available = self.available,
            "exit scope"
        );
        Ok(())
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.depth()
    }

    /// Declare a parameter in a fresh register.
    pub fn declare_parameter(&mut self, name: impl Into<String>) -> Result<u8> {
        let start_pc = (self.stream.len() as u32).saturating_sub(1);
        let register = self.bind_fresh(name.into(), start_pc)?;
        self.num_params += 1;
        Ok(register)
    }

    /// Declare a local in a fresh register.
    pub fn declare_local(&mut self, name: impl Into<String>) -> Result<u8> {
        let start_pc = self.stream.len() as u32;
        self.bind_fresh(name.into(), start_pc)
    }

    /// Declare a local living in a register the caller already owns.
    pub fn declare_local_at(&mut self, name: impl Into<String>, register: u8) -> Result<()> {
        let local = Local {
            name: name.into(),
            register,
            start_pc: self.stream.len() as u32,
            end_pc: None,
            synthetic: true,
        };
        self.scopes.declare(local, self.stream.current_line())
    }

    fn bind_fresh(&mut self, name: String, start_pc: u32) -> Result<u8> {
        let line = self.stream.current_line();
        self.scopes.check_redeclaration(&name, line)?;
        let register = self.allocate_register()?;
        let local = Local {
            name,
            register,
            start_pc,
            end_pc: None,
            synthetic: false,
        };
        self.scopes.declare(local, line)?;
        Ok(register)
    }

    /// Register of the innermost visible local called `name`.
    pub fn lookup_register(&self, name: &str) -> Option<u8> {
        self.scopes.lookup_register(name)
    }

    pub fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.scopes.lookup(name)
    }

    pub fn lookup_local_strict(&self, name: &str) -> Result<&Local> {
        self.scopes.lookup_strict(name)
    }

    /// Whether `register` currently backs a named local, including one bound
    /// with [`FunctionContext::declare_local_at`].
    pub fn is_local_register(&self, register: u8) -> bool {
        self.scopes.is_local_register(register)
    }

    // ==========================================================================
    // Upvalues
    // ==========================================================================

    pub fn upvalues(&self) -> &[UpvalueDesc] {
        &self.upvalues
    }

    /// Index of upvalue `name`, adding it if it does not exist yet.
    pub fn find_or_create_upvalue(&mut self, name: &str, in_stack: bool, index: u8) -> Result<u8> {
        if let Some(&existing) = self.upvalue_index.get(name) {
            return Ok(existing);
        }
        self.push_upvalue(name, in_stack, index)
    }

    /// Add upvalue `name`, failing if it already exists.
    pub fn create_upvalue(&mut self, name: &str, in_stack: bool, index: u8) -> Result<u8> {
        if self.upvalue_index.contains_key(name) {
            return Err(CodegenError::Redeclaration {
                kind: ReferenceKind::Upvalue,
                name: name.to_string(),
                line: self.stream.current_line(),
            });
        }
        self.push_upvalue(name, in_stack, index)
    }

    /// Index of upvalue `name`.
    pub fn find_upvalue(&self, name: &str) -> Result<u8> {
        self.try_find_upvalue(name)
            .ok_or_else(|| CodegenError::unresolved(ReferenceKind::Upvalue, name))
    }

    /// Index of upvalue `name`, or `None`.
    pub fn try_find_upvalue(&self, name: &str) -> Option<u8> {
        self.upvalue_index.get(name).copied()
    }

    fn push_upvalue(&mut self, name: &str, in_stack: bool, index: u8) -> Result<u8> {
        let next = self.upvalues.len();
        if next >= MAX_UPVALUES {
            return Err(CodegenError::out_of_range(
                "upvalue list",
                OperandField::Upvalue,
                next as i64,
                0,
                MAX_UPVALUES as i64 - 1,
                self.stream.current_line(),
            ));
        }
        let slot = next as u8;
        trace!(function = %self.name, name, in_stack, index, slot, "new upvalue");
        self.upvalues.push(UpvalueDesc::new(name, in_stack, index));
        self.upvalue_index.insert(name.to_string(), slot);
        Ok(slot)
    }

    // ==========================================================================
    // Constants
    // ==========================================================================

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// Index of `constant`, interning it on first use.
    pub fn constant(&mut self, constant: impl Into<Constant>) -> u32 {
        self.constants.find_or_create(constant)
    }

    /// Index of an already interned constant.
    pub fn find_constant(&self, constant: &Constant) -> Result<u32> {
        self.constants
            .find(constant)
            .ok_or_else(|| CodegenError::unresolved(ReferenceKind::Constant, constant.to_string()))
    }

    // ==========================================================================
    // Instructions
    // ==========================================================================

    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    /// Number of instructions emitted so far; also the next one's index.
    pub fn pc(&self) -> usize {
        self.stream.len()
    }

    pub fn set_line(&mut self, line: u32) {
        self.stream.set_line(line);
    }

    pub fn current_line(&self) -> u32 {
        self.stream.current_line()
    }

    /// Stamp subsequent instructions with `node`'s source line.
    pub fn set_source_location(&mut self, node: &dyn SourceNode) {
        self.stream.set_line(node.span().line);
    }

    /// Validate and append an instruction, returning its index.
    pub fn emit(&mut self, instruction: Instruction) -> Result<usize> {
        let bounds = self.bounds();
        self.stream.append(instruction, &bounds)
    }

    pub fn emit_abc(&mut self, op: OpCode, a: i32, b: i32, c: i32) -> Result<usize> {
        self.emit(Instruction::abc(op, a, b, c))
    }

    pub fn emit_abx(&mut self, op: OpCode, a: i32, bx: i32) -> Result<usize> {
        self.emit(Instruction::abx(op, a, bx))
    }

    /// Load constant `index` into `register`, switching to `LOADKX` when
    /// the index does not fit Bx.
    pub fn emit_load_constant(&mut self, register: u8, index: u32) -> Result<usize> {
        if index as i64 <= MAXARG_BX as i64 {
            return self.emit_abx(OpCode::LoadK, register as i32, index as i32);
        }
        if index as i64 > MAXARG_AX as i64 {
            return Err(CodegenError::out_of_range(
                "LOADKX",
                OperandField::Constant,
                index as i64,
                0,
                MAXARG_AX as i64,
                self.stream.current_line(),
            ));
        }
        let at = self.emit_abx(OpCode::LoadKx, register as i32, 0)?;
        self.emit(Instruction::ax(OpCode::ExtraArg, index as i32))?;
        Ok(at)
    }

    /// Remove the last instruction.
    ///
    /// A `break` or forward `continue` still waiting for its target cannot be
    /// popped, since a later jump would reuse its index.
    pub fn pop_instruction(&mut self) -> Result<Option<Instruction>> {
        let Some(last) = self.stream.len().checked_sub(1) else {
            return Ok(None);
        };
        if self.jumps.is_pending(last) {
            return Err(CodegenError::stack_discipline(format!(
                "cannot pop instruction {last}: it is a jump still waiting for its target"
            )));
        }
        let popped = self.stream.pop();
        self.scopes.clamp_pcs(self.stream.len() as u32);
        Ok(popped)
    }

    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.stream.get(index)
    }

    /// Overwrite the instruction at `index` after validating the replacement.
    pub fn set_instruction(&mut self, index: usize, instruction: Instruction) -> Result<()> {
        let bounds = self.bounds();
        self.stream.set(index, instruction, &bounds)
    }

    pub fn begin_section(&mut self) {
        self.stream.begin_section();
    }

    pub fn section_has_content(&self) -> bool {
        self.stream.section_has_content()
    }

    pub fn close_section(&mut self) -> Result<()> {
        self.stream.close_section()
    }

    /// Discard everything emitted since the innermost section began.
    ///
    /// Loop jumps parked inside the discarded region go with it.
    pub fn rollback_section(&mut self) -> Result<usize> {
        let start = self
            .stream
            .section_start()
            .ok_or_else(|| CodegenError::stack_discipline("no open section to roll back"))?;
        let dropped = self.jumps.discard_from(start);
        let removed = self.stream.rollback_section(&self.jumps.pending())?;
        self.scopes.clamp_pcs(self.stream.len() as u32);
        debug!(function = %self.name, removed, dropped_jumps = dropped, "rolled back section");
        Ok(removed)
    }

    // ==========================================================================
    // Jumps and loops
    // ==========================================================================

    pub fn emit_jump(&mut self) -> Result<JumpLabel> {
        let bounds = self.bounds();
        self.stream.emit_jump(&bounds)
    }

    pub fn emit_jump_to(&mut self, target: usize) -> Result<usize> {
        let bounds = self.bounds();
        self.stream.emit_jump_to(target, &bounds)
    }

    pub fn patch_jump(&mut self, label: JumpLabel, target: usize) -> Result<()> {
        let bounds = self.bounds();
        self.stream.patch_jump(label, target, &bounds)
    }

    pub fn patch_to_here(&mut self, label: JumpLabel) -> Result<()> {
        let bounds = self.bounds();
        self.stream.patch_to_here(label, &bounds)
    }

    /// Open a loop. `continue_target` is the loop head when it is already
    /// known.
    pub fn enter_loop(&mut self, continue_target: Option<usize>) {
        self.jumps.enter_loop(continue_target);
    }

    pub fn in_loop(&self) -> bool {
        self.jumps.in_loop()
    }

    pub fn set_continue_target(&mut self, target: usize) -> Result<()> {
        self.jumps.set_continue_target(target)
    }

    /// Emit a jump out of the innermost loop.
    pub fn emit_break(&mut self) -> Result<()> {
        if !self.jumps.in_loop() {
            return Err(CodegenError::unresolved(ReferenceKind::LoopTarget, "break"));
        }
        let label = self.emit_jump()?;
        self.jumps.add_break(label)
    }

    /// Emit a jump to the innermost loop's continue target.
    pub fn emit_continue(&mut self) -> Result<()> {
        match self.jumps.continue_target()? {
            Some(target) => self.emit_jump_to(target).map(|_| ()),
            None => {
                let label = self.emit_jump()?;
                self.jumps.add_continue(label)
            }
        }
    }

    /// Close the innermost loop, pointing its breaks at the current pc.
    pub fn exit_loop(&mut self) -> Result<()> {
        let exit = self.jumps.exit_loop()?;
        let here = self.stream.len();
        for label in exit.breaks {
            self.patch_jump(label, here)?;
        }
        match exit.continue_target {
            Some(target) => {
                for label in exit.continues {
                    self.patch_jump(label, target)?;
                }
            }
            None if !exit.continues.is_empty() => {
                return Err(CodegenError::stack_discipline(format!(
                    "{} continue jump(s) left without a target at loop exit",
                    exit.continues.len()
                )));
            }
            None => {}
        }
        Ok(())
    }

    // ==========================================================================
    // Nested functions
    // ==========================================================================

    pub fn prototypes(&self) -> &[FunctionPrototype] {
        &self.prototypes
    }

    /// Take ownership of a finished child, returning its `CLOSURE` index.
    pub fn add_prototype(&mut self, prototype: FunctionPrototype) -> Result<u32> {
        let index = self.prototypes.len();
        if index as i64 > MAXARG_BX as i64 {
            return Err(CodegenError::out_of_range(
                "prototype table",
                OperandField::Prototype,
                index as i64,
                0,
                MAXARG_BX as i64,
                self.stream.current_line(),
            ));
        }
        self.prototypes.push(prototype);
        Ok(index as u32)
    }

    // ==========================================================================
    // Finalization
    // ==========================================================================

    /// Close the function's own scope and produce its prototype.
    ///
    /// Every nested scope, section, loop and pushed temporary must already
    /// be closed.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn finalize(mut self, last_line: u32) -> Result<FunctionPrototype> {
        if self.scopes.depth() > 1 {
            return Err(CodegenError::stack_discipline(format!(
                "function '{}' finished with {} nested scope(s) open",
                self.name,
                self.scopes.depth() - 1
            )));
        }
        if self.stream.section_depth() > 0 {
            return Err(CodegenError::stack_discipline(format!(
                "function '{}' finished with {} section(s) open",
                self.name,
                self.stream.section_depth()
            )));
        }
        if self.jumps.in_loop() {
            return Err(CodegenError::stack_discipline(format!(
                "function '{}' finished inside {} loop(s)",
                self.name,
                self.jumps.loop_depth()
            )));
        }
        if !self.temporaries.is_empty() {
            return Err(CodegenError::stack_discipline(format!(
                "function '{}' finished with {} temporary register(s) still pushed",
                self.name,
                self.temporaries.len()
            )));
        }
        if self.scopes.depth() == 1 {
            self.exit_scope()?;
        }

        let (code, lines) = self.stream.encode_all()?;
        debug!(
            function = %self.name,
            instructions = code.len(),
            constants = self.constants.len(),
            upvalues = self.upvalues.len(),
            children = self.prototypes.len(),
            max_stack = self.max_stack,
            "finalized function"
        );

        let max_stack_size = u8::try_from(self.max_stack).map_err(|_| {
            CodegenError::out_of_range(
                "stack size",
                OperandField::Register,
                self.max_stack as i64,
                0,
                MAX_REGISTERS as i64,
                last_line,
            )
        })?;
        Ok(FunctionPrototype {
            source: None,
            line_defined: self.line_defined,
            last_line_defined: last_line,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size,
            code,
            lines,
            constants: self.constants.into_vec(),
            upvalues: self.upvalues,
            prototypes: self.prototypes,
            locals: self.scopes.into_debug_locals(),
        })
    }
}
