//! Reference translation driver.
//!
//! [`Translator`] walks a [`Program`] depth-first and drives the function
//! stack in visitation order. It covers the constructs needed to exercise
//! the core end to end; anything else is reported as
//! [`CodegenError::NotImplemented`] with the construct's position.
//!
//! Expression values are produced in one of three ways:
//!
//! - [`Translator::expression`] yields a [`ResolvedValue`] without forcing
//!   it into a register (locals, constants, literals, upvalues and globals
//!   stay where they are).
//! - [`Translator::expr_into`] evaluates into a given register.
//! - [`Translator::to_register`] / [`Translator::to_rk`] force the value
//!   into a register, or into a register-or-constant operand.
//!
//! Any register handed back that does not back a named local is a
//! temporary and is released exactly once through [`Translator::release`].

mod ast;

pub use ast::{BinaryOp, Expr, ExprKind, FunctionExpr, LogicalOp, Program, Stmt, StmtKind, UnaryOp};

use kiln_core::{CodegenError, ReferenceKind, Result, SourceNode};
use tracing::debug;

use crate::bytecode::instruction::MAXINDEXRK;
use crate::bytecode::{Constant, FunctionPrototype, Instruction, OpCode};
use crate::function::{ENV, FunctionContext, LiteralValue, ResolvedValue};
use crate::options::CodegenOptions;
use crate::source_map::SourceMapSink;
use crate::unit::FunctionStack;

/// Lowers a [`Program`] into a prototype tree.
#[derive(Debug)]
pub struct Translator<'a> {
    unit: FunctionStack<'a>,
}

impl<'a> Translator<'a> {
    pub fn new(options: CodegenOptions) -> Self {
        Self {
            unit: FunctionStack::new(options),
        }
    }

    /// Translate while reporting source mappings to `sink`.
    pub fn with_sink(options: CodegenOptions, sink: &'a mut dyn SourceMapSink) -> Self {
        Self {
            unit: FunctionStack::with_sink(options, sink),
        }
    }

    /// Translate `program` into the prototype of its outermost function.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn translate(mut self, program: &Program) -> Result<FunctionPrototype> {
        debug!(
            chunk = %self.unit.options().chunk_name,
            statements = program.body.len(),
            "translate program"
        );
        self.statements(&program.body)?;
        self.ctx().emit_abc(OpCode::Return, 0, 1, 0)?;
        self.unit.finish(program.end_line)
    }

    fn ctx(&mut self) -> &mut FunctionContext {
        self.unit.current_mut()
    }

    fn locate(&mut self, node: &dyn SourceNode) {
        if node.span().is_known() {
            self.unit.set_source_location(node);
        }
    }

    fn not_implemented(node: &dyn SourceNode) -> CodegenError {
        CodegenError::not_implemented(node.kind().as_str(), node.span())
    }

    // ==========================================================================
    // Statements
    // ==========================================================================

    fn statements(&mut self, stmts: &[Stmt]) -> Result<()> {
        stmts.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        self.locate(stmt);
        match &stmt.kind {
            StmtKind::Let(name, init) => self.let_statement(name, init.as_ref()),
            StmtKind::Expr(expr) => self.expression_statement(expr),
            StmtKind::Function(name, function) => {
                let register = self.ctx().declare_local(name.as_str())?;
                self.closure_into(function, name, stmt.span.line, register)
            }
            StmtKind::Return(value) => self.return_statement(value.as_ref()),
            StmtKind::If(cond, then, otherwise) => self.if_statement(cond, then, otherwise.as_deref()),
            StmtKind::While(cond, body) => self.while_statement(cond, body),
            StmtKind::Break => self.ctx().emit_break(),
            StmtKind::Continue => self.ctx().emit_continue(),
            StmtKind::Block(body) => self.block("block", body),
            StmtKind::Class(_) | StmtKind::Try(_) => Err(Self::not_implemented(stmt)),
        }
    }

    fn block(&mut self, name: &str, body: &[Stmt]) -> Result<()> {
        self.ctx().enter_scope(name);
        self.statements(body)?;
        self.ctx().exit_scope()
    }

    fn let_statement(&mut self, name: &str, init: Option<&Expr>) -> Result<()> {
        // Evaluate first so the initializer cannot see the new local, then
        // bind the local to the register the value landed in.
        let register = self.ctx().allocate_register()?;
        match init {
            Some(expr) => self.expr_into(expr, register)?,
            None => {
                self.ctx().emit_abc(OpCode::LoadNil, register as i32, 0, 0)?;
            }
        }
        self.ctx().release_register(register)?;
        let local = self.ctx().declare_local(name)?;
        if local != register {
            return Err(CodegenError::stack_discipline(format!(
                "local '{name}' landed in register {local}, value is in {register}"
            )));
        }
        Ok(())
    }

    fn expression_statement(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Call(callee, args) => {
                let base = self.ctx().allocate_register()?;
                self.call_at(base, callee, args, 0)?;
                self.ctx().release_register(base)
            }
            ExprKind::Assign(name, value) => {
                let stored = self.assign(name, value)?;
                self.release(&stored)
            }
            _ => {
                let value = self.expression(expr)?;
                self.release(&value)
            }
        }
    }

    fn return_statement(&mut self, value: Option<&Expr>) -> Result<()> {
        let Some(expr) = value else {
            self.ctx().emit_abc(OpCode::Return, 0, 1, 0)?;
            return Ok(());
        };
        let value = self.to_register(expr)?;
        let register = Self::register_of(&value)?;
        self.ctx().emit_abc(OpCode::Return, register as i32, 2, 0)?;
        self.release(&value)
    }

    fn if_statement(&mut self, cond: &Expr, then: &[Stmt], otherwise: Option<&[Stmt]>) -> Result<()> {
        if matches!(cond.kind, ExprKind::Bool(false)) {
            // The branch is still translated so it is checked, but none of
            // its code survives.
            self.ctx().begin_section();
            self.block("if", then)?;
            let removed = self.ctx().rollback_section()?;
            debug!(removed, "dropped unreachable branch");
            if let Some(otherwise) = otherwise {
                self.block("else", otherwise)?;
            }
            return Ok(());
        }

        let skip_then = self.test_and_jump(cond)?;
        self.block("if", then)?;
        match otherwise {
            Some(otherwise) => {
                let skip_else = self.ctx().emit_jump()?;
                self.ctx().patch_to_here(skip_then)?;
                self.block("else", otherwise)?;
                self.ctx().patch_to_here(skip_else)
            }
            None => self.ctx().patch_to_here(skip_then),
        }
    }

    fn while_statement(&mut self, cond: &Expr, body: &[Stmt]) -> Result<()> {
        let head = self.ctx().pc();
        self.ctx().enter_loop(Some(head));
        let exit = self.test_and_jump(cond)?;
        self.block("while", body)?;
        self.ctx().emit_jump_to(head)?;
        self.ctx().patch_to_here(exit)?;
        self.ctx().exit_loop()
    }

    /// Evaluate `cond` and emit a jump taken when it is falsy.
    fn test_and_jump(&mut self, cond: &Expr) -> Result<crate::emit::JumpLabel> {
        let value = self.to_register(cond)?;
        let register = Self::register_of(&value)?;
        self.ctx().emit_abc(OpCode::Test, register as i32, 0, 0)?;
        let jump = self.ctx().emit_jump()?;
        self.release(&value)?;
        Ok(jump)
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    /// Evaluate `expr` without forcing it into a register.
    fn expression(&mut self, expr: &Expr) -> Result<ResolvedValue> {
        match &expr.kind {
            ExprKind::Nil => Ok(ResolvedValue::Literal(LiteralValue::Nil)),
            ExprKind::Bool(b) => Ok(ResolvedValue::Literal(LiteralValue::Bool(*b))),
            ExprKind::Integer(i) => Ok(ResolvedValue::Constant(self.ctx().constant(*i))),
            ExprKind::Float(n) => Ok(ResolvedValue::Constant(self.ctx().constant(*n))),
            ExprKind::Str(s) => Ok(ResolvedValue::Constant(self.ctx().constant(s.as_str()))),
            ExprKind::Ident(name) => self.unit.resolve(name),
            ExprKind::Tuple(_) | ExprKind::Object(_) => Err(Self::not_implemented(expr)),
            _ => {
                let register = self.ctx().allocate_register()?;
                self.expr_into(expr, register)?;
                Ok(ResolvedValue::Register(register))
            }
        }
    }

    /// Evaluate `expr` into `target`.
    fn expr_into(&mut self, expr: &Expr, target: u8) -> Result<()> {
        match &expr.kind {
            ExprKind::Unary(op, operand) => {
                let value = self.to_register(operand)?;
                let register = Self::register_of(&value)?;
                self.release(&value)?;
                let op = match op {
                    UnaryOp::Neg => OpCode::Unm,
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::Len => OpCode::Len,
                };
                self.ctx().emit_abc(op, target as i32, register as i32, 0)?;
                Ok(())
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lowering = lowering(*op);
                if lowering == Lowering::Concat {
                    return self.concat_into(lhs, rhs, target);
                }
                let left = self.to_rk(lhs)?;
                let right = self.to_rk(rhs)?;
                self.release(&right)?;
                self.release(&left)?;
                let (l, r) = (Self::rk_of(&left)?, Self::rk_of(&right)?);
                match lowering {
                    Lowering::Compare { op, expect, swapped } => {
                        let (b, c) = if swapped { (r, l) } else { (l, r) };
                        self.compare_into(op, expect, b, c, target)
                    }
                    Lowering::Arith(op) => self.ctx().emit_abc(op, target as i32, l, r).map(|_| ()),
                    Lowering::Concat => Ok(()),
                }
            }
            ExprKind::Logical(op, lhs, rhs) => {
                self.expr_into(lhs, target)?;
                let keep_lhs_when = match op {
                    LogicalOp::And => 0,
                    LogicalOp::Or => 1,
                };
                self.ctx().emit_abc(OpCode::Test, target as i32, 0, keep_lhs_when)?;
                let done = self.ctx().emit_jump()?;
                self.expr_into(rhs, target)?;
                self.ctx().patch_to_here(done)
            }
            ExprKind::Assign(name, value) => {
                let stored = self.assign(name, value)?;
                self.load_into(&stored, target)?;
                self.release(&stored)
            }
            ExprKind::Call(callee, args) => {
                let on_top = target as u32 + 1 == self.ctx().available_register()
                    && !self.ctx().is_local_register(target);
                if on_top {
                    return self.call_at(target, callee, args, 1);
                }
                let base = self.ctx().allocate_register()?;
                self.call_at(base, callee, args, 1)?;
                self.ctx().emit_abc(OpCode::Move, target as i32, base as i32, 0)?;
                self.ctx().release_register(base)
            }
            ExprKind::Function(function) => {
                let line = expr.span.line;
                self.closure_into(function, "anonymous", line, target)
            }
            ExprKind::Tuple(_) | ExprKind::Object(_) => Err(Self::not_implemented(expr)),
            ExprKind::Nil
            | ExprKind::Bool(_)
            | ExprKind::Integer(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Ident(_) => {
                let value = self.expression(expr)?;
                self.load_into(&value, target)?;
                self.release(&value)
            }
        }
    }

    /// Force `expr` into a register.
    fn to_register(&mut self, expr: &Expr) -> Result<ResolvedValue> {
        let value = self.expression(expr)?;
        self.materialize(value)
    }

    /// Force `expr` into a register-or-constant operand.
    fn to_rk(&mut self, expr: &Expr) -> Result<ResolvedValue> {
        let value = self.expression(expr)?;
        if value.rk_operand().is_some() {
            return Ok(value);
        }
        self.materialize(value)
    }

    fn materialize(&mut self, value: ResolvedValue) -> Result<ResolvedValue> {
        if let ResolvedValue::Register(_) = value {
            return Ok(value);
        }
        let register = self.ctx().allocate_register()?;
        self.load_into(&value, register)?;
        Ok(ResolvedValue::Register(register))
    }

    /// Copy a resolved value into `target`.
    fn load_into(&mut self, value: &ResolvedValue, target: u8) -> Result<()> {
        let a = target as i32;
        match value {
            ResolvedValue::Register(r) if *r == target => Ok(()),
            ResolvedValue::Register(r) => self.ctx().emit_abc(OpCode::Move, a, *r as i32, 0).map(|_| ()),
            ResolvedValue::Constant(k) => self.ctx().emit_load_constant(target, *k).map(|_| ()),
            ResolvedValue::Literal(LiteralValue::Bool(b)) => {
                self.ctx().emit_abc(OpCode::LoadBool, a, *b as i32, 0).map(|_| ())
            }
            ResolvedValue::Literal(LiteralValue::Nil) => {
                self.ctx().emit_abc(OpCode::LoadNil, a, 0, 0).map(|_| ())
            }
            ResolvedValue::Upvalue(u) => self.ctx().emit_abc(OpCode::GetUpval, a, *u as i32, 0).map(|_| ()),
            ResolvedValue::Global(name) => {
                let key = self.key_operand(name)?;
                let result = match self.environment()? {
                    ResolvedValue::Upvalue(env) => {
                        self.ctx().emit_abc(OpCode::GetTabUp, a, env as i32, Self::rk_of(&key)?)
                    }
                    ResolvedValue::Register(env) => {
                        self.ctx().emit_abc(OpCode::GetTable, a, env as i32, Self::rk_of(&key)?)
                    }
                    _ => Err(CodegenError::unresolved(ReferenceKind::Upvalue, ENV)),
                };
                self.release(&key)?;
                result.map(|_| ())
            }
        }
    }

    /// Release `value` if it is a temporary register.
    fn release(&mut self, value: &ResolvedValue) -> Result<()> {
        match value {
            ResolvedValue::Register(r) => self.ctx().release_register(*r),
            _ => Ok(()),
        }
    }

    fn register_of(value: &ResolvedValue) -> Result<u8> {
        value
            .as_register()
            .ok_or_else(|| CodegenError::stack_discipline(format!("expected a register, found {value:?}")))
    }

    fn rk_of(value: &ResolvedValue) -> Result<i32> {
        value
            .rk_operand()
            .ok_or_else(|| CodegenError::stack_discipline(format!("expected an RK operand, found {value:?}")))
    }

    fn environment(&mut self) -> Result<ResolvedValue> {
        self.unit.resolve(ENV)
    }

    /// Table key for a global name, as a constant when it fits an RK field.
    fn key_operand(&mut self, name: &str) -> Result<ResolvedValue> {
        let k = self.ctx().constant(Constant::from(name));
        if k as i32 <= MAXINDEXRK {
            return Ok(ResolvedValue::Constant(k));
        }
        self.materialize(ResolvedValue::Constant(k))
    }

    /// Store `value` into `name`. Returns where the stored value lives.
    fn assign(&mut self, name: &str, value: &Expr) -> Result<ResolvedValue> {
        match self.unit.resolve(name)? {
            // A short-circuit writes its left operand into the target before
            // the right one runs, which would clobber a local the right side
            // reads.
            ResolvedValue::Register(local) if matches!(value.kind, ExprKind::Logical(..)) => {
                let stored = self.to_register(value)?;
                self.load_into(&stored, local)?;
                self.release(&stored)?;
                Ok(ResolvedValue::Register(local))
            }
            ResolvedValue::Register(local) => {
                self.expr_into(value, local)?;
                Ok(ResolvedValue::Register(local))
            }
            ResolvedValue::Upvalue(u) => {
                let stored = self.to_register(value)?;
                let register = Self::register_of(&stored)?;
                self.ctx().emit_abc(OpCode::SetUpval, register as i32, u as i32, 0)?;
                Ok(stored)
            }
            ResolvedValue::Global(global) => {
                let stored = self.to_rk(value)?;
                let key = self.key_operand(&global)?;
                let (b, c) = (Self::rk_of(&key)?, Self::rk_of(&stored)?);
                match self.environment()? {
                    ResolvedValue::Upvalue(env) => {
                        self.ctx().emit_abc(OpCode::SetTabUp, env as i32, b, c)?;
                    }
                    ResolvedValue::Register(env) => {
                        self.ctx().emit_abc(OpCode::SetTable, env as i32, b, c)?;
                    }
                    _ => return Err(CodegenError::unresolved(ReferenceKind::Upvalue, ENV)),
                }
                self.release(&key)?;
                Ok(stored)
            }
            other => Err(CodegenError::stack_discipline(format!(
                "'{name}' resolved to non-assignable {other:?}"
            ))),
        }
    }

    fn compare_into(&mut self, op: OpCode, expect: i32, b: i32, c: i32, target: u8) -> Result<()> {
        // cmp; jmp +1; false (skip next); true
        let a = target as i32;
        self.ctx().emit_abc(op, expect, b, c)?;
        let to_true = self.ctx().emit_jump()?;
        self.ctx().emit_abc(OpCode::LoadBool, a, 0, 1)?;
        self.ctx().patch_to_here(to_true)?;
        self.ctx().emit_abc(OpCode::LoadBool, a, 1, 0)?;
        Ok(())
    }

    fn concat_into(&mut self, lhs: &Expr, rhs: &Expr, target: u8) -> Result<()> {
        let first = self.ctx().allocate_register()?;
        self.expr_into(lhs, first)?;
        let second = self.ctx().allocate_register()?;
        self.expr_into(rhs, second)?;
        self.ctx().release_register(second)?;
        self.ctx().release_register(first)?;
        self.ctx()
            .emit_abc(OpCode::Concat, target as i32, first as i32, second as i32)?;
        Ok(())
    }

    /// Emit a call with the callee in `base`, which must be the newest
    /// register. With `results` 1 the result replaces the callee.
    fn call_at(&mut self, base: u8, callee: &Expr, args: &[Expr], results: i32) -> Result<()> {
        self.expr_into(callee, base)?;
        let mut arg_registers = Vec::with_capacity(args.len());
        for arg in args {
            let register = self.ctx().allocate_register()?;
            self.expr_into(arg, register)?;
            arg_registers.push(register);
        }
        self.ctx()
            .emit_abc(OpCode::Call, base as i32, args.len() as i32 + 1, results + 1)?;
        for register in arg_registers.into_iter().rev() {
            self.ctx().release_register(register)?;
        }
        Ok(())
    }

    /// Compile `function` as a child prototype and put a closure of it in
    /// `target`.
    fn closure_into(&mut self, function: &FunctionExpr, name: &str, line: u32, target: u8) -> Result<()> {
        self.unit.begin_function(name, line);
        for param in &function.params {
            self.ctx().declare_parameter(param.as_str())?;
        }
        self.statements(&function.body)?;
        let last_line = function.last_line(line);
        self.ctx().emit_abc(OpCode::Return, 0, 1, 0)?;
        let index = self.unit.finish_function(last_line)?;

        self.ctx().emit(Instruction::abx(OpCode::Closure, target as i32, index as i32))?;
        Ok(())
    }
}

/// How a binary operator is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lowering {
    Arith(OpCode),
    /// `op expect b c`, with operands swapped for `>` and `>=`.
    Compare { op: OpCode, expect: i32, swapped: bool },
    Concat,
}

fn lowering(op: BinaryOp) -> Lowering {
    let compare = |op, expect, swapped| Lowering::Compare { op, expect, swapped };
    match op {
        BinaryOp::Add => Lowering::Arith(OpCode::Add),
        BinaryOp::Sub => Lowering::Arith(OpCode::Sub),
        BinaryOp::Mul => Lowering::Arith(OpCode::Mul),
        BinaryOp::Div => Lowering::Arith(OpCode::Div),
        BinaryOp::IDiv => Lowering::Arith(OpCode::IDiv),
        BinaryOp::Mod => Lowering::Arith(OpCode::Mod),
        BinaryOp::Pow => Lowering::Arith(OpCode::Pow),
        BinaryOp::BAnd => Lowering::Arith(OpCode::BAnd),
        BinaryOp::BOr => Lowering::Arith(OpCode::BOr),
        BinaryOp::BXor => Lowering::Arith(OpCode::BXor),
        BinaryOp::Shl => Lowering::Arith(OpCode::Shl),
        BinaryOp::Shr => Lowering::Arith(OpCode::Shr),
        BinaryOp::Concat => Lowering::Concat,
        BinaryOp::Eq => compare(OpCode::Eq, 1, false),
        BinaryOp::Ne => compare(OpCode::Eq, 0, false),
        BinaryOp::Lt => compare(OpCode::Lt, 1, false),
        BinaryOp::Le => compare(OpCode::Le, 1, false),
        BinaryOp::Gt => compare(OpCode::Lt, 1, true),
        BinaryOp::Ge => compare(OpCode::Le, 1, true),
    }
}
