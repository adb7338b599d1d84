//! The chain of functions being compiled for one chunk.
//!
//! [`FunctionStack`] holds the outermost function and every nested function
//! whose body is still open, innermost last. A nested function names its
//! container by [`FunctionId`], which is simply its position in the stack.
//! When a nested function finishes it is finalized and handed to its
//! container as a prototype; nothing else crosses function boundaries.
//!
//! Name resolution lives here because it is the one operation that has to
//! look at several functions at once.

use kiln_core::{CodegenError, Result, SourceNode};
use tracing::debug;

use crate::bytecode::FunctionPrototype;
use crate::function::{FunctionContext, FunctionId, ResolvedValue};
use crate::options::CodegenOptions;
use crate::source_map::{SourceMapSink, SourceMapping};

/// Live function contexts of one compilation unit.
pub struct FunctionStack<'a> {
    root: FunctionContext,
    /// Open nested functions, innermost last. `children[i]` has id `i + 1`.
    children: Vec<FunctionContext>,
    options: CodegenOptions,
    sink: Option<&'a mut dyn SourceMapSink>,
    /// Next generated line handed to the sink.
    generated_line: u32,
}

impl std::fmt::Debug for FunctionStack<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionStack")
            .field("root", &self.root.name())
            .field("depth", &self.depth())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl<'a> FunctionStack<'a> {
    /// Start a unit with only the outermost function.
    pub fn new(options: CodegenOptions) -> Self {
        Self {
            root: FunctionContext::root(options.chunk_name.clone()),
            children: Vec::new(),
            options,
            sink: None,
            generated_line: 1,
        }
    }

    /// Start a unit that reports source mappings to `sink`.
    pub fn with_sink(options: CodegenOptions, sink: &'a mut dyn SourceMapSink) -> Self {
        let mut stack = Self::new(options);
        stack.sink = Some(sink);
        stack
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    /// Number of live functions, including the outermost.
    pub fn depth(&self) -> usize {
        self.children.len() + 1
    }

    pub fn current_id(&self) -> FunctionId {
        FunctionId(self.children.len())
    }

    /// The innermost open function.
    pub fn current(&self) -> &FunctionContext {
        self.children.last().unwrap_or(&self.root)
    }

    pub fn current_mut(&mut self) -> &mut FunctionContext {
        self.children.last_mut().unwrap_or(&mut self.root)
    }

    pub fn get(&self, id: FunctionId) -> Option<&FunctionContext> {
        match id.0 {
            0 => Some(&self.root),
            n => self.children.get(n - 1),
        }
    }

    fn level_mut(&mut self, level: usize) -> &mut FunctionContext {
        match level {
            0 => &mut self.root,
            n => &mut self.children[n - 1],
        }
    }

    fn level(&self, level: usize) -> &FunctionContext {
        match level {
            0 => &self.root,
            n => &self.children[n - 1],
        }
    }

    // ==========================================================================
    // Function lifecycle
    // ==========================================================================

    /// Open a function nested in the current one.
    pub fn begin_function(&mut self, name: impl Into<String>, line_defined: u32) -> FunctionId {
        let container = self.current_id();
        let line = self.current().current_line();
        let mut ctx = FunctionContext::new(name, Some(container), line_defined);
        ctx.set_line(line);
        debug!(function = %ctx.name(), container = container.depth(), line_defined, "begin function");
        self.children.push(ctx);
        self.current_id()
    }

    /// Finalize the innermost nested function into its container's
    /// prototype table. Returns the `CLOSURE` index in the container.
    pub fn finish_function(&mut self, last_line: u32) -> Result<u32> {
        let ctx = self
            .children
            .pop()
            .ok_or_else(|| CodegenError::stack_discipline("finish_function with no nested function open"))?;
        let name = ctx.name().to_string();
        let prototype = ctx.finalize(last_line)?;
        let index = self.current_mut().add_prototype(prototype)?;
        debug!(function = %name, index, "finish function");
        Ok(index)
    }

    /// Finalize the outermost function.
    pub fn finish(self, last_line: u32) -> Result<FunctionPrototype> {
        if !self.children.is_empty() {
            return Err(CodegenError::stack_discipline(format!(
                "{} nested function(s) still open at end of unit",
                self.children.len()
            )));
        }
        let mut prototype = self.root.finalize(last_line)?;
        prototype.source = Some(self.options.chunk_name);
        Ok(prototype)
    }

    // ==========================================================================
    // Name resolution
    // ==========================================================================

    /// Resolve `name` from the innermost function.
    ///
    /// Locals and upvalues of the current function resolve directly. A name
    /// found in an enclosing function is threaded through every function in
    /// between as an upvalue: the first hop captures the declaring
    /// register, each later hop captures the previous hop's upvalue. Names
    /// nobody declares are globals.
    pub fn resolve(&mut self, name: &str) -> Result<ResolvedValue> {
        let top = self.children.len();
        let current = self.level(top);
        if let Some(register) = current.lookup_register(name) {
            return Ok(ResolvedValue::Register(register));
        }
        if let Some(index) = current.try_find_upvalue(name) {
            return Ok(ResolvedValue::Upvalue(index));
        }

        let origin = (0..top).rev().find_map(|level| {
            let ctx = self.level(level);
            ctx.lookup_register(name)
                .map(|register| (level, true, register))
                .or_else(|| ctx.try_find_upvalue(name).map(|index| (level, false, index)))
        });
        let Some((level, mut in_stack, mut index)) = origin else {
            return Ok(ResolvedValue::Global(name.to_string()));
        };

        for hop in level + 1..=top {
            index = self.level_mut(hop).find_or_create_upvalue(name, in_stack, index)?;
            in_stack = false;
        }
        Ok(ResolvedValue::Upvalue(index))
    }

    // ==========================================================================
    // Debug lines
    // ==========================================================================

    /// Make `node` the source of subsequently emitted instructions.
    ///
    /// With a sink attached, each call maps a fresh generated line to the
    /// node's position and that generated line is stamped instead.
    pub fn set_source_location(&mut self, node: &dyn SourceNode) {
        let span = node.span();
        let line = match self.sink.as_mut() {
            Some(sink) => {
                let generated_line = self.generated_line;
                sink.add_mapping(SourceMapping {
                    generated_line,
                    original_line: span.line,
                    original_column: span.column,
                    source_path: self.options.source_path.clone(),
                });
                self.generated_line += 1;
                generated_line
            }
            None => span.line,
        };
        self.current_mut().set_line(line);
    }
}
