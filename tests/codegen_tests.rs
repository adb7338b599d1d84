//! Integration tests for the per-function code generation primitives.

use kiln::prelude::*;
use kiln_compiler::FunctionId;
use kiln_compiler::bytecode::Instruction;
use pretty_assertions::assert_eq;

fn nested(name: &str) -> FunctionContext {
    FunctionContext::new(name, Some(FunctionId::ROOT), 1)
}

#[test]
fn test_nested_block_registers() {
    let mut ctx = nested("f");
    assert_eq!(ctx.declare_local("a").unwrap(), 0);

    ctx.enter_scope("block");
    assert_eq!(ctx.declare_local("b").unwrap(), 1);
    assert_eq!(ctx.declare_local("c").unwrap(), 2);
    assert_eq!(ctx.lookup_register("c"), Some(2));
    ctx.exit_scope().unwrap();

    assert_eq!(ctx.lookup_register("b"), None);
    assert_eq!(ctx.available_register(), 1);
    assert_eq!(ctx.declare_local("d").unwrap(), 1);
    assert_eq!(ctx.max_stack_size(), 3);
}

#[test]
fn test_scope_exit_resumes_at_lowest_local() {
    let mut ctx = nested("f");
    let outer = ctx.allocate_register().unwrap();
    ctx.enter_scope("block");
    ctx.declare_local("x").unwrap();
    ctx.declare_local("y").unwrap();
    let temp = ctx.allocate_register().unwrap();
    assert_eq!(temp, 3);
    ctx.exit_scope().unwrap();

    assert_eq!(ctx.available_register(), 1);
    assert_eq!(ctx.allocate_register().unwrap(), 1);
    ctx.release_register(1).unwrap();
    ctx.release_register(outer).unwrap();
    assert_eq!(ctx.available_register(), 0);
}

#[test]
fn test_allocate_release_balance() {
    let mut ctx = nested("f");
    let regs: Vec<u8> = (0..4).map(|_| ctx.allocate_register().unwrap()).collect();
    assert_eq!(regs, vec![0, 1, 2, 3]);

    let err = ctx.release_register(1).unwrap_err();
    assert!(matches!(err, CodegenError::StackDiscipline { .. }));

    for reg in regs.into_iter().rev() {
        ctx.release_register(reg).unwrap();
    }
    assert_eq!(ctx.available_register(), 0);
    assert_eq!(ctx.max_stack_size(), 4);
}

#[test]
fn test_push_and_pop_temporaries() {
    let mut ctx = nested("f");
    let first = ctx.allocate_push().unwrap();
    let second = ctx.allocate_push().unwrap();
    assert_eq!(ctx.pop_temporary().unwrap(), second);
    assert_eq!(ctx.pop_temporary().unwrap(), first);
    assert!(ctx.pop_temporary().is_err());
}

#[test]
fn test_register_file_exhaustion() {
    let mut ctx = nested("f");
    for expected in 0..255u32 {
        assert_eq!(ctx.allocate_register().unwrap() as u32, expected);
    }
    let err = ctx.allocate_register().unwrap_err();
    assert_eq!(
        err,
        CodegenError::OperandRange {
            context: "register allocator",
            field: OperandField::Register,
            value: 255,
            min: 0,
            max: 254,
            line: 0,
        }
    );
    assert_eq!(ctx.max_stack_size(), 255);
}

#[test]
fn test_two_level_upvalue_chain() {
    let mut unit = FunctionStack::new(CodegenOptions::default());
    let x = unit.current_mut().declare_local("x").unwrap();
    unit.begin_function("middle", 2);
    unit.begin_function("inner", 3);

    assert_eq!(unit.resolve("x").unwrap(), ResolvedValue::Upvalue(0));
    assert_eq!(unit.current().upvalues(), &[UpvalueDesc::new("x", false, 0)]);

    unit.current_mut().emit_abc(OpCode::Return, 0, 1, 0).unwrap();
    unit.finish_function(4).unwrap();
    assert_eq!(unit.current().upvalues(), &[UpvalueDesc::new("x", true, x)]);
    assert_eq!(unit.current().prototypes().len(), 1);
}

#[test]
fn test_upvalue_creation_is_idempotent() {
    let mut ctx = nested("f");
    let first = ctx.find_or_create_upvalue("count", true, 3).unwrap();
    let again = ctx.find_or_create_upvalue("count", true, 3).unwrap();
    assert_eq!(first, again);
    assert_eq!(ctx.upvalues().len(), 1);

    let err = ctx.create_upvalue("count", true, 3).unwrap_err();
    assert!(matches!(
        err,
        CodegenError::Redeclaration {
            kind: ReferenceKind::Upvalue,
            ..
        }
    ));
    assert_eq!(ctx.find_upvalue("count").unwrap(), first);
    assert!(ctx.find_upvalue("missing").is_err());
}

#[test]
fn test_constant_deduplication() {
    let mut ctx = nested("f");
    let one = ctx.constant(1i64);
    let name = ctx.constant("name");
    assert_eq!(ctx.constant(1i64), one);
    assert_eq!(ctx.constant("name"), name);
    assert_ne!(ctx.constant(1.0f64), one);
    assert_eq!(ctx.constants().len(), 3);
    assert_eq!(ctx.find_constant(&Constant::from("name")).unwrap(), name);
}

#[test]
fn test_jump_patch_offset() {
    let mut ctx = nested("f");
    ctx.allocate_register().unwrap();
    ctx.allocate_register().unwrap();

    let jump = ctx.emit_jump().unwrap();
    for _ in 0..5 {
        ctx.emit_abc(OpCode::Move, 0, 1, 0).unwrap();
    }
    ctx.patch_to_here(jump).unwrap();

    let patched = ctx.instruction(jump.index()).unwrap();
    assert_eq!(patched.op, OpCode::Jmp);
    assert_eq!(patched.sbx(), 5);
}

#[test]
fn test_instruction_lines_follow_source() {
    let mut ctx = nested("f");
    ctx.allocate_register().unwrap();
    ctx.set_line(7);
    ctx.emit_abc(OpCode::LoadNil, 0, 0, 0).unwrap();
    ctx.set_line(9);
    ctx.emit(Instruction::abc(OpCode::Return, 0, 1, 0)).unwrap();
    ctx.release_register(0).unwrap();

    let proto = ctx.finalize(9).unwrap();
    assert_eq!(proto.lines, vec![7, 9]);
    assert_eq!(proto.line_defined, 1);
    assert_eq!(proto.last_line_defined, 9);
}

#[test]
fn test_emit_rejects_unknown_constant() {
    let mut ctx = nested("f");
    ctx.allocate_register().unwrap();
    let err = ctx.emit_abx(OpCode::LoadK, 0, 0).unwrap_err();
    assert!(matches!(
        err,
        CodegenError::OperandRange {
            field: OperandField::Constant,
            ..
        }
    ));
    assert_eq!(ctx.pc(), 0);
}

#[test]
fn test_finalize_requires_closed_scopes() {
    let mut ctx = nested("f");
    ctx.enter_scope("block");
    let err = ctx.finalize(1).unwrap_err();
    assert!(matches!(err, CodegenError::StackDiscipline { .. }));
}
