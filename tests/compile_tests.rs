//! End-to-end tests: construct tree in, binary chunk out.

use kiln::prelude::*;
use kiln_compiler::bytecode::dump::{HEADER_SIZE, LUA_SIGNATURE, LUAC_VERSION};
use pretty_assertions::assert_eq;

/// ```text
/// 1  let count = 0
/// 2  function bump(step) {
/// 3      count = count + step
/// 4      return count
/// 5  }
/// 6  print(bump(2))
/// ```
fn counter_program() -> Program {
    let bump = Stmt::function(
        "bump",
        &["step"],
        vec![
            Stmt::expr(Expr::assign(
                "count",
                Expr::binary(BinaryOp::Add, Expr::ident("count"), Expr::ident("step")),
            ))
            .at(3, 5),
            Stmt::return_value(Expr::ident("count")).at(4, 5),
        ],
    )
    .at(2, 1);
    let call = Stmt::expr(Expr::call(
        Expr::ident("print"),
        vec![Expr::call(Expr::ident("bump"), vec![Expr::int(2)])],
    ))
    .at(6, 1);
    Program::new(vec![Stmt::local("count", Some(Expr::int(0))).at(1, 1), bump, call])
}

#[test]
fn test_compile_counter_program() {
    let chunk = compile(&counter_program(), CodegenOptions::for_file("counter.kn")).unwrap();
    let main = &chunk.prototype;

    assert_eq!(main.source.as_deref(), Some("@counter.kn"));
    assert_eq!(main.count_functions(), 2);
    assert_eq!(
        main.opcodes(),
        vec![
            OpCode::LoadK,
            OpCode::Closure,
            OpCode::GetTabUp,
            OpCode::Move,
            OpCode::LoadK,
            OpCode::Call,
            OpCode::Call,
            OpCode::Return,
        ]
    );

    let bump = &main.prototypes[0];
    assert_eq!(bump.num_params, 1);
    assert_eq!(bump.upvalues, vec![UpvalueDesc::new("count", true, 0)]);
    assert_eq!(
        bump.opcodes(),
        vec![
            OpCode::GetUpval,
            OpCode::Add,
            OpCode::SetUpval,
            OpCode::GetUpval,
            OpCode::Return,
            OpCode::Return,
        ]
    );
    assert_eq!(bump.line_defined, 2);
    assert_eq!(bump.last_line_defined, 4);
}

#[test]
fn test_compile_records_source_map() {
    let chunk = compile(&counter_program(), CodegenOptions::for_file("counter.kn")).unwrap();

    assert_eq!(
        chunk.source_map.render(),
        "1:1:1:counter.kn\n2:2:1:counter.kn\n3:3:5:counter.kn\n4:4:5:counter.kn\n5:6:1:counter.kn\n"
    );
    // Instructions carry generated lines.
    assert_eq!(chunk.prototype.prototypes[0].lines, vec![3, 3, 3, 4, 4, 4]);
}

#[test]
fn test_dump_header() {
    let chunk = compile(&Program::new(vec![]), CodegenOptions::default()).unwrap();
    let bytes = &chunk.bytes;

    assert_eq!(&bytes[..4], &LUA_SIGNATURE[..]);
    assert_eq!(bytes[4], LUAC_VERSION);
    assert_eq!(bytes[5], 0);
    // main function has only the environment upvalue
    assert_eq!(bytes[HEADER_SIZE], 1);
}

#[test]
fn test_strip_debug_shrinks_chunk() {
    let full = compile(&counter_program(), CodegenOptions::for_file("counter.kn")).unwrap();
    let stripped = compile(
        &counter_program(),
        CodegenOptions::for_file("counter.kn").with_strip_debug(true),
    )
    .unwrap();

    assert_eq!(full.prototype, stripped.prototype);
    assert!(stripped.bytes.len() < full.bytes.len());
}

#[test]
fn test_compile_is_deterministic() {
    let first = compile(&counter_program(), CodegenOptions::default()).unwrap();
    let second = compile(&counter_program(), CodegenOptions::default()).unwrap();
    assert_eq!(first.bytes, second.bytes);
}

#[test]
fn test_listing_shows_nested_function() {
    let chunk = compile(&counter_program(), CodegenOptions::for_file("counter.kn")).unwrap();
    let listing = chunk.prototype.to_string();

    assert!(listing.starts_with("function <@counter.kn:0,6> (8 instructions)"));
    assert!(listing.contains("CLOSURE"));
    assert!(listing.contains("upvalue 0\tcount\t1\t0"));
}

#[test]
fn test_unsupported_construct_fails_compile() {
    let program = Program::new(vec![Stmt::new(StmtKind::Try(vec![])).at(3, 1)]);
    let err = compile(&program, CodegenOptions::default()).unwrap_err();
    assert!(err.is_not_implemented());
    assert_eq!(err.to_string(), "at 3:1: try statement is not implemented");
}

#[test]
fn test_build_cache_tracks_versions() {
    let id = SourceId::from_path("counter.kn");
    let mut cache = BuildCache::new();
    assert!(cache.needs_compile(id, 1));

    cache.record(id, 1);
    assert!(!cache.needs_compile(id, 1));
    assert!(cache.needs_compile(id, 2));
    assert_eq!(cache.forget(id), Some(1));
    assert!(cache.is_empty());
}
