//! End-to-end integration tests for the LLVM compilation pipeline.
//!
//! Each test builds a small SIR program as JSON-Lines text, compiles it via
//! `sircc_codegen::compile()` or `compile_to_ir()`, and checks the result.
//! SIR has no I/O op, so programs communicate results through the entry
//! function's return value, which the generated `main` wrapper turns into
//! the process exit code.

use std::process::Command;

use sircc_codegen::incremental::{build_call_graph, hash_functions, IncrementalState};
use sircc_codegen::{compile, compile_to_ir, CompileOptions, OptLevel};
use sircc_core::build_program_tables;

fn options_in(dir: &std::path::Path, opt_level: OptLevel) -> CompileOptions {
    CompileOptions {
        output_dir: dir.to_path_buf(),
        opt_level,
        target_triple: None,
        debug_symbols: false,
        entry_function: None,
    }
}

fn run_binary(path: &std::path::Path) -> i32 {
    let output = Command::new(path).output().expect("binary should execute");
    output.status.code().unwrap_or(-1)
}

// ---------------------------------------------------------------------------
// Program builders
// ---------------------------------------------------------------------------

/// `main() -> i32 { return 2 + 3; }`, entry named `main` so exit code is 5.
fn simple_add_source() -> String {
    [
        r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
        r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":2}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":3}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"i32.add","fields":{"lhs":{"ref":0},"rhs":{"ref":1}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"return","fields":{"value":{"ref":2}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"block","fields":{"params":[],"stmts":[0,1,2,3]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"fn","type_ref":10,"fields":{"name":"main","entry":{"ref":4},"blocks":[4]}}"#,
    ]
    .join("\n")
}

/// `fn callee() -> i32 { return 7; } fn main() -> i32 { return callee() + 1; }`
/// Exit code 8; exercises cross-function calls and predeclaration.
fn call_chain_source() -> String {
    [
        r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
        r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":7}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"return","fields":{"value":{"ref":0}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[0,1]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","type_ref":10,"fields":{"name":"callee","entry":{"ref":2},"blocks":[2]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"call","fields":{"callee":{"ref":3},"args":[]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"const.i32","fields":{"value":1}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":6,"tag":"i32.add","fields":{"lhs":{"ref":4},"rhs":{"ref":5}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":7,"tag":"return","fields":{"value":{"ref":6}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":8,"tag":"block","fields":{"params":[],"stmts":[4,5,6,7]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":9,"tag":"fn","type_ref":10,"fields":{"name":"main","entry":{"ref":8},"blocks":[8]}}"#,
    ]
    .join("\n")
}

/// `main() -> i32` that branches on `1 < 2` into a block parameterized by an
/// i32, returning the phi-fed value. Exit code 9 (the then-branch's value).
fn branch_with_bparam_source() -> String {
    [
        r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
        r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":1}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":2}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"i32.cmp.slt","fields":{"lhs":{"ref":0},"rhs":{"ref":1}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":20,"tag":"bparam","fields":{"index":0,"ty":1}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":21,"tag":"return","fields":{"value":{"ref":20}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":22,"tag":"block","fields":{"params":[20],"stmts":[21]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":30,"tag":"const.i32","fields":{"value":9}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":31,"tag":"term.br","fields":{"to":{"ref":22},"args":[{"ref":30}]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":32,"tag":"block","fields":{"params":[],"stmts":[30,31]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":40,"tag":"const.i32","fields":{"value":4}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":41,"tag":"term.br","fields":{"to":{"ref":22},"args":[{"ref":40}]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":42,"tag":"block","fields":{"params":[],"stmts":[40,41]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":50,"tag":"term.cbr","fields":{"cond":{"ref":2},"then":{"ref":32},"else":{"ref":42}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":51,"tag":"block","fields":{"params":[],"stmts":[0,1,2,50]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":60,"tag":"fn","type_ref":10,"fields":{"name":"main","entry":{"ref":51},"blocks":[51,32,42,22]}}"#,
    ]
    .join("\n")
}

/// `main() -> i32 { return 10 / 0; }` -- traps via the division-by-zero guard.
fn div_by_zero_source() -> String {
    [
        r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
        r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":10}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":0}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"i32.div.s.trap","fields":{"lhs":{"ref":0},"rhs":{"ref":1}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"return","fields":{"value":{"ref":2}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"block","fields":{"params":[],"stmts":[0,1,2,3]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"fn","type_ref":10,"fields":{"name":"main","entry":{"ref":4},"blocks":[4]}}"#,
    ]
    .join("\n")
}

fn build(src: &str) -> sircc_core::ProgramTables {
    build_program_tables(src).expect("fixture should parse")
}

/// `main() -> i64 { return ptr.sizeof([i32; 4]); }`. Expects 16 (4 * 4-byte
/// i32 elements, no padding).
fn ptr_sizeof_array_source() -> String {
    [
        r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
        r#"{"ir":"sir-v1.0","k":"type","id":20,"kind":"array","of":3,"len":4}"#,
        r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":4,"varargs":false}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"ptr.sizeof","type_ref":4,"fields":{"ty":20}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"return","fields":{"value":{"ref":0}}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[0,1]}}"#,
        r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","type_ref":10,"fields":{"name":"main","entry":{"ref":2},"blocks":[2]}}"#,
    ]
    .join("\n")
}

// ---------------------------------------------------------------------------
// compile_to_ir: no linker dependency, safe to run wherever LLVM is present.
// ---------------------------------------------------------------------------

#[test]
fn simple_add_lowers_to_llvm_ir_with_entry_function() {
    let mut tables = build(&simple_add_source());
    let ir = compile_to_ir(&mut tables, &CompileOptions::default()).expect("should lower to IR");
    assert!(ir.contains("define"));
    assert!(ir.contains("@main"));
}

#[test]
fn call_chain_lowers_both_functions() {
    let mut tables = build(&call_chain_source());
    let ir = compile_to_ir(&mut tables, &CompileOptions::default()).expect("should lower to IR");
    assert!(ir.contains("@callee"));
    assert!(ir.contains("@main"));
    assert!(ir.contains("call"));
}

#[test]
fn branch_with_block_params_lowers_with_phi() {
    let mut tables = build(&branch_with_bparam_source());
    let ir = compile_to_ir(&mut tables, &CompileOptions::default()).expect("should lower to IR");
    assert!(ir.contains("phi"));
}

#[test]
fn ptr_sizeof_array_lowers_to_element_count_times_element_size() {
    let mut tables = build(&ptr_sizeof_array_source());
    let ir = compile_to_ir(&mut tables, &CompileOptions::default()).expect("should lower to IR");
    assert!(ir.contains("ret i64 16"), "expected a literal i64 16 return, got:\n{ir}");
}

#[test]
fn optimization_levels_all_lower_successfully() {
    for level in [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3] {
        let mut tables = build(&simple_add_source());
        let mut options = CompileOptions::default();
        options.opt_level = level;
        let ir = compile_to_ir(&mut tables, &options);
        assert!(ir.is_ok(), "opt level {:?} should still lower", level);
    }
}

// ---------------------------------------------------------------------------
// compile(): exercises the linker, so behavior depends on a working `cc` and
// matching host target; still written against the documented contract.
// ---------------------------------------------------------------------------

#[test]
fn simple_add_compiles_and_exits_with_sum() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut tables = build(&simple_add_source());
    let options = options_in(temp_dir.path(), OptLevel::O0);
    let result = compile(&mut tables, &options).expect("compilation should succeed");
    assert_eq!(run_binary(&result.binary_path), 5);
    assert!(result.binary_size > 0);
    assert!(!result.target_triple.is_empty());
}

#[test]
fn call_chain_compiles_and_exits_with_combined_result() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut tables = build(&call_chain_source());
    let options = options_in(temp_dir.path(), OptLevel::O0);
    let result = compile(&mut tables, &options).expect("compilation should succeed");
    assert_eq!(run_binary(&result.binary_path), 8);
}

#[test]
fn branch_with_block_params_compiles_and_takes_then_branch() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut tables = build(&branch_with_bparam_source());
    let options = options_in(temp_dir.path(), OptLevel::O0);
    let result = compile(&mut tables, &options).expect("compilation should succeed");
    assert_eq!(run_binary(&result.binary_path), 9);
}

#[test]
fn division_by_zero_traps_instead_of_returning() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut tables = build(&div_by_zero_source());
    let options = options_in(temp_dir.path(), OptLevel::O0);
    let result = compile(&mut tables, &options).expect("compilation should succeed");
    // llvm.trap raises SIGILL; the exit code is never the divide's result (0).
    assert_ne!(run_binary(&result.binary_path), 0);
}

#[test]
fn o2_and_o0_agree_on_program_result() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut tables_o0 = build(&call_chain_source());
    let o0 = compile(&mut tables_o0, &options_in(temp_dir.path(), OptLevel::O0)).unwrap();

    let mut tables_o2 = build(&call_chain_source());
    let o2 = compile(&mut tables_o2, &options_in(temp_dir.path(), OptLevel::O2)).unwrap();

    assert_eq!(run_binary(&o0.binary_path), run_binary(&o2.binary_path));
}

// ---------------------------------------------------------------------------
// Incremental compilation bookkeeping.
// ---------------------------------------------------------------------------

#[test]
fn call_graph_and_hashes_agree_across_identical_builds() {
    let tables_a = build(&call_chain_source());
    let tables_b = build(&call_chain_source());

    let graph_a = build_call_graph(&tables_a);
    let graph_b = build_call_graph(&tables_b);
    assert_eq!(graph_a.len(), graph_b.len());

    let hashes_a = hash_functions(&tables_a);
    let hashes_b = hash_functions(&tables_b);
    for (id, hash) in &hashes_a {
        assert_eq!(hashes_b.get(id), Some(hash));
    }
}

#[test]
fn incremental_state_reports_no_recompilation_when_unchanged() {
    let tables = build(&call_chain_source());
    let call_graph = build_call_graph(&tables);
    let hashes = hash_functions(&tables);

    let mut state = IncrementalState::new(tempfile::tempdir().unwrap().path().to_path_buf());
    state.update_hashes(hashes.clone());

    let plan = state.compute_dirty(&hashes, &call_graph);
    assert!(!plan.needs_recompilation);
    assert_eq!(plan.cached.len(), hashes.len());
}
