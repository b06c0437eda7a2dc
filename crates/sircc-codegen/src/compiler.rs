//! Top-level compilation pipeline orchestrating the full flow: validate and
//! lower -> `Context` creation -> per-function compilation -> optimization
//! -> object emission -> linking.
//!
//! [`compile`] is the main entry point. It creates a fresh LLVM [`Context`]
//! that is dropped at function exit, ensuring no LLVM types escape the
//! compilation boundary.
//!
//! [`compile_to_ir`] is a variant that returns LLVM IR as a string instead
//! of producing a binary, useful for testing and debugging.

use std::time::Instant;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{CodeModel, FileType, RelocMode, Target, TargetTriple};
use inkwell::OptimizationLevel;

use sircc_core::{NodeId, PrimKind, ProgramTables, SirType};

use crate::error::CodegenError;
use crate::{codegen, linker, runtime, target, CompileOptions, CompileResult, OptLevel};

/// Compile a SIR program to a native executable.
///
/// Orchestrates the full pipeline:
/// 1. Validate and lower the program (rejects invalid programs before codegen)
/// 2. Resolve the target triple against the backend and reconcile ABI fields
/// 3. Create a fresh LLVM `Context`
/// 4. Predeclare every function (so forward/extern references resolve)
/// 5. Compile each `fn` node's body
/// 6. Generate a `main` wrapper for the entry function
/// 7. Verify the module, run optimization passes, emit an object file
/// 8. Link into a standalone executable
///
/// The `Context` is created and dropped entirely within this function, so
/// no LLVM types escape the compilation boundary.
pub fn compile(tables: &mut ProgramTables, options: &CompileOptions) -> Result<CompileResult, CodegenError> {
    let start = Instant::now();

    sircc_check::check_and_lower(tables)?;

    std::fs::create_dir_all(&options.output_dir)?;

    let resolved_target = target::query_target(options.target_triple.as_deref(), &tables.target, &mut tables.bus)
        .map_err(|_| CodegenError::Target(tables.bus.render(sircc_core::DiagMode::Text)))?;

    let context = Context::create();
    let module = context.create_module("sircc_unit");
    let builder = context.create_builder();

    let llvm_triple = resolved_target
        .triple
        .as_deref()
        .map(TargetTriple::create)
        .unwrap_or_else(inkwell::targets::TargetMachine::get_default_triple);
    module.set_triple(&llvm_triple);

    predeclare_functions(&context, &module, tables)?;
    for fn_node in fn_node_ids(tables) {
        codegen::compile_function(&context, &module, &builder, tables, fn_node)?;
    }

    generate_main_wrapper(&context, &module, &builder, tables, options)?;

    module
        .verify()
        .map_err(|e| CodegenError::LlvmError(format!("module verification failed: {}", e)))?;

    let llvm_target = Target::from_triple(&llvm_triple)
        .map_err(|e| CodegenError::LlvmError(format!("failed to create target from triple: {}", e)))?;
    let target_machine = llvm_target
        .create_target_machine(
            &llvm_triple,
            "generic",
            "",
            opt_to_llvm(options.opt_level),
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| CodegenError::LlvmError("failed to create target machine".to_string()))?;

    let pass_options = PassBuilderOptions::create();
    let pass_str = match options.opt_level {
        OptLevel::O0 => "default<O0>",
        OptLevel::O1 => "default<O1>",
        OptLevel::O2 => "default<O2>",
        OptLevel::O3 => "default<O3>",
    };
    module
        .run_passes(pass_str, &target_machine, pass_options)
        .map_err(|e| CodegenError::LlvmError(format!("optimization passes failed: {}", e)))?;

    let temp_dir = tempfile::tempdir()?;
    let obj_path = temp_dir.path().join("output.o");
    target_machine
        .write_to_file(&module, FileType::Object, &obj_path)
        .map_err(|e| CodegenError::LlvmError(format!("failed to write object file: {}", e)))?;

    let binary_name = determine_binary_name(tables, options);
    let output_path = options.output_dir.join(&binary_name);

    linker::link_executable(&obj_path, &output_path, options.debug_symbols)?;

    let binary_size = std::fs::metadata(&output_path)?.len();
    let compilation_time_ms = start.elapsed().as_millis() as u64;
    let target_triple_str = llvm_triple.as_str().to_string_lossy().to_string();

    Ok(CompileResult {
        binary_path: output_path,
        target_triple: target_triple_str,
        binary_size,
        compilation_time_ms,
    })
}

/// Compile a SIR program to LLVM IR text (for testing/debugging). Same
/// pipeline as [`compile`] but skips ABI reconciliation (uses the host
/// target machine directly) and returns the textual IR instead of linking.
pub fn compile_to_ir(tables: &mut ProgramTables, options: &CompileOptions) -> Result<String, CodegenError> {
    sircc_check::check_and_lower(tables)?;

    let context = Context::create();
    let module = context.create_module("sircc_unit");
    let builder = context.create_builder();

    let machine = target::host_target_machine()?;
    module.set_triple(&machine.get_triple());

    predeclare_functions(&context, &module, tables)?;
    for fn_node in fn_node_ids(tables) {
        codegen::compile_function(&context, &module, &builder, tables, fn_node)?;
    }

    generate_main_wrapper(&context, &module, &builder, tables, options)?;

    module
        .verify()
        .map_err(|e| CodegenError::LlvmError(format!("module verification failed: {}", e)))?;

    Ok(module.print_to_string().to_string())
}

fn fn_node_ids(tables: &ProgramTables) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = tables.nodes_with_tag("fn").map(|n| n.id).collect();
    ids.sort_by_key(|id| id.0);
    ids
}

fn decl_fn_node_ids(tables: &ProgramTables) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = tables.nodes_with_tag("decl.fn").map(|n| n.id).collect();
    ids.sort_by_key(|id| id.0);
    ids
}

/// Forward-declares every `fn` and `decl.fn` node before any body is
/// lowered, so `ptr.sym`/`call` references (forward or extern) resolve
/// regardless of declaration order (`§3` "Identifiers": "forward references
/// permitted").
fn predeclare_functions<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    tables: &ProgramTables,
) -> Result<(), CodegenError> {
    runtime::declare_exit(context, module);
    for id in fn_node_ids(tables).into_iter().chain(decl_fn_node_ids(tables)) {
        codegen::declare_function(context, module, tables, id)?;
    }
    Ok(())
}

/// Selects the program's entry function: a node named `zir_main`
/// (`§4.H`'s driver convention, generalized across both output paths so the
/// native and ZASM backends agree on which function starts the program),
/// else `main`, else the first declared `fn` node.
fn find_entry_fn(tables: &ProgramTables, options: &CompileOptions) -> Option<NodeId> {
    if let Some(name) = &options.entry_function {
        return fn_node_ids(tables)
            .into_iter()
            .find(|&id| tables.node(id).and_then(|n| n.field_str("name")) == Some(name.as_str()));
    }
    let ids = fn_node_ids(tables);
    ids.iter()
        .copied()
        .find(|&id| tables.node(id).and_then(|n| n.field_str("name")) == Some("zir_main"))
        .or_else(|| {
            ids.iter()
                .copied()
                .find(|&id| tables.node(id).and_then(|n| n.field_str("name")) == Some("main"))
        })
        .or_else(|| ids.first().copied())
}

/// Generates the `main` wrapper that calls the program's entry function.
/// If the entry function is already named `main` it is trusted to have the
/// right signature and no wrapper is emitted. Otherwise a wrapper is built
/// that calls the entry function and converts its return value (if any
/// integer width) into a process exit code via `exit`.
fn generate_main_wrapper<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    builder: &inkwell::builder::Builder<'ctx>,
    tables: &ProgramTables,
    options: &CompileOptions,
) -> Result<(), CodegenError> {
    let entry_id = find_entry_fn(tables, options).ok_or(CodegenError::NoEntryFunction)?;
    let entry_node = tables
        .node(entry_id)
        .ok_or_else(|| CodegenError::InvalidSir(format!("entry node {} not found", entry_id.0)))?;
    let entry_name = entry_node
        .field_str("name")
        .ok_or_else(|| CodegenError::InvalidSir(format!("entry node {} has no name", entry_id.0)))?
        .to_string();

    let sig_id = entry_node
        .type_ref
        .ok_or_else(|| CodegenError::InvalidSir(format!("entry fn {} has no type_ref", entry_name)))?;
    let (params, ret) = match tables.types.get(sig_id) {
        Some(SirType::Fn { params, ret, .. }) => (params.clone(), *ret),
        _ => {
            return Err(CodegenError::InvalidSir(format!(
                "entry fn {} type_ref is not a fn type",
                entry_name
            )))
        }
    };
    if !params.is_empty() {
        return Err(CodegenError::InvalidSir(format!(
            "entry function '{}' must take zero parameters, but has {}",
            entry_name,
            params.len()
        )));
    }

    let entry_llvm_fn = module.get_function(&entry_name).ok_or_else(|| {
        CodegenError::LlvmError(format!("compiled entry function '{}' not found in LLVM module", entry_name))
    })?;

    if entry_name == "main" {
        return Ok(());
    }

    let i32_type = context.i32_type();
    let main_fn_type = i32_type.fn_type(&[], false);
    let main_fn = module.add_function("main", main_fn_type, None);
    let entry_bb = context.append_basic_block(main_fn, "entry");
    builder.position_at_end(entry_bb);

    let call_result = builder
        .build_call(entry_llvm_fn, &[], "call_entry")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    let is_void = matches!(tables.types.get(ret), Some(SirType::Prim(PrimKind::Void)));
    if is_void {
        builder
            .build_return(Some(&i32_type.const_int(0, false)))
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        return Ok(());
    }

    let ret_val = call_result
        .try_as_basic_value()
        .left()
        .ok_or_else(|| CodegenError::LlvmError("expected a return value from entry function".into()))?;

    let is_int = matches!(tables.types.get(ret), Some(SirType::Prim(p)) if p.int_width().is_some());
    if !is_int {
        builder
            .build_return(Some(&i32_type.const_int(0, false)))
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        return Ok(());
    }

    let int_val = ret_val.into_int_value();
    let bit_width = int_val.get_type().get_bit_width();
    let exit_code = if bit_width < 32 {
        builder
            .build_int_s_extend(int_val, i32_type, "sext_exit")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?
    } else if bit_width > 32 {
        builder
            .build_int_truncate(int_val, i32_type, "trunc_exit")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?
    } else {
        int_val
    };
    builder
        .build_return(Some(&exit_code))
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    Ok(())
}

fn opt_to_llvm(level: OptLevel) -> OptimizationLevel {
    match level {
        OptLevel::O0 => OptimizationLevel::None,
        OptLevel::O1 => OptimizationLevel::Less,
        OptLevel::O2 => OptimizationLevel::Default,
        OptLevel::O3 => OptimizationLevel::Aggressive,
    }
}

fn determine_binary_name(tables: &ProgramTables, options: &CompileOptions) -> String {
    if let Some(name) = &options.entry_function {
        return name.clone();
    }
    find_entry_fn(tables, options)
        .and_then(|id| tables.node(id))
        .and_then(|n| n.field_str("name"))
        .map(str::to_string)
        .unwrap_or_else(|| "program".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    #[test]
    fn opt_to_llvm_mapping() {
        assert_eq!(opt_to_llvm(OptLevel::O0), OptimizationLevel::None);
        assert_eq!(opt_to_llvm(OptLevel::O1), OptimizationLevel::Less);
        assert_eq!(opt_to_llvm(OptLevel::O2), OptimizationLevel::Default);
        assert_eq!(opt_to_llvm(OptLevel::O3), OptimizationLevel::Aggressive);
    }

    fn main_fn_tables() -> ProgramTables {
        build_program_tables(
            &[
                r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
                r#"{"ir":"sir-v1.0","k":"type","id":100,"kind":"fn","params":[],"ret":3,"varargs":false}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":7}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"return","fields":{"value":{"ref":0}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[0,1]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","type_ref":100,"fields":{"name":"main","entry":{"ref":2},"blocks":[2]}}"#,
            ]
            .join("\n"),
        )
        .unwrap()
    }

    #[test]
    fn determine_binary_name_uses_entry_fn_name() {
        let tables = main_fn_tables();
        let options = CompileOptions::default();
        assert_eq!(determine_binary_name(&tables, &options), "main");
    }

    #[test]
    fn determine_binary_name_uses_entry_function_option() {
        let tables = main_fn_tables();
        let options = CompileOptions {
            entry_function: Some("main".to_string()),
            ..Default::default()
        };
        assert_eq!(determine_binary_name(&tables, &options), "main");
    }

    #[test]
    fn find_entry_fn_prefers_main_over_other_names() {
        let tables = main_fn_tables();
        let options = CompileOptions::default();
        let id = find_entry_fn(&tables, &options).unwrap();
        assert_eq!(tables.node(id).unwrap().field_str("name"), Some("main"));
    }
}
