//! Per-function native-IR lowering: lowers one `fn` node's CFG to LLVM IR
//! (component G, `§4.G`).
//!
//! [`compile_function`] creates an LLVM function from a SIR `fn` node's
//! signature (read off its `type_ref`, a `SirType::Fn`), builds one LLVM
//! basic block per SIR block up front (so forward branches resolve), and
//! walks each block's statements in the order the producer gave them.
//! Block parameters become LLVM `phi` nodes, fed by each predecessor's
//! terminator. [`lower_expr`] memoizes the backend value for every node id
//! in a `HashMap<NodeId, BasicValueEnum>`, mirroring the interpreter's own
//! per-frame values map so the two execution paths agree on operand field
//! names.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::BasicType;
use inkwell::values::{BasicValue, BasicValueEnum, FunctionValue, IntValue, PhiValue, PointerValue};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use sircc_core::node::{int_width_of_tag, normalize_tag, Ref};
use sircc_core::{Layout, NodeId, NodeRecord, PrimKind, ProgramTables, SirType, TypeId};

use crate::error::CodegenError;
use crate::types::sir_type_to_llvm;

/// Per-function lowering state: the maps that make [`lower_expr`]
/// memoized and block-param resolution possible.
struct FnState<'ctx, 'a> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    builder: &'a Builder<'ctx>,
    tables: &'a ProgramTables,
    function: FunctionValue<'ctx>,
    blocks: HashMap<NodeId, BasicBlock<'ctx>>,
    phis: HashMap<NodeId, PhiValue<'ctx>>,
    values: HashMap<NodeId, BasicValueEnum<'ctx>>,
    ptr_layout: Layout,
}

/// Compiles one SIR `fn` node into an LLVM [`FunctionValue`], lowering
/// every reachable block.
pub fn compile_function<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    builder: &Builder<'ctx>,
    tables: &ProgramTables,
    fn_node: NodeId,
) -> Result<FunctionValue<'ctx>, CodegenError> {
    let node = get_node(tables, fn_node)?;
    if node.tag != "fn" {
        return Err(CodegenError::InvalidSir(format!(
            "node {} is not a fn (tag {:?})",
            fn_node.0, node.tag
        )));
    }
    let name = node
        .field_str("name")
        .ok_or_else(|| CodegenError::InvalidSir(format!("fn {} has no name", fn_node.0)))?
        .to_string();

    let function = declare_function(context, module, tables, fn_node)?;

    let entry_ref = node
        .field_ref("entry")
        .ok_or_else(|| CodegenError::InvalidSir(format!("fn {} has no entry block", fn_node.0)))?;
    let block_refs = node.field_refs("blocks");
    let block_ids: Vec<NodeId> = block_refs.iter().map(Ref::as_node_id).collect();
    let entry_id = entry_ref.as_node_id();

    let order = block_emission_order(tables, &block_ids, entry_id)?;

    let ptr_bytes = (tables.target.ptr_bits.unwrap_or(64) / 8) as u64;
    let ptr_layout = Layout { size: ptr_bytes, align: ptr_bytes };

    let mut state = FnState {
        context,
        module,
        builder,
        tables,
        function,
        blocks: HashMap::new(),
        phis: HashMap::new(),
        values: HashMap::new(),
        ptr_layout,
    };

    // Pass 1: create every LLVM block so branches (forward or back) resolve.
    for (i, &id) in order.iter().enumerate() {
        let label = if id == entry_id {
            "entry".to_string()
        } else {
            format!("bb{}_{}", i, id.0)
        };
        let bb = context.append_basic_block(function, &label);
        state.blocks.insert(id, bb);
    }

    // Pass 2: bind entry block params directly to function arguments; create
    // phi nodes for every other block's params.
    let entry_block_node = get_node(tables, entry_id)?.clone();
    let entry_params = entry_block_node.field_refs("params");
    for (i, param_ref) in entry_params.iter().enumerate() {
        let llvm_param = function
            .get_nth_param(i as u32)
            .ok_or_else(|| CodegenError::InvalidSir(format!("fn {} missing parameter {}", name, i)))?;
        state.values.insert(param_ref.as_node_id(), llvm_param);
    }

    for &id in &order {
        if id == entry_id {
            continue;
        }
        let block_node = get_node(tables, id)?.clone();
        let bb = state.blocks[&id];
        builder.position_at_end(bb);
        for param_ref in block_node.field_refs("params") {
            let pid = param_ref.as_node_id();
            let param_node = get_node(tables, pid)?;
            let ty = param_node
                .type_ref
                .ok_or_else(|| CodegenError::InvalidSir(format!("bparam {} has no type_ref", pid.0)))?;
            let llvm_ty = sir_type_to_llvm(context, ty, &tables.types)?;
            let phi = builder
                .build_phi(llvm_ty, &format!("bp{}", pid.0))
                .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            state.phis.insert(pid, phi);
            state.values.insert(pid, phi.as_basic_value());
        }
    }

    // Pass 3: lower each block's statements in order; the last statement of
    // every block is its terminator.
    for &id in &order {
        let block_node = get_node(tables, id)?.clone();
        let bb = state.blocks[&id];
        builder.position_at_end(bb);
        let stmts = block_node.field_refs("stmts");
        let stmt_ids: Vec<NodeId> = stmts.iter().map(Ref::as_node_id).collect();
        for (i, &stmt_id) in stmt_ids.iter().enumerate() {
            if i + 1 == stmt_ids.len() {
                lower_terminator(&mut state, id, stmt_id)?;
            } else {
                lower_stmt(&mut state, stmt_id)?;
            }
        }
    }

    Ok(function)
}

/// Looks up or forward-declares the LLVM function for `fn_node`, reading
/// its signature off the node's `type_ref` (a `SirType::Fn`).
pub fn declare_function<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    tables: &ProgramTables,
    fn_node: NodeId,
) -> Result<FunctionValue<'ctx>, CodegenError> {
    let node = get_node(tables, fn_node)?;
    let name = node
        .field_str("name")
        .ok_or_else(|| CodegenError::InvalidSir(format!("fn {} has no name", fn_node.0)))?;
    if let Some(existing) = module.get_function(name) {
        return Ok(existing);
    }

    let sig_id = node
        .type_ref
        .ok_or_else(|| CodegenError::InvalidSir(format!("fn {} has no type_ref", fn_node.0)))?;
    let sig = tables
        .types
        .get(sig_id)
        .ok_or_else(|| CodegenError::InvalidSir(format!("fn {} signature type not found", fn_node.0)))?;
    let (params, ret, varargs) = match sig {
        SirType::Fn { params, ret, varargs } => (params.clone(), *ret, *varargs),
        _ => {
            return Err(CodegenError::InvalidSir(format!(
                "fn {} type_ref is not a fn type",
                fn_node.0
            )))
        }
    };

    let param_tys: Vec<inkwell::types::BasicMetadataTypeEnum> = params
        .iter()
        .map(|t| sir_type_to_llvm(context, *t, &tables.types).map(Into::into))
        .collect::<Result<Vec<_>, _>>()?;

    let is_void = matches!(tables.types.get(ret), Some(SirType::Prim(PrimKind::Void)));
    let fn_type = if is_void {
        context.void_type().fn_type(&param_tys, varargs)
    } else {
        sir_type_to_llvm(context, ret, &tables.types)?.fn_type(&param_tys, varargs)
    };

    Ok(module.add_function(name, fn_type, None))
}

fn get_node(tables: &ProgramTables, id: NodeId) -> Result<&NodeRecord, CodegenError> {
    tables
        .node(id)
        .ok_or_else(|| CodegenError::InvalidSir(format!("node {} not found", id.0)))
}

/// A traversal order over the block CFG from `entry`, computed via a
/// [`petgraph`] depth-first search over control edges, since a CFG has no
/// topological order once loops are present. Blocks unreachable from
/// `entry` are appended afterward in declaration order so every declared
/// block is still emitted (phi nodes handle predecessor ordering
/// regardless).
fn block_emission_order(
    tables: &ProgramTables,
    block_ids: &[NodeId],
    entry: NodeId,
) -> Result<Vec<NodeId>, CodegenError> {
    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let mut indices: HashMap<NodeId, NodeIndex> = HashMap::new();
    for &id in block_ids {
        indices.insert(id, graph.add_node(id));
    }
    for &id in block_ids {
        let block = get_node(tables, id)?;
        for succ in block_successors(tables, block)? {
            if let (Some(&a), Some(&b)) = (indices.get(&id), indices.get(&succ)) {
                graph.add_edge(a, b, ());
            }
        }
    }

    let entry_idx = *indices
        .get(&entry)
        .ok_or_else(|| CodegenError::InvalidSir(format!("entry block {} not in blocks list", entry.0)))?;

    let mut dfs = Dfs::new(&graph, entry_idx);
    let mut order = Vec::new();
    while let Some(idx) = dfs.next(&graph) {
        order.push(graph[idx]);
    }

    for &id in block_ids {
        if !order.contains(&id) {
            order.push(id);
        }
    }
    Ok(order)
}

fn block_successors(tables: &ProgramTables, block: &NodeRecord) -> Result<Vec<NodeId>, CodegenError> {
    let stmt_ids: Vec<NodeId> = block.field_refs("stmts").iter().map(Ref::as_node_id).collect();
    let Some(&term_id) = stmt_ids.last() else {
        return Ok(Vec::new());
    };
    let term = get_node(tables, term_id)?;
    let mut out = Vec::new();
    match normalize_tag(&term.tag) {
        "term.br" => {
            if let Some(to) = term.field_ref("to") {
                out.push(to.as_node_id());
            }
        }
        "term.cbr" => {
            for key in ["then", "else"] {
                if let Some(to) = branch_target(term, key) {
                    out.push(to);
                }
            }
        }
        "term.switch" => {
            if let Some(cases) = term.field("cases").and_then(|v| v.as_array()) {
                for case in cases {
                    if let Some(to) = case.get("to").and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok()) {
                        out.push(to.as_node_id());
                    }
                }
            }
            if let Some(to) = term.field("default").and_then(branch_target_obj) {
                out.push(to);
            }
        }
        _ => {}
    }
    Ok(out)
}

fn branch_target(term: &NodeRecord, key: &str) -> Option<NodeId> {
    term.field(key).and_then(branch_target_obj)
}

fn branch_target_obj(obj: &serde_json::Value) -> Option<NodeId> {
    obj.get("to")
        .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
        .map(|r| r.as_node_id())
}

// ---------------------------------------------------------------------------
// Expression lowering
// ---------------------------------------------------------------------------

fn lower_expr<'ctx>(state: &mut FnState<'ctx, '_>, id: NodeId) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    if let Some(v) = state.values.get(&id) {
        return Ok(*v);
    }
    let node = get_node(state.tables, id)?.clone();
    let tag = normalize_tag(&node.tag).to_string();
    let value = lower_expr_inner(state, &node, &tag)?;
    state.values.insert(id, value);
    Ok(value)
}

fn operand<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    key: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let r = node
        .field_ref(key)
        .ok_or_else(|| CodegenError::InvalidSir(format!("node {} missing field {}", node.id.0, key)))?;
    lower_expr(state, r.as_node_id())
}

fn lower_expr_inner<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    if let Some(v) = lower_const(state, node, tag)? {
        return Ok(v);
    }
    if let Some(width) = int_width_of_tag(tag) {
        return lower_int_op(state, node, tag, width);
    }
    if tag.starts_with("f32.") || tag.starts_with("f64.") {
        return lower_float_op(state, node, tag);
    }
    if let Some(rest) = tag.strip_prefix("bool.") {
        return lower_bool_op(state, node, rest);
    }
    if tag.starts_with("ptr.") {
        return lower_ptr_op(state, node, tag);
    }
    if tag.starts_with("load.") {
        return lower_load(state, node, tag);
    }
    if tag.starts_with("vec.") {
        return lower_vec_op(state, node, tag);
    }

    match tag {
        "name" => operand(state, node, "ref"),
        "bparam" => state
            .values
            .get(&node.id)
            .copied()
            .ok_or_else(|| CodegenError::InvalidSir(format!("bparam {} not bound", node.id.0))),
        "cstr" => lower_cstr(state, node),
        "alloca" => lower_alloca(state, node),
        "select" => {
            let cond = operand(state, node, "cond")?.into_int_value();
            let t = operand(state, node, "t")?;
            let e = operand(state, node, "e")?;
            state
                .builder
                .build_select(cond, t, e, "select")
                .map_err(|e| CodegenError::LlvmError(e.to_string()))
        }
        "call" => lower_call(state, node),
        _ => Err(CodegenError::UnsupportedOp(tag.to_string())),
    }
}

fn lower_const<'ctx>(
    state: &FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
) -> Result<Option<BasicValueEnum<'ctx>>, CodegenError> {
    let ctx = state.context;
    Ok(Some(match tag {
        "const.i8" => ctx.i8_type().const_int(require_i64(node, "value")? as u64, true).into(),
        "const.i16" => ctx.i16_type().const_int(require_i64(node, "value")? as u64, true).into(),
        "const.i32" => ctx.i32_type().const_int(require_i64(node, "value")? as u64, true).into(),
        "const.i64" => ctx.i64_type().const_int(require_i64(node, "value")? as u64, true).into(),
        "const.f32" => {
            let bits = require_hex_bits(node)? as u32;
            ctx.f32_type().const_float(f32::from_bits(bits) as f64).into()
        }
        "const.f64" => {
            let bits = require_hex_bits(node)?;
            ctx.f64_type().const_float(f64::from_bits(bits)).into()
        }
        "bool.const" => {
            let v = node.field_bool("value").unwrap_or(false);
            ctx.bool_type().const_int(v as u64, false).into()
        }
        _ => return Ok(None),
    }))
}

fn require_i64(node: &NodeRecord, field: &'static str) -> Result<i64, CodegenError> {
    node.field_i64(field)
        .ok_or_else(|| CodegenError::InvalidSir(format!("node {} missing field {}", node.id.0, field)))
}

fn require_hex_bits(node: &NodeRecord) -> Result<u64, CodegenError> {
    let s = node
        .field_str("bits")
        .ok_or_else(|| CodegenError::InvalidSir(format!("node {} missing field bits", node.id.0)))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| CodegenError::InvalidSir(format!("node {} has malformed bits {}", node.id.0, s)))
}

fn lower_cstr<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let s = node
        .field_str("value")
        .ok_or_else(|| CodegenError::InvalidSir(format!("cstr {} missing value", node.id.0)))?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    let const_str = state.context.const_string(&bytes, false);
    let global = state.module.add_global(const_str.get_type(), None, "cstr");
    global.set_initializer(&const_str);
    global.set_constant(true);
    global.set_linkage(inkwell::module::Linkage::Private);
    global.set_alignment(1);
    Ok(global.as_pointer_value().into())
}

fn lower_alloca<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let ty_ref = node
        .field_ref("ty")
        .ok_or_else(|| CodegenError::InvalidSir(format!("alloca {} missing ty", node.id.0)))?
        .as_type_id();
    let llvm_ty = sir_type_to_llvm(state.context, ty_ref, &state.tables.types)?;
    let count = node.field_i64("count").unwrap_or(1).max(1);

    let ptr = if count == 1 {
        state
            .builder
            .build_alloca(llvm_ty, "alloca")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?
    } else {
        let count_val = state.context.i64_type().const_int(count as u64, false);
        state
            .builder
            .build_array_alloca(llvm_ty, count_val, "alloca_arr")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?
    };

    if node.field_bool("zero").unwrap_or(false) {
        let mut visiting = Vec::new();
        let mut bus = sircc_core::DiagnosticBus::new();
        let layout = sircc_core::layout_of(&state.tables.types, ty_ref, state.ptr_layout, &mut bus, &mut visiting)
            .ok_or_else(|| CodegenError::InvalidSir(format!("alloca {} has no layout", node.id.0)))?;
        let total = layout.size * count as u64;
        let i8_ptr = state
            .builder
            .build_pointer_cast(ptr, state.context.ptr_type(AddressSpace::default()), "zero_cast")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        state
            .builder
            .build_memset(
                i8_ptr,
                1,
                state.context.i8_type().const_int(0, false),
                state.context.i64_type().const_int(total, false),
            )
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    }
    Ok(state
        .builder
        .build_pointer_cast(ptr, state.context.ptr_type(AddressSpace::default()), "alloca_i8ptr")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?
        .into())
}

fn lower_load<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let addr = operand(state, node, "addr")?.into_pointer_value();
    let align = node.field_i64("align").unwrap_or(1).max(1) as u32;
    emit_align_guard(state, addr, align, node.id)?;

    if tag == "load.vec" {
        let vec_ty = node
            .type_ref
            .ok_or_else(|| CodegenError::InvalidSir(format!("load.vec {} has no type_ref", node.id.0)))?;
        let llvm_ty = sir_type_to_llvm(state.context, vec_ty, &state.tables.types)?;
        return state
            .builder
            .build_load(llvm_ty, addr, "load_vec")
            .map_err(|e| CodegenError::LlvmError(e.to_string()));
    }

    let width = load_store_width(state, node, tag);
    let int_ty = state.context.custom_width_int_type(width);
    state
        .builder
        .build_load(int_ty, addr, "load")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))
}

fn lower_store<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord, _tag: &str) -> Result<(), CodegenError> {
    let addr = operand(state, node, "addr")?.into_pointer_value();
    let align = node.field_i64("align").unwrap_or(1).max(1) as u32;
    emit_align_guard(state, addr, align, node.id)?;
    let value = operand(state, node, "value")?;
    state
        .builder
        .build_store(addr, value)
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(())
}

fn load_store_width(state: &FnState<'_, '_>, node: &NodeRecord, tag: &str) -> u32 {
    tag.rsplit('.')
        .next()
        .and_then(|suffix| match suffix {
            "i8" => Some(8),
            "i16" => Some(16),
            "i32" => Some(32),
            "i64" => Some(64),
            _ => None,
        })
        .or_else(|| node.type_ref.and_then(|t| prim_int_width(state, t)))
        .unwrap_or(32)
}

fn prim_int_width(state: &FnState<'_, '_>, ty: TypeId) -> Option<u32> {
    match state.tables.types.get(ty)? {
        SirType::Prim(p) => p.int_width(),
        _ => None,
    }
}

/// Emits a conditional trap when `addr`'s integer view is not aligned to
/// `align` (`§4.G` "Load/store"): a diamond with a trap intrinsic and
/// `unreachable` on the misaligned branch.
fn emit_align_guard<'ctx>(
    state: &mut FnState<'ctx, '_>,
    addr: PointerValue<'ctx>,
    align: u32,
    node_id: NodeId,
) -> Result<(), CodegenError> {
    if align <= 1 {
        return Ok(());
    }
    let int_ty = state.context.i64_type();
    let addr_int = state
        .builder
        .build_ptr_to_int(addr, int_ty, "align_check")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    let mask = int_ty.const_int((align as u64) - 1, false);
    let masked = state
        .builder
        .build_and(addr_int, mask, "align_mask")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    let zero = int_ty.const_int(0, false);
    let is_aligned = state
        .builder
        .build_int_compare(IntPredicate::EQ, masked, zero, "is_aligned")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    emit_trap_unless(state, is_aligned, node_id)
}

/// Diamond that traps (via `llvm.trap` + `unreachable`) when `ok` is
/// false, otherwise continues (`§4.G` "Traps").
fn emit_trap_unless<'ctx>(state: &mut FnState<'ctx, '_>, ok: IntValue<'ctx>, node_id: NodeId) -> Result<(), CodegenError> {
    let trap_bb = state.context.append_basic_block(state.function, &format!("trap_{}", node_id.0));
    let cont_bb = state.context.append_basic_block(state.function, &format!("cont_{}", node_id.0));
    state
        .builder
        .build_conditional_branch(ok, cont_bb, trap_bb)
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    state.builder.position_at_end(trap_bb);
    let trap_fn_ty = state.context.void_type().fn_type(&[], false);
    let trap_fn = state
        .module
        .get_function("llvm.trap")
        .unwrap_or_else(|| state.module.add_function("llvm.trap", trap_fn_ty, None));
    state
        .builder
        .build_call(trap_fn, &[], "trap")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    state
        .builder
        .build_unreachable()
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    state.builder.position_at_end(cont_bb);
    Ok(())
}

fn lower_int_op<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
    width: u32,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let op = tag.splitn(2, '.').nth(1).unwrap_or("");
    let int_ty = state.context.custom_width_int_type(width);

    Ok(match op {
        "add" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_int_add(a, b, "add").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "sub" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_int_sub(a, b, "sub").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "mul" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_int_mul(a, b, "mul").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "and" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_and(a, b, "and").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "or" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_or(a, b, "or").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "xor" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_xor(a, b, "xor").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "not" => {
            let x = operand(state, node, "x")?.into_int_value();
            state.builder.build_not(x, "not").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "neg" => {
            let x = operand(state, node, "x")?.into_int_value();
            state.builder.build_int_neg(x, "neg").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "eqz" => {
            let x = operand(state, node, "x")?.into_int_value();
            let zero = int_ty.const_int(0, false);
            state.builder.build_int_compare(IntPredicate::EQ, x, zero, "eqz").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "shl" => {
            let x = operand(state, node, "x")?.into_int_value();
            let amount = masked_shift_amount(state, node, int_ty)?;
            state.builder.build_left_shift(x, amount, "shl").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "shr.s" => {
            let x = operand(state, node, "x")?.into_int_value();
            let amount = masked_shift_amount(state, node, int_ty)?;
            state.builder.build_right_shift(x, amount, true, "shr_s").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "shr.u" => {
            let x = operand(state, node, "x")?.into_int_value();
            let amount = masked_shift_amount(state, node, int_ty)?;
            state.builder.build_right_shift(x, amount, false, "shr_u").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "rotl" => {
            let x = operand(state, node, "x")?.into_int_value();
            let amount = masked_shift_amount(state, node, int_ty)?;
            build_funnel_shift(state, x, amount, true)?.into()
        }
        "rotr" => {
            let x = operand(state, node, "x")?.into_int_value();
            let amount = masked_shift_amount(state, node, int_ty)?;
            build_funnel_shift(state, x, amount, false)?.into()
        }
        "clz" => build_bit_intrinsic(state, node, int_ty, "llvm.ctlz")?.into(),
        "ctz" => build_bit_intrinsic(state, node, int_ty, "llvm.cttz")?.into(),
        "popc" => build_popcount(state, node, int_ty)?.into(),
        "min.s" => build_minmax_int(state, node, IntPredicate::SLT)?.into(),
        "max.s" => build_minmax_int(state, node, IntPredicate::SGT)?.into(),
        "min.u" => build_minmax_int(state, node, IntPredicate::ULT)?.into(),
        "max.u" => build_minmax_int(state, node, IntPredicate::UGT)?.into(),
        "cmp.eq" => build_icmp(state, node, IntPredicate::EQ)?.into(),
        "cmp.ne" => build_icmp(state, node, IntPredicate::NE)?.into(),
        "cmp.slt" => build_icmp(state, node, IntPredicate::SLT)?.into(),
        "cmp.sle" => build_icmp(state, node, IntPredicate::SLE)?.into(),
        "cmp.sgt" => build_icmp(state, node, IntPredicate::SGT)?.into(),
        "cmp.sge" => build_icmp(state, node, IntPredicate::SGE)?.into(),
        "cmp.ult" => build_icmp(state, node, IntPredicate::ULT)?.into(),
        "cmp.ule" => build_icmp(state, node, IntPredicate::ULE)?.into(),
        "cmp.ugt" => build_icmp(state, node, IntPredicate::UGT)?.into(),
        "cmp.uge" => build_icmp(state, node, IntPredicate::UGE)?.into(),
        "div.s.trap" => build_div_trap(state, node, true, false)?.into(),
        "div.u.trap" => build_div_trap(state, node, false, false)?.into(),
        "rem.s.trap" => build_div_trap(state, node, true, true)?.into(),
        "rem.u.trap" => build_div_trap(state, node, false, true)?.into(),
        "div.s.sat" => build_div_sat(state, node, int_ty, true, false)?.into(),
        "div.u.sat" => build_div_sat(state, node, int_ty, false, false)?.into(),
        "rem.s.sat" => build_div_sat(state, node, int_ty, true, true)?.into(),
        "rem.u.sat" => build_div_sat(state, node, int_ty, false, true)?.into(),
        other if other.starts_with("trunc_sat_f32.") || other.starts_with("trunc_sat_f64.") => {
            let signed = other.ends_with(".s");
            let is32 = other.starts_with("trunc_sat_f32");
            build_trunc_sat(state, node, int_ty, width, is32, signed)?.into()
        }
        other if other.starts_with("zext.i") => build_zext(state, node, int_ty)?.into(),
        other if other.starts_with("sext.i") => build_sext(state, node, int_ty)?.into(),
        other if other.starts_with("trunc.i") => build_trunc(state, node, int_ty)?.into(),
        _ => return Err(CodegenError::UnsupportedOp(tag.to_string())),
    })
}

fn masked_shift_amount<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    int_ty: inkwell::types::IntType<'ctx>,
) -> Result<IntValue<'ctx>, CodegenError> {
    let amount = operand(state, node, "amount")?.into_int_value();
    let amount = if amount.get_type() != int_ty {
        state
            .builder
            .build_int_cast(amount, int_ty, "shift_amount_cast")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?
    } else {
        amount
    };
    let mask = int_ty.const_int((int_ty.get_bit_width() as u64) - 1, false);
    state
        .builder
        .build_and(amount, mask, "shift_amount_masked")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))
}

fn build_funnel_shift<'ctx>(
    state: &mut FnState<'ctx, '_>,
    x: IntValue<'ctx>,
    amount: IntValue<'ctx>,
    left: bool,
) -> Result<IntValue<'ctx>, CodegenError> {
    let intrinsic_name = if left { "llvm.fshl" } else { "llvm.fshr" };
    let ty = x.get_type();
    let fn_ty = ty.fn_type(&[ty.into(), ty.into(), ty.into()], false);
    let mangled = format!("{}.i{}", intrinsic_name, ty.get_bit_width());
    let f = state
        .module
        .get_function(&mangled)
        .unwrap_or_else(|| state.module.add_function(&mangled, fn_ty, None));
    let call = state
        .builder
        .build_call(f, &[x.into(), x.into(), amount.into()], "funnel")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(call
        .try_as_basic_value()
        .left()
        .ok_or_else(|| CodegenError::LlvmError("funnel shift produced no value".to_string()))?
        .into_int_value())
}

fn build_bit_intrinsic<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    int_ty: inkwell::types::IntType<'ctx>,
    name: &str,
) -> Result<IntValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_int_value();
    let mangled = format!("{}.i{}", name, int_ty.get_bit_width());
    let fn_ty = int_ty.fn_type(&[int_ty.into(), state.context.bool_type().into()], false);
    let f = state
        .module
        .get_function(&mangled)
        .unwrap_or_else(|| state.module.add_function(&mangled, fn_ty, None));
    let is_zero_undef = state.context.bool_type().const_int(0, false);
    let call = state
        .builder
        .build_call(f, &[x.into(), is_zero_undef.into()], "bitop")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(call
        .try_as_basic_value()
        .left()
        .ok_or_else(|| CodegenError::LlvmError("bit intrinsic produced no value".to_string()))?
        .into_int_value())
}

fn build_popcount<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    int_ty: inkwell::types::IntType<'ctx>,
) -> Result<IntValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_int_value();
    let mangled = format!("llvm.ctpop.i{}", int_ty.get_bit_width());
    let fn_ty = int_ty.fn_type(&[int_ty.into()], false);
    let f = state
        .module
        .get_function(&mangled)
        .unwrap_or_else(|| state.module.add_function(&mangled, fn_ty, None));
    let call = state
        .builder
        .build_call(f, &[x.into()], "popc")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(call
        .try_as_basic_value()
        .left()
        .ok_or_else(|| CodegenError::LlvmError("popcount produced no value".to_string()))?
        .into_int_value())
}

fn build_minmax_int<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    pred: IntPredicate,
) -> Result<IntValue<'ctx>, CodegenError> {
    let a = operand(state, node, "a")?.into_int_value();
    let b = operand(state, node, "b")?.into_int_value();
    let cond = state
        .builder
        .build_int_compare(pred, a, b, "minmax_cmp")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(state
        .builder
        .build_select(cond, a, b, "minmax")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?
        .into_int_value())
}

fn build_icmp<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    pred: IntPredicate,
) -> Result<IntValue<'ctx>, CodegenError> {
    let a = operand(state, node, "a")?.into_int_value();
    let b = operand(state, node, "b")?.into_int_value();
    state
        .builder
        .build_int_compare(pred, a, b, "icmp")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))
}

/// Trapping division/remainder: traps on `b==0`, and signed `div`
/// additionally traps on `INT_MIN / -1` (`§4.G` "Division/remainder").
fn build_div_trap<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    signed: bool,
    rem: bool,
) -> Result<IntValue<'ctx>, CodegenError> {
    let a = operand(state, node, "a")?.into_int_value();
    let b = operand(state, node, "b")?.into_int_value();
    let int_ty = a.get_type();
    let zero = int_ty.const_int(0, false);
    let nonzero = state
        .builder
        .build_int_compare(IntPredicate::NE, b, zero, "div_nonzero")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    emit_trap_unless(state, nonzero, node.id)?;

    if signed && !rem {
        let min = int_ty.const_int(1u64 << (int_ty.get_bit_width() - 1), false);
        let neg_one = int_ty.const_all_ones();
        let is_min = state.builder.build_int_compare(IntPredicate::EQ, a, min, "is_min").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        let is_neg_one = state.builder.build_int_compare(IntPredicate::EQ, b, neg_one, "is_neg_one").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        let overflow = state.builder.build_and(is_min, is_neg_one, "div_overflow").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        let not_overflow = state.builder.build_not(overflow, "not_overflow").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        emit_trap_unless(state, not_overflow, node.id)?;
    }

    match (signed, rem) {
        (true, false) => state.builder.build_int_signed_div(a, b, "sdiv"),
        (false, false) => state.builder.build_int_unsigned_div(a, b, "udiv"),
        (true, true) => state.builder.build_int_signed_rem(a, b, "srem"),
        (false, true) => state.builder.build_int_unsigned_rem(a, b, "urem"),
    }
    .map_err(|e| CodegenError::LlvmError(e.to_string()))
}

/// Saturating division/remainder (`§4.G`): `0` on `b==0`, `INT_MAX`
/// additionally for the signed-div overflow case, otherwise the normal op.
fn build_div_sat<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    int_ty: inkwell::types::IntType<'ctx>,
    signed: bool,
    rem: bool,
) -> Result<IntValue<'ctx>, CodegenError> {
    let a = operand(state, node, "a")?.into_int_value();
    let b = operand(state, node, "b")?.into_int_value();
    let zero = int_ty.const_int(0, false);
    let is_zero = state.builder.build_int_compare(IntPredicate::EQ, b, zero, "b_is_zero").map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    let safe_b = state
        .builder
        .build_select(is_zero, int_ty.const_int(1, false), b, "safe_b")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?
        .into_int_value();

    let raw = match (signed, rem) {
        (true, false) => state.builder.build_int_signed_div(a, safe_b, "sdiv"),
        (false, false) => state.builder.build_int_unsigned_div(a, safe_b, "udiv"),
        (true, true) => state.builder.build_int_signed_rem(a, safe_b, "srem"),
        (false, true) => state.builder.build_int_unsigned_rem(a, safe_b, "urem"),
    }
    .map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    let zero_result = state
        .builder
        .build_select(is_zero, zero, raw, "div_sat_zero")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?
        .into_int_value();

    if signed && !rem {
        let min = int_ty.const_int(1u64 << (int_ty.get_bit_width() - 1), false);
        let neg_one = int_ty.const_all_ones();
        let is_min = state.builder.build_int_compare(IntPredicate::EQ, a, min, "is_min").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        let is_neg_one = state.builder.build_int_compare(IntPredicate::EQ, b, neg_one, "is_neg_one").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        let overflow = state.builder.build_and(is_min, is_neg_one, "div_overflow").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
        let max = int_ty.const_int((1u64 << (int_ty.get_bit_width() - 1)) - 1, false);
        return Ok(state
            .builder
            .build_select(overflow, max, zero_result, "div_sat_overflow")
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?
            .into_int_value());
    }
    Ok(zero_result)
}

/// Saturating float-to-int truncation, lowered as a diamond feeding a
/// chain of selects (`§4.G`): NaN -> 0, below `INT_MIN`/0 -> that bound,
/// at/above `INT_MAX`/`UINT_MAX` -> that bound, else a normal truncating
/// convert.
fn build_trunc_sat<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    int_ty: inkwell::types::IntType<'ctx>,
    width: u32,
    is32: bool,
    signed: bool,
) -> Result<IntValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_float_value();
    let float_ty = if is32 { state.context.f32_type() } else { state.context.f64_type() };

    let (min_val, max_val) = if signed {
        (-(2f64.powi(width as i32 - 1)), 2f64.powi(width as i32 - 1) - 1.0)
    } else {
        (0.0, 2f64.powi(width as i32) - 1.0)
    };
    let min_const = float_ty.const_float(min_val);
    let max_const = float_ty.const_float(max_val);

    let is_nan = state.builder.build_float_compare(FloatPredicate::UNO, x, x, "is_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    let below_min = state.builder.build_float_compare(FloatPredicate::OLE, x, min_const, "below_min").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    let above_max = state.builder.build_float_compare(FloatPredicate::OGE, x, max_const, "above_max").map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    let min_int = bound_const(int_ty, width, signed, true);
    let max_int = bound_const(int_ty, width, signed, false);

    let normal = if signed {
        state.builder.build_float_to_signed_int(x, int_ty, "fptosi")
    } else {
        state.builder.build_float_to_unsigned_int(x, int_ty, "fptoui")
    }
    .map_err(|e| CodegenError::LlvmError(e.to_string()))?;

    let sel1 = state.builder.build_select(above_max, max_int, normal, "sat_above").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into_int_value();
    let sel2 = state.builder.build_select(below_min, min_int, sel1, "sat_below").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into_int_value();
    let sel3 = state.builder.build_select(is_nan, int_ty.const_int(0, false), sel2, "sat_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(sel3.into_int_value())
}

fn bound_const<'ctx>(int_ty: inkwell::types::IntType<'ctx>, width: u32, signed: bool, is_min: bool) -> IntValue<'ctx> {
    if !signed {
        return if is_min { int_ty.const_int(0, false) } else { int_ty.const_all_ones() };
    }
    if is_min {
        int_ty.const_int(1u64 << (width - 1), true)
    } else {
        int_ty.const_int((1u64 << (width - 1)) - 1, false)
    }
}

fn build_zext<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord, int_ty: inkwell::types::IntType<'ctx>) -> Result<IntValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_int_value();
    state.builder.build_int_z_extend(x, int_ty, "zext").map_err(|e| CodegenError::LlvmError(e.to_string()))
}

fn build_sext<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord, int_ty: inkwell::types::IntType<'ctx>) -> Result<IntValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_int_value();
    state.builder.build_int_s_extend(x, int_ty, "sext").map_err(|e| CodegenError::LlvmError(e.to_string()))
}

fn build_trunc<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord, int_ty: inkwell::types::IntType<'ctx>) -> Result<IntValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_int_value();
    state.builder.build_int_truncate(x, int_ty, "trunc").map_err(|e| CodegenError::LlvmError(e.to_string()))
}

fn lower_float_op<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let is32 = tag.starts_with("f32.");
    let op = tag.splitn(2, '.').nth(1).unwrap_or("");
    let float_ty = if is32 { state.context.f32_type() } else { state.context.f64_type() };

    match op {
        "add" | "sub" | "mul" | "div" => {
            let a = operand(state, node, "a")?.into_float_value();
            let b = operand(state, node, "b")?.into_float_value();
            let raw = match op {
                "add" => state.builder.build_float_add(a, b, "fadd"),
                "sub" => state.builder.build_float_sub(a, b, "fsub"),
                "mul" => state.builder.build_float_mul(a, b, "fmul"),
                _ => state.builder.build_float_div(a, b, "fdiv"),
            }
            .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let is_nan = state.builder.build_float_compare(FloatPredicate::UNO, raw, raw, "result_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            Ok(canonicalize_nan(state, raw, is_nan, is32)?.into())
        }
        "neg" => {
            let x = operand(state, node, "x")?.into_float_value();
            Ok(state.builder.build_float_neg(x, "fneg").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into())
        }
        "abs" => Ok(build_float_intrinsic(state, node, "llvm.fabs", float_ty)?.into()),
        "sqrt" => {
            let raw = build_float_intrinsic(state, node, "llvm.sqrt", float_ty)?;
            let is_nan = state.builder.build_float_compare(FloatPredicate::UNO, raw, raw, "sqrt_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            Ok(canonicalize_nan(state, raw, is_nan, is32)?.into())
        }
        "min" | "max" => {
            let a = operand(state, node, "a")?.into_float_value();
            let b = operand(state, node, "b")?.into_float_value();
            let a_nan = state.builder.build_float_compare(FloatPredicate::UNO, a, a, "a_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let b_nan = state.builder.build_float_compare(FloatPredicate::UNO, b, b, "b_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let any_nan = state.builder.build_or(a_nan, b_nan, "any_nan").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let pred = if op == "min" { FloatPredicate::OLT } else { FloatPredicate::OGT };
            let cmp = state.builder.build_float_compare(pred, a, b, "minmax_cmp").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let sel = state.builder.build_select(cmp, a, b, "minmax_sel").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into_float_value();
            Ok(canonicalize_nan(state, sel, any_nan, is32)?.into())
        }
        "cmp.oeq" => build_fcmp(state, node, FloatPredicate::OEQ).map(Into::into),
        "cmp.one" => build_fcmp(state, node, FloatPredicate::ONE).map(Into::into),
        "cmp.olt" => build_fcmp(state, node, FloatPredicate::OLT).map(Into::into),
        "cmp.ole" => build_fcmp(state, node, FloatPredicate::OLE).map(Into::into),
        "cmp.ogt" => build_fcmp(state, node, FloatPredicate::OGT).map(Into::into),
        "cmp.oge" => build_fcmp(state, node, FloatPredicate::OGE).map(Into::into),
        "cmp.ueq" => build_fcmp(state, node, FloatPredicate::UEQ).map(Into::into),
        "cmp.une" => build_fcmp(state, node, FloatPredicate::UNE).map(Into::into),
        "cmp.ult" => build_fcmp(state, node, FloatPredicate::ULT).map(Into::into),
        "cmp.ule" => build_fcmp(state, node, FloatPredicate::ULE).map(Into::into),
        "cmp.ugt" => build_fcmp(state, node, FloatPredicate::UGT).map(Into::into),
        "cmp.uge" => build_fcmp(state, node, FloatPredicate::UGE).map(Into::into),
        other if other.starts_with("from_i") => {
            let x = operand(state, node, "x")?.into_int_value();
            let signed = other.ends_with(".s");
            if signed {
                Ok(state.builder.build_signed_int_to_float(x, float_ty, "sitofp").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into())
            } else {
                Ok(state.builder.build_unsigned_int_to_float(x, float_ty, "uitofp").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into())
            }
        }
        _ => Err(CodegenError::UnsupportedOp(tag.to_string())),
    }
}

fn build_float_intrinsic<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    name: &str,
    float_ty: inkwell::types::FloatType<'ctx>,
) -> Result<inkwell::values::FloatValue<'ctx>, CodegenError> {
    let x = operand(state, node, "x")?.into_float_value();
    let suffix = if float_ty == state.context.f32_type() { "f32" } else { "f64" };
    let mangled = format!("{}.{}", name, suffix);
    let fn_ty = float_ty.fn_type(&[float_ty.into()], false);
    let f = state
        .module
        .get_function(&mangled)
        .unwrap_or_else(|| state.module.add_function(&mangled, fn_ty, None));
    let call = state
        .builder
        .build_call(f, &[x.into()], "fintrinsic")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(call
        .try_as_basic_value()
        .left()
        .ok_or_else(|| CodegenError::LlvmError("float intrinsic produced no value".to_string()))?
        .into_float_value())
}

fn build_fcmp<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    pred: FloatPredicate,
) -> Result<IntValue<'ctx>, CodegenError> {
    let a = operand(state, node, "a")?.into_float_value();
    let b = operand(state, node, "b")?.into_float_value();
    state
        .builder
        .build_float_compare(pred, a, b, "fcmp")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))
}

/// Replaces `v` with the canonical quiet NaN for its width when `is_nan`
/// holds (`§4.G`: `0x7FC00000` for f32, `0x7FF8000000000000` for f64).
fn canonicalize_nan<'ctx>(
    state: &mut FnState<'ctx, '_>,
    v: inkwell::values::FloatValue<'ctx>,
    is_nan: IntValue<'ctx>,
    is32: bool,
) -> Result<inkwell::values::FloatValue<'ctx>, CodegenError> {
    let qnan = if is32 {
        state.context.f32_type().const_float(f32::from_bits(0x7FC0_0000) as f64)
    } else {
        state.context.f64_type().const_float(f64::from_bits(0x7FF8_0000_0000_0000))
    };
    Ok(state
        .builder
        .build_select(is_nan, qnan, v, "nan_canon")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?
        .into_float_value())
}

fn lower_bool_op<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    op: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    Ok(match op {
        "not" => {
            let x = operand(state, node, "x")?.into_int_value();
            state.builder.build_not(x, "bnot").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "and" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_and(a, b, "band").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "or" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_or(a, b, "bor").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "xor" => {
            let a = operand(state, node, "a")?.into_int_value();
            let b = operand(state, node, "b")?.into_int_value();
            state.builder.build_xor(a, b, "bxor").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        _ => return Err(CodegenError::UnsupportedOp(format!("bool.{op}"))),
    })
}

fn lower_ptr_op<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let ctx = state.context;
    let ptr_ty = ctx.ptr_type(AddressSpace::default());
    let int_ty = ctx.custom_width_int_type((state.ptr_layout.size * 8) as u32);

    Ok(match tag {
        "ptr.sym" => {
            let name = node
                .field_str("name")
                .ok_or_else(|| CodegenError::InvalidSir(format!("ptr.sym {} missing name", node.id.0)))?;
            let ptr = state
                .module
                .get_function(name)
                .map(|f| f.as_global_value().as_pointer_value())
                .or_else(|| state.module.get_global(name).map(|g| g.as_pointer_value()))
                .ok_or_else(|| CodegenError::InvalidSir(format!("ptr.sym {} unresolved global {}", node.id.0, name)))?;
            ptr.into()
        }
        "ptr.add" | "ptr.sub" => {
            let base = operand(state, node, "a")?.into_pointer_value();
            let offset = operand(state, node, "b")?.into_int_value();
            let offset = widen_to(state, offset, int_ty)?;
            let offset = if tag == "ptr.sub" {
                state.builder.build_int_neg(offset, "neg_offset").map_err(|e| CodegenError::LlvmError(e.to_string()))?
            } else {
                offset
            };
            unsafe {
                state
                    .builder
                    .build_gep(ctx.i8_type(), base, &[offset], "ptr_addsub")
                    .map_err(|e| CodegenError::LlvmError(e.to_string()))?
            }
            .into()
        }
        "ptr.offset" => {
            let base = operand(state, node, "base")?.into_pointer_value();
            let index = operand(state, node, "index")?.into_int_value();
            let index = widen_to(state, index, int_ty)?;
            let ty = node
                .field_ref("ty")
                .ok_or_else(|| CodegenError::InvalidSir(format!("ptr.offset {} missing ty", node.id.0)))?
                .as_type_id();
            let llvm_ty = sir_type_to_llvm(ctx, ty, &state.tables.types)?;
            unsafe {
                state
                    .builder
                    .build_gep(llvm_ty, base, &[index], "ptr_offset")
                    .map_err(|e| CodegenError::LlvmError(e.to_string()))?
            }
            .into()
        }
        "ptr.to_i64" => {
            let p = operand(state, node, "value")?.into_pointer_value();
            state.builder.build_ptr_to_int(p, ctx.i64_type(), "ptr_to_i64").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "ptr.from_i64" => {
            let v = operand(state, node, "value")?.into_int_value();
            state.builder.build_int_to_ptr(v, ptr_ty, "i64_to_ptr").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "ptr.cmp.eq" | "ptr.cmp.ne" => {
            let a = operand(state, node, "a")?.into_pointer_value();
            let b = operand(state, node, "b")?.into_pointer_value();
            let a_int = state.builder.build_ptr_to_int(a, ctx.i64_type(), "a_int").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let b_int = state.builder.build_ptr_to_int(b, ctx.i64_type(), "b_int").map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let pred = if tag == "ptr.cmp.eq" { IntPredicate::EQ } else { IntPredicate::NE };
            state.builder.build_int_compare(pred, a_int, b_int, "ptr_cmp").map_err(|e| CodegenError::LlvmError(e.to_string()))?.into()
        }
        "ptr.sizeof" | "ptr.alignof" => {
            let ty = node
                .field_ref("ty")
                .ok_or_else(|| CodegenError::InvalidSir(format!("{} {} missing ty", tag, node.id.0)))?
                .as_type_id();
            let mut visiting = Vec::new();
            let mut bus = sircc_core::DiagnosticBus::new();
            let layout = sircc_core::layout_of(&state.tables.types, ty, state.ptr_layout, &mut bus, &mut visiting)
                .ok_or_else(|| CodegenError::InvalidSir(format!("{} {} has no layout", tag, node.id.0)))?;
            let value = if tag == "ptr.sizeof" { layout.size } else { layout.align };
            ctx.i64_type().const_int(value, false).into()
        }
        _ => return Err(CodegenError::UnsupportedOp(tag.to_string())),
    })
}

fn widen_to<'ctx>(
    state: &mut FnState<'ctx, '_>,
    v: IntValue<'ctx>,
    ty: inkwell::types::IntType<'ctx>,
) -> Result<IntValue<'ctx>, CodegenError> {
    if v.get_type() == ty {
        return Ok(v);
    }
    state
        .builder
        .build_int_s_extend_or_bit_cast(v, ty, "widen")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))
}

fn lower_vec_op<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    tag: &str,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    match tag {
        "vec.splat" => {
            let x = operand(state, node, "x")?;
            let vec_ty = node
                .type_ref
                .ok_or_else(|| CodegenError::InvalidSir(format!("vec.splat {} has no type_ref", node.id.0)))?;
            let llvm_ty = sir_type_to_llvm(state.context, vec_ty, &state.tables.types)?;
            let vector_ty = llvm_ty.into_vector_type();
            let undef = vector_ty.get_undef();
            let zero = state.context.i32_type().const_int(0, false);
            let inserted = state
                .builder
                .build_insert_element(undef, x, zero, "splat_insert")
                .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            let mask = vector_ty.const_zero();
            Ok(state
                .builder
                .build_shuffle_vector(inserted, vector_ty.get_undef(), mask.into(), "splat")
                .map_err(|e| CodegenError::LlvmError(e.to_string()))?
                .into())
        }
        "vec.extract" => {
            let v = operand(state, node, "x")?.into_vector_value();
            let index = operand(state, node, "index")?.into_int_value();
            state
                .builder
                .build_extract_element(v, index, "extract")
                .map_err(|e| CodegenError::LlvmError(e.to_string()))
        }
        "vec.replace" => {
            let v = operand(state, node, "x")?.into_vector_value();
            let index = operand(state, node, "index")?.into_int_value();
            let value = operand(state, node, "value")?;
            Ok(state
                .builder
                .build_insert_element(v, value, index, "replace")
                .map_err(|e| CodegenError::LlvmError(e.to_string()))?
                .into())
        }
        "vec.bitcast" => {
            let v = operand(state, node, "x")?;
            let to_ty = node
                .type_ref
                .ok_or_else(|| CodegenError::InvalidSir(format!("vec.bitcast {} has no type_ref", node.id.0)))?;
            let llvm_ty = sir_type_to_llvm(state.context, to_ty, &state.tables.types)?;
            state
                .builder
                .build_bit_cast(v, llvm_ty, "vec_bitcast")
                .map_err(|e| CodegenError::LlvmError(e.to_string()))
        }
        _ => Err(CodegenError::UnsupportedOp(tag.to_string())),
    }
}

fn lower_call<'ctx>(state: &mut FnState<'ctx, '_>, node: &NodeRecord) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    let callee_id = node
        .field_ref("callee")
        .ok_or_else(|| CodegenError::InvalidSir(format!("call {} missing callee", node.id.0)))?
        .as_node_id();
    let callee_fn = declare_function(state.context, state.module, state.tables, callee_id)?;
    let args: Vec<BasicValueEnum> = node
        .field_refs("args")
        .iter()
        .map(|r| lower_expr(state, r.as_node_id()))
        .collect::<Result<_, _>>()?;
    let args_meta: Vec<inkwell::values::BasicMetadataValueEnum> = args.into_iter().map(Into::into).collect();
    let call = state
        .builder
        .build_call(callee_fn, &args_meta, "call")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    call.try_as_basic_value()
        .left()
        .ok_or_else(|| CodegenError::InvalidSir(format!("call {} to void function used as a value", node.id.0)))
}

// ---------------------------------------------------------------------------
// Statements and terminators
// ---------------------------------------------------------------------------

fn lower_stmt(state: &mut FnState<'_, '_>, id: NodeId) -> Result<(), CodegenError> {
    let node = get_node(state.tables, id)?.clone();
    let tag = normalize_tag(&node.tag).to_string();
    match tag.as_str() {
        t if t.starts_with("store.") => lower_store(state, &node, t),
        "mem.fill" => lower_mem_fill(state, &node),
        "mem.copy" => lower_mem_copy(state, &node),
        _ => {
            lower_expr(state, id)?;
            Ok(())
        }
    }
}

fn lower_mem_fill(state: &mut FnState<'_, '_>, node: &NodeRecord) -> Result<(), CodegenError> {
    let dst = operand(state, node, "dst")?.into_pointer_value();
    let byte = operand(state, node, "byte")?.into_int_value();
    let byte8 = state
        .builder
        .build_int_truncate(byte, state.context.i8_type(), "fill_byte")
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    let len = operand(state, node, "len")?.into_int_value();
    let len64 = widen_to(state, len, state.context.i64_type())?;
    state
        .builder
        .build_memset(dst, 1, byte8, len64)
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(())
}

fn lower_mem_copy(state: &mut FnState<'_, '_>, node: &NodeRecord) -> Result<(), CodegenError> {
    let dst = operand(state, node, "dst")?.into_pointer_value();
    let src = operand(state, node, "src")?.into_pointer_value();
    let len = operand(state, node, "len")?.into_int_value();
    let len64 = widen_to(state, len, state.context.i64_type())?;
    state
        .builder
        .build_memcpy(dst, 1, src, 1, len64)
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(())
}

fn lower_terminator(state: &mut FnState<'_, '_>, block_id: NodeId, term_id: NodeId) -> Result<(), CodegenError> {
    let node = get_node(state.tables, term_id)?.clone();
    match normalize_tag(&node.tag) {
        "term.br" => {
            let to = node
                .field_ref("to")
                .ok_or_else(|| CodegenError::InvalidSir(format!("term.br {} missing to", term_id.0)))?
                .as_node_id();
            let args: Vec<BasicValueEnum> = node
                .field_refs("args")
                .iter()
                .map(|r| lower_expr(state, r.as_node_id()))
                .collect::<Result<_, _>>()?;
            feed_phis(state, to, block_id, &args)?;
            let dest = state.blocks[&to];
            state.builder.build_unconditional_branch(dest).map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            Ok(())
        }
        "term.cbr" => {
            let cond = operand(state, &node, "cond")?.into_int_value();
            let (then_to, then_args) = lower_branch_target(state, &node, "then")?;
            feed_phis(state, then_to, block_id, &then_args)?;
            let then_bb = state.blocks[&then_to];
            let (else_to, else_args) = lower_branch_target(state, &node, "else")?;
            feed_phis(state, else_to, block_id, &else_args)?;
            let else_bb = state.blocks[&else_to];
            state
                .builder
                .build_conditional_branch(cond, then_bb, else_bb)
                .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
            Ok(())
        }
        "term.switch" => lower_switch(state, block_id, &node),
        "term.ret" | "return" => {
            match node.field_ref("value") {
                Some(r) => {
                    let v = lower_expr(state, r.as_node_id())?;
                    state.builder.build_return(Some(&v)).map_err(|e| CodegenError::LlvmError(e.to_string()))?;
                }
                None => {
                    state.builder.build_return(None).map_err(|e| CodegenError::LlvmError(e.to_string()))?;
                }
            }
            Ok(())
        }
        other => Err(CodegenError::UnsupportedOp(other.to_string())),
    }
}

fn lower_branch_target<'ctx>(
    state: &mut FnState<'ctx, '_>,
    node: &NodeRecord,
    key: &str,
) -> Result<(NodeId, Vec<BasicValueEnum<'ctx>>), CodegenError> {
    let branch = node
        .field(key)
        .ok_or_else(|| CodegenError::InvalidSir(format!("term.cbr {} missing {}", node.id.0, key)))?
        .clone();
    let to = branch
        .get("to")
        .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
        .ok_or_else(|| CodegenError::InvalidSir(format!("term.cbr {} {} missing to", node.id.0, key)))?
        .as_node_id();
    let arg_refs: Vec<Ref> = branch
        .get("args")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
        .unwrap_or_default();
    let args = arg_refs
        .iter()
        .map(|r| lower_expr(state, r.as_node_id()))
        .collect::<Result<_, _>>()?;
    Ok((to, args))
}

fn lower_switch(state: &mut FnState<'_, '_>, block_id: NodeId, node: &NodeRecord) -> Result<(), CodegenError> {
    let scrut = operand(state, node, "scrut")?.into_int_value();

    let default_obj = node
        .field("default")
        .ok_or_else(|| CodegenError::InvalidSir(format!("term.switch {} missing default", node.id.0)))?
        .clone();
    let default_to = default_obj
        .get("to")
        .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
        .ok_or_else(|| CodegenError::InvalidSir(format!("term.switch {} default missing to", node.id.0)))?
        .as_node_id();
    let default_args: Vec<Ref> = default_obj
        .get("args")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
        .unwrap_or_default();
    let default_args_v = default_args
        .iter()
        .map(|r| lower_expr(state, r.as_node_id()))
        .collect::<Result<Vec<_>, _>>()?;
    feed_phis(state, default_to, block_id, &default_args_v)?;
    let default_bb = state.blocks[&default_to];

    let cases = node.field("cases").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let mut llvm_cases = Vec::new();
    for case in &cases {
        let lit_ref = case
            .get("lit")
            .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
            .ok_or_else(|| CodegenError::InvalidSir(format!("term.switch {} case missing lit", node.id.0)))?;
        let lit_val = lower_expr(state, lit_ref.as_node_id())?.into_int_value();
        let to = case
            .get("to")
            .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
            .ok_or_else(|| CodegenError::InvalidSir(format!("term.switch {} case missing to", node.id.0)))?
            .as_node_id();
        let case_args: Vec<Ref> = case
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
            .unwrap_or_default();
        let case_args_v = case_args
            .iter()
            .map(|r| lower_expr(state, r.as_node_id()))
            .collect::<Result<Vec<_>, _>>()?;
        feed_phis(state, to, block_id, &case_args_v)?;
        llvm_cases.push((lit_val, state.blocks[&to]));
    }

    state
        .builder
        .build_switch(scrut, default_bb, &llvm_cases)
        .map_err(|e| CodegenError::LlvmError(e.to_string()))?;
    Ok(())
}

/// Adds `(value, block_id)` as an incoming edge to every phi of `to`'s
/// block params, in declared order.
fn feed_phis(
    state: &mut FnState<'_, '_>,
    to: NodeId,
    from_block: NodeId,
    args: &[BasicValueEnum<'_>],
) -> Result<(), CodegenError> {
    let to_node = get_node(state.tables, to)?.clone();
    let params = to_node.field_refs("params");
    if params.len() != args.len() {
        return Err(CodegenError::InvalidSir(format!(
            "branch to block {} supplied {} args for {} params",
            to.0,
            args.len(),
            params.len()
        )));
    }
    let from_bb = state.blocks[&from_block];
    for (param, arg) in params.iter().zip(args.iter()) {
        let pid = param.as_node_id();
        if let Some(phi) = state.phis.get(&pid) {
            phi.add_incoming(&[(arg as &dyn BasicValue, from_bb)]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    fn add_fn_tables() -> ProgramTables {
        build_program_tables(
            &[
                r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
                r#"{"ir":"sir-v1.0","k":"type","id":100,"kind":"fn","params":[3,3],"ret":3,"varargs":false}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"bparam","type_ref":3}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"bparam","type_ref":3}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"i32.add","fields":{"a":{"ref":0},"b":{"ref":1}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"return","fields":{"value":{"ref":2}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"block","fields":{"params":[{"ref":0},{"ref":1}],"stmts":[2,3]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"fn","type_ref":100,"fields":{"name":"add","entry":{"ref":4},"blocks":[4]}}"#,
            ]
            .join("\n"),
        )
        .unwrap()
    }

    #[test]
    fn compiles_a_single_block_add_function() {
        let tables = add_fn_tables();
        let context = Context::create();
        let module = context.create_module("test");
        let builder = context.create_builder();
        let func = compile_function(&context, &module, &builder, &tables, NodeId(5)).unwrap();
        assert_eq!(func.get_name().to_str().unwrap(), "add");
        assert_eq!(func.count_params(), 2);
    }

    #[test]
    fn block_successors_follow_term_br() {
        let tables = add_fn_tables();
        let block = tables.node(NodeId(4)).unwrap();
        let succs = block_successors(&tables, block).unwrap();
        assert!(succs.is_empty(), "return has no CFG successors");
    }
}
