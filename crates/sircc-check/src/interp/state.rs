//! CFG-walking state machine for the semantic evaluator.
//!
//! SIR's block-structured CFG form (`§3` "Functions") makes evaluation a
//! straight walk rather than a readiness work-list: a function is a fixed
//! sequence of blocks, each block a fixed statement list ending in one
//! terminator. The state lifecycle is
//! `Ready -> Running -> (Paused | Completed | Error)`, with a call-frame
//! stack for nested calls and optional step tracing.

use std::collections::HashMap;

use sircc_core::node::{is_terminator_tag, normalize_tag, requires_sem, Ref};
use sircc_core::{layout_of, Layout, NodeId, NodeRecord, ProgramTables};

use super::error::RuntimeError;
use super::eval;
use super::trace::{Recorder, TraceEntry, ValueSnapshot};
use super::value::Value;

/// Execution state of the interpreter state machine.
#[derive(Debug)]
pub enum ExecutionState {
    Ready,
    Running,
    Paused { last_node: NodeId },
    Completed { result: Value },
    Error { error: RuntimeError },
}

/// One function activation: the block currently executing, the statement
/// index within it, and every node's memoized value within this call.
#[derive(Debug)]
pub struct CallFrame {
    pub fn_node: NodeId,
    pub block: NodeId,
    pub stmt_index: usize,
    pub values: HashMap<NodeId, Value>,
    /// Set while this frame is suspended on a `call`/`call.indirect` node
    /// awaiting the callee's return value.
    pub pending_call_node: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub trace_enabled: bool,
    pub max_recursion_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            trace_enabled: false,
            max_recursion_depth: 256,
        }
    }
}

/// Flat byte memory backing `alloca`/`load.T`/`store.T`.
#[derive(Debug, Default)]
struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    fn allocate(&mut self, len: u64) -> u64 {
        let addr = self.bytes.len() as u64;
        self.bytes.resize(self.bytes.len() + len as usize, 0);
        addr
    }

    fn write(&mut self, addr: u64, data: &[u8], node: NodeId) -> Result<(), RuntimeError> {
        let end = addr as usize + data.len();
        if end > self.bytes.len() {
            return Err(RuntimeError::MemoryOutOfBounds {
                node,
                addr,
                len: data.len() as u64,
            });
        }
        self.bytes[addr as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, addr: u64, len: u64, node: NodeId) -> Result<&[u8], RuntimeError> {
        let end = addr as usize + len as usize;
        if end > self.bytes.len() {
            return Err(RuntimeError::MemoryOutOfBounds { node, addr, len });
        }
        Ok(&self.bytes[addr as usize..end])
    }
}

pub struct Interpreter<'t> {
    tables: &'t ProgramTables,
    node_lines: &'t HashMap<NodeId, u32>,
    state: ExecutionState,
    call_stack: Vec<CallFrame>,
    memory: Memory,
    recorder: Recorder,
    config: InterpreterConfig,
    pause_requested: bool,
    ptr_layout: Layout,
}

impl<'t> Interpreter<'t> {
    pub fn new(
        tables: &'t ProgramTables,
        node_lines: &'t HashMap<NodeId, u32>,
        config: InterpreterConfig,
    ) -> Self {
        let ptr_layout = Layout {
            size: (tables.target.ptr_bits.unwrap_or(64) / 8) as u64,
            align: (tables.target.ptr_bits.unwrap_or(64) / 8) as u64,
        };
        Interpreter {
            tables,
            node_lines,
            state: ExecutionState::Ready,
            call_stack: Vec::new(),
            memory: Memory::default(),
            recorder: Recorder::new(),
            config,
            pause_requested: false,
            ptr_layout,
        }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn pause(&mut self) {
        self.pause_requested = true;
    }

    pub fn resume(&mut self) {
        if matches!(self.state, ExecutionState::Paused { .. }) {
            self.state = ExecutionState::Running;
        }
    }

    /// Starts execution of `fn_node` (a `fn` node in CFG form) with `args`
    /// bound to the entry block's parameters in order.
    pub fn start(&mut self, fn_node: NodeId, args: Vec<Value>) -> Result<(), RuntimeError> {
        let frame = self.create_call_frame(fn_node, args)?;
        self.call_stack.push(frame);
        self.state = ExecutionState::Running;
        Ok(())
    }

    pub fn run(&mut self) -> &ExecutionState {
        loop {
            self.step();
            match &self.state {
                ExecutionState::Running => continue,
                _ => return &self.state,
            }
        }
    }

    pub fn step(&mut self) -> &ExecutionState {
        match &self.state {
            ExecutionState::Running => {}
            ExecutionState::Paused { .. } => self.state = ExecutionState::Running,
            _ => return &self.state,
        }

        match self.step_inner() {
            Ok(()) => {}
            Err(error) => self.state = ExecutionState::Error { error },
        }
        &self.state
    }

    fn step_inner(&mut self) -> Result<(), RuntimeError> {
        let (block, stmt_index) = {
            let frame = self.call_stack.last().ok_or(RuntimeError::InternalError {
                message: "empty call stack".to_string(),
            })?;
            (frame.block, frame.stmt_index)
        };

        let block_node = self.node(block)?;
        let stmts = block_node.field_refs("stmts");
        let stmt_ref = stmts.get(stmt_index).copied().ok_or(RuntimeError::InternalError {
            message: format!("block {block} has no statement at index {stmt_index}"),
        })?;
        let node_id = stmt_ref.as_node_id();
        let node = self.node(node_id)?.clone();

        if let Some(line) = self.node_lines.get(&node_id).copied() {
            self.recorder.record_step(node_id, line);
        }

        if is_terminator_tag(&node.tag) {
            return self.eval_terminator(&node);
        }

        if node.tag == "call" || node.tag == "call.indirect" {
            return self.eval_call(&node, node_id);
        }

        let value = self.eval_value_node(&node)?;
        if let Some(v) = value.clone() {
            if let Some(frame) = self.call_stack.last_mut() {
                frame.values.insert(node_id, v);
            }
        }
        if self.config.trace_enabled {
            self.recorder.record_entry(TraceEntry {
                node_id,
                op_description: node.tag.clone(),
                inputs: Vec::new(),
                output: value.as_ref().map(ValueSnapshot::from),
            });
        }

        if let Some(frame) = self.call_stack.last_mut() {
            frame.stmt_index += 1;
        }

        if self.pause_requested {
            self.pause_requested = false;
            self.state = ExecutionState::Paused { last_node: node_id };
        } else {
            self.state = ExecutionState::Running;
        }
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&NodeRecord, RuntimeError> {
        self.tables.node(id).ok_or(RuntimeError::UnresolvedRef {
            node: id,
            target: id.0,
        })
    }

    fn value_of(&self, r: Ref) -> Result<Value, RuntimeError> {
        let id = r.as_node_id();
        let frame = self.call_stack.last().ok_or(RuntimeError::InternalError {
            message: "empty call stack".to_string(),
        })?;
        frame
            .values
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::UnresolvedRef { node: id, target: id.0 })
    }

    fn field_value(&self, node: &NodeRecord, key: &'static str) -> Result<Value, RuntimeError> {
        let r = node
            .field_ref(key)
            .ok_or(RuntimeError::MissingField { node: node.id, field: key })?;
        self.value_of(r)
    }

    /// Evaluates a non-terminator, non-structural node to a value, handling
    /// memory/pointer/high-level forms directly and delegating pure
    /// arithmetic/float/bool/select forms to [`eval::eval_node`].
    fn eval_value_node(&mut self, node: &NodeRecord) -> Result<Option<Value>, RuntimeError> {
        let tag = normalize_tag(&node.tag);
        match tag {
            "name" => Ok(Some(self.field_value(node, "ref")?)),
            "bparam" => {
                let frame = self.call_stack.last().ok_or(RuntimeError::InternalError {
                    message: "empty call stack".to_string(),
                })?;
                Ok(frame.values.get(&node.id).cloned())
            }
            "cstr" => {
                let s = node
                    .field_str("value")
                    .ok_or(RuntimeError::MissingField { node: node.id, field: "value" })?;
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                let addr = self.memory.allocate(bytes.len() as u64);
                self.memory.write(addr, &bytes, node.id)?;
                Ok(Some(Value::Ptr(addr)))
            }
            "ptr.sym" => Ok(Some(Value::Ptr(0))),
            "alloca" | "alloca.T" => self.eval_alloca(node).map(Some),
            "ptr.sizeof" | "ptr.alignof" => self.eval_ptr_type_query(node, tag).map(Some),
            "ptr.to_i64" => {
                let p = self.field_value(node, "value")?;
                Ok(Some(Value::I64(p.as_ptr().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "ptr".into(),
                    got: "other".into(),
                })? as i64)))
            }
            "ptr.from_i64" => {
                let v = self.field_value(node, "value")?;
                Ok(Some(Value::Ptr(v.as_i64().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "i64".into(),
                    got: "other".into(),
                })? as u64)))
            }
            "ptr.offset" => {
                let base = self.field_value(node, "base")?.as_ptr().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "ptr".into(),
                    got: "other".into(),
                })?;
                let index = self.field_value(node, "index")?.as_i64().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "int".into(),
                    got: "other".into(),
                })?;
                let ty = node
                    .field_ref("ty")
                    .ok_or(RuntimeError::MissingField { node: node.id, field: "ty" })?
                    .as_type_id();
                let mut visiting = Vec::new();
                let mut bus = sircc_core::DiagnosticBus::new();
                let layout = layout_of(&self.tables.types, ty, self.ptr_layout, &mut bus, &mut visiting)
                    .ok_or(RuntimeError::UnsupportedTag { node: node.id, tag: tag.to_string() })?;
                Ok(Value::Ptr((base as i64 + index * layout.size as i64) as u64))
            }
            "ptr.add" | "ptr.sub" => {
                let base = self.field_value(node, "a")?.as_ptr().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "ptr".into(),
                    got: "other".into(),
                })?;
                let offset = self.field_value(node, "b")?.as_i64().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "int".into(),
                    got: "other".into(),
                })?;
                let result = if tag == "ptr.add" {
                    base as i64 + offset
                } else {
                    base as i64 - offset
                };
                Ok(Some(Value::Ptr(result as u64)))
            }
            "ptr.cmp.eq" | "ptr.cmp.ne" => {
                let a = self.field_value(node, "a")?.as_ptr();
                let b = self.field_value(node, "b")?.as_ptr();
                Ok(Some(Value::Bool(if tag == "ptr.cmp.eq" { a == b } else { a != b })))
            }
            t if t.starts_with("load.") => self.eval_load(node, t).map(Some),
            t if t.starts_with("store.") => {
                self.eval_store(node, t)?;
                Ok(None)
            }
            "mem.fill" => {
                self.eval_mem_fill(node)?;
                Ok(None)
            }
            "mem.copy" => {
                self.eval_mem_copy(node)?;
                Ok(None)
            }
            t if t.starts_with("vec.") => self.eval_vec(node, t).map(Some),
            t if requires_sem(t) => self.eval_sem(node, t).map(Some),
            _ => {
                let operand = |key: &str| -> Result<Value, RuntimeError> {
                    match key {
                        "a" => self.field_value(node, "a"),
                        "b" => self.field_value(node, "b"),
                        "x" => self.field_value(node, "x"),
                        "amount" => self.field_value(node, "amount"),
                        "cond" => self.field_value(node, "cond"),
                        "t" => self.field_value(node, "t"),
                        "e" => self.field_value(node, "e"),
                        _ => Err(RuntimeError::InternalError {
                            message: format!("eval_node requested unknown operand key at node {}", node.id),
                        }),
                    }
                };
                eval::eval_node(node, operand)
            }
        }
    }

    fn eval_alloca(&mut self, node: &NodeRecord) -> Result<Value, RuntimeError> {
        let ty = node
            .field_ref("ty")
            .ok_or(RuntimeError::MissingField { node: node.id, field: "ty" })?
            .as_type_id();
        let count = node.field_i64("count").unwrap_or(1).max(1) as u64;
        let mut visiting = Vec::new();
        let mut bus = sircc_core::DiagnosticBus::new();
        let layout = layout_of(&self.tables.types, ty, self.ptr_layout, &mut bus, &mut visiting)
            .ok_or(RuntimeError::UnsupportedTag { node: node.id, tag: "alloca".into() })?;
        let total = layout.size * count;
        let addr = self.memory.allocate(total);
        if node.field_bool("zero").unwrap_or(false) {
            self.memory.write(addr, &vec![0u8; total as usize], node.id)?;
        }
        Ok(Value::Ptr(addr))
    }

    fn eval_ptr_type_query(&self, node: &NodeRecord, tag: &str) -> Result<Value, RuntimeError> {
        let ty = node
            .field_ref("ty")
            .ok_or(RuntimeError::MissingField { node: node.id, field: "ty" })?
            .as_type_id();
        let mut visiting = Vec::new();
        let mut bus = sircc_core::DiagnosticBus::new();
        let layout = layout_of(&self.tables.types, ty, self.ptr_layout, &mut bus, &mut visiting)
            .ok_or(RuntimeError::UnsupportedTag { node: node.id, tag: tag.to_string() })?;
        Ok(Value::I64(if tag == "ptr.sizeof" {
            layout.size as i64
        } else {
            layout.align as i64
        }))
    }

    /// Width encoded in a `load.iN`/`store.iN` tag suffix (reversed from
    /// arithmetic tags, where the width is the prefix: `i16.add` vs
    /// `store.i16`), falling back to the node's declared type.
    fn width_of(&self, node: &NodeRecord, tag: &str) -> u32 {
        tag.rsplit('.')
            .next()
            .and_then(|suffix| match suffix {
                "i8" => Some(8),
                "i16" => Some(16),
                "i32" => Some(32),
                "i64" => Some(64),
                _ => None,
            })
            .or_else(|| node.type_ref.map(|t| prim_width(&self.tables.types.get(t))))
            .unwrap_or(32)
    }

    fn eval_load(&mut self, node: &NodeRecord, tag: &str) -> Result<Value, RuntimeError> {
        let addr = self
            .field_value(node, "addr")?
            .as_ptr()
            .ok_or(RuntimeError::TypeMismatch { node: node.id, expected: "ptr".into(), got: "other".into() })?;
        let align = node.field_i64("align").unwrap_or(1) as u64;
        if align > 1 && addr % align != 0 {
            return Err(RuntimeError::Misaligned { node: node.id, align });
        }
        let width = self.width_of(node, tag);
        let bytes = self.memory.read(addr, (width / 8) as u64, node.id)?.to_vec();
        Ok(match width {
            8 => Value::I8(bytes[0] as i8),
            16 => Value::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            32 => Value::I32(i32::from_le_bytes(bytes.try_into().unwrap())),
            _ => Value::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
        })
    }

    fn eval_store(&mut self, node: &NodeRecord, tag: &str) -> Result<(), RuntimeError> {
        let addr = self
            .field_value(node, "addr")?
            .as_ptr()
            .ok_or(RuntimeError::TypeMismatch { node: node.id, expected: "ptr".into(), got: "other".into() })?;
        let align = node.field_i64("align").unwrap_or(1) as u64;
        if align > 1 && addr % align != 0 {
            return Err(RuntimeError::Misaligned { node: node.id, align });
        }
        let value = self.field_value(node, "value")?;
        let width = self.width_of(node, tag);
        let raw = value.as_i64().ok_or(RuntimeError::TypeMismatch { node: node.id, expected: "int".into(), got: "other".into() })?;
        let bytes: Vec<u8> = match width {
            8 => vec![raw as u8],
            16 => (raw as i16).to_le_bytes().to_vec(),
            32 => (raw as i32).to_le_bytes().to_vec(),
            _ => raw.to_le_bytes().to_vec(),
        };
        self.memory.write(addr, &bytes, node.id)
    }

    fn eval_mem_fill(&mut self, node: &NodeRecord) -> Result<(), RuntimeError> {
        let dst = self.field_value(node, "dst")?.as_ptr().ok_or(RuntimeError::TypeMismatch {
            node: node.id,
            expected: "ptr".into(),
            got: "other".into(),
        })?;
        let byte = self.field_value(node, "byte")?.as_i64().unwrap_or(0) as u8;
        let len = self.field_value(node, "len")?.as_i64().unwrap_or(0) as u64;
        self.memory.write(dst, &vec![byte; len as usize], node.id)
    }

    fn eval_mem_copy(&mut self, node: &NodeRecord) -> Result<(), RuntimeError> {
        let dst = self.field_value(node, "dst")?.as_ptr().ok_or(RuntimeError::TypeMismatch {
            node: node.id,
            expected: "ptr".into(),
            got: "other".into(),
        })?;
        let src = self.field_value(node, "src")?.as_ptr().ok_or(RuntimeError::TypeMismatch {
            node: node.id,
            expected: "ptr".into(),
            got: "other".into(),
        })?;
        let len = self.field_value(node, "len")?.as_i64().unwrap_or(0) as u64;
        let data = self.memory.read(src, len, node.id)?.to_vec();
        self.memory.write(dst, &data, node.id)
    }

    /// Evaluates `vec.splat/extract/replace/bitcast` against lane vectors
    /// represented as [`Value::Array`].
    fn eval_vec(&self, node: &NodeRecord, tag: &str) -> Result<Value, RuntimeError> {
        match tag {
            "vec.splat" => {
                let x = self.field_value(node, "x")?;
                let lanes = node.field_i64("lanes").unwrap_or(1).max(1) as usize;
                Ok(Value::Array(vec![x; lanes]))
            }
            "vec.extract" => {
                let vector = self.field_value(node, "x")?;
                let index = self.field_value(node, "index")?.as_i64().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "int".into(),
                    got: "other".into(),
                })?;
                match vector {
                    Value::Array(lanes) => lanes.get(index as usize).cloned().ok_or(RuntimeError::VecIndexOutOfBounds {
                        node: node.id,
                        index,
                        lanes: lanes.len() as u32,
                    }),
                    _ => Err(RuntimeError::TypeMismatch { node: node.id, expected: "vec".into(), got: "other".into() }),
                }
            }
            "vec.replace" => {
                let vector = self.field_value(node, "x")?;
                let index = self.field_value(node, "index")?.as_i64().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "int".into(),
                    got: "other".into(),
                })?;
                let value = self.field_value(node, "value")?;
                match vector {
                    Value::Array(mut lanes) => {
                        if index < 0 || index as usize >= lanes.len() {
                            return Err(RuntimeError::VecIndexOutOfBounds {
                                node: node.id,
                                index,
                                lanes: lanes.len() as u32,
                            });
                        }
                        lanes[index as usize] = value;
                        Ok(Value::Array(lanes))
                    }
                    _ => Err(RuntimeError::TypeMismatch { node: node.id, expected: "vec".into(), got: "other".into() }),
                }
            }
            "vec.bitcast" => self.field_value(node, "x"),
            _ => Err(RuntimeError::UnsupportedTag { node: node.id, tag: tag.to_string() }),
        }
    }

    /// Evaluates `sem.if`/`sem.and_sc`/`sem.or_sc` with native short-circuit
    /// semantics (the semantic evaluator runs pre-lowering, `§1`).
    fn eval_sem(&mut self, node: &NodeRecord, tag: &str) -> Result<Value, RuntimeError> {
        match tag {
            "sem.if" => {
                let cond = self.field_value(node, "cond")?.as_bool().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "bool".into(),
                    got: "other".into(),
                })?;
                let branch = if cond { "then" } else { "else" };
                self.eval_sem_branch(node, branch)
            }
            "sem.and_sc" => {
                let lhs = self.field_value(node, "lhs")?.as_bool().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "bool".into(),
                    got: "other".into(),
                })?;
                if !lhs {
                    Ok(Value::Bool(false))
                } else {
                    self.eval_sem_branch(node, "rhs")
                }
            }
            "sem.or_sc" => {
                let lhs = self.field_value(node, "lhs")?.as_bool().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "bool".into(),
                    got: "other".into(),
                })?;
                if lhs {
                    Ok(Value::Bool(true))
                } else {
                    self.eval_sem_branch(node, "rhs")
                }
            }
            _ => Err(RuntimeError::UnsupportedTag { node: node.id, tag: tag.to_string() }),
        }
    }

    fn eval_sem_branch(&self, node: &NodeRecord, key: &str) -> Result<Value, RuntimeError> {
        let branch = node
            .field(key)
            .ok_or(RuntimeError::MissingField { node: node.id, field: "branch" })?;
        let v_ref = branch
            .get("v")
            .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
            .ok_or(RuntimeError::MissingField { node: node.id, field: "v" })?;
        self.value_of(v_ref)
    }

    fn eval_terminator(&mut self, node: &NodeRecord) -> Result<(), RuntimeError> {
        match normalize_tag(&node.tag) {
            "term.br" => {
                let to = node
                    .field_ref("to")
                    .ok_or(RuntimeError::MissingField { node: node.id, field: "to" })?
                    .as_node_id();
                let args = self.resolve_args(node, "args")?;
                self.branch_to(to, args)
            }
            "term.cbr" => {
                let cond = self.field_value(node, "cond")?.as_bool().ok_or(RuntimeError::TypeMismatch {
                    node: node.id,
                    expected: "bool".into(),
                    got: "other".into(),
                })?;
                let branch = node
                    .field(if cond { "then" } else { "else" })
                    .ok_or(RuntimeError::MissingField { node: node.id, field: "then" })?;
                let to = branch
                    .get("to")
                    .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
                    .ok_or(RuntimeError::MissingField { node: node.id, field: "to" })?
                    .as_node_id();
                let args = branch
                    .get("args")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| serde_json::from_value::<Ref>(v.clone()).ok())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let args = self.resolve_refs(&args)?;
                self.branch_to(to, args)
            }
            "term.switch" => self.eval_switch(node),
            "term.ret" | "return" => {
                let value = match node.field_ref("value") {
                    Some(r) => Some(self.value_of(r)?),
                    None => None,
                };
                self.do_return(value.unwrap_or(Value::Unit))
            }
            other => Err(RuntimeError::UnsupportedTag { node: node.id, tag: other.to_string() }),
        }
    }

    fn eval_switch(&mut self, node: &NodeRecord) -> Result<(), RuntimeError> {
        let scrut = self.field_value(node, "scrut")?.as_i64().ok_or(RuntimeError::TypeMismatch {
            node: node.id,
            expected: "int".into(),
            got: "other".into(),
        })?;
        let cases = node
            .field("cases")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for case in &cases {
            let lit_ref = case
                .get("lit")
                .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok());
            if let Some(lit_ref) = lit_ref {
                let lit_node = self.node(lit_ref.as_node_id())?.clone();
                let lit_value = eval::eval_node(&lit_node, |_| unreachable!("const has no operands"))?
                    .and_then(|v| v.as_i64());
                if lit_value == Some(scrut) {
                    let to = case
                        .get("to")
                        .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
                        .ok_or(RuntimeError::MissingField { node: node.id, field: "to" })?
                        .as_node_id();
                    let args = case
                        .get("args")
                        .and_then(|v| v.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| serde_json::from_value::<Ref>(v.clone()).ok())
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    let args = self.resolve_refs(&args)?;
                    return self.branch_to(to, args);
                }
            }
        }
        let default = node
            .field("default")
            .ok_or(RuntimeError::MissingField { node: node.id, field: "default" })?;
        let to = default
            .get("to")
            .and_then(|v| serde_json::from_value::<Ref>(v.clone()).ok())
            .ok_or(RuntimeError::MissingField { node: node.id, field: "to" })?
            .as_node_id();
        let args = default
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value::<Ref>(v.clone()).ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let args = self.resolve_refs(&args)?;
        self.branch_to(to, args)
    }

    fn resolve_args(&self, node: &NodeRecord, key: &str) -> Result<Vec<Value>, RuntimeError> {
        self.resolve_refs(&node.field_refs(key))
    }

    fn resolve_refs(&self, refs: &[Ref]) -> Result<Vec<Value>, RuntimeError> {
        refs.iter().map(|r| self.value_of(*r)).collect()
    }

    fn branch_to(&mut self, to: NodeId, args: Vec<Value>) -> Result<(), RuntimeError> {
        let dest = self.node(to)?.clone();
        let params = dest.field_refs("params");
        if params.len() != args.len() {
            return Err(RuntimeError::InternalError {
                message: format!("branch to block {to} supplied {} args for {} params", args.len(), params.len()),
            });
        }
        let frame = self.call_stack.last_mut().ok_or(RuntimeError::InternalError {
            message: "empty call stack".to_string(),
        })?;
        for (param, arg) in params.iter().zip(args.into_iter()) {
            frame.values.insert(param.as_node_id(), arg);
        }
        frame.block = to;
        frame.stmt_index = 0;
        Ok(())
    }

    fn do_return(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.call_stack.pop();
        match self.call_stack.last_mut() {
            None => self.state = ExecutionState::Completed { result: value },
            Some(caller) => {
                let call_node = caller.pending_call_node.take().ok_or(RuntimeError::InternalError {
                    message: "return bubbled into a frame with no pending call".to_string(),
                })?;
                caller.values.insert(call_node, value);
                caller.stmt_index += 1;
                self.state = ExecutionState::Running;
            }
        }
        Ok(())
    }

    /// Resolves `call {callee, args}`, pushing a new frame for the callee
    /// and suspending the current frame until it returns (`§4.G` "Calls").
    fn eval_call(&mut self, node: &NodeRecord, node_id: NodeId) -> Result<(), RuntimeError> {
        if node.tag == "call.indirect" {
            return Err(RuntimeError::UnsupportedTag {
                node: node_id,
                tag: "call.indirect".to_string(),
            });
        }
        let callee = node
            .field_ref("callee")
            .ok_or(RuntimeError::MissingField { node: node_id, field: "callee" })?
            .as_node_id();
        let args = self.resolve_refs(&node.field_refs("args"))?;
        let frame = self.create_call_frame(callee, args)?;
        if let Some(top) = self.call_stack.last_mut() {
            top.pending_call_node = Some(node_id);
        }
        self.call_stack.push(frame);
        self.state = ExecutionState::Running;
        Ok(())
    }

    fn create_call_frame(&mut self, fn_node: NodeId, args: Vec<Value>) -> Result<CallFrame, RuntimeError> {
        if self.call_stack.len() >= self.config.max_recursion_depth {
            return Err(RuntimeError::RecursionLimitExceeded {
                node: fn_node,
                limit: self.config.max_recursion_depth,
            });
        }
        let f = self.node(fn_node)?;
        let entry = f
            .field_ref("entry")
            .ok_or(RuntimeError::MissingField { node: fn_node, field: "entry" })?
            .as_node_id();
        let entry_block = self.node(entry)?.clone();
        let params = entry_block.field_refs("params");
        let mut values = HashMap::new();
        for (param, arg) in params.iter().zip(args.into_iter()) {
            values.insert(param.as_node_id(), arg);
        }
        Ok(CallFrame {
            fn_node,
            block: entry,
            stmt_index: 0,
            values,
            pending_call_node: None,
        })
    }
}

fn prim_width(ty: &Option<&sircc_core::SirType>) -> u32 {
    match ty {
        Some(sircc_core::SirType::Prim(p)) => p.int_width().unwrap_or(32),
        _ => 32,
    }
}

/// Truncates a return value to a POSIX process exit code (`§8` scenarios 3-5
/// describe expected exit codes as plain integers; real exit codes are the
/// low byte of the returned value).
pub fn exit_code_for(value: &Value) -> i32 {
    value.as_i64().unwrap_or(0) as i32 & 0xff
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    fn sir_with(lines: &[&str]) -> ProgramTables {
        let text = lines.join("\n");
        build_program_tables(&text).unwrap()
    }

    /// Scenario 1 (`§8`): store 74565 into an `alloca.i16`, load it back,
    /// zero-extend, return. Expected final value 9029.
    #[test]
    fn i16_truncation_round_trip() {
        let tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i64","fields":{"value":74565}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"alloca","fields":{"ty":2}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"store.i16","fields":{"addr":{"ref":1},"value":{"ref":0}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"load.i16","fields":{"addr":{"ref":1}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"i16.zext.i32","fields":{"x":{"ref":3}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"return","fields":{"value":{"ref":4}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":6,"tag":"block","fields":{"params":[],"stmts":[0,1,2,3,4,5]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":7,"tag":"fn","fields":{"name":"main","entry":{"ref":6},"blocks":[6]}}"#,
        ]);
        let lines = HashMap::new();
        let mut interp = Interpreter::new(&tables, &lines, InterpreterConfig::default());
        interp.start(NodeId(7), vec![]).unwrap();
        let state = interp.run();
        match state {
            ExecutionState::Completed { result } => {
                assert_eq!(result.as_i64(), Some(9029));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    /// Scenario 5 (`§8`): switch among {1->10, 2->20, default->99}.
    #[test]
    fn switch_dispatch_matches_case_or_default() {
        let tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":1}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":2}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"term.switch","fields":{"scrut":{"ref":10},"cases":[{"lit":{"ref":0},"to":{"ref":20}},{"lit":{"ref":1},"to":{"ref":21}}],"default":{"to":{"ref":22}}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":10,"tag":"bparam","type_ref":3}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":30,"tag":"const.i32","fields":{"value":10}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":31,"tag":"return","fields":{"value":{"ref":30}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":20,"tag":"block","fields":{"params":[],"stmts":[30,31]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":32,"tag":"const.i32","fields":{"value":20}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":33,"tag":"return","fields":{"value":{"ref":32}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":21,"tag":"block","fields":{"params":[],"stmts":[32,33]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":34,"tag":"const.i32","fields":{"value":99}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":35,"tag":"return","fields":{"value":{"ref":34}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":22,"tag":"block","fields":{"params":[],"stmts":[34,35]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":40,"tag":"block","fields":{"params":[{"ref":10}],"stmts":[2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":41,"tag":"fn","fields":{"name":"dispatch","entry":{"ref":40},"blocks":[40,20,21,22]}}"#,
        ]);
        let lines = HashMap::new();

        let mut interp = Interpreter::new(&tables, &lines, InterpreterConfig::default());
        interp.start(NodeId(41), vec![Value::I32(2)]).unwrap();
        let state = interp.run();
        assert_eq!(
            match state {
                ExecutionState::Completed { result } => result.as_i64(),
                other => panic!("expected completion, got {other:?}"),
            },
            Some(20)
        );

        let mut interp = Interpreter::new(&tables, &lines, InterpreterConfig::default());
        interp.start(NodeId(41), vec![Value::I32(7)]).unwrap();
        let state = interp.run();
        assert_eq!(
            match state {
                ExecutionState::Completed { result } => result.as_i64(),
                other => panic!("expected completion, got {other:?}"),
            },
            Some(99)
        );
    }

    /// `call {callee, args}` suspends the caller's frame until the callee
    /// returns, then binds the call node to the returned value.
    #[test]
    fn call_suspends_caller_until_callee_returns() {
        let tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":60,"tag":"const.i32","fields":{"value":42}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":61,"tag":"return","fields":{"value":{"ref":60}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":51,"tag":"block","fields":{"params":[],"stmts":[60,61]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":50,"tag":"fn","fields":{"name":"callee","entry":{"ref":51},"blocks":[51]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":80,"tag":"call","fields":{"callee":{"ref":50},"args":[]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":81,"tag":"return","fields":{"value":{"ref":80}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":71,"tag":"block","fields":{"params":[],"stmts":[80,81]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":70,"tag":"fn","fields":{"name":"main","entry":{"ref":71},"blocks":[71]}}"#,
        ]);
        let lines = HashMap::new();
        let mut interp = Interpreter::new(&tables, &lines, InterpreterConfig::default());
        interp.start(NodeId(70), vec![]).unwrap();
        let state = interp.run();
        match state {
            ExecutionState::Completed { result } => assert_eq!(result.as_i64(), Some(42)),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn exit_code_truncates_to_low_byte() {
        assert_eq!(exit_code_for(&Value::I32(111)), 111);
        assert_eq!(exit_code_for(&Value::I32(256 + 20)), 20);
    }
}
