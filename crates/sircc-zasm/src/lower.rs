//! Lowers one SIR program's `zir_main` function into `zasm-v1.1`.
//!
//! Unlike the native backend, ZASM has no phi nodes: block parameters are
//! named memory slots (`bp_<id>`) written by every predecessor's branch and
//! read at the top of the successor block. `let`-bound values get their own
//! slot (`tmp_<id>`) the first time anything other than the producing
//! statement needs them again.

use std::collections::HashMap;

use indexmap::IndexSet;

use sircc_core::node::{int_width_of_tag, normalize_tag};
use sircc_core::{DiagnosticBus, NodeId, NodeRecord, ProgramTables};

use crate::error::ZasmError;
use crate::model::{SourceMapEntry, ZasmModule, ZasmOperand, ZasmRecord, ZasmRecordKind};
use crate::regs::{Register, RegisterCache};

const ENTRY_NAME: &str = "zir_main";

#[derive(Debug, Clone)]
enum Binding {
    Slot(String),
    Operand(ZasmOperand),
}

pub struct ZasmOptions {
    pub emit_source_map: bool,
}

impl Default for ZasmOptions {
    fn default() -> Self {
        ZasmOptions { emit_source_map: true }
    }
}

pub fn lower_program(tables: &ProgramTables, options: &ZasmOptions) -> Result<ZasmModule, ZasmError> {
    let entry = tables
        .nodes_with_tag("fn")
        .find(|n| n.field_str("name") == Some(ENTRY_NAME))
        .map(|n| n.id)
        .ok_or(ZasmError::NoEntryFunction)?;

    tracing::debug!(entry = %entry.0, "lowering zir_main to zasm");
    let mut emitter = Emitter::new(tables, options.emit_source_map);
    emitter.emit_meta();
    emitter.lower_function(entry)?;
    emitter.emit_postamble();

    tracing::debug!(records = emitter.records.len(), "zasm lowering complete");
    Ok(ZasmModule { records: emitter.records, source_map: emitter.source_map })
}

struct Emitter<'a> {
    tables: &'a ProgramTables,
    track_map: bool,
    records: Vec<ZasmRecord>,
    source_map: Vec<SourceMapEntry>,
    next_id: u32,
    line: u32,
    regs: RegisterCache,
    names: HashMap<NodeId, Binding>,
    externs: IndexSet<String>,
    strings: Vec<(NodeId, String)>,
    allocas: Vec<(NodeId, u64)>,
}

impl<'a> Emitter<'a> {
    fn new(tables: &'a ProgramTables, track_map: bool) -> Self {
        Emitter {
            tables,
            track_map,
            records: Vec::new(),
            source_map: Vec::new(),
            next_id: 0,
            line: 1,
            regs: RegisterCache::new(),
            names: HashMap::new(),
            externs: IndexSet::new(),
            strings: Vec::new(),
            allocas: Vec::new(),
        }
    }

    fn get_node(&self, id: NodeId) -> Result<&'a NodeRecord, ZasmError> {
        self.tables
            .node(id)
            .ok_or_else(|| ZasmError::InvalidSir(format!("dangling node ref {}", id.0)))
    }

    fn push(&mut self, kind: ZasmRecordKind, sir_node: Option<(NodeId, &str)>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        let line = self.line;
        self.line += 1;
        let z_k = match &kind {
            ZasmRecordKind::Meta { .. } => "meta",
            ZasmRecordKind::Dir { .. } => "dir",
            ZasmRecordKind::Label { .. } => "label",
            ZasmRecordKind::Instr { .. } => "instr",
        };
        self.records.push(ZasmRecord { id, line, kind });
        if self.track_map {
            if let Some((node, tag)) = sir_node {
                self.source_map.push(SourceMapEntry {
                    zid: id,
                    z_k: z_k.to_string(),
                    sir_node: node.0,
                    sir_tag: tag.to_string(),
                });
            }
        }
        id
    }

    fn emit_meta(&mut self) {
        let kind = ZasmRecordKind::Meta {
            producer: self.tables.producer.clone(),
            unit: self.tables.unit.clone(),
        };
        self.push(kind, None);
    }

    fn emit_instr(&mut self, mnemonic: &str, operands: Vec<ZasmOperand>, node: NodeId, tag: &str) -> u32 {
        self.push(
            ZasmRecordKind::Instr { mnemonic: mnemonic.to_string(), operands },
            Some((node, tag)),
        )
    }

    fn emit_label(&mut self, name: String, node: NodeId, tag: &str) -> u32 {
        self.push(ZasmRecordKind::Label { name }, Some((node, tag)))
    }

    fn lower_function(&mut self, fn_node: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(fn_node)?;
        let blocks = node.field_refs("blocks");
        let entry_block = node
            .field_ref("entry")
            .ok_or_else(|| ZasmError::InvalidSir(format!("fn {} missing entry", fn_node.0)))?
            .as_node_id();

        for (i, block_ref) in blocks.iter().enumerate() {
            let block_id = block_ref.as_node_id();
            let label = if block_id == entry_block {
                ENTRY_NAME.to_string()
            } else {
                format!("b_{}", block_id.0)
            };
            if i == 0 && block_id == entry_block {
                self.push(
                    ZasmRecordKind::Dir { op: "PUBLIC".to_string(), args: vec![ZasmOperand::sym(ENTRY_NAME)] },
                    None,
                );
            }
            self.emit_label(label, block_id, "block");
            self.lower_block(block_id)?;
        }
        Ok(())
    }

    fn lower_block(&mut self, block_id: NodeId) -> Result<(), ZasmError> {
        let block = self.get_node(block_id)?;
        let stmts = block.field_refs("stmts");
        let (terminator, body) = stmts.split_last().ok_or_else(|| {
            ZasmError::InvalidSir(format!("block {} has no statements", block_id.0))
        })?;

        for stmt_ref in body {
            self.lower_stmt(stmt_ref.as_node_id())?;
        }
        self.lower_terminator(terminator.as_node_id())
    }

    fn bind_name(&mut self, id: NodeId, binding: Binding) {
        self.names.insert(id, binding);
    }

    fn temp_slot(&mut self, id: NodeId) -> String {
        format!("tmp_{}", id.0)
    }

    fn bp_slot(id: NodeId) -> String {
        format!("bp_{}", id.0)
    }

    /// Pure value -> operand lowering. Materializes into a slot only when
    /// the node has already been bound by a statement; otherwise resolves
    /// constants/symbols directly to operands.
    fn value_operand(&mut self, id: NodeId) -> Result<ZasmOperand, ZasmError> {
        if let Some(binding) = self.names.get(&id).cloned() {
            return Ok(match binding {
                Binding::Slot(slot) => ZasmOperand::sym(slot),
                Binding::Operand(op) => op,
            });
        }

        let node = self.get_node(id)?;
        let tag = normalize_tag(&node.tag);

        if let Some(_width) = int_width_of_tag(tag) {
            if tag.starts_with("const.i") {
                let v = node.field_i64("value").unwrap_or(0);
                return Ok(ZasmOperand::Num(v));
            }
        }

        match tag {
            "bparam" => Ok(ZasmOperand::sym(Self::bp_slot(id))),
            "cstr" => {
                let value = node.field_str("value").unwrap_or("").to_string();
                if !self.strings.iter().any(|(existing, _)| *existing == id) {
                    self.strings.push((id, value));
                }
                Ok(ZasmOperand::sym(format!("str_{}", id.0)))
            }
            "decl.fn" => {
                let name = node
                    .field_str("name")
                    .ok_or_else(|| ZasmError::InvalidSir(format!("decl.fn {} missing name", id.0)))?
                    .to_string();
                self.externs.insert(name.clone());
                Ok(ZasmOperand::sym(name))
            }
            "ptr.sym" => {
                let target = node
                    .field_ref("sym")
                    .ok_or_else(|| ZasmError::InvalidSir(format!("ptr.sym {} missing sym", id.0)))?
                    .as_node_id();
                self.value_operand(target)
            }
            "alloca" => {
                let ty = node
                    .field_ref("ty")
                    .ok_or_else(|| ZasmError::InvalidSir(format!("alloca {} missing ty", id.0)))?
                    .as_type_id();
                let count = node.field_i64("count").unwrap_or(1).max(1) as u64;
                let mut visiting = Vec::new();
                let mut bus = DiagnosticBus::new();
                let layout = sircc_core::layout_of(&self.tables.types, ty, ptr_layout(self.tables), &mut bus, &mut visiting)
                    .ok_or_else(|| ZasmError::InvalidSir(format!("alloca {} has no layout", id.0)))?;
                if !self.allocas.iter().any(|(existing, _)| *existing == id) {
                    self.allocas.push((id, layout.size * count));
                }
                Ok(ZasmOperand::sym(format!("alloc_{}", id.0)))
            }
            "ptr.to_i64" => {
                let inner = node
                    .field_ref("ptr")
                    .ok_or_else(|| ZasmError::InvalidSir(format!("ptr.to_i64 {} missing ptr", id.0)))?
                    .as_node_id();
                self.value_operand(inner)
            }
            "ptr.sizeof" | "ptr.alignof" => {
                let ty = node
                    .field_ref("ty")
                    .ok_or_else(|| ZasmError::InvalidSir(format!("{} {} missing ty", tag, id.0)))?
                    .as_type_id();
                let mut visiting = Vec::new();
                let mut bus = DiagnosticBus::new();
                let layout = sircc_core::layout_of(&self.tables.types, ty, ptr_layout(self.tables), &mut bus, &mut visiting)
                    .ok_or_else(|| ZasmError::InvalidSir(format!("{} {} has no layout", tag, id.0)))?;
                let value = if tag == "ptr.sizeof" { layout.size } else { layout.align };
                Ok(ZasmOperand::Num(value as i64))
            }
            "name" => {
                let target = node
                    .field_ref("target")
                    .ok_or_else(|| ZasmError::InvalidSir(format!("name {} missing target", id.0)))?
                    .as_node_id();
                self.value_operand(target)
            }
            _ => Err(ZasmError::UnsupportedOp(tag.to_string())),
        }
    }

    fn width_of(&self, node: &NodeRecord) -> u32 {
        int_width_of_tag(normalize_tag(&node.tag)).unwrap_or(32)
    }

    /// `A` holds single-byte values; everything wider goes through `HL`.
    fn canonical_register(_width: u32) -> Register {
        Register::Hl
    }

    fn load_into(&mut self, reg: Register, id: NodeId) -> Result<(), ZasmError> {
        let width = match self.tables.node(id) {
            Some(n) => self.width_of(n),
            None => 32,
        };
        let operand = self.value_operand(id)?;
        if let ZasmOperand::Sym(slot) = &operand {
            if self.regs.hits(reg, slot, width) {
                return Ok(());
            }
        }
        let tag = self.tables.node(id).map(|n| normalize_tag(&n.tag).to_string()).unwrap_or_default();
        self.emit_instr("LD", vec![ZasmOperand::reg(reg.name()), operand.clone()], id, &tag);
        if let ZasmOperand::Sym(slot) = operand {
            self.regs.bind(reg, slot, width);
        }
        Ok(())
    }

    fn spill_to_temp(&mut self, id: NodeId, reg: Register) {
        let slot = self.temp_slot(id);
        let width = self.tables.node(id).map(|n| self.width_of(n)).unwrap_or(32);
        let tag = self.tables.node(id).map(|n| normalize_tag(&n.tag).to_string()).unwrap_or_default();
        self.emit_instr("ST", vec![ZasmOperand::sym(slot.clone()), ZasmOperand::reg(reg.name())], id, &tag);
        self.regs.bind(reg, slot.clone(), width);
        self.bind_name(id, Binding::Slot(slot));
    }

    fn mnemonic_for_binop(tag: &str, width: u32) -> Option<&'static str> {
        let base = match tag {
            t if t.ends_with(".add") => "ADD",
            t if t.ends_with(".sub") => "SUB",
            t if t.ends_with(".mul") => "MUL",
            t if t.ends_with(".div.s") || t.ends_with(".div.s.trap") || t.ends_with(".div.s.sat") => "DIVS",
            t if t.ends_with(".div.u") || t.ends_with(".div.u.trap") || t.ends_with(".div.u.sat") => "DIVU",
            t if t.ends_with(".rem.s") || t.ends_with(".rem.s.trap") || t.ends_with(".rem.s.sat") => "REMS",
            t if t.ends_with(".rem.u") || t.ends_with(".rem.u.trap") || t.ends_with(".rem.u.sat") => "REMU",
            t if t.ends_with(".and") => "AND",
            t if t.ends_with(".or") => "OR",
            t if t.ends_with(".xor") => "XOR",
            t if t.ends_with(".shl") => "SLA",
            t if t.ends_with(".shr.s") => "SRA",
            t if t.ends_with(".shr.u") => "SRL",
            t if t.ends_with(".rotl") => "ROL",
            t if t.ends_with(".rotr") => "ROR",
            _ => return None,
        };
        Some(if width == 64 {
            match base {
                "ADD" => "ADD64",
                "SUB" => "SUB64",
                "MUL" => "MUL64",
                "DIVS" => "DIVS64",
                "DIVU" => "DIVU64",
                "REMS" => "REMS64",
                "REMU" => "REMU64",
                "AND" => "AND64",
                "OR" => "OR64",
                "XOR" => "XOR64",
                "SLA" => "SLA64",
                "SRA" => "SRA64",
                "SRL" => "SRL64",
                "ROL" => "ROL64",
                "ROR" => "ROR64",
                _ => base,
            }
        } else {
            base
        })
    }

    fn mnemonic_for_unop(tag: &str, width: u32) -> Option<&'static str> {
        let base = match tag {
            t if t.ends_with(".clz") => "CLZ",
            t if t.ends_with(".ctz") => "CTZ",
            t if t.ends_with(".popc") => "POPC",
            _ => return None,
        };
        Some(if width == 64 {
            match base {
                "CLZ" => "CLZ64",
                "CTZ" => "CTZ64",
                "POPC" => "POPC64",
                _ => base,
            }
        } else {
            base
        })
    }

    fn mnemonic_for_cmp(tag: &str, width: u32) -> Option<&'static str> {
        let base = match tag {
            t if t.ends_with(".cmp.eq") => "EQ",
            t if t.ends_with(".cmp.ne") => "NE",
            t if t.ends_with(".cmp.slt") => "LTS",
            t if t.ends_with(".cmp.sle") => "LES",
            t if t.ends_with(".cmp.sgt") => "GTS",
            t if t.ends_with(".cmp.sge") => "GES",
            t if t.ends_with(".cmp.ult") => "LTU",
            t if t.ends_with(".cmp.ule") => "LEU",
            t if t.ends_with(".cmp.ugt") => "GTU",
            t if t.ends_with(".cmp.uge") => "GEU",
            _ => return None,
        };
        Some(if width == 64 {
            match base {
                "EQ" => "EQ64",
                "NE" => "NE64",
                "LTS" => "LTS64",
                "LES" => "LES64",
                "GTS" => "GTS64",
                "GES" => "GES64",
                "LTU" => "LTU64",
                "LEU" => "LEU64",
                "GTU" => "GTU64",
                "GEU" => "GEU64",
                _ => base,
            }
        } else {
            base
        })
    }

    fn width_suffix_mem(&self, width: u32) -> u32 {
        match width {
            8 => 1,
            16 => 2,
            32 => 4,
            64 => 8,
            _ => 4,
        }
    }

    fn memory_operand(&mut self, addr: NodeId, width_bits: u32) -> Result<ZasmOperand, ZasmError> {
        let base = self.value_operand(addr)?;
        Ok(ZasmOperand::mem(base, Some(0), self.width_suffix_mem(width_bits)))
    }

    fn lower_stmt(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let tag_owned = normalize_tag(&node.tag).to_string();
        let tag = tag_owned.as_str();

        if tag == "call" {
            return self.lower_call(id);
        }
        if tag == "mem.fill" {
            return self.lower_mem_fill(id);
        }
        if tag == "mem.copy" {
            return self.lower_mem_copy(id);
        }
        if tag.starts_with("store.") {
            return self.lower_store(id);
        }
        if let Some(width) = int_width_of_tag(tag) {
            if let Some(mnemonic) = Self::mnemonic_for_binop(tag, width) {
                return self.lower_binop(id, mnemonic);
            }
            if let Some(mnemonic) = Self::mnemonic_for_unop(tag, width) {
                return self.lower_unop(id, mnemonic);
            }
            if let Some(mnemonic) = Self::mnemonic_for_cmp(tag, width) {
                return self.lower_cmp(id, mnemonic);
            }
            if tag.starts_with("load.") {
                return self.lower_load(id);
            }
        }
        // Side-effect-free value producers (consts, casts, pointer arithmetic)
        // are materialized lazily by whichever consumer needs them.
        let _ = self.value_operand(id)?;
        Ok(())
    }

    fn lower_binop(&mut self, id: NodeId, mnemonic: &str) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let a = node.field_ref("lhs").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing lhs", id.0)))?.as_node_id();
        let b = node.field_ref("rhs").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing rhs", id.0)))?.as_node_id();

        self.load_into(Register::Hl, a)?;
        let b_operand = self.value_operand(b)?;
        let rhs = match &b_operand {
            ZasmOperand::Sym(slot) if a == b => {
                let _ = slot;
                ZasmOperand::reg("HL")
            }
            ZasmOperand::Sym(_) => {
                self.load_into(Register::De, b)?;
                ZasmOperand::reg("DE")
            }
            other => other.clone(),
        };

        let tag = normalize_tag(&node.tag).to_string();
        self.emit_instr(mnemonic, vec![ZasmOperand::reg("HL"), ZasmOperand::reg("HL"), rhs], id, &tag);
        self.spill_to_temp(id, Register::Hl);
        Ok(())
    }

    fn lower_unop(&mut self, id: NodeId, mnemonic: &str) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let x = node.field_ref("value").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing value", id.0)))?.as_node_id();
        self.load_into(Register::Hl, x)?;
        let tag = normalize_tag(&node.tag).to_string();
        self.emit_instr(mnemonic, vec![ZasmOperand::reg("HL"), ZasmOperand::reg("HL")], id, &tag);
        self.spill_to_temp(id, Register::Hl);
        Ok(())
    }

    fn lower_cmp(&mut self, id: NodeId, mnemonic: &str) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let a = node.field_ref("lhs").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing lhs", id.0)))?.as_node_id();
        let b = node.field_ref("rhs").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing rhs", id.0)))?.as_node_id();

        self.load_into(Register::Hl, a)?;
        let b_operand = self.value_operand(b)?;
        let rhs = match &b_operand {
            ZasmOperand::Sym(_) => {
                self.load_into(Register::De, b)?;
                ZasmOperand::reg("DE")
            }
            other => other.clone(),
        };
        let tag = normalize_tag(&node.tag).to_string();
        self.emit_instr("CP", vec![ZasmOperand::reg("HL"), rhs], id, &tag);
        self.emit_instr(mnemonic, vec![ZasmOperand::reg("A")], id, &tag);
        self.spill_to_temp(id, Register::Hl);
        Ok(())
    }

    fn lower_load(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let tag = normalize_tag(&node.tag).to_string();
        let addr = node.field_ref("addr").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing addr", id.0)))?.as_node_id();
        let width = self.width_of(node);
        let mem = self.memory_operand(addr, width)?;
        let mnemonic = match width {
            8 => "LD8U",
            16 => "LD16U",
            64 => "LD64",
            _ => "LD32U64",
        };
        let reg = Self::canonical_register(if width == 8 { 8 } else { width });
        let reg_name = if width == 8 { "A" } else { reg.name() };
        self.emit_instr(mnemonic, vec![ZasmOperand::reg(reg_name), mem], id, &tag);
        let slot = self.temp_slot(id);
        self.emit_instr("ST", vec![ZasmOperand::sym(slot.clone()), ZasmOperand::reg(reg_name)], id, &tag);
        self.bind_name(id, Binding::Slot(slot));
        Ok(())
    }

    fn lower_store(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let tag = normalize_tag(&node.tag).to_string();
        let addr = node.field_ref("addr").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing addr", id.0)))?.as_node_id();
        let value = node.field_ref("value").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing value", id.0)))?.as_node_id();
        let width = self.width_of(node);
        self.load_into(Register::Hl, value)?;
        let mem = self.memory_operand(addr, width)?;
        let mnemonic = match width {
            8 => "ST8",
            16 => "ST16",
            64 => "ST64",
            _ => "ST32",
        };
        self.emit_instr(mnemonic, vec![mem, ZasmOperand::reg("HL")], id, &tag);
        self.regs.invalidate_on_store();
        Ok(())
    }

    fn lower_mem_fill(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let dst = node.field_ref("dst").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing dst", id.0)))?.as_node_id();
        let byte = node.field_ref("byte").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing byte", id.0)))?.as_node_id();
        let len = node.field_ref("len").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing len", id.0)))?.as_node_id();

        self.load_into(Register::Hl, dst)?;
        let byte_op = self.value_operand(byte)?;
        let len_op = self.value_operand(len)?;
        self.emit_instr("LD", vec![ZasmOperand::reg("A"), byte_op], id, "mem.fill");
        self.emit_instr("LD", vec![ZasmOperand::reg("BC"), len_op], id, "mem.fill");
        self.emit_instr("FILL", vec![ZasmOperand::reg("HL"), ZasmOperand::reg("A"), ZasmOperand::reg("BC")], id, "mem.fill");
        self.regs.invalidate_on_store();
        Ok(())
    }

    fn lower_mem_copy(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let dst = node.field_ref("dst").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing dst", id.0)))?.as_node_id();
        let src = node.field_ref("src").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing src", id.0)))?.as_node_id();
        let len = node.field_ref("len").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing len", id.0)))?.as_node_id();

        let dst_op = self.value_operand(dst)?;
        self.emit_instr("LD", vec![ZasmOperand::reg("DE"), dst_op], id, "mem.copy");
        self.load_into(Register::Hl, src)?;
        let len_op = self.value_operand(len)?;
        self.emit_instr("LD", vec![ZasmOperand::reg("BC"), len_op], id, "mem.copy");
        self.emit_instr("LDIR", vec![ZasmOperand::reg("DE"), ZasmOperand::reg("HL"), ZasmOperand::reg("BC")], id, "mem.copy");
        self.regs.invalidate_on_store();
        Ok(())
    }

    fn lower_call(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let callee_id = node.field_ref("callee").ok_or_else(|| ZasmError::InvalidSir(format!("call {} missing callee", id.0)))?.as_node_id();
        let callee = self.value_operand(callee_id)?;
        let args: Vec<ZasmOperand> = node
            .field_refs("args")
            .into_iter()
            .map(|r| self.value_operand(r.as_node_id()))
            .collect::<Result<_, _>>()?;

        let mut operands = vec![callee];
        operands.extend(args);
        self.emit_instr("CALL", operands, id, "call");
        self.regs.invalidate_on_call();
        self.spill_to_temp(id, Register::Hl);
        Ok(())
    }

    fn branch_args(&mut self, args: &[sircc_core::Ref], params: &[sircc_core::Ref]) -> Result<(), ZasmError> {
        for (arg, param) in args.iter().zip(params.iter()) {
            let arg_id = arg.as_node_id();
            let param_id = param.as_node_id();
            let width = self.tables.node(param_id).map(|n| self.width_of(n)).unwrap_or(32);
            self.load_into(Register::Hl, arg_id)?;
            let slot = Self::bp_slot(param_id);
            self.emit_instr("ST", vec![ZasmOperand::sym(slot.clone()), ZasmOperand::reg("HL")], param_id, "bparam");
            self.regs.bind(Register::Hl, slot, width);
        }
        Ok(())
    }

    fn block_params(&self, block_id: NodeId) -> Vec<sircc_core::Ref> {
        self.tables.node(block_id).map(|n| n.field_refs("params")).unwrap_or_default()
    }

    /// Resolves a `term.switch` case literal (a `Ref` to a `const.*` node)
    /// to its integer value.
    fn const_i64(&self, id: NodeId) -> Result<i64, ZasmError> {
        let node = self.get_node(id)?;
        node.field_i64("value")
            .ok_or_else(|| ZasmError::InvalidSir(format!("{} is not a const node", id.0)))
    }

    fn lower_terminator(&mut self, id: NodeId) -> Result<(), ZasmError> {
        let node = self.get_node(id)?;
        let tag = normalize_tag(&node.tag).to_string();

        match tag.as_str() {
            "term.br" => {
                let to = node.field_ref("to").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing to", id.0)))?.as_node_id();
                let args = node.field_refs("args");
                let params = self.block_params(to);
                self.branch_args(&args, &params)?;
                let label = format!("b_{}", to.0);
                self.emit_instr("JR", vec![ZasmOperand::lbl(label)], id, &tag);
                Ok(())
            }
            "term.cbr" => {
                let cond = node.field_ref("cond").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing cond", id.0)))?.as_node_id();
                let then_obj = node.field("then").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing then", id.0)))?;
                let (then_to, then_args) = branch_target_obj(then_obj, id.0, "then")?;
                let else_obj = node.field("else").ok_or_else(|| ZasmError::InvalidSir(format!("{} missing else", id.0)))?;
                let (else_to, else_args) = branch_target_obj(else_obj, id.0, "else")?;

                self.load_into(Register::Hl, cond)?;
                let then_label = format!("cbr_then_{}", id.0);
                let else_label = format!("cbr_else_{}", id.0);
                self.emit_instr("JR", vec![ZasmOperand::reg("NZ"), ZasmOperand::lbl(then_label.clone())], id, &tag);
                self.emit_instr("JR", vec![ZasmOperand::lbl(else_label.clone())], id, &tag);

                self.emit_label(then_label, id, &tag);
                let then_params = self.block_params(then_to);
                self.branch_args(&then_args, &then_params)?;
                self.emit_instr("JR", vec![ZasmOperand::lbl(format!("b_{}", then_to.0))], id, &tag);

                self.emit_label(else_label, id, &tag);
                let else_params = self.block_params(else_to);
                self.branch_args(&else_args, &else_params)?;
                self.emit_instr("JR", vec![ZasmOperand::lbl(format!("b_{}", else_to.0))], id, &tag);
                Ok(())
            }
            "term.switch" => {
                let scrut = node.field_ref("scrutinee").or_else(|| node.field_ref("value")).ok_or_else(|| {
                    ZasmError::InvalidSir(format!("{} missing scrutinee", id.0))
                })?.as_node_id();
                self.load_into(Register::Hl, scrut)?;

                if let Some(cases) = node.field("cases").and_then(|v| v.as_array().cloned()) {
                    for case in &cases {
                        let lit_ref: sircc_core::Ref = case
                            .get("lit")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                            .ok_or_else(|| ZasmError::InvalidSir(format!("{} case missing lit", id.0)))?;
                        let lit = self.const_i64(lit_ref.as_node_id())?;
                        let (to, args) = branch_target_obj(case, id.0, "case")?;
                        let label = format!("case_{}_{}", id.0, lit);
                        self.emit_instr("CP", vec![ZasmOperand::reg("HL"), ZasmOperand::Num(lit)], id, &tag);
                        self.emit_instr("JR", vec![ZasmOperand::reg("Z"), ZasmOperand::lbl(label.clone())], id, &tag);
                        self.emit_label(label, id, &tag);
                        let params = self.block_params(to);
                        self.branch_args(&args, &params)?;
                        self.emit_instr("JR", vec![ZasmOperand::lbl(format!("b_{}", to.0))], id, &tag);
                    }
                }
                if let Some(default_obj) = node.field("default") {
                    let (to, args) = branch_target_obj(default_obj, id.0, "default")?;
                    let params = self.block_params(to);
                    self.branch_args(&args, &params)?;
                    self.emit_instr("JR", vec![ZasmOperand::lbl(format!("b_{}", to.0))], id, &tag);
                }
                Ok(())
            }
            "return" | "term.ret" => {
                if let Some(value_ref) = node.field_ref("value") {
                    self.load_into(Register::Hl, value_ref.as_node_id())?;
                } else {
                    self.emit_instr("LD", vec![ZasmOperand::reg("HL"), ZasmOperand::Num(0)], id, &tag);
                }
                self.emit_instr("RET", vec![], id, &tag);
                Ok(())
            }
            other => Err(ZasmError::UnsupportedOp(other.to_string())),
        }
    }

    fn emit_postamble(&mut self) {
        for name in self.externs.clone() {
            self.push(
                ZasmRecordKind::Dir {
                    op: "EXTERN".to_string(),
                    args: vec![ZasmOperand::Str("c".to_string()), ZasmOperand::Str(name.clone()), ZasmOperand::sym(name)],
                },
                None,
            );
        }
        for (id, value) in self.strings.clone() {
            self.push(
                ZasmRecordKind::Dir {
                    op: "STR".to_string(),
                    args: vec![ZasmOperand::sym(format!("str_{}", id.0)), ZasmOperand::Str(value)],
                },
                Some((id, "cstr")),
            );
        }
        for (id, size) in self.allocas.clone() {
            self.push(
                ZasmRecordKind::Dir {
                    op: "RESB".to_string(),
                    args: vec![ZasmOperand::sym(format!("alloc_{}", id.0)), ZasmOperand::Num(size as i64)],
                },
                Some((id, "alloca")),
            );
        }
    }
}

/// Parses a `{to, args?}` branch-target object, the shape shared by
/// `term.cbr`'s `then`/`else` fields and `term.switch`'s case/default
/// entries.
fn branch_target_obj(
    obj: &serde_json::Value,
    owner_id: u32,
    key: &str,
) -> Result<(NodeId, Vec<sircc_core::Ref>), ZasmError> {
    let to = obj
        .get("to")
        .and_then(|v| serde_json::from_value::<sircc_core::Ref>(v.clone()).ok())
        .ok_or_else(|| ZasmError::InvalidSir(format!("{} {} missing to", owner_id, key)))?
        .as_node_id();
    let args: Vec<sircc_core::Ref> = obj
        .get("args")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
        .unwrap_or_default();
    Ok((to, args))
}

fn ptr_layout(tables: &ProgramTables) -> sircc_core::Layout {
    let bits = tables.target.ptr_bits.unwrap_or(64) as u64;
    sircc_core::Layout::new(bits / 8, bits / 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    fn simple_return_tables() -> ProgramTables {
        build_program_tables(
            &[
                r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
                r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":5}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"return","fields":{"value":{"ref":0}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[1]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","type_ref":10,"fields":{"name":"zir_main","entry":{"ref":2},"blocks":[2]}}"#,
            ]
            .join("\n"),
        )
        .unwrap()
    }

    #[test]
    fn lowers_entry_label_and_return() {
        let tables = simple_return_tables();
        let module = lower_program(&tables, &ZasmOptions::default()).unwrap();
        let has_entry_label = module.records.iter().any(|r| matches!(&r.kind, ZasmRecordKind::Label { name } if name == ENTRY_NAME));
        assert!(has_entry_label);
        let has_ret = module.records.iter().any(|r| matches!(&r.kind, ZasmRecordKind::Instr { mnemonic, .. } if mnemonic == "RET"));
        assert!(has_ret);
    }

    #[test]
    fn missing_entry_function_is_an_error() {
        let tables = build_program_tables(r#"{"ir":"sir-v1.0","k":"meta"}"#).unwrap();
        let result = lower_program(&tables, &ZasmOptions::default());
        assert!(matches!(result, Err(ZasmError::NoEntryFunction)));
    }

    #[test]
    fn source_map_entries_reference_emitting_sir_node() {
        let tables = simple_return_tables();
        let module = lower_program(&tables, &ZasmOptions { emit_source_map: true }).unwrap();
        assert!(!module.source_map.is_empty());
        assert!(module.source_map.iter().any(|e| e.sir_node == 1));
    }

    #[test]
    fn term_cbr_reads_to_and_args_from_branch_objects() {
        let tables = build_program_tables(
            &[
                r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
                r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":1}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":20,"tag":"const.i32","fields":{"value":7}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":21,"tag":"return","fields":{"value":{"ref":20}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":22,"tag":"block","fields":{"params":[],"stmts":[20,21]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":30,"tag":"const.i32","fields":{"value":9}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":31,"tag":"return","fields":{"value":{"ref":30}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":32,"tag":"block","fields":{"params":[],"stmts":[30,31]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":40,"tag":"term.cbr","fields":{"cond":{"ref":0},"then":{"to":{"ref":22},"args":[]},"else":{"to":{"ref":32},"args":[]}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":50,"tag":"block","fields":{"params":[],"stmts":[0,40]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":60,"tag":"fn","type_ref":10,"fields":{"name":"zir_main","entry":{"ref":50},"blocks":[50,22,32]}}"#,
            ]
            .join("\n"),
        )
        .unwrap();
        let module = lower_program(&tables, &ZasmOptions::default()).unwrap();
        let jumps_to = |name: &str| {
            module.records.iter().any(|r| {
                matches!(&r.kind, ZasmRecordKind::Instr { mnemonic, operands } if mnemonic == "JR"
                    && operands.iter().any(|op| matches!(op, ZasmOperand::Lbl(l) if l == name)))
            })
        };
        assert!(jumps_to("b_22"));
        assert!(jumps_to("b_32"));
    }

    #[test]
    fn term_switch_resolves_lit_refs_and_feeds_branch_args() {
        let tables = build_program_tables(
            &[
                r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
                r#"{"ir":"sir-v1.0","k":"type","id":10,"kind":"fn","params":[],"ret":1,"varargs":false}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":2}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":1}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"const.i32","fields":{"value":2}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"const.i32","fields":{"value":99}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":10,"tag":"bparam","fields":{"index":0,"ty":3}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":11,"tag":"return","fields":{"value":{"ref":10}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":12,"tag":"block","fields":{"params":[10],"stmts":[11]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":20,"tag":"return","fields":{"value":{"ref":1}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":21,"tag":"block","fields":{"params":[],"stmts":[20]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":30,"tag":"return","fields":{"value":{"ref":0}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":31,"tag":"block","fields":{"params":[],"stmts":[30]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":40,"tag":"term.switch","fields":{"scrutinee":{"ref":0},"cases":[{"lit":{"ref":1},"to":{"ref":21},"args":[]},{"lit":{"ref":2},"to":{"ref":12},"args":[{"ref":3}]}],"default":{"to":{"ref":31},"args":[]}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":50,"tag":"block","fields":{"params":[],"stmts":[0,1,2,3,40]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":60,"tag":"fn","type_ref":10,"fields":{"name":"zir_main","entry":{"ref":50},"blocks":[50,21,12,31]}}"#,
            ]
            .join("\n"),
        )
        .unwrap();
        let module = lower_program(&tables, &ZasmOptions::default()).unwrap();

        let has_cp_with = |n: i64| {
            module.records.iter().any(|r| {
                matches!(&r.kind, ZasmRecordKind::Instr { mnemonic, operands } if mnemonic == "CP"
                    && operands.iter().any(|op| matches!(op, ZasmOperand::Num(v) if *v == n)))
            })
        };
        assert!(has_cp_with(1), "case literal 1 should resolve from the const node it refs");
        assert!(has_cp_with(2), "case literal 2 should resolve from the const node it refs");

        let stores_to_bp_10 = module.records.iter().any(|r| {
            matches!(&r.kind, ZasmRecordKind::Instr { mnemonic, operands } if mnemonic == "ST"
                && operands.iter().any(|op| matches!(op, ZasmOperand::Sym(s) if s == "bp_10")))
        });
        assert!(stores_to_bp_10, "case with a non-empty arg list should feed the target block's bparam slot");
    }
}
