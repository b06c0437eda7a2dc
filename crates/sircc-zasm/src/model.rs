//! Record and operand types for `zasm-v1.1`, the retargetable assembly IR.
//!
//! A ZASM program is a line-ordered sequence of [`ZasmRecord`]s: one `meta`
//! record, `dir`ective records for externs/publics/data, `label` records,
//! and `instr` records. Every record carries a monotonic id and (except
//! `meta`) a source line number, matching the order instructions would
//! appear in an assembly listing.

use serde_json::{json, Value};

/// A single operand to an instruction or directive.
#[derive(Debug, Clone, PartialEq)]
pub enum ZasmOperand {
    /// A canonical register name: `A`, `HL`, `DE`, `BC`.
    Reg(String),
    /// A symbol reference (function, extern, global, string, or alloca).
    Sym(String),
    /// A label reference (branch target).
    Lbl(String),
    /// An immediate integer.
    Num(i64),
    /// A literal string (used by `STR` directive args).
    Str(String),
    /// A memory operand: base register/symbol plus optional displacement
    /// and access size in bytes.
    Mem {
        base: Box<ZasmOperand>,
        disp: Option<i64>,
        size: Option<u32>,
    },
}

impl ZasmOperand {
    pub fn reg(name: &str) -> Self {
        ZasmOperand::Reg(name.to_string())
    }

    pub fn sym(name: impl Into<String>) -> Self {
        ZasmOperand::Sym(name.into())
    }

    pub fn lbl(name: impl Into<String>) -> Self {
        ZasmOperand::Lbl(name.into())
    }

    pub fn mem(base: ZasmOperand, disp: Option<i64>, size: u32) -> Self {
        ZasmOperand::Mem { base: Box::new(base), disp, size: Some(size) }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ZasmOperand::Reg(v) => json!({"t": "reg", "v": v}),
            ZasmOperand::Sym(v) => json!({"t": "sym", "v": v}),
            ZasmOperand::Lbl(v) => json!({"t": "lbl", "v": v}),
            ZasmOperand::Num(v) => json!({"t": "num", "v": v}),
            ZasmOperand::Str(v) => json!({"t": "str", "v": v}),
            ZasmOperand::Mem { base, disp, size } => {
                let mut obj = json!({"t": "mem", "base": base.to_json()});
                if let Some(d) = disp {
                    obj["disp"] = json!(d);
                }
                if let Some(s) = size {
                    obj["size"] = json!(s);
                }
                obj
            }
        }
    }
}

/// One emitted record in ZASM program order.
#[derive(Debug, Clone)]
pub struct ZasmRecord {
    pub id: u32,
    pub line: u32,
    pub kind: ZasmRecordKind,
}

#[derive(Debug, Clone)]
pub enum ZasmRecordKind {
    Meta { producer: Option<String>, unit: Option<String> },
    Dir { op: String, args: Vec<ZasmOperand> },
    Label { name: String },
    Instr { mnemonic: String, operands: Vec<ZasmOperand> },
}

impl ZasmRecord {
    pub fn kind_tag(&self) -> &'static str {
        match &self.kind {
            ZasmRecordKind::Meta { .. } => "meta",
            ZasmRecordKind::Dir { .. } => "dir",
            ZasmRecordKind::Label { .. } => "label",
            ZasmRecordKind::Instr { .. } => "instr",
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "ir": "zasm-v1.1",
            "id": self.id,
            "k": self.kind_tag(),
            "loc": {"line": self.line},
        });
        match &self.kind {
            ZasmRecordKind::Meta { producer, unit } => {
                if let Some(p) = producer {
                    obj["producer"] = json!(p);
                }
                if let Some(u) = unit {
                    obj["unit"] = json!(u);
                }
            }
            ZasmRecordKind::Dir { op, args } => {
                obj["op"] = json!(op);
                obj["args"] = Value::Array(args.iter().map(ZasmOperand::to_json).collect());
            }
            ZasmRecordKind::Label { name } => {
                obj["name"] = json!(name);
            }
            ZasmRecordKind::Instr { mnemonic, operands } => {
                obj["op"] = json!(mnemonic);
                obj["operands"] = Value::Array(operands.iter().map(ZasmOperand::to_json).collect());
            }
        }
        obj
    }

    pub fn to_json_line(&self) -> String {
        self.to_json().to_string()
    }
}

/// One `{k:"zasm_map", ...}` entry correlating an emitted record back to the
/// SIR node that caused its emission.
#[derive(Debug, Clone)]
pub struct SourceMapEntry {
    pub zid: u32,
    pub z_k: String,
    pub sir_node: u32,
    pub sir_tag: String,
}

impl SourceMapEntry {
    pub fn to_json_line(&self) -> String {
        json!({
            "k": "zasm_map",
            "zid": self.zid,
            "z_k": self.z_k,
            "sir_node": self.sir_node,
            "sir_tag": self.sir_tag,
        })
        .to_string()
    }
}

/// The full output of lowering one SIR program to ZASM.
#[derive(Debug, Clone, Default)]
pub struct ZasmModule {
    pub records: Vec<ZasmRecord>,
    pub source_map: Vec<SourceMapEntry>,
}

impl ZasmModule {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&record.to_json_line());
            out.push('\n');
        }
        out
    }

    pub fn source_map_to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.source_map {
            out.push_str(&entry.to_json_line());
            out.push('\n');
        }
        out
    }
}
