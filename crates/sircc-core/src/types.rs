//! The SIR type system and layout engine (components C of the toolchain).
//!
//! Every type has a `kind` and kind-specific attributes (`§3 DATA MODEL`).
//! [`SirType`] models the nine kinds; [`TypeTable`] is the per-program type
//! table, pre-registering the nine primitive kinds (seven sized integer/float
//! primitives plus `bool`/`i1` unified and `void`).
//! [`layout_of`] computes `(size, align)` pairs, memoized per type id with a
//! visiting bitmap to reject cyclic structs (`§9`: "map to... a visited
//! bitset threaded through the recursion").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diag::{About, DiagnosticBus};
use crate::error::CoreError;
use crate::id::TypeId;

/// Primitive scalar kinds. `Bool` and `I1` denote the same one-byte domain
/// (`§3`: "`bool` and `i1` denote the same domain; layout is 1 byte,
/// alignment tracks `i8`"); they are kept as distinct variants only so a
/// producer's literal `prim.name` round-trips, but layout treats them
/// identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimKind {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Void,
}

impl PrimKind {
    pub fn from_name(name: &str) -> Option<PrimKind> {
        Some(match name {
            "i1" => PrimKind::I1,
            "i8" => PrimKind::I8,
            "i16" => PrimKind::I16,
            "i32" => PrimKind::I32,
            "i64" => PrimKind::I64,
            "f32" => PrimKind::F32,
            "f64" => PrimKind::F64,
            "bool" => PrimKind::Bool,
            "void" => PrimKind::Void,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimKind::I1 => "i1",
            PrimKind::I8 => "i8",
            PrimKind::I16 => "i16",
            PrimKind::I32 => "i32",
            PrimKind::I64 => "i64",
            PrimKind::F32 => "f32",
            PrimKind::F64 => "f64",
            PrimKind::Bool => "bool",
            PrimKind::Void => "void",
        }
    }

    /// Bit width of an integer primitive. `None` for float/bool/void.
    pub fn int_width(&self) -> Option<u32> {
        match self {
            PrimKind::I1 => Some(1),
            PrimKind::I8 => Some(8),
            PrimKind::I16 => Some(16),
            PrimKind::I32 => Some(32),
            PrimKind::I64 => Some(64),
            _ => None,
        }
    }

    pub fn is_sized(&self) -> bool {
        !matches!(self, PrimKind::Void)
    }
}

/// A single field of a `struct` type (`§3`: `fields:[{name, type_ref}]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructField {
    pub name: Option<String>,
    pub type_ref: TypeId,
}

/// A single variant of a `sum` type (`§3`: `variants:[{name?, ty?}]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumVariant {
    pub name: Option<String>,
    pub ty: Option<TypeId>,
}

/// One of the nine SIR type kinds (`§3 DATA MODEL`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SirType {
    Prim(PrimKind),
    Ptr {
        of: TypeId,
    },
    Array {
        of: TypeId,
        len: u64,
    },
    Struct {
        name: Option<String>,
        fields: Vec<StructField>,
    },
    Fn {
        params: Vec<TypeId>,
        ret: TypeId,
        varargs: bool,
    },
    Fun {
        sig: TypeId,
    },
    Closure {
        call_sig: TypeId,
        env_ty: TypeId,
        name: Option<String>,
    },
    Vec {
        lane: TypeId,
        lanes: u32,
    },
    Sum {
        variants: Vec<SumVariant>,
    },
}

impl SirType {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SirType::Prim(_) => "prim",
            SirType::Ptr { .. } => "ptr",
            SirType::Array { .. } => "array",
            SirType::Struct { .. } => "struct",
            SirType::Fn { .. } => "fn",
            SirType::Fun { .. } => "fun",
            SirType::Closure { .. } => "closure",
            SirType::Vec { .. } => "vec",
            SirType::Sum { .. } => "sum",
        }
    }
}

/// The size/alignment pair produced by layout resolution (`§4.C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}

impl Layout {
    pub const fn new(size: u64, align: u64) -> Self {
        Layout { size, align }
    }
}

/// Rounds `offset` up to the next multiple of `align` (`align` must be a
/// positive power of two; `§3`: "each at `roundup(offset, align(field))`").
pub fn roundup(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two() && align > 0);
    (offset + align - 1) & !(align - 1)
}

/// The per-program type table. Pre-registers the nine primitive kinds at
/// fixed, stable ids on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeTable {
    types: Vec<Option<SirType>>,
    names: HashMap<String, TypeId>,
    next_id: u32,
}

impl TypeId {
    pub const I1: TypeId = TypeId(0);
    pub const I8: TypeId = TypeId(1);
    pub const I16: TypeId = TypeId(2);
    pub const I32: TypeId = TypeId(3);
    pub const I64: TypeId = TypeId(4);
    pub const F32: TypeId = TypeId(5);
    pub const F64: TypeId = TypeId(6);
    pub const BOOL: TypeId = TypeId(7);
    pub const VOID: TypeId = TypeId(8);
}

impl TypeTable {
    const BUILTIN_COUNT: u32 = 9;

    pub fn new() -> Self {
        let types = vec![
            Some(SirType::Prim(PrimKind::I1)),
            Some(SirType::Prim(PrimKind::I8)),
            Some(SirType::Prim(PrimKind::I16)),
            Some(SirType::Prim(PrimKind::I32)),
            Some(SirType::Prim(PrimKind::I64)),
            Some(SirType::Prim(PrimKind::F32)),
            Some(SirType::Prim(PrimKind::F64)),
            Some(SirType::Prim(PrimKind::Bool)),
            Some(SirType::Prim(PrimKind::Void)),
        ];
        TypeTable {
            types,
            names: HashMap::new(),
            next_id: Self::BUILTIN_COUNT,
        }
    }

    /// Inserts a type at a producer-assigned id (SIR ids are producer-chosen,
    /// not auto-incremented). Grows the sparse array as needed; forward
    /// references are permitted (`§3`).
    pub fn insert(&mut self, id: TypeId, ty: SirType) -> Result<(), CoreError> {
        let idx = id.0 as usize;
        if idx >= self.types.len() {
            self.types.resize(idx + 1, None);
        }
        if self.types[idx].is_some() {
            return Err(CoreError::DuplicateId {
                namespace: "type",
                id: id.0,
            });
        }
        if let SirType::Struct {
            name: Some(name), ..
        }
        | SirType::Closure {
            name: Some(name), ..
        } = &ty
        {
            self.names.insert(name.clone(), id);
        }
        self.types[idx] = Some(ty);
        self.next_id = self.next_id.max(id.0 + 1);
        Ok(())
    }

    pub fn get(&self, id: TypeId) -> Option<&SirType> {
        self.types.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn get_by_name(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.types
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|_| TypeId(i as u32)))
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes `(size, align)` for `id`, recursing through compound types.
///
/// Follows the layout rules of `§3`/`§4.C` exactly:
/// - `prim`: 1/1/2/4/8-byte scalars; `void` is unsized.
/// - `ptr`: pointer size/align from the target (passed in as `ptr_layout`).
/// - `array`: stride = `roundup(size_of(of), align_of(of))`; `len == 0` has
///   size 0 and element alignment. Overflow of `len * stride` is a failure.
/// - `struct`: fields laid out in order at `roundup(offset, align(field))`;
///   total size padded to the max field alignment (at least 1).
/// - `fn`: unsized (a function type, not a function pointer).
/// - `fun`: pointer layout.
/// - `closure`: `{code_ptr, env}`, code pointer preceding env, natural align.
/// - `vec`: lane width * lane count, lane alignment (bool lanes are 1 byte).
/// - `sum`: `{tag:i32, payload:bytes}`; payload starts at
///   `roundup(4, max_payload_align)`; type align = `max(4, max_payload_align)`;
///   total size rounds up to type alignment.
///
/// `visiting` rejects cycles through struct fields (`§9` "resolving" flag).
pub fn layout_of(
    table: &TypeTable,
    id: TypeId,
    ptr_layout: Layout,
    bus: &mut DiagnosticBus,
    visiting: &mut Vec<TypeId>,
) -> Option<Layout> {
    if visiting.contains(&id) {
        bus.emit(
            "sircc.type.cycle",
            format!("cyclic type layout through TypeId({})", id.0),
            Some(About::ty(id)),
        );
        return None;
    }
    let ty = match table.get(id) {
        Some(ty) => ty,
        None => {
            bus.emit(
                "sircc.parse.dangling_ref",
                format!("type ref {} does not resolve", id.0),
                Some(About::ty(id)),
            );
            return None;
        }
    };

    match ty {
        SirType::Prim(prim) => match prim {
            PrimKind::Void => {
                bus.emit(
                    "sircc.type.unsized",
                    "void has no layout".to_string(),
                    Some(About::ty(id)),
                );
                None
            }
            PrimKind::I1 | PrimKind::I8 | PrimKind::Bool => Some(Layout::new(1, 1)),
            PrimKind::I16 => Some(Layout::new(2, 2)),
            PrimKind::I32 => Some(Layout::new(4, 4)),
            PrimKind::I64 => Some(Layout::new(8, 8)),
            PrimKind::F32 => Some(Layout::new(4, 4)),
            PrimKind::F64 => Some(Layout::new(8, 8)),
        },
        SirType::Ptr { .. } => Some(ptr_layout),
        SirType::Array { of, len } => {
            visiting.push(id);
            let elem = layout_of(table, *of, ptr_layout, bus, visiting);
            visiting.pop();
            let elem = elem?;
            if *len == 0 {
                return Some(Layout::new(0, elem.align.max(1)));
            }
            let stride = roundup(elem.size, elem.align);
            let total = match stride.checked_mul(*len) {
                Some(t) => t,
                None => {
                    bus.emit(
                        "sircc.type.array.overflow",
                        format!("array length {} * stride {} overflows", len, stride),
                        Some(About::ty(id)),
                    );
                    return None;
                }
            };
            Some(Layout::new(total, elem.align))
        }
        SirType::Struct { fields, .. } => {
            visiting.push(id);
            let mut offset = 0u64;
            let mut max_align = 1u64;
            for field in fields {
                let fl = match layout_of(table, field.type_ref, ptr_layout, bus, &mut visiting.clone())
                {
                    Some(fl) => fl,
                    None => {
                        visiting.pop();
                        return None;
                    }
                };
                offset = roundup(offset, fl.align);
                offset += fl.size;
                max_align = max_align.max(fl.align);
            }
            visiting.pop();
            let size = roundup(offset, max_align);
            Some(Layout::new(size, max_align))
        }
        SirType::Fn { .. } => {
            bus.emit(
                "sircc.type.unsized",
                "fn type has no layout (not a function pointer)".to_string(),
                Some(About::ty(id)),
            );
            None
        }
        SirType::Fun { .. } => Some(ptr_layout),
        SirType::Closure { env_ty, .. } => {
            visiting.push(id);
            let env = layout_of(table, *env_ty, ptr_layout, bus, visiting);
            visiting.pop();
            let env = env?;
            let offset = roundup(ptr_layout.size, env.align);
            let size = offset + env.size;
            let align = ptr_layout.align.max(env.align);
            Some(Layout::new(roundup(size, align), align))
        }
        SirType::Vec { lane, lanes } => {
            if *lanes == 0 {
                bus.emit(
                    "sircc.type.vec.lanes",
                    "vec lane count must be >= 1".to_string(),
                    Some(About::ty(id)),
                );
                return None;
            }
            let lane_layout = layout_of(table, *lane, ptr_layout, bus, visiting)?;
            let total = lane_layout.size.checked_mul(*lanes as u64)?;
            Some(Layout::new(total, lane_layout.align))
        }
        SirType::Sum { variants } => {
            visiting.push(id);
            let mut max_payload_align = 1u64;
            let mut max_payload_size = 0u64;
            for v in variants {
                if let Some(ty) = v.ty {
                    let fl = match layout_of(table, ty, ptr_layout, bus, &mut visiting.clone()) {
                        Some(fl) => fl,
                        None => {
                            visiting.pop();
                            return None;
                        }
                    };
                    max_payload_align = max_payload_align.max(fl.align);
                    max_payload_size = max_payload_size.max(fl.size);
                }
            }
            visiting.pop();
            let align = max_payload_align.max(4);
            let payload_off = roundup(4, max_payload_align);
            let size = roundup(payload_off + max_payload_size, align);
            Some(Layout::new(size, align))
        }
    }
}

/// Byte offset of a sum type's payload region (`roundup(4, max_payload_align)`,
/// `§3`/`§4.C`/`§8` "Sum payload" property).
pub fn sum_payload_offset(
    table: &TypeTable,
    variants: &[SumVariant],
    ptr_layout: Layout,
    bus: &mut DiagnosticBus,
) -> u64 {
    let mut max_align = 1u64;
    for v in variants {
        if let Some(ty) = v.ty {
            let mut visiting = Vec::new();
            if let Some(fl) = layout_of(table, ty, ptr_layout, bus, &mut visiting) {
                max_align = max_align.max(fl.align);
            }
        }
    }
    roundup(4, max_align)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticBus;

    fn ptr64() -> Layout {
        Layout::new(8, 8)
    }

    #[test]
    fn new_table_has_nine_builtin_prims() {
        let table = TypeTable::new();
        assert_eq!(table.next_id(), 9);
        assert!(matches!(table.get(TypeId::I32), Some(SirType::Prim(PrimKind::I32))));
        assert!(matches!(table.get(TypeId::VOID), Some(SirType::Prim(PrimKind::Void))));
        assert!(matches!(table.get(TypeId::BOOL), Some(SirType::Prim(PrimKind::Bool))));
    }

    #[test]
    fn bool_and_i1_share_layout() {
        let table = TypeTable::new();
        let mut bus = DiagnosticBus::new();
        let bool_l = layout_of(&table, TypeId::BOOL, ptr64(), &mut bus, &mut Vec::new()).unwrap();
        let i1_l = layout_of(&table, TypeId::I1, ptr64(), &mut bus, &mut Vec::new()).unwrap();
        assert_eq!(bool_l, i1_l);
        assert_eq!(bool_l, Layout::new(1, 1));
    }

    #[test]
    fn void_is_unsized() {
        let table = TypeTable::new();
        let mut bus = DiagnosticBus::new();
        assert!(layout_of(&table, TypeId::VOID, ptr64(), &mut bus, &mut Vec::new()).is_none());
        assert!(bus.has_errors());
    }

    #[test]
    fn array_of_zero_length_has_size_zero_and_element_align() {
        let mut table = TypeTable::new();
        table
            .insert(TypeId(10), SirType::Array { of: TypeId::I32, len: 0 })
            .unwrap();
        let mut bus = DiagnosticBus::new();
        let l = layout_of(&table, TypeId(10), ptr64(), &mut bus, &mut Vec::new()).unwrap();
        assert_eq!(l, Layout::new(0, 4));
    }

    #[test]
    fn array_of_i32_len4_is_16_bytes() {
        let mut table = TypeTable::new();
        table
            .insert(TypeId(10), SirType::Array { of: TypeId::I32, len: 4 })
            .unwrap();
        let mut bus = DiagnosticBus::new();
        let l = layout_of(&table, TypeId(10), ptr64(), &mut bus, &mut Vec::new()).unwrap();
        assert_eq!(l, Layout::new(16, 4));
    }

    #[test]
    fn struct_fields_padded_to_max_align() {
        let mut table = TypeTable::new();
        // { a: i8, b: i32 } -> offset 0 (a), pad to 4 (b), size 8, align 4
        table
            .insert(
                TypeId(20),
                SirType::Struct {
                    name: Some("S".into()),
                    fields: vec![
                        StructField { name: Some("a".into()), type_ref: TypeId::I8 },
                        StructField { name: Some("b".into()), type_ref: TypeId::I32 },
                    ],
                },
            )
            .unwrap();
        let mut bus = DiagnosticBus::new();
        let l = layout_of(&table, TypeId(20), ptr64(), &mut bus, &mut Vec::new()).unwrap();
        assert_eq!(l, Layout::new(8, 4));
        assert_eq!(table.get_by_name("S"), Some(TypeId(20)));
    }

    #[test]
    fn sum_payload_offset_and_align() {
        let mut table = TypeTable::new();
        table
            .insert(
                TypeId(30),
                SirType::Sum {
                    variants: vec![
                        SumVariant { name: Some("None".into()), ty: None },
                        SumVariant { name: Some("Some".into()), ty: Some(TypeId::I64) },
                    ],
                },
            )
            .unwrap();
        let mut bus = DiagnosticBus::new();
        let l = layout_of(&table, TypeId(30), ptr64(), &mut bus, &mut Vec::new()).unwrap();
        // max payload align = 8 (i64); type align = max(4,8) = 8
        // payload offset = roundup(4, 8) = 8; total = roundup(8+8, 8) = 16
        assert_eq!(l, Layout::new(16, 8));

        let off = sum_payload_offset(&table, &[
            SumVariant { name: Some("None".into()), ty: None },
            SumVariant { name: Some("Some".into()), ty: Some(TypeId::I64) },
        ], ptr64(), &mut DiagnosticBus::new());
        assert_eq!(off, 8);
    }

    #[test]
    fn fn_type_is_unsized_but_fun_is_pointer_sized() {
        let mut table = TypeTable::new();
        let fn_ty = table.next_id();
        table
            .insert(
                TypeId(fn_ty),
                SirType::Fn { params: vec![TypeId::I32], ret: TypeId::I32, varargs: false },
            )
            .unwrap();
        let fun_ty = fn_ty + 1;
        table
            .insert(TypeId(fun_ty), SirType::Fun { sig: TypeId(fn_ty) })
            .unwrap();

        let mut bus = DiagnosticBus::new();
        assert!(layout_of(&table, TypeId(fn_ty), ptr64(), &mut bus, &mut Vec::new()).is_none());
        let l = layout_of(&table, TypeId(fun_ty), ptr64(), &mut DiagnosticBus::new(), &mut Vec::new()).unwrap();
        assert_eq!(l, ptr64());
    }

    #[test]
    fn cyclic_struct_is_rejected() {
        let mut table = TypeTable::new();
        // struct S { next: S } -- field refers back to its own containing type.
        table
            .insert(
                TypeId(40),
                SirType::Struct {
                    name: Some("S".into()),
                    fields: vec![StructField { name: Some("next".into()), type_ref: TypeId(40) }],
                },
            )
            .unwrap();
        let mut bus = DiagnosticBus::new();
        assert!(layout_of(&table, TypeId(40), ptr64(), &mut bus, &mut Vec::new()).is_none());
        assert!(bus.has_errors());
    }

    #[test]
    fn vec_bool_is_byte_per_lane() {
        let mut table = TypeTable::new();
        table
            .insert(TypeId(50), SirType::Vec { lane: TypeId::BOOL, lanes: 4 })
            .unwrap();
        let mut bus = DiagnosticBus::new();
        let l = layout_of(&table, TypeId(50), ptr64(), &mut bus, &mut Vec::new()).unwrap();
        assert_eq!(l, Layout::new(4, 1));
    }

    #[test]
    fn roundup_rounds_to_next_multiple() {
        assert_eq!(roundup(0, 4), 0);
        assert_eq!(roundup(1, 4), 4);
        assert_eq!(roundup(4, 4), 4);
        assert_eq!(roundup(5, 8), 8);
    }
}
