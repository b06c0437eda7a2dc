//! Mapping from SIR types to LLVM IR types via inkwell.
//!
//! The [`sir_type_to_llvm`] function converts a [`TypeId`] into an inkwell
//! [`BasicTypeEnum`] by looking up the type in the program's [`TypeTable`]
//! and recursively building LLVM types for compound kinds (array, struct,
//! closure, sum, vec). `fn` is unsized in SIR (`§3`: "not a function
//! pointer") and only appears as the `sig` of a `fun`, so it has no direct
//! LLVM counterpart; `fun`/`ptr` both map to an opaque pointer.

use inkwell::context::Context;
use inkwell::types::{BasicType, BasicTypeEnum};
use inkwell::AddressSpace;

use sircc_core::{PrimKind, SirType, TypeId, TypeTable};

use crate::error::CodegenError;

/// Convert a SIR [`TypeId`] to an LLVM [`BasicTypeEnum`].
///
/// - `prim`: scalars map directly to LLVM primitives; `i1`/`bool` both map
///   to `i1` (`§3`: "denote the same domain").
/// - `void` has no LLVM value representation and is an error here; callers
///   that need to distinguish a void return type check for it before
///   calling this function.
/// - `ptr`/`fun`: an opaque pointer (`§3`/`§4.C`).
/// - `array`: recursively mapped element type, fixed LLVM array.
/// - `struct`: recursively mapped field types, LLVM struct (no padding --
///   inkwell's packed-or-not struct layout is not used; SIR's own `§3`
///   layout rules are authoritative and are applied at `load`/`store`/GEP
///   sites, not delegated to LLVM's struct layout).
/// - `closure`: `{code_ptr, env}` (`§3`).
/// - `vec`: an LLVM vector type of the lane's scalar type.
/// - `sum`: `{ i32 tag, [N x i8] payload }`, mirroring the tagged-union
///   shape `§3` specifies, with `N` the max payload size.
/// - `fn`: unsized, an error if asked for directly.
pub fn sir_type_to_llvm<'ctx>(
    context: &'ctx Context,
    type_id: TypeId,
    table: &TypeTable,
) -> Result<BasicTypeEnum<'ctx>, CodegenError> {
    let ty = table
        .get(type_id)
        .ok_or_else(|| CodegenError::TypeMapping(format!("type {} not found", type_id.0)))?;

    match ty {
        SirType::Prim(prim) => prim_to_llvm(context, *prim),
        SirType::Ptr { .. } => Ok(context.ptr_type(AddressSpace::default()).into()),
        SirType::Fun { .. } => Ok(context.ptr_type(AddressSpace::default()).into()),
        SirType::Array { of, len } => {
            let elem_ty = sir_type_to_llvm(context, *of, table)?;
            Ok(elem_ty.array_type(*len as u32).into())
        }
        SirType::Struct { fields, .. } => {
            let field_tys: Vec<BasicTypeEnum<'ctx>> = fields
                .iter()
                .map(|f| sir_type_to_llvm(context, f.type_ref, table))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(context.struct_type(&field_tys, false).into())
        }
        SirType::Closure { env_ty, .. } => {
            let env_llvm = sir_type_to_llvm(context, *env_ty, table)?;
            Ok(context
                .struct_type(
                    &[context.ptr_type(AddressSpace::default()).into(), env_llvm],
                    false,
                )
                .into())
        }
        SirType::Vec { lane, lanes } => {
            let lane_ty = sir_type_to_llvm(context, *lane, table)?;
            let vec_ty = match lane_ty {
                BasicTypeEnum::IntType(t) => t.vec_type(*lanes),
                BasicTypeEnum::FloatType(t) => t.vec_type(*lanes),
                other => {
                    return Err(CodegenError::TypeMapping(format!(
                        "vec lane type {:?} is not a scalar",
                        other
                    )))
                }
            };
            Ok(vec_ty.into())
        }
        SirType::Sum { variants } => {
            let max_payload = max_payload_size(context, variants, table)?;
            let tag_ty = context.i32_type();
            if max_payload > 0 {
                Ok(context
                    .struct_type(
                        &[tag_ty.into(), context.i8_type().array_type(max_payload).into()],
                        false,
                    )
                    .into())
            } else {
                Ok(context.struct_type(&[tag_ty.into()], false).into())
            }
        }
        SirType::Fn { .. } => Err(CodegenError::TypeMapping(
            "fn type is unsized and has no LLVM value representation".to_string(),
        )),
    }
}

fn prim_to_llvm<'ctx>(
    context: &'ctx Context,
    prim: PrimKind,
) -> Result<BasicTypeEnum<'ctx>, CodegenError> {
    Ok(match prim {
        PrimKind::I1 | PrimKind::Bool => context.bool_type().into(),
        PrimKind::I8 => context.i8_type().into(),
        PrimKind::I16 => context.i16_type().into(),
        PrimKind::I32 => context.i32_type().into(),
        PrimKind::I64 => context.i64_type().into(),
        PrimKind::F32 => context.f32_type().into(),
        PrimKind::F64 => context.f64_type().into(),
        PrimKind::Void => {
            return Err(CodegenError::TypeMapping(
                "void has no LLVM value representation".to_string(),
            ))
        }
    })
}

/// Byte size of the largest variant payload, used to size a `sum` type's
/// payload array. Mirrors the layout engine's own walk
/// ([`sircc_core::layout_of`]) but in terms of LLVM type sizes, since a
/// variant's LLVM shape may not exist yet when the sum type itself is
/// being built.
fn max_payload_size(
    context: &Context,
    variants: &[sircc_core::SumVariant],
    table: &TypeTable,
) -> Result<u32, CodegenError> {
    let mut max = 0u32;
    for v in variants {
        if let Some(ty) = v.ty {
            let llvm_ty = sir_type_to_llvm(context, ty, table)?;
            max = max.max(llvm_type_size_bytes(context, llvm_ty));
        }
    }
    Ok(max)
}

fn llvm_type_size_bytes(context: &Context, ty: BasicTypeEnum<'_>) -> u32 {
    match ty {
        BasicTypeEnum::IntType(t) => t.get_bit_width().div_ceil(8),
        BasicTypeEnum::FloatType(t) => {
            if t == context.f32_type() {
                4
            } else {
                8
            }
        }
        BasicTypeEnum::PointerType(_) => 8,
        BasicTypeEnum::ArrayType(t) => {
            llvm_type_size_bytes(context, t.get_element_type()) * t.len()
        }
        BasicTypeEnum::StructType(t) => (0..t.count_fields())
            .map(|i| llvm_type_size_bytes(context, t.get_field_type_at_index(i).unwrap()))
            .sum(),
        BasicTypeEnum::VectorType(_) | BasicTypeEnum::ScalableVectorType(_) => 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::{StructField, SumVariant};

    #[test]
    fn scalar_i32_maps_to_i32() {
        let context = Context::create();
        let table = TypeTable::new();
        let ty = sir_type_to_llvm(&context, TypeId::I32, &table).unwrap();
        assert_eq!(ty.into_int_type().get_bit_width(), 32);
    }

    #[test]
    fn bool_and_i1_both_map_to_i1() {
        let context = Context::create();
        let table = TypeTable::new();
        let b = sir_type_to_llvm(&context, TypeId::BOOL, &table).unwrap();
        let i1 = sir_type_to_llvm(&context, TypeId::I1, &table).unwrap();
        assert_eq!(b.into_int_type().get_bit_width(), 1);
        assert_eq!(i1.into_int_type().get_bit_width(), 1);
    }

    #[test]
    fn void_is_a_type_mapping_error() {
        let context = Context::create();
        let table = TypeTable::new();
        let err = sir_type_to_llvm(&context, TypeId::VOID, &table).unwrap_err();
        assert!(matches!(err, CodegenError::TypeMapping(_)));
    }

    #[test]
    fn ptr_is_opaque_pointer() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table.insert(TypeId(10), SirType::Ptr { of: TypeId::I32 }).unwrap();
        let ty = sir_type_to_llvm(&context, TypeId(10), &table).unwrap();
        assert!(ty.is_pointer_type());
    }

    #[test]
    fn array_of_i32_len4() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table
            .insert(TypeId(10), SirType::Array { of: TypeId::I32, len: 4 })
            .unwrap();
        let ty = sir_type_to_llvm(&context, TypeId(10), &table).unwrap();
        let arr = ty.into_array_type();
        assert_eq!(arr.len(), 4);
    }

    #[test]
    fn struct_two_fields() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table
            .insert(
                TypeId(20),
                SirType::Struct {
                    name: Some("Point".into()),
                    fields: vec![
                        StructField { name: Some("x".into()), type_ref: TypeId::F64 },
                        StructField { name: Some("y".into()), type_ref: TypeId::F64 },
                    ],
                },
            )
            .unwrap();
        let ty = sir_type_to_llvm(&context, TypeId(20), &table).unwrap();
        assert_eq!(ty.into_struct_type().count_fields(), 2);
    }

    #[test]
    fn sum_with_payload_has_tag_and_payload_fields() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table
            .insert(
                TypeId(30),
                SirType::Sum {
                    variants: vec![
                        SumVariant { name: Some("none".into()), ty: None },
                        SumVariant { name: Some("some".into()), ty: Some(TypeId::I64) },
                    ],
                },
            )
            .unwrap();
        let ty = sir_type_to_llvm(&context, TypeId(30), &table).unwrap();
        let st = ty.into_struct_type();
        assert_eq!(st.count_fields(), 2);
    }

    #[test]
    fn sum_all_unit_variants_has_only_tag() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table
            .insert(
                TypeId(31),
                SirType::Sum {
                    variants: vec![
                        SumVariant { name: Some("a".into()), ty: None },
                        SumVariant { name: Some("b".into()), ty: None },
                    ],
                },
            )
            .unwrap();
        let ty = sir_type_to_llvm(&context, TypeId(31), &table).unwrap();
        assert_eq!(ty.into_struct_type().count_fields(), 1);
    }

    #[test]
    fn vec_of_i32_lanes4() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table
            .insert(TypeId(40), SirType::Vec { lane: TypeId::I32, lanes: 4 })
            .unwrap();
        let ty = sir_type_to_llvm(&context, TypeId(40), &table).unwrap();
        assert!(ty.is_vector_type());
        assert_eq!(ty.into_vector_type().get_size(), 4);
    }

    #[test]
    fn fn_type_is_unsized() {
        let context = Context::create();
        let mut table = TypeTable::new();
        table
            .insert(
                TypeId(50),
                SirType::Fn { params: vec![TypeId::I32], ret: TypeId::I32, varargs: false },
            )
            .unwrap();
        let err = sir_type_to_llvm(&context, TypeId(50), &table).unwrap_err();
        assert!(matches!(err, CodegenError::TypeMapping(_)));
    }

    #[test]
    fn unknown_type_id_is_an_error() {
        let context = Context::create();
        let table = TypeTable::new();
        assert!(sir_type_to_llvm(&context, TypeId(999), &table).is_err());
    }
}
