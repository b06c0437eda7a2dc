//! Target query (component J, `§4.J`): resolving a triple against the LLVM
//! backend and reconciling it with any ABI fields a producer declared
//! explicitly.
//!
//! Backend target initialization is process-global and idempotent in LLVM,
//! but inkwell's `Target::initialize_all`/`initialize_native` are not
//! reentrant-safe to call from multiple threads at once, so it is gated
//! behind a [`std::sync::Once`].

use std::sync::Once;

use inkwell::targets::{CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple};
use inkwell::OptimizationLevel;

use sircc_core::{DiagnosticBus, Endian, TargetInfo};

use crate::error::CodegenError;

static INIT: Once = Once::new();

fn ensure_backend_initialized(native_only: bool) {
    INIT.call_once(|| {
        if native_only {
            Target::initialize_native(&InitializationConfig::default())
                .expect("failed to initialize native LLVM target");
        } else {
            Target::initialize_all(&InitializationConfig::default());
        }
    });
}

/// Resolves `triple` (or the host triple when `None`) against the LLVM
/// backend and reconciles the result with `declared` (`§4.B`'s parsed
/// `TargetInfo`, with `overridden` recording which fields the producer
/// pinned). Returns the reconciled [`TargetInfo`] with unset fields adopted
/// from the backend; emits a diagnostic and returns `Err(())` on an ABI
/// mismatch.
pub fn query_target(
    triple: Option<&str>,
    declared: &TargetInfo,
    bus: &mut DiagnosticBus,
) -> Result<TargetInfo, ()> {
    ensure_backend_initialized(triple.is_none());

    let llvm_triple = match triple {
        Some(t) => TargetTriple::create(t),
        None => TargetMachine::get_default_triple(),
    };

    let target = match Target::from_triple(&llvm_triple) {
        Ok(t) => t,
        Err(e) => {
            bus.emit(
                "sircc.target.unresolved",
                format!("target triple {:?} could not be resolved: {}", llvm_triple, e),
                None,
            );
            return Err(());
        }
    };

    let machine = match target.create_target_machine(
        &llvm_triple,
        "generic",
        "",
        OptimizationLevel::None,
        RelocMode::Default,
        CodeModel::Default,
    ) {
        Some(m) => m,
        None => {
            bus.emit(
                "sircc.target.unresolved",
                "failed to create a target machine for the requested triple".to_string(),
                None,
            );
            return Err(());
        }
    };

    let data_layout = machine.get_target_data();
    let ptr_bits = data_layout.get_pointer_byte_size(None) * 8;
    let endian = match data_layout.get_byte_order() {
        inkwell::targets::ByteOrdering::BigEndian => Endian::Big,
        inkwell::targets::ByteOrdering::LittleEndian => Endian::Little,
    };
    let scratch_ctx = inkwell::context::Context::create();
    let int_align = data_layout.get_abi_alignment(&scratch_ctx.i32_type());
    let float_align = data_layout.get_abi_alignment(&scratch_ctx.f64_type());

    let mut reconciled = declared.clone();

    check_override(
        bus,
        declared.overridden.ptr_bits,
        "sircc.target.abi.mismatch",
        "ptrBits",
        declared.ptr_bits.map(|v| v as i64),
        Some(ptr_bits as i64),
    )?;
    reconciled.ptr_bits = Some(declared.ptr_bits.unwrap_or(ptr_bits));

    if declared.overridden.endian {
        if declared.endian != Some(endian) {
            bus.emit(
                "sircc.target.abi.mismatch",
                format!(
                    "declared endian {:?} does not match backend endian {:?}",
                    declared.endian, endian
                ),
                None,
            );
            return Err(());
        }
    }
    reconciled.endian = Some(declared.endian.unwrap_or(endian));

    check_override(
        bus,
        declared.overridden.int_align,
        "sircc.target.abi.mismatch",
        "intAlign",
        declared.int_align.map(|v| v as i64),
        Some(int_align as i64),
    )?;
    reconciled.int_align = Some(declared.int_align.unwrap_or(int_align));

    check_override(
        bus,
        declared.overridden.float_align,
        "sircc.target.abi.mismatch",
        "floatAlign",
        declared.float_align.map(|v| v as i64),
        Some(float_align as i64),
    )?;
    reconciled.float_align = Some(declared.float_align.unwrap_or(float_align));

    if declared.overridden.struct_align {
        match declared.struct_align.as_deref() {
            Some("max") => {}
            other => {
                bus.emit(
                    "sircc.target.struct_align.unsupported",
                    format!("structAlign {:?} is not supported (only \"max\" is)", other),
                    None,
                );
                return Err(());
            }
        }
    }
    reconciled.struct_align = Some(declared.struct_align.clone().unwrap_or_else(|| "max".to_string()));
    reconciled.triple = Some(llvm_triple.as_str().to_string_lossy().to_string());

    Ok(reconciled)
}

fn check_override(
    bus: &mut DiagnosticBus,
    is_overridden: bool,
    code: &str,
    field: &str,
    declared: Option<i64>,
    backend: Option<i64>,
) -> Result<(), ()> {
    if is_overridden && declared != backend {
        bus.emit(
            code,
            format!(
                "declared {} {:?} does not match backend value {:?}",
                field, declared, backend
            ),
            None,
        );
        return Err(());
    }
    Ok(())
}

/// Creates a host-native target machine for quick, ABI-agnostic IR
/// emission ([`crate::compiler::compile_to_ir`] does not need full ABI
/// reconciliation).
pub fn host_target_machine() -> Result<TargetMachine, CodegenError> {
    ensure_backend_initialized(true);
    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple)
        .map_err(|e| CodegenError::Target(format!("failed to resolve host triple: {}", e)))?;
    target
        .create_target_machine(
            &triple,
            "generic",
            "",
            OptimizationLevel::None,
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| CodegenError::Target("failed to create host target machine".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_abi_fields_are_adopted_from_backend() {
        let mut bus = DiagnosticBus::new();
        let declared = TargetInfo::default();
        let resolved = query_target(None, &declared, &mut bus).unwrap();
        assert!(resolved.ptr_bits.is_some());
        assert!(resolved.endian.is_some());
        assert_eq!(resolved.struct_align.as_deref(), Some("max"));
        assert!(!bus.has_errors());
    }

    #[test]
    fn struct_align_other_than_max_is_rejected() {
        let mut bus = DiagnosticBus::new();
        let mut declared = TargetInfo::default();
        declared.struct_align = Some("packed".to_string());
        declared.overridden.struct_align = true;
        let result = query_target(None, &declared, &mut bus);
        assert!(result.is_err());
        assert!(bus.has_errors());
    }

    #[test]
    fn mismatched_declared_ptr_bits_is_rejected() {
        let mut bus = DiagnosticBus::new();
        let mut declared = TargetInfo::default();
        declared.ptr_bits = Some(16);
        declared.overridden.ptr_bits = true;
        let result = query_target(None, &declared, &mut bus);
        assert!(result.is_err());
        assert!(bus.has_errors());
    }
}
