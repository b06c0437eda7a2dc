//! Host ABI declarations shared by every compiled module.
//!
//! SIR itself never names libc -- a program that wants `printf` or `exit`
//! expresses that as a `decl.fn`/`ptr.sym` symbol and calls it like any
//! other function (`§3` "Symbols", `§4.G` "Entry"). The one exception is
//! `llvm.trap`, which [`crate::codegen::emit_trap_unless`] forward-declares
//! lazily at its call site. This module exists for the one thing every
//! compiled module needs regardless of what the program declares: process
//! exit semantics for the `main` wrapper ([`declare_exit`]).

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::FunctionValue;

/// Forward-declares libc's `exit(i32) -> void`, used by the `main` wrapper
/// to terminate the process with the entry function's return value as the
/// exit code when the entry function itself is not named `main`.
pub fn declare_exit<'ctx>(context: &'ctx Context, module: &Module<'ctx>) -> FunctionValue<'ctx> {
    if let Some(existing) = module.get_function("exit") {
        return existing;
    }
    let fn_type = context.void_type().fn_type(&[context.i32_type().into()], false);
    module.add_function("exit", fn_type, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_exit_is_idempotent() {
        let context = Context::create();
        let module = context.create_module("test");
        let a = declare_exit(&context, &module);
        let b = declare_exit(&context, &module);
        assert_eq!(a.get_name(), b.get_name());
        assert_eq!(module.get_functions().count(), 1);
    }
}
