//! System linker integration for producing executables from object files.
//!
//! Links the native object file produced by [`crate::compiler::compile`]
//! into a standalone executable using the system `cc` command directly,
//! rather than shelling out to a separate build system (`§1`:
//! native-object output is in scope even though "linking and runtime
//! packaging" beyond that is not).

use std::path::Path;
use std::process::Command;

use crate::error::CodegenError;

/// Invokes `cc` to link `object_path` into an executable at `output_path`.
/// `debug_symbols` passes `-g` through so the binary retains them.
pub fn link_executable(object_path: &Path, output_path: &Path, debug_symbols: bool) -> Result<(), CodegenError> {
    let mut cmd = Command::new("cc");
    cmd.arg(object_path).arg("-o").arg(output_path);
    if debug_symbols {
        cmd.arg("-g");
    }
    tracing::debug!(?object_path, ?output_path, "invoking system linker");

    let output = cmd.output()?;
    if !output.status.success() {
        return Err(CodegenError::LinkerFailed(format!(
            "cc exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
