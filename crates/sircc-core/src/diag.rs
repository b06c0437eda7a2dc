//! The diagnostic bus (component D).
//!
//! Every diagnostic carries a stable dotted code (e.g.
//! `sircc.cfg.block.term.missing`) and a human message (`§4.D`). A stack of
//! "about" frames attaches `{kind: "node"|"type", id, tag?}` context to each
//! diagnostic as it is emitted (`§9`: "Implement as a scoped guard that
//! pushes a context frame on entry and pops on exit, including error
//! paths"). Emission never aborts; diagnostics accumulate and the bus tracks
//! a program-wide exit code. Two emission modes are supported: one line of
//! text per diagnostic, and a JSON mode matching `§6`'s
//! `{k:"diag", code, message, about?}` record shape.

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, TypeId};

/// Context attached to a diagnostic: which node or type it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct About {
    pub kind: AboutKind,
    pub id: u32,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AboutKind {
    Node,
    Type,
}

impl About {
    pub fn node(id: NodeId) -> Self {
        About {
            kind: AboutKind::Node,
            id: id.0,
            tag: None,
        }
    }

    pub fn node_tagged(id: NodeId, tag: impl Into<String>) -> Self {
        About {
            kind: AboutKind::Node,
            id: id.0,
            tag: Some(tag.into()),
        }
    }

    pub fn ty(id: TypeId) -> Self {
        About {
            kind: AboutKind::Type,
            id: id.0,
            tag: None,
        }
    }
}

/// A single diagnostic record (`§6`: `{k:"diag", code, message, about?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub about: Option<About>,
}

/// Text vs. JSON emission mode (`§4.D`/`§6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagMode {
    Text,
    Json,
}

/// Accumulates diagnostics for one compilation unit and tracks a scoped
/// "about" context stack. Diagnostics never abort a pass; callers inspect
/// [`DiagnosticBus::has_errors`] after a pass completes to decide whether to
/// continue to the next stage (`§7`: "lowering stops on first error per
/// function" is enforced by the caller, not the bus itself).
#[derive(Debug, Default)]
pub struct DiagnosticBus {
    diags: Vec<Diagnostic>,
    about_stack: Vec<About>,
    producer: String,
}

/// RAII guard pushing an "about" frame on construction and popping it on
/// drop -- including on unwind/early-return paths (`§9`).
pub struct AboutGuard<'a> {
    bus: &'a mut DiagnosticBus,
}

impl Drop for AboutGuard<'_> {
    fn drop(&mut self) {
        self.bus.about_stack.pop();
    }
}

impl DiagnosticBus {
    pub fn new() -> Self {
        DiagnosticBus {
            diags: Vec::new(),
            about_stack: Vec::new(),
            producer: "sircc".to_string(),
        }
    }

    pub fn with_producer(producer: impl Into<String>) -> Self {
        DiagnosticBus {
            diags: Vec::new(),
            about_stack: Vec::new(),
            producer: producer.into(),
        }
    }

    /// Pushes an "about" context frame; pops automatically when the returned
    /// guard is dropped.
    pub fn about(&mut self, about: About) -> AboutGuard<'_> {
        self.about_stack.push(about);
        AboutGuard { bus: self }
    }

    /// Emits a diagnostic. `explicit_about`, if given, overrides the current
    /// top-of-stack "about" frame; otherwise the innermost pushed frame (if
    /// any) is attached.
    pub fn emit(&mut self, code: &str, message: String, explicit_about: Option<About>) {
        let about = explicit_about.or_else(|| self.about_stack.last().cloned());
        tracing::warn!(code, message = %message, "diagnostic emitted");
        self.diags.push(Diagnostic {
            code: code.to_string(),
            message,
            about,
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.diags.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// `0` on success, `1` if any diagnostic was emitted (`§6` "Exit codes").
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() {
            1
        } else {
            0
        }
    }

    /// Renders all diagnostics in the requested mode.
    pub fn render(&self, mode: DiagMode) -> String {
        match mode {
            DiagMode::Text => self
                .diags
                .iter()
                .map(|d| format!("{}: {}", self.producer, d.message))
                .collect::<Vec<_>>()
                .join("\n"),
            DiagMode::Json => self
                .diags
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "k": "diag",
                        "code": d.code,
                        "message": d.message,
                        "about": d.about,
                    })
                    .to_string()
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bus_has_no_errors() {
        let bus = DiagnosticBus::new();
        assert!(!bus.has_errors());
        assert_eq!(bus.exit_code(), 0);
    }

    #[test]
    fn emit_bumps_exit_code() {
        let mut bus = DiagnosticBus::new();
        bus.emit("sircc.cfg.block.term.missing", "no terminator".into(), None);
        assert!(bus.has_errors());
        assert_eq!(bus.exit_code(), 1);
    }

    #[test]
    fn about_guard_attaches_and_pops_context() {
        let mut bus = DiagnosticBus::new();
        {
            let _g = bus.about(About::node(NodeId(7)));
            bus.emit("sircc.feature.gate", "simd not enabled".into(), None);
        }
        bus.emit("sircc.oom", "alloc failed".into(), None);

        assert_eq!(bus.diagnostics()[0].about, Some(About::node(NodeId(7))));
        assert_eq!(bus.diagnostics()[1].about, None);
    }

    #[test]
    fn nested_about_guards_restore_outer_frame() {
        let mut bus = DiagnosticBus::new();
        let _outer = bus.about(About::node(NodeId(1)));
        {
            let _inner = bus.about(About::ty(TypeId(2)));
            bus.emit("sircc.type.cycle", "cycle".into(), None);
        }
        bus.emit("sircc.oom", "oom".into(), None);
        assert_eq!(bus.diagnostics()[0].about, Some(About::ty(TypeId(2))));
        assert_eq!(bus.diagnostics()[1].about, Some(About::node(NodeId(1))));
    }

    #[test]
    fn text_mode_renders_one_line_per_diagnostic() {
        let mut bus = DiagnosticBus::with_producer("sircc");
        bus.emit("sircc.oom", "out of memory".into(), None);
        bus.emit("sircc.feature.gate", "missing feature".into(), None);
        let text = bus.render(DiagMode::Text);
        assert_eq!(text, "sircc: out of memory\nsircc: missing feature");
    }

    #[test]
    fn json_mode_renders_diag_records() {
        let mut bus = DiagnosticBus::new();
        bus.emit("sircc.oom", "oom".into(), Some(About::node(NodeId(3))));
        let json = bus.render(DiagMode::Json);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["k"], "diag");
        assert_eq!(parsed["code"], "sircc.oom");
        assert_eq!(parsed["about"]["id"], 3);
    }
}
