//! JSON-Lines parser and arena (component A).
//!
//! Input is a sequence of newline-delimited JSON objects. The parser
//! produces tagged values (`null`, `bool`, `integer`, `string`, `array`,
//! `object`), with objects stored as a flat, linearly-scanned key/value list
//! rather than a hash map (`§4.A`: "Object access is by key linear scan
//! (objects are small)"). Every parsed line is placed in a per-program
//! [`Arena`] which owns it for the program's lifetime (`§9` "Arena
//! ownership"); no value is freed individually.
//!
//! Modeled as owned data (`String`/`Vec` trees) rather than a literal
//! bump-pointer allocator: no arena/bump-allocation crate (`bumpalo`,
//! `typed-arena`, `id-arena`) is part of this workspace's dependency stack,
//! and hand-rolling unsafe pointer arithmetic to imitate one would not be
//! idiomatic Rust. `Arena` still gives the single-owner, freed-all-at-once
//! semantics `§9` calls for: one `Vec` per program, indexed by line number,
//! dropped as a unit when the program is freed.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A parsed JSON-Lines record. Strings and containers are owned rather than
/// borrowed/lifetime-generic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonValue {
    Null,
    Bool(bool),
    /// Numbers decode to signed 64-bit (`§4.A`: "Numbers are decoded to
    /// signed 64-bit; numeric overflow is reported with a stable code").
    Integer(i64),
    String(String),
    Array(Vec<JsonValue>),
    /// Linear-scan key/value pairs, matching `JsonObject`'s `JsonObjectItem[]`.
    Object(Vec<(String, JsonValue)>),
}

impl JsonValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[JsonValue]> {
        match self {
            JsonValue::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, JsonValue::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, JsonValue::Array(_))
    }

    /// Key lookup by linear scan, matching `json_obj_get`.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            JsonValue::Object(items) => items.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Matches `json_obj_has_only_keys`: verifies every key in the object is
    /// in the allowed set, returning the first offending key.
    pub fn has_only_keys(&self, allowed: &[&str]) -> Result<(), String> {
        if let JsonValue::Object(items) = self {
            for (k, _) in items {
                if !allowed.contains(&k.as_str()) {
                    return Err(k.clone());
                }
            }
        }
        Ok(())
    }
}

/// A syntax error encountered while parsing one line, with a byte offset
/// into that line (mirrors `JsonError{offset, msg}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonError {
    pub line: usize,
    pub offset: usize,
    pub msg: String,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, offset {}: {}", self.line, self.offset, self.msg)
    }
}

impl std::error::Error for JsonError {}

/// Owns every parsed line's value for the program's lifetime. Values are not
/// freed individually; the whole arena is dropped at once at program end
/// (`§9` "Arena ownership").
#[derive(Debug, Default)]
pub struct Arena {
    records: Vec<JsonValue>,
}

impl Arena {
    pub fn new() -> Self {
        Arena { records: Vec::new() }
    }

    /// Parses `input` as newline-delimited JSON, storing each successfully
    /// parsed line in the arena. Blank lines are skipped. Returns the arena
    /// indices of the parsed records in line order, or the first parse error
    /// encountered (parsing does not continue past the first malformed
    /// line -- line-level recovery is a validator-level concern, `§7`).
    pub fn parse_lines(&mut self, input: &str) -> Result<Vec<usize>, JsonError> {
        let mut indices = Vec::new();
        for (line_no, line) in input.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value = parse_one(trimmed).map_err(|(offset, msg)| JsonError {
                line: line_no + 1,
                offset,
                msg,
            })?;
            let idx = self.records.len();
            self.records.push(value);
            indices.push(idx);
        }
        Ok(indices)
    }

    pub fn get(&self, idx: usize) -> Option<&JsonValue> {
        self.records.get(idx)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parses a single JSON value from a trimmed line, delegating to
/// `serde_json`'s tokenizer for the character-level grammar (no wheel
/// reinvention of a JSON lexer; see `DESIGN.md` for why the arena's *shape*
/// -- tagged enum, linear-scan objects -- is still hand-grounded on the
/// original `json.h` rather than adopting `serde_json::Value` directly) and
/// re-expressing the result as our own tagged [`JsonValue`].
fn parse_one(line: &str) -> Result<JsonValue, (usize, String)> {
    let raw: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        (
            e.column(),
            format!("malformed json: {e}"),
        )
    })?;
    from_serde(raw).map_err(|msg| (0, msg))
}

fn from_serde(v: serde_json::Value) -> Result<JsonValue, String> {
    Ok(match v {
        serde_json::Value::Null => JsonValue::Null,
        serde_json::Value::Bool(b) => JsonValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::Integer(i)
            } else {
                return Err(format!("numeric overflow: {n} does not fit in i64"));
            }
        }
        serde_json::Value::String(s) => {
            if s.contains('\0') {
                return Err("string contains embedded NUL".to_string());
            }
            JsonValue::String(s)
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_serde(item)?);
            }
            JsonValue::Array(out)
        }
        serde_json::Value::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map {
                out.push((k, from_serde(v)?));
            }
            JsonValue::Object(out)
        }
    })
}

/// Converts an arena [`JsonValue`] into a `serde_json::Value`. Used when
/// handing a node's free-form `fields` object to downstream passes
/// (validator, lowering, codegen, ZASM): those already depend on
/// `serde_json` pervasively, so re-deriving a parallel accessor API over our
/// own tagged enum purely to avoid it would duplicate, not replace, the
/// ecosystem crate.
pub fn to_serde_json(v: &JsonValue) -> serde_json::Value {
    match v {
        JsonValue::Null => serde_json::Value::Null,
        JsonValue::Bool(b) => serde_json::Value::Bool(*b),
        JsonValue::Integer(i) => serde_json::Value::Number((*i).into()),
        JsonValue::String(s) => serde_json::Value::String(s.clone()),
        JsonValue::Array(items) => serde_json::Value::Array(items.iter().map(to_serde_json).collect()),
        JsonValue::Object(items) => serde_json::Value::Object(
            items
                .iter()
                .map(|(k, v)| (k.clone(), to_serde_json(v)))
                .collect(),
        ),
    }
}

/// Convenience: parse a whole JSON-Lines input into a fresh arena, bailing
/// out as a [`CoreError`] on the first malformed record.
pub fn parse_program(input: &str) -> Result<(Arena, Vec<usize>), CoreError> {
    let mut arena = Arena::new();
    let indices = arena.parse_lines(input).map_err(|e| CoreError::MalformedRecord {
        kind: "json-line",
        line: e.line,
        reason: e.msg,
    })?;
    Ok((arena, indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_lines_in_order() {
        let input = "{\"ir\":\"sir-v1.0\",\"k\":\"meta\"}\n{\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":0}\n";
        let (arena, indices) = parse_program(input).unwrap();
        assert_eq!(indices.len(), 2);
        assert!(arena.get(indices[0]).unwrap().get("k").unwrap().as_str() == Some("meta"));
        assert!(arena.get(indices[1]).unwrap().get("id").unwrap().as_i64() == Some(0));
    }

    #[test]
    fn skips_blank_lines() {
        let input = "{\"k\":\"meta\"}\n\n   \n{\"k\":\"type\"}\n";
        let (_arena, indices) = parse_program(input).unwrap();
        assert_eq!(indices.len(), 2);
    }

    #[test]
    fn rejects_malformed_line() {
        let input = "{\"k\":\"meta\"\n";
        let err = parse_program(input).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[test]
    fn rejects_embedded_nul_in_string() {
        let input = "{\"k\":\"meta\",\"producer\":\"a\u{0}b\"}\n";
        let err = parse_program(input).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[test]
    fn object_get_is_linear_scan_by_key() {
        let obj = JsonValue::Object(vec![
            ("id".to_string(), JsonValue::Integer(1)),
            ("name".to_string(), JsonValue::String("x".to_string())),
        ]);
        assert_eq!(obj.get("name").unwrap().as_str(), Some("x"));
        assert!(obj.get("missing").is_none());
    }

    #[test]
    fn has_only_keys_reports_first_bad_key() {
        let obj = JsonValue::Object(vec![
            ("id".to_string(), JsonValue::Integer(1)),
            ("bogus".to_string(), JsonValue::Integer(2)),
        ]);
        let result = obj.has_only_keys(&["id", "name"]);
        assert_eq!(result, Err("bogus".to_string()));
    }

    #[test]
    fn numeric_overflow_is_rejected() {
        let input = "{\"k\":\"node\",\"value\":99999999999999999999}\n";
        let err = parse_program(input).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }
}
