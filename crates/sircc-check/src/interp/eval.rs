//! Per-tag evaluation logic for the semantic evaluator.
//!
//! A dotted-tag dispatch over [`NodeRecord`] (`§3`/`§4.G`) for value-producing
//! ops. Control-flow tags (`term.*`, `return`, `sem.if`/`sem.and_sc`/
//! `sem.or_sc`) are evaluated by [`super::state`] directly, since they need
//! the block-walking state machine rather than a single node's fields.
//!
//! Binary/unary operand fields are read as `a`/`b`/`x` (refs); this is a
//! naming choice not spelled out by the node-field schema for arithmetic
//! tags (only memory and control tags name their fields explicitly).

use sircc_core::node::{int_width_of_tag, Ref};
use sircc_core::{NodeId, NodeRecord};

use super::error::RuntimeError;
use super::value::Value;

/// Evaluates a single non-control node given its already-evaluated operand
/// values (looked up by the caller and passed in by ref name). Returns
/// `Ok(None)` for tags this evaluator does not produce a value for (callers
/// should not reach this for terminators/structural tags).
pub fn eval_node(
    node: &NodeRecord,
    operand: impl Fn(&str) -> Result<Value, RuntimeError>,
) -> Result<Option<Value>, RuntimeError> {
    let tag = node.tag.as_str();
    let id = node.id;

    if let Some(v) = eval_terminal(node, id)? {
        return Ok(Some(v));
    }
    if let Some(width) = int_width_of_tag(tag) {
        return eval_int_op(tag, width, node, id, &operand).map(Some);
    }
    if tag.starts_with("f32.") || tag.starts_with("f64.") {
        return eval_float_op(tag, node, id, &operand).map(Some);
    }
    if let Some(rest) = tag.strip_prefix("bool.") {
        return eval_bool_op(rest, id, &operand).map(Some);
    }
    if tag == "select" {
        let c = operand("cond")?;
        let t = operand("t")?;
        let e = operand("e")?;
        let cond = c.as_bool().ok_or_else(|| RuntimeError::TypeMismatch {
            node: id,
            expected: "bool".into(),
            got: c.type_name().into(),
        })?;
        return Ok(Some(if cond { t } else { e }));
    }

    Err(RuntimeError::UnsupportedTag {
        node: id,
        tag: tag.to_string(),
    })
}

fn eval_terminal(node: &NodeRecord, id: NodeId) -> Result<Option<Value>, RuntimeError> {
    match node.tag.as_str() {
        "const.i8" => Ok(Some(Value::I8(require_i64(node, id, "value")? as i8))),
        "const.i16" => Ok(Some(Value::I16(require_i64(node, id, "value")? as i16))),
        "const.i32" => Ok(Some(Value::I32(require_i64(node, id, "value")? as i32))),
        "const.i64" => Ok(Some(Value::I64(require_i64(node, id, "value")?))),
        "const.f32" => {
            let bits = require_hex_bits(node, id)? as u32;
            Ok(Some(Value::F32(f32::from_bits(bits))))
        }
        "const.f64" => {
            let bits = require_hex_bits(node, id)?;
            Ok(Some(Value::F64(f64::from_bits(bits))))
        }
        _ => Ok(None),
    }
}

fn require_i64(node: &NodeRecord, id: NodeId, field: &'static str) -> Result<i64, RuntimeError> {
    node.field_i64(field).ok_or(RuntimeError::MissingField { node: id, field })
}

fn require_hex_bits(node: &NodeRecord, id: NodeId) -> Result<u64, RuntimeError> {
    let s = node
        .field_str("bits")
        .ok_or(RuntimeError::MissingField { node: id, field: "bits" })?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|_| RuntimeError::MissingField { node: id, field: "bits" })
}

fn eval_int_op(
    tag: &str,
    width: u32,
    node: &NodeRecord,
    id: NodeId,
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    let op = tag.splitn(2, '.').nth(1).unwrap_or("");
    let mask = |v: i64| -> i64 { Value::from_i64_width(v, width).as_i64().unwrap() };

    match op {
        "add" => binop_i(operand, id, |a, b| mask(a.wrapping_add(b)), width),
        "sub" => binop_i(operand, id, |a, b| mask(a.wrapping_sub(b)), width),
        "mul" => binop_i(operand, id, |a, b| mask(a.wrapping_mul(b)), width),
        "and" => binop_i(operand, id, |a, b| mask(a & b), width),
        "or" => binop_i(operand, id, |a, b| mask(a | b), width),
        "xor" => binop_i(operand, id, |a, b| mask(a ^ b), width),
        "not" => unop_i(operand, id, |a| mask(!a), width),
        "neg" => unop_i(operand, id, |a| mask(a.wrapping_neg()), width),
        "eqz" => {
            let a = operand("x")?.as_i64().ok_or_else(type_err(id))?;
            Ok(Value::Bool(a == 0))
        }
        "shl" => shift_op(operand, id, width, |a, s| mask(a.wrapping_shl(s))),
        "shr.s" => shift_op(operand, id, width, |a, s| mask(a.wrapping_shr(s))),
        "shr.u" => shift_op(operand, id, width, |a, s| {
            let u = (a as u64) & width_mask(width);
            mask((u >> s) as i64)
        }),
        "rotl" => shift_op(operand, id, width, |a, s| {
            mask(rotate(a as u64, width, s as i64) as i64)
        }),
        "rotr" => shift_op(operand, id, width, |a, s| {
            mask(rotate(a as u64, width, -(s as i64)) as i64)
        }),
        "clz" => unop_i(operand, id, |a| {
            let u = (a as u64) & width_mask(width);
            (u.leading_zeros() as i64) - (64 - width as i64)
        }, width),
        "ctz" => unop_i(operand, id, |a| {
            let u = (a as u64) & width_mask(width);
            if u == 0 {
                width as i64
            } else {
                u.trailing_zeros() as i64
            }
        }, width),
        "popc" => unop_i(operand, id, |a| ((a as u64) & width_mask(width)).count_ones() as i64, width),
        "min.s" => binop_i(operand, id, |a, b| a.min(b), width),
        "max.s" => binop_i(operand, id, |a, b| a.max(b), width),
        "min.u" => binop_i(operand, id, |a, b| {
            let (au, bu) = (a as u64 & width_mask(width), b as u64 & width_mask(width));
            mask(au.min(bu) as i64)
        }, width),
        "max.u" => binop_i(operand, id, |a, b| {
            let (au, bu) = (a as u64 & width_mask(width), b as u64 & width_mask(width));
            mask(au.max(bu) as i64)
        }, width),
        "cmp.eq" => cmp_s(operand, id, |a, b| a == b),
        "cmp.ne" => cmp_s(operand, id, |a, b| a != b),
        "cmp.slt" => cmp_s(operand, id, |a, b| a < b),
        "cmp.sle" => cmp_s(operand, id, |a, b| a <= b),
        "cmp.sgt" => cmp_s(operand, id, |a, b| a > b),
        "cmp.sge" => cmp_s(operand, id, |a, b| a >= b),
        "cmp.ult" => cmp_u(operand, id, width, |a, b| a < b),
        "cmp.ule" => cmp_u(operand, id, width, |a, b| a <= b),
        "cmp.ugt" => cmp_u(operand, id, width, |a, b| a > b),
        "cmp.uge" => cmp_u(operand, id, width, |a, b| a >= b),
        "div.s.trap" => {
            let (a, b) = two_operands(operand, id)?;
            if b == 0 {
                return Err(RuntimeError::DivideByZero { node: id });
            }
            if a == signed_min(width) && b == -1 {
                return Err(RuntimeError::SignedDivisionOverflow { node: id });
            }
            Ok(Value::from_i64_width(mask(a.wrapping_div(b)), width))
        }
        "div.u.trap" => {
            let (a, b) = unsigned_operands(operand, id, width)?;
            if b == 0 {
                return Err(RuntimeError::DivideByZero { node: id });
            }
            Ok(Value::from_i64_width(mask((a / b) as i64), width))
        }
        "rem.s.trap" => {
            let (a, b) = two_operands(operand, id)?;
            if b == 0 {
                return Err(RuntimeError::DivideByZero { node: id });
            }
            Ok(Value::from_i64_width(mask(a.wrapping_rem(b)), width))
        }
        "rem.u.trap" => {
            let (a, b) = unsigned_operands(operand, id, width)?;
            if b == 0 {
                return Err(RuntimeError::DivideByZero { node: id });
            }
            Ok(Value::from_i64_width(mask((a % b) as i64), width))
        }
        "div.s.sat" => {
            let (a, b) = two_operands(operand, id)?;
            if b == 0 {
                return Ok(Value::from_i64_width(0, width));
            }
            if a == signed_min(width) && b == -1 {
                return Ok(Value::from_i64_width(signed_max(width), width));
            }
            Ok(Value::from_i64_width(mask(a.wrapping_div(b)), width))
        }
        "div.u.sat" => {
            let (a, b) = unsigned_operands(operand, id, width)?;
            if b == 0 {
                return Ok(Value::from_i64_width(0, width));
            }
            Ok(Value::from_i64_width(mask((a / b) as i64), width))
        }
        "rem.s.sat" => {
            let (a, b) = two_operands(operand, id)?;
            if b == 0 {
                return Ok(Value::from_i64_width(0, width));
            }
            Ok(Value::from_i64_width(mask(a.wrapping_rem(b)), width))
        }
        "rem.u.sat" => {
            let (a, b) = unsigned_operands(operand, id, width)?;
            if b == 0 {
                return Ok(Value::from_i64_width(0, width));
            }
            Ok(Value::from_i64_width(mask((a % b) as i64), width))
        }
        "trunc_sat_f32.s" | "trunc_sat_f64.s" => {
            let f = operand("x")?.as_f64().ok_or_else(type_err(id))?;
            Ok(Value::from_i64_width(sat_f_to_s(f, width), width))
        }
        "trunc_sat_f32.u" | "trunc_sat_f64.u" => {
            let f = operand("x")?.as_f64().ok_or_else(type_err(id))?;
            Ok(Value::from_i64_width(sat_f_to_u(f, width) as i64, width))
        }
        other if other.starts_with("zext.i") || other.starts_with("sext.i") || other.starts_with("trunc.i") => {
            eval_int_cast(other, node, id, operand)
        }
        _ => Err(RuntimeError::UnsupportedTag {
            node: id,
            tag: tag.to_string(),
        }),
    }
}

fn eval_int_cast(
    op: &str,
    _node: &NodeRecord,
    id: NodeId,
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    let target_width: u32 = op
        .rsplit('i')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(RuntimeError::UnsupportedTag {
            node: id,
            tag: op.to_string(),
        })?;
    let v = operand("x")?;
    let raw = v.as_i64().ok_or_else(type_err(id))?;
    if op.starts_with("zext") {
        let source_width = value_width(&v);
        let unsigned = (raw as u64) & width_mask(source_width);
        Ok(Value::from_i64_width(unsigned as i64, target_width))
    } else {
        // sext and trunc both re-narrow/widen via sign-extending Rust casts.
        Ok(Value::from_i64_width(raw, target_width))
    }
}

fn value_width(v: &Value) -> u32 {
    match v {
        Value::I8(_) => 8,
        Value::I16(_) => 16,
        Value::I32(_) => 32,
        Value::I64(_) => 64,
        _ => 64,
    }
}

fn eval_float_op(
    tag: &str,
    node: &NodeRecord,
    id: NodeId,
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    let is32 = tag.starts_with("f32.");
    let op = tag.splitn(2, '.').nth(1).unwrap_or("");

    let canon = |v: f64| -> f64 {
        if v.is_nan() {
            if is32 {
                f32::from_bits(0x7FC0_0000) as f64
            } else {
                f64::from_bits(0x7FF8_0000_0000_0000)
            }
        } else {
            v
        }
    };
    let wrap = |v: f64| -> Value {
        if is32 {
            Value::F32(canon(v) as f32)
        } else {
            Value::F64(canon(v))
        }
    };

    match op {
        "add" => {
            let (a, b) = two_floats(operand, id)?;
            Ok(wrap(a + b))
        }
        "sub" => {
            let (a, b) = two_floats(operand, id)?;
            Ok(wrap(a - b))
        }
        "mul" => {
            let (a, b) = two_floats(operand, id)?;
            Ok(wrap(a * b))
        }
        "div" => {
            let (a, b) = two_floats(operand, id)?;
            Ok(wrap(a / b))
        }
        "neg" => {
            let a = operand("x")?.as_f64().ok_or_else(type_err(id))?;
            Ok(wrap(-a))
        }
        "abs" => {
            let a = operand("x")?.as_f64().ok_or_else(type_err(id))?;
            Ok(wrap(a.abs()))
        }
        "sqrt" => {
            let a = operand("x")?.as_f64().ok_or_else(type_err(id))?;
            Ok(wrap(a.sqrt()))
        }
        "min" => {
            let (a, b) = two_floats(operand, id)?;
            Ok(wrap(if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }))
        }
        "max" => {
            let (a, b) = two_floats(operand, id)?;
            Ok(wrap(if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }))
        }
        "cmp.oeq" => cmp_f(operand, id, |a, b| !a.is_nan() && !b.is_nan() && a == b),
        "cmp.one" => cmp_f(operand, id, |a, b| !a.is_nan() && !b.is_nan() && a != b),
        "cmp.olt" => cmp_f(operand, id, |a, b| !a.is_nan() && !b.is_nan() && a < b),
        "cmp.ole" => cmp_f(operand, id, |a, b| !a.is_nan() && !b.is_nan() && a <= b),
        "cmp.ogt" => cmp_f(operand, id, |a, b| !a.is_nan() && !b.is_nan() && a > b),
        "cmp.oge" => cmp_f(operand, id, |a, b| !a.is_nan() && !b.is_nan() && a >= b),
        "cmp.ueq" => cmp_f(operand, id, |a, b| a.is_nan() || b.is_nan() || a == b),
        "cmp.une" => cmp_f(operand, id, |a, b| a.is_nan() || b.is_nan() || a != b),
        "cmp.ult" => cmp_f(operand, id, |a, b| a.is_nan() || b.is_nan() || a < b),
        "cmp.ule" => cmp_f(operand, id, |a, b| a.is_nan() || b.is_nan() || a <= b),
        "cmp.ugt" => cmp_f(operand, id, |a, b| a.is_nan() || b.is_nan() || a > b),
        "cmp.uge" => cmp_f(operand, id, |a, b| a.is_nan() || b.is_nan() || a >= b),
        other if other.starts_with("from_i") => {
            let x = operand("x")?.as_i64().ok_or_else(type_err(id))?;
            let signed = other.ends_with(".s");
            let as_f = if signed { x as f64 } else { (x as u64) as f64 };
            Ok(wrap(as_f))
        }
        _ => Err(RuntimeError::UnsupportedTag {
            node: id,
            tag: node.tag.clone(),
        }),
    }
}

fn eval_bool_op(
    op: &str,
    id: NodeId,
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    match op {
        "not" => {
            let a = operand("x")?.as_bool().ok_or_else(type_err(id))?;
            Ok(Value::Bool(!a))
        }
        "and" => {
            let (a, b) = two_bools(operand, id)?;
            Ok(Value::Bool(a && b))
        }
        "or" => {
            let (a, b) = two_bools(operand, id)?;
            Ok(Value::Bool(a || b))
        }
        "xor" => {
            let (a, b) = two_bools(operand, id)?;
            Ok(Value::Bool(a ^ b))
        }
        _ => Err(RuntimeError::UnsupportedTag {
            node: id,
            tag: format!("bool.{op}"),
        }),
    }
}

fn type_err(id: NodeId) -> impl Fn() -> RuntimeError {
    move || RuntimeError::TypeMismatch {
        node: id,
        expected: "numeric".into(),
        got: "other".into(),
    }
}

fn two_operands(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
) -> Result<(i64, i64), RuntimeError> {
    let a = operand("a")?.as_i64().ok_or_else(type_err(id))?;
    let b = operand("b")?.as_i64().ok_or_else(type_err(id))?;
    Ok((a, b))
}

fn unsigned_operands(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    width: u32,
) -> Result<(u64, u64), RuntimeError> {
    let (a, b) = two_operands(operand, id)?;
    Ok(((a as u64) & width_mask(width), (b as u64) & width_mask(width)))
}

fn two_floats(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
) -> Result<(f64, f64), RuntimeError> {
    let a = operand("a")?.as_f64().ok_or_else(type_err(id))?;
    let b = operand("b")?.as_f64().ok_or_else(type_err(id))?;
    Ok((a, b))
}

fn two_bools(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
) -> Result<(bool, bool), RuntimeError> {
    let a = operand("a")?.as_bool().ok_or_else(type_err(id))?;
    let b = operand("b")?.as_bool().ok_or_else(type_err(id))?;
    Ok((a, b))
}

fn binop_i(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    f: impl Fn(i64, i64) -> i64,
    width: u32,
) -> Result<Value, RuntimeError> {
    let (a, b) = two_operands(operand, id)?;
    Ok(Value::from_i64_width(f(a, b), width))
}

fn unop_i(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    f: impl Fn(i64) -> i64,
    width: u32,
) -> Result<Value, RuntimeError> {
    let a = operand("x")?.as_i64().ok_or_else(type_err(id))?;
    Ok(Value::from_i64_width(f(a), width))
}

fn shift_op(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    width: u32,
    f: impl Fn(i64, u32) -> i64,
) -> Result<Value, RuntimeError> {
    let a = operand("x")?.as_i64().ok_or_else(type_err(id))?;
    let amount = operand("amount")?.as_i64().ok_or_else(type_err(id))?;
    let masked = (amount as u32) & (width - 1);
    Ok(Value::from_i64_width(f(a, masked), width))
}

fn cmp_s(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    f: impl Fn(i64, i64) -> bool,
) -> Result<Value, RuntimeError> {
    let (a, b) = two_operands(operand, id)?;
    Ok(Value::Bool(f(a, b)))
}

fn cmp_u(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    width: u32,
    f: impl Fn(u64, u64) -> bool,
) -> Result<Value, RuntimeError> {
    let (a, b) = unsigned_operands(operand, id, width)?;
    Ok(Value::Bool(f(a, b)))
}

fn cmp_f(
    operand: &impl Fn(&str) -> Result<Value, RuntimeError>,
    id: NodeId,
    f: impl Fn(f64, f64) -> bool,
) -> Result<Value, RuntimeError> {
    let (a, b) = two_floats(operand, id)?;
    Ok(Value::Bool(f(a, b)))
}

fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// The minimum representable signed value at `width`, e.g. `i32::MIN` for
/// width 32. `a`/`b` are always carried widened to `i64`, so the INT_MIN/-1
/// overflow check must compare against this instead of `i64::MIN`.
fn signed_min(width: u32) -> i64 {
    if width >= 64 {
        i64::MIN
    } else {
        -(1i64 << (width - 1))
    }
}

/// The maximum representable signed value at `width`, e.g. `i32::MAX` for
/// width 32. Used as the saturated result of INT_MIN/-1 -- `i64::MAX` would
/// truncate to `-1` once narrowed to a sub-64 width.
fn signed_max(width: u32) -> i64 {
    if width >= 64 {
        i64::MAX
    } else {
        (1i64 << (width - 1)) - 1
    }
}

fn rotate(v: u64, width: u32, amount: i64) -> u64 {
    let v = v & width_mask(width);
    let w = width as i64;
    let amount = ((amount % w) + w) % w;
    if amount == 0 {
        return v;
    }
    let left = (v << amount) & width_mask(width);
    let right = v >> (w - amount);
    (left | right) & width_mask(width)
}

fn sat_f_to_s(f: f64, width: u32) -> i64 {
    if f.is_nan() {
        return 0;
    }
    let (min, max) = match width {
        8 => (i8::MIN as f64, i8::MAX as f64),
        16 => (i16::MIN as f64, i16::MAX as f64),
        32 => (i32::MIN as f64, i32::MAX as f64),
        _ => (i64::MIN as f64, i64::MAX as f64),
    };
    if f <= min {
        min as i64
    } else if f >= max {
        max as i64
    } else {
        f as i64
    }
}

fn sat_f_to_u(f: f64, width: u32) -> u64 {
    if f.is_nan() || f <= 0.0 {
        return 0;
    }
    let max = match width {
        8 => u8::MAX as f64,
        16 => u16::MAX as f64,
        32 => u32::MAX as f64,
        _ => u64::MAX as f64,
    };
    if f >= max {
        max as u64
    } else {
        f as u64
    }
}

/// Looks up the `Ref` stored under `key` in a node's field bag.
pub fn field_ref_required(node: &NodeRecord, id: NodeId, key: &'static str) -> Result<Ref, RuntimeError> {
    node.field_ref(key).ok_or(RuntimeError::MissingField { node: id, field: key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::TypeId;

    fn node(tag: &str, fields: serde_json::Value) -> NodeRecord {
        NodeRecord {
            id: NodeId(1),
            tag: tag.to_string(),
            type_ref: Some(TypeId::I32),
            fields,
        }
    }

    fn lookup(values: std::collections::HashMap<&'static str, Value>) -> impl Fn(&str) -> Result<Value, RuntimeError> {
        move |k| {
            values
                .get(k)
                .cloned()
                .ok_or(RuntimeError::MissingField { node: NodeId(1), field: "x" })
        }
    }

    #[test]
    fn const_i32_reads_value() {
        let n = node("const.i32", serde_json::json!({"value": 42}));
        let v = eval_node(&n, |_| unreachable!()).unwrap().unwrap();
        assert_eq!(v, Value::I32(42));
    }

    #[test]
    fn int_add_wraps_at_width() {
        let n = node("i8.add", serde_json::json!({}));
        let values = [("a", Value::I8(100)), ("b", Value::I8(100))]
            .into_iter()
            .collect();
        let v = eval_node(&n, lookup(values)).unwrap().unwrap();
        assert_eq!(v, Value::I8(100i8.wrapping_add(100)));
    }

    #[test]
    fn shift_amount_is_masked_to_width_minus_one() {
        let n = node("i32.shl", serde_json::json!({}));
        let values = [("x", Value::I32(1)), ("amount", Value::I32(32))]
            .into_iter()
            .collect();
        let v = eval_node(&n, lookup(values)).unwrap().unwrap();
        assert_eq!(v, Value::I32(1));
    }

    #[test]
    fn div_s_trap_on_zero_divisor() {
        let n = node("i32.div.s.trap", serde_json::json!({}));
        let values = [("a", Value::I32(10)), ("b", Value::I32(0))]
            .into_iter()
            .collect();
        let err = eval_node(&n, lookup(values)).unwrap_err();
        assert!(matches!(err, RuntimeError::DivideByZero { .. }));
    }

    #[test]
    fn div_s_sat_on_zero_divisor_yields_zero() {
        let n = node("i32.div.s.sat", serde_json::json!({}));
        let values = [("a", Value::I32(10)), ("b", Value::I32(0))]
            .into_iter()
            .collect();
        let v = eval_node(&n, lookup(values)).unwrap().unwrap();
        assert_eq!(v, Value::I32(0));
    }

    #[test]
    fn div_s_trap_on_int_min_over_neg_one_traps_below_width_64() {
        let n = node("i8.div.s.trap", serde_json::json!({}));
        let values = [("a", Value::I8(i8::MIN)), ("b", Value::I8(-1))]
            .into_iter()
            .collect();
        let err = eval_node(&n, lookup(values)).unwrap_err();
        assert!(matches!(err, RuntimeError::SignedDivisionOverflow { .. }));
    }

    #[test]
    fn div_s_sat_on_int_min_over_neg_one_saturates_to_width_max() {
        let n = node("i8.div.s.sat", serde_json::json!({}));
        let values = [("a", Value::I8(i8::MIN)), ("b", Value::I8(-1))]
            .into_iter()
            .collect();
        let v = eval_node(&n, lookup(values)).unwrap().unwrap();
        assert_eq!(v, Value::I8(i8::MAX));
    }

    #[test]
    fn float_add_nan_canonicalizes() {
        let n = node("f32.add", serde_json::json!({}));
        let values = [("a", Value::F32(f32::NAN)), ("b", Value::F32(1.0))]
            .into_iter()
            .collect();
        let v = eval_node(&n, lookup(values)).unwrap().unwrap();
        match v {
            Value::F32(f) => assert_eq!(f.to_bits(), 0x7FC0_0000),
            _ => panic!("expected f32"),
        }
    }

    #[test]
    fn select_picks_branch_by_condition() {
        let n = node("select", serde_json::json!({}));
        let values = [
            ("cond", Value::Bool(true)),
            ("t", Value::I32(1)),
            ("e", Value::I32(2)),
        ]
        .into_iter()
        .collect();
        let v = eval_node(&n, lookup(values)).unwrap().unwrap();
        assert_eq!(v, Value::I32(1));
    }
}
