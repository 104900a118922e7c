use super::error::EvalError;
use crate::{
    ast::node::{BinaryOp, UnaryOp},
    value::{CompareMode, Numeric, Value, compare_equal, compare_less},
};

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalError> {
    if operand.is_null() {
        return Ok(Value::Null);
    }

    Ok(match op {
        UnaryOp::Neg => match operand.coerce_numeric() {
            Numeric::Int(n) => n
                .checked_neg()
                .map_or(Value::Float(-(n as f64)), Value::Integer),
            Numeric::Float(n) => Value::Float(-n),
        },
        UnaryOp::Not => match operand {
            Value::Bool(b) => Value::Bool(!b),
            other => Value::Integer(i64::from(!to_i32(other))),
        },
    })
}

pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, mode: CompareMode) -> Result<Value, EvalError> {
    let propagates_null = !matches!(op, BinaryOp::Is | BinaryOp::Concat);
    if propagates_null && (lhs.is_null() || rhs.is_null()) {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Is => Ok(Value::Bool(lhs.same_reference(rhs))),
        BinaryOp::Concat => Ok(Value::String(format!("{}{}", lhs, rhs))),
        BinaryOp::Add => Ok(match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
            _ => arithmetic(lhs, rhs, i64::checked_add, |a, b| a + b),
        }),
        BinaryOp::Sub => Ok(arithmetic(lhs, rhs, i64::checked_sub, |a, b| a - b)),
        BinaryOp::Mul => Ok(arithmetic(lhs, rhs, i64::checked_mul, |a, b| a * b)),
        BinaryOp::Div => {
            let divisor = rhs.to_float();
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(lhs.to_float() / divisor))
        }
        BinaryOp::IntDiv => {
            let (a, b) = integer_operands(lhs, rhs)?;
            Ok(a.checked_div(b)
                .map_or(Value::Float((a as f64 / b as f64).trunc()), Value::Integer))
        }
        BinaryOp::Mod => {
            let (a, b) = integer_operands(lhs, rhs)?;
            Ok(Value::Integer(a.checked_rem(b).unwrap_or(0)))
        }
        BinaryOp::Pow => Ok(Value::Float(lhs.to_float().powf(rhs.to_float()))),
        BinaryOp::Eq => Ok(Value::Bool(compare_equal(lhs, rhs, mode))),
        BinaryOp::Ne => Ok(Value::Bool(!compare_equal(lhs, rhs, mode))),
        BinaryOp::Lt => Ok(Value::Bool(compare_less(lhs, rhs, mode))),
        BinaryOp::Le => Ok(Value::Bool(!compare_less(rhs, lhs, mode))),
        BinaryOp::Gt => Ok(Value::Bool(compare_less(rhs, lhs, mode))),
        BinaryOp::Ge => Ok(Value::Bool(!compare_less(lhs, rhs, mode))),
        BinaryOp::And => Ok(logical(lhs, rhs, |a, b| a & b, |a, b| a & b)),
        BinaryOp::Or => Ok(logical(lhs, rhs, |a, b| a | b, |a, b| a | b)),
        BinaryOp::Xor => Ok(logical(lhs, rhs, |a, b| a ^ b, |a, b| a ^ b)),
        BinaryOp::Eqv => Ok(logical(lhs, rhs, |a, b| a == b, |a, b| !(a ^ b))),
        BinaryOp::Imp => Ok(logical(lhs, rhs, |a, b| !a | b, |a, b| !a | b)),
    }
}

/// Integer arithmetic while the result fits, floating point otherwise.
fn arithmetic(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (lhs.coerce_numeric(), rhs.coerce_numeric()) {
        (Numeric::Int(a), Numeric::Int(b)) => int_op(a, b)
            .map_or_else(|| Value::Float(float_op(a as f64, b as f64)), Value::Integer),
        (a, b) => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

fn integer_operands(lhs: &Value, rhs: &Value) -> Result<(i64, i64), EvalError> {
    let divisor = rhs.to_int();
    if divisor == 0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok((lhs.to_int(), divisor))
}

/// Boolean when both operands are booleans, bitwise on 32-bit integers otherwise.
fn logical(
    lhs: &Value,
    rhs: &Value,
    bool_op: fn(bool, bool) -> bool,
    bit_op: fn(i32, i32) -> i32,
) -> Value {
    match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(bool_op(*a, *b)),
        _ => Value::Integer(i64::from(bit_op(to_i32(lhs), to_i32(rhs)))),
    }
}

#[inline(always)]
fn to_i32(value: &Value) -> i32 {
    value.to_int() as i32
}
