use std::cmp::Ordering;

#[cfg(feature = "ast-json")]
use serde::{Deserialize, Serialize};

use super::{Value, same_object};

/// How strings compare: `Option Compare Binary` or `Option Compare Text`.
#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    #[default]
    Binary,
    Text,
}

impl CompareMode {
    /// Maps the `vbBinaryCompare`/`vbTextCompare` argument of library functions.
    pub fn from_value(value: &Value) -> Self {
        if value.to_int() == 0 {
            CompareMode::Binary
        } else {
            CompareMode::Text
        }
    }
}

pub fn compare_strings(a: &str, b: &str, mode: CompareMode) -> Ordering {
    match mode {
        CompareMode::Binary => a.cmp(b),
        CompareMode::Text => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Loose equality.
///
/// Two strings compare as strings and two booleans as booleans; references
/// compare by identity. Everything else compares string forms first and
/// falls back to numeric equality when both sides read as numbers, which
/// makes `Empty` equal to `""`, `0` and `False`.
pub fn compare_equal(a: &Value, b: &Value, mode: CompareMode) -> bool {
    match (a, b) {
        (Value::Nothing, Value::Nothing) | (Value::Null, Value::Null) => true,
        (Value::Nothing, _) | (_, Value::Nothing) | (Value::Null, _) | (_, Value::Null) => false,
        (Value::Object(a), Value::Object(b)) => same_object(a, b),
        (Value::Instance(a), Value::Instance(b)) => std::rc::Rc::ptr_eq(a, b),
        (Value::Array(a), Value::Array(b)) => std::rc::Rc::ptr_eq(a, b),
        (Value::String(a), Value::String(b)) => compare_strings(a, b, mode) == Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => {
            compare_strings(&a.to_string(), &b.to_string(), mode) == Ordering::Equal
                || matches!(
                    (a.to_numeric(), b.to_numeric()),
                    (Some(x), Some(y)) if x.as_f64() == y.as_f64()
                )
        }
    }
}

/// Ordering used by `<`: numeric when both sides read as numbers (numeric
/// strings included), otherwise lexical on the string forms.
pub fn compare_less(a: &Value, b: &Value, mode: CompareMode) -> bool {
    match (a.to_numeric(), b.to_numeric()) {
        (Some(x), Some(y)) => x.as_f64() < y.as_f64(),
        _ => compare_strings(&a.to_string(), &b.to_string(), mode) == Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::int_string(Value::from(1), Value::from("1"), true)]
    #[case::float_int(Value::Float(2.0), Value::from(2), true)]
    #[case::numeric_fallback(Value::from(1.5), Value::from("1.50"), true)]
    #[case::empty_empty_string(Value::Empty, Value::from(""), true)]
    #[case::empty_zero(Value::Empty, Value::from(0), true)]
    #[case::empty_false(Value::Empty, Value::FALSE, true)]
    #[case::empty_empty(Value::Empty, Value::Empty, true)]
    #[case::bool_string(Value::TRUE, Value::from("True"), true)]
    #[case::bool_minus_one(Value::TRUE, Value::from(-1), true)]
    #[case::strings_are_strings(Value::from("01"), Value::from("1"), false)]
    #[case::case_sensitive(Value::from("abc"), Value::from("ABC"), false)]
    #[case::null_null(Value::Null, Value::Null, true)]
    #[case::null_empty(Value::Null, Value::Empty, false)]
    #[case::nothing_nothing(Value::Nothing, Value::Nothing, true)]
    #[case::nothing_empty(Value::Nothing, Value::Empty, false)]
    #[case::word_zero(Value::from("abc"), Value::from(0), false)]
    fn test_compare_equal(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(compare_equal(&a, &b, CompareMode::Binary), expected);
        assert_eq!(compare_equal(&b, &a, CompareMode::Binary), expected);
    }

    #[test]
    fn test_compare_equal_text_mode() {
        assert!(compare_equal(
            &Value::from("abc"),
            &Value::from("ABC"),
            CompareMode::Text
        ));
    }

    #[rstest]
    #[case::numbers(Value::from(2), Value::from(10), true)]
    #[case::numeric_strings(Value::from("2"), Value::from("10"), true)]
    #[case::mixed(Value::from("9"), Value::from(10), true)]
    #[case::lexical(Value::from("b"), Value::from("a"), false)]
    #[case::lexical_digits_vs_word(Value::from("10"), Value::from("abc"), true)]
    #[case::empty_is_zero(Value::Empty, Value::from(1), true)]
    #[case::equal(Value::from(3), Value::from(3), false)]
    fn test_compare_less(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(compare_less(&a, &b, CompareMode::Binary), expected);
    }

    #[test]
    fn test_compare_mode_from_value() {
        assert_eq!(CompareMode::from_value(&Value::from(0)), CompareMode::Binary);
        assert_eq!(CompareMode::from_value(&Value::from(1)), CompareMode::Text);
    }
}
