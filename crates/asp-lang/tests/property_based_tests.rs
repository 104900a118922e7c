//! Property-based tests for the value model and arrays.
use asp_lang::{CompareMode, Value, VbArray, compare_equal, compare_less};
use proptest::prelude::*;

mod strategies {
    use super::*;

    pub fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Empty),
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (-1.0e9..1.0e9f64).prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    pub fn mode() -> impl Strategy<Value = CompareMode> {
        prop_oneof![Just(CompareMode::Binary), Just(CompareMode::Text)]
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn compare_equal_is_reflexive(value in strategies::scalar(), mode in strategies::mode()) {
        prop_assert!(compare_equal(&value, &value, mode), "{:?} should equal itself", value);
    }

    #[test]
    fn compare_equal_is_symmetric(
        a in strategies::scalar(),
        b in strategies::scalar(),
        mode in strategies::mode(),
    ) {
        prop_assert_eq!(compare_equal(&a, &b, mode), compare_equal(&b, &a, mode));
    }

    #[test]
    fn compare_less_is_irreflexive(n in any::<i64>()) {
        let value = Value::from(n);
        prop_assert!(!compare_less(&value, &value, CompareMode::Binary));
    }

    #[test]
    fn upper_bound_follows_length(lower in -5i64..5, len in 0usize..20) {
        let array = VbArray::new(lower, vec![Value::Empty; len]);
        let expected = if len > 0 { lower + len as i64 - 1 } else { lower - 1 };
        prop_assert_eq!(array.upper(), expected);
        prop_assert_eq!(array.lower(), lower);
    }

    #[test]
    fn resize_preserve_keeps_overlap(old_len in 1usize..12, new_upper in 0i64..12) {
        let values = (0..old_len as i64).map(Value::from).collect::<Vec<_>>();
        let array = VbArray::new(0, values);

        let resized = array.resize_preserve(&[new_upper]);
        prop_assert_eq!(resized.upper(), new_upper);

        for index in 0..=new_upper {
            let cell = resized.get(index).cloned();
            if (index as usize) < old_len {
                prop_assert_eq!(cell, Some(Value::from(index)));
            } else {
                prop_assert_eq!(cell, Some(Value::Empty));
            }
        }
    }

    #[test]
    fn resize_preserve_recurses_per_row(
        rows in 1i64..5,
        cols in 1i64..5,
        new_rows in 0i64..6,
        new_cols in 0i64..6,
    ) {
        let mut array = VbArray::with_dimensions(0, &[rows, cols]);
        for row in 0..=rows {
            for col in 0..=cols {
                prop_assert!(array.set_path(&[row, col], Value::from(row * 10 + col)));
            }
        }

        let resized = array.resize_preserve(&[new_rows, new_cols]);
        for row in 0..=new_rows {
            for col in 0..=new_cols {
                let expected = if row <= rows && col <= cols {
                    Value::from(row * 10 + col)
                } else {
                    Value::Empty
                };
                prop_assert_eq!(resized.get_path(&[row, col]), Some(expected));
            }
        }
        prop_assert_eq!(resized.get_path(&[new_rows + 1, 0]), None);
    }
}
