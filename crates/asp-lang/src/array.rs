use std::{cell::RefCell, rc::Rc};

use crate::value::Value;

pub type ArrayRef = Rc<RefCell<VbArray>>;

/// A bounds-aware array.
///
/// Indices start at `lower` rather than zero. Multi-dimensional arrays are
/// trees: every element of an outer dimension is itself a `VbArray`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VbArray {
    lower: i64,
    values: Vec<Value>,
}

impl VbArray {
    pub fn new(lower: i64, values: Vec<Value>) -> Self {
        Self { lower, values }
    }

    pub fn with_len(lower: i64, len: usize) -> Self {
        Self {
            lower,
            values: vec![Value::Empty; len],
        }
    }

    /// Builds a (possibly nested) array where each entry of `uppers` is the
    /// upper bound of one dimension.
    pub fn with_dimensions(lower: i64, uppers: &[i64]) -> Self {
        match uppers.split_first() {
            None => Self::with_len(lower, 0),
            Some((upper, [])) => Self::with_len(lower, Self::span(lower, *upper)),
            Some((upper, rest)) => Self {
                lower,
                values: (0..Self::span(lower, *upper))
                    .map(|_| Value::from(Self::with_dimensions(lower, rest)))
                    .collect(),
            },
        }
    }

    fn span(lower: i64, upper: i64) -> usize {
        upper
            .checked_sub(lower)
            .and_then(|span| span.checked_add(1))
            .and_then(|span| usize::try_from(span).ok())
            .unwrap_or(0)
    }

    #[inline(always)]
    pub fn lower(&self) -> i64 {
        self.lower
    }

    /// `lower - 1` for an empty array, so `For i = LBound To UBound` skips it.
    #[inline(always)]
    pub fn upper(&self) -> i64 {
        self.lower + self.values.len() as i64 - 1
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn offset(&self, index: i64) -> Option<usize> {
        index
            .checked_sub(self.lower)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|offset| *offset < self.values.len())
    }

    pub fn get(&self, index: i64) -> Option<&Value> {
        self.offset(index).map(|offset| &self.values[offset])
    }

    /// Returns `false` when `index` is outside `lower..=upper`.
    pub fn set(&mut self, index: i64, value: Value) -> bool {
        match self.offset(index) {
            Some(offset) => {
                self.values[offset] = value;
                true
            }
            None => false,
        }
    }

    /// Reads through nested dimensions, one index per level.
    pub fn get_path(&self, indices: &[i64]) -> Option<Value> {
        match indices.split_first() {
            None => None,
            Some((index, [])) => self.get(*index).cloned(),
            Some((index, rest)) => match self.get(*index)? {
                Value::Array(inner) => inner.borrow().get_path(rest),
                _ => None,
            },
        }
    }

    /// Writes through nested dimensions, one index per level.
    pub fn set_path(&mut self, indices: &[i64], value: Value) -> bool {
        match indices.split_first() {
            None => false,
            Some((index, [])) => self.set(*index, value),
            Some((index, rest)) => match self.get(*index) {
                Some(Value::Array(inner)) => inner.borrow_mut().set_path(rest, value),
                _ => false,
            },
        }
    }

    /// Builds the array a `ReDim Preserve` produces: the overlapping cells of
    /// every dimension keep their values, new cells are empty and cells past
    /// the new bounds are dropped.
    pub fn resize_preserve(&self, uppers: &[i64]) -> Self {
        let mut resized = Self::with_dimensions(self.lower, uppers);
        let rest = uppers.get(1..).unwrap_or_default();

        for (slot, old) in resized.values.iter_mut().zip(self.values.iter()) {
            let nested = match (&*slot, old) {
                (Value::Array(new_inner), Value::Array(old_inner)) if !rest.is_empty() => {
                    let preserved = old_inner.borrow().resize_preserve(rest);
                    *new_inner.borrow_mut() = preserved;
                    true
                }
                _ => false,
            };

            if !nested {
                *slot = old.clone();
            }
        }

        resized
    }

    /// Copies the array and every nested dimension so the copy shares no storage.
    pub fn deep_copy(&self) -> Self {
        Self {
            lower: self.lower,
            values: self.values.iter().map(Value::deep_copy).collect(),
        }
    }

    pub fn erase(&mut self) {
        self.values.clear();
    }

    /// Number of dimensions, following the first element of each level.
    pub fn dimensions(&self) -> usize {
        match self.values.first() {
            Some(Value::Array(inner)) => 1 + inner.borrow().dimensions(),
            _ => 1,
        }
    }

    /// `(lower, upper)` of the 1-based `dimension`.
    pub fn bounds(&self, dimension: usize) -> Option<(i64, i64)> {
        match dimension {
            0 => None,
            1 => Some((self.lower, self.upper())),
            n => match self.values.first() {
                Some(Value::Array(inner)) => inner.borrow().bounds(n - 1),
                _ => None,
            },
        }
    }

    /// Leaf elements in storage order, descending into nested dimensions.
    pub fn flatten(&self) -> Vec<Value> {
        self.values
            .iter()
            .flat_map(|value| match value {
                Value::Array(inner) => inner.borrow().flatten(),
                other => vec![other.clone()],
            })
            .collect()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for VbArray {
    fn from(values: Vec<Value>) -> Self {
        Self::new(0, values)
    }
}
