use super::Value;

/// A number produced by coercion: integral kinds stay integral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    #[inline(always)]
    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(n) => n as f64,
            Numeric::Float(n) => n,
        }
    }

    #[inline(always)]
    pub fn is_int(&self) -> bool {
        matches!(self, Numeric::Int(_))
    }
}

/// Parses a numeric string: decimal integer, `&h` hexadecimal, `&o` octal,
/// then floating point. Surrounding whitespace is ignored.
pub fn parse_numeric(s: &str) -> Option<Numeric> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(n) = s.parse::<i64>() {
        return Some(Numeric::Int(n));
    }

    let radix = |prefix: &str| {
        s.get(..2)
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| &s[2..])
    };

    if let Some(digits) = radix("&h") {
        return i64::from_str_radix(digits, 16).ok().map(Numeric::Int);
    }

    if let Some(digits) = radix("&o") {
        return i64::from_str_radix(digits, 8).ok().map(Numeric::Int);
    }

    // `f64::from_str` also accepts "inf" and "NaN", which are not numbers here.
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }

    s.parse::<f64>().ok().map(Numeric::Float)
}

/// Whole values print without a fractional part; everything else uses the
/// shortest representation that reads back to the same float.
pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Value {
    /// The numeric reading of a value, or `None` when it has none.
    ///
    /// Empty reads as `0` and booleans as `-1`/`0`; strings are parsed with
    /// [`parse_numeric`].
    pub fn to_numeric(&self) -> Option<Numeric> {
        match self {
            Value::Empty => Some(Numeric::Int(0)),
            Value::Bool(b) => Some(Numeric::Int(if *b { -1 } else { 0 })),
            Value::Integer(n) => Some(Numeric::Int(*n)),
            Value::Float(n) => Some(Numeric::Float(*n)),
            Value::String(s) => parse_numeric(s),
            _ => None,
        }
    }

    /// Total numeric coercion: anything without a numeric reading is `0`.
    pub fn coerce_numeric(&self) -> Numeric {
        self.to_numeric().unwrap_or(Numeric::Int(0))
    }

    /// Total integer coercion; floats round half to even.
    pub fn to_int(&self) -> i64 {
        match self.coerce_numeric() {
            Numeric::Int(n) => n,
            Numeric::Float(n) if n.is_finite() => n.round_ties_even() as i64,
            Numeric::Float(_) => 0,
        }
    }

    /// Total floating point coercion.
    pub fn to_float(&self) -> f64 {
        self.coerce_numeric().as_f64()
    }

    /// Truthiness for conditions: the no-data kinds are false, numbers are
    /// true when nonzero, strings when nonempty, everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Empty | Value::Null | Value::Nothing => false,
            Value::Bool(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}
