use std::{
    cmp::Ordering,
    fmt::{self, Debug, Formatter},
    rc::Rc,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use itertools::Itertools;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::error::EvalError;
use crate::{
    array::VbArray,
    object::{arg, create_object},
    value::{CompareMode, Numeric, Value, compare_strings, parse_numeric},
};

mod datetime;

pub use datetime::{DATETIME_FUNCTIONS, DateTimeFunctions, format_datetime, parse_datetime};

#[derive(Clone, Debug)]
pub struct BuiltinFunction {
    pub num_params: ParamNum,
    pub func: fn(&[Value]) -> Result<Value, EvalError>,
}

#[derive(Clone, Debug)]
pub enum ParamNum {
    None,
    Fixed(u8),
    Range(u8, u8),
    /// Any number of arguments from the given minimum up.
    AtLeast(u8),
}

impl ParamNum {
    pub fn to_num(&self) -> u8 {
        match self {
            ParamNum::None => 0,
            ParamNum::Fixed(n) => *n,
            ParamNum::Range(min, _) | ParamNum::AtLeast(min) => *min,
        }
    }

    #[inline(always)]
    pub fn is_valid(&self, num_args: usize) -> bool {
        match self {
            ParamNum::None => num_args == 0,
            ParamNum::Fixed(n) => num_args == usize::from(*n),
            ParamNum::Range(min, max) => {
                num_args >= usize::from(*min) && num_args <= usize::from(*max)
            }
            ParamNum::AtLeast(min) => num_args >= usize::from(*min),
        }
    }
}

impl BuiltinFunction {
    pub fn new(num_params: ParamNum, func: fn(&[Value]) -> Result<Value, EvalError>) -> Self {
        BuiltinFunction { num_params, func }
    }
}

/// A source of functions consulted when a called name is not a variable or
/// a procedure.
pub trait FunctionTable: Debug {
    /// `Ok(None)` when the table does not know `name`.
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError>;

    fn handles(&self, name: &str) -> bool;
}

impl<T: FunctionTable + ?Sized> FunctionTable for Arc<T> {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        (**self).call(name, args)
    }

    fn handles(&self, name: &str) -> bool {
        (**self).handles(name)
    }
}

pub(crate) fn dispatch(
    functions: &FxHashMap<SmolStr, BuiltinFunction>,
    name: &str,
    args: &[Value],
) -> Result<Option<Value>, EvalError> {
    match functions.get(name) {
        None => Ok(None),
        Some(f) if f.num_params.is_valid(args.len()) => (f.func)(args).map(Some),
        Some(_) => Err(EvalError::InvalidNumberOfArguments(name.to_string())),
    }
}

/// String, conversion, math, inspection and array functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFunctions;

impl FunctionTable for BuiltinFunctions {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        dispatch(&BUILTIN_FUNCTIONS, name, args)
    }

    fn handles(&self, name: &str) -> bool {
        BUILTIN_FUNCTIONS.contains_key(name)
    }
}

pub type NativeFunction = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Functions registered by the embedding application, shared by every request.
#[derive(Default)]
pub struct CustomFunctions {
    functions: RwLock<FxHashMap<SmolStr, NativeFunction>>,
}

impl Debug for CustomFunctions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let functions = self.functions.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_set().entries(functions.keys().sorted()).finish()
    }
}

impl CustomFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` under the case-insensitive `name`, replacing any
    /// previous registration.
    pub fn register<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(SmolStr::new(name.to_lowercase()), Arc::new(func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name.to_lowercase().as_str())
    }

    pub fn len(&self) -> usize {
        self.functions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FunctionTable for CustomFunctions {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        let func = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        func.map(|func| func(args)).transpose()
    }

    fn handles(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// The ordered chain of function tables: date/time, built-in, custom.
/// The first table that handles a name wins.
#[derive(Debug, Clone)]
pub struct FunctionTables {
    tables: Vec<Rc<dyn FunctionTable>>,
}

impl Default for FunctionTables {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

impl FunctionTables {
    pub fn new(custom: Arc<CustomFunctions>) -> Self {
        Self {
            tables: vec![
                Rc::new(DateTimeFunctions) as Rc<dyn FunctionTable>,
                Rc::new(BuiltinFunctions),
                Rc::new(custom),
            ],
        }
    }

    /// Appends a table consulted after the existing ones.
    pub fn push(&mut self, table: Rc<dyn FunctionTable>) {
        self.tables.push(table);
    }

    /// `name` must already be lowercased.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        for table in &self.tables {
            if let Some(value) = table.call(name, args)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Whether some table knows `name`, which must already be lowercased.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.iter().any(|table| table.handles(name))
    }
}

#[inline(always)]
fn int_arg(args: &[Value], index: usize, default: i64) -> i64 {
    match arg(args, index) {
        Value::Empty => default,
        value => value.to_int(),
    }
}

#[inline(always)]
fn compare_arg(args: &[Value], index: usize) -> CompareMode {
    CompareMode::from_value(arg(args, index))
}

fn invalid(name: &str) -> EvalError {
    EvalError::InvalidArgument(name.to_string())
}

fn overflow(name: &str) -> EvalError {
    EvalError::Runtime(format!("overflow: {}", name))
}

/// Character-wise case folding that keeps one char per input char, so
/// offsets found in the folded text are valid in the original.
fn fold(s: &str, mode: CompareMode) -> Vec<char> {
    match mode {
        CompareMode::Binary => s.chars().collect(),
        CompareMode::Text => s
            .chars()
            .map(|c| c.to_lowercase().next().unwrap_or(c))
            .collect(),
    }
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    let last = haystack.len().checked_sub(needle.len())?;
    (from..=last).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn rfind_chars(haystack: &[char], needle: &[char], end: usize) -> Option<usize> {
    let end = end.min(haystack.len());
    if needle.is_empty() {
        return Some(end);
    }
    let last = end.checked_sub(needle.len())?;
    (0..=last)
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn char_count(n: i64, name: &str) -> Result<usize, EvalError> {
    usize::try_from(n).map_err(|_| invalid(name))
}

fn array_arg<'a>(args: &'a [Value], name: &str) -> Result<std::cell::Ref<'a, VbArray>, EvalError> {
    match arg(args, 0) {
        Value::Array(array) => Ok(array.borrow()),
        _ => Err(EvalError::TypeMismatch(name.to_string())),
    }
}

fn bound(args: &[Value], name: &str, upper: bool) -> Result<Value, EvalError> {
    let array = array_arg(args, name)?;
    let dimension = usize::try_from(int_arg(args, 1, 1)).unwrap_or(0);
    let (lower, upper_bound) = array
        .bounds(dimension)
        .ok_or(EvalError::SubscriptOutOfRange)?;
    Ok(Value::from(if upper { upper_bound } else { lower }))
}

fn to_checked_int(value: &Value, name: &str, min: i64, max: i64) -> Result<Value, EvalError> {
    if value.to_numeric().is_none() {
        return Err(EvalError::TypeMismatch(name.to_string()));
    }
    let n = value.to_int();
    if n < min || n > max {
        Err(overflow(name))
    } else {
        Ok(Value::Integer(n))
    }
}

fn to_checked_float(value: &Value, name: &str) -> Result<Value, EvalError> {
    value
        .to_numeric()
        .map(|n| Value::Float(n.as_f64()))
        .ok_or_else(|| EvalError::TypeMismatch(name.to_string()))
}

fn split(text: &str, delimiter: &str, limit: i64, mode: CompareMode) -> Vec<Value> {
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let folded = fold(text, mode);
    let needle = fold(delimiter, mode);
    if needle.is_empty() {
        return vec![Value::from(text)];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while limit < 0 || (pieces.len() as i64) < limit - 1 {
        match find_chars(&folded, &needle, start) {
            Some(found) => {
                pieces.push(Value::String(chars[start..found].iter().collect()));
                start = found + needle.len();
            }
            None => break,
        }
    }
    pieces.push(Value::String(chars[start..].iter().collect()));
    pieces
}

fn replace(
    text: &str,
    find: &str,
    with: &str,
    start: usize,
    count: i64,
    mode: CompareMode,
) -> String {
    let chars: Vec<char> = text.chars().skip(start).collect();
    let folded: Vec<char> = fold(text, mode).into_iter().skip(start).collect();
    let needle = fold(find, mode);
    if needle.is_empty() {
        return chars.into_iter().collect();
    }

    let mut out = String::with_capacity(text.len());
    let mut replaced = 0;
    let mut i = 0;
    while i < chars.len() {
        if (count < 0 || replaced < count) && folded[i..].starts_with(&needle) {
            out.push_str(with);
            i += needle.len();
            replaced += 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    digits
        .chars()
        .enumerate()
        .fold(String::with_capacity(len + len / 3), |mut out, (i, c)| {
            if i > 0 && (len - i) % 3 == 0 {
                out.push(',');
            }
            out.push(c);
            out
        })
}

fn format_number(args: &[Value]) -> Result<Value, EvalError> {
    let n = arg(args, 0);
    if n.to_numeric().is_none() {
        return Err(EvalError::TypeMismatch("FormatNumber".to_string()));
    }
    let n = n.to_float();
    let digits = usize::try_from(int_arg(args, 1, -1)).unwrap_or(2);
    let leading_zero = int_arg(args, 2, -1) != 0;
    let parens = int_arg(args, 3, 0) == -1;
    let grouping = int_arg(args, 4, -1) != 0;

    let formatted = format!("{:.*}", digits, n.abs());
    let (whole, fraction) = formatted.split_once('.').unwrap_or((&formatted, ""));
    let whole = match (whole, leading_zero) {
        ("0", false) if !fraction.is_empty() => String::new(),
        (whole, _) if grouping => group_thousands(whole),
        (whole, _) => whole.to_string(),
    };
    let body = if fraction.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, fraction)
    };

    let negative = n < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0');
    Ok(Value::String(match (negative, parens) {
        (true, true) => format!("({})", body),
        (true, false) => format!("-{}", body),
        (false, _) => body,
    }))
}

macro_rules! null_passes {
    ($args:expr) => {
        if $args.first().is_some_and(Value::is_null) {
            return Ok(Value::Null);
        }
    };
}

pub static BUILTIN_FUNCTIONS: LazyLock<FxHashMap<SmolStr, BuiltinFunction>> =
    LazyLock::new(|| {
        let mut map = FxHashMap::default();

        // strings
        map.insert(
            SmolStr::new("len"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::from(arg(args, 0).to_string().chars().count()))
            }),
        );
        map.insert(
            SmolStr::new("left"),
            BuiltinFunction::new(ParamNum::Fixed(2), |args| {
                null_passes!(args);
                let n = char_count(arg(args, 1).to_int(), "Left")?;
                Ok(Value::String(arg(args, 0).to_string().chars().take(n).collect()))
            }),
        );
        map.insert(
            SmolStr::new("right"),
            BuiltinFunction::new(ParamNum::Fixed(2), |args| {
                null_passes!(args);
                let n = char_count(arg(args, 1).to_int(), "Right")?;
                let s = arg(args, 0).to_string();
                let skip = s.chars().count().saturating_sub(n);
                Ok(Value::String(s.chars().skip(skip).collect()))
            }),
        );
        map.insert(
            SmolStr::new("mid"),
            BuiltinFunction::new(ParamNum::Range(2, 3), |args| {
                null_passes!(args);
                let start = arg(args, 1).to_int();
                if start < 1 {
                    return Err(invalid("Mid"));
                }
                let chars = arg(args, 0).to_string();
                let chars = chars.chars().skip(char_count(start - 1, "Mid")?);
                Ok(Value::String(match arg(args, 2) {
                    Value::Empty => chars.collect(),
                    len => chars.take(char_count(len.to_int(), "Mid")?).collect(),
                }))
            }),
        );
        map.insert(
            SmolStr::new("ucase"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::String(arg(args, 0).to_string().to_uppercase()))
            }),
        );
        map.insert(
            SmolStr::new("lcase"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::String(arg(args, 0).to_string().to_lowercase()))
            }),
        );
        map.insert(
            SmolStr::new("trim"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::from(arg(args, 0).to_string().trim_matches(' ')))
            }),
        );
        map.insert(
            SmolStr::new("ltrim"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::from(arg(args, 0).to_string().trim_start_matches(' ')))
            }),
        );
        map.insert(
            SmolStr::new("rtrim"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::from(arg(args, 0).to_string().trim_end_matches(' ')))
            }),
        );
        map.insert(
            SmolStr::new("instr"),
            BuiltinFunction::new(ParamNum::Range(2, 4), |args| {
                let (start, haystack, needle, mode) = match args {
                    [haystack, needle] => (1, haystack, needle, CompareMode::Binary),
                    [start, haystack, needle] => {
                        (start.to_int(), haystack, needle, CompareMode::Binary)
                    }
                    [start, haystack, needle, _] => {
                        (start.to_int(), haystack, needle, compare_arg(args, 3))
                    }
                    _ => return Err(EvalError::InvalidNumberOfArguments("InStr".to_string())),
                };
                if haystack.is_null() || needle.is_null() {
                    return Ok(Value::Null);
                }
                if start < 1 {
                    return Err(invalid("InStr"));
                }

                let found = find_chars(
                    &fold(&haystack.to_string(), mode),
                    &fold(&needle.to_string(), mode),
                    char_count(start - 1, "InStr")?,
                );
                Ok(Value::from(found.map_or(0, |i| i + 1)))
            }),
        );
        map.insert(
            SmolStr::new("instrrev"),
            BuiltinFunction::new(ParamNum::Range(2, 4), |args| {
                if args.iter().take(2).any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let haystack = fold(&arg(args, 0).to_string(), compare_arg(args, 3));
                let needle = fold(&arg(args, 1).to_string(), compare_arg(args, 3));
                let end = match int_arg(args, 2, -1) {
                    -1 => haystack.len(),
                    n if n < 1 => return Err(invalid("InStrRev")),
                    n => char_count(n, "InStrRev")?,
                };
                if end > haystack.len() {
                    return Ok(Value::from(0));
                }

                let found = rfind_chars(&haystack, &needle, end);
                Ok(Value::from(match (found, needle.is_empty()) {
                    (Some(i), true) => i,
                    (Some(i), false) => i + 1,
                    (None, _) => 0,
                }))
            }),
        );
        map.insert(
            SmolStr::new("replace"),
            BuiltinFunction::new(ParamNum::Range(3, 6), |args| {
                null_passes!(args);
                let start = int_arg(args, 3, 1);
                if start < 1 {
                    return Err(invalid("Replace"));
                }
                Ok(Value::String(replace(
                    &arg(args, 0).to_string(),
                    &arg(args, 1).to_string(),
                    &arg(args, 2).to_string(),
                    char_count(start - 1, "Replace")?,
                    int_arg(args, 4, -1),
                    compare_arg(args, 5),
                )))
            }),
        );
        map.insert(
            SmolStr::new("split"),
            BuiltinFunction::new(ParamNum::Range(1, 4), |args| {
                let delimiter = match arg(args, 1) {
                    Value::Empty => " ".to_string(),
                    delimiter => delimiter.to_string(),
                };
                Ok(Value::from(split(
                    &arg(args, 0).to_string(),
                    &delimiter,
                    int_arg(args, 2, -1),
                    compare_arg(args, 3),
                )))
            }),
        );
        map.insert(
            SmolStr::new("join"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| {
                let array = array_arg(args, "Join")?;
                let delimiter = match arg(args, 1) {
                    Value::Empty => " ".to_string(),
                    delimiter => delimiter.to_string(),
                };
                Ok(Value::String(array.values().iter().join(&delimiter)))
            }),
        );
        map.insert(
            SmolStr::new("strreverse"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(Value::String(arg(args, 0).to_string().chars().rev().collect()))
            }),
        );
        map.insert(
            SmolStr::new("space"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                let n = char_count(arg(args, 0).to_int(), "Space")?;
                Ok(Value::String(" ".repeat(n)))
            }),
        );
        map.insert(
            SmolStr::new("string"),
            BuiltinFunction::new(ParamNum::Fixed(2), |args| {
                let n = char_count(arg(args, 0).to_int(), "String")?;
                let c = match arg(args, 1) {
                    Value::Integer(_) | Value::Float(_) => {
                        char::from_u32(u32::try_from(arg(args, 1).to_int()).unwrap_or(u32::MAX))
                    }
                    other => other.to_string().chars().next(),
                }
                .ok_or_else(|| invalid("String"))?;
                Ok(Value::String(std::iter::repeat_n(c, n).collect()))
            }),
        );
        map.insert(
            SmolStr::new("strcomp"),
            BuiltinFunction::new(ParamNum::Range(2, 3), |args| {
                if args.iter().take(2).any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let ordering = compare_strings(
                    &arg(args, 0).to_string(),
                    &arg(args, 1).to_string(),
                    compare_arg(args, 2),
                );
                Ok(Value::from(match ordering {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }))
            }),
        );
        map.insert(
            SmolStr::new("asc"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                arg(args, 0)
                    .to_string()
                    .chars()
                    .next()
                    .map(|c| Value::Integer(i64::from(u32::from(c))))
                    .ok_or_else(|| invalid("Asc"))
            }),
        );
        map.insert(
            SmolStr::new("chr"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                u32::try_from(arg(args, 0).to_int())
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| Value::String(c.to_string()))
                    .ok_or_else(|| invalid("Chr"))
            }),
        );

        // conversion
        map.insert(
            SmolStr::new("cstr"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| match arg(args, 0) {
                Value::Null => Err(EvalError::TypeMismatch("CStr".to_string())),
                value => Ok(Value::String(value.to_string())),
            }),
        );
        map.insert(
            SmolStr::new("cint"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                to_checked_int(arg(args, 0), "CInt", i16::MIN.into(), i16::MAX.into())
            }),
        );
        map.insert(
            SmolStr::new("clng"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                to_checked_int(arg(args, 0), "CLng", i32::MIN.into(), i32::MAX.into())
            }),
        );
        map.insert(
            SmolStr::new("cbyte"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                to_checked_int(arg(args, 0), "CByte", 0, 255)
            }),
        );
        map.insert(
            SmolStr::new("cdbl"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                to_checked_float(arg(args, 0), "CDbl")
            }),
        );
        map.insert(
            SmolStr::new("csng"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                to_checked_float(arg(args, 0), "CSng")
            }),
        );
        map.insert(
            SmolStr::new("cbool"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| match arg(args, 0) {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::TRUE),
                Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::FALSE),
                value => value
                    .to_numeric()
                    .map(|n| Value::Bool(n.as_f64() != 0.0))
                    .ok_or_else(|| EvalError::TypeMismatch("CBool".to_string())),
            }),
        );
        map.insert(
            SmolStr::new("hex"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                let n = arg(args, 0).to_int();
                Ok(Value::String(match i32::try_from(n) {
                    Ok(n) => format!("{:X}", n as u32),
                    Err(_) => format!("{:X}", n),
                }))
            }),
        );
        map.insert(
            SmolStr::new("oct"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                let n = arg(args, 0).to_int();
                Ok(Value::String(match i32::try_from(n) {
                    Ok(n) => format!("{:o}", n as u32),
                    Err(_) => format!("{:o}", n),
                }))
            }),
        );

        // math
        map.insert(
            SmolStr::new("int"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(match arg(args, 0).coerce_numeric() {
                    Numeric::Int(n) => Value::Integer(n),
                    Numeric::Float(n) => Value::Float(n.floor()),
                })
            }),
        );
        map.insert(
            SmolStr::new("fix"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(match arg(args, 0).coerce_numeric() {
                    Numeric::Int(n) => Value::Integer(n),
                    Numeric::Float(n) => Value::Float(n.trunc()),
                })
            }),
        );
        map.insert(
            SmolStr::new("abs"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                Ok(match arg(args, 0).coerce_numeric() {
                    Numeric::Int(n) => n
                        .checked_abs()
                        .map_or(Value::Float((n as f64).abs()), Value::Integer),
                    Numeric::Float(n) => Value::Float(n.abs()),
                })
            }),
        );
        map.insert(
            SmolStr::new("sgn"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                let n = arg(args, 0).to_float();
                Ok(Value::from(if n > 0.0 {
                    1
                } else if n < 0.0 {
                    -1
                } else {
                    0
                }))
            }),
        );
        map.insert(
            SmolStr::new("round"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| {
                null_passes!(args);
                let places = i32::try_from(int_arg(args, 1, 0))
                    .ok()
                    .filter(|places| *places >= 0)
                    .ok_or_else(|| invalid("Round"))?;
                Ok(match arg(args, 0).coerce_numeric() {
                    Numeric::Int(n) => Value::Integer(n),
                    Numeric::Float(n) => {
                        let factor = 10f64.powi(places);
                        Value::Float((n * factor).round_ties_even() / factor)
                    }
                })
            }),
        );
        map.insert(
            SmolStr::new("sqr"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                null_passes!(args);
                let n = arg(args, 0).to_float();
                if n < 0.0 {
                    return Err(invalid("Sqr"));
                }
                Ok(Value::Float(n.sqrt()))
            }),
        );

        // inspection
        map.insert(
            SmolStr::new("isnumeric"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Bool(match arg(args, 0) {
                    Value::Empty | Value::Bool(_) | Value::Integer(_) | Value::Float(_) => true,
                    Value::String(s) => parse_numeric(s).is_some(),
                    _ => false,
                }))
            }),
        );
        map.insert(
            SmolStr::new("isempty"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Bool(arg(args, 0).is_empty()))
            }),
        );
        map.insert(
            SmolStr::new("isnull"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Bool(arg(args, 0).is_null()))
            }),
        );
        map.insert(
            SmolStr::new("isobject"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Bool(arg(args, 0).is_object()))
            }),
        );
        map.insert(
            SmolStr::new("isarray"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
            }),
        );
        map.insert(
            SmolStr::new("typename"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::String(arg(args, 0).type_name()))
            }),
        );
        map.insert(
            SmolStr::new("vartype"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Integer(arg(args, 0).var_type()))
            }),
        );

        // arrays
        map.insert(
            SmolStr::new("ubound"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| bound(args, "UBound", true)),
        );
        map.insert(
            SmolStr::new("lbound"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| bound(args, "LBound", false)),
        );
        map.insert(
            SmolStr::new("array"),
            BuiltinFunction::new(ParamNum::AtLeast(0), |args| {
                Ok(Value::from(args.to_vec()))
            }),
        );
        map.insert(
            SmolStr::new("filter"),
            BuiltinFunction::new(ParamNum::Range(2, 4), |args| {
                let array = array_arg(args, "Filter")?;
                let mode = compare_arg(args, 3);
                let needle = fold(&arg(args, 1).to_string(), mode);
                let include = match arg(args, 2) {
                    Value::Empty => true,
                    include => include.is_truthy(),
                };

                let matched = array
                    .values()
                    .iter()
                    .filter(|value| {
                        let found =
                            find_chars(&fold(&value.to_string(), mode), &needle, 0).is_some();
                        found == include
                    })
                    .map(|value| Value::String(value.to_string()))
                    .collect_vec();
                Ok(Value::from(matched))
            }),
        );

        // objects and formatting
        map.insert(
            SmolStr::new("createobject"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| {
                create_object(&arg(args, 0).to_string()).map(Value::Object)
            }),
        );
        map.insert(
            SmolStr::new("formatnumber"),
            BuiltinFunction::new(ParamNum::Range(1, 5), format_number),
        );

        map
    });
