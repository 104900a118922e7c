use miette::{Diagnostic, SourceOffset, SourceSpan};

use crate::{eval::error::EvalError, range::Range};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InnerError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("request panicked: {0}")]
    Panic(String),
}

/// Represents a failed request with diagnostic information for the user.
#[derive(PartialEq, Debug, thiserror::Error)]
#[error("{cause}")]
pub struct Error {
    /// The underlying cause of the error.
    pub cause: InnerError,
    /// The template text of the failing document, empty when unknown.
    pub source_code: String,
    /// The location of the failing statement inside `source_code`.
    pub location: SourceSpan,
}

impl Error {
    pub fn from_error(source_code: Option<&str>, cause: InnerError, range: Option<Range>) -> Self {
        let source_code = source_code.unwrap_or_default().to_string();
        let location = match range {
            Some(range) if !source_code.is_empty() => {
                let start = SourceOffset::from_location(
                    &source_code,
                    range.start.line as usize,
                    range.start.column,
                );
                let end = SourceOffset::from_location(
                    &source_code,
                    range.end.line as usize,
                    range.end.column,
                );
                SourceSpan::new(
                    start,
                    std::cmp::max(end.offset().saturating_sub(start.offset()), 1),
                )
            }
            _ => SourceSpan::new(SourceOffset::from(0), 0),
        };

        Self {
            cause,
            source_code,
            location,
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::from_error(None, InnerError::Panic(message.into()), None)
    }

    /// The number `Err.Number` would report for this failure.
    pub fn number(&self) -> Option<i64> {
        match &self.cause {
            InnerError::Eval(error) => Some(error.number()),
            InnerError::Panic(_) => None,
        }
    }
}

impl Diagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let code = match &self.cause {
            InnerError::Eval(error) => match error {
                EvalError::DivisionByZero => "EvalError::DivisionByZero",
                EvalError::SubscriptOutOfRange => "EvalError::SubscriptOutOfRange",
                EvalError::TypeMismatch(_) => "EvalError::TypeMismatch",
                EvalError::UndefinedVariable(_) => "EvalError::UndefinedVariable",
                EvalError::UndefinedFunction(_) => "EvalError::UndefinedFunction",
                EvalError::MethodNotFound(_) => "EvalError::MethodNotFound",
                EvalError::MemberNotFound(_) => "EvalError::MemberNotFound",
                EvalError::PropertyNotWritable(_) => "EvalError::PropertyNotWritable",
                EvalError::ClassNotDefined(_) => "EvalError::ClassNotDefined",
                EvalError::NotAClass(_) => "EvalError::NotAClass",
                EvalError::DuplicateMember(_, _) => "EvalError::DuplicateMember",
                EvalError::MeOutsideClass => "EvalError::MeOutsideClass",
                EvalError::WithOutsideBlock(_) => "EvalError::WithOutsideBlock",
                EvalError::ConstantAlreadyDefined(_) => "EvalError::ConstantAlreadyDefined",
                EvalError::ConstantShadowsVariable(_) => "EvalError::ConstantShadowsVariable",
                EvalError::AssignToConstant(_) => "EvalError::AssignToConstant",
                EvalError::ObjectRequired(_) => "EvalError::ObjectRequired",
                EvalError::NotSupported(_) => "EvalError::NotSupported",
                EvalError::InvalidNumberOfArguments(_) => "EvalError::InvalidNumberOfArguments",
                EvalError::InvalidArgument(_) => "EvalError::InvalidArgument",
                EvalError::DuplicateKey(_) => "EvalError::DuplicateKey",
                EvalError::CannotCreateObject(_) => "EvalError::CannotCreateObject",
                EvalError::NotShareable => "EvalError::NotShareable",
                EvalError::Raised { .. } => "EvalError::Raised",
                EvalError::RecursionError(_) => "EvalError::RecursionError",
                EvalError::Timeout => "EvalError::Timeout",
                EvalError::Runtime(_) => "EvalError::Runtime",
            },
            InnerError::Panic(_) => "Panic",
        };

        Some(Box::new(code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let msg = match &self.cause {
            InnerError::Eval(EvalError::DivisionByZero) => {
                Some("Division by zero is not allowed.".to_string())
            }
            InnerError::Eval(EvalError::SubscriptOutOfRange) => Some(
                "The index is outside the array bounds. Check UBound or ReDim the array first."
                    .to_string(),
            ),
            InnerError::Eval(EvalError::UndefinedFunction(name)) => Some(format!(
                "'{name}' is not a sub, function or built-in. Did you forget to declare it?"
            )),
            InnerError::Eval(EvalError::ClassNotDefined(name)) => {
                Some(format!("Declare 'Class {name}' before creating instances of it."))
            }
            InnerError::Eval(EvalError::RecursionError(depth)) => Some(format!(
                "Procedure calls nested deeper than {depth} levels. Check for unbounded recursion."
            )),
            InnerError::Eval(EvalError::Timeout) => Some(
                "The script ran past its timeout. Raise Server.ScriptTimeout or ASP_SCRIPT_TIMEOUT."
                    .to_string(),
            ),
            InnerError::Eval(EvalError::NotShareable) => Some(
                "Only strings, numbers, booleans and arrays of those can be stored in Application or Session."
                    .to_string(),
            ),
            InnerError::Panic(_) => {
                Some("An internal error occurred. Please report this if it persists.".to_string())
            }
            _ => None,
        };

        msg.map(|m| Box::new(m) as Box<dyn std::fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        if self.source_code.is_empty() {
            return None;
        }
        Some(Box::new(std::iter::once(
            miette::LabeledSpan::new_with_span(Some(format!("{}", self.cause)), self.location),
        )))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        if self.source_code.is_empty() {
            None
        } else {
            Some(&self.source_code)
        }
    }
}
