use thiserror::Error;

type Name = String;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("subscript out of range")]
    SubscriptOutOfRange,
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("variable '{0}' is undefined")]
    UndefinedVariable(Name),
    #[error("undefined function '{0}'")]
    UndefinedFunction(Name),
    #[error("method '{0}' not found")]
    MethodNotFound(Name),
    #[error("member '{0}' not found")]
    MemberNotFound(Name),
    #[error("property '{0}' not found or not writable")]
    PropertyNotWritable(Name),
    #[error("class not defined: {0}")]
    ClassNotDefined(Name),
    #[error("{0} is not a class")]
    NotAClass(Name),
    #[error("member '{0}' is already defined in class '{1}'")]
    DuplicateMember(Name, Name),
    #[error("invalid use of 'Me' keyword outside of class")]
    MeOutsideClass,
    #[error("invalid reference to .{0} outside of With block")]
    WithOutsideBlock(Name),
    #[error("constant '{0}' already defined")]
    ConstantAlreadyDefined(Name),
    #[error("cannot define constant with name of existing variable '{0}'")]
    ConstantShadowsVariable(Name),
    #[error("cannot assign to constant '{0}'")]
    AssignToConstant(Name),
    #[error("object required: '{0}'")]
    ObjectRequired(Name),
    #[error("object doesn't support this property or method: '{0}'")]
    NotSupported(Name),
    #[error("wrong number of arguments or invalid property assignment: '{0}'")]
    InvalidNumberOfArguments(Name),
    #[error("invalid procedure call or argument: '{0}'")]
    InvalidArgument(Name),
    #[error("key '{0}' already exists")]
    DuplicateKey(String),
    #[error("cannot create object '{0}'")]
    CannotCreateObject(String),
    #[error("object cannot be stored in shared state")]
    NotShareable,
    #[error("{description}")]
    Raised {
        number: i64,
        origin: String,
        description: String,
    },
    #[error("maximum call depth exceeded ({0})")]
    RecursionError(u32),
    #[error("execution timeout exceeded")]
    Timeout,
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EvalError {
    /// The number the guest language reports through `Err.Number`.
    pub fn number(&self) -> i64 {
        match self {
            EvalError::DivisionByZero => 11,
            EvalError::SubscriptOutOfRange => 9,
            EvalError::TypeMismatch(_) | EvalError::UndefinedFunction(_) => 13,
            EvalError::UndefinedVariable(_) => 500,
            EvalError::MethodNotFound(_)
            | EvalError::MemberNotFound(_)
            | EvalError::PropertyNotWritable(_)
            | EvalError::NotSupported(_) => 438,
            EvalError::ClassNotDefined(_) => 506,
            EvalError::NotAClass(_) | EvalError::CannotCreateObject(_) => 429,
            EvalError::DuplicateMember(_, _)
            | EvalError::ConstantAlreadyDefined(_)
            | EvalError::ConstantShadowsVariable(_) => 1041,
            EvalError::AssignToConstant(_) => 501,
            EvalError::MeOutsideClass
            | EvalError::WithOutsideBlock(_)
            | EvalError::ObjectRequired(_) => 424,
            EvalError::InvalidNumberOfArguments(_) => 450,
            EvalError::InvalidArgument(_) | EvalError::NotShareable | EvalError::Runtime(_) => 5,
            EvalError::DuplicateKey(_) => 457,
            EvalError::Raised { number, .. } => *number,
            EvalError::RecursionError(_) => 28,
            EvalError::Timeout => 0x0102,
        }
    }

    /// The `Err.Source` reported for this error.
    pub fn source_name(&self) -> &str {
        match self {
            EvalError::Raised { origin, .. } => origin,
            _ => "Microsoft VBScript runtime error",
        }
    }

    /// Fatal errors abort the request even under `On Error Resume Next`.
    #[inline(always)]
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::RecursionError(_) | EvalError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::division(EvalError::DivisionByZero, 11, false)]
    #[case::subscript(EvalError::SubscriptOutOfRange, 9, false)]
    #[case::raised(EvalError::Raised { number: 1001, origin: "app".to_string(), description: "boom".to_string() }, 1001, false)]
    #[case::recursion(EvalError::RecursionError(32), 28, true)]
    #[case::timeout(EvalError::Timeout, 0x0102, true)]
    fn test_number_and_fatality(
        #[case] error: EvalError,
        #[case] number: i64,
        #[case] fatal: bool,
    ) {
        assert_eq!(error.number(), number);
        assert_eq!(error.is_fatal(), fatal);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            EvalError::ClassNotDefined("Widget".to_string()).to_string(),
            "class not defined: Widget"
        );
        assert_eq!(
            EvalError::WithOutsideBlock("name".to_string()).to_string(),
            "invalid reference to .name outside of With block"
        );
    }
}
