use std::fmt::{self, Display, Formatter};

#[cfg(feature = "ast-json")]
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{Program, Shared};
use crate::{ident::Ident, range::Range, value::CompareMode};

pub type Block = Vec<Stmt>;
pub type Args = Vec<Expr>;

/// A parsed template document: literal markup interleaved with code.
#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// The original template text, used to render diagnostics.
    #[cfg_attr(feature = "ast-json", serde(default))]
    pub source: Option<String>,
    pub sections: Vec<Section>,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// Markup copied to the response verbatim.
    Markup(String),
    /// A `<% ... %>` block.
    Code(Program),
    /// A `<%= expr %>` block.
    Output(Expr, #[cfg_attr(feature = "ast-json", serde(default))] Range),
}

impl Document {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            source: None,
            sections,
        }
    }

    pub fn from_program(program: Program) -> Self {
        Self::new(vec![Section::Code(program)])
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Iterates over every statement of every code section, in document order.
    pub fn statements(&self) -> impl Iterator<Item = &Stmt> {
        self.sections.iter().flat_map(|section| match section {
            Section::Code(program) => program.as_slice(),
            _ => &[],
        })
    }

    #[cfg(feature = "ast-json")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "ast-json")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    #[cfg_attr(feature = "ast-json", serde(default))]
    pub range: Range,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            range: Range::default(),
        }
    }

    pub fn at(mut self, range: Range) -> Self {
        self.range = range;
        self
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::new(StmtKind::Assign {
            target,
            value,
            set: false,
        })
    }

    pub fn set(target: Expr, value: Expr) -> Self {
        Self::new(StmtKind::Assign {
            target,
            value,
            set: true,
        })
    }

    pub fn call(expr: Expr) -> Self {
        Self::new(StmtKind::Call(expr))
    }

    pub fn dim(names: &[&str]) -> Self {
        Self::new(StmtKind::Dim(names.iter().map(|name| VarDecl::scalar(name)).collect()))
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// A call statement: `Foo 1, 2`, `Call Foo(1)` or `obj.Method`.
    Call(Expr),
    Assign {
        target: Expr,
        value: Expr,
        /// `Set x = ...`
        #[cfg_attr(feature = "ast-json", serde(default))]
        set: bool,
    },
    Dim(Vec<VarDecl>),
    ReDim {
        preserve: bool,
        decls: Vec<VarDecl>,
    },
    Const(Vec<ConstDecl>),
    Erase(Vec<Ident>),
    If {
        branches: Vec<Branch>,
        otherwise: Option<Block>,
    },
    For {
        counter: Ident,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Block,
    },
    ForEach {
        element: Ident,
        group: Expr,
        body: Block,
    },
    Do {
        condition: Option<LoopCondition>,
        body: Block,
    },
    While {
        condition: Expr,
        body: Block,
    },
    Select {
        subject: Expr,
        cases: Vec<CaseClause>,
        otherwise: Option<Block>,
    },
    With {
        object: Expr,
        body: Block,
    },
    Exit(ExitKind),
    Procedure(Shared<Procedure>),
    Class(Shared<ClassDecl>),
    OnError(ErrorMode),
    OptionExplicit,
    OptionCompare(CompareMode),
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Block,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCondition {
    pub test: LoopTest,
    pub position: TestPosition,
    pub expr: Expr,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTest {
    While,
    Until,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPosition {
    /// `Do While x ... Loop`
    Pre,
    /// `Do ... Loop While x`
    Post,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CaseClause {
    pub tests: Vec<CaseTest>,
    pub body: Block,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum CaseTest {
    /// `Case 1, "a"`
    Value(Expr),
    /// `Case 1 To 5`, inclusive.
    Range(Expr, Expr),
    /// `Case Is > 5`, with the select value as the left operand.
    Is(BinaryOp, Expr),
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    For,
    Do,
    While,
    Select,
    Sub,
    Function,
    Property,
}

impl Display for ExitKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitKind::For => "For",
            ExitKind::Do => "Do",
            ExitKind::While => "While",
            ExitKind::Select => "Select",
            ExitKind::Sub => "Sub",
            ExitKind::Function => "Function",
            ExitKind::Property => "Property",
        };
        write!(f, "Exit {}", s)
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    ResumeNext,
    GotoZero,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Ident,
    /// `None` for a scalar, `Some(vec![])` for a dynamic array, otherwise the upper bounds.
    #[cfg_attr(feature = "ast-json", serde(default))]
    pub dims: Option<Vec<Expr>>,
}

impl VarDecl {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: Ident::new(name),
            dims: None,
        }
    }

    pub fn array(name: &str, dims: Vec<Expr>) -> Self {
        Self {
            name: Ident::new(name),
            dims: Some(dims),
        }
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub name: Ident,
    pub value: Expr,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Public,
    Private,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Sub,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
}

impl ProcedureKind {
    /// Whether the procedure reads its result back from a slot named after itself.
    pub fn returns_value(&self) -> bool {
        matches!(self, ProcedureKind::Function | ProcedureKind::PropertyGet)
    }

    pub fn exit_kind(&self) -> ExitKind {
        match self {
            ProcedureKind::Sub => ExitKind::Sub,
            ProcedureKind::Function => ExitKind::Function,
            ProcedureKind::PropertyGet | ProcedureKind::PropertyLet | ProcedureKind::PropertySet => {
                ExitKind::Property
            }
        }
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: Ident,
    pub kind: ProcedureKind,
    #[cfg_attr(feature = "ast-json", serde(default))]
    pub access: Access,
    #[cfg_attr(feature = "ast-json", serde(default))]
    pub is_default: bool,
    pub params: Vec<Param>,
    pub body: Block,
}

impl Procedure {
    pub fn new(kind: ProcedureKind, name: &str, params: Vec<Param>, body: Block) -> Self {
        Self {
            name: Ident::new(name),
            kind,
            access: Access::Public,
            is_default: false,
            params,
            body,
        }
    }

    pub fn private(mut self) -> Self {
        self.access = Access::Private;
        self
    }

    pub fn default_member(mut self) -> Self {
        self.is_default = true;
        self
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    #[cfg_attr(feature = "ast-json", serde(default))]
    pub by_val: bool,
}

impl Param {
    pub fn by_ref(name: &str) -> Self {
        Self {
            name: Ident::new(name),
            by_val: false,
        }
    }

    pub fn by_val(name: &str) -> Self {
        Self {
            name: Ident::new(name),
            by_val: true,
        }
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    /// The class name as written; lookups go through [`ClassDecl::ident`].
    pub name: SmolStr,
    pub members: Vec<ClassMember>,
}

impl ClassDecl {
    pub fn ident(&self) -> Ident {
        Ident::new(&self.name)
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ClassMember {
    Field { access: Access, decl: VarDecl },
    Procedure(Shared<Procedure>),
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Empty,
    Null,
    Nothing,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(SmolStr),
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Eqv,
    Imp,
    Is,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "\\",
            BinaryOp::Mod => "Mod",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::Eqv => "Eqv",
            BinaryOp::Imp => "Imp",
            BinaryOp::Is => "Is",
        };
        write!(f, "{}", s)
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(Ident),
    Me,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `callee(args)`; the guest language does not distinguish calls from indexing.
    Call(Box<Expr>, Args),
    Member(Box<Expr>, Ident),
    /// `.name` inside a `With` block.
    WithMember(Ident),
    New(Ident),
    /// An omitted argument, as in `Foo(1, , 3)`.
    Missing,
}

impl Expr {
    pub fn ident(name: &str) -> Self {
        Expr::Ident(Ident::new(name))
    }

    pub fn string(s: &str) -> Self {
        Expr::Literal(Literal::String(SmolStr::new(s)))
    }

    pub fn int(n: i64) -> Self {
        Expr::Literal(Literal::Integer(n))
    }

    pub fn float(n: f64) -> Self {
        Expr::Literal(Literal::Float(n))
    }

    pub fn bool(b: bool) -> Self {
        Expr::Literal(Literal::Bool(b))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn call(callee: Expr, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call(Box::new(callee), args.into_iter().collect())
    }

    pub fn member(object: Expr, name: &str) -> Self {
        Expr::Member(Box::new(object), Ident::new(name))
    }

    pub fn new_object(class: &str) -> Self {
        Expr::New(Ident::new(class))
    }
}
