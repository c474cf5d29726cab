use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }

    pub fn unknown(node: T) -> Self {
        Spanned { node, span: Span::UNKNOWN }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Spanned<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(|node| Spanned { node, span: Span::UNKNOWN })
    }
}

// ---- Core AST types ----

pub type Expr = Spanned<ExprKind>;

/// A `{ ... }` sequence of expressions. Evaluates to `undefined`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub exprs: Vec<Expr>,
}

impl Block {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Block { exprs }
    }
}

/// `function name(a, b) { body }`, name is absent for lambdas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Block,
}

impl FunDef {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("lambda")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i32),
    Str(String),
    Bool(bool),
    Undefined,
}

/// Expressions. Statements are expressions too: `var`, `if` and `return`
/// all produce a value (`undefined` for the last two).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),

    /// Variable read: `x`, `this`, `+` (operators are plain names)
    Var { name: String },

    /// `var x = e` (declare = true) or `x = e`
    Assign { name: String, value: Box<Expr>, declare: bool },

    /// `o.x`
    Field { receiver: Box<Expr>, name: String },

    /// `o.x = e`
    SetField { receiver: Box<Expr>, name: String, value: Box<Expr> },

    /// `f(a, b)`, also every binary operator: `a + b` is `+(a, b)`
    Call { callee: Box<Expr>, args: Vec<Expr> },

    /// `o.m(a, b)`, `o` is bound to `this`
    MethodCall { receiver: Box<Expr>, name: String, args: Vec<Expr> },

    Function(Box<FunDef>),

    /// `{ x: 1, y: 2 }`, field order is declaration order
    Object { fields: Vec<(String, Expr)> },

    If { condition: Box<Expr>, then_block: Block, else_block: Block },

    Return { value: Box<Expr> },

    Block(Block),
}

/// A whole source file: the body of the implicit `main` function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub body: Block,
    #[serde(skip)]
    pub source: Option<String>,
}

// ---- builders used by the parser and by tests ----

pub fn int(value: i32, span: Span) -> Expr {
    Spanned::new(ExprKind::Literal(Literal::Int(value)), span)
}

pub fn var(name: impl Into<String>, span: Span) -> Expr {
    Spanned::new(ExprKind::Var { name: name.into() }, span)
}

pub fn call(callee: Expr, args: Vec<Expr>, span: Span) -> Expr {
    Spanned::new(ExprKind::Call { callee: Box::new(callee), args }, span)
}

/// `left op right` as a call of the builtin named `op`.
pub fn binary(op: &str, left: Expr, right: Expr, op_span: Span) -> Expr {
    let span = left.span.merge(right.span);
    call(var(op, op_span), vec![left, right], span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_takes_extremes() {
        let a = Span { start: 5, end: 10 };
        let b = Span { start: 2, end: 15 };
        assert_eq!(a.merge(b), Span { start: 2, end: 15 });
    }

    #[test]
    fn span_from_range() {
        assert_eq!(Span::from(3..8), Span::new(3, 8));
    }

    #[test]
    fn spanned_serialize_transparent() {
        let s = Spanned::new(42i32, Span { start: 5, end: 10 });
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn spanned_deserialize_loses_span() {
        let s: Spanned<i32> = serde_json::from_str("42").unwrap();
        assert_eq!(s.node, 42);
        assert_eq!(s.span, Span::UNKNOWN);
    }

    #[test]
    fn binary_desugars_to_call() {
        let e = binary("+", int(1, Span::new(0, 1)), int(2, Span::new(4, 5)), Span::new(2, 3));
        assert_eq!(e.span, Span::new(0, 5));
        match &e.node {
            ExprKind::Call { callee, args } => {
                assert_eq!(callee.node, ExprKind::Var { name: "+".to_string() });
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn script_json_skips_source() {
        let script = Script {
            body: Block::new(vec![int(7, Span::new(0, 1))]),
            source: Some("7".to_string()),
        };
        let json = serde_json::to_string(&script).unwrap();
        assert!(json.contains("Int"));
        assert!(!json.contains("source"));
        let back: Script = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body.exprs.len(), 1);
        assert!(back.source.is_none());
    }

    #[test]
    fn lambda_display_name() {
        let f = FunDef { name: None, params: vec![], body: Block::default() };
        assert_eq!(f.display_name(), "lambda");
    }
}
