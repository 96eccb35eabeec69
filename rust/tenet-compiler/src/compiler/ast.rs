//! Bound program model consumed by the middle-end.
//!
//! The binder hands us fully resolved function bodies: every call carries the
//! fully-qualified callee it was bound to and the parameter types of the
//! selected overload, so effect inference never has to redo overload
//! resolution.

use crate::compiler::tokens::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ── Program / functions ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FunctionDecl>,
}

impl Program {
    pub fn new(functions: Vec<FunctionDecl>) -> Self {
        Self { functions }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: String,
    pub span: Span,
}

impl Param {
    pub fn new(name: &str, ty: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            span: Span::dummy(),
        }
    }
}

/// A bound function with its authored contracts and effect declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Fully-qualified name, e.g. `App.Orders::Submit`.
    pub name: String,
    pub params: Vec<Param>,
    /// Output type, `None` for unit-returning functions.
    pub output: Option<String>,
    pub body: Vec<Stmt>,
    /// Raw declared effect names (`io:console_write`, `mutation`, ...).
    pub effects: Vec<String>,
    pub preconditions: Vec<Expr>,
    pub postconditions: Vec<Expr>,
    pub span: Span,
}

impl FunctionDecl {
    pub fn new(name: &str, params: Vec<Param>, output: Option<&str>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.to_string(),
            params,
            output: output.map(str::to_string),
            body,
            effects: Vec::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            span: Span::dummy(),
        }
    }

    pub fn with_effects(mut self, effects: &[&str]) -> Self {
        self.effects = effects.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_preconditions(mut self, pre: Vec<Expr>) -> Self {
        self.preconditions = pre;
        self
    }

    pub fn with_postconditions(mut self, post: Vec<Expr>) -> Self {
        self.postconditions = post;
        self
    }
}

/// Reference to the method a call was bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallRef {
    /// `Namespace.Type::Method`, or a program function name.
    pub callee: String,
    pub param_types: Vec<String>,
}

impl CallRef {
    pub fn new(callee: &str, param_types: &[&str]) -> Self {
        Self {
            callee: callee.to_string(),
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Fully-qualified signature: `Namespace.Type::Method(T1,T2)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.callee, self.param_types.join(","))
    }
}

impl fmt::Display for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `let name = value`
    Let { name: String, value: Expr, span: Span },
    /// `name = value`
    Assign { name: String, value: Expr, span: Span },
    /// `object.field = value`, optionally through a bound property setter
    FieldAssign {
        object: Expr,
        field: String,
        setter: Option<CallRef>,
        value: Expr,
        span: Span,
    },
    /// Expression evaluated for its effects
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        span: Span,
    },
    While { cond: Expr, body: Vec<Stmt>, span: Span },
    Return(Option<Expr>, Span),
    /// Intentional throw
    Throw(Expr, Span),
}

impl Stmt {
    pub fn let_(name: &str, value: Expr) -> Self {
        Stmt::Let {
            name: name.to_string(),
            value,
            span: Span::dummy(),
        }
    }

    pub fn assign(name: &str, value: Expr) -> Self {
        Stmt::Assign {
            name: name.to_string(),
            value,
            span: Span::dummy(),
        }
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::Return(value, Span::dummy())
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::FieldAssign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Return(_, span)
            | Stmt::Throw(_, span) => *span,
            Stmt::Expr(e) => e.span(),
        }
    }
}

// ── Expressions ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    IntLit(i64, Span),
    FloatLit(f64, Span),
    StringLit(String, Span),
    BoolLit(bool, Span),
    NullLit(Span),
    /// Variable reference
    Ident(String, Span),
    /// The function's return value, only meaningful in postconditions
    ResultRef(Span),
    BinOp(Box<Expr>, BinOp, Box<Expr>, Span),
    UnaryOp(UnaryOp, Box<Expr>, Span),
    /// Bound call, with an optional instance receiver
    Call {
        target: CallRef,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
        span: Span,
    },
    /// Object construction through a bound constructor
    New {
        ctor: CallRef,
        args: Vec<Expr>,
        span: Span,
    },
    /// Field or property read; `accessor` is set when a getter runs
    Member {
        object: Box<Expr>,
        member: String,
        accessor: Option<CallRef>,
        span: Span,
    },
    Lambda {
        params: Vec<Param>,
        body: Vec<Stmt>,
        span: Span,
    },
    Await(Box<Expr>, Span),
    Conditional {
        cond: Box<Expr>,
        then_val: Box<Expr>,
        else_val: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::IntLit(v, Span::dummy())
    }

    pub fn float(v: f64) -> Self {
        Expr::FloatLit(v, Span::dummy())
    }

    pub fn string(s: &str) -> Self {
        Expr::StringLit(s.to_string(), Span::dummy())
    }

    pub fn boolean(b: bool) -> Self {
        Expr::BoolLit(b, Span::dummy())
    }

    pub fn ident(name: &str) -> Self {
        Expr::Ident(name.to_string(), Span::dummy())
    }

    pub fn result() -> Self {
        Expr::ResultRef(Span::dummy())
    }

    pub fn binary(lhs: Expr, op: BinOp, rhs: Expr) -> Self {
        Expr::BinOp(Box::new(lhs), op, Box::new(rhs), Span::dummy())
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::UnaryOp(op, Box::new(operand), Span::dummy())
    }

    pub fn call(target: CallRef, args: Vec<Expr>) -> Self {
        Expr::Call {
            target,
            receiver: None,
            args,
            span: Span::dummy(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::IntLit(_, s)
            | Expr::FloatLit(_, s)
            | Expr::StringLit(_, s)
            | Expr::BoolLit(_, s)
            | Expr::NullLit(s)
            | Expr::Ident(_, s)
            | Expr::ResultRef(s)
            | Expr::BinOp(_, _, _, s)
            | Expr::UnaryOp(_, _, s)
            | Expr::Await(_, s) => *s,
            Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::Member { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Conditional { span, .. } => *span,
        }
    }

    /// Re-stamp this expression's own span (children are untouched).
    pub fn at(mut self, line: usize, col: usize) -> Self {
        let new = Span::at(line, col);
        match &mut self {
            Expr::IntLit(_, s)
            | Expr::FloatLit(_, s)
            | Expr::StringLit(_, s)
            | Expr::BoolLit(_, s)
            | Expr::NullLit(s)
            | Expr::Ident(_, s)
            | Expr::ResultRef(s)
            | Expr::BinOp(_, _, _, s)
            | Expr::UnaryOp(_, _, s)
            | Expr::Await(_, s) => *s = new,
            Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::Member { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Conditional { span, .. } => *span = new,
        }
        self
    }

    /// Variables this expression reads, including variables captured by
    /// lambda bodies.
    pub fn used_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_expr_uses(self, &mut out);
        out
    }
}

fn collect_expr_uses(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::IntLit(..)
        | Expr::FloatLit(..)
        | Expr::StringLit(..)
        | Expr::BoolLit(..)
        | Expr::NullLit(_)
        | Expr::ResultRef(_) => {}
        Expr::Ident(name, _) => {
            out.insert(name.clone());
        }
        Expr::BinOp(l, _, r, _) => {
            collect_expr_uses(l, out);
            collect_expr_uses(r, out);
        }
        Expr::UnaryOp(_, e, _) | Expr::Await(e, _) => collect_expr_uses(e, out),
        Expr::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                collect_expr_uses(r, out);
            }
            for a in args {
                collect_expr_uses(a, out);
            }
        }
        Expr::New { args, .. } => {
            for a in args {
                collect_expr_uses(a, out);
            }
        }
        Expr::Member { object, .. } => collect_expr_uses(object, out),
        Expr::Lambda { params, body, .. } => {
            let mut inner = BTreeSet::new();
            let mut locals: BTreeSet<String> = params.iter().map(|p| p.name.clone()).collect();
            for stmt in body {
                collect_stmt_uses(stmt, &mut inner, &mut locals);
            }
            out.extend(inner.into_iter().filter(|v| !locals.contains(v)));
        }
        Expr::Conditional {
            cond,
            then_val,
            else_val,
            ..
        } => {
            collect_expr_uses(cond, out);
            collect_expr_uses(then_val, out);
            collect_expr_uses(else_val, out);
        }
    }
}

fn collect_stmt_uses(stmt: &Stmt, out: &mut BTreeSet<String>, locals: &mut BTreeSet<String>) {
    match stmt {
        Stmt::Let { name, value, .. } => {
            collect_expr_uses(value, out);
            locals.insert(name.clone());
        }
        Stmt::Assign { value, .. } => collect_expr_uses(value, out),
        Stmt::FieldAssign { object, value, .. } => {
            collect_expr_uses(object, out);
            collect_expr_uses(value, out);
        }
        Stmt::Expr(e) | Stmt::Throw(e, _) => collect_expr_uses(e, out),
        Stmt::Return(e, _) => {
            if let Some(e) = e {
                collect_expr_uses(e, out);
            }
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            collect_expr_uses(cond, out);
            for s in then_body.iter().chain(else_body) {
                collect_stmt_uses(s, out, locals);
            }
        }
        Stmt::While { cond, body, .. } => {
            collect_expr_uses(cond, out);
            for s in body {
                collect_stmt_uses(s, out, locals);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_joins_param_types() {
        let c = CallRef::new("System.Console::WriteLine", &["System.String"]);
        assert_eq!(c.signature(), "System.Console::WriteLine(System.String)");
        assert_eq!(CallRef::new("A.B::C", &[]).signature(), "A.B::C()");
    }

    #[test]
    fn lambda_captures_are_uses_but_params_are_not() {
        let lambda = Expr::Lambda {
            params: vec![Param::new("item", "Int")],
            body: vec![
                Stmt::let_("tmp", Expr::binary(Expr::ident("item"), BinOp::Add, Expr::ident("offset"))),
                Stmt::ret(Some(Expr::ident("tmp"))),
            ],
            span: Span::dummy(),
        };
        let uses = lambda.used_variables();
        assert_eq!(uses.into_iter().collect::<Vec<_>>(), vec!["offset".to_string()]);
    }
}
