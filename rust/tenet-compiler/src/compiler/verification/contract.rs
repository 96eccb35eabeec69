//! Contracts extracted from function declarations.

use crate::compiler::ast::{Expr, FunctionDecl};
use crate::compiler::tokens::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContractKind {
    Pre,
    Post,
}

impl ContractKind {
    /// Tag used in the canonical encoding.
    pub fn tag(self) -> &'static str {
        match self {
            ContractKind::Pre => "PRE",
            ContractKind::Post => "POST",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::Pre => write!(f, "precondition"),
            ContractKind::Post => write!(f, "postcondition"),
        }
    }
}

/// One pre- or postcondition together with everything its meaning depends
/// on: the parameter signature and, for postconditions, the output type and
/// the preconditions that may be assumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub function: String,
    pub kind: ContractKind,
    /// Position among the function's contracts of the same kind.
    pub index: usize,
    pub params: Vec<(String, String)>,
    pub output: Option<String>,
    /// Preconditions in declaration order; empty for preconditions.
    pub assumptions: Vec<Expr>,
    pub expr: Expr,
}

impl Contract {
    pub fn precondition(func: &FunctionDecl, index: usize, expr: Expr) -> Self {
        Self {
            function: func.name.clone(),
            kind: ContractKind::Pre,
            index,
            params: signature(func),
            output: None,
            assumptions: Vec::new(),
            expr,
        }
    }

    pub fn postcondition(func: &FunctionDecl, index: usize, expr: Expr) -> Self {
        Self {
            function: func.name.clone(),
            kind: ContractKind::Post,
            index,
            params: signature(func),
            output: func.output.clone(),
            assumptions: func.preconditions.clone(),
            expr,
        }
    }

    /// All contracts of a function: preconditions first, then postconditions,
    /// each in declaration order.
    pub fn of_function(func: &FunctionDecl) -> Vec<Contract> {
        let pre = func
            .preconditions
            .iter()
            .enumerate()
            .map(|(i, e)| Contract::precondition(func, i, e.clone()));
        let post = func
            .postconditions
            .iter()
            .enumerate()
            .map(|(i, e)| Contract::postcondition(func, i, e.clone()));
        pre.chain(post).collect()
    }

    pub fn span(&self) -> Span {
        self.expr.span()
    }

    /// Declared type of a parameter.
    pub fn type_of(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty.as_str())
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{} of '{}'", self.kind, self.index + 1, self.function)
    }
}

fn signature(func: &FunctionDecl) -> Vec<(String, String)> {
    func.params
        .iter()
        .map(|p| (p.name.clone(), p.ty.clone()))
        .collect()
}
