//! Whole-program call graph and per-function body summaries.
//!
//! Calls made inside lambdas, property accessors, constructors and awaited
//! expressions are attributed to the enclosing function.

use crate::compiler::ast::{CallRef, Expr, FunctionDecl, Program, Stmt};
use crate::compiler::tokens::Span;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};

/// How a call site was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    Constructor,
    Getter,
    Setter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub target: CallRef,
    pub kind: CallKind,
    pub span: Span,
}

/// Effects a body performs by itself, without calling anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectEffect {
    Throw { span: Span },
    /// Raw field store to an object this function did not allocate.
    FieldWrite { object: String, field: String, span: Span },
}

impl DirectEffect {
    pub fn span(&self) -> Span {
        match self {
            DirectEffect::Throw { span } | DirectEffect::FieldWrite { span, .. } => *span,
        }
    }
}

/// Everything effect inference needs to know about one body, in source
/// order.
#[derive(Debug, Clone, Default)]
pub struct FunctionSummary {
    pub calls: Vec<CallSite>,
    pub direct: Vec<DirectEffect>,
}

impl FunctionSummary {
    pub fn of(func: &FunctionDecl) -> Self {
        let mut collector = Collector {
            summary: FunctionSummary::default(),
            local_objects: local_allocations(func),
        };
        collector.stmts(&func.body);
        collector.summary
    }
}

// ── Body walk ───────────────────────────────────────────────────────

struct Collector {
    summary: FunctionSummary,
    local_objects: BTreeSet<String>,
}

impl Collector {
    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { value, .. } | Stmt::Assign { value, .. } => self.expr(value),
            Stmt::FieldAssign {
                object,
                field,
                setter,
                value,
                span,
            } => {
                self.expr(object);
                self.expr(value);
                match setter {
                    Some(target) => self.call(target, CallKind::Setter, *span),
                    None => {
                        // Only a direct store into a fresh object is local.
                        let local = matches!(
                            object,
                            Expr::Ident(name, _) if self.local_objects.contains(name)
                        );
                        if !local {
                            self.summary.direct.push(DirectEffect::FieldWrite {
                                object: root_variable(object).unwrap_or_else(|| "<expr>".to_string()),
                                field: field.clone(),
                                span: *span,
                            });
                        }
                    }
                }
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.expr(cond);
                self.stmts(then_body);
                self.stmts(else_body);
            }
            Stmt::While { cond, body, .. } => {
                self.expr(cond);
                self.stmts(body);
            }
            Stmt::Return(value, _) => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Throw(value, span) => {
                self.expr(value);
                self.summary.direct.push(DirectEffect::Throw { span: *span });
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::IntLit(..)
            | Expr::FloatLit(..)
            | Expr::StringLit(..)
            | Expr::BoolLit(..)
            | Expr::NullLit(_)
            | Expr::Ident(..)
            | Expr::ResultRef(_) => {}
            Expr::BinOp(lhs, _, rhs, _) => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::UnaryOp(_, operand, _) | Expr::Await(operand, _) => self.expr(operand),
            Expr::Call {
                target,
                receiver,
                args,
                span,
            } => {
                if let Some(r) = receiver {
                    self.expr(r);
                }
                for a in args {
                    self.expr(a);
                }
                self.call(target, CallKind::Call, *span);
            }
            Expr::New { ctor, args, span } => {
                for a in args {
                    self.expr(a);
                }
                self.call(ctor, CallKind::Constructor, *span);
            }
            Expr::Member {
                object,
                accessor,
                span,
                ..
            } => {
                self.expr(object);
                if let Some(getter) = accessor {
                    self.call(getter, CallKind::Getter, *span);
                }
            }
            Expr::Lambda { body, .. } => self.stmts(body),
            Expr::Conditional {
                cond,
                then_val,
                else_val,
                ..
            } => {
                self.expr(cond);
                self.expr(then_val);
                self.expr(else_val);
            }
        }
    }

    fn call(&mut self, target: &CallRef, kind: CallKind, span: Span) {
        self.summary.calls.push(CallSite {
            target: target.clone(),
            kind,
            span,
        });
    }
}

fn root_variable(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name, _) => Some(name.clone()),
        Expr::Member { object, .. } => root_variable(object),
        _ => None,
    }
}

/// Variables that only ever hold objects constructed in this function.
/// Parameters (including lambda parameters) never qualify.
fn local_allocations(func: &FunctionDecl) -> BTreeSet<String> {
    let mut fresh = BTreeSet::new();
    let mut tainted: BTreeSet<String> = func.params.iter().map(|p| p.name.clone()).collect();
    scan_assignments(&func.body, &mut fresh, &mut tainted);
    fresh.difference(&tainted).cloned().collect()
}

fn scan_assignments(stmts: &[Stmt], fresh: &mut BTreeSet<String>, tainted: &mut BTreeSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Let { name, value, .. } | Stmt::Assign { name, value, .. } => {
                if matches!(value, Expr::New { .. }) {
                    fresh.insert(name.clone());
                } else {
                    tainted.insert(name.clone());
                }
                scan_lambdas(value, fresh, tainted);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                scan_lambdas(cond, fresh, tainted);
                scan_assignments(then_body, fresh, tainted);
                scan_assignments(else_body, fresh, tainted);
            }
            Stmt::While { cond, body, .. } => {
                scan_lambdas(cond, fresh, tainted);
                scan_assignments(body, fresh, tainted);
            }
            Stmt::FieldAssign { object, value, .. } => {
                scan_lambdas(object, fresh, tainted);
                scan_lambdas(value, fresh, tainted);
            }
            Stmt::Expr(e) | Stmt::Throw(e, _) | Stmt::Return(Some(e), _) => {
                scan_lambdas(e, fresh, tainted)
            }
            Stmt::Return(None, _) => {}
        }
    }
}

fn scan_lambdas(expr: &Expr, fresh: &mut BTreeSet<String>, tainted: &mut BTreeSet<String>) {
    match expr {
        Expr::Lambda { params, body, .. } => {
            tainted.extend(params.iter().map(|p| p.name.clone()));
            scan_assignments(body, fresh, tainted);
        }
        Expr::BinOp(lhs, _, rhs, _) => {
            scan_lambdas(lhs, fresh, tainted);
            scan_lambdas(rhs, fresh, tainted);
        }
        Expr::UnaryOp(_, e, _) | Expr::Await(e, _) => scan_lambdas(e, fresh, tainted),
        Expr::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                scan_lambdas(r, fresh, tainted);
            }
            for a in args {
                scan_lambdas(a, fresh, tainted);
            }
        }
        Expr::New { args, .. } => {
            for a in args {
                scan_lambdas(a, fresh, tainted);
            }
        }
        Expr::Member { object, .. } => scan_lambdas(object, fresh, tainted),
        Expr::Conditional {
            cond,
            then_val,
            else_val,
            ..
        } => {
            scan_lambdas(cond, fresh, tainted);
            scan_lambdas(then_val, fresh, tainted);
            scan_lambdas(else_val, fresh, tainted);
        }
        _ => {}
    }
}

// ── Graph ───────────────────────────────────────────────────────────

/// Call graph over program functions. Nodes are indices into
/// `Program::functions`; external callees have no node.
#[derive(Debug)]
pub struct CallGraph {
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
    by_name: BTreeMap<String, usize>,
    summaries: Vec<FunctionSummary>,
}

impl CallGraph {
    pub fn build(program: &Program) -> Self {
        let mut graph = DiGraph::new();
        let mut by_name = BTreeMap::new();
        let mut nodes = Vec::with_capacity(program.functions.len());
        for (i, func) in program.functions.iter().enumerate() {
            nodes.push(graph.add_node(i));
            if by_name.insert(func.name.clone(), i).is_some() {
                log::warn!("duplicate function '{}'; calls bind to the last one", func.name);
            }
        }
        let summaries: Vec<FunctionSummary> =
            program.functions.iter().map(FunctionSummary::of).collect();
        for (caller, summary) in summaries.iter().enumerate() {
            let callees: BTreeSet<usize> = summary
                .calls
                .iter()
                .filter_map(|site| by_name.get(&site.target.callee).copied())
                .collect();
            for callee in callees {
                graph.add_edge(nodes[caller], nodes[callee], ());
            }
        }
        Self {
            graph,
            nodes,
            by_name,
            summaries,
        }
    }

    /// Program function a call binds to, if any.
    pub fn internal_target(&self, call: &CallRef) -> Option<usize> {
        self.by_name.get(&call.callee).copied()
    }

    pub fn summary(&self, function: usize) -> &FunctionSummary {
        &self.summaries[function]
    }

    pub fn callees(&self, function: usize) -> BTreeSet<usize> {
        self.graph
            .neighbors(self.nodes[function])
            .map(|n| self.graph[n])
            .collect()
    }

    /// SCCs with callees before callers; members sorted by index.
    pub fn sccs(&self) -> Vec<Vec<usize>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .map(|component| {
                let mut members: Vec<usize> = component.iter().map(|n| self.graph[*n]).collect();
                members.sort_unstable();
                members
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
