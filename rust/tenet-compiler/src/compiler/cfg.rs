//! Control-flow graph IR shared by the dataflow analyses.
//!
//! A [`ControlFlowGraph`] owns every [`BasicBlock`] of one function body.
//! Blocks refer to each other by [`BlockId`] (an index into the block arena),
//! never by reference. Every assignment receives a stable [`DefId`] when the
//! graph is built, so later passes identify definition sites by id instead of
//! by comparing statements.

use crate::compiler::ast::{Expr, FunctionDecl, Stmt};
use crate::compiler::tokens::Span;
use std::collections::BTreeSet;
use std::fmt;

// ── Identifiers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Stable identity of one assignment (or parameter binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefId(pub usize);

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `target = value`; `def` identifies this definition site.
    Assign {
        def: DefId,
        target: String,
        value: Expr,
        span: Span,
    },
    /// `object.field = value`. Not a variable definition.
    Store {
        object: Expr,
        field: String,
        value: Expr,
        span: Span,
    },
    Eval(Expr),
    Return(Option<Expr>, Span),
    Throw(Expr, Span),
}

impl Statement {
    /// Variable defined by this statement, if any.
    pub fn defined_variable(&self) -> Option<&str> {
        match self {
            Statement::Assign { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn def_id(&self) -> Option<DefId> {
        match self {
            Statement::Assign { def, .. } => Some(*def),
            _ => None,
        }
    }

    /// Variables read by this statement.
    pub fn used_variables(&self) -> BTreeSet<String> {
        match self {
            Statement::Assign { value, .. } => value.used_variables(),
            Statement::Store { object, value, .. } => {
                let mut uses = object.used_variables();
                uses.extend(value.used_variables());
                uses
            }
            Statement::Eval(e) | Statement::Throw(e, _) => e.used_variables(),
            Statement::Return(Some(e), _) => e.used_variables(),
            Statement::Return(None, _) => BTreeSet::new(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Statement::Assign { span, .. }
            | Statement::Store { span, .. }
            | Statement::Return(_, span)
            | Statement::Throw(_, span) => *span,
            Statement::Eval(e) => e.span(),
        }
    }
}

// ── Blocks and graph ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    /// Evaluated at block exit; successors are `[true, false]` when set.
    pub condition: Option<Expr>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            statements: Vec::new(),
            condition: None,
            successors: Vec::new(),
            predecessors: Vec::new(),
        }
    }
}

/// One assignment site, element of the reaching-definitions lattice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionSite {
    pub id: DefId,
    pub variable: String,
    pub block: BlockId,
    /// Index of the assigning statement; `None` for parameters.
    pub statement: Option<usize>,
    pub span: Span,
}

/// Violation of the block shape invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeError {
    pub block: BlockId,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    function: String,
    blocks: Vec<BasicBlock>,
    entry: BlockId,
    exit: BlockId,
    definitions: Vec<DefinitionSite>,
}

impl ControlFlowGraph {
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Blocks in block-id order.
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// All definition sites, indexed by `DefId`.
    pub fn definitions(&self) -> &[DefinitionSite] {
        &self.definitions
    }

    pub fn definition(&self, id: DefId) -> Option<&DefinitionSite> {
        self.definitions.get(id.0)
    }

    /// Definition sites bound to parameters (no assigning statement).
    pub fn parameter_definitions(&self) -> impl Iterator<Item = &DefinitionSite> {
        self.definitions.iter().filter(|d| d.statement.is_none())
    }

    /// Every variable name defined or used anywhere in the graph.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars: BTreeSet<String> =
            self.definitions.iter().map(|d| d.variable.clone()).collect();
        for block in &self.blocks {
            for stmt in &block.statements {
                vars.extend(stmt.used_variables());
            }
            if let Some(cond) = &block.condition {
                vars.extend(cond.used_variables());
            }
        }
        vars
    }

    /// Check the branch/successor invariant for every block.
    pub fn shape_errors(&self) -> Vec<ShapeError> {
        let mut errors = Vec::new();
        for block in &self.blocks {
            for succ in &block.successors {
                if succ.0 >= self.blocks.len() {
                    errors.push(ShapeError {
                        block: block.id,
                        message: format!("edge to unknown block {}", succ),
                    });
                }
            }
            let expected = if block.id == self.exit {
                0
            } else if block.condition.is_some() {
                2
            } else {
                1
            };
            if block.successors.len() != expected {
                let what = if block.id == self.exit {
                    "exit block"
                } else if block.condition.is_some() {
                    "branching block"
                } else {
                    "fall-through block"
                };
                errors.push(ShapeError {
                    block: block.id,
                    message: format!(
                        "{} {} has {} successors, expected {}",
                        what,
                        block.id,
                        block.successors.len(),
                        expected
                    ),
                });
            }
        }
        errors
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Incremental construction of a [`ControlFlowGraph`].
///
/// The entry block (`bb0`) exists from the start. Predecessor lists are
/// derived from successor edges in [`CfgBuilder::finish`].
#[derive(Debug)]
pub struct CfgBuilder {
    function: String,
    blocks: Vec<BasicBlock>,
    definitions: Vec<DefinitionSite>,
}

impl CfgBuilder {
    pub fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            blocks: vec![BasicBlock::new(BlockId(0))],
            definitions: Vec::new(),
        }
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id));
        id
    }

    /// Bind a parameter: a definition site in the entry block with no statement.
    pub fn param(&mut self, name: &str, span: Span) -> DefId {
        let id = DefId(self.definitions.len());
        self.definitions.push(DefinitionSite {
            id,
            variable: name.to_string(),
            block: BlockId(0),
            statement: None,
            span,
        });
        id
    }

    pub fn assign(&mut self, block: BlockId, target: &str, value: Expr, span: Span) -> DefId {
        let id = DefId(self.definitions.len());
        let index = self.blocks[block.0].statements.len();
        self.definitions.push(DefinitionSite {
            id,
            variable: target.to_string(),
            block,
            statement: Some(index),
            span,
        });
        self.blocks[block.0].statements.push(Statement::Assign {
            def: id,
            target: target.to_string(),
            value,
            span,
        });
        id
    }

    /// Append a non-defining statement.
    pub fn push(&mut self, block: BlockId, stmt: Statement) {
        debug_assert!(stmt.def_id().is_none(), "use CfgBuilder::assign for definitions");
        self.blocks[block.0].statements.push(stmt);
    }

    pub fn goto(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0].successors.push(to);
    }

    pub fn branch(&mut self, from: BlockId, cond: Expr, on_true: BlockId, on_false: BlockId) {
        let block = &mut self.blocks[from.0];
        block.condition = Some(cond);
        block.successors.push(on_true);
        block.successors.push(on_false);
    }

    pub fn finish(mut self, exit: BlockId) -> ControlFlowGraph {
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .iter()
            .flat_map(|b| b.successors.iter().map(move |s| (b.id, *s)))
            .collect();
        for (from, to) in edges {
            if let Some(target) = self.blocks.get_mut(to.0) {
                if !target.predecessors.contains(&from) {
                    target.predecessors.push(from);
                }
            }
        }
        ControlFlowGraph {
            function: self.function,
            blocks: self.blocks,
            entry: BlockId(0),
            exit,
            definitions: self.definitions,
        }
    }
}

// ── Lowering from bound bodies ──────────────────────────────────────

/// Lower a bound function body into a control-flow graph.
///
/// `return` and `throw` edge to a single exit block, which receives the
/// highest block id. Statements after a terminator land in a fresh block
/// with no predecessors.
pub fn build(func: &FunctionDecl) -> ControlFlowGraph {
    let mut lowerer = Lowerer {
        builder: CfgBuilder::new(&func.name),
        to_exit: Vec::new(),
    };
    for p in &func.params {
        lowerer.builder.param(&p.name, p.span);
    }
    let entry = lowerer.builder.entry();
    let end = lowerer.lower_stmts(&func.body, Some(entry));
    let exit = lowerer.builder.add_block();
    if let Some(end) = end {
        lowerer.builder.goto(end, exit);
    }
    for block in std::mem::take(&mut lowerer.to_exit) {
        lowerer.builder.goto(block, exit);
    }
    lowerer.builder.finish(exit)
}

struct Lowerer {
    builder: CfgBuilder,
    to_exit: Vec<BlockId>,
}

impl Lowerer {
    /// Lower `stmts` starting in `current`; returns the open block afterwards,
    /// or `None` when control never falls off the end.
    fn lower_stmts(&mut self, stmts: &[Stmt], mut current: Option<BlockId>) -> Option<BlockId> {
        for stmt in stmts {
            let cur = match current {
                Some(b) => b,
                None => self.builder.add_block(),
            };
            current = self.lower_stmt(stmt, cur);
        }
        current
    }

    fn lower_stmt(&mut self, stmt: &Stmt, cur: BlockId) -> Option<BlockId> {
        match stmt {
            Stmt::Let { name, value, span } | Stmt::Assign { name, value, span } => {
                self.builder.assign(cur, name, value.clone(), *span);
                Some(cur)
            }
            Stmt::FieldAssign {
                object,
                field,
                value,
                span,
                ..
            } => {
                self.builder.push(
                    cur,
                    Statement::Store {
                        object: object.clone(),
                        field: field.clone(),
                        value: value.clone(),
                        span: *span,
                    },
                );
                Some(cur)
            }
            Stmt::Expr(e) => {
                self.builder.push(cur, Statement::Eval(e.clone()));
                Some(cur)
            }
            Stmt::Return(value, span) => {
                self.builder.push(cur, Statement::Return(value.clone(), *span));
                self.to_exit.push(cur);
                None
            }
            Stmt::Throw(value, span) => {
                self.builder.push(cur, Statement::Throw(value.clone(), *span));
                self.to_exit.push(cur);
                None
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let then_block = self.builder.add_block();
                let else_block = self.builder.add_block();
                self.builder.branch(cur, cond.clone(), then_block, else_block);
                let then_end = self.lower_stmts(then_body, Some(then_block));
                let else_end = self.lower_stmts(else_body, Some(else_block));
                if then_end.is_none() && else_end.is_none() {
                    return None;
                }
                let join = self.builder.add_block();
                for end in [then_end, else_end].into_iter().flatten() {
                    self.builder.goto(end, join);
                }
                Some(join)
            }
            Stmt::While { cond, body, .. } => {
                let header = self.builder.add_block();
                self.builder.goto(cur, header);
                let body_block = self.builder.add_block();
                let after = self.builder.add_block();
                self.builder.branch(header, cond.clone(), body_block, after);
                if let Some(end) = self.lower_stmts(body, Some(body_block)) {
                    self.builder.goto(end, header);
                }
                Some(after)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{BinOp, Param};

    fn straight_line() -> FunctionDecl {
        FunctionDecl::new(
            "demo",
            vec![],
            Some("Int"),
            vec![
                Stmt::let_("x", Expr::int(5)),
                Stmt::let_("y", Expr::binary(Expr::ident("x"), BinOp::Mul, Expr::int(2))),
                Stmt::ret(Some(Expr::ident("y"))),
            ],
        )
    }

    #[test]
    fn straight_line_body_is_entry_plus_exit() {
        let cfg = build(&straight_line());
        assert_eq!(cfg.len(), 2);
        assert_eq!(cfg.exit(), BlockId(1));
        assert_eq!(cfg.block(BlockId(0)).statements.len(), 3);
        assert_eq!(cfg.block(BlockId(0)).successors, vec![BlockId(1)]);
        assert_eq!(cfg.block(BlockId(1)).predecessors, vec![BlockId(0)]);
        assert!(cfg.shape_errors().is_empty());
    }

    #[test]
    fn definitions_get_stable_ids() {
        let cfg = build(&straight_line());
        let defs = cfg.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].variable, "x");
        assert_eq!(defs[0].statement, Some(0));
        assert_eq!(defs[1].variable, "y");
        assert_eq!(
            cfg.block(BlockId(0)).statements[1].def_id(),
            Some(DefId(1))
        );
    }

    #[test]
    fn if_and_while_produce_well_formed_shape() {
        let func = FunctionDecl::new(
            "loop",
            vec![Param::new("n", "Int")],
            Some("Int"),
            vec![
                Stmt::let_("acc", Expr::int(0)),
                Stmt::While {
                    cond: Expr::binary(Expr::ident("n"), BinOp::Gt, Expr::int(0)),
                    body: vec![
                        Stmt::If {
                            cond: Expr::binary(Expr::ident("n"), BinOp::Gt, Expr::int(10)),
                            then_body: vec![Stmt::assign("acc", Expr::int(10))],
                            else_body: vec![],
                            span: Span::dummy(),
                        },
                        Stmt::assign("n", Expr::binary(Expr::ident("n"), BinOp::Sub, Expr::int(1))),
                    ],
                    span: Span::dummy(),
                },
                Stmt::ret(Some(Expr::ident("acc"))),
            ],
        );
        let cfg = build(&func);
        assert!(cfg.shape_errors().is_empty(), "{:?}", cfg.shape_errors());
        assert_eq!(cfg.parameter_definitions().count(), 1);
        assert_eq!(cfg.exit().index(), cfg.len() - 1);
    }

    #[test]
    fn code_after_return_gets_unreachable_block() {
        let func = FunctionDecl::new(
            "early",
            vec![],
            None,
            vec![Stmt::ret(None), Stmt::let_("dead", Expr::int(1))],
        );
        let cfg = build(&func);
        assert!(cfg.shape_errors().is_empty());
        let dead = cfg.block(BlockId(1));
        assert!(dead.predecessors.is_empty());
        assert_eq!(dead.statements.len(), 1);
    }

    #[test]
    fn shape_errors_flag_missing_false_edge() {
        let mut b = CfgBuilder::new("broken");
        let exit = b.add_block();
        b.blocks[0].condition = Some(Expr::boolean(true));
        b.goto(BlockId(0), exit);
        let cfg = b.finish(exit);
        let errors = cfg.shape_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("expected 2"));
    }
}
