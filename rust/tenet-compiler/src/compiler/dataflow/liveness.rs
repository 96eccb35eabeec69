//! Live-variables analysis (backward, may).
//!
//! gen = variables a statement reads, kill = the variable it defines.

use super::{solve, DataflowError, DataflowResult, Direction, SetLattice, TransferFunction};
use crate::compiler::ast::Expr;
use crate::compiler::cfg::{BlockId, ControlFlowGraph, Statement};
use crate::compiler::tokens::Span;
use std::collections::BTreeSet;

pub type LiveSet = BTreeSet<String>;

struct LiveTransfer;

impl TransferFunction<LiveSet> for LiveTransfer {
    fn transfer(&self, _block: BlockId, _index: usize, stmt: &Statement, live_after: &LiveSet) -> LiveSet {
        let mut live = live_after.clone();
        if let Some(var) = stmt.defined_variable() {
            live.remove(var);
        }
        live.extend(stmt.used_variables());
        live
    }

    fn transfer_condition(&self, _block: BlockId, cond: &Expr, live_after: &LiveSet) -> LiveSet {
        let mut live = live_after.clone();
        live.extend(cond.used_variables());
        live
    }
}

/// An assignment whose value is never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadAssignment {
    pub block: BlockId,
    pub index: usize,
    pub variable: String,
    pub span: Span,
}

#[derive(Debug)]
pub struct LiveVariables<'a> {
    cfg: &'a ControlFlowGraph,
    result: DataflowResult<LiveSet>,
}

impl<'a> LiveVariables<'a> {
    pub fn analyze(cfg: &'a ControlFlowGraph) -> Result<Self, DataflowError> {
        let lattice = SetLattice::new(cfg.variables().len());
        let result = solve(cfg, &lattice, &LiveTransfer, Direction::Backward)?;
        Ok(Self { cfg, result })
    }

    pub fn live_at_entry(&self, block: BlockId) -> &LiveSet {
        self.result.entry(block)
    }

    pub fn live_at_exit(&self, block: BlockId) -> &LiveSet {
        self.result.exit(block)
    }

    pub fn is_live(&self, block: BlockId, name: &str, at_entry: bool) -> bool {
        if at_entry {
            self.live_at_entry(block).contains(name)
        } else {
            self.live_at_exit(block).contains(name)
        }
    }

    /// Live set immediately after statement `index` of `block`.
    pub fn live_after(&self, block: BlockId, index: usize) -> LiveSet {
        let bb = self.cfg.block(block);
        let mut live = self.live_at_exit(block).clone();
        if let Some(cond) = &bb.condition {
            live = LiveTransfer.transfer_condition(block, cond, &live);
        }
        for (i, stmt) in bb.statements.iter().enumerate().rev() {
            if i <= index {
                break;
            }
            live = LiveTransfer.transfer(block, i, stmt, &live);
        }
        live
    }

    /// Live set immediately before statement `index` of `block`.
    pub fn live_before(&self, block: BlockId, index: usize) -> LiveSet {
        let after = self.live_after(block, index);
        match self.cfg.block(block).statements.get(index) {
            Some(stmt) => LiveTransfer.transfer(block, index, stmt, &after),
            None => after,
        }
    }

    /// Assignments in `block` whose variable is dead right after them.
    pub fn dead_assignments(&self, block: BlockId) -> Vec<DeadAssignment> {
        let bb = self.cfg.block(block);
        let mut live = self.live_at_exit(block).clone();
        if let Some(cond) = &bb.condition {
            live = LiveTransfer.transfer_condition(block, cond, &live);
        }
        let mut dead = Vec::new();
        for (i, stmt) in bb.statements.iter().enumerate().rev() {
            if let Statement::Assign { target, span, .. } = stmt {
                if !live.contains(target) {
                    dead.push(DeadAssignment {
                        block,
                        index: i,
                        variable: target.clone(),
                        span: *span,
                    });
                }
            }
            live = LiveTransfer.transfer(block, i, stmt, &live);
        }
        dead.reverse();
        dead
    }

    /// Dead assignments across the whole graph, in block and statement order.
    pub fn all_dead_assignments(&self) -> Vec<DeadAssignment> {
        self.cfg
            .blocks()
            .iter()
            .flat_map(|b| self.dead_assignments(b.id))
            .collect()
    }

    pub fn passes(&self) -> usize {
        self.result.passes()
    }
}
