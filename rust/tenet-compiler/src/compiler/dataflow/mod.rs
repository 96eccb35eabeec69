//! Generic fixpoint dataflow engine over [`ControlFlowGraph`].
//!
//! An analysis supplies a [`Lattice`] (join, bottom) and a
//! [`TransferFunction`] (per statement, plus the block's exit branch
//! condition). [`solve`] runs round-robin passes over the blocks in block-id
//! order (reverse order for backward problems) until one full pass leaves
//! every `(entry, exit)` pair unchanged.
//!
//! ```text
//!   Forward:  In[b]  = ⊔ Out[p] for p in preds(b)     Out[b] = f_b(In[b])
//!   Backward: Out[b] = ⊔ In[s]  for s in succs(b)     In[b]  = f_b(Out[b])
//! ```
//!
//! Only finished results leave this module; intermediate facts are visible
//! solely through the explicit observer of [`solve_observed`].

pub mod liveness;
pub mod reaching;
pub mod validate;

use crate::compiler::ast::Expr;
use crate::compiler::cfg::{BlockId, ControlFlowGraph, Statement};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use thiserror::Error;

// ── Problem definition ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Abstract domain of an analysis.
pub trait Lattice<F> {
    fn bottom(&self) -> F;
    fn join(&self, a: &F, b: &F) -> F;
    /// Number of distinct atoms, used to bound the number of passes.
    fn universe_size(&self) -> Option<usize> {
        None
    }
}

/// Per-statement transfer. Implementations must be pure and monotone.
pub trait TransferFunction<F: Clone> {
    fn transfer(&self, block: BlockId, index: usize, stmt: &Statement, input: &F) -> F;

    /// Effect of evaluating the block's exit branch condition.
    fn transfer_condition(&self, _block: BlockId, _cond: &Expr, input: &F) -> F {
        input.clone()
    }

    /// Fact flowing into the entry block (forward) or out of the exit block
    /// (backward). `None` means bottom.
    fn boundary(&self) -> Option<F> {
        None
    }
}

/// May-analysis domain: sets joined by union.
#[derive(Debug, Clone)]
pub struct SetLattice<T> {
    universe: usize,
    _marker: PhantomData<T>,
}

impl<T> SetLattice<T> {
    pub fn new(universe: usize) -> Self {
        Self {
            universe,
            _marker: PhantomData,
        }
    }
}

impl<T: Ord + Clone> Lattice<BTreeSet<T>> for SetLattice<T> {
    fn bottom(&self) -> BTreeSet<T> {
        BTreeSet::new()
    }

    fn join(&self, a: &BTreeSet<T>, b: &BTreeSet<T>) -> BTreeSet<T> {
        a.union(b).cloned().collect()
    }

    fn universe_size(&self) -> Option<usize> {
        Some(self.universe)
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Facts at block entry and block exit, independent of direction.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockFacts<F> {
    pub entry: F,
    pub exit: F,
}

#[derive(Debug, Clone)]
pub struct DataflowResult<F> {
    facts: Vec<BlockFacts<F>>,
    passes: usize,
}

impl<F> DataflowResult<F> {
    pub fn entry(&self, block: BlockId) -> &F {
        &self.facts[block.index()].entry
    }

    pub fn exit(&self, block: BlockId) -> &F {
        &self.facts[block.index()].exit
    }

    pub fn facts(&self) -> &[BlockFacts<F>] {
        &self.facts
    }

    /// Number of full passes, including the final unchanged one.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

/// Observation of one block update during solving.
#[derive(Debug)]
pub struct PassEvent<'a, F> {
    pub pass: usize,
    pub block: BlockId,
    pub facts: &'a BlockFacts<F>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataflowError {
    #[error("dataflow analysis of '{function}' did not reach a fixpoint after {passes} passes")]
    NoFixpoint { function: String, passes: usize },
}

/// Fallback pass budget when the lattice reports no universe size.
const DEFAULT_PASS_LIMIT: usize = 10_000;

// ── Solver ──────────────────────────────────────────────────────────

pub fn solve<F, L, T>(
    cfg: &ControlFlowGraph,
    lattice: &L,
    transfer: &T,
    direction: Direction,
) -> Result<DataflowResult<F>, DataflowError>
where
    F: Clone + PartialEq,
    L: Lattice<F>,
    T: TransferFunction<F>,
{
    solve_observed(cfg, lattice, transfer, direction, &mut |_| {})
}

/// Like [`solve`], reporting every block visit to `observer`.
pub fn solve_observed<F, L, T>(
    cfg: &ControlFlowGraph,
    lattice: &L,
    transfer: &T,
    direction: Direction,
    observer: &mut dyn FnMut(&PassEvent<'_, F>),
) -> Result<DataflowResult<F>, DataflowError>
where
    F: Clone + PartialEq,
    L: Lattice<F>,
    T: TransferFunction<F>,
{
    let n = cfg.len();
    let mut facts: Vec<BlockFacts<F>> = (0..n)
        .map(|_| BlockFacts {
            entry: lattice.bottom(),
            exit: lattice.bottom(),
        })
        .collect();
    let boundary = transfer.boundary().unwrap_or_else(|| lattice.bottom());

    // Each block's entry and exit fact can each grow at most `universe` times,
    // and every non-final pass grows at least one of them.
    let pass_limit = lattice
        .universe_size()
        .map(|u| 2 * n * (u + 1) + 2)
        .unwrap_or(DEFAULT_PASS_LIMIT);

    let order: Vec<BlockId> = match direction {
        Direction::Forward => cfg.blocks().iter().map(|b| b.id).collect(),
        Direction::Backward => cfg.blocks().iter().rev().map(|b| b.id).collect(),
    };

    let mut passes = 0;
    loop {
        passes += 1;
        if passes > pass_limit {
            return Err(DataflowError::NoFixpoint {
                function: cfg.function().to_string(),
                passes: pass_limit,
            });
        }

        let mut changed = false;
        for &id in &order {
            let block = cfg.block(id);
            let updated = match direction {
                Direction::Forward => {
                    let mut input = if id == cfg.entry() {
                        boundary.clone()
                    } else {
                        lattice.bottom()
                    };
                    for pred in &block.predecessors {
                        input = lattice.join(&input, &facts[pred.index()].exit);
                    }
                    let output = transfer_block_forward(cfg, id, transfer, &input);
                    BlockFacts {
                        entry: input,
                        exit: output,
                    }
                }
                Direction::Backward => {
                    let mut output = if id == cfg.exit() {
                        boundary.clone()
                    } else {
                        lattice.bottom()
                    };
                    for succ in &block.successors {
                        output = lattice.join(&output, &facts[succ.index()].entry);
                    }
                    let input = transfer_block_backward(cfg, id, transfer, &output);
                    BlockFacts {
                        entry: input,
                        exit: output,
                    }
                }
            };

            if updated != facts[id.index()] {
                facts[id.index()] = updated;
                changed = true;
            }
            observer(&PassEvent {
                pass: passes,
                block: id,
                facts: &facts[id.index()],
            });
        }

        if !changed {
            break;
        }
    }

    log::trace!(
        "dataflow fixpoint for '{}' ({:?}) after {} passes over {} blocks",
        cfg.function(),
        direction,
        passes,
        n
    );
    Ok(DataflowResult { facts, passes })
}

fn transfer_block_forward<F: Clone, T: TransferFunction<F>>(
    cfg: &ControlFlowGraph,
    id: BlockId,
    transfer: &T,
    input: &F,
) -> F {
    let block = cfg.block(id);
    let mut state = input.clone();
    for (i, stmt) in block.statements.iter().enumerate() {
        state = transfer.transfer(id, i, stmt, &state);
    }
    if let Some(cond) = &block.condition {
        state = transfer.transfer_condition(id, cond, &state);
    }
    state
}

fn transfer_block_backward<F: Clone, T: TransferFunction<F>>(
    cfg: &ControlFlowGraph,
    id: BlockId,
    transfer: &T,
    output: &F,
) -> F {
    let block = cfg.block(id);
    let mut state = output.clone();
    if let Some(cond) = &block.condition {
        state = transfer.transfer_condition(id, cond, &state);
    }
    for (i, stmt) in block.statements.iter().enumerate().rev() {
        state = transfer.transfer(id, i, stmt, &state);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::cfg::CfgBuilder;
    use crate::compiler::tokens::Span;

    /// Counts how many times each block was passed through (saturating).
    struct Visits;

    impl TransferFunction<BTreeSet<u8>> for Visits {
        fn transfer(&self, block: BlockId, _i: usize, _s: &Statement, input: &BTreeSet<u8>) -> BTreeSet<u8> {
            let mut out = input.clone();
            out.insert(block.index() as u8);
            out
        }
    }

    /// Grows forever; never monotone-bounded.
    struct Runaway;

    impl TransferFunction<BTreeSet<u64>> for Runaway {
        fn transfer(&self, _b: BlockId, _i: usize, _s: &Statement, input: &BTreeSet<u64>) -> BTreeSet<u64> {
            let mut out = input.clone();
            let next = input.iter().next_back().copied().unwrap_or(0) + 1;
            out.insert(next);
            out
        }
    }

    fn looped_cfg() -> ControlFlowGraph {
        let mut b = CfgBuilder::new("loop");
        let header = b.add_block();
        let body = b.add_block();
        let exit = b.add_block();
        b.push(BlockId(0), Statement::Eval(Expr::int(0)));
        b.goto(BlockId(0), header);
        b.push(header, Statement::Eval(Expr::int(1)));
        b.branch(header, Expr::boolean(true), body, exit);
        b.push(body, Statement::Eval(Expr::int(2)));
        b.goto(body, header);
        b.push(exit, Statement::Return(None, Span::dummy()));
        b.finish(exit)
    }

    #[test]
    fn forward_facts_flow_around_back_edge() {
        let cfg = looped_cfg();
        let result = solve(&cfg, &SetLattice::<u8>::new(4), &Visits, Direction::Forward).unwrap();
        // header sees itself through the back edge
        let header_in: Vec<u8> = result.entry(BlockId(1)).iter().copied().collect();
        assert_eq!(header_in, vec![0, 1, 2]);
        assert!(result.entry(BlockId(0)).is_empty());
    }

    #[test]
    fn backward_facts_flow_against_edges() {
        let cfg = looped_cfg();
        let result = solve(&cfg, &SetLattice::<u8>::new(4), &Visits, Direction::Backward).unwrap();
        assert!(result.exit(cfg.exit()).is_empty());
        let entry_in: Vec<u8> = result.entry(BlockId(0)).iter().copied().collect();
        assert_eq!(entry_in, vec![0, 1, 2, 3]);
    }

    #[test]
    fn non_monotone_transfer_hits_pass_limit() {
        let cfg = looped_cfg();
        let err = solve(&cfg, &SetLattice::<u64>::new(2), &Runaway, Direction::Forward).unwrap_err();
        assert!(matches!(err, DataflowError::NoFixpoint { .. }));
    }
}
