//! Reaching-definitions analysis (forward, may).
//!
//! gen = the statement's own definition site, kill = every other site of the
//! same variable. Parameters reach the entry block as definitions without an
//! assigning statement.

use super::{solve, DataflowError, DataflowResult, Direction, SetLattice, TransferFunction};
use crate::compiler::cfg::{BlockId, ControlFlowGraph, DefId, DefinitionSite, Statement};
use std::collections::{BTreeSet, HashMap};

pub type DefSet = BTreeSet<DefId>;

struct ReachingTransfer {
    sites_by_variable: HashMap<String, Vec<DefId>>,
    parameters: DefSet,
}

impl ReachingTransfer {
    fn new(cfg: &ControlFlowGraph) -> Self {
        let mut sites_by_variable: HashMap<String, Vec<DefId>> = HashMap::new();
        for site in cfg.definitions() {
            sites_by_variable
                .entry(site.variable.clone())
                .or_default()
                .push(site.id);
        }
        Self {
            sites_by_variable,
            parameters: cfg.parameter_definitions().map(|d| d.id).collect(),
        }
    }
}

impl TransferFunction<DefSet> for ReachingTransfer {
    fn transfer(&self, _block: BlockId, _index: usize, stmt: &Statement, input: &DefSet) -> DefSet {
        let (Some(def), Some(var)) = (stmt.def_id(), stmt.defined_variable()) else {
            return input.clone();
        };
        let mut out = input.clone();
        if let Some(killed) = self.sites_by_variable.get(var) {
            for k in killed {
                out.remove(k);
            }
        }
        out.insert(def);
        out
    }

    fn boundary(&self) -> Option<DefSet> {
        Some(self.parameters.clone())
    }
}

#[derive(Debug)]
pub struct ReachingDefinitions<'a> {
    cfg: &'a ControlFlowGraph,
    transfer: ReachingTransfer,
    result: DataflowResult<DefSet>,
}

impl std::fmt::Debug for ReachingTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachingTransfer")
            .field("variables", &self.sites_by_variable.len())
            .finish()
    }
}

impl<'a> ReachingDefinitions<'a> {
    pub fn analyze(cfg: &'a ControlFlowGraph) -> Result<Self, DataflowError> {
        let transfer = ReachingTransfer::new(cfg);
        let lattice = SetLattice::new(cfg.definitions().len());
        let result = solve(cfg, &lattice, &transfer, Direction::Forward)?;
        Ok(Self {
            cfg,
            transfer,
            result,
        })
    }

    pub fn reaching_at_entry(&self, block: BlockId) -> &DefSet {
        self.result.entry(block)
    }

    pub fn reaching_at_exit(&self, block: BlockId) -> &DefSet {
        self.result.exit(block)
    }

    /// Definitions reaching the point just before statement `index`.
    /// An index past the last statement yields the point where the exit
    /// branch condition is evaluated.
    pub fn reaching_before(&self, block: BlockId, index: usize) -> DefSet {
        let bb = self.cfg.block(block);
        let mut facts = self.reaching_at_entry(block).clone();
        for (i, stmt) in bb.statements.iter().enumerate().take(index) {
            facts = self.transfer.transfer(block, i, stmt, &facts);
        }
        facts
    }

    /// Sites of `name` reaching the point just before statement `index`.
    pub fn definitions_of(&self, block: BlockId, index: usize, name: &str) -> Vec<&'a DefinitionSite> {
        let cfg = self.cfg;
        self.reaching_before(block, index)
            .into_iter()
            .filter_map(|id| cfg.definition(id))
            .filter(|site| site.variable == name)
            .collect()
    }

    /// More than one definition of `name` reaches the entry of `block`.
    pub fn has_multiple_reaching_definitions(&self, block: BlockId, name: &str) -> bool {
        self.count_for(self.reaching_at_entry(block), name) > 1
    }

    /// Statement-level variant of [`Self::has_multiple_reaching_definitions`].
    pub fn has_multiple_reaching_definitions_at(&self, block: BlockId, index: usize, name: &str) -> bool {
        self.count_for(&self.reaching_before(block, index), name) > 1
    }

    fn count_for(&self, set: &DefSet, name: &str) -> usize {
        set.iter()
            .filter_map(|id| self.cfg.definition(*id))
            .filter(|site| site.variable == name)
            .count()
    }

    pub fn passes(&self) -> usize {
        self.result.passes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{BinOp, Expr, FunctionDecl, Param, Stmt};
    use crate::compiler::cfg::build;
    use crate::compiler::tokens::Span;

    #[test]
    fn later_assignment_kills_earlier() {
        let func = FunctionDecl::new(
            "f",
            vec![],
            Some("Int"),
            vec![
                Stmt::let_("x", Expr::int(1)),
                Stmt::assign("x", Expr::int(2)),
                Stmt::ret(Some(Expr::ident("x"))),
            ],
        );
        let cfg = build(&func);
        let rd = ReachingDefinitions::analyze(&cfg).unwrap();
        let sites = rd.definitions_of(cfg.entry(), 2, "x");
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].statement, Some(1));
        assert!(!rd.has_multiple_reaching_definitions_at(cfg.entry(), 2, "x"));
        assert!(!rd.has_multiple_reaching_definitions(cfg.entry(), "x"));
    }

    #[test]
    fn branches_merge_definitions() {
        let func = FunctionDecl::new(
            "pick",
            vec![Param::new("flag", "Bool")],
            Some("Int"),
            vec![
                Stmt::If {
                    cond: Expr::ident("flag"),
                    then_body: vec![Stmt::let_("v", Expr::int(1))],
                    else_body: vec![Stmt::let_("v", Expr::int(2))],
                    span: Span::dummy(),
                },
                Stmt::ret(Some(Expr::binary(Expr::ident("v"), BinOp::Add, Expr::int(0)))),
            ],
        );
        let cfg = build(&func);
        let rd = ReachingDefinitions::analyze(&cfg).unwrap();
        let join = cfg.block(cfg.exit()).predecessors[0];
        assert!(rd.has_multiple_reaching_definitions(join, "v"));
        assert_eq!(rd.definitions_of(join, 0, "v").len(), 2);
    }

    #[test]
    fn parameters_reach_entry() {
        let func = FunctionDecl::new(
            "id",
            vec![Param::new("a", "Int")],
            Some("Int"),
            vec![Stmt::ret(Some(Expr::ident("a")))],
        );
        let cfg = build(&func);
        let rd = ReachingDefinitions::analyze(&cfg).unwrap();
        let sites = rd.definitions_of(cfg.entry(), 0, "a");
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].statement, None);
    }
}
