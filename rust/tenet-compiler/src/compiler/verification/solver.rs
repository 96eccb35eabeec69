//! Solver abstraction and the builtin interval solver.
//!
//! `ContractSolver` is the seam external backends plug into. The builtin
//! `IntervalSolver` decides the subset of contracts that reduce to
//! conjunctions of single-variable integer comparisons against constants:
//! assumptions narrow each variable to an interval, and a goal atom fails
//! when the interval still contains a value violating it. A precondition
//! holds when some input satisfies it; one no caller can meet is disproven.
//! Function bodies are not modelled, so a postcondition that constrains
//! `result` is left undecided.

use super::contract::{Contract, ContractKind};
use crate::compiler::ast::{BinOp, Expr, UnaryOp};
use std::collections::{BTreeMap, BTreeSet};

// ── Solver trait ────────────────────────────────────────────────────

/// What a solver concluded about one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverVerdict {
    /// Holds for every input satisfying the assumptions.
    Proven,
    /// Fails for the described input.
    Disproven { counterexample: String },
    /// Outside what this solver can decide.
    Unsupported { reason: String },
}

pub trait ContractSolver: Send + Sync {
    /// Identifies the solver build; cached results from any other version
    /// are discarded.
    fn version(&self) -> String;
    fn check(&self, contract: &Contract) -> SolverVerdict;
}

// ── IntervalSolver ──────────────────────────────────────────────────

const RESULT_VAR: &str = "result";

#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalSolver;

impl IntervalSolver {
    pub fn new() -> Self {
        Self
    }
}

impl ContractSolver for IntervalSolver {
    fn version(&self) -> String {
        format!("interval-{}", env!("CARGO_PKG_VERSION"))
    }

    fn check(&self, contract: &Contract) -> SolverVerdict {
        if contract.kind == ContractKind::Pre {
            return satisfiable(contract);
        }

        let mut goal = Vec::new();
        if let Err(reason) = lower(contract, &contract.expr, &mut goal) {
            return SolverVerdict::Unsupported { reason };
        }
        if goal
            .iter()
            .any(|f| matches!(f, Formula::Atom(atom) if atom.var == RESULT_VAR))
        {
            return SolverVerdict::Unsupported {
                reason: "postcondition constrains result; function bodies are not modelled"
                    .to_string(),
            };
        }

        let mut intervals: BTreeMap<String, Interval> = BTreeMap::new();
        let mut assumptions_complete = true;
        for pre in &contract.assumptions {
            let mut facts = Vec::new();
            if lower(contract, pre, &mut facts).is_err() {
                // Dropping an assumption only weakens what may be proven.
                assumptions_complete = false;
                continue;
            }
            for fact in facts {
                match fact {
                    Formula::Const(true) => {}
                    Formula::Const(false) => return SolverVerdict::Proven,
                    Formula::Atom(atom) => intervals.entry(atom.var.clone()).or_default().apply(&atom),
                }
            }
        }
        if intervals.values().any(Interval::is_empty) {
            return SolverVerdict::Proven;
        }

        for formula in &goal {
            let witness = match formula {
                Formula::Const(true) => continue,
                Formula::Const(false) => "contract is false for every input".to_string(),
                Formula::Atom(atom) => {
                    let interval = intervals.get(&atom.var).cloned().unwrap_or_default();
                    match interval.violation(atom) {
                        Some(value) => format!("{} = {}", atom.var, value),
                        None => continue,
                    }
                }
            };
            return if assumptions_complete {
                SolverVerdict::Disproven {
                    counterexample: witness,
                }
            } else {
                SolverVerdict::Unsupported {
                    reason: "a precondition is outside integer interval reasoning".to_string(),
                }
            };
        }
        SolverVerdict::Proven
    }
}

fn satisfiable(contract: &Contract) -> SolverVerdict {
    let mut facts = Vec::new();
    if let Err(reason) = lower(contract, &contract.expr, &mut facts) {
        return SolverVerdict::Unsupported { reason };
    }
    let unsatisfiable = || SolverVerdict::Disproven {
        counterexample: "no input satisfies the precondition".to_string(),
    };
    let mut intervals: BTreeMap<String, Interval> = BTreeMap::new();
    for fact in facts {
        match fact {
            Formula::Const(true) => {}
            Formula::Const(false) => return unsatisfiable(),
            Formula::Atom(atom) => intervals.entry(atom.var.clone()).or_default().apply(&atom),
        }
    }
    if intervals.values().any(Interval::is_empty) {
        unsatisfiable()
    } else {
        SolverVerdict::Proven
    }
}

// ── Lowering ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
}

impl Cmp {
    fn from_binop(op: BinOp) -> Option<Self> {
        Some(match op {
            BinOp::Lt => Cmp::Lt,
            BinOp::LtEq => Cmp::LtEq,
            BinOp::Gt => Cmp::Gt,
            BinOp::GtEq => Cmp::GtEq,
            BinOp::Eq => Cmp::Eq,
            BinOp::NotEq => Cmp::NotEq,
            _ => return None,
        })
    }

    fn negate(self) -> Self {
        match self {
            Cmp::Lt => Cmp::GtEq,
            Cmp::LtEq => Cmp::Gt,
            Cmp::Gt => Cmp::LtEq,
            Cmp::GtEq => Cmp::Lt,
            Cmp::Eq => Cmp::NotEq,
            Cmp::NotEq => Cmp::Eq,
        }
    }

    /// `c op x` rewritten as `x op' c`.
    fn flip(self) -> Self {
        match self {
            Cmp::Lt => Cmp::Gt,
            Cmp::LtEq => Cmp::GtEq,
            Cmp::Gt => Cmp::Lt,
            Cmp::GtEq => Cmp::LtEq,
            Cmp::Eq => Cmp::Eq,
            Cmp::NotEq => Cmp::NotEq,
        }
    }

    fn holds(self, lhs: i128, rhs: i128) -> bool {
        match self {
            Cmp::Lt => lhs < rhs,
            Cmp::LtEq => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::GtEq => lhs >= rhs,
            Cmp::Eq => lhs == rhs,
            Cmp::NotEq => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Atom {
    var: String,
    op: Cmp,
    value: i128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Formula {
    Const(bool),
    Atom(Atom),
}

impl Formula {
    fn negate(self) -> Self {
        match self {
            Formula::Const(b) => Formula::Const(!b),
            Formula::Atom(a) => Formula::Atom(Atom {
                op: a.op.negate(),
                ..a
            }),
        }
    }
}

/// Flatten a conjunction into `out`.
fn lower(contract: &Contract, e: &Expr, out: &mut Vec<Formula>) -> Result<(), String> {
    match e {
        Expr::BoolLit(b, _) => out.push(Formula::Const(*b)),
        Expr::BinOp(lhs, BinOp::And, rhs, _) => {
            lower(contract, lhs, out)?;
            lower(contract, rhs, out)?;
        }
        Expr::UnaryOp(UnaryOp::Not, inner, _) => {
            let mut parts = Vec::new();
            lower(contract, inner, &mut parts)?;
            match parts.len() {
                1 => out.extend(parts.into_iter().map(Formula::negate)),
                _ => return Err("negated conjunction".to_string()),
            }
        }
        Expr::BinOp(lhs, op, rhs, _) => {
            let cmp = Cmp::from_binop(*op)
                .ok_or_else(|| format!("operator '{}' is not a comparison", op))?;
            let formula = match (int_var(contract, lhs), int_var(contract, rhs)) {
                (Some(_), Some(_)) => return Err("comparison between two variables".to_string()),
                (Some(var), None) => Formula::Atom(Atom {
                    var,
                    op: cmp,
                    value: const_int(rhs).ok_or("right operand is not an integer constant")?,
                }),
                (None, Some(var)) => Formula::Atom(Atom {
                    var,
                    op: cmp.flip(),
                    value: const_int(lhs).ok_or("left operand is not an integer constant")?,
                }),
                (None, None) => {
                    let l = const_int(lhs).ok_or("operand is not an integer constant")?;
                    let r = const_int(rhs).ok_or("operand is not an integer constant")?;
                    Formula::Const(cmp.holds(l, r))
                }
            };
            out.push(formula);
        }
        _ => return Err("expression shape is not a comparison".to_string()),
    }
    Ok(())
}

/// Name of an `Int`-typed parameter, or `result` for an `Int` output.
fn int_var(contract: &Contract, e: &Expr) -> Option<String> {
    match e {
        Expr::Ident(name, _) if contract.type_of(name) == Some("Int") => Some(name.clone()),
        Expr::ResultRef(_)
            if contract.kind == ContractKind::Post && contract.output.as_deref() == Some("Int") =>
        {
            Some(RESULT_VAR.to_string())
        }
        _ => None,
    }
}

fn const_int(e: &Expr) -> Option<i128> {
    let v = match e {
        Expr::IntLit(v, _) => i128::from(*v),
        Expr::UnaryOp(UnaryOp::Neg, inner, _) => -const_int(inner)?,
        Expr::BinOp(l, op, r, _) => {
            let (l, r) = (const_int(l)?, const_int(r)?);
            match op {
                BinOp::Add => l.checked_add(r)?,
                BinOp::Sub => l.checked_sub(r)?,
                BinOp::Mul => l.checked_mul(r)?,
                BinOp::Div => l.checked_div(r)?,
                BinOp::Mod => l.checked_rem(r)?,
                _ => return None,
            }
        }
        _ => return None,
    };
    // Arithmetic happens in the 64-bit domain.
    (i128::from(i64::MIN)..=i128::from(i64::MAX))
        .contains(&v)
        .then_some(v)
}

// ── Intervals ───────────────────────────────────────────────────────

/// Closed interval of 64-bit integers minus a set of excluded points.
#[derive(Debug, Clone)]
struct Interval {
    lo: i128,
    hi: i128,
    excluded: BTreeSet<i128>,
}

impl Default for Interval {
    fn default() -> Self {
        Self {
            lo: i128::from(i64::MIN),
            hi: i128::from(i64::MAX),
            excluded: BTreeSet::new(),
        }
    }
}

impl Interval {
    fn apply(&mut self, atom: &Atom) {
        let c = atom.value;
        match atom.op {
            Cmp::Lt => self.hi = self.hi.min(c - 1),
            Cmp::LtEq => self.hi = self.hi.min(c),
            Cmp::Gt => self.lo = self.lo.max(c + 1),
            Cmp::GtEq => self.lo = self.lo.max(c),
            Cmp::Eq => {
                self.lo = self.lo.max(c);
                self.hi = self.hi.min(c);
            }
            Cmp::NotEq => {
                self.excluded.insert(c);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.first_up(self.lo).is_none()
    }

    /// Smallest admitted value `>= from`.
    fn first_up(&self, from: i128) -> Option<i128> {
        let mut v = from.max(self.lo);
        while v <= self.hi {
            if !self.excluded.contains(&v) {
                return Some(v);
            }
            v += 1;
        }
        None
    }

    /// Largest admitted value `<= from`.
    fn first_down(&self, from: i128) -> Option<i128> {
        let mut v = from.min(self.hi);
        while v >= self.lo {
            if !self.excluded.contains(&v) {
                return Some(v);
            }
            v -= 1;
        }
        None
    }

    /// An admitted value violating `atom`, closest to the atom's constant.
    fn violation(&self, atom: &Atom) -> Option<i128> {
        let c = atom.value;
        match atom.op {
            Cmp::Lt => self.first_up(c),
            Cmp::LtEq => self.first_up(c + 1),
            Cmp::Gt => self.first_down(c),
            Cmp::GtEq => self.first_down(c - 1),
            Cmp::Eq => self.first_up(c + 1).or_else(|| self.first_down(c - 1)),
            Cmp::NotEq => self.first_up(c).filter(|v| *v == c),
        }
    }
}
