//! Contract verification: canonical hashing, a persistent result cache and
//! a pluggable solver.
//!
//! [`ContractVerifier`] consults the cache by contract hash, runs the solver
//! on a miss, and stores finished results. Cache failures are counted and
//! logged but never change a verification outcome.

pub mod cache;
pub mod contract;
pub mod hasher;
pub mod solver;

use crate::compiler::ast::FunctionDecl;
use crate::compiler::tokens::Span;
use cache::{CacheResult, VerificationCache};
use contract::{Contract, ContractKind};
use hasher::ContractHasher;
use serde::{Deserialize, Serialize};
use solver::{ContractSolver, SolverVerdict};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Proven,
    Disproven,
    Unsupported,
    Skipped,
}

impl VerificationStatus {
    /// Only completed verdicts are cached; the others may change as
    /// unrelated capabilities improve.
    pub fn is_cacheable(self) -> bool {
        matches!(self, VerificationStatus::Proven | VerificationStatus::Disproven)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Proven => "proven",
            VerificationStatus::Disproven => "disproven",
            VerificationStatus::Unsupported => "unsupported",
            VerificationStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Result for one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub function: String,
    pub kind: ContractKind,
    pub index: usize,
    pub hash: String,
    pub status: VerificationStatus,
    pub counterexample: Option<String>,
    /// Why the contract could not be decided, for unsupported or skipped.
    pub note: Option<String>,
    pub duration: Duration,
    pub cached: bool,
    pub span: Span,
}

pub struct ContractVerifier<'a> {
    solver: &'a dyn ContractSolver,
    cache: Option<&'a VerificationCache>,
    deadline: Option<Duration>,
}

impl<'a> ContractVerifier<'a> {
    pub fn new(solver: &'a dyn ContractSolver) -> Self {
        Self {
            solver,
            cache: None,
            deadline: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a VerificationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runs longer than `deadline` count as skipped.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn verify_function(&self, func: &FunctionDecl) -> Vec<VerificationOutcome> {
        Contract::of_function(func)
            .iter()
            .map(|c| self.verify(c))
            .collect()
    }

    pub fn verify(&self, contract: &Contract) -> VerificationOutcome {
        let hash = ContractHasher::hash(contract);
        let solver_version = self.solver.version();
        let mut outcome = VerificationOutcome {
            function: contract.function.clone(),
            kind: contract.kind,
            index: contract.index,
            hash,
            status: VerificationStatus::Skipped,
            counterexample: None,
            note: None,
            duration: Duration::ZERO,
            cached: false,
            span: contract.span(),
        };

        if let Some(cache) = self.cache {
            match cache.get(&outcome.hash, &solver_version) {
                CacheResult::Hit(entry) => {
                    outcome.status = entry.status;
                    outcome.counterexample = entry.counterexample;
                    outcome.duration = Duration::from_millis(entry.duration_ms);
                    outcome.cached = true;
                    return outcome;
                }
                CacheResult::Miss => {}
                CacheResult::Error(kind) => {
                    log::debug!("cache unavailable for {}: {:?}", contract, kind);
                }
            }
        }

        let started = Instant::now();
        let verdict = self.solver.check(contract);
        outcome.duration = started.elapsed();
        match verdict {
            SolverVerdict::Proven => outcome.status = VerificationStatus::Proven,
            SolverVerdict::Disproven { counterexample } => {
                outcome.status = VerificationStatus::Disproven;
                outcome.counterexample = Some(counterexample);
            }
            SolverVerdict::Unsupported { reason } => {
                outcome.status = VerificationStatus::Unsupported;
                outcome.note = Some(reason);
            }
        }
        if let Some(deadline) = self.deadline {
            if outcome.duration > deadline {
                outcome.status = VerificationStatus::Skipped;
                outcome.counterexample = None;
                outcome.note = Some(format!(
                    "solver exceeded the {} ms deadline",
                    deadline.as_millis()
                ));
            }
        }

        if let Some(cache) = self.cache {
            if outcome.status.is_cacheable() {
                // Failures are counted by the cache and never fail verification.
                let _ = cache.store(
                    &outcome.hash,
                    &solver_version,
                    outcome.status,
                    outcome.counterexample.clone(),
                    outcome.duration,
                );
            }
        }
        log::debug!("{} {} in {:?}", contract, outcome.status, outcome.duration);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{BinOp, Expr, Param};
    use solver::IntervalSolver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        verdict: SolverVerdict,
        delay: Duration,
    }

    impl ContractSolver for Counting {
        fn version(&self) -> String {
            "counting-1".into()
        }

        fn check(&self, _: &Contract) -> SolverVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.verdict.clone()
        }
    }

    fn func() -> FunctionDecl {
        FunctionDecl::new("inc", vec![Param::new("n", "Int")], Some("Int"), vec![])
            .with_preconditions(vec![Expr::binary(Expr::ident("n"), BinOp::GtEq, Expr::int(0))])
            .with_postconditions(vec![Expr::binary(Expr::result(), BinOp::Gt, Expr::int(0))])
    }

    #[test]
    fn verifies_every_contract_without_cache() {
        let outcomes = ContractVerifier::new(&IntervalSolver).verify_function(&func());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].kind, ContractKind::Pre);
        assert_eq!(outcomes[1].kind, ContractKind::Post);
        assert_eq!(outcomes[0].status, VerificationStatus::Proven);
        assert_eq!(outcomes[1].status, VerificationStatus::Unsupported);
        assert!(outcomes[1].counterexample.is_none());
        assert!(outcomes[1].note.is_some());
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = VerificationCache::new(tmp.path().to_path_buf(), cache::DEFAULT_MAX_CACHE_BYTES);
        let solver = Counting {
            calls: AtomicUsize::new(0),
            verdict: SolverVerdict::Proven,
            delay: Duration::ZERO,
        };
        let verifier = ContractVerifier::new(&solver).with_cache(&cache);
        let first = verifier.verify_function(&func());
        let second = verifier.verify_function(&func());
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
        assert!(second.iter().all(|o| o.cached));
        assert_eq!(first[1].status, second[1].status);
    }

    #[test]
    fn slow_results_are_skipped_and_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = VerificationCache::new(tmp.path().to_path_buf(), cache::DEFAULT_MAX_CACHE_BYTES);
        let solver = Counting {
            calls: AtomicUsize::new(0),
            verdict: SolverVerdict::Proven,
            delay: Duration::from_millis(20),
        };
        let verifier = ContractVerifier::new(&solver)
            .with_cache(&cache)
            .with_deadline(Duration::from_millis(1));
        let outcome = verifier.verify(&Contract::of_function(&func())[0]);
        assert_eq!(outcome.status, VerificationStatus::Skipped);
        assert!(outcome.note.is_some());
        assert_eq!(cache.entry_count(), 0);
    }
}
