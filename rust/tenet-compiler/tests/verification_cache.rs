//! On-disk behaviour of the verification cache: reuse across verifier runs,
//! invalidation, eviction order and the never-cache statuses.

use std::fs::{self, FileTimes, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use tenet_compiler::compiler::ast::{BinOp, Expr, FunctionDecl, Param};
use tenet_compiler::compiler::verification::cache::{CacheError, CacheResult, VerificationCache};
use tenet_compiler::compiler::verification::contract::Contract;
use tenet_compiler::compiler::verification::solver::{ContractSolver, SolverVerdict};
use tenet_compiler::compiler::verification::{ContractVerifier, VerificationStatus};

/// Solver with a fixed verdict that counts its invocations.
struct Scripted {
    verdict: SolverVerdict,
    version: &'static str,
    delay: Duration,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(verdict: SolverVerdict) -> Self {
        Self {
            verdict,
            version: "scripted-1",
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContractSolver for Scripted {
    fn version(&self) -> String {
        self.version.to_string()
    }

    fn check(&self, _contract: &Contract) -> SolverVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.verdict.clone()
    }
}

fn clamp() -> FunctionDecl {
    FunctionDecl::new("clamp", vec![Param::new("x", "Int")], Some("Int"), vec![])
        .with_preconditions(vec![Expr::binary(Expr::ident("x"), BinOp::GtEq, Expr::int(0))])
        .with_postconditions(vec![Expr::binary(Expr::result(), BinOp::GtEq, Expr::int(0))])
}

fn cache_in(dir: &Path) -> VerificationCache {
    VerificationCache::new(dir.join("cache"), u64::MAX)
}

fn key(i: usize) -> String {
    format!("{:02x}{}", i * 17, "c".repeat(62))
}

// ============================================================================
// Reuse and invalidation
// ============================================================================

#[test]
fn second_run_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let solver = Scripted::new(SolverVerdict::Proven);
    let func = clamp();

    let first = ContractVerifier::new(&solver).with_cache(&cache).verify_function(&func);
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|o| !o.cached && o.status == VerificationStatus::Proven));
    assert_eq!(solver.calls(), 2);

    // A fresh handle on the same directory, as in a later compiler run.
    let reopened = cache_in(dir.path());
    let second = ContractVerifier::new(&solver).with_cache(&reopened).verify_function(&func);
    assert!(second.iter().all(|o| o.cached && o.status == VerificationStatus::Proven));
    assert_eq!(solver.calls(), 2);
    assert_eq!(reopened.stats().hits, 2);
    assert_eq!(
        first.iter().map(|o| &o.hash).collect::<Vec<_>>(),
        second.iter().map(|o| &o.hash).collect::<Vec<_>>()
    );
}

#[test]
fn disproven_keeps_counterexample() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let solver = Scripted::new(SolverVerdict::Disproven {
        counterexample: "x = 3".to_string(),
    });
    let verifier = ContractVerifier::new(&solver).with_cache(&cache);
    let contract = Contract::of_function(&clamp()).remove(1);

    let fresh = verifier.verify(&contract);
    let cached = verifier.verify(&contract);
    assert!(cached.cached);
    assert_eq!(cached.status, VerificationStatus::Disproven);
    assert_eq!(cached.counterexample, fresh.counterexample);
    assert_eq!(solver.calls(), 1);
}

#[test]
fn solver_upgrade_invalidates_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let hash = key(1);
    let write = cache
        .store(&hash, "solver-1.0", VerificationStatus::Proven, None, Duration::from_millis(4))
        .unwrap();
    assert!(write.path.exists());

    assert_eq!(cache.get(&hash, "solver-2.0"), CacheResult::Miss);
    assert!(!write.path.exists());
    assert_eq!(cache.get(&hash, "solver-1.0"), CacheResult::Miss);
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn corrupt_entry_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let hash = key(2);
    let path = cache.entry_path(&hash).unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{ not json").unwrap();

    assert_eq!(cache.get(&hash, "v"), CacheResult::Miss);
    assert!(!path.exists());
}

#[test]
fn entry_stored_under_other_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let original = key(3);
    let write = cache
        .store(&original, "v", VerificationStatus::Proven, None, Duration::ZERO)
        .unwrap();
    let moved = format!("{}d", &original[..original.len() - 1]);
    let target = cache.entry_path(&moved).unwrap();
    fs::rename(&write.path, &target).unwrap();

    assert_eq!(cache.get(&moved, "v"), CacheResult::Miss);
    assert!(!target.exists());
}

// ============================================================================
// Never-cached statuses
// ============================================================================

#[test]
fn unsupported_results_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let solver = Scripted::new(SolverVerdict::Unsupported {
        reason: "nonlinear".to_string(),
    });
    let verifier = ContractVerifier::new(&solver).with_cache(&cache);

    verifier.verify_function(&clamp());
    let again = verifier.verify_function(&clamp());
    assert!(again.iter().all(|o| !o.cached && o.status == VerificationStatus::Unsupported));
    assert_eq!(solver.calls(), 4);
    assert_eq!(cache.entry_count(), 0);

    let err = cache
        .store(&key(4), "v", VerificationStatus::Unsupported, None, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, CacheError::Uncacheable(VerificationStatus::Unsupported)));
}

#[test]
fn deadline_overrun_is_skipped_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(dir.path());
    let mut solver = Scripted::new(SolverVerdict::Proven);
    solver.delay = Duration::from_millis(20);
    let verifier = ContractVerifier::new(&solver)
        .with_cache(&cache)
        .with_deadline(Duration::from_millis(1));

    let outcomes = verifier.verify_function(&clamp());
    assert!(outcomes.iter().all(|o| o.status == VerificationStatus::Skipped));
    assert!(outcomes.iter().all(|o| o.note.is_some()));
    assert_eq!(cache.entry_count(), 0);

    let err = cache
        .store(&key(5), "v", VerificationStatus::Skipped, None, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, CacheError::Uncacheable(VerificationStatus::Skipped)));
}

// ============================================================================
// Eviction
// ============================================================================

fn set_access_time(path: &Path, secs: u64) {
    let when = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_accessed(when).set_modified(when))
        .unwrap();
}

#[test]
fn eviction_removes_least_recently_accessed_first() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("cache");
    let filler = VerificationCache::new(root.clone(), u64::MAX);

    // Six similar-sized entries; entry i was last accessed at t = 1000 + 10i.
    let mut paths = Vec::new();
    for i in 0..6 {
        let write = filler
            .store(&key(i), "v", VerificationStatus::Proven, None, Duration::from_millis(1))
            .unwrap();
        assert_eq!(write.evicted, 0);
        paths.push(write.path);
    }
    // Store order and access order disagree on purpose.
    let access_rank = [3u64, 0, 5, 1, 4, 2];
    for (path, rank) in paths.iter().zip(access_rank) {
        set_access_time(path, 1000 + 10 * rank);
    }
    let total = filler.total_size();

    // Same directory, budget equal to what is already stored: any write
    // crosses it.
    let bounded = VerificationCache::new(root, total);
    let write = bounded
        .store(&key(6), "v", VerificationStatus::Proven, None, Duration::from_millis(1))
        .unwrap();

    let target = total * 80 / 100;
    assert!(bounded.total_size() <= target, "{} > {}", bounded.total_size(), target);
    assert_eq!(write.evicted, 3);
    assert_eq!(bounded.stats().evictions, 3);

    let mut by_age: Vec<(u64, &Path)> = access_rank
        .iter()
        .copied()
        .zip(paths.iter().map(|p| p.as_path()))
        .collect();
    by_age.sort();
    let (oldest, newest) = by_age.split_at(write.evicted);
    assert!(oldest.iter().all(|(_, p)| !p.exists()));
    assert!(newest.iter().all(|(_, p)| p.exists()));
    assert!(write.path.exists());
}

#[test]
fn writes_under_budget_never_evict() {
    let dir = tempfile::tempdir().unwrap();
    let cache = VerificationCache::new(dir.path().to_path_buf(), 1024 * 1024);
    for i in 0..4 {
        let write = cache
            .store(&key(i), "v", VerificationStatus::Proven, None, Duration::ZERO)
            .unwrap();
        assert_eq!(write.evicted, 0);
    }
    assert_eq!(cache.entry_count(), 4);
    assert_eq!(cache.clear().unwrap(), 4);
    assert_eq!(cache.entry_count(), 0);
}
