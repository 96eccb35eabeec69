//! Tenet compiler middle-end
//!
//! Checks bound programs before code generation: validates each function's
//! lowered IR with liveness and reaching-definitions analyses, proves every
//! function's effects are covered by its declaration, and verifies pre- and
//! postconditions through a pluggable solver backed by a persistent cache.

pub mod compiler;
pub mod config;
pub mod diagnostics;

use compiler::ast::Program;
use compiler::dataflow::validate::validate_function;
use compiler::dataflow::DataflowError;
use compiler::effects::catalog::{CatalogError, EffectCatalog};
use compiler::effects::inference::EffectInference;
use compiler::effects::FunctionEffectProfile;
use compiler::verification::cache::{CacheStats, VerificationCache};
use compiler::verification::solver::ContractSolver;
use compiler::verification::{ContractVerifier, VerificationOutcome};
use config::{ConfigError, TenetConfig};
use diagnostics::{Diagnostic, Severity};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Dataflow(#[from] DataflowError),
}

// ── Report ──────────────────────────────────────────────────────────

/// Everything one `check` produced.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// One profile per function, in program order.
    pub effects: Vec<FunctionEffectProfile>,
    pub contracts: Vec<VerificationOutcome>,
    /// IR findings, then effect findings, then contract findings, each in
    /// program order.
    pub diagnostics: Vec<Diagnostic>,
    /// Cumulative cache counters for the session, when caching is on.
    pub cache_stats: Option<CacheStats>,
}

impl CheckReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn effect_profile(&self, function: &str) -> Option<&FunctionEffectProfile> {
        self.effects.iter().find(|p| p.function == function)
    }

    pub fn render_plain(&self) -> String {
        self.diagnostics
            .iter()
            .map(Diagnostic::render_plain)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// One compilation invocation: the effect catalog and verification cache
/// are built once here and shared by every function checked.
#[derive(Debug)]
pub struct Session {
    config: TenetConfig,
    project_root: Option<PathBuf>,
    catalog: EffectCatalog,
    cache: Option<VerificationCache>,
}

impl Session {
    pub fn new(config: TenetConfig, project_root: Option<&Path>) -> Result<Self, CheckError> {
        let catalog_path = config.catalog_path(project_root);
        let catalog = EffectCatalog::load(catalog_path.as_deref())?;
        let cache = (config.verification.enabled && config.verification.cache).then(|| {
            let root = VerificationCache::resolve_root(
                config.verification.cache_dir.as_deref(),
                project_root,
            );
            log::debug!("verification cache at {}", root.display());
            VerificationCache::new(root, config.verification.max_cache_bytes)
        });
        Ok(Self {
            config,
            project_root: project_root.map(Path::to_path_buf),
            catalog,
            cache,
        })
    }

    /// Session for the project containing `start`: the nearest `tenet.toml`
    /// decides both the configuration and the project root.
    pub fn discover(start: &Path) -> Result<Self, CheckError> {
        match TenetConfig::load_with_path(start)? {
            Some((path, config)) => {
                let root = path.parent().map(Path::to_path_buf);
                Self::new(config, root.as_deref())
            }
            None => Self::new(TenetConfig::default(), None),
        }
    }

    pub fn config(&self) -> &TenetConfig {
        &self.config
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub fn catalog(&self) -> &EffectCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> Option<&VerificationCache> {
        self.cache.as_ref()
    }

    pub fn check(&self, program: &Program, solver: &dyn ContractSolver) -> Result<CheckReport, CheckError> {
        let mut report = CheckReport::default();

        for func in &program.functions {
            let cfg = compiler::cfg::build(func);
            for finding in validate_function(&cfg)? {
                report.diagnostics.push(Diagnostic::from_ir_error(&finding));
            }
        }

        let effects = EffectInference::new(&self.catalog, self.config.effects.unknown_calls).infer(program);
        report
            .diagnostics
            .extend(effects.errors.iter().map(Diagnostic::from_effect_error));
        report.effects = effects.profiles;

        if self.config.verification.enabled {
            let mut verifier = ContractVerifier::new(solver);
            if let Some(cache) = &self.cache {
                verifier = verifier.with_cache(cache);
            }
            if let Some(deadline) = self.config.verification.solver_timeout() {
                verifier = verifier.with_deadline(deadline);
            }
            for func in &program.functions {
                report.contracts.extend(verifier.verify_function(func));
            }
            report
                .diagnostics
                .extend(report.contracts.iter().filter_map(Diagnostic::from_outcome));
        }

        report.cache_stats = self.cache.as_ref().map(VerificationCache::stats);
        log::debug!(
            "checked {} functions: {} errors, {} warnings",
            program.functions.len(),
            report.count(Severity::Error),
            report.count(Severity::Warning)
        );
        Ok(report)
    }
}
