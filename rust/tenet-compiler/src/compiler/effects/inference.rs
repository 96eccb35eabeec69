//! Interprocedural effect inference.
//!
//! SCCs of the call graph are processed callees-first. Inside an SCC every
//! member is recomputed from its body until a full round leaves all members
//! unchanged. Alongside each computed effect we keep the call site that
//! introduced it at the smallest call depth, which yields the minimal chain
//! reported on a violation.

use super::call_graph::{CallGraph, CallSite, DirectEffect};
use super::catalog::{EffectCatalog, Resolution};
use super::{EffectKind, EffectSet, FunctionEffectProfile};
use crate::compiler::ast::Program;
use crate::compiler::tokens::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What to do with a call that is neither a program function nor catalogued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCallPolicy {
    /// Assume every effect and report an error.
    #[default]
    Strict,
    /// Assume no effect and report a warning.
    Permissive,
}

/// One hop of a call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub function: String,
    pub span: Span,
    pub action: String,
}

impl fmt::Display for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.function, self.action, self.span)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    #[error("function '{function}' performs undeclared effect {effect}")]
    Violation {
        function: String,
        effect: EffectKind,
        chain: Vec<ChainLink>,
        span: Span,
    },
    #[error("call to '{signature}' in '{function}' matches {} conflicting effect stubs", candidates.len())]
    AmbiguousStub {
        function: String,
        signature: String,
        candidates: Vec<EffectSet>,
        span: Span,
    },
    #[error("call to unknown external method '{signature}' in '{function}'")]
    UnknownCall {
        function: String,
        signature: String,
        strict: bool,
        span: Span,
    },
    #[error("function '{function}' declares unknown effects: {}", names.join(", "))]
    InvalidDeclaration {
        function: String,
        names: Vec<String>,
        span: Span,
    },
}

impl EffectError {
    pub fn is_warning(&self) -> bool {
        matches!(self, EffectError::UnknownCall { strict: false, .. })
    }

    pub fn function(&self) -> &str {
        match self {
            EffectError::Violation { function, .. }
            | EffectError::AmbiguousStub { function, .. }
            | EffectError::UnknownCall { function, .. }
            | EffectError::InvalidDeclaration { function, .. } => function,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            EffectError::Violation { span, .. }
            | EffectError::AmbiguousStub { span, .. }
            | EffectError::UnknownCall { span, .. }
            | EffectError::InvalidDeclaration { span, .. } => *span,
        }
    }
}

/// Inference output: one profile per program function, in program order,
/// and findings grouped by function in the same order.
#[derive(Debug, Clone, Default)]
pub struct EffectReport {
    pub profiles: Vec<FunctionEffectProfile>,
    pub errors: Vec<EffectError>,
}

impl EffectReport {
    pub fn profile(&self, function: &str) -> Option<&FunctionEffectProfile> {
        self.profiles.iter().find(|p| p.function == function)
    }

    pub fn violations(&self) -> impl Iterator<Item = &EffectError> {
        self.errors
            .iter()
            .filter(|e| matches!(e, EffectError::Violation { .. }))
    }
}

// ── Provenance ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Direct(usize),
    Call(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Origin {
    /// Number of program-function hops before the introducing statement.
    depth: usize,
    source: Source,
}

type OriginMap = BTreeMap<EffectKind, Origin>;

fn offer(map: &mut OriginMap, kind: EffectKind, origin: Origin) {
    match map.get(&kind) {
        Some(existing) if existing.depth <= origin.depth => {}
        _ => {
            map.insert(kind, origin);
        }
    }
}

// ── Inference ───────────────────────────────────────────────────────

pub struct EffectInference<'a> {
    catalog: &'a EffectCatalog,
    policy: UnknownCallPolicy,
}

impl<'a> EffectInference<'a> {
    pub fn new(catalog: &'a EffectCatalog, policy: UnknownCallPolicy) -> Self {
        Self { catalog, policy }
    }

    pub fn infer(&self, program: &Program) -> EffectReport {
        let graph = CallGraph::build(program);
        let mut origins: Vec<OriginMap> = vec![OriginMap::new(); graph.len()];

        for scc in graph.sccs() {
            let cap = (scc.len() + 1) * (EffectSet::universe_size() + 1) + 1;
            let mut rounds = 0;
            loop {
                rounds += 1;
                let mut changed = false;
                for &member in &scc {
                    let next = self.compute(&graph, member, &origins);
                    if next != origins[member] {
                        origins[member] = next;
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
                if rounds >= cap {
                    log::warn!("effect fixpoint for {:?} stopped after {} rounds", scc, rounds);
                    break;
                }
            }
            log::debug!("effect SCC {:?} converged in {} rounds", scc, rounds);
        }

        let mut report = EffectReport::default();
        for (index, func) in program.functions.iter().enumerate() {
            let mut declared = EffectSet::new();
            let mut bad = Vec::new();
            for name in &func.effects {
                match EffectSet::parse(std::slice::from_ref(name)) {
                    Ok(set) => declared.extend(&set),
                    Err(names) => bad.extend(names),
                }
            }
            if !bad.is_empty() {
                report.errors.push(EffectError::InvalidDeclaration {
                    function: func.name.clone(),
                    names: bad,
                    span: func.span,
                });
            }

            self.call_findings(&graph, index, &func.name, &mut report.errors);

            let computed: EffectSet = origins[index].keys().copied().collect();
            log::trace!("'{}' computed {} declared {}", func.name, computed, declared);
            if let Some(effect) = computed.missing_from(&declared).next() {
                report.errors.push(EffectError::Violation {
                    function: func.name.clone(),
                    effect,
                    chain: self.chain(program, &graph, &origins, index, effect),
                    span: func.span,
                });
            }
            report.profiles.push(FunctionEffectProfile {
                function: func.name.clone(),
                declared,
                computed,
            });
        }
        report
    }

    /// Effects of one body given the current state of every other function.
    fn compute(&self, graph: &CallGraph, function: usize, origins: &[OriginMap]) -> OriginMap {
        let summary = graph.summary(function);
        let mut out = OriginMap::new();
        for (i, effect) in summary.direct.iter().enumerate() {
            let kind = match effect {
                DirectEffect::Throw { .. } => EffectKind::Throw,
                DirectEffect::FieldWrite { .. } => EffectKind::HeapWrite,
            };
            offer(&mut out, kind, Origin { depth: 0, source: Source::Direct(i) });
        }
        for (i, site) in summary.calls.iter().enumerate() {
            let source = Source::Call(i);
            match graph.internal_target(&site.target) {
                Some(callee) => {
                    for (kind, origin) in &origins[callee] {
                        offer(&mut out, *kind, Origin { depth: origin.depth + 1, source });
                    }
                }
                None => {
                    for kind in self.external_effects(site).iter() {
                        offer(&mut out, kind, Origin { depth: 0, source });
                    }
                }
            }
        }
        out
    }

    fn external_effects(&self, site: &CallSite) -> EffectSet {
        match self.catalog.resolve(&site.target) {
            Resolution::Resolved { effects, .. } => effects,
            Resolution::Ambiguous { candidates, .. } => {
                let mut union = EffectSet::new();
                for c in &candidates {
                    union.extend(c);
                }
                union
            }
            Resolution::NotFound => match self.policy {
                UnknownCallPolicy::Strict => EffectSet::worst_case(),
                UnknownCallPolicy::Permissive => EffectSet::new(),
            },
        }
    }

    fn call_findings(&self, graph: &CallGraph, index: usize, name: &str, out: &mut Vec<EffectError>) {
        for site in &graph.summary(index).calls {
            if graph.internal_target(&site.target).is_some() {
                continue;
            }
            match self.catalog.resolve(&site.target) {
                Resolution::Resolved { .. } => {}
                Resolution::Ambiguous {
                    signature,
                    candidates,
                } => out.push(EffectError::AmbiguousStub {
                    function: name.to_string(),
                    signature,
                    candidates,
                    span: site.span,
                }),
                Resolution::NotFound => out.push(EffectError::UnknownCall {
                    function: name.to_string(),
                    signature: site.target.signature(),
                    strict: self.policy == UnknownCallPolicy::Strict,
                    span: site.span,
                }),
            }
        }
    }

    /// Follow recorded origins from `function` down to the statement that
    /// introduced `effect`.
    fn chain(
        &self,
        program: &Program,
        graph: &CallGraph,
        origins: &[OriginMap],
        function: usize,
        effect: EffectKind,
    ) -> Vec<ChainLink> {
        let mut chain = Vec::new();
        let mut current = function;
        while chain.len() <= graph.len() {
            let Some(origin) = origins[current].get(&effect) else {
                break;
            };
            let summary = graph.summary(current);
            let name = program.functions[current].name.clone();
            match origin.source {
                Source::Direct(i) => {
                    let direct = &summary.direct[i];
                    let action = match direct {
                        DirectEffect::Throw { .. } => "throws".to_string(),
                        DirectEffect::FieldWrite { object, field, .. } => {
                            format!("writes {}.{}", object, field)
                        }
                    };
                    chain.push(ChainLink {
                        function: name,
                        span: direct.span(),
                        action,
                    });
                    break;
                }
                Source::Call(i) => {
                    let site = &summary.calls[i];
                    let internal = graph.internal_target(&site.target);
                    let action = match internal {
                        Some(_) => format!("calls {}", site.target.callee),
                        None => format!("calls {}", site.target.signature()),
                    };
                    chain.push(ChainLink {
                        function: name,
                        span: site.span,
                        action,
                    });
                    match internal {
                        Some(callee) => current = callee,
                        None => break,
                    }
                }
            }
        }
        chain
    }
}
