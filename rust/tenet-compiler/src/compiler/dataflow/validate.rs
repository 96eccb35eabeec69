//! Lowered-IR validation built on liveness and reaching definitions.
//!
//! Runs after CFG construction and before a function is accepted for
//! further compilation. Shape violations stop validation early since the
//! analyses assume well-formed blocks.

use super::liveness::LiveVariables;
use super::reaching::ReachingDefinitions;
use super::DataflowError;
use crate::compiler::cfg::{BlockId, ControlFlowGraph};
use crate::compiler::tokens::Span;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("malformed block {block} in '{function}': {message}")]
    MalformedBlock {
        function: String,
        block: BlockId,
        message: String,
    },
    #[error("'{variable}' is used in '{function}' at line {} with no reaching definition", span.line)]
    UseWithoutDefinition {
        function: String,
        variable: String,
        block: BlockId,
        span: Span,
    },
    #[error("value assigned to '{variable}' in '{function}' at line {} is never read", span.line)]
    DeadAssignment {
        function: String,
        variable: String,
        block: BlockId,
        span: Span,
    },
}

impl IrError {
    /// Dead assignments are reported but never block compilation.
    pub fn is_warning(&self) -> bool {
        matches!(self, IrError::DeadAssignment { .. })
    }
}

/// Validate one function's lowered IR.
pub fn validate_function(cfg: &ControlFlowGraph) -> Result<Vec<IrError>, DataflowError> {
    let function = cfg.function().to_string();
    let shape: Vec<IrError> = cfg
        .shape_errors()
        .into_iter()
        .map(|e| IrError::MalformedBlock {
            function: function.clone(),
            block: e.block,
            message: e.message,
        })
        .collect();
    if !shape.is_empty() {
        return Ok(shape);
    }

    let reachable = reachable_blocks(cfg);
    let reaching = ReachingDefinitions::analyze(cfg)?;
    let live = LiveVariables::analyze(cfg)?;
    let mut findings = Vec::new();

    for block in cfg.blocks().iter().filter(|b| reachable[b.id.index()]) {
        for (i, stmt) in block.statements.iter().enumerate() {
            for var in stmt.used_variables() {
                if reaching.definitions_of(block.id, i, &var).is_empty() {
                    findings.push(IrError::UseWithoutDefinition {
                        function: function.clone(),
                        variable: var,
                        block: block.id,
                        span: stmt.span(),
                    });
                }
            }
        }
        if let Some(cond) = &block.condition {
            let at_branch = block.statements.len();
            for var in cond.used_variables() {
                if reaching.definitions_of(block.id, at_branch, &var).is_empty() {
                    findings.push(IrError::UseWithoutDefinition {
                        function: function.clone(),
                        variable: var,
                        block: block.id,
                        span: cond.span(),
                    });
                }
            }
        }
        for dead in live.dead_assignments(block.id) {
            findings.push(IrError::DeadAssignment {
                function: function.clone(),
                variable: dead.variable,
                block: dead.block,
                span: dead.span,
            });
        }
    }

    log::debug!(
        "validated '{}': {} findings (liveness {} passes, reaching {} passes)",
        function,
        findings.len(),
        live.passes(),
        reaching.passes()
    );
    Ok(findings)
}

fn reachable_blocks(cfg: &ControlFlowGraph) -> Vec<bool> {
    let mut seen = vec![false; cfg.len()];
    let mut stack = vec![cfg.entry()];
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut seen[id.index()], true) {
            continue;
        }
        stack.extend(cfg.block(id).successors.iter().copied());
    }
    seen
}
