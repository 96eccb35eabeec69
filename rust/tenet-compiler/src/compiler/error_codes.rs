//! Stable codes for every finding the middle-end reports.
//!
//! Code ranges:
//!   E0600–W0699  IR validation
//!   E0700–E0799  Effect checking
//!   E0800–N0899  Contract verification
//!
//! The leading letter is the default severity: `E` error, `W` warning,
//! `N` note.

use crate::compiler::dataflow::validate::IrError;
use crate::compiler::effects::inference::EffectError;
use crate::compiler::verification::VerificationStatus;

// ── IR validation (E0601–W0603) ────────────────────────────────────

pub fn ir_code(e: &IrError) -> &'static str {
    match e {
        IrError::UseWithoutDefinition { .. } => "E0601",
        IrError::MalformedBlock { .. } => "E0602",
        IrError::DeadAssignment { .. } => "W0603",
    }
}

// ── Effects (E0701–E0705) ──────────────────────────────────────────

pub fn effect_code(e: &EffectError) -> &'static str {
    match e {
        EffectError::Violation { .. } => "E0701",
        EffectError::AmbiguousStub { .. } => "E0702",
        EffectError::UnknownCall { strict: true, .. } => "E0703",
        EffectError::UnknownCall { strict: false, .. } => "W0704",
        EffectError::InvalidDeclaration { .. } => "E0705",
    }
}

// ── Verification (E0801–N0802) ─────────────────────────────────────

/// Code for a contract outcome; proven contracts report nothing.
pub fn verification_code(status: VerificationStatus) -> Option<&'static str> {
    match status {
        VerificationStatus::Proven => None,
        VerificationStatus::Disproven => Some("E0801"),
        VerificationStatus::Unsupported | VerificationStatus::Skipped => Some("N0802"),
    }
}

// ── Documentation ──────────────────────────────────────────────────

/// Short explanation of a code.
pub fn error_doc(code: &str) -> &'static str {
    match code {
        "E0601" => "A variable is read at a point no definition reaches. Assign it on every path before the use.",
        "E0602" => "A basic block breaks the branch shape: conditional blocks need exactly two successors, the exit none, and every other block one.",
        "W0603" => "A value is assigned but never read before being overwritten or going out of scope. Remove the assignment or use the value.",
        "E0701" => "A function performs an effect its declaration does not list. Declare the effect or remove the call chain that introduces it.",
        "E0702" => "Several effect stubs match the same external signature with different effects. Keep one stub per signature in the catalog.",
        "E0703" => "An external call has no effect stub and is assumed to do anything. Add a stub for it to the project effect catalog.",
        "W0704" => "An external call has no effect stub and is assumed to be pure under the permissive policy. Add a stub to check it.",
        "E0705" => "A declared effect name is not a known category or category:kind pair, e.g. `io` or `io:console_write`.",
        "E0801" => "The solver found an input that violates the contract. The counterexample names the offending value.",
        "N0802" => "The contract could not be decided, either because its shape is unsupported or because the solver ran out of time.",
        _ => "Unknown error code.",
    }
}

/// Every code with its documentation, in code order.
pub fn all_error_codes() -> Vec<(&'static str, &'static str)> {
    [
        "E0601", "E0602", "W0603", "E0701", "E0702", "E0703", "W0704", "E0705", "E0801",
        "N0802",
    ]
    .into_iter()
    .map(|code| (code, error_doc(code)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::cfg::BlockId;
    use crate::compiler::tokens::Span;

    #[test]
    fn ir_codes() {
        let e = IrError::DeadAssignment {
            function: "f".into(),
            variable: "x".into(),
            block: BlockId(0),
            span: Span::dummy(),
        };
        assert_eq!(ir_code(&e), "W0603");
    }

    #[test]
    fn unknown_call_code_follows_policy() {
        let mk = |strict| EffectError::UnknownCall {
            function: "f".into(),
            signature: "X::y()".into(),
            strict,
            span: Span::dummy(),
        };
        assert_eq!(effect_code(&mk(true)), "E0703");
        assert_eq!(effect_code(&mk(false)), "W0704");
    }

    #[test]
    fn proven_contracts_have_no_code() {
        assert_eq!(verification_code(VerificationStatus::Proven), None);
        assert_eq!(verification_code(VerificationStatus::Skipped), Some("N0802"));
    }

    #[test]
    fn every_code_is_documented() {
        for (code, doc) in all_error_codes() {
            assert_ne!(doc, "Unknown error code.", "code {} has no documentation", code);
        }
        assert_eq!(error_doc("E9999"), "Unknown error code.");
    }
}
