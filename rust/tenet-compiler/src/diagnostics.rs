//! Uniform diagnostic records for every finding the middle-end reports.

use crate::compiler::dataflow::validate::IrError;
use crate::compiler::effects::inference::EffectError;
use crate::compiler::effects::{EffectCategory, EffectKind};
use crate::compiler::error_codes::{effect_code, ir_code, verification_code};
use crate::compiler::tokens::Span;
use crate::compiler::verification::{VerificationOutcome, VerificationStatus};
use serde::Serialize;
use strum::IntoEnumIterator;

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A finding with a stable code and location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub function: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
    /// Ordered call sites from the reporting function to the cause.
    pub call_chain: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    fn new(code: &str, message: String, function: &str, span: Option<Span>) -> Self {
        let severity = match code.as_bytes().first() {
            Some(b'W') => Severity::Warning,
            Some(b'N') => Severity::Note,
            _ => Severity::Error,
        };
        // Synthesized nodes carry line 0.
        let span = span.filter(|s| s.line > 0);
        Self {
            severity,
            code: code.to_string(),
            message,
            function: Some(function.to_string()),
            line: span.map(|s| s.line),
            col: span.map(|s| s.col),
            call_chain: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn from_ir_error(e: &IrError) -> Self {
        let (function, span) = match e {
            IrError::MalformedBlock { function, .. } => (function, None),
            IrError::UseWithoutDefinition { function, span, .. }
            | IrError::DeadAssignment { function, span, .. } => (function, Some(*span)),
        };
        Diagnostic::new(ir_code(e), e.to_string(), function, span)
    }

    pub fn from_effect_error(e: &EffectError) -> Self {
        let mut d = Diagnostic::new(effect_code(e), e.to_string(), e.function(), Some(e.span()));
        match e {
            EffectError::Violation {
                function,
                effect,
                chain,
                ..
            } => {
                d.call_chain = chain.iter().map(|link| link.to_string()).collect();
                d.suggestions
                    .push(format!("declare `{}` on '{}'", effect, function));
            }
            EffectError::AmbiguousStub { candidates, .. } => {
                for c in candidates {
                    d.suggestions.push(format!("candidate effects: {}", c));
                }
            }
            EffectError::UnknownCall { signature, .. } => {
                d.suggestions.push(format!(
                    "add a [[stub]] for `{}` to the project effect catalog",
                    signature
                ));
            }
            EffectError::InvalidDeclaration { names, .. } => {
                let known = known_effect_names();
                let known: Vec<&str> = known.iter().map(String::as_str).collect();
                for name in names {
                    for s in suggest_similar(name, &known, 3) {
                        d.suggestions.push(format!("did you mean `{}`?", s));
                    }
                }
            }
        }
        d
    }

    /// `None` for proven contracts.
    pub fn from_outcome(o: &VerificationOutcome) -> Option<Self> {
        let code = verification_code(o.status)?;
        let message = match o.status {
            VerificationStatus::Disproven => format!(
                "{} {} of '{}' does not hold",
                o.kind,
                o.index + 1,
                o.function
            ),
            _ => format!(
                "{} {} of '{}' was not verified ({})",
                o.kind,
                o.index + 1,
                o.function,
                o.status
            ),
        };
        let mut d = Diagnostic::new(code, message, &o.function, Some(o.span));
        if let Some(cex) = &o.counterexample {
            d.suggestions.push(format!("counterexample: {}", cex));
        }
        if let Some(note) = &o.note {
            d.suggestions.push(note.clone());
        }
        Some(d)
    }

    /// Render without colors (for logs, tests)
    pub fn render_plain(&self) -> String {
        let mut out = String::new();

        let severity_label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        out.push_str(&format!("{}[{}]: {}\n", severity_label, self.code, self.message));

        match (&self.function, self.line, self.col) {
            (Some(f), Some(line), Some(col)) => out.push_str(&format!("  --> {}:{}:{}\n", f, line, col)),
            (Some(f), _, _) => out.push_str(&format!("  --> {}\n", f)),
            _ => {}
        }

        if !self.call_chain.is_empty() || !self.suggestions.is_empty() {
            out.push_str("   |\n");
        }
        for link in &self.call_chain {
            out.push_str(&format!("   = via: {}\n", link));
        }
        for suggestion in &self.suggestions {
            out.push_str(&format!("   = help: {}\n", suggestion));
        }

        out
    }
}

fn known_effect_names() -> Vec<String> {
    EffectCategory::iter()
        .map(|c| c.name().to_string())
        .chain(EffectKind::iter().map(|k| k.to_string()))
        .collect()
}

// Edit distance for suggestions
fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (a_len, b_len) = (a_chars.len(), b_chars.len());
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut row = vec![0; b_len + 1];
    for i in 1..=a_len {
        row[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            row[j] = (prev[j] + 1).min(row[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b_len]
}

fn suggest_similar(name: &str, candidates: &[&str], max_distance: usize) -> Vec<String> {
    let mut matches: Vec<(usize, &str)> = candidates
        .iter()
        .map(|c| (edit_distance(name, c), *c))
        .filter(|(d, _)| *d <= max_distance)
        .collect();
    matches.sort();
    matches.into_iter().map(|(_, s)| s.to_string()).take(3).collect()
}
