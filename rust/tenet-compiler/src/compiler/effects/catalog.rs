//! Effect catalog: fully-qualified external signatures mapped to effect sets.
//!
//! Two layers exist. The builtin layer ships with the compiler; the project
//! layer is read from an optional TOML override file and wins over the
//! builtin layer for any signature both define. Within one layer, two stubs
//! for the same signature with different effect sets make that signature
//! ambiguous: resolution reports every candidate and never picks one.
//!
//! ```toml
//! [[stub]]
//! signature = "Acme.Mail.Client::Send(String,String)"
//! effects = ["io:network"]
//!
//! [[stub]]
//! signature = "Acme.Mail.Client::Connect"   # any overload
//! effects = ["io:network", "exception"]
//! ```

use super::EffectSet;
use crate::compiler::ast::CallRef;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read effect catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed effect catalog {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid stub signature '{signature}'")]
    InvalidSignature { signature: String },
    #[error("stub '{signature}' names unknown effects: {}", names.join(", "))]
    InvalidEffects {
        signature: String,
        names: Vec<String>,
    },
}

/// Which layer a stub came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CatalogLayer {
    Builtin,
    Project,
}

/// Outcome of looking up one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        signature: String,
        effects: EffectSet,
    },
    /// Several distinct effect sets are registered for the matched key.
    Ambiguous {
        signature: String,
        candidates: Vec<EffectSet>,
    },
    NotFound,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    stub: Vec<StubDecl>,
}

#[derive(Debug, Deserialize)]
struct StubDecl {
    signature: String,
    #[serde(default)]
    effects: Vec<String>,
}

// ── Builtin stubs ───────────────────────────────────────────────────

/// Signatures without a parameter list cover every overload.
const BUILTIN_STUBS: &[(&str, &[&str])] = &[
    ("Std.Console::Print", &["io:console_write"]),
    ("Std.Console::PrintLine", &["io:console_write"]),
    ("Std.Console::ReadLine()", &["io:console_read"]),
    ("Std.Fs.File::ReadText(String)", &["io:file_read", "exception:throw"]),
    ("Std.Fs.File::Exists(String)", &["io:file_read"]),
    ("Std.Fs.File::WriteText(String,String)", &["io:file_write", "exception:throw"]),
    ("Std.Fs.File::Delete(String)", &["io:file_write", "exception:throw"]),
    ("Std.Net.HttpClient::.ctor()", &[]),
    ("Std.Net.HttpClient::Get", &["io:network", "exception:throw"]),
    ("Std.Net.HttpClient::Post", &["io:network", "exception:throw"]),
    ("Std.Db.Connection::Query", &["io:database", "exception:throw"]),
    ("Std.Db.Connection::Execute", &["io:database", "exception:throw"]),
    ("Std.Time.Clock::Now()", &["nondeterminism:time"]),
    ("Std.Time.Clock::get_UtcNow()", &["nondeterminism:time"]),
    ("Std.Tasks.Task::Delay(Int)", &["nondeterminism:time"]),
    ("Std.Random::.ctor()", &["nondeterminism:random"]),
    ("Std.Random::.ctor(Int)", &[]),
    ("Std.Random::Next", &["nondeterminism:random", "mutation:heap_write"]),
    ("Std.Env::Var(String)", &["nondeterminism:environment"]),
    ("Std.Env::SetVar(String,String)", &["mutation:static_write"]),
    ("Std.Math::Abs", &[]),
    ("Std.Math::Min", &[]),
    ("Std.Math::Max", &[]),
    ("Std.Math::Sqrt(Float)", &[]),
    ("Std.Text.String::Concat", &[]),
    ("Std.Text.String::get_Length()", &[]),
    ("Std.Text.Builder::.ctor()", &[]),
    ("Std.Text.Builder::Append", &["mutation:heap_write"]),
    ("Std.Text.Builder::ToString()", &[]),
    ("Std.Collections.List::.ctor()", &[]),
    ("Std.Collections.List::Add", &["mutation:heap_write"]),
    ("Std.Collections.List::get_Count()", &[]),
    ("Std.Collections.List::Get(Int)", &["exception:throw"]),
    ("Std.Collections.Map::.ctor()", &[]),
    ("Std.Collections.Map::Insert", &["mutation:heap_write"]),
    ("Std.Collections.Map::TryGet", &[]),
    ("Std.Exception::.ctor(String)", &[]),
];

// ── Catalog ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct EffectCatalog {
    builtin: BTreeMap<String, BTreeSet<EffectSet>>,
    project: BTreeMap<String, BTreeSet<EffectSet>>,
}

impl EffectCatalog {
    /// Catalog with no stubs at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog holding the builtin stubs.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for &(signature, effects) in BUILTIN_STUBS {
            // The builtin table is static and parses by construction.
            if let Err(e) = catalog.add_stub(CatalogLayer::Builtin, signature, effects) {
                log::warn!("skipping builtin stub: {}", e);
            }
        }
        catalog
    }

    /// Builtin stubs plus the project override file, if any.
    pub fn load(overrides: Option<&Path>) -> Result<Self, CatalogError> {
        let mut catalog = Self::builtin();
        if let Some(path) = overrides {
            catalog.load_overrides(path)?;
        }
        Ok(catalog)
    }

    /// Read a TOML override file into the project layer.
    pub fn load_overrides(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let count = self.load_overrides_str(&text).map_err(|e| match e {
            CatalogError::Parse { message, .. } => CatalogError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        log::debug!("loaded {} effect stubs from {}", count, path.display());
        Ok(count)
    }

    /// Parse override stubs from TOML text into the project layer.
    pub fn load_overrides_str(&mut self, text: &str) -> Result<usize, CatalogError> {
        let file: CatalogFile = toml::from_str(text).map_err(|e| CatalogError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        let count = file.stub.len();
        for stub in file.stub {
            self.add_stub(CatalogLayer::Project, &stub.signature, &stub.effects)?;
        }
        Ok(count)
    }

    /// Register one stub. Identical duplicates collapse; differing ones make
    /// the signature ambiguous within its layer.
    pub fn add_stub<S: AsRef<str>>(
        &mut self,
        layer: CatalogLayer,
        signature: &str,
        effects: &[S],
    ) -> Result<(), CatalogError> {
        let key = normalize_signature(signature)?;
        let effects = EffectSet::parse(effects).map_err(|names| CatalogError::InvalidEffects {
            signature: key.clone(),
            names,
        })?;
        let table = match layer {
            CatalogLayer::Builtin => &mut self.builtin,
            CatalogLayer::Project => &mut self.project,
        };
        table.entry(key).or_default().insert(effects);
        Ok(())
    }

    /// Resolve a bound external call. Exact signatures are tried before
    /// overload-agnostic ones; at each step the project layer shadows the
    /// builtin layer.
    pub fn resolve(&self, call: &CallRef) -> Resolution {
        let exact: String = call.signature().split_whitespace().collect();
        let any: String = call.callee.split_whitespace().collect();
        for key in [&exact, &any] {
            let found = self
                .project
                .get_key_value(key.as_str())
                .or_else(|| self.builtin.get_key_value(key.as_str()));
            if let Some((signature, candidates)) = found {
                return if candidates.len() == 1 {
                    Resolution::Resolved {
                        signature: signature.clone(),
                        effects: candidates.iter().next().cloned().unwrap_or_default(),
                    }
                } else {
                    Resolution::Ambiguous {
                        signature: signature.clone(),
                        candidates: candidates.iter().cloned().collect(),
                    }
                };
            }
        }
        Resolution::NotFound
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.project.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.project.is_empty()
    }

    /// Signatures of one layer, sorted.
    pub fn signatures(&self, layer: CatalogLayer) -> impl Iterator<Item = &str> {
        match layer {
            CatalogLayer::Builtin => self.builtin.keys(),
            CatalogLayer::Project => self.project.keys(),
        }
        .map(String::as_str)
    }
}

/// Strip whitespace and check the `Namespace.Type::Method[(T,..)]` shape.
fn normalize_signature(signature: &str) -> Result<String, CatalogError> {
    let key: String = signature.split_whitespace().collect();
    let invalid = || CatalogError::InvalidSignature {
        signature: signature.to_string(),
    };
    let (owner, method) = key.split_once("::").ok_or_else(invalid)?;
    if owner.is_empty() || method.is_empty() || method.starts_with('(') {
        return Err(invalid());
    }
    match method.find('(') {
        Some(open) if !method.ends_with(')') || method[open + 1..].contains('(') => Err(invalid()),
        None if method.contains(')') => Err(invalid()),
        _ => Ok(key),
    }
}
