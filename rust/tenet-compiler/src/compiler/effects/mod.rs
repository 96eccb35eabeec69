//! Effect model and whole-program effect checking.
//!
//! Every function declares the effects its body may perform. Inference
//! computes the effects actually reachable from the body (through calls to
//! other program functions and catalogued external methods) and rejects
//! functions whose computed set is not a subset of the declared one.

pub mod call_graph;
pub mod catalog;
pub mod inference;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EffectCategory {
    Io,
    Mutation,
    Nondeterminism,
    Exception,
    Unknown,
}

impl EffectCategory {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn kinds(self) -> impl Iterator<Item = EffectKind> {
        EffectKind::iter().filter(move |k| k.category() == self)
    }
}

impl FromStr for EffectCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectCategory::iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown effect category '{}'", s))
    }
}

/// Concrete effect capability. Ordering is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EffectKind {
    ConsoleWrite,
    ConsoleRead,
    FileRead,
    FileWrite,
    Network,
    Database,
    HeapWrite,
    StaticWrite,
    Time,
    Random,
    Environment,
    Throw,
    Unknown,
}

impl EffectKind {
    pub fn category(self) -> EffectCategory {
        match self {
            EffectKind::ConsoleWrite
            | EffectKind::ConsoleRead
            | EffectKind::FileRead
            | EffectKind::FileWrite
            | EffectKind::Network
            | EffectKind::Database => EffectCategory::Io,
            EffectKind::HeapWrite | EffectKind::StaticWrite => EffectCategory::Mutation,
            EffectKind::Time | EffectKind::Random | EffectKind::Environment => {
                EffectCategory::Nondeterminism
            }
            EffectKind::Throw => EffectCategory::Exception,
            EffectKind::Unknown => EffectCategory::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category().name(), self.name())
    }
}

impl FromStr for EffectKind {
    type Err = String;

    /// Parses `category:kind`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cat, kind) = s
            .split_once(':')
            .ok_or_else(|| format!("effect '{}' is not of the form category:kind", s))?;
        let cat: EffectCategory = cat.trim().parse()?;
        cat.kinds()
            .find(|k| k.name() == kind.trim())
            .ok_or_else(|| format!("unknown effect '{}'", s))
    }
}

/// Set of effect kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EffectSet(BTreeSet<EffectKind>);

impl EffectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kind of every category; what an unresolved call may do.
    pub fn worst_case() -> Self {
        Self(EffectKind::iter().collect())
    }

    pub fn of(kinds: &[EffectKind]) -> Self {
        Self(kinds.iter().copied().collect())
    }

    /// Parse declared or catalogued effect names. A bare category name
    /// stands for all kinds in that category. Unparseable names are
    /// returned as the error list.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, Vec<String>> {
        let mut set = Self::new();
        let mut bad = Vec::new();
        for raw in names {
            let name = raw.as_ref().trim();
            if name.contains(':') {
                match name.parse::<EffectKind>() {
                    Ok(k) => {
                        set.insert(k);
                    }
                    Err(_) => bad.push(name.to_string()),
                }
            } else {
                match name.parse::<EffectCategory>() {
                    Ok(c) => set.0.extend(c.kinds()),
                    Err(_) => bad.push(name.to_string()),
                }
            }
        }
        if bad.is_empty() {
            Ok(set)
        } else {
            Err(bad)
        }
    }

    pub fn insert(&mut self, kind: EffectKind) -> bool {
        self.0.insert(kind)
    }

    pub fn extend(&mut self, other: &EffectSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn contains(&self, kind: EffectKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn is_subset(&self, other: &EffectSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Kinds in `self` that are missing from `other`, in reporting order.
    pub fn missing_from<'a>(&'a self, other: &'a EffectSet) -> impl Iterator<Item = EffectKind> + 'a {
        self.0.difference(&other.0).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = EffectKind> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Size of the effect universe; bounds fixpoint growth.
    pub fn universe_size() -> usize {
        EffectKind::iter().count()
    }
}

impl FromIterator<EffectKind> for EffectSet {
    fn from_iter<I: IntoIterator<Item = EffectKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for EffectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|k| k.to_string()).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Declared vs. computed effects for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEffectProfile {
    pub function: String,
    pub declared: EffectSet,
    pub computed: EffectSet,
}

impl FunctionEffectProfile {
    pub fn is_accepted(&self) -> bool {
        self.computed.is_subset(&self.declared)
    }
}
