//! Bounding lemmas as pipeline steps.
//!
//! A bound strategy replaces a term's exact value with a cited upper-bound
//! statement. [`Bound`] unifies the single-output and multi-output shapes so
//! the runner and the registry can treat them alike.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use proofbook_core::TermLedger;
use proofbook_types::{Term, TermStatus};

use crate::transform::{Transform, TransformError};

/// Replaces each applicable term with exactly one `BoundOnly` term.
pub trait BoundStrategy {
    fn name(&self) -> &str;

    fn citation(&self) -> &str;

    fn applies(&self, term: &Term) -> bool;

    fn bound(&self, term: &Term) -> Result<Term, TransformError>;
}

/// Replaces each applicable term with several `BoundOnly` terms, one per case.
pub trait MultiBoundStrategy {
    fn name(&self) -> &str;

    fn citation(&self) -> &str;

    fn applies(&self, term: &Term) -> bool;

    fn bound_multi(&self, term: &Term) -> Result<Vec<Term>, TransformError>;
}

pub enum Bound {
    Single(Box<dyn BoundStrategy>),
    Multi(Box<dyn MultiBoundStrategy>),
}

impl Bound {
    pub fn single(strategy: impl BoundStrategy + 'static) -> Self {
        Self::Single(Box::new(strategy))
    }

    pub fn multi(strategy: impl MultiBoundStrategy + 'static) -> Self {
        Self::Multi(Box::new(strategy))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Single(s) => s.name(),
            Self::Multi(s) => s.name(),
        }
    }

    #[must_use]
    pub fn citation(&self) -> &str {
        match self {
            Self::Single(s) => s.citation(),
            Self::Multi(s) => s.citation(),
        }
    }

    #[must_use]
    pub fn applies(&self, term: &Term) -> bool {
        match self {
            Self::Single(s) => s.applies(term),
            Self::Multi(s) => s.applies(term),
        }
    }

    /// Every bound term produced for `term`, each checked to be `BoundOnly`.
    pub fn bound_terms(&self, term: &Term) -> Result<Vec<Term>, TransformError> {
        let bounded = match self {
            Self::Single(s) => vec![s.bound(term)?],
            Self::Multi(s) => s.bound_multi(term)?,
        };
        if let Some(bad) = bounded.iter().find(|t| t.status() != TermStatus::BoundOnly) {
            return Err(TransformError::NotBoundOnly {
                strategy: self.name().to_string(),
                term: bad.id().clone(),
            });
        }
        Ok(bounded)
    }
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Self::Single(_) => "Single",
            Self::Multi(_) => "Multi",
        };
        f.debug_struct("Bound")
            .field("shape", &shape)
            .field("name", &self.name())
            .finish()
    }
}

/// Runs a [`Bound`] as a [`Transform`]: applicable terms are replaced by their
/// bound terms (registered in the ledger), the rest pass through unchanged.
pub(crate) struct BoundAdapter<'a> {
    bound: &'a Bound,
}

impl<'a> BoundAdapter<'a> {
    pub(crate) fn new(bound: &'a Bound) -> Self {
        Self { bound }
    }
}

impl Transform for BoundAdapter<'_> {
    fn name(&self) -> &str {
        self.bound.name()
    }

    fn describe(&self) -> String {
        format!("bound via {} ({})", self.bound.name(), self.bound.citation())
    }

    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        let mut out = Vec::with_capacity(terms.len());
        for term in terms {
            if self.bound.applies(term) {
                let bounded = self.bound.bound_terms(term)?;
                out.extend(ledger.add_many(bounded)?);
            } else {
                out.push(Arc::clone(term));
            }
        }
        Ok(out)
    }
}

/// Available bound strategies, keyed by name in registration order.
///
/// Registering a second strategy under an existing name replaces the first
/// and keeps its position.
#[derive(Debug, Default)]
pub struct BoundStrategyRegistry {
    strategies: IndexMap<String, Bound>,
}

impl BoundStrategyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the strategy previously registered under the same name.
    pub fn register(&mut self, bound: Bound) -> Option<Bound> {
        self.strategies.insert(bound.name().to_string(), bound)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bound> {
        self.strategies.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bound> {
        self.strategies.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
