//! The contract every pipeline step implements.

use std::any;
use std::sync::Arc;

use thiserror::Error;

use proofbook_core::{LedgerError, TermLedger};
use proofbook_types::{Term, TermBuildError, TermId};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Build(#[from] TermBuildError),
    #[error("bound strategy {strategy} produced non-BoundOnly term {term}")]
    NotBoundOnly { strategy: String, term: TermId },
    #[error("{0}")]
    Failed(String),
}

impl TransformError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A rewrite step over a batch of terms.
///
/// Implementations must not mutate their inputs (they cannot: terms are
/// immutable), must register every newly built term in `ledger` before
/// returning it, and must be deterministic in their inputs. The ledger handed
/// to `apply` is a scratch copy; it only becomes the live ledger if the
/// stage passes every invariant.
pub trait Transform {
    /// Stage name used when the caller does not supply one. Generic
    /// parameters are dropped, so `Sieve<Short>` names itself `Sieve`.
    fn name(&self) -> &str {
        let full = any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    fn describe(&self) -> String {
        self.name().to_string()
    }

    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError>;
}
