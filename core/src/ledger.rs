//! The term ledger: every term produced during a run, in insertion order.
//!
//! Terms are never removed. Pruning hides a term from the default views while
//! keeping its id resolvable for lineage lookups. Cloning copies the index and
//! the pruned set; the `Arc<Term>` payloads are shared.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use proofbook_types::{Term, TermId, TermKind, TermStatus};

use crate::invariants::{Violation, validate_all};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Duplicate term id: {id}")]
    DuplicateId { id: TermId },
    #[error("Unknown term id: {id}")]
    UnknownTerm { id: String },
    #[error("failed to encode ledger")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode ledger")]
    Decode(#[source] serde_json::Error),
}

/// Optional kind and status constraints; an unset field matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermFilter {
    pub kind: Option<TermKind>,
    pub status: Option<TermStatus>,
}

impl TermFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: TermKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn status(mut self, status: TermStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn matches(&self, term: &Term) -> bool {
        self.kind.is_none_or(|kind| term.kind() == kind)
            && self.status.is_none_or(|status| term.status() == status)
    }
}

#[derive(Serialize)]
struct LedgerDocument<'a> {
    terms: Vec<&'a Term>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OwnedLedgerDocument {
    terms: Vec<Term>,
}

#[derive(Debug, Clone, Default)]
pub struct TermLedger {
    terms: IndexMap<TermId, Arc<Term>>,
    pruned: HashSet<TermId>,
}

impl TermLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one term. Fails without touching the ledger if the id is taken.
    pub fn add(&mut self, term: impl Into<Arc<Term>>) -> Result<Arc<Term>, LedgerError> {
        let term = term.into();
        if self.terms.contains_key(term.id()) {
            debug!(id = %term.id(), "Rejected duplicate term id");
            return Err(LedgerError::DuplicateId {
                id: term.id().clone(),
            });
        }
        self.terms.insert(term.id().clone(), Arc::clone(&term));
        Ok(term)
    }

    /// Register a batch. The whole batch is checked for duplicates, against
    /// the ledger and within itself, before anything is inserted.
    pub fn add_many<I, T>(&mut self, terms: I) -> Result<Vec<Arc<Term>>, LedgerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Arc<Term>>,
    {
        let batch: Vec<Arc<Term>> = terms.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(batch.len());
        for term in &batch {
            if self.terms.contains_key(term.id()) || !seen.insert(term.id()) {
                debug!(id = %term.id(), batch = batch.len(), "Rejected batch with duplicate term id");
                return Err(LedgerError::DuplicateId {
                    id: term.id().clone(),
                });
            }
        }
        for term in &batch {
            self.terms.insert(term.id().clone(), Arc::clone(term));
        }
        Ok(batch)
    }

    /// Look up a term by id, pruned or not.
    pub fn get(&self, id: impl AsRef<str>) -> Result<&Arc<Term>, LedgerError> {
        let id = id.as_ref();
        self.terms.get(id).ok_or_else(|| LedgerError::UnknownTerm {
            id: id.to_string(),
        })
    }

    pub fn find(&self, id: impl AsRef<str>) -> Option<&Arc<Term>> {
        self.terms.get(id.as_ref())
    }

    pub fn contains(&self, id: impl AsRef<str>) -> bool {
        self.terms.contains_key(id.as_ref())
    }

    /// Visible terms in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Term>> {
        self.terms
            .iter()
            .filter(|(id, _)| !self.pruned.contains(*id))
            .map(|(_, term)| term)
    }

    #[must_use]
    pub fn all_terms(&self) -> Vec<Arc<Term>> {
        self.iter().cloned().collect()
    }

    #[must_use]
    pub fn all_terms_including_pruned(&self) -> Vec<Arc<Term>> {
        self.terms.values().cloned().collect()
    }

    #[must_use]
    pub fn filter(&self, filter: &TermFilter) -> Vec<Arc<Term>> {
        self.filter_by(|term| filter.matches(term))
    }

    pub fn filter_by(&self, predicate: impl Fn(&Term) -> bool) -> Vec<Arc<Term>> {
        self.iter().filter(|term| predicate(term)).cloned().collect()
    }

    #[must_use]
    pub fn active_terms(&self) -> Vec<Arc<Term>> {
        self.filter(&TermFilter::new().status(TermStatus::Active))
    }

    /// Hide every visible term whose status is not in `keep`.
    ///
    /// Returns how many terms were newly hidden; pruning twice with the same
    /// statuses returns 0 the second time.
    pub fn prune(&mut self, keep: &[TermStatus]) -> usize {
        let newly_pruned: Vec<TermId> = self
            .terms
            .iter()
            .filter(|(id, term)| !self.pruned.contains(*id) && !keep.contains(&term.status()))
            .map(|(id, _)| id.clone())
            .collect();
        let count = newly_pruned.len();
        self.pruned.extend(newly_pruned);
        debug!(pruned = count, visible = self.count(), "Pruned ledger");
        count
    }

    pub fn is_pruned(&self, id: impl AsRef<str>) -> bool {
        self.pruned.contains(id.as_ref())
    }

    /// Visible terms.
    #[must_use]
    pub fn count(&self) -> usize {
        self.terms.len() - self.pruned.len()
    }

    /// All terms, pruned included.
    #[must_use]
    pub fn count_total(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count_total()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Single-term invariants over every stored term.
    #[must_use]
    pub fn validate_all(&self) -> Vec<Violation> {
        validate_all(self.terms.values().map(|term| &**term))
    }

    /// Canonical JSON: `{"terms": [...]}`, keys sorted, two-space indent,
    /// pruned terms included.
    pub fn to_json(&self) -> Result<String, LedgerError> {
        let document = LedgerDocument {
            terms: self.terms.values().map(|term| &**term).collect(),
        };
        // Round-trip through Value so every object is emitted with sorted keys.
        let value: Value = serde_json::to_value(&document).map_err(LedgerError::Encode)?;
        serde_json::to_string_pretty(&value).map_err(LedgerError::Encode)
    }

    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        let document: OwnedLedgerDocument =
            serde_json::from_str(json).map_err(LedgerError::Decode)?;
        let mut ledger = Self::new();
        ledger.add_many(document.terms)?;
        Ok(ledger)
    }
}
