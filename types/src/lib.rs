//! Core term types for Proofbook.
//!
//! This crate contains the immutable term model with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the engine.

mod frozen;
mod ids;
mod kernel_state;
pub mod stage_meta;
mod term;

pub use frozen::{FrozenList, FrozenMap, FrozenSet};
pub use ids::{TermId, TermIdError};
pub use kernel_state::KernelState;
pub use stage_meta::{
    BoundMeta, DeltaMethodMeta, KloostermanMeta, KuznetsovMeta, StageMeta, VoronoiKind,
    VoronoiMeta,
};
pub use term::{
    HistoryEntry, Kernel, Metadata, Phase, Range, Term, TermBuildError, TermBuilder, TermKind,
    TermStatus,
};

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// NonEmpty String Types
// ============================================================================

/// A string guaranteed to be non-empty (after trimming).
///
/// Lemma citations are carried as this type so that a `BoundOnly` term can
/// never hold a blank citation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("string must not be empty")]
pub struct EmptyStringError;

impl NonEmptyString {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyStringError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyStringError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl Deref for NonEmptyString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for NonEmptyString {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
