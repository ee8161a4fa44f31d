use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length of a generated term id, in lowercase hex characters.
const GENERATED_ID_LEN: usize = 12;

/// Opaque identifier of a [`Term`](crate::Term).
///
/// Generated once at construction and never reused. Callers may supply their
/// own ids (fixtures, imported ledgers); the only requirement is that the id is
/// not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TermId(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("term id must not be empty")]
pub struct TermIdError;

impl TermId {
    pub fn new(value: impl Into<String>) -> Result<Self, TermIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TermIdError);
        }
        Ok(Self(value))
    }

    /// Fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(GENERATED_ID_LEN);
        Self(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TermId {
    type Error = TermIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TermId {
    type Error = TermIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TermId> for String {
    fn from(value: TermId) -> Self {
        value.0
    }
}

impl Borrow<str> for TermId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TermId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
