//! The immutable term record and its builder.
//!
//! A [`Term`] is never edited in place. Every change goes through a
//! [`TermBuilder`] and yields a new term with a fresh id, unless the caller
//! explicitly carries the old one with [`TermBuilder::keep_id`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::stage_meta::{
    BoundMeta, DeltaMethodMeta, KloostermanMeta, KuznetsovMeta, StageMeta, VoronoiMeta,
};
use crate::{FrozenList, FrozenMap, FrozenSet, KernelState, NonEmptyString, TermId};

/// Open annotation map. Nested JSON values are only reachable by shared reference.
pub type Metadata = FrozenMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermKind {
    Integral,
    DirichletSum,
    Cross,
    Diagonal,
    OffDiagonal,
    Kloosterman,
    Spectral,
    Error,
}

impl TermKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TermKind::Integral => "Integral",
            TermKind::DirichletSum => "DirichletSum",
            TermKind::Cross => "Cross",
            TermKind::Diagonal => "Diagonal",
            TermKind::OffDiagonal => "OffDiagonal",
            TermKind::Kloosterman => "Kloosterman",
            TermKind::Spectral => "Spectral",
            TermKind::Error => "Error",
        }
    }
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TermStatus {
    #[default]
    Active,
    MainTerm,
    BoundOnly,
    Error,
}

impl TermStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TermStatus::Active => "Active",
            TermStatus::MainTerm => "MainTerm",
            TermStatus::BoundOnly => "BoundOnly",
            TermStatus::Error => "Error",
        }
    }
}

impl fmt::Display for TermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Component records
// ============================================================================

fn default_lower() -> String {
    "1".to_string()
}

fn default_upper() -> String {
    "T".to_string()
}

/// Summation or integration range of one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub variable: String,
    #[serde(default = "default_lower")]
    pub lower: String,
    #[serde(default = "default_upper")]
    pub upper: String,
    #[serde(default)]
    pub description: String,
}

impl Range {
    #[must_use]
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            lower: default_lower(),
            upper: default_upper(),
            description: String::new(),
        }
    }

    pub fn with_bounds(mut self, lower: impl Into<String>, upper: impl Into<String>) -> Self {
        self.lower = lower.into();
        self.upper = upper.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Named smoothing/weight function attached to a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    #[serde(default)]
    pub support: String,
    #[serde(default)]
    pub argument: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: FrozenMap<String, Value>,
}

impl Kernel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            support: String::new(),
            argument: String::new(),
            description: String::new(),
            properties: FrozenMap::new(),
        }
    }

    pub fn with_support(mut self, support: impl Into<String>) -> Self {
        self.support = support.into();
        self
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = argument.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties = self.properties.with_entry(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn mellin_transform(&self) -> String {
        self.symbolic_property("mellin_transform")
            .unwrap_or_else(|| format!("Mellin({})", self.name))
    }

    #[must_use]
    pub fn residue_structure(&self) -> String {
        self.symbolic_property("residue_structure")
            .unwrap_or_else(|| format!("Res({})", self.name))
    }

    fn symbolic_property(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Oscillatory factor tracked on a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub expression: String,
    #[serde(default)]
    pub depends_on: FrozenSet<String>,
    #[serde(default)]
    pub is_separable: bool,
    #[serde(default)]
    pub absorbed: bool,
    #[serde(default)]
    pub unit_modulus: bool,
}

impl Phase {
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            depends_on: FrozenSet::new(),
            is_separable: false,
            absorbed: false,
            unit_modulus: false,
        }
    }

    pub fn with_depends_on<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = variables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_separable(mut self, separable: bool) -> Self {
        self.is_separable = separable;
        self
    }

    pub fn with_absorbed(mut self, absorbed: bool) -> Self {
        self.absorbed = absorbed;
        self
    }

    pub fn with_unit_modulus(mut self, unit_modulus: bool) -> Self {
        self.unit_modulus = unit_modulus;
        self
    }
}

/// One transform application in a term's derivation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub transform: String,
    #[serde(default)]
    pub parent_ids: FrozenList<TermId>,
    #[serde(default)]
    pub description: String,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(
        transform: impl Into<String>,
        parent_ids: impl IntoIterator<Item = TermId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            transform: transform.into(),
            parent_ids: parent_ids.into_iter().collect(),
            description: description.into(),
        }
    }
}

// ============================================================================
// Term
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermBuildError {
    #[error("BoundOnly terms must have a non-empty lemma_citation")]
    MissingCitation,
    #[error("lemma_citation is only allowed on BoundOnly terms (status is {status})")]
    UnexpectedCitation { status: TermStatus },
    #[error("variable '{name}' is listed more than once")]
    DuplicateVariable { name: String },
    #[error("variable names must not be empty")]
    EmptyVariable,
    #[error("multiplicity must be positive")]
    ZeroMultiplicity,
}

/// One node of a symbolic expression with its bookkeeping attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TermWire")]
pub struct Term {
    id: TermId,
    kind: TermKind,
    expression: String,
    variables: FrozenList<String>,
    ranges: FrozenList<Range>,
    kernels: FrozenList<Kernel>,
    phases: FrozenList<Phase>,
    history: FrozenList<HistoryEntry>,
    status: TermStatus,
    parents: FrozenList<TermId>,
    #[serde(serialize_with = "serialize_citation")]
    lemma_citation: Option<NonEmptyString>,
    multiplicity: NonZeroU32,
    metadata: Metadata,
    stage_meta: StageMeta,
    kernel_state: KernelState,
}

#[allow(clippy::ref_option)] // signature fixed by serde's serialize_with
fn serialize_citation<S: Serializer>(
    citation: &Option<NonEmptyString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(citation.as_ref().map_or("", NonEmptyString::as_str))
}

impl Term {
    #[must_use]
    pub fn builder(kind: TermKind) -> TermBuilder {
        TermBuilder::new(kind)
    }

    /// Builder pre-filled with every field of `self`. The built term gets a
    /// fresh id unless [`TermBuilder::keep_id`] is called.
    #[must_use]
    pub fn to_builder(&self) -> TermBuilder {
        TermBuilder {
            id: None,
            source_id: Some(self.id.clone()),
            kind: self.kind,
            expression: self.expression.clone(),
            variables: self.variables.to_vec(),
            ranges: self.ranges.to_vec(),
            kernels: self.kernels.to_vec(),
            phases: self.phases.to_vec(),
            history: self.history.to_vec(),
            status: self.status,
            parents: self.parents.to_vec(),
            lemma_citation: self.lemma_citation.as_ref().map(ToString::to_string),
            multiplicity: self.multiplicity.get(),
            metadata: self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stage_meta: self.stage_meta.clone(),
            kernel_state: self.kernel_state,
        }
    }

    /// Builder for a child of `self` produced by `transform`.
    ///
    /// The child starts as a copy with a fresh id, `parents = [self.id]`, and
    /// one extra history entry recording the step.
    #[must_use]
    pub fn derive(&self, transform: &str, description: &str) -> TermBuilder {
        let mut builder = self.to_builder();
        builder.parents = vec![self.id.clone()];
        builder.history.push(HistoryEntry::new(
            transform,
            [self.id.clone()],
            description,
        ));
        builder
    }

    #[must_use]
    pub fn id(&self) -> &TermId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TermKind {
        self.kind
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn variables(&self) -> &FrozenList<String> {
        &self.variables
    }

    #[must_use]
    pub fn ranges(&self) -> &FrozenList<Range> {
        &self.ranges
    }

    #[must_use]
    pub fn kernels(&self) -> &FrozenList<Kernel> {
        &self.kernels
    }

    #[must_use]
    pub fn phases(&self) -> &FrozenList<Phase> {
        &self.phases
    }

    #[must_use]
    pub fn history(&self) -> &FrozenList<HistoryEntry> {
        &self.history
    }

    #[must_use]
    pub fn status(&self) -> TermStatus {
        self.status
    }

    #[must_use]
    pub fn parents(&self) -> &FrozenList<TermId> {
        &self.parents
    }

    #[must_use]
    pub fn lemma_citation(&self) -> Option<&str> {
        self.lemma_citation.as_ref().map(NonEmptyString::as_str)
    }

    #[must_use]
    pub fn multiplicity(&self) -> NonZeroU32 {
        self.multiplicity
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn stage_meta(&self) -> &StageMeta {
        &self.stage_meta
    }

    #[must_use]
    pub fn kernel_state(&self) -> KernelState {
        self.kernel_state
    }

    #[must_use]
    pub fn delta_meta(&self) -> Option<&DeltaMethodMeta> {
        self.stage_meta.delta.as_ref()
    }

    #[must_use]
    pub fn voronoi_meta(&self) -> Option<&VoronoiMeta> {
        self.stage_meta.voronoi.as_ref()
    }

    #[must_use]
    pub fn kloosterman_meta(&self) -> Option<&KloostermanMeta> {
        self.stage_meta.kloosterman.as_ref()
    }

    #[must_use]
    pub fn kuznetsov_meta(&self) -> Option<&KuznetsovMeta> {
        self.stage_meta.kuznetsov.as_ref()
    }

    #[must_use]
    pub fn bound_meta(&self) -> Option<&BoundMeta> {
        self.stage_meta.bound.as_ref()
    }

    pub fn phase_expressions(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.expression.as_str())
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Accumulates fields for a new [`Term`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct TermBuilder {
    id: Option<TermId>,
    source_id: Option<TermId>,
    kind: TermKind,
    expression: String,
    variables: Vec<String>,
    ranges: Vec<Range>,
    kernels: Vec<Kernel>,
    phases: Vec<Phase>,
    history: Vec<HistoryEntry>,
    status: TermStatus,
    parents: Vec<TermId>,
    lemma_citation: Option<String>,
    multiplicity: u32,
    metadata: BTreeMap<String, Value>,
    stage_meta: StageMeta,
    kernel_state: KernelState,
}

impl TermBuilder {
    #[must_use]
    pub fn new(kind: TermKind) -> Self {
        Self {
            id: None,
            source_id: None,
            kind,
            expression: String::new(),
            variables: Vec::new(),
            ranges: Vec::new(),
            kernels: Vec::new(),
            phases: Vec::new(),
            history: Vec::new(),
            status: TermStatus::Active,
            parents: Vec::new(),
            lemma_citation: None,
            multiplicity: 1,
            metadata: BTreeMap::new(),
            stage_meta: StageMeta::default(),
            kernel_state: KernelState::None,
        }
    }

    pub fn id(mut self, id: TermId) -> Self {
        self.id = Some(id);
        self
    }

    /// Carry the id of the term this builder was copied from.
    pub fn keep_id(mut self) -> Self {
        if let Some(source) = self.source_id.clone() {
            self.id = Some(source);
        }
        self
    }

    pub fn kind(mut self, kind: TermKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    /// Replace the variable list.
    pub fn variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn range(mut self, range: Range) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn ranges(mut self, ranges: impl IntoIterator<Item = Range>) -> Self {
        self.ranges = ranges.into_iter().collect();
        self
    }

    pub fn kernel(mut self, kernel: Kernel) -> Self {
        self.kernels.push(kernel);
        self
    }

    pub fn kernels(mut self, kernels: impl IntoIterator<Item = Kernel>) -> Self {
        self.kernels = kernels.into_iter().collect();
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn phases(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.phases = phases.into_iter().collect();
        self
    }

    pub fn history_entry(mut self, entry: HistoryEntry) -> Self {
        self.history.push(entry);
        self
    }

    pub fn status(mut self, status: TermStatus) -> Self {
        self.status = status;
        self
    }

    pub fn parent(mut self, id: TermId) -> Self {
        self.parents.push(id);
        self
    }

    pub fn parents(mut self, ids: impl IntoIterator<Item = TermId>) -> Self {
        self.parents = ids.into_iter().collect();
        self
    }

    pub fn lemma_citation(mut self, citation: impl Into<String>) -> Self {
        self.lemma_citation = Some(citation.into());
        self
    }

    pub fn clear_citation(mut self) -> Self {
        self.lemma_citation = None;
        self
    }

    /// Shorthand for `status(BoundOnly)` plus a citation.
    pub fn bound_only(self, citation: impl Into<String>) -> Self {
        self.status(TermStatus::BoundOnly).lemma_citation(citation)
    }

    pub fn multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn stage_meta(mut self, stage_meta: StageMeta) -> Self {
        self.stage_meta = stage_meta;
        self
    }

    pub fn delta_meta(mut self, meta: DeltaMethodMeta) -> Self {
        self.stage_meta.delta = Some(meta);
        self
    }

    pub fn voronoi_meta(mut self, meta: VoronoiMeta) -> Self {
        self.stage_meta.voronoi = Some(meta);
        self
    }

    pub fn kloosterman_meta(mut self, meta: KloostermanMeta) -> Self {
        self.stage_meta.kloosterman = Some(meta);
        self
    }

    pub fn kuznetsov_meta(mut self, meta: KuznetsovMeta) -> Self {
        self.stage_meta.kuznetsov = Some(meta);
        self
    }

    pub fn bound_meta(mut self, meta: BoundMeta) -> Self {
        self.stage_meta.bound = Some(meta);
        self
    }

    pub fn kernel_state(mut self, state: KernelState) -> Self {
        self.kernel_state = state;
        self
    }

    pub fn build(self) -> Result<Term, TermBuildError> {
        let mut seen = HashSet::new();
        for name in &self.variables {
            if name.trim().is_empty() {
                return Err(TermBuildError::EmptyVariable);
            }
            if !seen.insert(name.as_str()) {
                return Err(TermBuildError::DuplicateVariable { name: name.clone() });
            }
        }

        let multiplicity =
            NonZeroU32::new(self.multiplicity).ok_or(TermBuildError::ZeroMultiplicity)?;

        let citation = self
            .lemma_citation
            .and_then(|citation| NonEmptyString::new(citation).ok());
        match (self.status, &citation) {
            (TermStatus::BoundOnly, None) => return Err(TermBuildError::MissingCitation),
            (status, Some(_)) if status != TermStatus::BoundOnly => {
                return Err(TermBuildError::UnexpectedCitation { status });
            }
            _ => {}
        }

        Ok(Term {
            id: self.id.unwrap_or_else(TermId::generate),
            kind: self.kind,
            expression: self.expression,
            variables: self.variables.into(),
            ranges: self.ranges.into(),
            kernels: self.kernels.into(),
            phases: self.phases.into(),
            history: self.history.into(),
            status: self.status,
            parents: self.parents.into(),
            lemma_citation: citation,
            multiplicity,
            metadata: self.metadata.into(),
            stage_meta: self.stage_meta,
            kernel_state: self.kernel_state,
        })
    }
}

// ============================================================================
// Deserialization
// ============================================================================

/// Raw persisted shape; every term read from JSON goes back through the builder.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TermWire {
    id: TermId,
    kind: TermKind,
    #[serde(default)]
    expression: String,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    ranges: Vec<Range>,
    #[serde(default)]
    kernels: Vec<Kernel>,
    #[serde(default)]
    phases: Vec<Phase>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(default)]
    status: TermStatus,
    #[serde(default)]
    parents: Vec<TermId>,
    #[serde(default)]
    lemma_citation: String,
    #[serde(default = "default_multiplicity")]
    multiplicity: u32,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default)]
    stage_meta: StageMeta,
    #[serde(default)]
    kernel_state: KernelState,
}

fn default_multiplicity() -> u32 {
    1
}

impl TryFrom<TermWire> for Term {
    type Error = TermBuildError;

    fn try_from(wire: TermWire) -> Result<Self, Self::Error> {
        let builder = TermBuilder {
            id: Some(wire.id),
            source_id: None,
            kind: wire.kind,
            expression: wire.expression,
            variables: wire.variables,
            ranges: wire.ranges,
            kernels: wire.kernels,
            phases: wire.phases,
            history: wire.history,
            status: wire.status,
            parents: wire.parents,
            lemma_citation: Some(wire.lemma_citation),
            multiplicity: wire.multiplicity,
            metadata: wire.metadata,
            stage_meta: wire.stage_meta,
            kernel_state: wire.kernel_state,
        };
        builder.build()
    }
}
