//! Bookkeeping invariants checked on every pipeline stage.
//!
//! Every predicate here is pure and returns the violations it found; nothing
//! in this module fails with `Err`. The runner decides what a non-empty list
//! means.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use proofbook_types::{KernelState, Term, TermId, TermStatus, VoronoiKind};

/// Phase expression produced by Kloosterman formation.
const KLOOSTERMAN_PHASE: &str = "S(m,n;c)/c";
/// Kernel introduced by integrating out the `t` variable.
const FOURIER_KERNEL: &str = "FourierKernel";
const FOURIER_VARIABLE: &str = "t";
const SPECTRAL_LARGE_SIEVE: &str = "SpectralLargeSieve";

/// A detected breach of a bookkeeping contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Term {term}: BoundOnly without lemma_citation")]
    MissingCitation { term: TermId },

    #[error("Phases lost in {stage}: {{{}}}", .phases.join(", "))]
    PhasesLost { stage: String, phases: Vec<String> },

    #[error("Kernels lost in {stage}: {{{}}}", .kernels.join(", "))]
    KernelsLost { stage: String, kernels: Vec<String> },

    #[error(
        "Illegal kernel state transition: {from} -> {to}. Allowed from {from}: [{}]",
        join_states(.from.successors())
    )]
    IllegalTransition { from: KernelState, to: KernelState },

    #[error("Term {term}: parent '{parent}' not found in stage inputs or ledger")]
    MissingParent { term: TermId, parent: TermId },

    #[error(
        "Term {term}: phase '{phase}' depends_on includes {{{}}} not in variables [{}]",
        .extra.join(", "),
        .variables.join(", ")
    )]
    DependencyOutsideVariables {
        term: TermId,
        phase: String,
        extra: Vec<String>,
        variables: Vec<String>,
    },

    #[error("Term {term}: returned by the transform but not registered in the ledger")]
    UnregisteredOutput { term: TermId },

    #[error("Transform {transform} failed: {message}")]
    TransformFailed { transform: String, message: String },

    #[error("Term {term}: {detail}")]
    Rule {
        rule: String,
        term: TermId,
        detail: String,
    },
}

fn join_states(states: &[KernelState]) -> String {
    states
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Violation {
    fn rule(rule: &str, term: &Term, detail: impl Into<String>) -> Self {
        Self::Rule {
            rule: rule.to_string(),
            term: term.id().clone(),
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Single-term predicates
// ============================================================================

pub fn check_citation(term: &Term) -> Vec<Violation> {
    if term.status() == TermStatus::BoundOnly && term.lemma_citation().is_none() {
        return vec![Violation::MissingCitation {
            term: term.id().clone(),
        }];
    }
    Vec::new()
}

/// Each phase's `depends_on` must be a subset of the term's variables.
pub fn check_phase_dependencies(term: &Term) -> Vec<Violation> {
    let variables: BTreeSet<&str> = term.variables().iter().map(String::as_str).collect();
    term.phases()
        .iter()
        .filter_map(|phase| {
            let extra: Vec<String> = phase
                .depends_on
                .iter()
                .filter(|var| !variables.contains(var.as_str()))
                .cloned()
                .collect();
            (!extra.is_empty()).then(|| Violation::DependencyOutsideVariables {
                term: term.id().clone(),
                phase: phase.expression.clone(),
                extra,
                variables: term.variables().to_vec(),
            })
        })
        .collect()
}

/// Kernel state must agree with the delta-method record.
pub fn check_kernel_state_consistency(term: &Term) -> Vec<Violation> {
    const RULE: &str = "kernel_state_consistency";
    let mut violations = Vec::new();
    let delta = term.delta_meta();

    match term.kernel_state() {
        KernelState::UncollapsedDelta => {
            if !delta.is_some_and(|meta| meta.applied) {
                violations.push(Violation::rule(
                    RULE,
                    term,
                    "kernel_state=UncollapsedDelta but delta method not applied",
                ));
            }
            if delta.is_some_and(|meta| meta.collapsed) {
                violations.push(Violation::rule(
                    RULE,
                    term,
                    "kernel_state=UncollapsedDelta but delta method collapsed",
                ));
            }
        }
        KernelState::Collapsed => {
            if delta.is_some_and(|meta| meta.applied && !meta.collapsed) {
                violations.push(Violation::rule(
                    RULE,
                    term,
                    "kernel_state=Collapsed but delta method not collapsed",
                ));
            }
        }
        _ => {}
    }
    violations
}

pub fn check_spectralized_has_kuznetsov(term: &Term) -> Vec<Violation> {
    let applied = term.kuznetsov_meta().is_some_and(|meta| meta.applied);
    if term.kernel_state() == KernelState::Spectralized && !applied {
        return vec![Violation::rule(
            "spectralized_has_kuznetsov",
            term,
            "kernel_state=Spectralized without applied Kuznetsov metadata",
        )];
    }
    Vec::new()
}

/// Spectral large sieve bounds need an explicit Voronoi dual sum upstream.
pub fn check_spectral_bound_voronoi(term: &Term) -> Vec<Violation> {
    let is_spectral_bound = term.status() == TermStatus::BoundOnly
        && term.bound_meta().is_some_and(|meta| {
            meta.bound_family == SPECTRAL_LARGE_SIEVE || meta.strategy == SPECTRAL_LARGE_SIEVE
        });
    if !is_spectral_bound {
        return Vec::new();
    }
    let formula = term
        .voronoi_meta()
        .is_some_and(|meta| meta.kind == VoronoiKind::Formula);
    if formula {
        return Vec::new();
    }
    vec![Violation::rule(
        "spectral_bound_voronoi",
        term,
        "SpectralLargeSieve bound requires Voronoi metadata of kind formula",
    )]
}

/// Absorbing a phase is only an isometry when it is unit-modulus and separable.
pub fn check_absorbed_phase_isometry(term: &Term) -> Vec<Violation> {
    term.phases()
        .iter()
        .filter(|phase| phase.absorbed && !(phase.unit_modulus && phase.is_separable))
        .map(|phase| {
            Violation::rule(
                "absorbed_phase_isometry",
                term,
                format!(
                    "absorbed phase '{}' must be unit-modulus and separable",
                    phase.expression
                ),
            )
        })
        .collect()
}

/// Run every single-term check.
pub fn validate_term(term: &Term) -> Vec<Violation> {
    SINGLE_TERM_CHECKS
        .iter()
        .flat_map(|(_, check)| check(term))
        .collect()
}

pub fn validate_all<'a>(terms: impl IntoIterator<Item = &'a Term>) -> Vec<Violation> {
    terms.into_iter().flat_map(validate_term).collect()
}

type TermCheck = fn(&Term) -> Vec<Violation>;

const DOMAIN_CHECKS: [(&str, TermCheck); 4] = [
    ("kernel_state_consistency", check_kernel_state_consistency),
    ("spectralized_has_kuznetsov", check_spectralized_has_kuznetsov),
    ("spectral_bound_voronoi", check_spectral_bound_voronoi),
    ("absorbed_phase_isometry", check_absorbed_phase_isometry),
];

const SINGLE_TERM_CHECKS: [(&str, TermCheck); 6] = [
    ("citation", check_citation),
    ("phase_dependencies", check_phase_dependencies),
    DOMAIN_CHECKS[0],
    DOMAIN_CHECKS[1],
    DOMAIN_CHECKS[2],
    DOMAIN_CHECKS[3],
];

// ============================================================================
// Stage predicates
// ============================================================================

pub fn check_kernel_transition(from: KernelState, to: KernelState) -> Vec<Violation> {
    if from.can_transition_to(to) {
        Vec::new()
    } else {
        vec![Violation::IllegalTransition { from, to }]
    }
}

/// How missing phases may be explained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAccounting {
    /// Retained, absorbed, or listed in a consumption record.
    #[default]
    Strict,
    /// Strict, plus pattern-based inference for stages that predate
    /// consumption records.
    Legacy,
}

impl fmt::Display for PhaseAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Legacy => f.write_str("legacy"),
        }
    }
}

/// Every input phase must be retained on an output or accounted for.
pub fn check_phase_conservation(
    inputs: &[Arc<Term>],
    outputs: &[Arc<Term>],
    stage: &str,
    accounting: PhaseAccounting,
) -> Vec<Violation> {
    let output_phases: BTreeSet<&str> = outputs.iter().flat_map(|t| t.phase_expressions()).collect();
    let mut missing: BTreeSet<&str> = inputs
        .iter()
        .flat_map(|t| t.phase_expressions())
        .filter(|expr| !output_phases.contains(expr))
        .collect();
    if missing.is_empty() {
        return Vec::new();
    }

    let consumed: BTreeSet<&str> = outputs
        .iter()
        .flat_map(|t| t.stage_meta().consumed_phases())
        .collect();
    let absorbed: BTreeSet<&str> = outputs
        .iter()
        .flat_map(|t| t.phases().iter())
        .filter(|p| p.absorbed)
        .map(|p| p.expression.as_str())
        .collect();
    missing.retain(|expr| !consumed.contains(expr) && !absorbed.contains(expr));

    // Inference only stands in for missing records, never for an incomplete one.
    if accounting == PhaseAccounting::Legacy && consumed.is_empty() && !missing.is_empty() {
        let inferred = infer_consumed_phases(inputs, outputs, &missing);
        missing.retain(|expr| !inferred.contains(expr));
    }

    if missing.is_empty() {
        return Vec::new();
    }
    vec![Violation::PhasesLost {
        stage: stage.to_string(),
        phases: missing.into_iter().map(str::to_string).collect(),
    }]
}

fn infer_consumed_phases<'a>(
    inputs: &'a [Arc<Term>],
    outputs: &[Arc<Term>],
    missing: &BTreeSet<&'a str>,
) -> BTreeSet<&'a str> {
    let mut inferred = BTreeSet::new();

    let kloosterman_formed = outputs
        .iter()
        .any(|t| t.phase_expressions().any(|expr| expr == KLOOSTERMAN_PHASE));
    if kloosterman_formed {
        inferred.extend(
            missing
                .iter()
                .copied()
                .filter(|expr| expr.starts_with("e(") && expr.contains('/') && expr.ends_with(')')),
        );
    }

    let fourier = outputs
        .iter()
        .any(|t| t.kernel_names().any(|name| name == FOURIER_KERNEL));
    if fourier {
        inferred.extend(
            inputs
                .iter()
                .flat_map(|t| t.phases().iter())
                .filter(|p| p.depends_on.contains(FOURIER_VARIABLE))
                .map(|p| p.expression.as_str())
                .filter(|expr| missing.contains(expr)),
        );
    }
    inferred
}

/// Every input kernel name must reappear on some output unless removal is allowed.
pub fn check_kernel_conservation(
    inputs: &[Arc<Term>],
    outputs: &[Arc<Term>],
    stage: &str,
    allow_removal: bool,
) -> Vec<Violation> {
    if allow_removal {
        return Vec::new();
    }
    let output_kernels: BTreeSet<&str> = outputs.iter().flat_map(|t| t.kernel_names()).collect();
    let missing: BTreeSet<&str> = inputs
        .iter()
        .flat_map(|t| t.kernel_names())
        .filter(|name| !output_kernels.contains(name))
        .collect();
    if missing.is_empty() {
        return Vec::new();
    }
    vec![Violation::KernelsLost {
        stage: stage.to_string(),
        kernels: missing.into_iter().map(str::to_string).collect(),
    }]
}

// ============================================================================
// Invariant registry
// ============================================================================

/// What an [`Invariant`] sees of one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageView<'a> {
    pub stage: &'a str,
    pub inputs: &'a [Arc<Term>],
    pub outputs: &'a [Arc<Term>],
    pub allow_phase_drop: bool,
    pub allow_kernel_removal: bool,
}

pub trait Invariant {
    fn name(&self) -> &str;

    fn check(&self, view: &StageView<'_>) -> Vec<Violation>;
}

struct Citation;

impl Invariant for Citation {
    fn name(&self) -> &str {
        "citation"
    }

    fn check(&self, view: &StageView<'_>) -> Vec<Violation> {
        view.outputs.iter().flat_map(|t| check_citation(t)).collect()
    }
}

struct PhaseConservation(PhaseAccounting);

impl Invariant for PhaseConservation {
    fn name(&self) -> &str {
        "phase_conservation"
    }

    fn check(&self, view: &StageView<'_>) -> Vec<Violation> {
        if view.allow_phase_drop {
            return Vec::new();
        }
        check_phase_conservation(view.inputs, view.outputs, view.stage, self.0)
    }
}

struct KernelConservation;

impl Invariant for KernelConservation {
    fn name(&self) -> &str {
        "kernel_conservation"
    }

    fn check(&self, view: &StageView<'_>) -> Vec<Violation> {
        check_kernel_conservation(
            view.inputs,
            view.outputs,
            view.stage,
            view.allow_kernel_removal,
        )
    }
}

struct PhaseDependencies;

impl Invariant for PhaseDependencies {
    fn name(&self) -> &str {
        "phase_dependencies"
    }

    fn check(&self, view: &StageView<'_>) -> Vec<Violation> {
        view.outputs
            .iter()
            .flat_map(|t| check_phase_dependencies(t))
            .collect()
    }
}

/// Lifts a single-term predicate into an [`Invariant`] over stage outputs.
pub struct TermRule<F> {
    name: String,
    rule: F,
}

impl<F> TermRule<F>
where
    F: Fn(&Term) -> Vec<Violation>,
{
    pub fn new(name: impl Into<String>, rule: F) -> Self {
        Self {
            name: name.into(),
            rule,
        }
    }
}

impl<F> Invariant for TermRule<F>
where
    F: Fn(&Term) -> Vec<Violation>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, view: &StageView<'_>) -> Vec<Violation> {
        view.outputs.iter().flat_map(|t| (self.rule)(t)).collect()
    }
}

/// Ordered collection of invariants run against every stage.
#[derive(Default)]
pub struct InvariantSet {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Structural checks plus the domain rules, strict phase accounting.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_rules(PhaseAccounting::Strict, true)
    }

    /// Citation, phase and kernel conservation, phase dependencies.
    #[must_use]
    pub fn structural() -> Self {
        Self::from_rules(PhaseAccounting::Strict, false)
    }

    #[must_use]
    pub fn from_rules(accounting: PhaseAccounting, domain_rules: bool) -> Self {
        let mut set = Self::empty()
            .with(Citation)
            .with(PhaseConservation(accounting))
            .with(KernelConservation)
            .with(PhaseDependencies);
        if domain_rules {
            for (name, check) in DOMAIN_CHECKS {
                set = set.with(TermRule::new(name, check));
            }
        }
        set
    }

    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.invariants.iter().map(|inv| inv.name())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    #[must_use]
    pub fn check(&self, view: &StageView<'_>) -> Vec<Violation> {
        self.invariants
            .iter()
            .flat_map(|inv| inv.check(view))
            .collect()
    }
}

impl fmt::Debug for InvariantSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
