//! Transactional stage execution.
//!
//! Each stage runs its transform against a clone of the live ledger. The
//! clone replaces the live ledger only when every invariant passes; on any
//! violation it is dropped and the live ledger is exactly what it was before
//! the call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info, warn};

use proofbook_config::RunnerConfig;
use proofbook_core::{InvariantSet, StageView, TermLedger, Violation, check_kernel_transition};
use proofbook_types::{Term, TermId};

use crate::bound::{Bound, BoundAdapter};
use crate::trace::DerivationTrace;
use crate::transform::Transform;

/// Relaxations for stages that legitimately simplify structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOptions {
    pub allow_phase_drop: bool,
    pub allow_kernel_removal: bool,
}

impl StageOptions {
    #[must_use]
    pub fn strict() -> Self {
        Self::default()
    }

    /// Bounding stages trade exact structure for a cited magnitude.
    #[must_use]
    pub fn bounding() -> Self {
        Self {
            allow_phase_drop: true,
            allow_kernel_removal: true,
        }
    }
}

/// One entry of the stage log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub input_count: usize,
    pub output_count: usize,
    #[serde(serialize_with = "serialize_violations")]
    pub violations: Vec<Violation>,
}

impl StageRecord {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

fn serialize_violations<S: Serializer>(
    violations: &[Violation],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(violations.iter().map(ToString::to_string))
}

/// A stage failed one or more invariants and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invariant violation after {stage}:\n{}", render(.violations))]
pub struct PipelineViolation {
    pub stage: String,
    pub violations: Vec<Violation>,
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug)]
pub struct StrictPipelineRunner {
    ledger: TermLedger,
    invariants: InvariantSet,
    stage_log: Vec<StageRecord>,
}

impl Default for StrictPipelineRunner {
    fn default() -> Self {
        Self::new(TermLedger::new())
    }
}

impl StrictPipelineRunner {
    /// Runner over `ledger` with the standard invariant set.
    #[must_use]
    pub fn new(ledger: TermLedger) -> Self {
        Self::with_invariants(ledger, InvariantSet::standard())
    }

    #[must_use]
    pub fn with_invariants(ledger: TermLedger, invariants: InvariantSet) -> Self {
        Self {
            ledger,
            invariants,
            stage_log: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(ledger: TermLedger, config: &RunnerConfig) -> Self {
        Self::with_invariants(ledger, config.invariants())
    }

    #[must_use]
    pub fn ledger(&self) -> &TermLedger {
        &self.ledger
    }

    #[must_use]
    pub fn into_ledger(self) -> TermLedger {
        self.ledger
    }

    #[must_use]
    pub fn invariants(&self) -> &InvariantSet {
        &self.invariants
    }

    #[must_use]
    pub fn stage_log(&self) -> &[StageRecord] {
        &self.stage_log
    }

    /// Trace every visible ledger term against the stage log so far.
    #[must_use]
    pub fn trace(&self) -> DerivationTrace {
        DerivationTrace::from_terms(self.ledger.iter(), &self.stage_log)
    }

    /// Apply `transform` to `inputs` as one all-or-nothing stage.
    ///
    /// An empty `stage` name falls back to the transform's own name.
    pub fn run_stage(
        &mut self,
        transform: &dyn Transform,
        inputs: &[Arc<Term>],
        stage: &str,
        options: StageOptions,
    ) -> Result<Vec<Arc<Term>>, PipelineViolation> {
        let stage = if stage.is_empty() {
            transform.name().to_string()
        } else {
            stage.to_string()
        };
        let inputs = inputs.to_vec();
        debug!(
            stage = %stage,
            transform = %transform.describe(),
            inputs = inputs.len(),
            "Running stage"
        );

        let mut trial = self.ledger.clone();
        let (outputs, violations) = match transform.apply(&inputs, &mut trial) {
            Ok(outputs) => {
                let violations = self.validate(&stage, &inputs, &outputs, &trial, options);
                (outputs, violations)
            }
            Err(err) => {
                let violation = Violation::TransformFailed {
                    transform: transform.name().to_string(),
                    message: err.to_string(),
                };
                (Vec::new(), vec![violation])
            }
        };

        self.stage_log.push(StageRecord {
            stage: stage.clone(),
            input_count: inputs.len(),
            output_count: outputs.len(),
            violations: violations.clone(),
        });

        if !violations.is_empty() {
            for violation in &violations {
                debug!(stage = %stage, %violation, "Invariant violation");
            }
            warn!(
                stage = %stage,
                violations = violations.len(),
                "Stage rolled back"
            );
            return Err(PipelineViolation { stage, violations });
        }

        self.ledger = trial;
        info!(
            stage = %stage,
            inputs = inputs.len(),
            outputs = outputs.len(),
            ledger = self.ledger.count_total(),
            "Stage committed"
        );
        Ok(outputs)
    }

    /// Run a bound strategy as a stage with phase and kernel relaxations on.
    ///
    /// Applicable terms are replaced by their bound terms; the rest pass
    /// through. Per-term, dependency and lineage checks still apply.
    pub fn run_bounding_stage(
        &mut self,
        bound: &Bound,
        terms: &[Arc<Term>],
        stage: &str,
    ) -> Result<Vec<Arc<Term>>, PipelineViolation> {
        let adapter = BoundAdapter::new(bound);
        self.run_stage(&adapter, terms, stage, StageOptions::bounding())
    }

    fn validate(
        &self,
        stage: &str,
        inputs: &[Arc<Term>],
        outputs: &[Arc<Term>],
        trial: &TermLedger,
        options: StageOptions,
    ) -> Vec<Violation> {
        let view = StageView {
            stage,
            inputs,
            outputs,
            allow_phase_drop: options.allow_phase_drop,
            allow_kernel_removal: options.allow_kernel_removal,
        };
        let mut violations = self.invariants.check(&view);
        violations.extend(check_lineage(inputs, outputs, trial));
        violations.extend(
            outputs
                .iter()
                .filter(|out| !trial.contains(out.id()))
                .map(|out| Violation::UnregisteredOutput {
                    term: out.id().clone(),
                }),
        );
        violations
    }
}

/// Validate each output against its recorded parents, resolved first among
/// the stage inputs and then in the trial ledger.
fn check_lineage(
    inputs: &[Arc<Term>],
    outputs: &[Arc<Term>],
    trial: &TermLedger,
) -> Vec<Violation> {
    let by_id: HashMap<&TermId, &Arc<Term>> = inputs.iter().map(|t| (t.id(), t)).collect();
    let mut violations = Vec::new();

    for out in outputs {
        for parent_id in out.parents() {
            let parent = by_id
                .get(parent_id)
                .copied()
                .or_else(|| trial.find(parent_id));
            let Some(parent) = parent else {
                violations.push(Violation::MissingParent {
                    term: out.id().clone(),
                    parent: parent_id.clone(),
                });
                continue;
            };
            if parent.kernel_state() != out.kernel_state() {
                violations.extend(check_kernel_transition(
                    parent.kernel_state(),
                    out.kernel_state(),
                ));
            }
        }
    }
    violations
}
