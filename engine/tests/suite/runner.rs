//! Transactional stage execution

use std::marker::PhantomData;
use std::sync::Arc;

use proofbook_config::{ProofbookConfig, RunnerConfig};
use proofbook_core::{InvariantSet, PhaseAccounting, TermLedger, TermRule, Violation};
use proofbook_engine::{StageOptions, StrictPipelineRunner};
use proofbook_types::{Kernel, KernelState, Phase, Term, TermKind, TermStatus};

use crate::common::{
    AdoptFrom, Collapse, DropPhases, Explode, JumpTo, Orphan, Passthrough, Prune, ROOT_PHASE,
    fresh, ids, seeded, uncollapsed,
};

#[test]
fn failed_stage_leaves_ledger_exactly_as_before() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);

    let err = runner
        .run_stage(&DropPhases, &[Arc::clone(&t0)], "DropPhases", StageOptions::strict())
        .unwrap_err();

    assert_eq!(err.stage, "DropPhases");
    assert!(err.violations.contains(&Violation::PhasesLost {
        stage: "DropPhases".into(),
        phases: vec![ROOT_PHASE.into()],
    }));
    let remaining = runner.ledger().all_terms();
    assert_eq!(ids(&remaining), vec![t0.id().clone()]);
    assert!(Arc::ptr_eq(&remaining[0], &t0));
    assert_eq!(runner.ledger().count_total(), 1);
}

#[test]
fn fan_out_into_collapsed_children_commits() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);

    let children = runner
        .run_stage(&Collapse { fan_out: 2 }, &[Arc::clone(&t0)], "Collapse", StageOptions::strict())
        .unwrap();

    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.parents().as_slice(), [t0.id().clone()]);
        assert_eq!(child.kernel_state(), KernelState::Collapsed);
        assert!(runner.ledger().contains(child.id()));
    }
    let record = &runner.stage_log()[0];
    assert_eq!(record.stage, "Collapse");
    assert_eq!(record.input_count, 1);
    assert_eq!(record.output_count, 2);
    assert!(record.violations.is_empty());
    assert_eq!(runner.ledger().count_total(), 3);
}

#[test]
fn illegal_kernel_state_jump_is_rejected() {
    let (ledger, t0) = seeded(fresh());
    let mut runner = StrictPipelineRunner::new(ledger);

    let err = runner
        .run_stage(
            &JumpTo(KernelState::Kloostermanized),
            &[t0],
            "Jump",
            StageOptions::strict(),
        )
        .unwrap_err();

    assert!(err.violations.contains(&Violation::IllegalTransition {
        from: KernelState::None,
        to: KernelState::Kloostermanized,
    }));
    let message = err.to_string();
    assert!(message.starts_with("Invariant violation after Jump:\n"));
    assert!(message.contains("None -> Kloostermanized"));
    assert_eq!(runner.ledger().count_total(), 1);
}

#[test]
fn legal_single_step_transition_commits() {
    let (ledger, t0) = seeded(fresh());
    let mut runner = StrictPipelineRunner::with_invariants(ledger, InvariantSet::structural());

    let out = runner
        .run_stage(&JumpTo(KernelState::UncollapsedDelta), &[t0], "", StageOptions::strict())
        .unwrap();

    assert_eq!(out[0].kernel_state(), KernelState::UncollapsedDelta);
    assert_eq!(runner.stage_log()[0].stage, "JumpTo");
}

#[test]
fn parent_outside_inputs_and_ledger_is_rejected() {
    let (ledger, t0) = seeded(fresh());
    let mut runner = StrictPipelineRunner::new(ledger);

    let err = runner
        .run_stage(&Orphan, &[t0], "Orphan", StageOptions::strict())
        .unwrap_err();

    assert_eq!(err.violations.len(), 1);
    assert!(matches!(
        &err.violations[0],
        Violation::MissingParent { parent, .. } if parent.as_str() == "ghost"
    ));
    assert_eq!(runner.ledger().count_total(), 1);
}

#[test]
fn parent_resolved_from_ledger_when_not_an_input() {
    let mut ledger = TermLedger::new();
    let elder = ledger.add(fresh()).unwrap();
    let t0 = ledger.add(fresh()).unwrap();
    let mut runner = StrictPipelineRunner::new(ledger);

    let out = runner
        .run_stage(&AdoptFrom(elder.id().clone()), &[t0], "Adopt", StageOptions::strict())
        .unwrap();

    assert_eq!(out[0].parents().len(), 2);
    assert_eq!(runner.ledger().count_total(), 3);
}

#[test]
fn transform_error_rolls_back_partial_registrations() {
    let (ledger, t0) = seeded(fresh());
    let mut runner = StrictPipelineRunner::new(ledger);

    let err = runner
        .run_stage(&Explode, &[t0], "Explode", StageOptions::strict())
        .unwrap_err();

    assert_eq!(
        err.violations,
        vec![Violation::TransformFailed {
            transform: "Explode".into(),
            message: "solver diverged".into(),
        }]
    );
    assert_eq!(runner.ledger().count_total(), 1);
    let record = &runner.stage_log()[0];
    assert_eq!(record.output_count, 0);
    assert!(!record.passed());
}

#[test]
fn phase_drop_allowed_only_when_stage_says_so() {
    let (ledger, t0) = seeded(fresh());
    let mut runner = StrictPipelineRunner::new(ledger);
    let relaxed = StageOptions {
        allow_phase_drop: true,
        ..StageOptions::strict()
    };

    let out = runner
        .run_stage(&DropPhases, &[t0], "Simplify", relaxed)
        .unwrap();

    assert!(out[0].phases().is_empty());
    assert_eq!(runner.ledger().count_total(), 2);
}

#[test]
fn multi_stage_chain_accumulates_log_and_survives_a_failure() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);

    let collapsed = runner
        .run_stage(&Collapse { fan_out: 2 }, &[t0], "Collapse", StageOptions::strict())
        .unwrap();
    runner
        .run_stage(&DropPhases, &collapsed, "Drop", StageOptions::strict())
        .unwrap_err();
    let formed = runner
        .run_stage(
            &JumpTo(KernelState::Kloostermanized),
            &collapsed,
            "Kloosterman",
            StageOptions::strict(),
        )
        .unwrap();

    assert_eq!(formed.len(), 2);
    let log: Vec<(&str, bool)> = runner
        .stage_log()
        .iter()
        .map(|r| (r.stage.as_str(), r.passed()))
        .collect();
    assert_eq!(
        log,
        vec![("Collapse", true), ("Drop", false), ("Kloosterman", true)]
    );
    assert_eq!(runner.ledger().count_total(), 5);
}

#[test]
fn custom_term_rule_runs_on_outputs() {
    let (ledger, t0) = seeded(fresh());
    let invariants = InvariantSet::structural().with(TermRule::new("no_integrals", |t: &Term| {
        if t.kind() == TermKind::Integral {
            vec![Violation::Rule {
                rule: "no_integrals".into(),
                term: t.id().clone(),
                detail: "integrals must be evaluated".into(),
            }]
        } else {
            Vec::new()
        }
    }));
    let mut runner = StrictPipelineRunner::with_invariants(ledger, invariants);

    let err = runner
        .run_stage(&JumpTo(KernelState::UncollapsedDelta), &[t0], "Step", StageOptions::strict())
        .unwrap_err();

    assert!(err.to_string().contains("integrals must be evaluated"));
}

#[test]
fn domain_rules_follow_config() {
    // UncollapsedDelta without delta metadata breaks kernel state consistency.
    let term = || {
        Term::builder(TermKind::OffDiagonal)
            .kernel(Kernel::new("W"))
            .build()
            .unwrap()
    };
    let strict = ProofbookConfig::parse("").unwrap();
    let lenient = ProofbookConfig::parse("[runner]\ndomain_rules = false\n").unwrap();

    let (ledger, t0) = seeded(term());
    let mut runner = StrictPipelineRunner::from_config(ledger, &strict.runner);
    assert!(
        runner
            .run_stage(&JumpTo(KernelState::UncollapsedDelta), &[t0], "Delta", StageOptions::strict())
            .is_err()
    );

    let (ledger, t0) = seeded(term());
    let mut runner = StrictPipelineRunner::from_config(ledger, &lenient.runner);
    assert!(
        runner
            .run_stage(&JumpTo(KernelState::UncollapsedDelta), &[t0], "Delta", StageOptions::strict())
            .is_ok()
    );
}

#[test]
fn legacy_accounting_infers_fourier_consumption() {
    let term = Term::builder(TermKind::Integral)
        .variables(["t"])
        .kernel(Kernel::new("FourierKernel"))
        .phase(Phase::new("e(t)").with_depends_on(["t"]))
        .build()
        .unwrap();
    let config = RunnerConfig {
        phase_accounting: PhaseAccounting::Legacy,
        ..RunnerConfig::default()
    };

    let (ledger, t0) = seeded(term.clone());
    let mut legacy = StrictPipelineRunner::from_config(ledger, &config);
    assert!(
        legacy
            .run_stage(&DropPhases, &[t0], "Fourier", StageOptions::strict())
            .is_ok()
    );

    let (ledger, t0) = seeded(term);
    let mut strict = StrictPipelineRunner::from_config(ledger, &RunnerConfig::default());
    assert!(
        strict
            .run_stage(&DropPhases, &[t0], "Fourier", StageOptions::strict())
            .is_err()
    );
}

#[test]
fn pruning_inside_a_stage_commits_with_the_stage() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);
    let prune_all = Prune {
        keep: Vec::new(),
        fail: false,
    };

    let out = runner
        .run_stage(&prune_all, &[Arc::clone(&t0)], "Prune", StageOptions::strict())
        .unwrap();

    assert!(Arc::ptr_eq(&out[0], &t0));
    assert_eq!(runner.ledger().count(), 0);
    assert_eq!(runner.ledger().count_total(), 1);
    assert!(runner.ledger().is_pruned(t0.id()));

    let children = runner
        .run_stage(&Collapse { fan_out: 2 }, &out, "Collapse", StageOptions::strict())
        .unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(runner.ledger().count(), 2);

    // A pruned term outside the inputs still counts as a known parent.
    let adopted = runner
        .run_stage(&AdoptFrom(t0.id().clone()), &children, "Adopt", StageOptions::strict())
        .unwrap();
    assert_eq!(adopted[0].parents().as_slice()[1], *t0.id());
    assert_eq!(runner.ledger().count(), 4);
    assert_eq!(runner.ledger().count_total(), 5);
}

#[test]
fn failed_stage_discards_its_pruning() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);

    runner
        .run_stage(
            &Prune {
                keep: Vec::new(),
                fail: true,
            },
            &[Arc::clone(&t0)],
            "Prune",
            StageOptions::strict(),
        )
        .unwrap_err();
    assert_eq!(runner.ledger().count(), 1);
    assert!(!runner.ledger().is_pruned(t0.id()));
}

#[test]
fn pruning_is_undone_when_outputs_break_a_rule() {
    let (ledger, t0) = seeded(fresh());
    let invariants = InvariantSet::structural().with(TermRule::new("no_integrals", |t: &Term| {
        if t.kind() == TermKind::Integral {
            vec![Violation::Rule {
                rule: "no_integrals".into(),
                term: t.id().clone(),
                detail: "integrals must be evaluated".into(),
            }]
        } else {
            Vec::new()
        }
    }));
    let mut runner = StrictPipelineRunner::with_invariants(ledger, invariants);
    let keep_bounds = Prune {
        keep: vec![TermStatus::BoundOnly],
        fail: false,
    };

    runner
        .run_stage(&keep_bounds, &[Arc::clone(&t0)], "Prune", StageOptions::strict())
        .unwrap_err();

    assert_eq!(runner.ledger().count(), 1);
    assert!(!runner.ledger().is_pruned(t0.id()));
}

#[test]
fn generic_transform_logs_its_bare_name() {
    struct Short;

    let (ledger, t0) = seeded(fresh());
    let mut runner = StrictPipelineRunner::new(ledger);

    runner
        .run_stage(
            &Passthrough::<Short>(PhantomData),
            &[t0],
            "",
            StageOptions::strict(),
        )
        .unwrap();

    assert_eq!(runner.stage_log()[0].stage, "Passthrough");
}
