//! Derivation traces over a real run

use std::sync::Arc;

use proofbook_engine::{Bound, StageOptions, StrictPipelineRunner};
use proofbook_types::KernelState;

use crate::common::{Collapse, DropPhases, LargeSieve, seeded, uncollapsed};

#[test]
fn trace_follows_terms_through_committed_stages() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);

    let collapsed = runner
        .run_stage(&Collapse { fan_out: 2 }, &[Arc::clone(&t0)], "Collapse", StageOptions::strict())
        .unwrap();
    runner
        .run_stage(&DropPhases, &collapsed, "Drop", StageOptions::strict())
        .unwrap_err();
    let bounded = runner
        .run_bounding_stage(&Bound::multi(LargeSieve), &collapsed, "LargeSieve")
        .unwrap();

    let trace = runner.trace();
    assert_eq!(trace.traces.len(), 1 + 2 + bounded.len());
    assert_eq!(trace.bound_traces().count(), 4);
    assert_eq!(trace.case_summary()["LargeSieve:long"], 2);
    assert_eq!(trace.case_summary()["LargeSieve:short"], 2);

    let first_bound = trace.bound_traces().next().unwrap();
    let stages: Vec<&str> = first_bound.steps.iter().map(|s| s.stage_name.as_str()).collect();
    assert_eq!(stages, vec!["Collapse", "LargeSieve"]);
    assert_eq!(first_bound.kernel_state, KernelState::Collapsed);

    let summary = trace.format_summary();
    assert!(summary.contains("Collapse: 1\u{2192}2"));
    assert!(summary.contains("Drop: 2\u{2192}2 [VIOLATIONS]"));
    assert!(summary.contains("LargeSieve: 2\u{2192}4"));
    assert!(summary.contains("LargeSieve: 4 terms, cases=[long, short]"));
}

#[test]
fn trace_serializes_stage_log_with_string_violations() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);
    runner
        .run_stage(&DropPhases, &[t0], "Drop", StageOptions::strict())
        .unwrap_err();

    let value = serde_json::to_value(runner.trace()).unwrap();
    assert_eq!(value["stage_log"][0]["stage"], "Drop");
    assert_eq!(
        value["stage_log"][0]["violations"][0],
        "Phases lost in Drop: {e(m/c)}"
    );
    assert_eq!(value["traces"].as_array().map(Vec::len), Some(1));
}
