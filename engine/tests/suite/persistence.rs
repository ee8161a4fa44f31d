//! Exporting a ledger after a run

use std::collections::HashSet;

use proofbook_core::{TermLedger, export_ledger, import_ledger};
use proofbook_engine::{Bound, StageOptions, StrictPipelineRunner};

use crate::common::{Collapse, LargeSieve, seeded, uncollapsed};

#[test]
fn ledger_survives_export_and_import_after_a_run() {
    let (ledger, t0) = seeded(uncollapsed());
    let mut runner = StrictPipelineRunner::new(ledger);
    let collapsed = runner
        .run_stage(&Collapse { fan_out: 2 }, &[t0], "Collapse", StageOptions::strict())
        .unwrap();
    runner
        .run_bounding_stage(&Bound::multi(LargeSieve), &collapsed, "LargeSieve")
        .unwrap();
    let ledger = runner.into_ledger();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs").join("ledger.json");
    export_ledger(&ledger, &path).unwrap();
    let restored = import_ledger(&path).unwrap();

    let triples = |l: &TermLedger| -> HashSet<(String, String, String)> {
        l.all_terms_including_pruned()
            .iter()
            .map(|t| {
                (
                    t.id().to_string(),
                    t.kind().to_string(),
                    t.status().to_string(),
                )
            })
            .collect()
    };
    assert_eq!(restored.count_total(), ledger.count_total());
    assert_eq!(triples(&restored), triples(&ledger));
    assert!(restored.validate_all().is_empty());
    for term in ledger.all_terms() {
        assert_eq!(**restored.get(term.id()).unwrap(), *term);
    }
}
