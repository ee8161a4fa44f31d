//! Ledger and invariant library for Proofbook.
//!
//! - **`ledger`**: insertion-ordered term store with non-destructive pruning
//! - **`invariants`**: pure bookkeeping predicates and the invariant registry
//! - **`persist`**: canonical JSON export/import through atomic writes

pub mod invariants;
pub mod ledger;
pub mod persist;

pub use invariants::{
    Invariant, InvariantSet, PhaseAccounting, StageView, TermRule, Violation,
    check_absorbed_phase_isometry, check_citation, check_kernel_conservation,
    check_kernel_state_consistency, check_kernel_transition, check_phase_conservation,
    check_phase_dependencies, check_spectral_bound_voronoi, check_spectralized_has_kuznetsov,
    validate_all, validate_term,
};
pub use ledger::{LedgerError, TermFilter, TermLedger};
pub use persist::{PersistError, export_ledger, import_ledger};
