//! Shared fixtures and test transforms.

#![allow(dead_code)]

use std::marker::PhantomData;
use std::sync::Arc;

use proofbook_core::TermLedger;
use proofbook_engine::{MultiBoundStrategy, Transform, TransformError};
use proofbook_types::{
    BoundMeta, DeltaMethodMeta, Kernel, KernelState, Phase, Term, TermId, TermKind, TermStatus,
    VoronoiKind, VoronoiMeta,
};

pub const ROOT_PHASE: &str = "e(m/c)";

/// Off-diagonal term after the delta method opened, one phase and one kernel.
pub fn uncollapsed() -> Term {
    Term::builder(TermKind::OffDiagonal)
        .expression("sum_{m,n,c} W(m) e(m/c)")
        .variables(["m", "n", "c"])
        .kernel(Kernel::new("W"))
        .phase(Phase::new(ROOT_PHASE).with_depends_on(["m", "c"]))
        .kernel_state(KernelState::UncollapsedDelta)
        .delta_meta(DeltaMethodMeta::uncollapsed("DeltaMethod"))
        .build()
        .unwrap()
}

/// Plain integral in the initial kernel state.
pub fn fresh() -> Term {
    Term::builder(TermKind::Integral)
        .variables(["t"])
        .kernel(Kernel::new("W"))
        .phase(Phase::new("e(t)").with_depends_on(["t"]))
        .build()
        .unwrap()
}

pub fn seeded(term: Term) -> (TermLedger, Arc<Term>) {
    let mut ledger = TermLedger::new();
    let term = ledger.add(term).unwrap();
    (ledger, term)
}

pub fn ids(terms: &[Arc<Term>]) -> Vec<TermId> {
    terms.iter().map(|t| t.id().clone()).collect()
}

/// Rewrites each input into `fan_out` collapsed children.
pub struct Collapse {
    pub fan_out: usize,
}

impl Transform for Collapse {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        let mut children = Vec::new();
        for term in terms {
            for i in 0..self.fan_out {
                children.push(
                    term.derive("Collapse", &format!("residue class {i}"))
                        .kernel_state(KernelState::Collapsed)
                        .delta_meta(DeltaMethodMeta::collapsed("Collapse"))
                        .build()?,
                );
            }
        }
        Ok(ledger.add_many(children)?)
    }
}

/// Derives each input with every phase removed and nothing recording why.
pub struct DropPhases;

impl Transform for DropPhases {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        let children = terms
            .iter()
            .map(|t| t.derive("DropPhases", "").phases(Vec::new()).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ledger.add_many(children)?)
    }
}

/// Derives each input straight into the given kernel state.
pub struct JumpTo(pub KernelState);

impl Transform for JumpTo {
    fn name(&self) -> &str {
        "JumpTo"
    }

    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        let children = terms
            .iter()
            .map(|t| t.derive("JumpTo", "").kernel_state(self.0).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ledger.add_many(children)?)
    }
}

/// Registers a half-built term before failing.
pub struct Explode;

impl Transform for Explode {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        for term in terms {
            ledger.add(term.derive("Explode", "partial").build()?)?;
        }
        Err(TransformError::failed("solver diverged"))
    }
}

/// Emits a copy of each input whose parent is an id nobody knows.
pub struct Orphan;

impl Transform for Orphan {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        let ghost = TermId::new("ghost").unwrap();
        let children = terms
            .iter()
            .map(|t| t.derive("Orphan", "").parents([ghost.clone()]).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ledger.add_many(children)?)
    }
}

/// Re-parents each input's child onto a term that is in the ledger but not
/// among the stage inputs.
pub struct AdoptFrom(pub TermId);

impl Transform for AdoptFrom {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        let children = terms
            .iter()
            .map(|t| {
                t.derive("AdoptFrom", "")
                    .parents([t.id().clone(), self.0.clone()])
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ledger.add_many(children)?)
    }
}

/// Hides every ledger term whose status is not in `keep`, then passes the
/// inputs through. Fails afterwards when `fail` is set.
pub struct Prune {
    pub keep: Vec<TermStatus>,
    pub fail: bool,
}

impl Transform for Prune {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        ledger.prune(&self.keep);
        if self.fail {
            return Err(TransformError::failed("pruned then gave up"));
        }
        Ok(terms.to_vec())
    }
}

/// Pass-through transform generic over a marker type.
pub struct Passthrough<T>(pub PhantomData<T>);

impl<T> Transform for Passthrough<T> {
    fn apply(
        &self,
        terms: &[Arc<Term>],
        _ledger: &mut TermLedger,
    ) -> Result<Vec<Arc<Term>>, TransformError> {
        Ok(terms.to_vec())
    }
}

/// Two-case large sieve bound that drops every phase and kernel.
pub struct LargeSieve;

impl MultiBoundStrategy for LargeSieve {
    fn name(&self) -> &str {
        "LargeSieve"
    }

    fn citation(&self) -> &str {
        "Iwaniec-Kowalski Thm 7.7"
    }

    fn applies(&self, term: &Term) -> bool {
        term.kind() == TermKind::OffDiagonal
    }

    fn bound_multi(&self, term: &Term) -> Result<Vec<Term>, TransformError> {
        ["short", "long"]
            .into_iter()
            .map(|case| -> Result<Term, TransformError> {
                Ok(term
                    .derive("LargeSieve", &format!("{case} modulus range"))
                    .phases(Vec::new())
                    .kernels(Vec::new())
                    .bound_only(self.citation())
                    .bound_meta(BoundMeta {
                        strategy: "LargeSieve".into(),
                        error_exponent: "theta - 1/2".into(),
                        citation: self.citation().into(),
                        bound_family: "LargeSieve".into(),
                        case_id: case.into(),
                    })
                    .build()?)
            })
            .collect()
    }
}

/// Spectral large sieve bound, optionally carrying Voronoi metadata.
pub struct SpectralSieve {
    pub voronoi: Option<VoronoiKind>,
}

impl MultiBoundStrategy for SpectralSieve {
    fn name(&self) -> &str {
        "SpectralLargeSieve"
    }

    fn citation(&self) -> &str {
        "Deshouillers-Iwaniec"
    }

    fn applies(&self, _term: &Term) -> bool {
        true
    }

    fn bound_multi(&self, term: &Term) -> Result<Vec<Term>, TransformError> {
        let mut builder = term
            .derive("SpectralLargeSieve", "")
            .bound_only(self.citation())
            .bound_meta(BoundMeta {
                strategy: "SpectralLargeSieve".into(),
                bound_family: "SpectralLargeSieve".into(),
                ..BoundMeta::default()
            });
        if let Some(kind) = self.voronoi {
            builder = builder.voronoi_meta(VoronoiMeta {
                applied: true,
                kind,
                ..VoronoiMeta::default()
            });
        }
        Ok(vec![builder.build()?])
    }
}
