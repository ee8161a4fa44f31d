//! Derivation traces reconstructed from term history.
//!
//! A trace answers "how did this term come to be": which stages touched it,
//! which parents each step consumed, and which bound strategy (and case)
//! produced it when it is `BoundOnly`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use proofbook_types::{KernelState, Term, TermId, TermKind, TermStatus, VoronoiKind};

use crate::runner::StageRecord;

const UNKNOWN_FAMILY: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub stage_name: String,
    pub parent_ids: Vec<TermId>,
    pub description: String,
    pub kernel_state: KernelState,
    pub metadata_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermTrace {
    pub term_id: TermId,
    pub kind: TermKind,
    pub status: TermStatus,
    pub kernel_state: KernelState,
    pub steps: Vec<TraceStep>,
    pub bound_family: Option<String>,
    pub case_id: Option<String>,
    pub voronoi_kind: Option<VoronoiKind>,
    pub kuznetsov_applied: bool,
    pub lemma_citation: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl TermTrace {
    #[must_use]
    pub fn from_term(term: &Term) -> Self {
        let metadata_keys: Vec<String> = term.metadata().keys().cloned().collect();
        let steps = term
            .history()
            .iter()
            .map(|entry| TraceStep {
                stage_name: entry.transform.clone(),
                parent_ids: entry.parent_ids.to_vec(),
                description: entry.description.clone(),
                kernel_state: term.kernel_state(),
                metadata_keys: metadata_keys.clone(),
            })
            .collect();
        let bound = term.bound_meta();

        Self {
            term_id: term.id().clone(),
            kind: term.kind(),
            status: term.status(),
            kernel_state: term.kernel_state(),
            steps,
            bound_family: bound.and_then(|meta| non_empty(&meta.bound_family)),
            case_id: bound.and_then(|meta| non_empty(&meta.case_id)),
            voronoi_kind: term.voronoi_meta().map(|meta| meta.kind),
            kuznetsov_applied: term.kuznetsov_meta().is_some_and(|meta| meta.applied),
            lemma_citation: term.lemma_citation().map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.status == TermStatus::BoundOnly
    }

    /// Multi-line rendering, each detail line indented by `indent` spaces.
    #[must_use]
    pub fn format(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        let mut lines = vec![
            format!("Term {}:", self.term_id),
            format!("{pad}kind: {}", self.kind),
            format!("{pad}status: {}", self.status),
            format!("{pad}kernel_state: {}", self.kernel_state),
        ];
        if let Some(kind) = self.voronoi_kind {
            lines.push(format!("{pad}voronoi: {}", kind.as_str()));
        }
        if self.kuznetsov_applied {
            lines.push(format!("{pad}kuznetsov: applied"));
        }
        if let Some(family) = &self.bound_family {
            lines.push(format!("{pad}bound_family: {family}"));
        }
        if let Some(case_id) = &self.case_id {
            lines.push(format!("{pad}case_id: {case_id}"));
        }
        if let Some(citation) = &self.lemma_citation {
            lines.push(format!("{pad}citation: {citation}"));
        }
        lines.push(format!("{pad}derivation ({} steps):", self.steps.len()));
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!("{pad}  [{i}] {}", step.stage_name));
            if !step.description.is_empty() {
                lines.push(format!("{pad}      {}", step.description));
            }
            if !step.parent_ids.is_empty() {
                let parents: Vec<&str> = step.parent_ids.iter().map(TermId::as_str).collect();
                lines.push(format!("{pad}      parents: {}", parents.join(", ")));
            }
            lines.push(format!("{pad}      state: {}", step.kernel_state));
        }
        lines.join("\n")
    }

    fn family(&self) -> &str {
        self.bound_family.as_deref().unwrap_or(UNKNOWN_FAMILY)
    }
}

/// Traces for a set of terms together with the stage log that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivationTrace {
    pub traces: Vec<TermTrace>,
    pub stage_log: Vec<StageRecord>,
}

impl DerivationTrace {
    pub fn from_terms<I>(terms: I, stage_log: &[StageRecord]) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<Term>,
    {
        Self {
            traces: terms
                .into_iter()
                .map(|term| TermTrace::from_term(term.as_ref()))
                .collect(),
            stage_log: stage_log.to_vec(),
        }
    }

    pub fn bound_traces(&self) -> impl Iterator<Item = &TermTrace> {
        self.traces.iter().filter(|trace| trace.is_bound())
    }

    /// Bound traces grouped by bound family; terms without one land under `unknown`.
    #[must_use]
    pub fn families(&self) -> BTreeMap<&str, Vec<&TermTrace>> {
        let mut families: BTreeMap<&str, Vec<&TermTrace>> = BTreeMap::new();
        for trace in self.bound_traces() {
            families.entry(trace.family()).or_default().push(trace);
        }
        families
    }

    /// Bound term counts keyed by `family:case` (or `family` when no case id).
    #[must_use]
    pub fn case_summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for trace in self.bound_traces() {
            let key = match &trace.case_id {
                Some(case_id) => format!("{}:{case_id}", trace.family()),
                None => trace.family().to_string(),
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn format_summary(&self) -> String {
        let mut lines = vec![
            format!("DerivationTrace: {} terms traced", self.traces.len()),
            format!("  BoundOnly: {}", self.bound_traces().count()),
        ];
        if !self.stage_log.is_empty() {
            lines.push(format!("  Stages: {}", self.stage_log.len()));
            for record in &self.stage_log {
                let flag = if record.passed() { "" } else { " [VIOLATIONS]" };
                lines.push(format!(
                    "    {}: {}\u{2192}{}{flag}",
                    record.stage, record.input_count, record.output_count
                ));
            }
        }

        let families = self.families();
        if !families.is_empty() {
            lines.push("  Bound families:".to_string());
            for (family, traces) in &families {
                let cases: BTreeSet<&str> = traces
                    .iter()
                    .filter_map(|trace| trace.case_id.as_deref())
                    .collect();
                if cases.is_empty() {
                    lines.push(format!("    {family}: {} terms", traces.len()));
                } else {
                    let cases: Vec<&str> = cases.into_iter().collect();
                    lines.push(format!(
                        "    {family}: {} terms, cases=[{}]",
                        traces.len(),
                        cases.join(", ")
                    ));
                }
            }
        }
        lines.join("\n")
    }

    /// Summary followed by the full trace of every bound term.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut parts = vec![self.format_summary(), String::new()];
        for trace in self.bound_traces() {
            parts.push(trace.format(2));
            parts.push(String::new());
        }
        parts.join("\n")
    }
}
