//! Typed per-stage metadata.
//!
//! Each pipeline concern owns one record under a reserved namespace of
//! [`StageMeta`]. Records are independently optional, reject unknown fields,
//! and are read back through typed accessors on [`Term`](crate::Term).

use serde::{Deserialize, Serialize};

use crate::FrozenList;

/// Delta method bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeltaMethodMeta {
    pub applied: bool,
    pub collapsed: bool,
    pub stage: String,
    pub modulus_variable: String,
}

impl Default for DeltaMethodMeta {
    fn default() -> Self {
        Self {
            applied: false,
            collapsed: false,
            stage: String::new(),
            modulus_variable: "c".to_string(),
        }
    }
}

impl DeltaMethodMeta {
    /// Delta method applied, sum over the modulus still open.
    #[must_use]
    pub fn uncollapsed(stage: impl Into<String>) -> Self {
        Self {
            applied: true,
            stage: stage.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn collapsed(stage: impl Into<String>) -> Self {
        Self {
            applied: true,
            collapsed: true,
            stage: stage.into(),
            ..Self::default()
        }
    }
}

/// Whether a Voronoi step produced an explicit dual sum or only recorded structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoronoiKind {
    Formula,
    #[default]
    StructuralOnly,
}

impl VoronoiKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Formula => "formula",
            Self::StructuralOnly => "structural_only",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoronoiMeta {
    pub applied: bool,
    pub target_variable: String,
    pub dual_variable: String,
    pub dual_length: String,
    pub kind: VoronoiKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KloostermanMeta {
    pub formed: bool,
    pub variables: FrozenList<String>,
    /// Phase expressions folded into the Kloosterman sum.
    pub consumed_phases: FrozenList<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KuznetsovMeta {
    pub applied: bool,
    pub sign_case: String,
    pub bessel_transform: String,
    pub spectral_window_scale: String,
    pub spectral_components: FrozenList<String>,
    pub level: String,
    /// Phase expressions absorbed by the trace formula.
    pub consumed_phases: FrozenList<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoundMeta {
    pub strategy: String,
    pub error_exponent: String,
    pub citation: String,
    pub bound_family: String,
    pub case_id: String,
}

/// All typed metadata namespaces carried by a term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaMethodMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voronoi: Option<VoronoiMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kloosterman: Option<KloostermanMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kuznetsov: Option<KuznetsovMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound: Option<BoundMeta>,
}

impl StageMeta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delta.is_none()
            && self.voronoi.is_none()
            && self.kloosterman.is_none()
            && self.kuznetsov.is_none()
            && self.bound.is_none()
    }

    /// Every authoritatively consumed phase expression, across namespaces.
    pub fn consumed_phases(&self) -> impl Iterator<Item = &str> {
        let kloosterman = self
            .kloosterman
            .iter()
            .flat_map(|meta| meta.consumed_phases.iter());
        let kuznetsov = self
            .kuznetsov
            .iter()
            .flat_map(|meta| meta.consumed_phases.iter());
        kloosterman.chain(kuznetsov).map(String::as_str)
    }
}
