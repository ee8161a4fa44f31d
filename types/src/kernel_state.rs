use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a term's kernel.
///
/// Progression is one-directional and governed by [`KernelState::successors`]:
///
/// ```text
/// None -> UncollapsedDelta -> VoronoiApplied -> Collapsed -> Kloostermanized -> Spectralized
///                          \------------------> Collapsed
/// ```
///
/// There are no self-loops; `Spectralized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KernelState {
    #[default]
    None,
    UncollapsedDelta,
    VoronoiApplied,
    Collapsed,
    Kloostermanized,
    Spectralized,
}

impl KernelState {
    pub const ALL: [KernelState; 6] = [
        KernelState::None,
        KernelState::UncollapsedDelta,
        KernelState::VoronoiApplied,
        KernelState::Collapsed,
        KernelState::Kloostermanized,
        KernelState::Spectralized,
    ];

    /// States reachable from `self` in a single step.
    #[must_use]
    pub const fn successors(self) -> &'static [KernelState] {
        match self {
            KernelState::None => &[KernelState::UncollapsedDelta],
            KernelState::UncollapsedDelta => {
                &[KernelState::VoronoiApplied, KernelState::Collapsed]
            }
            KernelState::VoronoiApplied => &[KernelState::Collapsed],
            KernelState::Collapsed => &[KernelState::Kloostermanized],
            KernelState::Kloostermanized => &[KernelState::Spectralized],
            KernelState::Spectralized => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: KernelState) -> bool {
        self.successors().contains(&next)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, KernelState::Spectralized)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            KernelState::None => "None",
            KernelState::UncollapsedDelta => "UncollapsedDelta",
            KernelState::VoronoiApplied => "VoronoiApplied",
            KernelState::Collapsed => "Collapsed",
            KernelState::Kloostermanized => "Kloostermanized",
            KernelState::Spectralized => "Spectralized",
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
