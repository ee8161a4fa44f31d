//! Stage orchestration for Proofbook.
//!
//! - **`transform`**: the contract every pipeline step implements
//! - **`bound`**: bound strategies, the bounding adapter and the strategy registry
//! - **`runner`**: the transactional [`StrictPipelineRunner`] and its stage log
//! - **`trace`**: derivation traces reconstructed from term history

pub mod bound;
pub mod runner;
pub mod trace;
pub mod transform;

pub use bound::{Bound, BoundStrategy, BoundStrategyRegistry, MultiBoundStrategy};
pub use runner::{PipelineViolation, StageOptions, StageRecord, StrictPipelineRunner};
pub use trace::{DerivationTrace, TermTrace, TraceStep};
pub use transform::{Transform, TransformError};
