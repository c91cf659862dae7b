//! Strategos - GPU lowering-strategy synthesizer
//!
//! Given an abstract tensor computation and a model of the target GPU,
//! strategos deterministically builds an ordered pipeline of structural
//! transformations that lowers the kernel onto the block/warp/thread
//! hierarchy: tile sizes, memory-movement distribution, vectorization, and
//! the specialized matrix-multiply path where the hardware has one.
//!
//! # Architecture
//!
//! ```text
//! GpuModel + Strategy Descriptor -> Builder Primitives -> TransformPlan
//!                  Dispatcher selects descriptor/pipeline
//! ```
//!
//! The synthesizer only emits a plan; executing it (and discovering entry
//! points, printing IR, driving the CLI) belongs to the surrounding pass
//! infrastructure.
//!
//! # Example
//!
//! ```
//! use strategos::{ir, synth, GpuModel};
//!
//! let mut func = ir::Func::new("gemm");
//! func.push_op("matmul", ir::OpKind::Matmul {
//!     m: 128, n: 64, k: 256, elem: ir::ElemType::F32,
//! });
//!
//! let model = GpuModel::new("sm_80", true, false);
//! let outcome = synth::match_and_set_strategy(&mut func, &model).unwrap();
//! assert_eq!(outcome, synth::MatchOutcome::Matched);
//! assert!(func.plan.is_some());
//! ```

pub mod diagnostics;
pub mod ir;
pub mod model;
pub mod pipeline;
pub mod strategy;
pub mod synth;

// Re-export diagnostics for convenience
pub use diagnostics::{ErrorKind, Result, SynthesisError};

// Re-exports for convenience
pub use model::GpuModel;
pub use pipeline::{Stage, StageKind, TransformPlan};
pub use strategy::Strategy;
pub use synth::{match_and_set_strategy, synthesize_module, MatchOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
