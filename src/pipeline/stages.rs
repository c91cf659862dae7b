//! Transformation plan and stage records
//!
//! A plan is the ordered record of builder-step outputs for one entry
//! point. Each stage carries the parameters the step was applied with, so
//! the pass infrastructure that later executes the plan needs no access to
//! the descriptor that produced it.

use serde::{Deserialize, Serialize};

use crate::strategy::MappingLevel;

/// One applied builder step, with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    /// Pad matmul operands to statically-known tile-aligned shapes
    PadMatmul { padded_sizes: [i64; 3] },

    /// Hoist the output-operand padding out of `num_loops` loop levels
    HoistOutputPadding { num_loops: i64, fused_into_fill: bool },

    /// Split a most-minor dimension into a maximally regular region and a
    /// remainder; the remainder is never vectorized at the regular width
    Split1D {
        dim: usize,
        regular: i64,
        remainder: i64,
        regular_vector_width: i64,
    },

    /// Map an op to a distributed loop over the given unit counts
    TileToForall {
        num_threads: Vec<i64>,
        mapping: Vec<MappingLevel>,
    },

    /// Collapse a generated bounds conditional into an unconditional op
    FoldIfBranch,

    /// Masked vectorization of one distributed copy
    MaskedVectorize { vector_width: i64 },

    /// Vectorize the remaining body and clean up
    Vectorize,

    /// Finalize tensors into explicit buffers
    Bufferize,

    /// Rewrite the top-level loop nest across blocks and threads
    MapToBlocks {
        block_size: Vec<i64>,
        warp_dims: Vec<i64>,
    },

    /// Distribute vector ops at thread granularity with rank reduction
    DistributeVectors { warp_size: i64 },

    /// Fold memory-alias views; must precede the mma conversion
    FoldMemrefAliases,

    /// Hoist redundant vector transfers out of loops
    HoistRedundantTransfers,

    /// Convert vectorized multiply-accumulate to the matrix-multiply unit
    ConvertToMma,

    /// Replicate shared-memory buffers across pipeline stages
    MultiBuffer { factor: i64 },

    /// Convert ordinary copies into non-blocking hardware copies
    AsyncCopies,

    /// Software-pipeline the loop body to overlap copies with compute
    PipelineCopies { depth: i64 },

    /// Staged block reduction: per-thread accumulation then warp shuffles
    SplitReduction {
        num_warps: i64,
        elements_per_thread: i64,
    },
}

/// Flat discriminant of a stage, for order assertions and callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    PadMatmul,
    HoistOutputPadding,
    Split1D,
    TileToForall,
    FoldIfBranch,
    MaskedVectorize,
    Vectorize,
    Bufferize,
    MapToBlocks,
    DistributeVectors,
    FoldMemrefAliases,
    HoistRedundantTransfers,
    ConvertToMma,
    MultiBuffer,
    AsyncCopies,
    PipelineCopies,
    SplitReduction,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::PadMatmul { .. } => StageKind::PadMatmul,
            Stage::HoistOutputPadding { .. } => StageKind::HoistOutputPadding,
            Stage::Split1D { .. } => StageKind::Split1D,
            Stage::TileToForall { .. } => StageKind::TileToForall,
            Stage::FoldIfBranch => StageKind::FoldIfBranch,
            Stage::MaskedVectorize { .. } => StageKind::MaskedVectorize,
            Stage::Vectorize => StageKind::Vectorize,
            Stage::Bufferize => StageKind::Bufferize,
            Stage::MapToBlocks { .. } => StageKind::MapToBlocks,
            Stage::DistributeVectors { .. } => StageKind::DistributeVectors,
            Stage::FoldMemrefAliases => StageKind::FoldMemrefAliases,
            Stage::HoistRedundantTransfers => StageKind::HoistRedundantTransfers,
            Stage::ConvertToMma => StageKind::ConvertToMma,
            Stage::MultiBuffer { .. } => StageKind::MultiBuffer,
            Stage::AsyncCopies => StageKind::AsyncCopies,
            Stage::PipelineCopies { .. } => StageKind::PipelineCopies,
            Stage::SplitReduction { .. } => StageKind::SplitReduction,
        }
    }
}

/// Ordered transformation plan for one entry point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformPlan {
    stages: Vec<Stage>,
}

impl TransformPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage discriminants in application order.
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|s| s.kind() == kind)
    }

    /// Index of the first stage of the given kind.
    pub fn position(&self, kind: StageKind) -> Option<usize> {
        self.stages.iter().position(|s| s.kind() == kind)
    }

    /// Whether the given kinds appear in order (not necessarily adjacent).
    pub fn contains_in_order(&self, kinds: &[StageKind]) -> bool {
        let mut it = self.stages.iter();
        kinds
            .iter()
            .all(|&k| it.by_ref().any(|s| s.kind() == k))
    }

    /// Serialize the plan for persistence or inspection.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_order_queries() {
        let mut plan = TransformPlan::new();
        plan.push(Stage::Vectorize);
        plan.push(Stage::Bufferize);
        plan.push(Stage::MapToBlocks {
            block_size: vec![128, 1, 1],
            warp_dims: vec![4, 1],
        });

        assert!(plan.contains_in_order(&[
            StageKind::Vectorize,
            StageKind::Bufferize,
            StageKind::MapToBlocks
        ]));
        assert!(!plan.contains_in_order(&[StageKind::Bufferize, StageKind::Vectorize]));
        assert_eq!(plan.position(StageKind::Bufferize), Some(1));
        assert!(!plan.contains(StageKind::ConvertToMma));
    }

    #[test]
    fn test_plan_round_trips_json() {
        let mut plan = TransformPlan::new();
        plan.push(Stage::PadMatmul {
            padded_sizes: [128, 64, 256],
        });
        let json = plan.to_json().unwrap();
        let back: TransformPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
