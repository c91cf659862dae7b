//! Reduction-like strategy descriptor
//!
//! Parameterizes the staged reduction: block distribution over the parallel
//! dimensions, a warp-shuffle reduction over the reduction dimension, and a
//! 1-D split distribution of the trailing elementwise. The warp count is
//! adjusted for the element bit width so narrow elements pack into 32-bit
//! shuffled words.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Result, SynthesisError};
use crate::ir::ElemType;
use crate::model::{adjust_num_warps_for_block_shuffle, GpuModel, WARP_SIZE};
use crate::strategy::gemm::{validate_thread_budget, validate_vector_width};

/// Problem shape of a matched reduction-like kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionProblem {
    /// Full operand shape, rank-ordered
    pub shape: Vec<i64>,
    /// Reduced dimensions
    pub reduction_dims: Vec<usize>,
    pub elem: ElemType,
}

impl ReductionProblem {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of the (single) reduction dimension.
    pub fn reduction_size(&self) -> i64 {
        self.reduction_dims
            .first()
            .map(|&d| self.shape[d])
            .unwrap_or(1)
    }
}

/// Tuning knobs supplied by the caller; not searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionTuning {
    pub vector_width: i64,
    pub num_warps: i64,
    /// Pad the reduction dimension up to a multiple of the warp tile
    pub pad: bool,
}

impl Default for ReductionTuning {
    fn default() -> Self {
        Self {
            vector_width: 4,
            num_warps: 4,
            pad: false,
        }
    }
}

/// Validated reduction-like strategy descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionStrategy {
    pub problem: ReductionProblem,
    pub vector_width: i64,
    /// Warp count after bit-width adjustment for the block shuffle
    pub num_warps: i64,
    pub pad: bool,
}

impl ReductionStrategy {
    pub fn new(
        model: &GpuModel,
        problem: ReductionProblem,
        tuning: ReductionTuning,
    ) -> Result<Self> {
        if !model.has_warp_shuffle {
            return Err(SynthesisError::WarpShuffleUnavailable {
                model: model.name.clone(),
            });
        }
        for (dim, &extent) in problem.shape.iter().enumerate() {
            if extent <= 0 {
                return Err(SynthesisError::EmptyDimension { dim, extent });
            }
        }
        if let Some(&d) = problem.reduction_dims.first() {
            if d >= problem.rank() {
                return Err(SynthesisError::RankMismatch {
                    expected: d + 1,
                    found: problem.rank(),
                });
            }
        }
        validate_vector_width(tuning.vector_width, problem.elem.bit_width())?;
        validate_thread_budget(tuning.num_warps)?;

        let num_warps =
            adjust_num_warps_for_block_shuffle(tuning.num_warps, problem.elem.bit_width());

        Ok(Self {
            problem,
            vector_width: tuning.vector_width,
            num_warps,
            pad: tuning.pad,
        })
    }

    pub fn total_threads(&self) -> i64 {
        self.num_warps * WARP_SIZE
    }

    /// Threads per block, reduction along x.
    pub fn block_size(&self) -> Vec<i64> {
        vec![self.total_threads(), 1, 1]
    }

    /// Elements each thread accumulates before the shuffle stage.
    pub fn elements_per_thread(&self) -> i64 {
        (self.problem.reduction_size() / self.total_threads()).max(1)
    }
}
