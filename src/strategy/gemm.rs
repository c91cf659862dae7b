//! Matmul-like strategy descriptor
//!
//! Carries the block tiles, vector width, warp count and optional-stage
//! flags for one matmul-like kernel, and derives the per-operand copy
//! mappings the distribution primitives consume. Construction validates
//! every invariant; a descriptor that exists is safe to drive the pipeline.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Result, SynthesisError};
use crate::ir::ElemType;
use crate::model::{GpuModel, MAX_THREADS_PER_BLOCK, MAX_VECTOR_LOAD_BITS, WARP_SIZE};
use crate::strategy::{CopyMapping, MappingLevel};

/// Problem sizes of a matched matmul-like kernel: `[m, k] x [k, n] -> [m, n]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatmulProblem {
    pub m: i64,
    pub n: i64,
    pub k: i64,
    pub elem: ElemType,
}

impl MatmulProblem {
    pub fn sizes(&self) -> [i64; 3] {
        [self.m, self.n, self.k]
    }
}

/// Tuning knobs supplied by the caller; not searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmTuning {
    /// Block tiles for `[m, n, k]`
    pub tile: [i64; 3],
    /// Vector width in elements
    pub vector_width: i64,
    /// Warps per block
    pub num_warps: i64,
    /// Pad operands up to the next tile multiple
    pub pad: bool,
    /// Convert the vectorized contraction to the matrix-multiply unit
    pub use_mma: bool,
    /// Replicate shared-memory buffers across pipeline stages
    pub multi_buffer: bool,
    /// Convert shared-memory copies to non-blocking hardware copies
    pub async_copies: bool,
    /// Software-pipelining depth; 0 disables pipelining
    pub pipeline_depth: i64,
}

impl Default for GemmTuning {
    fn default() -> Self {
        Self {
            tile: [64, 64, 32],
            vector_width: 4,
            num_warps: 4,
            pad: false,
            use_mma: false,
            multi_buffer: false,
            async_copies: false,
            pipeline_depth: 0,
        }
    }
}

/// Validated matmul-like strategy descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmLikeStrategy {
    pub problem: MatmulProblem,
    pub tile: [i64; 3],
    pub vector_width: i64,
    pub num_warps: i64,
    pub pad: bool,
    pub use_mma: bool,
    pub multi_buffer: bool,
    pub async_copies: bool,
    pub pipeline_depth: i64,
}

impl GemmLikeStrategy {
    pub fn new(model: &GpuModel, problem: MatmulProblem, tuning: GemmTuning) -> Result<Self> {
        for (dim, &extent) in problem.sizes().iter().enumerate() {
            if extent <= 0 {
                return Err(SynthesisError::EmptyDimension { dim, extent });
            }
        }
        for (dim, (&extent, &tile)) in problem.sizes().iter().zip(tuning.tile.iter()).enumerate() {
            if tile <= 0 {
                return Err(SynthesisError::EmptyDimension { dim, extent: tile });
            }
            if extent % tile != 0 && !tuning.pad {
                return Err(SynthesisError::NonDivisibleTile { dim, extent, tile });
            }
        }
        validate_vector_width(tuning.vector_width, problem.elem.bit_width())?;
        validate_thread_budget(tuning.num_warps)?;
        if tuning.use_mma && !model.has_mma_unit {
            return Err(SynthesisError::MmaUnitUnavailable {
                model: model.name.clone(),
            });
        }

        Ok(Self {
            problem,
            tile: tuning.tile,
            vector_width: tuning.vector_width,
            num_warps: tuning.num_warps,
            pad: tuning.pad,
            use_mma: tuning.use_mma,
            multi_buffer: tuning.multi_buffer,
            async_copies: tuning.async_copies,
            pipeline_depth: tuning.pipeline_depth,
        })
    }

    pub fn total_threads(&self) -> i64 {
        self.num_warps * WARP_SIZE
    }

    /// Threads per block, laid out with the warps along x.
    pub fn block_size(&self) -> Vec<i64> {
        vec![self.total_threads(), 1, 1]
    }

    /// Warp counts handed to the block/thread mapping step.
    pub fn warp_dims(&self) -> Vec<i64> {
        vec![self.num_warps, 1]
    }

    /// Extent of dimension `d` after optional padding: the extent itself
    /// when the tile divides it, the next tile multiple otherwise.
    pub fn padded_size(&self, d: usize) -> i64 {
        let extent = self.problem.sizes()[d];
        let tile = self.tile[d];
        (extent + tile - 1) / tile * tile
    }

    /// Tile count along dimension `d` (post-padding).
    pub fn num_tiles(&self, d: usize) -> i64 {
        self.padded_size(d) / self.tile[d]
    }

    /// Left operand tile `[tile_m, tile_k]`.
    pub fn lhs_tile(&self) -> [i64; 2] {
        [self.tile[0], self.tile[2]]
    }

    /// Right operand tile `[tile_k, tile_n]`.
    pub fn rhs_tile(&self) -> [i64; 2] {
        [self.tile[2], self.tile[1]]
    }

    /// Result tile `[tile_m, tile_n]`.
    pub fn res_tile(&self) -> [i64; 2] {
        [self.tile[0], self.tile[1]]
    }

    pub fn lhs_copy_mapping(&self) -> CopyMapping {
        self.copy_mapping(self.lhs_tile())
    }

    pub fn rhs_copy_mapping(&self) -> CopyMapping {
        self.copy_mapping(self.rhs_tile())
    }

    pub fn res_copy_mapping(&self) -> CopyMapping {
        self.copy_mapping(self.res_tile())
    }

    /// Distribute the block's threads over a 2-D copy tile: as many threads
    /// as vectorized loads along the contiguous dimension, the rest along
    /// the outer one.
    fn copy_mapping(&self, tile: [i64; 2]) -> CopyMapping {
        let minor_threads = (tile[1] / self.vector_width)
            .clamp(1, self.total_threads());
        let major_threads = (self.total_threads() / minor_threads).clamp(1, tile[0]);
        CopyMapping {
            num_threads: vec![major_threads, minor_threads],
            mapping: vec![MappingLevel::Thread, MappingLevel::Thread],
        }
    }
}

pub(crate) fn validate_vector_width(width: i64, bit_width: i64) -> Result<()> {
    if width <= 0 || width.count_ones() != 1 {
        return Err(SynthesisError::VectorWidthNotPow2 { width });
    }
    if width * bit_width > MAX_VECTOR_LOAD_BITS {
        return Err(SynthesisError::VectorWidthExceedsLoad {
            width,
            bit_width,
            max_bits: MAX_VECTOR_LOAD_BITS,
        });
    }
    Ok(())
}

pub(crate) fn validate_thread_budget(num_warps: i64) -> Result<()> {
    if num_warps <= 0 {
        return Err(SynthesisError::EmptyDimension {
            dim: 0,
            extent: num_warps,
        });
    }
    if num_warps * WARP_SIZE > MAX_THREADS_PER_BLOCK {
        return Err(SynthesisError::ThreadBudgetExceeded {
            num_warps,
            warp_size: WARP_SIZE,
            max_threads: MAX_THREADS_PER_BLOCK,
        });
    }
    Ok(())
}
