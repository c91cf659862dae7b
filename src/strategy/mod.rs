//! Strategy descriptors
//!
//! A descriptor is a validated, read-only plan parameterization for one
//! matched kernel: problem sizes, tile sizes, vector width, warp count and
//! the optional-stage flags. Two concrete kinds exist (matmul-like and
//! reduction-like) behind a closed sum type; the dispatcher matches on it
//! exhaustively, so a missing kind is a build-time error rather than a
//! runtime surprise.

pub mod gemm;
pub mod reduction;

pub use gemm::{GemmLikeStrategy, GemmTuning, MatmulProblem};
pub use reduction::{ReductionProblem, ReductionStrategy, ReductionTuning};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::WARP_SIZE;

/// Execution-hierarchy level a distributed loop or copy is assigned to
///
/// Required non-null whenever a distribution step targets more than one
/// unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingLevel {
    Block,
    Warp,
    Thread,
}

impl fmt::Display for MappingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingLevel::Block => write!(f, "block"),
            MappingLevel::Warp => write!(f, "warp"),
            MappingLevel::Thread => write!(f, "thread"),
        }
    }
}

/// Thread counts and mapping tags for distributing one copy, per dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyMapping {
    pub num_threads: Vec<i64>,
    pub mapping: Vec<MappingLevel>,
}

/// A validated strategy descriptor for one matched kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    GemmLike(GemmLikeStrategy),
    Reduction(ReductionStrategy),
}

impl Strategy {
    pub fn vector_width(&self) -> i64 {
        match self {
            Strategy::GemmLike(s) => s.vector_width,
            Strategy::Reduction(s) => s.vector_width,
        }
    }

    pub fn num_warps(&self) -> i64 {
        match self {
            Strategy::GemmLike(s) => s.num_warps,
            Strategy::Reduction(s) => s.num_warps,
        }
    }

    /// Threads per block implied by the warp count.
    pub fn total_threads(&self) -> i64 {
        self.num_warps() * WARP_SIZE
    }

    /// Threads per block handed to the block/thread mapping step.
    pub fn block_size(&self) -> Vec<i64> {
        match self {
            Strategy::GemmLike(s) => s.block_size(),
            Strategy::Reduction(s) => s.block_size(),
        }
    }

    /// Warp counts along the leading dimensions.
    pub fn warp_dims(&self) -> Vec<i64> {
        match self {
            Strategy::GemmLike(s) => s.warp_dims(),
            Strategy::Reduction(s) => vec![s.num_warps, 1],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Strategy::GemmLike(_) => "gemm-like",
            Strategy::Reduction(_) => "reduction",
        }
    }
}

/// Whether `d` is the most-minor (contiguous) dimension of a rank-`rank`
/// tensor. All accesses are assumed contiguous along it.
pub fn is_most_minor_dim(rank: usize, d: usize) -> bool {
    rank > 0 && d == rank - 1
}
