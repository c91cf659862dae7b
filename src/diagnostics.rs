//! Diagnostic reporting for strategy synthesis
//!
//! This module defines the two error kinds of the synthesizer using miette:
//! configuration errors (a descriptor's parameters violate an invariant) and
//! lowering preconditions (a builder step applied to a representation of the
//! wrong shape). Both are recoverable at the dispatcher, which falls back to
//! the default lowering path.

use miette::Diagnostic;
use thiserror::Error;

/// Synthesizer diagnostic
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    // === Configuration Errors ===
    #[error("tile size {tile} does not divide problem dimension {dim} of extent {extent}")]
    #[diagnostic(
        code(strategy::non_divisible_tile),
        help("enable padding on the descriptor to round the dimension up to the next tile multiple")
    )]
    NonDivisibleTile { dim: usize, extent: i64, tile: i64 },

    #[error("vector width {width} is not a positive power of two")]
    #[diagnostic(code(strategy::vector_width_not_pow2))]
    VectorWidthNotPow2 { width: i64 },

    #[error("vector width {width} x {bit_width}b elements exceeds the {max_bits}b vector load limit")]
    #[diagnostic(
        code(strategy::vector_width_exceeds_load),
        help("lower the vector width or use a narrower element type")
    )]
    VectorWidthExceedsLoad {
        width: i64,
        bit_width: i64,
        max_bits: i64,
    },

    #[error("{num_warps} warps x {warp_size} threads exceeds the {max_threads}-thread block budget")]
    #[diagnostic(code(strategy::thread_budget_exceeded))]
    ThreadBudgetExceeded {
        num_warps: i64,
        warp_size: i64,
        max_threads: i64,
    },

    #[error("strategy requests the matrix-multiply unit but target `{model}` has none")]
    #[diagnostic(code(strategy::mma_unavailable))]
    MmaUnitUnavailable { model: String },

    #[error("staged reduction requires warp shuffles, which target `{model}` lacks")]
    #[diagnostic(code(strategy::warp_shuffle_unavailable))]
    WarpShuffleUnavailable { model: String },

    #[error("descriptor expects rank {expected}, problem has rank {found}")]
    #[diagnostic(code(strategy::rank_mismatch))]
    RankMismatch { expected: usize, found: usize },

    #[error("problem dimension {dim} has non-positive extent {extent}")]
    #[diagnostic(code(strategy::empty_dimension))]
    EmptyDimension { dim: usize, extent: i64 },

    // === Lowering Preconditions ===
    #[error("stale handle: slot {slot} was rewritten (held generation {held}, current {current})")]
    #[diagnostic(
        code(lowering::stale_handle),
        help("use the handle returned by the step that performed the rewrite")
    )]
    StaleHandle { slot: usize, held: u32, current: u32 },

    #[error("handle slot {slot} is unknown to this pipeline context")]
    #[diagnostic(
        code(lowering::foreign_handle),
        help("handles are only valid within the context that issued them")
    )]
    ForeignHandle { slot: usize },

    #[error("builder step `{step}` expected a {expected} handle, found {found}")]
    #[diagnostic(code(lowering::wrong_handle_target))]
    WrongHandleTarget {
        step: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("distribution over {num_threads} units requires a mapping attribute")]
    #[diagnostic(code(lowering::missing_mapping))]
    MissingMapping { num_threads: i64 },

    #[error("function `{func}` contains no distributable loop nest")]
    #[diagnostic(code(lowering::no_distributable_nest))]
    NoDistributableNest { func: String },

    #[error("function `{func}` is not bufferized; `{step}` runs post-bufferization")]
    #[diagnostic(code(lowering::not_bufferized))]
    NotBufferized { func: String, step: &'static str },

    #[error("copy had its bounds branch folded; it must be vectorized with masking")]
    #[diagnostic(
        code(lowering::unmasked_folded_branch),
        help("pass masked = true to matmul vectorization after folding an if branch")
    )]
    UnmaskedFoldedBranch,

    #[error("reduction body is not elementwise")]
    #[diagnostic(code(lowering::non_elementwise_reduction))]
    NonElementwiseReduction,

    // === Dispatcher Misuse ===
    #[error("entry point `{func}` already carries a transformation plan")]
    #[diagnostic(
        code(dispatch::already_matched),
        help("the dispatcher must be invoked at most once per entry point")
    )]
    AlreadyMatched { func: String },
}

/// Coarse classification of a diagnostic, mirroring the two recoverable
/// error kinds plus caller misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A descriptor's parameters violate an invariant.
    Configuration,
    /// A builder primitive's structural precondition is unmet.
    LoweringPrecondition,
    /// The dispatcher was driven incorrectly; never recovered from.
    CallerMisuse,
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        use SynthesisError::*;
        match self {
            NonDivisibleTile { .. }
            | VectorWidthNotPow2 { .. }
            | VectorWidthExceedsLoad { .. }
            | ThreadBudgetExceeded { .. }
            | MmaUnitUnavailable { .. }
            | WarpShuffleUnavailable { .. }
            | RankMismatch { .. }
            | EmptyDimension { .. } => ErrorKind::Configuration,
            StaleHandle { .. }
            | ForeignHandle { .. }
            | WrongHandleTarget { .. }
            | MissingMapping { .. }
            | NoDistributableNest { .. }
            | NotBufferized { .. }
            | UnmaskedFoldedBranch
            | NonElementwiseReduction => ErrorKind::LoweringPrecondition,
            AlreadyMatched { .. } => ErrorKind::CallerMisuse,
        }
    }

    /// Whether the dispatcher may absorb this error and report "unmatched".
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::CallerMisuse
    }
}

/// Result alias used throughout the synthesizer
pub type Result<T> = std::result::Result<T, SynthesisError>;
