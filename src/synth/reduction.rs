//! Reduction-like pipeline assembly
//!
//! Distributes the parallel dimensions across blocks, stages the reduction
//! itself through per-thread accumulation and warp shuffles, splits the
//! trailing elementwise over threads, then runs the common trailing
//! sequence.

use crate::diagnostics::{Result, SynthesisError};
use crate::pipeline::{primitives, Handle, PipelineContext, Stage, Target};
use crate::strategy::{MappingLevel, ReductionStrategy, Strategy};

/// Run the full reduction-like pipeline.
///
/// `reduce_h` must refer to an unsplit reduction with an elementwise
/// combiner. Returns the updated unit and function handles.
pub fn build_reduction_strategy(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
    reduce_h: Handle,
    strategy: &ReductionStrategy,
) -> Result<(Handle, Handle)> {
    let target = ctx.resolve(reduce_h)?.clone();
    let Target::Reduce {
        problem,
        split: false,
    } = target
    else {
        return Err(SynthesisError::WrongHandleTarget {
            step: "build_reduction_strategy",
            expected: "an unsplit reduction",
            found: target.describe(),
        });
    };

    // One block per slice of the parallel dimensions.
    let parallel_blocks: Vec<i64> = problem
        .shape
        .iter()
        .enumerate()
        .filter(|(d, _)| !problem.reduction_dims.contains(d))
        .map(|(_, &extent)| extent)
        .collect();
    if !parallel_blocks.is_empty() {
        ctx.push_stage(Stage::TileToForall {
            num_threads: parallel_blocks.clone(),
            mapping: vec![MappingLevel::Block; parallel_blocks.len()],
        });
    }

    // Per-thread accumulation followed by warp shuffles.
    ctx.push_stage(Stage::SplitReduction {
        num_warps: strategy.num_warps,
        elements_per_thread: strategy.elements_per_thread(),
    });
    ctx.rewrite(
        reduce_h,
        Target::Reduce {
            problem: problem.clone(),
            split: true,
        },
    )?;

    // The trailing elementwise (result write-back) is distributed with the
    // 1-D split rule over the block's threads.
    if let Some(&last_parallel) = parallel_blocks.last() {
        let trailing_h = ctx.track(Target::PadOrCopy {
            is_pad: false,
            shape: parallel_blocks.clone(),
            distributed: false,
            folded_branch: false,
            vectorized: false,
        });
        let rank = parallel_blocks.len();
        primitives::split_1d_with_thread_mapping(
            ctx,
            trailing_h,
            rank,
            rank - 1,
            &parallel_blocks,
            strategy.total_threads().min(last_parallel),
            Some(MappingLevel::Thread),
            strategy.vector_width,
        )?;
    }

    let wrapped = Strategy::Reduction(strategy.clone());
    primitives::common_trailing(ctx, unit_h, func_h, &wrapped)
}
