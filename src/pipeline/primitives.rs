//! Low-level builder primitives
//!
//! Independent, composable transformation steps. Each primitive is a pure
//! function over the pipeline context: it checks its structural
//! precondition against the tracked representation, records the applied
//! stage with its parameters, and reissues handles for everything it
//! rewrote. A failed precondition returns an error before any handle is
//! touched.

use tracing::debug;

use crate::diagnostics::{Result, SynthesisError};
use crate::model::WARP_SIZE;
use crate::pipeline::{Handle, PipelineContext, Stage, Target};
use crate::strategy::{GemmLikeStrategy, MappingLevel, Strategy};

/// Split `size` at the largest multiple of `num_threads * max_vector_size`
/// that fits, returning `(regular, remainder)` extents.
///
/// This trades one irregular loop for a regular, vectorizable majority and
/// a small unvectorized remainder. The split point is not alignment-aware;
/// alignment is handled downstream by padding the backing allocation.
pub fn split_regular_region(size: i64, num_threads: i64, max_vector_size: i64) -> (i64, i64) {
    let unit = (num_threads * max_vector_size).max(1);
    let regular = (size / unit) * unit;
    (regular, size - regular)
}

/// Widest power-of-two vector width `<= max_vector_size` that divides the
/// per-thread extent of the regular region.
fn regular_vector_width(regular: i64, num_threads: i64, max_vector_size: i64) -> i64 {
    if regular == 0 {
        return 1;
    }
    let per_thread = regular / num_threads.max(1);
    let mut width = max_vector_size;
    while width > 1 && per_thread % width != 0 {
        width /= 2;
    }
    width.max(1)
}

fn wrong_target(step: &'static str, expected: &'static str, found: &Target) -> SynthesisError {
    SynthesisError::WrongHandleTarget {
        step,
        expected,
        found: found.describe(),
    }
}

/// Post-bufferization mapping of an entry function's top-level loop nest
/// across blocks and threads.
///
/// `warp_dims` optionally fixes the warp counts along the leading
/// dimensions so the mapping does not second-guess the warp layout.
pub fn map_to_block_and_threads(
    ctx: &mut PipelineContext,
    func_h: Handle,
    block_size: &[i64],
    warp_dims: &[i64],
) -> Result<Handle> {
    let target = ctx.resolve(func_h)?.clone();
    let Target::Func {
        name,
        bufferized,
        vectorizable_ops,
        vector_ops,
        has_loop_nest,
        ..
    } = target
    else {
        return Err(wrong_target("map_to_block_and_threads", "func", &target));
    };
    if !bufferized {
        return Err(SynthesisError::NotBufferized {
            func: name,
            step: "map_to_block_and_threads",
        });
    }
    if !has_loop_nest {
        return Err(SynthesisError::NoDistributableNest { func: name });
    }

    ctx.push_stage(Stage::MapToBlocks {
        block_size: block_size.to_vec(),
        warp_dims: warp_dims.to_vec(),
    });
    ctx.rewrite(
        func_h,
        Target::Func {
            name,
            bufferized,
            block_size: Some(block_size.to_vec()),
            vectorizable_ops,
            vector_ops,
            has_loop_nest: false,
        },
    )
}

/// Post-bufferization vector distribution at thread granularity, with
/// rank reduction where a dimension has extent one.
///
/// Pass-through when the function holds no vector ops: the handle and its
/// block/thread mapping are returned unchanged.
pub fn distribute_vectors(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
    warp_size: i64,
) -> Result<Handle> {
    let unit = ctx.resolve(unit_h)?.clone();
    if !matches!(unit, Target::Unit { .. }) {
        return Err(wrong_target("distribute_vectors", "unit", &unit));
    }
    let target = ctx.resolve(func_h)?.clone();
    let Target::Func {
        name,
        bufferized,
        block_size,
        vectorizable_ops,
        vector_ops,
        has_loop_nest,
    } = target
    else {
        return Err(wrong_target("distribute_vectors", "func", &target));
    };
    if !bufferized {
        return Err(SynthesisError::NotBufferized {
            func: name,
            step: "distribute_vectors",
        });
    }
    if vector_ops == 0 {
        return Ok(func_h);
    }

    ctx.push_stage(Stage::DistributeVectors { warp_size });
    ctx.rewrite(
        func_h,
        Target::Func {
            name,
            bufferized,
            block_size,
            vectorizable_ops,
            vector_ops: 0,
            has_loop_nest,
        },
    )
}

/// Vectorize the remaining tensor ops of a function and clean up.
pub fn vectorize(ctx: &mut PipelineContext, unit_h: Handle, func_h: Handle) -> Result<Handle> {
    let unit = ctx.resolve(unit_h)?.clone();
    match unit {
        Target::Unit { bufferized: false } => {}
        Target::Unit { bufferized: true } => {
            return Err(wrong_target("vectorize", "tensor-level unit", &unit));
        }
        other => return Err(wrong_target("vectorize", "unit", &other)),
    }
    let target = ctx.resolve(func_h)?.clone();
    let Target::Func {
        name,
        bufferized,
        block_size,
        vectorizable_ops,
        vector_ops,
        has_loop_nest,
    } = target
    else {
        return Err(wrong_target("vectorize", "func", &target));
    };

    ctx.push_stage(Stage::Vectorize);
    ctx.rewrite(
        func_h,
        Target::Func {
            name,
            bufferized,
            block_size,
            vectorizable_ops: 0,
            vector_ops: vector_ops + vectorizable_ops,
            has_loop_nest,
        },
    )
}

/// Finalize tensor ops into explicit buffers. Runs after vectorization and
/// before the block/thread mapping, which operates on buffers.
pub fn bufferize(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
) -> Result<(Handle, Handle)> {
    let unit = ctx.resolve(unit_h)?.clone();
    match unit {
        Target::Unit { bufferized: false } => {}
        Target::Unit { bufferized: true } => {
            return Err(wrong_target("bufferize", "tensor-level unit", &unit));
        }
        other => return Err(wrong_target("bufferize", "unit", &other)),
    }
    let target = ctx.resolve(func_h)?.clone();
    let Target::Func {
        name,
        block_size,
        vectorizable_ops,
        vector_ops,
        has_loop_nest,
        ..
    } = target
    else {
        return Err(wrong_target("bufferize", "func", &target));
    };

    ctx.push_stage(Stage::Bufferize);
    let unit_h = ctx.rewrite(unit_h, Target::Unit { bufferized: true })?;
    let func_h = ctx.rewrite(
        func_h,
        Target::Func {
            name,
            bufferized: true,
            block_size,
            vectorizable_ops,
            vector_ops,
            has_loop_nest,
        },
    )?;
    Ok((unit_h, func_h))
}

/// One-dimensional split with optional thread mapping.
///
/// Splits the most-minor dimension of a pad or copy at the largest multiple
/// of `num_threads * max_vector_size` that fits, then maps the regular
/// region over `num_threads` units tagged with `mapping`. The remainder
/// region is never vectorized at the regular width.
#[allow(clippy::too_many_arguments)]
pub fn split_1d_with_thread_mapping(
    ctx: &mut PipelineContext,
    op_h: Handle,
    rank: usize,
    most_minor_dim: usize,
    sizes: &[i64],
    num_threads: i64,
    mapping: Option<MappingLevel>,
    max_vector_size: i64,
) -> Result<Handle> {
    let target = ctx.resolve(op_h)?.clone();
    let Target::PadOrCopy {
        is_pad,
        shape,
        distributed: false,
        folded_branch,
        vectorized,
    } = target
    else {
        return Err(wrong_target(
            "split_1d_with_thread_mapping",
            "a single undistributed pad or copy",
            &target,
        ));
    };
    if sizes.len() != rank || most_minor_dim >= rank {
        return Err(SynthesisError::RankMismatch {
            expected: rank,
            found: sizes.len(),
        });
    }
    if num_threads > 1 && mapping.is_none() {
        return Err(SynthesisError::MissingMapping { num_threads });
    }

    let size = sizes[most_minor_dim];
    let (regular, remainder) = split_regular_region(size, num_threads, max_vector_size);
    ctx.push_stage(Stage::Split1D {
        dim: most_minor_dim,
        regular,
        remainder,
        regular_vector_width: regular_vector_width(regular, num_threads, max_vector_size),
    });
    if num_threads > 1 {
        ctx.push_stage(Stage::TileToForall {
            num_threads: vec![num_threads],
            mapping: vec![mapping.expect("checked above")],
        });
    }

    ctx.rewrite(
        op_h,
        Target::PadOrCopy {
            is_pad,
            shape,
            distributed: true,
            folded_branch,
            vectorized,
        },
    )
}

/// Pad a matmul's operands to statically-known, tile-aligned shapes.
pub fn pad_matmul(
    ctx: &mut PipelineContext,
    matmul_h: Handle,
    strategy: &GemmLikeStrategy,
) -> Result<Handle> {
    let target = ctx.resolve(matmul_h)?.clone();
    let Target::Matmul {
        problem,
        padded: false,
        vectorized,
    } = target
    else {
        return Err(wrong_target("pad_matmul", "an unpadded matmul", &target));
    };

    ctx.push_stage(Stage::PadMatmul {
        padded_sizes: [
            strategy.padded_size(0),
            strategy.padded_size(1),
            strategy.padded_size(2),
        ],
    });
    ctx.rewrite(
        matmul_h,
        Target::Matmul {
            problem,
            padded: true,
            vectorized,
        },
    )
}

/// Hoist the padding of the matmul's output operand out of `num_loops`
/// enclosing loop levels; when the output is produced by a fill, the
/// padding folds into it.
pub fn hoist_output_padding(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    padded_matmul_h: Handle,
    num_loops: i64,
    fuse_into_fill: bool,
) -> Result<Handle> {
    let unit = ctx.resolve(unit_h)?.clone();
    if !matches!(unit, Target::Unit { .. }) {
        return Err(wrong_target("hoist_output_padding", "unit", &unit));
    }
    let target = ctx.resolve(padded_matmul_h)?.clone();
    if !matches!(target, Target::Matmul { padded: true, .. }) {
        return Err(wrong_target(
            "hoist_output_padding",
            "padded matmul",
            &target,
        ));
    }

    ctx.push_stage(Stage::HoistOutputPadding {
        num_loops,
        fused_into_fill: fuse_into_fill,
    });
    ctx.rewrite(padded_matmul_h, target)
}

/// Distribute a single pad or copy over the given unit counts.
///
/// `fold_if_branch` collapses the bounds conditional generated for a
/// possibly-partial tile into an unconditional op; the caller is then
/// responsible for masked vectorization of the result.
pub fn distribute_one_pad_or_copy(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    op_h: Handle,
    num_threads: &[i64],
    mapping: &[MappingLevel],
    max_vector_size: i64,
    fold_if_branch: bool,
) -> Result<Handle> {
    let unit = ctx.resolve(unit_h)?.clone();
    if !matches!(unit, Target::Unit { .. }) {
        return Err(wrong_target("distribute_one_pad_or_copy", "unit", &unit));
    }
    let target = ctx.resolve(op_h)?.clone();
    let Target::PadOrCopy {
        is_pad,
        shape,
        distributed: false,
        vectorized,
        ..
    } = target
    else {
        return Err(wrong_target(
            "distribute_one_pad_or_copy",
            "a single undistributed pad or copy",
            &target,
        ));
    };
    let rank = shape.len();
    if rank == 0 || num_threads.len() != rank {
        return Err(SynthesisError::RankMismatch {
            expected: rank.max(1),
            found: num_threads.len(),
        });
    }
    if let Some(&nt) = num_threads.iter().find(|&&nt| nt > 1) {
        if mapping.len() != rank {
            return Err(SynthesisError::MissingMapping { num_threads: nt });
        }
    }

    // Split the contiguous dimension first so the distributed majority is
    // regular and vectorizable.
    let minor = rank - 1;
    let (regular, remainder) =
        split_regular_region(shape[minor], num_threads[minor], max_vector_size);
    ctx.push_stage(Stage::Split1D {
        dim: minor,
        regular,
        remainder,
        regular_vector_width: regular_vector_width(regular, num_threads[minor], max_vector_size),
    });
    ctx.push_stage(Stage::TileToForall {
        num_threads: num_threads.to_vec(),
        mapping: mapping.to_vec(),
    });
    if fold_if_branch {
        ctx.push_stage(Stage::FoldIfBranch);
    }

    ctx.rewrite(
        op_h,
        Target::PadOrCopy {
            is_pad,
            shape,
            distributed: true,
            folded_branch: fold_if_branch,
            vectorized,
        },
    )
}

/// Distribute the three operand copies of a padded matmul, driven by the
/// descriptor's per-operand thread counts and mapping attributes. Returns
/// handles to the lhs, rhs and result copies.
pub fn distribute_copies(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    padded_matmul_h: Handle,
    strategy: &GemmLikeStrategy,
) -> Result<(Handle, Handle, Handle)> {
    let target = ctx.resolve(padded_matmul_h)?.clone();
    if !matches!(target, Target::Matmul { padded: true, .. }) {
        return Err(wrong_target("distribute_copies", "padded matmul", &target));
    }

    let operands = [
        (strategy.lhs_tile(), strategy.lhs_copy_mapping(), false),
        (strategy.rhs_tile(), strategy.rhs_copy_mapping(), false),
        // A padded output tile may be partially out of bounds; fold the
        // branch and mask during vectorization.
        (strategy.res_tile(), strategy.res_copy_mapping(), strategy.pad),
    ];

    let mut handles = Vec::with_capacity(3);
    for (tile, copy_mapping, fold) in operands {
        let copy_h = ctx.track(Target::PadOrCopy {
            is_pad: false,
            shape: tile.to_vec(),
            distributed: false,
            folded_branch: false,
            vectorized: false,
        });
        let copy_h = distribute_one_pad_or_copy(
            ctx,
            unit_h,
            copy_h,
            &copy_mapping.num_threads,
            &copy_mapping.mapping,
            strategy.vector_width,
            fold,
        )?;
        handles.push(copy_h);
    }
    Ok((handles[0], handles[1], handles[2]))
}

/// Vectorize exactly the three distributed operand copies (masked when
/// requested), then vectorize and clean up the remaining body.
///
/// Rejects unmasked vectorization of a copy whose bounds branch was
/// folded.
#[allow(clippy::too_many_arguments)]
pub fn matmul_vectorization(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
    copy_handles: [Handle; 3],
    strategy: &GemmLikeStrategy,
    masked: bool,
) -> Result<Handle> {
    let unit = ctx.resolve(unit_h)?.clone();
    match unit {
        Target::Unit { bufferized: false } => {}
        Target::Unit { bufferized: true } => {
            return Err(wrong_target(
                "matmul_vectorization",
                "tensor-level unit",
                &unit,
            ));
        }
        other => return Err(wrong_target("matmul_vectorization", "unit", &other)),
    }

    // Validate all three copies before recording anything.
    for &copy_h in &copy_handles {
        let target = ctx.resolve(copy_h)?.clone();
        let Target::PadOrCopy {
            distributed: true,
            folded_branch,
            vectorized: false,
            ..
        } = target
        else {
            return Err(wrong_target(
                "matmul_vectorization",
                "a distributed, unvectorized copy",
                &target,
            ));
        };
        if folded_branch && !masked {
            return Err(SynthesisError::UnmaskedFoldedBranch);
        }
    }

    for copy_h in copy_handles {
        if masked {
            ctx.push_stage(Stage::MaskedVectorize {
                vector_width: strategy.vector_width,
            });
        }
        let Target::PadOrCopy {
            is_pad,
            shape,
            folded_branch,
            ..
        } = ctx.resolve(copy_h)?.clone()
        else {
            unreachable!("validated above");
        };
        ctx.rewrite(
            copy_h,
            Target::PadOrCopy {
                is_pad,
                shape,
                distributed: true,
                folded_branch,
                vectorized: true,
            },
        )?;
    }

    // Vectorize the rest of the kernel body and clean up.
    let func_h = vectorize(ctx, unit_h, func_h)?;
    let Target::Func {
        name,
        bufferized,
        block_size,
        vectorizable_ops,
        vector_ops,
        has_loop_nest,
    } = ctx.resolve(func_h)?.clone()
    else {
        unreachable!("vectorize returns a func handle");
    };
    ctx.rewrite(
        func_h,
        Target::Func {
            name,
            bufferized,
            block_size,
            vectorizable_ops,
            vector_ops: vector_ops + copy_handles.len(),
            has_loop_nest,
        },
    )
}

/// Convert vectorized multiply-accumulate patterns to the matrix-multiply
/// unit. Pass-through when the descriptor does not request the unit.
///
/// The internal order is fixed: fold memory aliases, hoist redundant
/// transfers, then convert. Alias folding must precede the conversion to
/// enable redundant-load elimination, yet folding after unrolling breaks
/// the conversion across loop-carried values, so any other order is
/// undefined for this stage. The conversion should eventually move earlier
/// in the pipeline once that hazard is gone.
pub fn convert_to_mma(
    ctx: &mut PipelineContext,
    func_h: Handle,
    strategy: &GemmLikeStrategy,
) -> Result<Handle> {
    if !strategy.use_mma {
        return Ok(func_h);
    }
    let target = ctx.resolve(func_h)?.clone();
    let Target::Func {
        name, bufferized, ..
    } = &target
    else {
        return Err(wrong_target("convert_to_mma", "func", &target));
    };
    if !bufferized {
        return Err(SynthesisError::NotBufferized {
            func: name.clone(),
            step: "convert_to_mma",
        });
    }

    ctx.push_stage(Stage::FoldMemrefAliases);
    ctx.push_stage(Stage::HoistRedundantTransfers);
    ctx.push_stage(Stage::ConvertToMma);
    ctx.rewrite(func_h, target)
}

/// Replicate shared-memory buffers across pipeline stages. Pass-through
/// when multi-buffering is not requested.
pub fn multi_buffering(
    ctx: &mut PipelineContext,
    func_h: Handle,
    strategy: &GemmLikeStrategy,
) -> Result<Handle> {
    if !strategy.multi_buffer {
        return Ok(func_h);
    }
    let target = ctx.resolve(func_h)?.clone();
    if !matches!(target, Target::Func { .. }) {
        return Err(wrong_target("multi_buffering", "func", &target));
    }

    ctx.push_stage(Stage::MultiBuffer {
        factor: strategy.pipeline_depth.max(2),
    });
    ctx.rewrite(func_h, target)
}

/// Convert ordinary shared-memory copies into non-blocking hardware
/// copies. Pass-through when async copies are not requested.
pub fn convert_to_async_copies(
    ctx: &mut PipelineContext,
    func_h: Handle,
    strategy: &GemmLikeStrategy,
) -> Result<Handle> {
    if !strategy.async_copies {
        return Ok(func_h);
    }
    let target = ctx.resolve(func_h)?.clone();
    if !matches!(target, Target::Func { .. }) {
        return Err(wrong_target("convert_to_async_copies", "func", &target));
    }

    ctx.push_stage(Stage::AsyncCopies);
    ctx.rewrite(func_h, target)
}

/// Reorder the loop body into a software-pipelined schedule overlapping
/// copy latency with compute. Pass-through when the depth is zero.
pub fn pipeline_shared_memory_copies(
    ctx: &mut PipelineContext,
    func_h: Handle,
    strategy: &GemmLikeStrategy,
) -> Result<Handle> {
    if strategy.pipeline_depth == 0 {
        return Ok(func_h);
    }
    let target = ctx.resolve(func_h)?.clone();
    if !matches!(target, Target::Func { .. }) {
        return Err(wrong_target("pipeline_shared_memory_copies", "func", &target));
    }

    ctx.push_stage(Stage::PipelineCopies {
        depth: strategy.pipeline_depth,
    });
    ctx.rewrite(func_h, target)
}

/// The common trailing sequence shared by every kernel kind: vectorize,
/// bufferize, map to blocks and threads, distribute vectors. Returns the
/// updated unit and function handles.
pub fn common_trailing(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
    strategy: &Strategy,
) -> Result<(Handle, Handle)> {
    let func_h = vectorize(ctx, unit_h, func_h)?;
    trailing_tail(ctx, unit_h, func_h, strategy)
}

/// The tail of the common trailing sequence, entered once vectorization
/// has already happened (the matmul path vectorizes through
/// [`matmul_vectorization`]).
pub(crate) fn trailing_tail(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
    strategy: &Strategy,
) -> Result<(Handle, Handle)> {
    debug!(
        kind = strategy.kind_name(),
        vector_width = strategy.vector_width(),
        "lowering common trailing sequence"
    );
    let (unit_h, func_h) = bufferize(ctx, unit_h, func_h)?;
    let func_h = map_to_block_and_threads(
        ctx,
        func_h,
        &strategy.block_size(),
        &strategy.warp_dims(),
    )?;
    let func_h = distribute_vectors(ctx, unit_h, func_h, WARP_SIZE)?;
    Ok((unit_h, func_h))
}
