//! Matmul-like pipeline assembly
//!
//! Composes the builder primitives into the full lowering for a matched
//! matmul-like kernel:
//!
//! ```text
//! pad -> hoist output padding -> distribute copies -> vectorize (masked
//! copies + body) -> bufferize -> map to blocks/threads -> distribute
//! vectors -> [mma] -> [multi-buffer] -> [async copies] -> [pipeline]
//! ```
//!
//! The bracketed stages are gated by descriptor flags and pass handles
//! through untouched when disabled.

use crate::diagnostics::Result;
use crate::pipeline::{primitives, Handle, PipelineContext};
use crate::strategy::{GemmLikeStrategy, Strategy};

/// Loop levels the output padding is hoisted out of; the reduction loop is
/// the only one enclosing the copy-back.
const OUTPUT_PAD_HOIST_DEPTH: i64 = 1;

/// Run the full matmul-like pipeline.
///
/// `matmul_h` must refer to an unpadded matmul; `has_producing_fill`
/// reports whether the matcher saw a fill feeding the output operand, so
/// the hoisted padding can fuse into it. Returns the updated unit and
/// function handles.
pub fn build_gemm_strategy(
    ctx: &mut PipelineContext,
    unit_h: Handle,
    func_h: Handle,
    matmul_h: Handle,
    has_producing_fill: bool,
    strategy: &GemmLikeStrategy,
) -> Result<(Handle, Handle)> {
    let matmul_h = primitives::pad_matmul(ctx, matmul_h, strategy)?;
    let matmul_h = primitives::hoist_output_padding(
        ctx,
        unit_h,
        matmul_h,
        OUTPUT_PAD_HOIST_DEPTH,
        has_producing_fill,
    )?;

    let (lhs_h, rhs_h, res_h) = primitives::distribute_copies(ctx, unit_h, matmul_h, strategy)?;

    // Padding may leave partial tiles; their folded branches oblige masked
    // vectorization of the copies.
    let masked = strategy.pad;
    let func_h = primitives::matmul_vectorization(
        ctx,
        unit_h,
        func_h,
        [lhs_h, rhs_h, res_h],
        strategy,
        masked,
    )?;

    let wrapped = Strategy::GemmLike(strategy.clone());
    let (unit_h, func_h) = primitives::trailing_tail(ctx, unit_h, func_h, &wrapped)?;

    let func_h = primitives::convert_to_mma(ctx, func_h, strategy)?;
    let func_h = primitives::multi_buffering(ctx, func_h, strategy)?;
    let func_h = primitives::convert_to_async_copies(ctx, func_h, strategy)?;
    let func_h = primitives::pipeline_shared_memory_copies(ctx, func_h, strategy)?;

    Ok((unit_h, func_h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ElemType;
    use crate::model::GpuModel;
    use crate::pipeline::{func_target, StageKind, Target};
    use crate::strategy::{GemmTuning, MatmulProblem};

    fn run(model: &GpuModel, tuning: GemmTuning) -> crate::pipeline::TransformPlan {
        let problem = MatmulProblem {
            m: 128,
            n: 64,
            k: 256,
            elem: ElemType::F32,
        };
        let strategy = GemmLikeStrategy::new(model, problem, tuning).unwrap();

        let mut ctx = PipelineContext::new(model);
        let unit_h = ctx.track(Target::Unit { bufferized: false });
        let func_h = ctx.track(func_target("kernel", 2));
        let matmul_h = ctx.track(Target::Matmul {
            problem,
            padded: false,
            vectorized: false,
        });
        build_gemm_strategy(&mut ctx, unit_h, func_h, matmul_h, true, &strategy).unwrap();
        ctx.into_plan()
    }

    #[test]
    fn test_fixed_stage_order() {
        let model = GpuModel::default();
        let plan = run(&model, GemmTuning::default());
        assert!(plan.contains_in_order(&[
            StageKind::PadMatmul,
            StageKind::HoistOutputPadding,
            StageKind::TileToForall,
            StageKind::Vectorize,
            StageKind::Bufferize,
            StageKind::MapToBlocks,
            StageKind::DistributeVectors,
        ]));
        assert!(!plan.contains(StageKind::ConvertToMma));
        assert!(!plan.contains(StageKind::MultiBuffer));
    }

    #[test]
    fn test_optional_stages_gated() {
        let model = GpuModel::new("sm_80", true, true);
        let tuning = GemmTuning {
            use_mma: true,
            multi_buffer: true,
            async_copies: true,
            pipeline_depth: 3,
            ..GemmTuning::default()
        };
        let plan = run(&model, tuning);
        // The mma conversion keeps its fixed internal order.
        assert!(plan.contains_in_order(&[
            StageKind::DistributeVectors,
            StageKind::FoldMemrefAliases,
            StageKind::HoistRedundantTransfers,
            StageKind::ConvertToMma,
            StageKind::MultiBuffer,
            StageKind::AsyncCopies,
            StageKind::PipelineCopies,
        ]));
    }
}
