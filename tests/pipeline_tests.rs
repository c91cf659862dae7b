//! Builder primitive and handle-lifetime tests

use pretty_assertions::assert_eq;

use strategos::diagnostics::SynthesisError;
use strategos::ir::ElemType;
use strategos::model::{GpuModel, WARP_SIZE};
use strategos::pipeline::{func_target, primitives, PipelineContext, Stage, StageKind, Target};
use strategos::strategy::{GemmLikeStrategy, GemmTuning, MappingLevel, MatmulProblem};

fn gemm_strategy(model: &GpuModel, pad: bool) -> GemmLikeStrategy {
    let problem = MatmulProblem {
        m: 128,
        n: 64,
        k: 256,
        elem: ElemType::F32,
    };
    let tuning = GemmTuning {
        pad,
        ..GemmTuning::default()
    };
    GemmLikeStrategy::new(model, problem, tuning).unwrap()
}

fn copy_target(shape: Vec<i64>) -> Target {
    Target::PadOrCopy {
        is_pad: false,
        shape,
        distributed: false,
        folded_branch: false,
        vectorized: false,
    }
}

#[test]
fn test_split_130_over_4_threads_vector_4() {
    let model = GpuModel::default();
    let mut ctx = PipelineContext::new(&model);
    let op_h = ctx.track(copy_target(vec![130]));

    primitives::split_1d_with_thread_mapping(
        &mut ctx,
        op_h,
        1,
        0,
        &[130],
        4,
        Some(MappingLevel::Thread),
        4,
    )
    .unwrap();

    let plan = ctx.into_plan();
    let Stage::Split1D {
        regular,
        remainder,
        regular_vector_width,
        ..
    } = &plan.stages()[0]
    else {
        panic!("expected a split stage, got {:?}", plan.stages()[0]);
    };
    // The regular unit is 4 threads x 4 lanes = 16; 8 x 16 = 128 elements
    // are covered regularly, 2 remain.
    assert_eq!(*regular, 128);
    assert_eq!(*remainder, 2);
    // The remainder is never vectorized at the regular width.
    assert_eq!(*regular_vector_width, 4);
    assert!(*remainder < *regular_vector_width as i64);
}

#[test]
fn test_split_requires_mapping_for_multiple_threads() {
    let model = GpuModel::default();
    let mut ctx = PipelineContext::new(&model);
    let op_h = ctx.track(copy_target(vec![128]));

    let err = primitives::split_1d_with_thread_mapping(
        &mut ctx, op_h, 1, 0, &[128], 4, None, 4,
    )
    .unwrap_err();
    assert_eq!(err, SynthesisError::MissingMapping { num_threads: 4 });

    // A single unit needs no mapping attribute.
    assert!(primitives::split_1d_with_thread_mapping(
        &mut ctx, op_h, 1, 0, &[128], 1, None, 4,
    )
    .is_ok());
}

#[test]
fn test_folded_branch_requires_masked_vectorization() {
    let model = GpuModel::default();
    let strategy = gemm_strategy(&model, true);
    let mut ctx = PipelineContext::new(&model);
    let unit_h = ctx.track(Target::Unit { bufferized: false });
    let func_h = ctx.track(func_target("kernel", 1));

    let mut copies = Vec::new();
    for (tile, mapping, fold) in [
        (strategy.lhs_tile(), strategy.lhs_copy_mapping(), false),
        (strategy.rhs_tile(), strategy.rhs_copy_mapping(), false),
        (strategy.res_tile(), strategy.res_copy_mapping(), true),
    ] {
        let h = ctx.track(copy_target(tile.to_vec()));
        let h = primitives::distribute_one_pad_or_copy(
            &mut ctx,
            unit_h,
            h,
            &mapping.num_threads,
            &mapping.mapping,
            strategy.vector_width,
            fold,
        )
        .unwrap();
        copies.push(h);
    }
    let copies = [copies[0], copies[1], copies[2]];

    // Unmasked vectorization after a folded branch is rejected.
    let err = primitives::matmul_vectorization(
        &mut ctx, unit_h, func_h, copies, &strategy, false,
    )
    .unwrap_err();
    assert_eq!(err, SynthesisError::UnmaskedFoldedBranch);

    // Masked vectorization accepts the same handles.
    primitives::matmul_vectorization(&mut ctx, unit_h, func_h, copies, &strategy, true)
        .unwrap();
    assert!(ctx.plan().contains(StageKind::MaskedVectorize));
}

#[test]
fn test_map_then_noop_distribute_keeps_mapping() {
    let model = GpuModel::default();
    let mut ctx = PipelineContext::new(&model);
    let unit_h = ctx.track(Target::Unit { bufferized: false });
    // Zero vectorizable ops: distribute-vectors has nothing to do.
    let func_h = ctx.track(func_target("kernel", 0));

    let (unit_h, func_h) = primitives::bufferize(&mut ctx, unit_h, func_h).unwrap();
    let func_h =
        primitives::map_to_block_and_threads(&mut ctx, func_h, &[128, 1, 1], &[4, 1]).unwrap();

    let after = primitives::distribute_vectors(&mut ctx, unit_h, func_h, WARP_SIZE).unwrap();
    // Pass-through: the same handle comes back and the mapping is intact.
    assert_eq!(after, func_h);
    let Target::Func { block_size, .. } = ctx.resolve(after).unwrap() else {
        panic!("expected a func target");
    };
    assert_eq!(block_size.as_deref(), Some(&[128, 1, 1][..]));
    assert!(!ctx.plan().contains(StageKind::DistributeVectors));
}

#[test]
fn test_block_mapping_requires_bufferization() {
    let model = GpuModel::default();
    let mut ctx = PipelineContext::new(&model);
    let func_h = ctx.track(func_target("kernel", 0));

    let err = primitives::map_to_block_and_threads(&mut ctx, func_h, &[128, 1, 1], &[])
        .unwrap_err();
    assert!(matches!(err, SynthesisError::NotBufferized { .. }));
}

#[test]
fn test_stale_handle_fails_fast() {
    let model = GpuModel::default();
    let strategy = gemm_strategy(&model, false);
    let mut ctx = PipelineContext::new(&model);
    let matmul_h = ctx.track(Target::Matmul {
        problem: strategy.problem,
        padded: false,
        vectorized: false,
    });

    let padded_h = primitives::pad_matmul(&mut ctx, matmul_h, &strategy).unwrap();
    assert_ne!(padded_h, matmul_h);

    // Reusing the pre-rewrite handle is rejected, not silently accepted.
    let err = primitives::pad_matmul(&mut ctx, matmul_h, &strategy).unwrap_err();
    assert!(matches!(err, SynthesisError::StaleHandle { .. }));

    // The padded handle no longer satisfies the unpadded precondition.
    let err = primitives::pad_matmul(&mut ctx, padded_h, &strategy).unwrap_err();
    assert!(matches!(err, SynthesisError::WrongHandleTarget { .. }));
}

#[test]
fn test_optional_stages_pass_through_when_disabled() {
    let model = GpuModel::default();
    let strategy = gemm_strategy(&model, false);
    let mut ctx = PipelineContext::new(&model);
    let func_h = ctx.track(func_target("kernel", 0));

    let h1 = primitives::multi_buffering(&mut ctx, func_h, &strategy).unwrap();
    let h2 = primitives::convert_to_async_copies(&mut ctx, h1, &strategy).unwrap();
    let h3 = primitives::pipeline_shared_memory_copies(&mut ctx, h2, &strategy).unwrap();
    let h4 = primitives::convert_to_mma(&mut ctx, h3, &strategy).unwrap();

    assert_eq!(h4, func_h);
    assert!(ctx.plan().is_empty());
}

#[test]
fn test_error_leaves_plan_unmutated() {
    let model = GpuModel::default();
    let mut ctx = PipelineContext::new(&model);
    let op_h = ctx.track(copy_target(vec![128]));

    let before = ctx.plan().len();
    let _ = primitives::split_1d_with_thread_mapping(
        &mut ctx, op_h, 1, 0, &[128], 4, None, 4,
    )
    .unwrap_err();
    assert_eq!(ctx.plan().len(), before);
    // The handle was not consumed by the failed step.
    assert!(ctx.resolve(op_h).is_ok());
}
