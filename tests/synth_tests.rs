//! End-to-end dispatcher tests

use pretty_assertions::assert_eq;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strategos::ir::{ElemType, Func, Module, OpKind};
use strategos::model::GpuModel;
use strategos::pipeline::{Stage, StageKind, TransformPlan};
use strategos::strategy::{GemmTuning, MatmulProblem};
use strategos::synth::{
    match_and_set_gemm_strategy, match_and_set_strategy, synthesize_module, MatchOutcome,
};

/// Dispatch decisions are logged at debug level; `RUST_LOG=strategos=debug`
/// shows them when a test fails.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

fn matmul_func(name: &str, elem: ElemType) -> Func {
    let mut func = Func::new(name);
    func.push_op(
        "fill",
        OpKind::Fill {
            shape: vec![128, 64],
            elem,
        },
    );
    func.push_op(
        "matmul",
        OpKind::Matmul {
            m: 128,
            n: 64,
            k: 256,
            elem,
        },
    );
    func
}

fn reduction_func(name: &str) -> Func {
    let mut func = Func::new(name);
    func.push_op(
        "softmax_sum",
        OpKind::Reduce {
            shape: vec![256, 2048],
            dims: vec![1],
            elementwise_body: true,
            elem: ElemType::F32,
        },
    );
    func
}

#[test]
fn test_gemm_plan_order_without_mma() {
    // [128, 256] x [256, 64]: tiles divide exactly, so no padding and no
    // masking; no matrix-multiply unit, so no conversion stage.
    let model = GpuModel::new("test", true, false);
    let mut func = matmul_func("gemm", ElemType::F32);
    let problem = MatmulProblem {
        m: 128,
        n: 64,
        k: 256,
        elem: ElemType::F32,
    };
    let tuning = GemmTuning {
        tile: [64, 64, 32],
        vector_width: 4,
        num_warps: 4,
        ..GemmTuning::default()
    };

    let outcome = match_and_set_gemm_strategy(&mut func, &model, problem, tuning, true);
    assert_eq!(outcome, MatchOutcome::Matched);

    let plan = func.plan.as_ref().unwrap();
    assert!(plan.contains_in_order(&[
        StageKind::PadMatmul,
        StageKind::TileToForall,
        StageKind::Vectorize,
        StageKind::Bufferize,
        StageKind::MapToBlocks,
        StageKind::DistributeVectors,
    ]));
    assert!(!plan.contains(StageKind::ConvertToMma));
    assert!(!plan.contains(StageKind::MaskedVectorize));

    // 4 warps of 32 threads along x.
    let Some(Stage::MapToBlocks {
        block_size,
        warp_dims,
    }) = plan
        .stages()
        .iter()
        .find(|s| s.kind() == StageKind::MapToBlocks)
    else {
        panic!("expected a block mapping stage");
    };
    assert_eq!(block_size, &vec![128, 1, 1]);
    assert_eq!(warp_dims, &vec![4, 1]);
}

#[test]
fn test_default_dispatch_pads_uneven_matmul() {
    let model = GpuModel::new("test", true, false);
    let mut func = Func::new("gemm");
    func.push_op(
        "matmul",
        OpKind::Matmul {
            m: 130,
            n: 64,
            k: 256,
            elem: ElemType::F32,
        },
    );

    let outcome = match_and_set_strategy(&mut func, &model).unwrap();
    assert_eq!(outcome, MatchOutcome::Matched);

    let plan = func.plan.as_ref().unwrap();
    let Some(Stage::PadMatmul { padded_sizes }) = plan
        .stages()
        .iter()
        .find(|s| s.kind() == StageKind::PadMatmul)
    else {
        panic!("expected a padding stage");
    };
    assert_eq!(*padded_sizes, [192, 64, 256]);
    // Partial tiles force the masked copy path.
    assert!(plan.contains(StageKind::FoldIfBranch));
    assert!(plan.contains(StageKind::MaskedVectorize));
}

#[test]
fn test_reduction_dispatch_requires_warp_shuffle() {
    init_tracing();
    let shuffle = GpuModel::new("sm_80", true, false);
    let mut func = reduction_func("reduce");
    let outcome = match_and_set_strategy(&mut func, &shuffle).unwrap();
    assert_eq!(outcome, MatchOutcome::Matched);
    assert!(func.plan.as_ref().unwrap().contains(StageKind::SplitReduction));

    // Without the shuffle instruction the descriptor is rejected, which is
    // absorbed into an unmatched outcome rather than surfaced as an error.
    let no_shuffle = GpuModel::default();
    let mut func = reduction_func("reduce");
    let outcome = match_and_set_strategy(&mut func, &no_shuffle).unwrap();
    assert_eq!(outcome, MatchOutcome::Unmatched);
    assert!(func.plan.is_none());
}

#[test]
fn test_unmatched_dispatch_is_repeatable() {
    init_tracing();
    let model = GpuModel::new("test", true, false);
    // Integer matmuls take the default lowering path.
    let mut func = matmul_func("quantized", ElemType::I8);

    for _ in 0..3 {
        let outcome = match_and_set_strategy(&mut func, &model).unwrap();
        assert_eq!(outcome, MatchOutcome::Unmatched);
        assert!(func.plan.is_none());
    }
}

#[test]
fn test_synthesize_module_counts_and_converges() {
    init_tracing();
    let model = GpuModel::new("sm_80", true, false);
    let mut module = Module::new("main");
    module.add_func(matmul_func("gemm", ElemType::F32));
    module.add_func(reduction_func("reduce"));
    module.add_func(matmul_func("quantized", ElemType::I8));

    assert_eq!(synthesize_module(&mut module, &model).unwrap(), 2);
    assert!(module.funcs["gemm"].is_matched());
    assert!(module.funcs["reduce"].is_matched());
    assert!(!module.funcs["quantized"].is_matched());

    // A second pass skips matched entry points instead of erroring.
    assert_eq!(synthesize_module(&mut module, &model).unwrap(), 0);
}

#[test]
fn test_cleared_plan_can_be_resynthesized() {
    let model = GpuModel::new("sm_80", true, false);
    let mut module = Module::new("main");
    module.add_func(matmul_func("gemm", ElemType::F32));
    assert_eq!(synthesize_module(&mut module, &model).unwrap(), 1);

    // Dropping the annotation reopens the entry point for dispatch.
    module.func_mut("gemm").unwrap().plan = None;
    assert_eq!(synthesize_module(&mut module, &model).unwrap(), 1);
    assert!(module.funcs["gemm"].is_matched());
}

#[test]
fn test_persisted_plan_round_trips_json() {
    let model = GpuModel::new("test", true, false);
    let mut func = matmul_func("gemm", ElemType::F32);
    match_and_set_strategy(&mut func, &model).unwrap();

    let plan = func.plan.as_ref().unwrap();
    let json = plan.to_json().unwrap();
    let back: TransformPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, plan);
}
