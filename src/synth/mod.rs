//! Strategy dispatcher and kernel matchers
//!
//! The dispatcher inspects an entry point's operations, and when they fit a
//! known kernel shape it constructs the descriptor, runs the pipeline and
//! persists the plan on the function. Anything else leaves the entry point
//! unannotated, which tells the surrounding pass infrastructure to use its
//! default lowering path. Descriptor validation failures and unmet builder
//! preconditions are absorbed the same way; only re-invoking the dispatcher
//! on an already-matched entry point is an error.

pub mod gemm;
pub mod reduction;

pub use gemm::build_gemm_strategy;
pub use reduction::build_reduction_strategy;

use tracing::{debug, warn};

use crate::diagnostics::{Result, SynthesisError};
use crate::ir::{Func, Module, OpKind};
use crate::model::GpuModel;
use crate::pipeline::{func_target, PipelineContext, Target, TransformPlan};
use crate::strategy::{
    GemmLikeStrategy, GemmTuning, MatmulProblem, ReductionProblem, ReductionStrategy,
    ReductionTuning,
};

/// Outcome of one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A plan was synthesized and persisted on the entry point.
    Matched,
    /// No known kernel shape fit; the default lowering path applies.
    Unmatched,
}

/// Match a matmul-like kernel: exactly one floating-point matmul, an
/// optional fill producing its accumulator, collectives and elementwise
/// epilogues tolerated.
fn match_matmul(func: &Func) -> Option<(MatmulProblem, bool)> {
    let mut matmul = None;
    let mut has_fill = false;
    for (_, op) in func.ops() {
        match &op.kind {
            OpKind::Matmul { m, n, k, elem } => {
                if matmul.is_some() {
                    return None;
                }
                matmul = Some(MatmulProblem {
                    m: *m,
                    n: *n,
                    k: *k,
                    elem: *elem,
                });
            }
            OpKind::Fill { shape, .. } => {
                if matmul.is_none() && shape.len() == 2 {
                    has_fill = true;
                }
            }
            // May have been produced by the collective lowering pass, in
            // default or specialized channel form; either way it is not
            // part of the kernel shape.
            OpKind::Collective { .. } => {}
            OpKind::Elementwise { .. } | OpKind::Copy { .. } | OpKind::Pad { .. } => {}
            OpKind::Reduce { .. } => return None,
        }
    }
    let problem = matmul?;
    if !problem.elem.is_float() {
        return None;
    }
    Some((problem, has_fill))
}

/// Match a reduction-like kernel: exactly one reduction over a single
/// dimension with an elementwise combiner, no matmul present.
fn match_reduction(func: &Func) -> Option<ReductionProblem> {
    let mut reduce = None;
    for (_, op) in func.ops() {
        match &op.kind {
            OpKind::Reduce {
                shape,
                dims,
                elementwise_body,
                elem,
            } => {
                if reduce.is_some() || dims.len() != 1 {
                    return None;
                }
                if !elementwise_body {
                    debug!(func = %func.name, "reduction body is not elementwise; unmatched");
                    return None;
                }
                reduce = Some(ReductionProblem {
                    shape: shape.clone(),
                    reduction_dims: dims.clone(),
                    elem: *elem,
                });
            }
            OpKind::Matmul { .. } => return None,
            OpKind::Collective { .. } => {}
            OpKind::Fill { .. }
            | OpKind::Elementwise { .. }
            | OpKind::Copy { .. }
            | OpKind::Pad { .. } => {}
        }
    }
    reduce
}

/// Ops a vectorization step would rewrite.
fn count_vectorizable(func: &Func) -> usize {
    func.ops()
        .filter(|(_, op)| !matches!(op.kind, OpKind::Collective { .. }))
        .count()
}

/// Default matmul tuning for the target: tiles clamped to the problem,
/// padding enabled only when a tile does not divide its dimension, vector
/// width capped by the hardware load width.
fn default_gemm_tuning(model: &GpuModel, problem: &MatmulProblem) -> GemmTuning {
    let mut tile = [64, 64, 32];
    for (t, extent) in tile.iter_mut().zip(problem.sizes()) {
        if extent < *t {
            *t = extent;
        }
    }
    let pad = problem
        .sizes()
        .iter()
        .zip(tile.iter())
        .any(|(extent, t)| extent % t != 0);
    GemmTuning {
        tile,
        vector_width: model.max_vector_width(problem.elem.bit_width()).min(4),
        num_warps: 4,
        pad,
        use_mma: model.has_mma_unit,
        multi_buffer: false,
        async_copies: false,
        pipeline_depth: 0,
    }
}

fn default_reduction_tuning(model: &GpuModel, problem: &ReductionProblem) -> ReductionTuning {
    ReductionTuning {
        vector_width: model.max_vector_width(problem.elem.bit_width()).min(4),
        num_warps: 4,
        pad: false,
    }
}

fn run_gemm_pipeline(
    func: &Func,
    model: &GpuModel,
    strategy: &GemmLikeStrategy,
    has_producing_fill: bool,
) -> Result<TransformPlan> {
    let mut ctx = PipelineContext::new(model);
    let unit_h = ctx.track(Target::Unit { bufferized: false });
    let func_h = ctx.track(func_target(&func.name, count_vectorizable(func)));
    let matmul_h = ctx.track(Target::Matmul {
        problem: strategy.problem,
        padded: false,
        vectorized: false,
    });
    build_gemm_strategy(&mut ctx, unit_h, func_h, matmul_h, has_producing_fill, strategy)?;
    Ok(ctx.into_plan())
}

fn run_reduction_pipeline(
    func: &Func,
    model: &GpuModel,
    strategy: &ReductionStrategy,
) -> Result<TransformPlan> {
    let mut ctx = PipelineContext::new(model);
    let unit_h = ctx.track(Target::Unit { bufferized: false });
    let func_h = ctx.track(func_target(&func.name, count_vectorizable(func)));
    let reduce_h = ctx.track(Target::Reduce {
        problem: strategy.problem.clone(),
        split: false,
    });
    build_reduction_strategy(&mut ctx, unit_h, func_h, reduce_h, strategy)?;
    Ok(ctx.into_plan())
}

/// Absorb recoverable synthesis failures into an unmatched outcome.
fn attach(func: &mut Func, result: Result<TransformPlan>, kind: &'static str) -> MatchOutcome {
    match result {
        Ok(plan) => {
            debug!(func = %func.name, kind, stages = plan.len(), "strategy matched");
            func.plan = Some(plan);
            MatchOutcome::Matched
        }
        Err(e) if e.is_recoverable() => {
            debug!(func = %func.name, kind, error = %e, "strategy rejected; using default lowering");
            MatchOutcome::Unmatched
        }
        Err(e) => {
            warn!(func = %func.name, kind, error = %e, "unexpected synthesis failure");
            MatchOutcome::Unmatched
        }
    }
}

/// Match an entry point against the known kernel shapes with tuning
/// derived from the target, and persist a plan on success.
///
/// Unmatched is not an error: the entry point simply keeps the default
/// lowering path. Invoking this on an already-matched entry point is a
/// caller error.
pub fn match_and_set_strategy(func: &mut Func, model: &GpuModel) -> Result<MatchOutcome> {
    if func.is_matched() {
        return Err(SynthesisError::AlreadyMatched {
            func: func.name.clone(),
        });
    }

    if let Some((problem, has_fill)) = match_matmul(func) {
        let tuning = default_gemm_tuning(model, &problem);
        return Ok(match_and_set_gemm_strategy(func, model, problem, tuning, has_fill));
    }
    if let Some(problem) = match_reduction(func) {
        let tuning = default_reduction_tuning(model, &problem);
        return Ok(match_and_set_reduction_strategy(func, model, problem, tuning));
    }

    debug!(func = %func.name, "no known kernel shape; leaving unannotated");
    Ok(MatchOutcome::Unmatched)
}

/// Run the matmul-like pipeline with explicit tuning. Descriptor
/// validation failures fall back to unmatched.
pub fn match_and_set_gemm_strategy(
    func: &mut Func,
    model: &GpuModel,
    problem: MatmulProblem,
    tuning: GemmTuning,
    has_producing_fill: bool,
) -> MatchOutcome {
    let result = GemmLikeStrategy::new(model, problem, tuning)
        .and_then(|strategy| run_gemm_pipeline(func, model, &strategy, has_producing_fill));
    attach(func, result, "gemm-like")
}

/// Run the reduction-like pipeline with explicit tuning. Descriptor
/// validation failures fall back to unmatched.
pub fn match_and_set_reduction_strategy(
    func: &mut Func,
    model: &GpuModel,
    problem: ReductionProblem,
    tuning: ReductionTuning,
) -> MatchOutcome {
    let result = ReductionStrategy::new(model, problem, tuning)
        .and_then(|strategy| run_reduction_pipeline(func, model, &strategy));
    attach(func, result, "reduction")
}

/// Dispatch every not-yet-matched entry point of a module. Returns how
/// many were matched.
pub fn synthesize_module(module: &mut Module, model: &GpuModel) -> Result<usize> {
    let mut matched = 0;
    for func in module.funcs.values_mut() {
        if func.is_matched() {
            continue;
        }
        if match_and_set_strategy(func, model)? == MatchOutcome::Matched {
            matched += 1;
        }
    }
    Ok(matched)
}
