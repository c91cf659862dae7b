//! Pipeline context, handles and builder state
//!
//! A pipeline invocation owns a small arena of tracked representation
//! objects. Builder primitives consume handles into that arena and return
//! fresh ones; a rewrite bumps the slot's generation, so a stale handle
//! (one issued before the rewrite) fails fast instead of silently operating
//! on an outdated view of the representation.
//!
//! The context also accumulates the transformation plan. Everything here is
//! single-threaded and synchronous: a primitive either returns before the
//! next begins or fails without mutating any handle.

pub mod primitives;
pub mod stages;

pub use stages::{Stage, StageKind, TransformPlan};

use crate::diagnostics::{Result, SynthesisError};
use crate::model::GpuModel;
use crate::strategy::gemm::MatmulProblem;
use crate::strategy::reduction::ReductionProblem;

/// What a tracked handle currently refers to
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// The enclosing unit
    Unit { bufferized: bool },

    /// An entry function
    Func {
        name: String,
        bufferized: bool,
        /// Block size once mapped to blocks and threads
        block_size: Option<Vec<i64>>,
        /// Tensor ops that a vectorization step would rewrite
        vectorizable_ops: usize,
        /// Vector ops produced by vectorization, pending distribution
        vector_ops: usize,
        /// The function still holds a loop nest to distribute
        has_loop_nest: bool,
    },

    /// A matmul-like op
    Matmul {
        problem: MatmulProblem,
        padded: bool,
        vectorized: bool,
    },

    /// A single pad or copy op
    PadOrCopy {
        is_pad: bool,
        shape: Vec<i64>,
        distributed: bool,
        folded_branch: bool,
        vectorized: bool,
    },

    /// A reduction-like op
    Reduce {
        problem: ReductionProblem,
        split: bool,
    },
}

impl Target {
    /// Short name used in wrong-target diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Target::Unit { .. } => "unit".to_string(),
            Target::Func { name, .. } => format!("func `{}`", name),
            Target::Matmul { padded, .. } => {
                if *padded {
                    "padded matmul".to_string()
                } else {
                    "matmul".to_string()
                }
            }
            Target::PadOrCopy { is_pad: true, .. } => "pad".to_string(),
            Target::PadOrCopy { is_pad: false, .. } => "copy".to_string(),
            Target::Reduce { .. } => "reduction".to_string(),
        }
    }
}

/// Opaque, pipeline-scoped reference to a tracked representation object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    slot: usize,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    target: Target,
    generation: u32,
}

/// Per-invocation builder state: handle arena, hardware model, plan
#[derive(Debug)]
pub struct PipelineContext<'m> {
    model: &'m GpuModel,
    slots: Vec<Slot>,
    plan: TransformPlan,
}

impl<'m> PipelineContext<'m> {
    pub fn new(model: &'m GpuModel) -> Self {
        Self {
            model,
            slots: Vec::new(),
            plan: TransformPlan::new(),
        }
    }

    pub fn model(&self) -> &GpuModel {
        self.model
    }

    /// Track a new representation object, returning its handle.
    pub fn track(&mut self, target: Target) -> Handle {
        let slot = self.slots.len();
        self.slots.push(Slot {
            target,
            generation: 0,
        });
        Handle {
            slot,
            generation: 0,
        }
    }

    /// Resolve a handle, rejecting stale generations and handles issued by
    /// another context.
    pub fn resolve(&self, handle: Handle) -> Result<&Target> {
        let slot = self
            .slots
            .get(handle.slot)
            .ok_or(SynthesisError::ForeignHandle { slot: handle.slot })?;
        if slot.generation != handle.generation {
            return Err(SynthesisError::StaleHandle {
                slot: handle.slot,
                held: handle.generation,
                current: slot.generation,
            });
        }
        Ok(&slot.target)
    }

    /// Replace a handle's target after a rewrite. The old handle becomes
    /// stale; the returned handle is the only valid reference.
    pub fn rewrite(&mut self, handle: Handle, target: Target) -> Result<Handle> {
        self.resolve(handle)?;
        let slot = &mut self.slots[handle.slot];
        slot.generation += 1;
        slot.target = target;
        Ok(Handle {
            slot: handle.slot,
            generation: slot.generation,
        })
    }

    /// Record an applied stage.
    pub fn push_stage(&mut self, stage: Stage) {
        tracing::trace!(stage = ?stage.kind(), "applying stage");
        self.plan.push(stage);
    }

    pub fn plan(&self) -> &TransformPlan {
        &self.plan
    }

    pub fn into_plan(self) -> TransformPlan {
        self.plan
    }
}

/// Convenience constructor for a freshly tracked entry function.
pub fn func_target(name: impl Into<String>, vectorizable_ops: usize) -> Target {
    Target::Func {
        name: name.into(),
        bufferized: false,
        block_size: None,
        vectorizable_ops,
        vector_ops: 0,
        has_loop_nest: true,
    }
}
