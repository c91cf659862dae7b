//! Computation-graph IR at the synthesis boundary
//!
//! The dispatcher matches entry points against this small graph form:
//! - a module holds entry-point functions in insertion order
//! - a function holds an arena of tensor operations plus their order
//! - a matched function carries its transformation plan as an annotation
//!
//! Printing, serialization of the graph itself, and the frontend that
//! produces it are owned by the surrounding pass infrastructure.

use id_arena::Arena;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pipeline::TransformPlan;

/// Element type of a tensor operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    F32,
    F64,
}

impl ElemType {
    pub fn bit_width(&self) -> i64 {
        match self {
            ElemType::I8 | ElemType::U8 => 8,
            ElemType::I16 | ElemType::U16 | ElemType::F16 | ElemType::BF16 => 16,
            ElemType::I32 | ElemType::U32 | ElemType::F32 => 32,
            ElemType::I64 | ElemType::U64 | ElemType::F64 => 64,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ElemType::F16 | ElemType::BF16 | ElemType::F32 | ElemType::F64
        )
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElemType::I8 => "i8",
            ElemType::I16 => "i16",
            ElemType::I32 => "i32",
            ElemType::I64 => "i64",
            ElemType::U8 => "u8",
            ElemType::U16 => "u16",
            ElemType::U32 => "u32",
            ElemType::U64 => "u64",
            ElemType::F16 => "f16",
            ElemType::BF16 => "bf16",
            ElemType::F32 => "f32",
            ElemType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Collective-communication operation kind
///
/// These are produced by the collective lowering collaborator, which may run
/// before or independently of strategy synthesis. The matcher skips over
/// them; whether a default or a specialized channel op is present makes no
/// difference here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveKind {
    AllReduce,
    AllGather,
    ReduceScatter,
    AllToAll,
}

/// Tensor operation kind
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Fill a tensor with a scalar (typically the matmul accumulator init)
    Fill { shape: Vec<i64>, elem: ElemType },

    /// Matrix multiply: `[m, k] x [k, n] -> [m, n]`
    Matmul { m: i64, n: i64, k: i64, elem: ElemType },

    /// Reduction over `dims` of a tensor of the given shape
    Reduce {
        shape: Vec<i64>,
        dims: Vec<usize>,
        /// The combiner body is elementwise (add/min/max/...), a
        /// precondition for the staged reduction strategy
        elementwise_body: bool,
        elem: ElemType,
    },

    /// Elementwise map over a tensor
    Elementwise { shape: Vec<i64>, elem: ElemType },

    /// Explicit tensor copy
    Copy { shape: Vec<i64>, elem: ElemType },

    /// Padding of a tensor to a static shape
    Pad { shape: Vec<i64>, elem: ElemType },

    /// Collective communication op, default channel or specialized
    Collective {
        kind: CollectiveKind,
        specialized: bool,
    },
}

/// Operation identifier
pub type OpId = id_arena::Id<Op>;

/// A tensor operation in an entry point's computation
#[derive(Debug, Clone)]
pub struct Op {
    pub name: String,
    pub kind: OpKind,
}

/// Entry-point function
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    ops: Arena<Op>,
    order: Vec<OpId>,
    /// Transformation plan persisted by the dispatcher on match
    pub plan: Option<TransformPlan>,
}

impl Func {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Arena::new(),
            order: Vec::new(),
            plan: None,
        }
    }

    /// Append an operation, returning its id.
    pub fn push_op(&mut self, name: impl Into<String>, kind: OpKind) -> OpId {
        let id = self.ops.alloc(Op {
            name: name.into(),
            kind,
        });
        self.order.push(id);
        id
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id]
    }

    /// Operations in program order.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Op)> {
        self.order.iter().map(move |&id| (id, &self.ops[id]))
    }

    pub fn op_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_matched(&self) -> bool {
        self.plan.is_some()
    }
}

/// Top-level compilation unit
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub funcs: IndexMap<String, Func>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            funcs: IndexMap::new(),
        }
    }

    pub fn add_func(&mut self, func: Func) {
        self.funcs.insert(func.name.clone(), func);
    }

    pub fn func(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }

    pub fn func_mut(&mut self, name: &str) -> Option<&mut Func> {
        self.funcs.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elem_type_widths() {
        assert_eq!(ElemType::F32.bit_width(), 32);
        assert_eq!(ElemType::F16.bit_width(), 16);
        assert_eq!(ElemType::BF16.bit_width(), 16);
        assert_eq!(ElemType::I8.bit_width(), 8);
        assert!(ElemType::BF16.is_float());
        assert!(!ElemType::U32.is_float());
    }

    #[test]
    fn test_func_op_order() {
        let mut func = Func::new("kernel");
        func.push_op(
            "fill",
            OpKind::Fill {
                shape: vec![128, 64],
                elem: ElemType::F32,
            },
        );
        func.push_op(
            "matmul",
            OpKind::Matmul {
                m: 128,
                n: 64,
                k: 256,
                elem: ElemType::F32,
            },
        );

        let names: Vec<_> = func.ops().map(|(_, op)| op.name.as_str()).collect();
        assert_eq!(names, ["fill", "matmul"]);
        assert!(!func.is_matched());
    }

    #[test]
    fn test_module_lookup() {
        let mut module = Module::new("unit");
        module.add_func(Func::new("main"));
        assert!(module.func("main").is_some());
        assert!(module.func("other").is_none());
    }
}
