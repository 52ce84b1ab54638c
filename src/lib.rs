//! Symbolic expression graphs for optimization modeling.
//!
//! Expressions are built from variables, constants, and operators into a
//! shared DAG with canonicalizing constructors. The graph supports symbolic
//! differentiation, affine-structure analysis with explicit coefficient
//! extraction, and compilation into a flat program that replays against many
//! variable assignments without re-walking the symbolic tree.
//!
//! The three layers:
//! - `graph`: the node arena, handles, and construction rules;
//! - `analysis`: differentiation, affine detection, and graph ordering;
//! - `compute`: the tree-walking evaluator and the compiled program engine.

pub mod analysis;
pub mod compute;
pub mod graph;

// Re-export key types for convenient access
pub use analysis::affine::AffineInfo;
pub use compute::{ComputeError, Engine, Evaluator, Program, Step};
pub use graph::{Arity, Expr, ExprError, ExprGraph, NodeId, NodeKind, OpKind, Registry};
