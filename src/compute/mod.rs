//! Evaluation of expression graphs: the tree walker for one-off values and
//! the compiled program for repeated replay.
pub mod bytecode;
pub mod engine;
pub mod walker;

pub use bytecode::{Program, Step};
pub use engine::{Engine, Evaluator};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("division by zero at node '{node}'")]
    DivisionByZero { node: String },
    #[error("cycle detected in expression graph")]
    CycleDetected,
    #[error("'{name}' is not a variable and cannot be a program input")]
    NotAnInput { name: String },
    #[error("variable '{name}' is reachable from the outputs but missing from the input list")]
    UnboundVariable { name: String },
    #[error("expected {expected} input value(s), got {actual}")]
    InputLengthMismatch { expected: usize, actual: usize },
}
