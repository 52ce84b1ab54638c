//! Defines the expression arena and the construction API.
pub mod expr;
pub mod registry;
pub mod types;

// Re-export key types for convenient access
pub use expr::{Expr, ExprError, ExprGraph};
pub use registry::Registry;
pub use types::{Arity, NodeId, NodeKind, OpKind};
