//! types.rs
//! Arena ids and the closed operator vocabulary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Argument-count contract of an operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
    /// Accepts one or more arguments (add, sum).
    Nary,
}

impl Arity {
    pub fn expected(&self) -> &'static str {
        match self {
            Arity::Unary => "exactly 1",
            Arity::Binary => "exactly 2",
            Arity::Nary => "at least 1",
        }
    }
}

/// The closed set of operators. Each kind fixes its arity, its display
/// symbol, and its numeric formula; derivative and canonicalization rules
/// dispatch on this tag exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Negate,
    Add,
    Subtract,
    Multiply,
    Divide,
    Sin,
    Cos,
    Sinh,
    Cosh,
    Exp,
    Log,
    Sum,
}

impl OpKind {
    pub fn arity(&self) -> Arity {
        match self {
            OpKind::Negate
            | OpKind::Sin
            | OpKind::Cos
            | OpKind::Sinh
            | OpKind::Cosh
            | OpKind::Exp
            | OpKind::Log => Arity::Unary,
            OpKind::Subtract | OpKind::Multiply | OpKind::Divide => Arity::Binary,
            OpKind::Add | OpKind::Sum => Arity::Nary,
        }
    }

    /// Checks a concrete argument count against the arity contract.
    pub fn accepts(&self, count: usize) -> bool {
        match self.arity() {
            Arity::Unary => count == 1,
            Arity::Binary => count == 2,
            Arity::Nary => count >= 1,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            OpKind::Negate => "negate",
            OpKind::Add => "add",
            OpKind::Subtract => "subtract",
            OpKind::Multiply => "multiply",
            OpKind::Divide => "divide",
            OpKind::Sin => "sin",
            OpKind::Cos => "cos",
            OpKind::Sinh => "sinh",
            OpKind::Cosh => "cosh",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Sum => "sum",
        }
    }

    /// The numeric formula. Returns `None` on division by exact zero so the
    /// caller can attach node context to the error. Callers guarantee arity.
    pub fn apply(&self, args: &[f64]) -> Option<f64> {
        Some(match self {
            OpKind::Negate => -args[0],
            OpKind::Add | OpKind::Sum => args.iter().sum(),
            OpKind::Subtract => args[0] - args[1],
            OpKind::Multiply => args[0] * args[1],
            OpKind::Divide => {
                if args[1] == 0.0 {
                    return None;
                }
                args[0] / args[1]
            }
            OpKind::Sin => args[0].sin(),
            OpKind::Cos => args[0].cos(),
            OpKind::Sinh => args[0].sinh(),
            OpKind::Cosh => args[0].cosh(),
            OpKind::Exp => args[0].exp(),
            OpKind::Log => args[0].ln(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Immutable numeric leaf.
    Constant(f64),
    /// Mutable-valued leaf. The name is informational only; identity is the
    /// arena slot, so two variables with the same name are distinct nodes.
    Variable { name: String },
    Function(OpKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_contracts() {
        assert!(OpKind::Negate.accepts(1));
        assert!(!OpKind::Negate.accepts(2));
        assert!(OpKind::Subtract.accepts(2));
        assert!(!OpKind::Subtract.accepts(3));
        assert!(OpKind::Add.accepts(2));
        assert!(OpKind::Add.accepts(5));
        assert!(!OpKind::Sum.accepts(0));
    }

    #[test]
    fn test_apply_divide_by_zero() {
        assert_eq!(OpKind::Divide.apply(&[1.0, 0.0]), None);
        assert_eq!(OpKind::Divide.apply(&[6.0, 3.0]), Some(2.0));
    }

    #[test]
    fn test_apply_nary_sum() {
        assert_eq!(OpKind::Add.apply(&[1.0, 2.0, 3.0]), Some(6.0));
        assert_eq!(OpKind::Sum.apply(&[4.0]), Some(4.0));
    }
}
