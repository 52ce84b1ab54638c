//! Public construction API: the graph handle, node handles, canonicalizing
//! constructors, and operator sugar.

use std::cell::RefCell;
use std::ops;
use std::rc::Rc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::analysis::affine::{self, AffineInfo};
use crate::analysis::{derivative, topology};
use crate::compute::{walker, ComputeError, Program};

use super::registry::Registry;
use super::types::{NodeId, NodeKind, OpKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("{op} expects {expected} argument(s), got {actual}")]
    WrongArity { op: &'static str, expected: &'static str, actual: usize },
    #[error("expression belongs to a different graph")]
    ForeignExpr,
    #[error("'{name}' is not a variable")]
    NotAVariable { name: String },
    #[error("invalid graph payload: {0}")]
    InvalidPayload(String),
}

/// Shared handle on one expression arena. Cloning the handle shares the
/// arena; nodes from different arenas never mix.
#[derive(Debug, Clone, Default)]
pub struct ExprGraph {
    pub(crate) inner: Rc<RefCell<Registry>>,
}

impl ExprGraph {
    pub fn new() -> Self { Self::default() }

    pub fn node_count(&self) -> usize { self.inner.borrow().count() }

    pub fn constant(&self, value: f64) -> Expr {
        self.expr(self.inner.borrow_mut().add_constant(value))
    }

    pub fn variable(&self, name: &str, value: f64) -> Expr {
        self.expr(self.inner.borrow_mut().add_variable(name, value))
    }

    /// Checked n-ary constructor. Validates the arity contract and graph
    /// ownership, then canonicalizes; no node is allocated on failure.
    pub fn function(&self, op: OpKind, args: &[Expr]) -> Result<Expr, ExprError> {
        if !op.accepts(args.len()) {
            return Err(ExprError::WrongArity {
                op: op.symbol(),
                expected: op.arity().expected(),
                actual: args.len(),
            });
        }
        for arg in args {
            if !Rc::ptr_eq(&self.inner, &arg.graph.inner) {
                return Err(ExprError::ForeignExpr);
            }
        }
        let ids: SmallVec<[NodeId; 4]> = args.iter().map(|a| a.id).collect();
        Ok(self.expr(self.build(op, &ids)))
    }

    /// Sum of one or more terms (n-ary, same combination rule as `add`).
    pub fn sum(&self, terms: &[Expr]) -> Result<Expr, ExprError> {
        self.function(OpKind::Sum, terms)
    }

    /// Recovers a handle for an existing node id (e.g. after `from_json`).
    pub fn node(&self, id: NodeId) -> Option<Expr> {
        if id.index() < self.inner.borrow().count() {
            Some(self.expr(id))
        } else {
            None
        }
    }

    pub fn to_json(&self) -> Result<String, ExprError> {
        serde_json::to_string(&*self.inner.borrow())
            .map_err(|e| ExprError::InvalidPayload(e.to_string()))
    }

    /// Rebuilds a graph from a JSON payload. The registry is validated
    /// structurally and sorted once to reject cyclic payloads, so the
    /// acyclicity invariant holds for every graph in the process.
    pub fn from_json(payload: &str) -> Result<ExprGraph, ExprError> {
        let reg: Registry =
            serde_json::from_str(payload).map_err(|e| ExprError::InvalidPayload(e.to_string()))?;
        reg.validate().map_err(ExprError::InvalidPayload)?;
        let roots: Vec<NodeId> = (0..reg.count()).map(NodeId::new).collect();
        topology::sort_reachable(&reg, &roots)
            .map_err(|e| ExprError::InvalidPayload(e.to_string()))?;
        Ok(ExprGraph { inner: Rc::new(RefCell::new(reg)) })
    }

    pub(crate) fn expr(&self, id: NodeId) -> Expr {
        Expr { graph: self.clone(), id }
    }

    pub(crate) fn constant_id(&self, value: f64) -> NodeId {
        self.inner.borrow_mut().add_constant(value)
    }

    /// Canonicalizing node construction. Callers guarantee arity and
    /// ownership; the returned node never needs re-simplification.
    pub(crate) fn build(&self, op: OpKind, args: &[NodeId]) -> NodeId {
        match op {
            OpKind::Negate => self.build_negate(args[0]),
            OpKind::Subtract => self.build_subtract(args[0], args[1]),
            OpKind::Multiply => self.build_multiply(args[0], args[1]),
            OpKind::Divide => self.build_divide(args[0], args[1]),
            OpKind::Add | OpKind::Sum => self.build_nary_add(op, args),
            _ => self.build_unary(op, args[0]),
        }
    }

    fn build_negate(&self, arg: NodeId) -> NodeId {
        let mut reg = self.inner.borrow_mut();
        // Double negation cancels back to the original node, same identity.
        if let NodeKind::Function(OpKind::Negate) = reg.kinds[arg.index()] {
            return reg.get_args(arg)[0];
        }
        if let Some(c) = reg.as_constant(arg) {
            return reg.add_constant(-c);
        }
        reg.add_function(OpKind::Negate, &[arg])
    }

    fn build_subtract(&self, lhs: NodeId, rhs: NodeId) -> NodeId {
        {
            let mut reg = self.inner.borrow_mut();
            match (reg.as_constant(lhs), reg.as_constant(rhs)) {
                (Some(a), Some(b)) => return reg.add_constant(a - b),
                (_, Some(b)) if b == 0.0 => return lhs,
                (Some(a), _) if a == 0.0 => {}
                _ => return reg.add_function(OpKind::Subtract, &[lhs, rhs]),
            }
        }
        // 0 - x routes through the negate rules
        self.build_negate(rhs)
    }

    fn build_multiply(&self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let mut reg = self.inner.borrow_mut();
        match (reg.as_constant(lhs), reg.as_constant(rhs)) {
            (Some(a), Some(b)) => return reg.add_constant(a * b),
            (Some(c), _) | (_, Some(c)) if c == 0.0 => return reg.add_constant(0.0),
            (Some(c), _) if c == 1.0 => return rhs,
            (_, Some(c)) if c == 1.0 => return lhs,
            _ => {}
        }
        reg.add_function(OpKind::Multiply, &[lhs, rhs])
    }

    fn build_divide(&self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let mut reg = self.inner.borrow_mut();
        if let (Some(a), Some(b)) = (reg.as_constant(lhs), reg.as_constant(rhs)) {
            // A constant zero divisor stays symbolic: the failure belongs to
            // evaluation, not construction.
            if b != 0.0 {
                return reg.add_constant(a / b);
            }
        }
        reg.add_function(OpKind::Divide, &[lhs, rhs])
    }

    fn build_nary_add(&self, op: OpKind, args: &[NodeId]) -> NodeId {
        let mut reg = self.inner.borrow_mut();
        let mut folded = 0.0;
        let mut rest: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &arg in args {
            match reg.as_constant(arg) {
                Some(c) => folded += c,
                None => rest.push(arg),
            }
        }
        if rest.is_empty() {
            return reg.add_constant(folded);
        }
        if folded != 0.0 {
            let c = reg.add_constant(folded);
            rest.push(c);
        }
        if rest.len() == 1 {
            return rest[0];
        }
        reg.add_function(op, &rest)
    }

    fn build_unary(&self, op: OpKind, arg: NodeId) -> NodeId {
        let mut reg = self.inner.borrow_mut();
        if let Some(c) = reg.as_constant(arg) {
            if let Some(v) = op.apply(&[c]) {
                return reg.add_constant(v);
            }
        }
        reg.add_function(op, &[arg])
    }
}

/// Cheap-to-clone handle on one node of an [`ExprGraph`].
///
/// Equality is reference identity: same arena, same slot. Two structurally
/// identical expressions built independently are not equal.
#[derive(Debug, Clone)]
pub struct Expr {
    pub(crate) graph: ExprGraph,
    pub(crate) id: NodeId,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.graph.inner, &other.graph.inner) && self.id == other.id
    }
}

impl Eq for Expr {}

impl Expr {
    pub fn id(&self) -> NodeId { self.id }
    pub fn graph(&self) -> &ExprGraph { &self.graph }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    pub fn as_constant(&self) -> Option<f64> {
        self.graph.inner.borrow().as_constant(self.id)
    }

    pub fn is_variable(&self) -> bool {
        self.graph.inner.borrow().is_variable(self.id)
    }

    /// Display name: the variable name, the constant value, or the operator
    /// symbol.
    pub fn name(&self) -> String {
        self.graph.inner.borrow().label(self.id)
    }

    /// Updates a variable's current value. Cached results downstream are not
    /// invalidated; re-evaluate to observe the change.
    pub fn set_value(&self, value: f64) -> Result<(), ExprError> {
        let mut reg = self.graph.inner.borrow_mut();
        if !reg.is_variable(self.id) {
            return Err(ExprError::NotAVariable { name: reg.label(self.id) });
        }
        reg.set_value(self.id, value);
        Ok(())
    }

    /// Evaluates the expression against the variables' current values,
    /// visiting each shared node once.
    pub fn value(&self) -> Result<f64, ComputeError> {
        let mut reg = self.graph.inner.borrow_mut();
        walker::evaluate(&mut reg, self.id)
    }

    /// Distinct variables reachable from this node, in first-visit
    /// depth-first order (each node visited once however often it is
    /// shared). The order is stable and usable as a compile-time input
    /// ordering.
    pub fn variables(&self) -> Vec<Expr> {
        let reg = self.graph.inner.borrow();
        topology::collect_variables(&reg, self.id)
            .into_iter()
            .map(|id| self.graph.expr(id))
            .collect()
    }

    /// Symbolic partial derivative with respect to `var`, as a new node in
    /// the same graph.
    pub fn derivative(&self, var: &Expr) -> Result<Expr, ExprError> {
        if !Rc::ptr_eq(&self.graph.inner, &var.graph.inner) {
            return Err(ExprError::ForeignExpr);
        }
        derivative::derivative(&self.graph, self.id, var.id).map(|id| self.graph.expr(id))
    }

    /// Affine-structure analysis: affinity flag, constant offset, and the
    /// per-variable linear coefficients.
    pub fn analyze(&self) -> AffineInfo {
        let reg = self.graph.inner.borrow();
        affine::analyze(&reg, self.id)
    }

    /// Compiles this expression into a flat program replayable against many
    /// assignments of `inputs`.
    pub fn compile(&self, inputs: &[Expr]) -> Result<Program, ComputeError> {
        Program::compile(&self.graph, std::slice::from_ref(self), inputs)
    }

    pub fn sin(&self) -> Expr { self.unary(OpKind::Sin) }
    pub fn cos(&self) -> Expr { self.unary(OpKind::Cos) }
    pub fn sinh(&self) -> Expr { self.unary(OpKind::Sinh) }
    pub fn cosh(&self) -> Expr { self.unary(OpKind::Cosh) }
    pub fn exp(&self) -> Expr { self.unary(OpKind::Exp) }
    pub fn log(&self) -> Expr { self.unary(OpKind::Log) }

    fn unary(&self, op: OpKind) -> Expr {
        self.graph.expr(self.graph.build(op, &[self.id]))
    }
}

fn binary(lhs: &Expr, rhs: &Expr, op: OpKind) -> Expr {
    assert!(
        Rc::ptr_eq(&lhs.graph.inner, &rhs.graph.inner),
        "expressions belong to different graphs"
    );
    lhs.graph.expr(lhs.graph.build(op, &[lhs.id, rhs.id]))
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr { binary(&self, &rhs, $op) }
        }
        impl ops::$trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr { binary(&self, rhs, $op) }
        }
        impl ops::$trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr { binary(self, &rhs, $op) }
        }
        impl ops::$trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr { binary(self, rhs, $op) }
        }
        impl ops::$trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                let c = self.graph.constant(rhs);
                binary(&self, &c, $op)
            }
        }
        impl ops::$trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                let c = self.graph.constant(rhs);
                binary(self, &c, $op)
            }
        }
        impl ops::$trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                let c = rhs.graph.constant(self);
                binary(&c, &rhs, $op)
            }
        }
        impl ops::$trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                let c = rhs.graph.constant(self);
                binary(&c, rhs, $op)
            }
        }
    };
}

impl_binary_op!(Add, add, OpKind::Add);
impl_binary_op!(Sub, sub, OpKind::Subtract);
impl_binary_op!(Mul, mul, OpKind::Multiply);
impl_binary_op!(Div, div, OpKind::Divide);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr { self.graph.expr(self.graph.build(OpKind::Negate, &[self.id])) }
}

impl ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr { self.graph.expr(self.graph.build(OpKind::Negate, &[self.id])) }
}
