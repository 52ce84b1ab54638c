//! A synchronous, single-threaded tree-walking evaluator.
//!
//! Backs `Expr::value()`: builds a dependency-first evaluation order over the
//! reachable subgraph, then computes each node exactly once into the
//! registry's value column. Callers needing repeated evaluation against
//! changing inputs should compile a [`super::Program`] instead.

use smallvec::SmallVec;

use crate::analysis::topology;
use crate::graph::{NodeId, NodeKind, Registry};

use super::ComputeError;

/// Evaluates `target` against the variables' current values. Each reachable
/// node is computed once, arguments before consumers, and its result cached
/// in the value column (no staleness tracking; re-run after `set_value`).
pub fn evaluate(reg: &mut Registry, target: NodeId) -> Result<f64, ComputeError> {
    let order = topology::sort_reachable(reg, &[target])?;

    for &id in &order {
        let result = match &reg.kinds[id.index()] {
            NodeKind::Constant(c) => *c,
            NodeKind::Variable { .. } => reg.value(id),
            NodeKind::Function(op) => {
                let operands: SmallVec<[f64; 4]> =
                    reg.get_args(id).iter().map(|a| reg.value(*a)).collect();
                match op.apply(&operands) {
                    Some(v) => v,
                    None => {
                        return Err(ComputeError::DivisionByZero { node: reg.label(id) })
                    }
                }
            }
        };
        reg.set_value(id, result);
    }

    Ok(reg.value(target))
}

#[cfg(test)]
mod tests {
    use crate::compute::ComputeError;
    use crate::graph::ExprGraph;

    #[test]
    fn test_scalar_arithmetic() {
        let g = ExprGraph::new();
        let x = g.variable("x", 2.0);
        let y = g.variable("y", 3.0);

        assert_eq!((&x - &y).value().unwrap(), -1.0);
        assert_eq!(((3.0 - &x) - &y).value().unwrap(), -2.0);
        assert_eq!((&x * &y + 1.0).value().unwrap(), 7.0);
    }

    #[test]
    fn test_elementary_functions() {
        let g = ExprGraph::new();
        let x = g.variable("x", 3.0);
        assert_eq!((-x.sin()).value().unwrap(), -3.0_f64.sin());
        assert_eq!(x.exp().value().unwrap(), 3.0_f64.exp());
        assert_eq!(x.cosh().value().unwrap(), 3.0_f64.cosh());
    }

    #[test]
    fn test_revaluation_after_set_value() {
        let g = ExprGraph::new();
        let x = g.variable("x", 2.0);
        let f = &x * &x;

        assert_eq!(f.value().unwrap(), 4.0);
        x.set_value(5.0).unwrap();
        assert_eq!(f.value().unwrap(), 25.0);
    }

    #[test]
    fn test_division_by_zero_fails_at_evaluation() {
        let g = ExprGraph::new();
        let x = g.variable("x", 1.0);
        let y = g.variable("y", 0.0);
        let f = &x / &y;

        let err = f.value().unwrap_err();
        assert_eq!(err, ComputeError::DivisionByZero { node: "divide".to_string() });

        y.set_value(4.0).unwrap();
        assert_eq!(f.value().unwrap(), 0.25);
    }

    #[test]
    fn test_shared_node_computed_once_consistently() {
        let g = ExprGraph::new();
        let x = g.variable("x", 2.0);
        let shared = &x + 1.0;
        let f = &shared * &shared;
        assert_eq!(f.value().unwrap(), 9.0);
    }
}
