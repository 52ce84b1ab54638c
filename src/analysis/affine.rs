//! Affine-structure analysis: `f = b + Σ aᵥ·v` detection with explicit
//! coefficient extraction.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::graph::{Expr, NodeId, NodeKind, OpKind, Registry};

/// Result of analyzing one expression.
///
/// When `affine` is false, `offset` and `coefficients` are best-effort data
/// carried up the DAG for reporting; only the key set is meaningful then.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineInfo {
    pub affine: bool,
    /// The constant term `b`.
    pub offset: f64,
    /// Linear coefficient per variable, keyed by node id. A coefficient that
    /// cancels to exactly 0 stays present: absence means the variable is not
    /// a dependency at all.
    pub coefficients: HashMap<NodeId, f64>,
}

impl AffineInfo {
    fn constant(offset: f64) -> Self {
        AffineInfo { affine: true, offset, coefficients: HashMap::new() }
    }

    /// Convenience lookup against a variable handle.
    pub fn coefficient(&self, var: &Expr) -> Option<f64> {
        self.coefficients.get(&var.id()).copied()
    }

    /// No variable dependency at all, canceled or otherwise. Note this is a
    /// stronger statement than "all coefficients are zero".
    fn is_constant_like(&self) -> bool {
        self.coefficients.is_empty()
    }

    fn scaled(&self, k: f64) -> AffineInfo {
        AffineInfo {
            affine: self.affine,
            offset: self.offset * k,
            coefficients: self.coefficients.iter().map(|(v, c)| (*v, c * k)).collect(),
        }
    }
}

/// Accumulates `acc += k * other`, keeping canceled coefficients present.
fn combine(acc: &mut AffineInfo, other: &AffineInfo, k: f64) {
    acc.affine &= other.affine;
    acc.offset += k * other.offset;
    for (v, c) in &other.coefficients {
        *acc.coefficients.entry(*v).or_insert(0.0) += k * c;
    }
}

/// Single post-order traversal of the DAG, memoized by node id so a node
/// reachable through several parents is analyzed once.
pub fn analyze(reg: &Registry, root: NodeId) -> AffineInfo {
    let mut memo: HashMap<NodeId, AffineInfo> = HashMap::new();
    walk(reg, root, &mut memo)
}

fn walk(reg: &Registry, id: NodeId, memo: &mut HashMap<NodeId, AffineInfo>) -> AffineInfo {
    if let Some(hit) = memo.get(&id) {
        return hit.clone();
    }

    let info = match reg.kind(id) {
        NodeKind::Constant(c) => AffineInfo::constant(*c),
        NodeKind::Variable { .. } => {
            let mut coefficients = HashMap::new();
            coefficients.insert(id, 1.0);
            AffineInfo { affine: true, offset: 0.0, coefficients }
        }
        NodeKind::Function(op) => {
            let op = *op;
            let args: SmallVec<[NodeId; 4]> = reg.get_args(id).iter().copied().collect();
            walk_function(reg, op, &args, memo)
        }
    };

    memo.insert(id, info.clone());
    info
}

fn walk_function(
    reg: &Registry,
    op: OpKind,
    args: &[NodeId],
    memo: &mut HashMap<NodeId, AffineInfo>,
) -> AffineInfo {
    match op {
        OpKind::Negate => {
            let mut acc = AffineInfo::constant(0.0);
            let u = walk(reg, args[0], memo);
            combine(&mut acc, &u, -1.0);
            acc
        }
        OpKind::Add | OpKind::Sum => {
            let mut acc = AffineInfo::constant(0.0);
            for &arg in args {
                let term = walk(reg, arg, memo);
                combine(&mut acc, &term, 1.0);
            }
            acc
        }
        OpKind::Subtract => {
            let mut acc = AffineInfo::constant(0.0);
            let a = walk(reg, args[0], memo);
            let b = walk(reg, args[1], memo);
            combine(&mut acc, &a, 1.0);
            combine(&mut acc, &b, -1.0);
            acc
        }
        OpKind::Multiply => {
            let a = walk(reg, args[0], memo);
            let b = walk(reg, args[1], memo);
            if a.is_constant_like() {
                let mut info = b.scaled(a.offset);
                info.affine = a.affine && b.affine;
                info
            } else if b.is_constant_like() {
                let mut info = a.scaled(b.offset);
                info.affine = a.affine && b.affine;
                info
            } else {
                // Bilinear: not affine. Report the cross terms against the
                // opposite offsets as best-effort data.
                let mut coefficients = HashMap::new();
                for (v, c) in &a.coefficients {
                    *coefficients.entry(*v).or_insert(0.0) += c * b.offset;
                }
                for (v, c) in &b.coefficients {
                    *coefficients.entry(*v).or_insert(0.0) += c * a.offset;
                }
                AffineInfo { affine: false, offset: a.offset * b.offset, coefficients }
            }
        }
        OpKind::Divide => {
            let a = walk(reg, args[0], memo);
            let b = walk(reg, args[1], memo);
            if b.is_constant_like() {
                if b.offset != 0.0 {
                    let mut info = a.scaled(1.0 / b.offset);
                    info.affine = a.affine && b.affine;
                    info
                } else {
                    AffineInfo { affine: false, ..a }
                }
            } else {
                // Variable divisor: not affine. Keep the numerator structure
                // and track the divisor's variables as dependencies.
                let mut info =
                    if b.offset != 0.0 { a.scaled(1.0 / b.offset) } else { a.clone() };
                info.affine = false;
                for v in b.coefficients.keys() {
                    info.coefficients.entry(*v).or_insert(0.0);
                }
                info
            }
        }
        OpKind::Sin | OpKind::Cos | OpKind::Sinh | OpKind::Cosh | OpKind::Exp | OpKind::Log => {
            let u = walk(reg, args[0], memo);
            let offset = op.apply(&[u.offset]).unwrap_or(f64::NAN);
            AffineInfo {
                affine: u.affine && u.is_constant_like(),
                offset,
                coefficients: u.coefficients,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ExprGraph;

    #[test]
    fn test_variable_minus_constant() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);

        let prop = (&x - 1.0).analyze();
        assert!(prop.affine);
        assert_eq!(prop.offset, -1.0);
        assert_eq!(prop.coefficients.len(), 1);
        assert_eq!(prop.coefficient(&x), Some(1.0));

        let prop = (2.0 - &x).analyze();
        assert!(prop.affine);
        assert_eq!(prop.offset, 2.0);
        assert_eq!(prop.coefficient(&x), Some(-1.0));
    }

    #[test]
    fn test_negated_variable() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let prop = (-&x).analyze();
        assert!(prop.affine);
        assert_eq!(prop.offset, 0.0);
        assert_eq!(prop.coefficients.len(), 1);
        assert_eq!(prop.coefficient(&x), Some(-1.0));
    }

    #[test]
    fn test_canceled_coefficient_stays_present() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        let prop = ((&x - &y) - &x).analyze();
        assert!(prop.affine);
        assert_eq!(prop.offset, 0.0);
        assert_eq!(prop.coefficients.len(), 2);
        assert_eq!(prop.coefficient(&x), Some(0.0));
        assert_eq!(prop.coefficient(&y), Some(-1.0));

        let prop = (((&x - &y) - 10.0) - &x).analyze();
        assert!(prop.affine);
        assert_eq!(prop.offset, -10.0);
        assert_eq!(prop.coefficients.len(), 2);
        assert_eq!(prop.coefficient(&x), Some(0.0));
        assert_eq!(prop.coefficient(&y), Some(-1.0));
    }

    #[test]
    fn test_constant_scaling() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        let f = -4.0 * ((-&y + 3.0 * &x) - 2.0);
        let prop = f.analyze();
        assert!(prop.affine);
        assert_eq!(prop.offset, 8.0);
        assert_eq!(prop.coefficients.len(), 2);
        assert_eq!(prop.coefficient(&x), Some(-12.0));
        assert_eq!(prop.coefficient(&y), Some(4.0));
    }

    #[test]
    fn test_bilinear_product_is_not_affine() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        let f = -(4.0 + &x) * ((-&y + 3.0 * &x) - 2.0);
        let prop = f.analyze();
        assert!(!prop.affine);
        assert_eq!(prop.offset, 8.0);
        assert_eq!(prop.coefficients.len(), 2);
        assert!(prop.coefficient(&x).is_some());
        assert!(prop.coefficient(&y).is_some());
    }

    #[test]
    fn test_divide_by_constant_scales() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let prop = (&x / 2.0).analyze();
        assert!(prop.affine);
        assert_eq!(prop.coefficient(&x), Some(0.5));
    }

    #[test]
    fn test_divide_by_variable_is_not_affine() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);
        let prop = (&x / &y).analyze();
        assert!(!prop.affine);
        // Both variables are tracked as dependencies.
        assert!(prop.coefficient(&x).is_some());
        assert!(prop.coefficient(&y).is_some());
    }

    #[test]
    fn test_elementary_function_is_not_affine() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let prop = x.sin().analyze();
        assert!(!prop.affine);
        assert!(prop.coefficient(&x).is_some());

        let prop = (&x * 2.0).exp().analyze();
        assert!(!prop.affine);
    }

    #[test]
    fn test_shared_subexpression_analyzed_once() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        // The shared term feeds two parents; combination must not double it
        // beyond the two genuine references.
        let shared = &x + &y;
        let f = &shared + &shared;
        let prop = f.analyze();
        assert!(prop.affine);
        assert_eq!(prop.coefficient(&x), Some(2.0));
        assert_eq!(prop.coefficient(&y), Some(2.0));
    }

    #[test]
    fn test_canceled_operand_still_poisons_product() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        // x - x carries a canceled-but-present coefficient, so this product
        // is bilinear, not a constant scaling.
        let zeroish = &x - &x;
        let prop = (&zeroish * &y).analyze();
        assert!(!prop.affine);
    }
}
