//! Symbolic differentiation over the expression DAG.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::graph::{ExprError, ExprGraph, NodeId, NodeKind, OpKind};

/// Builds a new node representing ∂root/∂var.
///
/// The walk memoizes per node within this invocation (the target variable is
/// fixed, so the node id alone is the key), which keeps the cost linear in
/// graph size: a subexpression reachable through several parents is
/// differentiated once and its derivative node reused. Results go through
/// the canonicalizing constructors, so constant derivatives collapse to a
/// single Constant node.
pub fn derivative(graph: &ExprGraph, root: NodeId, var: NodeId) -> Result<NodeId, ExprError> {
    {
        let reg = graph.inner.borrow();
        if !reg.is_variable(var) {
            return Err(ExprError::NotAVariable { name: reg.label(var) });
        }
    }
    let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
    Ok(diff_node(graph, root, var, &mut memo))
}

fn diff_node(
    graph: &ExprGraph,
    id: NodeId,
    var: NodeId,
    memo: &mut HashMap<NodeId, NodeId>,
) -> NodeId {
    if let Some(&hit) = memo.get(&id) {
        return hit;
    }

    // Copy the node out so no registry borrow is held while building.
    let (kind, args): (NodeKind, SmallVec<[NodeId; 4]>) = {
        let reg = graph.inner.borrow();
        (reg.kinds[id.index()].clone(), reg.get_args(id).iter().copied().collect())
    };

    let result = match kind {
        NodeKind::Constant(_) => graph.constant_id(0.0),
        NodeKind::Variable { .. } => {
            graph.constant_id(if id == var { 1.0 } else { 0.0 })
        }
        NodeKind::Function(op) => diff_function(graph, op, id, &args, var, memo),
    };

    memo.insert(id, result);
    result
}

fn diff_function(
    graph: &ExprGraph,
    op: OpKind,
    id: NodeId,
    args: &[NodeId],
    var: NodeId,
    memo: &mut HashMap<NodeId, NodeId>,
) -> NodeId {
    match op {
        OpKind::Negate => {
            let du = diff_node(graph, args[0], var, memo);
            graph.build(OpKind::Negate, &[du])
        }
        OpKind::Add | OpKind::Sum => {
            let ds: SmallVec<[NodeId; 4]> =
                args.iter().map(|&a| diff_node(graph, a, var, memo)).collect();
            graph.build(OpKind::Add, &ds)
        }
        OpKind::Subtract => {
            let da = diff_node(graph, args[0], var, memo);
            let db = diff_node(graph, args[1], var, memo);
            graph.build(OpKind::Subtract, &[da, db])
        }
        OpKind::Multiply => {
            // a'*b + a*b'
            let (a, b) = (args[0], args[1]);
            let da = diff_node(graph, a, var, memo);
            let db = diff_node(graph, b, var, memo);
            let left = graph.build(OpKind::Multiply, &[da, b]);
            let right = graph.build(OpKind::Multiply, &[a, db]);
            graph.build(OpKind::Add, &[left, right])
        }
        OpKind::Divide => {
            // (a'*b - a*b') / b^2
            let (a, b) = (args[0], args[1]);
            let da = diff_node(graph, a, var, memo);
            let db = diff_node(graph, b, var, memo);
            let left = graph.build(OpKind::Multiply, &[da, b]);
            let right = graph.build(OpKind::Multiply, &[a, db]);
            let num = graph.build(OpKind::Subtract, &[left, right]);
            let den = graph.build(OpKind::Multiply, &[b, b]);
            graph.build(OpKind::Divide, &[num, den])
        }
        OpKind::Sin => {
            let u = args[0];
            let du = diff_node(graph, u, var, memo);
            let cos = graph.build(OpKind::Cos, &[u]);
            graph.build(OpKind::Multiply, &[cos, du])
        }
        OpKind::Cos => {
            let u = args[0];
            let du = diff_node(graph, u, var, memo);
            let sin = graph.build(OpKind::Sin, &[u]);
            let prod = graph.build(OpKind::Multiply, &[sin, du]);
            graph.build(OpKind::Negate, &[prod])
        }
        OpKind::Sinh => {
            let u = args[0];
            let du = diff_node(graph, u, var, memo);
            let cosh = graph.build(OpKind::Cosh, &[u]);
            graph.build(OpKind::Multiply, &[cosh, du])
        }
        OpKind::Cosh => {
            let u = args[0];
            let du = diff_node(graph, u, var, memo);
            let sinh = graph.build(OpKind::Sinh, &[u]);
            graph.build(OpKind::Multiply, &[sinh, du])
        }
        OpKind::Exp => {
            // The node itself is the factor: shares the existing subgraph.
            let du = diff_node(graph, args[0], var, memo);
            graph.build(OpKind::Multiply, &[id, du])
        }
        OpKind::Log => {
            let u = args[0];
            let du = diff_node(graph, u, var, memo);
            graph.build(OpKind::Divide, &[du, u])
        }
    }
}
