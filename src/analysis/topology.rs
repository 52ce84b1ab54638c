//! Reachable-subgraph ordering over the expression arena.

use crate::compute::ComputeError;
use crate::graph::{NodeId, Registry};

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // Used for cycle detection
    Visited,
}

/// DFS post-order of every node reachable from `roots`: arguments always
/// appear before the nodes that consume them, and a node shared by several
/// parents appears exactly once.
///
/// Construction cannot create cycles, but deserialized payloads are sorted
/// through here too, so the tri-state marks keep a corrupt graph from
/// looping.
pub fn sort_reachable(reg: &Registry, roots: &[NodeId]) -> Result<Vec<NodeId>, ComputeError> {
    let mut order = Vec::with_capacity(reg.count());
    let mut state = vec![VisitState::None; reg.count()];

    for &root in roots {
        visit(root, reg, &mut state, &mut order)?;
    }

    Ok(order)
}

fn visit(
    node: NodeId,
    reg: &Registry,
    state: &mut [VisitState],
    order: &mut Vec<NodeId>,
) -> Result<(), ComputeError> {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return Ok(()),
        VisitState::Visiting => return Err(ComputeError::CycleDetected),
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    for &arg in reg.get_args(node) {
        visit(arg, reg, state, order)?;
    }

    state[idx] = VisitState::Visited;
    order.push(node);
    Ok(())
}

/// Distinct Variable nodes reachable from `root`, in first-visit depth-first
/// order. Each node is visited at most once regardless of sharing.
pub fn collect_variables(reg: &Registry, root: NodeId) -> Vec<NodeId> {
    let mut seen = vec![false; reg.count()];
    let mut out = Vec::new();
    collect(root, reg, &mut seen, &mut out);
    out
}

fn collect(node: NodeId, reg: &Registry, seen: &mut [bool], out: &mut Vec<NodeId>) {
    if seen[node.index()] {
        return;
    }
    seen[node.index()] = true;

    if reg.is_variable(node) {
        out.push(node);
    }
    for &arg in reg.get_args(node) {
        collect(arg, reg, seen, out);
    }
}
