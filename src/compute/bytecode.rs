//! The compiled execution tape for repeated evaluation.

use std::fmt;

use crate::analysis::topology;
use crate::graph::{Expr, ExprGraph, NodeKind, OpKind};

use super::ComputeError;

/// One slot-producing operation record. Step `i` always writes slot `i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Embedded constant value.
    Const(f64),
    /// Runtime input: value taken from the i-th entry of the input row.
    Input(u32),
    /// Operator applied to already-populated operand slots; operand slot
    /// indices live in the program's argument pool at the given range.
    Op { kind: OpKind, args_start: u32, args_len: u32 },
}

/// A flat, topologically ordered program: one step per **distinct** node
/// reachable from the outputs, shared nodes compiled exactly once and
/// referenced by slot index thereafter. Immutable once built; safe to
/// evaluate concurrently with per-call buffers.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) steps: Vec<Step>,
    /// Operand slot pool referenced by `Step::Op` ranges.
    pub(crate) args: Vec<u32>,
    /// Result slot per requested output, in request order.
    pub(crate) outputs: Vec<u32>,
    pub(crate) input_count: usize,
}

impl Program {
    /// Compiles the subgraph reachable from `outputs` against the input
    /// ordering `inputs`. Every `inputs[i]` must be a Variable node; every
    /// Variable reachable from the outputs must appear in `inputs`.
    ///
    /// Slot assignment follows one deterministic depth-first order, so
    /// compiling the same graph twice yields the same program.
    pub fn compile(
        graph: &ExprGraph,
        outputs: &[Expr],
        inputs: &[Expr],
    ) -> Result<Program, ComputeError> {
        for e in outputs.iter().chain(inputs) {
            assert!(
                std::rc::Rc::ptr_eq(&graph.inner, &e.graph().inner),
                "expressions belong to different graphs"
            );
        }
        let reg = graph.inner.borrow();

        // Input slot lookup, keyed by arena index.
        let mut input_of = vec![u32::MAX; reg.count()];
        for (i, var) in inputs.iter().enumerate() {
            if !reg.is_variable(var.id()) {
                return Err(ComputeError::NotAnInput { name: reg.label(var.id()) });
            }
            input_of[var.id().index()] = i as u32;
        }

        let roots: Vec<_> = outputs.iter().map(|e| e.id()).collect();
        let order = topology::sort_reachable(&reg, &roots)?;

        // One step per distinct node; slot = position in the execution order.
        let mut layout = vec![u32::MAX; reg.count()];
        let mut steps = Vec::with_capacity(order.len());
        let mut args = Vec::new();

        for (slot, &id) in order.iter().enumerate() {
            layout[id.index()] = slot as u32;
            let step = match &reg.kinds[id.index()] {
                NodeKind::Constant(c) => Step::Const(*c),
                NodeKind::Variable { name } => {
                    let input_idx = input_of[id.index()];
                    if input_idx == u32::MAX {
                        return Err(ComputeError::UnboundVariable { name: name.clone() });
                    }
                    Step::Input(input_idx)
                }
                NodeKind::Function(op) => {
                    let args_start = args.len() as u32;
                    for arg in reg.get_args(id) {
                        args.push(layout[arg.index()]);
                    }
                    Step::Op { kind: *op, args_start, args_len: args.len() as u32 - args_start }
                }
            };
            steps.push(step);
        }

        let out_slots = roots.iter().map(|id| layout[id.index()]).collect();

        Ok(Program { steps, args, outputs: out_slots, input_count: inputs.len() })
    }

    /// Number of steps, which equals the number of distinct compiled nodes.
    pub fn len(&self) -> usize { self.steps.len() }

    pub fn is_empty(&self) -> bool { self.steps.is_empty() }

    pub fn input_count(&self) -> usize { self.input_count }

    pub fn output_count(&self) -> usize { self.outputs.len() }

    pub(crate) fn operand_slots(&self, args_start: u32, args_len: u32) -> &[u32] {
        &self.args[args_start as usize..(args_start + args_len) as usize]
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (slot, step) in self.steps.iter().enumerate() {
            match step {
                Step::Const(c) => writeln!(f, "s{:<4} = const {}", slot, c)?,
                Step::Input(i) => writeln!(f, "s{:<4} = input[{}]", slot, i)?,
                Step::Op { kind, args_start, args_len } => {
                    write!(f, "s{:<4} = {}", slot, kind.symbol())?;
                    for operand in self.operand_slots(*args_start, *args_len) {
                        write!(f, " s{}", operand)?;
                    }
                    writeln!(f)?;
                }
            }
        }
        write!(f, "out  ")?;
        for out in &self.outputs {
            write!(f, " s{}", out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ExprGraph;

    #[test]
    fn test_one_step_per_distinct_node() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        // 4 distinct nodes (x, y, x+y, mul), 6 total argument references.
        let shared = &x + &y;
        let f = &shared * &shared;
        let program = f.compile(&[x, y]).unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(program.output_count(), 1);
    }

    #[test]
    fn test_unbound_variable_is_rejected() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);
        let f = &x + &y;

        let err = f.compile(&[x]).unwrap_err();
        assert_eq!(err, ComputeError::UnboundVariable { name: "y".to_string() });
    }

    #[test]
    fn test_non_variable_input_is_rejected() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let c = g.constant(1.0);
        let f = &x + 1.0;

        let err = f.compile(&[x, c]).unwrap_err();
        assert!(matches!(err, ComputeError::NotAnInput { .. }));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);
        let f = (&x * &y + 1.0).sin();

        let p1 = f.compile(&[x.clone(), y.clone()]).unwrap();
        let p2 = f.compile(&[x, y]).unwrap();
        assert_eq!(p1.steps, p2.steps);
        assert_eq!(p1.args, p2.args);
        assert_eq!(p1.outputs, p2.outputs);
    }

    #[test]
    fn test_display_lists_steps() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let f = x.sin() * 2.0;
        let listing = f.compile(&[x]).unwrap().to_string();

        assert!(listing.contains("input[0]"));
        assert!(listing.contains("sin"));
        assert!(listing.contains("multiply"));
    }
}
