//! Executes compiled programs.

use rayon::prelude::*;
use smallvec::SmallVec;

use super::bytecode::{Program, Step};
use super::ComputeError;

pub struct Engine;

impl Engine {
    /// Executes `program` against one input row, reusing `buffer` as the
    /// slot file. The input-length barrier runs once, before the hot loop;
    /// inside it every slot read is into already-populated positions by the
    /// compiler's topological ordering.
    pub fn run(
        program: &Program,
        values: &[f64],
        buffer: &mut Vec<f64>,
    ) -> Result<(), ComputeError> {
        if values.len() != program.input_count {
            return Err(ComputeError::InputLengthMismatch {
                expected: program.input_count,
                actual: values.len(),
            });
        }

        buffer.clear();
        buffer.resize(program.steps.len(), 0.0);

        for (slot, step) in program.steps.iter().enumerate() {
            let result = match *step {
                Step::Const(c) => c,
                Step::Input(i) => values[i as usize],
                Step::Op { kind, args_start, args_len } => {
                    let operands: SmallVec<[f64; 4]> = program
                        .operand_slots(args_start, args_len)
                        .iter()
                        .map(|&s| buffer[s as usize])
                        .collect();
                    match kind.apply(&operands) {
                        Some(v) => v,
                        None => {
                            return Err(ComputeError::DivisionByZero {
                                node: kind.symbol().to_string(),
                            })
                        }
                    }
                }
            };
            buffer[slot] = result;
        }

        Ok(())
    }
}

impl Program {
    /// One-shot evaluation with a per-call buffer. Allocates nothing shared,
    /// so it may be called from many threads at once.
    pub fn evaluate(&self, values: &[f64]) -> Result<Vec<f64>, ComputeError> {
        let mut buffer = vec![0.0; self.steps.len()];
        Engine::run(self, values, &mut buffer)?;
        Ok(self.outputs.iter().map(|&s| buffer[s as usize]).collect())
    }

    /// Evaluates many input rows in parallel, one results buffer per row.
    pub fn evaluate_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ComputeError> {
        rows.par_iter().map(|row| self.evaluate(row)).collect()
    }
}

/// Reusable evaluation handle: one program plus one owned slot buffer, for
/// callers replaying the same expression against many assignments without
/// per-call allocation.
#[derive(Debug, Clone)]
pub struct Evaluator {
    program: Program,
    buffer: Vec<f64>,
}

impl Evaluator {
    pub fn new(program: Program) -> Self {
        let buffer = vec![0.0; program.len()];
        Evaluator { program, buffer }
    }

    pub fn program(&self) -> &Program { &self.program }

    pub fn eval(&mut self, values: &[f64]) -> Result<(), ComputeError> {
        Engine::run(&self.program, values, &mut self.buffer)
    }

    /// Result at the first output slot of the last successful `eval`.
    pub fn value(&self) -> f64 {
        self.buffer[self.program.outputs[0] as usize]
    }

    /// All output results of the last successful `eval`, in compile order.
    pub fn values(&self) -> Vec<f64> {
        self.program.outputs.iter().map(|&s| self.buffer[s as usize]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Expr, ExprGraph};

    // Replays the program and the tree walker against the same assignments
    // and checks they agree.
    fn assert_equivalent(f: &Expr, vars: &[Expr], rows: &[Vec<f64>]) {
        let program = f.compile(vars).unwrap();
        let mut evaluator = Evaluator::new(program);

        for row in rows {
            for (var, &v) in vars.iter().zip(row) {
                var.set_value(v).unwrap();
            }
            evaluator.eval(row).unwrap();
            let walked = f.value().unwrap();
            assert!(
                (evaluator.value() - walked).abs() < 1e-12,
                "compiled {} != walked {}",
                evaluator.value(),
                walked
            );
        }
    }

    #[test]
    fn test_compiled_matches_tree_walk() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        let f = (3.0 * &x + 10.0).sin() * (&y - &x * &y).cos();
        assert_equivalent(
            &f,
            &[x, y],
            &[
                vec![0.0, 0.0],
                vec![1.5, -2.0],
                vec![-0.25, 10.0],
                vec![3.25, 0.5],
            ],
        );
    }

    #[test]
    fn test_compiled_matches_tree_walk_with_sharing() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        let shared = &x * &y + 1.0;
        let f = &shared.exp() / &shared;
        assert_equivalent(&f, &[x, y], &[vec![1.0, 2.0], vec![-0.5, 0.25]]);
    }

    #[test]
    fn test_repeated_eval_with_fresh_inputs() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let f = &x * &x + 1.0;

        let mut e = Evaluator::new(f.compile(&[x]).unwrap());
        e.eval(&[3.0]).unwrap();
        assert_eq!(e.value(), 10.0);
        e.eval(&[5.0]).unwrap();
        assert_eq!(e.value(), 26.0);
    }

    #[test]
    fn test_multiple_outputs() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);

        let f1 = &x + &y;
        let f2 = &x * &y;
        let program = Program::compile(&g, &[f1, f2], &[x, y]).unwrap();
        assert_eq!(program.evaluate(&[3.0, 4.0]).unwrap(), vec![7.0, 12.0]);
    }

    #[test]
    fn test_input_length_barrier() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);
        let f = &x + &y;

        let program = f.compile(&[x, y]).unwrap();
        let err = program.evaluate(&[1.0]).unwrap_err();
        assert_eq!(err, ComputeError::InputLengthMismatch { expected: 2, actual: 1 });
    }

    #[test]
    fn test_runtime_division_by_zero() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);
        let f = &x / &y;

        let program = f.compile(&[x, y]).unwrap();
        assert!(program.evaluate(&[1.0, 2.0]).is_ok());
        let err = program.evaluate(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, ComputeError::DivisionByZero { .. }));
    }

    #[test]
    fn test_batch_matches_sequential() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let y = g.variable("y", 0.0);
        let f = (&x - &y) * (&x + &y);

        let program = f.compile(&[x, y]).unwrap();
        let rows: Vec<Vec<f64>> =
            (0..64).map(|i| vec![i as f64 * 0.5, 32.0 - i as f64]).collect();

        let batched = program.evaluate_batch(&rows).unwrap();
        for (row, out) in rows.iter().zip(&batched) {
            assert_eq!(out, &program.evaluate(row).unwrap());
        }
    }

    #[test]
    fn test_constants_are_embedded() {
        let g = ExprGraph::new();
        let x = g.variable("x", 0.0);
        let f = &x + 2.5;

        let program = f.compile(&[x]).unwrap();
        assert_eq!(program.evaluate(&[1.0]).unwrap(), vec![3.5]);
    }
}
