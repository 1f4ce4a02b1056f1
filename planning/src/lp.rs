//! Thin abstraction over a mixed-integer LP solver.
//!
//! The toolchain does not bind any concrete solver; an adapter implementing
//! [`LpSolver`] is supplied by the embedder. The surface is the minimum the
//! fam-group inference needs: objective coefficients, rows with a right-hand
//! side and sense, binary variables, and maximizing solves.

use anyhow::Result;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// One LP/ILP model instance. Row and column indices are zero-based.
pub trait LpModel {
    fn num_rows(&self) -> usize;
    fn add_row(&mut self, rhs: f64, sense: Sense) -> usize;
    fn set_rhs(&mut self, row: usize, rhs: f64, sense: Sense);
    fn set_coef(&mut self, row: usize, col: usize, coef: f64);
    fn set_obj(&mut self, col: usize, coef: f64);
    fn set_var_binary(&mut self, col: usize);
    /// Maximizes the objective. `Ok(None)` means infeasible; backend
    /// failures are errors.
    fn solve(&mut self) -> Result<Option<(f64, Vec<f64>)>>;
}

/// Factory for [`LpModel`]s, typically a zero-sized adapter per backend.
pub trait LpSolver {
    fn new_model(&self, cols: usize) -> Box<dyn LpModel>;
}
