//! # Iterative linear solvers
//!
//! Krylov methods operate on distributed vectors through the
//! [`KrylovVector`] trait, operators and preconditioners are applied
//! matrix-free through [`LinearOperator`] and [`Preconditioner`].
//!
//! Non-convergence is not an error: the solvers return the best iterate
//! together with a [`SolverControl`] reporting what happened.
#![allow(clippy::module_name_repetitions)]
pub mod cg;
pub mod gmres;
pub mod poisson;
pub use cg::cg;
pub use gmres::gmres;
pub use poisson::{PoissonSolver, SipgPoisson};

use crate::error::Result;
use crate::field::BlockVector;
use crate::parameters::KrylovParameters;

/// Vector space operations needed by Krylov methods
pub trait KrylovVector: Clone {
    /// Global scalar product
    fn dot(&self, other: &Self) -> f64;

    /// `self += a * x`
    fn add_scaled(&mut self, a: f64, x: &Self);

    /// `self = a * self + b * x`
    fn sadd(&mut self, a: f64, b: f64, x: &Self);

    /// `self *= a`
    fn scale(&mut self, a: f64);

    /// Set all entries zero
    fn zero_out(&mut self);

    /// Make values read across partition boundaries up to date
    fn update_ghost_values(&mut self);

    /// Global l2 norm
    fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
}

impl KrylovVector for BlockVector {
    fn dot(&self, other: &Self) -> f64 {
        BlockVector::dot(self, other)
    }

    fn add_scaled(&mut self, a: f64, x: &Self) {
        BlockVector::add_scaled(self, a, x);
    }

    fn sadd(&mut self, a: f64, b: f64, x: &Self) {
        BlockVector::sadd(self, a, b, x);
    }

    fn scale(&mut self, a: f64) {
        BlockVector::scale(self, a);
    }

    fn zero_out(&mut self) {
        BlockVector::zero_out(self);
    }

    fn update_ghost_values(&mut self) {
        BlockVector::update_ghost_values(self);
    }
}

/// Matrix-free operator `dst = A src`. *src* holds up to date ghost
/// values.
pub trait LinearOperator<V> {
    /// Apply the operator
    ///
    /// # Errors
    /// Failure inside the operator evaluation
    fn vmult(&self, dst: &mut V, src: &V) -> Result<()>;
}

/// Approximate inverse `dst = P^{-1} src`
pub trait Preconditioner<V> {
    /// Apply the preconditioner
    ///
    /// # Errors
    /// Failure inside the preconditioner (e.g. local solves)
    fn apply(&self, dst: &mut V, src: &V) -> Result<()>;
}

/// No preconditioning
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl<V: KrylovVector> Preconditioner<V> for IdentityPreconditioner {
    fn apply(&self, dst: &mut V, src: &V) -> Result<()> {
        *dst = src.clone();
        Ok(())
    }
}

/// Outcome of an iterative solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverControl {
    /// Number of iterations
    pub iterations: usize,
    /// Residual norm of the initial guess
    pub initial_residual: f64,
    /// Residual norm at exit
    pub final_residual: f64,
    /// Tolerance reached
    pub converged: bool,
}

impl SolverControl {
    /// Residual norm to reach for *params*, given the initial residual
    pub fn tolerance(params: &KrylovParameters, initial_residual: f64) -> f64 {
        params.abs_tol.max(params.rel_tol * initial_residual)
    }

    /// Converged without a single iteration
    pub fn immediate(residual: f64) -> Self {
        Self {
            iterations: 0,
            initial_residual: residual,
            final_residual: residual,
            converged: true,
        }
    }

    /// Log non-convergence
    pub fn warn_if_not_converged(&self, name: &str) {
        if !self.converged {
            tracing::warn!(
                "{} solver did not converge in {} iterations (residual {:e} -> {:e}), continuing",
                name,
                self.iterations,
                self.initial_residual,
                self.final_residual
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    //! Small dense test problems
    use super::{KrylovVector, LinearOperator, Preconditioner};
    use crate::error::Result;
    use ndarray::{Array1, Array2, ArrayBase, Data, Dimension};

    /// Panic with the offending values if any entry differs by more than *tol*
    pub fn approx_eq<S, D>(result: &ArrayBase<S, D>, expected: &ArrayBase<S, D>, tol: f64)
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        for (a, b) in expected.iter().zip(result.iter()) {
            if (a - b).abs() > tol {
                panic!("Large difference of values, got {} expected {}.", b, a)
            }
        }
    }

    impl KrylovVector for Array1<f64> {
        fn dot(&self, other: &Self) -> f64 {
            ndarray::ArrayBase::<_, ndarray::Ix1>::dot(self, other)
        }

        fn add_scaled(&mut self, a: f64, x: &Self) {
            self.scaled_add(a, x);
        }

        fn sadd(&mut self, a: f64, b: f64, x: &Self) {
            self.zip_mut_with(x, |s, x| *s = a * *s + b * x);
        }

        fn scale(&mut self, a: f64) {
            self.mapv_inplace(|x| a * x);
        }

        fn zero_out(&mut self) {
            self.fill(0.);
        }

        fn update_ghost_values(&mut self) {}
    }

    /// Dense matrix as operator
    pub struct Dense(pub Array2<f64>);

    impl LinearOperator<Array1<f64>> for Dense {
        fn vmult(&self, dst: &mut Array1<f64>, src: &Array1<f64>) -> Result<()> {
            *dst = self.0.dot(src);
            Ok(())
        }
    }

    /// Inverse diagonal
    pub struct Jacobi(pub Array1<f64>);

    impl Preconditioner<Array1<f64>> for Jacobi {
        fn apply(&self, dst: &mut Array1<f64>, src: &Array1<f64>) -> Result<()> {
            *dst = src / &self.0;
            Ok(())
        }
    }

    /// `n x n` tridiagonal matrix, optionally with convection
    pub fn tridiagonal(n: usize, convection: f64) -> Array2<f64> {
        Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                2. + 0.1 * i as f64
            } else if i + 1 == j {
                -1. + convection
            } else if j + 1 == i {
                -1. - convection
            } else {
                0.
            }
        })
    }
}
