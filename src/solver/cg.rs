//! Preconditioned conjugate gradients
use super::{KrylovVector, LinearOperator, Preconditioner, SolverControl};
use crate::error::Result;
use crate::parameters::KrylovParameters;

/// Solve `A x = b` for symmetric positive (semi-)definite `A`, *x* holds
/// the initial guess on entry. For semi-definite `A`, *b* must lie in
/// the range of `A`.
///
/// # Errors
/// Failure of operator or preconditioner
pub fn cg<V, A, P>(op: &A, prec: &P, x: &mut V, b: &V, params: &KrylovParameters) -> Result<SolverControl>
where
    V: KrylovVector,
    A: LinearOperator<V>,
    P: Preconditioner<V>,
{
    let mut r = b.clone();
    x.update_ghost_values();
    op.vmult(&mut r, x)?;
    r.sadd(-1., 1., b);
    let initial_residual = r.norm();
    let tol = SolverControl::tolerance(params, initial_residual);
    if initial_residual <= tol {
        return Ok(SolverControl::immediate(initial_residual));
    }

    let mut z = b.clone();
    prec.apply(&mut z, &r)?;
    let mut p = z.clone();
    let mut q = b.clone();
    let mut rz = r.dot(&z);
    let mut res = initial_residual;
    let mut iterations = 0;
    while iterations < params.max_iter {
        p.update_ghost_values();
        op.vmult(&mut q, &p)?;
        let alpha = rz / p.dot(&q);
        x.add_scaled(alpha, &p);
        r.add_scaled(-alpha, &q);
        res = r.norm();
        iterations += 1;
        if res <= tol {
            break;
        }
        prec.apply(&mut z, &r)?;
        let rz_new = r.dot(&z);
        p.sadd(rz_new / rz, 1., &z);
        rz = rz_new;
    }
    Ok(SolverControl {
        iterations,
        initial_residual,
        final_residual: res,
        converged: res <= tol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::test_utils::{approx_eq, tridiagonal, Dense, Jacobi};
    use ndarray::Array1;

    #[test]
    fn test_cg_spd() {
        let n = 25;
        let a = tridiagonal(n, 0.);
        let x_exact = Array1::from_shape_fn(n, |i| 1. + (i as f64).cos());
        let b = a.dot(&x_exact);
        let mut x = Array1::zeros(n);
        let params = KrylovParameters {
            abs_tol: 1e-14,
            rel_tol: 1e-13,
            max_iter: 100,
            restart: 0,
        };
        let control = cg(&Dense(a.clone()), &Jacobi(a.diag().to_owned()), &mut x, &b, &params).unwrap();
        assert!(control.converged);
        assert!(control.iterations <= n + 5);
        approx_eq(&x, &x_exact, 1e-10);
    }
}
