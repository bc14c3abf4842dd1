//! Restarted GMRES with right preconditioning
//!
//! Solves `A P^{-1} y = b`, `x = P^{-1} y`. The least squares problem of
//! the Arnoldi process is updated with Givens rotations, so the residual
//! norm is available in every iteration without extra operator
//! applications.
use super::{KrylovVector, LinearOperator, Preconditioner, SolverControl};
use crate::error::Result;
use crate::parameters::KrylovParameters;
use ndarray::{Array1, Array2};

/// Solve `A x = b`, *x* holds the initial guess on entry
///
/// A Krylov space size (`params.restart`) of zero means no restarts.
///
/// # Errors
/// Failure of operator or preconditioner
pub fn gmres<V, A, P>(op: &A, prec: &P, x: &mut V, b: &V, params: &KrylovParameters) -> Result<SolverControl>
where
    V: KrylovVector,
    A: LinearOperator<V>,
    P: Preconditioner<V>,
{
    let mut r = b.clone();
    residual(op, x, b, &mut r)?;
    let mut beta = r.norm();
    let initial_residual = beta;
    let tol = SolverControl::tolerance(params, initial_residual);
    if beta <= tol {
        return Ok(SolverControl::immediate(beta));
    }
    let m = if params.restart == 0 {
        params.max_iter
    } else {
        params.restart.min(params.max_iter)
    };

    let mut iterations = 0;
    let mut res = beta;
    let mut z = b.clone();
    let mut w = b.clone();
    loop {
        let mut basis: Vec<V> = Vec::with_capacity(m + 1);
        r.scale(1. / beta);
        basis.push(r.clone());
        let mut h = Array2::<f64>::zeros((m + 1, m));
        let mut g = Array1::<f64>::zeros(m + 1);
        let mut cs = vec![0.; m];
        let mut sn = vec![0.; m];
        g[0] = beta;

        let mut k = 0;
        while k < m {
            prec.apply(&mut z, &basis[k])?;
            z.update_ghost_values();
            op.vmult(&mut w, &z)?;
            // modified Gram-Schmidt
            for (i, v) in basis.iter().enumerate() {
                h[[i, k]] = w.dot(v);
                w.add_scaled(-h[[i, k]], v);
            }
            let h_next = w.norm();
            h[[k + 1, k]] = h_next;
            for i in 0..k {
                let (a, c) = (h[[i, k]], h[[i + 1, k]]);
                h[[i, k]] = cs[i] * a + sn[i] * c;
                h[[i + 1, k]] = -sn[i] * a + cs[i] * c;
            }
            let (a, c) = (h[[k, k]], h[[k + 1, k]]);
            let denom = a.hypot(c);
            cs[k] = if denom == 0. { 1. } else { a / denom };
            sn[k] = if denom == 0. { 0. } else { c / denom };
            h[[k, k]] = denom;
            h[[k + 1, k]] = 0.;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];
            iterations += 1;
            k += 1;
            res = g[k].abs();
            if res <= tol || iterations >= params.max_iter || h_next == 0. {
                break;
            }
            let mut v = w.clone();
            v.scale(1. / h_next);
            basis.push(v);
        }

        // back substitution of the triangular k x k system
        let mut y = vec![0.; k];
        for i in (0..k).rev() {
            let mut s = g[i];
            for j in i + 1..k {
                s -= h[[i, j]] * y[j];
            }
            y[i] = s / h[[i, i]];
        }
        w.zero_out();
        for (yi, v) in y.iter().zip(basis.iter()) {
            w.add_scaled(*yi, v);
        }
        prec.apply(&mut z, &w)?;
        x.add_scaled(1., &z);

        if res <= tol || iterations >= params.max_iter {
            break;
        }
        residual(op, x, b, &mut r)?;
        beta = r.norm();
        res = beta;
        if beta <= tol {
            break;
        }
    }
    Ok(SolverControl {
        iterations,
        initial_residual,
        final_residual: res,
        converged: res <= tol,
    })
}

/// `r = b - A x`
fn residual<V, A>(op: &A, x: &mut V, b: &V, r: &mut V) -> Result<()>
where
    V: KrylovVector,
    A: LinearOperator<V>,
{
    x.update_ghost_values();
    op.vmult(r, x)?;
    r.sadd(-1., 1., b);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::test_utils::{approx_eq, tridiagonal, Dense, Jacobi};
    use crate::solver::IdentityPreconditioner;

    #[test]
    fn test_gmres_nonsymmetric() {
        let n = 30;
        let a = tridiagonal(n, 0.4);
        let x_exact = Array1::from_shape_fn(n, |i| (i as f64 * 0.3).sin());
        let b = a.dot(&x_exact);
        let params = KrylovParameters {
            abs_tol: 1e-13,
            rel_tol: 1e-12,
            max_iter: 300,
            restart: 20,
        };
        let mut x = Array1::zeros(n);
        let control = gmres(&Dense(a.clone()), &Jacobi(a.diag().to_owned()), &mut x, &b, &params).unwrap();
        assert!(control.converged);
        approx_eq(&x, &x_exact, 1e-9);
    }

    #[test]
    fn test_gmres_reports_non_convergence() {
        let n = 40;
        let a = tridiagonal(n, 0.);
        let b = Array1::from_elem(n, 1.);
        let params = KrylovParameters {
            abs_tol: 1e-14,
            rel_tol: 1e-14,
            max_iter: 3,
            restart: 0,
        };
        let mut x = Array1::zeros(n);
        let control = gmres(&Dense(a), &IdentityPreconditioner, &mut x, &b, &params).unwrap();
        assert!(!control.converged);
        assert_eq!(control.iterations, 3);
        assert!(control.final_residual < control.initial_residual);
    }

    #[test]
    fn test_exact_initial_guess() {
        let a = tridiagonal(5, 0.);
        let x_exact = Array1::from_elem(5, 2.);
        let b = a.dot(&x_exact);
        let mut x = x_exact.clone();
        let control = gmres(&Dense(a), &IdentityPreconditioner, &mut x, &b, &KrylovParameters::default()).unwrap();
        assert_eq!(control.iterations, 0);
    }
}
