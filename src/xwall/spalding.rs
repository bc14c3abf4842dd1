//! Spalding's law of the wall
//!
//! In the form `psi = kappa * u+`,
//!
//! `y+ = psi / kappa + exp(-kappa B) (exp(psi) - 1 - psi - psi^2/2 - psi^3/6)`
//!
//! is inverted for `psi` by Newton's method. The enrichment function is
//! `psi(y+)` with `y+ = d sqrt(tau_w) / nu`.
use crate::types::{LaneMask, Vectorized, DIM};
use num_traits::Zero;

/// von Karman constant
pub const KAPPA: f64 = 0.41;

/// Log-law offset
pub const B: f64 = 5.17;

/// Newton stops once residual or increment fall below this value
pub const NEWTON_TOLERANCE: f64 = 1e-14;

/// Newton iteration cap
pub const MAX_NEWTON_ITERATIONS: usize = 1000;

/// Wall shear stress below which the enrichment vanishes
const TAUW_MIN: f64 = 1e-20;

/// Result of the Newton iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaldingSolution {
    /// `kappa * u+`
    pub psi: f64,
    /// Remaining residual
    pub residual: f64,
    /// Last Newton increment, zero if the seed was already converged
    pub increment: f64,
    /// Number of Newton steps
    pub iterations: usize,
}

#[inline]
fn exp_kb() -> f64 {
    (-KAPPA * B).exp()
}

/// `f(psi) - y+`
#[inline]
pub fn spalding_residual(psi: f64, yplus: f64) -> f64 {
    let p2 = psi * psi;
    psi / KAPPA + exp_kb() * (psi.exp() - 1. - psi - 0.5 * p2 - p2 * psi / 6.) - yplus
}

/// `d y+ / d psi`
#[inline]
pub fn spalding_derivative(psi: f64) -> f64 {
    1. / KAPPA + exp_kb() * (psi.exp() - 1. - psi - 0.5 * psi * psi)
}

/// Invert Spalding's law for *yplus* >= 0
///
/// Seeded with the viscous sublayer (`y+ < 11`) or the log-law estimate.
/// Steps are damped such that `psi` never drops below half its value.
///
/// Stops once the residual or the Newton increment falls below
/// [`NEWTON_TOLERANCE`], or after [`MAX_NEWTON_ITERATIONS`] steps. For
/// large `y+` the residual can not drop below the round-off of `y+`
/// (about `1e-16 y+`), there the increment ends the iteration.
pub fn solve_spalding(yplus: f64) -> SpaldingSolution {
    let mut psi = if yplus < 11. {
        KAPPA * yplus
    } else {
        yplus.ln() + KAPPA * B
    };
    let mut residual = spalding_residual(psi, yplus);
    let mut iterations = 0;
    let mut increment = 0.;
    while residual.abs() >= NEWTON_TOLERANCE && iterations < MAX_NEWTON_ITERATIONS {
        increment = residual / spalding_derivative(psi);
        let next = psi - increment;
        psi = if next < 0.5 * psi { 0.5 * psi } else { next };
        residual = spalding_residual(psi, yplus);
        iterations += 1;
        if increment.abs() < NEWTON_TOLERANCE {
            break;
        }
    }
    SpaldingSolution {
        psi,
        residual,
        increment,
        iterations,
    }
}

/// Enrichment function and its gradient at one point
///
/// Gradient by the implicit function theorem,
/// `grad psi = grad y+ / f'(psi)`, with
/// `grad y+ = sqrt(tau)/nu grad d + d/(2 nu sqrt(tau)) grad tau`.
pub fn enrichment_value_and_gradient(
    distance: f64,
    tauw: f64,
    grad_distance: [f64; DIM],
    grad_tauw: [f64; DIM],
    viscosity: f64,
) -> (f64, [f64; DIM]) {
    if tauw < TAUW_MIN {
        return (0., [0.; DIM]);
    }
    let sqrt_tau = tauw.sqrt();
    let yplus = distance * sqrt_tau / viscosity;
    let solution = solve_spalding(yplus);
    let dpsi = 1. / spalding_derivative(solution.psi);
    let mut grad = [0.; DIM];
    for (d, g) in grad.iter_mut().enumerate() {
        let grad_yplus =
            sqrt_tau / viscosity * grad_distance[d] + distance / (2. * viscosity * sqrt_tau) * grad_tauw[d];
        *g = grad_yplus * dpsi;
    }
    (solution.psi, grad)
}

/// Lane-wise [`enrichment_value_and_gradient`], zero on lanes outside *mask*
pub fn enrichment_value_and_gradient_vectorized(
    distance: Vectorized,
    tauw: Vectorized,
    grad_distance: &[Vectorized; DIM],
    grad_tauw: &[Vectorized; DIM],
    viscosity: f64,
    mask: LaneMask,
) -> (Vectorized, [Vectorized; DIM]) {
    let mut psi = Vectorized::zero();
    let mut grad = [Vectorized::zero(); DIM];
    for l in (0..crate::types::LANES).filter(|l| mask.is_set(*l)) {
        let (p, g) = enrichment_value_and_gradient(
            distance[l],
            tauw[l],
            [grad_distance[0][l], grad_distance[1][l]],
            [grad_tauw[0][l], grad_tauw[1][l]],
            viscosity,
        );
        psi[l] = p;
        for d in 0..DIM {
            grad[d][l] = g[d];
        }
    }
    (psi, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newton_converges_and_is_monotone() {
        let mut last = -1.;
        let mut yplus = 0.;
        while yplus < 1e4 {
            let s = solve_spalding(yplus);
            assert!(s.iterations < MAX_NEWTON_ITERATIONS, "no convergence at y+ = {}", yplus);
            assert!(
                s.residual.abs() < NEWTON_TOLERANCE || s.increment.abs() < NEWTON_TOLERANCE,
                "y+ = {}: residual {}, increment {}",
                yplus,
                s.residual,
                s.increment
            );
            // round-off of y+ bounds the residual
            assert!(s.residual.abs() < 1e-13 * yplus.max(1.), "y+ = {}: residual {}", yplus, s.residual);
            assert!(s.psi > last, "psi not increasing at y+ = {}", yplus);
            last = s.psi;
            yplus = yplus * 1.3 + 0.05;
        }
    }

    #[test]
    fn test_limits() {
        // viscous sublayer: u+ = y+
        let s = solve_spalding(0.1);
        assert!((s.psi / KAPPA - 0.1).abs() < 1e-4);
        // log layer
        let yplus = 1000.;
        let s = solve_spalding(yplus);
        assert!((s.psi / KAPPA - (yplus.ln() / KAPPA + B)).abs() < 0.05);
        assert_eq!(solve_spalding(0.).psi, 0.);
    }

    #[test]
    fn test_gradient_by_finite_differences() {
        let nu = 1e-3;
        // linear fields d = 0.01 + 0.2 x, tau = 0.5 + 0.1 x
        let field = |x: f64| {
            enrichment_value_and_gradient(0.01 + 0.2 * x, 0.5 + 0.1 * x, [0.2, 0.], [0.1, 0.], nu)
        };
        let (_, grad) = field(0.3);
        let eps = 1e-6;
        let fd = (field(0.3 + eps).0 - field(0.3 - eps).0) / (2. * eps);
        assert!((grad[0] - fd).abs() < 1e-6 * fd.abs());
        assert_eq!(grad[1], 0.);
    }

    #[test]
    fn test_vectorized_respects_mask() {
        let mask = LaneMask([true, false, true, false]);
        let d = Vectorized::splat(0.1);
        let tau = Vectorized([1., 1., 0., 1.]);
        let zero = [Vectorized::zero(); DIM];
        let (psi, _) = enrichment_value_and_gradient_vectorized(d, tau, &zero, &zero, 1e-2, mask);
        assert!(psi[0] > 0.);
        assert_eq!(psi[1], 0.);
        // vanishing wall shear stress
        assert_eq!(psi[2], 0.);
        assert_eq!(psi[3], 0.);
    }
}
