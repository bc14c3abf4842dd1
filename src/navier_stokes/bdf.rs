//! Coefficients of the BDF time integrator with extrapolation
//!
//! `(gamma0 u^{n+1} - sum_i alpha_i u^{n-i}) / dt = sum_i beta_i N(u^{n-i}) + ...`
//!
//! The order ramps up during the first steps, step `s` uses order
//! `min(s, order)`.
use crate::field::history::HISTORY_LEN;

/// Coefficients of one time step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BdfCoefficients {
    /// Order
    pub order: usize,
    /// Coefficient of the new time level
    pub gamma0: f64,
    /// Coefficients of the old time levels n, n-1, n-2
    pub alpha: [f64; HISTORY_LEN],
    /// Extrapolation coefficients of the old time levels
    pub beta: [f64; HISTORY_LEN],
}

impl BdfCoefficients {
    /// Coefficients of fixed order
    ///
    /// # Panics
    /// Order not in 1..=3
    pub fn for_order(order: usize) -> Self {
        match order {
            1 => Self {
                order,
                gamma0: 1.,
                alpha: [1., 0., 0.],
                beta: [1., 0., 0.],
            },
            2 => Self {
                order,
                gamma0: 1.5,
                alpha: [2., -0.5, 0.],
                beta: [2., -1., 0.],
            },
            3 => Self {
                order,
                gamma0: 11. / 6.,
                alpha: [3., -1.5, 1. / 3.],
                beta: [3., -3., 1.],
            },
            _ => panic!("BDF order {} not supported", order),
        }
    }

    /// Coefficients of step *step_number* (starting at 1) for a scheme
    /// of order *order*
    pub fn new(order: usize, step_number: usize) -> Self {
        Self::for_order(order.min(step_number.max(1)))
    }

    /// The first step must be of first order, anything else uses
    /// history which does not exist yet
    ///
    /// # Panics
    /// Coefficients of step 1 are not `gamma0 = 1, alpha = beta = (1, 0, 0)`
    pub fn assert_start_up(&self, step_number: usize) {
        if step_number == 1 {
            assert!(
                (self.gamma0 - 1.).abs() < f64::EPSILON
                    && self.alpha == [1., 0., 0.]
                    && self.beta == [1., 0., 0.],
                "BDF coefficients of the first step are not of first order: {:?}",
                self
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_up() {
        assert_eq!(BdfCoefficients::new(3, 1).order, 1);
        assert_eq!(BdfCoefficients::new(3, 2).order, 2);
        assert_eq!(BdfCoefficients::new(3, 7).order, 3);
        assert_eq!(BdfCoefficients::new(2, 7).order, 2);
        BdfCoefficients::new(3, 1).assert_start_up(1);
    }

    #[test]
    fn test_consistency() {
        // sum alpha = gamma0 (constants are steady), sum beta = 1
        for order in 1..=3 {
            let c = BdfCoefficients::for_order(order);
            assert!((c.alpha.iter().sum::<f64>() - c.gamma0).abs() < 1e-14);
            assert!((c.beta.iter().sum::<f64>() - 1.).abs() < 1e-14);
        }
    }

    #[test]
    #[should_panic]
    fn test_second_order_start_panics() {
        BdfCoefficients::for_order(2).assert_start_up(1);
    }
}
