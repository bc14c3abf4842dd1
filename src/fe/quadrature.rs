//! One dimensional quadrature rules and Lagrange polynomials on `[-1, 1]`
use std::f64::consts::PI;

/// Legendre polynomials `P_n(x)` and `P_{n-1}(x)`
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let (mut p0, mut p1) = (1., x);
    if n == 0 {
        return (1., 0.);
    }
    for k in 2..=n {
        let k = k as f64;
        let p2 = ((2. * k - 1.) * x * p1 - (k - 1.) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    (p1, p0)
}

/// Gauss-Legendre points and weights with *n* points, ascending
///
/// # Panics
/// `n == 0`
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n > 0, "Quadrature needs at least one point");
    let mut points = vec![0.; n];
    let mut weights = vec![0.; n];
    let nf = n as f64;
    for i in 0..n {
        let mut x = -(PI * (i as f64 + 0.75) / (nf + 0.5)).cos();
        for _ in 0..100 {
            let (p, pm1) = legendre(n, x);
            let dx = p / (nf * (x * p - pm1) / (x * x - 1.));
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (p, pm1) = legendre(n, x);
        let dp = nf * (x * p - pm1) / (x * x - 1.);
        points[i] = x;
        weights[i] = 2. / ((1. - x * x) * dp * dp);
    }
    (points, weights)
}

/// Gauss-Lobatto points with *n* points, ascending. A single point
/// sits at the cell center.
pub fn gauss_lobatto(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![0.];
    }
    let deg = n - 1;
    let nf = n as f64;
    (0..n)
        .map(|i| {
            let mut x = -(PI * i as f64 / deg as f64).cos();
            if i == 0 || i == deg {
                return x.round();
            }
            for _ in 0..100 {
                let (p, pm1) = legendre(deg, x);
                let dx = (x * p - pm1) / (nf * p);
                x -= dx;
                if dx.abs() < 1e-15 {
                    break;
                }
            }
            x
        })
        .collect()
}

/// Lagrange polynomials through a set of nodes
#[derive(Debug, Clone)]
pub struct LagrangeBasis {
    nodes: Vec<f64>,
}

impl LagrangeBasis {
    /// Basis through *nodes*
    pub fn new(nodes: Vec<f64>) -> Self {
        Self { nodes }
    }

    /// Number of polynomials
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Basis without polynomials
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Interpolation nodes
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Value of polynomial *i* at *x*
    pub fn value(&self, i: usize, x: f64) -> f64 {
        let xi = self.nodes[i];
        self.nodes
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, xj)| (x - xj) / (xi - xj))
            .product()
    }

    /// Derivative of polynomial *i* at *x*
    pub fn derivative(&self, i: usize, x: f64) -> f64 {
        let xi = self.nodes[i];
        let mut sum = 0.;
        for (m, xm) in self.nodes.iter().enumerate() {
            if m == i {
                continue;
            }
            let mut prod = 1. / (xi - xm);
            for (j, xj) in self.nodes.iter().enumerate() {
                if j != i && j != m {
                    prod *= (x - xj) / (xi - xj);
                }
            }
            sum += prod;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gauss_integrates_polynomials() {
        for n in 1..8 {
            let (x, w) = gauss_legendre(n);
            // exact up to degree 2n - 1
            for deg in 0..2 * n {
                let exact = if deg % 2 == 0 { 2. / (deg as f64 + 1.) } else { 0. };
                let approx: f64 = x.iter().zip(&w).map(|(x, w)| w * x.powi(deg as i32)).sum();
                assert_abs_diff_eq!(approx, exact, epsilon = 1e-13);
            }
        }
    }

    #[test]
    fn test_gauss_lobatto_points() {
        let x = gauss_lobatto(4);
        let r = (1. / 5_f64).sqrt();
        assert_abs_diff_eq!(x[0], -1., epsilon = 1e-15);
        assert_abs_diff_eq!(x[1], -r, epsilon = 1e-14);
        assert_abs_diff_eq!(x[2], r, epsilon = 1e-14);
        assert_abs_diff_eq!(x[3], 1., epsilon = 1e-15);
        assert_eq!(gauss_lobatto(1), vec![0.]);
    }

    #[test]
    fn test_lagrange_basis() {
        let basis = LagrangeBasis::new(gauss_lobatto(3));
        // partition of unity, derivatives sum to zero
        let x = 0.3;
        let sum: f64 = (0..3).map(|i| basis.value(i, x)).sum();
        let dsum: f64 = (0..3).map(|i| basis.derivative(i, x)).sum();
        assert_abs_diff_eq!(sum, 1., epsilon = 1e-14);
        assert_abs_diff_eq!(dsum, 0., epsilon = 1e-14);
        // interpolation of x^2 is exact
        let d: f64 = (0..3)
            .map(|i| basis.nodes()[i].powi(2) * basis.derivative(i, x))
            .sum();
        assert_abs_diff_eq!(d, 2. * x, epsilon = 1e-14);
    }
}
