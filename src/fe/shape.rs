//! Shape function tables on the reference cell `[-1, 1]^2`
use super::quadrature::{gauss_legendre, gauss_lobatto, LagrangeBasis};
use crate::mesh::FACES_PER_CELL;
use crate::types::DIM;
use ndarray::{Array1, Array2, Array3};

/// Nodal tensor product basis of degree *degree* evaluated at the
/// points of a tensor Gauss rule.
///
/// Dofs are numbered lexicographically, `i = ix + (degree + 1) * iy`,
/// quadrature points likewise, `q = qx + n_q_points_1d * qy`. Face
/// quadrature points are numbered along the tangential coordinate, so
/// both cells adjacent to a face use the same numbering.
#[derive(Debug, Clone)]
pub struct ShapeInfo {
    /// Polynomial degree
    pub degree: usize,
    /// Dofs per direction
    pub n_dofs_1d: usize,
    /// Dofs per cell
    pub n_dofs: usize,
    /// Quadrature points per direction
    pub n_q_points_1d: usize,
    /// Quadrature points per cell
    pub n_q_points: usize,
    /// 1D Lagrange basis
    pub basis: LagrangeBasis,
    /// 1D quadrature points
    pub points_1d: Vec<f64>,
    /// 1D quadrature weights
    pub weights_1d: Vec<f64>,
    /// 1D mass matrix on `[-1, 1]`
    pub mass_1d: Array2<f64>,
    /// Cell quadrature weights (reference cell)
    pub weights: Array1<f64>,
    /// Cell quadrature points (reference cell)
    pub points: Vec<[f64; DIM]>,
    /// Shape values `[q, i]`
    pub values: Array2<f64>,
    /// Reference shape gradients `[q, i, d]`
    pub gradients: Array3<f64>,
    /// Face quadrature points (reference cell) per face
    pub face_points: [Vec<[f64; DIM]>; FACES_PER_CELL],
    /// Shape values on faces `[q, i]`
    pub face_values: [Array2<f64>; FACES_PER_CELL],
    /// Reference shape gradients on faces `[q, i, d]`
    pub face_gradients: [Array3<f64>; FACES_PER_CELL],
}

impl ShapeInfo {
    /// Tables of degree *degree* with *n_q_points_1d* Gauss points
    ///
    /// # Panics
    /// `n_q_points_1d == 0`
    pub fn new(degree: usize, n_q_points_1d: usize) -> Self {
        let basis = LagrangeBasis::new(gauss_lobatto(degree + 1));
        let (points_1d, weights_1d) = gauss_legendre(n_q_points_1d);
        let n1 = degree + 1;
        let nq1 = n_q_points_1d;

        let mass_1d = Array2::from_shape_fn((n1, n1), |(i, j)| {
            points_1d
                .iter()
                .zip(&weights_1d)
                .map(|(x, w)| w * basis.value(i, *x) * basis.value(j, *x))
                .sum()
        });

        let mut points = Vec::with_capacity(nq1 * nq1);
        for qy in 0..nq1 {
            for qx in 0..nq1 {
                points.push([points_1d[qx], points_1d[qy]]);
            }
        }
        let weights = Array1::from_shape_fn(nq1 * nq1, |q| weights_1d[q % nq1] * weights_1d[q / nq1]);

        let tabulate = |pts: &[[f64; DIM]]| {
            let values = Array2::from_shape_fn((pts.len(), n1 * n1), |(q, i)| {
                basis.value(i % n1, pts[q][0]) * basis.value(i / n1, pts[q][1])
            });
            let gradients = Array3::from_shape_fn((pts.len(), n1 * n1, DIM), |(q, i, d)| {
                let (ix, iy) = (i % n1, i / n1);
                if d == 0 {
                    basis.derivative(ix, pts[q][0]) * basis.value(iy, pts[q][1])
                } else {
                    basis.value(ix, pts[q][0]) * basis.derivative(iy, pts[q][1])
                }
            });
            (values, gradients)
        };

        let (values, gradients) = tabulate(&points[..]);
        let face_points = [0, 1, 2, 3].map(|face| face_quadrature_points(face, &points_1d));
        let face_tables = [0, 1, 2, 3].map(|face| tabulate(&face_points[face][..]));
        let [t0, t1, t2, t3] = face_tables;

        Self {
            degree,
            n_dofs_1d: n1,
            n_dofs: n1 * n1,
            n_q_points_1d: nq1,
            n_q_points: nq1 * nq1,
            basis,
            points_1d,
            weights_1d,
            mass_1d,
            weights,
            points,
            values,
            gradients,
            face_points,
            face_values: [t0.0, t1.0, t2.0, t3.0],
            face_gradients: [t0.1, t1.1, t2.1, t3.1],
        }
    }

    /// Reference coordinates of dof *i*
    pub fn dof_point(&self, i: usize) -> [f64; DIM] {
        let nodes = self.basis.nodes();
        [nodes[i % self.n_dofs_1d], nodes[i / self.n_dofs_1d]]
    }
}

/// Points of the 1D rule placed on face *face* of the reference cell
pub fn face_quadrature_points(face: usize, points_1d: &[f64]) -> Vec<[f64; DIM]> {
    points_1d
        .iter()
        .map(|&s| match face {
            0 => [-1., s],
            1 => [1., s],
            2 => [s, -1.],
            _ => [s, 1.],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_nodal_basis() {
        let shape = ShapeInfo::new(2, 4);
        assert_eq!(shape.n_dofs, 9);
        assert_eq!(shape.n_q_points, 16);
        // partition of unity in cell and on faces
        for q in 0..shape.n_q_points {
            assert_abs_diff_eq!(shape.values.row(q).sum(), 1., epsilon = 1e-13);
        }
        for face in 0..FACES_PER_CELL {
            for q in 0..shape.n_q_points_1d {
                assert_abs_diff_eq!(shape.face_values[face].row(q).sum(), 1., epsilon = 1e-13);
            }
        }
        // reference area
        assert_abs_diff_eq!(shape.weights.sum(), 4., epsilon = 1e-13);
        assert_abs_diff_eq!(shape.mass_1d.sum(), 2., epsilon = 1e-13);
    }

    #[test]
    fn test_gradient_of_linear_function() {
        let shape = ShapeInfo::new(3, 4);
        // interpolate f = x - 2y at the nodes and differentiate
        let f: Vec<f64> = (0..shape.n_dofs)
            .map(|i| {
                let p = shape.dof_point(i);
                p[0] - 2. * p[1]
            })
            .collect();
        for q in 0..shape.n_q_points {
            let dx: f64 = (0..shape.n_dofs).map(|i| shape.gradients[[q, i, 0]] * f[i]).sum();
            let dy: f64 = (0..shape.n_dofs).map(|i| shape.gradients[[q, i, 1]] * f[i]).sum();
            assert_abs_diff_eq!(dx, 1., epsilon = 1e-12);
            assert_abs_diff_eq!(dy, -2., epsilon = 1e-12);
        }
    }

    #[test]
    fn test_degree_zero() {
        let shape = ShapeInfo::new(0, 1);
        assert_eq!(shape.n_dofs, 1);
        assert_eq!(shape.values[[0, 0]], 1.);
        assert_eq!(shape.gradients[[0, 0, 1]], 0.);
        assert_eq!(shape.dof_point(0), [0., 0.]);
    }
}
