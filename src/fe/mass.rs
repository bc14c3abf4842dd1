//! Inverse mass matrix of the tensor product basis
use super::shape::ShapeInfo;
use crate::error::Result;
use crate::types::Vectorized;
use ndarray::Array2;
use ndarray_linalg::Inverse;
use num_traits::Zero;

/// `M^{-1} = (M1^{-1} x M1^{-1}) / det(J)` on axis-parallel cells
#[derive(Debug, Clone)]
pub struct InverseMassMatrix {
    minv_1d: Array2<f64>,
}

impl InverseMassMatrix {
    /// Invert the 1D mass matrix of *shape*
    ///
    /// # Errors
    /// Singular mass matrix (too few quadrature points)
    pub fn new(shape: &ShapeInfo) -> Result<Self> {
        Ok(Self {
            minv_1d: shape.mass_1d.inv()?,
        })
    }

    /// Apply to one block of dof values in place, *det* is the jacobian
    /// determinant of each lane
    pub fn apply(&self, block: &mut [Vectorized], det: Vectorized) {
        let n = self.minv_1d.nrows();
        let mut tmp = vec![Vectorized::zero(); n * n];
        // contract x index
        for iy in 0..n {
            for jx in 0..n {
                let mut sum = Vectorized::zero();
                for ix in 0..n {
                    sum += block[ix + n * iy] * self.minv_1d[[ix, jx]];
                }
                tmp[jx + n * iy] = sum;
            }
        }
        // contract y index
        for jy in 0..n {
            for jx in 0..n {
                let mut sum = Vectorized::zero();
                for iy in 0..n {
                    sum += tmp[jx + n * iy] * self.minv_1d[[jy, iy]];
                }
                block[jx + n * jy] = sum / det;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_of_assembled_mass() {
        let shape = ShapeInfo::new(2, 3);
        let minv = InverseMassMatrix::new(&shape).unwrap();
        let det = Vectorized([0.25, 1., 2., 0.5]);
        // mass matrix times e_3 from the 2D tables
        let j = 3;
        let mut column: Vec<Vectorized> = (0..shape.n_dofs)
            .map(|i| {
                let m: f64 = (0..shape.n_q_points)
                    .map(|q| shape.weights[q] * shape.values[[q, i]] * shape.values[[q, j]])
                    .sum();
                det * m
            })
            .collect();
        minv.apply(&mut column, det);
        for (i, c) in column.iter().enumerate() {
            let expected = if i == j { 1. } else { 0. };
            for l in 0..4 {
                assert!((c[l] - expected).abs() < 1e-12);
            }
        }
    }
}
