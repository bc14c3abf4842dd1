//! Continuous bilinear fields on the mesh vertices
//!
//! Used for the wall distance and the wall shear stress. Values are
//! stored for the owned vertex columns plus one ghost vertex column per
//! side, i.e. storage column `c` is global vertex column `i0 - 1 + c`.
use crate::mesh::{CellRef, LocalMesh, Partitioner};
use crate::types::{Vectorized, DIM, LANES};
use ndarray::{Array1, Array2, ArrayView1};
use num_traits::Zero;
use std::sync::Arc;

/// Nodal Q1 field
#[derive(Clone, Debug)]
pub struct VertexField {
    partitioner: Arc<Partitioner>,
    /// Values, indexed `[storage column, row]`
    pub v: Array2<f64>,
}

impl VertexField {
    /// Field holding *value* everywhere
    pub fn new(mesh: &LocalMesh, value: f64) -> Self {
        Self {
            partitioner: Arc::clone(mesh.partitioner()),
            v: Array2::from_elem((mesh.n_vertex_columns(), mesh.ny() + 1), value),
        }
    }

    /// Storage columns of the owned vertices
    pub fn owned_columns(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.v.nrows() - 2
    }

    /// Copy vertex columns next to the partition boundary into the ghost
    /// columns of the neighbours
    pub fn update_ghost_columns(&mut self) {
        let p = Arc::clone(&self.partitioner);
        let last = self.v.nrows() - 1;
        let to_left = self.v.row(2).to_vec();
        let to_right = self.v.row(last - 2).to_vec();
        let (from_left, from_right) = p.exchange_columns(to_left, to_right);
        if let Some(data) = from_left {
            self.v.row_mut(0).assign(&ArrayView1::from(&data[..]));
        }
        if let Some(data) = from_right {
            self.v.row_mut(last).assign(&ArrayView1::from(&data[..]));
        }
    }

    /// Values at the corners of each lane's cell, ordered
    /// lower left, lower right, upper left, upper right
    pub fn cell_corners(&self, mesh: &LocalMesh, cells: &[Option<CellRef>; LANES]) -> [Vectorized; 4] {
        let mut corners = [Vectorized::zero(); 4];
        for (lane, cell) in cells.iter().enumerate() {
            if let Some(cell) = cell {
                let [c, r] = mesh.vertex_origin(*cell);
                corners[0][lane] = self.v[[c, r]];
                corners[1][lane] = self.v[[c + 1, r]];
                corners[2][lane] = self.v[[c, r + 1]];
                corners[3][lane] = self.v[[c + 1, r + 1]];
            }
        }
        corners
    }

    /// Mean of the corner values of every owned cell
    pub fn cell_means(&self, mesh: &LocalMesh) -> Array1<f64> {
        Array1::from_shape_fn(mesh.n_local(), |cell| {
            let [c, r] = mesh.vertex_origin(CellRef::Local(cell));
            0.25 * (self.v[[c, r]] + self.v[[c + 1, r]] + self.v[[c, r + 1]] + self.v[[c + 1, r + 1]])
        })
    }
}

/// Bilinear interpolation of corner values at reference point *xi*,
/// returns value and physical gradient
#[inline]
pub fn q1_value_gradient(
    corners: &[Vectorized; 4],
    xi: [f64; DIM],
    inverse_jacobian: &[Vectorized; DIM],
) -> (Vectorized, [Vectorized; DIM]) {
    let s = 0.5 * (1. + xi[0]);
    let t = 0.5 * (1. + xi[1]);
    let [c00, c10, c01, c11] = *corners;
    let value = c00 * ((1. - s) * (1. - t)) + c10 * (s * (1. - t)) + c01 * ((1. - s) * t) + c11 * (s * t);
    let d_xi = ((c10 - c00) * (1. - t) + (c11 - c01) * t) * 0.5;
    let d_eta = ((c01 - c00) * (1. - s) + (c11 - c10) * s) * 0.5;
    (value, [d_xi * inverse_jacobian[0], d_eta * inverse_jacobian[1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;

    #[test]
    fn test_q1_reproduces_linear_function() {
        // f = 2x + 3y on a cell of size 0.5 x 0.25 with lower corner (1, 1)
        let f = |x: f64, y: f64| 2. * x + 3. * y;
        let corners = [
            Vectorized::splat(f(1., 1.)),
            Vectorized::splat(f(1.5, 1.)),
            Vectorized::splat(f(1., 1.25)),
            Vectorized::splat(f(1.5, 1.25)),
        ];
        let inv_jac = [Vectorized::splat(4.), Vectorized::splat(8.)];
        let (value, grad) = q1_value_gradient(&corners, [0.2, -0.6], &inv_jac);
        let (x, y) = (1. + 0.25 * 1.2, 1. + 0.125 * 0.4);
        assert!((value[0] - f(x, y)).abs() < 1e-13);
        assert!((grad[0][2] - 2.).abs() < 1e-13);
        assert!((grad[1][3] - 3.).abs() < 1e-13);
    }

    #[test]
    fn test_ghost_columns_periodic() {
        let mesh = StructuredMesh::channel(3, 2, 1., 0.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let mut field = VertexField::new(&local, 0.);
        for c in field.owned_columns() {
            field.v.row_mut(c).fill(c as f64);
        }
        field.update_ghost_columns();
        // global column -1 equals global column nx - 1, column nx + 1 equals 1
        assert_eq!(field.v[[0, 1]], 3.);
        assert_eq!(field.v[[5, 1]], 2.);
    }
}
