//! Structured quadrilateral meshes
//!
//! The global mesh is a tensor product of two vertex coordinate arrays.
//! Every rank holds the full (cheap) description and derives its own
//! partition from it, see [`LocalMesh`].
//!
//! Faces of a cell are numbered
//! - 0: left (x-), 1: right (x+)
//! - 2: bottom (y-), 3: top (y+)
//!
//! The face opposite to face `f` on the neighbouring cell is `f ^ 1`.
pub mod geometry;
pub mod partition;
pub use geometry::{lane_penalty_parameter, penalty_parameter, CellGeometry, ElementGeometryCache};
pub use partition::{CellBatch, CellRef, LocalMesh, Neighbor, Partitioner};

use crate::error::{DgError, Result};
use crate::types::DIM;
use ndarray::Array1;

/// Identifier of a boundary part
pub type BoundaryId = u8;

/// Number of faces per cell
pub const FACES_PER_CELL: usize = 2 * DIM;

/// Outward unit normal of face *face* on the reference cell
pub const fn face_normal(face: usize) -> [f64; DIM] {
    match face {
        0 => [-1., 0.],
        1 => [1., 0.],
        2 => [0., -1.],
        _ => [0., 1.],
    }
}

/// Coordinate direction normal to *face*
pub const fn face_direction(face: usize) -> usize {
    face / 2
}

/// Global tensor product mesh
#[derive(Debug, Clone)]
pub struct StructuredMesh {
    /// Vertex coordinates in x
    pub x: Array1<f64>,
    /// Vertex coordinates in y
    pub y: Array1<f64>,
    /// Periodicity per direction
    pub periodic: [bool; DIM],
    /// Boundary id per side (left, right, bottom, top)
    pub boundary_ids: [BoundaryId; FACES_PER_CELL],
}

impl StructuredMesh {
    /// Mesh from vertex coordinates
    ///
    /// # Errors
    /// Less than one cell per direction, or coordinates not increasing
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Result<Self> {
        for (name, coords) in [("x", &x), ("y", &y)] {
            if coords.len() < 2 {
                return Err(DgError::Mesh(format!("need at least one cell in {}", name)));
            }
            if coords.windows(2).into_iter().any(|w| w[1] <= w[0]) {
                return Err(DgError::Mesh(format!(
                    "vertex coordinates in {} must increase",
                    name
                )));
            }
        }
        Ok(Self {
            x,
            y,
            periodic: [false; DIM],
            boundary_ids: [0, 1, 2, 3],
        })
    }

    /// Equidistant mesh of `[x0, x1] x [y0, y1]`
    ///
    /// # Errors
    /// Zero cells or empty interval
    pub fn rectangle(nx: usize, ny: usize, x0: f64, x1: f64, y0: f64, y1: f64) -> Result<Self> {
        Self::new(
            Array1::linspace(x0, x1, nx + 1),
            Array1::linspace(y0, y1, ny + 1),
        )
    }

    /// Channel `[0, lx] x [-1, 1]`, vertices in y clustered towards the walls
    /// with `y = tanh(gamma * eta) / tanh(gamma)`. Periodic in x, walls
    /// (boundary id 0) at bottom and top.
    ///
    /// # Errors
    /// Zero cells
    pub fn channel(nx: usize, ny: usize, lx: f64, gamma: f64) -> Result<Self> {
        let eta = Array1::linspace(-1., 1., ny + 1);
        let y = if gamma > 0. {
            eta.mapv(|e| (gamma * e).tanh() / gamma.tanh())
        } else {
            eta
        };
        let mut mesh = Self::new(Array1::linspace(0., lx, nx + 1), y)?;
        mesh.periodic[0] = true;
        mesh.boundary_ids = [0, 0, 0, 0];
        Ok(mesh)
    }

    /// Make direction *axis* periodic
    pub fn with_periodic(mut self, axis: usize) -> Self {
        self.periodic[axis] = true;
        self
    }

    /// Assign boundary id *id* to side *face*
    pub fn with_boundary_id(mut self, face: usize, id: BoundaryId) -> Self {
        self.boundary_ids[face] = id;
        self
    }

    /// Number of cells in x
    pub fn nx(&self) -> usize {
        self.x.len() - 1
    }

    /// Number of cells in y
    pub fn ny(&self) -> usize {
        self.y.len() - 1
    }

    /// Total number of cells
    pub fn n_cells(&self) -> usize {
        self.nx() * self.ny()
    }

    /// Split every cell into four
    pub fn refine(&self) -> Self {
        let bisect = |c: &Array1<f64>| {
            let n = c.len() - 1;
            Array1::from_shape_fn(2 * n + 1, |i| {
                if i % 2 == 0 {
                    c[i / 2]
                } else {
                    0.5 * (c[i / 2] + c[i / 2 + 1])
                }
            })
        };
        Self {
            x: bisect(&self.x),
            y: bisect(&self.y),
            periodic: self.periodic,
            boundary_ids: self.boundary_ids,
        }
    }

    /// Lower left corner and extent of global cell (*i*, *j*)
    pub fn cell_box(&self, i: usize, j: usize) -> ([f64; DIM], [f64; DIM]) {
        (
            [self.x[i], self.y[j]],
            [self.x[i + 1] - self.x[i], self.y[j + 1] - self.y[j]],
        )
    }

    /// Boundary id of face *face* of global cell (*i*, *j*), `None` for
    /// interior and periodic faces
    pub fn boundary_of(&self, i: usize, j: usize, face: usize) -> Option<BoundaryId> {
        let at_side = match face {
            0 => i == 0,
            1 => i + 1 == self.nx(),
            2 => j == 0,
            _ => j + 1 == self.ny(),
        };
        if at_side && !self.periodic[face_direction(face)] {
            Some(self.boundary_ids[face])
        } else {
            None
        }
    }

    /// Smallest cell extent in any direction
    pub fn h_min(&self) -> f64 {
        let min_diff = |c: &Array1<f64>| {
            c.windows(2)
                .into_iter()
                .map(|w| w[1] - w[0])
                .fold(f64::INFINITY, f64::min)
        };
        min_diff(&self.x).min(min_diff(&self.y))
    }

    /// Representative of a vertex: the last vertex column (row) of a
    /// periodic direction is identified with the first one
    pub fn canonical_vertex(&self, v: [usize; DIM]) -> [usize; DIM] {
        let n = [self.nx(), self.ny()];
        let mut c = v;
        for d in 0..DIM {
            if self.periodic[d] && c[d] == n[d] {
                c[d] = 0;
            }
        }
        c
    }

    /// Global vertices on sides with id in *ids*, together with the outward
    /// normal of the side. Vertices shared by two sides, or identified by
    /// periodicity, are listed once.
    pub fn boundary_vertices(&self, ids: &[BoundaryId]) -> Vec<([usize; DIM], [f64; DIM])> {
        let (nx, ny) = (self.nx(), self.ny());
        let mut vertices: Vec<([usize; DIM], [f64; DIM])> = Vec::new();
        for face in 0..FACES_PER_CELL {
            if self.periodic[face_direction(face)] || !ids.contains(&self.boundary_ids[face]) {
                continue;
            }
            let side: Vec<[usize; DIM]> = match face {
                0 => (0..=ny).map(|j| [0, j]).collect(),
                1 => (0..=ny).map(|j| [nx, j]).collect(),
                2 => (0..=nx).map(|i| [i, 0]).collect(),
                _ => (0..=nx).map(|i| [i, ny]).collect(),
            };
            for v in side.into_iter().map(|v| self.canonical_vertex(v)) {
                if !vertices.iter().any(|(w, _)| *w == v) {
                    vertices.push((v, face_normal(face)));
                }
            }
        }
        vertices
    }
}
