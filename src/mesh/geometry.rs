//! Per-cell geometry and the interior penalty parameter
use super::{face_direction, CellRef, LocalMesh, Neighbor, FACES_PER_CELL};
use crate::types::{LaneMask, Vectorized, DIM, LANES};

/// Geometric data of one axis-parallel cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    /// Lower left corner
    pub lower: [f64; DIM],
    /// Cell extent per direction
    pub extent: [f64; DIM],
    /// Cell volume
    pub volume: f64,
    /// Length scale `volume^(1/DIM)`
    pub h: f64,
    /// Shape regularity measure: boundary face area plus half the interior
    /// face area, divided by the volume
    pub penalty_measure: f64,
}

impl CellGeometry {
    /// Jacobian of the map from `[-1, 1]^2`, per direction
    pub fn jacobian(&self) -> [f64; DIM] {
        [0.5 * self.extent[0], 0.5 * self.extent[1]]
    }

    /// Inverse jacobian per direction
    pub fn inverse_jacobian(&self) -> [f64; DIM] {
        [2. / self.extent[0], 2. / self.extent[1]]
    }

    /// Length of face *face*
    pub fn face_area(&self, face: usize) -> f64 {
        self.extent[1 - face_direction(face)]
    }

    /// Physical coordinates of reference point *xi*
    pub fn map_point(&self, xi: [f64; DIM]) -> [f64; DIM] {
        [
            self.lower[0] + 0.5 * (xi[0] + 1.) * self.extent[0],
            self.lower[1] + 0.5 * (xi[1] + 1.) * self.extent[1],
        ]
    }
}

/// Geometry of all owned and ghost cells, computed once at setup
#[derive(Debug, Clone)]
pub struct ElementGeometryCache {
    local: Vec<CellGeometry>,
    ghost: Vec<CellGeometry>,
}

impl ElementGeometryCache {
    /// Compute geometry of all cells of *mesh*
    pub fn new(mesh: &LocalMesh) -> Self {
        let compute = |cell: CellRef| {
            let (lower, extent) = mesh.cell_box(cell);
            let [i, j] = mesh.global_index(cell);
            let volume = extent[0] * extent[1];
            let surface: f64 = (0..FACES_PER_CELL)
                .map(|face| {
                    let area = extent[1 - face_direction(face)];
                    if mesh.global.boundary_of(i, j, face).is_some() {
                        area
                    } else {
                        0.5 * area
                    }
                })
                .sum();
            CellGeometry {
                lower,
                extent,
                volume,
                h: volume.powf(1. / DIM as f64),
                penalty_measure: surface / volume,
            }
        };
        Self {
            local: (0..mesh.n_local()).map(|c| compute(CellRef::Local(c))).collect(),
            ghost: (0..mesh.n_ghost()).map(|g| compute(CellRef::Ghost(g))).collect(),
        }
    }

    /// Geometry of a cell
    pub fn get(&self, cell: CellRef) -> &CellGeometry {
        match cell {
            CellRef::Local(c) => &self.local[c],
            CellRef::Ghost(g) => &self.ghost[g],
        }
    }

    /// Penalty measures of the owned cells
    pub fn penalty_measures(&self) -> Vec<f64> {
        self.local.iter().map(|g| g.penalty_measure).collect()
    }

    /// Penalty parameter of one face of a cell batch. *minus* holds the
    /// penalty measures of the batch cells, the neighbours are looked up
    /// here. Boundary lanes use *minus* on both sides.
    pub fn face_penalty(
        &self,
        stab: f64,
        degree: usize,
        minus: Vectorized,
        neighbors: &[Neighbor; LANES],
    ) -> Vectorized {
        let interior = LaneMask::from_fn(|l| matches!(neighbors[l], Neighbor::Cell(_)));
        let plus = Vectorized::from_fn(|l| match neighbors[l] {
            Neighbor::Cell(nb) => self.get(nb).penalty_measure,
            Neighbor::Boundary(_) => 0.,
        });
        lane_penalty_parameter(stab, degree, minus, plus, interior)
    }

    /// Smallest length scale of the owned cells
    pub fn h_min(&self) -> f64 {
        self.local
            .iter()
            .map(|g| g.extent[0].min(g.extent[1]))
            .fold(f64::INFINITY, f64::min)
    }
}

/// Interior penalty parameter of a face
///
/// `stab * (degree + 1)^2 * max(minus, plus)`, where *minus* and *plus* are
/// the penalty measures of the two adjacent cells (equal on boundary faces).
/// Symmetric in *minus* and *plus*, so both cells obtain the same value.
#[inline]
pub fn penalty_parameter(stab: f64, degree: usize, minus: f64, plus: f64) -> f64 {
    let p1 = (degree + 1) as f64;
    stab * p1 * p1 * minus.max(plus)
}

/// [`penalty_parameter`] per lane of a face batch, lanes outside
/// *interior* are boundary faces and use *minus* on both sides
#[inline]
pub fn lane_penalty_parameter(
    stab: f64,
    degree: usize,
    minus: Vectorized,
    plus: Vectorized,
    interior: LaneMask,
) -> Vectorized {
    Vectorized::from_fn(|l| {
        let other = if interior.is_set(l) { plus[l] } else { minus[l] };
        penalty_parameter(stab, degree, minus[l], other)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Neighbor, StructuredMesh};
    use crate::mpi::SerialCommunicator;
    use std::sync::Arc;

    #[test]
    fn test_penalty_measure() {
        let mesh = StructuredMesh::rectangle(4, 4, 0., 1., 0., 2.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let geo = ElementGeometryCache::new(&local);
        // interior cell 0.25 x 0.5: half of all faces
        let g = geo.get(CellRef::Local(5));
        assert!((g.penalty_measure - 0.5 * 1.5 / 0.125).abs() < 1e-12);
        // corner cell: left and bottom face count fully
        let g = geo.get(CellRef::Local(0));
        assert!((g.penalty_measure - (0.5 + 0.25 + 0.5 * 0.75) / 0.125).abs() < 1e-12);
        assert!((g.h - 0.125_f64.sqrt()).abs() < 1e-14);
    }

    #[test]
    fn test_penalty_symmetry() {
        let mesh = StructuredMesh::channel(4, 6, 2., 2.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let geo = ElementGeometryCache::new(&local);
        for cell in 0..local.n_local() {
            for face in 0..FACES_PER_CELL {
                if let Neighbor::Cell(nb) = local.neighbor(cell, face) {
                    let minus = geo.get(CellRef::Local(cell)).penalty_measure;
                    let plus = geo.get(nb).penalty_measure;
                    let from_a = penalty_parameter(1.5, 3, minus, plus);
                    let from_b = penalty_parameter(1.5, 3, plus, minus);
                    assert!((from_a - from_b).abs() < f64::EPSILON * from_a);
                }
            }
        }
        // ghost cells see the same geometry as their owner
        for g in 0..local.n_ghost() {
            let [i, j] = local.global_index(CellRef::Ghost(g));
            let owner = geo.get(CellRef::Local(i * local.ny() + j));
            assert_eq!(geo.get(CellRef::Ghost(g)).penalty_measure, owner.penalty_measure);
        }
    }

    #[test]
    fn test_face_penalty_on_boundary_and_interior() {
        let mesh = StructuredMesh::rectangle(3, 2, 0., 3., 0., 1.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let geo = ElementGeometryCache::new(&local);
        // cell 0 sits in the lower left corner, face 1 is interior, face 0 boundary
        let minus = geo.get(CellRef::Local(0)).penalty_measure;
        let neighbors = [
            local.neighbor(0, 0),
            local.neighbor(0, 1),
            local.neighbor(0, 0),
            local.neighbor(0, 1),
        ];
        let tau = geo.face_penalty(2., 1, Vectorized::splat(minus), &neighbors);
        let plus = match local.neighbor(0, 1) {
            Neighbor::Cell(nb) => geo.get(nb).penalty_measure,
            Neighbor::Boundary(_) => panic!("face 1 of cell 0 is interior"),
        };
        assert_eq!(tau[0], penalty_parameter(2., 1, minus, minus));
        assert_eq!(tau[1], penalty_parameter(2., 1, minus, plus));
        assert_eq!(tau[0], tau[2]);
        assert_eq!(tau[1], tau[3]);
    }
}
