//! Distance of mesh vertices to the nearest wall
//!
//! Starting from the wall vertices (distance zero), distances are
//! propagated one element layer per sweep: a vertex adjacent (in a cell)
//! to a resolved vertex gets the distance to the wall point of that
//! vertex, measured along the wall normal. Vertex columns shared with a
//! neighbouring rank are combined by taking the minimum. Sweeps are
//! repeated until no vertex is left at the sentinel value.
//!
//! The result is exact for walls parallel to the coordinate axes and an
//! approximation otherwise.
use crate::error::{DgError, Result};
use crate::field::VertexField;
use crate::mesh::{BoundaryId, CellRef, LocalMesh};
use crate::types::DIM;
use ndarray::Array2;
use std::collections::HashMap;

/// Distance of unreached vertices
pub const UNREACHED: f64 = f64::MAX;

/// Point on a wall
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallVertex {
    /// Global vertex index (canonical)
    pub index: [usize; DIM],
    /// Position
    pub position: [f64; DIM],
    /// Outward normal of the wall
    pub normal: [f64; DIM],
}

/// Wall distance and nearest wall vertex of every stored vertex
#[derive(Debug, Clone)]
pub struct WallDistance {
    /// Distance field
    pub distance: VertexField,
    /// Index into `wall_vertices` of the nearest wall vertex
    pub nearest: Array2<usize>,
    /// All wall vertices of the global mesh
    pub wall_vertices: Vec<WallVertex>,
    /// Number of sweeps needed
    pub sweeps: usize,
}

impl WallDistance {
    /// Propagate the wall distance from the faces with id in *wall_ids*
    ///
    /// # Errors
    /// [`DgError::NoWallBoundary`] without wall on any rank,
    /// [`DgError::WallDistance`] if a sweep reaches no further vertex
    pub fn new(mesh: &LocalMesh, wall_ids: &[BoundaryId]) -> Result<Self> {
        let global = &mesh.global;
        let wall_vertices: Vec<WallVertex> = global
            .boundary_vertices(wall_ids)
            .into_iter()
            .map(|(index, normal)| WallVertex {
                index,
                position: [global.x[index[0]], global.y[index[1]]],
                normal,
            })
            .collect();
        if mesh.comm().max(wall_vertices.len() as f64) == 0. {
            return Err(DgError::NoWallBoundary);
        }
        let lookup: HashMap<[usize; DIM], usize> = wall_vertices
            .iter()
            .enumerate()
            .map(|(w, v)| (v.index, w))
            .collect();

        let mut distance = VertexField::new(mesh, UNREACHED);
        // wall index packed as f64 for communication, -1 if unknown
        let mut nearest = VertexField::new(mesh, -1.);
        let ny = mesh.ny();
        for c in distance.owned_columns() {
            for r in 0..=ny {
                let v = global.canonical_vertex([mesh.i0 + c - 1, r]);
                if let Some(w) = lookup.get(&v) {
                    distance.v[[c, r]] = 0.;
                    nearest.v[[c, r]] = *w as f64;
                }
            }
        }
        combine_shared(mesh, &mut distance, &mut nearest);

        let mut unresolved = count_unresolved(mesh, &distance);
        let mut sweeps = 0;
        while unresolved > 0 {
            sweep(mesh, &wall_vertices, &mut distance, &mut nearest);
            combine_shared(mesh, &mut distance, &mut nearest);
            sweeps += 1;
            let remaining = count_unresolved(mesh, &distance);
            if remaining >= unresolved {
                return Err(DgError::WallDistance(format!(
                    "{} vertices can not be reached from a wall",
                    remaining
                )));
            }
            unresolved = remaining;
        }
        distance.update_ghost_columns();
        nearest.update_ghost_columns();
        tracing::debug!("wall distance resolved after {} sweeps", sweeps);

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nearest = nearest.v.mapv(|w| if w < 0. { 0 } else { w as usize });
        Ok(Self {
            distance,
            nearest,
            wall_vertices,
            sweeps,
        })
    }
}

/// One Jacobi sweep over the owned cells
fn sweep(mesh: &LocalMesh, walls: &[WallVertex], distance: &mut VertexField, nearest: &mut VertexField) {
    let old_distance = distance.v.clone();
    let old_nearest = nearest.v.clone();
    let global = &mesh.global;
    let position = |c: usize, r: usize| [global.x[mesh.i0 + c - 1], global.y[r]];
    for cell in 0..mesh.n_local() {
        let [c0, r0] = mesh.vertex_origin(CellRef::Local(cell));
        let corners = [[c0, r0], [c0 + 1, r0], [c0, r0 + 1], [c0 + 1, r0 + 1]];
        for [ca, ra] in corners.iter().cloned() {
            if old_distance[[ca, ra]] == UNREACHED {
                continue;
            }
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let w = old_nearest[[ca, ra]] as usize;
            let wall = &walls[w];
            for [cb, rb] in corners.iter().cloned() {
                let x = position(cb, rb);
                let d = ((x[0] - wall.position[0]) * wall.normal[0]
                    + (x[1] - wall.position[1]) * wall.normal[1])
                    .abs();
                if d < distance.v[[cb, rb]] {
                    distance.v[[cb, rb]] = d;
                    nearest.v[[cb, rb]] = w as f64;
                }
            }
        }
    }
}

/// Minimum over vertex copies shared between ranks (and periodic copies)
fn combine_shared(mesh: &LocalMesh, distance: &mut VertexField, nearest: &mut VertexField) {
    let first = *distance.owned_columns().start();
    let last = *distance.owned_columns().end();
    let pack = |c: usize| {
        let mut data = distance.v.row(c).to_vec();
        data.extend(nearest.v.row(c).iter());
        data
    };
    let (to_left, to_right) = (pack(first), pack(last));
    let (from_left, from_right) = mesh.partitioner().exchange_columns(to_left, to_right);
    let n = mesh.ny() + 1;
    for (data, c) in [(from_left, first), (from_right, last)] {
        if let Some(data) = data {
            let (d, w) = data.split_at(n);
            for r in 0..n {
                if d[r] < distance.v[[c, r]] {
                    distance.v[[c, r]] = d[r];
                    nearest.v[[c, r]] = w[r];
                }
            }
        }
    }
    if mesh.global.periodic[1] {
        let ny = mesh.ny();
        for c in 0..distance.v.nrows() {
            let (bottom, top) = (distance.v[[c, 0]], distance.v[[c, ny]]);
            if top < bottom {
                distance.v[[c, 0]] = top;
                nearest.v[[c, 0]] = nearest.v[[c, ny]];
            } else {
                distance.v[[c, ny]] = bottom;
                nearest.v[[c, ny]] = nearest.v[[c, 0]];
            }
        }
    }
}

/// Global number of owned vertices at the sentinel
fn count_unresolved(mesh: &LocalMesh, distance: &VertexField) -> usize {
    let local = distance
        .owned_columns()
        .map(|c| {
            distance
                .v
                .row(c)
                .iter()
                .filter(|d| **d == UNREACHED)
                .count()
        })
        .sum::<usize>();
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let global = mesh.comm().sum(local as f64) as usize;
    global
}

/// Largest difference of the distance between two vertices of a cell,
/// relative to the cell diameter
pub fn max_lipschitz_ratio(mesh: &LocalMesh, distance: &VertexField) -> f64 {
    let mut ratio: f64 = 0.;
    for cell in 0..mesh.n_local() {
        let (_, extent) = mesh.cell_box(CellRef::Local(cell));
        let diameter = (extent[0] * extent[0] + extent[1] * extent[1]).sqrt();
        let [c, r] = mesh.vertex_origin(CellRef::Local(cell));
        let values = [
            distance.v[[c, r]],
            distance.v[[c + 1, r]],
            distance.v[[c, r + 1]],
            distance.v[[c + 1, r + 1]],
        ];
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        ratio = ratio.max((max - min) / diameter);
    }
    ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use std::sync::Arc;

    #[test]
    fn test_channel_distance_is_exact() {
        let mesh = StructuredMesh::channel(5, 12, 3., 2.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let wall = WallDistance::new(&local, &[0]).unwrap();
        for c in 0..local.n_vertex_columns() {
            for r in 0..=local.ny() {
                let y = local.global.y[r];
                let d = wall.distance.v[[c, r]];
                assert!(d != UNREACHED);
                assert!((d - (1. - y.abs())).abs() < 1e-14, "vertex ({}, {}): {}", c, r, d);
            }
        }
        assert!(max_lipschitz_ratio(&local, &wall.distance) <= 1.);
        // propagation from both walls meets in the middle
        assert_eq!(wall.sweeps, 6);
    }

    #[test]
    fn test_single_wall_reaches_everything() {
        // wall only at the bottom (id 3), other sides id 1
        let mesh = StructuredMesh::rectangle(4, 4, 0., 1., 0., 2.)
            .unwrap()
            .with_boundary_id(0, 1)
            .with_boundary_id(1, 1)
            .with_boundary_id(2, 3)
            .with_boundary_id(3, 1);
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let wall = WallDistance::new(&local, &[3]).unwrap();
        let d = &wall.distance;
        assert!((d.v[[3, 4]] - 2.).abs() < 1e-14);
        assert!(max_lipschitz_ratio(&local, d) <= 1.);
    }

    #[test]
    fn test_no_wall_is_an_error() {
        let mesh = StructuredMesh::rectangle(2, 2, 0., 1., 0., 1.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        assert!(matches!(
            WallDistance::new(&local, &[7]),
            Err(DgError::NoWallBoundary)
        ));
    }
}
