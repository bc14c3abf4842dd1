//! # Wall enrichment (XWall)
//!
//! Near no-slip walls the polynomial velocity space is enriched by
//! Spalding's law of the wall,
//!
//! `u = sum_i N_i u_i + psi(y+) sum_j M_j ubar_j`,
//!
//! where `y+ = d sqrt(tau_w) / nu` depends on the wall distance `d` and
//! the wall shear stress `tau_w`, both continuous Q1 vertex fields.
//!
//! [`XWall`] owns both fields and the cached inverse mass matrices of the
//! enriched space. The integration kernels read them through an
//! [`EnrichmentContext`].
pub mod evaluator;
pub mod inverse;
pub mod spalding;
pub mod wall_distance;
pub use evaluator::{
    compose_gradient, compose_value, enrichment_test_value, EnrichmentContext, XWallCellEvaluator,
    XWallEvaluator, XWallFaceEvaluator,
};
pub use inverse::InverseOperatorCache;
pub use spalding::{enrichment_value_and_gradient, solve_spalding};
pub use wall_distance::WallDistance;

use crate::error::Result;
use crate::fe::{batch_cells, batch_map, cell_loop, FieldEvaluator, InverseMassMatrix};
use crate::fe::{LaneGeometry, PolynomialEvaluator, ShapeInfo};
use crate::field::{BlockVector, VertexField};
use crate::mesh::{face_direction, BoundaryId, CellRef, ElementGeometryCache, LocalMesh, Neighbor, FACES_PER_CELL};
use crate::parameters::XWallParameters;
use crate::turbulence::EddyViscosityTable;
use crate::types::{dot, grad_times, DIM};
use std::collections::HashMap;

/// State of the wall enrichment
pub struct XWall {
    params: XWallParameters,
    viscosity: f64,
    wall_ids: Vec<BoundaryId>,
    wall: WallDistance,
    wall_lookup: HashMap<[usize; DIM], usize>,
    /// tau_w per wall vertex, identical on all ranks
    tauw_wall: Vec<f64>,
    tauw: VertexField,
    tauw_previous: VertexField,
    shape: ShapeInfo,
    inverse: InverseOperatorCache,
    n_updates: usize,
}

impl XWall {
    /// Compute the wall distance from the faces with id in *wall_ids*
    /// and set up the enrichment with the initial tau_w
    ///
    /// # Errors
    /// No wall boundary, unreachable vertices, or singular enriched mass
    /// matrices
    pub fn new(
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        shape_std: &ShapeInfo,
        params: &XWallParameters,
        viscosity: f64,
        wall_ids: &[BoundaryId],
    ) -> Result<Self> {
        let wall = WallDistance::new(mesh, wall_ids)?;
        let wall_lookup = wall
            .wall_vertices
            .iter()
            .enumerate()
            .map(|(w, v)| (v.index, w))
            .collect();
        let tauw = VertexField::new(mesh, params.initial_tauw);
        let mut xwall = Self {
            params: *params,
            viscosity,
            wall_ids: wall_ids.to_vec(),
            tauw_wall: vec![params.initial_tauw; wall.wall_vertices.len()],
            wall,
            wall_lookup,
            tauw_previous: tauw.clone(),
            tauw,
            shape: ShapeInfo::new(params.degree, shape_std.n_q_points_1d),
            inverse: InverseOperatorCache::new(mesh, shape_std),
            n_updates: 0,
        };
        xwall.rebuild_inverse(mesh, geometry, shape_std)?;
        let n_enriched = mesh.comm().sum(xwall.inverse.n_enriched() as f64);
        if mesh.comm().is_root() {
            tracing::info!(
                "XWall: {} of {} cells enriched, {} wall vertices",
                n_enriched,
                mesh.global.n_cells(),
                xwall.tauw_wall.len()
            );
        }
        Ok(xwall)
    }

    /// Enrichment with the current tau_w
    pub fn context<'a>(&'a self, mesh: &'a LocalMesh) -> EnrichmentContext<'a> {
        EnrichmentContext {
            mesh,
            distance: &self.wall.distance,
            tauw: &self.tauw,
            viscosity: self.viscosity,
            max_wall_distance: self.params.max_wall_distance,
            shape: &self.shape,
        }
    }

    /// Enrichment with tau_w before the last update
    pub fn previous_context<'a>(&'a self, mesh: &'a LocalMesh) -> EnrichmentContext<'a> {
        EnrichmentContext {
            tauw: &self.tauw_previous,
            ..self.context(mesh)
        }
    }

    /// Parameters
    pub fn params(&self) -> &XWallParameters {
        &self.params
    }

    /// Wall distance field
    pub fn distance(&self) -> &VertexField {
        &self.wall.distance
    }

    /// Wall shear stress field
    pub fn tauw(&self) -> &VertexField {
        &self.tauw
    }

    /// Wall shear stress before the last update
    pub fn tauw_previous(&self) -> &VertexField {
        &self.tauw_previous
    }

    /// Wall shear stress per wall vertex
    pub fn tauw_wall(&self) -> &[f64] {
        &self.tauw_wall
    }

    /// Basis of the enrichment dofs
    pub fn shape(&self) -> &ShapeInfo {
        &self.shape
    }

    /// Number of enrichment dofs per cell and component
    pub fn n_dofs(&self) -> usize {
        self.shape.n_dofs
    }

    /// Cached inverse mass matrices
    pub fn inverse(&self) -> &InverseOperatorCache {
        &self.inverse
    }

    /// Number of performed tau_w updates
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// tau_w has to be updated in step *step_number*. Without variable
    /// tau_w it is only updated once, in the first step.
    pub fn needs_update(&self, step_number: usize) -> bool {
        self.params.variable_tauw || self.n_updates == 0 || step_number <= 1
    }

    /// Refactorize the enriched mass matrices for the current tau_w
    ///
    /// # Errors
    /// Singular local mass matrix
    pub fn rebuild_inverse(
        &mut self,
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        shape_std: &ShapeInfo,
    ) -> Result<()> {
        self.inverse.invalidate();
        let ctx = EnrichmentContext {
            mesh,
            distance: &self.wall.distance,
            tauw: &self.tauw,
            viscosity: self.viscosity,
            max_wall_distance: self.params.max_wall_distance,
            shape: &self.shape,
        };
        self.inverse.rebuild(mesh, shape_std, geometry, ctx)
    }

    /// Recompute tau_w from the wall-normal velocity gradient of
    /// *velocity* (ghost values up to date). The previous field is kept
    /// in `tauw_previous`, the inverse mass matrices become stale.
    ///
    /// `tau_w = int nu_eff |t . (grad u n)| phi_v / int phi_v`
    ///
    /// per wall vertex `v` with hat function `phi_v` along the wall.
    ///
    /// # Errors
    /// Propagated from the face loop
    pub fn update_wall_shear_stress(
        &mut self,
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        shape_std: &ShapeInfo,
        velocity: &BlockVector,
        viscosity: Option<&EddyViscosityTable>,
    ) -> Result<()> {
        let ctx = self.context(mesh);
        let wall_ids = &self.wall_ids;
        let lookup = &self.wall_lookup;
        let nu = self.viscosity;
        let contributions = batch_map(
            mesh,
            || XWallFaceEvaluator::<DIM>::new(shape_std, geometry, Some(ctx)),
            |eval, batch| {
                let mut contrib: Vec<(usize, f64, f64)> = Vec::new();
                for face in 0..FACES_PER_CELL {
                    let on_wall: Vec<(usize, usize)> = batch
                        .filled_lanes()
                        .filter(|(_, cell)| match mesh.neighbor(*cell, face) {
                            Neighbor::Boundary(id) => wall_ids.contains(&id),
                            Neighbor::Cell(_) => false,
                        })
                        .collect();
                    if on_wall.is_empty() {
                        continue;
                    }
                    eval.reinit_interior(batch, face);
                    eval.read_dof_values(velocity);
                    eval.evaluate(false, true);
                    let n = eval.normal();
                    let t = [-n[1], n[0]];
                    let tangential = 1 - face_direction(face);
                    for (lane, cell) in on_wall {
                        let vertices = face_vertices(mesh, cell, face);
                        for q in 0..eval.n_q_points() {
                            let s = eval.plain().reference_point(q)[tangential];
                            let hats = [0.5 * (1. - s), 0.5 * (1. + s)];
                            let nu_eff = viscosity.map_or(nu, |table| table.face(batch.index, face, q)[lane]);
                            let shear = dot(&grad_times(&eval.gradient(q), &n), &t)[lane].abs();
                            let jxw = eval.jxw(q)[lane];
                            for (v, hat) in vertices.iter().zip(hats.iter()) {
                                if let Some(w) = lookup.get(v) {
                                    contrib.push((*w, jxw * nu_eff * shear * hat, jxw * hat));
                                }
                            }
                        }
                    }
                }
                Ok(contrib)
            },
        )?;
        let n_wall = self.tauw_wall.len();
        let mut numerator = vec![0.; n_wall];
        let mut denominator = vec![0.; n_wall];
        for (w, num, den) in contributions.into_iter().flatten() {
            numerator[w] += num;
            denominator[w] += den;
        }
        mesh.comm().sum_slice(&mut numerator);
        mesh.comm().sum_slice(&mut denominator);

        let a = self.params.relaxation;
        for ((tau, num), den) in self.tauw_wall.iter_mut().zip(numerator.iter()).zip(denominator.iter()) {
            // vanishing shear keeps the previous value (psi would vanish)
            if *den > 0. && *num > 0. {
                *tau = a * num / den + (1. - a) * *tau;
            }
        }
        self.tauw_previous = self.tauw.clone();
        for c in self.tauw.owned_columns() {
            for r in 0..=mesh.ny() {
                self.tauw.v[[c, r]] = self.tauw_wall[self.wall.nearest[[c, r]]];
            }
        }
        self.tauw.update_ghost_columns();
        self.inverse.invalidate();
        self.n_updates += 1;

        if mesh.comm().is_root() && n_wall > 0 {
            let mean = self.tauw_wall.iter().sum::<f64>() / n_wall as f64;
            let min = self.tauw_wall.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = self.tauw_wall.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            tracing::info!("tau_w mean: {:10.4e} min: {:10.4e} max: {:10.4e}", mean, min, max);
        }
        Ok(())
    }

    /// Set tau_w per wall vertex, e.g. from a snapshot, and refactorize
    /// the enriched mass matrices
    ///
    /// # Errors
    /// Singular local mass matrix
    ///
    /// # Panics
    /// *tauw_wall* does not hold one value per wall vertex
    pub fn restore_wall_shear_stress(
        &mut self,
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        shape_std: &ShapeInfo,
        tauw_wall: &[f64],
    ) -> Result<()> {
        assert_eq!(tauw_wall.len(), self.tauw_wall.len(), "number of wall vertices");
        self.tauw_wall.copy_from_slice(tauw_wall);
        for c in self.tauw.owned_columns() {
            for r in 0..=mesh.ny() {
                self.tauw.v[[c, r]] = self.tauw_wall[self.wall.nearest[[c, r]]];
            }
        }
        self.tauw.update_ghost_columns();
        self.tauw_previous = self.tauw.clone();
        self.n_updates += 1;
        self.rebuild_inverse(mesh, geometry, shape_std)
    }

    /// L2 projection of *src*, given in the basis of the previous tau_w,
    /// onto the basis of the current tau_w. The inverse mass matrices
    /// must be up to date.
    ///
    /// # Errors
    /// Failure of the local solves
    pub fn reproject(
        &self,
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        shape_std: &ShapeInfo,
        minv: &InverseMassMatrix,
        src: &BlockVector,
        dst: &mut BlockVector,
    ) -> Result<()> {
        let old = self.previous_context(mesh);
        let new = self.context(mesh);
        cell_loop(
            mesh,
            dst,
            0,
            || {
                (
                    XWallCellEvaluator::<DIM>::new(shape_std, geometry, Some(old)),
                    XWallCellEvaluator::<DIM>::new(shape_std, geometry, Some(new)),
                )
            },
            |(old, new), batch| {
                old.reinit(batch);
                new.reinit(batch);
                old.read_dof_values(src);
                old.evaluate(true, false);
                for q in 0..old.n_q_points() {
                    new.submit_value(old.value(q), q);
                }
                let mut local = new.integrate(true, false);
                let det = LaneGeometry::new(geometry, &batch_cells(batch)).det;
                self.inverse.apply_local(minv, batch, det, DIM, &mut local)?;
                Ok(local)
            },
        )
    }
}

/// Canonical global vertices at both ends of *face* of local cell
/// *cell*, ordered along the tangential coordinate
fn face_vertices(mesh: &LocalMesh, cell: usize, face: usize) -> [[usize; DIM]; 2] {
    let [i, j] = mesh.global_index(CellRef::Local(cell));
    let ends = match face {
        0 => [[i, j], [i, j + 1]],
        1 => [[i + 1, j], [i + 1, j + 1]],
        2 => [[i, j], [i + 1, j]],
        _ => [[i, j + 1], [i + 1, j + 1]],
    };
    [mesh.global.canonical_vertex(ends[0]), mesh.global.canonical_vertex(ends[1])]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use std::sync::Arc;

    struct Setup {
        mesh: LocalMesh,
        geo: ElementGeometryCache,
        shape: ShapeInfo,
    }

    fn setup() -> Setup {
        let mesh = StructuredMesh::channel(3, 6, 1., 0.).unwrap();
        let mesh = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let geo = ElementGeometryCache::new(&mesh);
        Setup {
            mesh,
            geo,
            shape: ShapeInfo::new(2, 4),
        }
    }

    fn params() -> XWallParameters {
        XWallParameters {
            max_wall_distance: 0.4,
            initial_tauw: 0.5,
            ..XWallParameters::default()
        }
    }

    /// Nodal interpolation of `(1 - y^2, 0)`, zero enrichment dofs
    fn poiseuille(s: &Setup, n_enr: usize) -> BlockVector {
        let mut u = BlockVector::new(s.mesh.partitioner(), &[9, 9, n_enr, n_enr]);
        for cell in 0..s.mesh.n_local() {
            let (lower, extent) = s.mesh.cell_box(CellRef::Local(cell));
            let mut dofs = u.blocks[0].cell_mut(cell);
            for (i, d) in dofs.iter_mut().enumerate() {
                let y = lower[1] + 0.5 * (s.shape.dof_point(i)[1] + 1.) * extent[1];
                *d = 1. - y * y;
            }
        }
        u.update_ghost_values();
        u
    }

    #[test]
    fn test_poiseuille_wall_shear_stress() {
        let s = setup();
        let nu = 1e-2;
        let mut xwall = XWall::new(&s.mesh, &s.geo, &s.shape, &params(), nu, &[0]).unwrap();
        assert!(xwall.inverse().is_valid());
        assert!(xwall.needs_update(1));
        let u = poiseuille(&s, xwall.n_dofs());
        xwall
            .update_wall_shear_stress(&s.mesh, &s.geo, &s.shape, &u, None)
            .unwrap();
        for tau in xwall.tauw_wall() {
            assert!((tau - 2. * nu).abs() < 1e-12, "tau_w = {}", tau);
        }
        for tau in xwall.tauw().v.iter() {
            assert!((tau - 2. * nu).abs() < 1e-12);
        }
        assert!(xwall.tauw_previous().v.iter().all(|t| *t == 0.5));
        assert!(!xwall.inverse().is_valid());
        assert!(!xwall.needs_update(2));
    }

    #[test]
    fn test_reprojection_keeps_polynomial_part() {
        let s = setup();
        let mut xwall = XWall::new(&s.mesh, &s.geo, &s.shape, &params(), 1e-3, &[0]).unwrap();
        let u = poiseuille(&s, xwall.n_dofs());
        xwall
            .update_wall_shear_stress(&s.mesh, &s.geo, &s.shape, &u, None)
            .unwrap();
        xwall.rebuild_inverse(&s.mesh, &s.geo, &s.shape).unwrap();
        let minv = InverseMassMatrix::new(&s.shape).unwrap();
        let mut v = u.clone();
        xwall
            .reproject(&s.mesh, &s.geo, &s.shape, &minv, &u, &mut v)
            .unwrap();
        // a polynomial velocity is represented exactly in both bases
        let mut diff = v.clone();
        diff.add_scaled(-1., &u);
        assert!(diff.norm_linf() < 1e-8, "error {}", diff.norm_linf());
    }
}
