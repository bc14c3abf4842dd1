//! Explicit convective term
//!
//! `-C(u) = (u (x) u, grad v) - <F* n, v>`
//!
//! with the local Lax-Friedrichs flux
//!
//! `F* n = 1/2 (u- (u- . n) + u+ (u+ . n)) + lambda/2 (u- - u+)`.
//!
//! Exterior state on boundaries: `u+ = -u- + 2 g` on velocity Dirichlet
//! faces, `u+ = u-` on outflow faces.
use super::discretization::Discretization;
use crate::error::Result;
use crate::fe::{cell_loop, face_neighbors, interior_mask, Coupling, FieldEvaluator};
use crate::field::BlockVector;
use crate::mesh::FACES_PER_CELL;
use crate::types::{dot, Tensor1, Tensor2, Vectorized, DIM};
use crate::xwall::{XWallCellEvaluator, XWallFaceEvaluator};

/// Largest absolute eigenvalue of the symmetric part of the flux
/// jacobian `(u . n) I + u n^T`
#[inline]
pub fn max_flux_eigenvalue(u: &Tensor1<DIM>, n: &[Vectorized; DIM]) -> Vectorized {
    let un = dot(u, n);
    let a = un + u[0] * n[0];
    let c = un + u[1] * n[1];
    let b = (u[0] * n[1] + u[1] * n[0]) * 0.5;
    let mean = (a + c) * 0.5;
    let half_diff = (a - c) * 0.5;
    mean.abs() + (half_diff * half_diff + b * b).sqrt()
}

/// Local Lax-Friedrichs flux `F* n`
#[inline]
pub fn lax_friedrichs_flux(
    u_minus: &Tensor1<DIM>,
    u_plus: &Tensor1<DIM>,
    n: &[Vectorized; DIM],
) -> Tensor1<DIM> {
    let (un_m, un_p) = (dot(u_minus, n), dot(u_plus, n));
    let lambda = max_flux_eigenvalue(u_minus, n).max(max_flux_eigenvalue(u_plus, n));
    let mut flux = [Vectorized::splat(0.); DIM];
    for c in 0..DIM {
        flux[c] = (u_minus[c] * un_m + u_plus[c] * un_p) * 0.5 + lambda * 0.5 * (u_minus[c] - u_plus[c]);
    }
    flux
}

/// `u (x) u`
#[inline]
fn outer(u: &Tensor1<DIM>) -> Tensor2<DIM> {
    [[u[0] * u[0], u[0] * u[1]], [u[1] * u[0], u[1] * u[1]]]
}

/// `dst = M^{-1} (-C(u))` with boundary data at time *time*. *velocity*
/// must hold up to date ghost values.
///
/// # Errors
/// Failure of the local solves on enriched cells
pub fn convective_term(disc: &Discretization, velocity: &BlockVector, time: f64, dst: &mut BlockVector) -> Result<()> {
    let mesh = disc.mesh.as_ref();
    let ctx = disc.ctx();
    cell_loop(
        mesh,
        dst,
        0,
        || {
            (
                XWallCellEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                XWallFaceEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                XWallFaceEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
            )
        },
        |(cell, minus, plus), batch| {
            cell.reinit(batch);
            cell.read_dof_values(velocity);
            cell.evaluate(true, false);
            for q in 0..cell.n_q_points() {
                cell.submit_gradient(outer(&cell.value(q)), q);
            }
            let mut out = cell.integrate(false, true);

            for face in 0..FACES_PER_CELL {
                minus.reinit_interior(batch, face);
                plus.reinit_exterior(mesh, batch, face, Coupling::Full);
                minus.read_dof_values(velocity);
                plus.read_dof_values(velocity);
                minus.evaluate(true, false);
                plus.evaluate(true, false);
                let neighbors = face_neighbors(mesh, batch, face);
                let interior = interior_mask(&neighbors);
                let dirichlet = disc.boundary.velocity_dirichlet_mask(&neighbors);
                let n = minus.normal();
                for q in 0..minus.n_q_points() {
                    let um = minus.value(q);
                    let up = plus.value(q);
                    let g = disc
                        .boundary
                        .velocity_data(&neighbors, &minus.quadrature_point(q), time, false);
                    let mut ext = [Vectorized::splat(0.); DIM];
                    for c in 0..DIM {
                        let boundary = Vectorized::select(dirichlet, -um[c] + g[c] * 2., um[c]);
                        ext[c] = Vectorized::select(interior, up[c], boundary);
                    }
                    let flux = lax_friedrichs_flux(&um, &ext, &n);
                    minus.submit_value([-flux[0], -flux[1]], q);
                }
                out.add(&minus.integrate(true, false));
            }
            disc.apply_inverse_mass_velocity(batch, &mut out)?;
            Ok(out)
        },
    )?;
    dst.update_ghost_values();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{LocalMesh, StructuredMesh};
    use crate::mpi::SerialCommunicator;
    use crate::navier_stokes::BoundaryDescriptor;
    use crate::parameters::Parameters;
    use std::sync::Arc;

    #[test]
    fn test_eigenvalue_of_normal_flow() {
        let u = [Vectorized::splat(1.), Vectorized::splat(0.)];
        let n = [Vectorized::splat(1.), Vectorized::splat(0.)];
        assert_eq!(max_flux_eigenvalue(&u, &n), Vectorized::splat(2.));
        // tangential flow: eigenvalues +-1/2
        let n = [Vectorized::splat(0.), Vectorized::splat(1.)];
        assert!((max_flux_eigenvalue(&u, &n)[0] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_flux_is_consistent() {
        let u = [Vectorized([1., -2., 0.5, 0.]), Vectorized([0.3, 1., -1., 2.])];
        let n = [Vectorized::splat(0.6), Vectorized::splat(0.8)];
        let flux = lax_friedrichs_flux(&u, &u, &n);
        let un = dot(&u, &n);
        for c in 0..DIM {
            for l in 0..4 {
                assert!((flux[c][l] - u[c][l] * un[l]).abs() < 1e-14);
            }
        }
    }

    #[test]
    fn test_constant_flow_has_no_convection() {
        let mesh = StructuredMesh::rectangle(3, 3, 0., 1., 0., 1.).unwrap().with_periodic(0).with_periodic(1);
        let mesh = Arc::new(LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap());
        let disc = Discretization::new(mesh, Parameters::with_degree(2), BoundaryDescriptor::new()).unwrap();
        let u = disc.project_velocity(&|_: [f64; DIM], _: f64| [1., 0.5], 0.).unwrap();
        let mut c = disc.velocity_vector();
        convective_term(&disc, &u, 0., &mut c).unwrap();
        assert!(c.norm_linf() < 1e-12, "{}", c.norm_linf());
    }
}
