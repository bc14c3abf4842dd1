//! Vorticity `omega = dv/dx - du/dy`, L2 projected onto the velocity
//! polynomials
use super::discretization::Discretization;
use crate::error::Result;
use crate::fe::{cell_loop, curl, CellEvaluator, FieldEvaluator};
use crate::field::BlockVector;
use crate::types::DIM;
use crate::xwall::XWallCellEvaluator;

/// `dst = M^{-1} (curl u, q)`, *velocity* needs no ghost values
///
/// # Errors
/// Propagated from the cell loop
pub fn compute_vorticity(disc: &Discretization, velocity: &BlockVector, dst: &mut BlockVector) -> Result<()> {
    let ctx = disc.ctx();
    cell_loop(
        &disc.mesh,
        dst,
        0,
        || {
            (
                XWallCellEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                CellEvaluator::<1>::new(&disc.shape_u, &disc.geometry),
            )
        },
        |(u, omega), batch| {
            u.reinit(batch);
            omega.reinit(batch);
            u.read_dof_values(velocity);
            u.evaluate(false, true);
            for q in 0..u.n_q_points() {
                omega.submit_value([curl(&u.gradient(q))], q);
            }
            let mut local = omega.integrate(true, false);
            disc.minv_u.apply(&mut local.blocks[0], omega.lanes().det);
            Ok(local)
        },
    )?;
    dst.update_ghost_values();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{CellRef, LocalMesh, StructuredMesh};
    use crate::mpi::SerialCommunicator;
    use crate::navier_stokes::BoundaryDescriptor;
    use crate::parameters::Parameters;
    use std::sync::Arc;

    #[test]
    fn test_solid_body_rotation() {
        let mesh = StructuredMesh::rectangle(2, 3, -1., 1., 0., 2.).unwrap();
        let mesh = Arc::new(LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap());
        let rotation = |x: [f64; DIM], _: f64| [-x[1], x[0]];
        let boundary = (0..4).fold(BoundaryDescriptor::new(), |b, id| b.with_velocity(id, rotation));
        let disc = Discretization::new(mesh, Parameters::with_degree(2), boundary).unwrap();
        let u = disc.project_velocity(&|x: [f64; DIM], _: f64| [-x[1], x[0]], 0.).unwrap();
        let mut omega = disc.scalar_vector();
        compute_vorticity(&disc, &u, &mut omega).unwrap();
        for cell in 0..disc.mesh.n_local() {
            for w in omega.blocks[0].cell(CellRef::Local(cell)).iter() {
                assert!((w - 2.).abs() < 1e-12);
            }
        }
    }
}
