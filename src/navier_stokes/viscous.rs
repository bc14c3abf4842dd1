//! Implicit viscous step
//!
//! `gamma0/dt (u, v) + a_nu(u, v) = gamma0/dt (u_hathat, v) + l_nu(g; v)`
//!
//! where `a_nu` is the symmetric interior penalty form of `-div(nu_eff grad u)`
//! with the effective viscosity frozen for the time step. Velocity
//! Dirichlet faces are treated by Nitsche's method, outflow faces carry
//! zero traction.
use super::discretization::Discretization;
use crate::error::Result;
use crate::fe::{cell_loop, face_neighbors, homogeneous_exterior_state, interior_mask, Coupling, FieldEvaluator};
use crate::field::{BlockVector, LocalDofs};
use crate::mesh::{CellBatch, CellRef, Neighbor, FACES_PER_CELL};
use crate::solver::{LinearOperator, Preconditioner};
use crate::turbulence::EddyViscosityTable;
use crate::types::{dot, Vectorized, DIM, LANES};
use crate::xwall::{XWallCellEvaluator, XWallFaceEvaluator};
use num_traits::Zero;

/// Scratch data of the operator kernel
type Scratch<'a> = (
    XWallCellEvaluator<'a, DIM>,
    XWallFaceEvaluator<'a, DIM>,
    XWallFaceEvaluator<'a, DIM>,
);

/// Helmholtz-like operator of the viscous step
pub struct ViscousOperator<'a> {
    disc: &'a Discretization,
    viscosity: &'a EddyViscosityTable,
    factor: f64,
}

impl<'a> ViscousOperator<'a> {
    /// Operator with mass factor *factor* (`gamma0/dt`)
    pub fn new(disc: &'a Discretization, viscosity: &'a EddyViscosityTable, factor: f64) -> Self {
        Self {
            disc,
            viscosity,
            factor,
        }
    }

    fn scratch(&self) -> Scratch<'a> {
        let ctx = self.disc.ctx();
        let (shape, geometry) = (&self.disc.shape_u, &self.disc.geometry);
        (
            XWallCellEvaluator::new(shape, geometry, ctx),
            XWallFaceEvaluator::new(shape, geometry, ctx),
            XWallFaceEvaluator::new(shape, geometry, ctx),
        )
    }

    /// Penalty parameter of a face of the batch cells with *neighbors*
    fn penalty(&self, batch: &CellBatch, neighbors: &[Neighbor; LANES]) -> Vectorized {
        let geometry = &self.disc.geometry;
        let minus = Vectorized::from_fn(|l| geometry.get(CellRef::Local(batch.cells[l])).penalty_measure);
        geometry.face_penalty(self.disc.params.stab_factor, self.disc.params.degree, minus, neighbors)
    }

    fn local_apply(&self, scratch: &mut Scratch, batch: &CellBatch, src: &BlockVector) -> LocalDofs {
        let (cell, minus, plus) = scratch;
        let mesh = self.disc.mesh.as_ref();
        cell.reinit(batch);
        cell.read_dof_values(src);
        cell.evaluate(true, true);
        for q in 0..cell.n_q_points() {
            let nu = self.viscosity.cell(batch.index, q);
            let (u, g) = (cell.value(q), cell.gradient(q));
            cell.submit_value([u[0] * self.factor, u[1] * self.factor], q);
            cell.submit_gradient([[g[0][0] * nu, g[0][1] * nu], [g[1][0] * nu, g[1][1] * nu]], q);
        }
        let mut out = cell.integrate(true, true);

        for face in 0..FACES_PER_CELL {
            minus.reinit_interior(batch, face);
            plus.reinit_exterior(mesh, batch, face, Coupling::Full);
            minus.read_dof_values(src);
            plus.read_dof_values(src);
            minus.evaluate(true, true);
            plus.evaluate(true, true);
            let neighbors = face_neighbors(mesh, batch, face);
            let interior = interior_mask(&neighbors);
            let dirichlet = self.disc.boundary.velocity_dirichlet_mask(&neighbors);
            let tau = self.penalty(batch, &neighbors);
            let n = minus.normal();
            for q in 0..minus.n_q_points() {
                let (vm, gm) = (minus.value(q), minus.gradient(q));
                let (vp, gp) =
                    homogeneous_exterior_state(interior, dirichlet, &vm, &gm, &plus.value(q), &plus.gradient(q));
                let nu = self.viscosity.face(batch.index, face, q);
                let mut value = [Vectorized::zero(); DIM];
                let mut gradient = [[Vectorized::zero(); DIM]; DIM];
                for c in 0..DIM {
                    let jump = vm[c] - vp[c];
                    let average_flux = (dot(&gm[c], &n) + dot(&gp[c], &n)) * 0.5;
                    value[c] = nu * (tau * jump - average_flux);
                    for d in 0..DIM {
                        gradient[c][d] = nu * jump * n[d] * -0.5;
                    }
                }
                minus.submit_value(value, q);
                minus.submit_gradient(gradient, q);
            }
            out.add(&minus.integrate(true, true));
        }
        out
    }

    /// Right-hand side: mass term of *src* plus the Dirichlet data at
    /// time *time*
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn rhs(&self, dst: &mut BlockVector, src: &BlockVector, time: f64) -> Result<()> {
        let disc = self.disc;
        let mesh = disc.mesh.as_ref();
        let zero = Vectorized::zero();
        cell_loop(
            mesh,
            dst,
            0,
            || self.scratch(),
            |(cell, minus, _), batch| {
                cell.reinit(batch);
                cell.read_dof_values(src);
                cell.evaluate(true, false);
                for q in 0..cell.n_q_points() {
                    let u = cell.value(q);
                    cell.submit_value([u[0] * self.factor, u[1] * self.factor], q);
                }
                let mut out = cell.integrate(true, false);
                for face in 0..FACES_PER_CELL {
                    let neighbors = face_neighbors(mesh, batch, face);
                    let dirichlet = disc.boundary.velocity_dirichlet_mask(&neighbors);
                    if !dirichlet.any() {
                        continue;
                    }
                    minus.reinit_interior(batch, face);
                    let tau = self.penalty(batch, &neighbors);
                    let n = minus.normal();
                    for q in 0..minus.n_q_points() {
                        let g = disc
                            .boundary
                            .velocity_data(&neighbors, &minus.quadrature_point(q), time, false);
                        let nu = self.viscosity.face(batch.index, face, q);
                        let mut value = [zero; DIM];
                        let mut gradient = [[zero; DIM]; DIM];
                        for c in 0..DIM {
                            value[c] = Vectorized::select(dirichlet, nu * tau * g[c] * 2., zero);
                            for d in 0..DIM {
                                gradient[c][d] = Vectorized::select(dirichlet, -nu * g[c] * n[d], zero);
                            }
                        }
                        minus.submit_value(value, q);
                        minus.submit_gradient(gradient, q);
                    }
                    out.add(&minus.integrate(true, true));
                }
                Ok(out)
            },
        )
    }
}

impl<'a> LinearOperator<BlockVector> for ViscousOperator<'a> {
    fn vmult(&self, dst: &mut BlockVector, src: &BlockVector) -> Result<()> {
        cell_loop(
            &self.disc.mesh,
            dst,
            0,
            || self.scratch(),
            |scratch, batch| Ok(self.local_apply(scratch, batch, src)),
        )
    }
}

/// `dst = scale M^{-1} src`, the inverse of the dominating mass term
pub struct InverseMassPreconditioner<'a> {
    disc: &'a Discretization,
    scale: f64,
}

impl<'a> InverseMassPreconditioner<'a> {
    /// Preconditioner scaled by *scale* (`dt/gamma0`)
    pub fn new(disc: &'a Discretization, scale: f64) -> Self {
        Self { disc, scale }
    }
}

impl<'a> Preconditioner<BlockVector> for InverseMassPreconditioner<'a> {
    fn apply(&self, dst: &mut BlockVector, src: &BlockVector) -> Result<()> {
        self.disc.inverse_mass_velocity(dst, src)?;
        dst.scale(self.scale);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{LocalMesh, StructuredMesh};
    use crate::mpi::SerialCommunicator;
    use crate::navier_stokes::BoundaryDescriptor;
    use crate::parameters::{KrylovParameters, Parameters, TurbulenceModelKind};
    use crate::solver::gmres;
    use crate::turbulence::EddyViscosityModel;
    use std::sync::Arc;

    const INFLOW: [f64; DIM] = [1., -0.5];

    /// Uniform inflow left and bottom, outflow right and top
    fn setup() -> Discretization {
        let mesh = StructuredMesh::rectangle(3, 4, 0., 1.5, 0., 2.).unwrap();
        let mesh = Arc::new(LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap());
        let inflow = |_: [f64; DIM], _: f64| INFLOW;
        let boundary = BoundaryDescriptor::new()
            .with_velocity(0, inflow)
            .with_velocity(2, inflow)
            .with_pressure(1, |_: [f64; DIM], _: f64| 0.)
            .with_pressure(3, |_: [f64; DIM], _: f64| 0.);
        let mut params = Parameters::with_degree(2);
        params.turbulence = TurbulenceModelKind::Smagorinsky { cs: 0.2 };
        Discretization::new(mesh, params, boundary).unwrap()
    }

    fn random_velocity(disc: &Discretization) -> BlockVector {
        let mut u = disc.velocity_vector();
        for b in &mut u.blocks {
            b.add_random(1.);
        }
        u.update_ghost_values();
        u
    }

    #[test]
    fn test_operator_is_symmetric_positive() {
        let disc = setup();
        let u = random_velocity(&disc);
        let model: EddyViscosityModel = disc.params.turbulence.into();
        let table = EddyViscosityTable::compute(
            &model,
            &disc.mesh,
            &disc.geometry,
            &disc.shape_u,
            disc.params.viscosity,
            &u,
            None,
        )
        .unwrap();
        let op = ViscousOperator::new(&disc, &table, 15.);
        let (x, y) = (random_velocity(&disc), random_velocity(&disc));
        let (mut ax, mut ay) = (x.clone(), y.clone());
        op.vmult(&mut ax, &x).unwrap();
        op.vmult(&mut ay, &y).unwrap();
        assert!((ax.dot(&y) - x.dot(&ay)).abs() < 1e-10 * ax.norm_l2() * y.norm_l2());
        assert!(ax.dot(&x) > 0.);
    }

    #[test]
    fn test_uniform_flow_is_reproduced() {
        let disc = setup();
        let table = EddyViscosityTable::constant(&disc.mesh, &disc.shape_u, disc.params.viscosity);
        let exact = disc.project_velocity(&|_: [f64; DIM], _: f64| INFLOW, 0.).unwrap();
        let op = ViscousOperator::new(&disc, &table, 10.);
        let mut rhs = disc.velocity_vector();
        op.rhs(&mut rhs, &exact, 0.).unwrap();
        let mut residual = disc.velocity_vector();
        op.vmult(&mut residual, &exact).unwrap();
        residual.add_scaled(-1., &rhs);
        assert!(residual.norm_linf() < 1e-11, "{}", residual.norm_linf());

        let mut u = disc.velocity_vector();
        let prec = InverseMassPreconditioner::new(&disc, 0.1);
        let params = KrylovParameters {
            abs_tol: 1e-13,
            rel_tol: 1e-12,
            ..disc.params.viscous_solver
        };
        let control = gmres(&op, &prec, &mut u, &rhs, &params).unwrap();
        assert!(control.converged);
        u.add_scaled(-1., &exact);
        assert!(u.norm_linf() < 1e-8, "{}", u.norm_linf());
    }
}
