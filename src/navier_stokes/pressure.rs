//! Right-hand side of the pressure Poisson equation
//!
//! `-lap p = -gamma0/dt div u_hat`
//!
//! with the consistent Neumann condition on velocity Dirichlet faces
//!
//! `dp/dn = h = -n . (dg/dt + sum_i beta_i [(u_i . grad) u_i + nu curl omega_i] - f)`
//!
//! and `p = g_p` on outflow faces (Nitsche terms of the SIPG operator).
use super::bdf::BdfCoefficients;
use super::boundary_conditions::{vector_at, VectorFunction};
use super::discretization::Discretization;
use crate::error::Result;
use crate::fe::{cell_loop, divergence, face_neighbors, interior_mask, CellEvaluator, Coupling, FaceEvaluator, FieldEvaluator};
use crate::field::{BlockVector, TimeHistory};
use crate::mesh::FACES_PER_CELL;
use crate::parameters::DivergenceForm;
use crate::solver::PoissonSolver;
use crate::turbulence::EddyViscosityTable;
use crate::types::{dot, grad_times, Vectorized, DIM};
use crate::xwall::{XWallCellEvaluator, XWallFaceEvaluator};
use num_traits::Zero;

/// Fields entering the pressure right-hand side
pub struct PressureRhsData<'a> {
    /// Intermediate velocity after the explicit step (ghosts up to date)
    pub intermediate: &'a BlockVector,
    /// Velocity history (ghosts up to date)
    pub velocity: &'a TimeHistory<BlockVector>,
    /// Vorticity history (ghosts up to date)
    pub vorticity: &'a TimeHistory<BlockVector>,
    /// Effective viscosity of this step
    pub viscosity: &'a EddyViscosityTable,
    /// Body force
    pub body_force: Option<&'a dyn VectorFunction>,
    /// Time integrator coefficients
    pub bdf: BdfCoefficients,
    /// New time level
    pub time: f64,
    /// Time step
    pub dt: f64,
}

/// Assemble the pressure right-hand side into *dst*
///
/// # Errors
/// Propagated from the cell loop
pub fn pressure_rhs<P: PoissonSolver>(
    disc: &Discretization,
    poisson: &P,
    data: &PressureRhsData,
    dst: &mut BlockVector,
) -> Result<()> {
    let mesh = disc.mesh.as_ref();
    let ctx = disc.ctx();
    let penalty_table = poisson.penalty_parameter_table();
    let penalty_factor = poisson.penalty_factor();
    let degree_p = disc.shape_p.degree;
    let form = disc.params.divergence_form;
    let scale = data.bdf.gamma0 / data.dt;
    let zero = Vectorized::zero();
    let body_force = data.body_force;
    cell_loop(
        mesh,
        dst,
        0,
        || {
            (
                CellEvaluator::<1>::new(&disc.shape_p, &disc.geometry),
                FaceEvaluator::<1>::new(&disc.shape_p, &disc.geometry),
                XWallCellEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                XWallFaceEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                XWallFaceEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                FaceEvaluator::<1>::new(&disc.shape_u, &disc.geometry),
            )
        },
        |(p_cell, p_face, u_cell, u_minus, u_plus, omega), batch| {
            p_cell.reinit(batch);
            u_cell.reinit(batch);
            u_cell.read_dof_values(data.intermediate);
            let mut out = match form {
                DivergenceForm::Strong => {
                    u_cell.evaluate(false, true);
                    for q in 0..u_cell.n_q_points() {
                        p_cell.submit_value([-divergence(&u_cell.gradient(q)) * scale], q);
                    }
                    p_cell.integrate(true, false)
                }
                DivergenceForm::PartiallyIntegrated => {
                    u_cell.evaluate(true, false);
                    for q in 0..u_cell.n_q_points() {
                        let u = u_cell.value(q);
                        p_cell.submit_gradient([[u[0] * scale, u[1] * scale]], q);
                    }
                    p_cell.integrate(false, true)
                }
            };

            for face in 0..FACES_PER_CELL {
                let neighbors = face_neighbors(mesh, batch, face);
                let interior = interior_mask(&neighbors);
                let velocity_dirichlet = disc.boundary.velocity_dirichlet_mask(&neighbors);
                let pressure_dirichlet = disc.boundary.pressure_dirichlet_mask(&neighbors);
                let flux_terms = form == DivergenceForm::PartiallyIntegrated;
                if !flux_terms && !velocity_dirichlet.any() && !pressure_dirichlet.any() {
                    continue;
                }
                p_face.reinit_interior(batch, face);
                let n_q = p_face.n_q_points();
                let n = p_face.normal();
                let mut values = vec![zero; n_q];
                let mut gradients = vec![[zero; DIM]; n_q];

                if flux_terms {
                    u_minus.reinit_interior(batch, face);
                    u_plus.reinit_exterior(mesh, batch, face, Coupling::Full);
                    u_minus.read_dof_values(data.intermediate);
                    u_plus.read_dof_values(data.intermediate);
                    u_minus.evaluate(true, false);
                    u_plus.evaluate(true, false);
                    for (q, value) in values.iter_mut().enumerate() {
                        let (um, up) = (u_minus.value(q), u_plus.value(q));
                        let g = disc
                            .boundary
                            .velocity_data(&neighbors, &p_face.quadrature_point(q), data.time, false);
                        let mut flux = [zero; DIM];
                        for c in 0..DIM {
                            let boundary = Vectorized::select(velocity_dirichlet, g[c], um[c]);
                            flux[c] = Vectorized::select(interior, (um[c] + up[c]) * 0.5, boundary);
                        }
                        *value -= dot(&flux, &n) * scale;
                    }
                }

                if velocity_dirichlet.any() {
                    let mut h = vec![zero; n_q];
                    for (q, hq) in h.iter_mut().enumerate() {
                        let x = p_face.quadrature_point(q);
                        let dg = disc.boundary.velocity_data(&neighbors, &x, data.time, true);
                        let f = body_force.map_or([zero; DIM], |f| vector_at(f, &x, data.time));
                        *hq = dot(&[dg[0] - f[0], dg[1] - f[1]], &n);
                    }
                    for (i, beta) in data.bdf.beta.iter().enumerate() {
                        if *beta == 0. {
                            continue;
                        }
                        u_minus.reinit_interior(batch, face);
                        u_minus.read_dof_values(&data.velocity[i]);
                        u_minus.evaluate(true, true);
                        omega.reinit_interior(batch, face);
                        omega.read_dof_values(&data.vorticity[i]);
                        omega.evaluate(false, true);
                        for (q, hq) in h.iter_mut().enumerate() {
                            let u = u_minus.value(q);
                            let convection = grad_times(&u_minus.gradient(q), &u);
                            let nu = data.viscosity.face(batch.index, face, q);
                            let gw = omega.gradient(q)[0];
                            let term = [convection[0] + nu * gw[1], convection[1] - nu * gw[0]];
                            *hq += dot(&term, &n) * *beta;
                        }
                    }
                    for (value, hq) in values.iter_mut().zip(h.iter()) {
                        *value += Vectorized::select(velocity_dirichlet, -*hq, zero);
                    }
                }

                if pressure_dirichlet.any() {
                    let measure = Vectorized::from_fn(|l| penalty_table[batch.cells[l]]);
                    let tau = disc.geometry.face_penalty(penalty_factor, degree_p, measure, &neighbors);
                    for q in 0..n_q {
                        let gp = disc
                            .boundary
                            .pressure_data(&neighbors, &p_face.quadrature_point(q), data.time);
                        values[q] += Vectorized::select(pressure_dirichlet, tau * gp * 2., zero);
                        for d in 0..DIM {
                            gradients[q][d] = Vectorized::select(pressure_dirichlet, -gp * n[d], zero);
                        }
                    }
                }

                for q in 0..n_q {
                    p_face.submit_value([values[q]], q);
                    p_face.submit_gradient([gradients[q]], q);
                }
                out.add(&p_face.integrate(true, pressure_dirichlet.any()));
            }
            Ok(out)
        },
    )
}
