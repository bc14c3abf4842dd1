//! Projection step
//!
//! `u_hathat = u_hat - dt/gamma0 M^{-1} G p`
//!
//! optionally followed by the element-wise grad-div penalty
//!
//! `(M + dt tau_D D) u = M u_hathat`, `tau_D = k_div |u_cell| h / (k + 1)`,
//!
//! which improves mass conservation of the projected velocity.
//!
//! With a positive `k_cont` the interior faces carry the continuity penalty
//!
//! `dt tau_C ([u], [v])`, `tau_C = k_cont (|u_m| + |u_p|) / 2`,
//!
//! with `u_m`, `u_p` the face means of `u_hathat` on either side. The
//! system then couples neighbouring cells and is solved with CG.
use super::bdf::BdfCoefficients;
use super::discretization::Discretization;
use super::viscous::InverseMassPreconditioner;
use crate::error::Result;
use crate::fe::{
    batch_cells, cell_loop, divergence, face_neighbors, interior_mask, local_matrices, CellEvaluator, Coupling,
    FaceEvaluator, FieldEvaluator,
};
use crate::field::{BlockVector, LocalDofs};
use crate::mesh::{CellBatch, FACES_PER_CELL};
use crate::parameters::GradientForm;
use crate::solver::{cg, LinearOperator};
use crate::types::{Vectorized, DIM};
use crate::xwall::{XWallCellEvaluator, XWallFaceEvaluator};
use ndarray::{s, Array1};
use ndarray_linalg::Solve;
use num_traits::Zero;

/// Fields entering the projection
pub struct ProjectionData<'a> {
    /// Intermediate velocity
    pub intermediate: &'a BlockVector,
    /// Pressure of the new time level (ghosts up to date)
    pub pressure: &'a BlockVector,
    /// Time integrator coefficients
    pub bdf: BdfCoefficients,
    /// New time level
    pub time: f64,
    /// Time step
    pub dt: f64,
}

/// Projected velocity into *dst*
///
/// # Errors
/// Failure of the local solves
pub fn projection_step(disc: &Discretization, data: &ProjectionData, dst: &mut BlockVector) -> Result<()> {
    let mesh = disc.mesh.as_ref();
    let ctx = disc.ctx();
    let factor = data.dt / data.bdf.gamma0;
    let coupled = disc.params.k_cont > 0.;
    let zero = Vectorized::zero();
    cell_loop(
        mesh,
        dst,
        0,
        || {
            (
                XWallCellEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                CellEvaluator::<1>::new(&disc.shape_p, &disc.geometry),
                XWallFaceEvaluator::<DIM>::new(&disc.shape_u, &disc.geometry, ctx),
                FaceEvaluator::<1>::new(&disc.shape_p, &disc.geometry),
                FaceEvaluator::<1>::new(&disc.shape_p, &disc.geometry),
            )
        },
        |(u_cell, p_cell, u_face, p_minus, p_plus), batch| {
            u_cell.reinit(batch);
            p_cell.reinit(batch);
            p_cell.read_dof_values(data.pressure);
            let mut gradient = match disc.params.gradient_form {
                GradientForm::Strong => {
                    p_cell.evaluate(false, true);
                    for q in 0..p_cell.n_q_points() {
                        let g = p_cell.gradient(q)[0];
                        u_cell.submit_value([g[0], g[1]], q);
                    }
                    u_cell.integrate(true, false)
                }
                GradientForm::PartiallyIntegrated => {
                    p_cell.evaluate(true, false);
                    for q in 0..p_cell.n_q_points() {
                        let p = p_cell.value(q)[0];
                        u_cell.submit_gradient([[-p, zero], [zero, -p]], q);
                    }
                    let mut gradient = u_cell.integrate(false, true);
                    for face in 0..FACES_PER_CELL {
                        u_face.reinit_interior(batch, face);
                        p_minus.reinit_interior(batch, face);
                        p_plus.reinit_exterior(mesh, batch, face, Coupling::Full);
                        p_minus.read_dof_values(data.pressure);
                        p_plus.read_dof_values(data.pressure);
                        p_minus.evaluate(true, false);
                        p_plus.evaluate(true, false);
                        let neighbors = face_neighbors(mesh, batch, face);
                        let interior = interior_mask(&neighbors);
                        let dirichlet = disc.boundary.pressure_dirichlet_mask(&neighbors);
                        let n = u_face.normal();
                        for q in 0..u_face.n_q_points() {
                            let (pm, pp) = (p_minus.value(q)[0], p_plus.value(q)[0]);
                            let gp = disc
                                .boundary
                                .pressure_data(&neighbors, &u_face.quadrature_point(q), data.time);
                            let boundary = Vectorized::select(dirichlet, gp, pm);
                            let flux = Vectorized::select(interior, (pm + pp) * 0.5, boundary);
                            u_face.submit_value([flux * n[0], flux * n[1]], q);
                        }
                        gradient.add(&u_face.integrate(true, false));
                    }
                    gradient
                }
            };
            disc.apply_inverse_mass_velocity(batch, &mut gradient)?;
            let cells = batch_cells(batch);
            let mut local = LocalDofs::gather(data.intermediate, 0, data.intermediate.n_blocks(), &cells);
            for (u, g) in local.blocks.iter_mut().zip(gradient.blocks.iter()) {
                for (ui, gi) in u.iter_mut().zip(g.iter()) {
                    *ui -= *gi * factor;
                }
            }
            if disc.params.k_div > 0. && !coupled {
                grad_div_penalty(disc, u_cell, batch, data.dt, &mut local)?;
            }
            Ok(local)
        },
    )?;
    dst.update_ghost_values();
    if coupled {
        penalty_solve(disc, data.dt, dst)?;
    }
    Ok(())
}

/// `dt tau_D` from the cell means of the values evaluated in *eval*
fn grad_div_factor(disc: &Discretization, eval: &XWallCellEvaluator<DIM>, dt: f64) -> Vectorized {
    let zero = Vectorized::zero();
    let mut mean = [zero; DIM];
    let mut volume = zero;
    for q in 0..eval.n_q_points() {
        let (u, w) = (eval.value(q), eval.jxw(q));
        for c in 0..DIM {
            mean[c] += u[c] * w;
        }
        volume += w;
    }
    let speed = (mean[0] * mean[0] + mean[1] * mean[1]).sqrt() / volume;
    speed * eval.plain().lanes().h * (disc.params.k_div / (disc.params.degree + 1) as f64) * dt
}

/// `dt tau_C` from the face means of the values evaluated in *minus* and
/// *plus*. Both sides see the same factor.
fn continuity_factor(
    disc: &Discretization,
    minus: &XWallFaceEvaluator<DIM>,
    plus: &XWallFaceEvaluator<DIM>,
    dt: f64,
) -> Vectorized {
    let zero = Vectorized::zero();
    let (mut mean_m, mut mean_p) = ([zero; DIM], [zero; DIM]);
    let mut area = zero;
    for q in 0..minus.n_q_points() {
        let (um, up, w) = (minus.value(q), plus.value(q), minus.jxw(q));
        for c in 0..DIM {
            mean_m[c] += um[c] * w;
            mean_p[c] += up[c] * w;
        }
        area += w;
    }
    let norm = |m: [Vectorized; DIM]| (m[0] * m[0] + m[1] * m[1]).sqrt() / area;
    (norm(mean_m) + norm(mean_p)) * (0.5 * disc.params.k_cont * dt)
}

/// Scratch data of the coupled projection operator
type Scratch<'a> = (
    XWallCellEvaluator<'a, DIM>,
    XWallCellEvaluator<'a, DIM>,
    XWallFaceEvaluator<'a, DIM>,
    XWallFaceEvaluator<'a, DIM>,
    XWallFaceEvaluator<'a, DIM>,
    XWallFaceEvaluator<'a, DIM>,
);

/// `M + dt tau_D D + dt tau_C J` with penalty factors frozen from the
/// velocity after the pressure correction
pub struct ProjectionOperator<'a> {
    disc: &'a Discretization,
    frozen: &'a BlockVector,
    dt: f64,
}

impl<'a> ProjectionOperator<'a> {
    /// Operator with penalty factors of *frozen* (ghosts up to date)
    pub fn new(disc: &'a Discretization, frozen: &'a BlockVector, dt: f64) -> Self {
        Self { disc, frozen, dt }
    }

    fn scratch(&self) -> Scratch<'a> {
        let ctx = self.disc.ctx();
        let (shape, geometry) = (&self.disc.shape_u, &self.disc.geometry);
        (
            XWallCellEvaluator::new(shape, geometry, ctx),
            XWallCellEvaluator::new(shape, geometry, ctx),
            XWallFaceEvaluator::new(shape, geometry, ctx),
            XWallFaceEvaluator::new(shape, geometry, ctx),
            XWallFaceEvaluator::new(shape, geometry, ctx),
            XWallFaceEvaluator::new(shape, geometry, ctx),
        )
    }

    fn local_apply(&self, scratch: &mut Scratch, batch: &CellBatch, src: &BlockVector) -> LocalDofs {
        let (cell, frozen_cell, minus, plus, frozen_minus, frozen_plus) = scratch;
        let mesh = self.disc.mesh.as_ref();
        let zero = Vectorized::zero();
        frozen_cell.reinit(batch);
        frozen_cell.read_dof_values(self.frozen);
        frozen_cell.evaluate(true, false);
        let tau_d = grad_div_factor(self.disc, frozen_cell, self.dt);

        cell.reinit(batch);
        cell.read_dof_values(src);
        cell.evaluate(true, true);
        for q in 0..cell.n_q_points() {
            let u = cell.value(q);
            let div = divergence(&cell.gradient(q)) * tau_d;
            cell.submit_value(u, q);
            cell.submit_gradient([[div, zero], [zero, div]], q);
        }
        let mut out = cell.integrate(true, true);

        for face in 0..FACES_PER_CELL {
            let neighbors = face_neighbors(mesh, batch, face);
            let interior = interior_mask(&neighbors);
            if !interior.any() {
                continue;
            }
            frozen_minus.reinit_interior(batch, face);
            frozen_plus.reinit_exterior(mesh, batch, face, Coupling::Full);
            frozen_minus.read_dof_values(self.frozen);
            frozen_plus.read_dof_values(self.frozen);
            frozen_minus.evaluate(true, false);
            frozen_plus.evaluate(true, false);
            let tau_c = continuity_factor(self.disc, frozen_minus, frozen_plus, self.dt);

            minus.reinit_interior(batch, face);
            plus.reinit_exterior(mesh, batch, face, Coupling::Full);
            minus.read_dof_values(src);
            plus.read_dof_values(src);
            minus.evaluate(true, false);
            plus.evaluate(true, false);
            for q in 0..minus.n_q_points() {
                let (vm, vp) = (minus.value(q), plus.value(q));
                let mut value = [zero; DIM];
                for c in 0..DIM {
                    value[c] = Vectorized::select(interior, tau_c * (vm[c] - vp[c]), zero);
                }
                minus.submit_value(value, q);
            }
            out.add(&minus.integrate(true, false));
        }
        out
    }

    /// `dst = M src`
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn mass(&self, dst: &mut BlockVector, src: &BlockVector) -> Result<()> {
        cell_loop(
            &self.disc.mesh,
            dst,
            0,
            || self.scratch(),
            |(cell, ..), batch| {
                cell.reinit(batch);
                cell.read_dof_values(src);
                cell.evaluate(true, false);
                for q in 0..cell.n_q_points() {
                    let u = cell.value(q);
                    cell.submit_value(u, q);
                }
                Ok(cell.integrate(true, false))
            },
        )
    }
}

impl<'a> LinearOperator<BlockVector> for ProjectionOperator<'a> {
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

/// Solve `(M + dt tau_D D + dt tau_C J) x = M u` over all cells, *dst*
/// holds `u` on entry and `x` on exit
fn penalty_solve(disc: &Discretization, dt: f64, dst: &mut BlockVector) -> Result<()> {
    let frozen = dst.clone();
    let op = ProjectionOperator::new(disc, &frozen, dt);
    let mut rhs = disc.velocity_vector();
    op.mass(&mut rhs, &frozen)?;
    let prec = InverseMassPreconditioner::new(disc, 1.);
    let control = cg(&op, &prec, dst, &rhs, &disc.params.projection_solver)?;
    control.warn_if_not_converged("projection");
    dst.update_ghost_values();
    Ok(())
}

/// Solve `(M + dt tau_D D) x = M u` cell by cell, *local* holds `u` on
/// entry and `x` on exit. On cells without enrichment only the
/// polynomial dofs take part.
fn grad_div_penalty(
    disc: &Discretization,
    eval: &mut XWallCellEvaluator<DIM>,
    batch: &CellBatch,
    dt: f64,
    local: &mut LocalDofs,
) -> Result<()> {
    let zero = Vectorized::zero();
    eval.set_dof_values(local);
    eval.evaluate(true, false);
    let tau = grad_div_factor(disc, eval, dt);

    for q in 0..eval.n_q_points() {
        let u = eval.value(q);
        eval.submit_value(u, q);
    }
    let rhs = eval.integrate(true, false);

    let layout = eval.dofs_per_block();
    let matrices = local_matrices(&layout, |unit| {
        eval.set_dof_values(unit);
        eval.evaluate(true, true);
        for q in 0..eval.n_q_points() {
            let u = eval.value(q);
            let div = divergence(&eval.gradient(q)) * tau;
            eval.submit_value(u, q);
            eval.submit_gradient([[div, zero], [zero, div]], q);
        }
        Ok(eval.integrate(true, true))
    })?;

    let n_total = local.len();
    let n_std = DIM * disc.shape_u.n_dofs;
    let mask = eval.mask();
    for (lane, _) in batch.filled_lanes() {
        let n = if mask.is_set(lane) { n_total } else { n_std };
        let a = matrices[lane].slice(s![..n, ..n]).to_owned();
        let b: Array1<f64> = (0..n).map(|i| rhs.flat(i)[lane]).collect();
        let x = a.solve_into(b)?;
        for i in 0..n_total {
            local.flat_mut(i)[lane] = if i < n { x[i] } else { 0. };
        }
    }
    Ok(())
}
