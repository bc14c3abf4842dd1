//! # Dual splitting scheme
//! Solver for the 2-dimensional incompressible Navier-Stokes equations
//! $$
//! \partial_t u + (u \cdot \nabla) u = - \nabla p + \nabla \cdot (\nu_{eff} \nabla u) + f,
//! \quad \nabla \cdot u = 0
//! $$
//! discretized with discontinuous Galerkin elements, optionally enriched by
//! a wall function near no-slip walls.
//!
//! Every time step runs the following phases strictly in order:
//! 1. tau_w update of the enrichment (re-projection of the history)
//! 2. explicit convective step (BDF extrapolation)
//! 3. pressure Poisson equation
//! 4. projection onto (nearly) divergence free velocities
//! 5. implicit viscous step, then rotation of the history
//!
//! # Example
//! Channel flow with wall enrichment
//! ```ignore
//! use dgxwall::mesh::StructuredMesh;
//! use dgxwall::mpi::SerialCommunicator;
//! use dgxwall::navier_stokes::{BoundaryDescriptor, FieldFunctions, NavierStokesOperation};
//! use dgxwall::parameters::Parameters;
//! use std::sync::Arc;
//!
//! let mesh = StructuredMesh::channel(8, 8, 6.28, 1.8).unwrap();
//! let boundary = BoundaryDescriptor::new().with_wall(0);
//! let functions = FieldFunctions::default().with_body_force(|_: [f64; 2], _: f64| [1., 0.]);
//! let mut navier = NavierStokesOperation::new(
//!     mesh,
//!     Arc::new(SerialCommunicator),
//!     Parameters::default(),
//!     boundary,
//!     functions,
//!     0.,
//! )
//! .unwrap();
//! navier.do_timestep(0., 1e-3, 1).unwrap();
//! ```
use super::bdf::BdfCoefficients;
use super::boundary_conditions::{BoundaryDescriptor, FieldFunctions};
use super::convective::convective_term;
use super::discretization::Discretization;
use super::functions::{calculate_time_step_cfl, max_velocity};
use super::pressure::{pressure_rhs, PressureRhsData};
use super::projection::{projection_step, ProjectionData};
use super::timings::{Phase, Timings};
use super::viscous::{InverseMassPreconditioner, ViscousOperator};
use super::vorticity::compute_vorticity;
use crate::error::Result;
use crate::field::{BlockVector, TimeHistory, HISTORY_LEN};
use crate::mesh::{CellRef, LocalMesh, StructuredMesh};
use crate::mpi::Communicator;
use crate::parameters::Parameters;
use crate::solver::{gmres, PoissonSolver, SipgPoisson, SolverControl};
use crate::turbulence::{EddyViscosityModel, EddyViscosityTable};
use crate::types::DIM;
use crate::xwall::XWall;
use std::sync::Arc;

/// Iteration counts of the last time step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStatistics {
    /// Pressure Poisson solve
    pub pressure: SolverControl,
    /// Viscous solve
    pub viscous: SolverControl,
    /// tau_w was updated in this step
    pub tauw_updated: bool,
}

/// Incompressible Navier-Stokes operator of the dual splitting scheme
///
/// Holds the solution at the time levels n, n-1, n-2 together with the
/// vorticity and the convective term of these levels.
pub struct NavierStokesOperation {
    disc: Discretization,
    poisson: SipgPoisson,
    model: EddyViscosityModel,
    functions: FieldFunctions,
    /// Velocity at the time levels n, n-1, n-2
    velocity: TimeHistory<BlockVector>,
    /// Vorticity at the time levels n, n-1, n-2
    vorticity: TimeHistory<BlockVector>,
    /// `M^{-1}` times the convective term at the time levels n, n-1, n-2
    convective: TimeHistory<BlockVector>,
    /// Time levels n, n-1, n-2
    times: TimeHistory<f64>,
    pressure: BlockVector,
    viscosity: EddyViscosityTable,
    timings: Timings,
    statistics: Option<StepStatistics>,
}

impl NavierStokesOperation {
    /// Set up spaces, enrichment and solvers on *mesh* and project the
    /// initial condition at time *start_time*
    ///
    /// # Errors
    /// Invalid parameters or boundary conditions, no wall boundary for an
    /// enriched space, singular local matrices
    pub fn new(
        mesh: StructuredMesh,
        comm: Arc<dyn Communicator>,
        params: Parameters,
        boundary: BoundaryDescriptor,
        functions: FieldFunctions,
        start_time: f64,
    ) -> Result<Self> {
        let mesh = Arc::new(LocalMesh::new(mesh, comm)?);
        let disc = Discretization::new(mesh, params, boundary)?;
        let poisson = SipgPoisson::new(
            Arc::clone(&disc.mesh),
            Arc::clone(&disc.geometry),
            Arc::clone(&disc.shape_p),
            &disc.boundary.pressure_dirichlet_ids(),
            disc.params.stab_factor,
            disc.params.pressure_solver,
        )?;
        let model = EddyViscosityModel::from(disc.params.turbulence);
        let velocity = disc.project_velocity(functions.initial_velocity.as_ref(), start_time)?;
        let pressure = disc.project_pressure(functions.initial_pressure.as_ref(), start_time)?;
        let viscosity = EddyViscosityTable::constant(&disc.mesh, &disc.shape_u, disc.params.viscosity);
        let scalar = disc.scalar_vector();
        if disc.mesh.comm().is_root() {
            tracing::info!(
                "dual splitting: degree {}/{}, {} cells, BDF{}, enrichment: {}",
                disc.params.degree,
                disc.params.degree_p(),
                disc.mesh.global.n_cells(),
                disc.params.order,
                disc.xwall.is_some()
            );
        }
        let mut navier = Self {
            velocity: TimeHistory::filled(&velocity),
            vorticity: TimeHistory::filled(&scalar),
            convective: TimeHistory::filled(&velocity),
            times: TimeHistory::filled(&start_time),
            disc,
            poisson,
            model,
            functions,
            pressure,
            viscosity,
            timings: Timings::default(),
            statistics: None,
        };
        navier.initialize_history()?;
        Ok(navier)
    }

    /// Fill all time levels with the newest velocity
    fn initialize_history(&mut self) -> Result<()> {
        let (u, t) = (self.velocity[0].clone(), self.times[0]);
        let mut omega = self.disc.scalar_vector();
        compute_vorticity(&self.disc, &u, &mut omega)?;
        let mut conv = self.disc.velocity_vector();
        convective_term(&self.disc, &u, t, &mut conv)?;
        self.velocity = TimeHistory::filled(&u);
        self.vorticity = TimeHistory::filled(&omega);
        self.convective = TimeHistory::filled(&conv);
        self.times = TimeHistory::filled(&t);
        Ok(())
    }

    /// Recompute vorticity and convective term of all time levels, after
    /// the velocity history was re-projected
    fn recompute_dependent_history(&mut self) -> Result<()> {
        for level in 0..HISTORY_LEN {
            compute_vorticity(&self.disc, &self.velocity[level], &mut self.vorticity[level])?;
            convective_term(
                &self.disc,
                &self.velocity[level],
                self.times[level],
                &mut self.convective[level],
            )?;
        }
        Ok(())
    }

    /// Advance from *time* to *time + dt*, *step_number* counts from 1
    ///
    /// # Errors
    /// Failure of a local solve or of the operator application. Krylov
    /// solvers which do not converge are only logged.
    ///
    /// # Panics
    /// BDF coefficients of the first step are not of first order
    pub fn do_timestep(&mut self, time: f64, dt: f64, step_number: usize) -> Result<()> {
        let bdf = BdfCoefficients::new(self.disc.params.order, step_number);
        bdf.assert_start_up(step_number);
        let new_time = time + dt;
        let mut clock = Timings::start();

        // effective viscosity, frozen for this step
        self.viscosity = self.eddy_viscosity_of(&self.velocity[0])?;
        let needs_update = self
            .disc
            .xwall
            .as_ref()
            .map_or(false, |xwall| xwall.needs_update(step_number));
        let tauw_updated = needs_update && self.disc.update_wall_model(&mut self.velocity, &self.viscosity)?;
        if tauw_updated {
            self.recompute_dependent_history()?;
            self.viscosity = self.eddy_viscosity_of(&self.velocity[0])?;
        }
        clock = self.timings.record(Phase::Enrichment, clock);

        let intermediate = self.convective_step(&bdf, new_time, dt)?;
        clock = self.timings.record(Phase::Convective, clock);

        let pressure_control = self.pressure_step(&intermediate, &bdf, new_time, dt)?;
        clock = self.timings.record(Phase::Pressure, clock);

        let mut projected = self.disc.velocity_vector();
        let data = ProjectionData {
            intermediate: &intermediate,
            pressure: &self.pressure,
            bdf,
            time: new_time,
            dt,
        };
        projection_step(&self.disc, &data, &mut projected)?;
        clock = self.timings.record(Phase::Projection, clock);

        let (velocity, viscous_control) = self.viscous_step(&projected, &bdf, new_time, dt)?;
        clock = self.timings.record(Phase::Viscous, clock);

        let mut omega = self.disc.scalar_vector();
        compute_vorticity(&self.disc, &velocity, &mut omega)?;
        let mut conv = self.disc.velocity_vector();
        convective_term(&self.disc, &velocity, new_time, &mut conv)?;
        self.velocity.push(velocity);
        self.vorticity.push(omega);
        self.convective.push(conv);
        self.times.push(new_time);
        self.timings.record(Phase::History, clock);
        self.timings.finish_step();

        if self.disc.mesh.comm().is_root() {
            tracing::debug!(
                "step {}: t = {:.6}, pressure {} its, viscous {} its",
                step_number,
                new_time,
                pressure_control.iterations,
                viscous_control.iterations
            );
        }
        self.statistics = Some(StepStatistics {
            pressure: pressure_control,
            viscous: viscous_control,
            tauw_updated,
        });
        Ok(())
    }

    fn eddy_viscosity_of(&self, velocity: &BlockVector) -> Result<EddyViscosityTable> {
        let disc = &self.disc;
        EddyViscosityTable::compute(
            &self.model,
            &disc.mesh,
            &disc.geometry,
            &disc.shape_u,
            disc.params.viscosity,
            velocity,
            disc.ctx(),
        )
    }

    /// `u_hat = (sum_i alpha_i u_i + dt sum_i beta_i M^{-1} C_i + dt M^{-1} f) / gamma0`
    fn convective_step(&self, bdf: &BdfCoefficients, new_time: f64, dt: f64) -> Result<BlockVector> {
        let mut intermediate = self.disc.velocity_vector();
        for level in 0..HISTORY_LEN {
            if bdf.alpha[level] != 0. {
                intermediate.add_scaled(bdf.alpha[level], &self.velocity[level]);
            }
            if bdf.beta[level] != 0. {
                intermediate.add_scaled(dt * bdf.beta[level], &self.convective[level]);
            }
        }
        if let Some(force) = &self.functions.body_force {
            let force = self.disc.project_velocity(force.as_ref(), new_time)?;
            intermediate.add_scaled(dt, &force);
        }
        intermediate.scale(1. / bdf.gamma0);
        intermediate.update_ghost_values();
        Ok(intermediate)
    }

    /// Solve the pressure Poisson equation, the previous pressure is the
    /// initial guess
    fn pressure_step(
        &mut self,
        intermediate: &BlockVector,
        bdf: &BdfCoefficients,
        new_time: f64,
        dt: f64,
    ) -> Result<SolverControl> {
        let mut rhs = self.disc.pressure_vector();
        let data = PressureRhsData {
            intermediate,
            velocity: &self.velocity,
            vorticity: &self.vorticity,
            viscosity: &self.viscosity,
            body_force: self.functions.body_force.as_deref(),
            bdf: *bdf,
            time: new_time,
            dt,
        };
        pressure_rhs(&self.disc, &self.poisson, &data, &mut rhs)?;
        if self.poisson.is_pure_neumann() {
            self.poisson.apply_nullspace_projection(&mut rhs);
        }
        let control = self.poisson.solve(&mut self.pressure, &rhs)?;
        if self.poisson.is_pure_neumann() {
            self.fix_pressure_level(new_time);
        }
        self.pressure.update_ghost_values();
        Ok(control)
    }

    /// Fix the constant of a pure Neumann pressure: the first dof matches
    /// the analytical pressure if one is given, otherwise the mean is zero
    fn fix_pressure_level(&mut self, time: f64) {
        let exact = match &self.functions.analytical_pressure {
            Some(exact) => exact,
            None => {
                self.poisson.apply_nullspace_projection(&mut self.pressure);
                return;
            }
        };
        let comm = self.disc.mesh.comm();
        let local = if comm.is_root() && self.disc.mesh.n_local() > 0 {
            let cell = CellRef::Local(0);
            let x = self.disc.geometry.get(cell).map_point(self.disc.shape_p.dof_point(0));
            exact.value(x, time) - self.pressure.blocks[0].cell(cell)[0]
        } else {
            0.
        };
        let shift = comm.sum(local);
        self.pressure.blocks[0].v += shift;
    }

    /// Solve the viscous step for the projected velocity
    fn viscous_step(
        &self,
        projected: &BlockVector,
        bdf: &BdfCoefficients,
        new_time: f64,
        dt: f64,
    ) -> Result<(BlockVector, SolverControl)> {
        let op = ViscousOperator::new(&self.disc, &self.viscosity, bdf.gamma0 / dt);
        let mut rhs = self.disc.velocity_vector();
        op.rhs(&mut rhs, projected, new_time)?;
        let prec = InverseMassPreconditioner::new(&self.disc, dt / bdf.gamma0);
        let mut velocity = projected.clone();
        let control = gmres(&op, &prec, &mut velocity, &rhs, &self.disc.params.viscous_solver)?;
        control.warn_if_not_converged("viscous");
        velocity.update_ghost_values();
        Ok((velocity, control))
    }

    /// `dst = M^{-1} (curl src, q)`
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn compute_vorticity(&self, src: &BlockVector, dst: &mut BlockVector) -> Result<()> {
        compute_vorticity(&self.disc, src, dst)
    }

    /// Time step of the CFL condition for the current velocity
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn time_step_cfl(&self) -> Result<f64> {
        let u_max = max_velocity(&self.disc, &self.velocity[0])?;
        let h_min = self.disc.mesh.comm().min(self.disc.geometry.h_min());
        Ok(calculate_time_step_cfl(
            u_max,
            h_min,
            self.disc.params.degree,
            self.disc.params.cfl,
        ))
    }

    /// Add random disturbances of amplitude *amp* to the polynomial part
    /// of the velocity and restart the history from it
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn random_disturbance(&mut self, amp: f64) -> Result<()> {
        for block in self.velocity[0].blocks.iter_mut().take(DIM) {
            block.add_random(amp);
        }
        self.velocity[0].update_ghost_values();
        self.initialize_history()
    }

    /// Replace velocity and pressure, e.g. after a restart, and restart
    /// the history at *time*
    ///
    /// # Errors
    /// Propagated from the cell loop
    ///
    /// # Panics
    /// Block layout of *velocity* does not match the velocity space
    pub fn set_state(&mut self, velocity: BlockVector, pressure: BlockVector, time: f64) -> Result<()> {
        assert!(
            velocity.dofs_per_block() == self.disc.velocity_layout(),
            "velocity layout mismatch"
        );
        self.velocity[0] = velocity;
        self.velocity[0].update_ghost_values();
        self.pressure = pressure;
        self.pressure.update_ghost_values();
        self.times[0] = time;
        self.initialize_history()
    }

    /// Set tau_w per wall vertex and refactorize the enriched mass
    /// matrices. The velocity must be replaced afterwards, see
    /// [`NavierStokesOperation::set_state`].
    ///
    /// # Errors
    /// Singular local mass matrix
    pub fn restore_wall_model(&mut self, tauw_wall: &[f64]) -> Result<bool> {
        self.disc.restore_wall_model(tauw_wall)
    }

    /// Log the time spent per phase
    pub fn analyse_computing_times(&self) {
        self.timings.log(self.disc.mesh.comm());
    }

    /// Velocity at the newest time level
    pub fn velocity(&self) -> &BlockVector {
        &self.velocity[0]
    }

    /// Velocity at the time levels n, n-1, n-2
    pub fn velocity_history(&self) -> &TimeHistory<BlockVector> {
        &self.velocity
    }

    /// Vorticity at the newest time level
    pub fn vorticity(&self) -> &BlockVector {
        &self.vorticity[0]
    }

    /// Vorticity at the time levels n, n-1, n-2
    pub fn vorticity_history(&self) -> &TimeHistory<BlockVector> {
        &self.vorticity
    }

    /// Pressure at the newest time level
    pub fn pressure(&self) -> &BlockVector {
        &self.pressure
    }

    /// Newest time level
    pub fn time(&self) -> f64 {
        self.times[0]
    }

    /// Spaces, mesh and boundary conditions
    pub fn discretization(&self) -> &Discretization {
        &self.disc
    }

    /// Wall enrichment (wall distance, tau_w), if enabled
    pub fn xwall(&self) -> Option<&XWall> {
        self.disc.xwall.as_ref()
    }

    /// Effective viscosity of the last time step
    pub fn eddy_viscosity(&self) -> &EddyViscosityTable {
        &self.viscosity
    }

    /// Case functions
    pub fn functions(&self) -> &FieldFunctions {
        &self.functions
    }

    /// Solver statistics of the last time step
    pub fn statistics(&self) -> Option<StepStatistics> {
        self.statistics
    }

    /// Accumulated computing times
    pub fn timings(&self) -> &Timings {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpi::SerialCommunicator;
    use crate::navier_stokes::functions::l2_error_velocity;
    use crate::parameters::{EnrichmentStrategy, XWallParameters};

    fn periodic_box() -> StructuredMesh {
        StructuredMesh::rectangle(4, 4, 0., 1., 0., 1.)
            .unwrap()
            .with_periodic(0)
            .with_periodic(1)
    }

    #[test]
    fn test_uniform_flow_is_preserved() {
        let uniform = |_: [f64; DIM], _: f64| [1., 0.5];
        let functions = FieldFunctions::default().with_initial_velocity(uniform);
        let mut navier = NavierStokesOperation::new(
            periodic_box(),
            Arc::new(SerialCommunicator),
            Parameters::with_degree(2),
            BoundaryDescriptor::new(),
            functions,
            0.,
        )
        .unwrap();
        let dt = 0.01;
        for step in 1..=4 {
            navier.do_timestep((step - 1) as f64 * dt, dt, step).unwrap();
        }
        assert!((navier.time() - 4. * dt).abs() < 1e-12);
        let disc = navier.discretization();
        assert!(l2_error_velocity(disc, navier.velocity(), &uniform, navier.time()).unwrap() < 1e-9);
        assert!(navier.pressure().norm_linf() < 1e-8);
        let stats = navier.statistics().unwrap();
        assert!(stats.pressure.converged && stats.viscous.converged);
        assert!(!stats.tauw_updated);
    }

    #[test]
    fn test_history_rotates_content() {
        let functions = FieldFunctions::default().with_initial_velocity(|x: [f64; DIM], _: f64| {
            let (s, c) = ((2. * std::f64::consts::PI * x[1]).sin(), (2. * std::f64::consts::PI * x[0]).cos());
            [s, c]
        });
        let mut navier = NavierStokesOperation::new(
            periodic_box(),
            Arc::new(SerialCommunicator),
            Parameters::with_degree(2),
            BoundaryDescriptor::new(),
            functions,
            0.,
        )
        .unwrap();
        navier.do_timestep(0., 1e-3, 1).unwrap();
        let newest = navier.velocity().clone();
        navier.do_timestep(1e-3, 1e-3, 2).unwrap();
        let history = navier.velocity_history();
        let mut diff = history[1].clone();
        diff.add_scaled(-1., &newest);
        assert!(diff.norm_linf() == 0.);
        assert!(navier.statistics().unwrap().pressure.converged);
    }

    #[test]
    fn test_channel_at_rest_stays_at_rest() {
        let mesh = StructuredMesh::channel(2, 4, 1., 0.).unwrap();
        let mut params = Parameters::with_degree(2);
        params.enrichment = EnrichmentStrategy::Wall(XWallParameters {
            max_wall_distance: 0.6,
            ..XWallParameters::default()
        });
        let mut navier = NavierStokesOperation::new(
            mesh,
            Arc::new(SerialCommunicator),
            params,
            BoundaryDescriptor::new().with_wall(0),
            FieldFunctions::default(),
            0.,
        )
        .unwrap();
        navier.do_timestep(0., 1e-2, 1).unwrap();
        assert!(navier.statistics().unwrap().tauw_updated);
        navier.do_timestep(1e-2, 1e-2, 2).unwrap();
        // tau_w is frozen after the first step
        assert!(!navier.statistics().unwrap().tauw_updated);
        assert_eq!(navier.xwall().unwrap().n_updates(), 1);
        assert!(navier.velocity().norm_linf() < 1e-12);
        assert!(navier.time_step_cfl().unwrap().is_infinite());
    }

    #[test]
    fn test_pure_neumann_pressure_has_zero_mean() {
        let functions = FieldFunctions::default()
            .with_initial_velocity(|x: [f64; DIM], _: f64| {
                let (s, c) = ((2. * std::f64::consts::PI * x[1]).sin(), (2. * std::f64::consts::PI * x[0]).cos());
                [s, c]
            })
            .with_initial_pressure(|_: [f64; DIM], _: f64| 5.);
        let mut navier = NavierStokesOperation::new(
            periodic_box(),
            Arc::new(SerialCommunicator),
            Parameters::with_degree(2),
            BoundaryDescriptor::new(),
            functions,
            0.,
        )
        .unwrap();
        // the solve starts from a pressure with mean 5
        let p0 = &navier.pressure().blocks[0];
        assert!((p0.v.sum() / p0.global_size() - 5.).abs() < 1e-10);
        for step in 1..=2 {
            navier.do_timestep((step - 1) as f64 * 1e-3, 1e-3, step).unwrap();
            let p = &navier.pressure().blocks[0];
            assert!(p.v.sum().abs() / p.global_size() < 1e-12);
            assert!(p.v.iter().any(|v| v.abs() > 1e-6));
        }
    }
}
