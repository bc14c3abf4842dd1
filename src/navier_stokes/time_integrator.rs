//! Drive [`NavierStokesOperation`] with [`integrate`](crate::integrate)
//!
//! # Example
//! ```ignore
//! use dgxwall::integrate;
//! use dgxwall::navier_stokes::TimeIntegrator;
//!
//! let mut integrator = TimeIntegrator::new(navier, 1e-3);
//! integrator.adaptive_cfl = true;
//! integrate(&mut integrator, 10., Some(0.5)).unwrap();
//! ```
use super::functions::{divergence_l2, max_velocity};
use super::NavierStokesOperation;
use crate::error::Result;
use crate::Integrate;
use std::collections::HashMap;

/// Time, step counter and time step of a simulation
pub struct TimeIntegrator {
    /// Spatially discretized equations
    pub navier: NavierStokesOperation,
    time: f64,
    dt: f64,
    step: usize,
    /// Choose the time step from the CFL condition before every step.
    /// The BDF coefficients assume a constant time step, so the time step
    /// should vary slowly.
    pub adaptive_cfl: bool,
    /// Upper bound of adaptive time steps
    pub dt_max: f64,
    /// Time intervall for write fields (requires the `hdf5` feature)
    /// If none, fields are written at every callback
    pub write_intervall: Option<f64>,
    /// Directory of snapshots
    pub output_dir: String,
    /// diagnostics like max velocity, divergence, iterations ...
    pub diagnostics: HashMap<String, Vec<f64>>,
}

impl TimeIntegrator {
    /// Start at the newest time level of *navier* with time step *dt*
    pub fn new(navier: NavierStokesOperation, dt: f64) -> Self {
        let mut diagnostics = HashMap::new();
        for key in ["time", "dt", "umax", "div", "pressure_its", "viscous_its"] {
            diagnostics.insert(key.to_string(), Vec::<f64>::new());
        }
        Self {
            time: navier.time(),
            navier,
            dt,
            step: 0,
            adaptive_cfl: false,
            dt_max: dt,
            write_intervall: None,
            output_dir: "data".to_string(),
            diagnostics,
        }
    }

    /// Number of completed time steps
    pub fn step_number(&self) -> usize {
        self.step
    }

    fn push_diagnostic(&mut self, key: &str, value: f64) {
        if let Some(d) = self.diagnostics.get_mut(key) {
            d.push(value);
        }
    }

    #[cfg(feature = "hdf5")]
    fn write_fields(&self) -> Result<()> {
        let due = self.write_intervall.map_or(true, |dt_save| {
            let r = self.time % dt_save;
            r < self.dt / 2. || r > dt_save - self.dt / 2.
        });
        if due {
            std::fs::create_dir_all(&self.output_dir)?;
            let fname = format!("{}/flow{:0>8.2}.h5", self.output_dir, self.time);
            self.navier.write_snapshot(&fname)?;
        }
        Ok(())
    }

    #[cfg(not(feature = "hdf5"))]
    fn write_fields(&self) -> Result<()> {
        Ok(())
    }
}

impl Integrate for TimeIntegrator {
    /// Update 1 timestep
    fn update(&mut self) -> Result<()> {
        if self.adaptive_cfl {
            self.dt = self.navier.time_step_cfl()?.min(self.dt_max);
        }
        self.navier.do_timestep(self.time, self.dt, self.step + 1)?;
        self.step += 1;
        self.time = self.navier.time();
        Ok(())
    }

    fn get_time(&self) -> f64 {
        self.time
    }

    fn get_dt(&self) -> f64 {
        self.dt
    }

    fn callback(&mut self) -> Result<()> {
        self.write_fields()?;

        let disc = self.navier.discretization();
        let umax = max_velocity(disc, self.navier.velocity())?;
        let div = divergence_l2(disc, self.navier.velocity())?;
        let (pressure_its, viscous_its) = self
            .navier
            .statistics()
            .map_or((0, 0), |s| (s.pressure.iterations, s.viscous.iterations));
        if disc.mesh.comm().is_root() {
            tracing::info!(
                "time = {:8.4}   dt = {:8.2e}   |u|max = {:9.3e}   |div| = {:9.3e}   its p/u = {}/{}",
                self.time,
                self.dt,
                umax,
                div,
                pressure_its,
                viscous_its,
            );
        }

        self.push_diagnostic("time", self.time);
        self.push_diagnostic("dt", self.dt);
        self.push_diagnostic("umax", umax);
        self.push_diagnostic("div", div);
        self.push_diagnostic("pressure_its", pressure_its as f64);
        self.push_diagnostic("viscous_its", viscous_its as f64);
        Ok(())
    }

    fn exit(&mut self) -> bool {
        // Break if velocity is nan
        self.navier.velocity().norm_l2().is_nan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use crate::navier_stokes::{BoundaryDescriptor, FieldFunctions};
    use crate::parameters::Parameters;
    use crate::types::DIM;
    use std::sync::Arc;

    fn shear_flow() -> NavierStokesOperation {
        let mesh = StructuredMesh::rectangle(4, 4, 0., 1., 0., 1.)
            .unwrap()
            .with_periodic(0)
            .with_periodic(1);
        let functions = FieldFunctions::default()
            .with_initial_velocity(|x: [f64; DIM], _: f64| [1. + 0.1 * (2. * std::f64::consts::PI * x[1]).sin(), 0.]);
        NavierStokesOperation::new(
            mesh,
            Arc::new(SerialCommunicator),
            Parameters::with_degree(2),
            BoundaryDescriptor::new(),
            functions,
            0.,
        )
        .unwrap()
    }

    #[test]
    fn test_integrate_fixed_step() {
        let mut integrator = TimeIntegrator::new(shear_flow(), 0.01);
        integrate(&mut integrator, 0.05, Some(0.02)).unwrap();
        assert_eq!(integrator.step_number(), 5);
        assert!((integrator.get_time() - 0.05).abs() < 1e-10);
        assert_eq!(integrator.diagnostics["time"].len(), 2);
        // viscous decay of the shear layer, the mean flow is kept
        let umax = integrator.diagnostics["umax"].last().copied().unwrap();
        assert!(umax < 1.1 && umax > 1.);
    }

    #[test]
    fn test_adaptive_time_step_is_bounded() {
        let mut integrator = TimeIntegrator::new(shear_flow(), 1.);
        integrator.adaptive_cfl = true;
        integrator.dt_max = 0.05;
        integrator.update().unwrap();
        let dt = integrator.get_dt();
        // cfl 0.2, degree 2, h = 0.25, |u| <= 1.1
        assert!(dt < 0.05);
        assert!(dt > 0.2 / 8f64.sqrt() * 0.25 / 1.2);
    }
}
