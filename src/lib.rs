//! # `dgxwall`: Discontinuous Galerkin solver for incompressible flows with wall enrichment
//!
//! # Dependencies
//! - cargo >= v1.60
//! - a BLAS/LAPACK backend for `ndarray-linalg` (default: system openblas)
//! - `hdf5` (optional, feature `hdf5`, sudo apt-get install -y libhdf5-dev)
//! - mpi installation and libclang (optional, feature `mpi`)
//!
//! # Important
//!
//! Openblas multithreading conflicts with internal multithreading.
//! Turn it off for better performance:
//! ```bash
//! export OPENBLAS_NUM_THREADS=1
//! ```
//!
//! # Details
//!
//! The incompressible Navier-Stokes equations are discretized in space
//! with matrix-free nodal discontinuous Galerkin elements on structured
//! quadrilateral meshes, and advanced in time with the dual splitting
//! scheme (BDF time integration, explicit convection, pressure Poisson
//! equation, projection, implicit viscous step).
//!
//! Near no-slip walls, the velocity space can be enriched by Spalding's
//! law of the wall (see [`xwall`]), which allows wall-modelled large eddy
//! simulations on meshes much coarser than the viscous sublayer. Eddy
//! viscosity closures are found in [`turbulence`].
//!
//! ## Implemented solver
//!
//! - `2-D incompressible Navier-Stokes: dual splitting scheme`,
//! see [`navier_stokes::navier`]
//!
//! # Example
//! Turbulent channel flow with wall enrichment
//! ( Run with `cargo run --release` or `cargo mpirun --np 2 --features mpi --bin dgxwall` )
//! ```ignore
//! use dgxwall::mesh::StructuredMesh;
//! use dgxwall::mpi::SerialCommunicator;
//! use dgxwall::navier_stokes::{BoundaryDescriptor, FieldFunctions, NavierStokesOperation, TimeIntegrator};
//! use dgxwall::parameters::{EnrichmentStrategy, Parameters, XWallParameters};
//! use dgxwall::integrate;
//! use std::sync::Arc;
//!
//! fn main() {
//!     let mesh = StructuredMesh::channel(16, 12, 2. * std::f64::consts::PI, 1.8).unwrap();
//!     let mut params = Parameters::default();
//!     params.enrichment = EnrichmentStrategy::Wall(XWallParameters::default());
//!     let functions = FieldFunctions::default()
//!         .with_initial_velocity(|x: [f64; 2], _: f64| [1. - x[1] * x[1], 0.])
//!         .with_body_force(|_: [f64; 2], _: f64| [2e-3, 0.]);
//!     let navier = NavierStokesOperation::new(
//!         mesh,
//!         Arc::new(SerialCommunicator),
//!         params,
//!         BoundaryDescriptor::new().with_wall(0),
//!         functions,
//!         0.,
//!     )
//!     .unwrap();
//!     let mut integrator = TimeIntegrator::new(navier, 1e-3);
//!     integrate(&mut integrator, 10., Some(0.1)).unwrap();
//! }
//! ```
//!
//! ## Documentation
//!
//! Download and run:
//!
//! `cargo doc --open`
#![warn(missing_docs)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#[macro_use]
extern crate enum_dispatch;
pub mod error;
pub mod fe;
pub mod field;
#[cfg(feature = "hdf5")]
pub mod io;
pub mod mesh;
pub mod mpi;
pub mod navier_stokes;
pub mod parameters;
pub mod solver;
pub mod turbulence;
pub mod types;
pub mod xwall;

use error::Result;

const MAX_TIMESTEP: usize = 10_000_000;

/// Integrate trait, step forward in time, and write results
pub trait Integrate {
    /// Update solution
    ///
    /// # Errors
    /// Failure of the time step
    fn update(&mut self) -> Result<()>;
    /// Receive current time
    fn get_time(&self) -> f64;
    /// Get timestep
    fn get_dt(&self) -> f64;
    /// Callback function (can be used for i/o)
    ///
    /// # Errors
    /// Failed to evaluate or write output
    fn callback(&mut self) -> Result<()>;
    /// Additional break criteria
    fn exit(&mut self) -> bool;
}

/// Integrade pde, that implements the Integrate trait.
///
/// Specify `save_intervall` to call `callback` every `save_intervall`
/// time units.
///
/// Stop Criteria:
/// 1. Timestep limit
/// 2. Time limit
/// 3. `exit` of the pde
///
/// # Errors
/// First error of `update` or `callback`
pub fn integrate<T: Integrate>(pde: &mut T, max_time: f64, save_intervall: Option<f64>) -> Result<()> {
    let mut timestep: usize = 0;
    let eps_dt = pde.get_dt() * 1e-4;
    let mut next_save = save_intervall.map(|dt_save| pde.get_time() + dt_save);
    loop {
        // Update
        pde.update()?;
        timestep += 1;

        // Save
        if let (Some(t_save), Some(dt_save)) = (next_save.as_mut(), save_intervall) {
            if pde.get_time() + eps_dt >= *t_save {
                pde.callback()?;
                while *t_save <= pde.get_time() + eps_dt {
                    *t_save += dt_save;
                }
            }
        }

        // Break
        if pde.get_time() + eps_dt >= max_time {
            tracing::info!("time limit reached: {:?}", pde.get_time());
            break;
        }
        if timestep >= MAX_TIMESTEP {
            tracing::info!("timestep limit reached: {:?}", timestep);
            break;
        }
        if pde.exit() {
            tracing::warn!("break criteria triggered");
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `du/dt = -u` with explicit Euler
    struct Decay {
        u: f64,
        time: f64,
        dt: f64,
        callbacks: Vec<f64>,
    }

    impl Integrate for Decay {
        fn update(&mut self) -> Result<()> {
            self.u -= self.dt * self.u;
            self.time += self.dt;
            Ok(())
        }

        fn get_time(&self) -> f64 {
            self.time
        }

        fn get_dt(&self) -> f64 {
            self.dt
        }

        fn callback(&mut self) -> Result<()> {
            self.callbacks.push(self.time);
            Ok(())
        }

        fn exit(&mut self) -> bool {
            self.u < 0.5
        }
    }

    #[test]
    fn test_integrate_save_intervall() {
        let mut pde = Decay {
            u: 1.,
            time: 0.,
            dt: 0.1,
            callbacks: Vec::new(),
        };
        integrate(&mut pde, 0.5, Some(0.2)).unwrap();
        assert!((pde.time - 0.5).abs() < 1e-12);
        assert_eq!(pde.callbacks.len(), 2);
        assert!((pde.callbacks[1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_exit() {
        let mut pde = Decay {
            u: 1.,
            time: 0.,
            dt: 0.1,
            callbacks: Vec::new(),
        };
        integrate(&mut pde, 100., None).unwrap();
        // 0.9^7 < 0.5 < 0.9^6
        assert!((pde.time - 0.7).abs() < 1e-12);
        assert!(pde.callbacks.is_empty());
    }
}
