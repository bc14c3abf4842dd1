//! Incompressible Navier--Stokes solver (dual splitting)
pub mod bdf;
pub mod boundary_conditions;
pub mod convective;
pub mod discretization;
pub mod functions;
pub mod navier;
#[cfg(feature = "hdf5")]
pub mod navier_io;
pub mod pressure;
pub mod projection;
pub mod time_integrator;
pub mod timings;
pub mod viscous;
pub mod vorticity;
pub use bdf::BdfCoefficients;
pub use boundary_conditions::{BoundaryDescriptor, FieldFunctions, ScalarFunction, VectorFunction};
pub use discretization::Discretization;
pub use navier::{NavierStokesOperation, StepStatistics};
pub use time_integrator::TimeIntegrator;
