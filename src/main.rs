//! Run example:
//!
//! cargo run --release
//!
//! cargo mpirun --np 2 --features mpi --bin dgxwall --release
//!
//! Important: Disable obenblas multithreading:
//! ```bash
//! export OPENBLAS_NUM_THREADS=1
//! ```
//!
//! Turbulent channel flow at `Re_tau = 180` with wall enrichment, driven by
//! a constant pressure gradient. Set the log level with `DGXWALL_LOG`
//! (error, warn, info, debug, trace).
use dgxwall::error::Result;
use dgxwall::{integrate, Integrate};
use dgxwall::mesh::StructuredMesh;
use dgxwall::mpi::Communicator;
use dgxwall::navier_stokes::{BoundaryDescriptor, FieldFunctions, NavierStokesOperation, TimeIntegrator};
use dgxwall::parameters::{EnrichmentStrategy, Parameters, TurbulenceModelKind, XWallParameters};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn log_level() -> Level {
    match std::env::var("DGXWALL_LOG").as_deref() {
        Ok("error") => Level::ERROR,
        Ok("warn") => Level::WARN,
        Ok("debug") => Level::DEBUG,
        Ok("trace") => Level::TRACE,
        _ => Level::INFO,
    }
}

#[cfg(feature = "mpi")]
fn run() -> Result<()> {
    use dgxwall::mpi::{initialize, MpiCommunicator};
    let universe = initialize();
    channel(Arc::new(MpiCommunicator::new(&universe)))
}

#[cfg(not(feature = "mpi"))]
fn run() -> Result<()> {
    channel(Arc::new(dgxwall::mpi::SerialCommunicator))
}

fn channel(comm: Arc<dyn Communicator>) -> Result<()> {
    // Parameters
    let re_tau = 180.;
    let (nx, ny) = (16, 12);
    let lx = 2. * std::f64::consts::PI;
    let max_time = 50.;
    let dt = 1e-3;

    let mut params = Parameters::with_degree(3);
    params.viscosity = 1. / re_tau;
    params.cfl = 0.15;
    params.k_div = 1.;
    params.turbulence = TurbulenceModelKind::Smagorinsky { cs: 0.165 };
    params.enrichment = EnrichmentStrategy::Wall(XWallParameters {
        max_wall_distance: 0.2,
        variable_tauw: true,
        ..XWallParameters::default()
    });

    // walls at y = -1 and y = 1, u_tau = 1 for a unit pressure gradient
    let functions = FieldFunctions::default()
        .with_initial_velocity(|x: [f64; 2], _: f64| [15. * (1. - x[1] * x[1]), 0.])
        .with_body_force(|_: [f64; 2], _: f64| [1., 0.]);
    let mesh = StructuredMesh::channel(nx, ny, lx, 1.8)?;
    let mut navier = NavierStokesOperation::new(
        mesh,
        comm,
        params,
        BoundaryDescriptor::new().with_wall(0),
        functions,
        0.,
    )?;
    navier.random_disturbance(0.5)?;

    let mut integrator = TimeIntegrator::new(navier, dt);
    integrator.adaptive_cfl = true;
    integrator.dt_max = 1e-2;
    integrator.write_intervall = Some(5.);
    integrator.callback()?;
    integrate(&mut integrator, max_time, Some(0.5))?;
    integrator.navier.analyse_computing_times();
    Ok(())
}

fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level())
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Could not install logger: {}", e);
    }
    if let Err(e) = run() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
