//! Some useful post-processing functions
use super::boundary_conditions::{scalar_at, vector_at, ScalarFunction, VectorFunction};
use super::discretization::Discretization;
use crate::error::Result;
use crate::fe::{batch_map, divergence, CellEvaluator, FieldEvaluator};
use crate::field::BlockVector;
use crate::types::{dot, Vectorized};
use num_traits::Zero;

/// Return `|| u - exact(t) ||_L2` over the whole domain
///
/// # Errors
/// Propagated from the cell loop
pub fn l2_error_velocity(
    disc: &Discretization,
    velocity: &BlockVector,
    exact: &dyn VectorFunction,
    time: f64,
) -> Result<f64> {
    let local = batch_map(
        &disc.mesh,
        || disc.velocity_cell_evaluator(),
        |eval, batch| {
            eval.reinit(batch);
            eval.read_dof_values(velocity);
            eval.evaluate(true, false);
            let mut sum = Vectorized::zero();
            for q in 0..eval.n_q_points() {
                let u = eval.value(q);
                let ex = vector_at(exact, &eval.quadrature_point(q), time);
                let e = [u[0] - ex[0], u[1] - ex[1]];
                sum += dot(&e, &e) * eval.jxw(q);
            }
            Ok(sum.sum_lanes(batch.n_filled))
        },
    )?;
    Ok(disc.mesh.comm().sum(local.iter().sum()).sqrt())
}

/// Return `|| p - exact(t) ||_L2` over the whole domain
///
/// # Errors
/// Propagated from the cell loop
pub fn l2_error_pressure(
    disc: &Discretization,
    pressure: &BlockVector,
    exact: &dyn ScalarFunction,
    time: f64,
) -> Result<f64> {
    let local = batch_map(
        &disc.mesh,
        || CellEvaluator::<1>::new(&disc.shape_p, &disc.geometry),
        |eval, batch| {
            eval.reinit(batch);
            eval.read_dof_values(pressure);
            eval.evaluate(true, false);
            let mut sum = Vectorized::zero();
            for q in 0..eval.n_q_points() {
                let e = eval.value(q)[0] - scalar_at(exact, &eval.quadrature_point(q), time);
                sum += e * e * eval.jxw(q);
            }
            Ok(sum.sum_lanes(batch.n_filled))
        },
    )?;
    Ok(disc.mesh.comm().sum(local.iter().sum()).sqrt())
}

/// Returns the largest velocity magnitude at the quadrature points
///
/// # Errors
/// Propagated from the cell loop
pub fn max_velocity(disc: &Discretization, velocity: &BlockVector) -> Result<f64> {
    let local = batch_map(
        &disc.mesh,
        || disc.velocity_cell_evaluator(),
        |eval, batch| {
            eval.reinit(batch);
            eval.read_dof_values(velocity);
            eval.evaluate(true, false);
            let mut max = Vectorized::zero();
            for q in 0..eval.n_q_points() {
                let u = eval.value(q);
                max = max.max(dot(&u, &u).sqrt());
            }
            Ok(max.max_lane(batch.n_filled))
        },
    )?;
    Ok(disc.mesh.comm().max(local.into_iter().fold(0., f64::max)))
}

/// Returns `|| div u ||_L2`, cell-wise divergence without face jumps
///
/// # Errors
/// Propagated from the cell loop
pub fn divergence_l2(disc: &Discretization, velocity: &BlockVector) -> Result<f64> {
    let local = batch_map(
        &disc.mesh,
        || disc.velocity_cell_evaluator(),
        |eval, batch| {
            eval.reinit(batch);
            eval.read_dof_values(velocity);
            eval.evaluate(false, true);
            let mut sum = Vectorized::zero();
            for q in 0..eval.n_q_points() {
                let div = divergence(&eval.gradient(q));
                sum += div * div * eval.jxw(q);
            }
            Ok(sum.sum_lanes(batch.n_filled))
        },
    )?;
    Ok(disc.mesh.comm().sum(local.iter().sum()).sqrt())
}

/// Time step from the CFL condition
/// $$
/// dt = \frac{cfl}{k^{1.5}} \frac{h_{min}}{u_{max}}
/// $$
/// Returns infinity for a fluid at rest.
pub fn calculate_time_step_cfl(u_max: f64, h_min: f64, degree: usize, cfl: f64) -> f64 {
    if u_max <= 0. {
        return f64::INFINITY;
    }
    cfl / (degree as f64).powf(1.5) * h_min / u_max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{LocalMesh, StructuredMesh};
    use crate::mpi::SerialCommunicator;
    use crate::navier_stokes::BoundaryDescriptor;
    use crate::parameters::Parameters;
    use crate::types::DIM;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn unit_square() -> Discretization {
        let mesh = StructuredMesh::rectangle(3, 3, 0., 1., 0., 1.).unwrap();
        let mesh = Arc::new(LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap());
        let boundary = (0..4).fold(BoundaryDescriptor::new(), |b, id| b.with_wall(id));
        Discretization::new(mesh, Parameters::with_degree(2), boundary).unwrap()
    }

    #[test]
    fn test_errors_of_exact_fields() {
        let disc = unit_square();
        let f = |x: [f64; DIM], t: f64| [x[0] * x[1] * t, x[1] * x[1]];
        let u = disc.project_velocity(&f, 2.).unwrap();
        assert!(l2_error_velocity(&disc, &u, &f, 2.).unwrap() < 1e-12);
        // || (1, 0) ||_L2 on the unit square
        let shifted = |x: [f64; DIM], t: f64| [x[0] * x[1] * t + 1., x[1] * x[1]];
        assert_relative_eq!(l2_error_velocity(&disc, &u, &shifted, 2.).unwrap(), 1., epsilon = 1e-12);

        let g = |x: [f64; DIM], _: f64| x[0] - 2. * x[1];
        let p = disc.project_pressure(&g, 0.).unwrap();
        assert!(l2_error_pressure(&disc, &p, &g, 0.).unwrap() < 1e-12);
    }

    #[test]
    fn test_max_velocity_and_divergence() {
        let disc = unit_square();
        let u = disc.project_velocity(&|x: [f64; DIM], _: f64| [x[0], -x[1]], 0.).unwrap();
        assert_relative_eq!(max_velocity(&disc, &u).unwrap(), 2f64.sqrt(), epsilon = 0.2);
        assert!(max_velocity(&disc, &u).unwrap() <= 2f64.sqrt() + 1e-12);
        assert!(divergence_l2(&disc, &u).unwrap() < 1e-12);
        let v = disc.project_velocity(&|x: [f64; DIM], _: f64| [x[0], x[1]], 0.).unwrap();
        assert_relative_eq!(divergence_l2(&disc, &v).unwrap(), 2., epsilon = 1e-12);
    }

    #[test]
    fn test_time_step_cfl() {
        assert_relative_eq!(calculate_time_step_cfl(2., 0.1, 4, 0.4), 0.4 / 8. * 0.05);
        assert!(calculate_time_step_cfl(0., 0.1, 4, 0.4).is_infinite());
    }
}
