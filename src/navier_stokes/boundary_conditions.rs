//! Boundary conditions and case functions
//!
//! Every non-periodic side of the mesh is either
//! - velocity Dirichlet (`u = g`, pressure Neumann with the consistent
//!   boundary condition of the splitting scheme), or
//! - pressure Dirichlet (`p = g_p`, zero viscous traction for the
//!   velocity), used for outflow boundaries.
//!
//! No-slip walls are velocity Dirichlet sides with `g = 0` which may
//! additionally carry the wall enrichment.
use crate::error::{DgError, Result};
use crate::mesh::{BoundaryId, Neighbor, StructuredMesh, FACES_PER_CELL};
use crate::types::{LaneMask, Vectorized, DIM, LANES};
use std::collections::HashMap;
use std::sync::Arc;

/// Step of the central difference in [`VectorFunction::time_derivative`]
const FD_STEP: f64 = 1e-6;

/// Vector valued function of space and time
pub trait VectorFunction: Send + Sync {
    /// Value at *x* and time *t*
    fn value(&self, x: [f64; DIM], t: f64) -> [f64; DIM];

    /// Time derivative at *x* and time *t*, central difference unless
    /// overridden
    fn time_derivative(&self, x: [f64; DIM], t: f64) -> [f64; DIM] {
        let eps = FD_STEP * t.abs().max(1.);
        let (a, b) = (self.value(x, t + eps), self.value(x, t - eps));
        [(a[0] - b[0]) / (2. * eps), (a[1] - b[1]) / (2. * eps)]
    }
}

impl<F> VectorFunction for F
where
    F: Fn([f64; DIM], f64) -> [f64; DIM] + Send + Sync,
{
    fn value(&self, x: [f64; DIM], t: f64) -> [f64; DIM] {
        self(x, t)
    }
}

/// Scalar function of space and time
pub trait ScalarFunction: Send + Sync {
    /// Value at *x* and time *t*
    fn value(&self, x: [f64; DIM], t: f64) -> f64;
}

impl<F> ScalarFunction for F
where
    F: Fn([f64; DIM], f64) -> f64 + Send + Sync,
{
    fn value(&self, x: [f64; DIM], t: f64) -> f64 {
        self(x, t)
    }
}

/// `u = 0`
pub fn zero_vector() -> Arc<dyn VectorFunction> {
    Arc::new(|_: [f64; DIM], _: f64| [0.; DIM])
}

/// `p = 0`
pub fn zero_scalar() -> Arc<dyn ScalarFunction> {
    Arc::new(|_: [f64; DIM], _: f64| 0.)
}

/// Evaluate *f* lane by lane
pub fn vector_at(f: &dyn VectorFunction, x: &[Vectorized; DIM], t: f64) -> [Vectorized; DIM] {
    let mut out = [Vectorized::splat(0.); DIM];
    for l in 0..LANES {
        let v = f.value([x[0][l], x[1][l]], t);
        out[0][l] = v[0];
        out[1][l] = v[1];
    }
    out
}

/// Evaluate *f* lane by lane
pub fn scalar_at(f: &dyn ScalarFunction, x: &[Vectorized; DIM], t: f64) -> Vectorized {
    Vectorized::from_fn(|l| f.value([x[0][l], x[1][l]], t))
}

/// Initial condition, body force and (optional) analytical pressure
#[derive(Clone)]
pub struct FieldFunctions {
    /// Velocity at t = 0
    pub initial_velocity: Arc<dyn VectorFunction>,
    /// Pressure at t = 0
    pub initial_pressure: Arc<dyn ScalarFunction>,
    /// Volume force per unit mass
    pub body_force: Option<Arc<dyn VectorFunction>>,
    /// Fixes the constant of a pure Neumann pressure (zero without)
    pub analytical_pressure: Option<Arc<dyn ScalarFunction>>,
}

impl Default for FieldFunctions {
    fn default() -> Self {
        Self {
            initial_velocity: zero_vector(),
            initial_pressure: zero_scalar(),
            body_force: None,
            analytical_pressure: None,
        }
    }
}

impl FieldFunctions {
    /// Set the initial velocity
    pub fn with_initial_velocity<F: VectorFunction + 'static>(mut self, f: F) -> Self {
        self.initial_velocity = Arc::new(f);
        self
    }

    /// Set the initial pressure
    pub fn with_initial_pressure<F: ScalarFunction + 'static>(mut self, f: F) -> Self {
        self.initial_pressure = Arc::new(f);
        self
    }

    /// Set the body force
    pub fn with_body_force<F: VectorFunction + 'static>(mut self, f: F) -> Self {
        self.body_force = Some(Arc::new(f));
        self
    }

    /// Set the analytical pressure
    pub fn with_analytical_pressure<F: ScalarFunction + 'static>(mut self, f: F) -> Self {
        self.analytical_pressure = Some(Arc::new(f));
        self
    }
}

/// Boundary conditions by boundary id
#[derive(Clone, Default)]
pub struct BoundaryDescriptor {
    velocity_dirichlet: HashMap<BoundaryId, Arc<dyn VectorFunction>>,
    pressure_dirichlet: HashMap<BoundaryId, Arc<dyn ScalarFunction>>,
    wall_ids: Vec<BoundaryId>,
}

impl BoundaryDescriptor {
    /// No boundary conditions (fully periodic domain)
    pub fn new() -> Self {
        Self::default()
    }

    /// No-slip wall
    pub fn with_wall(mut self, id: BoundaryId) -> Self {
        self.velocity_dirichlet.insert(id, zero_vector());
        if !self.wall_ids.contains(&id) {
            self.wall_ids.push(id);
        }
        self
    }

    /// Prescribed velocity
    pub fn with_velocity<F: VectorFunction + 'static>(mut self, id: BoundaryId, f: F) -> Self {
        self.velocity_dirichlet.insert(id, Arc::new(f));
        self
    }

    /// Prescribed pressure (outflow)
    pub fn with_pressure<F: ScalarFunction + 'static>(mut self, id: BoundaryId, f: F) -> Self {
        self.pressure_dirichlet.insert(id, Arc::new(f));
        self
    }

    /// Boundary ids of no-slip walls
    pub fn wall_ids(&self) -> &[BoundaryId] {
        &self.wall_ids
    }

    /// Boundary ids with prescribed pressure
    pub fn pressure_dirichlet_ids(&self) -> Vec<BoundaryId> {
        let mut ids: Vec<BoundaryId> = self.pressure_dirichlet.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Velocity prescribed on *id*
    pub fn is_velocity_dirichlet(&self, id: BoundaryId) -> bool {
        self.velocity_dirichlet.contains_key(&id)
    }

    /// Pressure prescribed on *id*
    pub fn is_pressure_dirichlet(&self, id: BoundaryId) -> bool {
        self.pressure_dirichlet.contains_key(&id)
    }

    /// Every non-periodic side of *mesh* has exactly one condition
    ///
    /// # Errors
    /// Side without or with two conditions
    pub fn validate(&self, mesh: &StructuredMesh) -> Result<()> {
        for face in 0..FACES_PER_CELL {
            if mesh.periodic[face / 2] {
                continue;
            }
            let id = mesh.boundary_ids[face];
            match (self.is_velocity_dirichlet(id), self.is_pressure_dirichlet(id)) {
                (true, false) | (false, true) => (),
                (false, false) => {
                    return Err(DgError::Config(format!("no boundary condition for id {}", id)))
                }
                (true, true) => {
                    return Err(DgError::Config(format!(
                        "velocity and pressure prescribed on id {}",
                        id
                    )))
                }
            }
        }
        Ok(())
    }

    /// Lanes on a velocity Dirichlet boundary
    pub fn velocity_dirichlet_mask(&self, neighbors: &[Neighbor; LANES]) -> LaneMask {
        LaneMask::from_fn(|l| match neighbors[l] {
            Neighbor::Boundary(id) => self.is_velocity_dirichlet(id),
            Neighbor::Cell(_) => false,
        })
    }

    /// Lanes on a pressure Dirichlet boundary
    pub fn pressure_dirichlet_mask(&self, neighbors: &[Neighbor; LANES]) -> LaneMask {
        LaneMask::from_fn(|l| match neighbors[l] {
            Neighbor::Boundary(id) => self.is_pressure_dirichlet(id),
            Neighbor::Cell(_) => false,
        })
    }

    /// Prescribed velocity (or its time derivative) per lane, zero on
    /// lanes without velocity Dirichlet condition
    pub fn velocity_data(
        &self,
        neighbors: &[Neighbor; LANES],
        x: &[Vectorized; DIM],
        t: f64,
        time_derivative: bool,
    ) -> [Vectorized; DIM] {
        let mut out = [Vectorized::splat(0.); DIM];
        for (l, n) in neighbors.iter().enumerate() {
            if let Neighbor::Boundary(id) = n {
                if let Some(f) = self.velocity_dirichlet.get(id) {
                    let p = [x[0][l], x[1][l]];
                    let v = if time_derivative {
                        f.time_derivative(p, t)
                    } else {
                        f.value(p, t)
                    };
                    out[0][l] = v[0];
                    out[1][l] = v[1];
                }
            }
        }
        out
    }

    /// Prescribed pressure per lane, zero on lanes without pressure
    /// Dirichlet condition
    pub fn pressure_data(&self, neighbors: &[Neighbor; LANES], x: &[Vectorized; DIM], t: f64) -> Vectorized {
        Vectorized::from_fn(|l| match neighbors[l] {
            Neighbor::Boundary(id) => self
                .pressure_dirichlet
                .get(&id)
                .map_or(0., |f| f.value([x[0][l], x[1][l]], t)),
            Neighbor::Cell(_) => 0.,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::CellRef;

    #[test]
    fn test_time_derivative_of_closure() {
        let f = |x: [f64; DIM], t: f64| [x[0] * t * t, (2. * t).sin()];
        let d = f.time_derivative([3., 0.], 0.5);
        assert!((d[0] - 3.).abs() < 1e-6);
        assert!((d[1] - 2. * 1f64.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_boundary_lanes() {
        let bc = BoundaryDescriptor::new()
            .with_wall(2)
            .with_velocity(0, |x: [f64; DIM], _: f64| [x[1], 0.])
            .with_pressure(1, |_: [f64; DIM], t: f64| t);
        let neighbors = [
            Neighbor::Boundary(0),
            Neighbor::Cell(CellRef::Local(3)),
            Neighbor::Boundary(1),
            Neighbor::Boundary(2),
        ];
        assert_eq!(bc.velocity_dirichlet_mask(&neighbors), LaneMask([true, false, false, true]));
        assert_eq!(bc.pressure_dirichlet_mask(&neighbors), LaneMask([false, false, true, false]));
        let x = [Vectorized::splat(1.), Vectorized([0.5, 1., 1., 1.])];
        let g = bc.velocity_data(&neighbors, &x, 0., false);
        assert_eq!(g[0], Vectorized([0.5, 0., 0., 0.]));
        assert_eq!(bc.pressure_data(&neighbors, &x, 2.), Vectorized([0., 0., 2., 0.]));
        assert_eq!(bc.wall_ids(), &[2]);
    }

    #[test]
    fn test_validate() {
        let mesh = StructuredMesh::channel(2, 2, 1., 0.).unwrap();
        assert!(BoundaryDescriptor::new().validate(&mesh).is_err());
        assert!(BoundaryDescriptor::new().with_wall(0).validate(&mesh).is_ok());
        let both = BoundaryDescriptor::new().with_wall(0).with_pressure(0, |_: [f64; DIM], _: f64| 0.);
        assert!(both.validate(&mesh).is_err());
    }
}
