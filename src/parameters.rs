//! Solver configuration
//!
//! All constants of the discretization are collected in [`Parameters`].
//! The struct is created once by the application and handed to every
//! component by reference; nothing reads global state.
use crate::error::{DgError, Result};

/// Discretization of the velocity divergence in the right-hand side
/// of the pressure Poisson equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceForm {
    /// Element-wise `-(div u, q)`, no face terms
    Strong,
    /// `(u, grad q) - <u* . n, q>` with central flux and Dirichlet data
    PartiallyIntegrated,
}

/// Discretization of the pressure gradient in the projection step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientForm {
    /// Element-wise `(grad p, v)`
    Strong,
    /// `-(p, div v) + <p* n, v>` with central flux and Dirichlet data
    PartiallyIntegrated,
}

/// Turbulence closure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurbulenceModelKind {
    /// Molecular viscosity only
    None,
    /// Smagorinsky model with constant *cs* and van Driest damping
    Smagorinsky {
        /// Smagorinsky constant
        cs: f64,
    },
    /// Mixing length model (enriched cells only)
    MixingLength {
        /// Scaling of the mixing length `0.41 * wall_distance`
        ml: f64,
    },
}

/// Parameters of the wall enrichment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XWallParameters {
    /// Cells whose center lies closer to the wall than this are enriched
    pub max_wall_distance: f64,
    /// Polynomial degree of the enrichment dof set
    pub degree: usize,
    /// Re-project the solution history whenever tau_w changes.
    /// If false, tau_w is frozen after the first time step.
    pub variable_tauw: bool,
    /// Weight of the new tau_w against the previous one (1 = replace)
    pub relaxation: f64,
    /// Wall shear stress before the first update
    pub initial_tauw: f64,
}

impl Default for XWallParameters {
    fn default() -> Self {
        Self {
            max_wall_distance: 0.1,
            degree: 1,
            variable_tauw: false,
            relaxation: 1.0,
            initial_tauw: 1.0,
        }
    }
}

/// Function space of the velocity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnrichmentStrategy {
    /// Plain polynomial space
    Polynomial,
    /// Polynomials plus Spalding wall-function enrichment near no-slip walls
    Wall(XWallParameters),
}

/// Tolerances of an iterative solver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrylovParameters {
    /// Absolute residual tolerance
    pub abs_tol: f64,
    /// Residual tolerance relative to the initial residual
    pub rel_tol: f64,
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Krylov space size before restart (GMRES only)
    pub restart: usize,
}

impl Default for KrylovParameters {
    fn default() -> Self {
        Self {
            abs_tol: 1e-12,
            rel_tol: 1e-8,
            max_iter: 1000,
            restart: 100,
        }
    }
}

/// Configuration of the dual splitting scheme
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Polynomial degree of the velocity (pressure: degree - 1)
    pub degree: usize,
    /// Number of 1D quadrature points (all operators)
    pub n_q_points_1d: usize,
    /// Kinematic viscosity
    pub viscosity: f64,
    /// Order of the BDF time integrator (1, 2 or 3)
    pub order: usize,
    /// CFL number for adaptive time stepping
    pub cfl: f64,
    /// Scaling of the interior penalty parameter
    pub stab_factor: f64,
    /// Grad-div stabilization constant (0 disables)
    pub k_div: f64,
    /// Continuity penalty constant on interior faces (0 disables). A
    /// positive value turns the projection into a global solve.
    pub k_cont: f64,
    /// Turbulence closure
    pub turbulence: TurbulenceModelKind,
    /// Enrichment of the velocity space
    pub enrichment: EnrichmentStrategy,
    /// Divergence term of the pressure Poisson equation
    pub divergence_form: DivergenceForm,
    /// Pressure gradient term of the projection
    pub gradient_form: GradientForm,
    /// Viscous (Helmholtz) solver
    pub viscous_solver: KrylovParameters,
    /// Pressure Poisson solver
    pub pressure_solver: KrylovParameters,
    /// Projection solver, used with the continuity penalty
    pub projection_solver: KrylovParameters,
}

impl Default for Parameters {
    fn default() -> Self {
        let degree = 3;
        Self {
            degree,
            n_q_points_1d: default_n_q_points(degree),
            viscosity: 1e-2,
            order: 2,
            cfl: 0.2,
            stab_factor: 1.0,
            k_div: 0.0,
            k_cont: 0.0,
            turbulence: TurbulenceModelKind::None,
            enrichment: EnrichmentStrategy::Polynomial,
            divergence_form: DivergenceForm::PartiallyIntegrated,
            gradient_form: GradientForm::PartiallyIntegrated,
            viscous_solver: KrylovParameters::default(),
            pressure_solver: KrylovParameters {
                abs_tol: 1e-12,
                rel_tol: 1e-8,
                max_iter: 2000,
                restart: 0,
            },
            projection_solver: KrylovParameters {
                abs_tol: 1e-12,
                rel_tol: 1e-8,
                max_iter: 1000,
                restart: 0,
            },
        }
    }
}

/// Over-integration for the convective term (3/2 rule)
pub fn default_n_q_points(degree: usize) -> usize {
    degree + 1 + degree / 2
}

impl Parameters {
    /// Parameters for polynomial degree *degree*, everything else default
    pub fn with_degree(degree: usize) -> Self {
        Self {
            degree,
            n_q_points_1d: default_n_q_points(degree),
            ..Self::default()
        }
    }

    /// Polynomial degree of the pressure space
    pub fn degree_p(&self) -> usize {
        self.degree.saturating_sub(1)
    }

    /// Parameters of the wall enrichment, if enabled
    pub fn xwall(&self) -> Option<&XWallParameters> {
        match &self.enrichment {
            EnrichmentStrategy::Polynomial => None,
            EnrichmentStrategy::Wall(p) => Some(p),
        }
    }

    /// Check consistency
    ///
    /// # Errors
    /// Parameters which can not describe a valid discretization
    pub fn validate(&self) -> Result<()> {
        if self.degree == 0 {
            return Err(DgError::Config("velocity degree must be >= 1".to_owned()));
        }
        if self.n_q_points_1d < self.degree + 1 {
            return Err(DgError::Config(format!(
                "{} quadrature points can not integrate the mass matrix of degree {}",
                self.n_q_points_1d, self.degree
            )));
        }
        if !(1..=3).contains(&self.order) {
            return Err(DgError::Config(format!(
                "BDF order {} not supported",
                self.order
            )));
        }
        if self.viscosity <= 0. {
            return Err(DgError::Config("viscosity must be positive".to_owned()));
        }
        if self.k_div < 0. || self.k_cont < 0. || self.stab_factor <= 0. {
            return Err(DgError::Config(
                "stabilization constants must be positive".to_owned(),
            ));
        }
        if let Some(xwall) = self.xwall() {
            if xwall.relaxation <= 0. || xwall.relaxation > 1. {
                return Err(DgError::Config(
                    "tau_w relaxation must lie in (0, 1]".to_owned(),
                ));
            }
            if xwall.initial_tauw.is_nan() || xwall.initial_tauw <= 0. {
                return Err(DgError::Config(format!(
                    "initial tau_w must be positive, got {}",
                    xwall.initial_tauw
                )));
            }
            if xwall.max_wall_distance <= 0. {
                return Err(DgError::Config(
                    "enrichment distance threshold must be positive".to_owned(),
                ));
            }
        }
        if let TurbulenceModelKind::MixingLength { .. } = self.turbulence {
            if self.xwall().is_none() {
                return Err(DgError::Config(
                    "mixing length model needs the wall enrichment".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Parameters::default().validate().is_ok());
        assert_eq!(Parameters::with_degree(4).n_q_points_1d, 7);
        assert_eq!(Parameters::with_degree(1).degree_p(), 0);
    }

    #[test]
    fn test_invalid_parameters() {
        let mut params = Parameters::default();
        params.order = 4;
        assert!(params.validate().is_err());
        let mut params = Parameters::default();
        params.turbulence = TurbulenceModelKind::MixingLength { ml: 1. };
        assert!(params.validate().is_err());
        params.enrichment = EnrichmentStrategy::Wall(XWallParameters::default());
        assert!(params.validate().is_ok());
        let mut params = Parameters::default();
        params.k_cont = -0.5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_non_positive_initial_tauw() {
        for tauw in [0., -1., f64::NAN] {
            let mut params = Parameters::default();
            params.enrichment = EnrichmentStrategy::Wall(XWallParameters {
                initial_tauw: tauw,
                ..XWallParameters::default()
            });
            match params.validate() {
                Err(DgError::Config(msg)) => assert!(msg.contains("initial tau_w")),
                other => panic!("expected a config error, got {:?}", other),
            }
        }
    }
}
