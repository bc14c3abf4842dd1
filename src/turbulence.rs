//! # Eddy viscosity closures
//!
//! The effective viscosity `nu_eff = nu + nu_t` entering the viscous
//! operator and the wall shear stress. Supported are
//! - [`Molecular`]: `nu_t = 0`
//! - [`Smagorinsky`]: `nu_t = (cs h f)^2 sqrt(2 |S|^2)`
//! - [`MixingLength`]: `nu_t = (ml 0.41 d f)^2 |omega|` on enriched cells
//!
//! with the van Driest damping `f = 1 - exp(-y+/26)` (only with wall
//! data available, 1 otherwise).
//!
//! The viscosity is frozen once per time step in an [`EddyViscosityTable`].
//! Face values are `max(nu_eff^-, nu_eff^+)`, so both cells sharing a
//! face see the same value.
use crate::error::Result;
use crate::fe::{batch_map, face_neighbors, interior_mask, Coupling, FieldEvaluator, ShapeInfo};
use crate::field::BlockVector;
use crate::mesh::{ElementGeometryCache, LocalMesh, FACES_PER_CELL};
use crate::parameters::TurbulenceModelKind;
use crate::types::{LaneMask, Tensor2, Vectorized, DIM};
use crate::xwall::{EnrichmentContext, XWallCellEvaluator, XWallFaceEvaluator};
use num_traits::Zero;

/// von Karman constant of the mixing length
const KAPPA_ML: f64 = 0.41;

/// Van Driest constant
const A_PLUS: f64 = 26.;

/// Wall information at one quadrature point
#[derive(Debug, Clone, Copy)]
pub struct WallData {
    /// Cell length scale `volume^(1/DIM)`
    pub h: Vectorized,
    /// Wall distance
    pub distance: Vectorized,
    /// Wall shear stress
    pub tauw: Vectorized,
    /// Lanes with enrichment
    pub enriched: LaneMask,
    /// Wall distance and tau_w are available
    pub has_wall: bool,
    /// Molecular viscosity
    pub viscosity: f64,
}

impl WallData {
    /// `1 - exp(-y+/26)`, 1 without wall data
    pub fn van_driest(&self) -> Vectorized {
        if !self.has_wall {
            return Vectorized::splat(1.);
        }
        let nu = self.viscosity;
        Vectorized::from_fn(|l| {
            let yplus = self.distance[l] * self.tauw[l].max(0.).sqrt() / nu;
            1. - (-yplus / A_PLUS).exp()
        })
    }
}

/// Closure computing the effective viscosity
#[enum_dispatch]
pub trait EddyViscosity {
    /// `nu + nu_t` from the velocity gradient
    fn effective_viscosity(&self, gradient: &Tensor2<DIM>, wall: &WallData) -> Vectorized;

    /// Effective viscosity does not depend on the flow
    fn is_constant(&self) -> bool {
        false
    }
}

/// No turbulence model
#[derive(Debug, Clone, Copy, Default)]
pub struct Molecular;

impl EddyViscosity for Molecular {
    fn effective_viscosity(&self, _gradient: &Tensor2<DIM>, wall: &WallData) -> Vectorized {
        Vectorized::splat(wall.viscosity)
    }

    fn is_constant(&self) -> bool {
        true
    }
}

/// Smagorinsky model
#[derive(Debug, Clone, Copy)]
pub struct Smagorinsky {
    /// Smagorinsky constant
    pub cs: f64,
}

impl EddyViscosity for Smagorinsky {
    fn effective_viscosity(&self, gradient: &Tensor2<DIM>, wall: &WallData) -> Vectorized {
        let mut s2 = Vectorized::zero();
        for i in 0..DIM {
            for j in 0..DIM {
                let s = (gradient[i][j] + gradient[j][i]) * 0.5;
                s2 += s * s;
            }
        }
        let length = wall.h * wall.van_driest() * self.cs;
        length * length * (s2 * 2.).sqrt() + wall.viscosity
    }
}

/// Mixing length model
#[derive(Debug, Clone, Copy)]
pub struct MixingLength {
    /// Scaling of `0.41 * wall distance`
    pub ml: f64,
}

impl EddyViscosity for MixingLength {
    fn effective_viscosity(&self, gradient: &Tensor2<DIM>, wall: &WallData) -> Vectorized {
        let omega = (gradient[1][0] - gradient[0][1]).abs();
        let length = wall.distance * wall.van_driest() * (self.ml * KAPPA_ML);
        let nu = Vectorized::splat(wall.viscosity);
        Vectorized::select(wall.enriched, length * length * omega + wall.viscosity, nu)
    }
}

/// Selected closure
#[enum_dispatch(EddyViscosity)]
#[derive(Debug, Clone, Copy)]
pub enum EddyViscosityModel {
    /// Molecular viscosity
    Molecular,
    /// Smagorinsky
    Smagorinsky,
    /// Mixing length
    MixingLength,
}

impl From<TurbulenceModelKind> for EddyViscosityModel {
    fn from(kind: TurbulenceModelKind) -> Self {
        match kind {
            TurbulenceModelKind::None => Molecular.into(),
            TurbulenceModelKind::Smagorinsky { cs } if cs > 0. => Smagorinsky { cs }.into(),
            TurbulenceModelKind::MixingLength { ml } if ml > 0. => MixingLength { ml }.into(),
            _ => Molecular.into(),
        }
    }
}

/// Effective viscosity frozen at the quadrature points, indexed by batch
#[derive(Debug, Clone)]
pub struct EddyViscosityTable {
    cell: Vec<Vec<Vectorized>>,
    face: Vec<[Vec<Vectorized>; FACES_PER_CELL]>,
}

impl EddyViscosityTable {
    /// Molecular viscosity everywhere
    pub fn constant(mesh: &LocalMesh, shape: &ShapeInfo, viscosity: f64) -> Self {
        let nu = Vectorized::splat(viscosity);
        let n_batches = mesh.batches().len();
        let face = vec![nu; shape.n_q_points_1d];
        Self {
            cell: vec![vec![nu; shape.n_q_points]; n_batches],
            face: vec![[face.clone(), face.clone(), face.clone(), face]; n_batches],
        }
    }

    /// Evaluate *model* for *velocity*, which must hold up to date ghost
    /// values
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn compute(
        model: &EddyViscosityModel,
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        shape: &ShapeInfo,
        viscosity: f64,
        velocity: &BlockVector,
        ctx: Option<EnrichmentContext>,
    ) -> Result<Self> {
        if model.is_constant() {
            return Ok(Self::constant(mesh, shape, viscosity));
        }
        let has_wall = ctx.is_some();
        let results = batch_map(
            mesh,
            || {
                (
                    XWallCellEvaluator::<DIM>::new(shape, geometry, ctx),
                    XWallFaceEvaluator::<DIM>::new(shape, geometry, ctx),
                    XWallFaceEvaluator::<DIM>::new(shape, geometry, ctx),
                )
            },
            |(cell, minus, plus), batch| {
                cell.reinit(batch);
                cell.read_dof_values(velocity);
                cell.evaluate(false, true);
                let h = cell.plain().lanes().h;
                let cell_values: Vec<Vectorized> = (0..cell.n_q_points())
                    .map(|q| {
                        let wall = WallData {
                            h,
                            distance: cell.wall_distance(q),
                            tauw: cell.tauw(q),
                            enriched: cell.mask(),
                            has_wall,
                            viscosity,
                        };
                        model.effective_viscosity(&cell.gradient(q), &wall)
                    })
                    .collect();

                let mut face_values: [Vec<Vectorized>; FACES_PER_CELL] = Default::default();
                for (face, values) in face_values.iter_mut().enumerate() {
                    minus.reinit_interior(batch, face);
                    plus.reinit_exterior(mesh, batch, face, Coupling::Full);
                    minus.read_dof_values(velocity);
                    plus.read_dof_values(velocity);
                    minus.evaluate(false, true);
                    plus.evaluate(false, true);
                    let neighbors = face_neighbors(mesh, batch, face);
                    let interior = interior_mask(&neighbors);
                    let (h_m, h_p) = (minus.plain().lanes().h, plus.plain().lanes().h);
                    *values = (0..minus.n_q_points())
                        .map(|q| {
                            let wall_m = WallData {
                                h: h_m,
                                distance: minus.wall_distance(q),
                                tauw: minus.tauw(q),
                                enriched: minus.mask(),
                                has_wall,
                                viscosity,
                            };
                            let wall_p = WallData {
                                h: h_p,
                                distance: plus.wall_distance(q),
                                tauw: plus.tauw(q),
                                enriched: plus.mask(),
                                has_wall,
                                viscosity,
                            };
                            let nu_m = model.effective_viscosity(&minus.gradient(q), &wall_m);
                            let nu_p = model.effective_viscosity(&plus.gradient(q), &wall_p);
                            Vectorized::select(interior, nu_m.max(nu_p), nu_m)
                        })
                        .collect();
                }
                Ok((cell_values, face_values))
            },
        )?;
        let (cell, face) = results.into_iter().unzip();
        Ok(Self { cell, face })
    }

    /// Value at cell quadrature point *q* of batch *batch*
    #[inline]
    pub fn cell(&self, batch: usize, q: usize) -> Vectorized {
        self.cell[batch][q]
    }

    /// Value at face quadrature point *q* of face *face* of batch *batch*
    #[inline]
    pub fn face(&self, batch: usize, face: usize, q: usize) -> Vectorized {
        self.face[batch][face][q]
    }

    /// Largest value over all owned cells
    pub fn max_value(&self, mesh: &LocalMesh) -> f64 {
        let local = mesh
            .batches()
            .iter()
            .zip(self.cell.iter())
            .flat_map(|(b, values)| values.iter().map(move |v| v.max_lane(b.n_filled)))
            .fold(0., f64::max);
        mesh.comm().max(local)
    }
}
