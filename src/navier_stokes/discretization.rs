//! Function spaces and shared data of all operators
//!
//! Velocity: `DIM` blocks of polynomial dofs of degree `k`, followed by
//! `DIM` blocks of enrichment dofs if the wall enrichment is active.
//! Pressure: one block of degree `k - 1`.
use super::boundary_conditions::{scalar_at, vector_at, BoundaryDescriptor, ScalarFunction, VectorFunction};
use crate::error::Result;
use crate::fe::{batch_cells, cell_loop, CellEvaluator, FieldEvaluator, InverseMassMatrix, LaneGeometry, ShapeInfo};
use crate::field::{BlockVector, LocalDofs, TimeHistory};
use crate::mesh::{CellBatch, ElementGeometryCache, LocalMesh};
use crate::parameters::Parameters;
use crate::turbulence::EddyViscosityTable;
use crate::types::{Vectorized, DIM};
use crate::xwall::{EnrichmentContext, XWall, XWallCellEvaluator};
use std::sync::Arc;

/// Mesh, bases and enrichment shared by the operators
pub struct Discretization {
    /// Partition of this rank
    pub mesh: Arc<LocalMesh>,
    /// Cell geometry
    pub geometry: Arc<ElementGeometryCache>,
    /// Velocity basis
    pub shape_u: Arc<ShapeInfo>,
    /// Pressure basis
    pub shape_p: Arc<ShapeInfo>,
    /// Inverse mass matrix of the velocity polynomials
    pub minv_u: InverseMassMatrix,
    /// Inverse mass matrix of the pressure
    pub minv_p: InverseMassMatrix,
    /// Wall enrichment, if enabled
    pub xwall: Option<XWall>,
    /// Boundary conditions
    pub boundary: BoundaryDescriptor,
    /// Configuration
    pub params: Parameters,
}

impl Discretization {
    /// Bases, inverse mass matrices and (optionally) the wall enrichment
    ///
    /// # Errors
    /// Invalid parameters, or enrichment without a wall boundary
    pub fn new(mesh: Arc<LocalMesh>, params: Parameters, boundary: BoundaryDescriptor) -> Result<Self> {
        params.validate()?;
        boundary.validate(&mesh.global)?;
        let geometry = Arc::new(ElementGeometryCache::new(&mesh));
        let shape_u = Arc::new(ShapeInfo::new(params.degree, params.n_q_points_1d));
        let shape_p = Arc::new(ShapeInfo::new(params.degree_p(), params.n_q_points_1d));
        let minv_u = InverseMassMatrix::new(&shape_u)?;
        let minv_p = InverseMassMatrix::new(&shape_p)?;
        let xwall = match params.xwall() {
            Some(p) => Some(XWall::new(
                &mesh,
                &geometry,
                &shape_u,
                p,
                params.viscosity,
                boundary.wall_ids(),
            )?),
            None => None,
        };
        Ok(Self {
            mesh,
            geometry,
            shape_u,
            shape_p,
            minv_u,
            minv_p,
            xwall,
            boundary,
            params,
        })
    }

    /// Enrichment with the current tau_w
    pub fn ctx(&self) -> Option<EnrichmentContext<'_>> {
        self.xwall.as_ref().map(|x| x.context(&self.mesh))
    }

    /// Block layout of the velocity
    pub fn velocity_layout(&self) -> Vec<usize> {
        let mut layout = vec![self.shape_u.n_dofs; DIM];
        if let Some(xwall) = &self.xwall {
            layout.extend(vec![xwall.n_dofs(); DIM]);
        }
        layout
    }

    /// Zero velocity
    pub fn velocity_vector(&self) -> BlockVector {
        BlockVector::new(self.mesh.partitioner(), &self.velocity_layout())
    }

    /// Zero pressure
    pub fn pressure_vector(&self) -> BlockVector {
        BlockVector::new(self.mesh.partitioner(), &[self.shape_p.n_dofs])
    }

    /// Zero scalar in the velocity polynomials (vorticity)
    pub fn scalar_vector(&self) -> BlockVector {
        BlockVector::new(self.mesh.partitioner(), &[self.shape_u.n_dofs])
    }

    /// Velocity evaluator on cells
    pub fn velocity_cell_evaluator(&self) -> XWallCellEvaluator<'_, DIM> {
        XWallCellEvaluator::new(&self.shape_u, &self.geometry, self.ctx())
    }

    /// Jacobian determinant per lane
    pub fn det(&self, batch: &CellBatch) -> Vectorized {
        LaneGeometry::new(&self.geometry, &batch_cells(batch)).det
    }

    /// Apply the inverse velocity mass matrix to the local dofs of *batch*
    ///
    /// # Errors
    /// Failure of the local solves on enriched cells
    pub fn apply_inverse_mass_velocity(&self, batch: &CellBatch, local: &mut LocalDofs) -> Result<()> {
        let det = self.det(batch);
        match &self.xwall {
            Some(xwall) => xwall.inverse().apply_local(&self.minv_u, batch, det, DIM, local),
            None => {
                for block in &mut local.blocks {
                    self.minv_u.apply(block, det);
                }
                Ok(())
            }
        }
    }

    /// `dst = M^{-1} src` for a velocity
    ///
    /// # Errors
    /// Failure of the local solves on enriched cells
    pub fn inverse_mass_velocity(&self, dst: &mut BlockVector, src: &BlockVector) -> Result<()> {
        cell_loop(
            &self.mesh,
            dst,
            0,
            || (),
            |_, batch| {
                let mut local = LocalDofs::gather(src, 0, src.n_blocks(), &batch_cells(batch));
                self.apply_inverse_mass_velocity(batch, &mut local)?;
                Ok(local)
            },
        )
    }

    /// L2 projection of *f* at time *t* onto the velocity space
    ///
    /// # Errors
    /// Failure of the local solves on enriched cells
    pub fn project_velocity(&self, f: &dyn VectorFunction, t: f64) -> Result<BlockVector> {
        let mut dst = self.velocity_vector();
        cell_loop(
            &self.mesh,
            &mut dst,
            0,
            || self.velocity_cell_evaluator(),
            |eval, batch| {
                eval.reinit(batch);
                for q in 0..eval.n_q_points() {
                    let x = eval.quadrature_point(q);
                    eval.submit_value(vector_at(f, &x, t), q);
                }
                let mut local = eval.integrate(true, false);
                self.apply_inverse_mass_velocity(batch, &mut local)?;
                Ok(local)
            },
        )?;
        dst.update_ghost_values();
        Ok(dst)
    }

    /// L2 projection of *f* at time *t* onto the pressure space
    ///
    /// # Errors
    /// Propagated from the cell loop
    pub fn project_pressure(&self, f: &dyn ScalarFunction, t: f64) -> Result<BlockVector> {
        let mut dst = self.pressure_vector();
        cell_loop(
            &self.mesh,
            &mut dst,
            0,
            || CellEvaluator::<1>::new(&self.shape_p, &self.geometry),
            |eval, batch| {
                eval.reinit(batch);
                for q in 0..eval.n_q_points() {
                    let x = eval.quadrature_point(q);
                    eval.submit_value([scalar_at(f, &x, t)], q);
                }
                let mut local = eval.integrate(true, false);
                self.minv_p.apply(&mut local.blocks[0], eval.lanes().det);
                Ok(local)
            },
        )?;
        dst.update_ghost_values();
        Ok(dst)
    }

    /// Update tau_w from the newest velocity, refactorize the enriched
    /// mass matrices and re-project all stored velocities onto the new
    /// basis. Returns false without enrichment.
    ///
    /// # Errors
    /// Failure of the local solves on enriched cells
    pub fn update_wall_model(
        &mut self,
        velocity: &mut TimeHistory<BlockVector>,
        viscosity: &EddyViscosityTable,
    ) -> Result<bool> {
        let xwall = match self.xwall.as_mut() {
            Some(xwall) => xwall,
            None => return Ok(false),
        };
        xwall.update_wall_shear_stress(&self.mesh, &self.geometry, &self.shape_u, &velocity[0], Some(viscosity))?;
        xwall.rebuild_inverse(&self.mesh, &self.geometry, &self.shape_u)?;
        for u in velocity.iter_mut() {
            let old = u.clone();
            xwall.reproject(&self.mesh, &self.geometry, &self.shape_u, &self.minv_u, &old, u)?;
            u.update_ghost_values();
        }
        Ok(true)
    }

    /// Set tau_w per wall vertex without touching any velocity. Returns
    /// false without enrichment.
    ///
    /// # Errors
    /// Singular local mass matrix
    pub fn restore_wall_model(&mut self, tauw_wall: &[f64]) -> Result<bool> {
        match self.xwall.as_mut() {
            Some(xwall) => {
                xwall.restore_wall_shear_stress(&self.mesh, &self.geometry, &self.shape_u, tauw_wall)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
