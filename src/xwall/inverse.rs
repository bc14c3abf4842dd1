//! Inverse mass matrix of the enriched velocity space
//!
//! On enriched cells the basis `{N_i} u {psi M_j}` has no tensor product
//! structure, the (scalar) mass matrix of size `n_std + n_enr` is
//! assembled and LU factorized per cell. The factors depend on tau_w
//! and are rebuilt wholesale whenever tau_w changes. Cells without
//! enrichment use the tensor product inverse and get zero enrichment
//! dofs.
use super::evaluator::{EnrichmentContext, XWallCellEvaluator};
use crate::error::Result;
use crate::fe::{batch_cells, batch_map, cell_loop, local_matrices, FieldEvaluator};
use crate::fe::{InverseMassMatrix, LaneGeometry, ShapeInfo};
use crate::field::{BlockVector, LocalDofs};
use crate::mesh::{CellBatch, ElementGeometryCache, LocalMesh};
use crate::types::Vectorized;
use ndarray::{Array1, OwnedRepr};
use ndarray_linalg::{FactorizeInto, LUFactorized, Solve};
use num_traits::Zero;

/// LU factors of the enriched mass matrix per local cell
pub struct InverseOperatorCache {
    factors: Vec<Option<LUFactorized<OwnedRepr<f64>>>>,
    n_std: usize,
    valid: bool,
}

impl InverseOperatorCache {
    /// Empty (stale) cache for *mesh*
    pub fn new(mesh: &LocalMesh, shape: &ShapeInfo) -> Self {
        Self {
            factors: (0..mesh.n_local()).map(|_| None).collect(),
            n_std: shape.n_dofs,
            valid: false,
        }
    }

    /// Factors correspond to the current tau_w
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark stale, must be rebuilt before the next application
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Number of cells holding a factorization
    pub fn n_enriched(&self) -> usize {
        self.factors.iter().filter(|f| f.is_some()).count()
    }

    /// Enriched cell
    pub fn is_enriched(&self, cell: usize) -> bool {
        self.factors[cell].is_some()
    }

    /// Assemble and factorize the mass matrices of all enriched cells
    ///
    /// # Errors
    /// Singular local mass matrix
    pub fn rebuild(
        &mut self,
        mesh: &LocalMesh,
        shape: &ShapeInfo,
        geometry: &ElementGeometryCache,
        ctx: EnrichmentContext,
    ) -> Result<()> {
        let per_batch = batch_map(
            mesh,
            || XWallCellEvaluator::<1>::new(shape, geometry, Some(ctx)),
            |eval, batch| {
                eval.reinit(batch);
                let mask = eval.mask();
                if !mask.any() {
                    return Ok(Vec::new());
                }
                let layout = eval.dofs_per_block();
                let matrices = local_matrices(&layout, |unit| {
                    eval.set_dof_values(unit);
                    eval.evaluate(true, false);
                    for q in 0..eval.n_q_points() {
                        let v = eval.value(q);
                        eval.submit_value(v, q);
                    }
                    Ok(eval.integrate(true, false))
                })?;
                let mut factors = Vec::new();
                for (lane, cell) in batch.filled_lanes() {
                    if mask.is_set(lane) {
                        factors.push((cell, matrices[lane].clone().factorize_into()?));
                    }
                }
                Ok(factors)
            },
        )?;
        for f in &mut self.factors {
            *f = None;
        }
        for (cell, lu) in per_batch.into_iter().flatten() {
            self.factors[cell] = Some(lu);
        }
        self.valid = true;
        Ok(())
    }

    /// Solve with the enriched mass matrix of *cell*, *rhs* holds the
    /// standard dofs followed by the enrichment dofs
    ///
    /// # Errors
    /// Failure of the triangular solves
    ///
    /// # Panics
    /// *cell* is not enriched
    pub fn solve(&self, cell: usize, rhs: &Array1<f64>) -> Result<Array1<f64>> {
        match &self.factors[cell] {
            Some(lu) => Ok(lu.solve(rhs)?),
            None => panic!("cell {} carries no enrichment", cell),
        }
    }

    /// Apply the inverse mass matrix to the local dofs of *batch*. The
    /// first *n_components* blocks hold the standard dofs, the following
    /// ones (if any) the enrichment dofs.
    ///
    /// # Errors
    /// Failure of the triangular solves
    ///
    /// # Panics
    /// Cache is stale
    pub fn apply_local(
        &self,
        minv: &InverseMassMatrix,
        batch: &CellBatch,
        det: Vectorized,
        n_components: usize,
        local: &mut LocalDofs,
    ) -> Result<()> {
        let enriched = local.blocks.len() > n_components;
        let original = if enriched { Some(local.clone()) } else { None };
        for block in local.blocks.iter_mut().take(n_components) {
            minv.apply(block, det);
        }
        let original = match original {
            Some(o) => o,
            None => return Ok(()),
        };
        assert!(self.valid, "inverse operator cache used while stale");
        for block in local.blocks.iter_mut().skip(n_components) {
            for v in block.iter_mut() {
                *v = Vectorized::zero();
            }
        }
        for (lane, cell) in batch.filled_lanes() {
            if !self.is_enriched(cell) {
                continue;
            }
            for c in 0..n_components {
                let rhs: Array1<f64> = original.blocks[c]
                    .iter()
                    .chain(original.blocks[n_components + c].iter())
                    .map(|v| v[lane])
                    .collect();
                let x = self.solve(cell, &rhs)?;
                for (i, xi) in x.iter().enumerate() {
                    if i < self.n_std {
                        local.blocks[c][i][lane] = *xi;
                    } else {
                        local.blocks[n_components + c][i - self.n_std][lane] = *xi;
                    }
                }
            }
        }
        Ok(())
    }

    /// `dst = M^{-1} src` on all local cells
    ///
    /// # Errors
    /// Failure of the triangular solves
    pub fn apply(
        &self,
        mesh: &LocalMesh,
        geometry: &ElementGeometryCache,
        minv: &InverseMassMatrix,
        n_components: usize,
        src: &BlockVector,
        dst: &mut BlockVector,
    ) -> Result<()> {
        cell_loop(
            mesh,
            dst,
            0,
            || (),
            |_, batch| {
                let cells = batch_cells(batch);
                let mut local = LocalDofs::gather(src, 0, src.n_blocks(), &cells);
                let det = LaneGeometry::new(geometry, &cells).det;
                self.apply_local(minv, batch, det, n_components, &mut local)?;
                Ok(local)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::VertexField;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use crate::xwall::WallDistance;
    use std::sync::Arc;

    #[test]
    fn test_inverse_of_enriched_mass() {
        let mesh = StructuredMesh::channel(2, 6, 1., 1.5).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let geo = ElementGeometryCache::new(&local);
        let wall = WallDistance::new(&local, &[0]).unwrap();
        let tauw = VertexField::new(&local, 1.);
        let shape = ShapeInfo::new(2, 4);
        let shape_enr = ShapeInfo::new(1, 4);
        let ctx = EnrichmentContext {
            mesh: &local,
            distance: &wall.distance,
            tauw: &tauw,
            viscosity: 1e-2,
            max_wall_distance: 0.2,
            shape: &shape_enr,
        };
        let mut cache = InverseOperatorCache::new(&local, &shape);
        assert!(!cache.is_valid());
        cache.rebuild(&local, &shape, &geo, ctx).unwrap();
        assert!(cache.is_valid());
        assert_eq!(cache.n_enriched(), 4);

        // x with zero enrichment dofs on plain cells
        let mut x = BlockVector::new(local.partitioner(), &[9, 9, 4, 4]);
        for b in &mut x.blocks {
            b.add_random(1.);
        }
        for cell in (0..local.n_local()).filter(|c| !cache.is_enriched(*c)) {
            x.blocks[2].cell_mut(cell).fill(0.);
            x.blocks[3].cell_mut(cell).fill(0.);
        }
        // b = M x
        let mut b = BlockVector::new(local.partitioner(), &[9, 9, 4, 4]);
        cell_loop(
            &local,
            &mut b,
            0,
            || XWallCellEvaluator::<2>::new(&shape, &geo, Some(ctx)),
            |eval, batch| {
                eval.reinit(batch);
                eval.read_dof_values(&x);
                eval.evaluate(true, false);
                for q in 0..eval.n_q_points() {
                    let v = eval.value(q);
                    eval.submit_value(v, q);
                }
                Ok(eval.integrate(true, false))
            },
        )
        .unwrap();
        let minv = InverseMassMatrix::new(&shape).unwrap();
        let mut y = BlockVector::new(local.partitioner(), &[9, 9, 4, 4]);
        cache.apply(&local, &geo, &minv, 2, &b, &mut y).unwrap();
        let mut diff = y.clone();
        diff.add_scaled(-1., &x);
        assert!(diff.norm_linf() < 1e-8, "error {}", diff.norm_linf());
    }
}
