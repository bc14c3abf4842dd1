//! Pressure Poisson equation
//!
//! The splitting scheme only needs "solve `-lap p = f`" from its elliptic
//! solver, see [`PoissonSolver`]. [`SipgPoisson`] provides it with a
//! matrix-free symmetric interior penalty discretization, solved by
//! conjugate gradients with a block-Jacobi preconditioner (one dense LU
//! factorization per cell).
//!
//! Faces with an id in `dirichlet_ids` carry (homogeneous) Dirichlet
//! conditions, all other boundary faces Neumann conditions. Without any
//! Dirichlet face the operator is singular and the right-hand side must
//! be projected onto the range, see
//! [`PoissonSolver::apply_nullspace_projection`].
use super::{cg, LinearOperator, Preconditioner, SolverControl};
use crate::error::Result;
use crate::fe::{
    batch_map, boundary_mask, cell_loop, face_neighbors, homogeneous_exterior_state, interior_mask,
    local_matrices, CellEvaluator, Coupling, FaceEvaluator, FieldEvaluator, ShapeInfo,
};
use crate::field::{BlockVector, LocalDofs};
use crate::mesh::{BoundaryId, CellBatch, CellRef, ElementGeometryCache, LocalMesh, Neighbor, FACES_PER_CELL};
use crate::parameters::KrylovParameters;
use crate::types::{dot, Vectorized};
use ndarray::OwnedRepr;
use ndarray_linalg::{FactorizeInto, LUFactorized, Solve};
use std::sync::Arc;

/// Elliptic solver consumed by the splitting scheme
pub trait PoissonSolver {
    /// Solve `L dst = rhs`, *dst* holds the initial guess
    ///
    /// # Errors
    /// Failure of operator or preconditioner
    fn solve(&self, dst: &mut BlockVector, rhs: &BlockVector) -> Result<SolverControl>;

    /// Remove the constant mode
    fn apply_nullspace_projection(&self, v: &mut BlockVector);

    /// Penalty measure of every owned cell
    fn penalty_parameter_table(&self) -> &[f64];

    /// Scaling of the penalty parameter
    fn penalty_factor(&self) -> f64;

    /// Pressure is only determined up to a constant
    fn is_pure_neumann(&self) -> bool;
}

/// Scratch data of the operator kernel
type Scratch<'a> = (CellEvaluator<'a, 1>, FaceEvaluator<'a, 1>, FaceEvaluator<'a, 1>);

/// Source of the dof values of a kernel
enum Source<'v> {
    Vector(&'v BlockVector),
    Local(&'v LocalDofs),
}

/// Symmetric interior penalty discretization of `-lap`
pub struct SipgPoisson {
    mesh: Arc<LocalMesh>,
    geometry: Arc<ElementGeometryCache>,
    shape: Arc<ShapeInfo>,
    dirichlet_ids: Vec<BoundaryId>,
    stab_factor: f64,
    params: KrylovParameters,
    penalty_table: Vec<f64>,
    block_jacobi: Vec<LUFactorized<OwnedRepr<f64>>>,
    pure_neumann: bool,
}

impl SipgPoisson {
    /// Set up operator and preconditioner
    ///
    /// # Errors
    /// Singular diagonal block
    pub fn new(
        mesh: Arc<LocalMesh>,
        geometry: Arc<ElementGeometryCache>,
        shape: Arc<ShapeInfo>,
        dirichlet_ids: &[BoundaryId],
        stab_factor: f64,
        params: KrylovParameters,
    ) -> Result<Self> {
        let has_dirichlet = (0..mesh.n_local()).any(|cell| {
            (0..FACES_PER_CELL).any(|face| match mesh.neighbor(cell, face) {
                Neighbor::Boundary(id) => dirichlet_ids.contains(&id),
                Neighbor::Cell(_) => false,
            })
        });
        let pure_neumann = mesh.comm().max(if has_dirichlet { 1. } else { 0. }) == 0.;
        let penalty_table = geometry.penalty_measures();
        let mut poisson = Self {
            mesh,
            geometry,
            shape,
            dirichlet_ids: dirichlet_ids.to_vec(),
            stab_factor,
            params,
            penalty_table,
            block_jacobi: Vec::new(),
            pure_neumann,
        };
        poisson.block_jacobi = poisson.factorize_diagonal_blocks()?;
        tracing::debug!(
            "SIPG Poisson: degree {}, pure Neumann: {}",
            poisson.shape.degree,
            poisson.pure_neumann
        );
        Ok(poisson)
    }

    fn scratch(&self) -> Scratch<'_> {
        (
            CellEvaluator::new(&self.shape, &self.geometry),
            FaceEvaluator::new(&self.shape, &self.geometry),
            FaceEvaluator::new(&self.shape, &self.geometry),
        )
    }

    /// Local action of the operator on one batch
    fn local_apply(&self, scratch: &mut Scratch, batch: &CellBatch, src: &Source, coupling: Coupling) -> LocalDofs {
        let (cell, minus, plus) = scratch;
        let mesh = self.mesh.as_ref();
        cell.reinit(batch);
        match src {
            Source::Vector(v) => cell.read_dof_values(v),
            Source::Local(d) => cell.set_dof_values(d),
        }
        cell.evaluate(false, true);
        for q in 0..cell.n_q_points() {
            let g = cell.gradient(q);
            cell.submit_gradient(g, q);
        }
        let mut out = cell.integrate(false, true);

        for face in 0..FACES_PER_CELL {
            minus.reinit_interior(batch, face);
            plus.reinit_exterior(mesh, batch, face, coupling);
            match src {
                Source::Vector(v) => {
                    minus.read_dof_values(v);
                    plus.read_dof_values(v);
                }
                Source::Local(d) => {
                    minus.set_dof_values(d);
                    plus.set_dof_values(&LocalDofs::zeros(&[self.shape.n_dofs]));
                }
            }
            minus.evaluate(true, true);
            plus.evaluate(true, true);
            let neighbors = face_neighbors(mesh, batch, face);
            let interior = interior_mask(&neighbors);
            let dirichlet = boundary_mask(&neighbors, |id| self.dirichlet_ids.contains(&id));
            // neighbour geometry also for the block diagonal (plus side not read)
            let tau = self.geometry.face_penalty(
                self.stab_factor,
                self.shape.degree,
                minus.lanes().penalty_measure,
                &neighbors,
            );
            let n = minus.normal();
            for q in 0..minus.n_q_points() {
                let (vm, gm) = (minus.value(q), minus.gradient(q));
                let (vp, gp) = homogeneous_exterior_state(interior, dirichlet, &vm, &gm, &plus.value(q), &plus.gradient(q));
                let jump = vm[0] - vp[0];
                let average_flux = (dot(&gm[0], &n) + dot(&gp[0], &n)) * 0.5;
                minus.submit_value([tau * jump - average_flux], q);
                minus.submit_gradient([[jump * n[0] * -0.5, jump * n[1] * -0.5]], q);
            }
            out.add(&minus.integrate(true, true));
        }
        out
    }

    fn factorize_diagonal_blocks(&self) -> Result<Vec<LUFactorized<OwnedRepr<f64>>>> {
        let per_batch = batch_map(
            &self.mesh,
            || self.scratch(),
            |scratch, batch| {
                let matrices = local_matrices(&[self.shape.n_dofs], |unit| {
                    Ok(self.local_apply(scratch, batch, &Source::Local(unit), Coupling::CellOnly))
                })?;
                batch
                    .filled_lanes()
                    .map(|(lane, _)| Ok(matrices[lane].clone().factorize_into()?))
                    .collect::<Result<Vec<_>>>()
            },
        )?;
        Ok(per_batch.into_iter().flatten().collect())
    }

    /// Polynomial degree
    pub fn degree(&self) -> usize {
        self.shape.degree
    }
}

impl LinearOperator<BlockVector> for SipgPoisson {
    fn vmult(&self, dst: &mut BlockVector, src: &BlockVector) -> Result<()> {
        cell_loop(
            &self.mesh,
            dst,
            0,
            || self.scratch(),
            |scratch, batch| Ok(self.local_apply(scratch, batch, &Source::Vector(src), Coupling::Full)),
        )
    }
}

/// Inverse of the diagonal blocks
struct BlockJacobi<'a>(&'a SipgPoisson);

impl<'a> Preconditioner<BlockVector> for BlockJacobi<'a> {
    fn apply(&self, dst: &mut BlockVector, src: &BlockVector) -> Result<()> {
        // batches list the local cells in order
        for (cell, lu) in self.0.block_jacobi.iter().enumerate() {
            let x = lu.solve(&src.blocks[0].cell(CellRef::Local(cell)).to_owned())?;
            dst.blocks[0].cell_mut(cell).assign(&x);
        }
        Ok(())
    }
}

impl PoissonSolver for SipgPoisson {
    fn solve(&self, dst: &mut BlockVector, rhs: &BlockVector) -> Result<SolverControl> {
        let control = cg(self, &BlockJacobi(self), dst, rhs, &self.params)?;
        control.warn_if_not_converged("Poisson");
        Ok(control)
    }

    fn apply_nullspace_projection(&self, v: &mut BlockVector) {
        let block = &mut v.blocks[0];
        let mean = self.mesh.comm().sum(block.v.sum()) / block.global_size();
        block.v -= mean;
    }

    fn penalty_parameter_table(&self) -> &[f64] {
        &self.penalty_table
    }

    fn penalty_factor(&self) -> f64 {
        self.stab_factor
    }

    fn is_pure_neumann(&self) -> bool {
        self.pure_neumann
    }
}

/// Right-hand side `(f, q)` of a scalar function
pub fn assemble_rhs<F>(mesh: &LocalMesh, geometry: &ElementGeometryCache, shape: &ShapeInfo, f: F) -> Result<BlockVector>
where
    F: Fn(f64, f64) -> f64 + Sync,
{
    let mut rhs = BlockVector::new(mesh.partitioner(), &[shape.n_dofs]);
    cell_loop(
        mesh,
        &mut rhs,
        0,
        || CellEvaluator::<1>::new(shape, geometry),
        |eval, batch| {
            eval.reinit(batch);
            for q in 0..eval.n_q_points() {
                let x = eval.quadrature_point(q);
                eval.submit_value([Vectorized::from_fn(|l| f(x[0][l], x[1][l]))], q);
            }
            Ok(eval.integrate(true, false))
        },
    )?;
    Ok(rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use std::f64::consts::PI;

    fn setup(mesh: StructuredMesh, degree: usize, dirichlet: &[BoundaryId]) -> SipgPoisson {
        let mesh = Arc::new(LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap());
        let geometry = Arc::new(ElementGeometryCache::new(&mesh));
        let shape = Arc::new(ShapeInfo::new(degree, degree + 2));
        let params = KrylovParameters {
            abs_tol: 1e-13,
            rel_tol: 1e-11,
            max_iter: 500,
            restart: 0,
        };
        SipgPoisson::new(mesh, geometry, shape, dirichlet, 1., params).unwrap()
    }

    #[test]
    fn test_operator_is_symmetric() {
        let poisson = setup(StructuredMesh::rectangle(4, 3, 0., 1., 0., 2.).unwrap(), 2, &[0, 2]);
        let part = poisson.mesh.partitioner();
        let mut x = BlockVector::new(part, &[9]);
        let mut y = BlockVector::new(part, &[9]);
        x.blocks[0].add_random(1.);
        y.blocks[0].add_random(1.);
        x.update_ghost_values();
        y.update_ghost_values();
        let (mut ax, mut ay) = (x.clone(), y.clone());
        poisson.vmult(&mut ax, &x).unwrap();
        poisson.vmult(&mut ay, &y).unwrap();
        assert!((ax.dot(&y) - x.dot(&ay)).abs() < 1e-10 * ax.norm_l2() * y.norm_l2());
        // positive definite with Dirichlet faces
        assert!(ax.dot(&x) > 0.);
        assert!(!poisson.is_pure_neumann());
    }

    #[test]
    fn test_manufactured_dirichlet_solution() {
        let poisson = setup(StructuredMesh::rectangle(8, 8, 0., 1., 0., 1.).unwrap(), 3, &[0, 1, 2, 3]);
        let exact = |x: f64, y: f64| (PI * x).sin() * (PI * y).sin();
        let rhs = assemble_rhs(&poisson.mesh, &poisson.geometry, &poisson.shape, |x, y| {
            2. * PI * PI * exact(x, y)
        })
        .unwrap();
        let mut p = BlockVector::new(poisson.mesh.partitioner(), &[16]);
        let control = poisson.solve(&mut p, &rhs).unwrap();
        assert!(control.converged);
        p.update_ghost_values();
        let mut eval = CellEvaluator::<1>::new(&poisson.shape, &poisson.geometry);
        let mut error = 0.;
        for batch in poisson.mesh.batches() {
            eval.reinit(batch);
            eval.read_dof_values(&p);
            eval.evaluate(true, false);
            for q in 0..eval.n_q_points() {
                let x = eval.quadrature_point(q);
                for l in 0..batch.n_filled {
                    let e = eval.value(q)[0][l] - exact(x[0][l], x[1][l]);
                    error += e * e * eval.jxw(q)[l];
                }
            }
        }
        assert!(error.sqrt() < 1e-3, "L2 error {}", error.sqrt());
    }

    #[test]
    fn test_pure_neumann_projection() {
        let poisson = setup(
            StructuredMesh::rectangle(3, 3, 0., 1., 0., 1.).unwrap().with_periodic(0),
            1,
            &[],
        );
        assert!(poisson.is_pure_neumann());
        let mut rhs = assemble_rhs(&poisson.mesh, &poisson.geometry, &poisson.shape, |_, y| y).unwrap();
        poisson.apply_nullspace_projection(&mut rhs);
        assert!(rhs.blocks[0].v.sum().abs() < 1e-13);
        let mut p = BlockVector::new(poisson.mesh.partitioner(), &[4]);
        let control = poisson.solve(&mut p, &rhs).unwrap();
        assert!(control.converged);
        assert_eq!(poisson.penalty_parameter_table().len(), 9);
        assert_eq!(poisson.penalty_factor(), 1.);
    }

    #[test]
    fn test_pure_neumann_solution_level() {
        let poisson = setup(
            StructuredMesh::rectangle(4, 4, 0., 1., 0., 1.)
                .unwrap()
                .with_periodic(0)
                .with_periodic(1),
            2,
            &[],
        );
        let mut rhs = assemble_rhs(&poisson.mesh, &poisson.geometry, &poisson.shape, |x, y| {
            (2. * PI * x).cos() * (2. * PI * y).sin()
        })
        .unwrap();
        poisson.apply_nullspace_projection(&mut rhs);
        let part = poisson.mesh.partitioner();
        let mut from_zero = BlockVector::new(part, &[9]);
        let mut shifted = BlockVector::new(part, &[9]);
        shifted.blocks[0].v.fill(5.);
        shifted.update_ghost_values();
        assert!(poisson.solve(&mut from_zero, &rhs).unwrap().converged);
        assert!(poisson.solve(&mut shifted, &rhs).unwrap().converged);
        poisson.apply_nullspace_projection(&mut from_zero);
        poisson.apply_nullspace_projection(&mut shifted);
        assert!(shifted.blocks[0].v.sum().abs() < 1e-10);
        let mut diff = shifted.clone();
        diff.add_scaled(-1., &from_zero);
        assert!(diff.norm_linf() < 1e-7);
    }
}
