//! Vectorized evaluation of DG fields on cell batches
//!
//! An evaluator reads the dofs of `LANES` cells, evaluates values and
//! gradients at the quadrature points, takes test-function contributions
//! (`submit_value`, `submit_gradient`) and integrates them back to dofs.
//! The workflow of every kernel is
//!
//! 1. `reinit` on a batch (cell) or on a batch and face (face)
//! 2. `read_dof_values`, `evaluate`
//! 3. per quadrature point: `value`/`gradient`, `submit_value`/`submit_gradient`
//! 4. `integrate`, which returns the local contribution
use super::shape::ShapeInfo;
use crate::field::{BlockVector, LocalDofs};
use crate::mesh::{face_direction, face_normal, BoundaryId, CellBatch, CellRef, ElementGeometryCache, LocalMesh, Neighbor};
use crate::types::{LaneMask, Tensor1, Tensor2, Vectorized, DIM, LANES};
use num_traits::Zero;

/// Capability interface of all evaluators
pub trait FieldEvaluator<const NC: usize> {
    /// Number of quadrature points
    fn n_q_points(&self) -> usize;

    /// Cell evaluated in each lane (`None`: lane is empty)
    fn cells(&self) -> &[Option<CellRef>; LANES];

    /// Layout of the local dofs (values per cell of each block)
    fn dofs_per_block(&self) -> Vec<usize>;

    /// Set the local dofs directly
    fn set_dof_values(&mut self, dofs: &LocalDofs);

    /// Read the local dofs from a global vector
    fn read_dof_values(&mut self, src: &BlockVector) {
        let n_blocks = self.dofs_per_block().len();
        let dofs = LocalDofs::gather(src, 0, n_blocks, self.cells());
        self.set_dof_values(&dofs);
    }

    /// Compute values and/or gradients at all quadrature points
    fn evaluate(&mut self, values: bool, gradients: bool);

    /// Value at quadrature point *q*
    fn value(&self, q: usize) -> Tensor1<NC>;

    /// Physical gradient at quadrature point *q*
    fn gradient(&self, q: usize) -> Tensor2<NC>;

    /// Test with the shape functions at *q*
    fn submit_value(&mut self, value: Tensor1<NC>, q: usize);

    /// Test with the shape function gradients at *q*
    fn submit_gradient(&mut self, gradient: Tensor2<NC>, q: usize);

    /// Integrate submitted contributions, resets the submissions
    fn integrate(&mut self, values: bool, gradients: bool) -> LocalDofs;

    /// Quadrature weight times jacobian determinant
    fn jxw(&self, q: usize) -> Vectorized;
}

/// Lower-level access used to build enriched evaluators
pub trait PolynomialEvaluator<const NC: usize>: FieldEvaluator<NC> {
    /// Quadrature point *q* on the reference cell
    fn reference_point(&self, q: usize) -> [f64; DIM];

    /// Inverse jacobian per lane
    fn inverse_jacobian(&self) -> &[Vectorized; DIM];
}

/// Geometry of the cells of a batch, one entry per lane
#[derive(Debug, Clone, Copy)]
pub struct LaneGeometry {
    /// Lower left corner
    pub lower: [Vectorized; DIM],
    /// Cell extent
    pub extent: [Vectorized; DIM],
    /// Inverse jacobian
    pub inverse_jacobian: [Vectorized; DIM],
    /// Jacobian determinant
    pub det: Vectorized,
    /// Length scale `volume^(1/DIM)`
    pub h: Vectorized,
    /// Penalty measure
    pub penalty_measure: Vectorized,
}

impl LaneGeometry {
    /// Collect geometry, empty lanes are mapped onto the reference cell
    pub fn new(geometry: &ElementGeometryCache, cells: &[Option<CellRef>; LANES]) -> Self {
        let mut lanes = Self {
            lower: [Vectorized::splat(-1.); DIM],
            extent: [Vectorized::splat(2.); DIM],
            inverse_jacobian: [Vectorized::splat(1.); DIM],
            det: Vectorized::splat(1.),
            h: Vectorized::splat(2.),
            penalty_measure: Vectorized::zero(),
        };
        for (l, cell) in cells.iter().enumerate() {
            if let Some(cell) = cell {
                let g = geometry.get(*cell);
                let inv = g.inverse_jacobian();
                let jac = g.jacobian();
                for d in 0..DIM {
                    lanes.lower[d][l] = g.lower[d];
                    lanes.extent[d][l] = g.extent[d];
                    lanes.inverse_jacobian[d][l] = inv[d];
                }
                lanes.det[l] = jac[0] * jac[1];
                lanes.h[l] = g.h;
                lanes.penalty_measure[l] = g.penalty_measure;
            }
        }
        lanes
    }

    /// Physical coordinates of reference point *xi*
    pub fn map_point(&self, xi: [f64; DIM]) -> [Vectorized; DIM] {
        [
            self.lower[0] + self.extent[0] * (0.5 * (xi[0] + 1.)),
            self.lower[1] + self.extent[1] * (0.5 * (xi[1] + 1.)),
        ]
    }
}

/// How a face evaluator on the exterior side sees neighbouring cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    /// Read the neighbour's dofs
    Full,
    /// Treat all neighbour dofs as zero (block diagonal of an operator)
    CellOnly,
}

/// Neighbours of the cells of a batch across *face*, one entry per lane
pub fn face_neighbors(mesh: &LocalMesh, batch: &CellBatch, face: usize) -> [Neighbor; LANES] {
    let mut neighbors = [Neighbor::Boundary(0); LANES];
    for (l, n) in neighbors.iter_mut().enumerate() {
        *n = mesh.neighbor(batch.cells[l], face);
    }
    neighbors
}

/// Lanes whose face is shared with another cell
pub fn interior_mask(neighbors: &[Neighbor; LANES]) -> LaneMask {
    LaneMask::from_fn(|l| matches!(neighbors[l], Neighbor::Cell(_)))
}

/// Lanes whose face lies on a boundary with an id accepted by *pred*
pub fn boundary_mask<F: Fn(BoundaryId) -> bool>(neighbors: &[Neighbor; LANES], pred: F) -> LaneMask {
    LaneMask::from_fn(|l| match neighbors[l] {
        Neighbor::Boundary(id) => pred(id),
        Neighbor::Cell(_) => false,
    })
}

/// Lanes of a batch as cell references
pub fn batch_cells(batch: &CellBatch) -> [Option<CellRef>; LANES] {
    let mut cells = [None; LANES];
    for (l, c) in cells.iter_mut().enumerate() {
        *c = Some(CellRef::Local(batch.cells[l]));
    }
    cells
}

/// Data shared by cell and face evaluators
#[derive(Clone)]
struct Storage<const NC: usize> {
    dofs: Vec<Tensor1<NC>>,
    values: Vec<Tensor1<NC>>,
    gradients: Vec<Tensor2<NC>>,
    values_in: Vec<Tensor1<NC>>,
    gradients_in: Vec<Tensor2<NC>>,
}

impl<const NC: usize> Storage<NC> {
    fn new(n_dofs: usize, n_q: usize) -> Self {
        Self {
            dofs: vec![[Vectorized::zero(); NC]; n_dofs],
            values: vec![[Vectorized::zero(); NC]; n_q],
            gradients: vec![[[Vectorized::zero(); DIM]; NC]; n_q],
            values_in: vec![[Vectorized::zero(); NC]; n_q],
            gradients_in: vec![[[Vectorized::zero(); DIM]; NC]; n_q],
        }
    }

    fn set_dofs(&mut self, dofs: &LocalDofs) {
        for (i, d) in self.dofs.iter_mut().enumerate() {
            for (c, x) in d.iter_mut().enumerate() {
                *x = dofs.blocks[c][i];
            }
        }
    }

    fn evaluate(
        &mut self,
        phi: &ndarray::Array2<f64>,
        dphi: &ndarray::Array3<f64>,
        inv_jac: &[Vectorized; DIM],
        values: bool,
        gradients: bool,
    ) {
        for q in 0..self.values.len() {
            if values {
                let mut v = [Vectorized::zero(); NC];
                for (i, d) in self.dofs.iter().enumerate() {
                    let p = phi[[q, i]];
                    for c in 0..NC {
                        v[c] += d[c] * p;
                    }
                }
                self.values[q] = v;
            }
            if gradients {
                let mut g = [[Vectorized::zero(); DIM]; NC];
                for (i, d) in self.dofs.iter().enumerate() {
                    for k in 0..DIM {
                        let p = dphi[[q, i, k]];
                        for c in 0..NC {
                            g[c][k] += d[c] * p;
                        }
                    }
                }
                for gc in &mut g {
                    for k in 0..DIM {
                        gc[k] *= inv_jac[k];
                    }
                }
                self.gradients[q] = g;
            }
        }
    }

    fn integrate(
        &mut self,
        phi: &ndarray::Array2<f64>,
        dphi: &ndarray::Array3<f64>,
        inv_jac: &[Vectorized; DIM],
        jxw: impl Fn(usize) -> Vectorized,
        values: bool,
        gradients: bool,
    ) -> LocalDofs {
        let n_dofs = self.dofs.len();
        let mut out = LocalDofs::zeros(&[n_dofs; NC]);
        for q in 0..self.values_in.len() {
            let w = jxw(q);
            let v = self.values_in[q];
            let mut g = self.gradients_in[q];
            for gc in &mut g {
                for k in 0..DIM {
                    gc[k] *= inv_jac[k];
                }
            }
            for i in 0..n_dofs {
                for c in 0..NC {
                    let mut sum = Vectorized::zero();
                    if values {
                        sum += v[c] * phi[[q, i]];
                    }
                    if gradients {
                        for k in 0..DIM {
                            sum += g[c][k] * dphi[[q, i, k]];
                        }
                    }
                    out.blocks[c][i] += sum * w;
                }
            }
        }
        for x in &mut self.values_in {
            *x = [Vectorized::zero(); NC];
        }
        for x in &mut self.gradients_in {
            *x = [[Vectorized::zero(); DIM]; NC];
        }
        out
    }
}

/// Evaluator on the cells of a batch
#[derive(Clone)]
pub struct CellEvaluator<'a, const NC: usize> {
    shape: &'a ShapeInfo,
    geometry: &'a ElementGeometryCache,
    cells: [Option<CellRef>; LANES],
    lanes: LaneGeometry,
    data: Storage<NC>,
}

impl<'a, const NC: usize> CellEvaluator<'a, NC> {
    /// Evaluator for basis *shape*
    pub fn new(shape: &'a ShapeInfo, geometry: &'a ElementGeometryCache) -> Self {
        Self {
            shape,
            geometry,
            cells: [None; LANES],
            lanes: LaneGeometry::new(geometry, &[None; LANES]),
            data: Storage::new(shape.n_dofs, shape.n_q_points),
        }
    }

    /// Move to *batch*
    pub fn reinit(&mut self, batch: &CellBatch) {
        self.reinit_cells(batch_cells(batch));
    }

    /// Move to arbitrary cells
    pub fn reinit_cells(&mut self, cells: [Option<CellRef>; LANES]) {
        self.cells = cells;
        self.lanes = LaneGeometry::new(self.geometry, &cells);
    }

    /// Geometry of the lanes
    pub fn lanes(&self) -> &LaneGeometry {
        &self.lanes
    }

    /// Shape tables
    pub fn shape(&self) -> &ShapeInfo {
        self.shape
    }

    /// Physical coordinates of quadrature point *q*
    pub fn quadrature_point(&self, q: usize) -> [Vectorized; DIM] {
        self.lanes.map_point(self.shape.points[q])
    }

    /// Current local dofs
    pub fn dof_values(&self) -> LocalDofs {
        let mut out = LocalDofs::zeros(&[self.shape.n_dofs; NC]);
        for (i, d) in self.data.dofs.iter().enumerate() {
            for c in 0..NC {
                out.blocks[c][i] = d[c];
            }
        }
        out
    }
}

impl<'a, const NC: usize> FieldEvaluator<NC> for CellEvaluator<'a, NC> {
    fn n_q_points(&self) -> usize {
        self.shape.n_q_points
    }

    fn cells(&self) -> &[Option<CellRef>; LANES] {
        &self.cells
    }

    fn dofs_per_block(&self) -> Vec<usize> {
        vec![self.shape.n_dofs; NC]
    }

    fn set_dof_values(&mut self, dofs: &LocalDofs) {
        self.data.set_dofs(dofs);
    }

    fn evaluate(&mut self, values: bool, gradients: bool) {
        let inv = self.lanes.inverse_jacobian;
        self.data
            .evaluate(&self.shape.values, &self.shape.gradients, &inv, values, gradients);
    }

    fn value(&self, q: usize) -> Tensor1<NC> {
        self.data.values[q]
    }

    fn gradient(&self, q: usize) -> Tensor2<NC> {
        self.data.gradients[q]
    }

    fn submit_value(&mut self, value: Tensor1<NC>, q: usize) {
        self.data.values_in[q] = value;
    }

    fn submit_gradient(&mut self, gradient: Tensor2<NC>, q: usize) {
        self.data.gradients_in[q] = gradient;
    }

    fn integrate(&mut self, values: bool, gradients: bool) -> LocalDofs {
        let inv = self.lanes.inverse_jacobian;
        let det = self.lanes.det;
        let weights = &self.shape.weights;
        self.data.integrate(
            &self.shape.values,
            &self.shape.gradients,
            &inv,
            |q| det * weights[q],
            values,
            gradients,
        )
    }

    fn jxw(&self, q: usize) -> Vectorized {
        self.lanes.det * self.shape.weights[q]
    }
}

impl<'a, const NC: usize> PolynomialEvaluator<NC> for CellEvaluator<'a, NC> {
    fn reference_point(&self, q: usize) -> [f64; DIM] {
        self.shape.points[q]
    }

    fn inverse_jacobian(&self) -> &[Vectorized; DIM] {
        &self.lanes.inverse_jacobian
    }
}

/// Evaluator on one face of the cells of a batch, either from the
/// interior (the batch cells) or from the exterior (their neighbours)
#[derive(Clone)]
pub struct FaceEvaluator<'a, const NC: usize> {
    shape: &'a ShapeInfo,
    geometry: &'a ElementGeometryCache,
    face: usize,
    table_face: usize,
    cells: [Option<CellRef>; LANES],
    lanes: LaneGeometry,
    face_scale: Vectorized,
    data: Storage<NC>,
}

impl<'a, const NC: usize> FaceEvaluator<'a, NC> {
    /// Evaluator for basis *shape*
    pub fn new(shape: &'a ShapeInfo, geometry: &'a ElementGeometryCache) -> Self {
        Self {
            shape,
            geometry,
            face: 0,
            table_face: 0,
            cells: [None; LANES],
            lanes: LaneGeometry::new(geometry, &[None; LANES]),
            face_scale: Vectorized::splat(1.),
            data: Storage::new(shape.n_dofs, shape.n_q_points_1d),
        }
    }

    /// Evaluate face *face* of the batch cells
    pub fn reinit_interior(&mut self, batch: &CellBatch, face: usize) {
        self.set_cells(batch_cells(batch), face, face);
    }

    /// Evaluate the neighbours of the batch cells across *face*, on their
    /// face `face ^ 1`. Lanes at a physical boundary are empty.
    pub fn reinit_exterior(&mut self, mesh: &LocalMesh, batch: &CellBatch, face: usize, coupling: Coupling) {
        let mut cells = [None; LANES];
        if coupling == Coupling::Full {
            for (c, n) in cells.iter_mut().zip(face_neighbors(mesh, batch, face).iter()) {
                if let Neighbor::Cell(cell) = n {
                    *c = Some(*cell);
                }
            }
        }
        self.set_cells(cells, face, face ^ 1);
    }

    fn set_cells(&mut self, cells: [Option<CellRef>; LANES], face: usize, table_face: usize) {
        self.cells = cells;
        self.face = face;
        self.table_face = table_face;
        self.lanes = LaneGeometry::new(self.geometry, &cells);
        self.face_scale = self.lanes.extent[1 - face_direction(table_face)] * 0.5;
    }

    /// Outward normal of the interior cell (same on both sides)
    pub fn normal(&self) -> [Vectorized; DIM] {
        let n = face_normal(self.face);
        [Vectorized::splat(n[0]), Vectorized::splat(n[1])]
    }

    /// Face of the interior cell
    pub fn face(&self) -> usize {
        self.face
    }

    /// Geometry of the lanes
    pub fn lanes(&self) -> &LaneGeometry {
        &self.lanes
    }

    /// Physical coordinates of quadrature point *q*
    pub fn quadrature_point(&self, q: usize) -> [Vectorized; DIM] {
        self.lanes.map_point(self.shape.face_points[self.table_face][q])
    }

    /// Normal derivative `grad u . n` at *q*
    pub fn normal_derivative(&self, q: usize) -> Tensor1<NC> {
        crate::types::grad_times(&self.data.gradients[q], &self.normal())
    }
}

impl<'a, const NC: usize> FieldEvaluator<NC> for FaceEvaluator<'a, NC> {
    fn n_q_points(&self) -> usize {
        self.shape.n_q_points_1d
    }

    fn cells(&self) -> &[Option<CellRef>; LANES] {
        &self.cells
    }

    fn dofs_per_block(&self) -> Vec<usize> {
        vec![self.shape.n_dofs; NC]
    }

    fn set_dof_values(&mut self, dofs: &LocalDofs) {
        self.data.set_dofs(dofs);
    }

    fn evaluate(&mut self, values: bool, gradients: bool) {
        let inv = self.lanes.inverse_jacobian;
        let f = self.table_face;
        self.data.evaluate(
            &self.shape.face_values[f],
            &self.shape.face_gradients[f],
            &inv,
            values,
            gradients,
        );
    }

    fn value(&self, q: usize) -> Tensor1<NC> {
        self.data.values[q]
    }

    fn gradient(&self, q: usize) -> Tensor2<NC> {
        self.data.gradients[q]
    }

    fn submit_value(&mut self, value: Tensor1<NC>, q: usize) {
        self.data.values_in[q] = value;
    }

    fn submit_gradient(&mut self, gradient: Tensor2<NC>, q: usize) {
        self.data.gradients_in[q] = gradient;
    }

    fn integrate(&mut self, values: bool, gradients: bool) -> LocalDofs {
        let inv = self.lanes.inverse_jacobian;
        let f = self.table_face;
        let scale = self.face_scale;
        let weights = &self.shape.weights_1d;
        self.data.integrate(
            &self.shape.face_values[f],
            &self.shape.face_gradients[f],
            &inv,
            |q| scale * weights[q],
            values,
            gradients,
        )
    }

    fn jxw(&self, q: usize) -> Vectorized {
        self.face_scale * self.shape.weights_1d[q]
    }
}

impl<'a, const NC: usize> PolynomialEvaluator<NC> for FaceEvaluator<'a, NC> {
    fn reference_point(&self, q: usize) -> [f64; DIM] {
        self.shape.face_points[self.table_face][q]
    }

    fn inverse_jacobian(&self) -> &[Vectorized; DIM] {
        &self.lanes.inverse_jacobian
    }
}

/// Exterior state of a face for a homogeneous problem, lane by lane:
/// the neighbour's state on *interior* lanes, the mirrored state
/// `u+ = -u-, grad u+ = grad u-` on *dirichlet* lanes and
/// `u+ = u-, grad u+ = -grad u-` on all remaining (Neumann) lanes
#[inline]
pub fn homogeneous_exterior_state<const NC: usize>(
    interior: LaneMask,
    dirichlet: LaneMask,
    value_minus: &Tensor1<NC>,
    gradient_minus: &Tensor2<NC>,
    value_plus: &Tensor1<NC>,
    gradient_plus: &Tensor2<NC>,
) -> (Tensor1<NC>, Tensor2<NC>) {
    let mut value = *value_plus;
    let mut gradient = *gradient_plus;
    for c in 0..NC {
        let boundary_value = Vectorized::select(dirichlet, -value_minus[c], value_minus[c]);
        value[c] = Vectorized::select(interior, value_plus[c], boundary_value);
        for d in 0..DIM {
            let g = gradient_minus[c][d];
            let boundary_gradient = Vectorized::select(dirichlet, g, -g);
            gradient[c][d] = Vectorized::select(interior, gradient_plus[c][d], boundary_gradient);
        }
    }
    (value, gradient)
}

/// Divergence of a vector field
#[inline]
pub fn divergence(gradient: &Tensor2<DIM>) -> Vectorized {
    gradient[0][0] + gradient[1][1]
}

/// Scalar curl `dv/dx - du/dy` of a 2D vector field
#[inline]
pub fn curl(gradient: &Tensor2<DIM>) -> Vectorized {
    gradient[1][0] - gradient[0][1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use std::sync::Arc;

    fn setup() -> (LocalMesh, ElementGeometryCache, ShapeInfo) {
        let mesh = StructuredMesh::rectangle(3, 2, 0., 1.5, 0., 2.).unwrap();
        let local = LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap();
        let geo = ElementGeometryCache::new(&local);
        (local, geo, ShapeInfo::new(2, 3))
    }

    /// Nodal interpolation of *f* on all cells
    fn interpolate(mesh: &LocalMesh, shape: &ShapeInfo, f: impl Fn(f64, f64) -> f64) -> BlockVector {
        let mut v = BlockVector::new(mesh.partitioner(), &[shape.n_dofs]);
        for cell in 0..mesh.n_local() {
            let (lower, extent) = mesh.cell_box(CellRef::Local(cell));
            let mut dofs = v.blocks[0].cell_mut(cell);
            for (i, d) in dofs.iter_mut().enumerate() {
                let p = shape.dof_point(i);
                *d = f(
                    lower[0] + 0.5 * (p[0] + 1.) * extent[0],
                    lower[1] + 0.5 * (p[1] + 1.) * extent[1],
                );
            }
        }
        v
    }

    #[test]
    fn test_cell_evaluator_quadratic() {
        let (mesh, geo, shape) = setup();
        let f = |x: f64, y: f64| x * x - x * y + 2.;
        let src = interpolate(&mesh, &shape, f);
        let mut eval = CellEvaluator::<1>::new(&shape, &geo);
        for batch in mesh.batches() {
            eval.reinit(batch);
            eval.read_dof_values(&src);
            eval.evaluate(true, true);
            for q in 0..eval.n_q_points() {
                let p = eval.quadrature_point(q);
                for l in 0..batch.n_filled {
                    let (x, y) = (p[0][l], p[1][l]);
                    assert!((eval.value(q)[0][l] - f(x, y)).abs() < 1e-12);
                    assert!((eval.gradient(q)[0][0][l] - (2. * x - y)).abs() < 1e-12);
                    assert!((eval.gradient(q)[0][1][l] + x).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_integrate_constant_gives_area() {
        let (mesh, geo, shape) = setup();
        let mut eval = CellEvaluator::<1>::new(&shape, &geo);
        let batch = mesh.batches()[0];
        eval.reinit(&batch);
        for q in 0..eval.n_q_points() {
            eval.submit_value([Vectorized::splat(1.)], q);
        }
        let out = eval.integrate(true, false);
        // sum over all test functions = integral of one
        let total: f64 = out.blocks[0].iter().map(|v| v[0]).sum();
        assert!((total - 0.5).abs() < 1e-13);
    }

    #[test]
    fn test_face_values_match_across_faces() {
        let (mesh, geo, shape) = setup();
        let f = |x: f64, y: f64| x * y + y;
        let src = interpolate(&mesh, &shape, f);
        let mut inner = FaceEvaluator::<1>::new(&shape, &geo);
        let mut outer = FaceEvaluator::<1>::new(&shape, &geo);
        for batch in mesh.batches() {
            for face in 0..4 {
                inner.reinit_interior(batch, face);
                outer.reinit_exterior(&mesh, batch, face, Coupling::Full);
                inner.read_dof_values(&src);
                outer.read_dof_values(&src);
                inner.evaluate(true, true);
                outer.evaluate(true, true);
                let neighbors = face_neighbors(&mesh, batch, face);
                for q in 0..inner.n_q_points() {
                    for l in 0..batch.n_filled {
                        if let Neighbor::Cell(_) = neighbors[l] {
                            let (a, b) = (inner.value(q)[0][l], outer.value(q)[0][l]);
                            assert!((a - b).abs() < 1e-12);
                            let (ga, gb) = (inner.gradient(q)[0][1][l], outer.gradient(q)[0][1][l]);
                            assert!((ga - gb).abs() < 1e-12);
                        } else {
                            assert_eq!(outer.value(q)[0][l], 0.);
                        }
                    }
                }
            }
        }
    }
}
