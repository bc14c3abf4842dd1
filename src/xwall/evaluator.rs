//! Evaluators of the enriched velocity space
//!
//! `u = sum_i N_i u_i + psi * sum_j M_j ubar_j`
//!
//! The polynomial part `N_i` and the enrichment part `M_j` are evaluated
//! by two plain evaluators. The enrichment only acts on lanes whose cell
//! is enriched: on all other lanes the composed evaluator returns
//! exactly the plain polynomial values, and enrichment dofs receive zero
//! contributions. The masking is done by [`compose_value`],
//! [`compose_gradient`] and [`enrichment_test_value`].
use crate::fe::{CellEvaluator, Coupling, FaceEvaluator, FieldEvaluator, PolynomialEvaluator, ShapeInfo};
use crate::field::vertex::q1_value_gradient;
use crate::field::{LocalDofs, VertexField};
use crate::mesh::{CellBatch, CellRef, ElementGeometryCache, LocalMesh};
use crate::types::{LaneMask, Tensor1, Tensor2, Vectorized, DIM, LANES};
use super::spalding::enrichment_value_and_gradient_vectorized;
use num_traits::Zero;

/// Read-only view of the enrichment state
#[derive(Clone, Copy)]
pub struct EnrichmentContext<'a> {
    /// Mesh
    pub mesh: &'a LocalMesh,
    /// Wall distance
    pub distance: &'a VertexField,
    /// Wall shear stress
    pub tauw: &'a VertexField,
    /// Kinematic viscosity
    pub viscosity: f64,
    /// Cells with mean corner distance below are enriched
    pub max_wall_distance: f64,
    /// Basis of the enrichment dofs
    pub shape: &'a ShapeInfo,
}

impl<'a> EnrichmentContext<'a> {
    /// Lanes whose cell is enriched
    pub fn mask(&self, cells: &[Option<CellRef>; LANES]) -> LaneMask {
        let corners = self.distance.cell_corners(self.mesh, cells);
        let mean = (corners[0] + corners[1] + corners[2] + corners[3]) * 0.25;
        LaneMask::from_fn(|l| cells[l].is_some() && mean[l] < self.max_wall_distance)
    }
}

/// `plain + psi * extra` on lanes in *mask*, `plain` elsewhere
#[inline]
pub fn compose_value<const NC: usize>(
    plain: &Tensor1<NC>,
    extra: &Tensor1<NC>,
    psi: Vectorized,
    mask: LaneMask,
) -> Tensor1<NC> {
    let mut out = *plain;
    for c in 0..NC {
        out[c] = Vectorized::select(mask, plain[c] + extra[c] * psi, plain[c]);
    }
    out
}

/// `grad plain + psi grad extra + extra (x) grad psi` on lanes in *mask*,
/// `grad plain` elsewhere
#[inline]
pub fn compose_gradient<const NC: usize>(
    plain_gradient: &Tensor2<NC>,
    extra: &Tensor1<NC>,
    extra_gradient: &Tensor2<NC>,
    psi: Vectorized,
    grad_psi: &[Vectorized; DIM],
    mask: LaneMask,
) -> Tensor2<NC> {
    let mut out = *plain_gradient;
    for c in 0..NC {
        for d in 0..DIM {
            let enriched =
                plain_gradient[c][d] + extra_gradient[c][d] * psi + extra[c] * grad_psi[d];
            out[c][d] = Vectorized::select(mask, enriched, plain_gradient[c][d]);
        }
    }
    out
}

/// Contributions to the enrichment dofs of a test function `psi M_j`:
/// value slot `v psi + g . grad psi`, gradient slot `g psi`.
/// Zero on lanes outside *mask*.
#[inline]
pub fn enrichment_test_value<const NC: usize>(
    value: &Tensor1<NC>,
    gradient: &Tensor2<NC>,
    psi: Vectorized,
    grad_psi: &[Vectorized; DIM],
    mask: LaneMask,
) -> (Tensor1<NC>, Tensor2<NC>) {
    let zero = Vectorized::zero();
    let mut v_out = [zero; NC];
    let mut g_out = [[zero; DIM]; NC];
    for c in 0..NC {
        let mut v = value[c] * psi;
        for d in 0..DIM {
            v += gradient[c][d] * grad_psi[d];
            g_out[c][d] = Vectorized::select(mask, gradient[c][d] * psi, zero);
        }
        v_out[c] = Vectorized::select(mask, v, zero);
    }
    (v_out, g_out)
}

/// Enrichment function and wall data at the quadrature points
#[derive(Clone, Debug)]
struct EnrichmentData {
    mask: LaneMask,
    psi: Vec<Vectorized>,
    grad_psi: Vec<[Vectorized; DIM]>,
    distance: Vec<Vectorized>,
    tauw: Vec<Vectorized>,
}

impl EnrichmentData {
    fn new(n_q: usize) -> Self {
        Self {
            mask: LaneMask::NONE,
            psi: vec![Vectorized::zero(); n_q],
            grad_psi: vec![[Vectorized::zero(); DIM]; n_q],
            distance: vec![Vectorized::zero(); n_q],
            tauw: vec![Vectorized::zero(); n_q],
        }
    }

    fn compute<E, const NC: usize>(&mut self, ctx: &EnrichmentContext, plain: &E)
    where
        E: PolynomialEvaluator<NC>,
    {
        let cells = plain.cells();
        self.mask = ctx.mask(cells);
        let d_corners = ctx.distance.cell_corners(ctx.mesh, cells);
        let t_corners = ctx.tauw.cell_corners(ctx.mesh, cells);
        let inv_jac = plain.inverse_jacobian();
        for q in 0..plain.n_q_points() {
            let xi = plain.reference_point(q);
            let (d, grad_d) = q1_value_gradient(&d_corners, xi, inv_jac);
            let (t, grad_t) = q1_value_gradient(&t_corners, xi, inv_jac);
            let (psi, grad_psi) =
                enrichment_value_and_gradient_vectorized(d, t, &grad_d, &grad_t, ctx.viscosity, self.mask);
            self.psi[q] = psi;
            self.grad_psi[q] = grad_psi;
            self.distance[q] = d;
            self.tauw[q] = t;
        }
    }
}

/// Polynomial evaluator composed with an (optional) enrichment evaluator
#[derive(Clone)]
pub struct XWallEvaluator<'a, E, const NC: usize> {
    plain: E,
    extra: Option<E>,
    ctx: Option<EnrichmentContext<'a>>,
    data: EnrichmentData,
    values_in: Vec<Tensor1<NC>>,
    gradients_in: Vec<Tensor2<NC>>,
}

/// Enriched evaluator on cells
pub type XWallCellEvaluator<'a, const NC: usize> = XWallEvaluator<'a, CellEvaluator<'a, NC>, NC>;

/// Enriched evaluator on faces
pub type XWallFaceEvaluator<'a, const NC: usize> = XWallEvaluator<'a, FaceEvaluator<'a, NC>, NC>;

impl<'a, E: PolynomialEvaluator<NC>, const NC: usize> XWallEvaluator<'a, E, NC> {
    fn compose(plain: E, extra: Option<E>, ctx: Option<EnrichmentContext<'a>>) -> Self {
        let n_q = plain.n_q_points();
        Self {
            plain,
            extra,
            ctx,
            data: EnrichmentData::new(n_q),
            values_in: vec![[Vectorized::zero(); NC]; n_q],
            gradients_in: vec![[[Vectorized::zero(); DIM]; NC]; n_q],
        }
    }

    fn update_enrichment(&mut self) {
        if let Some(ctx) = &self.ctx {
            self.data.compute::<E, NC>(ctx, &self.plain);
        }
    }

    /// Lanes carrying the enrichment
    pub fn mask(&self) -> LaneMask {
        self.data.mask
    }

    /// Enrichment function at *q*
    pub fn psi(&self, q: usize) -> Vectorized {
        self.data.psi[q]
    }

    /// Wall distance at *q* (zero without enrichment)
    pub fn wall_distance(&self, q: usize) -> Vectorized {
        self.data.distance[q]
    }

    /// Wall shear stress at *q* (zero without enrichment)
    pub fn tauw(&self, q: usize) -> Vectorized {
        self.data.tauw[q]
    }

    /// Enrichment is switched on
    pub fn is_enriched_space(&self) -> bool {
        self.extra.is_some()
    }

    /// Polynomial part
    pub fn plain(&self) -> &E {
        &self.plain
    }
}

impl<'a, const NC: usize> XWallCellEvaluator<'a, NC> {
    /// Evaluator of the velocity space. Without *ctx* it reduces to the
    /// polynomial evaluator.
    pub fn new(shape: &'a ShapeInfo, geometry: &'a ElementGeometryCache, ctx: Option<EnrichmentContext<'a>>) -> Self {
        let plain = CellEvaluator::new(shape, geometry);
        let extra = ctx.map(|c| CellEvaluator::new(c.shape, geometry));
        Self::compose(plain, extra, ctx)
    }

    /// Move to *batch*
    pub fn reinit(&mut self, batch: &CellBatch) {
        self.plain.reinit(batch);
        if let Some(extra) = &mut self.extra {
            extra.reinit(batch);
        }
        self.update_enrichment();
    }

    /// Physical coordinates of quadrature point *q*
    pub fn quadrature_point(&self, q: usize) -> [Vectorized; DIM] {
        self.plain.quadrature_point(q)
    }
}

impl<'a, const NC: usize> XWallFaceEvaluator<'a, NC> {
    /// Face evaluator of the velocity space
    pub fn new(shape: &'a ShapeInfo, geometry: &'a ElementGeometryCache, ctx: Option<EnrichmentContext<'a>>) -> Self {
        let plain = FaceEvaluator::new(shape, geometry);
        let extra = ctx.map(|c| FaceEvaluator::new(c.shape, geometry));
        Self::compose(plain, extra, ctx)
    }

    /// Evaluate face *face* of the batch cells
    pub fn reinit_interior(&mut self, batch: &CellBatch, face: usize) {
        self.plain.reinit_interior(batch, face);
        if let Some(extra) = &mut self.extra {
            extra.reinit_interior(batch, face);
        }
        self.update_enrichment();
    }

    /// Evaluate the neighbours across *face*
    pub fn reinit_exterior(&mut self, mesh: &LocalMesh, batch: &CellBatch, face: usize, coupling: Coupling) {
        self.plain.reinit_exterior(mesh, batch, face, coupling);
        if let Some(extra) = &mut self.extra {
            extra.reinit_exterior(mesh, batch, face, coupling);
        }
        self.update_enrichment();
    }

    /// Outward normal of the interior cell
    pub fn normal(&self) -> [Vectorized; DIM] {
        self.plain.normal()
    }

    /// Physical coordinates of quadrature point *q*
    pub fn quadrature_point(&self, q: usize) -> [Vectorized; DIM] {
        self.plain.quadrature_point(q)
    }
}

impl<'a, E: PolynomialEvaluator<NC>, const NC: usize> FieldEvaluator<NC> for XWallEvaluator<'a, E, NC> {
    fn n_q_points(&self) -> usize {
        self.plain.n_q_points()
    }

    fn cells(&self) -> &[Option<CellRef>; LANES] {
        self.plain.cells()
    }

    fn dofs_per_block(&self) -> Vec<usize> {
        let mut layout = self.plain.dofs_per_block();
        if let Some(extra) = &self.extra {
            layout.extend(extra.dofs_per_block());
        }
        layout
    }

    fn set_dof_values(&mut self, dofs: &LocalDofs) {
        let (plain, extra) = dofs.blocks.split_at(NC);
        self.plain.set_dof_values(&LocalDofs {
            blocks: plain.to_vec(),
        });
        if let Some(e) = &mut self.extra {
            e.set_dof_values(&LocalDofs {
                blocks: extra.to_vec(),
            });
        }
    }

    fn evaluate(&mut self, values: bool, gradients: bool) {
        self.plain.evaluate(values, gradients);
        if let Some(e) = &mut self.extra {
            e.evaluate(values || gradients, gradients);
        }
    }

    fn value(&self, q: usize) -> Tensor1<NC> {
        match &self.extra {
            Some(e) => compose_value(&self.plain.value(q), &e.value(q), self.data.psi[q], self.data.mask),
            None => self.plain.value(q),
        }
    }

    fn gradient(&self, q: usize) -> Tensor2<NC> {
        match &self.extra {
            Some(e) => compose_gradient(
                &self.plain.gradient(q),
                &e.value(q),
                &e.gradient(q),
                self.data.psi[q],
                &self.data.grad_psi[q],
                self.data.mask,
            ),
            None => self.plain.gradient(q),
        }
    }

    fn submit_value(&mut self, value: Tensor1<NC>, q: usize) {
        self.plain.submit_value(value, q);
        self.values_in[q] = value;
    }

    fn submit_gradient(&mut self, gradient: Tensor2<NC>, q: usize) {
        self.plain.submit_gradient(gradient, q);
        self.gradients_in[q] = gradient;
    }

    fn integrate(&mut self, values: bool, gradients: bool) -> LocalDofs {
        let mut out = self.plain.integrate(values, gradients);
        let zero_v = [Vectorized::zero(); NC];
        let zero_g = [[Vectorized::zero(); DIM]; NC];
        if let Some(e) = &mut self.extra {
            for q in 0..self.values_in.len() {
                let v = if values { self.values_in[q] } else { zero_v };
                let g = if gradients { self.gradients_in[q] } else { zero_g };
                let (ev, eg) =
                    enrichment_test_value(&v, &g, self.data.psi[q], &self.data.grad_psi[q], self.data.mask);
                e.submit_value(ev, q);
                e.submit_gradient(eg, q);
            }
            out.blocks.extend(e.integrate(true, gradients).blocks);
        }
        for q in 0..self.values_in.len() {
            self.values_in[q] = zero_v;
            self.gradients_in[q] = zero_g;
        }
        out
    }

    fn jxw(&self, q: usize) -> Vectorized {
        self.plain.jxw(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::StructuredMesh;
    use crate::mpi::SerialCommunicator;
    use crate::xwall::WallDistance;
    use ndarray::Array1;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use std::sync::Arc;

    fn random_tensors(n: usize) -> (Vec<Tensor1<2>>, Vec<Tensor2<2>>) {
        let r = Array1::random(n * 6 * LANES, Uniform::new(-1., 1.));
        let lane = |k: usize| Vectorized::from_fn(|l| r[k * LANES + l]);
        let values = (0..n).map(|i| [lane(6 * i), lane(6 * i + 1)]).collect();
        let grads = (0..n)
            .map(|i| [[lane(6 * i + 2), lane(6 * i + 3)], [lane(6 * i + 4), lane(6 * i + 5)]])
            .collect();
        (values, grads)
    }

    #[test]
    fn test_masked_lanes_equal_plain() {
        for _ in 0..20 {
            let m = Array1::random(LANES, Uniform::new(0., 1.));
            let mask = LaneMask::from_fn(|l| m[l] < 0.5);
            let (values, grads) = random_tensors(3);
            let psi = Vectorized::from_fn(|l| 1. + l as f64);
            let grad_psi = [psi * 2., psi * -3.];
            let v = compose_value(&values[0], &values[1], psi, mask);
            let g = compose_gradient(&grads[0], &values[1], &grads[1], psi, &grad_psi, mask);
            let (ev, eg) = enrichment_test_value(&values[2], &grads[2], psi, &grad_psi, mask);
            for l in 0..LANES {
                for c in 0..2 {
                    if mask.is_set(l) {
                        let expected = values[0][c][l] + psi[l] * values[1][c][l];
                        assert!((v[c][l] - expected).abs() < 1e-14);
                    } else {
                        assert_eq!(v[c][l], values[0][c][l]);
                        assert_eq!(ev[c][l], 0.);
                        for d in 0..DIM {
                            assert_eq!(g[c][d][l], grads[0][c][d][l]);
                            assert_eq!(eg[c][d][l], 0.);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_unenriched_lanes_match_polynomial_evaluator() {
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
        let mut src = crate::field::BlockVector::new(local.partitioner(), &[9, 9, 4, 4]);
        for b in &mut src.blocks {
            b.add_random(1.);
        }
        let mut enriched = XWallCellEvaluator::<2>::new(&shape, &geo, Some(ctx));
        let mut plain = CellEvaluator::<2>::new(&shape, &geo);
        let mut n_enriched = 0;
        let mut n_plain = 0;
        for batch in local.batches() {
            enriched.reinit(batch);
            plain.reinit(batch);
            enriched.read_dof_values(&src);
            plain.read_dof_values(&src);
            enriched.evaluate(true, true);
            plain.evaluate(true, true);
            let mask = enriched.mask();
            for l in 0..batch.n_filled {
                if mask.is_set(l) {
                    n_enriched += 1;
                    continue;
                }
                n_plain += 1;
                for q in 0..plain.n_q_points() {
                    for c in 0..2 {
                        assert_eq!(enriched.value(q)[c][l], plain.value(q)[c][l]);
                        for d in 0..DIM {
                            assert_eq!(enriched.gradient(q)[c][d][l], plain.gradient(q)[c][d][l]);
                        }
                    }
                }
            }
            // test functions of the enrichment vanish on plain lanes
            for q in 0..plain.n_q_points() {
                enriched.submit_value([Vectorized::splat(1.); 2], q);
                enriched.submit_gradient([[Vectorized::splat(1.); DIM]; 2], q);
            }
            let out = enriched.integrate(true, true);
            for block in &out.blocks[2..] {
                for v in block {
                    for l in (0..LANES).filter(|l| !mask.is_set(*l)) {
                        assert_eq!(v[l], 0.);
                    }
                }
            }
        }
        // first and last cell row of each column are enriched
        assert_eq!(n_enriched, 4);
        assert_eq!(n_plain, 8);
    }
}
