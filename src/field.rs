//! # Distributed discontinuous fields
//!
//! A [`DistVector`] holds one block of nodal values per cell: the owned
//! cells in `v`, plus a copy of the values of the ghost cells which is
//! refreshed by [`DistVector::update_ghost_values`]. Vector valued fields
//! are [`BlockVector`]s, one [`DistVector`] per component (and per
//! enrichment component).
//!
//! [`LocalDofs`] carries the values of one macro-cell between a kernel and
//! a global vector.
pub mod history;
pub mod vertex;
pub use history::{TimeHistory, HISTORY_LEN};
pub use vertex::VertexField;

use crate::mesh::{CellBatch, CellRef, Partitioner};
use crate::types::{Vectorized, LANES};
use ndarray::{s, Array1, ArrayView1, ArrayViewMut1, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use num_traits::Zero;
use std::sync::Arc;

/// Cell-blocked vector distributed over the ranks
#[derive(Clone)]
pub struct DistVector {
    partitioner: Arc<Partitioner>,
    dofs_per_cell: usize,
    /// Values of the owned cells
    pub v: Array1<f64>,
    ghost: Array1<f64>,
}

impl std::fmt::Debug for DistVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistVector")
            .field("dofs_per_cell", &self.dofs_per_cell)
            .field("n_local", &self.partitioner.n_local)
            .finish()
    }
}

impl DistVector {
    /// Zero vector with *dofs_per_cell* values per cell
    pub fn new(partitioner: &Arc<Partitioner>, dofs_per_cell: usize) -> Self {
        Self {
            partitioner: Arc::clone(partitioner),
            dofs_per_cell,
            v: Array1::zeros(partitioner.n_local * dofs_per_cell),
            ghost: Array1::zeros(partitioner.n_ghost * dofs_per_cell),
        }
    }

    /// Vector with given owned values
    ///
    /// # Panics
    /// Length of *v* does not match the partitioner
    pub fn from_owned(partitioner: &Arc<Partitioner>, dofs_per_cell: usize, v: Array1<f64>) -> Self {
        let mut vector = Self::new(partitioner, dofs_per_cell);
        assert!(
            v.len() == vector.v.len(),
            "Size mismatch: {} values for {} owned dofs",
            v.len(),
            vector.v.len()
        );
        vector.v = v;
        vector
    }

    /// Values per cell
    pub fn dofs_per_cell(&self) -> usize {
        self.dofs_per_cell
    }

    /// Partitioner
    pub fn partitioner(&self) -> &Arc<Partitioner> {
        &self.partitioner
    }

    /// Values of one cell (owned or ghost)
    pub fn cell(&self, cell: CellRef) -> ArrayView1<f64> {
        let n = self.dofs_per_cell;
        match cell {
            CellRef::Local(c) => self.v.slice(s![c * n..(c + 1) * n]),
            CellRef::Ghost(g) => self.ghost.slice(s![g * n..(g + 1) * n]),
        }
    }

    /// Mutable values of an owned cell
    pub fn cell_mut(&mut self, cell: usize) -> ArrayViewMut1<f64> {
        let n = self.dofs_per_cell;
        self.v.slice_mut(s![cell * n..(cell + 1) * n])
    }

    /// Copy owned boundary columns into the ghost columns of the neighbours
    pub fn update_ghost_values(&mut self) {
        let p = Arc::clone(&self.partitioner);
        if p.n_ghost == 0 {
            return;
        }
        let col = p.ny * self.dofs_per_cell;
        let n = self.v.len();
        let to_left = self.v.slice(s![..col]).to_vec();
        let to_right = self.v.slice(s![n - col..]).to_vec();
        let (from_left, from_right) = p.exchange_columns(to_left, to_right);
        if let (Some(data), Some(offset)) = (from_left, p.left_ghost_offset()) {
            let o = offset * self.dofs_per_cell;
            self.ghost
                .slice_mut(s![o..o + col])
                .assign(&ArrayView1::from(&data[..]));
        }
        if let (Some(data), Some(offset)) = (from_right, p.right_ghost_offset()) {
            let o = offset * self.dofs_per_cell;
            self.ghost
                .slice_mut(s![o..o + col])
                .assign(&ArrayView1::from(&data[..]));
        }
    }

    /// Reset ghost values to zero
    pub fn zero_out_ghosts(&mut self) {
        self.ghost.fill(0.);
    }

    /// Global scalar product
    ///
    /// # Panics
    /// Vectors of different layout
    pub fn dot(&self, other: &Self) -> f64 {
        self.assert_compatible(other);
        self.partitioner.comm().sum(self.v.dot(&other.v))
    }

    /// Global number of owned values
    pub fn global_size(&self) -> f64 {
        self.partitioner.comm().sum(self.v.len() as f64)
    }

    /// Add uniformly distributed noise in `[-amp, amp]`
    pub fn add_random(&mut self, amp: f64) {
        let noise = Array1::random(self.v.len(), Uniform::new(-amp, amp));
        self.v += &noise;
    }

    fn assert_compatible(&self, other: &Self) {
        assert!(
            self.v.len() == other.v.len() && self.dofs_per_cell == other.dofs_per_cell,
            "Size mismatch: {} != {}",
            self.v.len(),
            other.v.len()
        );
    }
}

/// Vector of [`DistVector`]s
#[derive(Clone, Debug)]
pub struct BlockVector {
    /// Components
    pub blocks: Vec<DistVector>,
}

impl BlockVector {
    /// Zero vector, one block per entry of *dofs_per_block*
    pub fn new(partitioner: &Arc<Partitioner>, dofs_per_block: &[usize]) -> Self {
        Self {
            blocks: dofs_per_block
                .iter()
                .map(|n| DistVector::new(partitioner, *n))
                .collect(),
        }
    }

    /// Number of blocks
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Values per cell of each block
    pub fn dofs_per_block(&self) -> Vec<usize> {
        self.blocks.iter().map(DistVector::dofs_per_cell).collect()
    }

    /// Refresh ghost values of all blocks
    pub fn update_ghost_values(&mut self) {
        for b in &mut self.blocks {
            b.update_ghost_values();
        }
    }

    /// Set all values (and ghosts) to zero
    pub fn zero_out(&mut self) {
        for b in &mut self.blocks {
            b.v.fill(0.);
            b.zero_out_ghosts();
        }
    }

    /// Copy owned values of *other*
    ///
    /// # Panics
    /// Different block layout
    pub fn assign(&mut self, other: &Self) {
        self.assert_compatible(other);
        for (a, b) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            a.v.assign(&b.v);
        }
    }

    /// `self += a * x`
    ///
    /// # Panics
    /// Different block layout
    pub fn add_scaled(&mut self, a: f64, x: &Self) {
        self.assert_compatible(x);
        for (s, b) in self.blocks.iter_mut().zip(x.blocks.iter()) {
            s.v.scaled_add(a, &b.v);
        }
    }

    /// `self = a * self + b * x`
    ///
    /// # Panics
    /// Different block layout
    pub fn sadd(&mut self, a: f64, b: f64, x: &Self) {
        self.assert_compatible(x);
        for (s, o) in self.blocks.iter_mut().zip(x.blocks.iter()) {
            Zip::from(&mut s.v).and(&o.v).for_each(|s, &o| *s = a * *s + b * o);
        }
    }

    /// `self *= a`
    pub fn scale(&mut self, a: f64) {
        for b in &mut self.blocks {
            b.v *= a;
        }
    }

    /// Global scalar product over all blocks
    pub fn dot(&self, other: &Self) -> f64 {
        self.assert_compatible(other);
        let local: f64 = self
            .blocks
            .iter()
            .zip(other.blocks.iter())
            .map(|(a, b)| a.v.dot(&b.v))
            .sum();
        self.partitioner().comm().sum(local)
    }

    /// Global l2 norm
    pub fn norm_l2(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Largest absolute owned value on all ranks
    pub fn norm_linf(&self) -> f64 {
        let local = self
            .blocks
            .iter()
            .flat_map(|b| b.v.iter())
            .fold(0., |m: f64, x| m.max(x.abs()));
        self.partitioner().comm().max(local)
    }

    /// Partitioner of the first block
    ///
    /// # Panics
    /// Vector without blocks
    pub fn partitioner(&self) -> &Arc<Partitioner> {
        self.blocks[0].partitioner()
    }

    fn assert_compatible(&self, other: &Self) {
        assert!(
            self.blocks.len() == other.blocks.len(),
            "Block mismatch: {} != {}",
            self.blocks.len(),
            other.blocks.len()
        );
        for (a, b) in self.blocks.iter().zip(other.blocks.iter()) {
            a.assert_compatible(b);
        }
    }
}

/// Values of one macro-cell, one array of lane vectors per block
#[derive(Clone, Debug, PartialEq)]
pub struct LocalDofs {
    /// Block values, indexed `[block][dof]`
    pub blocks: Vec<Vec<Vectorized>>,
}

impl LocalDofs {
    /// Zero values
    pub fn zeros(dofs_per_block: &[usize]) -> Self {
        Self {
            blocks: dofs_per_block
                .iter()
                .map(|n| vec![Vectorized::zero(); *n])
                .collect(),
        }
    }

    /// Read blocks *first_block..first_block + n_blocks* of *src* for the
    /// given cells; lanes without cell are zero
    pub fn gather(
        src: &BlockVector,
        first_block: usize,
        n_blocks: usize,
        cells: &[Option<CellRef>; LANES],
    ) -> Self {
        let blocks = src.blocks[first_block..first_block + n_blocks]
            .iter()
            .map(|block| {
                let mut values = vec![Vectorized::zero(); block.dofs_per_cell()];
                for (lane, cell) in cells.iter().enumerate() {
                    if let Some(cell) = cell {
                        for (v, x) in values.iter_mut().zip(block.cell(*cell).iter()) {
                            v[lane] = *x;
                        }
                    }
                }
                values
            })
            .collect();
        Self { blocks }
    }

    /// Total number of values per lane
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    /// No values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value *index* in the concatenation of all blocks
    pub fn flat(&self, index: usize) -> Vectorized {
        let mut i = index;
        for block in &self.blocks {
            if i < block.len() {
                return block[i];
            }
            i -= block.len();
        }
        Vectorized::zero()
    }

    /// Mutable value *index* in the concatenation of all blocks
    ///
    /// # Panics
    /// Index out of range
    pub fn flat_mut(&mut self, index: usize) -> &mut Vectorized {
        let mut i = index;
        for block in &mut self.blocks {
            if i < block.len() {
                return &mut block[i];
            }
            i -= block.len();
        }
        panic!("Index {} out of range", index);
    }

    /// Add *other* value by value
    pub fn add(&mut self, other: &Self) {
        for (a, b) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += *y;
            }
        }
    }

    /// Write filled lanes of *batch* into blocks *first_block..* of *dst*
    pub fn scatter(&self, batch: &CellBatch, dst: &mut BlockVector, first_block: usize) {
        for (values, block) in self.blocks.iter().zip(dst.blocks[first_block..].iter_mut()) {
            for (lane, cell) in batch.filled_lanes() {
                let mut target = block.cell_mut(cell);
                for (t, v) in target.iter_mut().zip(values.iter()) {
                    *t = v[lane];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{LocalMesh, StructuredMesh};
    use crate::mpi::SerialCommunicator;

    fn periodic_mesh() -> LocalMesh {
        let mesh = StructuredMesh::channel(3, 2, 1., 0.).unwrap();
        LocalMesh::new(mesh, Arc::new(SerialCommunicator)).unwrap()
    }

    #[test]
    fn test_ghost_update_wraps_around() {
        let mesh = periodic_mesh();
        let mut v = DistVector::new(mesh.partitioner(), 2);
        for (i, x) in v.v.iter_mut().enumerate() {
            *x = i as f64;
        }
        v.update_ghost_values();
        // left ghost column holds the last owned column
        assert_eq!(v.cell(CellRef::Ghost(0)), v.cell(CellRef::Local(4)));
        assert_eq!(v.cell(CellRef::Ghost(1)), v.cell(CellRef::Local(5)));
        // right ghost column holds the first owned column
        assert_eq!(v.cell(CellRef::Ghost(2)), v.cell(CellRef::Local(0)));
        assert_eq!(v.cell(CellRef::Ghost(3)), v.cell(CellRef::Local(1)));
    }

    #[test]
    fn test_gather_scatter() {
        let mesh = periodic_mesh();
        let mut src = BlockVector::new(mesh.partitioner(), &[1, 3]);
        src.blocks[1].v.fill(2.);
        let batch = mesh.batches()[1];
        let cells = [
            Some(CellRef::Local(4)),
            Some(CellRef::Local(5)),
            None,
            None,
        ];
        let local = LocalDofs::gather(&src, 0, 2, &cells);
        assert_eq!(local.len(), 4);
        assert_eq!(local.flat(1), Vectorized([2., 2., 0., 0.]));
        let mut dst = BlockVector::new(mesh.partitioner(), &[1, 3]);
        local.scatter(&batch, &mut dst, 0);
        assert_eq!(dst.blocks[1].cell(CellRef::Local(5)).sum(), 6.);
        assert_eq!(dst.blocks[1].cell(CellRef::Local(3)).sum(), 0.);
    }

    #[test]
    #[should_panic]
    fn test_size_mismatch_panics() {
        let mesh = periodic_mesh();
        let _ = DistVector::from_owned(mesh.partitioner(), 2, Array1::zeros(3));
    }
}
