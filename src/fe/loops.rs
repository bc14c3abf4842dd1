//! Parallel loops over cell batches
//!
//! Kernels are cell-centric: a kernel computes the complete contribution
//! of its own cells (including their faces) and never writes to other
//! cells. The results are written into the destination vector after the
//! parallel part, so no two threads touch the same memory.
//!
//! Scratch data (evaluators, buffers) is created once per worker thread
//! by the `init` closure and handed to the kernel.
use crate::error::Result;
use crate::field::{BlockVector, LocalDofs};
use crate::mesh::{CellBatch, LocalMesh};
use crate::types::{Vectorized, LANES};
use ndarray::Array2;
use rayon::prelude::*;

/// Apply *kernel* to every batch of *mesh* in parallel, results are
/// returned in batch order
///
/// # Errors
/// First error returned by a kernel
pub fn batch_map<T, S, I, K>(mesh: &LocalMesh, init: I, kernel: K) -> Result<Vec<T>>
where
    T: Send,
    I: Fn() -> S + Sync + Send,
    K: Fn(&mut S, &CellBatch) -> Result<T> + Sync + Send,
{
    mesh.batches()
        .par_iter()
        .map_init(init, |scratch, batch| kernel(scratch, batch))
        .collect()
}

/// Compute the local dofs of every batch with *kernel* and write them
/// into *dst* (blocks `first_block..`). Ghost values of *dst* are not
/// updated.
///
/// # Errors
/// First error returned by a kernel
pub fn cell_loop<S, I, K>(
    mesh: &LocalMesh,
    dst: &mut BlockVector,
    first_block: usize,
    init: I,
    kernel: K,
) -> Result<()>
where
    I: Fn() -> S + Sync + Send,
    K: Fn(&mut S, &CellBatch) -> Result<LocalDofs> + Sync + Send,
{
    let results = batch_map(mesh, init, kernel)?;
    for (batch, local) in mesh.batches().iter().zip(results.iter()) {
        local.scatter(batch, dst, first_block);
    }
    Ok(())
}

/// Dense matrix of a local operator, one per lane. Column `j` is the
/// response of *apply* to the `j`-th unit vector (in the concatenated
/// block numbering of *layout*).
///
/// # Errors
/// Error returned by *apply*
pub fn local_matrices<F>(layout: &[usize], mut apply: F) -> Result<Vec<Array2<f64>>>
where
    F: FnMut(&LocalDofs) -> Result<LocalDofs>,
{
    let n: usize = layout.iter().sum();
    let mut matrices = vec![Array2::zeros((n, n)); LANES];
    for j in 0..n {
        let mut unit = LocalDofs::zeros(layout);
        *unit.flat_mut(j) = Vectorized::splat(1.);
        let column = apply(&unit)?;
        for i in 0..n {
            let v = column.flat(i);
            for (l, m) in matrices.iter_mut().enumerate() {
                m[[i, j]] = v[l];
            }
        }
    }
    Ok(matrices)
}
