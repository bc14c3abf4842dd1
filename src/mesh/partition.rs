//! Slab partition of a structured mesh
//!
//! Rank `r` of `P` owns the cell columns `[r*nx/P, (r+1)*nx/P)`. Local
//! cells are stored column-major (`cell = icol * ny + j`). One column of
//! ghost cells is kept for each neighbouring rank, including the
//! wrap-around neighbour of a periodic x direction (which is the rank
//! itself in serial runs).
use super::{BoundaryId, StructuredMesh, FACES_PER_CELL};
use crate::error::{DgError, Result};
use crate::mpi::{Communicator, HaloMessage, TAG_TO_LEFT, TAG_TO_RIGHT};
use crate::types::{DIM, LANES};
use std::sync::Arc;

/// Cell stored on this rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRef {
    /// Locally owned cell
    Local(usize),
    /// Ghost cell, owned by a neighbouring rank
    Ghost(usize),
}

/// What lies behind a cell face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    /// Another cell
    Cell(CellRef),
    /// Physical boundary
    Boundary(BoundaryId),
}

/// Macro-cell: up to `LANES` local cells processed together.
/// Unused lanes repeat the last cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellBatch {
    /// Position in the batch list
    pub index: usize,
    /// Local cell index per lane
    pub cells: [usize; LANES],
    /// Number of lanes holding distinct cells
    pub n_filled: usize,
}

impl CellBatch {
    /// Lanes holding distinct cells
    pub fn filled_lanes(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells[..self.n_filled].iter().cloned().enumerate()
    }
}

/// Communication pattern of cell and vertex columns
pub struct Partitioner {
    comm: Arc<dyn Communicator>,
    /// Number of locally owned cells
    pub n_local: usize,
    /// Number of ghost cells
    pub n_ghost: usize,
    /// Cells per column
    pub ny: usize,
    left_peer: Option<usize>,
    right_peer: Option<usize>,
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner")
            .field("rank", &self.comm.rank())
            .field("n_local", &self.n_local)
            .field("n_ghost", &self.n_ghost)
            .field("left_peer", &self.left_peer)
            .field("right_peer", &self.right_peer)
            .finish()
    }
}

impl Partitioner {
    /// Communicator
    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// Shared handle of the communicator
    pub fn comm_arc(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.comm)
    }

    /// Neighbouring rank on the left
    pub fn left_peer(&self) -> Option<usize> {
        self.left_peer
    }

    /// Neighbouring rank on the right
    pub fn right_peer(&self) -> Option<usize> {
        self.right_peer
    }

    /// First ghost cell of the left ghost column
    pub fn left_ghost_offset(&self) -> Option<usize> {
        self.left_peer.map(|_| 0)
    }

    /// First ghost cell of the right ghost column
    pub fn right_ghost_offset(&self) -> Option<usize> {
        let ny = self.ny;
        let left = self.left_peer.is_some();
        self.right_peer.map(|_| if left { ny } else { 0 })
    }

    /// Send *to_left* to the left and *to_right* to the right neighbour.
    /// Returns what the left and right neighbour sent towards us.
    pub fn exchange_columns(
        &self,
        to_left: Vec<f64>,
        to_right: Vec<f64>,
    ) -> (Option<Vec<f64>>, Option<Vec<f64>>) {
        let mut messages = Vec::with_capacity(2);
        if let Some(peer) = self.left_peer {
            messages.push(HaloMessage {
                peer,
                send_tag: TAG_TO_LEFT,
                recv_tag: TAG_TO_RIGHT,
                data: to_left,
            });
        }
        if let Some(peer) = self.right_peer {
            messages.push(HaloMessage {
                peer,
                send_tag: TAG_TO_RIGHT,
                recv_tag: TAG_TO_LEFT,
                data: to_right,
            });
        }
        let mut received = self.comm.exchange(messages).into_iter();
        let from_left = self.left_peer.and_then(|_| received.next());
        let from_right = self.right_peer.and_then(|_| received.next());
        (from_left, from_right)
    }
}

/// Part of the mesh owned by this rank
#[derive(Debug)]
pub struct LocalMesh {
    /// Global mesh
    pub global: StructuredMesh,
    /// First owned cell column
    pub i0: usize,
    /// One past the last owned cell column
    pub i1: usize,
    partitioner: Arc<Partitioner>,
    neighbors: Vec<[Neighbor; FACES_PER_CELL]>,
    ghosts: Vec<[usize; DIM]>,
    ghost_columns: Vec<usize>,
    batches: Vec<CellBatch>,
}

impl LocalMesh {
    /// Partition *global* among the ranks of *comm*
    ///
    /// # Errors
    /// Less cell columns than ranks
    pub fn new(global: StructuredMesh, comm: Arc<dyn Communicator>) -> Result<Self> {
        let (rank, size) = (comm.rank(), comm.size());
        let (nx, ny) = (global.nx(), global.ny());
        if nx < size {
            return Err(DgError::Mesh(format!(
                "{} cell columns can not be distributed on {} ranks",
                nx, size
            )));
        }
        let i0 = rank * nx / size;
        let i1 = (rank + 1) * nx / size;
        let periodic_x = global.periodic[0];
        let left_peer = if rank > 0 {
            Some(rank - 1)
        } else if periodic_x {
            Some(size - 1)
        } else {
            None
        };
        let right_peer = if rank + 1 < size {
            Some(rank + 1)
        } else if periodic_x {
            Some(0)
        } else {
            None
        };

        // ghost cells: global index and storage column of their left vertices
        let mut ghosts = Vec::new();
        let mut ghost_columns = Vec::new();
        if left_peer.is_some() {
            let i = (i0 + nx - 1) % nx;
            for j in 0..ny {
                ghosts.push([i, j]);
                ghost_columns.push(0);
            }
        }
        if right_peer.is_some() {
            let i = i1 % nx;
            for j in 0..ny {
                ghosts.push([i, j]);
                ghost_columns.push(i1 - i0 + 1);
            }
        }

        let n_cols = i1 - i0;
        let partitioner = Arc::new(Partitioner {
            comm,
            n_local: n_cols * ny,
            n_ghost: ghosts.len(),
            ny,
            left_peer,
            right_peer,
        });
        let left_offset = partitioner.left_ghost_offset();
        let right_offset = partitioner.right_ghost_offset();

        let mut neighbors = Vec::with_capacity(n_cols * ny);
        for icol in 0..n_cols {
            let i = i0 + icol;
            for j in 0..ny {
                let mut nb = [Neighbor::Boundary(0); FACES_PER_CELL];
                for (face, n) in nb.iter_mut().enumerate() {
                    if let Some(id) = global.boundary_of(i, j, face) {
                        *n = Neighbor::Boundary(id);
                        continue;
                    }
                    let cell = match face {
                        0 if icol == 0 => left_offset.map(|o| CellRef::Ghost(o + j)),
                        0 => Some(CellRef::Local((icol - 1) * ny + j)),
                        1 if icol + 1 == n_cols => right_offset.map(|o| CellRef::Ghost(o + j)),
                        1 => Some(CellRef::Local((icol + 1) * ny + j)),
                        2 => Some(CellRef::Local(icol * ny + (j + ny - 1) % ny)),
                        _ => Some(CellRef::Local(icol * ny + (j + 1) % ny)),
                    };
                    *n = match cell {
                        Some(c) => Neighbor::Cell(c),
                        None => {
                            return Err(DgError::Mesh(format!(
                                "cell ({}, {}) lacks a neighbour across face {}",
                                i, j, face
                            )))
                        }
                    };
                }
                neighbors.push(nb);
            }
        }

        let n_local = partitioner.n_local;
        let batches = (0..(n_local + LANES - 1) / LANES)
            .map(|b| {
                let first = b * LANES;
                let n_filled = LANES.min(n_local - first);
                let mut cells = [first + n_filled - 1; LANES];
                for (l, c) in cells.iter_mut().enumerate().take(n_filled) {
                    *c = first + l;
                }
                CellBatch {
                    index: b,
                    cells,
                    n_filled,
                }
            })
            .collect();

        Ok(Self {
            global,
            i0,
            i1,
            partitioner,
            neighbors,
            ghosts,
            ghost_columns,
            batches,
        })
    }

    /// Communication pattern
    pub fn partitioner(&self) -> &Arc<Partitioner> {
        &self.partitioner
    }

    /// Communicator
    pub fn comm(&self) -> &dyn Communicator {
        self.partitioner.comm()
    }

    /// Number of owned cells
    pub fn n_local(&self) -> usize {
        self.partitioner.n_local
    }

    /// Number of ghost cells
    pub fn n_ghost(&self) -> usize {
        self.partitioner.n_ghost
    }

    /// Cells per column
    pub fn ny(&self) -> usize {
        self.global.ny()
    }

    /// Macro-cells covering all owned cells
    pub fn batches(&self) -> &[CellBatch] {
        &self.batches
    }

    /// Neighbour of owned *cell* across *face*
    pub fn neighbor(&self, cell: usize, face: usize) -> Neighbor {
        self.neighbors[cell][face]
    }

    /// Global (i, j) index of a cell
    pub fn global_index(&self, cell: CellRef) -> [usize; DIM] {
        let ny = self.ny();
        match cell {
            CellRef::Local(c) => [self.i0 + c / ny, c % ny],
            CellRef::Ghost(g) => self.ghosts[g],
        }
    }

    /// Lower left corner and extent of a cell
    pub fn cell_box(&self, cell: CellRef) -> ([f64; DIM], [f64; DIM]) {
        let [i, j] = self.global_index(cell);
        self.global.cell_box(i, j)
    }

    /// Number of vertex columns stored per [`crate::field::VertexField`]:
    /// owned vertex columns plus one ghost column per side
    pub fn n_vertex_columns(&self) -> usize {
        self.i1 - self.i0 + 3
    }

    /// Storage position (column, row) of the lower left vertex of a cell
    pub fn vertex_origin(&self, cell: CellRef) -> [usize; DIM] {
        let ny = self.ny();
        match cell {
            CellRef::Local(c) => [c / ny + 1, c % ny],
            CellRef::Ghost(g) => [self.ghost_columns[g], self.ghosts[g][1]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpi::SerialCommunicator;

    fn serial() -> Arc<dyn Communicator> {
        Arc::new(SerialCommunicator)
    }

    #[test]
    fn test_neighbors_periodic_channel() {
        let mesh = StructuredMesh::channel(3, 2, 1., 0.).unwrap();
        let local = LocalMesh::new(mesh, serial()).unwrap();
        assert_eq!(local.n_local(), 6);
        // periodic wrap: one ghost column per side
        assert_eq!(local.n_ghost(), 4);
        assert_eq!(local.neighbor(0, 0), Neighbor::Cell(CellRef::Ghost(0)));
        assert_eq!(local.neighbor(5, 1), Neighbor::Cell(CellRef::Ghost(3)));
        assert_eq!(local.neighbor(0, 1), Neighbor::Cell(CellRef::Local(2)));
        assert_eq!(local.neighbor(0, 2), Neighbor::Boundary(0));
        assert_eq!(local.neighbor(0, 3), Neighbor::Cell(CellRef::Local(1)));
        assert_eq!(local.global_index(CellRef::Ghost(0)), [2, 0]);
        assert_eq!(local.global_index(CellRef::Ghost(3)), [0, 1]);
        assert_eq!(local.vertex_origin(CellRef::Ghost(2)), [4, 0]);
    }

    #[test]
    fn test_batches_padded() {
        let mesh = StructuredMesh::rectangle(3, 2, 0., 1., 0., 1.).unwrap();
        let local = LocalMesh::new(mesh, serial()).unwrap();
        assert_eq!(local.n_ghost(), 0);
        let batches = local.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].n_filled, 2);
        assert_eq!(batches[1].cells, [4, 5, 5, 5]);
    }

    #[test]
    fn test_serial_column_exchange() {
        let mesh = StructuredMesh::channel(2, 2, 1., 0.).unwrap();
        let local = LocalMesh::new(mesh, serial()).unwrap();
        let (from_left, from_right) = local
            .partitioner()
            .exchange_columns(vec![1.], vec![2.]);
        // wrap-around: our own right column arrives from the left
        assert_eq!(from_left, Some(vec![2.]));
        assert_eq!(from_right, Some(vec![1.]));
    }
}
