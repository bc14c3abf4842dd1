//! Distributed memory communication
//!
//! The solver only needs a few collective operations: global reductions
//! (scalar products, norms, statistics) and the exchange of halo data
//! between neighbouring partitions. Both are collected in the
//! [`Communicator`] trait.
//!
//! [`SerialCommunicator`] runs everything on a single process. With the
//! `mpi` feature, [`MpiCommunicator`] distributes over an mpi world.
#[cfg(feature = "mpi")]
pub mod universe;
#[cfg(feature = "mpi")]
pub use universe::{initialize, MpiCommunicator, Universe};

/// Tag of halo messages sent to the left neighbour
pub const TAG_TO_LEFT: u16 = 1;
/// Tag of halo messages sent to the right neighbour
pub const TAG_TO_RIGHT: u16 = 2;

/// One halo buffer sent to *peer*. The buffer received in exchange is
/// the one *peer* sends with tag *recv_tag*.
#[derive(Debug, Clone)]
pub struct HaloMessage {
    /// Rank of the neighbour
    pub peer: usize,
    /// Tag attached to the outgoing buffer
    pub send_tag: u16,
    /// Tag of the buffer expected from *peer*
    pub recv_tag: u16,
    /// Outgoing data
    pub data: Vec<f64>,
}

/// Collective operations across all partitions
pub trait Communicator: Send + Sync {
    /// Rank of this process
    fn rank(&self) -> usize;

    /// Number of processes
    fn size(&self) -> usize;

    /// Global sum
    fn sum(&self, local: f64) -> f64;

    /// Global maximum
    fn max(&self, local: f64) -> f64;

    /// Global minimum
    fn min(&self, local: f64) -> f64;

    /// Global element-wise sum, result is written back into *values*
    fn sum_slice(&self, values: &mut [f64]);

    /// Send every message to its peer and return the received buffers,
    /// in the order of *messages*.
    fn exchange(&self, messages: Vec<HaloMessage>) -> Vec<Vec<f64>>;

    /// Root process prints diagnostics
    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Communicator of a single process
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum(&self, local: f64) -> f64 {
        local
    }

    fn max(&self, local: f64) -> f64 {
        local
    }

    fn min(&self, local: f64) -> f64 {
        local
    }

    fn sum_slice(&self, _values: &mut [f64]) {}

    /// Messages can only be addressed to ourselves (periodic wrap-around).
    /// A message expecting tag *t* receives the buffer sent with tag *t*.
    ///
    /// # Panics
    /// Message addressed to another rank, or no matching message.
    fn exchange(&self, messages: Vec<HaloMessage>) -> Vec<Vec<f64>> {
        messages
            .iter()
            .map(|m| {
                assert!(m.peer == 0, "Serial communicator can not reach rank {}", m.peer);
                messages
                    .iter()
                    .find(|other| other.send_tag == m.recv_tag)
                    .unwrap_or_else(|| panic!("No halo message with tag {}", m.recv_tag))
                    .data
                    .clone()
            })
            .collect()
    }
}
