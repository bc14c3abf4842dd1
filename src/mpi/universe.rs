//! Mpi backed communicator
//!
//! Run with `cargo mpirun --np 2 --features mpi --bin dgxwall`
use super::{Communicator, HaloMessage};
use mpi::collective::SystemOperation;
pub use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, CommunicatorCollectives};

/// Initialize mpi
///
/// # Panics
/// Mpi was initialized before
pub fn initialize() -> Universe {
    mpi::initialize().expect("mpi is already initialized")
}

/// Communicator over the mpi world
///
/// Holds no mpi handle, the world communicator is fetched on every call
/// by the calling thread. *universe* must outlive it.
#[derive(Debug, Clone, Copy)]
pub struct MpiCommunicator {
    rank: usize,
    size: usize,
}

impl MpiCommunicator {
    /// Read rank and size from the world communicator of *universe*
    #[allow(clippy::cast_sign_loss)]
    pub fn new(universe: &Universe) -> Self {
        let world = universe.world();
        Self {
            rank: world.rank() as usize,
            size: world.size() as usize,
        }
    }

    fn world(&self) -> SimpleCommunicator {
        SimpleCommunicator::world()
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum(&self, local: f64) -> f64 {
        let mut global = 0.;
        self.world()
            .all_reduce_into(&local, &mut global, SystemOperation::sum());
        global
    }

    fn max(&self, local: f64) -> f64 {
        let mut global = 0.;
        self.world()
            .all_reduce_into(&local, &mut global, SystemOperation::max());
        global
    }

    fn min(&self, local: f64) -> f64 {
        let mut global = 0.;
        self.world()
            .all_reduce_into(&local, &mut global, SystemOperation::min());
        global
    }

    fn sum_slice(&self, values: &mut [f64]) {
        let local = values.to_vec();
        self.world()
            .all_reduce_into(&local[..], values, SystemOperation::sum());
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn exchange(&self, messages: Vec<HaloMessage>) -> Vec<Vec<f64>> {
        let world = self.world();
        mpi::request::scope(|scope| {
            let requests: Vec<_> = messages
                .iter()
                .map(|m| {
                    world
                        .process_at_rank(m.peer as i32)
                        .immediate_send_with_tag(scope, &m.data[..], i32::from(m.send_tag))
                })
                .collect();
            let received = messages
                .iter()
                .map(|m| {
                    let (data, _status) = world
                        .process_at_rank(m.peer as i32)
                        .receive_vec_with_tag::<f64>(i32::from(m.recv_tag));
                    data
                })
                .collect();
            for request in requests {
                request.wait();
            }
            received
        })
    }
}
