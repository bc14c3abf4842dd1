//! # Read and write snapshots
//!
//! Requires the `hdf5` feature (and a system `libhdf5`). Every rank
//! writes its own file, see
//! [`NavierStokesOperation::write_snapshot`](crate::navier_stokes::NavierStokesOperation::write_snapshot).
pub mod read_write_hdf5;
pub use read_write_hdf5::{read_from_hdf5, read_scalar_from_hdf5, write_scalar_to_hdf5, write_to_hdf5};

/// Append the rank to *filename*: `flow.h5` -> `flow.3.h5`
pub fn rank_filename(filename: &str, rank: usize) -> String {
    match filename.strip_suffix(".h5") {
        Some(stem) => format!("{}.{}.h5", stem, rank),
        None => format!("{}.{}", filename, rank),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_filename() {
        assert_eq!(rank_filename("data/flow1.00.h5", 2), "data/flow1.00.2.h5");
        assert_eq!(rank_filename("flow", 0), "flow.0");
    }
}
