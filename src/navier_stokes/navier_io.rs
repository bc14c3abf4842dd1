//! Implement io routines for `NavierStokesOperation`
//!
//! Every rank writes the values of its owned cells into its own file,
//! see [`rank_filename`]. A snapshot can only be read with the same
//! number of ranks and the same discretization.
use super::NavierStokesOperation;
use crate::error::{DgError, Result};
use crate::io::{rank_filename, read_from_hdf5, read_scalar_from_hdf5, write_scalar_to_hdf5, write_to_hdf5};
use ndarray::Array1;

/// Dataset names of the velocity blocks (polynomial, then enrichment)
const VELOCITY_NAMES: [&str; 4] = ["ux", "uy", "ux_enriched", "uy_enriched"];

impl NavierStokesOperation {
    /// Write snapshot of the newest time level
    ///
    /// # Errors
    /// Failed to write
    pub fn write_snapshot(&self, filename: &str) -> Result<()> {
        let rank = self.discretization().mesh.comm().rank();
        let filename = rank_filename(filename, rank);
        for (block, name) in self.velocity().blocks.iter().zip(VELOCITY_NAMES.iter()) {
            write_to_hdf5(&filename, name, &block.v)?;
        }
        write_to_hdf5(&filename, "pres", &self.pressure().blocks[0].v)?;
        write_to_hdf5(&filename, "vorticity", &self.vorticity().blocks[0].v)?;
        if let Some(xwall) = self.xwall() {
            write_to_hdf5(&filename, "tauw", &Array1::from(xwall.tauw_wall().to_vec()))?;
        }
        write_scalar_to_hdf5(&filename, "time", self.time())?;
        write_scalar_to_hdf5(&filename, "nu", self.discretization().params.viscosity)?;
        write_scalar_to_hdf5(&filename, "degree", self.discretization().params.degree as u64)?;
        if self.discretization().mesh.comm().is_root() {
            tracing::info!(" ==> {:?}", filename);
        }
        Ok(())
    }

    /// Write snapshot, and handle error
    pub fn write_unwrap(&self, filename: &str) {
        if let Err(e) = self.write_snapshot(filename) {
            tracing::error!("Error while writing file {:?}. Error: {}", filename, e);
        }
    }

    /// Restart from snapshot. The history is restarted from the read
    /// time level.
    ///
    /// # Errors
    /// Failed to read, or layout of the snapshot does not match
    pub fn read_snapshot(&mut self, filename: &str) -> Result<()> {
        let rank = self.discretization().mesh.comm().rank();
        let filename = rank_filename(filename, rank);
        if self.xwall().is_some() {
            let tauw: Array1<f64> = read_from_hdf5(&filename, "tauw")?;
            check_len(&tauw, self.xwall().map_or(0, |x| x.tauw_wall().len()), "tauw")?;
            self.restore_wall_model(&tauw.to_vec())?;
        }
        let mut velocity = self.discretization().velocity_vector();
        for (block, name) in velocity.blocks.iter_mut().zip(VELOCITY_NAMES.iter()) {
            let v: Array1<f64> = read_from_hdf5(&filename, name)?;
            check_len(&v, block.v.len(), name)?;
            block.v.assign(&v);
        }
        let mut pressure = self.discretization().pressure_vector();
        let p: Array1<f64> = read_from_hdf5(&filename, "pres")?;
        check_len(&p, pressure.blocks[0].v.len(), "pres")?;
        pressure.blocks[0].v.assign(&p);
        let time = read_scalar_from_hdf5::<f64>(&filename, "time")?;
        self.set_state(velocity, pressure, time)?;
        if self.discretization().mesh.comm().is_root() {
            tracing::info!(" <== {:?}", filename);
        }
        Ok(())
    }
}

fn check_len(v: &Array1<f64>, expected: usize, name: &str) -> Result<()> {
    if v.len() == expected {
        Ok(())
    } else {
        Err(DgError::Config(format!(
            "snapshot field {} holds {} values, expected {}",
            name,
            v.len(),
            expected
        )))
    }
}
