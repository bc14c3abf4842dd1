//! Wall clock time spent in the phases of a time step
use crate::mpi::Communicator;
use std::time::{Duration, Instant};

/// Phases of the dual splitting scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// tau_w update and re-projection of the history
    Enrichment,
    /// Explicit convective step
    Convective,
    /// Pressure Poisson equation
    Pressure,
    /// Projection and grad-div penalty
    Projection,
    /// Implicit viscous step
    Viscous,
    /// Vorticity and convective term of the new time level
    History,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 6] = [
        Phase::Enrichment,
        Phase::Convective,
        Phase::Pressure,
        Phase::Projection,
        Phase::Viscous,
        Phase::History,
    ];

    fn name(self) -> &'static str {
        match self {
            Phase::Enrichment => "enrichment",
            Phase::Convective => "convective",
            Phase::Pressure => "pressure",
            Phase::Projection => "projection",
            Phase::Viscous => "viscous",
            Phase::History => "history",
        }
    }
}

/// Accumulated time per phase
#[derive(Debug, Clone, Default)]
pub struct Timings {
    elapsed: [Duration; 6],
    n_steps: usize,
}

impl Timings {
    /// Start measuring
    pub fn start() -> Instant {
        Instant::now()
    }

    /// Add the time since *start* to *phase*, returns a new start
    pub fn record(&mut self, phase: Phase, start: Instant) -> Instant {
        let now = Instant::now();
        self.elapsed[phase as usize] += now - start;
        now
    }

    /// Count a completed time step
    pub fn finish_step(&mut self) {
        self.n_steps += 1;
    }

    /// Number of completed time steps
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Seconds spent in *phase*
    pub fn seconds(&self, phase: Phase) -> f64 {
        self.elapsed[phase as usize].as_secs_f64()
    }

    /// Seconds spent in all phases
    pub fn total(&self) -> f64 {
        Phase::ALL.iter().map(|p| self.seconds(*p)).sum()
    }

    /// Log the time per phase, maximum over all ranks
    pub fn log(&self, comm: &dyn Communicator) {
        let total = comm.max(self.total());
        let per_phase: Vec<f64> = Phase::ALL.iter().map(|p| comm.max(self.seconds(*p))).collect();
        if !comm.is_root() {
            return;
        }
        tracing::info!("computing times after {} steps:", self.n_steps);
        for (phase, seconds) in Phase::ALL.iter().zip(per_phase) {
            let share = if total > 0. { 100. * seconds / total } else { 0. };
            tracing::info!("  {:<12} {:10.3e} s  {:5.1} %", phase.name(), seconds, share);
        }
        tracing::info!("  {:<12} {:10.3e} s", "total", total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut timings = Timings::default();
        let start = Timings::start();
        std::thread::sleep(Duration::from_millis(2));
        let next = timings.record(Phase::Pressure, start);
        timings.record(Phase::Viscous, next);
        timings.finish_step();
        assert!(timings.seconds(Phase::Pressure) >= 0.002);
        assert_eq!(timings.seconds(Phase::Enrichment), 0.);
        assert!((timings.total() - timings.seconds(Phase::Pressure) - timings.seconds(Phase::Viscous)).abs() < 1e-12);
        assert_eq!(timings.n_steps(), 1);
    }
}
