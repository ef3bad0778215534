//! Hooks for a sweeping driver.
//!
//! A driver that repeatedly calls [`SvdWorker::decompose`] along a chain
//! reports to a [`SweepObserver`] after each step and asks it whether to stop.

use tracing::info;
use crate::worker::SvdWorker;

/// Measurement and stopping hooks called by a sweeping driver.
pub trait SweepObserver {
    /// Return `true` if output is suppressed.
    fn quiet(&self) -> bool;

    /// Suppress or enable output.
    fn set_quiet(&mut self, quiet: bool);

    /// Called after the decomposition at bond `bond` during half-sweep `half`
    /// of sweep `sweep`.
    fn observe(&mut self, sweep: usize, half: usize, bond: usize, worker: &SvdWorker, energy: f64);

    /// Called at the end of sweep `sweep`; return `true` to stop sweeping.
    fn should_stop(&mut self, sweep: usize, energy: f64) -> bool;
}

/// Stops once the energy settles, and tracks the largest bond dimension and
/// truncation error seen during each sweep.
#[derive(Clone, Debug)]
pub struct EnergyObserver {
    tolerance: f64,
    quiet: bool,
    last_energy: Option<f64>,
    max_kept: usize,
    max_truncerr: f64,
}

impl EnergyObserver {
    /// Create a new observer that stops when the energy changes by less than
    /// `tolerance` between two sweeps.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            quiet: false,
            last_energy: None,
            max_kept: 0,
            max_truncerr: 0.0,
        }
    }

    /// Return the stopping tolerance.
    pub fn tolerance(&self) -> f64 { self.tolerance }

    /// Return the energy recorded at the end of the last sweep.
    pub fn last_energy(&self) -> Option<f64> { self.last_energy }

    /// Return the largest number of kept eigenvalues seen in the current
    /// sweep.
    pub fn max_kept(&self) -> usize { self.max_kept }

    /// Return the largest truncation error seen in the current sweep.
    pub fn max_truncerr(&self) -> f64 { self.max_truncerr }
}

impl SweepObserver for EnergyObserver {
    fn quiet(&self) -> bool { self.quiet }

    fn set_quiet(&mut self, quiet: bool) { self.quiet = quiet; }

    fn observe(&mut self, sweep: usize, half: usize, bond: usize, worker: &SvdWorker, energy: f64) {
        let kept = worker.eigs_kept(bond).map(<[f64]>::len).unwrap_or(0);
        let truncerr = worker.truncerr(bond).unwrap_or(0.0);
        self.max_kept = self.max_kept.max(kept);
        self.max_truncerr = self.max_truncerr.max(truncerr);
        if !self.quiet {
            info!(sweep, half, bond, kept, truncerr, energy, "sweep step");
        }
    }

    fn should_stop(&mut self, sweep: usize, energy: f64) -> bool {
        let done
            = self.last_energy
            .is_some_and(|last| (energy - last).abs() < self.tolerance);
        if !self.quiet {
            info!(
                sweep,
                energy,
                max_kept = self.max_kept,
                max_truncerr = self.max_truncerr,
                done,
                "sweep finished"
            );
        }
        self.last_energy = Some(energy);
        self.max_kept = 0;
        self.max_truncerr = 0.0;
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_when_energy_settles() {
        let mut obs = EnergyObserver::new(1e-6);
        obs.set_quiet(true);
        assert!(obs.quiet());
        assert!(!obs.should_stop(1, -1.0));
        assert!(!obs.should_stop(2, -1.1));
        assert!(obs.should_stop(3, -1.1 + 1e-8));
        assert_eq!(obs.last_energy(), Some(-1.1 + 1e-8));
    }

    #[test]
    fn tracks_bond_maxima_per_sweep() {
        let mut obs = EnergyObserver::new(1e-6);
        obs.set_quiet(true);
        let worker = SvdWorker::new(2);
        obs.observe(1, 1, 1, &worker, -0.5);
        obs.observe(1, 1, 5, &worker, -0.5);
        assert_eq!(obs.max_kept(), 0);
        assert_eq!(obs.max_truncerr(), 0.0);
        obs.should_stop(1, -0.5);
        assert_eq!(obs.max_kept(), 0);
    }
}
