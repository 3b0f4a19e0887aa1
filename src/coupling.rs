use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::hw::PerformanceFloor;

/// Couples the accelerator level to an external performance floor.
///
/// At or above `threshold_hz` the floor is requested at `floor_mhz`, below it
/// the floor is released. The collaborator is only called when the held
/// state flips.
pub struct CouplingGate {
    target: Arc<dyn PerformanceFloor>,
    threshold_hz: u64,
    floor_mhz: u32,
    held: AtomicBool,
}

impl CouplingGate {
    pub fn new(target: Arc<dyn PerformanceFloor>, threshold_hz: u64, floor_mhz: u32) -> Self {
        Self {
            target,
            threshold_hz,
            floor_mhz,
            held: AtomicBool::new(false),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Best effort: a failed request is logged and retried on the next
    /// update.
    pub fn update(&self, frequency_hz: u64) {
        if frequency_hz >= self.threshold_hz {
            if self.held.load(Ordering::Acquire) {
                return;
            }
            match self.target.request_performance_floor(self.floor_mhz) {
                Ok(()) => {
                    self.held.store(true, Ordering::Release);
                    debug!(floor_mhz = self.floor_mhz, "performance floor requested");
                }
                Err(e) => warn!("performance floor request failed: {e}"),
            }
        } else if self.held.swap(false, Ordering::AcqRel) {
            self.target.release_performance_floor();
            debug!("performance floor released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{HwEvent, SimulatedGpu};

    #[test]
    fn requests_and_releases_on_edges_only() {
        let gpu = Arc::new(SimulatedGpu::new());
        let gate = CouplingGate::new(gpu.clone(), 300_000_000, 800);

        gate.update(100_000_000);
        gate.update(330_000_000);
        gate.update(300_000_000);
        gate.update(267_000_000);
        gate.update(160_000_000);

        assert_eq!(
            gpu.events(),
            vec![HwEvent::FloorRequested(800), HwEvent::FloorReleased]
        );
        assert!(!gate.is_held());
    }

    #[test]
    fn retries_after_a_failed_request() {
        let gpu = Arc::new(SimulatedGpu::new());
        gpu.fail_floor_requests(true);
        let gate = CouplingGate::new(gpu.clone(), 300_000_000, 800);

        gate.update(330_000_000);
        assert!(!gate.is_held());

        gpu.fail_floor_requests(false);
        gate.update(330_000_000);
        assert!(gate.is_held());
        assert_eq!(gpu.events(), vec![HwEvent::FloorRequested(800)]);
    }
}
