use tracing::warn;

use crate::bottom_lock::BottomLock;
use crate::coupling::CouplingGate;
use crate::error::DvfsError;
use crate::table::DvfsTable;

/// Hysteresis state: where the governor wants to be, which may run ahead of
/// the level the hardware is actually at.
#[derive(Debug)]
pub struct DecisionEngine {
    hysteresis_level: usize,
    pending_resume: Option<usize>,
    frozen_reported: Vec<bool>,
}

impl DecisionEngine {
    pub fn new(levels: usize, initial_step: usize) -> Self {
        Self {
            hysteresis_level: initial_step,
            pending_resume: None,
            frozen_reported: vec![false; levels],
        }
    }

    pub fn hysteresis_level(&self) -> usize {
        self.hysteresis_level
    }

    pub fn pending_resume(&self) -> Option<usize> {
        self.pending_resume
    }

    /// The next decision returns `step` without looking at utilization.
    pub fn set_pending_resume(&mut self, step: usize) {
        self.pending_resume = Some(step);
    }

    /// Aligns hysteresis with a level applied outside the normal decision
    /// path.
    pub fn sync_to(&mut self, step: usize) {
        self.hysteresis_level = step;
    }

    pub fn decide(
        &mut self,
        utilization: u8,
        current_step: usize,
        table: &DvfsTable,
        bottom_lock: &BottomLock,
        coupling: &CouplingGate,
    ) -> usize {
        if let Some(step) = self.pending_resume.take() {
            let step = bottom_lock.active_floor().map_or(step, |floor| step.max(floor));
            self.hysteresis_level = step;
            return step;
        }

        let threshold = table.threshold(current_step);
        if threshold.is_frozen() {
            if !self.frozen_reported[current_step] {
                self.frozen_reported[current_step] = true;
                let e = DvfsError::ThresholdMisconfigured {
                    level: current_step,
                    down: threshold.down_percent,
                    up: threshold.up_percent,
                };
                warn!("{e}, level is frozen");
            }
            return self.hysteresis_level;
        }

        let utilization = u32::from(utilization);
        if utilization > threshold.up_bound() && self.hysteresis_level < table.top() {
            self.hysteresis_level += 1;
        } else if utilization < threshold.down_bound() && self.hysteresis_level > 0 {
            self.hysteresis_level -= 1;
        }

        if let Some(floor) = bottom_lock.active_floor() {
            self.hysteresis_level = self.hysteresis_level.max(floor);
        }

        coupling.update(table.point(self.hysteresis_level).frequency_hz());

        self.hysteresis_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use crate::sim::{HwEvent, SimulatedGpu};
    use crate::table::{Level, OperatingPoint, ThresholdEntry};
    use std::sync::Arc;

    struct Fixture {
        table: DvfsTable,
        lock: BottomLock,
        gpu: Arc<SimulatedGpu>,
        gate: CouplingGate,
    }

    fn fixture() -> Fixture {
        let gpu = Arc::new(SimulatedGpu::new());
        Fixture {
            table: constants::default_table(),
            lock: BottomLock::new(),
            gate: CouplingGate::new(gpu.clone(), 300_000_000, 800),
            gpu,
        }
    }

    impl Fixture {
        fn decide(&self, engine: &mut DecisionEngine, utilization: u8, current: usize) -> usize {
            engine.decide(utilization, current, &self.table, &self.lock, &self.gate)
        }
    }

    #[test]
    fn rises_only_above_the_up_bound() {
        let f = fixture();
        let mut engine = DecisionEngine::new(4, 0);
        // level 0 up bound is 178
        assert_eq!(f.decide(&mut engine, 178, 0), 0);
        assert_eq!(f.decide(&mut engine, 179, 0), 1);
    }

    #[test]
    fn falls_only_below_the_down_bound() {
        let f = fixture();
        let mut engine = DecisionEngine::new(4, 1);
        // level 1 down bound is 158
        assert_eq!(f.decide(&mut engine, 158, 1), 1);
        assert_eq!(f.decide(&mut engine, 50, 1), 0);
        assert_eq!(f.decide(&mut engine, 0, 0), 0);
    }

    #[test]
    fn saturates_at_top_level() {
        let f = fixture();
        let mut engine = DecisionEngine::new(4, 3);
        assert_eq!(f.decide(&mut engine, 255, 3), 3);
    }

    #[test]
    fn hysteresis_persists_between_calls() {
        let f = fixture();
        let mut engine = DecisionEngine::new(4, 0);
        // thresholds are read from the hardware level, which stays at 0 here
        assert_eq!(f.decide(&mut engine, 255, 0), 1);
        assert_eq!(f.decide(&mut engine, 255, 0), 2);
        assert_eq!(engine.hysteresis_level(), 2);
    }

    #[test]
    fn pending_resume_bypasses_hysteresis_once() {
        let f = fixture();
        let mut engine = DecisionEngine::new(4, 3);
        engine.set_pending_resume(0);
        assert_eq!(f.decide(&mut engine, 255, 3), 0);
        assert_eq!(engine.pending_resume(), None);
        assert_eq!(f.decide(&mut engine, 255, 0), 1);
    }

    #[test]
    fn pending_resume_respects_the_bottom_lock() {
        let f = fixture();
        f.lock.push(2).unwrap();
        let mut engine = DecisionEngine::new(4, 2);
        engine.set_pending_resume(0);
        assert_eq!(f.decide(&mut engine, 255, 2), 2);
        assert_eq!(engine.hysteresis_level(), 2);
        assert_eq!(engine.pending_resume(), None);
    }

    #[test]
    fn bottom_lock_clamps_the_level() {
        let f = fixture();
        f.lock.push(2).unwrap();
        let mut engine = DecisionEngine::new(4, 0);
        assert_eq!(f.decide(&mut engine, 0, 0), 2);
        f.lock.pop().unwrap();
        assert_eq!(f.decide(&mut engine, 0, 2), 1);
    }

    #[test]
    fn frozen_level_never_moves() {
        let levels = vec![
            Level {
                point: OperatingPoint::new(100_000_000, 900_000),
                threshold: ThresholdEntry::new(80, 80),
                stay_count: 0,
            },
            Level {
                point: OperatingPoint::new(200_000_000, 950_000),
                threshold: ThresholdEntry::new(10, 90),
                stay_count: 0,
            },
        ];
        let mut f = fixture();
        f.table = DvfsTable::new(levels).unwrap();
        let mut engine = DecisionEngine::new(2, 0);
        for _ in 0..3 {
            assert_eq!(f.decide(&mut engine, 255, 0), 0);
        }
        assert!(engine.frozen_reported[0]);
        assert!(!engine.frozen_reported[1]);
    }

    #[test]
    fn couples_performance_floor_to_fast_levels() {
        let f = fixture();
        let mut engine = DecisionEngine::new(4, 2);
        // level 3 runs at 330 MHz
        assert_eq!(f.decide(&mut engine, 255, 2), 3);
        assert_eq!(f.decide(&mut engine, 0, 3), 2);
        assert_eq!(
            f.gpu.events(),
            vec![HwEvent::FloorRequested(800), HwEvent::FloorReleased]
        );
    }
}
