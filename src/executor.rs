use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::coupling::CouplingGate;
use crate::error::{DvfsError, Result};
use crate::hw::{ClockControl, Hardware, ReadyIndicator, VoltageControl};
use crate::table::DvfsTable;

/// How long to wait for clock and voltage to settle after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for StabilizationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10),
            poll_interval: Duration::from_micros(100),
        }
    }
}

/// Writes a level to the hardware.
///
/// When raising performance the voltage goes up before the clock, when
/// lowering it the clock goes down before the voltage, so the clock never
/// runs faster than the voltage supports.
pub struct TransitionExecutor {
    clock: Arc<dyn ClockControl>,
    voltage: Arc<dyn VoltageControl>,
    ready: Arc<dyn ReadyIndicator>,
    coupling: Arc<CouplingGate>,
    policy: StabilizationPolicy,
}

impl TransitionExecutor {
    pub fn new(hw: &Hardware, coupling: Arc<CouplingGate>, policy: StabilizationPolicy) -> Self {
        Self {
            clock: hw.clock.clone(),
            voltage: hw.voltage.clone(),
            ready: hw.ready.clone(),
            coupling,
            policy,
        }
    }

    /// Moves the hardware to `level` and commits it to `current_step`.
    ///
    /// The caller holds the engine state lock. `current_step` is left alone
    /// if either write fails; a stabilization timeout is reported after the
    /// commit and is not rolled back.
    pub fn apply(
        &self,
        table: &DvfsTable,
        current_step: &mut usize,
        level: usize,
        boost: bool,
    ) -> Result<()> {
        if self.voltage.regulator_usage_count() == 0 {
            return Err(DvfsError::RegulatorNotReady);
        }

        let point = table.point(level);
        let voltage_uv = point.voltage_uv();
        debug!(
            from = *current_step,
            to = level,
            boost,
            frequency_hz = point.frequency_hz(),
            voltage_uv,
            "changing level"
        );

        if boost {
            self.voltage.set_voltage(voltage_uv, voltage_uv)?;
            self.clock.set_clock(point.frequency_hz())?;
        } else {
            self.clock.set_clock(point.frequency_hz())?;
            self.voltage.set_voltage(voltage_uv, voltage_uv)?;
        }

        *current_step = level;
        self.coupling.update(point.frequency_hz());

        self.wait_until_stable(level)
    }

    fn wait_until_stable(&self, level: usize) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.ready.is_stable() {
                return Ok(());
            }
            if start.elapsed() >= self.policy.timeout {
                warn!(level, timeout = ?self.policy.timeout, "hardware did not stabilize");
                return Err(DvfsError::HardwareNotStabilized {
                    level,
                    timeout: self.policy.timeout,
                });
            }
            thread::sleep(self.policy.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use crate::hw::FixedVoltage;
    use crate::sim::{HwEvent, SimulatedGpu};

    fn executor(gpu: &Arc<SimulatedGpu>) -> TransitionExecutor {
        let hw = Hardware::from_backend(gpu.clone());
        let gate = Arc::new(CouplingGate::new(gpu.clone(), 300_000_000, 800));
        let policy = StabilizationPolicy {
            timeout: Duration::from_millis(5),
            poll_interval: Duration::from_micros(50),
        };
        TransitionExecutor::new(&hw, gate, policy)
    }

    #[test]
    fn boost_sets_voltage_before_clock() {
        let gpu = Arc::new(SimulatedGpu::new());
        let table = constants::default_table();
        let mut current = 0;

        executor(&gpu).apply(&table, &mut current, 1, true).unwrap();

        assert_eq!(current, 1);
        assert_eq!(
            gpu.events(),
            vec![
                HwEvent::Voltage(950_000),
                HwEvent::Clock(160_000_000),
            ]
        );
    }

    #[test]
    fn lowering_sets_clock_before_voltage() {
        let gpu = Arc::new(SimulatedGpu::new());
        let table = constants::default_table();
        let mut current = 1;

        executor(&gpu).apply(&table, &mut current, 0, false).unwrap();

        assert_eq!(current, 0);
        assert_eq!(
            gpu.events(),
            vec![HwEvent::Clock(100_000_000), HwEvent::Voltage(900_000)]
        );
    }

    #[test]
    fn regulator_not_ready_writes_nothing() {
        let gpu = Arc::new(SimulatedGpu::new());
        gpu.set_regulator_users(0);
        let table = constants::default_table();
        let mut current = 0;

        let err = executor(&gpu)
            .apply(&table, &mut current, 2, true)
            .unwrap_err();

        assert!(matches!(err, DvfsError::RegulatorNotReady));
        assert_eq!(current, 0);
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn failed_write_leaves_level_uncommitted() {
        let gpu = Arc::new(SimulatedGpu::new());
        gpu.fail_clock_writes(true);
        let table = constants::default_table();
        let mut current = 0;

        let err = executor(&gpu)
            .apply(&table, &mut current, 1, true)
            .unwrap_err();

        assert!(matches!(err, DvfsError::Clock(_)));
        assert_eq!(current, 0);
    }

    #[test]
    fn stabilization_timeout_keeps_committed_level() {
        let gpu = Arc::new(SimulatedGpu::new().never_settles());
        let table = constants::default_table();
        let mut current = 0;

        let err = executor(&gpu)
            .apply(&table, &mut current, 1, true)
            .unwrap_err();

        assert!(matches!(
            err,
            DvfsError::HardwareNotStabilized { level: 1, .. }
        ));
        assert_eq!(current, 1);
        assert_eq!(gpu.clock_hz(), 160_000_000);
    }

    #[test]
    fn waits_for_the_ready_indicator() {
        let gpu = Arc::new(SimulatedGpu::new().with_settle_polls(3));
        let table = constants::default_table();
        let mut current = 0;

        executor(&gpu).apply(&table, &mut current, 1, true).unwrap();
        assert!(gpu.ready_polls() >= 3);
    }

    #[test]
    fn fixed_voltage_board_only_touches_the_clock() {
        let gpu = Arc::new(SimulatedGpu::new());
        let mut hw = Hardware::from_backend(gpu.clone());
        hw.voltage = Arc::new(FixedVoltage);
        let gate = Arc::new(CouplingGate::new(gpu.clone(), 300_000_000, 800));
        let executor = TransitionExecutor::new(&hw, gate, StabilizationPolicy::default());
        let table = constants::default_table();
        let mut current = 0;

        executor.apply(&table, &mut current, 3, true).unwrap();

        assert_eq!(
            gpu.events(),
            vec![HwEvent::Clock(330_000_000), HwEvent::FloorRequested(800)]
        );
    }
}
