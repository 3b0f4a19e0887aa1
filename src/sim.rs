//! In-memory accelerator used by the daemon when no real driver is plugged
//! in, and by the tests. Every hardware call is recorded in order.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tracing::trace;

use crate::asv::ChipBin;
use crate::error::{DvfsError, Result};
use crate::hw::{ChipBinSource, ClockControl, PerformanceFloor, ReadyIndicator, VoltageControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwEvent {
    Clock(u64),
    Voltage(u32),
    FloorRequested(u32),
    FloorReleased,
}

#[derive(Debug)]
pub struct SimulatedGpu {
    events: Mutex<Vec<HwEvent>>,
    clock_hz: AtomicU64,
    voltage_uv: AtomicU32,
    regulator_users: AtomicU32,
    asv_raw: u32,
    settle_polls: u32,
    never_settles: bool,
    pending_polls: AtomicU32,
    ready_polls: AtomicU32,
    fail_clock: AtomicBool,
    fail_floor: AtomicBool,
}

impl SimulatedGpu {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            clock_hz: AtomicU64::new(0),
            voltage_uv: AtomicU32::new(0),
            regulator_users: AtomicU32::new(1),
            asv_raw: 0,
            settle_polls: 0,
            never_settles: false,
            pending_polls: AtomicU32::new(0),
            ready_polls: AtomicU32::new(0),
            fail_clock: AtomicBool::new(false),
            fail_floor: AtomicBool::new(false),
        }
    }

    /// Raw ASV result word reported as the chip classification.
    pub fn with_asv_raw(mut self, raw: u32) -> Self {
        self.asv_raw = raw;
        self
    }

    /// Number of ready-indicator polls needed after each write.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    pub fn never_settles(mut self) -> Self {
        self.never_settles = true;
        self
    }

    pub fn set_regulator_users(&self, users: u32) {
        self.regulator_users.store(users, Ordering::Release);
    }

    pub fn fail_clock_writes(&self, fail: bool) {
        self.fail_clock.store(fail, Ordering::Release);
    }

    pub fn fail_floor_requests(&self, fail: bool) {
        self.fail_floor.store(fail, Ordering::Release);
    }

    pub fn clock_hz(&self) -> u64 {
        self.clock_hz.load(Ordering::Acquire)
    }

    pub fn voltage_uv(&self) -> u32 {
        self.voltage_uv.load(Ordering::Acquire)
    }

    pub fn ready_polls(&self) -> u32 {
        self.ready_polls.load(Ordering::Acquire)
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.log().clone()
    }

    /// Returns and forgets the recorded calls.
    pub fn take_events(&self) -> Vec<HwEvent> {
        std::mem::take(&mut *self.log())
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<HwEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: HwEvent) {
        trace!(?event, "simulated hardware call");
        self.log().push(event);
    }

    fn start_settling(&self) {
        self.pending_polls.store(self.settle_polls, Ordering::Release);
    }
}

impl Default for SimulatedGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockControl for SimulatedGpu {
    fn set_clock(&self, frequency_hz: u64) -> Result<()> {
        if self.fail_clock.load(Ordering::Acquire) {
            return Err(DvfsError::Clock(format!(
                "simulated failure at {frequency_hz} Hz"
            )));
        }
        self.record(HwEvent::Clock(frequency_hz));
        self.clock_hz.store(frequency_hz, Ordering::Release);
        self.start_settling();
        Ok(())
    }
}

impl VoltageControl for SimulatedGpu {
    fn set_voltage(&self, _min_uv: u32, target_uv: u32) -> Result<()> {
        self.record(HwEvent::Voltage(target_uv));
        self.voltage_uv.store(target_uv, Ordering::Release);
        self.start_settling();
        Ok(())
    }

    fn regulator_usage_count(&self) -> u32 {
        self.regulator_users.load(Ordering::Acquire)
    }
}

impl PerformanceFloor for SimulatedGpu {
    fn request_performance_floor(&self, frequency_mhz: u32) -> Result<()> {
        if self.fail_floor.load(Ordering::Acquire) {
            return Err(DvfsError::Coupling(format!(
                "simulated failure locking {frequency_mhz} MHz"
            )));
        }
        self.record(HwEvent::FloorRequested(frequency_mhz));
        Ok(())
    }

    fn release_performance_floor(&self) {
        self.record(HwEvent::FloorReleased);
    }
}

impl ReadyIndicator for SimulatedGpu {
    fn is_stable(&self) -> bool {
        self.ready_polls.fetch_add(1, Ordering::AcqRel);
        if self.never_settles {
            return false;
        }
        let remaining = self
            .pending_polls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
            .map(|previous| previous - 1)
            .unwrap_or(0);
        remaining == 0
    }
}

impl ChipBinSource for SimulatedGpu {
    fn chip_bin(&self) -> ChipBin {
        ChipBin::from_raw(self.asv_raw)
    }
}
