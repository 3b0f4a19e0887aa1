//! The level state machine: decision, damping, bottom lock and transitions
//! behind a single state lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::asv::VoltageBinSelector;
use crate::bottom_lock::BottomLock;
use crate::config::GovernorConfig;
use crate::coupling::CouplingGate;
use crate::decision::DecisionEngine;
use crate::error::Result;
use crate::executor::TransitionExecutor;
use crate::hw::Hardware;
use crate::status::GovernorStatus;
use crate::table::DvfsTable;

#[derive(Debug)]
struct DvfsState {
    current_step: usize,
    decision: DecisionEngine,
    stay_counter: u32,
    initialized: bool,
}

pub struct Engine {
    table: DvfsTable,
    state: Mutex<DvfsState>,
    bottom_lock: BottomLock,
    coupling: Arc<CouplingGate>,
    executor: TransitionExecutor,
    calibration: VoltageBinSelector,
}

impl Engine {
    pub fn new(config: GovernorConfig, hw: Hardware) -> Result<Self> {
        let GovernorConfig {
            table,
            bin_tables,
            coupling,
            stabilization,
            initial_step,
        } = config;
        table.check_step(initial_step)?;

        let gate = Arc::new(CouplingGate::new(
            hw.floor.clone(),
            u64::from(coupling.threshold_mhz) * 1_000_000,
            coupling.floor_mhz,
        ));
        let state = DvfsState {
            current_step: initial_step,
            decision: DecisionEngine::new(table.len(), initial_step),
            stay_counter: 0,
            initialized: false,
        };

        Ok(Self {
            executor: TransitionExecutor::new(&hw, gate.clone(), stabilization),
            calibration: VoltageBinSelector::new(bin_tables, hw.chip_bin.clone()),
            coupling: gate,
            bottom_lock: BottomLock::new(),
            state: Mutex::new(state),
            table,
        })
    }

    fn lock(&self) -> MutexGuard<'_, DvfsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn table(&self) -> &DvfsTable {
        &self.table
    }

    /// Calibrates the voltage table and parks the hardware at the lowest
    /// allowed level. Runs once; later calls do nothing.
    pub fn initialize(&self) -> Result<()> {
        let mut st = self.lock();
        self.initialize_locked(&mut st)
    }

    fn initialize_locked(&self, st: &mut DvfsState) -> Result<()> {
        if st.initialized {
            return Ok(());
        }
        self.calibration.apply(&self.table);
        st.initialized = true;

        let target = self.bottom_lock.active_floor().unwrap_or(0);
        let boost = target > st.current_step;
        let result = self
            .executor
            .apply(&self.table, &mut st.current_step, target, boost);
        st.decision.sync_to(st.current_step);
        info!(step = st.current_step, "governor initialized");
        result
    }

    /// One governor tick for a utilization sample in 0..=255.
    pub fn advance(&self, utilization: u8) -> Result<()> {
        let mut st = self.lock();
        if !st.initialized {
            return self.initialize_locked(&mut st);
        }

        let current = st.current_step;
        let saved_level = st.decision.hysteresis_level();
        let saved_resume = st.decision.pending_resume();
        let next = st.decision.decide(
            utilization,
            current,
            &self.table,
            &self.bottom_lock,
            &self.coupling,
        );
        debug!(utilization, current, next, stay = st.stay_counter, "decision");

        if next != current && st.stay_counter == 0 {
            let boost = next > current;
            let result = self
                .executor
                .apply(&self.table, &mut st.current_step, next, boost);
            if st.current_step == next {
                st.stay_counter = self.table.stay_count(next);
            } else {
                st.decision.sync_to(saved_level);
                if let Some(step) = saved_resume {
                    st.decision.set_pending_resume(step);
                }
            }
            result
        } else {
            if st.stay_counter > 0 {
                st.stay_counter -= 1;
            }
            Ok(())
        }
    }

    /// Holds the level at or above `step` until the matching pop. Returns
    /// the number of outstanding locks.
    pub fn push_bottom_lock(&self, step: usize) -> Result<i32> {
        self.table.check_step(step)?;
        let mut st = self.lock();
        let depth = self.bottom_lock.push(step)?;
        let floor = self.bottom_lock.floor_step();
        debug!(step, floor, depth, "bottom lock pushed");

        if st.initialized && st.current_step < floor {
            if let Err(e) = self
                .executor
                .apply(&self.table, &mut st.current_step, floor, true)
            {
                warn!("forced transition to bottom lock level {floor} failed: {e}");
            }
            if st.current_step == floor {
                st.decision.sync_to(floor);
                st.stay_counter = self.table.stay_count(floor);
            }
        }
        Ok(depth)
    }

    /// Releases one bottom lock. The level is not lowered here; later ticks
    /// decay it through hysteresis.
    pub fn pop_bottom_lock(&self) -> Result<i32> {
        let _st = self.lock();
        let depth = self.bottom_lock.pop()?;
        debug!(depth, "bottom lock popped");
        Ok(depth)
    }

    /// The next tick jumps straight to `step`.
    pub fn notify_resume(&self, step: usize) -> Result<()> {
        self.table.check_step(step)?;
        self.lock().decision.set_pending_resume(step);
        Ok(())
    }

    /// Drops to the lowest allowed level right away, used when the display
    /// comes back from suspend.
    pub fn late_resume(&self) -> Result<()> {
        let mut st = self.lock();
        let target = self.bottom_lock.active_floor().unwrap_or(0);
        let boost = target > st.current_step;
        let result = self
            .executor
            .apply(&self.table, &mut st.current_step, target, boost);
        if st.current_step == target {
            st.decision.sync_to(target);
        }
        result
    }

    pub fn current_step(&self) -> usize {
        self.lock().current_step
    }

    pub fn hysteresis_level(&self) -> usize {
        self.lock().decision.hysteresis_level()
    }

    pub fn stay_counter(&self) -> u32 {
        self.lock().stay_counter
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn bottom_lock_depth(&self) -> i32 {
        self.bottom_lock.depth()
    }

    pub fn floor_step(&self) -> usize {
        self.bottom_lock.floor_step()
    }

    pub fn status(&self) -> GovernorStatus {
        let st = self.lock();
        let point = self.table.point(st.current_step);
        GovernorStatus {
            current_step: st.current_step,
            hysteresis_level: st.decision.hysteresis_level(),
            frequency_mhz: point.frequency_mhz(),
            voltage_uv: point.voltage_uv(),
            stay_counter: st.stay_counter,
            bottom_lock_depth: self.bottom_lock.depth(),
            floor_step: self.bottom_lock.floor_step(),
            performance_floor_held: self.coupling.is_held(),
            running: false,
        }
    }
}
