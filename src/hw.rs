//! Hardware collaborators the governor drives.
//!
//! The register-level drivers live outside this crate. The engine only sees
//! these traits, so a board without a controllable regulator or without a
//! CPU floor simply plugs in the no-op implementations below.

use std::sync::Arc;

use crate::asv::ChipBin;
use crate::error::Result;

pub trait ClockControl: Send + Sync {
    fn set_clock(&self, frequency_hz: u64) -> Result<()>;
}

pub trait VoltageControl: Send + Sync {
    fn set_voltage(&self, min_uv: u32, target_uv: u32) -> Result<()>;

    /// Number of active users of the regulator; 0 means it is not ready.
    fn regulator_usage_count(&self) -> u32;
}

/// External performance floor coupled to the accelerator level
/// (typically a CPU frequency lock).
pub trait PerformanceFloor: Send + Sync {
    fn request_performance_floor(&self, frequency_mhz: u32) -> Result<()>;
    fn release_performance_floor(&self);
}

pub trait ReadyIndicator: Send + Sync {
    /// True once clock and voltage have settled.
    fn is_stable(&self) -> bool;
}

pub trait ChipBinSource: Send + Sync {
    fn chip_bin(&self) -> ChipBin;
}

/// Used when the board has no software-controlled regulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedVoltage;

impl VoltageControl for FixedVoltage {
    fn set_voltage(&self, _min_uv: u32, _target_uv: u32) -> Result<()> {
        Ok(())
    }

    fn regulator_usage_count(&self) -> u32 {
        1
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPerformanceFloor;

impl PerformanceFloor for NoPerformanceFloor {
    fn request_performance_floor(&self, _frequency_mhz: u32) -> Result<()> {
        Ok(())
    }

    fn release_performance_floor(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysStable;

impl ReadyIndicator for AlwaysStable {
    fn is_stable(&self) -> bool {
        true
    }
}

/// Every collaborator the engine talks to.
#[derive(Clone)]
pub struct Hardware {
    pub clock: Arc<dyn ClockControl>,
    pub voltage: Arc<dyn VoltageControl>,
    pub floor: Arc<dyn PerformanceFloor>,
    pub ready: Arc<dyn ReadyIndicator>,
    pub chip_bin: Arc<dyn ChipBinSource>,
}

impl Hardware {
    /// Uses one object for every role, as a simulated or fully integrated
    /// backend does.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ClockControl
            + VoltageControl
            + PerformanceFloor
            + ReadyIndicator
            + ChipBinSource
            + 'static,
    {
        Self {
            clock: backend.clone(),
            voltage: backend.clone(),
            floor: backend.clone(),
            ready: backend.clone(),
            chip_bin: backend,
        }
    }
}
