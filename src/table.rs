use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{DvfsError, Result};

/// One (frequency, voltage) pair of the level table.
///
/// The voltage is atomic because calibration rewrites it once, through a
/// shared reference, before the governor starts taking samples.
#[derive(Debug)]
pub struct OperatingPoint {
    frequency_hz: u64,
    voltage_uv: AtomicU32,
}

impl OperatingPoint {
    pub fn new(frequency_hz: u64, voltage_uv: u32) -> Self {
        Self {
            frequency_hz,
            voltage_uv: AtomicU32::new(voltage_uv),
        }
    }

    pub fn frequency_hz(&self) -> u64 {
        self.frequency_hz
    }

    pub fn frequency_mhz(&self) -> u32 {
        (self.frequency_hz / 1_000_000) as u32
    }

    pub fn voltage_uv(&self) -> u32 {
        self.voltage_uv.load(Ordering::Acquire)
    }

    pub(crate) fn set_voltage_uv(&self, voltage_uv: u32) {
        self.voltage_uv.store(voltage_uv, Ordering::Release);
    }
}

/// Utilization thresholds of one level, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdEntry {
    pub down_percent: u32,
    pub up_percent: u32,
}

impl ThresholdEntry {
    pub const fn new(down_percent: u32, up_percent: u32) -> Self {
        Self {
            down_percent,
            up_percent,
        }
    }

    /// A level whose up threshold does not exceed its down threshold never
    /// moves.
    pub fn is_frozen(&self) -> bool {
        self.up_percent <= self.down_percent
    }

    // utilization is 0..=255, thresholds are percentages of that range
    pub fn up_bound(&self) -> u32 {
        255 * self.up_percent / 100
    }

    pub fn down_bound(&self) -> u32 {
        255 * self.down_percent / 100
    }
}

#[derive(Debug)]
pub struct Level {
    pub point: OperatingPoint,
    pub threshold: ThresholdEntry,
    pub stay_count: u32,
}

/// Operating point, threshold and stay-count tables, indexed by level.
#[derive(Debug)]
pub struct DvfsTable {
    levels: Vec<Level>,
}

impl DvfsTable {
    /// Builds the table, requiring at least one level and frequencies that
    /// never decrease with the level index.
    pub fn new(levels: Vec<Level>) -> Result<Self> {
        if levels.is_empty() {
            return Err(DvfsError::InvalidConfig(
                "the level table must not be empty".to_string(),
            ));
        }
        for (i, pair) in levels.windows(2).enumerate() {
            if pair[1].point.frequency_hz() < pair[0].point.frequency_hz() {
                return Err(DvfsError::InvalidConfig(format!(
                    "level {} runs at {} Hz, slower than level {i} at {} Hz",
                    i + 1,
                    pair[1].point.frequency_hz(),
                    pair[0].point.frequency_hz(),
                )));
            }
        }
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn top(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, step: usize) -> &Level {
        &self.levels[step]
    }

    pub fn point(&self, step: usize) -> &OperatingPoint {
        &self.levels[step].point
    }

    pub fn threshold(&self, step: usize) -> ThresholdEntry {
        self.levels[step].threshold
    }

    pub fn stay_count(&self, step: usize) -> u32 {
        self.levels[step].stay_count
    }

    pub fn points(&self) -> impl Iterator<Item = &OperatingPoint> {
        self.levels.iter().map(|l| &l.point)
    }

    pub fn check_step(&self, step: usize) -> Result<usize> {
        if step < self.levels.len() {
            Ok(step)
        } else {
            Err(DvfsError::StepOutOfRange {
                step,
                levels: self.levels.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(mhz: u64, uv: u32) -> Level {
        Level {
            point: OperatingPoint::new(mhz * 1_000_000, uv),
            threshold: ThresholdEntry::new(10, 90),
            stay_count: 0,
        }
    }

    #[test]
    fn bounds_scale_percent_to_utilization_range() {
        let t = ThresholdEntry::new(62, 90);
        assert_eq!(t.down_bound(), 158);
        assert_eq!(t.up_bound(), 229);
        assert_eq!(ThresholdEntry::new(0, 70).up_bound(), 178);
    }

    #[test]
    fn frozen_when_up_not_above_down() {
        assert!(ThresholdEntry::new(85, 85).is_frozen());
        assert!(ThresholdEntry::new(90, 80).is_frozen());
        assert!(!ThresholdEntry::new(85, 90).is_frozen());
    }

    #[test]
    fn rejects_empty_and_decreasing_tables() {
        assert!(DvfsTable::new(Vec::new()).is_err());
        assert!(DvfsTable::new(vec![level(200, 900_000), level(100, 950_000)]).is_err());
        let table = DvfsTable::new(vec![level(100, 900_000), level(100, 950_000)]).unwrap();
        assert_eq!(table.top(), 1);
    }

    #[test]
    fn check_step_rejects_out_of_range() {
        let table = DvfsTable::new(vec![level(100, 900_000)]).unwrap();
        assert_eq!(table.check_step(0).unwrap(), 0);
        assert!(matches!(
            table.check_step(1),
            Err(DvfsError::StepOutOfRange { step: 1, levels: 1 })
        ));
    }
}
