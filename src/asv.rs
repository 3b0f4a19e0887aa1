//! Voltage calibration from the chip's ASV bin.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::error::{DvfsError, Result};
use crate::hw::ChipBinSource;
use crate::table::DvfsTable;

/// Per-chip classification read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipBin {
    pub group: u8,
    pub tier: u8,
}

impl ChipBin {
    /// Decodes the raw ASV result word: group in bits 0..4, supported
    /// frequency tier in bits 28..32.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            group: (raw & 0xf) as u8,
            tier: (raw >> 28) as u8,
        }
    }
}

/// Voltages for one tier, one row per bin group, one column per level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinTable {
    pub tier: u8,
    pub rows: Vec<Vec<u32>>,
}

/// The calibration tables available on a board. Empty when ASV is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinTableSet {
    tables: Vec<BinTable>,
}

impl BinTableSet {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Every row must carry exactly one voltage per level.
    pub fn new(tables: Vec<BinTable>, levels: usize) -> Result<Self> {
        for table in &tables {
            if let Some((group, row)) = table
                .rows
                .iter()
                .enumerate()
                .find(|(_, row)| row.len() != levels)
            {
                return Err(DvfsError::InvalidConfig(format!(
                    "asv tier {} group {group} has {} voltages, expected {levels}",
                    table.tier,
                    row.len()
                )));
            }
        }
        Ok(Self { tables })
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn for_tier(&self, tier: u8) -> Option<&BinTable> {
        self.tables.iter().find(|t| t.tier == tier)
    }
}

pub struct VoltageBinSelector {
    tables: BinTableSet,
    source: Arc<dyn ChipBinSource>,
    applied: AtomicBool,
}

impl VoltageBinSelector {
    pub fn new(tables: BinTableSet, source: Arc<dyn ChipBinSource>) -> Self {
        Self {
            tables,
            source,
            applied: AtomicBool::new(false),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }

    /// Rewrites the table voltages for this chip. Only the first call does
    /// anything; it returns the bin it calibrated for, if any.
    pub fn apply(&self, table: &DvfsTable) -> Option<ChipBin> {
        if self
            .applied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        if self.tables.is_empty() {
            return None;
        }

        let bin = self.source.chip_bin();
        info!(group = bin.group, tier = bin.tier, "chip ASV classification");

        let Some(bin_table) = self.tables.for_tier(bin.tier) else {
            warn!(tier = bin.tier, "no voltage table for this tier, keeping defaults");
            return None;
        };
        let Some(row) = bin_table.rows.get(usize::from(bin.group)) else {
            warn!(
                group = bin.group,
                groups = bin_table.rows.len(),
                "ASV group outside the voltage table, keeping defaults"
            );
            return None;
        };

        for (step, voltage) in row.iter().enumerate().take(table.len()) {
            table.point(step).set_voltage_uv(*voltage);
            info!(step, voltage_uv = voltage, "calibrated level voltage");
        }
        Some(bin)
    }
}
