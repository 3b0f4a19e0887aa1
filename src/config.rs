//! TOML configuration.
//!
//! Every section is optional. Missing or out-of-range scalars fall back to
//! their defaults with a log line naming the key; a malformed level or ASV
//! table is an error.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::asv::{BinTable, BinTableSet};
use crate::constants;
use crate::error::{DvfsError, Result};
use crate::executor::StabilizationPolicy;
use crate::status::StatusFile;
use crate::table::{DvfsTable, Level, OperatingPoint, ThresholdEntry};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    levels: Option<Vec<RawLevel>>,
    coupling: Option<RawCoupling>,
    stabilization: Option<RawStabilization>,
    asv: Option<RawAsv>,
    governor: Option<RawGovernor>,
    daemon: Option<RawDaemon>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawLevel {
    // MHz
    frequency: Option<u64>,
    // uV
    voltage: Option<u32>,
    // percent
    down: Option<u32>,
    up: Option<u32>,
    // ticks
    stay: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawCoupling {
    threshold: Option<u32>,
    floor: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawStabilization {
    timeout: Option<u64>,
    poll_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawAsv {
    enabled: Option<bool>,
    tables: Option<Vec<RawBinTable>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawBinTable {
    tier: u8,
    rows: Vec<Vec<u32>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawGovernor {
    initial_step: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDaemon {
    sample_interval: Option<u64>,
    load_source: Option<PathBuf>,
    window_samples: Option<usize>,
    status_file: Option<PathBuf>,
    asv_raw: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouplingConfig {
    pub threshold_mhz: u32,
    pub floor_mhz: u32,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            threshold_mhz: constants::COUPLING_THRESHOLD_MHZ,
            floor_mhz: constants::COUPLING_FLOOR_MHZ,
        }
    }
}

/// Everything the engine needs at construction.
#[derive(Debug)]
pub struct GovernorConfig {
    pub table: DvfsTable,
    pub bin_tables: BinTableSet,
    pub coupling: CouplingConfig,
    pub stabilization: StabilizationPolicy,
    pub initial_step: usize,
}

/// Settings of the standalone daemon around the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub sample_interval: Duration,
    pub load_source: PathBuf,
    pub window_samples: usize,
    pub status_file: PathBuf,
    pub asv_raw: u32,
}

#[derive(Debug)]
pub struct Config {
    pub governor: GovernorConfig,
    pub daemon: DaemonConfig,
}

fn missing<T: Display>(key: &str, default: T) -> T {
    info!("{key} is missing, replaced with the default of {default}");
    default
}

fn invalid<T: Display>(key: &str, reason: &str, default: T) -> T {
    warn!("{key} {reason}, replaced with the default of {default}");
    default
}

impl Config {
    /// `<config dir>/mali-dvfs-governor/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("/etc"));
        path.push("mali-dvfs-governor");
        path.push("config.toml");
        path
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;

        let table = match raw.levels {
            Some(levels) => parse_levels(levels)?,
            None => {
                info!("levels undefined, using the reference 4-level table");
                constants::default_table()
            }
        };

        let bin_tables = parse_asv(raw.asv.unwrap_or_default(), table.len())?;
        let coupling = parse_coupling(raw.coupling.unwrap_or_default());
        let stabilization = parse_stabilization(raw.stabilization.unwrap_or_default());

        let initial_step = match raw.governor.unwrap_or_default().initial_step {
            None => missing("governor.initial-step", 0),
            Some(step) if step >= table.len() => invalid(
                "governor.initial-step",
                "must be below the number of levels",
                0,
            ),
            Some(step) => step,
        };

        let daemon = parse_daemon(raw.daemon.unwrap_or_default());

        Ok(Self {
            governor: GovernorConfig {
                table,
                bin_tables,
                coupling,
                stabilization,
                initial_step,
            },
            daemon,
        })
    }
}

fn parse_levels(levels: Vec<RawLevel>) -> Result<DvfsTable> {
    let mut parsed = Vec::with_capacity(levels.len());
    for (i, l) in levels.into_iter().enumerate() {
        let frequency = l.frequency.ok_or_else(|| {
            DvfsError::InvalidConfig(format!("levels[{i}].frequency must exist"))
        })?;
        let voltage = l.voltage.ok_or_else(|| {
            DvfsError::InvalidConfig(format!("levels[{i}].voltage must exist"))
        })?;
        let down = l
            .down
            .ok_or_else(|| DvfsError::InvalidConfig(format!("levels[{i}].down must exist")))?;
        let up = l
            .up
            .ok_or_else(|| DvfsError::InvalidConfig(format!("levels[{i}].up must exist")))?;
        if down > 100 || up > 100 {
            return Err(DvfsError::InvalidConfig(format!(
                "levels[{i}] thresholds must be between 0 and 100"
            )));
        }
        if up <= down {
            warn!("levels[{i}].up is not above levels[{i}].down, the level will never change");
        }
        let stay = l.stay.unwrap_or_else(|| missing(&format!("levels[{i}].stay"), 0));

        let frequency_hz = frequency.checked_mul(1_000_000).ok_or_else(|| {
            DvfsError::InvalidConfig(format!("levels[{i}].frequency {frequency} MHz is too large"))
        })?;

        parsed.push(Level {
            point: OperatingPoint::new(frequency_hz, voltage),
            threshold: ThresholdEntry::new(down, up),
            stay_count: stay,
        });
    }
    DvfsTable::new(parsed)
}

fn parse_asv(raw: RawAsv, levels: usize) -> Result<BinTableSet> {
    let enabled = raw.enabled.unwrap_or_else(|| missing("asv.enabled", true));
    if !enabled {
        return Ok(BinTableSet::disabled());
    }
    match raw.tables {
        Some(tables) => BinTableSet::new(
            tables
                .into_iter()
                .map(|t| BinTable {
                    tier: t.tier,
                    rows: t.rows,
                })
                .collect(),
            levels,
        ),
        None if levels == constants::DEFAULT_LEVELS => Ok(constants::default_bin_tables()),
        None => {
            warn!("asv.tables undefined and the level table is not the reference one, ASV disabled");
            Ok(BinTableSet::disabled())
        }
    }
}

fn parse_coupling(raw: RawCoupling) -> CouplingConfig {
    let defaults = CouplingConfig::default();
    // MHz
    let threshold_mhz = raw
        .threshold
        .unwrap_or_else(|| missing("coupling.threshold", defaults.threshold_mhz));
    // MHz
    let floor_mhz = match raw.floor {
        None => missing("coupling.floor", defaults.floor_mhz),
        Some(0) => invalid("coupling.floor", "must be positive", defaults.floor_mhz),
        Some(v) => v,
    };
    CouplingConfig {
        threshold_mhz,
        floor_mhz,
    }
}

fn parse_stabilization(raw: RawStabilization) -> StabilizationPolicy {
    let defaults = StabilizationPolicy::default();
    let default_timeout = defaults.timeout.as_micros() as u64;
    let default_poll = defaults.poll_interval.as_micros() as u64;

    // us
    let timeout = match raw.timeout {
        None => missing("stabilization.timeout", default_timeout),
        Some(0) => invalid("stabilization.timeout", "must be positive", default_timeout),
        Some(v) => v,
    };
    // us
    let poll_interval = match raw.poll_interval {
        None => missing("stabilization.poll-interval", default_poll.min(timeout)),
        Some(0) => invalid(
            "stabilization.poll-interval",
            "must be positive",
            default_poll.min(timeout),
        ),
        Some(v) if v > timeout => invalid(
            "stabilization.poll-interval",
            "cannot be greater than stabilization.timeout",
            default_poll.min(timeout),
        ),
        Some(v) => v,
    };

    StabilizationPolicy {
        timeout: Duration::from_micros(timeout),
        poll_interval: Duration::from_micros(poll_interval),
    }
}

fn parse_daemon(raw: RawDaemon) -> DaemonConfig {
    // ms
    let sample_interval = match raw.sample_interval {
        None => missing("daemon.sample-interval", 100),
        Some(0) => invalid("daemon.sample-interval", "must be positive", 100),
        Some(v) => v,
    };
    let load_source = match raw.load_source {
        Some(path) => path,
        None => PathBuf::from(missing(
            "daemon.load-source",
            constants::DEFAULT_LOAD_SOURCE,
        )),
    };
    let window_samples = match raw.window_samples {
        None => missing("daemon.window-samples", 4),
        Some(0) => invalid("daemon.window-samples", "must be positive", 4),
        Some(v) => v,
    };
    let status_file = raw.status_file.unwrap_or_else(StatusFile::default_path);
    let asv_raw = raw.asv_raw.unwrap_or(0);

    DaemonConfig {
        sample_interval: Duration::from_millis(sample_interval),
        load_source,
        window_samples,
        status_file,
        asv_raw,
    }
}
