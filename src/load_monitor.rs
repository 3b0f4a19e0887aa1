use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::error::{DvfsError, Result};

/// Sliding average of GPU load readings, exposed as a 0..=255 utilization.
pub struct LoadMonitor {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LoadMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Adds a load reading in percent; values outside 0..=100 are clamped.
    pub fn add_sample(&mut self, load_percent: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(load_percent.clamp(0.0, 100.0));
    }

    pub fn load_percent(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn utilization(&self) -> u8 {
        (self.load_percent() * 255.0 / 100.0).round() as u8
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }
}

/// A file holding the current GPU load as a percentage, as written by GPU
/// load sensor daemons (`"45\n"`).
pub struct LoadFile {
    path: PathBuf,
}

impl LoadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_percent(&self) -> Result<f64> {
        let content = std::fs::read_to_string(&self.path)?;
        let value = content.trim();
        value.parse::<f64>().map_err(|_| {
            DvfsError::InvalidConfig(format!(
                "{} does not contain a load percentage: {value:?}",
                self.path.display()
            ))
        })
    }
}
