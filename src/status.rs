use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Snapshot of the governor for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub current_step: usize,
    pub hysteresis_level: usize,
    pub frequency_mhz: u32,
    pub voltage_uv: u32,
    pub stay_counter: u32,
    pub bottom_lock_depth: i32,
    pub floor_step: usize,
    pub performance_floor_held: bool,
    pub running: bool,
}

/// JSON status file, replaced atomically on every write.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<cache>/mali-dvfs-governor/status.json`, or under /tmp without a
    /// cache directory.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        path.push("mali-dvfs-governor");
        path.push("status.json");
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, status: &GovernorStatus) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(status).map_err(std::io::Error::other)?;

        // write to a temporary file, then rename over the old one
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GovernorStatus {
        GovernorStatus {
            current_step: 2,
            hysteresis_level: 3,
            frequency_mhz: 267,
            voltage_uv: 1_000_000,
            stay_counter: 1,
            bottom_lock_depth: 0,
            floor_step: 0,
            performance_floor_held: false,
            running: true,
        }
    }

    #[test]
    fn writes_readable_json_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let file = StatusFile::new(dir.path().join("nested").join("status.json"));

        file.write(&sample()).unwrap();

        let content = fs::read_to_string(file.path()).unwrap();
        let read: GovernorStatus = serde_json::from_str(&content).unwrap();
        assert_eq!(read, sample());
        assert!(!dir.path().join("nested").join("status.json.tmp").exists());
    }
}
