use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use mali_dvfs_governor::{
    Config, Engine, Governor, Hardware,
    load_monitor::{LoadFile, LoadMonitor},
    sim::SimulatedGpu,
    status::StatusFile,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Keeps a repeating failure from flooding the log
struct LogThrottle {
    last_log: Option<Instant>,
    min_interval: Duration,
}

impl LogThrottle {
    fn new(min_interval_secs: u64) -> Self {
        Self {
            last_log: None,
            min_interval: Duration::from_secs(min_interval_secs),
        }
    }

    fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_log {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_log = Some(now);
                true
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = if config_path.exists() {
        info!("loading configuration from {}", config_path.display());
        Config::load(&config_path)?
    } else {
        info!(
            "{} not found, using the reference configuration",
            config_path.display()
        );
        Config::parse("")?
    };
    let daemon = config.daemon.clone();

    // no register-level driver in this build: drive the simulated accelerator
    let gpu = Arc::new(SimulatedGpu::new().with_asv_raw(daemon.asv_raw));
    let engine = Engine::new(config.governor, Hardware::from_backend(gpu.clone()))?;
    let governor = Governor::start(engine)?;

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        info!("stopping governor");
        s.store(true, Ordering::SeqCst);
    })?;

    let source = LoadFile::new(&daemon.load_source);
    let status_file = StatusFile::new(&daemon.status_file);
    let mut monitor = LoadMonitor::new(daemon.window_samples);
    let mut read_errors = LogThrottle::new(60);
    let mut write_errors = LogThrottle::new(60);
    info!(
        source = %source.path().display(),
        status = %status_file.path().display(),
        interval = ?daemon.sample_interval,
        "governor running"
    );

    while !stop.load(Ordering::SeqCst) {
        match source.read_percent() {
            Ok(load) => {
                monitor.add_sample(load);
                governor.report_utilization(monitor.utilization())?;
            }
            Err(e) => {
                if read_errors.should_log() {
                    warn!("cannot read GPU load: {e}");
                }
            }
        }

        if let Err(e) = status_file.write(&governor.status()) {
            if write_errors.should_log() {
                warn!("cannot write status file: {e}");
            }
        }

        std::thread::sleep(daemon.sample_interval);
    }

    governor.shutdown();
    let status = governor.status();
    info!(
        step = status.current_step,
        frequency_mhz = gpu.clock_hz() / 1_000_000,
        voltage_uv = gpu.voltage_uv(),
        "governor stopped"
    );
    Ok(())
}
