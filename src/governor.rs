//! Single-worker front end of the engine.
//!
//! Utilization reports land in a one-slot mailbox where the newest sample
//! replaces any sample the worker has not picked up yet. The worker runs one
//! tick at a time, so at most one transition is ever in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};
use watch::{WatchReceiver, WatchSender};

use crate::engine::Engine;
use crate::error::{DvfsError, Result};
use crate::status::GovernorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mailbox {
    Empty,
    Sample(u8),
    Stop,
}

pub struct Governor {
    engine: Arc<Engine>,
    sender: Mutex<Option<WatchSender<Mailbox>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
}

fn unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Governor {
    /// Calibrates and parks the hardware, then starts the worker. Reports
    /// are accepted only once calibration is done.
    pub fn start(engine: Engine) -> Result<Self> {
        if let Err(e) = engine.initialize() {
            warn!("initial transition failed: {e}");
        }

        let engine = Arc::new(engine);
        let running = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let (send, recv) = watch::channel(Mailbox::Empty);

        let worker = {
            let engine = engine.clone();
            let running = running.clone();
            let ticks = ticks.clone();
            thread::Builder::new()
                .name("mali-dvfs".to_string())
                .spawn(move || worker_loop(recv, &engine, &running, &ticks))?
        };
        info!("governor worker started");

        Ok(Self {
            engine,
            sender: Mutex::new(Some(send)),
            worker: Mutex::new(Some(worker)),
            running,
            ticks,
        })
    }

    /// Queues a sample for the worker, replacing any sample still waiting.
    pub fn report_utilization(&self, sample: u8) -> Result<()> {
        match unpoisoned(&self.sender).as_ref() {
            Some(sender) => {
                sender.send(Mailbox::Sample(sample));
                Ok(())
            }
            None => Err(DvfsError::ShutDown),
        }
    }

    pub fn push_bottom_lock(&self, step: usize) -> Result<i32> {
        self.engine.push_bottom_lock(step)
    }

    pub fn pop_bottom_lock(&self) -> Result<i32> {
        self.engine.pop_bottom_lock()
    }

    pub fn notify_resume(&self, step: usize) -> Result<()> {
        self.engine.notify_resume(step)
    }

    pub fn late_resume(&self) -> Result<()> {
        self.engine.late_resume()
    }

    /// True while the worker is inside a tick.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of ticks the worker has completed.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn status(&self) -> GovernorStatus {
        GovernorStatus {
            running: self.is_running(),
            ..self.engine.status()
        }
    }

    /// Stops taking reports, lets the tick in flight finish and joins the
    /// worker. A sample still waiting in the mailbox is dropped.
    pub fn shutdown(&self) {
        if let Some(sender) = unpoisoned(&self.sender).take() {
            sender.send(Mailbox::Stop);
        }
        if let Some(worker) = unpoisoned(&self.worker).take() {
            if worker.join().is_err() {
                error!("governor worker panicked");
            } else {
                info!("governor worker stopped");
            }
        }
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut recv: WatchReceiver<Mailbox>,
    engine: &Engine,
    running: &AtomicBool,
    ticks: &AtomicU64,
) {
    loop {
        match recv.wait() {
            Mailbox::Empty => continue,
            Mailbox::Stop => break,
            Mailbox::Sample(utilization) => {
                running.store(true, Ordering::Release);
                match engine.advance(utilization) {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => {
                        warn!(utilization, "governor tick failed, retrying on the next sample: {e}")
                    }
                    Err(e) => error!(utilization, "governor tick failed: {e}"),
                }
                running.store(false, Ordering::Release);
                ticks.fetch_add(1, Ordering::AcqRel);
                debug!(step = engine.current_step(), "tick done");
            }
        }
    }
}
