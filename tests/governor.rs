use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mali_dvfs_governor::{
    Config, Engine, Governor, Hardware,
    sim::{HwEvent, SimulatedGpu},
};

fn start(gpu: &Arc<SimulatedGpu>, config: &str) -> Governor {
    let config = Config::parse(config).unwrap();
    let engine = Engine::new(config.governor, Hardware::from_backend(gpu.clone())).unwrap();
    Governor::start(engine).unwrap()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn latest_report_wins_while_the_worker_is_busy() {
    // every transition waits out a 200 ms stabilization timeout
    let gpu = Arc::new(SimulatedGpu::new().never_settles());
    let gov = start(
        &gpu,
        "[stabilization]\ntimeout = 200000\npoll-interval = 1000\n",
    );
    gpu.take_events();

    gov.report_utilization(255).unwrap();
    assert!(wait_for(|| gpu.clock_hz() == 160_000_000));

    // the worker is still inside the first tick
    for i in 0..40u32 {
        let sample = if i % 2 == 0 { 0 } else { 10 };
        gov.report_utilization(sample).unwrap();
    }
    gov.report_utilization(255).unwrap();

    assert!(wait_for(|| gov.ticks() >= 2));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(gov.ticks(), 2);
    assert_eq!(gov.engine().current_step(), 2);
    assert_eq!(
        gpu.take_events(),
        vec![
            HwEvent::Voltage(950_000),
            HwEvent::Clock(160_000_000),
            HwEvent::Voltage(1_000_000),
            HwEvent::Clock(267_000_000),
        ]
    );
}

#[test]
fn bottom_lock_from_other_threads_holds_the_floor() {
    let gpu = Arc::new(SimulatedGpu::new());
    let gov = Arc::new(start(&gpu, ""));

    let pushers: Vec<_> = [1usize, 3, 2]
        .into_iter()
        .map(|step| {
            let gov = gov.clone();
            thread::spawn(move || gov.push_bottom_lock(step).unwrap())
        })
        .collect();
    for p in pushers {
        p.join().unwrap();
    }
    assert_eq!(gov.engine().bottom_lock_depth(), 3);
    assert_eq!(gov.engine().floor_step(), 3);
    assert_eq!(gov.engine().current_step(), 3);

    for sample in [0u8, 10, 0, 20, 0] {
        gov.report_utilization(sample).unwrap();
        thread::sleep(Duration::from_millis(2));
        assert!(gov.engine().current_step() >= 3);
    }

    for _ in 0..3 {
        gov.pop_bottom_lock().unwrap();
    }
    assert!(gov.pop_bottom_lock().is_err());
    assert_eq!(gov.engine().floor_step(), 0);

    gov.report_utilization(0).unwrap();
    assert!(wait_for(|| gov.engine().current_step() < 3));
}

#[test]
fn hardware_sees_safe_ordering_both_ways() {
    let gpu = Arc::new(SimulatedGpu::new());
    let gov = start(&gpu, "");
    gpu.take_events();

    gov.report_utilization(255).unwrap();
    assert!(wait_for(|| gov.engine().current_step() == 1));
    assert_eq!(
        gpu.take_events(),
        vec![HwEvent::Voltage(950_000), HwEvent::Clock(160_000_000)]
    );

    gov.report_utilization(50).unwrap();
    assert!(wait_for(|| gov.engine().current_step() == 0));
    assert_eq!(
        gpu.take_events(),
        vec![HwEvent::Clock(100_000_000), HwEvent::Voltage(900_000)]
    );
}

#[test]
fn status_reports_the_worker_state() {
    let gpu = Arc::new(SimulatedGpu::new());
    let gov = start(&gpu, "");
    gov.push_bottom_lock(3).unwrap();

    let status = gov.status();
    assert_eq!(status.current_step, 3);
    assert_eq!(status.frequency_mhz, 330);
    assert!(status.performance_floor_held);
    assert!(gpu.events().contains(&HwEvent::FloorRequested(800)));
}
