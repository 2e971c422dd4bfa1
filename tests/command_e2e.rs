use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aquaflow::bridge::{BridgeEvent, BridgeFlag, StateBridge};
use aquaflow::{Meter, MeterConfig, MeterRuntime, Phase, TickOutcome, UNKNOWN_RESPONSE};

fn fast_meter(seed: u64) -> Arc<Meter> {
    let mut cfg = MeterConfig::default();
    cfg.tick_interval_ms = 1;
    Arc::new(Meter::builder(cfg).seed(seed).build().unwrap())
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn unknown_command_leaves_state_unchanged() {
    let meter = fast_meter(1);
    meter.handle_line("make a leak");
    meter.observe(3.0).unwrap();
    let before = meter.snapshot();
    let history = meter.history();

    assert_eq!(meter.handle_line("reboot"), UNKNOWN_RESPONSE);
    assert_eq!(meter.snapshot(), before);
    assert_eq!(meter.history(), history);
}

#[test]
fn force_shutoff_and_resume_from_every_phase() {
    let meter = fast_meter(2);
    meter.handle_line("make a leak");

    for steps in 0..8 {
        meter.handle_line("start water");
        for _ in 0..steps {
            meter.tick();
        }
        assert_eq!(meter.handle_line("stop water"), "Water manually shut off!");
        let s = meter.snapshot();
        assert!(s.water_shutoff);
        assert_eq!(s.phase, Phase::ShutOff);

        meter.handle_line("start water");
        let s = meter.snapshot();
        assert!(!s.water_shutoff);
        assert_eq!(s.consecutive_anomaly_count, 0);
        assert_eq!(s.phase, Phase::Normal);
    }
}

#[test]
fn status_reflects_counter() {
    let meter = fast_meter(3);
    meter.handle_line("make a leak");
    meter.observe(2.5).unwrap();
    meter.observe(2.5).unwrap();
    assert_eq!(meter.handle_line("  STATUS "), "Status - Leak: true, Shutoff: false, Counter: 2");
}

#[test]
fn concurrent_clients_and_sampler_keep_invariants() {
    let meter = fast_meter(4);
    let violations = Arc::new(AtomicBool::new(false));
    let bound = meter.config().max_response_ticks();

    let sink_violations = Arc::clone(&violations);
    let sink = move |out: &TickOutcome| {
        let s = out.snapshot;
        let zero_when_shut = out.reading.map_or(true, |r| !s.water_shutoff || r.value == 0.0);
        let counter_ok = s.consecutive_anomaly_count <= bound && (!s.water_shutoff || s.consecutive_anomaly_count == 0);
        if !counter_ok || !zero_when_shut {
            sink_violations.store(true, Ordering::SeqCst);
        }
    };
    let runtime = MeterRuntime::start(Arc::clone(&meter), vec![Box::new(sink)]).unwrap();

    let clients: Vec<_> = (0..4)
        .map(|i| {
            let meter = Arc::clone(&meter);
            thread::spawn(move || {
                let script = ["make a leak", "status", "stop water", "start water", "stop leak", "bogus"];
                for round in 0..200 {
                    let cmd = script[(round + i) % script.len()];
                    let response = meter.handle_line(cmd);
                    assert!(!response.is_empty());
                    if round % 16 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        })
        .collect();
    for c in clients {
        c.join().unwrap();
    }

    meter.handle_line("stop leak");
    meter.handle_line("start water");
    assert!(wait_until(Duration::from_secs(5), || meter.snapshot().phase == Phase::Normal));
    runtime.shutdown();

    assert!(!violations.load(Ordering::SeqCst));
}

#[test]
fn sustained_leak_shuts_off_under_runtime() {
    let meter = fast_meter(5);
    let runtime = MeterRuntime::start(Arc::clone(&meter), Vec::new()).unwrap();
    meter.handle_line("make a leak");
    assert!(wait_until(Duration::from_secs(5), || meter.snapshot().water_shutoff));
    runtime.shutdown();
    assert_eq!(meter.snapshot().phase, Phase::ShutOff);
}

#[test]
fn bridge_shutoff_resolves_grace_period() {
    let meter = fast_meter(6);
    let bridge = StateBridge::start(Arc::clone(&meter), 8).unwrap();

    meter.handle_line("make a leak");
    for _ in 0..5 {
        meter.observe(4.0).unwrap();
    }
    assert_eq!(meter.snapshot().phase, Phase::GracePeriod);

    assert!(bridge.sender().push(BridgeEvent::new(BridgeFlag::Shutoff, true)));
    assert!(wait_until(Duration::from_secs(5), || meter.snapshot().water_shutoff));
    bridge.shutdown();

    let s = meter.snapshot();
    assert_eq!(s.phase, Phase::ShutOff);
    assert_eq!(s.consecutive_anomaly_count, 0);
    assert!(meter.tick().reading.is_some_and(|r| r.value == 0.0));
}

#[test]
fn bridge_leak_clear_resolves_at_check_in() {
    let meter = fast_meter(7);
    meter.handle_line("make a leak");
    for _ in 0..5 {
        meter.observe(4.0).unwrap();
    }
    meter.apply_bridge_event(BridgeEvent::new(BridgeFlag::Leak, false));
    assert_eq!(meter.snapshot().phase, Phase::GracePeriod);

    meter.tick();
    let s = meter.snapshot();
    assert_eq!(s.phase, Phase::Normal);
    assert_eq!(s.consecutive_anomaly_count, 0);
    assert!(!s.water_shutoff);
}
