use acelink_core::device::SlotOverride;
use acelink_core::mock::MockPrinter;
use acelink_core::protocol::{Command, DeviceError};
use acelink_core::sim::SimulatedAce;
use acelink_core::{Ace, AceConfig, AceError, AceEvent};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::{Duration, Instant};

/// Driver wired to a simulator, ticked on a virtual clock
struct Bench {
    ace: Ace,
    sim: SimulatedAce,
    printer: MockPrinter,
    now: Instant,
    events: Vec<AceEvent>,
}

impl Bench {
    fn new() -> Self {
        let sim = SimulatedAce::default();
        let printer = MockPrinter::new();
        let mut config = AceConfig::default();
        config.timing.backoff_unit_ms = 0;
        let ace = Ace::new(config, Box::new(sim.connector()), printer.host()).unwrap();
        Self {
            ace,
            sim,
            printer,
            now: Instant::now(),
            events: Vec::new(),
        }
    }

    /// Connected, banner and first status received
    fn online() -> Self {
        let mut bench = Self::new();
        bench.ace.connect().unwrap();
        bench.ticks(2);
        bench
    }

    fn tick(&mut self) -> Duration {
        let report = self.ace.tick(self.now);
        self.ace.run_deferred();
        self.events.extend(report.events);
        self.now += Duration::from_millis(500);
        report.next_in
    }

    fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }
}

#[test]
fn test_connect_reports_banner_and_status() {
    let bench = Bench::online();

    assert_eq!(
        bench.events,
        vec![AceEvent::Connected {
            model: "Anycubic Color Engine Pro".into(),
            firmware: "V1.3.84".into(),
        }]
    );
    let info = bench.ace.mirror().info().unwrap();
    assert_eq!(info.firmware, "V1.3.84");

    let status = bench.ace.get_status_snapshot();
    assert!(status.is_ready());
    assert!(status.slots.iter().all(|slot| slot.is_ready()));
    assert_eq!(status.slots[2].material, "PLA");
    assert!(bench.ace.mirror().last_update().is_some());
}

#[test]
fn test_idle_interval_between_heartbeats() {
    let mut bench = Bench::online();
    let before = bench.sim.request_count();
    let next = bench.tick();

    assert_eq!(next, Duration::from_millis(500));
    assert_eq!(bench.sim.request_count(), before + 1);
    assert_eq!(bench.sim.methods().last().map(String::as_str), Some("get_status"));
}

#[test]
fn test_drying_round_trip() {
    let mut bench = Bench::online();
    bench.ace.start_drying(45, Some(60)).unwrap();
    bench.ticks(2);

    assert!(bench.events.contains(&AceEvent::DryingStarted));
    assert!(bench.sim.commands().contains(&Command::StartDrying {
        temp: 45,
        fan_speed: 7000,
        duration: 60,
    }));
    let dryer = bench.ace.get_status_snapshot().dryer;
    assert_eq!(dryer.status, "drying");
    assert_eq!(dryer.duration, 60);

    bench.ace.stop_drying().unwrap();
    bench.ticks(2);
    assert!(bench.events.contains(&AceEvent::DryingStopped));
    assert_eq!(bench.ace.get_status_snapshot().dryer.status, "stop");
}

#[test]
fn test_default_drying_duration() {
    let mut bench = Bench::online();
    bench.ace.start_drying(50, None).unwrap();
    bench.tick();

    assert!(bench.sim.commands().contains(&Command::StartDrying {
        temp: 50,
        fan_speed: 7000,
        duration: 240,
    }));
}

#[test]
fn test_device_error_is_reported_not_fatal() {
    let mut bench = Bench::online();
    bench.sim.inject_error("drying", 2, "dryer fault");
    bench.ace.start_drying(50, None).unwrap();
    bench.ticks(2);

    assert!(bench.events.contains(&AceEvent::DeviceError(DeviceError {
        method: "drying".into(),
        code: 2,
        msg: "dryer fault".into(),
    })));
    assert!(!bench.events.contains(&AceEvent::DryingStarted));
    assert!(bench.ace.is_connected());
    assert_eq!(bench.printer.pause.triggers(), 0);
}

#[test]
fn test_manual_feed_and_retract() {
    let mut bench = Bench::online();
    bench.ace.feed(1, 30, None).unwrap();
    bench.ace.retract(1, 30, Some(20)).unwrap();
    bench.ticks(3);

    assert_eq!(
        bench.sim.commands()[1..].to_vec(),
        vec![
            Command::Feed {
                index: 1,
                length: 30,
                speed: 50
            },
            Command::Unwind {
                index: 1,
                length: 30,
                speed: 20
            },
        ]
    );
    assert!(bench.events.contains(&AceEvent::Fed {
        index: 1,
        length: 30
    }));
    assert!(bench.events.contains(&AceEvent::Retracted {
        index: 1,
        length: 30
    }));
}

#[test]
fn test_feed_assist_toggle() {
    let mut bench = Bench::online();
    bench.ace.enable_feed_assist(3).unwrap();
    bench.tick();
    assert_eq!(bench.sim.feed_assist(), Some(3));
    assert_eq!(bench.ace.router().active_assist(), Some(3));

    // no index: stops the running slot
    bench.ace.disable_feed_assist(None).unwrap();
    bench.tick();
    assert_eq!(bench.sim.feed_assist(), None);
    assert_eq!(bench.ace.router().active_assist(), None);
    assert!(bench.events.contains(&AceEvent::FeedAssistDisabled { index: 3 }));
}

#[test]
fn test_lost_answer_reconnects_and_resumes_assist() {
    let mut bench = Bench::online();
    bench.ace.enable_feed_assist(2).unwrap();
    bench.tick();
    assert!(bench.events.contains(&AceEvent::FeedAssistEnabled { index: 2 }));

    bench.sim.drop_responses(1);
    let next = bench.tick();
    assert!(bench.events.contains(&AceEvent::LinkLost { abandoned: 1 }));
    assert!(!bench.ace.is_connected());
    assert_eq!(next, Duration::from_millis(1000));

    bench.events.clear();
    bench.tick();
    assert_eq!(
        bench.events,
        vec![
            AceEvent::Reconnected,
            AceEvent::FeedAssistEnabled { index: 2 }
        ]
    );
    assert_eq!(bench.sim.opens(), 2);
    let starts = bench
        .sim
        .commands()
        .into_iter()
        .filter(|c| *c == Command::StartFeedAssist { index: 2 })
        .count();
    assert_eq!(starts, 2);
}

#[test]
fn test_wrong_id_drops_link() {
    let mut bench = Bench::online();
    bench.sim.wrong_id_responses(1);
    bench.tick();

    assert!(bench.events.contains(&AceEvent::LinkLost { abandoned: 1 }));
    assert!(bench.ace.dispatcher().is_degraded());

    bench.tick();
    assert!(bench.ace.is_connected());
    assert!(!bench.ace.dispatcher().is_degraded());
}

#[test]
fn test_debug_request_echo() {
    let mut bench = Bench::online();
    bench.ace.debug_request("echo", r#"{"probe": 7}"#).unwrap();
    bench.ace.debug_request("self_destruct", "{}").unwrap();
    bench.ticks(2);

    let responses: Vec<_> = bench
        .events
        .iter()
        .filter_map(|e| match e {
            AceEvent::DebugResponse { method, response } => Some((method.as_str(), response)),
            _ => None,
        })
        .collect();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].0, "echo");
    assert_eq!(responses[0].1["result"], json!({ "probe": 7 }));
    assert_eq!(responses[1].0, "self_destruct");
    assert_eq!(responses[1].1["code"], json!(-1));
}

#[test]
fn test_oversized_debug_request_discarded() {
    let mut bench = Bench::online();
    let before = bench.sim.request_count();
    let params = format!(r#"{{"blob": "{}"}}"#, "x".repeat(5000));
    bench.ace.debug_request("echo", &params).unwrap();

    bench.tick();
    assert_eq!(bench.sim.request_count(), before);
    assert_eq!(bench.ace.pending_commands(), 0);
    assert!(bench.ace.is_connected());
    assert!(!bench
        .events
        .iter()
        .any(|e| matches!(e, AceEvent::DebugResponse { .. })));

    // the link carries on with heartbeats
    bench.tick();
    assert_eq!(bench.sim.request_count(), before + 1);
    assert_eq!(bench.sim.methods().last().map(String::as_str), Some("get_status"));
}

#[test]
fn test_slot_override_in_snapshot() {
    let mut bench = Bench::online();
    bench
        .ace
        .set_slot_override(
            1,
            &SlotOverride {
                material: Some("PETG".into()),
                color: Some([10, 20, 30]),
                ..SlotOverride::default()
            },
        )
        .unwrap();

    let status = bench.ace.get_status_snapshot();
    assert_eq!(status.slots[1].material, "PETG");
    assert_eq!(status.slots[1].color, [10, 20, 30]);
    // the mirror itself keeps what the device said
    assert_eq!(bench.ace.mirror().status().slots[1].material, "PLA");
    assert!(matches!(
        bench.ace.set_slot_override(9, &SlotOverride::default()),
        Err(AceError::InvalidArgument(_))
    ));
}

#[test]
fn test_shutdown_drops_queue() {
    let mut bench = Bench::online();
    bench.ace.feed(0, 10, None).unwrap();
    assert_eq!(bench.ace.pending_commands(), 1);

    bench.ace.shutdown();
    assert!(!bench.ace.is_connected());
    assert_eq!(bench.ace.pending_commands(), 0);
}
