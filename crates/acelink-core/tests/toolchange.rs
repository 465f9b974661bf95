use acelink_core::device::SlotState;
use acelink_core::mock::MockPrinter;
use acelink_core::persistence::{JsonFileStore, MemoryStore, VariableStore};
use acelink_core::protocol::Command;
use acelink_core::routing::{FilamentPosition, RouterState};
use acelink_core::sim::SimulatedAce;
use acelink_core::{Ace, AceConfig, AceError, AceEvent, Fault, Sensor};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct Bench {
    ace: Ace,
    sim: SimulatedAce,
    printer: MockPrinter,
    now: Instant,
    events: Vec<AceEvent>,
}

impl Bench {
    fn with(config: AceConfig, store: Box<dyn VariableStore>, sim: SimulatedAce) -> Self {
        let printer = MockPrinter::new();
        let host = printer.host_with_store(store);
        let mut ace = Ace::new(config, Box::new(sim.connector()), host).unwrap();
        ace.connect().unwrap();
        let mut bench = Self {
            ace,
            sim,
            printer,
            now: Instant::now(),
            events: Vec::new(),
        };
        bench.ticks(2);
        bench
    }

    fn new(config: AceConfig) -> Self {
        Self::with(config, Box::new(MemoryStore::new()), SimulatedAce::default())
    }

    /// Store preloaded with a tool sitting at `position`
    fn loaded(tool: u8, position: &str) -> Self {
        let mut store = MemoryStore::new();
        store.set("ace_current_index", json!(tool)).unwrap();
        store.set("ace_filament_pos", json!(position)).unwrap();
        Self::with(config(), Box::new(store), SimulatedAce::default())
    }

    fn tick(&mut self) {
        let report = self.ace.tick(self.now);
        self.ace.run_deferred();
        self.events.extend(report.events);
        self.now += Duration::from_millis(500);
    }

    fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    fn run_until_idle(&mut self, limit: usize) {
        for _ in 0..limit {
            if !self.ace.router().is_busy() {
                return;
            }
            self.tick();
        }
        panic!(
            "still busy after {} ticks: {}",
            limit,
            self.ace.router().state()
        );
    }

    fn faults(&self) -> Vec<&Fault> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AceEvent::Fault(fault) => Some(fault),
                _ => None,
            })
            .collect()
    }
}

fn config() -> AceConfig {
    let mut config = AceConfig::default();
    config.timing.backoff_unit_ms = 0;
    config
}

fn stored_routing(path: &Path) -> (serde_json::Value, serde_json::Value) {
    let store = JsonFileStore::open(path).unwrap();
    (
        store.get("ace_current_index").unwrap(),
        store.get("ace_filament_pos").unwrap(),
    )
}

#[test]
fn test_change_tool_loads_slot_to_nozzle() {
    let mut bench = Bench::new(config());
    bench.printer.extruder_sensor.set(true);
    bench.printer.toolhead_sensor.set(true);

    assert!(matches!(bench.ace.change_tool(Some(1)), Ok(true)));
    bench.run_until_idle(400);

    assert_eq!(bench.ace.router().state(), &RouterState::Idle);
    assert_eq!(bench.ace.router().active_tool(), Some(1));
    assert_eq!(bench.ace.router().position(), FilamentPosition::Nozzle);
    assert_eq!(
        bench.sim.commands(),
        vec![
            Command::GetInfo,
            Command::Feed {
                index: 1,
                length: 95,
                speed: 50
            },
            Command::StartFeedAssist { index: 1 },
            Command::Feed {
                index: 1,
                length: 10,
                speed: 50
            },
            Command::StartFeedAssist { index: 1 },
        ]
    );
    assert_eq!(
        bench.printer.macros.scripts(),
        vec![
            "_ACE_PRE_TOOLCHANGE FROM=-1 TO=1".to_string(),
            "_ACE_POST_TOOLCHANGE FROM=-1 TO=1".to_string(),
        ]
    );
    assert!(bench
        .events
        .iter()
        .any(|e| matches!(e, AceEvent::ParkArrived { index: 1, .. })));
    assert!(bench.events.contains(&AceEvent::ToolChanged {
        from: None,
        to: Some(1)
    }));
    // assist keeps holding the filament after a tool change
    assert_eq!(bench.sim.feed_assist(), Some(1));
    assert_eq!(bench.ace.store().get("ace_current_index"), Some(json!(1)));
    assert_eq!(bench.ace.store().get("ace_filament_pos"), Some(json!("nozzle")));
}

#[test]
fn test_change_to_loaded_tool_is_noop() {
    let mut bench = Bench::loaded(2, "nozzle");
    let requests = bench.sim.request_count();

    assert!(matches!(bench.ace.change_tool(Some(2)), Ok(false)));
    assert_eq!(bench.ace.pending_commands(), 0);
    assert!(!bench.ace.router().is_busy());

    // nothing but heartbeats afterwards
    bench.ticks(3);
    assert_eq!(bench.sim.request_count(), requests + 3);
    assert_eq!(bench.sim.commands(), vec![Command::GetInfo]);
    assert!(bench.printer.macros.scripts().is_empty());
}

#[test]
fn test_empty_slot_runs_error_macro() {
    let sim = SimulatedAce::default();
    sim.set_slot_status(3, SlotState::Empty);
    let mut bench = Bench::with(config(), Box::new(MemoryStore::new()), sim);

    assert!(matches!(bench.ace.change_tool(Some(3)), Err(AceError::EmptySlot(3))));
    assert!(!bench.ace.router().is_busy());
    bench.ace.run_deferred();

    assert_eq!(
        bench.printer.macros.scripts(),
        vec!["_ACE_ON_EMPTY_ERROR INDEX=3".to_string()]
    );
    assert_eq!(bench.ace.router().active_tool(), None);
    assert_eq!(bench.sim.commands(), vec![Command::GetInfo]);
}

#[test]
fn test_reject_from_bowden() {
    let mut bench = Bench::loaded(0, "bowden");
    assert!(matches!(bench.ace.reject_tool(None), Ok(true)));
    assert!(matches!(bench.ace.feed(0, 10, None), Err(AceError::Busy(_))));
    bench.run_until_idle(100);

    assert_eq!(
        bench.sim.commands()[1..].to_vec(),
        vec![
            Command::StopFeedAssist { index: 0 },
            Command::Unwind {
                index: 0,
                length: 100,
                speed: 50
            },
        ]
    );
    assert!(bench.events.contains(&AceEvent::ToolRejected { index: 0 }));
    assert_eq!(bench.ace.router().active_tool(), None);
    assert_eq!(bench.ace.router().position(), FilamentPosition::Spliter);
    assert!(matches!(bench.ace.reject_tool(None), Ok(false)));
}

#[test]
fn test_swap_cuts_tip_first() {
    let mut bench = Bench::loaded(3, "nozzle");
    // clear after two retract rounds, then seen again while loading slot 0
    bench.printer.extruder_sensor.push([true, true, false, true]);
    bench.printer.toolhead_sensor.set(true);

    assert!(matches!(bench.ace.change_tool(Some(0)), Ok(true)));
    bench.run_until_idle(600);

    assert_eq!(bench.ace.router().active_tool(), Some(0));
    assert_eq!(
        bench.printer.macros.scripts(),
        vec![
            "_ACE_PRE_TOOLCHANGE FROM=3 TO=0".to_string(),
            "CUT_TIP".to_string(),
            "_ACE_POST_TOOLCHANGE FROM=3 TO=0".to_string(),
        ]
    );
    assert_eq!(
        bench.printer.motion.moves(),
        vec![(-20.0, 5.0), (-20.0, 5.0)]
    );
    let unwinds: Vec<u32> = bench
        .sim
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::Unwind { index: 3, length, .. } => Some(*length),
            _ => None,
        })
        .collect();
    assert_eq!(unwinds, vec![20, 20, 100]);
    assert!(bench.events.contains(&AceEvent::ToolChanged {
        from: Some(3),
        to: Some(0)
    }));
}

#[test]
fn test_extruder_timeout_pauses_printer() {
    let mut cfg = config();
    cfg.max_extruder_attempts = 2;
    let mut bench = Bench::new(cfg);

    bench.ace.change_tool(Some(0)).unwrap();
    bench.run_until_idle(200);

    let fault = Fault::SensorTimeout {
        sensor: Sensor::Extruder,
        attempts: 2,
    };
    assert_eq!(bench.faults(), vec![&fault]);
    assert_eq!(bench.ace.router().fault(), Some(&fault));
    assert_eq!(bench.ace.router().position(), FilamentPosition::Spliter);
    assert_eq!(bench.ace.router().active_tool(), None);
    assert_eq!(bench.printer.pause.triggers(), 1);
    assert_eq!(bench.ace.store().get("ace_filament_pos"), Some(json!("spliter")));

    // refused while the printer stays paused
    assert!(matches!(
        bench.ace.change_tool(Some(0)),
        Err(AceError::Paused(f)) if f == fault
    ));

    bench.printer.pause.resume();
    bench.printer.extruder_sensor.set(true);
    bench.printer.toolhead_sensor.set(true);
    assert!(matches!(bench.ace.change_tool(Some(0)), Ok(true)));
    bench.run_until_idle(400);
    assert_eq!(bench.ace.router().active_tool(), Some(0));
}

#[test]
fn test_lost_answer_aborts_sequence() {
    let mut bench = Bench::loaded(1, "bowden");
    bench.ace.reject_tool(Some(1)).unwrap();
    // first tick queues stop_feed_assist behind the heartbeat
    bench.tick();
    bench.sim.drop_responses(1);
    bench.tick();

    assert!(bench.events.contains(&AceEvent::LinkLost { abandoned: 1 }));
    assert_eq!(
        bench.ace.router().fault(),
        Some(&Fault::CommandLost {
            method: "stop_feed_assist".into()
        })
    );
    assert_eq!(bench.ace.router().active_tool(), Some(1));
    assert_eq!(bench.printer.pause.triggers(), 1);

    bench.tick();
    assert!(bench.events.contains(&AceEvent::Reconnected));
    assert!(bench.ace.clear_fault().is_some());
    assert_eq!(bench.ace.router().state(), &RouterState::Idle);
}

#[test]
fn test_device_error_aborts_sequence() {
    let mut bench = Bench::loaded(2, "bowden");
    bench.sim.inject_error("unwind_filament", 3, "motor stalled");
    bench.ace.reject_tool(None).unwrap();
    bench.run_until_idle(100);

    match bench.ace.router().fault() {
        Some(Fault::Device(e)) => {
            assert_eq!(e.method, "unwind_filament");
            assert_eq!(e.code, 3);
        }
        other => panic!("unexpected fault {:?}", other),
    }
    assert_eq!(bench.ace.router().active_tool(), Some(2));
}

#[test]
fn test_park_to_toolhead_stops_assist() {
    let mut bench = Bench::new(config());
    bench.printer.extruder_sensor.set(true);
    bench.printer.toolhead_sensor.push([false, false, true]);

    bench.ace.park_to_toolhead(2).unwrap();
    let mut saw_park_interval = false;
    for _ in 0..400 {
        if !bench.ace.router().is_busy() {
            break;
        }
        let report = bench.ace.tick(bench.now);
        bench.ace.run_deferred();
        saw_park_interval |= report.next_in == Duration::from_millis(680);
        bench.events.extend(report.events);
        bench.now += Duration::from_millis(500);
    }
    // the stop request queued on arrival goes out on the next tick
    bench.ticks(2);

    assert!(saw_park_interval);
    assert_eq!(bench.ace.router().active_tool(), Some(2));
    assert_eq!(bench.printer.motion.moves(), vec![(1.0, 5.0), (1.0, 5.0)]);
    assert_eq!(
        bench.sim.commands().last(),
        Some(&Command::StopFeedAssist { index: 2 })
    );
    assert_eq!(bench.sim.feed_assist(), None);
    assert_eq!(bench.ace.router().active_assist(), None);
}

#[test]
fn test_routing_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("variables.json");

    {
        let store = JsonFileStore::open(&path).unwrap();
        let mut bench = Bench::with(config(), Box::new(store), SimulatedAce::default());
        bench.printer.extruder_sensor.set(true);
        bench.printer.toolhead_sensor.set(true);
        bench.ace.change_tool(Some(3)).unwrap();
        bench.run_until_idle(400);
        bench.ace.shutdown();
    }
    assert_eq!(stored_routing(&path), (json!(3), json!("nozzle")));

    let store = JsonFileStore::open(&path).unwrap();
    let mut bench = Bench::with(config(), Box::new(store), SimulatedAce::default());
    assert_eq!(bench.ace.router().active_tool(), Some(3));
    assert_eq!(bench.ace.router().position(), FilamentPosition::Nozzle);
    assert!(matches!(bench.ace.change_tool(Some(3)), Ok(false)));

    bench.ace.clear_all_status().unwrap();
    assert_eq!(stored_routing(&path), (json!(-1), json!("spliter")));
}

#[test]
fn test_filament_status_diagram() {
    let bench = Bench::loaded(1, "bowden");
    bench.printer.extruder_sensor.set(true);
    assert_eq!(bench.ace.filament_status(), "ACE>>>>>>>>>>|*>>|Ex--|*--|Nz--");
}
