//! ACE Monitor
//!
//! Connects to an ACE filament changer (or the built-in simulator), prints
//! status and events, and optionally runs a tool change.
//!
//! Usage:
//!   cargo run --example ace_monitor -- [OPTIONS]
//!
//! Options:
//!   --config PATH     JSON config file (defaults apply when omitted)
//!   --port PORT       Serial port, overrides the config
//!   --store PATH      Variables file (default: user data directory)
//!   --simulate        Talk to the in-process simulator instead of a port
//!   --list-ports      List serial ports and exit (* marks CDC-ACM ports)
//!   --tool N          Change to tool N (-1 unloads) once connected
//!   --ticks N         Stop after N ticks (default: run until Ctrl-C)
//!
//! Set RUST_LOG=acelink_core=debug to see every frame.

use std::path::PathBuf;
use std::time::Instant;

use acelink_core::mock::MockPrinter;
use acelink_core::persistence::JsonFileStore;
use acelink_core::protocol::list_ports;
use acelink_core::sim::SimulatedAce;
use acelink_core::{Ace, AceConfig, AceEvent};
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

struct Options {
    config: Option<String>,
    port: Option<String>,
    store: Option<String>,
    simulate: bool,
    tool: Option<i32>,
    ticks: Option<u64>,
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config: None,
        port: None,
        store: None,
        simulate: false,
        tool: None,
        ticks: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .cloned()
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--config" | "-c" => {
                options.config = Some(value(i)?);
                i += 1;
            }
            "--port" | "-p" => {
                options.port = Some(value(i)?);
                i += 1;
            }
            "--store" => {
                options.store = Some(value(i)?);
                i += 1;
            }
            "--simulate" | "-s" => options.simulate = true,
            "--tool" | "-t" => {
                options.tool = Some(value(i)?.parse().context("--tool expects a number")?);
                i += 1;
            }
            "--ticks" => {
                options.ticks = Some(value(i)?.parse().context("--ticks expects a number")?);
                i += 1;
            }
            "--list-ports" | "-l" => {
                for port in list_ports() {
                    let mark = if port.is_cdc_acm() { "*" } else { " " };
                    match port.usb_id {
                        Some((vid, pid)) => println!(
                            "{} {}  {:04x}:{:04x}  {}",
                            mark,
                            port.name,
                            vid,
                            pid,
                            port.product.unwrap_or_default()
                        ),
                        None => println!("{} {}", mark, port.name),
                    }
                }
                return Ok(None);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => bail!("unknown option {}", other),
        }
        i += 1;
    }

    Ok(Some(options))
}

fn print_help() {
    println!("ACE Monitor");
    println!();
    println!("Usage: ace_monitor [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH     JSON config file");
    println!("  --port PORT       Serial port, overrides the config");
    println!("  --store PATH      Variables file");
    println!("  --simulate        Use the built-in simulator");
    println!("  --list-ports      List serial ports and exit");
    println!("  --tool N          Change to tool N (-1 unloads)");
    println!("  --ticks N         Stop after N ticks");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    let mut config = match &options.config {
        Some(path) => AceConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => AceConfig::default(),
    };
    if let Some(port) = &options.port {
        config.serial = port.clone();
    }

    let store_path = match &options.store {
        Some(path) => PathBuf::from(path),
        None => JsonFileStore::default_path()?,
    };
    let store = JsonFileStore::open(&store_path)
        .with_context(|| format!("opening {}", store_path.display()))?;

    // No printer attached: sensors report filament as soon as it is fed
    let printer = MockPrinter::new();
    printer.extruder_sensor.set(true);
    printer.toolhead_sensor.set(true);
    let host = printer.host_with_store(Box::new(store));

    let mut ace = if options.simulate {
        let sim = SimulatedAce::new(usize::from(config.slot_count));
        Ace::new(config, Box::new(sim.connector()), host)?
    } else {
        Ace::with_serial(config, host)?
    };
    ace.connect().context("connecting to ACE")?;

    if let Some(tool) = options.tool {
        let target = u8::try_from(tool).ok();
        // let the first heartbeat fill in slot status
        for _ in 0..2 {
            let report = ace.tick(Instant::now());
            std::thread::sleep(report.next_in);
        }
        match ace.change_tool(target) {
            Ok(true) => println!("Changing to tool {}", tool),
            Ok(false) => println!("Tool {} already loaded", tool),
            Err(e) => println!("Cannot change tool: {}", e),
        }
    }

    let mut ticks = 0u64;
    loop {
        let report = ace.tick(Instant::now());
        ace.run_deferred();

        for event in &report.events {
            match event {
                AceEvent::Connected { model, firmware } => {
                    println!("Connected to {} ({})", model, firmware)
                }
                AceEvent::Fault(fault) => println!("FAULT: {}", fault),
                other => println!("{:?}", other),
            }
        }

        ticks += 1;
        if ticks % 20 == 0 {
            let status = ace.get_status_snapshot();
            let slots: Vec<String> = status
                .slots
                .iter()
                .map(|s| format!("{}:{}", s.index, String::from(s.status.clone())))
                .collect();
            println!(
                "{} | {} | assist {} | {}",
                String::from(status.status.clone()),
                slots.join(" "),
                status.feed_assist_count,
                ace.filament_status()
            );
        }

        if options.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }
        std::thread::sleep(report.next_in);
    }

    ace.shutdown();
    Ok(())
}
