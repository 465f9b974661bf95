//! Driver facade
//!
//! [`Ace`] owns the protocol loop, the status mirror, the filament router
//! and the deferred queue, and exposes the operations a printer's command
//! layer calls. Everything runs on the caller's thread: call [`Ace::tick`]
//! at the interval it returns and [`Ace::run_deferred`] from the motion
//! context.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::AceConfig;
use crate::deferred::{DeferredKind, DeferredQueue};
use crate::device::{DeviceStatus, SlotOverride, StatusMirror};
use crate::error::{AceError, Fault, Result};
use crate::events::AceEvent;
use crate::host::Host;
use crate::persistence::VariableStore;
use crate::protocol::commands::DRYER_FAN_SPEED;
use crate::protocol::{
    Command, Completion, Connector, Dispatcher, Exchange, QueuedCommand, Resolved, Transport,
};
use crate::routing::router::empty_slot_macro;
use crate::routing::{path_diagram, FilamentRouter, RouterContext, RoutingState};

/// Drying time used when none is given, in minutes
pub const DEFAULT_DRYING_DURATION: u32 = 240;

/// Outcome of one [`Ace::tick`]
#[derive(Debug, Default)]
pub struct TickReport {
    /// Events raised during the tick
    pub events: Vec<AceEvent>,
    /// When to tick again
    pub next_in: Duration,
}

/// Host driver for one changer
pub struct Ace {
    config: AceConfig,
    dispatcher: Dispatcher,
    mirror: StatusMirror,
    router: FilamentRouter,
    deferred: DeferredQueue,
    host: Host,
    events: Vec<AceEvent>,
}

impl std::fmt::Debug for Ace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ace")
            .field("dispatcher", &self.dispatcher)
            .field("router", &self.router)
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl Ace {
    /// Build a driver. Routing state is restored from the host's store.
    pub fn new(config: AceConfig, connector: Box<dyn Connector>, host: Host) -> Result<Self> {
        config.validate()?;
        let routing = RoutingState::load(&*host.store);
        info!(
            "Restored tool {:?} at {}",
            routing.active_tool, routing.position
        );

        let transport = Transport::new(connector, config.transport_config());
        Ok(Self {
            dispatcher: Dispatcher::new(transport),
            mirror: StatusMirror::new(usize::from(config.slot_count)),
            router: FilamentRouter::new(&config, routing),
            deferred: DeferredQueue::new(),
            host,
            events: Vec::new(),
            config,
        })
    }

    /// Driver for the configured serial port
    pub fn with_serial(config: AceConfig, host: Host) -> Result<Self> {
        let connector = Box::new(config.serial_connector());
        Self::new(config, connector, host)
    }

    /// Open the link and ask for the device banner
    pub fn connect(&mut self) -> Result<()> {
        self.dispatcher.connect()?;
        self.dispatcher
            .enqueue(QueuedCommand::new(Command::GetInfo, Completion::Info));
        Ok(())
    }

    /// Close the link, dropping anything queued or in flight
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
        info!("Shut down");
    }

    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.dispatcher.transport().is_connected()
    }

    /// Active configuration
    pub fn config(&self) -> &AceConfig {
        &self.config
    }

    /// Filament router
    pub fn router(&self) -> &FilamentRouter {
        &self.router
    }

    /// Device status mirror
    pub fn mirror(&self) -> &StatusMirror {
        &self.mirror
    }

    /// Request dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Printer collaborators
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Persistent variables
    pub fn store(&self) -> &dyn VariableStore {
        &*self.host.store
    }

    /// Commands waiting for the wire
    pub fn pending_commands(&self) -> usize {
        self.dispatcher.queue_len()
    }

    /// Tasks waiting for [`Ace::run_deferred`]
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Run one protocol exchange and let the router react
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let report = self.dispatcher.tick(self.router.active_assist());
        if report.reconnected {
            self.events.push(AceEvent::Reconnected);
        }

        match report.exchange {
            Exchange::Completed(resolved) => self.resolve(resolved, now),
            Exchange::Desync { abandoned, .. } => {
                self.events.push(AceEvent::LinkLost {
                    abandoned: abandoned.len(),
                });
                for completion in abandoned {
                    self.abandon(completion);
                }
            }
            Exchange::Rejected { completion, error } => {
                warn!("request discarded: {}", error);
                self.abandon(completion);
            }
            Exchange::WriteFailed(_) | Exchange::Offline => {}
        }

        let (router, mut ctx) = self.split(now);
        router.advance(&mut ctx);

        TickReport {
            events: std::mem::take(&mut self.events),
            next_in: self.next_interval(),
        }
    }

    /// Execute queued motion and macro work. Returns the number of tasks run.
    pub fn run_deferred(&mut self) -> usize {
        let mut count = 0;
        while let Some(task) = self.deferred.pop() {
            let outcome = task.kind.run(&mut self.host);
            self.deferred.complete(task.seq, outcome);
            count += 1;
        }
        count
    }

    fn next_interval(&self) -> Duration {
        let timing = &self.config.timing;
        if self.dispatcher.is_degraded() || !self.is_connected() {
            timing.backoff_interval()
        } else if self.router.is_parking() {
            timing.park_interval()
        } else {
            timing.idle_interval()
        }
    }

    fn split(&mut self, now: Instant) -> (&mut FilamentRouter, RouterContext<'_>) {
        (
            &mut self.router,
            RouterContext {
                sink: &mut self.dispatcher,
                deferred: &mut self.deferred,
                status: self.mirror.status(),
                host: &mut self.host,
                now,
                events: &mut self.events,
            },
        )
    }

    fn resolve(&mut self, resolved: Resolved, now: Instant) {
        let Resolved {
            command,
            completion,
            response,
            ..
        } = resolved;
        let failure = response.device_error(command.method());

        if let Completion::Routine { token } = completion {
            self.router.on_reply(token, failure.map_or(Ok(()), Err));
            return;
        }
        if let Completion::Debug { method } = completion {
            let response = serde_json::to_value(&response).unwrap_or(Value::Null);
            self.events.push(AceEvent::DebugResponse { method, response });
            return;
        }
        if let Some(error) = failure {
            warn!("ACE error: {}", error);
            self.events.push(AceEvent::DeviceError(error));
            return;
        }

        let result = response.result_or_empty();
        let event = match completion {
            Completion::Heartbeat => {
                self.mirror.apply_status(&result, now);
                let (router, mut ctx) = self.split(now);
                router.on_heartbeat(&mut ctx);
                None
            }
            Completion::Info => self.mirror.set_info(&result, now).map(|info| {
                info!("Connected to {} {}", info.model, info.firmware);
                AceEvent::Connected {
                    model: info.model.clone(),
                    firmware: info.firmware.clone(),
                }
            }),
            Completion::DryingStarted => Some(AceEvent::DryingStarted),
            Completion::DryingStopped => Some(AceEvent::DryingStopped),
            Completion::FeedAssistStarted { index } => {
                self.router.set_active_assist(Some(index));
                Some(AceEvent::FeedAssistEnabled { index })
            }
            Completion::FeedAssistStopped { index } => {
                if self.router.active_assist() == Some(index) {
                    self.router.set_active_assist(None);
                }
                Some(AceEvent::FeedAssistDisabled { index })
            }
            Completion::Fed { index, length } => Some(AceEvent::Fed { index, length }),
            Completion::Retracted { index, length } => Some(AceEvent::Retracted { index, length }),
            Completion::Routine { .. } | Completion::Debug { .. } => None,
        };
        self.events.extend(event);
    }

    fn abandon(&mut self, completion: Completion) {
        match completion {
            Completion::Routine { token } => self.router.on_lost(token),
            Completion::Heartbeat => {}
            other => warn!("request abandoned: {:?}", other),
        }
    }

    fn submit(&mut self, command: Command, completion: Completion) -> Result<()> {
        if self.dispatcher.transport().generation() == 0 {
            return Err(AceError::NotConnected);
        }
        command.validate()?;
        self.dispatcher.enqueue(QueuedCommand::new(command, completion));
        Ok(())
    }

    fn check_index(&self, index: u8) -> Result<()> {
        if index >= self.config.slot_count {
            return Err(AceError::InvalidArgument(format!(
                "slot index {} out of range 0..{}",
                index, self.config.slot_count
            )));
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.router.is_busy() {
            return Err(AceError::Busy(self.router.state().name().to_string()));
        }
        Ok(())
    }

    fn ensure_accepting(&mut self) -> Result<()> {
        self.router.ensure_accepting(&*self.host.pause)
    }

    fn check_move(length: u32, speed: u32) -> Result<()> {
        if length == 0 {
            return Err(AceError::InvalidArgument("length must be positive".into()));
        }
        if speed == 0 {
            return Err(AceError::InvalidArgument("speed must be positive".into()));
        }
        Ok(())
    }

    /// Start feed-assist on a slot
    pub fn enable_feed_assist(&mut self, index: u8) -> Result<()> {
        self.check_index(index)?;
        self.ensure_idle()?;
        self.submit(
            Command::StartFeedAssist { index },
            Completion::FeedAssistStarted { index },
        )
    }

    /// Stop feed-assist on `index`, or on the slot where it is running
    pub fn disable_feed_assist(&mut self, index: Option<u8>) -> Result<()> {
        let index = index.or(self.router.active_assist()).ok_or_else(|| {
            AceError::InvalidArgument("no feed assist running; an index is required".into())
        })?;
        self.check_index(index)?;
        self.ensure_idle()?;
        self.submit(
            Command::StopFeedAssist { index },
            Completion::FeedAssistStopped { index },
        )
    }

    /// Push `length` mm out of a slot, at `feed_speed` unless given
    pub fn feed(&mut self, index: u8, length: u32, speed: Option<u32>) -> Result<()> {
        let speed = speed.unwrap_or(self.config.feed_speed);
        self.check_index(index)?;
        Self::check_move(length, speed)?;
        self.ensure_idle()?;
        self.submit(
            Command::Feed {
                index,
                length,
                speed,
            },
            Completion::Fed { index, length },
        )
    }

    /// Pull `length` mm back into a slot, at `retract_speed` unless given
    pub fn retract(&mut self, index: u8, length: u32, speed: Option<u32>) -> Result<()> {
        let speed = speed.unwrap_or(self.config.retract_speed);
        self.check_index(index)?;
        Self::check_move(length, speed)?;
        self.ensure_idle()?;
        self.submit(
            Command::Unwind {
                index,
                length,
                speed,
            },
            Completion::Retracted { index, length },
        )
    }

    /// Load `target`, or only unload for `None`.
    ///
    /// Returns `Ok(false)` without touching the link when `target` is
    /// already loaded. An empty target slot runs the empty-slot macro and
    /// fails with [`AceError::EmptySlot`].
    pub fn change_tool(&mut self, target: Option<u8>) -> Result<bool> {
        if let Some(index) = target {
            self.check_index(index)?;
        }
        if target == self.router.active_tool() {
            info!(
                "Not changing tool, current index already {}",
                crate::routing::position::tool_label(target)
            );
            return Ok(false);
        }
        self.ensure_accepting()?;

        if let Some(index) = target {
            let ready = self
                .mirror
                .status()
                .slot(index)
                .map(|slot| slot.is_ready())
                .unwrap_or(false);
            if !ready {
                warn!("Slot {} is empty, not changing tool", index);
                self.deferred
                    .push_detached(DeferredKind::RunMacro(empty_slot_macro(index)));
                return Err(AceError::EmptySlot(index));
            }
        }

        self.router.begin_change_tool(target);
        Ok(true)
    }

    /// Unload `index`, or the active tool. `Ok(false)` when nothing is loaded.
    pub fn reject_tool(&mut self, index: Option<u8>) -> Result<bool> {
        let Some(index) = index.or(self.router.active_tool()) else {
            return Ok(false);
        };
        self.check_index(index)?;
        self.ensure_accepting()?;
        self.router.begin_reject(index);
        Ok(true)
    }

    /// Load slot `index` through to the nozzle
    pub fn park_to_toolhead(&mut self, index: u8) -> Result<()> {
        self.check_index(index)?;
        self.ensure_accepting()?;
        self.router.begin_park(index);
        Ok(())
    }

    /// Start the dryer at `temp` °C for `duration` minutes (240 by default)
    pub fn start_drying(&mut self, temp: u32, duration: Option<u32>) -> Result<()> {
        let duration = duration.unwrap_or(DEFAULT_DRYING_DURATION);
        if temp == 0 || temp > self.config.max_dryer_temperature {
            return Err(AceError::InvalidArgument(format!(
                "drying temperature must be between 1 and {} °C",
                self.config.max_dryer_temperature
            )));
        }
        if duration == 0 {
            return Err(AceError::InvalidArgument(
                "drying duration must be positive".into(),
            ));
        }
        self.submit(
            Command::StartDrying {
                temp,
                fan_speed: DRYER_FAN_SPEED,
                duration,
            },
            Completion::DryingStarted,
        )
    }

    /// Stop the dryer
    pub fn stop_drying(&mut self) -> Result<()> {
        self.submit(Command::StopDrying, Completion::DryingStopped)
    }

    /// Mirrored status with cosmetic slot overrides applied
    pub fn get_status_snapshot(&self) -> DeviceStatus {
        self.mirror.snapshot(&*self.host.store)
    }

    /// Persist cosmetic overrides for a slot
    pub fn set_slot_override(&mut self, index: u8, overrides: &SlotOverride) -> Result<()> {
        self.check_index(index)?;
        self.mirror
            .set_slot_override(&mut *self.host.store, index, overrides)?;
        Ok(())
    }

    /// ASCII diagram of where the filament is
    pub fn filament_status(&self) -> String {
        let extruder = self.host.extruder_sensor.present();
        let toolhead = self.host.toolhead_sensor.present();
        path_diagram(self.router.position(), extruder, toolhead).to_string()
    }

    /// Forget the loaded tool and assume the filament is back in the hub
    pub fn clear_all_status(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let routing = RoutingState::default();
        self.router.set_routing(routing);
        routing.commit(&mut *self.host.store)?;
        info!("Routing state cleared");
        Ok(())
    }

    /// Send a raw request; the answer arrives as [`AceEvent::DebugResponse`]
    pub fn debug_request(&mut self, method: &str, params: &str) -> Result<()> {
        let params: Value = serde_json::from_str(params)
            .map_err(|e| AceError::InvalidArgument(format!("params: {}", e)))?;
        let command = Command::Raw {
            method: method.to_string(),
            params,
        };
        self.submit(
            command,
            Completion::Debug {
                method: method.to_string(),
            },
        )
    }

    /// Drop the current fault, if any, without waiting for the printer to resume
    pub fn clear_fault(&mut self) -> Option<Fault> {
        self.router.clear_fault()
    }
}
