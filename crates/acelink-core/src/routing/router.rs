//! Filament routing state machine
//!
//! Park, reject and tool change are long physical sequences. Each one is
//! compiled into a queue of [`Step`]s which [`FilamentRouter::advance`]
//! interprets a few at a time on every tick. Polling loops are steps that
//! re-queue themselves with an attempt counter, so every loop is bounded and
//! every wait hands control back to the tick.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use super::park::{ParkContext, ParkProgress};
use super::position::{tool_label, tool_to_value, FilamentPosition, RoutingState};
use super::position::{CURRENT_INDEX_KEY, FILAMENT_POS_KEY};
use crate::config::AceConfig;
use crate::deferred::{DeferredKind, DeferredQueue};
use crate::device::DeviceStatus;
use crate::error::{AceError, Fault, Sensor};
use crate::events::AceEvent;
use crate::host::{Host, PauseControl};
use crate::protocol::{Command, CommandSink, Completion, DeviceError};

/// Macro that cuts the filament tip above the nozzle
pub const CUT_TIP_MACRO: &str = "CUT_TIP";

const MAX_STEPS_PER_TICK: usize = 64;
const ENABLE_ASSIST_SETTLE: Duration = Duration::from_millis(700);
const DISABLE_ASSIST_SETTLE: Duration = Duration::from_millis(300);
const REJECT_EXTRUDER_DISTANCE: f64 = -20.0;
const REJECT_EXTRUDER_SPEED: f64 = 5.0;
const REJECT_UNWIND_LENGTH: u32 = 20;
const REJECT_DWELL: Duration = Duration::from_secs(1);
/// Priming stops this far short of the full bowden length
const PRIME_SHORTFALL: u32 = 5;

/// Host macro run before a tool change
pub fn pre_toolchange_macro(from: Option<u8>, to: Option<u8>) -> String {
    format!(
        "_ACE_PRE_TOOLCHANGE FROM={} TO={}",
        tool_label(from),
        tool_label(to)
    )
}

/// Host macro run once the new tool is parked
pub fn post_toolchange_macro(from: Option<u8>, to: Option<u8>) -> String {
    format!(
        "_ACE_POST_TOOLCHANGE FROM={} TO={}",
        tool_label(from),
        tool_label(to)
    )
}

/// Host macro run when the requested slot is empty
pub fn empty_slot_macro(index: u8) -> String {
    format!("_ACE_ON_EMPTY_ERROR INDEX={}", index)
}

/// Time the device needs to move `length` mm at `speed` mm/s, plus margin
fn travel_time(length: u32, speed: u32) -> Duration {
    Duration::from_secs_f64(f64::from(length) / f64::from(speed.max(1)) + 0.1)
}

/// What the router is doing
#[derive(Debug, Clone, PartialEq)]
pub enum RouterState {
    /// Waiting for an operation
    Idle,
    /// Priming a slot into the bowden
    Feeding,
    /// Moving filament to the toolhead
    ParkingToToolhead,
    /// Pulling filament back to the hub
    Rejecting,
    /// A sequence failed and the printer was paused
    Paused(Fault),
}

impl RouterState {
    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            RouterState::Idle => "idle",
            RouterState::Feeding => "feeding",
            RouterState::ParkingToToolhead => "park",
            RouterState::Rejecting => "reject",
            RouterState::Paused(_) => "paused",
        }
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterState::Paused(fault) => write!(f, "paused ({})", fault),
            other => f.write_str(other.name()),
        }
    }
}

/// Borrowed view of everything a step may touch
pub struct RouterContext<'a> {
    /// Where device commands go
    pub sink: &'a mut dyn CommandSink,
    /// Host work queue
    pub deferred: &'a mut DeferredQueue,
    /// Latest device status
    pub status: &'a DeviceStatus,
    /// Printer collaborators
    pub host: &'a mut Host,
    /// Tick time
    pub now: Instant,
    /// Events raised during this tick
    pub events: &'a mut Vec<AceEvent>,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    ToolChanged { from: Option<u8>, to: Option<u8> },
    ToolRejected { index: u8 },
    Parked { index: u8 },
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Enter(RouterState),
    Send(Command),
    AwaitReply { token: u64, command: Command },
    Sleep(Duration),
    SleepUntil(Instant),
    Defer(DeferredKind),
    AwaitDeferred { seq: u64, task: String },
    WaitReady,
    WaitReadyUntil(Instant),
    SetPosition(FilamentPosition),
    SetActiveTool(Option<u8>),
    PollExtruder { index: u8, attempt: u32 },
    PollToolhead { attempt: u32 },
    RetractWhilePresent { index: u8, attempt: u32 },
    RejectFromPosition { index: u8 },
    BeginPark { index: u8, previous: Option<Option<u8>> },
    AwaitPark,
    AwaitParkUntil(Instant),
    Commit,
    Finish(Outcome),
}

enum Flow {
    /// Step done, move on
    Continue,
    /// Come back next tick
    Yield,
    /// Replace the step with these
    Expand(Vec<Step>),
    Fault {
        fault: Fault,
        pin: Option<FilamentPosition>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Ok,
    Failed(DeviceError),
    Lost,
}

/// Sequences feed, retract and feed-assist into park, reject and tool change
#[derive(Debug)]
pub struct FilamentRouter {
    config: AceConfig,
    state: RouterState,
    steps: VecDeque<Step>,
    routing: RoutingState,
    active_assist: Option<u8>,
    park: ParkContext,
    /// Post-toolchange macro queued on park arrival
    arrival_followup: Option<u64>,
    awaiting: Option<u64>,
    replies: HashMap<u64, Reply>,
    next_token: u64,
}

impl FilamentRouter {
    /// Idle router starting from persisted routing state
    pub fn new(config: &AceConfig, routing: RoutingState) -> Self {
        Self {
            config: config.clone(),
            state: RouterState::Idle,
            steps: VecDeque::new(),
            routing,
            active_assist: None,
            park: ParkContext::default(),
            arrival_followup: None,
            awaiting: None,
            replies: HashMap::new(),
            next_token: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> &RouterState {
        &self.state
    }

    /// Where the filament is
    pub fn position(&self) -> FilamentPosition {
        self.routing.position
    }

    /// Loaded tool, if any
    pub fn active_tool(&self) -> Option<u8> {
        self.routing.active_tool
    }

    /// Routing model as persisted
    pub fn routing(&self) -> RoutingState {
        self.routing
    }

    /// Overwrite the routing model, e.g. after an operator reset
    pub fn set_routing(&mut self, routing: RoutingState) {
        self.routing = routing;
    }

    /// Slot whose feed-assist should be running
    pub fn active_assist(&self) -> Option<u8> {
        self.active_assist
    }

    /// Record which slot has feed-assist running
    pub fn set_active_assist(&mut self, index: Option<u8>) {
        self.active_assist = index;
    }

    /// Park bookkeeping
    pub fn park(&self) -> &ParkContext {
        &self.park
    }

    /// A park is waiting for feed-assist to settle
    pub fn is_parking(&self) -> bool {
        self.park.in_progress
    }

    /// A sequence is running
    pub fn is_busy(&self) -> bool {
        !self.steps.is_empty() || self.park.in_progress
    }

    /// Fault that paused the router
    pub fn fault(&self) -> Option<&Fault> {
        match &self.state {
            RouterState::Paused(fault) => Some(fault),
            _ => None,
        }
    }

    /// Forget a fault without waiting for the printer to resume
    pub fn clear_fault(&mut self) -> Option<Fault> {
        match std::mem::replace(&mut self.state, RouterState::Idle) {
            RouterState::Paused(fault) => {
                info!("Fault cleared: {}", fault);
                Some(fault)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Check a new operation may start.
    ///
    /// A fault is dropped automatically once the printer is no longer paused.
    pub fn ensure_accepting(&mut self, pause: &dyn PauseControl) -> Result<(), AceError> {
        if let RouterState::Paused(fault) = &self.state {
            if pause.is_paused() {
                return Err(AceError::Paused(fault.clone()));
            }
            self.clear_fault();
        }
        if self.is_busy() {
            return Err(AceError::Busy(self.state.name().to_string()));
        }
        Ok(())
    }

    /// Swap the loaded tool for `target`.
    ///
    /// The caller has already checked that `target` differs from the active
    /// tool and that its slot is ready.
    pub fn begin_change_tool(&mut self, target: Option<u8>) {
        let from = self.routing.active_tool;
        info!(
            "Toolchange {} => {}",
            tool_label(from),
            tool_label(target)
        );

        let mut steps = vec![
            Step::Enter(RouterState::Feeding),
            Step::Defer(DeferredKind::RunMacro(pre_toolchange_macro(from, target))),
        ];
        if let Some(current) = from {
            steps.extend(self.reject_program(current));
        }

        match target {
            Some(index) => {
                steps.push(Step::Enter(RouterState::Feeding));
                steps.extend(feed_steps(
                    index,
                    self.config
                        .toolchange_retract_length
                        .saturating_sub(PRIME_SHORTFALL),
                    self.config.retract_speed,
                ));
                steps.push(Step::SetPosition(FilamentPosition::Bowden));
                steps.push(Step::WaitReady);
                steps.extend(self.park_program(index, Some(from)));
                if self.config.disable_assist_after_park {
                    steps.extend(disable_assist_steps(index));
                }
            }
            None => {
                steps.push(Step::Defer(DeferredKind::RunMacro(post_toolchange_macro(
                    from, target,
                ))));
            }
        }

        steps.push(Step::SetActiveTool(target));
        steps.push(Step::Commit);
        steps.push(Step::Finish(Outcome::ToolChanged { from, to: target }));
        self.start(steps);
    }

    /// Unload slot `index` back to the splitter
    pub fn begin_reject(&mut self, index: u8) {
        info!("Rejecting tool {}", index);
        let mut steps = self.reject_program(index);
        steps.push(Step::Commit);
        steps.push(Step::Finish(Outcome::ToolRejected { index }));
        self.start(steps);
    }

    /// Load slot `index` up to the nozzle
    pub fn begin_park(&mut self, index: u8) {
        info!("Parking tool {} to toolhead", index);
        let mut steps = self.park_program(index, None);
        steps.push(Step::SetActiveTool(Some(index)));
        steps.push(Step::Commit);
        steps.push(Step::Finish(Outcome::Parked { index }));
        self.start(steps);
    }

    fn start(&mut self, steps: Vec<Step>) {
        self.replies.clear();
        self.awaiting = None;
        self.arrival_followup = None;
        self.park.reset();
        self.steps = steps.into();
    }

    fn park_program(&self, index: u8, previous: Option<Option<u8>>) -> Vec<Step> {
        let mut steps = vec![Step::Enter(RouterState::ParkingToToolhead)];
        steps.extend(enable_assist_steps(index));
        steps.push(Step::PollExtruder { index, attempt: 0 });
        steps.push(Step::BeginPark { index, previous });
        steps.push(Step::AwaitPark);
        steps
    }

    fn reject_program(&self, index: u8) -> Vec<Step> {
        let mut steps = vec![Step::Enter(RouterState::Rejecting)];
        steps.extend(disable_assist_steps(index));
        steps.push(Step::WaitReady);
        steps.push(Step::RejectFromPosition { index });
        steps
    }

    /// A command issued by a step was answered
    pub fn on_reply(&mut self, token: u64, result: Result<(), DeviceError>) {
        if self.awaiting != Some(token) {
            debug!("ignoring stale reply for step token {}", token);
            return;
        }
        let reply = match result {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::Failed(e),
        };
        self.replies.insert(token, reply);
    }

    /// A command issued by a step will never be answered
    pub fn on_lost(&mut self, token: u64) {
        if self.awaiting == Some(token) {
            self.replies.insert(token, Reply::Lost);
        }
    }

    /// Heartbeat merged into the mirror; drives park detection
    pub fn on_heartbeat(&mut self, ctx: &mut RouterContext<'_>) {
        let progress = self.park.observe(ctx.status, self.config.park_hit_count);
        let ParkProgress::Arrived { assist_count } = progress else {
            if let ParkProgress::Stalled(hits) = progress {
                debug!("park: assist count flat for {} polls", hits);
            }
            return;
        };

        let index = self.park.target_index;
        info!("Parked to toolhead with assist count: {}", assist_count);
        ctx.events.push(AceEvent::ParkArrived {
            index,
            assist_count,
        });

        if self.park.is_toolchange {
            let script = post_toolchange_macro(self.park.previous_tool, Some(index));
            self.arrival_followup = Some(ctx.deferred.push(DeferredKind::RunMacro(script)));
        } else {
            ctx.sink.submit(
                Command::StopFeedAssist { index },
                Completion::FeedAssistStopped { index },
            );
        }
    }

    /// Run steps until one has to wait
    pub fn advance(&mut self, ctx: &mut RouterContext<'_>) {
        for _ in 0..MAX_STEPS_PER_TICK {
            let Some(step) = self.steps.front().cloned() else {
                return;
            };
            match self.execute(step, ctx) {
                Flow::Continue => {
                    self.steps.pop_front();
                }
                Flow::Yield => return,
                Flow::Expand(steps) => {
                    self.steps.pop_front();
                    for step in steps.into_iter().rev() {
                        self.steps.push_front(step);
                    }
                }
                Flow::Fault { fault, pin } => {
                    self.abort(fault, pin, ctx);
                    return;
                }
            }
        }
    }

    fn execute(&mut self, step: Step, ctx: &mut RouterContext<'_>) -> Flow {
        match step {
            Step::Enter(state) => {
                self.state = state;
                Flow::Continue
            }

            Step::Send(command) => {
                let token = self.next_token;
                self.next_token += 1;
                self.awaiting = Some(token);
                ctx.sink.submit(command.clone(), Completion::Routine { token });
                Flow::Expand(vec![Step::AwaitReply { token, command }])
            }

            Step::AwaitReply { token, command } => match self.replies.remove(&token) {
                None => Flow::Yield,
                Some(Reply::Ok) => {
                    self.awaiting = None;
                    self.note_success(&command, ctx);
                    Flow::Continue
                }
                Some(Reply::Failed(e)) => Flow::Fault {
                    fault: Fault::Device(e),
                    pin: None,
                },
                Some(Reply::Lost) => Flow::Fault {
                    fault: Fault::CommandLost {
                        method: command.method().to_string(),
                    },
                    pin: None,
                },
            },

            Step::Sleep(duration) => Flow::Expand(vec![Step::SleepUntil(ctx.now + duration)]),

            Step::SleepUntil(deadline) => {
                if ctx.now >= deadline {
                    Flow::Continue
                } else {
                    Flow::Yield
                }
            }

            Step::Defer(kind) => {
                let task = kind.to_string();
                let seq = ctx.deferred.push(kind);
                Flow::Expand(vec![Step::AwaitDeferred { seq, task }])
            }

            Step::AwaitDeferred { seq, task } => match ctx.deferred.take_outcome(seq) {
                None => Flow::Yield,
                Some(Ok(())) => Flow::Continue,
                Some(Err(reason)) => Flow::Fault {
                    fault: Fault::Deferred { task, reason },
                    pin: None,
                },
            },

            Step::WaitReady => Flow::Expand(vec![Step::WaitReadyUntil(
                ctx.now + self.config.timing.ready_timeout(),
            )]),

            Step::WaitReadyUntil(deadline) => {
                if ctx.status.is_ready() {
                    Flow::Continue
                } else if ctx.now >= deadline {
                    Flow::Fault {
                        fault: Fault::ReadyTimeout(self.config.timing.ready_timeout()),
                        pin: None,
                    }
                } else {
                    Flow::Yield
                }
            }

            Step::SetPosition(position) => {
                self.set_position(position, ctx);
                Flow::Continue
            }

            Step::SetActiveTool(tool) => {
                self.routing.active_tool = tool;
                if let Err(e) = ctx.host.store.set(CURRENT_INDEX_KEY, tool_to_value(tool)) {
                    warn!("could not record active tool: {}", e);
                }
                Flow::Continue
            }

            Step::PollExtruder { index, attempt } => {
                let pulse = feed_steps(
                    index,
                    self.config.park_feed_pulse_length,
                    self.config.feed_speed,
                );
                if ctx.host.extruder_sensor.present() {
                    debug!("filament at extruder after {} pulses", attempt);
                    let mut steps = vec![Step::SetPosition(FilamentPosition::Bowden)];
                    steps.extend(pulse);
                    steps.extend(enable_assist_steps(index));
                    steps.push(Step::PollToolhead { attempt: 0 });
                    Flow::Expand(steps)
                } else if attempt >= self.config.max_extruder_attempts {
                    Flow::Fault {
                        fault: Fault::SensorTimeout {
                            sensor: Sensor::Extruder,
                            attempts: attempt,
                        },
                        pin: Some(FilamentPosition::Spliter),
                    }
                } else {
                    let mut steps = pulse;
                    steps.push(Step::PollExtruder {
                        index,
                        attempt: attempt + 1,
                    });
                    Flow::Expand(steps)
                }
            }

            Step::PollToolhead { attempt } => {
                if ctx.host.toolhead_sensor.present() {
                    debug!("filament at toolhead after {} steps", attempt);
                    // nozzle is clean after brushing, so it counts as loaded
                    Flow::Expand(vec![
                        Step::SetPosition(FilamentPosition::Toolhead),
                        Step::SetPosition(FilamentPosition::Nozzle),
                    ])
                } else if attempt >= self.config.max_toolhead_attempts {
                    Flow::Fault {
                        fault: Fault::SensorTimeout {
                            sensor: Sensor::Toolhead,
                            attempts: attempt,
                        },
                        pin: Some(FilamentPosition::Bowden),
                    }
                } else {
                    Flow::Expand(vec![
                        Step::Defer(DeferredKind::ExtruderMove {
                            distance: self.config.toolhead_step_length,
                            speed: self.config.toolhead_step_speed,
                        }),
                        Step::PollToolhead {
                            attempt: attempt + 1,
                        },
                    ])
                }
            }

            Step::RetractWhilePresent { index, attempt } => {
                if !ctx.host.extruder_sensor.present() {
                    return Flow::Expand(vec![
                        Step::SetPosition(FilamentPosition::Bowden),
                        Step::RejectFromPosition { index },
                    ]);
                }
                if attempt >= self.config.max_retract_attempts {
                    return Flow::Fault {
                        fault: Fault::SensorTimeout {
                            sensor: Sensor::Extruder,
                            attempts: attempt,
                        },
                        pin: Some(FilamentPosition::Toolhead),
                    };
                }
                let mut steps = vec![Step::Defer(DeferredKind::ExtruderMove {
                    distance: REJECT_EXTRUDER_DISTANCE,
                    speed: REJECT_EXTRUDER_SPEED,
                })];
                steps.extend(unwind_steps(
                    index,
                    REJECT_UNWIND_LENGTH,
                    self.config.retract_speed,
                ));
                steps.push(Step::Defer(DeferredKind::Dwell(REJECT_DWELL)));
                steps.push(Step::RetractWhilePresent {
                    index,
                    attempt: attempt + 1,
                });
                Flow::Expand(steps)
            }

            Step::RejectFromPosition { index } => match self.routing.position {
                FilamentPosition::Nozzle => Flow::Expand(vec![
                    Step::Defer(DeferredKind::RunMacro(CUT_TIP_MACRO.to_string())),
                    Step::SetPosition(FilamentPosition::Toolhead),
                    Step::RejectFromPosition { index },
                ]),
                FilamentPosition::Toolhead => {
                    Flow::Expand(vec![Step::RetractWhilePresent { index, attempt: 0 }])
                }
                FilamentPosition::Bowden | FilamentPosition::Spliter => {
                    let mut steps = vec![Step::WaitReady];
                    steps.extend(unwind_steps(
                        index,
                        self.config.toolchange_retract_length,
                        self.config.retract_speed,
                    ));
                    steps.push(Step::SetPosition(FilamentPosition::Spliter));
                    steps.push(Step::WaitReady);
                    steps.push(Step::SetActiveTool(None));
                    Flow::Expand(steps)
                }
            },

            Step::BeginPark { index, previous } => {
                self.park.begin(
                    index,
                    previous.is_some(),
                    previous.flatten(),
                    ctx.status.feed_assist_count,
                );
                Flow::Continue
            }

            Step::AwaitPark => Flow::Expand(vec![Step::AwaitParkUntil(
                ctx.now + self.config.park_timeout(),
            )]),

            // busy or silent devices never count a poll, so time bounds the park too
            Step::AwaitParkUntil(deadline) => {
                if self.park.in_progress {
                    if self.park.polls >= self.config.max_park_polls || ctx.now >= deadline {
                        return Flow::Fault {
                            fault: Fault::ParkTimeout(self.park.polls),
                            pin: None,
                        };
                    }
                    return Flow::Yield;
                }
                match self.arrival_followup.take() {
                    Some(seq) => Flow::Expand(vec![Step::AwaitDeferred {
                        seq,
                        task: "post-toolchange macro".to_string(),
                    }]),
                    None => Flow::Continue,
                }
            }

            Step::Commit => match self.routing.commit(&mut *ctx.host.store) {
                Ok(()) => Flow::Continue,
                Err(e) => Flow::Fault {
                    fault: Fault::Store(e.to_string()),
                    pin: None,
                },
            },

            Step::Finish(outcome) => {
                self.state = RouterState::Idle;
                match outcome {
                    Outcome::ToolChanged { from, to } => {
                        info!("Tool {} loaded", tool_label(to));
                        ctx.events.push(AceEvent::ToolChanged { from, to });
                    }
                    Outcome::ToolRejected { index } => {
                        info!("Tool {} rejected", index);
                        ctx.events.push(AceEvent::ToolRejected { index });
                    }
                    Outcome::Parked { index } => info!("Tool {} parked", index),
                }
                Flow::Continue
            }
        }
    }

    fn note_success(&mut self, command: &Command, ctx: &mut RouterContext<'_>) {
        match command {
            Command::StartFeedAssist { index } => {
                self.active_assist = Some(*index);
                ctx.events.push(AceEvent::FeedAssistEnabled { index: *index });
            }
            Command::StopFeedAssist { index } => {
                self.active_assist = None;
                ctx.events.push(AceEvent::FeedAssistDisabled { index: *index });
            }
            _ => {}
        }
    }

    fn set_position(&mut self, position: FilamentPosition, ctx: &mut RouterContext<'_>) {
        if self.routing.position == position {
            return;
        }
        debug!("filament {} -> {}", self.routing.position, position);
        self.routing.position = position;
        if let Err(e) = ctx
            .host
            .store
            .set(FILAMENT_POS_KEY, json!(position.as_str()))
        {
            warn!("could not record filament position: {}", e);
        }
        ctx.events.push(AceEvent::PositionChanged(position));
    }

    fn abort(&mut self, fault: Fault, pin: Option<FilamentPosition>, ctx: &mut RouterContext<'_>) {
        warn!("{} sequence aborted: {}", self.state.name(), fault);

        self.steps.clear();
        self.replies.clear();
        self.awaiting = None;
        self.arrival_followup = None;
        self.park.reset();

        if let Some(position) = pin {
            self.set_position(position, ctx);
        }
        if let Err(e) = self.routing.commit(&mut *ctx.host.store) {
            warn!("could not save routing state: {}", e);
        }

        ctx.host.pause.trigger_pause();
        ctx.events.push(AceEvent::Fault(fault.clone()));
        self.state = RouterState::Paused(fault);
    }
}

fn enable_assist_steps(index: u8) -> Vec<Step> {
    vec![
        Step::Send(Command::StartFeedAssist { index }),
        Step::Sleep(ENABLE_ASSIST_SETTLE),
    ]
}

fn disable_assist_steps(index: u8) -> Vec<Step> {
    vec![
        Step::Send(Command::StopFeedAssist { index }),
        Step::Sleep(DISABLE_ASSIST_SETTLE),
    ]
}

fn feed_steps(index: u8, length: u32, speed: u32) -> Vec<Step> {
    vec![
        Step::Send(Command::Feed {
            index,
            length,
            speed,
        }),
        Step::Sleep(travel_time(length, speed)),
    ]
}

fn unwind_steps(index: u8, length: u32, speed: u32) -> Vec<Step> {
    vec![
        Step::Send(Command::Unwind {
            index,
            length,
            speed,
        }),
        Step::Sleep(travel_time(length, speed)),
    ]
}
