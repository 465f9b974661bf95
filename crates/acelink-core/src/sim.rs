//! Simulated changer
//!
//! An in-process device that speaks the framed protocol. Tests and the
//! monitor example connect to it through [`SimConnector`] instead of a
//! serial port. Faults can be injected per request: device errors, dropped
//! or corrupted answers, answers carrying the wrong id, failing opens and
//! failing writes.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::device::{DeviceInfo, DeviceState, DeviceStatus, SlotState};
use crate::protocol::frame::{HEADER_LEN, MAGIC, TRAILER_LEN};
use crate::protocol::{Channel, Command, Connector, Frame, ProtocolError, Request, Response};

/// Mutable device model shared by the simulator handle and its channels
#[derive(Debug)]
pub struct SimState {
    /// Status reported by `get_status`
    pub status: DeviceStatus,
    /// Identity reported by `get_info`
    pub info: DeviceInfo,
    /// Slot whose feed-assist motor is running
    pub feed_assist: Option<u8>,
    /// Status polls during which the assist count rises after assist starts
    pub assist_run_polls: u64,
    assist_budget: u64,
    /// Status polls reported busy after a feed or unwind
    pub busy_after_move: u32,
    busy_polls: u32,
    /// Every request received, in order
    pub requests: Vec<Request>,
    errors: HashMap<String, (i64, String)>,
    drop_responses: u32,
    corrupt_responses: u32,
    wrong_id_responses: u32,
    fail_opens: u32,
    fail_writes: u32,
    /// Channels opened so far
    pub opens: u32,
}

impl SimState {
    fn new(slot_count: usize) -> Self {
        let mut status = DeviceStatus::with_slots(slot_count);
        let palette = [[255, 255, 255], [0, 0, 0], [200, 30, 30], [30, 90, 200]];
        for slot in &mut status.slots {
            slot.status = SlotState::Ready;
            slot.material = "PLA".into();
            slot.color = palette[slot.index as usize % palette.len()];
        }

        Self {
            status,
            info: DeviceInfo {
                model: "Anycubic Color Engine Pro".into(),
                firmware: "V1.3.84".into(),
                extra: Default::default(),
            },
            feed_assist: None,
            assist_run_polls: 3,
            assist_budget: 0,
            busy_after_move: 1,
            busy_polls: 0,
            requests: Vec::new(),
            errors: HashMap::new(),
            drop_responses: 0,
            corrupt_responses: 0,
            wrong_id_responses: 0,
            fail_opens: 0,
            fail_writes: 0,
            opens: 0,
        }
    }

    fn handle(&mut self, request: Request) -> Option<Vec<u8>> {
        let id = request.id;
        let method = request.command.method().to_string();
        let injected = self.errors.get(&method).cloned();
        let mut response = match injected {
            Some((code, msg)) => Response::error(id, code, msg),
            None => self.execute(id, &request.command),
        };
        self.requests.push(request);

        if self.drop_responses > 0 {
            self.drop_responses -= 1;
            debug!("sim: dropping answer to {} (id {})", method, id);
            return None;
        }
        if self.wrong_id_responses > 0 {
            self.wrong_id_responses -= 1;
            response.id = id.wrapping_add(7);
        }

        let payload = response.to_payload().ok()?;
        let mut bytes = Frame::new(payload).ok()?.to_bytes();
        if self.corrupt_responses > 0 {
            self.corrupt_responses -= 1;
            let at = bytes.len() - TRAILER_LEN;
            bytes[at] ^= 0x5A;
        }
        Some(bytes)
    }

    fn execute(&mut self, id: u16, command: &Command) -> Response {
        match command {
            Command::GetInfo => Response::ok(id, json!(self.info)),
            Command::GetStatus => {
                if self.feed_assist.is_some() && self.assist_budget > 0 {
                    self.assist_budget -= 1;
                    self.status.feed_assist_count += 1;
                }
                self.status.status = if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                    DeviceState::Busy
                } else {
                    DeviceState::Ready
                };
                Response::ok(id, json!(self.status))
            }
            Command::StartDrying { temp, duration, .. } => {
                self.status.dryer.status = "drying".into();
                self.status.dryer.target_temp = f64::from(*temp);
                self.status.dryer.duration = *duration;
                self.status.dryer.remain_time = f64::from(*duration);
                Response::ok(id, json!({}))
            }
            Command::StopDrying => {
                self.status.dryer.status = "stop".into();
                self.status.dryer.remain_time = 0.0;
                Response::ok(id, json!({}))
            }
            Command::StartFeedAssist { index } => {
                self.feed_assist = Some(*index);
                self.assist_budget = self.assist_run_polls;
                Response::ok(id, json!({}))
            }
            Command::StopFeedAssist { .. } => {
                self.feed_assist = None;
                Response::ok(id, json!({}))
            }
            Command::Feed { .. } | Command::Unwind { .. } => {
                self.busy_polls = self.busy_after_move;
                Response::ok(id, json!({}))
            }
            Command::Raw { method, params } => match method.as_str() {
                "echo" => Response::ok(id, params.clone()),
                _ => Response::error(id, -1, format!("unknown method {}", method)),
            },
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle on a simulated changer
#[derive(Debug, Clone)]
pub struct SimulatedAce {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAce {
    fn default() -> Self {
        Self::new(4)
    }
}

impl SimulatedAce {
    /// A changer with every slot loaded and ready
    pub fn new(slot_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(slot_count))),
        }
    }

    /// Connector that opens channels to this device
    pub fn connector(&self) -> SimConnector {
        SimConnector {
            state: Arc::clone(&self.state),
        }
    }

    /// Inspect or modify the device model
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    /// Change a slot's spool state
    pub fn set_slot_status(&self, index: u8, status: SlotState) {
        self.with_state(|s| {
            if let Some(slot) = s.status.slot_mut(index) {
                slot.status = status;
            }
        });
    }

    /// Answer every `method` request with a device error
    pub fn inject_error(&self, method: &str, code: i64, msg: &str) {
        self.with_state(|s| {
            s.errors.insert(method.to_string(), (code, msg.to_string()));
        });
    }

    /// Stop injecting device errors
    pub fn clear_errors(&self) {
        self.with_state(|s| s.errors.clear());
    }

    /// Swallow the next `n` answers
    pub fn drop_responses(&self, n: u32) {
        self.with_state(|s| s.drop_responses += n);
    }

    /// Break the checksum of the next `n` answers
    pub fn corrupt_responses(&self, n: u32) {
        self.with_state(|s| s.corrupt_responses += n);
    }

    /// Answer the next `n` requests with another id
    pub fn wrong_id_responses(&self, n: u32) {
        self.with_state(|s| s.wrong_id_responses += n);
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_opens(&self, n: u32) {
        self.with_state(|s| s.fail_opens += n);
    }

    /// Fail the next `n` writes with a broken pipe
    pub fn fail_writes(&self, n: u32) {
        self.with_state(|s| s.fail_writes += n);
    }

    /// Method names of every request received so far
    pub fn methods(&self) -> Vec<String> {
        self.with_state(|s| {
            s.requests
                .iter()
                .map(|r| r.command.method().to_string())
                .collect()
        })
    }

    /// Requests other than heartbeats
    pub fn commands(&self) -> Vec<Command> {
        self.with_state(|s| {
            s.requests
                .iter()
                .filter(|r| !r.command.is_heartbeat())
                .map(|r| r.command.clone())
                .collect()
        })
    }

    /// Requests received, heartbeats included
    pub fn request_count(&self) -> usize {
        self.with_state(|s| s.requests.len())
    }

    /// Slot whose feed-assist is running
    pub fn feed_assist(&self) -> Option<u8> {
        self.with_state(|s| s.feed_assist)
    }

    /// Channels opened so far
    pub fn opens(&self) -> u32 {
        self.with_state(|s| s.opens)
    }

    /// Current status as the device would send it
    pub fn status_json(&self) -> Value {
        self.with_state(|s| json!(s.status))
    }
}

/// Opens [`SimChannel`]s
#[derive(Debug, Clone)]
pub struct SimConnector {
    state: Arc<Mutex<SimState>>,
}

impl Connector for SimConnector {
    fn open(&mut self) -> Result<Box<dyn Channel>, ProtocolError> {
        let mut state = lock(&self.state);
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(ProtocolError::ConnectionFailed(
                "simulated device not responding".into(),
            ));
        }
        state.opens += 1;
        Ok(Box::new(SimChannel {
            state: Arc::clone(&self.state),
            tx: Vec::new(),
            rx: VecDeque::new(),
        }))
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}

/// One open link to the simulated device
pub struct SimChannel {
    state: Arc<Mutex<SimState>>,
    tx: Vec<u8>,
    rx: VecDeque<u8>,
}

impl SimChannel {
    /// Process every complete request frame written so far
    fn pump(&mut self) {
        loop {
            let Some(start) = self.tx.windows(2).position(|w| w == MAGIC.as_slice()) else {
                self.tx.clear();
                return;
            };
            self.tx.drain(..start);
            if self.tx.len() < HEADER_LEN {
                return;
            }
            let len = u16::from_le_bytes([self.tx[2], self.tx[3]]) as usize;
            let total = HEADER_LEN + len + TRAILER_LEN;
            if self.tx.len() < total {
                return;
            }

            let raw: Vec<u8> = self.tx.drain(..total).collect();
            let request = Frame::from_bytes(&raw)
                .ok()
                .and_then(|frame| Request::from_payload(&frame.payload).ok());
            match request {
                Some(request) => {
                    if let Some(answer) = lock(&self.state).handle(request) {
                        self.rx.extend(answer);
                    }
                }
                None => debug!("sim: ignoring malformed request {:02x?}", raw),
            }
        }
    }
}

impl Read for SimChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        {
            let mut state = lock(&self.state);
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"));
            }
        }
        self.tx.extend_from_slice(buf);
        self.pump();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for SimChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, stream::read_until};
    use pretty_assertions::assert_eq;

    fn exchange(channel: &mut SimChannel, id: u16, command: Command) -> Option<Response> {
        let frame = Request::new(id, command).to_frame().unwrap();
        channel.write_all(&frame.to_bytes()).unwrap();
        let raw = read_until(channel, 0xFE, 4096).unwrap();
        if raw.is_empty() {
            return None;
        }
        let payload = decode(&raw).ok()?;
        Response::from_payload(&payload).ok()
    }

    fn open(sim: &SimulatedAce) -> SimChannel {
        SimChannel {
            state: Arc::clone(&sim.state),
            tx: Vec::new(),
            rx: VecDeque::new(),
        }
    }

    #[test]
    fn test_answers_info() {
        let sim = SimulatedAce::default();
        let mut channel = open(&sim);
        let response = exchange(&mut channel, 3, Command::GetInfo).unwrap();
        assert_eq!(response.id, 3);
        assert_eq!(response.result_or_empty()["firmware"], "V1.3.84");
    }

    #[test]
    fn test_assist_count_rises_then_stalls() {
        let sim = SimulatedAce::default();
        let mut channel = open(&sim);
        exchange(&mut channel, 0, Command::StartFeedAssist { index: 1 }).unwrap();
        assert_eq!(sim.feed_assist(), Some(1));

        let counts: Vec<u64> = (1..=5)
            .map(|id| {
                let response = exchange(&mut channel, id, Command::GetStatus).unwrap();
                response.result_or_empty()["feed_assist_count"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 3, 3]);
    }

    #[test]
    fn test_injected_error() {
        let sim = SimulatedAce::default();
        sim.inject_error("drying", 2, "dryer fault");
        let mut channel = open(&sim);
        let response = exchange(
            &mut channel,
            9,
            Command::StartDrying {
                temp: 50,
                fan_speed: 7000,
                duration: 240,
            },
        )
        .unwrap();
        assert!(response.is_error());
        assert_eq!(response.msg.as_deref(), Some("dryer fault"));
    }

    #[test]
    fn test_corrupted_answer_fails_decode() {
        let sim = SimulatedAce::default();
        sim.corrupt_responses(1);
        let mut channel = open(&sim);
        let frame = Request::new(1, Command::GetStatus).to_frame().unwrap();
        channel.write_all(&frame.to_bytes()).unwrap();
        let mut raw = Vec::new();
        while let Ok(more) = read_until(&mut channel, 0xFE, 4096) {
            if more.is_empty() {
                break;
            }
            raw.extend(more);
        }
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn test_move_reports_busy() {
        let sim = SimulatedAce::default();
        let mut channel = open(&sim);
        exchange(
            &mut channel,
            1,
            Command::Feed {
                index: 0,
                length: 50,
                speed: 25,
            },
        )
        .unwrap();
        let busy = exchange(&mut channel, 2, Command::GetStatus).unwrap();
        assert_eq!(busy.result_or_empty()["status"], "busy");
        let ready = exchange(&mut channel, 3, Command::GetStatus).unwrap();
        assert_eq!(ready.result_or_empty()["status"], "ready");
    }
}
