//! Protocol commands
//!
//! Typed requests and responses exchanged with the changer. Each method the
//! device understands is one `Command` variant; parameters are checked by
//! [`Command::validate`] before anything is serialized.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{DeviceError, Frame, ProtocolError};

/// Fan speed the dryer is always started with
pub const DRYER_FAN_SPEED: u32 = 7000;

/// Requests understood by the changer
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Model and firmware banner (`get_info`)
    GetInfo,

    /// Full status poll, also used as the heartbeat (`get_status`)
    GetStatus,

    /// Start the dryer (`drying`)
    StartDrying {
        /// Target temperature in °C
        temp: u32,
        /// Fan speed in RPM
        fan_speed: u32,
        /// Duration in minutes
        duration: u32,
    },

    /// Stop the dryer (`drying_stop`)
    StopDrying,

    /// Start the feed-assist motor for a slot (`start_feed_assist`)
    StartFeedAssist { index: u8 },

    /// Stop the feed-assist motor for a slot (`stop_feed_assist`)
    StopFeedAssist { index: u8 },

    /// Push filament out of a slot (`feed_filament`)
    Feed { index: u8, length: u32, speed: u32 },

    /// Pull filament back into a slot (`unwind_filament`)
    Unwind { index: u8, length: u32, speed: u32 },

    /// Arbitrary method, used for debugging firmware behaviour
    Raw { method: String, params: Value },
}

impl Command {
    /// Wire method name
    pub fn method(&self) -> &str {
        match self {
            Command::GetInfo => "get_info",
            Command::GetStatus => "get_status",
            Command::StartDrying { .. } => "drying",
            Command::StopDrying => "drying_stop",
            Command::StartFeedAssist { .. } => "start_feed_assist",
            Command::StopFeedAssist { .. } => "stop_feed_assist",
            Command::Feed { .. } => "feed_filament",
            Command::Unwind { .. } => "unwind_filament",
            Command::Raw { method, .. } => method.as_str(),
        }
    }

    /// Wire parameters, if the method takes any
    pub fn params(&self) -> Option<Value> {
        match self {
            Command::GetInfo | Command::GetStatus | Command::StopDrying => None,
            Command::StartDrying {
                temp,
                fan_speed,
                duration,
            } => Some(json!({ "temp": temp, "fan_speed": fan_speed, "duration": duration })),
            Command::StartFeedAssist { index } | Command::StopFeedAssist { index } => {
                Some(json!({ "index": index }))
            }
            Command::Feed {
                index,
                length,
                speed,
            }
            | Command::Unwind {
                index,
                length,
                speed,
            } => Some(json!({ "index": index, "length": length, "speed": speed })),
            Command::Raw { params, .. } => Some(params.clone()),
        }
    }

    /// Rebuild a typed command from its wire form.
    ///
    /// Unknown methods or malformed parameters come back as [`Command::Raw`].
    pub fn from_wire(method: &str, params: Option<Value>) -> Self {
        let p = params.clone().unwrap_or(Value::Null);
        let field = |name: &str| p.get(name).and_then(Value::as_u64);
        let index = field("index").and_then(|i| u8::try_from(i).ok());
        let typed = match method {
            "get_info" => Some(Command::GetInfo),
            "get_status" => Some(Command::GetStatus),
            "drying_stop" => Some(Command::StopDrying),
            "drying" => match (field("temp"), field("fan_speed"), field("duration")) {
                (Some(temp), Some(fan_speed), Some(duration)) => Some(Command::StartDrying {
                    temp: temp as u32,
                    fan_speed: fan_speed as u32,
                    duration: duration as u32,
                }),
                _ => None,
            },
            "start_feed_assist" => index.map(|index| Command::StartFeedAssist { index }),
            "stop_feed_assist" => index.map(|index| Command::StopFeedAssist { index }),
            "feed_filament" | "unwind_filament" => {
                match (index, field("length"), field("speed")) {
                    (Some(index), Some(length), Some(speed)) => {
                        let (length, speed) = (length as u32, speed as u32);
                        if method == "feed_filament" {
                            Some(Command::Feed { index, length, speed })
                        } else {
                            Some(Command::Unwind { index, length, speed })
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        typed.unwrap_or_else(|| Command::Raw {
            method: method.to_string(),
            params: params.unwrap_or_else(|| Value::Object(Map::new())),
        })
    }

    /// Check parameters before the command is queued
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Command::StartDrying { temp, duration, .. } => {
                if *temp == 0 {
                    return Err(ProtocolError::InvalidRequest(
                        "drying temperature must be positive".into(),
                    ));
                }
                if *duration == 0 {
                    return Err(ProtocolError::InvalidRequest(
                        "drying duration must be positive".into(),
                    ));
                }
            }
            Command::Feed { length, speed, .. } | Command::Unwind { length, speed, .. } => {
                if *length == 0 {
                    return Err(ProtocolError::InvalidRequest(
                        "length must be positive".into(),
                    ));
                }
                if *speed == 0 {
                    return Err(ProtocolError::InvalidRequest(
                        "speed must be positive".into(),
                    ));
                }
            }
            Command::Raw { method, params } => {
                if method.trim().is_empty() {
                    return Err(ProtocolError::InvalidRequest(
                        "method must not be empty".into(),
                    ));
                }
                if !params.is_object() {
                    return Err(ProtocolError::InvalidRequest(
                        "params must be a JSON object".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether this is the status poll used as heartbeat
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Command::GetStatus)
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    id: u16,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct IncomingRequest {
    id: u16,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// A command with its dispatcher-assigned identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request identifier
    pub id: u16,
    /// What is being asked
    pub command: Command,
}

impl Request {
    /// Create a request
    pub fn new(id: u16, command: Command) -> Self {
        Self { id, command }
    }

    /// Serialize to the JSON payload carried by a frame
    pub fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        self.command.validate()?;
        let wire = WireRequest {
            id: self.id,
            method: self.command.method(),
            params: self.command.params(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Serialize and frame
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::new(self.to_payload()?)?)
    }

    /// Parse a request payload (device side of the link)
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let incoming: IncomingRequest = serde_json::from_slice(payload)?;
        Ok(Self {
            id: incoming.id,
            command: Command::from_wire(&incoming.method, incoming.params),
        })
    }
}

/// A response from the changer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request being answered
    pub id: u16,
    /// Method specific result object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Non-zero on device error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human readable status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Response {
    /// Successful response carrying a result
    pub fn ok(id: u16, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            code: Some(0),
            msg: Some("success".to_string()),
        }
    }

    /// Error response
    pub fn error(id: u16, code: i64, msg: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            code: Some(code),
            msg: Some(msg.into()),
        }
    }

    /// Parse a frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Serialize to a frame payload
    pub fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Whether the device reported an error
    pub fn is_error(&self) -> bool {
        self.code.is_some_and(|code| code != 0)
    }

    /// Convert a device error into a typed error for the given method
    pub fn device_error(&self, method: &str) -> Option<DeviceError> {
        match self.code {
            Some(code) if code != 0 => Some(DeviceError {
                method: method.to_string(),
                code,
                msg: self.msg.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    /// Result object, or an empty object when absent
    pub fn result_or_empty(&self) -> Value {
        self.result
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}
