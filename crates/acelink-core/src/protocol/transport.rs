//! Transport
//!
//! Owns the single channel to the changer. Writes can be retried with
//! exponential backoff, reads never fail loudly (a bad or missing frame is
//! `None`), and reconnection is bounded per call.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::frame::{Frame, HEADER_LEN, TERMINATOR, TRAILER_LEN};
use super::serial::open_port;
use super::stream::{read_until, Channel, SerialChannel};
use super::{ProtocolError, DEFAULT_BAUD_RATE, MAX_FRAME_SIZE};

/// Opens channels to the device
pub trait Connector: Send {
    /// Open a fresh channel
    fn open(&mut self) -> Result<Box<dyn Channel>, ProtocolError>;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}

/// Connector for a real serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout applied to the port
    pub read_timeout: Duration,
}

impl SerialConnector {
    /// Connector for `port_name`
    pub fn new(port_name: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            read_timeout,
        }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", DEFAULT_BAUD_RATE, Duration::from_millis(500))
    }
}

impl Connector for SerialConnector {
    fn open(&mut self) -> Result<Box<dyn Channel>, ProtocolError> {
        let port = open_port(&self.port_name, self.baud_rate, self.read_timeout)?;
        Ok(Box::new(SerialChannel::new(port)))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port_name, self.baud_rate)
    }
}

/// Transport tuning
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Byte budget for a single frame read
    pub read_budget: usize,
    /// Attempts for a write with retry
    pub write_attempts: u32,
    /// Attempts per reconnect call
    pub reconnect_attempts: u32,
    /// Attempts for the initial connection
    pub connect_attempts: u32,
    /// Base unit of the exponential backoff
    pub backoff_unit: Duration,
    /// Read timeout applied to opened channels
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_budget: HEADER_LEN + MAX_FRAME_SIZE + TRAILER_LEN,
            write_attempts: 3,
            reconnect_attempts: 3,
            connect_attempts: 10,
            backoff_unit: Duration::from_secs(1),
            read_timeout: Duration::from_millis(500),
        }
    }
}

/// Link statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCounters {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Frames written
    pub tx_frames: u64,
    /// Frames decoded
    pub rx_frames: u64,
    /// Frames that failed to decode
    pub dropped_frames: u64,
    /// Successful reconnects
    pub reconnects: u64,
}

/// Owner of the one channel to the changer
pub struct Transport {
    connector: Box<dyn Connector>,
    channel: Option<Box<dyn Channel>>,
    config: TransportConfig,
    counters: TransportCounters,
    /// Incremented every time a channel is opened
    generation: u64,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.connector.describe())
            .field("connected", &self.is_connected())
            .field("generation", &self.generation)
            .field("counters", &self.counters)
            .finish()
    }
}

impl Transport {
    /// Create a transport (not yet connected)
    pub fn new(connector: Box<dyn Connector>, config: TransportConfig) -> Self {
        Self {
            connector,
            channel: None,
            config,
            counters: TransportCounters::default(),
            generation: 0,
        }
    }

    /// Whether a channel is open
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Number of channels opened so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Link statistics
    pub fn counters(&self) -> TransportCounters {
        self.counters
    }

    /// Endpoint description
    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    /// Initial connection.
    ///
    /// The changer can reboot itself right as the port opens, so this tries
    /// harder than a reconnect.
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.is_connected() {
            warn!("connect: already connected to {}", self.endpoint());
            return Ok(());
        }

        info!("Connecting to {}", self.endpoint());
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match self.open_channel() {
                Ok(()) => {
                    info!("Connected to {}", self.endpoint());
                    return Ok(());
                }
                Err(e) => {
                    debug!("connect attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                    self.pause(self.config.backoff_unit / 2);
                }
            }
        }

        Err(ProtocolError::ConnectionFailed(format!(
            "{}: {}",
            self.endpoint(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Drop the channel
    pub fn disconnect(&mut self) {
        if self.channel.take().is_some() {
            info!("Closing connection to {}", self.endpoint());
        }
    }

    /// Reopen the link.
    ///
    /// A no-op (with a warning) while connected. Otherwise makes a bounded
    /// number of attempts spaced by the backoff unit and reports success.
    pub fn reconnect(&mut self) -> bool {
        if self.is_connected() {
            warn!("reconnect requested while connected to {}, ignoring", self.endpoint());
            return true;
        }

        let attempts = self.config.reconnect_attempts.max(1);
        for attempt in 0..attempts {
            info!("Attempt {} to reconnect to {}", attempt + 1, self.endpoint());
            match self.open_channel() {
                Ok(()) => {
                    self.counters.reconnects += 1;
                    info!("Reconnected successfully");
                    return true;
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                    if attempt + 1 < attempts {
                        self.pause(self.config.backoff_unit);
                    }
                }
            }
        }
        false
    }

    /// Write one frame.
    ///
    /// With retry, a failed write reconnects and backs off `unit * 2^i`
    /// before the next attempt.
    pub fn write(&mut self, frame: &Frame, with_retry: bool) -> Result<(), ProtocolError> {
        let bytes = frame.to_bytes();
        let attempts = if with_retry {
            self.config.write_attempts.max(1)
        } else {
            1
        };

        let mut reason = String::new();
        for attempt in 0..attempts {
            match self.write_bytes(&bytes) {
                Ok(()) => {
                    self.counters.tx_bytes += bytes.len() as u64;
                    self.counters.tx_frames += 1;
                    return Ok(());
                }
                Err(e) => {
                    warn!("serial send failed (attempt {}): {}", attempt + 1, e);
                    reason = e.to_string();
                    if attempt + 1 < attempts {
                        self.reconnect();
                        self.pause(self.config.backoff_unit * 2u32.pow(attempt));
                    }
                }
            }
        }

        Err(ProtocolError::WriteFailed { attempts, reason })
    }

    /// Read one frame.
    ///
    /// Returns `None` on timeout, short read, malformed header or checksum
    /// failure. A read I/O error closes the channel.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let budget = self.config.read_budget;
        let channel = self.channel.as_mut()?;

        let mut raw = match read_until(&mut **channel, TERMINATOR, budget) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("serial read failed: {}", e);
                self.channel = None;
                return None;
            }
        };
        if raw.is_empty() {
            debug!("read timed out");
            return None;
        }

        // 0xFE in the length field or the checksum ends a read early
        let mut pending = Frame::pending_bytes(&raw);
        while pending > 0 {
            match read_until(&mut **channel, TERMINATOR, pending) {
                Ok(more) if !more.is_empty() => raw.extend_from_slice(&more),
                Ok(_) => break,
                Err(e) => {
                    warn!("serial read failed: {}", e);
                    self.channel = None;
                    return None;
                }
            }
            pending = Frame::pending_bytes(&raw);
        }

        self.counters.rx_bytes += raw.len() as u64;
        match Frame::from_bytes(&raw) {
            Ok(frame) => {
                self.counters.rx_frames += 1;
                Some(frame)
            }
            Err(e) => {
                self.counters.dropped_frames += 1;
                warn!("Invalid data received ({}): {:02x?}", e, raw);
                None
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = channel.write_all(bytes).and_then(|_| channel.flush());
        if let Err(e) = result {
            self.channel = None;
            return Err(ProtocolError::SerialError(e.to_string()));
        }
        Ok(())
    }

    fn open_channel(&mut self) -> Result<(), ProtocolError> {
        let mut channel = self.connector.open()?;
        channel.set_timeout(self.config.read_timeout)?;
        channel.clear_input_buffer()?;
        self.channel = Some(channel);
        self.generation += 1;
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{self, Read};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Default)]
    struct Line {
        opens: u32,
        refused_opens: u32,
        failing_writes: u32,
        writes: u32,
    }

    struct LineChannel(Arc<Mutex<Line>>);

    impl Read for LineChannel {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "silent"))
        }
    }

    impl Write for LineChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut line = self.0.lock().unwrap();
            line.writes += 1;
            if line.failing_writes > 0 {
                line.failing_writes -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for LineChannel {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct LineConnector(Arc<Mutex<Line>>);

    impl Connector for LineConnector {
        fn open(&mut self) -> Result<Box<dyn Channel>, ProtocolError> {
            let mut line = self.0.lock().unwrap();
            if line.refused_opens > 0 {
                line.refused_opens -= 1;
                return Err(ProtocolError::ConnectionFailed("busy".into()));
            }
            line.opens += 1;
            Ok(Box::new(LineChannel(Arc::clone(&self.0))))
        }

        fn describe(&self) -> String {
            "line".to_string()
        }
    }

    fn connected(backoff_unit: Duration) -> (Transport, Arc<Mutex<Line>>) {
        let line = Arc::new(Mutex::new(Line::default()));
        let config = TransportConfig {
            backoff_unit,
            ..TransportConfig::default()
        };
        let mut transport = Transport::new(Box::new(LineConnector(Arc::clone(&line))), config);
        transport.connect().unwrap();
        (transport, line)
    }

    fn frame() -> Frame {
        Frame::new(br#"{"id":0,"method":"get_status"}"#.to_vec()).unwrap()
    }

    #[test]
    fn test_reconnect_while_connected_is_noop() {
        let (mut transport, line) = connected(Duration::ZERO);
        assert!(transport.reconnect());
        assert_eq!(line.lock().unwrap().opens, 1);
        assert_eq!(transport.generation(), 1);
        assert_eq!(transport.counters().reconnects, 0);
    }

    #[test]
    fn test_reconnect_gives_up_after_attempts() {
        let (mut transport, line) = connected(Duration::ZERO);
        transport.disconnect();
        line.lock().unwrap().refused_opens = 5;

        assert!(!transport.reconnect());
        assert!(!transport.is_connected());
        assert_eq!(line.lock().unwrap().refused_opens, 2);

        // two more refusals, then the third attempt opens
        assert!(transport.reconnect());
        assert_eq!(transport.counters().reconnects, 1);
        assert_eq!(transport.generation(), 2);
    }

    #[test]
    fn test_connect_fails_after_attempts() {
        let line = Arc::new(Mutex::new(Line {
            refused_opens: 10,
            ..Line::default()
        }));
        let config = TransportConfig {
            backoff_unit: Duration::ZERO,
            ..TransportConfig::default()
        };
        let mut transport = Transport::new(Box::new(LineConnector(Arc::clone(&line))), config);

        assert!(matches!(
            transport.connect(),
            Err(ProtocolError::ConnectionFailed(_))
        ));
        assert_eq!(line.lock().unwrap().refused_opens, 0);
    }

    #[test]
    fn test_write_retries_with_backoff() {
        let (mut transport, line) = connected(Duration::from_millis(5));
        line.lock().unwrap().failing_writes = 10;

        let started = Instant::now();
        let result = transport.write(&frame(), true);
        assert!(matches!(
            result,
            Err(ProtocolError::WriteFailed { attempts: 3, .. })
        ));
        // 5ms then 10ms between the three attempts
        assert!(started.elapsed() >= Duration::from_millis(15));

        let line = line.lock().unwrap();
        assert_eq!(line.writes, 3);
        // every failed attempt but the last reopens the link
        assert_eq!(line.opens, 3);
        assert_eq!(transport.counters().tx_frames, 0);
    }

    #[test]
    fn test_single_write_attempt_without_retry() {
        let (mut transport, line) = connected(Duration::ZERO);
        line.lock().unwrap().failing_writes = 1;

        assert!(matches!(
            transport.write(&frame(), false),
            Err(ProtocolError::WriteFailed { attempts: 1, .. })
        ));
        assert!(!transport.is_connected());
        assert_eq!(line.lock().unwrap().writes, 1);
    }

    #[test]
    fn test_write_recovers_on_second_attempt() {
        let (mut transport, line) = connected(Duration::ZERO);
        line.lock().unwrap().failing_writes = 1;

        transport.write(&frame(), true).unwrap();
        assert_eq!(line.lock().unwrap().writes, 2);
        assert_eq!(transport.counters().tx_frames, 1);
        assert_eq!(transport.counters().reconnects, 1);
        assert!(transport.is_connected());
    }
}
