//! Byte channels
//!
//! The transport reads and writes through a [`Channel`], which is either a
//! real serial port or the in-process simulator.

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Bidirectional byte link to the changer
pub trait Channel: Read + Write + Send {
    /// Bound how long a single read may block
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop unread input, e.g. a half frame left over from before a reconnect
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

fn port_error(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// [`Channel`] over an open serial port
pub struct SerialChannel(Box<dyn SerialPort>);

impl SerialChannel {
    /// Wrap an opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self(port)
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.set_timeout(timeout).map_err(port_error)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.0.clear(ClearBuffer::Input).map_err(port_error)
    }
}

/// Read until `terminator` is seen or `limit` bytes have arrived.
///
/// A read timeout ends the read early and returns whatever was collected,
/// possibly nothing. Any other I/O error is returned.
pub fn read_until(channel: &mut dyn Channel, terminator: u8, limit: usize) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];

    while data.len() < limit {
        match channel.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                data.push(byte[0]);
                if byte[0] == terminator {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                break
            }
            Err(e) => return Err(e),
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        rx: VecDeque<io::Result<u8>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.rx.pop_front() {
                Some(Ok(b)) => {
                    buf[0] = b;
                    Ok(1)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for Scripted {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            self.rx.clear();
            Ok(())
        }
    }

    fn scripted(bytes: &[u8]) -> Scripted {
        Scripted {
            rx: bytes.iter().map(|&b| Ok(b)).collect(),
        }
    }

    #[test]
    fn test_stops_at_terminator() {
        let mut ch = scripted(&[1, 2, 0xFE, 3]);
        assert_eq!(read_until(&mut ch, 0xFE, 16).unwrap(), vec![1, 2, 0xFE]);
        assert_eq!(read_until(&mut ch, 0xFE, 16).unwrap(), vec![3]);
    }

    #[test]
    fn test_respects_limit() {
        let mut ch = scripted(&[1, 2, 3, 4]);
        assert_eq!(read_until(&mut ch, 0xFE, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_timeout_returns_partial() {
        let mut ch = scripted(&[]);
        assert!(read_until(&mut ch, 0xFE, 16).unwrap().is_empty());
    }

    #[test]
    fn test_hard_error_propagates() {
        let mut ch = Scripted {
            rx: VecDeque::from(vec![Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))]),
        };
        assert!(read_until(&mut ch, 0xFE, 16).is_err());
    }
}
