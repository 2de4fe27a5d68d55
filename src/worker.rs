//! ==============================================================================
//! worker.rs - per-connection record reader
//! ==============================================================================
//!
//! purpose:
//!     owns exactly one accepted sensor connection. reads fixed-shape records
//!     (see wire.rs) until the peer goes away, goes quiet, or sends garbage,
//!     and pushes every complete record into the shared queue.
//!
//! state machine:
//!
//!     AwaitingData ──► id ──► value ──► timestamp ──► push ──┐
//!          ▲                                                  │
//!          └──────────────────────────────────────────────────┘
//!
//!     any step can leave for TimedOut / PeerClosed / ProtocolError, all of
//!     which end in Closed. a partially read record is dropped, never resumed.
//!
//! relationships:
//!     - spawned by: acceptor.rs (one thread per connection)
//!     - writes: queue.rs
//!     - reports: logsink.rs (connection opened / closed)
//!
//! ==============================================================================

use crate::domain::{Reading, SensorId, END_OF_STREAM_ID};
use crate::logsink::LogSink;
use crate::queue::{QueueError, SharedQueue};
use crate::wire;

use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// why a connection was closed
#[derive(Debug)]
pub enum Exit {
    /// nothing arrived within the idle timeout
    TimedOut,
    /// the peer closed the connection between records
    PeerClosed,
    /// short record, reserved sensor id, or a socket error
    ProtocolError(String),
    /// the queue refused a complete record
    QueueFault(QueueError),
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::TimedOut => write!(f, "idle timeout"),
            Exit::PeerClosed => write!(f, "peer closed connection"),
            Exit::ProtocolError(reason) => write!(f, "protocol error: {}", reason),
            Exit::QueueFault(e) => write!(f, "queue fault: {}", e),
        }
    }
}

pub struct ConnectionWorker<S> {
    stream: S,
    queue: Arc<SharedQueue>,
    events: Arc<dyn LogSink>,
    opened: bool,
    last_sensor: Option<SensorId>,
}

impl ConnectionWorker<TcpStream> {
    /// wrap an accepted socket; reads give up after `idle_timeout` of silence
    pub fn from_tcp(
        stream: TcpStream,
        idle_timeout: Duration,
        queue: Arc<SharedQueue>,
        events: Arc<dyn LogSink>,
    ) -> io::Result<Self> {
        stream.set_read_timeout(Some(idle_timeout))?;
        Ok(Self::new(stream, queue, events))
    }
}

impl<S: Read> ConnectionWorker<S> {
    pub fn new(stream: S, queue: Arc<SharedQueue>, events: Arc<dyn LogSink>) -> Self {
        Self {
            stream,
            queue,
            events,
            opened: false,
            last_sensor: None,
        }
    }

    /// handle the connection until it closes; the stream is dropped on return
    pub fn run(mut self) -> Exit {
        let exit = loop {
            let reading = match self.read_record() {
                Ok(reading) => reading,
                Err(exit) => break exit,
            };
            if let Err(e) = self.queue.push(reading) {
                break Exit::QueueFault(e);
            }
        };

        let tag = match self.last_sensor {
            Some(id) => id.to_string(),
            None => "unknown".to_string(),
        };
        self.events.log(&format!("Sensor node {} has closed the connection", tag));

        match &exit {
            Exit::PeerClosed => tracing::info!("[CONN] sensor {}: {}", tag, exit),
            Exit::TimedOut => tracing::warn!("[CONN] sensor {}: {}", tag, exit),
            _ => tracing::error!("[CONN] sensor {}: {}", tag, exit),
        }
        exit
    }

    fn read_record(&mut self) -> Result<Reading, Exit> {
        let id = wire::decode_id(self.read_field(true)?);
        if id == END_OF_STREAM_ID {
            return Err(Exit::ProtocolError(format!(
                "sensor id {} is reserved",
                END_OF_STREAM_ID
            )));
        }

        if !self.opened {
            self.opened = true;
            self.events.log(&format!("Sensor node {} has opened a new connection", id));
        }
        self.last_sensor = Some(id);

        let value = wire::decode_value(self.read_field(false)?);
        let timestamp = wire::decode_timestamp(self.read_field(false)?);

        let reading = Reading::new(id, value, timestamp);
        tracing::trace!("[CONN] {:?}", reading);
        Ok(reading)
    }

    /// fill one fixed-size field; `first` marks the start of a record, where
    /// a clean EOF means the peer hung up rather than truncated a record
    fn read_field<const N: usize>(&mut self, first: bool) -> Result<[u8; N], Exit> {
        let mut buf = [0u8; N];
        let mut filled = 0;

        while filled < N {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) if first && filled == 0 => return Err(Exit::PeerClosed),
                Ok(0) => {
                    return Err(Exit::ProtocolError(format!(
                        "short read: record truncated after {} of {} field bytes",
                        filled, N
                    )))
                }
                Ok(n) => filled += n,
                Err(e) => match e.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock | ErrorKind::TimedOut => return Err(Exit::TimedOut),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                        return Err(Exit::PeerClosed)
                    }
                    _ => return Err(Exit::ProtocolError(e.to_string())),
                },
            }
        }
        Ok(buf)
    }
}
