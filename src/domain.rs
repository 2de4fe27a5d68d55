//! ==============================================================================
//! domain.rs - value types shared by every stage of the gateway
//! ==============================================================================
//!
//! relationships:
//!     - produced by: worker.rs (decoded from the wire), acceptor.rs (end-of-stream)
//!     - carried by: queue.rs
//!     - consumed by: datamgr.rs, storage.rs
//!
//! ==============================================================================

use std::fmt;

/// sensor identity as sent on the wire
pub type SensorId = u16;
/// seconds since the unix epoch
pub type Timestamp = i64;
/// room a sensor is installed in (from the sensor map)
pub type RoomId = u16;

/// sensor id reserved for the end-of-stream marker
pub const END_OF_STREAM_ID: SensorId = 0;

/// one sensor measurement
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub sensor_id: SensorId,
    /// measured value (temperature in the reference deployment)
    pub value: f64,
    pub timestamp: Timestamp,
}

impl Reading {
    pub fn new(sensor_id: SensorId, value: f64, timestamp: Timestamp) -> Self {
        Self { sensor_id, value, timestamp }
    }

    /// the marker the acceptor pushes once every connection has finished
    pub fn end_of_stream() -> Self {
        Self::new(END_OF_STREAM_ID, 0.0, 0)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.sensor_id == END_OF_STREAM_ID
    }
}

/// identity a consumer registers with the shared queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u8);

impl ConsumerId {
    /// the averaging / alerting process
    pub const DATAMGR: ConsumerId = ConsumerId(0);
    /// the csv persistence process
    pub const STORAGE: ConsumerId = ConsumerId(1);
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}
