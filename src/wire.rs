//! ==============================================================================
//! wire.rs - fixed-shape sensor record framing
//! ==============================================================================
//!
//! format:
//!     every record is exactly 18 bytes, no length prefix:
//!
//!     ┌────────────┬──────────────────┬──────────────────┐
//!     │ id (u16)   │ value (f64)      │ timestamp (i64)  │
//!     │ 2 bytes    │ 8 bytes          │ 8 bytes          │
//!     └────────────┴──────────────────┴──────────────────┘
//!
//!     all fields are little-endian. sensor nodes historically sent the raw
//!     in-memory representation; on every little-endian sender this is the
//!     same byte sequence, but the gateway no longer depends on sharing the
//!     sender's architecture.
//!
//! relationships:
//!     - used by: worker.rs (decode, one field at a time)
//!     - used by: socket-level tests (encode)
//!
//! ==============================================================================

use crate::domain::{Reading, SensorId, Timestamp};

pub const ID_LEN: usize = 2;
pub const VALUE_LEN: usize = 8;
pub const TIMESTAMP_LEN: usize = 8;
pub const RECORD_LEN: usize = ID_LEN + VALUE_LEN + TIMESTAMP_LEN;

pub fn decode_id(bytes: [u8; ID_LEN]) -> SensorId {
    SensorId::from_le_bytes(bytes)
}

pub fn decode_value(bytes: [u8; VALUE_LEN]) -> f64 {
    f64::from_le_bytes(bytes)
}

pub fn decode_timestamp(bytes: [u8; TIMESTAMP_LEN]) -> Timestamp {
    Timestamp::from_le_bytes(bytes)
}

/// serialize a reading into its on-socket layout
#[cfg(test)]
pub fn encode(reading: &Reading) -> [u8; RECORD_LEN] {
    let mut out = [0u8; RECORD_LEN];
    out[..ID_LEN].copy_from_slice(&reading.sensor_id.to_le_bytes());
    out[ID_LEN..ID_LEN + VALUE_LEN].copy_from_slice(&reading.value.to_le_bytes());
    out[ID_LEN + VALUE_LEN..].copy_from_slice(&reading.timestamp.to_le_bytes());
    out
}
