//! ==============================================================================
//! consumer.rs - drain loop shared by every downstream process
//! ==============================================================================
//!
//! relationships:
//!     - implemented by: datamgr.rs, storage.rs
//!     - reads: queue.rs (pop with the consumer's registered id)
//!     - driven by: main.rs (one blocking thread per consumer)
//!
//! ==============================================================================

use crate::domain::{ConsumerId, Reading};
use crate::queue::{Pop, SharedQueue};

use anyhow::Result;

/// a downstream process fed from the shared queue
pub trait Consumer {
    fn name(&self) -> &str;

    fn consume(&mut self, reading: &Reading) -> Result<()>;

    /// called once after end-of-stream
    fn finish(&mut self) -> Result<()>;
}

/// pop readings for `id` until end-of-stream and feed them to `consumer`
///
/// a failing `consume` is logged and skipped: the reading has already been
/// acknowledged and the other consumers must not be held up. queue errors
/// end the loop and are returned. yields the number of readings consumed.
pub fn drain<C: Consumer + ?Sized>(
    queue: &SharedQueue,
    id: ConsumerId,
    consumer: &mut C,
) -> Result<u64> {
    tracing::info!("[{}] draining as {}", consumer.name(), id);
    let mut consumed = 0u64;

    loop {
        match queue.pop(id)? {
            Pop::Reading(reading) => {
                if let Err(e) = consumer.consume(&reading) {
                    tracing::warn!(
                        "[{}] reading from sensor {} failed: {:#}",
                        consumer.name(),
                        reading.sensor_id,
                        e
                    );
                    continue;
                }
                consumed += 1;
            }
            Pop::EndOfStream => break,
        }
    }

    consumer.finish()?;
    tracing::info!("[{}] end of stream after {} readings", consumer.name(), consumed);
    Ok(consumed)
}
