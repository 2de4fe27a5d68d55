//! ==============================================================================
//! storage.rs - csv persistence of every reading
//! ==============================================================================
//!
//! format:
//!     one line per reading, flushed immediately:
//!
//!         15, 21.500000, 1700000000
//!
//! relationships:
//!     - drained by: consumer.rs (as ConsumerId::STORAGE)
//!     - configured by: config.rs ([storage] section)
//!     - reports: logsink.rs (file created / insert / file closed)
//!
//! ==============================================================================

use crate::config::StorageConfig;
use crate::consumer::Consumer;
use crate::domain::Reading;
use crate::logsink::LogSink;

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

pub struct StorageManager {
    out: BufWriter<File>,
    file_name: String,
    events: Arc<dyn LogSink>,
}

impl StorageManager {
    /// open (or create) the csv file; `append` keeps earlier contents
    pub fn open<P: AsRef<Path>>(path: P, append: bool, events: Arc<dyn LogSink>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .with_context(|| format!("Failed to open csv store {}", path.display()))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        events.log(&format!("A new {} file has been created.", file_name));
        tracing::info!("[STORAGE] writing to {} (append: {})", path.display(), append);

        Ok(Self {
            out: BufWriter::new(file),
            file_name,
            events,
        })
    }

    pub fn from_config(settings: &StorageConfig, events: Arc<dyn LogSink>) -> Result<Self> {
        Self::open(&settings.csv_path, settings.append, events)
    }
}

impl Consumer for StorageManager {
    fn name(&self) -> &str {
        "STORAGE"
    }

    fn consume(&mut self, reading: &Reading) -> Result<()> {
        writeln!(
            self.out,
            "{}, {:.6}, {}",
            reading.sensor_id, reading.value, reading.timestamp
        )?;
        self.out.flush()?;

        self.events.log(&format!(
            "Data insertion from sensor {} succeeded",
            reading.sensor_id
        ));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        self.events.log(&format!("The {} file has been closed", self.file_name));
        Ok(())
    }
}
