//! ==============================================================================
//! datamgr.rs - running average and temperature alerts
//! ==============================================================================
//!
//! purpose:
//!     keeps, per known sensor, a sliding window of its most recent values and
//!     raises an event-log alert when the window average leaves the configured
//!     comfort band. sensors are known from a sensor map file:
//!
//!         # room_id sensor_id
//!         1 15
//!         2 21
//!
//! relationships:
//!     - drained by: consumer.rs (as ConsumerId::DATAMGR)
//!     - configured by: config.rs ([datamgr] section)
//!     - reports: logsink.rs (alerts, unknown sensors)
//!
//! ==============================================================================

use crate::config::DatamgrConfig;
use crate::consumer::Consumer;
use crate::domain::{Reading, RoomId, SensorId, Timestamp};
use crate::logsink::LogSink;

use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

/// parse `room_id sensor_id` pairs, one per line
pub fn parse_sensor_map(text: &str) -> Result<Vec<(RoomId, SensorId)>> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (room, sensor) = match (fields.next(), fields.next(), fields.next()) {
            (Some(room), Some(sensor), None) => (room, sensor),
            _ => bail!("line {}: expected `room_id sensor_id`, got {:?}", lineno + 1, line),
        };

        let room: RoomId = room
            .parse()
            .map_err(|e| anyhow!("line {}: bad room id {:?}: {}", lineno + 1, room, e))?;
        let sensor: SensorId = sensor
            .parse()
            .map_err(|e| anyhow!("line {}: bad sensor id {:?}: {}", lineno + 1, sensor, e))?;
        entries.push((room, sensor));
    }
    Ok(entries)
}

pub fn load_sensor_map<P: AsRef<Path>>(path: P) -> Result<Vec<(RoomId, SensorId)>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sensor map {}", path.display()))?;
    parse_sensor_map(&text)
        .with_context(|| format!("Failed to parse sensor map {}", path.display()))
}

struct SensorRecord {
    room_id: RoomId,
    window: VecDeque<f64>,
    running_avg: f64,
    last_modified: Option<Timestamp>,
}

pub struct DataManager {
    sensors: BTreeMap<SensorId, SensorRecord>,
    window_len: usize,
    min_temp: f64,
    max_temp: f64,
    events: Arc<dyn LogSink>,
}

impl DataManager {
    pub fn new(
        map: Vec<(RoomId, SensorId)>,
        settings: &DatamgrConfig,
        events: Arc<dyn LogSink>,
    ) -> Result<Self> {
        if settings.run_avg_length == 0 {
            bail!("run_avg_length must be at least 1");
        }

        let mut sensors = BTreeMap::new();
        for (room_id, sensor_id) in map {
            let record = SensorRecord {
                room_id,
                window: VecDeque::with_capacity(settings.run_avg_length),
                running_avg: 0.0,
                last_modified: None,
            };
            if sensors.insert(sensor_id, record).is_some() {
                bail!("sensor {} appears twice in the sensor map", sensor_id);
            }
        }

        Ok(Self {
            sensors,
            window_len: settings.run_avg_length,
            min_temp: settings.min_temp,
            max_temp: settings.max_temp,
            events,
        })
    }

    /// build from the configured sensor map file
    pub fn from_config(settings: &DatamgrConfig, events: Arc<dyn LogSink>) -> Result<Self> {
        let map = load_sensor_map(&settings.sensor_map)?;
        tracing::info!(
            "[DATAMGR] {} sensors mapped from {}",
            map.len(),
            settings.sensor_map.display()
        );
        Self::new(map, settings, events)
    }

    pub fn room_id(&self, sensor: SensorId) -> Option<RoomId> {
        self.sensors.get(&sensor).map(|s| s.room_id)
    }

    pub fn running_avg(&self, sensor: SensorId) -> Option<f64> {
        self.sensors.get(&sensor).map(|s| s.running_avg)
    }

    pub fn last_modified(&self, sensor: SensorId) -> Option<Timestamp> {
        self.sensors.get(&sensor).and_then(|s| s.last_modified)
    }

    pub fn total_sensors(&self) -> usize {
        self.sensors.len()
    }
}

impl Consumer for DataManager {
    fn name(&self) -> &str {
        "DATAMGR"
    }

    fn consume(&mut self, reading: &Reading) -> Result<()> {
        let Some(record) = self.sensors.get_mut(&reading.sensor_id) else {
            self.events.log(&format!(
                "Received sensor data with invalid sensor node ID {}",
                reading.sensor_id
            ));
            return Ok(());
        };

        if record.window.len() == self.window_len {
            record.window.pop_front();
        }
        record.window.push_back(reading.value);
        record.running_avg = record.window.iter().sum::<f64>() / record.window.len() as f64;
        record.last_modified = Some(reading.timestamp);

        // no verdict until the window is full
        if record.window.len() < self.window_len {
            return Ok(());
        }

        if record.running_avg < self.min_temp {
            self.events.log(&format!(
                "Sensor node {} reports it's too cold (avg temp = {:.6})",
                reading.sensor_id, record.running_avg
            ));
        } else if record.running_avg > self.max_temp {
            self.events.log(&format!(
                "Sensor node {} reports it's too hot (avg temp = {:.6})",
                reading.sensor_id, record.running_avg
            ));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        tracing::info!("[DATAMGR] summary for {} sensors", self.total_sensors());
        for &sensor in self.sensors.keys() {
            match self.last_modified(sensor) {
                Some(ts) => tracing::info!(
                    "[DATAMGR] sensor {} (room {}): avg {:.2}, last reading at {}",
                    sensor,
                    self.room_id(sensor).unwrap_or_default(),
                    self.running_avg(sensor).unwrap_or_default(),
                    ts
                ),
                None => tracing::info!(
                    "[DATAMGR] sensor {} (room {}): no readings",
                    sensor,
                    self.room_id(sensor).unwrap_or_default()
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsink::MemorySink;
    use std::path::PathBuf;

    fn settings(window: usize) -> DatamgrConfig {
        DatamgrConfig {
            sensor_map: PathBuf::from("unused"),
            run_avg_length: window,
            min_temp: 10.0,
            max_temp: 20.0,
        }
    }

    fn manager(window: usize) -> (DataManager, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let mgr =
            DataManager::new(vec![(1, 15), (2, 21)], &settings(window), sink.clone()).unwrap();
        (mgr, sink)
    }

    #[test]
    fn sensor_map_parses_pairs_and_skips_blank_lines() {
        let map = parse_sensor_map("1 15\n\n# comment\n2\t21\n").unwrap();
        assert_eq!(map, vec![(1, 15), (2, 21)]);
    }

    #[test]
    fn sensor_map_reports_the_bad_line() {
        let err = parse_sensor_map("1 15\n2 x\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_sensor_map("1 2 3\n").is_err());
    }

    #[test]
    fn sensor_map_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room_sensor.map");
        std::fs::write(&path, "3 7\n").unwrap();
        assert_eq!(load_sensor_map(&path).unwrap(), vec![(3, 7)]);
        assert!(load_sensor_map(dir.path().join("missing.map")).is_err());
    }

    #[test]
    fn average_tracks_the_last_window() {
        let (mut mgr, sink) = manager(3);
        for (i, v) in [15.0, 16.0, 17.0, 18.0].into_iter().enumerate() {
            mgr.consume(&Reading::new(15, v, i as i64)).unwrap();
        }
        assert_eq!(mgr.running_avg(15), Some(17.0));
        assert_eq!(mgr.last_modified(15), Some(3));
        assert_eq!(mgr.room_id(15), Some(1));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn alerts_only_once_the_window_is_full() {
        let (mut mgr, sink) = manager(2);
        mgr.consume(&Reading::new(21, 5.0, 1)).unwrap();
        assert!(sink.lines().is_empty());

        mgr.consume(&Reading::new(21, 6.0, 2)).unwrap();
        mgr.consume(&Reading::new(15, 30.0, 3)).unwrap();
        mgr.consume(&Reading::new(15, 32.0, 4)).unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                "Sensor node 21 reports it's too cold (avg temp = 5.500000)",
                "Sensor node 15 reports it's too hot (avg temp = 31.000000)",
            ]
        );
    }

    #[test]
    fn unknown_sensor_is_reported_and_ignored() {
        let (mut mgr, sink) = manager(2);
        mgr.consume(&Reading::new(99, 12.0, 1)).unwrap();
        assert_eq!(sink.lines(), vec!["Received sensor data with invalid sensor node ID 99"]);
        assert_eq!(mgr.running_avg(99), None);
        assert_eq!(mgr.total_sensors(), 2);
    }

    #[test]
    fn rejects_duplicate_sensors_and_empty_window() {
        let sink: Arc<dyn LogSink> = Arc::new(MemorySink::default());
        assert!(DataManager::new(vec![(1, 15), (2, 15)], &settings(3), sink.clone()).is_err());
        assert!(DataManager::new(vec![(1, 15)], &settings(0), sink).is_err());
    }
}
