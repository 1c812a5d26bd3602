// Sensor reading normalizer - canonical readings with last-write-wins per sensor
use crate::domain::reading::{RawRecord, SensorKey, SensorReading};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(SensorReading),
    /// Not strictly newer than the cached reading. Internal only.
    StaleReadingRejected,
    EmptyPayload,
    /// The authoritative record has no numeric value (positions, for instance).
    NonScalar,
}

/// Latest reading per sensor. Readers only get shared references.
#[derive(Debug, Default)]
pub struct ReadingCache {
    latest: HashMap<SensorKey, SensorReading>,
}

impl ReadingCache {
    pub fn get(&self, key: &SensorKey) -> Option<&SensorReading> {
        self.latest.get(key)
    }
}

#[derive(Debug, Default)]
pub struct SensorReadingNormalizer {
    cache: ReadingCache,
}

impl SensorReadingNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `payload[0]` counts; batches arrive newest-first.
    pub fn ingest(&mut self, key: &SensorKey, payload: &[RawRecord]) -> IngestOutcome {
        let Some(record) = payload.first() else {
            return IngestOutcome::EmptyPayload;
        };

        if let Some(cached) = self.cache.latest.get(key) {
            if record.date <= cached.timestamp {
                tracing::debug!(
                    "Rejecting stale reading for {}@{}: {} <= {}",
                    key.sensor_id,
                    key.machine_id,
                    record.date,
                    cached.timestamp
                );
                return IngestOutcome::StaleReadingRejected;
            }
        }

        let Some(value) = record.numeric_value() else {
            return IngestOutcome::NonScalar;
        };

        let reading = SensorReading::new(key, value, record.date);
        self.cache.latest.insert(key.clone(), reading.clone());
        IngestOutcome::Accepted(reading)
    }

    /// Seed the cache from a last-state query; follows the same ordering rule.
    pub fn seed(&mut self, reading: SensorReading) -> bool {
        let key = SensorKey::new(reading.sensor_id.clone(), reading.machine_id.clone());
        let newer = self
            .cache
            .latest
            .get(&key)
            .is_none_or(|cached| reading.timestamp > cached.timestamp);
        if newer {
            self.cache.latest.insert(key, reading);
        }
        newer
    }

    pub fn evict(&mut self, key: &SensorKey) {
        self.cache.latest.remove(key);
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }
}
