// Channel topic domain model
use serde::{Deserialize, Serialize};
use std::fmt;

use super::reading::SensorKey;

const TOPIC_PREFIX: &str = "sensorstate_";

/// Normalize a persisted sensor identifier.
/// The stored diagrams use `""` and `"0"` as "no sensor".
pub fn normalize_sensor_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pub/sub address of one sensor stream on one machine: `sensorstate_{sensorId}_{machineId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTopic(String);

impl ChannelTopic {
    /// Returns `None` for an unbound sensor or an empty machine id, so callers
    /// can never subscribe to a wildcard-looking topic.
    pub fn new(sensor_id: &str, machine_id: &str) -> Option<Self> {
        let sensor_id = normalize_sensor_id(sensor_id)?;
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return None;
        }
        Some(Self(format!("{}{}_{}", TOPIC_PREFIX, sensor_id, machine_id)))
    }

    /// Parse a topic received from the transport.
    /// Machine ids never contain `_`, sensor ids may.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = Self::split(raw)?;
        Self::new(&key.sensor_id, &key.machine_id)
    }

    pub fn sensor_key(&self) -> Option<SensorKey> {
        Self::split(&self.0)
    }

    fn split(raw: &str) -> Option<SensorKey> {
        let rest = raw.strip_prefix(TOPIC_PREFIX)?;
        let (sensor_id, machine_id) = rest.rsplit_once('_')?;
        if sensor_id.is_empty() || machine_id.is_empty() {
            return None;
        }
        Some(SensorKey::new(sensor_id, machine_id))
    }
}

impl fmt::Display for ChannelTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOp {
    Join,
    Leave,
}

/// Outbound subscription frame: `{"op": "join", "topics": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCommand {
    pub op: ChannelOp,
    pub topics: Vec<ChannelTopic>,
}

impl ChannelCommand {
    pub fn join(topics: Vec<ChannelTopic>) -> Self {
        Self {
            op: ChannelOp::Join,
            topics,
        }
    }

    pub fn leave(topics: Vec<ChannelTopic>) -> Self {
        Self {
            op: ChannelOp::Leave,
            topics,
        }
    }
}
