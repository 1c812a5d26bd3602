// Sensor reading domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one sensor stream of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorKey {
    pub sensor_id: String,
    pub machine_id: String,
}

impl SensorKey {
    pub fn new(sensor_id: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            machine_id: machine_id.into(),
        }
    }
}

/// Canonical timestamped reading. Never mutated; a newer one replaces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub sensor_id: String,
    pub machine_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(key: &SensorKey, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            sensor_id: key.sensor_id.clone(),
            machine_id: key.machine_id.clone(),
            value,
            timestamp,
        }
    }
}

/// One record of an inbound push. Batches arrive newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub value: serde_json::Value,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_machine: Option<String>,
    #[serde(default, alias = "sensorId", skip_serializing_if = "Option::is_none")]
    pub id_sensor: Option<String>,
}

impl RawRecord {
    #[cfg(test)]
    pub fn scalar(value: f64, date: DateTime<Utc>) -> Self {
        Self {
            value: serde_json::json!(value),
            date,
            id_machine: None,
            id_sensor: None,
        }
    }

    /// Numeric view of the value. Digital sensors report booleans.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}
