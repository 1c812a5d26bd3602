// Render model - what a diagram instance shows after a refresh
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::diagram::{DiagramType, SlotType};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSlot {
    pub slot_type: SlotType,
    pub index: u32,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub sensor_id: Option<String>,
    pub value: Option<f64>,
    /// Empty when the slot has no reading.
    pub display: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderGroup {
    pub key: String,
    pub index: u32,
    pub label: String,
    pub slots: Vec<RenderSlot>,
    pub temperature_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderModel {
    pub instance_id: String,
    pub machine_id: String,
    pub diagram_type: DiagramType,
    pub groups: Vec<RenderGroup>,
    pub rendered_at: DateTime<Utc>,
}

/// Mean of the given values; `0.0` when there are none.
pub fn average(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

pub fn format_value(value: Option<f64>, decimals: u8) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", decimals as usize, v),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_of_nothing_is_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[f64::NAN]), 0.0);
    }

    #[test]
    fn test_average_ignores_non_finite() {
        assert_eq!(average(&[400.0, 420.0, f64::INFINITY]), 410.0);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(Some(81.456), 1), "81.5");
        assert_eq!(format_value(Some(3.0), 0), "3");
        assert_eq!(format_value(None, 2), "");
    }
}
