// Map marker domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Icon artwork points north-east, so headings are shifted by this many degrees.
pub const HEADING_OFFSET_DEGREES: f64 = 45.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetails {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Sensors feeding a marker. Either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSensors {
    #[serde(default, alias = "idSensorCoordinate")]
    pub position_sensor: Option<String>,
    #[serde(default, alias = "idSensorCourse")]
    pub course_sensor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseFix {
    pub course: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayOptions {
    #[serde(default)]
    pub show_code: bool,
    #[serde(default)]
    pub show_name: bool,
}

/// Typed replacement for inline popup callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MapEvent {
    #[serde(rename_all = "camelCase")]
    SelectMachine { machine_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MarkerIcon {
    Image { url: String },
    Arrow { color: Option<String> },
}

/// Static marker content. Built once per mount, never relabelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub machine_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub icon: MarkerIcon,
    pub tooltip: Option<String>,
    pub popup_title: String,
    pub popup_action: MapEvent,
}

impl Marker {
    pub fn build(
        machine: &MachineDetails,
        position: &PositionFix,
        course: Option<&CourseFix>,
        options: DisplayOptions,
    ) -> Self {
        let heading = course.map(|c| c.course).unwrap_or(0.0) - HEADING_OFFSET_DEGREES;
        let icon = match &machine.icon_url {
            Some(url) if !url.is_empty() => MarkerIcon::Image { url: url.clone() },
            _ => MarkerIcon::Arrow {
                color: machine.color.clone(),
            },
        };

        Self {
            machine_id: machine.id.clone(),
            latitude: position.latitude,
            longitude: position.longitude,
            heading,
            icon,
            tooltip: tooltip_text(machine, options),
            popup_title: join_code_name(machine.code.as_deref(), machine.name.as_deref()),
            popup_action: MapEvent::SelectMachine {
                machine_id: machine.id.clone(),
            },
        }
    }
}

fn tooltip_text(machine: &MachineDetails, options: DisplayOptions) -> Option<String> {
    let code = machine
        .code
        .as_deref()
        .filter(|c| options.show_code && !c.is_empty());
    let name = machine
        .name
        .as_deref()
        .filter(|n| options.show_name && !n.is_empty());
    let text = join_code_name(code, name);
    if text.is_empty() { None } else { Some(text) }
}

fn join_code_name(code: Option<&str>, name: Option<&str>) -> String {
    match (code.filter(|c| !c.is_empty()), name.filter(|n| !n.is_empty())) {
        (Some(code), Some(name)) => format!("{} - {}", code, name),
        (Some(code), None) => code.to_string(),
        (None, Some(name)) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Accepts `[lat, lon]`, `{lat, lon}` or `{latitude, longitude}`.
pub fn normalize_position(value: &serde_json::Value) -> Option<(f64, f64)> {
    let pair = match value {
        serde_json::Value::Array(items) if items.len() == 2 => {
            (coordinate(&items[0])?, coordinate(&items[1])?)
        }
        serde_json::Value::Object(map) => {
            let lat = map.get("lat").or_else(|| map.get("latitude"))?;
            let lon = map.get("lon").or_else(|| map.get("longitude"))?;
            (coordinate(lat)?, coordinate(lon)?)
        }
        _ => return None,
    };

    let (lat, lon) = pair;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Some(pair)
    } else {
        None
    }
}

fn coordinate(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
