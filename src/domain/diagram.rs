// Diagram domain model - groups of sensor slots per machine
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use super::topic::normalize_sensor_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagramType {
    #[serde(rename = "UNIFILAR")]
    Unifilar,
    #[serde(rename = "UNIFILAR_4DG")]
    Unifilar4Dg,
    #[serde(rename = "PMS")]
    Pms,
    #[serde(rename = "ENGINEV16")]
    EngineV16,
    #[serde(rename = "AZIMUTAL")]
    Azimutal,
    #[serde(rename = "CONSUMO")]
    Consumo,
    #[serde(rename = "BOW_THRUSTER")]
    BowThruster,
}

impl DiagramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::Unifilar => "UNIFILAR",
            DiagramType::Unifilar4Dg => "UNIFILAR_4DG",
            DiagramType::Pms => "PMS",
            DiagramType::EngineV16 => "ENGINEV16",
            DiagramType::Azimutal => "AZIMUTAL",
            DiagramType::Consumo => "CONSUMO",
            DiagramType::BowThruster => "BOW_THRUSTER",
        }
    }

    /// Slots and label prefix of a freshly added group.
    pub fn group_template(&self) -> GroupTemplate {
        match self {
            DiagramType::Pms => GroupTemplate {
                label_prefix: "G",
                slots: indexed(SlotType::Temperature, 12, |_| None)
                    .chain([
                        SlotBinding::unbound(SlotType::Status, 1),
                        SlotBinding::unbound(SlotType::Load, 1),
                    ])
                    .collect(),
            },
            DiagramType::EngineV16 => GroupTemplate {
                label_prefix: "G",
                slots: indexed(SlotType::Temperature, 16, |_| None)
                    .chain(indexed(SlotType::TurboChargerSpeed, 2, |i| {
                        Some(format!("TurboCharger {} Speed", i))
                    }))
                    .chain([
                        SlotBinding::unbound(SlotType::Status, 1),
                        SlotBinding::unbound(SlotType::Speed, 1),
                    ])
                    .collect(),
            },
            DiagramType::Azimutal => GroupTemplate {
                label_prefix: "AT",
                slots: indexed(SlotType::AzimuthInfo, 2, |_| None)
                    .chain([SlotBinding::unbound(SlotType::Status, 1)])
                    .collect(),
            },
            DiagramType::BowThruster => GroupTemplate {
                label_prefix: "BT",
                slots: indexed(SlotType::BowThrusterInfo, 2, |_| None)
                    .chain([SlotBinding::unbound(SlotType::Status, 1)])
                    .collect(),
            },
            DiagramType::Unifilar | DiagramType::Unifilar4Dg | DiagramType::Consumo => {
                GroupTemplate {
                    label_prefix: "G",
                    slots: Vec::new(),
                }
            }
        }
    }
}

fn indexed(
    slot_type: SlotType,
    count: u32,
    label: impl Fn(u32) -> Option<String>,
) -> impl Iterator<Item = SlotBinding> {
    (1..=count).map(move |i| {
        let mut slot = SlotBinding::unbound(slot_type, i);
        slot.config.label = label(i);
        slot
    })
}

#[derive(Debug, Clone)]
pub struct GroupTemplate {
    pub label_prefix: &'static str,
    pub slots: Vec<SlotBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotType {
    Status,
    Info,
    Temperature,
    Load,
    Speed,
    TurboChargerSpeed,
    AzimuthInfo,
    BowThrusterInfo,
    Gauge,
}

/// How an edit finds its slot inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAddressing {
    /// One slot of this kind per group; the index is ignored.
    ByType,
    ByIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditableFields {
    pub label: bool,
    pub unit: bool,
    pub size_decimals: bool,
    pub range: bool,
    pub value_type: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotKind {
    pub addressing: SlotAddressing,
    pub editable: EditableFields,
    /// Free slots are removed when their sensor is cleared and may be added by the operator.
    pub free: bool,
}

impl SlotType {
    /// The single dispatch table for every slot kind.
    pub fn kind(&self) -> SlotKind {
        const DECIMALS_ONLY: EditableFields = EditableFields {
            label: false,
            unit: false,
            size_decimals: true,
            range: false,
            value_type: false,
        };
        const DESCRIBED: EditableFields = EditableFields {
            label: true,
            unit: true,
            size_decimals: true,
            range: false,
            value_type: false,
        };

        match self {
            SlotType::Status => SlotKind {
                addressing: SlotAddressing::ByType,
                editable: EditableFields::default(),
                free: false,
            },
            SlotType::Load | SlotType::Speed => SlotKind {
                addressing: SlotAddressing::ByType,
                editable: DECIMALS_ONLY,
                free: false,
            },
            SlotType::Temperature | SlotType::TurboChargerSpeed => SlotKind {
                addressing: SlotAddressing::ByIndex,
                editable: DECIMALS_ONLY,
                free: false,
            },
            SlotType::Info => SlotKind {
                addressing: SlotAddressing::ByIndex,
                editable: EditableFields {
                    value_type: true,
                    ..DESCRIBED
                },
                free: true,
            },
            SlotType::AzimuthInfo | SlotType::BowThrusterInfo => SlotKind {
                addressing: SlotAddressing::ByIndex,
                editable: DESCRIBED,
                free: true,
            },
            SlotType::Gauge => SlotKind {
                addressing: SlotAddressing::ByIndex,
                editable: EditableFields {
                    range: true,
                    ..DESCRIBED
                },
                free: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Analogic,
    Digital,
}

/// Display configuration of a slot. Which fields apply depends on the slot kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
}

impl SlotConfig {
    /// Copy the fields the slot kind lets an operator edit.
    pub fn merge_editable(&mut self, incoming: &SlotConfig, editable: EditableFields) {
        if editable.label {
            self.label = incoming.label.clone();
        }
        if editable.value_type {
            self.value_type = incoming.value_type;
        }
        if editable.unit {
            // Digital values carry no unit.
            self.unit = match self.value_type {
                Some(ValueType::Digital) => None,
                _ => incoming.unit.clone(),
            };
        }
        if editable.size_decimals {
            self.size_decimals = incoming.size_decimals;
        }
        if editable.range {
            self.min = incoming.min;
            self.max = incoming.max;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotBinding {
    #[serde(rename = "typeSensor")]
    pub slot_type: SlotType,
    #[serde(default = "default_index")]
    pub index: u32,
    #[serde(rename = "idSensor", default, deserialize_with = "deserialize_sensor_id")]
    pub sensor_id: Option<String>,
    #[serde(flatten)]
    pub config: SlotConfig,
}

fn default_index() -> u32 {
    1
}

impl SlotBinding {
    pub fn unbound(slot_type: SlotType, index: u32) -> Self {
        Self {
            slot_type,
            index,
            sensor_id: None,
            config: SlotConfig::default(),
        }
    }

    pub fn matches(&self, slot_type: SlotType, index: u32) -> bool {
        self.slot_type == slot_type
            && match slot_type.kind().addressing {
                SlotAddressing::ByType => true,
                SlotAddressing::ByIndex => self.index == index,
            }
    }
}

/// Accepts strings, numbers or null; `"0"`, `0` and `""` mean unbound.
fn deserialize_sensor_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSensorId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<RawSensorId>::deserialize(deserializer)? {
        Some(RawSensorId::Text(text)) => normalize_sensor_id(&text),
        Some(RawSensorId::Number(number)) => normalize_sensor_id(&number.to_string()),
        None => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramGroup {
    pub key: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "sensors", default)]
    pub slots: Vec<SlotBinding>,
}

impl DiagramGroup {
    pub fn slot(&self, slot_type: SlotType, index: u32) -> Option<&SlotBinding> {
        self.slots.iter().find(|s| s.matches(slot_type, index))
    }
}

/// All groups of one diagram for one machine; persisted as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramModel {
    #[serde(rename = "idMachine")]
    pub machine_id: String,
    #[serde(rename = "typeIHM")]
    pub diagram_type: DiagramType,
    #[serde(default)]
    pub groups: Vec<DiagramGroup>,
}

impl DiagramModel {
    pub fn empty(machine_id: impl Into<String>, diagram_type: DiagramType) -> Self {
        Self {
            machine_id: machine_id.into(),
            diagram_type,
            groups: Vec::new(),
        }
    }

    pub fn group(&self, key: &str) -> Option<&DiagramGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Every sensor some slot is bound to.
    pub fn bound_sensors(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .flat_map(|g| g.slots.iter())
            .filter_map(|s| s.sensor_id.clone())
            .collect()
    }

    pub fn sorted_groups(&self) -> Vec<&DiagramGroup> {
        let mut groups: Vec<&DiagramGroup> = self.groups.iter().collect();
        groups.sort_by_key(|g| g.index);
        groups
    }
}
