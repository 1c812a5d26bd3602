// Virtual sensor domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage form of a derived sensor; `algorithm` uses positional `{0}`, `{1}`... placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSensorSpec {
    pub id_enterprise: String,
    pub id_machine: String,
    pub sensors_in: Vec<String>,
    pub algorithm: String,
    pub sensor_out: String,
    pub sensor_id: String,
}

/// What an operator authors: the algorithm references sensors by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSensorDraft {
    pub id_enterprise: String,
    pub id_machine: String,
    pub sensor_out: String,
    pub sensor_id: String,
    pub algorithm: String,
}

/// A stored virtual sensor as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSensorRecord {
    #[serde(flatten)]
    pub spec: VirtualSensorSpec,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedAtOrder {
    #[default]
    None,
    Asc,
    Desc,
}

impl CreatedAtOrder {
    /// Column header toggle: unsorted and descending both go to ascending.
    pub fn toggled(self) -> Self {
        match self {
            CreatedAtOrder::None | CreatedAtOrder::Desc => CreatedAtOrder::Asc,
            CreatedAtOrder::Asc => CreatedAtOrder::Desc,
        }
    }
}

/// Stable sort; records without a creation date sort first when ascending.
pub fn sort_by_created_at(records: &mut [VirtualSensorRecord], order: CreatedAtOrder) {
    match order {
        CreatedAtOrder::None => {}
        CreatedAtOrder::Asc => records.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        CreatedAtOrder::Desc => records.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}
