// Error taxonomy of the binding and templating subsystems
use thiserror::Error;

use super::diagram::SlotType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlgorithmError {
    #[error("algorithm references no sensors")]
    NoPlaceholders,
    #[error("invalid sensor identifier: {0:?}")]
    InvalidSensorId(String),
    #[error("virtual sensor name is required")]
    MissingSensorOut,
}

#[derive(Debug, Error)]
pub enum VirtualSensorError {
    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),
    #[error("sensor id {sensor_id:?} already exists")]
    SensorIdConflict { sensor_id: String },
    #[error("virtual sensor request failed")]
    Transport(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("diagram instance {0:?} is not mounted")]
    UnknownInstance(String),
    #[error("group {0:?} not found")]
    UnknownGroup(String),
    #[error("no {slot_type:?} slot with index {index} in group {group_key:?}")]
    UnknownSlot {
        group_key: String,
        slot_type: SlotType,
        index: u32,
    },
    #[error("diagram is not in edit mode")]
    NotEditing,
    #[error("{slot_type:?} slots cannot be added or removed")]
    FixedSlot { slot_type: SlotType },
}

/// A required channel has no sensor configured. Logged and skipped, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("machine {machine_id:?} has no {channel} sensor configured")]
pub struct SubscriptionError {
    pub machine_id: String,
    pub channel: &'static str,
}
