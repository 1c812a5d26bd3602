// Ports - the seams between the core and its collaborators
use crate::domain::diagram::{DiagramModel, DiagramType};
use crate::domain::marker::Marker;
use crate::domain::reading::RawRecord;
use crate::domain::render::RenderModel;
use crate::domain::topic::ChannelCommand;
use crate::domain::virtual_sensor::{VirtualSensorRecord, VirtualSensorSpec};
use async_trait::async_trait;

/// Outbound side of the pub/sub transport. Fire and forget.
pub trait ChannelTransport: Send + Sync {
    fn send(&self, command: ChannelCommand);
}

/// Rendering layer for diagrams. It has no per-slot update, only clear and mount.
pub trait DiagramSurface: Send + Sync {
    fn clear(&self, instance_id: &str);
    fn mount(&self, model: RenderModel);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerHandle(pub u64);

/// One map instance's marker layer.
pub trait MarkerLayer: Send + Sync {
    fn add(&self, marker: Marker) -> MarkerHandle;
    fn remove(&self, handle: MarkerHandle);
}

#[async_trait]
pub trait DiagramRepository: Send + Sync {
    /// Load the stored diagram; `None` when the machine has none yet
    async fn load(
        &self,
        machine_id: &str,
        diagram_type: DiagramType,
    ) -> anyhow::Result<Option<DiagramModel>>;

    async fn save(&self, model: &DiagramModel) -> anyhow::Result<()>;
}

#[async_trait]
pub trait VirtualSensorRepository: Send + Sync {
    async fn list(&self, machine_id: &str) -> anyhow::Result<Vec<VirtualSensorRecord>>;

    async fn create(&self, spec: &VirtualSensorSpec) -> anyhow::Result<()>;

    async fn delete(&self, sensor_id: &str) -> anyhow::Result<()>;

    /// Whether a sensor with this external identifier already exists in the enterprise
    async fn sensor_exists(&self, sensor_id: &str, id_enterprise: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait SensorStateRepository: Send + Sync {
    /// Last known record of each sensor, tagged with `idSensor`/`idMachine`
    async fn last_states(
        &self,
        machine_id: &str,
        sensor_ids: &[String],
    ) -> anyhow::Result<Vec<RawRecord>>;
}
