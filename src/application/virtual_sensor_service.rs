// Virtual sensor service - authoring, listing and removal of derived sensors
use crate::application::ports::VirtualSensorRepository;
use crate::application::template_codec::{extract, reconstruct, ExtractedTemplate};
use crate::domain::errors::{AlgorithmError, VirtualSensorError};
use crate::domain::virtual_sensor::{
    sort_by_created_at, CreatedAtOrder, VirtualSensorDraft, VirtualSensorRecord, VirtualSensorSpec,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct VirtualSensorService {
    repository: Arc<dyn VirtualSensorRepository>,
}

impl VirtualSensorService {
    pub fn new(repository: Arc<dyn VirtualSensorRepository>) -> Self {
        Self { repository }
    }

    pub async fn list(
        &self,
        machine_id: &str,
        order: CreatedAtOrder,
    ) -> Result<Vec<VirtualSensorRecord>, VirtualSensorError> {
        let mut records = self
            .repository
            .list(machine_id)
            .await
            .map_err(VirtualSensorError::Transport)?;
        sort_by_created_at(&mut records, order);
        Ok(records)
    }

    /// Fails with `SensorIdConflict` when the identifier is taken.
    pub async fn validate_sensor_id(
        &self,
        sensor_id: &str,
        id_enterprise: &str,
    ) -> Result<(), VirtualSensorError> {
        let exists = self
            .repository
            .sensor_exists(sensor_id, id_enterprise)
            .await
            .map_err(VirtualSensorError::Transport)?;
        if exists {
            return Err(VirtualSensorError::SensorIdConflict {
                sensor_id: sensor_id.to_string(),
            });
        }
        Ok(())
    }

    /// Nothing is created when the identifier is already in use.
    pub async fn create(&self, draft: VirtualSensorDraft) -> Result<VirtualSensorSpec, VirtualSensorError> {
        let spec = to_spec(draft)?;
        self.validate_sensor_id(&spec.sensor_id, &spec.id_enterprise)
            .await?;
        self.repository
            .create(&spec)
            .await
            .map_err(VirtualSensorError::Transport)?;
        tracing::info!("Created virtual sensor {} on {}", spec.sensor_id, spec.id_machine);
        Ok(spec)
    }

    /// The identifier already belongs to the edited sensor, so it is not checked.
    pub async fn update(&self, draft: VirtualSensorDraft) -> Result<VirtualSensorSpec, VirtualSensorError> {
        let spec = to_spec(draft)?;
        self.repository
            .create(&spec)
            .await
            .map_err(VirtualSensorError::Transport)?;
        tracing::info!("Updated virtual sensor {}", spec.sensor_id);
        Ok(spec)
    }

    pub async fn delete(&self, sensor_id: &str) -> Result<(), VirtualSensorError> {
        self.repository
            .delete(sensor_id)
            .await
            .map_err(VirtualSensorError::Transport)?;
        tracing::info!("Deleted virtual sensor {}", sensor_id);
        Ok(())
    }

    pub fn preview(algorithm: &str) -> Result<ExtractedTemplate, AlgorithmError> {
        extract(algorithm)
    }

    /// Draft shown when an operator opens a stored sensor.
    pub fn edit_view(spec: &VirtualSensorSpec) -> VirtualSensorDraft {
        VirtualSensorDraft {
            id_enterprise: spec.id_enterprise.clone(),
            id_machine: spec.id_machine.clone(),
            sensor_out: spec.sensor_out.clone(),
            sensor_id: spec.sensor_id.clone(),
            algorithm: reconstruct(&spec.algorithm, &spec.sensors_in),
        }
    }
}

fn to_spec(draft: VirtualSensorDraft) -> Result<VirtualSensorSpec, AlgorithmError> {
    let sensor_out = draft.sensor_out.trim();
    if sensor_out.is_empty() {
        return Err(AlgorithmError::MissingSensorOut);
    }
    let sensor_id = draft.sensor_id.trim();
    if sensor_id.is_empty() || sensor_id.chars().any(char::is_whitespace) {
        return Err(AlgorithmError::InvalidSensorId(draft.sensor_id.clone()));
    }

    let template = extract(&draft.algorithm)?;
    Ok(VirtualSensorSpec {
        id_enterprise: draft.id_enterprise,
        id_machine: draft.id_machine,
        sensors_in: template.sensors_in,
        algorithm: template.positional_template,
        sensor_out: sensor_out.to_string(),
        sensor_id: sensor_id.to_string(),
    })
}
