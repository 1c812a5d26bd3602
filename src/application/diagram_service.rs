// Diagram service - mount, edit and persistence use cases
use crate::application::hub::{DiagramStatus, HubError, HubHandle};
use crate::application::ports::{DiagramRepository, SensorStateRepository};
use crate::application::slot_binding_store::DiagramEdit;
use crate::domain::diagram::{DiagramModel, DiagramType};
use crate::domain::errors::BindingError;
use crate::domain::reading::RawRecord;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("failed to save diagram")]
    Persistence(#[source] anyhow::Error),
}

impl From<BindingError> for DiagramError {
    fn from(error: BindingError) -> Self {
        DiagramError::Hub(HubError::Binding(error))
    }
}

struct SaveRequest {
    model: DiagramModel,
    done: Option<oneshot::Sender<anyhow::Result<()>>>,
}

/// Saves diagrams one at a time, in submission order.
#[derive(Debug, Clone)]
pub struct DiagramPersister {
    sender: mpsc::UnboundedSender<SaveRequest>,
}

impl DiagramPersister {
    pub fn spawn(repository: Arc<dyn DiagramRepository>) -> Self {
        let (sender, mut requests) = mpsc::unbounded_channel::<SaveRequest>();
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let result = repository.save(&request.model).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        "Failed to save {} diagram of {}: {:#}",
                        request.model.diagram_type.as_str(),
                        request.model.machine_id,
                        e
                    );
                }
                if let Some(done) = request.done {
                    let _ = done.send(result);
                }
            }
        });
        Self { sender }
    }

    /// Queue a save without waiting for it.
    pub fn submit(&self, model: DiagramModel) {
        let _ = self.sender.send(SaveRequest { model, done: None });
    }

    /// Queue a save behind any pending ones and wait for its result.
    pub async fn save(&self, model: DiagramModel) -> anyhow::Result<()> {
        let (done, result) = oneshot::channel();
        self.sender
            .send(SaveRequest {
                model,
                done: Some(done),
            })
            .map_err(|_| anyhow::anyhow!("diagram persister stopped"))?;
        result
            .await
            .map_err(|_| anyhow::anyhow!("diagram persister stopped"))?
    }
}

#[derive(Clone)]
pub struct DiagramService {
    hub: HubHandle,
    repository: Arc<dyn DiagramRepository>,
    sensor_states: Arc<dyn SensorStateRepository>,
    persister: DiagramPersister,
}

impl DiagramService {
    pub fn new(
        hub: HubHandle,
        repository: Arc<dyn DiagramRepository>,
        sensor_states: Arc<dyn SensorStateRepository>,
    ) -> Self {
        let persister = DiagramPersister::spawn(repository.clone());
        Self {
            hub,
            repository,
            sensor_states,
            persister,
        }
    }

    /// Load the machine's diagram and mount it live. Missing or unreadable
    /// diagrams mount empty.
    pub async fn mount(
        &self,
        instance_id: &str,
        machine_id: &str,
        diagram_type: DiagramType,
    ) -> Result<(), DiagramError> {
        let model = self.load_or_empty(machine_id, diagram_type).await;
        let sensors: Vec<String> = model.bound_sensors().into_iter().collect();
        let last_states = self.last_states(machine_id, &sensors).await;

        tracing::info!(
            "Mounting {} diagram of {} as {}",
            diagram_type.as_str(),
            machine_id,
            instance_id
        );
        self.hub
            .mount_diagram(instance_id.to_string(), model, last_states)
            .await?;
        Ok(())
    }

    pub async fn unmount(&self, instance_id: &str) -> Result<bool, DiagramError> {
        Ok(self.hub.unmount_diagram(instance_id.to_string()).await?)
    }

    pub async fn status(&self, instance_id: &str) -> Result<DiagramStatus, DiagramError> {
        self.hub
            .describe_diagram(instance_id.to_string())
            .await?
            .ok_or_else(|| BindingError::UnknownInstance(instance_id.to_string()).into())
    }

    pub async fn enter_edit(&self, instance_id: &str) -> Result<(), DiagramError> {
        self.hub.enter_edit(instance_id.to_string()).await?;
        tracing::info!("Diagram {} entered edit mode", instance_id);
        Ok(())
    }

    /// Apply an edit; the resulting model is queued for saving right away.
    pub async fn edit(&self, instance_id: &str, edit: DiagramEdit) -> Result<DiagramModel, DiagramError> {
        let model = self.hub.edit_diagram(instance_id.to_string(), edit).await?;
        self.persister.submit(model.clone());
        Ok(model)
    }

    /// Save the edited model, reload it and return to live refresh.
    /// A failed save keeps the diagram in edit mode.
    pub async fn finish_edit(&self, instance_id: &str) -> Result<DiagramStatus, DiagramError> {
        let status = self.status(instance_id).await?;
        self.persister
            .save(status.model.clone())
            .await
            .map_err(DiagramError::Persistence)?;

        let reloaded = match self
            .repository
            .load(&status.model.machine_id, status.model.diagram_type)
            .await
        {
            Ok(Some(model)) => model,
            Ok(None) => status.model.clone(),
            Err(e) => {
                tracing::warn!("Reload after save failed for {}: {:#}", instance_id, e);
                status.model.clone()
            }
        };

        self.hub
            .resume_live(instance_id.to_string(), reloaded)
            .await?;
        tracing::info!("Diagram {} back to live", instance_id);
        self.status(instance_id).await
    }

    async fn load_or_empty(&self, machine_id: &str, diagram_type: DiagramType) -> DiagramModel {
        match self.repository.load(machine_id, diagram_type).await {
            Ok(Some(model)) => model,
            Ok(None) => DiagramModel::empty(machine_id, diagram_type),
            Err(e) => {
                tracing::warn!(
                    "Failed to load {} diagram of {}: {:#}",
                    diagram_type.as_str(),
                    machine_id,
                    e
                );
                DiagramModel::empty(machine_id, diagram_type)
            }
        }
    }

    async fn last_states(&self, machine_id: &str, sensors: &[String]) -> Vec<RawRecord> {
        if sensors.is_empty() {
            return Vec::new();
        }
        self.sensor_states
            .last_states(machine_id, sensors)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load last states of {}: {:#}", machine_id, e);
                Vec::new()
            })
    }
}
