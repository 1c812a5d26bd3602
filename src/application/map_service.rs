// Map service - machines tracked on the map and the current selection
use crate::application::hub::{HubError, HubHandle};
use crate::application::map_events::MapEventBus;
use crate::application::ports::SensorStateRepository;
use crate::domain::marker::{DisplayOptions, MachineDetails, MapEvent, MarkerSensors};
use crate::domain::topic::normalize_sensor_id;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct MapService {
    hub: HubHandle,
    sensor_states: Arc<dyn SensorStateRepository>,
    selected: watch::Receiver<Option<String>>,
}

impl MapService {
    /// Registers the selection handler on `bus`.
    pub fn new(hub: HubHandle, sensor_states: Arc<dyn SensorStateRepository>, bus: &MapEventBus) -> Self {
        let (selection, selected) = watch::channel(None);
        bus.register(move |event| match event {
            MapEvent::SelectMachine { machine_id } => {
                tracing::info!("Machine {} selected on map", machine_id);
                selection.send_replace(Some(machine_id));
            }
        });
        Self {
            hub,
            sensor_states,
            selected,
        }
    }

    /// Start tracking a machine, seeded with its last known position and course.
    pub async fn attach(&self, machine: MachineDetails, sensors: MarkerSensors) -> Result<(), HubError> {
        let sensor_ids: Vec<String> = [&sensors.position_sensor, &sensors.course_sensor]
            .into_iter()
            .filter_map(|s| s.as_deref().and_then(normalize_sensor_id))
            .collect();

        let last_states = if sensor_ids.is_empty() {
            Vec::new()
        } else {
            self.sensor_states
                .last_states(&machine.id, &sensor_ids)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to load last position of {}: {:#}", machine.id, e);
                    Vec::new()
                })
        };

        self.hub.attach_machine(machine, sensors, last_states).await
    }

    pub async fn detach(&self, machine_id: &str) -> Result<bool, HubError> {
        self.hub.detach_machine(machine_id.to_string()).await
    }

    pub async fn set_display_options(&self, options: DisplayOptions) -> Result<(), HubError> {
        self.hub.set_display_options(options).await
    }

    /// Trigger the popup action of a machine's marker.
    pub async fn select(&self, machine_id: &str) -> Result<bool, HubError> {
        self.hub.select_machine(machine_id.to_string()).await
    }

    pub fn selected_machine(&self) -> Option<String> {
        self.selected.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::diagram_reconciler::tests::RecordingSurface;
    use crate::application::hub::{HubSettings, TelemetryHub};
    use crate::application::ports::{MarkerHandle, MarkerLayer};
    use crate::application::topic_registry::tests::RecordingTransport;
    use crate::domain::marker::Marker;
    use crate::domain::reading::RawRecord;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct LastPosition;

    #[async_trait]
    impl SensorStateRepository for LastPosition {
        async fn last_states(&self, _machine_id: &str, _sensors: &[String]) -> anyhow::Result<Vec<RawRecord>> {
            Ok(vec![RawRecord {
                value: serde_json::json!({"lat": -22.9, "lon": -43.1}),
                date: Utc::now(),
                id_machine: Some("M1".into()),
                id_sensor: Some("gps".into()),
            }])
        }
    }

    #[derive(Default)]
    struct CountingLayer {
        added: Mutex<Vec<Marker>>,
    }

    impl MarkerLayer for CountingLayer {
        fn add(&self, marker: Marker) -> MarkerHandle {
            let mut added = self.added.lock().unwrap();
            added.push(marker);
            MarkerHandle(added.len() as u64)
        }

        fn remove(&self, _handle: MarkerHandle) {}
    }

    #[tokio::test]
    async fn test_attach_seeds_position_and_select_updates_selection() {
        let layer = Arc::new(CountingLayer::default());
        let bus = MapEventBus::new(8);
        let (hub, handle) = TelemetryHub::new(
            Arc::new(RecordingTransport::default()),
            Arc::new(RecordingSurface::default()),
            layer.clone(),
            bus.clone(),
            HubSettings {
                settle_delay: Duration::from_millis(500),
                default_refresh_interval: Duration::from_secs(60),
                refresh_intervals: HashMap::new(),
            },
        );
        tokio::spawn(hub.run());
        let service = MapService::new(handle, Arc::new(LastPosition), &bus);

        service
            .attach(
                MachineDetails {
                    id: "M1".into(),
                    code: Some("PSV-01".into()),
                    name: None,
                    icon_url: None,
                    color: None,
                },
                MarkerSensors {
                    position_sensor: Some("gps".into()),
                    course_sensor: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(layer.added.lock().unwrap()[0].latitude, -22.9);

        assert!(service.select("M1").await.unwrap());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.selected_machine().as_deref(), Some("M1"));
    }
}
