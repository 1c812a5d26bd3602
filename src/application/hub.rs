// Telemetry hub - single task owning registry, cache, diagrams and markers
use crate::application::diagram_reconciler::{DiagramReconciler, ReconcilerMode, RefreshSettings};
use crate::application::map_events::MapEventBus;
use crate::application::marker_manager::MarkerLifecycleManager;
use crate::application::ports::{ChannelTransport, DiagramSurface, MarkerLayer};
use crate::application::reading_normalizer::{IngestOutcome, SensorReadingNormalizer};
use crate::application::slot_binding_store::DiagramEdit;
use crate::application::timers::{Scheduler, TimerEvent};
use crate::application::topic_registry::{SubscriberId, TopicRegistry};
use crate::domain::diagram::{DiagramModel, DiagramType};
use crate::domain::errors::BindingError;
use crate::domain::marker::{DisplayOptions, MachineDetails, MarkerSensors};
use crate::domain::reading::{RawRecord, SensorKey, SensorReading};
use crate::domain::topic::ChannelTopic;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("telemetry hub is not running")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub settle_delay: Duration,
    pub default_refresh_interval: Duration,
    pub refresh_intervals: HashMap<DiagramType, Duration>,
}

impl HubSettings {
    pub fn refresh_for(&self, diagram_type: DiagramType) -> RefreshSettings {
        RefreshSettings {
            interval: self
                .refresh_intervals
                .get(&diagram_type)
                .copied()
                .unwrap_or(self.default_refresh_interval),
            settle_delay: self.settle_delay,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramStatus {
    pub instance_id: String,
    pub mode: ReconcilerMode,
    pub model: DiagramModel,
}

type Reply<T> = oneshot::Sender<T>;

pub enum HubCommand {
    Push {
        topic: ChannelTopic,
        records: Vec<RawRecord>,
    },
    MountDiagram {
        instance_id: String,
        model: DiagramModel,
        last_states: Vec<RawRecord>,
        reply: Reply<()>,
    },
    UnmountDiagram {
        instance_id: String,
        reply: Reply<bool>,
    },
    EnterEdit {
        instance_id: String,
        reply: Reply<Result<(), BindingError>>,
    },
    EditDiagram {
        instance_id: String,
        edit: DiagramEdit,
        reply: Reply<Result<DiagramModel, BindingError>>,
    },
    ResumeLive {
        instance_id: String,
        model: DiagramModel,
        reply: Reply<Result<(), BindingError>>,
    },
    DescribeDiagram {
        instance_id: String,
        reply: Reply<Option<DiagramStatus>>,
    },
    AttachMachine {
        machine: MachineDetails,
        sensors: MarkerSensors,
        last_states: Vec<RawRecord>,
        reply: Reply<()>,
    },
    DetachMachine {
        machine_id: String,
        reply: Reply<bool>,
    },
    SetDisplayOptions {
        options: DisplayOptions,
        reply: Reply<()>,
    },
    SelectMachine {
        machine_id: String,
        reply: Reply<bool>,
    },
    Shutdown,
}

/// Cloneable front door to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Queue an inbound push. Does not wait for it to be processed.
    pub fn push(&self, topic: ChannelTopic, records: Vec<RawRecord>) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::Push { topic, records })
            .map_err(|_| HubError::Stopped)
    }

    pub async fn mount_diagram(
        &self,
        instance_id: String,
        model: DiagramModel,
        last_states: Vec<RawRecord>,
    ) -> Result<(), HubError> {
        self.request(|reply| HubCommand::MountDiagram {
            instance_id,
            model,
            last_states,
            reply,
        })
        .await
    }

    pub async fn unmount_diagram(&self, instance_id: String) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::UnmountDiagram { instance_id, reply })
            .await
    }

    pub async fn enter_edit(&self, instance_id: String) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::EnterEdit { instance_id, reply })
            .await??)
    }

    pub async fn edit_diagram(
        &self,
        instance_id: String,
        edit: DiagramEdit,
    ) -> Result<DiagramModel, HubError> {
        Ok(self
            .request(|reply| HubCommand::EditDiagram {
                instance_id,
                edit,
                reply,
            })
            .await??)
    }

    pub async fn resume_live(&self, instance_id: String, model: DiagramModel) -> Result<(), HubError> {
        Ok(self
            .request(|reply| HubCommand::ResumeLive {
                instance_id,
                model,
                reply,
            })
            .await??)
    }

    pub async fn describe_diagram(&self, instance_id: String) -> Result<Option<DiagramStatus>, HubError> {
        self.request(|reply| HubCommand::DescribeDiagram { instance_id, reply })
            .await
    }

    pub async fn attach_machine(
        &self,
        machine: MachineDetails,
        sensors: MarkerSensors,
        last_states: Vec<RawRecord>,
    ) -> Result<(), HubError> {
        self.request(|reply| HubCommand::AttachMachine {
            machine,
            sensors,
            last_states,
            reply,
        })
        .await
    }

    pub async fn detach_machine(&self, machine_id: String) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::DetachMachine { machine_id, reply })
            .await
    }

    pub async fn set_display_options(&self, options: DisplayOptions) -> Result<(), HubError> {
        self.request(|reply| HubCommand::SetDisplayOptions { options, reply })
            .await
    }

    pub async fn select_machine(&self, machine_id: String) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::SelectMachine { machine_id, reply })
            .await
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(HubCommand::Shutdown);
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> HubCommand) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .map_err(|_| HubError::Stopped)?;
        response.await.map_err(|_| HubError::Stopped)
    }
}

pub struct TelemetryHub {
    commands: mpsc::UnboundedReceiver<HubCommand>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    scheduler: Scheduler,
    registry: TopicRegistry,
    normalizer: SensorReadingNormalizer,
    diagrams: HashMap<String, DiagramReconciler>,
    markers: MarkerLifecycleManager,
    surface: Arc<dyn DiagramSurface>,
    settings: HubSettings,
}

impl TelemetryHub {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        surface: Arc<dyn DiagramSurface>,
        marker_layer: Arc<dyn MarkerLayer>,
        bus: MapEventBus,
        settings: HubSettings,
    ) -> (Self, HubHandle) {
        let (sender, commands) = mpsc::unbounded_channel();
        let (scheduler, timers) = Scheduler::new();
        let hub = Self {
            commands,
            timers,
            scheduler,
            registry: TopicRegistry::new(transport),
            normalizer: SensorReadingNormalizer::new(),
            diagrams: HashMap::new(),
            markers: MarkerLifecycleManager::new(marker_layer, bus, settings.settle_delay),
            surface,
            settings,
        };
        (hub, HubHandle { sender })
    }

    /// Process commands and timer events until shutdown, then release everything.
    pub async fn run(mut self) {
        tracing::info!("Telemetry hub started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HubCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(event) = self.timers.recv() => self.on_timer(event),
            }
        }
        self.teardown_all();
        let leaked = self.registry.joined_topics();
        if !leaked.is_empty() {
            tracing::warn!("Topics still joined after shutdown: {:?}", leaked);
        }
        tracing::info!("Telemetry hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Push { topic, records } => self.on_push(topic, records),
            HubCommand::MountDiagram {
                instance_id,
                model,
                last_states,
                reply,
            } => {
                self.mount_diagram(instance_id, model, last_states);
                let _ = reply.send(());
            }
            HubCommand::UnmountDiagram { instance_id, reply } => {
                let _ = reply.send(self.unmount_diagram(&instance_id));
            }
            HubCommand::EnterEdit { instance_id, reply } => {
                let result = match self.diagrams.get_mut(&instance_id) {
                    Some(diagram) => {
                        diagram.enter_edit(self.surface.as_ref(), &self.scheduler);
                        Ok(())
                    }
                    None => Err(BindingError::UnknownInstance(instance_id)),
                };
                let _ = reply.send(result);
            }
            HubCommand::EditDiagram {
                instance_id,
                edit,
                reply,
            } => {
                let _ = reply.send(self.edit_diagram(&instance_id, edit));
            }
            HubCommand::ResumeLive {
                instance_id,
                model,
                reply,
            } => {
                let _ = reply.send(self.resume_live(&instance_id, model));
            }
            HubCommand::DescribeDiagram { instance_id, reply } => {
                let status = self.diagrams.get(&instance_id).map(|diagram| DiagramStatus {
                    instance_id: instance_id.clone(),
                    mode: diagram.mode(),
                    model: (*diagram.model()).clone(),
                });
                let _ = reply.send(status);
            }
            HubCommand::AttachMachine {
                machine,
                sensors,
                last_states,
                reply,
            } => {
                self.attach_machine(machine, sensors, &last_states);
                let _ = reply.send(());
            }
            HubCommand::DetachMachine { machine_id, reply } => {
                let tracked = self.markers.is_tracked(&machine_id);
                let left = self.markers.detach(&machine_id, &mut self.registry);
                self.evict(&left);
                let _ = reply.send(tracked);
            }
            HubCommand::SetDisplayOptions { options, reply } => {
                self.markers.set_display_options(options, &self.scheduler);
                let _ = reply.send(());
            }
            HubCommand::SelectMachine { machine_id, reply } => {
                let _ = reply.send(self.markers.select(&machine_id));
            }
            HubCommand::Shutdown => {}
        }
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::RefreshTick { instance_id } => {
                if let Some(diagram) = self.diagrams.get_mut(&instance_id) {
                    diagram.on_tick(self.surface.as_ref(), &self.scheduler);
                }
            }
            TimerEvent::Remount {
                instance_id,
                generation,
            } => {
                if let Some(diagram) = self.diagrams.get_mut(&instance_id) {
                    diagram.on_remount(generation, self.normalizer.cache(), self.surface.as_ref());
                }
            }
            TimerEvent::MarkerRemount { generation } => {
                self.markers.on_remount(generation);
            }
        }
    }

    /// Pushes for topics nobody holds any more are dropped.
    fn on_push(&mut self, topic: ChannelTopic, records: Vec<RawRecord>) {
        if !self.registry.is_joined(&topic) {
            tracing::debug!("Dropping push for unsubscribed topic {}", topic);
            return;
        }
        let Some(key) = topic.sensor_key() else {
            return;
        };

        match self.normalizer.ingest(&key, &records) {
            IngestOutcome::Accepted(reading) => {
                tracing::debug!("{} = {} at {}", topic, reading.value, reading.timestamp);
            }
            IngestOutcome::EmptyPayload => {
                tracing::debug!("Empty push for {}", topic);
            }
            IngestOutcome::StaleReadingRejected | IngestOutcome::NonScalar => {}
        }

        for holder in self.registry.holders(&topic) {
            if let SubscriberId::Marker(machine_id) = holder {
                self.markers.on_push(&machine_id, &topic, &records);
            }
        }
    }

    fn mount_diagram(&mut self, instance_id: String, model: DiagramModel, last_states: Vec<RawRecord>) {
        self.unmount_diagram(&instance_id);

        let machine_id = model.machine_id.clone();
        let refresh = self.settings.refresh_for(model.diagram_type);
        let diagram = DiagramReconciler::mount(
            instance_id.clone(),
            model,
            refresh,
            &mut self.registry,
            &self.scheduler,
        );
        self.diagrams.insert(instance_id, diagram);

        for record in last_states {
            let (Some(sensor_id), Some(value)) = (record.id_sensor.as_deref(), record.numeric_value())
            else {
                continue;
            };
            let key = SensorKey::new(sensor_id, machine_id.as_str());
            self.normalizer
                .seed(SensorReading::new(&key, value, record.date));
        }
    }

    fn attach_machine(&mut self, machine: MachineDetails, sensors: MarkerSensors, last_states: &[RawRecord]) {
        let (_, left) = self
            .markers
            .attach(machine, sensors, last_states, &mut self.registry);
        self.evict(&left);
    }

    fn unmount_diagram(&mut self, instance_id: &str) -> bool {
        let Some(mut diagram) = self.diagrams.remove(instance_id) else {
            return false;
        };
        let left = diagram.teardown(&mut self.registry, self.surface.as_ref());
        self.evict(&left);
        tracing::debug!("Unmounted diagram {}", instance_id);
        true
    }

    fn edit_diagram(&mut self, instance_id: &str, edit: DiagramEdit) -> Result<DiagramModel, BindingError> {
        let diagram = self
            .diagrams
            .get_mut(instance_id)
            .ok_or_else(|| BindingError::UnknownInstance(instance_id.to_string()))?;
        let (model, left) =
            diagram.apply_edit(edit, &mut self.registry, self.surface.as_ref(), &self.scheduler)?;
        self.evict(&left);
        Ok((*model).clone())
    }

    fn resume_live(&mut self, instance_id: &str, model: DiagramModel) -> Result<(), BindingError> {
        let diagram = self
            .diagrams
            .get_mut(instance_id)
            .ok_or_else(|| BindingError::UnknownInstance(instance_id.to_string()))?;
        let left = diagram.resume_live(model, &mut self.registry, &self.scheduler);
        self.evict(&left);
        Ok(())
    }

    fn evict(&mut self, left: &[ChannelTopic]) {
        for topic in left {
            if let Some(key) = topic.sensor_key() {
                self.normalizer.evict(&key);
            }
        }
    }

    fn teardown_all(&mut self) {
        let instances: Vec<String> = self.diagrams.keys().cloned().collect();
        for instance_id in instances {
            self.unmount_diagram(&instance_id);
        }
        let left = self.markers.teardown(&mut self.registry);
        self.evict(&left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::diagram_reconciler::tests::RecordingSurface;
    use crate::application::ports::MarkerHandle;
    use crate::application::slot_binding_store::SlotBindingStore;
    use crate::application::topic_registry::tests::RecordingTransport;
    use crate::domain::diagram::{SlotConfig, SlotType};
    use crate::domain::marker::Marker;
    use crate::domain::topic::ChannelOp;
    use chrono::{Duration as ChronoDuration, Utc};

    struct NullLayer;

    impl MarkerLayer for NullLayer {
        fn add(&self, _marker: Marker) -> MarkerHandle {
            MarkerHandle(0)
        }

        fn remove(&self, _handle: MarkerHandle) {}
    }

    fn settings() -> HubSettings {
        HubSettings {
            settle_delay: Duration::from_millis(500),
            default_refresh_interval: Duration::from_secs(60),
            refresh_intervals: HashMap::new(),
        }
    }

    fn hub() -> (TelemetryHub, Arc<RecordingTransport>, Arc<RecordingSurface>) {
        let transport = Arc::new(RecordingTransport::default());
        let surface = Arc::new(RecordingSurface::default());
        let (hub, _handle) = TelemetryHub::new(
            transport.clone(),
            surface.clone(),
            Arc::new(NullLayer),
            MapEventBus::new(8),
            settings(),
        );
        (hub, transport, surface)
    }

    fn model_with(sensors: &[&str]) -> (DiagramModel, String) {
        let mut store = SlotBindingStore::new(DiagramModel::empty("M1", DiagramType::Pms));
        let (key, _) = store.add_group();
        for (i, sensor) in sensors.iter().enumerate() {
            store
                .bind(&key, SlotType::Temperature, i as u32 + 1, Some(sensor), &SlotConfig::default())
                .unwrap();
        }
        ((*store.model()).clone(), key)
    }

    fn topic(sensor: &str) -> ChannelTopic {
        ChannelTopic::new(sensor, "M1").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_after_unbind_is_dropped() {
        let (mut hub, transport, _surface) = hub();
        let (model, key) = model_with(&["T1"]);
        hub.mount_diagram("d1".into(), model, Vec::new());
        hub.diagrams
            .get_mut("d1")
            .unwrap()
            .enter_edit(hub.surface.as_ref(), &hub.scheduler);

        hub.edit_diagram(
            "d1",
            DiagramEdit::Unbind {
                group_key: key,
                slot_type: SlotType::Temperature,
                index: 1,
            },
        )
        .unwrap();
        assert_eq!(transport.topics(ChannelOp::Leave), vec![topic("T1")]);

        hub.on_push(topic("T1"), vec![RawRecord::scalar(1.0, Utc::now())]);
        assert!(hub.normalizer.cache().get(&SensorKey::new("T1", "M1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_topic_between_diagrams() {
        let (mut hub, transport, _surface) = hub();
        hub.mount_diagram("a".into(), model_with(&["T1"]).0, Vec::new());
        hub.mount_diagram("b".into(), model_with(&["T1"]).0, Vec::new());
        assert_eq!(transport.topics(ChannelOp::Join), vec![topic("T1")]);

        hub.unmount_diagram("a");
        assert!(transport.topics(ChannelOp::Leave).is_empty());
        hub.on_push(topic("T1"), vec![RawRecord::scalar(3.0, Utc::now())]);
        assert!(hub.normalizer.cache().get(&SensorKey::new("T1", "M1")).is_some());

        hub.unmount_diagram("b");
        assert_eq!(transport.topics(ChannelOp::Leave), vec![topic("T1")]);
        assert!(hub.normalizer.cache().get(&SensorKey::new("T1", "M1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_seeds_cache_from_last_states() {
        let (mut hub, _transport, _surface) = hub();
        let now = Utc::now();
        let mut record = RawRecord::scalar(12.5, now);
        record.id_sensor = Some("T1".into());
        hub.mount_diagram("d1".into(), model_with(&["T1"]).0, vec![record]);

        hub.on_push(
            topic("T1"),
            vec![RawRecord::scalar(99.0, now - ChronoDuration::seconds(10))],
        );
        let cached = hub.normalizer.cache().get(&SensorKey::new("T1", "M1")).unwrap();
        assert_eq!(cached.value, 12.5);

        let render = hub.diagrams["d1"].render(hub.normalizer.cache());
        let slot = render.groups[0]
            .slots
            .iter()
            .find(|s| s.sensor_id.as_deref() == Some("T1"))
            .unwrap();
        assert_eq!(slot.value, Some(12.5));
        assert_eq!(slot.timestamp, Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_evicts_replaced_course_sensor() {
        let (mut hub, transport, _surface) = hub();
        let machine = MachineDetails {
            id: "M1".into(),
            code: None,
            name: None,
            icon_url: None,
            color: None,
        };
        let sensors = |course: &str| MarkerSensors {
            position_sensor: Some("gps".into()),
            course_sensor: Some(course.into()),
        };

        hub.attach_machine(machine.clone(), sensors("cog"), &[]);
        hub.on_push(topic("cog"), vec![RawRecord::scalar(90.0, Utc::now())]);
        assert!(hub.normalizer.cache().get(&SensorKey::new("cog", "M1")).is_some());

        hub.attach_machine(machine, sensors("cog2"), &[]);
        assert_eq!(transport.topics(ChannelOp::Leave), vec![topic("cog")]);
        assert!(hub.registry.is_joined(&topic("gps")));
        assert!(!hub.registry.is_joined(&topic("cog")));
        assert!(hub.normalizer.cache().get(&SensorKey::new("cog", "M1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_loop_renders_after_settle() {
        let transport = Arc::new(RecordingTransport::default());
        let surface = Arc::new(RecordingSurface::default());
        let (hub, handle) = TelemetryHub::new(
            transport.clone(),
            surface.clone(),
            Arc::new(NullLayer),
            MapEventBus::new(8),
            settings(),
        );
        let task = tokio::spawn(hub.run());

        handle
            .mount_diagram("d1".into(), model_with(&["T1", "T2"]).0, Vec::new())
            .await
            .unwrap();
        handle
            .push(topic("T1"), vec![RawRecord::scalar(400.0, Utc::now())])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let mounts = surface.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].groups[0].temperature_average, 400.0);

        let status = handle.describe_diagram("d1".into()).await.unwrap().unwrap();
        assert_eq!(status.mode, ReconcilerMode::Live);

        handle.shutdown();
        task.await.unwrap();
        let mut joined = transport.topics(ChannelOp::Join);
        let mut left = transport.topics(ChannelOp::Leave);
        joined.sort();
        left.sort();
        assert_eq!(joined, left);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_outside_edit_mode_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let (hub, handle) = TelemetryHub::new(
            transport,
            Arc::new(RecordingSurface::default()),
            Arc::new(NullLayer),
            MapEventBus::new(8),
            settings(),
        );
        tokio::spawn(hub.run());

        let (model, key) = model_with(&["T1"]);
        handle.mount_diagram("d1".into(), model, Vec::new()).await.unwrap();
        let result = handle
            .edit_diagram(
                "d1".into(),
                DiagramEdit::RenameGroup {
                    group_key: key,
                    label: "Main".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(HubError::Binding(BindingError::NotEditing))));

        let result = handle.enter_edit("missing".into()).await;
        assert!(matches!(
            result,
            Err(HubError::Binding(BindingError::UnknownInstance(_)))
        ));
    }
}
