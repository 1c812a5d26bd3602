// Diagram reconciler - keeps one mounted diagram in step with its model and readings
use crate::application::ports::DiagramSurface;
use crate::application::reading_normalizer::ReadingCache;
use crate::application::slot_binding_store::{DiagramEdit, ModelChange, SlotBindingStore};
use crate::application::timers::{Scheduler, TimerEvent, TimerGuard};
use crate::application::topic_registry::{diff_subscriptions, SubscriberId, TopicRegistry};
use crate::domain::diagram::{DiagramModel, DiagramType, SlotType};
use crate::domain::errors::BindingError;
use crate::domain::reading::SensorKey;
use crate::domain::render::{average, format_value, RenderGroup, RenderModel, RenderSlot};
use crate::domain::topic::ChannelTopic;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerMode {
    Live,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub settle_delay: Duration,
}

/// One mounted diagram instance.
///
/// Every redraw is clear, wait `settle_delay`, then mount. Each scheduled
/// mount carries the generation current when it was scheduled; bumping the
/// generation invalidates anything still in flight.
pub struct DiagramReconciler {
    instance_id: String,
    subscriber: SubscriberId,
    store: SlotBindingStore,
    mode: ReconcilerMode,
    settings: RefreshSettings,
    generation: u64,
    refresh_timer: Option<TimerGuard>,
    pending_remount: Option<TimerGuard>,
}

impl DiagramReconciler {
    /// Join the model's topics and start the refresh loop in live mode.
    pub fn mount(
        instance_id: impl Into<String>,
        model: DiagramModel,
        settings: RefreshSettings,
        registry: &mut TopicRegistry,
        scheduler: &Scheduler,
    ) -> Self {
        let instance_id = instance_id.into();
        let mut reconciler = Self {
            subscriber: SubscriberId::Diagram(instance_id.clone()),
            instance_id,
            store: SlotBindingStore::new(model),
            mode: ReconcilerMode::Live,
            settings,
            generation: 0,
            refresh_timer: None,
            pending_remount: None,
        };

        let topics = reconciler.topics();
        registry.join(&reconciler.subscriber, &topics);
        reconciler.start_refresh(scheduler);
        tracing::debug!(
            "Mounted diagram {} ({} on {}) with {} topics",
            reconciler.instance_id,
            reconciler.diagram_type().as_str(),
            reconciler.machine_id(),
            topics.len()
        );
        reconciler
    }

    pub fn machine_id(&self) -> String {
        self.store.model().machine_id.clone()
    }

    pub fn diagram_type(&self) -> DiagramType {
        self.store.model().diagram_type
    }

    pub fn mode(&self) -> ReconcilerMode {
        self.mode
    }

    pub fn model(&self) -> Arc<DiagramModel> {
        self.store.model()
    }

    /// Periodic refresh. Ignored while editing.
    pub fn on_tick(&mut self, surface: &dyn DiagramSurface, scheduler: &Scheduler) -> Option<u64> {
        if self.mode != ReconcilerMode::Live {
            tracing::debug!("Skipping refresh of {} while editing", self.instance_id);
            return None;
        }
        Some(self.begin_refresh(surface, scheduler))
    }

    /// Clear now and schedule the remount. Returns the remount's generation.
    pub fn begin_refresh(&mut self, surface: &dyn DiagramSurface, scheduler: &Scheduler) -> u64 {
        surface.clear(&self.instance_id);
        self.generation += 1;
        self.pending_remount = Some(scheduler.after(
            self.settings.settle_delay,
            TimerEvent::Remount {
                instance_id: self.instance_id.clone(),
                generation: self.generation,
            },
        ));
        self.generation
    }

    /// Mount the current render if `generation` is still current.
    pub fn on_remount(
        &mut self,
        generation: u64,
        cache: &ReadingCache,
        surface: &dyn DiagramSurface,
    ) -> bool {
        if generation != self.generation {
            tracing::debug!(
                "Dropping stale remount of {} (generation {} != {})",
                self.instance_id,
                generation,
                self.generation
            );
            return false;
        }
        self.pending_remount = None;
        surface.mount(self.render(cache));
        true
    }

    /// Stop the periodic refresh and redraw once. `None` if already editing.
    pub fn enter_edit(&mut self, surface: &dyn DiagramSurface, scheduler: &Scheduler) -> Option<u64> {
        if self.mode == ReconcilerMode::Editing {
            return None;
        }
        self.cancel_timers();
        self.mode = ReconcilerMode::Editing;
        Some(self.begin_refresh(surface, scheduler))
    }

    /// Apply one operator edit and move subscriptions by the binding delta.
    /// Returns the new model and the topics left on the transport.
    pub fn apply_edit(
        &mut self,
        edit: DiagramEdit,
        registry: &mut TopicRegistry,
        surface: &dyn DiagramSurface,
        scheduler: &Scheduler,
    ) -> Result<(Arc<DiagramModel>, Vec<ChannelTopic>), BindingError> {
        if self.mode != ReconcilerMode::Editing {
            return Err(BindingError::NotEditing);
        }
        let change = self.store.apply(edit)?;
        let left = registry.apply(&self.subscriber, &change.subscription_delta());
        self.begin_refresh(surface, scheduler);
        Ok((change.current, left))
    }

    /// Swap in the reloaded model and restart the refresh loop.
    /// Returns the topics left on the transport.
    pub fn resume_live(
        &mut self,
        model: DiagramModel,
        registry: &mut TopicRegistry,
        scheduler: &Scheduler,
    ) -> Vec<ChannelTopic> {
        self.cancel_timers();
        let same_machine = model.machine_id == self.machine_id();
        let change = self.store.replace(model);
        let left = if same_machine {
            registry.apply(&self.subscriber, &change.subscription_delta())
        } else {
            self.resubscribe(&change, registry)
        };
        self.mode = ReconcilerMode::Live;
        self.start_refresh(scheduler);
        left
    }

    /// Cancel timers, blank the surface and release every topic.
    pub fn teardown(
        &mut self,
        registry: &mut TopicRegistry,
        surface: &dyn DiagramSurface,
    ) -> Vec<ChannelTopic> {
        self.cancel_timers();
        surface.clear(&self.instance_id);
        registry.leave_all(&self.subscriber)
    }

    /// Build the render model from the latest cached readings.
    pub fn render(&self, cache: &ReadingCache) -> RenderModel {
        let model = self.store.model();
        let groups = model
            .sorted_groups()
            .into_iter()
            .map(|group| {
                let mut bindings: Vec<_> = group.slots.iter().collect();
                bindings.sort_by_key(|s| (s.slot_type, s.index));

                let slots: Vec<RenderSlot> = bindings
                    .into_iter()
                    .map(|binding| {
                        let reading = binding.sensor_id.as_ref().and_then(|sensor_id| {
                            cache.get(&SensorKey::new(sensor_id.clone(), model.machine_id.clone()))
                        });
                        let value = reading.map(|r| r.value);
                        RenderSlot {
                            slot_type: binding.slot_type,
                            index: binding.index,
                            label: binding.config.label.clone(),
                            unit: binding.config.unit.clone(),
                            sensor_id: binding.sensor_id.clone(),
                            value,
                            display: format_value(value, binding.config.size_decimals.unwrap_or(0)),
                            timestamp: reading.map(|r| r.timestamp),
                        }
                    })
                    .collect();

                let temperatures: Vec<f64> = slots
                    .iter()
                    .filter(|s| s.slot_type == SlotType::Temperature)
                    .filter_map(|s| s.value)
                    .collect();

                RenderGroup {
                    key: group.key.clone(),
                    index: group.index,
                    label: group.label.clone(),
                    temperature_average: average(&temperatures),
                    slots,
                }
            })
            .collect();

        RenderModel {
            instance_id: self.instance_id.clone(),
            machine_id: model.machine_id.clone(),
            diagram_type: model.diagram_type,
            groups,
            rendered_at: Utc::now(),
        }
    }

    fn topics(&self) -> Vec<ChannelTopic> {
        let bound = self.store.model().bound_sensors();
        diff_subscriptions(std::iter::empty(), bound.iter().map(String::as_str), &self.machine_id()).to_join
    }

    fn resubscribe(&self, change: &ModelChange, registry: &mut TopicRegistry) -> Vec<ChannelTopic> {
        let left = registry.leave_all(&self.subscriber);
        let bound = change.current.bound_sensors();
        let topics =
            diff_subscriptions(std::iter::empty(), bound.iter().map(String::as_str), &change.current.machine_id)
                .to_join;
        registry.join(&self.subscriber, &topics);
        left
    }

    fn start_refresh(&mut self, scheduler: &Scheduler) {
        self.refresh_timer = Some(scheduler.every(
            self.settings.interval,
            TimerEvent::RefreshTick {
                instance_id: self.instance_id.clone(),
            },
        ));
    }

    fn cancel_timers(&mut self) {
        self.refresh_timer = None;
        self.pending_remount = None;
        self.generation += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::reading_normalizer::SensorReadingNormalizer;
    use crate::application::topic_registry::tests::RecordingTransport;
    use crate::domain::diagram::SlotConfig;
    use crate::domain::reading::RawRecord;
    use crate::domain::topic::ChannelOp;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SurfaceCall {
        Clear(String),
        Mount(RenderModel),
    }

    /// Surface double that records clears and mounts in order.
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) calls: Mutex<Vec<SurfaceCall>>,
    }

    impl RecordingSurface {
        pub(crate) fn mounts(&self) -> Vec<RenderModel> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    SurfaceCall::Mount(model) => Some(model.clone()),
                    SurfaceCall::Clear(_) => None,
                })
                .collect()
        }
    }

    impl DiagramSurface for RecordingSurface {
        fn clear(&self, instance_id: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::Clear(instance_id.to_string()));
        }

        fn mount(&self, model: RenderModel) {
            self.calls.lock().unwrap().push(SurfaceCall::Mount(model));
        }
    }

    fn settings() -> RefreshSettings {
        RefreshSettings {
            interval: Duration::from_secs(60),
            settle_delay: Duration::from_millis(500),
        }
    }

    fn pms_model() -> (DiagramModel, String) {
        let mut store = SlotBindingStore::new(DiagramModel::empty("M1", DiagramType::Pms));
        let (key, _) = store.add_group();
        for (index, sensor) in [(1, "T1"), (2, "T2"), (3, "T3")] {
            store
                .bind(&key, SlotType::Temperature, index, Some(sensor), &SlotConfig::default())
                .unwrap();
        }
        ((*store.model()).clone(), key)
    }

    fn topic(sensor: &str) -> ChannelTopic {
        ChannelTopic::new(sensor, "M1").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_joins_bound_topics_and_ticks() {
        let transport = Arc::new(RecordingTransport::default());
        let mut registry = TopicRegistry::new(transport.clone());
        let (scheduler, mut timers) = Scheduler::new();
        let (model, _) = pms_model();

        let _reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);

        assert_eq!(
            transport.topics(ChannelOp::Join),
            vec![topic("T1"), topic("T2"), topic("T3")]
        );
        assert_eq!(
            timers.recv().await,
            Some(TimerEvent::RefreshTick {
                instance_id: "d1".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_clears_then_mounts_after_settle() {
        let mut registry = TopicRegistry::new(Arc::new(RecordingTransport::default()));
        let (scheduler, mut timers) = Scheduler::new();
        let surface = RecordingSurface::default();
        let normalizer = SensorReadingNormalizer::new();
        let (model, _) = pms_model();
        let mut reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);

        let _ = timers.recv().await;
        let generation = reconciler.on_tick(&surface, &scheduler).unwrap();
        let started = tokio::time::Instant::now();
        assert_eq!(
            timers.recv().await,
            Some(TimerEvent::Remount {
                instance_id: "d1".into(),
                generation
            })
        );
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert!(reconciler.on_remount(generation, normalizer.cache(), &surface));

        let calls = surface.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], SurfaceCall::Clear("d1".into()));
        assert!(matches!(calls[1], SurfaceCall::Mount(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entering_edit_invalidates_pending_remount() {
        let mut registry = TopicRegistry::new(Arc::new(RecordingTransport::default()));
        let (scheduler, _timers) = Scheduler::new();
        let surface = RecordingSurface::default();
        let normalizer = SensorReadingNormalizer::new();
        let (model, _) = pms_model();
        let mut reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);

        let stale = reconciler.on_tick(&surface, &scheduler).unwrap();
        let redraw = reconciler.enter_edit(&surface, &scheduler).unwrap();

        assert_eq!(reconciler.mode(), ReconcilerMode::Editing);
        assert!(reconciler.enter_edit(&surface, &scheduler).is_none());
        assert!(!reconciler.on_remount(stale, normalizer.cache(), &surface));
        assert!(reconciler.on_tick(&surface, &scheduler).is_none());
        assert!(reconciler.on_remount(redraw, normalizer.cache(), &surface));
        assert_eq!(surface.mounts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_require_edit_mode() {
        let mut registry = TopicRegistry::new(Arc::new(RecordingTransport::default()));
        let (scheduler, _timers) = Scheduler::new();
        let surface = RecordingSurface::default();
        let (model, key) = pms_model();
        let mut reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);

        let edit = DiagramEdit::Unbind {
            group_key: key,
            slot_type: SlotType::Temperature,
            index: 1,
        };
        assert_eq!(
            reconciler
                .apply_edit(edit, &mut registry, &surface, &scheduler)
                .unwrap_err(),
            BindingError::NotEditing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_moves_subscriptions() {
        let transport = Arc::new(RecordingTransport::default());
        let mut registry = TopicRegistry::new(transport.clone());
        let (scheduler, _timers) = Scheduler::new();
        let surface = RecordingSurface::default();
        let (model, key) = pms_model();
        let mut reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);
        reconciler.enter_edit(&surface, &scheduler);

        let (model, left) = reconciler
            .apply_edit(
                DiagramEdit::Bind {
                    group_key: key,
                    slot_type: SlotType::Temperature,
                    index: 2,
                    sensor_id: Some("T9".into()),
                    config: SlotConfig::default(),
                },
                &mut registry,
                &surface,
                &scheduler,
            )
            .unwrap();

        assert_eq!(left, vec![topic("T2")]);
        assert!(model.bound_sensors().contains("T9"));
        assert!(registry.is_joined(&topic("T9")));
        assert!(!registry.is_joined(&topic("T2")));
        assert!(registry.is_joined(&topic("T1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_live_diffs_reloaded_model() {
        let transport = Arc::new(RecordingTransport::default());
        let mut registry = TopicRegistry::new(transport.clone());
        let (scheduler, _timers) = Scheduler::new();
        let surface = RecordingSurface::default();
        let (model, key) = pms_model();
        let mut reconciler =
            DiagramReconciler::mount("d1", model.clone(), settings(), &mut registry, &scheduler);
        reconciler.enter_edit(&surface, &scheduler);

        let mut reloaded = model;
        reloaded.groups.retain(|g| g.key != key);
        let left = reconciler.resume_live(reloaded, &mut registry, &scheduler);

        assert_eq!(left, vec![topic("T1"), topic("T2"), topic("T3")]);
        assert_eq!(reconciler.mode(), ReconcilerMode::Live);
        assert!(registry.joined_topics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_average_and_formatting() {
        let mut registry = TopicRegistry::new(Arc::new(RecordingTransport::default()));
        let (scheduler, _timers) = Scheduler::new();
        let mut normalizer = SensorReadingNormalizer::new();
        let (model, _) = pms_model();
        let reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);

        let render = reconciler.render(normalizer.cache());
        assert_eq!(render.groups[0].temperature_average, 0.0);
        assert!(render.groups[0].slots.iter().all(|s| s.display.is_empty()));

        let now = Utc::now();
        normalizer.ingest(&SensorKey::new("T1", "M1"), &[RawRecord::scalar(400.0, now)]);
        normalizer.ingest(&SensorKey::new("T2", "M1"), &[RawRecord::scalar(420.5, now)]);

        let render = reconciler.render(normalizer.cache());
        let group = &render.groups[0];
        assert_eq!(group.temperature_average, 410.25);
        let t1 = group
            .slots
            .iter()
            .find(|s| s.slot_type == SlotType::Temperature && s.index == 1)
            .unwrap();
        assert_eq!(t1.display, "400");
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_everything() {
        let transport = Arc::new(RecordingTransport::default());
        let mut registry = TopicRegistry::new(transport.clone());
        let (scheduler, _timers) = Scheduler::new();
        let surface = RecordingSurface::default();
        let (model, _) = pms_model();
        let mut reconciler = DiagramReconciler::mount("d1", model, settings(), &mut registry, &scheduler);

        let left = reconciler.teardown(&mut registry, &surface);
        assert_eq!(left.len(), 3);
        let mut joined = transport.topics(ChannelOp::Join);
        let mut released = transport.topics(ChannelOp::Leave);
        joined.sort();
        released.sort();
        assert_eq!(joined, released);
    }
}
