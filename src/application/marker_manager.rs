// Marker lifecycle manager - one marker per tracked machine, remounted wholesale
use crate::application::map_events::MapEventBus;
use crate::application::ports::{MarkerHandle, MarkerLayer};
use crate::application::timers::{Scheduler, TimerEvent, TimerGuard};
use crate::application::topic_registry::{topic_for, SubscriberId, TopicRegistry};
use crate::domain::errors::SubscriptionError;
use crate::domain::marker::{
    normalize_position, CourseFix, DisplayOptions, MachineDetails, MapEvent, Marker,
    MarkerSensors, PositionFix,
};
use crate::domain::reading::RawRecord;
use crate::domain::topic::{normalize_sensor_id, ChannelTopic};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorRole {
    Position,
    Course,
}

impl SensorRole {
    fn channel(self) -> &'static str {
        match self {
            SensorRole::Position => "position",
            SensorRole::Course => "course",
        }
    }
}

struct TrackedMachine {
    details: MachineDetails,
    topics: Vec<(ChannelTopic, SensorRole)>,
    position: Option<PositionFix>,
    course: Option<CourseFix>,
}

impl TrackedMachine {
    fn role_of(&self, topic: &ChannelTopic) -> Option<SensorRole> {
        self.topics
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, role)| *role)
    }

    /// Accept the first record if it is strictly newer than the stored fix.
    fn update(&mut self, role: SensorRole, record: &RawRecord) -> bool {
        match role {
            SensorRole::Position => {
                if self.position.is_some_and(|p| record.date <= p.timestamp) {
                    return false;
                }
                let Some((latitude, longitude)) = normalize_position(&record.value) else {
                    tracing::warn!("Unusable position for machine {}: {}", self.details.id, record.value);
                    return false;
                };
                self.position = Some(PositionFix {
                    latitude,
                    longitude,
                    timestamp: record.date,
                });
                true
            }
            SensorRole::Course => {
                if self.course.is_some_and(|c| record.date <= c.timestamp) {
                    return false;
                }
                let Some(course) = record.numeric_value() else {
                    return false;
                };
                self.course = Some(CourseFix {
                    course,
                    timestamp: record.date,
                });
                true
            }
        }
    }
}

/// Owns every marker on one map layer.
///
/// Markers are never updated in place: any accepted change removes all of
/// them and adds them back, so each machine has at most one marker.
pub struct MarkerLifecycleManager {
    layer: Arc<dyn MarkerLayer>,
    bus: MapEventBus,
    tracked: BTreeMap<String, TrackedMachine>,
    mounted: Vec<MarkerHandle>,
    options: DisplayOptions,
    settle_delay: Duration,
    generation: u64,
    pending_remount: Option<TimerGuard>,
}

impl MarkerLifecycleManager {
    pub fn new(layer: Arc<dyn MarkerLayer>, bus: MapEventBus, settle_delay: Duration) -> Self {
        Self {
            layer,
            bus,
            tracked: BTreeMap::new(),
            mounted: Vec::new(),
            options: DisplayOptions::default(),
            settle_delay,
            generation: 0,
            pending_remount: None,
        }
    }

    pub fn is_tracked(&self, machine_id: &str) -> bool {
        self.tracked.contains_key(machine_id)
    }

    /// Track a machine, subscribing to its position and course sensors.
    /// Re-attaching replaces the previous configuration and only leaves the
    /// topics it no longer needs. Returns `(joined, left)`.
    pub fn attach(
        &mut self,
        machine: MachineDetails,
        sensors: MarkerSensors,
        last_states: &[RawRecord],
        registry: &mut TopicRegistry,
    ) -> (Vec<ChannelTopic>, Vec<ChannelTopic>) {
        let machine_id = machine.id.clone();
        let subscriber = SubscriberId::Marker(machine_id.clone());

        let mut topics = Vec::new();
        for (sensor, role) in [
            (&sensors.position_sensor, SensorRole::Position),
            (&sensors.course_sensor, SensorRole::Course),
        ] {
            match sensor.as_deref().and_then(normalize_sensor_id) {
                Some(sensor_id) => {
                    if let Some(topic) = topic_for(&sensor_id, &machine_id) {
                        topics.push((topic, role));
                    }
                }
                None => {
                    let error = SubscriptionError {
                        machine_id: machine_id.clone(),
                        channel: role.channel(),
                    };
                    tracing::warn!("{}", error);
                }
            }
        }

        let mut entry = TrackedMachine {
            details: machine,
            topics,
            position: None,
            course: None,
        };
        for record in last_states {
            let Some(topic) = record
                .id_sensor
                .as_deref()
                .and_then(|sensor_id| topic_for(sensor_id, &machine_id))
            else {
                continue;
            };
            if let Some(role) = entry.role_of(&topic) {
                entry.update(role, record);
            }
        }

        let wanted: Vec<ChannelTopic> = entry.topics.iter().map(|(t, _)| t.clone()).collect();
        let dropped: Vec<ChannelTopic> = registry
            .topics_of(&subscriber)
            .into_iter()
            .filter(|topic| !wanted.contains(topic))
            .collect();
        let left = registry.leave(&subscriber, &dropped);
        let joined = registry.join(&subscriber, &wanted);
        self.tracked.insert(machine_id, entry);
        self.remount_now();
        (joined, left)
    }

    /// Stop tracking a machine. Returns the topics left on the transport.
    pub fn detach(&mut self, machine_id: &str, registry: &mut TopicRegistry) -> Vec<ChannelTopic> {
        if !self.tracked.contains_key(machine_id) {
            return Vec::new();
        }
        let left = self.release(machine_id, registry);
        self.remount_now();
        left
    }

    /// Route a push for one of the machine's topics. Returns whether it changed the map.
    pub fn on_push(&mut self, machine_id: &str, topic: &ChannelTopic, records: &[RawRecord]) -> bool {
        let Some(entry) = self.tracked.get_mut(machine_id) else {
            return false;
        };
        let (Some(role), Some(record)) = (entry.role_of(topic), records.first()) else {
            return false;
        };
        if !entry.update(role, record) {
            return false;
        }
        self.remount_now();
        true
    }

    /// Tooltip changes redraw after the settle delay. Returns the remount's generation.
    pub fn set_display_options(&mut self, options: DisplayOptions, scheduler: &Scheduler) -> u64 {
        self.options = options;
        self.clear();
        self.generation += 1;
        self.pending_remount = Some(scheduler.after(
            self.settle_delay,
            TimerEvent::MarkerRemount {
                generation: self.generation,
            },
        ));
        self.generation
    }

    pub fn on_remount(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            tracing::debug!("Dropping stale marker remount {}", generation);
            return false;
        }
        self.pending_remount = None;
        self.mount_all();
        true
    }

    /// Publish the popup action for a tracked machine.
    pub fn select(&self, machine_id: &str) -> bool {
        if !self.tracked.contains_key(machine_id) {
            return false;
        }
        self.bus.publish(MapEvent::SelectMachine {
            machine_id: machine_id.to_string(),
        });
        true
    }

    /// Remove every marker and release every subscription.
    pub fn teardown(&mut self, registry: &mut TopicRegistry) -> Vec<ChannelTopic> {
        self.pending_remount = None;
        self.generation += 1;
        self.clear();
        let machines: Vec<String> = self.tracked.keys().cloned().collect();
        machines
            .iter()
            .flat_map(|machine_id| self.release(machine_id, registry))
            .collect()
    }

    fn release(&mut self, machine_id: &str, registry: &mut TopicRegistry) -> Vec<ChannelTopic> {
        self.tracked.remove(machine_id);
        registry.leave_all(&SubscriberId::Marker(machine_id.to_string()))
    }

    /// Redraw right away unless a display-option remount is still settling;
    /// that remount draws the latest state when it fires.
    fn remount_now(&mut self) {
        if self.pending_remount.is_some() {
            return;
        }
        self.clear();
        self.mount_all();
    }

    fn clear(&mut self) {
        for handle in self.mounted.drain(..) {
            self.layer.remove(handle);
        }
    }

    fn mount_all(&mut self) {
        self.clear();
        for entry in self.tracked.values() {
            let Some(position) = entry.position.as_ref() else {
                continue;
            };
            let marker = Marker::build(&entry.details, position, entry.course.as_ref(), self.options);
            self.mounted.push(self.layer.add(marker));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::topic_registry::tests::RecordingTransport;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct FakeLayer {
        next: AtomicU64,
        markers: Mutex<BTreeMap<MarkerHandle, Marker>>,
    }

    impl FakeLayer {
        fn markers(&self) -> Vec<Marker> {
            self.markers.lock().unwrap().values().cloned().collect()
        }
    }

    impl MarkerLayer for FakeLayer {
        fn add(&self, marker: Marker) -> MarkerHandle {
            let handle = MarkerHandle(self.next.fetch_add(1, Ordering::SeqCst));
            self.markers.lock().unwrap().insert(handle, marker);
            handle
        }

        fn remove(&self, handle: MarkerHandle) {
            self.markers.lock().unwrap().remove(&handle);
        }
    }

    fn machine(id: &str) -> MachineDetails {
        MachineDetails {
            id: id.into(),
            code: Some(format!("C-{}", id)),
            name: Some(format!("Vessel {}", id)),
            icon_url: None,
            color: Some("#00f".into()),
        }
    }

    fn sensors() -> MarkerSensors {
        MarkerSensors {
            position_sensor: Some("gps".into()),
            course_sensor: Some("cog".into()),
        }
    }

    fn position(lat: f64, lon: f64, date: DateTime<Utc>) -> RawRecord {
        RawRecord {
            value: json!([lat, lon]),
            date,
            id_machine: None,
            id_sensor: Some("gps".into()),
        }
    }

    fn setup() -> (MarkerLifecycleManager, Arc<FakeLayer>, TopicRegistry) {
        let layer = Arc::new(FakeLayer::default());
        let manager = MarkerLifecycleManager::new(
            layer.clone(),
            MapEventBus::new(8),
            Duration::from_millis(500),
        );
        let registry = TopicRegistry::new(Arc::new(RecordingTransport::default()));
        (manager, layer, registry)
    }

    #[test]
    fn test_marker_singularity() {
        let (mut manager, layer, mut registry) = setup();
        let now = Utc::now();
        manager.attach(machine("M1"), sensors(), &[position(-22.9, -43.1, now)], &mut registry);
        let gps = ChannelTopic::new("gps", "M1").unwrap();
        let cog = ChannelTopic::new("cog", "M1").unwrap();

        for step in 1..=5 {
            let at = now + ChronoDuration::seconds(step);
            assert!(manager.on_push("M1", &gps, &[position(-22.9, -43.1 + step as f64 * 0.01, at)]));
            assert!(manager.on_push("M1", &cog, &[RawRecord::scalar(90.0, at)]));
            assert_eq!(layer.markers().len(), 1);
        }

        let marker = &layer.markers()[0];
        assert_eq!(marker.heading, 45.0);
        assert!((marker.longitude - (-43.05)).abs() < 1e-9);
    }

    #[test]
    fn test_stale_position_is_ignored() {
        let (mut manager, layer, mut registry) = setup();
        let now = Utc::now();
        manager.attach(machine("M1"), sensors(), &[position(1.0, 1.0, now)], &mut registry);
        let gps = ChannelTopic::new("gps", "M1").unwrap();

        assert!(!manager.on_push("M1", &gps, &[position(5.0, 5.0, now)]));
        assert!(!manager.on_push("M1", &gps, &[position(5.0, 5.0, now - ChronoDuration::seconds(1))]));
        assert_eq!(layer.markers()[0].latitude, 1.0);
    }

    #[test]
    fn test_no_marker_without_position() {
        let (mut manager, layer, mut registry) = setup();
        manager.attach(machine("M1"), sensors(), &[], &mut registry);
        let cog = ChannelTopic::new("cog", "M1").unwrap();
        assert!(manager.on_push("M1", &cog, &[RawRecord::scalar(10.0, Utc::now())]));
        assert!(layer.markers().is_empty());
    }

    #[test]
    fn test_missing_sensor_subscribes_to_the_rest() {
        let (mut manager, _layer, mut registry) = setup();
        let (joined, _) = manager.attach(
            machine("M1"),
            MarkerSensors {
                position_sensor: Some("gps".into()),
                course_sensor: Some("0".into()),
            },
            &[],
            &mut registry,
        );
        assert_eq!(joined, vec![ChannelTopic::new("gps", "M1").unwrap()]);
    }

    #[test]
    fn test_detach_and_teardown_release_topics() {
        let (mut manager, layer, mut registry) = setup();
        let now = Utc::now();
        manager.attach(machine("M1"), sensors(), &[position(1.0, 1.0, now)], &mut registry);
        manager.attach(machine("M2"), sensors(), &[position(2.0, 2.0, now)], &mut registry);
        assert_eq!(layer.markers().len(), 2);

        assert_eq!(manager.detach("M1", &mut registry).len(), 2);
        assert_eq!(layer.markers().len(), 1);

        manager.teardown(&mut registry);
        assert!(layer.markers().is_empty());
        assert!(registry.joined_topics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_options_remount_after_settle() {
        let (mut manager, layer, mut registry) = setup();
        let (scheduler, mut timers) = Scheduler::new();
        manager.attach(machine("M1"), sensors(), &[position(1.0, 1.0, Utc::now())], &mut registry);

        let stale = manager.set_display_options(
            DisplayOptions {
                show_code: true,
                show_name: false,
            },
            &scheduler,
        );
        let current = manager.set_display_options(
            DisplayOptions {
                show_code: true,
                show_name: true,
            },
            &scheduler,
        );
        assert!(layer.markers().is_empty());

        assert_eq!(
            timers.recv().await,
            Some(TimerEvent::MarkerRemount {
                generation: current
            })
        );
        assert!(!manager.on_remount(stale));
        assert!(manager.on_remount(current));
        assert_eq!(
            layer.markers()[0].tooltip.as_deref(),
            Some("C-M1 - Vessel M1")
        );
    }

    #[test]
    fn test_reattach_leaves_only_replaced_sensor() {
        let (mut manager, layer, mut registry) = setup();
        let now = Utc::now();
        manager.attach(machine("M1"), sensors(), &[position(1.0, 1.0, now)], &mut registry);

        let (joined, left) = manager.attach(
            machine("M1"),
            MarkerSensors {
                position_sensor: Some("gps".into()),
                course_sensor: Some("cog2".into()),
            },
            &[position(1.0, 1.0, now)],
            &mut registry,
        );
        assert_eq!(joined, vec![ChannelTopic::new("cog2", "M1").unwrap()]);
        assert_eq!(left, vec![ChannelTopic::new("cog", "M1").unwrap()]);
        assert!(registry.is_joined(&ChannelTopic::new("gps", "M1").unwrap()));
        assert_eq!(layer.markers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_during_settle_waits_for_remount() {
        let (mut manager, layer, mut registry) = setup();
        let (scheduler, mut timers) = Scheduler::new();
        let now = Utc::now();
        manager.attach(machine("M1"), sensors(), &[position(1.0, 1.0, now)], &mut registry);
        assert_eq!(layer.markers().len(), 1);

        let generation = manager.set_display_options(
            DisplayOptions {
                show_code: true,
                show_name: false,
            },
            &scheduler,
        );
        assert!(layer.markers().is_empty());

        let gps = ChannelTopic::new("gps", "M1").unwrap();
        let later = now + ChronoDuration::seconds(5);
        assert!(manager.on_push("M1", &gps, &[position(2.0, 2.0, later)]));
        manager.attach(machine("M2"), sensors(), &[position(3.0, 3.0, now)], &mut registry);
        manager.detach("M2", &mut registry);
        assert!(layer.markers().is_empty());

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(timers.try_recv().is_err());
        assert!(layer.markers().is_empty());

        assert_eq!(
            timers.recv().await,
            Some(TimerEvent::MarkerRemount { generation })
        );
        assert!(manager.on_remount(generation));
        let markers = layer.markers();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].latitude, 2.0);
        assert_eq!(markers[0].tooltip.as_deref(), Some("C-M1"));
    }

    #[tokio::test]
    async fn test_select_publishes_event() {
        let (mut manager, _layer, mut registry) = setup();
        let mut events = manager.bus.subscribe();
        manager.attach(machine("M1"), sensors(), &[], &mut registry);

        assert!(manager.select("M1"));
        assert!(!manager.select("M9"));
        assert_eq!(
            events.recv().await.unwrap(),
            MapEvent::SelectMachine {
                machine_id: "M1".into()
            }
        );
    }
}
