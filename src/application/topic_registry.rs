// Channel topic registry - which topics are joined and on whose behalf
use crate::application::ports::ChannelTransport;
use crate::domain::topic::{ChannelCommand, ChannelTopic};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A consumer holding subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriberId {
    Diagram(String),
    Marker(String),
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberId::Diagram(id) => write!(f, "diagram:{}", id),
            SubscriberId::Marker(id) => write!(f, "marker:{}", id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    pub to_join: Vec<ChannelTopic>,
    pub to_leave: Vec<ChannelTopic>,
}

impl SubscriptionDelta {
    pub fn is_empty(&self) -> bool {
        self.to_join.is_empty() && self.to_leave.is_empty()
    }
}

pub fn topic_for(sensor_id: &str, machine_id: &str) -> Option<ChannelTopic> {
    ChannelTopic::new(sensor_id, machine_id)
}

/// Set difference between two sensor selections on the same machine.
/// Unbound ids never produce a topic.
pub fn diff_subscriptions<'a>(
    old_sensor_ids: impl IntoIterator<Item = &'a str>,
    new_sensor_ids: impl IntoIterator<Item = &'a str>,
    machine_id: &str,
) -> SubscriptionDelta {
    let old: BTreeSet<ChannelTopic> = old_sensor_ids
        .into_iter()
        .filter_map(|id| topic_for(id, machine_id))
        .collect();
    let new: BTreeSet<ChannelTopic> = new_sensor_ids
        .into_iter()
        .filter_map(|id| topic_for(id, machine_id))
        .collect();

    SubscriptionDelta {
        to_join: new.difference(&old).cloned().collect(),
        to_leave: old.difference(&new).cloned().collect(),
    }
}

/// Reference-counted topic membership. The transport sees a join when the first
/// subscriber takes a topic and a leave when the last one drops it.
pub struct TopicRegistry {
    transport: Arc<dyn ChannelTransport>,
    holders: BTreeMap<ChannelTopic, BTreeSet<SubscriberId>>,
}

impl TopicRegistry {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport,
            holders: BTreeMap::new(),
        }
    }

    /// Returns the topics that were newly joined on the transport.
    pub fn join(&mut self, subscriber: &SubscriberId, topics: &[ChannelTopic]) -> Vec<ChannelTopic> {
        let mut joined = Vec::new();
        for topic in topics {
            let holders = self.holders.entry(topic.clone()).or_default();
            if holders.is_empty() {
                joined.push(topic.clone());
            }
            holders.insert(subscriber.clone());
        }

        if !joined.is_empty() {
            tracing::debug!("{} joins {:?}", subscriber, joined);
            self.transport.send(ChannelCommand::join(joined.clone()));
        }
        joined
    }

    /// Returns the topics that were left on the transport.
    pub fn leave(&mut self, subscriber: &SubscriberId, topics: &[ChannelTopic]) -> Vec<ChannelTopic> {
        let mut left = Vec::new();
        for topic in topics {
            let Some(holders) = self.holders.get_mut(topic) else {
                continue;
            };
            if holders.remove(subscriber) && holders.is_empty() {
                self.holders.remove(topic);
                left.push(topic.clone());
            }
        }

        if !left.is_empty() {
            tracing::debug!("{} leaves {:?}", subscriber, left);
            self.transport.send(ChannelCommand::leave(left.clone()));
        }
        left
    }

    pub fn leave_all(&mut self, subscriber: &SubscriberId) -> Vec<ChannelTopic> {
        let held = self.topics_of(subscriber);
        self.leave(subscriber, &held)
    }

    /// Apply a delta; returns the topics left on the transport.
    pub fn apply(&mut self, subscriber: &SubscriberId, delta: &SubscriptionDelta) -> Vec<ChannelTopic> {
        if delta.is_empty() {
            return Vec::new();
        }
        let left = self.leave(subscriber, &delta.to_leave);
        self.join(subscriber, &delta.to_join);
        left
    }

    pub fn is_joined(&self, topic: &ChannelTopic) -> bool {
        self.holders.contains_key(topic)
    }

    pub fn holders(&self, topic: &ChannelTopic) -> Vec<SubscriberId> {
        self.holders
            .get(topic)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn topics_of(&self, subscriber: &SubscriberId) -> Vec<ChannelTopic> {
        self.holders
            .iter()
            .filter(|(_, holders)| holders.contains(subscriber))
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn joined_topics(&self) -> Vec<ChannelTopic> {
        self.holders.keys().cloned().collect()
    }
}
