// Slot binding store - structural edits of a diagram model
use crate::application::topic_registry::{diff_subscriptions, SubscriptionDelta};
use crate::domain::diagram::{
    DiagramGroup, DiagramModel, SlotAddressing, SlotBinding, SlotConfig, SlotType,
};
use crate::domain::errors::BindingError;
use crate::domain::topic::normalize_sensor_id;
use serde::Deserialize;
use std::sync::Arc;

/// Operator edits, as sent by the edit surface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DiagramEdit {
    #[serde(rename_all = "camelCase")]
    Bind {
        group_key: String,
        slot_type: SlotType,
        #[serde(default)]
        index: u32,
        sensor_id: Option<String>,
        #[serde(default)]
        config: SlotConfig,
    },
    #[serde(rename_all = "camelCase")]
    Unbind {
        group_key: String,
        slot_type: SlotType,
        #[serde(default)]
        index: u32,
    },
    #[serde(rename_all = "camelCase")]
    AddSlot {
        group_key: String,
        slot_type: SlotType,
        #[serde(default)]
        config: SlotConfig,
    },
    #[serde(rename_all = "camelCase")]
    RemoveSlot {
        group_key: String,
        slot_type: SlotType,
        index: u32,
    },
    AddGroup,
    #[serde(rename_all = "camelCase")]
    RenameGroup { group_key: String, label: String },
    #[serde(rename_all = "camelCase")]
    RemoveGroup { group_key: String },
}

/// Before/after snapshots of one mutation. `previous` is never touched.
#[derive(Debug, Clone)]
pub struct ModelChange {
    pub previous: Arc<DiagramModel>,
    pub current: Arc<DiagramModel>,
}

impl ModelChange {
    pub fn subscription_delta(&self) -> SubscriptionDelta {
        let old = self.previous.bound_sensors();
        let new = self.current.bound_sensors();
        diff_subscriptions(
            old.iter().map(String::as_str),
            new.iter().map(String::as_str),
            &self.current.machine_id,
        )
    }
}

#[derive(Debug, Clone)]
pub struct SlotBindingStore {
    model: Arc<DiagramModel>,
}

impl SlotBindingStore {
    pub fn new(model: DiagramModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    pub fn model(&self) -> Arc<DiagramModel> {
        self.model.clone()
    }

    /// Dispatch an operator edit. `AddSlot`/`AddGroup` report what they created.
    pub fn apply(&mut self, edit: DiagramEdit) -> Result<ModelChange, BindingError> {
        match edit {
            DiagramEdit::Bind {
                group_key,
                slot_type,
                index,
                sensor_id,
                config,
            } => self.bind(&group_key, slot_type, index, sensor_id.as_deref(), &config),
            DiagramEdit::Unbind {
                group_key,
                slot_type,
                index,
            } => self.unbind(&group_key, slot_type, index),
            DiagramEdit::AddSlot {
                group_key,
                slot_type,
                config,
            } => self.add_slot(&group_key, slot_type, config).map(|(_, change)| change),
            DiagramEdit::RemoveSlot {
                group_key,
                slot_type,
                index,
            } => self.remove_slot(&group_key, slot_type, index),
            DiagramEdit::AddGroup => Ok(self.add_group().1),
            DiagramEdit::RenameGroup { group_key, label } => self.rename_group(&group_key, label),
            DiagramEdit::RemoveGroup { group_key } => self.remove_group(&group_key),
        }
    }

    /// Point a slot at a sensor. Clearing the sensor of a free slot removes it.
    pub fn bind(
        &mut self,
        group_key: &str,
        slot_type: SlotType,
        index: u32,
        sensor_id: Option<&str>,
        config: &SlotConfig,
    ) -> Result<ModelChange, BindingError> {
        let sensor_id = sensor_id.and_then(normalize_sensor_id);
        let kind = slot_type.kind();
        if sensor_id.is_none() && kind.free {
            return self.remove_slot(group_key, slot_type, index);
        }

        self.mutate_group(group_key, |group| {
            let slot = find_slot_mut(group, slot_type, index)?;
            slot.sensor_id = sensor_id;
            slot.config.merge_editable(config, kind.editable);
            Ok(())
        })
    }

    pub fn unbind(
        &mut self,
        group_key: &str,
        slot_type: SlotType,
        index: u32,
    ) -> Result<ModelChange, BindingError> {
        let config = self.current_config(group_key, slot_type, index)?;
        self.bind(group_key, slot_type, index, None, &config)
    }

    /// New index is `1 + max(existing)`, so freed indices are never reused.
    pub fn add_slot(
        &mut self,
        group_key: &str,
        slot_type: SlotType,
        config: SlotConfig,
    ) -> Result<(u32, ModelChange), BindingError> {
        let kind = slot_type.kind();
        if !kind.free || kind.addressing == SlotAddressing::ByType {
            return Err(BindingError::FixedSlot { slot_type });
        }

        let mut new_index = 0;
        let change = self.mutate_group(group_key, |group| {
            new_index = 1 + group
                .slots
                .iter()
                .filter(|s| s.slot_type == slot_type)
                .map(|s| s.index)
                .max()
                .unwrap_or(0);
            let mut slot = SlotBinding::unbound(slot_type, new_index);
            slot.config.merge_editable(&config, kind.editable);
            group.slots.push(slot);
            Ok(())
        })?;
        Ok((new_index, change))
    }

    /// Removing never renumbers the surviving slots.
    pub fn remove_slot(
        &mut self,
        group_key: &str,
        slot_type: SlotType,
        index: u32,
    ) -> Result<ModelChange, BindingError> {
        if !slot_type.kind().free {
            return Err(BindingError::FixedSlot { slot_type });
        }

        self.mutate_group(group_key, |group| {
            let position = group
                .slots
                .iter()
                .position(|s| s.matches(slot_type, index))
                .ok_or_else(|| unknown_slot(group, slot_type, index))?;
            group.slots.remove(position);
            Ok(())
        })
    }

    /// Append a group built from the diagram type's template. Returns its key.
    pub fn add_group(&mut self) -> (String, ModelChange) {
        let mut next = (*self.model).clone();
        let template = next.diagram_type.group_template();
        let index = 1 + next.groups.iter().map(|g| g.index).max().unwrap_or(0);
        let key = uuid::Uuid::new_v4().to_string();
        next.groups.push(DiagramGroup {
            key: key.clone(),
            index,
            label: format!("{}{}", template.label_prefix, index),
            slots: template.slots,
        });
        (key, self.commit(next))
    }

    pub fn rename_group(&mut self, group_key: &str, label: String) -> Result<ModelChange, BindingError> {
        self.mutate_group(group_key, |group| {
            group.label = label;
            Ok(())
        })
    }

    pub fn remove_group(&mut self, group_key: &str) -> Result<ModelChange, BindingError> {
        if self.model.group(group_key).is_none() {
            return Err(BindingError::UnknownGroup(group_key.to_string()));
        }
        let mut next = (*self.model).clone();
        next.groups.retain(|g| g.key != group_key);
        Ok(self.commit(next))
    }

    /// Swap in a freshly loaded model.
    pub fn replace(&mut self, model: DiagramModel) -> ModelChange {
        self.commit(model)
    }

    fn current_config(
        &self,
        group_key: &str,
        slot_type: SlotType,
        index: u32,
    ) -> Result<SlotConfig, BindingError> {
        let group = self
            .model
            .group(group_key)
            .ok_or_else(|| BindingError::UnknownGroup(group_key.to_string()))?;
        group
            .slot(slot_type, index)
            .map(|s| s.config.clone())
            .ok_or_else(|| unknown_slot(group, slot_type, index))
    }

    fn mutate_group(
        &mut self,
        group_key: &str,
        edit: impl FnOnce(&mut DiagramGroup) -> Result<(), BindingError>,
    ) -> Result<ModelChange, BindingError> {
        let mut next = (*self.model).clone();
        let group = next
            .groups
            .iter_mut()
            .find(|g| g.key == group_key)
            .ok_or_else(|| BindingError::UnknownGroup(group_key.to_string()))?;
        edit(group)?;
        Ok(self.commit(next))
    }

    fn commit(&mut self, next: DiagramModel) -> ModelChange {
        let previous = std::mem::replace(&mut self.model, Arc::new(next));
        ModelChange {
            previous,
            current: self.model.clone(),
        }
    }
}

fn find_slot_mut<'a>(
    group: &'a mut DiagramGroup,
    slot_type: SlotType,
    index: u32,
) -> Result<&'a mut SlotBinding, BindingError> {
    let key = group.key.clone();
    group
        .slots
        .iter_mut()
        .find(|s| s.matches(slot_type, index))
        .ok_or(BindingError::UnknownSlot {
            group_key: key,
            slot_type,
            index,
        })
}

fn unknown_slot(group: &DiagramGroup, slot_type: SlotType, index: u32) -> BindingError {
    BindingError::UnknownSlot {
        group_key: group.key.clone(),
        slot_type,
        index,
    }
}
