// Render board - latest mounted frame per diagram instance, with live updates
use crate::application::ports::DiagramSurface;
use crate::domain::render::RenderModel;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// A clear (`frame: None`) or a mount.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardUpdate {
    pub instance_id: String,
    pub frame: Option<RenderModel>,
}

pub struct RenderBoard {
    frames: Mutex<HashMap<String, RenderModel>>,
    updates: broadcast::Sender<BoardUpdate>,
}

impl RenderBoard {
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity);
        Self {
            frames: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// `None` while the instance is cleared or was never mounted.
    pub fn frame(&self, instance_id: &str) -> Option<RenderModel> {
        self.lock().get(instance_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardUpdate> {
        self.updates.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RenderModel>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DiagramSurface for RenderBoard {
    fn clear(&self, instance_id: &str) {
        self.lock().remove(instance_id);
        let _ = self.updates.send(BoardUpdate {
            instance_id: instance_id.to_string(),
            frame: None,
        });
    }

    fn mount(&self, model: RenderModel) {
        let instance_id = model.instance_id.clone();
        self.lock().insert(instance_id.clone(), model.clone());
        let _ = self.updates.send(BoardUpdate {
            instance_id,
            frame: Some(model),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::diagram::DiagramType;
    use chrono::Utc;

    fn frame(instance_id: &str) -> RenderModel {
        RenderModel {
            instance_id: instance_id.into(),
            machine_id: "M1".into(),
            diagram_type: DiagramType::Pms,
            groups: Vec::new(),
            rendered_at: Utc::now(),
        }
    }

    #[test]
    fn test_mount_replaces_and_clear_removes() {
        let board = RenderBoard::new(8);
        let mut updates = board.subscribe();

        board.mount(frame("d1"));
        board.mount(frame("d2"));
        board.clear("d1");

        assert!(board.frame("d1").is_none());
        assert!(board.frame("d2").is_some());
        assert_eq!(updates.try_recv().unwrap().instance_id, "d1");
        assert_eq!(updates.try_recv().unwrap().instance_id, "d2");
        assert_eq!(updates.try_recv().unwrap().frame, None);
    }
}
