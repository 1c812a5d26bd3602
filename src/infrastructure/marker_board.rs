// Marker board - in-memory map layer served to clients
use crate::application::ports::{MarkerHandle, MarkerLayer};
use crate::domain::marker::Marker;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MarkerBoard {
    next_handle: AtomicU64,
    markers: Mutex<BTreeMap<MarkerHandle, Marker>>,
}

impl MarkerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<MarkerHandle, Marker>> {
        self.markers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MarkerLayer for MarkerBoard {
    fn add(&self, marker: Marker) -> MarkerHandle {
        let handle = MarkerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(handle, marker);
        handle
    }

    fn remove(&self, handle: MarkerHandle) {
        self.lock().remove(&handle);
    }
}
