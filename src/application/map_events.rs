// Map event bus - typed events raised from marker popups
use crate::domain::marker::MapEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MapEventBus {
    sender: broadcast::Sender<MapEvent>,
}

impl MapEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many handlers received the event.
    pub fn publish(&self, event: MapEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.sender.subscribe()
    }

    /// Run `handler` for every event until the bus is dropped.
    pub fn register<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(MapEvent) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Map event handler lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_registered_handler_receives_select() {
        let bus = MapEventBus::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.register(move |event| sink.lock().unwrap().push(event));

        let delivered = bus.publish(MapEvent::SelectMachine {
            machine_id: "M1".into(),
        });
        assert_eq!(delivered, 1);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[MapEvent::SelectMachine {
                machine_id: "M1".into()
            }]
        );
    }

    #[test]
    fn test_publish_without_handlers() {
        let bus = MapEventBus::new(8);
        assert_eq!(
            bus.publish(MapEvent::SelectMachine {
                machine_id: "M1".into()
            }),
            0
        );
    }
}
