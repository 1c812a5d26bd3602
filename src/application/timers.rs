// Timers - refresh ticks and settle delays posted back into the event loop
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    RefreshTick { instance_id: String },
    Remount { instance_id: String, generation: u64 },
    MarkerRemount { generation: u64 },
}

/// Aborts its timer task when dropped, so a cleared field is a cleared timer.
#[derive(Debug)]
pub struct TimerGuard {
    handle: AbortHandle,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    sender: mpsc::UnboundedSender<TimerEvent>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Fires immediately, then every `period`.
    pub fn every(&self, period: Duration, event: TimerEvent) -> TimerGuard {
        let sender = self.sender.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if sender.send(event.clone()).is_err() {
                    break;
                }
            }
        });
        TimerGuard {
            handle: task.abort_handle(),
        }
    }

    pub fn after(&self, delay: Duration, event: TimerEvent) -> TimerGuard {
        let sender = self.sender.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(event);
        });
        TimerGuard {
            handle: task.abort_handle(),
        }
    }
}
