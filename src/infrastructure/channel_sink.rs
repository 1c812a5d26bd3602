// Channel sink - outbound join/leave frames for the pub/sub bridge
use crate::application::ports::ChannelTransport;
use crate::domain::topic::ChannelCommand;
use tokio::sync::mpsc;

/// Serializes each command to a JSON frame and queues it for the bridge.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    frames: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        (Self { frames }, receiver)
    }
}

impl ChannelTransport for ChannelSink {
    fn send(&self, command: ChannelCommand) {
        let frame = match serde_json::to_string(&command) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to encode channel command: {}", e);
                return;
            }
        };
        tracing::debug!("Channel frame {}", frame);
        if self.frames.send(frame).is_err() {
            tracing::warn!("Channel bridge is gone, dropping {:?} of {} topics", command.op, command.topics.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topic::ChannelTopic;

    #[test]
    fn test_frames_are_json() {
        let (sink, mut frames) = ChannelSink::new();
        sink.send(ChannelCommand::join(vec![ChannelTopic::new("S1", "M1").unwrap()]));
        sink.send(ChannelCommand::leave(vec![ChannelTopic::new("S1", "M1").unwrap()]));

        assert_eq!(
            frames.try_recv().unwrap(),
            r#"{"op":"join","topics":["sensorstate_S1_M1"]}"#
        );
        assert_eq!(
            frames.try_recv().unwrap(),
            r#"{"op":"leave","topics":["sensorstate_S1_M1"]}"#
        );
    }
}
