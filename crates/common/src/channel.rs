//! Channel bridge between foreground callers and the streaming worker
//!
//! The streaming worker is a dedicated thread that owns the isochronous
//! receive path. Foreground code controls it through a bounded command
//! channel and observes it through a bounded event channel. Both sides use
//! the blocking channel API; neither side ever parks on the other — the
//! worker polls commands between transfers and reports events best-effort.

use async_channel::{Receiver, Sender, bounded};

use protocol::UsbError;

/// Commands from foreground callers to the streaming worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    /// Stop streaming and exit the worker loop
    Stop,
}

/// Events from the streaming worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A frame was published to the shared buffer
    FramePublished {
        /// Bytes in the published frame
        bytes: usize,
        /// Whether the frame was fully assembled
        complete: bool,
    },

    /// A transfer failed; transient errors are followed by a retry
    TransferError {
        /// The underlying transport error
        error: UsbError,
    },

    /// The worker loop exited
    Stopped,
}

/// Foreground handle to a streaming worker
#[derive(Clone)]
pub struct StreamBridge {
    cmd_tx: Sender<StreamCommand>,
    event_rx: Receiver<StreamEvent>,
}

impl StreamBridge {
    /// Send a command to the worker
    ///
    /// Fails only if the worker has already exited and dropped its receiver.
    pub fn send_command(&self, cmd: StreamCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next event without blocking
    pub fn try_recv_event(&self) -> Option<StreamEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Drain all pending events
    pub fn drain_events(&self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Worker-side handle
pub struct StreamWorker {
    cmd_rx: Receiver<StreamCommand>,
    event_tx: Sender<StreamEvent>,
}

impl StreamWorker {
    /// Check for a pending command without blocking
    pub fn try_recv_command(&self) -> Option<StreamCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Report an event, dropping it if the event channel is full
    ///
    /// The receive path must never stall on a slow event consumer.
    pub fn send_event(&self, event: StreamEvent) {
        if let Err(async_channel::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::trace!("stream event dropped: {:?}", event);
        }
    }
}

/// Create the channel pair connecting foreground and worker
pub fn create_stream_bridge() -> (StreamBridge, StreamWorker) {
    let (cmd_tx, cmd_rx) = bounded(16);
    let (event_tx, event_rx) = bounded(64);

    (
        StreamBridge { cmd_tx, event_rx },
        StreamWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_reaches_worker() {
        let (bridge, worker) = create_stream_bridge();

        let handle = std::thread::spawn(move || loop {
            if let Some(cmd) = worker.try_recv_command() {
                return cmd;
            }
            std::thread::yield_now();
        });

        bridge.send_command(StreamCommand::Stop).unwrap();
        assert_eq!(handle.join().unwrap(), StreamCommand::Stop);
    }

    #[test]
    fn test_events_drain_in_order() {
        let (bridge, worker) = create_stream_bridge();

        worker.send_event(StreamEvent::FramePublished {
            bytes: 100,
            complete: true,
        });
        worker.send_event(StreamEvent::Stopped);

        let events = bridge.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Stopped);
        assert!(bridge.try_recv_event().is_none());
    }

    #[test]
    fn test_full_event_channel_drops_instead_of_blocking() {
        let (_bridge, worker) = create_stream_bridge();

        // Far more events than the channel bounds; must not deadlock.
        for _ in 0..1000 {
            worker.send_event(StreamEvent::Stopped);
        }
    }
}
