//! Host-side message channel over a transport bridge

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;

use super::transport::{BridgeSubscription, TransportBridge};
use crate::error::BridgeError;

/// Something that happened on a message channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Application bytes from the remote side
    Message(Bytes),
    /// The network or codec ended the channel
    Closed(Option<String>),
    /// The channel was ended locally
    Ended,
}

/// Byte channel handed to the editor side
///
/// Messages are delivered in codec order. A subscriber that falls behind
/// the broadcast buffer cannot recover the lost bytes, so lag closes the
/// channel with an error instead of silently skipping data.
pub struct MessageChannel {
    bridge: Arc<TransportBridge>,
    events: BridgeSubscription,
    message_open: bool,
    closed_open: bool,
    ended_open: bool,
    finished: bool,
}

impl MessageChannel {
    /// Wrap a bridge and a subscription taken from it
    pub fn new(bridge: Arc<TransportBridge>, events: BridgeSubscription) -> Self {
        Self {
            bridge,
            events,
            message_open: true,
            closed_open: true,
            ended_open: true,
            finished: false,
        }
    }

    /// Send application bytes
    pub async fn send(&self, data: &[u8]) -> Result<(), BridgeError> {
        self.bridge.send(data).await
    }

    /// A cloneable send half, for writing while another task reads events
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            bridge: Arc::clone(&self.bridge),
        }
    }

    /// End the channel and its bridge
    pub fn end(&self) {
        self.bridge.end();
    }

    /// Wait for queued outbound data to leave
    ///
    /// Datagrams are written as soon as the codec produces them, so there is
    /// never anything queued here.
    pub async fn drain(&self) {}

    /// The bridge underneath
    pub fn bridge(&self) -> &Arc<TransportBridge> {
        &self.bridge
    }

    /// Next event; `None` once a terminal event has been returned
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }

        loop {
            tokio::select! {
                biased;

                result = self.events.message.recv(), if self.message_open => match result {
                    Ok(bytes) => return Some(ChannelEvent::Message(bytes)),
                    Err(RecvError::Lagged(skipped)) => {
                        let reason = format!("receiver fell behind and lost {} messages", skipped);
                        tracing::warn!("Message channel to {}: {}", self.bridge.peer_addr(), reason);
                        self.bridge.fail(reason.clone());
                        self.finished = true;
                        return Some(ChannelEvent::Closed(Some(reason)));
                    }
                    Err(RecvError::Closed) => self.message_open = false,
                },

                result = self.events.closed.recv(), if self.closed_open => match result {
                    Ok(error) => {
                        self.finished = true;
                        return Some(ChannelEvent::Closed(error));
                    }
                    Err(_) => self.closed_open = false,
                },

                result = self.events.ended.recv(), if self.ended_open => match result {
                    Ok(()) => {
                        self.finished = true;
                        return Some(ChannelEvent::Ended);
                    }
                    Err(_) => self.ended_open = false,
                },

                else => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Send half of a [`MessageChannel`]
#[derive(Clone)]
pub struct MessageSender {
    bridge: Arc<TransportBridge>,
}

impl MessageSender {
    /// Send application bytes
    pub async fn send(&self, data: &[u8]) -> Result<(), BridgeError> {
        self.bridge.send(data).await
    }

    /// End the channel
    pub fn end(&self) {
        self.bridge.end();
    }
}
