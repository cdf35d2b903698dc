//! UDP transport bridge and the message channel built on it

mod channel;
mod transport;

pub use channel::{ChannelEvent, MessageChannel, MessageSender};
pub use transport::{
    BridgeConfig, BridgeSubscription, TransportBridge, DEFAULT_TICK_INTERVAL,
    MESSAGE_CHANNEL_CAPACITY,
};
