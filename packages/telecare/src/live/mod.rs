//! Live update bridge.
//!
//! Views open a channel scoped to a room, register a fixed set of handlers,
//! and close the channel when they unmount. The channel task serializes
//! dispatch; a closed channel never invokes its handlers again.

mod bridge;
mod channel;
mod protocol;

pub use bridge::{Connect, LiveBridge};
pub use channel::{ChannelHandle, ChannelState, Handler, Handlers};
pub use protocol::{ClientEvent, EventName, LiveEvent, Room};

pub(crate) use channel::start;
