//! Client side of a point-to-point device link.
//!
//! A [`Link`] keeps one TCP connection to a device, runs a continuous
//! receive on its own task and reports lifecycle and payload events to
//! registered [`LinkListener`]s. Payload bytes are opaque here; decoding the
//! device's node tree is left to listeners.

pub mod common;
pub mod link;
pub mod structures;

pub use link::notify::{event_channel, ChannelListener, LinkEvent, LinkListener, Notifier, SubscriptionId};
pub use link::receive::ReceiveExit;
pub use link::{Link, ReceiveHandle, ReceiveOutcome};
pub use structures::{DisconnectReason, Endpoint, LinkConfig, LinkError, LinkState, LinkStats, TResult};
