//! Core event types and the fleet event bus.
//!
//! This crate defines the push-delivery backbone shared by the broker and
//! any observer of the fleet: the event enum, event metadata, and a
//! broadcast-based bus with filtered subscriptions.

pub mod event;
pub mod eventbus;

pub use event::{EventMetadata, FleetEvent};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver,
    SharedEventBus,
};
