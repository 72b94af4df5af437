//! Event bus for fleet fan-out.
//!
//! A broadcast channel distributes events to every subscriber; filtered
//! receivers narrow a subscription to one family of events or to the
//! readings of a single sensor assignment. Delivery is per-receiver FIFO;
//! slow subscribers may drop old events rather than stall publishers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::{EventMetadata, FleetEvent};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(FleetEvent, EventMetadata)>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow
    /// subscribers before old ones are dropped.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// Returns `true` if at least one subscriber received it.
    pub fn publish(&self, event: FleetEvent) -> bool {
        self.publish_with_source(event, "system")
    }

    /// Publish an event with a custom source.
    pub fn publish_with_source(&self, event: FleetEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter predicate.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&FleetEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }

    /// Filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(FleetEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // Missed some events but can continue receiving.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&FleetEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(FleetEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&FleetEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(FleetEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(FleetEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Subscribe to sensor readings only.
    pub fn sensor_readings(&self) -> FilteredReceiver<fn(&FleetEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), FleetEvent::is_sensor_reading)
    }

    /// Subscribe to node health transitions only.
    pub fn node_events(&self) -> FilteredReceiver<fn(&FleetEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), FleetEvent::is_node_event)
    }

    /// Subscribe to actuator command/state events only.
    pub fn actuator_events(&self) -> FilteredReceiver<fn(&FleetEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), FleetEvent::is_actuator_event)
    }

    /// Subscribe to readings of a single sensor assignment.
    pub fn readings_for(
        &self,
        assignment: i64,
    ) -> FilteredReceiver<impl Fn(&FleetEvent) -> bool + Send + 'static> {
        FilteredReceiver::new(self.tx.subscribe(), move |event| {
            matches!(event, FleetEvent::SensorReading { assignment_id, .. } if *assignment_id == assignment)
        })
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&FleetEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
