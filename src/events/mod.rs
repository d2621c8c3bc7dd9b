pub mod bus;
pub mod types;

pub use bus::{EventEmitter, Subscription, SubscriptionId};
pub use types::{
    DeviceAvailabilityEvent, Event, EventFilter, EventId, QualityChangeEvent, StateUpdateEvent,
};
