//! Event payloads and subscriber filters (spec §4.6).

use crate::model::{DeviceId, ProviderId, Quality, Value};

/// Monotonic, gap-detectable identifier assigned by
/// [`super::bus::EventEmitter::emit`] — never assigned by the caller.
pub type EventId = u64;

/// Emitted when a cached signal value changes (spec §4.7 step 3). Not
/// emitted on every poll, only on change, to avoid flooding subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdateEvent {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub device_id: DeviceId,
    pub signal_id: String,
    pub value: Value,
    pub quality: Quality,
    pub timestamp_ms: i64,
}

/// Emitted when a signal's quality changes but its value does not (e.g.
/// `Ok` → `Stale`), so subscribers can update a quality indicator without
/// a full value payload.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityChangeEvent {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub device_id: DeviceId,
    pub signal_id: String,
    pub old_quality: Quality,
    pub new_quality: Quality,
    pub timestamp_ms: i64,
}

/// Emitted when a device's provider transitions between available and
/// unavailable (spec §4.4, provider lifecycle).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAvailabilityEvent {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub device_id: DeviceId,
    pub available: bool,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateUpdate(StateUpdateEvent),
    QualityChange(QualityChangeEvent),
    DeviceAvailability(DeviceAvailabilityEvent),
}

impl Event {
    pub fn event_id(&self) -> EventId {
        match self {
            Event::StateUpdate(e) => e.event_id,
            Event::QualityChange(e) => e.event_id,
            Event::DeviceAvailability(e) => e.event_id,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Event::StateUpdate(e) => e.timestamp_ms,
            Event::QualityChange(e) => e.timestamp_ms,
            Event::DeviceAvailability(e) => e.timestamp_ms,
        }
    }

    fn provider_id(&self) -> &str {
        match self {
            Event::StateUpdate(e) => &e.provider_id,
            Event::QualityChange(e) => &e.provider_id,
            Event::DeviceAvailability(e) => &e.provider_id,
        }
    }

    fn device_id(&self) -> &str {
        match self {
            Event::StateUpdate(e) => &e.device_id,
            Event::QualityChange(e) => &e.device_id,
            Event::DeviceAvailability(e) => &e.device_id,
        }
    }

    fn signal_id(&self) -> Option<&str> {
        match self {
            Event::StateUpdate(e) => Some(&e.signal_id),
            Event::QualityChange(e) => Some(&e.signal_id),
            Event::DeviceAvailability(_) => None,
        }
    }

    pub(crate) fn assign_event_id(&mut self, id: EventId) {
        match self {
            Event::StateUpdate(e) => e.event_id = id,
            Event::QualityChange(e) => e.event_id = id,
            Event::DeviceAvailability(e) => e.event_id = id,
        }
    }
}

/// Filters events by provider/device/signal. An empty field matches
/// every value for that component (spec §4.6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub provider_id: String,
    pub device_id: String,
    pub signal_id: String,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        EventFilter::default()
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.provider_id.is_empty() && self.provider_id != event.provider_id() {
            return false;
        }
        if !self.device_id.is_empty() && self.device_id != event.device_id() {
            return false;
        }
        if !self.signal_id.is_empty() {
            // Events with no signal id (e.g. device availability) carry no
            // signal to filter on, so a signal-scoped subscription still
            // lets them through rather than rejecting them outright.
            if let Some(signal_id) = event.signal_id() {
                if signal_id != self.signal_id {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::StateUpdate(StateUpdateEvent {
            event_id: 0,
            provider_id: "sim0".into(),
            device_id: "tempctl-0".into(),
            signal_id: "temperature".into(),
            value: Value::Double(23.5),
            quality: Quality::Ok,
            timestamp_ms: 1000,
        })
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(EventFilter::all().matches(&sample()));
    }

    #[test]
    fn filter_rejects_mismatched_provider() {
        let f = EventFilter {
            provider_id: "other".into(),
            ..EventFilter::all()
        };
        assert!(!f.matches(&sample()));
    }

    #[test]
    fn filter_on_signal_id_still_matches_availability_events() {
        let f = EventFilter {
            signal_id: "temperature".into(),
            ..EventFilter::all()
        };
        let availability = Event::DeviceAvailability(DeviceAvailabilityEvent {
            event_id: 0,
            provider_id: "sim0".into(),
            device_id: "tempctl-0".into(),
            available: true,
            timestamp_ms: 1000,
        });
        assert!(f.matches(&availability));
    }

    #[test]
    fn filter_on_signal_id_rejects_mismatched_signal() {
        let f = EventFilter {
            signal_id: "humidity".into(),
            ..EventFilter::all()
        };
        assert!(!f.matches(&sample()));
    }
}
