//! Merges decoded messages into tracked aircraft

use super::{behaviour, DistanceCalculator, TrackedAircraft, TrackingStatus};
use crate::message::Message;

/// Copies one message field onto the aircraft, returning true if it changed
struct FieldMapping {
    apply: fn(&mut TrackedAircraft, &Message) -> bool,
}

/// Map a field that has the same name on the aircraft and the message
macro_rules! field_mapping {
    ($field:ident) => {
        FieldMapping {
            apply: |aircraft, message| copy_if_changed(&mut aircraft.$field, &message.$field),
        }
    };
}

/// Fields shared by `Message` and `TrackedAircraft`
const FIELD_MAPPINGS: &[FieldMapping] = &[
    field_mapping!(callsign),
    field_mapping!(squawk),
    field_mapping!(altitude),
    field_mapping!(ground_speed),
    field_mapping!(track),
    field_mapping!(vertical_rate),
    field_mapping!(latitude),
    field_mapping!(longitude),
];

fn copy_if_changed<T: Clone + PartialEq>(target: &mut Option<T>, source: &Option<T>) -> bool {
    match source {
        Some(value) if target.as_ref() != Some(value) => {
            *target = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Applies messages to aircraft and maintains derived properties
#[derive(Debug, Clone, Default)]
pub struct PropertyUpdater {
    distance: Option<DistanceCalculator>,
}

impl PropertyUpdater {
    /// Create an updater; without a receiver position, distance is never set
    pub fn new(distance: Option<DistanceCalculator>) -> Self {
        Self { distance }
    }

    /// Merge a message into the aircraft
    ///
    /// Callers capture the previous altitude before calling this and pass it
    /// to [`update_behaviour`](Self::update_behaviour) afterwards.
    pub fn update_properties(&self, aircraft: &mut TrackedAircraft, message: &Message) {
        aircraft.messages += 1;

        let previous_position = (aircraft.latitude, aircraft.longitude);
        let mut changed = false;
        for mapping in FIELD_MAPPINGS {
            changed |= (mapping.apply)(aircraft, message);
        }

        if message.timestamp != aircraft.last_seen {
            aircraft.last_seen = message.timestamp;
            changed = true;
        }

        if changed {
            aircraft.status = TrackingStatus::Active;
        }

        if (aircraft.latitude, aircraft.longitude) != previous_position {
            aircraft.position_last_updated = Some(message.timestamp);
        }

        if let (Some(calculator), Some((latitude, longitude))) =
            (&self.distance, aircraft.latitude.zip(aircraft.longitude))
        {
            aircraft.distance = Some(calculator.distance_nm(latitude, longitude).round());
        }
    }

    /// Record the altitude change since `previous_altitude` and re-assess behaviour
    pub fn update_behaviour(&self, aircraft: &mut TrackedAircraft, previous_altitude: Option<f64>) {
        if let (Some(previous), Some(current)) = (previous_altitude, aircraft.altitude) {
            aircraft.altitude_history.push(current - previous);
            aircraft.behaviour = behaviour::assess(aircraft.altitude_history.iter());
        }
    }
}
