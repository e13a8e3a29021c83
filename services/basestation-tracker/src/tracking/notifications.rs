//! Aircraft notifications and subscriber fan-out
//!
//! Added and Updated notifications are filtered by the tracking criteria.
//! Recent, Stale and Removed always go out so subscribers can release
//! anything they hold for an aircraft that is leaving the tracked set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::{AircraftBehaviour, AircraftPosition, TrackedAircraft};
use crate::config::Settings;

/// Kind of change being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    Added,
    Updated,
    Recent,
    Stale,
    Removed,
}

/// Notification payload
#[derive(Debug, Clone)]
pub struct AircraftNotification {
    pub kind: NotificationType,
    /// Snapshot of the aircraft when the notification was raised
    pub aircraft: TrackedAircraft,
    /// Set when the position changed (Updated) or is known (Added)
    pub position: Option<AircraftPosition>,
}

/// Receiver of aircraft notifications
///
/// Errors and panics are caught and logged by the sender, never propagated.
pub trait AircraftSubscriber: Send + Sync {
    fn on_notification(&self, notification: &AircraftNotification) -> anyhow::Result<()>;
}

/// Criteria an aircraft must meet for Added/Updated notifications
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingCriteria {
    pub behaviours: Vec<AircraftBehaviour>,
    pub maximum_distance: Option<f64>,
    pub minimum_altitude: Option<f64>,
    pub maximum_altitude: Option<f64>,
}

impl Default for TrackingCriteria {
    fn default() -> Self {
        Self {
            behaviours: AircraftBehaviour::ALL.to_vec(),
            maximum_distance: None,
            minimum_altitude: None,
            maximum_altitude: None,
        }
    }
}

impl TrackingCriteria {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            behaviours: settings.tracked_behaviours.clone(),
            maximum_distance: settings.maximum_tracked_distance,
            minimum_altitude: settings.minimum_tracked_altitude,
            maximum_altitude: settings.maximum_tracked_altitude,
        }
    }

    /// Whether the aircraft passes every configured bound
    ///
    /// An unknown distance or altitude fails any bound configured for it.
    pub fn is_met_by(&self, aircraft: &TrackedAircraft) -> bool {
        self.behaviours.contains(&aircraft.behaviour)
            && within(aircraft.distance, None, self.maximum_distance)
            && within(aircraft.altitude, self.minimum_altitude, self.maximum_altitude)
    }
}

fn within(value: Option<f64>, minimum: Option<f64>, maximum: Option<f64>) -> bool {
    match (minimum, maximum) {
        (None, None) => true,
        _ => value.is_some_and(|v| minimum.map_or(true, |min| v >= min) && maximum.map_or(true, |max| v <= max)),
    }
}

/// Filters and dispatches aircraft notifications to subscribers
pub struct NotificationSender {
    criteria: TrackingCriteria,
    subscribers: Vec<Arc<dyn AircraftSubscriber>>,
}

impl NotificationSender {
    pub fn new(criteria: TrackingCriteria) -> Self {
        Self {
            criteria,
            subscribers: Vec::new(),
        }
    }

    /// Register a subscriber
    pub fn with_subscriber(mut self, subscriber: Arc<dyn AircraftSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn criteria(&self) -> &TrackingCriteria {
        &self.criteria
    }

    pub fn notification_required(&self, aircraft: &TrackedAircraft) -> bool {
        self.criteria.is_met_by(aircraft)
    }

    /// Newly tracked aircraft, with its position when known
    pub fn send_added(&self, aircraft: &TrackedAircraft) {
        if self.notification_required(aircraft) {
            let position = AircraftPosition::from_aircraft(aircraft);
            self.dispatch(NotificationType::Added, aircraft, position);
        }
    }

    /// Updated aircraft, with a position only if latitude or longitude changed
    pub fn send_updated(
        &self,
        aircraft: &TrackedAircraft,
        previous_latitude: Option<f64>,
        previous_longitude: Option<f64>,
    ) {
        if self.notification_required(aircraft) {
            let moved = aircraft.latitude != previous_latitude || aircraft.longitude != previous_longitude;
            let position = if moved {
                AircraftPosition::from_aircraft(aircraft)
            } else {
                None
            };
            self.dispatch(NotificationType::Updated, aircraft, position);
        }
    }

    pub fn send_recent(&self, aircraft: &TrackedAircraft) {
        self.dispatch(NotificationType::Recent, aircraft, None);
    }

    pub fn send_stale(&self, aircraft: &TrackedAircraft) {
        self.dispatch(NotificationType::Stale, aircraft, None);
    }

    pub fn send_removed(&self, aircraft: &TrackedAircraft) {
        self.dispatch(NotificationType::Removed, aircraft, None);
    }

    fn dispatch(&self, kind: NotificationType, aircraft: &TrackedAircraft, position: Option<AircraftPosition>) {
        debug!("{:?} notification for {}", kind, aircraft.address);

        let notification = AircraftNotification {
            kind,
            aircraft: aircraft.clone(),
            position,
        };

        for subscriber in &self.subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_notification(&notification))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Subscriber failed on {:?} for {}: {:#}", kind, aircraft.address, e),
                Err(_) => error!("Subscriber panicked on {:?} for {}", kind, aircraft.address),
            }
        }
    }
}
