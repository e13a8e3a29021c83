//! Live aircraft tracking: state, behaviour, notifications and the tracker itself

pub mod aircraft;
pub mod behaviour;
pub mod geometry;
pub mod notifications;
pub mod tracker;
pub mod updater;

pub use aircraft::{AircraftBehaviour, AircraftPosition, AltitudeHistory, TrackedAircraft, TrackingStatus};
pub use geometry::DistanceCalculator;
pub use notifications::{
    AircraftNotification, AircraftSubscriber, NotificationSender, NotificationType, TrackingCriteria,
};
pub use tracker::{AircraftTracker, TrackerStats, TrackerTiming};
pub use updater::PropertyUpdater;
