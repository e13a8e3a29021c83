//! Aircraft tracker
//!
//! Owns the live table of tracked aircraft, keyed by ICAO address. Lines from
//! the message reader are parsed and merged into the table; a periodic sweep
//! demotes silent aircraft to recent, then stale, and finally removes them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::one::RefMut;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{NotificationSender, PropertyUpdater, TrackedAircraft, TrackingStatus};
use crate::config::Settings;
use crate::error::TrackerError;
use crate::message::{Message, MessageParser, MessageReader, MessageType, MsgMessageParser, ReaderEvent};

/// Shortest sweep period
const MINIMUM_SWEEP_PERIOD: Duration = Duration::from_millis(100);

const STATS_REPORT_PERIOD: Duration = Duration::from_secs(60);

/// Silence thresholds driving status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerTiming {
    pub time_to_recent: Duration,
    pub time_to_stale: Duration,
    pub time_to_removal: Duration,
}

impl TrackerTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            time_to_recent: settings.time_to_recent(),
            time_to_stale: settings.time_to_stale(),
            time_to_removal: settings.time_to_removal(),
        }
    }

    /// Sweep period: a tenth of the recent threshold, at least 100ms
    pub fn sweep_period(&self) -> Duration {
        (self.time_to_recent / 10).max(MINIMUM_SWEEP_PERIOD)
    }
}

/// Status change decided during a sweep
enum SweepAction {
    Recent(TrackedAircraft),
    Stale(TrackedAircraft),
    Remove(String),
}

/// Aircraft tracker - manages state for all tracked aircraft
pub struct AircraftTracker {
    aircraft: DashMap<String, TrackedAircraft>,
    parsers: HashMap<MessageType, Box<dyn MessageParser>>,
    updater: PropertyUpdater,
    notifier: NotificationSender,
    excluded_addresses: DashSet<String>,
    excluded_callsigns: HashSet<String>,
    timing: TrackerTiming,
}

impl AircraftTracker {
    pub fn new(timing: TrackerTiming, updater: PropertyUpdater, notifier: NotificationSender) -> Self {
        let mut parsers: HashMap<MessageType, Box<dyn MessageParser>> = HashMap::new();
        parsers.insert(MessageType::Msg, Box::new(MsgMessageParser));

        Self {
            aircraft: DashMap::new(),
            parsers,
            updater,
            notifier,
            excluded_addresses: DashSet::new(),
            excluded_callsigns: HashSet::new(),
            timing,
        }
    }

    /// Never track these addresses
    pub fn with_excluded_addresses<I, S>(self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            self.excluded_addresses.insert(address.as_ref().trim().to_ascii_uppercase());
        }
        self
    }

    /// Exclude any aircraft seen using one of these callsigns
    pub fn with_excluded_callsigns<I, S>(mut self, callsigns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_callsigns
            .extend(callsigns.into_iter().map(|c| c.as_ref().trim().to_string()));
        self
    }

    /// Handle one raw feed line
    ///
    /// Unknown message types and unparseable lines are dropped quietly.
    pub fn on_new_message(&self, line: &str) {
        let fields: Vec<&str> = line.trim_end().split(',').collect();

        let Some(parser) = fields
            .first()
            .and_then(|f| f.parse::<MessageType>().ok())
            .and_then(|t| self.parsers.get(&t))
        else {
            return;
        };

        match parser.parse(&fields) {
            Ok(message) => self.process_message(message),
            Err(e) => debug!("Discarding message: {}", e),
        }
    }

    /// Apply a decoded message to the live table and notify subscribers
    pub fn process_message(&self, message: Message) {
        if message.address.is_empty() || self.excluded_addresses.contains(&message.address) {
            return;
        }

        if let Some(callsign) = &message.callsign {
            if self.excluded_callsigns.contains(callsign) {
                debug!("Excluding {} for the rest of the run (callsign {})", message.address, callsign);
                self.excluded_addresses.insert(message.address.clone());
                return;
            }
        }

        let flags = reported_flags(&message);
        if message.emergency == Some(true) {
            warn!("Aircraft {} reports {}", message.address, flags.join(", "));
        } else if !flags.is_empty() {
            debug!("Aircraft {} reports {}", message.address, flags.join(", "));
        }

        let (snapshot, created, previous_latitude, previous_longitude) = {
            let (mut entry, created) = self.entry(&message.address, message.timestamp);
            let previous_latitude = entry.latitude;
            let previous_longitude = entry.longitude;
            let previous_altitude = entry.altitude;

            self.updater.update_properties(&mut entry, &message);
            self.updater.update_behaviour(&mut entry, previous_altitude);

            (entry.value().clone(), created, previous_latitude, previous_longitude)
        };

        if created {
            debug!(
                "New aircraft tracked: {} (generated {:?})",
                snapshot.address, message.generated
            );
            self.notifier.send_added(&snapshot);
        } else {
            self.notifier
                .send_updated(&snapshot, previous_latitude, previous_longitude);
        }
    }

    /// Atomically get or create the entry for an address
    ///
    /// Returns true if this call created it.
    pub fn get_or_create(&self, address: &str, seen: DateTime<Utc>) -> bool {
        let (_, created) = self.entry(address, seen);
        created
    }

    fn entry(&self, address: &str, seen: DateTime<Utc>) -> (RefMut<'_, String, TrackedAircraft>, bool) {
        let mut created = false;
        let entry = self
            .aircraft
            .entry(address.to_string())
            .or_insert_with(|| {
                created = true;
                TrackedAircraft::new(address, seen)
            });
        (entry, created)
    }

    /// Sweep the table against the current time
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    /// Demote or remove aircraft based on time since last seen
    ///
    /// Recent and Stale are reported once, on transition. Removal re-checks the
    /// entry under its lock so a message arriving mid-sweep keeps it alive.
    pub fn sweep_at(&self, now: DateTime<Utc>) {
        let recent = to_chrono(self.timing.time_to_recent);
        let stale = to_chrono(self.timing.time_to_stale);
        let removal = to_chrono(self.timing.time_to_removal);

        let mut actions = Vec::new();
        for mut entry in self.aircraft.iter_mut() {
            let elapsed = now.signed_duration_since(entry.last_seen);
            if elapsed >= removal {
                actions.push(SweepAction::Remove(entry.key().clone()));
            } else if elapsed >= stale {
                if entry.status != TrackingStatus::Stale {
                    entry.status = TrackingStatus::Stale;
                    actions.push(SweepAction::Stale(entry.value().clone()));
                }
            } else if elapsed >= recent && entry.status == TrackingStatus::Active {
                entry.status = TrackingStatus::Inactive;
                actions.push(SweepAction::Recent(entry.value().clone()));
            }
        }

        for action in actions {
            match action {
                SweepAction::Recent(aircraft) => self.notifier.send_recent(&aircraft),
                SweepAction::Stale(aircraft) => self.notifier.send_stale(&aircraft),
                SweepAction::Remove(address) => {
                    let removed = self
                        .aircraft
                        .remove_if(&address, |_, a| now.signed_duration_since(a.last_seen) >= removal);
                    if let Some((_, mut aircraft)) = removed {
                        debug!("Removing aircraft {}", address);
                        aircraft.status = TrackingStatus::Removed;
                        self.notifier.send_removed(&aircraft);
                    }
                }
            }
        }
    }

    /// Run until cancelled or the reader fails
    ///
    /// The sweep task and reader are stopped and the table cleared however the
    /// loop exits. Cancellation is reported as [`TrackerError::Cancelled`].
    pub async fn run(self: Arc<Self>, reader: MessageReader, cancel: CancellationToken) -> Result<(), TrackerError> {
        let run_token = cancel.child_token();
        let _stop = run_token.clone().drop_guard();

        info!("Tracking aircraft from {}", reader.address());

        let sweeper = tokio::spawn(Arc::clone(&self).sweep_loop(run_token.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(reader.run(tx, run_token.clone()));

        let result = self.consume(rx, &cancel).await;

        run_token.cancel();
        let _ = sweeper.await;
        let reader_result = reader_task.await;
        self.aircraft.clear();
        info!("Tracker stopped");

        match result {
            Err(e) => Err(e),
            Ok(()) => match reader_result? {
                Err(e) => Err(e.into()),
                Ok(()) if cancel.is_cancelled() => Err(TrackerError::Cancelled),
                Ok(()) => Ok(()),
            },
        }
    }

    async fn consume(
        &self,
        mut rx: mpsc::UnboundedReceiver<ReaderEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), TrackerError> {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
                event = rx.recv() => event,
            };

            match event {
                Some(ReaderEvent::Line(line)) => self.on_new_message(&line),
                Some(ReaderEvent::Connected(address)) => info!("Message reader connected to {}", address),
                Some(ReaderEvent::Disconnected(address)) => warn!("Message reader disconnected from {}", address),
                // Reader has finished; its result decides the outcome
                None => return Ok(()),
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.timing.sweep_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = tokio::time::interval_at(Instant::now() + STATS_REPORT_PERIOD, STATS_REPORT_PERIOD);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep(),
                _ = report.tick() => info!("[Tracker] {}", self.stats_summary()),
            }
        }
    }

    /// Snapshot of a single tracked aircraft
    pub fn get(&self, address: &str) -> Option<TrackedAircraft> {
        self.aircraft.get(address).map(|a| a.value().clone())
    }

    /// Snapshot of all tracked aircraft
    pub fn aircraft(&self) -> Vec<TrackedAircraft> {
        self.aircraft.iter().map(|a| a.value().clone()).collect()
    }

    /// Get count of tracked aircraft
    pub fn count(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded_addresses.contains(address)
    }

    /// Get summary statistics
    pub fn stats_summary(&self) -> TrackerStats {
        let mut stats = TrackerStats::default();
        for aircraft in self.aircraft.iter() {
            stats.total_aircraft += 1;
            stats.with_position += usize::from(aircraft.has_position());
            stats.with_callsign += usize::from(aircraft.callsign.is_some());
            stats.total_messages += aircraft.messages;
        }
        stats
    }
}

/// Set status flags carried by a message
fn reported_flags(message: &Message) -> Vec<&'static str> {
    [
        (message.emergency, "emergency"),
        (message.alert, "alert"),
        (message.spi, "ident"),
        (message.is_on_ground, "on ground"),
    ]
    .into_iter()
    .filter(|(flag, _)| *flag == Some(true))
    .map(|(_, name)| name)
    .collect()
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

/// Tracker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub total_aircraft: usize,
    pub with_position: usize,
    pub with_callsign: usize,
    pub total_messages: u64,
}

impl std::fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Aircraft: {} total, {} with position, {} with callsign, {} msgs",
            self.total_aircraft, self.with_position, self.with_callsign, self.total_messages
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::notifications::tests::Recorder;
    use crate::tracking::{AircraftBehaviour, NotificationType, TrackingCriteria};
    use chrono::Duration as ChronoDuration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn timing() -> TrackerTiming {
        TrackerTiming {
            time_to_recent: Duration::from_secs(60),
            time_to_stale: Duration::from_secs(120),
            time_to_removal: Duration::from_secs(180),
        }
    }

    fn tracker(criteria: TrackingCriteria) -> (AircraftTracker, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let notifier = NotificationSender::new(criteria).with_subscriber(recorder.clone());
        (AircraftTracker::new(timing(), PropertyUpdater::default(), notifier), recorder)
    }

    fn message_at(address: &str, seen: DateTime<Utc>) -> Message {
        Message::new(address, seen)
    }

    #[test]
    fn test_sweep_period() {
        assert_eq!(timing().sweep_period(), Duration::from_secs(6));
        let fast = TrackerTiming {
            time_to_recent: Duration::from_millis(500),
            ..timing()
        };
        assert_eq!(fast.sweep_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_added_then_updated() {
        let (tracker, recorder) = tracker(TrackingCriteria::default());
        tracker.on_new_message("MSG,1,1,1,4CA2D8,1,2024/01/01,12:00:00.000,2024/01/01,12:00:00.000,RYR123,,,,,,,,,,,0");
        tracker.on_new_message("MSG,3,1,1,4CA2D8,1,2024/01/01,12:00:01.000,2024/01/01,12:00:01.000,,37000,,,51.5,-0.4,,,,,,0");

        assert_eq!(tracker.count(), 1);
        assert_eq!(recorder.kinds(), vec![NotificationType::Added, NotificationType::Updated]);

        let received = recorder.received.lock().unwrap();
        assert!(received[0].position.is_none());
        assert_eq!(received[1].position.as_ref().map(|p| p.longitude), Some(-0.4));
        assert_eq!(received[1].aircraft.messages, 2);
        assert_eq!(received[1].aircraft.callsign.as_deref(), Some("RYR123"));
    }

    #[test]
    fn test_unsupported_messages_are_ignored() {
        let (tracker, recorder) = tracker(TrackingCriteria::default());
        tracker.on_new_message("STA,,1,1,4CA2D8,1,2024/01/01,12:00:00.000,2024/01/01,12:00:00.000,RM");
        tracker.on_new_message("AIR,,1,1,4CA2D8,1");
        tracker.on_new_message("garbage");
        tracker.on_new_message("");
        tracker.on_new_message("MSG,3,1");
        assert_eq!(tracker.count(), 0);
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn test_excluded_address() {
        let (tracker, _) = tracker(TrackingCriteria::default());
        let tracker = tracker.with_excluded_addresses(["4ca2d8"]);
        tracker.process_message(message_at("4CA2D8", Utc::now()));
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_excluded_callsign_excludes_address_for_the_run() {
        let (tracker, _) = tracker(TrackingCriteria::default());
        let tracker = tracker.with_excluded_callsigns(["GAF123"]);

        let mut msg = message_at("3F4A21", Utc::now());
        msg.callsign = Some("GAF123".to_string());
        tracker.process_message(msg);
        assert!(tracker.is_excluded("3F4A21"));

        // Later messages without the callsign are still dropped
        tracker.process_message(message_at("3F4A21", Utc::now()));
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let (tracker, _) = tracker(TrackingCriteria::default());
        let tracker = Arc::new(tracker);
        let seen = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.get_or_create("406A3D", seen))
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(created, 1);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_removal_boundary() {
        let (tracker, recorder) = tracker(TrackingCriteria::default());
        let seen = Utc::now();
        tracker.process_message(message_at("406A3D", seen));

        let removal = ChronoDuration::seconds(180);
        tracker.sweep_at(seen + removal - ChronoDuration::milliseconds(1));
        assert_eq!(tracker.count(), 1);

        tracker.sweep_at(seen + removal);
        tracker.sweep_at(seen + removal + ChronoDuration::seconds(1));
        assert_eq!(tracker.count(), 0);

        let removed = recorder
            .kinds()
            .into_iter()
            .filter(|k| *k == NotificationType::Removed)
            .count();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let (tracker, recorder) = tracker(TrackingCriteria::default());
        let seen = Utc::now();
        tracker.process_message(message_at("406A3D", seen));

        tracker.sweep_at(seen + ChronoDuration::seconds(59));
        assert_eq!(tracker.get("406A3D").unwrap().status, TrackingStatus::Active);

        tracker.sweep_at(seen + ChronoDuration::seconds(60));
        tracker.sweep_at(seen + ChronoDuration::seconds(61));
        assert_eq!(tracker.get("406A3D").unwrap().status, TrackingStatus::Inactive);

        tracker.sweep_at(seen + ChronoDuration::seconds(120));
        tracker.sweep_at(seen + ChronoDuration::seconds(121));
        assert_eq!(tracker.get("406A3D").unwrap().status, TrackingStatus::Stale);

        assert_eq!(
            recorder.kinds(),
            vec![NotificationType::Added, NotificationType::Recent, NotificationType::Stale]
        );
    }

    #[test]
    fn test_new_message_reactivates_stale_aircraft() {
        let (tracker, _) = tracker(TrackingCriteria::default());
        let seen = Utc::now();
        tracker.process_message(message_at("406A3D", seen));
        tracker.sweep_at(seen + ChronoDuration::seconds(150));
        assert_eq!(tracker.get("406A3D").unwrap().status, TrackingStatus::Stale);

        tracker.process_message(message_at("406A3D", seen + ChronoDuration::seconds(151)));
        assert_eq!(tracker.get("406A3D").unwrap().status, TrackingStatus::Active);
    }

    #[test]
    fn test_exit_notifications_ignore_criteria() {
        let criteria = TrackingCriteria {
            behaviours: vec![AircraftBehaviour::Climbing],
            ..TrackingCriteria::default()
        };
        let (tracker, recorder) = tracker(criteria);
        let seen = Utc::now();
        tracker.process_message(message_at("406A3D", seen));
        assert!(recorder.kinds().is_empty());

        tracker.sweep_at(seen + ChronoDuration::seconds(60));
        tracker.sweep_at(seen + ChronoDuration::seconds(120));
        tracker.sweep_at(seen + ChronoDuration::seconds(180));
        assert_eq!(
            recorder.kinds(),
            vec![NotificationType::Recent, NotificationType::Stale, NotificationType::Removed]
        );
    }

    #[test]
    fn test_stats_summary() {
        let (tracker, _) = tracker(TrackingCriteria::default());
        let mut msg = message_at("406A3D", Utc::now());
        msg.callsign = Some("BAW486".to_string());
        msg.latitude = Some(51.0);
        msg.longitude = Some(0.0);
        tracker.process_message(msg);
        tracker.process_message(message_at("4CA2D8", Utc::now()));

        let stats = tracker.stats_summary();
        assert_eq!(
            stats,
            TrackerStats {
                total_aircraft: 2,
                with_position: 1,
                with_callsign: 1,
                total_messages: 2,
            }
        );
        assert_eq!(stats.to_string(), "Aircraft: 2 total, 1 with position, 1 with callsign, 2 msgs");
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"MSG,3,1,1,406A3D,1,,,,,,14325,,,51.5,-0.4,,,,,,0\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let (tracker, recorder) = tracker(TrackingCriteria::default());
        let tracker = Arc::new(tracker);
        let cancel = CancellationToken::new();
        let reader = MessageReader::new("127.0.0.1", port, Duration::from_secs(30));
        let run = tokio::spawn(Arc::clone(&tracker).run(reader, cancel.clone()));

        for _ in 0..100 {
            if !recorder.kinds().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorder.kinds(), vec![NotificationType::Added]);

        cancel.cancel();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(TrackerError::Cancelled)));
        assert_eq!(tracker.count(), 0);
        server.abort();
    }

    #[test]
    fn test_reported_flags() {
        let mut message = message_at("406A3D", Utc::now());
        assert!(reported_flags(&message).is_empty());

        message.emergency = Some(true);
        message.alert = Some(false);
        message.is_on_ground = Some(true);
        assert_eq!(reported_flags(&message), vec!["emergency", "on ground"]);
    }

    #[tokio::test]
    async fn test_run_sweeps_silent_aircraft() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"MSG,3,1,1,406A3D,1,,,,,,14325,,,51.5,-0.4,,,,,,0\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let recorder = Arc::new(Recorder::default());
        let notifier = NotificationSender::new(TrackingCriteria::default()).with_subscriber(recorder.clone());
        let fast = TrackerTiming {
            time_to_recent: Duration::from_millis(200),
            time_to_stale: Duration::from_secs(30),
            time_to_removal: Duration::from_secs(60),
        };
        let tracker = Arc::new(AircraftTracker::new(fast, PropertyUpdater::default(), notifier));
        let cancel = CancellationToken::new();
        let reader = MessageReader::new("127.0.0.1", port, Duration::from_secs(30));
        let run = tokio::spawn(Arc::clone(&tracker).run(reader, cancel.clone()));

        for _ in 0..150 {
            if recorder.kinds().contains(&NotificationType::Recent) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorder.kinds(), vec![NotificationType::Added, NotificationType::Recent]);
        assert_eq!(tracker.get("406A3D").unwrap().status, TrackingStatus::Inactive);

        cancel.cancel();
        assert!(matches!(run.await.unwrap(), Err(TrackerError::Cancelled)));
        server.abort();
    }

    #[tokio::test]
    async fn test_run_fails_when_feed_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tracker, _) = tracker(TrackingCriteria::default());
        let reader = MessageReader::new("127.0.0.1", port, Duration::from_secs(1));
        let result = Arc::new(tracker).run(reader, CancellationToken::new()).await;
        assert!(matches!(result, Err(TrackerError::Reader(_))));
    }
}
