//! Connects tracker notifications to the queued writer

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiLookupRequest;
use crate::error::TrackerError;
use crate::message::MessageReader;
use crate::tracking::{AircraftNotification, AircraftSubscriber, AircraftTracker, NotificationType, TrackedAircraft};
use crate::writer::{QueueItem, QueuedWriter, WriterEvent};

/// Queues persistence work for tracked aircraft
pub struct TrackerController {
    writer: Arc<QueuedWriter>,
    tracked: DashMap<String, TrackedAircraft>,
    auto_lookup: bool,
}

impl TrackerController {
    pub fn new(writer: Arc<QueuedWriter>, auto_lookup: bool) -> Self {
        Self {
            writer,
            tracked: DashMap::new(),
            auto_lookup,
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Run the writer and tracker until cancelled or the reader fails
    ///
    /// The writer is stopped and its queue flushed before returning, whatever
    /// the tracker outcome.
    pub async fn start(
        &self,
        tracker: Arc<AircraftTracker>,
        reader: MessageReader,
        cancel: CancellationToken,
    ) -> Result<(), TrackerError> {
        let writer_token = cancel.child_token();
        let writer_task = self.writer.start(writer_token.clone()).await?;

        let mut events = self.writer.events();
        let event_token = writer_token.clone();
        let event_logger = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = event_token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(WriterEvent::BatchStarted { queue_size }) => {
                        debug!("Writer batch started, {} queued", queue_size)
                    }
                    Ok(WriterEvent::BatchCompleted {
                        initial_queue_size,
                        final_queue_size,
                        processed,
                        duration,
                    }) => info!(
                        "Wrote {} items in {:?} (queue {} -> {})",
                        processed, duration, initial_queue_size, final_queue_size
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Writer event log lagged by {} events", n)
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let result = tracker.run(reader, cancel).await;

        writer_token.cancel();
        if let Err(e) = writer_task.await {
            warn!("Writer task failed: {}", e);
        }
        let _ = event_logger.await;

        let flushed = self.writer.flush_queue().await;
        info!("Flushed {} queued items on shutdown", flushed);
        self.tracked.clear();

        result
    }
}

impl AircraftSubscriber for TrackerController {
    fn on_notification(&self, notification: &AircraftNotification) -> anyhow::Result<()> {
        let aircraft = &notification.aircraft;
        match notification.kind {
            NotificationType::Added | NotificationType::Updated => {
                self.tracked.insert(aircraft.address.clone(), aircraft.clone());
                self.writer.push(QueueItem::Aircraft(aircraft.clone()));

                if notification.kind == NotificationType::Added && self.auto_lookup {
                    self.writer.push(QueueItem::Lookup(ApiLookupRequest::new(&aircraft.address)));
                }

                if let Some(position) = &notification.position {
                    self.writer.push(QueueItem::Position(position.clone()));
                }
            }
            NotificationType::Removed => {
                self.tracked.remove(&aircraft.address);
            }
            NotificationType::Recent | NotificationType::Stale => {
                if let Some(mut tracked) = self.tracked.get_mut(&aircraft.address) {
                    tracked.status = aircraft.status;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TrackingStore};
    use crate::tracking::{AircraftPosition, NotificationSender, PropertyUpdater, TrackerTiming, TrackingCriteria};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn notification(kind: NotificationType, aircraft: &TrackedAircraft) -> AircraftNotification {
        AircraftNotification {
            kind,
            aircraft: aircraft.clone(),
            position: AircraftPosition::from_aircraft(aircraft),
        }
    }

    fn writer(store: Arc<MemoryStore>) -> Arc<QueuedWriter> {
        Arc::new(QueuedWriter::new(
            store,
            Duration::from_secs(600),
            Duration::from_millis(10),
            100,
        ))
    }

    #[test]
    fn test_added_queues_aircraft_lookup_and_position() {
        let writer = writer(Arc::new(MemoryStore::new()));
        let controller = TrackerController::new(writer.clone(), true);

        let mut aircraft = TrackedAircraft::new("406A3D", Utc::now());
        aircraft.latitude = Some(51.47);
        aircraft.longitude = Some(-0.45);

        controller
            .on_notification(&notification(NotificationType::Added, &aircraft))
            .unwrap();
        assert_eq!(writer.queue_size(), 3);
        assert_eq!(controller.tracked_count(), 1);

        controller
            .on_notification(&notification(NotificationType::Updated, &aircraft))
            .unwrap();
        assert_eq!(writer.queue_size(), 5);

        controller
            .on_notification(&notification(NotificationType::Removed, &aircraft))
            .unwrap();
        assert_eq!(controller.tracked_count(), 0);
        assert_eq!(writer.queue_size(), 5);
    }

    #[test]
    fn test_no_lookup_without_auto_lookup() {
        let writer = writer(Arc::new(MemoryStore::new()));
        let controller = TrackerController::new(writer.clone(), false);

        let aircraft = TrackedAircraft::new("406A3D", Utc::now());
        controller
            .on_notification(&notification(NotificationType::Added, &aircraft))
            .unwrap();
        assert_eq!(writer.queue_size(), 1);
    }

    #[tokio::test]
    async fn test_start_flushes_queue_on_shutdown() {
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

        let store = Arc::new(MemoryStore::new());
        // Interval longer than the test, so only the shutdown flush writes
        let writer = Arc::new(QueuedWriter::new(
            store.clone(),
            Duration::from_secs(600),
            Duration::from_secs(3600),
            100,
        ));
        let controller = Arc::new(TrackerController::new(writer.clone(), false));

        let timing = TrackerTiming {
            time_to_recent: Duration::from_secs(60),
            time_to_stale: Duration::from_secs(120),
            time_to_removal: Duration::from_secs(180),
        };
        let notifier = NotificationSender::new(TrackingCriteria::default()).with_subscriber(controller.clone());
        let tracker = Arc::new(AircraftTracker::new(timing, PropertyUpdater::new(None), notifier));

        let cancel = CancellationToken::new();
        let reader = MessageReader::new("127.0.0.1", port, Duration::from_secs(30));
        let run = {
            let controller = controller.clone();
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.start(tracker, reader, cancel).await })
        };

        for _ in 0..100 {
            if writer.queue_size() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(writer.queue_size() > 0);

        cancel.cancel();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(TrackerError::Cancelled)));
        assert_eq!(writer.queue_size(), 0);

        let rows = store.list_aircraft(Some("406A3D")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].altitude, Some(14325.0));
        server.abort();
    }
}
