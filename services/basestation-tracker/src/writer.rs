//! Queued, batched persistence of tracked aircraft, positions and lookups
//!
//! The tracker pushes snapshots without waiting on the database or remote
//! APIs. A timer drains the queue in batches; one failed item is logged and
//! the rest of the batch carries on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiEndpointType, ApiLookupRequest, ExternalApiWrapper, LookupEligibilityAssessor};
use crate::error::StoreError;
use crate::store::{AircraftLockManager, TrackingStore};
use crate::tracking::{AircraftPosition, TrackedAircraft};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Work accepted by the writer
#[derive(Debug, Clone)]
pub enum QueueItem {
    Aircraft(TrackedAircraft),
    Position(AircraftPosition),
    Lookup(ApiLookupRequest),
}

impl QueueItem {
    fn describe(&self) -> String {
        match self {
            QueueItem::Aircraft(aircraft) => format!("aircraft {}", aircraft.address),
            QueueItem::Position(position) => format!("position for {}", position.address),
            QueueItem::Lookup(request) => format!("lookup for {}", request.address),
        }
    }
}

/// Queued item and whether it has already been deferred
struct Pending {
    item: QueueItem,
    requeued: bool,
}

/// Batch lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    BatchStarted {
        queue_size: usize,
    },
    BatchCompleted {
        initial_queue_size: usize,
        final_queue_size: usize,
        processed: usize,
        duration: Duration,
    },
}

struct Lookups {
    api: Arc<dyn ExternalApiWrapper>,
    eligibility: LookupEligibilityAssessor,
    maximum_lookups: u32,
}

/// Batched writer in front of a [`TrackingStore`]
pub struct QueuedWriter {
    store: Arc<dyn TrackingStore>,
    locks: AircraftLockManager,
    lookups: Option<Lookups>,
    interval: Duration,
    batch_size: usize,
    sender: Sender<Pending>,
    receiver: Receiver<Pending>,
    events: broadcast::Sender<WriterEvent>,
    batch_lock: Mutex<()>,
}

impl QueuedWriter {
    pub fn new(store: Arc<dyn TrackingStore>, time_to_lock: Duration, interval: Duration, batch_size: usize) -> Self {
        let (sender, receiver) = unbounded();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            locks: AircraftLockManager::new(store.clone(), time_to_lock),
            store,
            lookups: None,
            interval,
            batch_size: batch_size.max(1),
            sender,
            receiver,
            events,
            batch_lock: Mutex::new(()),
        }
    }

    /// Enable processing of lookup requests
    pub fn with_lookups(
        mut self,
        api: Arc<dyn ExternalApiWrapper>,
        eligibility: LookupEligibilityAssessor,
        maximum_lookups: u32,
    ) -> Self {
        self.lookups = Some(Lookups {
            api,
            eligibility,
            maximum_lookups,
        });
        self
    }

    /// Queue an item; never blocks
    pub fn push(&self, item: QueueItem) {
        self.enqueue(Pending { item, requeued: false });
    }

    fn enqueue(&self, pending: Pending) {
        // The writer owns the receiver, so the queue is never disconnected
        let _ = self.sender.send(pending);
    }

    pub fn queue_size(&self) -> usize {
        self.receiver.len()
    }

    pub fn events(&self) -> broadcast::Receiver<WriterEvent> {
        self.events.subscribe()
    }

    /// Lock records left over from a previous run and start the batch timer
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<JoinHandle<()>, StoreError> {
        let locked = self.store.lock_all_unlocked().await?;
        if locked > 0 {
            info!("Locked {} aircraft records from a previous session", locked);
        }

        let writer = Arc::clone(self);
        Ok(tokio::spawn(async move {
            info!(
                "Queued writer started (interval {:?}, batch size {})",
                writer.interval, writer.batch_size
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(writer.interval) => {}
                }

                if writer.queue_size() > 0 {
                    writer.process_batch(writer.batch_size, true).await;
                }
            }

            info!("Queued writer stopped");
        }))
    }

    /// Process everything still queued
    pub async fn flush_queue(&self) -> usize {
        let pending = self.queue_size();
        if pending == 0 {
            return 0;
        }
        info!("Flushing {} queued items", pending);
        self.process_batch(usize::MAX, false).await
    }

    async fn process_batch(&self, limit: usize, allow_requeue: bool) -> usize {
        let _batch = self.batch_lock.lock().await;

        let initial_queue_size = self.queue_size();
        let _ = self.events.send(WriterEvent::BatchStarted {
            queue_size: initial_queue_size,
        });
        let started = Instant::now();

        let mut processed = 0;
        let mut deferred = Vec::new();
        while processed < limit {
            let Ok(pending) = self.receiver.try_recv() else {
                break;
            };
            processed += 1;

            let description = pending.item.describe();
            if let Err(e) = self.process_item(pending, allow_requeue, &mut deferred).await {
                error!("Failed to process {}: {:#}", description, e);
            }
        }

        for pending in deferred {
            self.enqueue(pending);
        }

        let final_queue_size = self.queue_size();
        let duration = started.elapsed();
        debug!(
            "Batch processed {} items in {:?}, queue {} -> {}",
            processed, duration, initial_queue_size, final_queue_size
        );
        let _ = self.events.send(WriterEvent::BatchCompleted {
            initial_queue_size,
            final_queue_size,
            processed,
            duration,
        });

        processed
    }

    async fn process_item(
        &self,
        pending: Pending,
        allow_requeue: bool,
        deferred: &mut Vec<Pending>,
    ) -> Result<()> {
        match pending.item {
            QueueItem::Aircraft(aircraft) => self.write_aircraft(aircraft).await,
            QueueItem::Position(position) => {
                // A position gets one more batch for its aircraft to be written
                let retry = allow_requeue && !pending.requeued;
                self.write_position(position, retry, deferred).await
            }
            QueueItem::Lookup(request) => self.lookup(request, allow_requeue, deferred).await,
        }
    }

    /// Update the active record for the address, or start a new one
    async fn write_aircraft(&self, mut aircraft: TrackedAircraft) -> Result<()> {
        match self.locks.get_active_aircraft(&aircraft.address, aircraft.last_seen).await? {
            Some(active) => {
                aircraft.id = active.id;
                aircraft.lookup_timestamp = active.lookup_timestamp;
                aircraft.lookup_attempts = active.lookup_attempts;
            }
            None => {
                aircraft.id = 0;
                aircraft.lookup_timestamp = None;
                aircraft.lookup_attempts = 0;
            }
        }

        let written = self.store.write_aircraft(&aircraft).await?;
        debug!("Wrote aircraft {} as record {}", written.address, written.id);
        Ok(())
    }

    async fn write_position(
        &self,
        mut position: AircraftPosition,
        retry: bool,
        deferred: &mut Vec<Pending>,
    ) -> Result<()> {
        if position.aircraft_id == 0 {
            match self.locks.get_active_aircraft(&position.address, position.timestamp).await? {
                Some(aircraft) => position.aircraft_id = aircraft.id,
                None if retry => {
                    debug!("No active aircraft record for position of {}, re-queueing it", position.address);
                    deferred.push(Pending {
                        item: QueueItem::Position(position),
                        requeued: true,
                    });
                    return Ok(());
                }
                None => {
                    warn!("No active aircraft record for position of {}, dropping it", position.address);
                    return Ok(());
                }
            }
        }

        self.store.write_position(&position).await?;
        Ok(())
    }

    async fn lookup(
        &self,
        request: ApiLookupRequest,
        allow_requeue: bool,
        deferred: &mut Vec<Pending>,
    ) -> Result<()> {
        let Some(lookups) = &self.lookups else {
            debug!("Lookups are disabled, ignoring request for {}", request.address);
            return Ok(());
        };

        let endpoint = ApiEndpointType::ActiveFlights;
        let eligibility = lookups
            .eligibility
            .is_eligible_for_lookup(endpoint, &request.address)
            .await?;

        if eligibility.eligible {
            lookups.api.lookup(endpoint, &request).await?;
            return Ok(());
        }

        if !eligibility.retryable {
            info!("Aircraft {} can never be looked up", request.address);
            self.store
                .update_lookup_properties(&request.address, Utc::now(), true)
                .await?;
            return Ok(());
        }

        self.store
            .update_lookup_properties(&request.address, Utc::now(), false)
            .await?;

        let attempts = request.attempts + 1;
        if !allow_requeue {
            debug!("Not retrying lookup for {} during flush", request.address);
        } else if lookups.maximum_lookups == 0 || attempts < lookups.maximum_lookups {
            debug!("Deferring lookup for {} (attempt {})", request.address, attempts);
            deferred.push(Pending {
                item: QueueItem::Lookup(ApiLookupRequest { attempts, ..request }),
                requeued: true,
            });
        } else {
            info!("Giving up on lookup for {} after {} attempts", request.address, attempts);
        }
        Ok(())
    }
}
