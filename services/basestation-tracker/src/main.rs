//! BaseStation tracker - tracks aircraft from an SBS-1 feed and persists them

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use basestation_tracker::api::{AirLabsClient, ApiWrapper, CheckWxClient, LookupEligibilityAssessor};
use basestation_tracker::config::Settings;
use basestation_tracker::controller::TrackerController;
use basestation_tracker::error::TrackerError;
use basestation_tracker::hub::{self, EventBridge, HubState};
use basestation_tracker::message::MessageReader;
use basestation_tracker::store::{MemoryStore, PgStore, TrackingStore};
use basestation_tracker::tracking::{
    AircraftTracker, DistanceCalculator, NotificationSender, PropertyUpdater, TrackerTiming, TrackingCriteria,
};
use basestation_tracker::writer::QueuedWriter;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("basestation_tracker={}", settings.log_level).parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================");
    info!("   BaseStation Tracker - ADS-B Aircraft");
    info!("===========================================");

    info!("Configuration:");
    info!("  Feed: {}:{}", settings.host, settings.port);
    info!(
        "  Timings: recent {:?}, stale {:?}, removal {:?}, lock {:?}",
        settings.time_to_recent(),
        settings.time_to_stale(),
        settings.time_to_removal(),
        settings.time_to_lock()
    );
    info!(
        "  Writer: interval {:?}, batch size {}",
        settings.writer_interval(),
        settings.writer_batch_size
    );
    info!("  SQL writer: {}", settings.enable_sql_writer);
    info!("  Auto lookup: {}", settings.auto_lookup);
    info!("  Hub port: {}", settings.hub_port);

    let store = build_store(&settings).await;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(settings.api.timeout_ms))
        .build()?;

    let mut wrapper = ApiWrapper::new(store.clone(), settings.maximum_lookups);
    if let Some(key) = &settings.api.airlabs_key {
        let airlabs = Arc::new(AirLabsClient::new(
            http.clone(),
            &settings.api.airlabs_base_url,
            key,
            settings.api.flight_api_supports_address_lookup,
        ));
        wrapper = wrapper
            .with_active_flight_api(airlabs.clone())
            .with_aircraft_api(airlabs.clone())
            .with_airline_api(airlabs);
    } else {
        warn!("No AirLabs key configured, flight and aircraft lookups will find nothing");
    }
    if let Some(key) = &settings.api.checkwx_key {
        wrapper = wrapper.with_metar_api(Arc::new(CheckWxClient::new(http, &settings.api.checkwx_base_url, key)));
    }

    let eligibility = LookupEligibilityAssessor::new(
        store.clone(),
        settings.api.flight_api_supports_address_lookup,
        settings.maximum_lookups,
    );
    let writer = Arc::new(
        QueuedWriter::new(
            store,
            settings.time_to_lock(),
            settings.writer_interval(),
            settings.writer_batch_size,
        )
        .with_lookups(Arc::new(wrapper), eligibility, settings.maximum_lookups),
    );

    let controller = Arc::new(TrackerController::new(writer, settings.auto_lookup));
    let (broadcast_tx, _) = broadcast::channel::<String>(1000);

    let notifier = NotificationSender::new(TrackingCriteria::from_settings(&settings))
        .with_subscriber(controller.clone())
        .with_subscriber(Arc::new(EventBridge::new(broadcast_tx.clone())));

    let distance = settings
        .receiver_position()
        .map(|(latitude, longitude)| DistanceCalculator::new(latitude, longitude));
    let tracker = Arc::new(
        AircraftTracker::new(
            TrackerTiming::from_settings(&settings),
            PropertyUpdater::new(distance),
            notifier,
        )
        .with_excluded_addresses(settings.excluded_addresses.iter())
        .with_excluded_callsigns(settings.excluded_callsigns.iter()),
    );

    let cancel = CancellationToken::new();

    if settings.hub_port != 0 {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.hub_port)).await?;
        let state = Arc::new(HubState {
            tracker: tracker.clone(),
            broadcast_tx,
        });
        let hub_token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = hub::serve(listener, state, hub_token).await {
                error!("Hub error: {}", e);
            }
        });
    }

    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        ctrl_c_token.cancel();
    });

    let reader = MessageReader::new(&settings.host, settings.port, settings.socket_read_timeout());
    let result = controller.start(tracker, reader, cancel.clone()).await;
    cancel.cancel();

    match result {
        Ok(()) | Err(TrackerError::Cancelled) => {
            info!("BaseStation tracker stopped");
            Ok(())
        }
        Err(e) => {
            error!("Tracker failed: {}", e);
            Err(e.into())
        }
    }
}

/// Postgres when enabled and reachable, otherwise the in-memory store
async fn build_store(settings: &Settings) -> Arc<dyn TrackingStore> {
    if !settings.enable_sql_writer {
        info!("SQL writer disabled, using in-memory store");
        return Arc::new(MemoryStore::new());
    }

    match PgStore::new(&settings.database_url).await {
        Ok(store) => {
            info!("Connected to database");
            if settings.clear_down {
                match store.clear_down().await {
                    Ok(()) => info!("Cleared down tracking tables"),
                    Err(e) => error!("Failed to clear down tracking tables: {}", e),
                }
            }
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to connect to database: {}. Continuing without DB.", e);
            Arc::new(MemoryStore::new())
        }
    }
}
