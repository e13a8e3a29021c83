//! Live WebSocket and REST view of the tracked aircraft

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

use crate::tracking::{
    AircraftBehaviour, AircraftNotification, AircraftSubscriber, AircraftTracker, NotificationType, TrackedAircraft,
    TrackingStatus,
};

/// Aircraft as sent to browser clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftDto {
    pub icao: String,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub vrate: Option<f64>,
    pub distance: Option<f64>,
    pub behaviour: AircraftBehaviour,
    pub status: TrackingStatus,
    pub messages: u64,
    pub seen: DateTime<Utc>,
}

impl From<&TrackedAircraft> for AircraftDto {
    fn from(aircraft: &TrackedAircraft) -> Self {
        Self {
            icao: aircraft.address.clone(),
            callsign: aircraft.callsign.clone(),
            squawk: aircraft.squawk.clone(),
            lat: aircraft.latitude,
            lon: aircraft.longitude,
            altitude: aircraft.altitude,
            speed: aircraft.ground_speed,
            heading: aircraft.track,
            vrate: aircraft.vertical_rate,
            distance: aircraft.distance,
            behaviour: aircraft.behaviour,
            status: aircraft.status,
            messages: aircraft.messages,
            seen: aircraft.last_seen,
        }
    }
}

/// Hub message for a notification
pub fn hub_message(notification: &AircraftNotification) -> serde_json::Value {
    let aircraft = &notification.aircraft;
    match notification.kind {
        NotificationType::Removed => serde_json::json!({
            "type": "aircraftRemoved",
            "icao": aircraft.address,
        }),
        _ => serde_json::json!({
            "type": "aircraftUpdate",
            "aircraft": AircraftDto::from(aircraft),
        }),
    }
}

/// Forwards tracker notifications to connected hub clients
pub struct EventBridge {
    broadcast_tx: broadcast::Sender<String>,
}

impl EventBridge {
    pub fn new(broadcast_tx: broadcast::Sender<String>) -> Self {
        Self { broadcast_tx }
    }
}

impl AircraftSubscriber for EventBridge {
    fn on_notification(&self, notification: &AircraftNotification) -> anyhow::Result<()> {
        if self.broadcast_tx.receiver_count() > 0 {
            let json = serde_json::to_string(&hub_message(notification))?;
            let _ = self.broadcast_tx.send(json);
        }
        Ok(())
    }
}

/// Shared hub state
pub struct HubState {
    pub tracker: Arc<AircraftTracker>,
    pub broadcast_tx: broadcast::Sender<String>,
}

pub fn router(state: Arc<HubState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/aircraft", get(get_aircraft))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/// Serve the hub until cancelled
pub async fn serve(listener: TcpListener, state: Arc<HubState>, cancel: CancellationToken) -> std::io::Result<()> {
    info!("Starting hub on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Hub stopped");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_aircraft(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    let aircraft: Vec<AircraftDto> = state.tracker.aircraft().iter().map(AircraftDto::from).collect();
    Json(aircraft)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    info!("Hub client connected");

    let aircraft: Vec<AircraftDto> = state.tracker.aircraft().iter().map(AircraftDto::from).collect();
    let initial = serde_json::json!({
        "type": "initial",
        "aircraft": aircraft,
    });
    if sender.send(Message::Text(initial.to_string())).await.is_err() {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(msg) => {
                    if sender.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Hub client lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => debug!("Received from hub client: {}", text),
                Err(e) => {
                    error!("Hub socket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Hub client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{NotificationSender, PropertyUpdater, TrackerTiming, TrackingCriteria};
    use std::time::Duration;

    fn notification(kind: NotificationType) -> AircraftNotification {
        let mut aircraft = TrackedAircraft::new("406A3D", Utc::now());
        aircraft.callsign = Some("BAW486".to_string());
        aircraft.altitude = Some(14325.0);
        AircraftNotification {
            kind,
            aircraft,
            position: None,
        }
    }

    #[test]
    fn test_hub_messages() {
        let update = hub_message(&notification(NotificationType::Updated));
        assert_eq!(update["type"], "aircraftUpdate");
        assert_eq!(update["aircraft"]["icao"], "406A3D");
        assert_eq!(update["aircraft"]["callsign"], "BAW486");
        assert_eq!(update["aircraft"]["altitude"], 14325.0);

        let removed = hub_message(&notification(NotificationType::Removed));
        assert_eq!(removed["type"], "aircraftRemoved");
        assert_eq!(removed["icao"], "406A3D");
    }

    #[test]
    fn test_bridge_broadcasts_to_subscribers() {
        let (tx, _) = broadcast::channel(16);
        let bridge = EventBridge::new(tx.clone());

        // No clients, nothing to send
        bridge.on_notification(&notification(NotificationType::Added)).unwrap();

        let mut rx = tx.subscribe();
        bridge.on_notification(&notification(NotificationType::Added)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(json["type"], "aircraftUpdate");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rest_endpoints() {
        let timing = TrackerTiming {
            time_to_recent: Duration::from_secs(60),
            time_to_stale: Duration::from_secs(120),
            time_to_removal: Duration::from_secs(180),
        };
        let notifier = NotificationSender::new(TrackingCriteria::default());
        let tracker = Arc::new(AircraftTracker::new(timing, PropertyUpdater::new(None), notifier));
        tracker.get_or_create("406A3D", Utc::now());

        let (broadcast_tx, _) = broadcast::channel(16);
        let state = Arc::new(HubState { tracker, broadcast_tx });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state, cancel.clone()));

        let client = reqwest::Client::new();
        let health = client
            .get(format!("http://{}/health", address))
            .send()
            .await
            .unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");

        let aircraft: serde_json::Value = client
            .get(format!("http://{}/api/aircraft", address))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(aircraft[0]["icao"], "406A3D");

        drop(client);
        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
