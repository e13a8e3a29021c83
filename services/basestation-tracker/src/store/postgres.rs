//! Postgres store with connection pooling

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::info;

use super::{AircraftDetails, Airline, Flight, FlightNumberMapping, Sighting, TrackingStore};
use crate::error::StoreError;
use crate::tracking::{AircraftPosition, AltitudeHistory, TrackedAircraft, TrackingStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracked_aircraft (
    id BIGSERIAL PRIMARY KEY,
    address TEXT NOT NULL,
    callsign TEXT,
    squawk TEXT,
    altitude DOUBLE PRECISION,
    ground_speed DOUBLE PRECISION,
    track DOUBLE PRECISION,
    vertical_rate DOUBLE PRECISION,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    distance DOUBLE PRECISION,
    messages BIGINT NOT NULL DEFAULT 0,
    first_seen TIMESTAMPTZ NOT NULL,
    last_seen TIMESTAMPTZ NOT NULL,
    position_last_updated TIMESTAMPTZ,
    status TEXT NOT NULL,
    behaviour TEXT NOT NULL,
    lookup_timestamp TIMESTAMPTZ,
    lookup_attempts INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS ix_tracked_aircraft_address ON tracked_aircraft (address, id DESC);

CREATE TABLE IF NOT EXISTS aircraft_positions (
    id BIGSERIAL PRIMARY KEY,
    aircraft_id BIGINT NOT NULL REFERENCES tracked_aircraft (id),
    address TEXT NOT NULL,
    altitude DOUBLE PRECISION,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    distance DOUBLE PRECISION,
    timestamp TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_aircraft_positions_aircraft ON aircraft_positions (aircraft_id);

CREATE TABLE IF NOT EXISTS flight_number_mappings (
    callsign TEXT PRIMARY KEY,
    flight_iata TEXT NOT NULL,
    flight_icao TEXT,
    airline_iata TEXT,
    airline_icao TEXT
);

CREATE TABLE IF NOT EXISTS airlines (
    id BIGSERIAL PRIMARY KEY,
    icao TEXT,
    iata TEXT,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS aircraft_details (
    id BIGSERIAL PRIMARY KEY,
    address TEXT NOT NULL UNIQUE,
    registration TEXT NOT NULL,
    manufactured INTEGER,
    manufacturer TEXT,
    model_icao TEXT,
    model_iata TEXT,
    model_name TEXT
);

CREATE TABLE IF NOT EXISTS flights (
    id BIGSERIAL PRIMARY KEY,
    iata TEXT,
    icao TEXT,
    embarkation TEXT,
    destination TEXT,
    airline_id BIGINT REFERENCES airlines (id)
);

CREATE TABLE IF NOT EXISTS sightings (
    id BIGSERIAL PRIMARY KEY,
    aircraft_id BIGINT NOT NULL REFERENCES aircraft_details (id),
    flight_id BIGINT NOT NULL REFERENCES flights (id),
    date DATE NOT NULL,
    UNIQUE (aircraft_id, flight_id, date)
);
";

const AIRCRAFT_COLUMNS: &str = "id, address, callsign, squawk, altitude, ground_speed, track, vertical_rate, \
    latitude, longitude, distance, messages, first_seen, last_seen, position_last_updated, status, behaviour, \
    lookup_timestamp, lookup_attempts";

/// Postgres-backed store
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect using a key=value connection string and create the schema
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        let mut config = Config::new();

        for part in db_url.split_whitespace() {
            if let Some((key, value)) = part.split_once('=') {
                match key {
                    "host" => config.host = Some(value.to_string()),
                    "port" => config.port = value.parse().ok(),
                    "dbname" => config.dbname = Some(value.to_string()),
                    "user" => config.user = Some(value.to_string()),
                    "password" => config.password = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let client = pool.get().await?;
        client.batch_execute(SCHEMA).await?;

        Ok(Self { pool })
    }

    /// Remove all tracking data
    pub async fn clear_down(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .batch_execute("TRUNCATE aircraft_positions, tracked_aircraft RESTART IDENTITY CASCADE")
            .await?;
        info!("Cleared tracked aircraft and positions");
        Ok(())
    }

    async fn query_aircraft(
        &self,
        clause: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<TrackedAircraft>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM tracked_aircraft {}", AIRCRAFT_COLUMNS, clause);
        client.query(&sql, params).await?.iter().map(aircraft_from_row).collect()
    }
}

fn aircraft_from_row(row: &Row) -> Result<TrackedAircraft, StoreError> {
    let status: String = row.get("status");
    let behaviour: String = row.get("behaviour");

    Ok(TrackedAircraft {
        id: row.get("id"),
        address: row.get("address"),
        callsign: row.get("callsign"),
        squawk: row.get("squawk"),
        altitude: row.get("altitude"),
        ground_speed: row.get("ground_speed"),
        track: row.get("track"),
        vertical_rate: row.get("vertical_rate"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        distance: row.get("distance"),
        messages: row.get::<_, i64>("messages").max(0) as u64,
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
        position_last_updated: row.get("position_last_updated"),
        status: status.parse().map_err(|value| StoreError::InvalidValue {
            column: "status",
            value,
        })?,
        behaviour: behaviour.parse().map_err(|value| StoreError::InvalidValue {
            column: "behaviour",
            value,
        })?,
        altitude_history: AltitudeHistory::default(),
        lookup_timestamp: row.get("lookup_timestamp"),
        lookup_attempts: row.get::<_, i32>("lookup_attempts").max(0) as u32,
    })
}

fn position_from_row(row: &Row) -> AircraftPosition {
    AircraftPosition {
        id: row.get("id"),
        aircraft_id: row.get("aircraft_id"),
        address: row.get("address"),
        altitude: row.get("altitude"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        distance: row.get("distance"),
        timestamp: row.get("timestamp"),
    }
}

fn airline_from_row(row: &Row) -> Airline {
    Airline {
        id: row.get("id"),
        icao: row.get("icao"),
        iata: row.get("iata"),
        name: row.get("name"),
    }
}

fn flight_from_row(row: &Row) -> Flight {
    Flight {
        id: row.get("id"),
        iata: row.get("iata"),
        icao: row.get("icao"),
        embarkation: row.get("embarkation"),
        destination: row.get("destination"),
        airline_id: row.get("airline_id"),
    }
}

fn details_from_row(row: &Row) -> AircraftDetails {
    AircraftDetails {
        id: row.get("id"),
        address: row.get("address"),
        registration: row.get("registration"),
        manufactured: row.get("manufactured"),
        manufacturer: row.get("manufacturer"),
        model_icao: row.get("model_icao"),
        model_iata: row.get("model_iata"),
        model_name: row.get("model_name"),
    }
}

fn sighting_from_row(row: &Row) -> Sighting {
    Sighting {
        id: row.get("id"),
        aircraft_id: row.get("aircraft_id"),
        flight_id: row.get("flight_id"),
        date: row.get("date"),
    }
}

#[async_trait]
impl TrackingStore for PgStore {
    async fn get_latest_aircraft(&self, address: &str) -> Result<Option<TrackedAircraft>, StoreError> {
        let mut rows = self
            .query_aircraft("WHERE address = $1 ORDER BY id DESC LIMIT 1", &[&address])
            .await?;
        Ok(rows.pop())
    }

    async fn list_aircraft(&self, address: Option<&str>) -> Result<Vec<TrackedAircraft>, StoreError> {
        match address {
            Some(address) => self.query_aircraft("WHERE address = $1 ORDER BY id", &[&address]).await,
            None => self.query_aircraft("ORDER BY id", &[]).await,
        }
    }

    async fn write_aircraft(&self, aircraft: &TrackedAircraft) -> Result<TrackedAircraft, StoreError> {
        let client = self.pool.get().await?;
        let messages = aircraft.messages as i64;
        let lookup_attempts = aircraft.lookup_attempts as i32;
        let status = aircraft.status.as_str();
        let behaviour = aircraft.behaviour.as_str();

        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 18] = [
            &aircraft.address,
            &aircraft.callsign,
            &aircraft.squawk,
            &aircraft.altitude,
            &aircraft.ground_speed,
            &aircraft.track,
            &aircraft.vertical_rate,
            &aircraft.latitude,
            &aircraft.longitude,
            &aircraft.distance,
            &messages,
            &aircraft.first_seen,
            &aircraft.last_seen,
            &aircraft.position_last_updated,
            &status,
            &behaviour,
            &aircraft.lookup_timestamp,
            &lookup_attempts,
        ];

        let id: i64 = if aircraft.id == 0 {
            client
                .query_one(
                    "INSERT INTO tracked_aircraft (
                        address, callsign, squawk, altitude, ground_speed, track, vertical_rate,
                        latitude, longitude, distance, messages, first_seen, last_seen,
                        position_last_updated, status, behaviour, lookup_timestamp, lookup_attempts
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                    RETURNING id",
                    &params,
                )
                .await?
                .get(0)
        } else {
            let mut with_id = params.to_vec();
            with_id.push(&aircraft.id);
            client
                .execute(
                    "INSERT INTO tracked_aircraft (
                        address, callsign, squawk, altitude, ground_speed, track, vertical_rate,
                        latitude, longitude, distance, messages, first_seen, last_seen,
                        position_last_updated, status, behaviour, lookup_timestamp, lookup_attempts, id
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
                    ON CONFLICT (id) DO UPDATE SET
                        address = EXCLUDED.address,
                        callsign = EXCLUDED.callsign,
                        squawk = EXCLUDED.squawk,
                        altitude = EXCLUDED.altitude,
                        ground_speed = EXCLUDED.ground_speed,
                        track = EXCLUDED.track,
                        vertical_rate = EXCLUDED.vertical_rate,
                        latitude = EXCLUDED.latitude,
                        longitude = EXCLUDED.longitude,
                        distance = EXCLUDED.distance,
                        messages = EXCLUDED.messages,
                        first_seen = EXCLUDED.first_seen,
                        last_seen = EXCLUDED.last_seen,
                        position_last_updated = EXCLUDED.position_last_updated,
                        status = EXCLUDED.status,
                        behaviour = EXCLUDED.behaviour,
                        lookup_timestamp = EXCLUDED.lookup_timestamp,
                        lookup_attempts = EXCLUDED.lookup_attempts",
                    &with_id,
                )
                .await?;
            aircraft.id
        };

        Ok(TrackedAircraft {
            id,
            ..aircraft.clone()
        })
    }

    async fn lock_all_unlocked(&self) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let locked = client
            .execute(
                "UPDATE tracked_aircraft SET status = $1 WHERE status <> $1",
                &[&TrackingStatus::Locked.as_str()],
            )
            .await?;
        Ok(locked)
    }

    async fn list_positions(&self, aircraft_id: i64) -> Result<Vec<AircraftPosition>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, aircraft_id, address, altitude, latitude, longitude, distance, timestamp
                 FROM aircraft_positions WHERE aircraft_id = $1 ORDER BY timestamp",
                &[&aircraft_id],
            )
            .await?;
        Ok(rows.iter().map(position_from_row).collect())
    }

    async fn write_position(&self, position: &AircraftPosition) -> Result<AircraftPosition, StoreError> {
        let client = self.pool.get().await?;
        let id: i64 = if position.id == 0 {
            client
                .query_one(
                    "INSERT INTO aircraft_positions (aircraft_id, address, altitude, latitude, longitude, distance, timestamp)
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
                    &[
                        &position.aircraft_id,
                        &position.address,
                        &position.altitude,
                        &position.latitude,
                        &position.longitude,
                        &position.distance,
                        &position.timestamp,
                    ],
                )
                .await?
                .get(0)
        } else {
            client
                .execute(
                    "INSERT INTO aircraft_positions (id, aircraft_id, address, altitude, latitude, longitude, distance, timestamp)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (id) DO UPDATE SET
                        aircraft_id = EXCLUDED.aircraft_id,
                        address = EXCLUDED.address,
                        altitude = EXCLUDED.altitude,
                        latitude = EXCLUDED.latitude,
                        longitude = EXCLUDED.longitude,
                        distance = EXCLUDED.distance,
                        timestamp = EXCLUDED.timestamp",
                    &[
                        &position.id,
                        &position.aircraft_id,
                        &position.address,
                        &position.altitude,
                        &position.latitude,
                        &position.longitude,
                        &position.distance,
                        &position.timestamp,
                    ],
                )
                .await?;
            position.id
        };

        Ok(AircraftPosition {
            id,
            ..position.clone()
        })
    }

    async fn get_lookup_candidate(
        &self,
        address: &str,
        maximum_attempts: u32,
    ) -> Result<Option<TrackedAircraft>, StoreError> {
        let maximum_attempts = maximum_attempts as i32;
        let mut rows = self
            .query_aircraft(
                "WHERE address = $1 AND lookup_timestamp IS NULL AND ($2 = 0 OR lookup_attempts < $2)
                 ORDER BY id DESC LIMIT 1",
                &[&address, &maximum_attempts],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn update_lookup_properties(
        &self,
        address: &str,
        attempted_at: DateTime<Utc>,
        completed: bool,
    ) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE tracked_aircraft SET
                    lookup_attempts = lookup_attempts + 1,
                    lookup_timestamp = CASE WHEN $3 THEN $2 ELSE lookup_timestamp END
                 WHERE id = (SELECT MAX(id) FROM tracked_aircraft WHERE address = $1)",
                &[&address, &attempted_at, &completed],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn get_flight_number_mapping(&self, callsign: &str) -> Result<Option<FlightNumberMapping>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT callsign, flight_iata, flight_icao, airline_iata, airline_icao
                 FROM flight_number_mappings WHERE callsign = $1",
                &[&callsign],
            )
            .await?;
        Ok(row.map(|row| FlightNumberMapping {
            callsign: row.get("callsign"),
            flight_iata: row.get("flight_iata"),
            flight_icao: row.get("flight_icao"),
            airline_iata: row.get("airline_iata"),
            airline_icao: row.get("airline_icao"),
        }))
    }

    async fn add_flight_number_mapping(&self, mapping: &FlightNumberMapping) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO flight_number_mappings (callsign, flight_iata, flight_icao, airline_iata, airline_icao)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (callsign) DO UPDATE SET
                    flight_iata = EXCLUDED.flight_iata,
                    flight_icao = EXCLUDED.flight_icao,
                    airline_iata = EXCLUDED.airline_iata,
                    airline_icao = EXCLUDED.airline_icao",
                &[
                    &mapping.callsign,
                    &mapping.flight_iata,
                    &mapping.flight_icao,
                    &mapping.airline_iata,
                    &mapping.airline_icao,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_aircraft_details(&self, address: &str) -> Result<Option<AircraftDetails>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM aircraft_details WHERE address = $1", &[&address])
            .await?;
        Ok(row.as_ref().map(details_from_row))
    }

    async fn write_aircraft_details(&self, details: &AircraftDetails) -> Result<AircraftDetails, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO aircraft_details (address, registration, manufactured, manufacturer, model_icao, model_iata, model_name)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (address) DO UPDATE SET
                    registration = EXCLUDED.registration,
                    manufactured = EXCLUDED.manufactured,
                    manufacturer = EXCLUDED.manufacturer,
                    model_icao = EXCLUDED.model_icao,
                    model_iata = EXCLUDED.model_iata,
                    model_name = EXCLUDED.model_name
                 RETURNING *",
                &[
                    &details.address,
                    &details.registration,
                    &details.manufactured,
                    &details.manufacturer,
                    &details.model_icao,
                    &details.model_iata,
                    &details.model_name,
                ],
            )
            .await?;
        Ok(details_from_row(&row))
    }

    async fn get_airline(
        &self,
        icao: Option<&str>,
        iata: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Airline>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM airlines
                 WHERE icao = $1 OR iata = $2 OR name = $3
                 ORDER BY (icao = $1) IS TRUE DESC, (iata = $2) IS TRUE DESC
                 LIMIT 1",
                &[&icao, &iata, &name],
            )
            .await?;
        Ok(row.as_ref().map(airline_from_row))
    }

    async fn write_airline(&self, airline: &Airline) -> Result<Airline, StoreError> {
        let client = self.pool.get().await?;
        let row = if airline.id == 0 {
            client
                .query_one(
                    "INSERT INTO airlines (icao, iata, name) VALUES ($1, $2, $3) RETURNING *",
                    &[&airline.icao, &airline.iata, &airline.name],
                )
                .await?
        } else {
            client
                .query_one(
                    "UPDATE airlines SET icao = $2, iata = $3, name = $4 WHERE id = $1 RETURNING *",
                    &[&airline.id, &airline.icao, &airline.iata, &airline.name],
                )
                .await?
        };
        Ok(airline_from_row(&row))
    }

    async fn get_flight(&self, iata: Option<&str>, icao: Option<&str>) -> Result<Option<Flight>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM flights
                 WHERE iata IS NOT DISTINCT FROM $1 AND icao IS NOT DISTINCT FROM $2
                 ORDER BY id DESC LIMIT 1",
                &[&iata, &icao],
            )
            .await?;
        Ok(row.as_ref().map(flight_from_row))
    }

    async fn write_flight(&self, flight: &Flight) -> Result<Flight, StoreError> {
        let client = self.pool.get().await?;
        let row = if flight.id == 0 {
            client
                .query_one(
                    "INSERT INTO flights (iata, icao, embarkation, destination, airline_id)
                     VALUES ($1, $2, $3, $4, $5) RETURNING *",
                    &[
                        &flight.iata,
                        &flight.icao,
                        &flight.embarkation,
                        &flight.destination,
                        &flight.airline_id,
                    ],
                )
                .await?
        } else {
            client
                .query_one(
                    "UPDATE flights SET iata = $2, icao = $3, embarkation = $4, destination = $5, airline_id = $6
                     WHERE id = $1 RETURNING *",
                    &[
                        &flight.id,
                        &flight.iata,
                        &flight.icao,
                        &flight.embarkation,
                        &flight.destination,
                        &flight.airline_id,
                    ],
                )
                .await?
        };
        Ok(flight_from_row(&row))
    }

    async fn add_sighting(&self, aircraft_id: i64, flight_id: i64, date: NaiveDate) -> Result<Sighting, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO sightings (aircraft_id, flight_id, date) VALUES ($1, $2, $3)
                 ON CONFLICT (aircraft_id, flight_id, date) DO UPDATE SET date = EXCLUDED.date
                 RETURNING *",
                &[&aircraft_id, &flight_id, &date],
            )
            .await?;
        Ok(sighting_from_row(&row))
    }

    async fn list_sightings(&self, aircraft_id: i64) -> Result<Vec<Sighting>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM sightings WHERE aircraft_id = $1 ORDER BY date",
                &[&aircraft_id],
            )
            .await?;
        Ok(rows.iter().map(sighting_from_row).collect())
    }
}
