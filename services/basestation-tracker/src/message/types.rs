//! BaseStation message types

use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Leading field of a BaseStation line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Transmission message, the only type carrying aircraft data
    Msg,
    /// Selection change
    Sel,
    /// New ID
    Id,
    /// New aircraft
    Air,
    /// Status change
    Sta,
    /// Click
    Clk,
}

impl FromStr for MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "MSG" => Ok(Self::Msg),
            "SEL" => Ok(Self::Sel),
            "ID" => Ok(Self::Id),
            "AIR" => Ok(Self::Air),
            "STA" => Ok(Self::Sta),
            "CLK" => Ok(Self::Clk),
            _ => Err(()),
        }
    }
}

/// MSG transmission types 1-8
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransmissionType {
    Identification = 1,
    SurfacePosition = 2,
    AirbornePosition = 3,
    AirborneVelocity = 4,
    SurveillanceAltitude = 5,
    SurveillanceId = 6,
    AirToAir = 7,
    AllCallReply = 8,
}

impl TryFrom<u8> for TransmissionType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Identification),
            2 => Ok(Self::SurfacePosition),
            3 => Ok(Self::AirbornePosition),
            4 => Ok(Self::AirborneVelocity),
            5 => Ok(Self::SurveillanceAltitude),
            6 => Ok(Self::SurveillanceId),
            7 => Ok(Self::AirToAir),
            8 => Ok(Self::AllCallReply),
            other => Err(other),
        }
    }
}

/// Decoded BaseStation message
///
/// Field names that also exist on `TrackedAircraft` are copied across by the
/// property updater when present and changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub transmission_type: Option<TransmissionType>,
    /// ICAO 24-bit address, upper case
    pub address: String,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub altitude: Option<f64>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub is_on_ground: Option<bool>,
    /// Time the feed generated the message
    pub generated: Option<DateTime<Utc>>,
    /// Time the message was received, used as the aircraft's last-seen time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Empty MSG message for an address
    pub fn new(address: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_type: MessageType::Msg,
            transmission_type: None,
            address: address.to_string(),
            callsign: None,
            squawk: None,
            altitude: None,
            ground_speed: None,
            track: None,
            vertical_rate: None,
            latitude: None,
            longitude: None,
            alert: None,
            emergency: None,
            spi: None,
            is_on_ground: None,
            generated: None,
            timestamp,
        }
    }
}
