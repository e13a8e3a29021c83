//! BaseStation (SBS-1) line parsing
//!
//! Field layout of a MSG line:
//!
//! ```text
//!  0 message type      6 date generated   12 ground speed    18 alert
//!  1 transmission type 7 time generated   13 track           19 emergency
//!  2 session id        8 date logged      14 latitude        20 spi
//!  3 aircraft id       9 time logged      15 longitude       21 on ground
//!  4 hex ident        10 callsign         16 vertical rate
//!  5 flight id        11 altitude         17 squawk
//! ```

use chrono::{NaiveDateTime, Utc};

use super::{Message, MessageType, TransmissionType};
use crate::error::ParseError;

const FIELD_TYPE: usize = 0;
const FIELD_TRANSMISSION_TYPE: usize = 1;
const FIELD_ADDRESS: usize = 4;
const FIELD_DATE_GENERATED: usize = 6;
const FIELD_TIME_GENERATED: usize = 7;
const FIELD_CALLSIGN: usize = 10;
const FIELD_ALTITUDE: usize = 11;
const FIELD_GROUND_SPEED: usize = 12;
const FIELD_TRACK: usize = 13;
const FIELD_LATITUDE: usize = 14;
const FIELD_LONGITUDE: usize = 15;
const FIELD_VERTICAL_RATE: usize = 16;
const FIELD_SQUAWK: usize = 17;
const FIELD_ALERT: usize = 18;
const FIELD_EMERGENCY: usize = 19;
const FIELD_SPI: usize = 20;
const FIELD_ON_GROUND: usize = 21;

/// Fields up to and including the address must be present
const MINIMUM_FIELDS: usize = FIELD_ADDRESS + 1;

const GENERATED_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

/// Parser for one BaseStation message type
pub trait MessageParser: Send + Sync {
    fn parse(&self, fields: &[&str]) -> Result<Message, ParseError>;
}

/// Parser for MSG transmission lines
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgMessageParser;

impl MessageParser for MsgMessageParser {
    fn parse(&self, fields: &[&str]) -> Result<Message, ParseError> {
        if fields.len() < MINIMUM_FIELDS {
            return Err(ParseError::TooFewFields(fields.len(), MINIMUM_FIELDS));
        }

        let message_type = fields[FIELD_TYPE]
            .parse::<MessageType>()
            .map_err(|_| invalid("type", fields[FIELD_TYPE]))?;

        let transmission_type = match text(fields, FIELD_TRANSMISSION_TYPE) {
            Some(value) => value
                .parse::<u8>()
                .ok()
                .and_then(|n| TransmissionType::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| invalid("transmission type", value))?,
            None => None,
        };

        let mut message = Message::new(
            &fields[FIELD_ADDRESS].trim().to_ascii_uppercase(),
            Utc::now(),
        );
        message.message_type = message_type;
        message.transmission_type = transmission_type;
        message.generated = generated(fields);
        message.callsign = text(fields, FIELD_CALLSIGN).map(str::to_string);
        message.squawk = text(fields, FIELD_SQUAWK).map(str::to_string);
        message.altitude = number(fields, FIELD_ALTITUDE, "altitude")?;
        message.ground_speed = number(fields, FIELD_GROUND_SPEED, "ground speed")?;
        message.track = number(fields, FIELD_TRACK, "track")?;
        message.latitude = number(fields, FIELD_LATITUDE, "latitude")?;
        message.longitude = number(fields, FIELD_LONGITUDE, "longitude")?;
        message.vertical_rate = number(fields, FIELD_VERTICAL_RATE, "vertical rate")?;
        message.alert = flag(fields, FIELD_ALERT);
        message.emergency = flag(fields, FIELD_EMERGENCY);
        message.spi = flag(fields, FIELD_SPI);
        message.is_on_ground = flag(fields, FIELD_ON_GROUND);

        Ok(message)
    }
}

fn invalid(field: &'static str, value: &str) -> ParseError {
    ParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Trimmed field value, `None` when missing or blank
fn text<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields
        .get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn number(fields: &[&str], index: usize, name: &'static str) -> Result<Option<f64>, ParseError> {
    text(fields, index)
        .map(|value| value.parse::<f64>().map_err(|_| invalid(name, value)))
        .transpose()
}

/// Feeds write set flags as `-1` (SBS-1) or `1` (dump1090)
fn flag(fields: &[&str], index: usize) -> Option<bool> {
    text(fields, index).map(|value| matches!(value, "-1" | "1") || value.eq_ignore_ascii_case("true"))
}

fn generated(fields: &[&str]) -> Option<chrono::DateTime<Utc>> {
    let date = text(fields, FIELD_DATE_GENERATED)?;
    let time = text(fields, FIELD_TIME_GENERATED)?;
    NaiveDateTime::parse_from_str(&format!("{} {}", date, time), GENERATED_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}
