//! SBS1 / BaseStation text frames.
//!
//! One comma separated line per message, e.g.
//! `MSG,3,1,1,7C1BE8,1,2016/06/03,00:00:38.350,2016/06/03,00:00:38.350,,8000,,,-31.94361,115.96708,,,0,0,0,0`

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::types::{icao_from_hex, DecodeError, Icao};

const FIELD_TYPE: usize = 0;
const FIELD_TRANSMISSION: usize = 1;
const FIELD_ICAO: usize = 4;
const FIELD_RECV_DATE: usize = 6;
const FIELD_RECV_TIME: usize = 7;
const FIELD_CALLSIGN: usize = 10;
const FIELD_ALTITUDE: usize = 11;
const FIELD_GROUND_SPEED: usize = 12;
const FIELD_TRACK: usize = 13;
const FIELD_LAT: usize = 14;
const FIELD_LON: usize = 15;
const FIELD_VERTICAL_RATE: usize = 16;
const FIELD_SQUAWK: usize = 17;
const FIELD_ALERT: usize = 18;
const FIELD_EMERGENCY: usize = 19;
const FIELD_SPI: usize = 20;
const FIELD_ON_GROUND: usize = 21;

const MAX_FIELDS: usize = 22;

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sbs1Type {
    /// `MSG` with its transmission type (1-8)
    Transmission(u8),
    SelectionChange,
    NewId,
    NewAircraft,
    StatusAircraft,
    Click,
}

impl Sbs1Type {
    fn parse(kind: &str, transmission: &str) -> Result<Self, DecodeError> {
        Ok(match kind {
            "MSG" => match transmission.parse::<u8>() {
                Ok(t @ 1..=8) => Sbs1Type::Transmission(t),
                _ => {
                    return Err(DecodeError::Sbs1(format!(
                        "unknown transmission type {transmission:?}"
                    )))
                }
            },
            "SEL" => Sbs1Type::SelectionChange,
            "ID" => Sbs1Type::NewId,
            "AIR" => Sbs1Type::NewAircraft,
            "STA" => Sbs1Type::StatusAircraft,
            "CLK" => Sbs1Type::Click,
            "" => {
                return Err(DecodeError::Sbs1(
                    "expecting a value in the first field".to_string(),
                ))
            }
            other => return Err(DecodeError::Sbs1(format!("unknown message type {other:?}"))),
        })
    }
}

/// Fields carried by one SBS1 line. Empty columns stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sbs1Message {
    pub msg_type: Sbs1Type,
    pub icao: Icao,
    /// Generation time from the line, or receive time when absent.
    pub timestamp: f64,
    pub callsign: Option<String>,
    pub altitude: Option<i32>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub position: Option<(f64, f64)>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<String>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub on_ground: Option<bool>,
}

/// One line of SBS1 text plus its receive time.
#[derive(Debug, Clone)]
pub struct Sbs1Frame {
    original: String,
    received: f64,
    decoded: OnceLock<Result<Sbs1Message, DecodeError>>,
}

impl Sbs1Frame {
    pub fn new(line: &str, received: f64) -> Self {
        Sbs1Frame {
            original: line.trim().to_string(),
            received,
            decoded: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &[u8] {
        self.original.as_bytes()
    }

    pub fn line(&self) -> &str {
        &self.original
    }

    pub fn decode(&self) -> Result<&Sbs1Message, DecodeError> {
        self.decoded
            .get_or_init(|| parse(&self.original, self.received))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn icao(&self) -> Option<Icao> {
        self.decode().ok().map(|m| m.icao)
    }

    /// Time stamped in the line when it parses, receive time otherwise.
    pub fn timestamp(&self) -> f64 {
        self.decode().map(|m| m.timestamp).unwrap_or(self.received)
    }
}

impl PartialEq for Sbs1Frame {
    fn eq(&self, other: &Self) -> bool {
        self.original == other.original && self.received == other.received
    }
}

fn parse(line: &str, received: f64) -> Result<Sbs1Message, DecodeError> {
    if line.is_empty() {
        return Err(DecodeError::NoOp);
    }
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() > MAX_FIELDS {
        return Err(DecodeError::Sbs1(format!(
            "too many fields ({}): {line}",
            fields.len()
        )));
    }
    let field = |idx: usize| fields.get(idx).copied().filter(|f| !f.is_empty());

    let msg_type = Sbs1Type::parse(
        field(FIELD_TYPE).unwrap_or_default(),
        field(FIELD_TRANSMISSION).unwrap_or_default(),
    )?;
    let icao_str = field(FIELD_ICAO).unwrap_or_default();
    let icao = icao_from_hex(icao_str)
        .ok_or_else(|| DecodeError::Sbs1(format!("bad ICAO address {icao_str:?}")))?;

    let timestamp = match (field(FIELD_RECV_DATE), field(FIELD_RECV_TIME)) {
        (Some(date), Some(time)) => parse_time(date, time).unwrap_or(received),
        _ => received,
    };

    let number = |idx: usize| field(idx).and_then(|f| f.parse::<f64>().ok());
    let flag = |idx: usize| field(idx).map(|f| f == "-1" || f == "1");

    let position = match (number(FIELD_LAT), number(FIELD_LON)) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    };
    let mut on_ground = flag(FIELD_ON_GROUND);
    if msg_type == Sbs1Type::Transmission(4) {
        // velocity messages are airborne only
        on_ground = Some(false);
    }

    Ok(Sbs1Message {
        msg_type,
        icao,
        timestamp,
        callsign: field(FIELD_CALLSIGN).map(str::to_string),
        altitude: number(FIELD_ALTITUDE).map(|a| a as i32),
        ground_speed: number(FIELD_GROUND_SPEED),
        track: number(FIELD_TRACK),
        position,
        vertical_rate: number(FIELD_VERTICAL_RATE).map(|v| v as i32),
        squawk: field(FIELD_SQUAWK).map(str::to_string),
        alert: flag(FIELD_ALERT),
        emergency: flag(FIELD_EMERGENCY),
        spi: flag(FIELD_SPI),
        on_ground,
    })
}

fn parse_time(date: &str, time: &str) -> Option<f64> {
    let dt = NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIME_FORMAT).ok()?;
    Some(dt.and_utc().timestamp_micros() as f64 / 1_000_000.0)
}
