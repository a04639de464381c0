//! PMEM track records.
//!
//! A record is a 32-byte header followed by `sample_count` fixed-size samples
//! and then `lap_count` lap markers. Headers form a singly linked chain
//! through their `next` field.

use std::fmt;

use bitflags::bitflags;
use serde::{Serialize, Serializer};

/// Record magic.
pub const TRACK_MAGIC: [u8; 4] = *b"PMEM";

pub const HEADER_SIZE: usize = 32;
pub const SAMPLE_SIZE: usize = 24;
pub const LAP_SIZE: usize = 8;

/// `next` value of the last record in the chain.
pub const END_OF_CHAIN: u32 = 0xFFFF_FFFF;

bitflags! {
    /// Fields a track recorded. Absent fields read as zero on flash.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TrackFormat: u16 {
        const GPS = 0x01;
        const SPEED = 0x02;
        const HEADING = 0x04;
        const HEARTRATE = 0x08;
        const DISTANCE = 0x10;
        const ACCURACY = 0x20;
    }
}

impl Serialize for TrackFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter_names().map(|(name, _)| name.to_ascii_lowercase()))
    }
}

/// Wall-clock UTC time as stored in a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    pub fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }

    /// Seconds since the Unix epoch.
    pub fn to_unix(&self) -> i64 {
        let days = days_from_civil(i64::from(self.year), self.month.into(), self.day.into());
        days * 86_400
            + i64::from(self.hour) * 3_600
            + i64::from(self.minute) * 60
            + i64::from(self.second)
    }

    pub fn from_unix(seconds: i64) -> Self {
        let days = seconds.div_euclid(86_400);
        let rem = seconds.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: (rem / 3_600) as u8,
            minute: (rem % 3_600 / 60) as u8,
            second: (rem % 60) as u8,
        }
    }

    /// Format with `%Y %m %d %H %M %S` substituted, zero padded.
    pub fn format(&self, pattern: &str) -> String {
        pattern
            .replace("%Y", &format!("{:04}", self.year))
            .replace("%m", &format!("{:02}", self.month))
            .replace("%d", &format!("{:02}", self.day))
            .replace("%H", &format!("{:02}", self.hour))
            .replace("%M", &format!("{:02}", self.minute))
            .replace("%S", &format!("{:02}", self.second))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

// Howard Hinnant's civil calendar algorithms.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Why a header could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderFault {
    /// Not a record at all; the chain ends here.
    NoMagic,
    /// A record that fails its checks. `next` is the raw pointer, which the
    /// scan may still follow.
    Corrupt { reason: String, next: u32 },
}

/// Decoded record header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackHeader {
    /// Flash offset of the header.
    pub offset: u32,
    pub format: TrackFormat,
    pub next: u32,
    pub start: Timestamp,
    pub sample_count: u32,
    /// Seconds between samples.
    pub log_interval: u16,
    pub lap_count: u16,
    /// Total distance in metres.
    pub distance: u32,
}

fn u16_at(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn u32_at(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

impl TrackHeader {
    /// Parse and check the header at `offset`. `raw` must hold [`HEADER_SIZE`] bytes.
    pub fn parse(offset: u32, raw: &[u8], image_size: usize) -> Result<Self, HeaderFault> {
        if raw.len() < HEADER_SIZE || raw[..4] != TRACK_MAGIC {
            return Err(HeaderFault::NoMagic);
        }
        let next = u32_at(raw, 8);
        let corrupt = |reason: String| HeaderFault::Corrupt { reason, next };

        let bits = u16_at(raw, 4);
        let format = TrackFormat::from_bits(bits)
            .ok_or_else(|| corrupt(format!("unknown format bits {bits:#06x}")))?;
        if !format.contains(TrackFormat::GPS) {
            return Err(corrupt(format!("format {bits:#06x} lacks gps")));
        }

        let start = Timestamp {
            year: u16_at(raw, 12),
            month: raw[14],
            day: raw[15],
            hour: raw[16],
            minute: raw[17],
            second: raw[18],
        };
        if !start.is_valid() {
            return Err(corrupt(format!("invalid start time {start}")));
        }

        let header = Self {
            offset,
            format,
            next,
            start,
            sample_count: u32_at(raw, 20),
            log_interval: u16_at(raw, 24),
            lap_count: u16_at(raw, 26),
            distance: u32_at(raw, 28),
        };

        let end = header.record_end();
        if end > image_size as u64 {
            return Err(corrupt(format!(
                "{} samples and {} laps run past the image",
                header.sample_count, header.lap_count
            )));
        }
        if next != END_OF_CHAIN && (u64::from(next) < end || next as usize >= image_size) {
            return Err(corrupt(format!("next pointer {next:#x} out of range")));
        }
        Ok(header)
    }

    pub fn samples_offset(&self) -> usize {
        self.offset as usize + HEADER_SIZE
    }

    /// One past the last sample byte.
    pub fn samples_end(&self) -> u64 {
        self.samples_offset() as u64 + u64::from(self.sample_count) * SAMPLE_SIZE as u64
    }

    /// One past the last lap marker.
    pub fn record_end(&self) -> u64 {
        self.samples_end() + u64::from(self.lap_count) * LAP_SIZE as u64
    }

    pub fn next_offset(&self) -> Option<u32> {
        (self.next != END_OF_CHAIN).then_some(self.next)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..4].copy_from_slice(&TRACK_MAGIC);
        raw[4..6].copy_from_slice(&self.format.bits().to_le_bytes());
        raw[8..12].copy_from_slice(&self.next.to_le_bytes());
        raw[12..14].copy_from_slice(&self.start.year.to_le_bytes());
        raw[14] = self.start.month;
        raw[15] = self.start.day;
        raw[16] = self.start.hour;
        raw[17] = self.start.minute;
        raw[18] = self.start.second;
        raw[20..24].copy_from_slice(&self.sample_count.to_le_bytes());
        raw[24..26].copy_from_slice(&self.log_interval.to_le_bytes());
        raw[26..28].copy_from_slice(&self.lap_count.to_le_bytes());
        raw[28..32].copy_from_slice(&self.distance.to_le_bytes());
        raw
    }
}

/// What marked a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapEvent {
    /// The lap button was pressed.
    Manual,
    Other(u8),
}

impl LapEvent {
    const MANUAL: u8 = 1;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::MANUAL => Self::Manual,
            other => Self::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Manual => Self::MANUAL,
            Self::Other(byte) => byte,
        }
    }
}

/// A lap marker, placed at the sample logged when the lap was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lap {
    pub sample_index: u32,
    pub event: LapEvent,
}

impl Lap {
    /// Decode one marker; `raw` must hold [`LAP_SIZE`] bytes.
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            sample_index: u32_at(raw, 0),
            event: LapEvent::from_byte(raw[4]),
        }
    }

    pub fn encode(&self) -> [u8; LAP_SIZE] {
        let mut raw = [0u8; LAP_SIZE];
        raw[..4].copy_from_slice(&self.sample_index.to_le_bytes());
        raw[4] = self.event.to_byte();
        raw
    }
}

/// One logged point. Optional fields are `None` when the track format lacks them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Milliseconds since the track start.
    pub time_offset_ms: u32,
    /// Degrees times 1e7.
    pub latitude: i32,
    pub longitude: i32,
    /// Metres.
    pub altitude: i16,
    /// Hundredths of a degree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<u16>,
    /// Centimetres per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartrate: Option<u8>,
    /// Horizontal position error estimate, metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ehpe: Option<u8>,
    /// Metres since the track start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
}

impl Sample {
    /// Decode one sample; `raw` must hold [`SAMPLE_SIZE`] bytes.
    pub fn parse(raw: &[u8], format: TrackFormat) -> Self {
        let has = |flag| format.contains(flag);
        Self {
            time_offset_ms: u32_at(raw, 0),
            latitude: u32_at(raw, 4) as i32,
            longitude: u32_at(raw, 8) as i32,
            altitude: u16_at(raw, 12) as i16,
            heading: has(TrackFormat::HEADING).then(|| u16_at(raw, 14)),
            speed: has(TrackFormat::SPEED).then(|| u16_at(raw, 16)),
            heartrate: has(TrackFormat::HEARTRATE).then_some(raw[18]),
            ehpe: has(TrackFormat::ACCURACY).then_some(raw[19]),
            distance: has(TrackFormat::DISTANCE).then(|| u32_at(raw, 20)),
        }
    }

    pub fn encode(&self) -> [u8; SAMPLE_SIZE] {
        let mut raw = [0u8; SAMPLE_SIZE];
        raw[0..4].copy_from_slice(&self.time_offset_ms.to_le_bytes());
        raw[4..8].copy_from_slice(&self.latitude.to_le_bytes());
        raw[8..12].copy_from_slice(&self.longitude.to_le_bytes());
        raw[12..14].copy_from_slice(&self.altitude.to_le_bytes());
        raw[14..16].copy_from_slice(&self.heading.unwrap_or(0).to_le_bytes());
        raw[16..18].copy_from_slice(&self.speed.unwrap_or(0).to_le_bytes());
        raw[18] = self.heartrate.unwrap_or(0);
        raw[19] = self.ehpe.unwrap_or(0);
        raw[20..24].copy_from_slice(&self.distance.unwrap_or(0).to_le_bytes());
        raw
    }

    pub fn latitude_deg(&self) -> f64 {
        f64::from(self.latitude) / 1e7
    }

    pub fn longitude_deg(&self) -> f64 {
        f64::from(self.longitude) / 1e7
    }

    pub fn heading_deg(&self) -> Option<f64> {
        self.heading.map(|h| f64::from(h) / 100.0)
    }

    /// Metres per second.
    pub fn speed_mps(&self) -> Option<f64> {
        self.speed.map(|s| f64::from(s) / 100.0)
    }
}
