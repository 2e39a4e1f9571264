use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::limits::*;

pub type BookingId = u64;

/// Minutes since midnight. `24:00` (1440) is valid only as an end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

pub const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError;

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected zero-padded HH:MM")
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    /// Strict `HH:MM`, both fields two digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(ParseTimeError);
        }
        let digit = |b: u8| b.is_ascii_digit().then(|| (b - b'0') as u16).ok_or(ParseTimeError);
        let hours = digit(bytes[0])? * 10 + digit(bytes[1])?;
        let mins = digit(bytes[3])? * 10 + digit(bytes[4])?;
        let total = hours * 60 + mins;
        if mins >= 60 || total > MINUTES_PER_DAY {
            return Err(ParseTimeError);
        }
        Ok(Self(total))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Span {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A stored booking. `id` and `created_at` are owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub attendees: Option<u32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// Validated booking fields, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub title: String,
    pub date: NaiveDate,
    pub span: Span,
    pub attendees: Option<u32>,
    pub notes: Option<String>,
}

impl NewBooking {
    pub fn into_booking(self, id: BookingId, created_at: DateTime<Utc>) -> Booking {
        Booking {
            id,
            title: self.title,
            date: self.date,
            start_time: self.span.start,
            end_time: self.span.end,
            attendees: self.attendees,
            notes: self.notes,
            created_at,
        }
    }
}

/// Raw client input. Every field is optional so that missing fields
/// surface as a validation failure instead of a deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub title: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub attendees: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    MissingFields,
    InvalidDate,
    InvalidTime,
    InvalidTimeRange,
    TitleTooLong,
    NotesTooLong,
    InvalidAttendees,
}

impl ValidationError {
    pub fn message(self) -> &'static str {
        match self {
            ValidationError::MissingFields => "missing required fields",
            ValidationError::InvalidDate => "invalid date",
            ValidationError::InvalidTime => "invalid time",
            ValidationError::InvalidTimeRange => "invalid time range",
            ValidationError::TitleTooLong => "title too long",
            ValidationError::NotesTooLong => "notes too long",
            ValidationError::InvalidAttendees => "invalid attendees",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    // chrono accepts non-padded fields with %m/%d; the fixed width keeps
    // lexicographic and chronological order equal.
    if s.len() != 10 {
        return Err(ValidationError::InvalidDate);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate)
}

fn required(field: &Option<String>) -> Result<&str, ValidationError> {
    match field.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ValidationError::MissingFields),
    }
}

impl BookingDraft {
    /// Check presence, formats, limits and `start < end`. Touches no storage.
    pub fn validate(&self) -> Result<NewBooking, ValidationError> {
        let title = required(&self.title)?;
        let date = required(&self.date)?;
        let start = required(&self.start_time)?;
        let end = required(&self.end_time)?;

        if title.len() > MAX_TITLE_LEN {
            return Err(ValidationError::TitleTooLong);
        }
        let date = parse_date(date)?;
        let start: TimeOfDay = start.parse().map_err(|_| ValidationError::InvalidTime)?;
        let end: TimeOfDay = end.parse().map_err(|_| ValidationError::InvalidTime)?;
        if start >= end {
            return Err(ValidationError::InvalidTimeRange);
        }

        let attendees = match self.attendees {
            None => None,
            Some(n) if (0..=MAX_ATTENDEES as i64).contains(&n) => Some(n as u32),
            Some(_) => return Err(ValidationError::InvalidAttendees),
        };
        if let Some(ref n) = self.notes
            && n.len() > MAX_NOTES_LEN {
                return Err(ValidationError::NotesTooLong);
            }

        Ok(NewBooking {
            title: title.to_string(),
            date,
            span: Span::new(start, end),
            attendees,
            notes: self.notes.clone(),
        })
    }
}

/// Store log record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Inserted(Booking),
    Updated(Booking),
    Deleted { id: BookingId },
    /// Highest id ever assigned; written on compaction so ids are never reused.
    IdWatermark { last_id: BookingId },
}
