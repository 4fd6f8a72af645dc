//! Timestamps stored as an (instant, timezone offset) pair.
//!
//! The offset follows the JavaScript `Date#getTimezoneOffset` convention:
//! minutes to add to local time to get UTC, so UTC+2 is `-120`. The string
//! form of a pair is `instant - offset * 60000ms` rendered as ISO-8601 with
//! millisecond precision, which keeps previously stored records readable
//! byte-for-byte.

use chrono::{DateTime, Local, Offset, SecondsFormat, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// An absolute instant plus the local timezone offset in effect when it was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWithOffset {
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
    /// UTC minus local time, in minutes.
    pub offset: i32,
}

impl DateWithOffset {
    /// Capture the current instant and the process-local offset.
    pub fn now() -> Self {
        Self::from_zoned(Local::now())
    }

    /// Build a pair from a zoned timestamp, truncated to millisecond precision.
    pub fn from_zoned<Tz: TimeZone>(moment: DateTime<Tz>) -> Self {
        let offset = -(moment.offset().fix().local_minus_utc() / 60);
        let utc = moment.with_timezone(&Utc);
        let date = DateTime::from_timestamp_millis(utc.timestamp_millis()).unwrap_or(utc);
        Self { date, offset }
    }

    /// Render as `YYYY-MM-DDTHH:MM:SS.sssZ` after shifting by the stored offset.
    pub fn to_iso_string(&self) -> String {
        let effective = self.date - offset_delta(self.offset);
        effective.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Inverse of [`DateWithOffset::to_iso_string`] for a known offset.
    pub fn from_iso_string(value: &str, offset: i32) -> Result<Self, chrono::ParseError> {
        let effective = DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc);
        Ok(Self {
            date: effective + offset_delta(offset),
            offset,
        })
    }
}

fn offset_delta(offset_minutes: i32) -> TimeDelta {
    TimeDelta::milliseconds(i64::from(offset_minutes) * MILLIS_PER_MINUTE)
}
