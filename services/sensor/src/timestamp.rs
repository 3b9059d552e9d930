//! Timestamp normalization.
//!
//! Measurements arrive with free-form timestamps. This module turns them into
//! an epoch-millisecond value for the store and a canonical ISO-8601 string
//! for responses. Inputs without an offset are resolved by an explicit
//! [`NaiveTimestampPolicy`], never by the host's local zone.

use crate::error::{Result, SensorError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::trace;

/// Canonical rendering: microsecond precision with an explicit `+hh:mm` offset
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Formats carrying their own offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
    "%Y/%m/%d %H:%M:%S%.f%z",
    "%Y/%m/%d %H:%M:%S%.f %z",
];

/// Date and time without an offset
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%d %B %Y %H:%M:%S%.f",
    "%d %B %Y %H:%M",
    "%B %d, %Y %H:%M:%S%.f",
    "%B %d, %Y %H:%M",
    "%B %d %Y %H:%M:%S%.f",
    "%B %d %Y %H:%M",
];

/// Date only, resolved to midnight
const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%B %d %Y",
];

/// How to resolve a timestamp that carries no offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NaiveTimestampPolicy {
    /// Treat it as already being UTC
    #[default]
    AssumeUtc,
    /// Refuse it
    Reject,
    /// Treat it as local time at a fixed offset
    AssumeOffset(FixedOffset),
}

/// Normalizer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Render the canonical string in UTC instead of the input's offset
    pub convert_to_utc: bool,
    /// Resolution of offset-less inputs
    pub naive_policy: NaiveTimestampPolicy,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            convert_to_utc: true,
            naive_policy: NaiveTimestampPolicy::default(),
        }
    }
}

/// A parsed instant in both store and response form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTimestamp {
    /// Milliseconds since the Unix epoch, rounded to the nearest millisecond
    pub epoch_millis: i64,
    /// ISO-8601 rendering with explicit offset
    pub canonical: String,
}

/// Parses free-form timestamps into [`NormalizedTimestamp`]s
#[derive(Debug, Clone, Default)]
pub struct TimestampNormalizer {
    options: NormalizeOptions,
}

impl TimestampNormalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }

    /// Parse and canonicalize a timestamp string
    ///
    /// Instants before the Unix epoch are rejected; the store only accepts
    /// non-negative timestamps.
    pub fn normalize(&self, input: &str) -> Result<NormalizedTimestamp> {
        let parsed = self.parse(input)?;
        let epoch_millis = round_to_millis(&parsed.with_timezone(&Utc));
        if epoch_millis < 0 {
            return Err(SensorError::InvalidTimestamp(input.to_string()));
        }

        let canonical = if self.options.convert_to_utc {
            parsed.with_timezone(&Utc).format(CANONICAL_FORMAT).to_string()
        } else {
            parsed.format(CANONICAL_FORMAT).to_string()
        };

        trace!(input = %input, epoch_millis, canonical = %canonical, "Normalized timestamp");

        Ok(NormalizedTimestamp {
            epoch_millis,
            canonical,
        })
    }

    /// Parse into an offset-aware instant without canonicalizing
    pub fn parse(&self, input: &str) -> Result<DateTime<FixedOffset>> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SensorError::InvalidTimestamp(input.to_string()));
        }

        if let Some(parsed) = parse_with_offset(trimmed) {
            return Ok(parsed);
        }

        // A trailing designator is an explicit UTC marker, not a naive input
        if let Some(stripped) = trimmed.strip_suffix(['Z', 'z']) {
            if let Some(naive) = parse_naive(stripped.trim_end()) {
                return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
            }
        }

        let naive =
            parse_naive(trimmed).ok_or_else(|| SensorError::InvalidTimestamp(input.to_string()))?;

        match self.options.naive_policy {
            NaiveTimestampPolicy::AssumeUtc => Ok(Utc.from_utc_datetime(&naive).fixed_offset()),
            NaiveTimestampPolicy::AssumeOffset(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| SensorError::InvalidTimestamp(input.to_string())),
            NaiveTimestampPolicy::Reject => Err(SensorError::InvalidTimestamp(input.to_string())),
        }
    }
}

fn parse_with_offset(input: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(input) {
        return Some(parsed);
    }
    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(input, fmt).ok())
}

fn parse_naive(input: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NAIVE_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Nearest millisecond, halves rounded up
fn round_to_millis(instant: &DateTime<Utc>) -> i64 {
    let nanos = i64::from(instant.timestamp_subsec_nanos());
    instant.timestamp() * 1000 + (nanos + 500_000) / 1_000_000
}

/// Render a store timestamp (epoch milliseconds) in canonical UTC form
pub fn canonical_from_millis(epoch_millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(epoch_millis)
        .single()
        .map(|dt| dt.format(CANONICAL_FORMAT).to_string())
}
