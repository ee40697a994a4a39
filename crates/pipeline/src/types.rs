//! Shared value types for the dispatch domain.
//!
//! These carry values with invariants: temperatures stay in `[0.0, 2.0]` and a
//! credit charge is never zero.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Instant in UTC. Serialised and displayed as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current instant.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_utc(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// The wrapped `chrono` value.
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------

/// The calendar month used to bound the execution-count check.
///
/// Half-open: `start` is inclusive, `end` is exclusive, both at UTC midnight
/// on the first day of their month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    /// First instant of the month.
    pub start: Timestamp,
    /// First instant of the following month.
    pub end: Timestamp,
}

impl QuotaWindow {
    /// Returns the calendar month containing `at`.
    pub fn month_of(at: Timestamp) -> Self {
        let at = at.as_datetime();
        let (year, month) = (at.year(), at.month());
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

        Self {
            start: Timestamp::from_utc(month_start(year, month)),
            end: Timestamp::from_utc(month_start(next_year, next_month)),
        }
    }

    /// Returns `true` if `at` falls within `[start, end)`.
    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && at < self.end
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // The first of any month always exists; fall back to the epoch rather than panic.
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Abstract usage units deducted from a user's balance per execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credits(u32);

impl Credits {
    /// Returns the charge for an execution covering `node_count` nodes.
    ///
    /// Every execution costs at least one credit.
    pub fn for_nodes(node_count: usize) -> Self {
        let count = u32::try_from(node_count).unwrap_or(u32::MAX);
        Self(count.max(1))
    }

    /// Returns the underlying integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Credits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Sampling temperature passed to the generative backend.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// Creates a [`Temperature`], returning `None` if `value` is outside `[0.0, 2.0]`.
    #[must_use]
    pub fn new(value: f32) -> Option<Self> {
        if value.is_finite() && (0.0..=2.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Low temperature for analytical archetypes where consistency matters.
    pub const ANALYTICAL: Self = Self(0.25);
    /// Slightly warmer analytical setting used for clinical comparisons.
    pub const CLINICAL: Self = Self(0.3);
    /// Middle ground for descriptive research prompts.
    pub const BALANCED: Self = Self(0.5);
    /// Higher temperature for persona and simulation archetypes.
    pub const CREATIVE: Self = Self(0.7);

    /// Returns the temperature as an `f32`.
    pub fn as_f32(self) -> f32 {
        self.0
    }
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Generation settings attached to every composed prompt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    /// Sampling temperature.
    pub temperature: Temperature,
    /// Nucleus sampling cut-off.
    pub top_p: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Ask the backend to emit a bare JSON document where supported.
    pub json_output: bool,
}

impl GenerationParameters {
    /// Parameters for analytical archetypes with the given token ceiling.
    pub fn analytical(max_output_tokens: u32) -> Self {
        Self {
            temperature: Temperature::ANALYTICAL,
            top_p: 0.9,
            max_output_tokens,
            json_output: true,
        }
    }

    /// Parameters for creative archetypes with the given token ceiling.
    pub fn creative(max_output_tokens: u32) -> Self {
        Self {
            temperature: Temperature::CREATIVE,
            top_p: 0.95,
            max_output_tokens,
            json_output: true,
        }
    }

    /// Returns a copy using `temperature`.
    #[must_use]
    pub fn with_temperature(self, temperature: Temperature) -> Self {
        Self {
            temperature,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_utc(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())
    }

    #[test]
    fn quota_window_covers_calendar_month() {
        let window = QuotaWindow::month_of(at(2026, 10, 19));
        assert_eq!(window.start.to_string(), "2026-10-01T00:00:00+00:00");
        assert_eq!(window.end.to_string(), "2026-11-01T00:00:00+00:00");
        assert!(window.contains(at(2026, 10, 1)));
        assert!(!window.contains(at(2026, 11, 1)));
        assert!(!window.contains(at(2026, 9, 30)));
    }

    #[test]
    fn quota_window_rolls_over_year_end() {
        let window = QuotaWindow::month_of(at(2025, 12, 31));
        assert_eq!(window.end.to_string(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn credits_are_at_least_one() {
        assert_eq!(Credits::for_nodes(0).as_u32(), 1);
        assert_eq!(Credits::for_nodes(1).as_u32(), 1);
        assert_eq!(Credits::for_nodes(13).as_u32(), 13);
    }

    #[test]
    fn temperature_rejects_out_of_range_values() {
        assert!(Temperature::new(-0.1).is_none());
        assert!(Temperature::new(2.5).is_none());
        assert!(Temperature::new(f32::NAN).is_none());
        assert_eq!(Temperature::new(0.7), Some(Temperature::CREATIVE));
    }
}
