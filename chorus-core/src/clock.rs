//! Narrative clock: the shared `(day, time-of-day)` cursor.
//!
//! Times of day follow a fixed cyclic order:
//!
//! ```text
//! early_morning → morning → afternoon → evening → night ─┐
//!       ▲                                               │ day + 1
//!       └───────────────────────────────────────────────┘
//! ```
//!
//! The day counter starts at 1 and never drops below it. Retreating from
//! `(1, early_morning)` is a no-op rather than an underflow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChorusError, Result};

/// One of the five fixed segments of a narrative day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    /// Dawn, the first segment of every day.
    EarlyMorning,
    /// Morning.
    Morning,
    /// Afternoon.
    Afternoon,
    /// Evening.
    Evening,
    /// Night, the last segment before the day rolls over.
    Night,
}

impl TimeOfDay {
    /// All segments in calendar order.
    pub const ALL: [Self; 5] = [
        Self::EarlyMorning,
        Self::Morning,
        Self::Afternoon,
        Self::Evening,
        Self::Night,
    ];

    /// Canonical snake_case name, as used in prompts, ids and snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EarlyMorning => "early_morning",
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }

    /// Position in [`TimeOfDay::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The following segment, and whether the step wrapped past `night`.
    #[must_use]
    pub fn next(self) -> (Self, bool) {
        match self {
            Self::Night => (Self::EarlyMorning, true),
            other => (Self::ALL[other.index() + 1], false),
        }
    }

    /// The preceding segment, and whether the step wrapped before `early_morning`.
    #[must_use]
    pub fn previous(self) -> (Self, bool) {
        match self {
            Self::EarlyMorning => (Self::Night, true),
            other => (Self::ALL[other.index() - 1], false),
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeOfDay {
    type Err = ChorusError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| ChorusError::InvalidTimeValue(s.to_string()))
    }
}

/// Shape accepted when deserializing a [`Clock`]; rejects `day == 0`.
#[derive(Deserialize)]
struct RawClock {
    day: u32,
    time_of_day: TimeOfDay,
}

impl TryFrom<RawClock> for Clock {
    type Error = ChorusError;

    fn try_from(raw: RawClock) -> Result<Self> {
        Self::new(raw.day, raw.time_of_day)
    }
}

/// A `(day, time-of-day)` cursor. `day >= 1` always holds.
///
/// The clock has no locking of its own; owners serialize access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawClock")]
pub struct Clock {
    day: u32,
    time_of_day: TimeOfDay,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            day: 1,
            time_of_day: TimeOfDay::Morning,
        }
    }
}

impl Clock {
    /// Create a clock at the given position.
    ///
    /// # Errors
    /// Returns [`ChorusError::InvalidTimeValue`] if `day` is 0.
    pub fn new(day: u32, time_of_day: TimeOfDay) -> Result<Self> {
        if day == 0 {
            return Err(ChorusError::InvalidTimeValue(format!("day {day}")));
        }
        Ok(Self { day, time_of_day })
    }

    /// Current day, starting at 1.
    #[must_use]
    pub fn day(&self) -> u32 {
        self.day
    }

    /// Current segment of the day.
    #[must_use]
    pub fn time_of_day(&self) -> TimeOfDay {
        self.time_of_day
    }

    /// Move to the next time of day, incrementing the day when wrapping past `night`.
    ///
    /// Returns `true` if a new day started.
    pub fn advance(&mut self) -> bool {
        let (next, wrapped) = self.time_of_day.next();
        self.time_of_day = next;
        if wrapped {
            self.day = self.day.saturating_add(1);
        }
        wrapped
    }

    /// Move to the previous time of day.
    ///
    /// Wrapping before `early_morning` decrements the day only when `day > 1`;
    /// at `(1, early_morning)` the clock stays where it is.
    pub fn retreat(&mut self) {
        let (prev, wrapped) = self.time_of_day.previous();
        if wrapped {
            if self.day <= 1 {
                return;
            }
            self.day -= 1;
        }
        self.time_of_day = prev;
    }

    /// Jump to `early_morning` of the following day.
    pub fn next_day(&mut self) {
        self.day = self.day.saturating_add(1);
        self.time_of_day = TimeOfDay::EarlyMorning;
    }

    /// Jump to `early_morning` of the previous day. No-op on day 1.
    pub fn previous_day(&mut self) {
        if self.day > 1 {
            self.day -= 1;
            self.time_of_day = TimeOfDay::EarlyMorning;
        }
    }

    /// Set the clock from untrusted input.
    ///
    /// # Errors
    /// Returns [`ChorusError::InvalidTimeValue`] if `time_of_day` is not one of
    /// the five segments or `day` is 0. The clock is left untouched on error.
    pub fn set(&mut self, day: u32, time_of_day: &str) -> Result<()> {
        let tod: TimeOfDay = time_of_day.parse()?;
        *self = Self::new(day, tod)?;
        Ok(())
    }

    /// Deterministic long-term memory id for the current position.
    #[must_use]
    pub fn memory_id(&self) -> String {
        format!("day_{}_time_{}", self.day, self.time_of_day)
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Day {}, {}", self.day, self.time_of_day)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, tod: TimeOfDay) -> Clock {
        Clock::new(day, tod).expect("valid clock")
    }

    #[test]
    fn advance_walks_the_day() {
        let mut clock = at(1, TimeOfDay::EarlyMorning);
        let seen: Vec<TimeOfDay> = (0..4)
            .map(|_| {
                clock.advance();
                clock.time_of_day()
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                TimeOfDay::Morning,
                TimeOfDay::Afternoon,
                TimeOfDay::Evening,
                TimeOfDay::Night
            ]
        );
        assert_eq!(clock.day(), 1);
    }

    #[test]
    fn advance_past_night_starts_new_day() {
        let mut clock = at(4, TimeOfDay::Night);
        assert!(clock.advance());
        assert_eq!(clock, at(5, TimeOfDay::EarlyMorning));
    }

    #[test]
    fn retreat_clamps_at_first_dawn() {
        let mut clock = at(1, TimeOfDay::EarlyMorning);
        clock.retreat();
        assert_eq!(clock, at(1, TimeOfDay::EarlyMorning));
    }

    #[test]
    fn retreat_crosses_day_boundary_after_day_one() {
        let mut clock = at(3, TimeOfDay::EarlyMorning);
        clock.retreat();
        assert_eq!(clock, at(2, TimeOfDay::Night));
    }

    #[test]
    fn day_jumps() {
        let mut clock = at(2, TimeOfDay::Evening);
        clock.next_day();
        assert_eq!(clock, at(3, TimeOfDay::EarlyMorning));
        clock.previous_day();
        assert_eq!(clock, at(2, TimeOfDay::EarlyMorning));

        let mut first = at(1, TimeOfDay::Afternoon);
        first.previous_day();
        assert_eq!(first, at(1, TimeOfDay::Afternoon));
    }

    #[test]
    fn set_rejects_unknown_segment_without_mutating() {
        let mut clock = at(2, TimeOfDay::Morning);
        let err = clock.set(9, "teatime").expect_err("should reject");
        assert!(matches!(err, ChorusError::InvalidTimeValue(_)));
        assert_eq!(clock, at(2, TimeOfDay::Morning));
    }

    #[test]
    fn set_rejects_day_zero() {
        let mut clock = Clock::default();
        assert!(clock.set(0, "night").is_err());
        assert_eq!(clock, Clock::default());
    }

    #[test]
    fn set_accepts_loose_spelling() {
        let mut clock = Clock::default();
        clock.set(3, "Early Morning").expect("set");
        assert_eq!(clock, at(3, TimeOfDay::EarlyMorning));
    }

    #[test]
    fn memory_id_is_deterministic() {
        assert_eq!(at(3, TimeOfDay::Evening).memory_id(), "day_3_time_evening");
    }

    #[test]
    fn serde_rejects_day_zero() {
        let ok: Clock =
            serde_json::from_str(r#"{"day":3,"time_of_day":"evening"}"#).expect("parse");
        assert_eq!(ok, at(3, TimeOfDay::Evening));
        assert!(serde_json::from_str::<Clock>(r#"{"day":0,"time_of_day":"night"}"#).is_err());
        assert!(serde_json::from_str::<Clock>(r#"{"day":1,"time_of_day":"noon"}"#).is_err());
    }
}
