//! Embedded directives: bracketed instructions inside generated text.
//!
//! Two grammars are recognised:
//!
//! ```text
//! [change_time:next_time]          advance the owner's clock one segment
//! [change_time:next_day]           jump to early_morning of the next day
//! [tool:<name>(:<arg>)*]           call a local pure function
//! ```
//!
//! Time directives are executed against the caller's [`Clock`] and stripped
//! from the text. Tool directives are replaced in place by their result.
//! Anything that cannot be resolved degrades to an inline error marker so a
//! single bad directive never costs the whole reply.

use std::fmt;
use std::sync::LazyLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{ChorusError, Result};

static CHANGE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[change_time:([^\]\[]*)\]").expect("change_time pattern is valid")
});

static TOOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[tool:([^\]\[]*)\]").expect("tool pattern is valid"));

// ---------------------------------------------------------------------------
// Directive model
// ---------------------------------------------------------------------------

/// Clock movement requested through `[change_time:<cmd>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCommand {
    /// `next_time`: one segment forward.
    NextTime,
    /// `next_day`: early morning of the following day.
    NextDay,
}

impl TimeCommand {
    /// Parse the `<cmd>` part of a time directive.
    ///
    /// # Errors
    /// Returns [`ChorusError::UnknownDirective`] for anything but the two commands.
    pub fn parse(cmd: &str) -> Result<Self> {
        match cmd.trim() {
            "next_time" => Ok(Self::NextTime),
            "next_day" => Ok(Self::NextDay),
            other => Err(ChorusError::UnknownDirective(format!("change_time:{other}"))),
        }
    }

    /// Apply the command to `clock`.
    pub fn apply(self, clock: &mut Clock) {
        match self {
            Self::NextTime => {
                clock.advance();
            }
            Self::NextDay => clock.next_day(),
        }
    }
}

/// A call into the local tool table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    /// `get_current_time`: host wall-clock.
    CurrentTime,
    /// `random_number:<min>:<max>`: uniform integer, bounds swapped if reversed.
    RandomNumber {
        /// Lower bound (inclusive).
        min: i64,
        /// Upper bound (inclusive).
        max: i64,
    },
    /// `get_weather:<location>`: deterministic per location and day.
    Weather {
        /// Free-text location name.
        location: String,
    },
}

impl ToolCall {
    /// Parse the body of a `[tool:...]` directive.
    ///
    /// # Errors
    /// Returns [`ChorusError::UnknownDirective`] for unknown names, wrong
    /// argument counts or unparsable numbers.
    pub fn parse(body: &str) -> Result<Self> {
        let mut parts = body.split(':').map(str::trim);
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match (name, args.as_slice()) {
            ("get_current_time", []) => Ok(Self::CurrentTime),
            ("random_number", [min, max]) => {
                let min = parse_bound(min)?;
                let max = parse_bound(max)?;
                let (min, max) = if min > max { (max, min) } else { (min, max) };
                Ok(Self::RandomNumber { min, max })
            }
            ("get_weather", [location]) if !location.is_empty() => Ok(Self::Weather {
                location: (*location).to_string(),
            }),
            ("get_current_time" | "random_number" | "get_weather", _) => Err(
                ChorusError::UnknownDirective(format!("wrong arguments for tool '{name}'")),
            ),
            _ => Err(ChorusError::UnknownDirective(format!("unknown tool '{name}'"))),
        }
    }

    /// Resolve the call to its replacement text.
    ///
    /// `day` seeds the weather generator; `rng` feeds `random_number` only.
    pub fn resolve<R: Rng + ?Sized>(&self, day: u32, rng: &mut R) -> String {
        match self {
            Self::CurrentTime => chrono::Local::now()
                .format("%A, %B %-d %Y, %H:%M")
                .to_string(),
            Self::RandomNumber { min, max } => rng.gen_range(*min..=*max).to_string(),
            Self::Weather { location } => weather_report(location, day).to_string(),
        }
    }
}

fn parse_bound(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| ChorusError::UnknownDirective(format!("'{raw}' is not an integer")))
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Weather categories with their temperature ranges in °C (inclusive).
const WEATHER_TABLE: [(&str, i32, i32); 6] = [
    ("sunny", 18, 32),
    ("partly cloudy", 12, 24),
    ("overcast", 8, 18),
    ("rainy", 5, 16),
    ("stormy", 10, 22),
    ("snowy", -12, 1),
];

/// A synthesized weather observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherReport {
    /// Location as given in the directive.
    pub location: String,
    /// Category from the fixed weather table.
    pub condition: &'static str,
    /// Temperature in °C, within the category's range.
    pub temperature_c: i32,
}

impl fmt::Display for WeatherReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}, {}°C",
            self.location, self.condition, self.temperature_c
        )
    }
}

/// Deterministic weather for `location` on `day`.
///
/// The generator is local and seeded from the sum of the location's character
/// codes plus the day, so the same inputs always agree and no shared random
/// state is read or written.
#[must_use]
pub fn weather_report(location: &str, day: u32) -> WeatherReport {
    let seed = location
        .chars()
        .map(|c| u64::from(u32::from(c)))
        .sum::<u64>()
        + u64::from(day);
    let mut rng = StdRng::seed_from_u64(seed);

    let (condition, low, high) = WEATHER_TABLE[rng.gen_range(0..WEATHER_TABLE.len())];
    WeatherReport {
        location: location.to_string(),
        condition,
        temperature_c: rng.gen_range(low..=high),
    }
}

// ---------------------------------------------------------------------------
// Resolution pass
// ---------------------------------------------------------------------------

/// Outcome of running the directive pass over one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveReport {
    /// Reply text with every directive stripped or replaced.
    pub text: String,
    /// Number of time directives applied to the clock.
    pub time_changes: usize,
    /// Number of tool calls resolved successfully.
    pub tools_resolved: usize,
    /// Descriptions of directives replaced by error markers.
    pub failures: Vec<String>,
}

/// Inline marker left in place of a directive that could not be resolved.
#[must_use]
pub fn error_marker(err: &ChorusError) -> String {
    format!("[directive error: {err}]")
}

/// Resolve every directive in `text`.
///
/// Time directives run first, in order of appearance, so tool calls see the
/// day they produce.
pub fn resolve_directives<R: Rng + ?Sized>(
    text: &str,
    clock: &mut Clock,
    rng: &mut R,
) -> DirectiveReport {
    let mut report = DirectiveReport::default();

    let mut after_time = String::with_capacity(text.len());
    let mut cursor = 0;
    for caps in CHANGE_TIME.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        after_time.push_str(&text[cursor..whole.start()]);
        cursor = whole.end();
        match TimeCommand::parse(&caps[1]) {
            Ok(cmd) => {
                cmd.apply(clock);
                report.time_changes += 1;
                debug!(command = ?cmd, clock = %clock, "Applied time directive");
                cursor += strip_one_space(&mut after_time, &text[cursor..]);
            }
            Err(err) => {
                warn!(directive = whole.as_str(), "Unresolvable time directive");
                report.failures.push(whole.as_str().to_string());
                after_time.push_str(&error_marker(&err));
            }
        }
    }
    after_time.push_str(&text[cursor..]);

    let day = clock.day();
    let after_tools = TOOL.replace_all(&after_time, |caps: &Captures<'_>| {
        match ToolCall::parse(&caps[1]) {
            Ok(call) => {
                report.tools_resolved += 1;
                call.resolve(day, rng)
            }
            Err(err) => {
                warn!(directive = &caps[0], %err, "Unresolvable tool directive");
                report.failures.push(caps[0].to_string());
                error_marker(&err)
            }
        }
    });

    report.text = after_tools.into_owned();
    report
}

/// Drop one space next to a stripped directive: the one before it, or the
/// one after it when the directive opened a line. Returns the bytes skipped
/// from `rest`.
fn strip_one_space(out: &mut String, rest: &str) -> usize {
    if out.ends_with(' ') {
        out.pop();
        0
    } else if (out.is_empty() || out.ends_with('\n')) && rest.starts_with(' ') {
        1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
