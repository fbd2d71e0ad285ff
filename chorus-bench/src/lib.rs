//! Shared fixtures for the chorus benchmarks.

#![deny(missing_docs)]

use chorus_core::{Clock, MemoryEntry, Role};

/// A reply mixing plain text, time directives and every tool directive.
#[must_use]
pub fn directive_heavy_reply(i: usize) -> String {
    format!(
        "Line {i}. [tool:random_number:1:{max}] The sky over Harrowgate: \
         [tool:get_weather:Harrowgate]. [change_time:next_time] \
         Later that night [tool:fly_to_moon] we rested.",
        max = i + 10
    )
}

/// A reply with no directives at all.
#[must_use]
pub fn plain_reply(i: usize) -> String {
    format!("Line {i}. The fire crackles and the bard hums an old tune about the sea.")
}

/// A user turn stamped at `clock`.
#[must_use]
pub fn user_entry(i: usize, clock: &Clock) -> MemoryEntry {
    MemoryEntry::new(Role::User, format!("Guest: message number {i}"), "30s", clock)
}

/// Summaries for populating a long-term index.
#[must_use]
pub fn summaries(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            format!(
                "Day {}: the guest and Lyra talked about song {i}, the harbor and the weather.",
                i / 5 + 1
            )
        })
        .collect()
}
