//! Line normalisation: whitespace, turn marker, length bound.

use std::sync::LazyLock;

use regex::Regex;

static TURN_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(turn\s*-?\d+\)\s*$").unwrap());

/// Placeholder for a completion that was blank after cleanup.
pub const EMPTY_LINE: &str = "...";

/// Remove any trailing `(turn N)` markers, then trim.
pub fn strip_turn_marker(text: &str) -> &str {
    let mut rest = text.trim_end();
    while let Some(m) = TURN_MARKER.find(rest) {
        rest = rest[..m.start()].trim_end();
    }
    rest.trim()
}

pub fn turn_suffix(turn: i64) -> String {
    format!("(turn {turn})")
}

/// Produce the stored form of a generated line.
///
/// Collapses whitespace, replaces an empty line with `...`, replaces any
/// trailing turn marker with `(turn {turn})`, and bounds the result to
/// `max_chars` chars by cutting the body and inserting `...`. Applying it
/// twice gives the same result as applying it once.
pub fn normalize_line(raw: &str, turn: i64, max_chars: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let body = match strip_turn_marker(&collapsed) {
        "" => EMPTY_LINE,
        b => b,
    };
    let suffix = turn_suffix(turn);
    let line = format!("{body} {suffix}");

    if line.chars().count() <= max_chars {
        return line;
    }

    let cut = max_chars.saturating_sub(suffix.chars().count() + 4);
    let head: String = body.chars().take(cut).collect();
    format!("{}... {suffix}", head.trim_end())
}
