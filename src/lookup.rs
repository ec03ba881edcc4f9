//! Time-indexed queries over a decoded [`Zoneinfo`]: which offset rule is in effect at a
//! given instant, and which transition follows it.

use chrono::{DateTime, NaiveDateTime, Utc};
#[cfg(feature = "json")]
use serde::Serialize;

use crate::parse::{Ttinfo, Zoneinfo};

// Window size below which the search switches to a linear tail scan. Zone files rarely
// hold more than a few hundred transitions, so the tail dominates in practice.
const LINEAR_SCAN_WINDOW: usize = 16;

/// Returns the index of the rightmost element less than or equal to `value`, or `None`
/// when `value` precedes every element (or the slice is empty).
///
/// Binary search narrows the candidate window to [`LINEAR_SCAN_WINDOW`] elements or
/// fewer, then a linear scan locates the first element strictly greater than `value`;
/// the answer is one position before it. Exact matches resolve to their own index.
pub fn rightmost_at_or_before(times: &[i64], value: i64) -> Option<usize> {
    let mut lo = 0;
    let mut hi = times.len();
    while hi - lo > LINEAR_SCAN_WINDOW {
        let mid = lo + (hi - lo) / 2;
        if times[mid] <= value {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let first_above = times[lo..hi]
        .iter()
        .position(|&t| t > value)
        .map(|p| lo + p)
        .unwrap_or(hi);
    first_above.checked_sub(1)
}

/// An offset rule in effect at some instant: the rule itself, the epoch-millisecond
/// instant it took effect (0 when not derived from a concrete transition), and the
/// index of the source transition (`None` when not tied to one).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Transition {
    /// Offset to UTC, in seconds
    pub utc_offset: i32,
    /// Is daylight saving time in effect ?
    pub is_dst: bool,
    /// Timezone abbreviation
    pub abbreviation: String,
    /// Epoch milliseconds at which this rule took effect, 0 if unknown
    pub effective_ms: i64,
    /// Index of the transition this rule comes from
    pub index: Option<usize>,
}

impl Transition {
    fn from_type(info: &Ttinfo, effective_ms: i64, index: Option<usize>) -> Transition {
        Transition {
            utc_offset: info.tt_utoff,
            is_dst: info.tt_isdst,
            abbreviation: info.abbreviation.clone(),
            effective_ms,
            index,
        }
    }

    /// Transforms the Transition struct to a JSON string
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, serde_json::error::Error> {
        serde_json::to_string(self)
    }
}

/// An instant a lookup can be performed at: epoch milliseconds, a `chrono` datetime, or
/// an RFC 3339 string. Normalization floors toward negative infinity, so `-1500` ms
/// resolves to second `-2`, not `-1`.
pub trait IntoInstant {
    /// Whole seconds since the epoch, or `None` when the value does not parse.
    fn into_epoch_seconds(self) -> Option<i64>;
}

impl IntoInstant for i64 {
    // Interpreted as milliseconds since the epoch.
    fn into_epoch_seconds(self) -> Option<i64> {
        Some(self.div_euclid(1000))
    }
}

impl IntoInstant for DateTime<Utc> {
    fn into_epoch_seconds(self) -> Option<i64> {
        Some(self.timestamp())
    }
}

impl IntoInstant for NaiveDateTime {
    fn into_epoch_seconds(self) -> Option<i64> {
        Some(self.and_utc().timestamp())
    }
}

impl IntoInstant for &str {
    fn into_epoch_seconds(self) -> Option<i64> {
        DateTime::parse_from_rfc3339(self)
            .ok()
            .map(|d| d.timestamp())
    }
}

impl Zoneinfo {
    /// Returns the offset rule in effect at `instant`.
    ///
    /// A zone without transitions but with at least one rule (a fixed-offset zone such
    /// as UTC) always resolves to its first rule, whatever the instant. An instant
    /// preceding the earliest transition resolves to the rule of the first transition
    /// when `allow_oldest` is set, and to `None` otherwise.
    pub fn find_transition(
        &self,
        instant: impl IntoInstant,
        allow_oldest: bool,
    ) -> Option<Transition> {
        let seconds = instant.into_epoch_seconds()?;
        if let Some(i) = rightmost_at_or_before(&self.transition_times, seconds) {
            let info = self.types.get(usize::from(self.transition_types[i]))?;
            return Some(Transition::from_type(info, to_ms(self.transition_times[i]), Some(i)));
        }
        if self.transition_times.is_empty() {
            let info = self.types.first()?;
            return Some(Transition::from_type(info, 0, None));
        }
        if allow_oldest {
            let info = self.types.get(usize::from(self.transition_types[0]))?;
            return Some(Transition::from_type(info, 0, None));
        }
        None
    }

    /// Returns the transition following `current`, or `None` when `current` is the last
    /// one or is not tied to a concrete transition.
    ///
    /// Repeated application from the earliest transition visits every subsequent
    /// transition exactly once, in ascending order, and ends in `None` after the last.
    pub fn next_transition(&self, current: &Transition) -> Option<Transition> {
        let next = current.index?.checked_add(1)?;
        if next >= self.transition_times.len() {
            return None;
        }
        let info = self.types.get(usize::from(self.transition_types[next]))?;
        Some(Transition::from_type(info, to_ms(self.transition_times[next]), Some(next)))
    }
}

// Some Debian TZfiles hold a -576460752303423488 "big bang" transition, which does not
// fit the millisecond range; saturate instead of overflowing.
fn to_ms(seconds: i64) -> i64 {
    seconds.saturating_mul(1000)
}
