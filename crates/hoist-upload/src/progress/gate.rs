//! Progress gating.
//!
//! Limits progress events to meaningful changes so observers are not
//! flooded with one event per chunk.

/// Percentage of `sent` over `total`, floored and capped at 100.
///
/// An unknown (zero) total reports 0 until the transfer finishes.
#[must_use]
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u128::from(sent) * 100 / u128::from(total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Step-based gate for progress percentages.
///
/// A value passes when it is above the last one that passed and either
/// reaches 100 or is more than `step` above it. With a step of 0 every
/// increase passes. Zero is reported by the caller when a task starts, so
/// the gate begins at that value.
#[derive(Debug, Clone)]
pub struct ProgressGate {
    last: u8,
    step: u8,
}

impl ProgressGate {
    /// Create a gate whose last reported value is `last`.
    pub const fn new(step: u8, last: u8) -> Self {
        Self { last, step }
    }

    /// Check whether `current` should be reported, recording it if so.
    pub fn should_emit(&mut self, current: u8) -> bool {
        let big_enough =
            current >= 100 || u16::from(current) > u16::from(self.last) + u16::from(self.step);
        if current > self.last && big_enough {
            self.last = current;
            true
        } else {
            false
        }
    }

    /// The last value that passed.
    pub const fn last(&self) -> u8 {
        self.last
    }
}
