//! Synchronous progress reporting with cooperative cancellation.
//!
//! Sinks run on the calling thread between chunks of work. Returning
//! [`ControlFlow::Break`] stops the operation, which then fails with
//! [`ZipError::Cancelled`](crate::ZipError::Cancelled) and returns no partial output.

use std::ops::ControlFlow;

/// Receives the fraction of work completed, from 0.0 to 1.0, never decreasing.
pub trait ProgressSink {
    fn progress(&mut self, fraction: f64) -> ControlFlow<()>;
}

impl<F> ProgressSink for F
where
    F: FnMut(f64) -> ControlFlow<()>,
{
    fn progress(&mut self, fraction: f64) -> ControlFlow<()> {
        self(fraction)
    }
}

/// A sink that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _fraction: f64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Turns byte counts into monotonic fractions of a known total.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    total: u64,
    done: u64,
    last: f64,
}

impl Tracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            last: 0.0,
        }
    }

    /// Record `bytes` more and return the new fraction.
    pub fn advance(&mut self, bytes: u64) -> f64 {
        self.done = self.done.saturating_add(bytes);
        let fraction = if self.total == 0 {
            1.0
        } else {
            (self.done as f64 / self.total as f64).min(1.0)
        };
        self.last = self.last.max(fraction);
        self.last
    }

    pub fn finish(&mut self) -> f64 {
        self.last = 1.0;
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_is_monotonic_and_capped() {
        let mut tracker = Tracker::new(10);
        assert_eq!(tracker.advance(4), 0.4);
        assert_eq!(tracker.advance(0), 0.4);
        // Entries may inflate past their recorded size
        assert_eq!(tracker.advance(20), 1.0);
        assert_eq!(tracker.finish(), 1.0);
    }

    #[test]
    fn empty_total_is_complete() {
        assert_eq!(Tracker::new(0).advance(0), 1.0);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        let mut sink = |fraction: f64| {
            seen.push(fraction);
            if fraction >= 0.5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        assert!(sink.progress(0.25).is_continue());
        assert!(sink.progress(0.5).is_break());
        assert_eq!(seen, [0.25, 0.5]);
    }
}
