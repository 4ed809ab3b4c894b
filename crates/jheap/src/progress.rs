//! Progress reporting for the long-running build phases.
//!
//! Reporting is permille based: every phase maps its position onto the
//! `0..=PROGRESS_MAX` range so callers can drive a single progress bar
//! across phases of wildly different cost. The sink is throttled by record
//! count, not by time, so reporting overhead is independent of wall clock.

/// Upper bound of the progress scale (one report unit = one permille).
pub const PROGRESS_MAX: u32 = 1000;

/// Number of records processed between two progress computations.
const REPORT_INTERVAL: u64 = 100_000;

/// Receiver for phase progress.
///
/// Implementations must be cheap; they are called from inside the scan
/// loops. `value` is in `0..=PROGRESS_MAX`.
pub trait ProgressListener: Send {
    /// A phase advanced to `value` permille.
    fn progress(&self, value: u32);

    /// The whole build finished (all requested phases done).
    fn finished(&self) {}
}

/// Throttled adapter between scan loops and the optional listener.
///
/// Each long phase creates one tracker over its byte range and calls
/// [`step`](ProgressTracker::step) per record. Without a listener the
/// per-record cost is a single branch on the counter.
pub(crate) struct ProgressTracker<'a> {
    listener: Option<&'a (dyn ProgressListener)>,
    start: u64,
    end: u64,
    counter: u64,
    last_value: u32,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(
        listener: Option<&'a dyn ProgressListener>,
        start: u64,
        end: u64,
    ) -> Self {
        ProgressTracker { listener, start, end, counter: 0, last_value: u32::MAX }
    }

    /// Records one processed record at byte position `pos`.
    pub(crate) fn step(&mut self, pos: u64) {
        self.counter += 1;
        if self.counter % REPORT_INTERVAL != 0 {
            return;
        }
        let Some(listener) = self.listener else { return };
        let span = self.end.saturating_sub(self.start);
        if span == 0 {
            return;
        }
        let done = pos.saturating_sub(self.start).min(span);
        let value = ((done as u128 * PROGRESS_MAX as u128) / span as u128) as u32;
        if value != self.last_value {
            self.last_value = value;
            listener.progress(value);
        }
    }
}
