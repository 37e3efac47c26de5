use std::time::{Duration, Instant};

/// Minimum-spacing rate limiter: last-fire instant plus a period.
///
/// An unarmed interval is ready immediately. `arm` starts the period without
/// firing, so the first event must wait a full period from that point.
#[derive(Clone, Debug)]
pub struct Interval {
    period: Duration,
    last: Option<Instant>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start counting from `now` as if the interval had just fired.
    pub fn arm(&mut self, now: Instant) {
        self.last = Some(now);
    }

    pub fn is_armed(&self) -> bool {
        self.last.is_some()
    }

    /// True when at least one period has elapsed since the last fire.
    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.period,
            None => true,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Fire if ready; returns whether it fired.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }
}
