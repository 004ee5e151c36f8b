use std::time::Duration;

/// Capped exponential backoff without jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    factor: u32,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self {
        Self {
            initial,
            current: initial.min(max),
            factor: factor.max(1),
            max,
        }
    }

    /// Relay dial policy: 1, 2, 4, 8, 16, 30, 30, ... units.
    pub fn for_reconnect(unit: Duration) -> Self {
        Self::new(unit, 2, unit * 30)
    }

    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.current;
        self.current = self
            .current
            .checked_mul(self.factor)
            .unwrap_or(self.max)
            .min(self.max);
        d
    }

    #[cfg(test)]
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_sequence_doubles_then_caps_at_thirty() {
        let mut b = Backoff::for_reconnect(Duration::from_secs(1));
        let got: Vec<u64> = (0..9).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(got, vec![1, 2, 4, 8, 16, 30, 30, 30, 30]);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = Backoff::for_reconnect(Duration::from_millis(10));
        for _ in 0..4 {
            b.next_delay();
        }
        assert_eq!(b.peek(), Duration::from_millis(160));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(10));
        assert_eq!(b.next_delay(), Duration::from_millis(20));
    }

    #[test]
    fn fresh_policy_equals_reset_policy() {
        let unit = Duration::from_secs(1);
        let mut used = Backoff::for_reconnect(unit);
        used.next_delay();
        used.next_delay();
        used.reset();
        assert_eq!(used, Backoff::for_reconnect(unit));
    }

    #[test]
    fn overflow_saturates_at_max() {
        let mut b = Backoff::new(Duration::MAX / 2, 4, Duration::MAX);
        b.next_delay();
        assert_eq!(b.next_delay(), Duration::MAX);
    }
}
