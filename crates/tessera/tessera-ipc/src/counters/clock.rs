use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall clock time in milliseconds since the Unix epoch.
pub trait EpochClock {
    fn time_ms(&self) -> i64;
}

/// Reads [`SystemTime`] on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn time_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

impl<F> EpochClock for F
where
    F: Fn() -> i64,
{
    fn time_ms(&self) -> i64 {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemEpochClock.time_ms() > 1_577_836_800_000);
    }

    #[test]
    fn closures_are_clocks() {
        let clock = || 42;
        assert_eq!(clock.time_ms(), 42);
    }
}
