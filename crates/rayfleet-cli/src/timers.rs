use std::time::{Duration, Instant};

/// A repeating deadline for the event loop to poll. The loop owns the
/// clock; `due` answers "has this timer fired since I last asked" and
/// schedules the next occurrence.
#[derive(Debug)]
pub struct Interval {
    period: Duration,
    next: Instant,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        // A late loop iteration fires once, not once per missed period.
        while self.next <= now {
            self.next += self.period;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_period() {
        let start = Instant::now();
        let mut timer = Interval {
            period: Duration::from_millis(10),
            next: start + Duration::from_millis(10),
        };

        assert!(!timer.due(start));
        assert!(!timer.due(start + Duration::from_millis(9)));
        assert!(timer.due(start + Duration::from_millis(10)));
        assert!(!timer.due(start + Duration::from_millis(11)));
        assert!(timer.due(start + Duration::from_millis(20)));
    }

    #[test]
    fn late_ticks_coalesce() {
        let start = Instant::now();
        let mut timer = Interval {
            period: Duration::from_millis(10),
            next: start + Duration::from_millis(10),
        };

        // The loop stalled for several periods; one fire, then back on
        // schedule.
        assert!(timer.due(start + Duration::from_millis(35)));
        assert!(!timer.due(start + Duration::from_millis(39)));
        assert!(timer.due(start + Duration::from_millis(40)));
    }
}
