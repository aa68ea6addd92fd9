use std::time::{Duration, Instant};

/// Wall-clock bookends of the three long-running phases, reported at the
/// end of a successful render.
#[derive(Debug, Default)]
pub struct PhaseClock {
    pub sync_start: Option<Instant>,
    pub sync_stop: Option<Instant>,
    pub build_start: Option<Instant>,
    pub build_stop: Option<Instant>,
    pub render_start: Option<Instant>,
    pub render_stop: Option<Instant>,
}

impl PhaseClock {
    pub fn report(&self, use_linear_scan: bool) {
        if let Some(elapsed) = span(self.sync_start, self.sync_stop) {
            log::info!("Time spent syncing: {}.", format_elapsed(elapsed));
        }
        // Without a WBVH there is no build phase worth reporting.
        if !use_linear_scan {
            if let Some(elapsed) = span(self.build_start, self.build_stop) {
                log::info!("Time spent building: {}.", format_elapsed(elapsed));
            }
        }
        if let Some(elapsed) = span(self.render_start, self.render_stop) {
            log::info!("Time spent rendering: {}.", format_elapsed(elapsed));
        }
    }
}

fn span(start: Option<Instant>, stop: Option<Instant>) -> Option<Duration> {
    Some(stop?.duration_since(start?))
}

pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        let milli = elapsed.as_secs_f32() * 1000.;
        format!("{milli:.1}ms")
    } else if elapsed < Duration::from_secs(60) {
        let s = elapsed.as_secs_f32();
        format!("{s:.3}s")
    } else {
        let secs = elapsed.as_secs();
        let h = secs / 3600;
        let m = (secs / 60) % 60;
        let s = secs % 60;
        if h > 0 {
            format!("{h}h{m}m{s}s")
        } else {
            format!("{m}m{s}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_across_scales() {
        assert_eq!(format_elapsed(Duration::from_millis(12)), "12.0ms");
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42.000s");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "1m1s");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h2m3s");
    }
}
