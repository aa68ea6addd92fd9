//! Per-worker render statistics.
//!
//! Workers push one `RENDER_STATS` record per stats interval while
//! rendering. The coordinator keeps the full history (it ends up in the
//! per-worker CSV) and answers windowed queries over the most recent
//! intervals for the interest detector.

use std::io::{self, Write};

/// One stats interval: `{progress: f32, produced/killed/queued: u64}`,
/// all little-endian on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderStats {
    /// Fraction of the assigned tile completed, in `[0, 1]`.
    pub progress: f32,
    pub rays_produced: u64,
    pub rays_killed: u64,
    pub rays_queued: u64,
}

pub const STATS_WIRE_SIZE: usize = 28;

impl RenderStats {
    pub fn to_le_bytes(&self) -> [u8; STATS_WIRE_SIZE] {
        let mut out = [0u8; STATS_WIRE_SIZE];
        out[..4].copy_from_slice(&self.progress.to_le_bytes());
        out[4..12].copy_from_slice(&self.rays_produced.to_le_bytes());
        out[12..20].copy_from_slice(&self.rays_killed.to_le_bytes());
        out[20..].copy_from_slice(&self.rays_queued.to_le_bytes());
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != STATS_WIRE_SIZE {
            return None;
        }
        Some(Self {
            progress: f32::from_le_bytes(bytes[..4].try_into().unwrap()),
            rays_produced: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            rays_killed: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
            rays_queued: u64::from_le_bytes(bytes[20..].try_into().unwrap()),
        })
    }

    /// Whether any ray counter moved this interval.
    pub fn is_active(&self) -> bool {
        self.rays_produced != 0 || self.rays_killed != 0 || self.rays_queued != 0
    }
}

/// The full stats history of one worker, newest last.
#[derive(Debug, Default)]
pub struct StatsHistory {
    intervals: Vec<RenderStats>,
}

impl StatsHistory {
    pub fn record(&mut self, stats: RenderStats) {
        self.intervals.push(stats);
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Latest reported progress, 0 before the first interval arrives.
    pub fn progress(&self) -> f32 {
        self.intervals.last().map_or(0.0, |s| s.progress)
    }

    fn window(&self, intervals: u32) -> &[RenderStats] {
        let n = self.intervals.len().saturating_sub(intervals as usize);
        &self.intervals[n..]
    }

    /// A worker is interesting iff any ray counter was non-zero somewhere
    /// in its last `intervals` stats intervals.
    pub fn is_interesting(&self, intervals: u32) -> bool {
        self.window(intervals).iter().any(RenderStats::is_active)
    }

    pub fn rays_produced(&self, intervals: u32) -> u64 {
        self.window(intervals).iter().map(|s| s.rays_produced).sum()
    }

    pub fn rays_killed(&self, intervals: u32) -> u64 {
        self.window(intervals).iter().map(|s| s.rays_killed).sum()
    }

    pub fn rays_queued(&self, intervals: u32) -> u64 {
        self.window(intervals).iter().map(|s| s.rays_queued).sum()
    }

    /// Dump the whole history, one row per interval.
    pub fn write_csv(&self, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "interval,progress,rays_produced,rays_killed,rays_queued")?;
        for (i, s) in self.intervals.iter().enumerate() {
            writeln!(
                out,
                "{},{},{},{},{}",
                i, s.progress, s.rays_produced, s.rays_killed, s.rays_queued
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(progress: f32, produced: u64) -> RenderStats {
        RenderStats {
            progress,
            rays_produced: produced,
            ..Default::default()
        }
    }

    #[test]
    fn wire_roundtrip() {
        let s = RenderStats {
            progress: 0.625,
            rays_produced: 10,
            rays_killed: u64::MAX,
            rays_queued: 3,
        };
        assert_eq!(RenderStats::from_le_bytes(&s.to_le_bytes()), Some(s));
        assert_eq!(RenderStats::from_le_bytes(&[0u8; 27]), None);
    }

    #[test]
    fn interest_looks_at_the_window_only() {
        let mut h = StatsHistory::default();
        assert!(!h.is_interesting(3));

        h.record(active(0.1, 50));
        h.record(active(0.2, 0));
        h.record(active(0.2, 0));
        assert!(h.is_interesting(3));

        h.record(active(0.2, 0));
        // The active interval has slid out of the window.
        assert!(!h.is_interesting(3));
        assert!(h.is_interesting(4));
    }

    #[test]
    fn windowed_sums() {
        let mut h = StatsHistory::default();
        h.record(active(0.1, 5));
        h.record(active(0.2, 7));
        h.record(active(0.3, 11));
        assert_eq!(h.rays_produced(2), 18);
        assert_eq!(h.rays_produced(100), 23);
        assert_eq!(h.progress(), 0.3);
    }

    #[test]
    fn csv_has_one_row_per_interval() {
        let mut h = StatsHistory::default();
        h.record(active(0.5, 2));
        h.record(active(1.0, 0));

        let mut out = Vec::new();
        h.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "0,0.5,2,0,0");
        assert_eq!(lines[2], "1,1,0,0,0");
    }
}
