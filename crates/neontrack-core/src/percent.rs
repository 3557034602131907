//! View-percent milestone detection

use std::collections::{BTreeSet, HashMap};

/// Thresholds already reported, per video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PercentLedger {
    reported: HashMap<String, BTreeSet<u32>>,
}

impl PercentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a video if it has none
    pub fn ensure_video(&mut self, video_id: &str) {
        self.reported.entry(video_id.to_string()).or_default();
    }

    pub fn contains(&self, video_id: &str, percent: u32) -> bool {
        self.reported
            .get(video_id)
            .is_some_and(|set| set.contains(&percent))
    }

    /// Record a threshold; false if it was already present
    pub fn insert(&mut self, video_id: &str, percent: u32) -> bool {
        self.reported
            .entry(video_id.to_string())
            .or_default()
            .insert(percent)
    }

    /// Reported thresholds for a video, ascending
    pub fn reported(&self, video_id: &str) -> Vec<u32> {
        self.reported
            .get(video_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_video(&self, video_id: &str) -> bool {
        self.reported.contains_key(video_id)
    }
}

/// Percent of the video played, rounded the way the backend expects.
/// `None` when the duration is unknown, zero or not finite.
pub fn percent_played(current_time: f64, duration: Option<f64>) -> Option<u32> {
    let duration = duration?.round();
    let current = current_time.round();
    if !duration.is_finite() || duration <= 0.0 || !current.is_finite() {
        return None;
    }
    let played = (current / duration * 100.0).round();
    Some(played.max(0.0) as u32)
}

/// Per-video monotonic threshold-crossing detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentTracker {
    interval: u32,
}

impl PercentTracker {
    /// Interval is clamped to at most 100
    pub fn new(interval_percent: u32) -> Self {
        Self {
            interval: interval_percent.min(100),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Newly crossed thresholds, ascending, recorded into `ledger`
    pub fn thresholds_crossed(
        &self,
        video_id: &str,
        current_time: f64,
        duration: Option<f64>,
        ledger: &mut PercentLedger,
    ) -> Vec<u32> {
        let Some(played) = percent_played(current_time, duration) else {
            return Vec::new();
        };
        if self.interval == 0 {
            return Vec::new();
        }

        let mut crossed = Vec::new();
        let mut percent = self.interval;
        while percent <= 100 {
            if played >= percent && ledger.insert(video_id, percent) {
                crossed.push(percent);
            }
            percent += self.interval;
        }
        crossed
    }
}
