//! Tracker configuration
//!
//! Every field carries a default, so a partial JSON document deserializes as
//! "merged over defaults":
//!
//! ```json
//! { "publisher": { "id": "1234" }, "tracking": { "timeUpdateInterval": 10 } }
//! ```

use crate::{Error, EventType, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default tracking endpoint
pub const DEFAULT_TRACK_URL: &str = "http://tracker.neon-images.com/v2/track";

/// Default player element attribute holding the video id
pub const DEFAULT_VIDEO_ID_ATTRIBUTE: &str = "data-video-id";

/// Default tracking type label
pub const DEFAULT_TRACKING_TYPE: &str = "BRIGHTCOVE";

/// Full tracker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    pub publisher: PublisherConfig,
    pub tracking: TrackingConfig,
    pub dev: DevConfig,
}

/// Publisher identity and video id extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherConfig {
    /// Publisher id, sent as `tai`
    pub id: Option<String>,
    /// Player element attribute holding the video id
    pub video_id_attribute: String,
    /// Optional pattern applied to the attribute value; first match is the id
    pub video_id_attribute_regex: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            id: None,
            video_id_attribute: DEFAULT_VIDEO_ID_ATTRIBUTE.to_string(),
            video_id_attribute_regex: None,
        }
    }
}

/// Tracking behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingConfig {
    /// Tracking endpoint receiving GET requests
    pub neon_api_url: Url,
    /// View-percent milestone interval
    pub time_update_interval: u32,
    /// Tracking type label, sent as `ttype`
    #[serde(rename = "type")]
    pub tracking_type: String,
    /// Canonical events that are reported
    pub events: Vec<EventType>,
    /// How long a session waits for a page-level aggregator
    pub wait_for_parent_millis: u64,
    /// Relationship between autoplay and a later genuine play
    pub autoplay_policy: AutoplayPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            neon_api_url: default_track_url(),
            time_update_interval: 25,
            tracking_type: DEFAULT_TRACKING_TYPE.to_string(),
            events: EventType::ALL.to_vec(),
            wait_for_parent_millis: 5000,
            autoplay_policy: AutoplayPolicy::default(),
        }
    }
}

fn default_track_url() -> Url {
    Url::parse(DEFAULT_TRACK_URL).expect("default tracking URL is valid")
}

/// Whether an autoplay and a later genuine play may both be reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    /// Both fire; the genuine play is reported even after an autoplay
    #[default]
    Independent,
    /// A genuine play of the autoplayed video is not reported again
    Exclusive,
}

/// Developer options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevConfig {
    /// Promote per-delivery diagnostics to info level
    pub show_console_logging: bool,
}

impl TrackerConfig {
    /// Parse a (possibly partial) JSON document over the defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check values that deserialization alone cannot
    pub fn validate(&self) -> Result<()> {
        if self.tracking.time_update_interval == 0 {
            return Err(Error::InvalidConfig(
                "tracking.timeUpdateInterval must be at least 1".into(),
            ));
        }
        if self.publisher.video_id_attribute.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "publisher.videoIdAttribute must not be empty".into(),
            ));
        }
        self.video_id_pattern()?;
        Ok(())
    }

    /// Compile the configured video id pattern, if any
    pub fn video_id_pattern(&self) -> Result<Option<Regex>> {
        self.publisher
            .video_id_attribute_regex
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| Error::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Set of reported event types
    pub fn tracked_events(&self) -> HashSet<EventType> {
        self.tracking.events.iter().copied().collect()
    }

    /// Aggregator wait budget
    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.tracking.wait_for_parent_millis)
    }
}
