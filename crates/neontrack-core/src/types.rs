//! Core types for the tracking engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// =============================================================================
// Tracking Events
// =============================================================================

/// Canonical tracking event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// Poster or thumbnail loaded into the player
    ImageLoad,
    /// Poster or thumbnail became visible
    ImageView,
    /// Poster or thumbnail was clicked to start playback
    ImageClick,
    /// Playback started without a play event
    Autoplay,
    /// Content playback started
    Play,
    /// First advertisement started
    AdPlay,
    /// View-percent milestone crossed
    TimeUpdate,
}

impl EventType {
    /// Every canonical event type, in reporting order
    pub const ALL: [EventType; 7] = [
        EventType::ImageLoad,
        EventType::ImageView,
        EventType::ImageClick,
        EventType::Autoplay,
        EventType::Play,
        EventType::AdPlay,
        EventType::TimeUpdate,
    ];

    /// Short action code sent as the `a` parameter
    pub fn action_code(&self) -> &'static str {
        match self {
            EventType::ImageLoad => "il",
            EventType::ImageView => "iv",
            EventType::ImageClick => "ic",
            EventType::Autoplay | EventType::Play => "vp",
            EventType::AdPlay => "ap",
            EventType::TimeUpdate => "vvp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ImageLoad => "imageLoad",
            EventType::ImageView => "imageView",
            EventType::ImageClick => "imageClick",
            EventType::Autoplay => "autoplay",
            EventType::Play => "play",
            EventType::AdPlay => "adPlay",
            EventType::TimeUpdate => "timeUpdate",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image attributed to an image event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl ImageDescriptor {
    pub fn new(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
        }
    }
}

/// Event produced by the classifier and consumed by the delivery router
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingEvent {
    pub event_type: EventType,
    /// Event-specific parameters, merged last into the outbound set
    pub detail: Map<String, Value>,
    /// Images the event is attributed to (image events only)
    pub images: Vec<ImageDescriptor>,
}

impl TrackingEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            detail: Map::new(),
            images: Vec::new(),
        }
    }

    /// Add a detail field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    pub fn with_images(mut self, images: Vec<ImageDescriptor>) -> Self {
        self.images = images;
        self
    }

    /// Merge pass-through fields; existing keys are overridden
    pub fn with_extra(mut self, extra: &Map<String, Value>) -> Self {
        for (key, value) in extra {
            self.detail.insert(key.clone(), value.clone());
        }
        self
    }
}

// =============================================================================
// Page Identity
// =============================================================================

/// Identity of the page a session runs on, fixed at session creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageIdentity {
    /// 16 hex character page load id
    pub page_load_id: String,
    pub page_url: String,
    pub referrer_url: Option<String>,
    pub publisher_id: Option<String>,
    pub tracking_type: String,
}

impl PageIdentity {
    /// Generate a fresh page load id
    pub fn generate_page_load_id() -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(16);
        id
    }
}

/// Host page location handed to the tracker on ready
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    #[serde(default)]
    pub referrer: Option<String>,
}

impl PageContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            referrer: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}
