//! Page-level aggregator shared by the players of one page
//!
//! Sessions never own the aggregator. They look it up through an
//! [`AggregatorLocator`] on each delivery attempt until one is found.

use crate::AggregatorError;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Reporting coordinator shared by every player on a page
pub trait Aggregator: Send + Sync {
    /// Register a video played on the page
    fn add_video_id(&self, video_id: &str) -> Result<(), AggregatorError>;

    /// Page load id shared by all players on the page
    fn page_load_id(&self) -> Option<String>;

    fn send_image_loaded(&self, base_url: &str, width: u32, height: u32) -> Result<(), AggregatorError>;

    fn send_image_visible(&self, base_url: &str) -> Result<(), AggregatorError>;

    fn send_image_clicked(&self, base_url: &str, video_id: Option<&str>) -> Result<(), AggregatorError>;
}

/// Lazy discovery of the page aggregator
pub trait AggregatorLocator: Send + Sync {
    fn locate(&self) -> Option<Arc<dyn Aggregator>>;
}

/// Slot an aggregator is installed into once the page creates it
#[derive(Default)]
pub struct AggregatorSlot {
    current: RwLock<Option<Arc<dyn Aggregator>>>,
}

static GLOBAL_SLOT: OnceLock<AggregatorSlot> = OnceLock::new();

impl AggregatorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The well-known page-wide binding
    pub fn global() -> &'static AggregatorSlot {
        GLOBAL_SLOT.get_or_init(AggregatorSlot::new)
    }

    pub fn install(&self, aggregator: Arc<dyn Aggregator>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(aggregator);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl AggregatorLocator for AggregatorSlot {
    fn locate(&self) -> Option<Arc<dyn Aggregator>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Locator bound to [`AggregatorSlot::global`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalAggregator;

impl AggregatorLocator for GlobalAggregator {
    fn locate(&self) -> Option<Arc<dyn Aggregator>> {
        AggregatorSlot::global().locate()
    }
}

/// Locator that never finds an aggregator
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAggregator;

impl AggregatorLocator for NoAggregator {
    fn locate(&self) -> Option<Arc<dyn Aggregator>> {
        None
    }
}

/// Call received by a [`RecordingAggregator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum AggregatorCall {
    AddVideoId { video_id: String },
    ImageLoaded { base_url: String, width: u32, height: u32 },
    ImageVisible { base_url: String },
    ImageClicked { base_url: String, video_id: Option<String> },
}

/// In-memory aggregator that records every call
#[derive(Default)]
pub struct RecordingAggregator {
    page_load_id: Option<String>,
    calls: Mutex<Vec<AggregatorCall>>,
    failing: HashSet<&'static str>,
}

impl RecordingAggregator {
    pub fn new(page_load_id: Option<String>) -> Self {
        Self {
            page_load_id,
            ..Default::default()
        }
    }

    /// Make a method return an error (`addVideoId`, `sendImageLoaded`, ...)
    pub fn failing_on(mut self, method: &'static str) -> Self {
        self.failing.insert(method);
        self
    }

    pub fn calls(&self) -> Vec<AggregatorCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, method: &'static str, call: AggregatorCall) -> Result<(), AggregatorError> {
        if self.failing.contains(method) {
            return Err(AggregatorError::new(method, "rejected"));
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

impl Aggregator for RecordingAggregator {
    fn add_video_id(&self, video_id: &str) -> Result<(), AggregatorError> {
        self.record(
            "addVideoId",
            AggregatorCall::AddVideoId {
                video_id: video_id.to_string(),
            },
        )
    }

    fn page_load_id(&self) -> Option<String> {
        self.page_load_id.clone()
    }

    fn send_image_loaded(&self, base_url: &str, width: u32, height: u32) -> Result<(), AggregatorError> {
        self.record(
            "sendImageLoaded",
            AggregatorCall::ImageLoaded {
                base_url: base_url.to_string(),
                width,
                height,
            },
        )
    }

    fn send_image_visible(&self, base_url: &str) -> Result<(), AggregatorError> {
        self.record(
            "sendImageVisible",
            AggregatorCall::ImageVisible {
                base_url: base_url.to_string(),
            },
        )
    }

    fn send_image_clicked(&self, base_url: &str, video_id: Option<&str>) -> Result<(), AggregatorError> {
        self.record(
            "sendImageClicked",
            AggregatorCall::ImageClicked {
                base_url: base_url.to_string(),
                video_id: video_id.map(str::to_string),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_install_and_clear() {
        let slot = AggregatorSlot::new();
        assert!(slot.locate().is_none());

        slot.install(Arc::new(RecordingAggregator::new(Some("feedbeef".into()))));
        let found = slot.locate().unwrap();
        assert_eq!(found.page_load_id().as_deref(), Some("feedbeef"));

        slot.clear();
        assert!(slot.locate().is_none());
    }

    #[test]
    fn test_recording_aggregator_failure() {
        let aggregator = RecordingAggregator::new(None).failing_on("sendImageVisible");
        assert!(aggregator.send_image_visible("http://x/p.jpg").is_err());
        assert!(aggregator.send_image_loaded("http://x/p.jpg", 1, 2).is_ok());
        assert_eq!(aggregator.calls().len(), 1);
    }
}
