//! Tracking Session - per-player record of what has been reported
//!
//! One session exists per player instance, created on player-ready. It is
//! mutated only by the classifier while handling a single event.

use crate::{percent::PercentLedger, Aggregator, ImageDescriptor, PageIdentity};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Mutable per-player session record
pub struct SessionState {
    /// Fixed page identity
    page: PageIdentity,
    /// Id of the player element, if it has one
    player_id: Option<String>,
    /// When the session was created
    ready_at: Instant,
    /// Video attributed to playback events
    current_video_id: Option<String>,
    /// Distinct videos in first-seen order
    played_video_ids: Vec<String>,
    /// Reported view-percent thresholds
    percent_ledger: PercentLedger,
    /// Latched on the first ad play
    has_ad_played: bool,
    /// Video whose first play was classified as autoplay
    autoplayed_video_id: Option<String>,
    /// Images awaiting a click, armed by a poster impression
    armed_click: Option<Vec<ImageDescriptor>>,
    /// Page-level aggregator, once discovered
    aggregator: Option<Weak<dyn Aggregator>>,
}

impl SessionState {
    pub fn new(page: PageIdentity, ready_at: Instant) -> Self {
        Self {
            page,
            player_id: None,
            ready_at,
            current_video_id: None,
            played_video_ids: Vec::new(),
            percent_ledger: PercentLedger::new(),
            has_ad_played: false,
            autoplayed_video_id: None,
            armed_click: None,
            aggregator: None,
        }
    }

    pub fn with_player_id(mut self, player_id: Option<String>) -> Self {
        self.player_id = player_id;
        self
    }

    pub fn page(&self) -> &PageIdentity {
        &self.page
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    pub fn current_video_id(&self) -> Option<&str> {
        self.current_video_id.as_deref()
    }

    pub fn played_video_ids(&self) -> &[String] {
        &self.played_video_ids
    }

    pub fn has_played(&self) -> bool {
        !self.played_video_ids.is_empty()
    }

    pub fn has_ad_played(&self) -> bool {
        self.has_ad_played
    }

    pub fn ledger(&self) -> &PercentLedger {
        &self.percent_ledger
    }

    pub fn ledger_mut(&mut self) -> &mut PercentLedger {
        &mut self.percent_ledger
    }

    /// Attribute playback to `video_id`. Returns true when the current
    /// video changed.
    pub fn record_play(&mut self, video_id: &str) -> bool {
        if !self.played_video_ids.iter().any(|id| id == video_id) {
            self.played_video_ids.push(video_id.to_string());
            self.percent_ledger.ensure_video(video_id);
        }
        let changed = self.current_video_id.as_deref() != Some(video_id);
        self.current_video_id = Some(video_id.to_string());
        changed
    }

    /// 1-based position of the current video in first-seen order
    pub fn play_count(&self) -> Option<usize> {
        let current = self.current_video_id.as_deref()?;
        self.played_video_ids
            .iter()
            .position(|id| id == current)
            .map(|idx| idx + 1)
    }

    /// Latch the ad-played flag. Returns true only on the first call.
    pub fn mark_ad_played(&mut self) -> bool {
        let first = !self.has_ad_played;
        self.has_ad_played = true;
        first
    }

    pub fn mark_autoplayed(&mut self, video_id: &str) {
        self.autoplayed_video_id = Some(video_id.to_string());
    }

    pub fn autoplayed_video_id(&self) -> Option<&str> {
        self.autoplayed_video_id.as_deref()
    }

    /// Arm the one-shot "next play is a click" listener
    pub fn arm_click(&mut self, images: Vec<ImageDescriptor>) {
        self.armed_click = Some(images);
    }

    pub fn take_armed_click(&mut self) -> Option<Vec<ImageDescriptor>> {
        self.armed_click.take()
    }

    pub fn is_click_armed(&self) -> bool {
        self.armed_click.is_some()
    }

    /// Cached aggregator, if it is still alive
    pub fn aggregator(&self) -> Option<Arc<dyn Aggregator>> {
        self.aggregator.as_ref().and_then(Weak::upgrade)
    }

    pub fn remember_aggregator(&mut self, aggregator: &Arc<dyn Aggregator>) {
        self.aggregator = Some(Arc::downgrade(aggregator));
    }

    /// Attribution data needed to assemble outbound parameters
    pub fn attribution(&self) -> Attribution {
        Attribution {
            page: self.page.clone(),
            player_id: self.player_id.clone(),
            video_id: self.current_video_id.clone(),
            play_count: self.play_count(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let ledger = self
            .played_video_ids
            .iter()
            .map(|id| (id.clone(), self.percent_ledger.reported(id)))
            .collect();
        SessionSnapshot {
            page: self.page.clone(),
            current_video_id: self.current_video_id.clone(),
            played_video_ids: self.played_video_ids.clone(),
            percent_ledger: ledger,
            has_ad_played: self.has_ad_played,
            click_armed: self.armed_click.is_some(),
        }
    }
}

/// Attribution of an event at delivery time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub page: PageIdentity,
    pub player_id: Option<String>,
    pub video_id: Option<String>,
    pub play_count: Option<usize>,
}

/// Read-only view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub page: PageIdentity,
    pub current_video_id: Option<String>,
    pub played_video_ids: Vec<String>,
    pub percent_ledger: Vec<(String, Vec<u32>)>,
    pub has_ad_played: bool,
    pub click_armed: bool,
}
