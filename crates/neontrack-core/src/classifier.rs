//! Event classification
//!
//! Maps raw player events onto canonical tracking events. Raw names are
//! resolved once through an explicit alias table; the classifier then applies
//! the session-dependent suppression and once-only rules.

use crate::{
    ad_state::AdStateDetector,
    config::AutoplayPolicy,
    image::ImageDescriptorResolver,
    params::basename,
    percent::PercentTracker,
    session::SessionState,
    Error, EventType, ImageDescriptor, Player, Result, TrackerConfig, TrackingEvent,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Canonical handling a raw player event maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawEventKind {
    Play,
    TimeUpdate,
    PosterChange,
    ImageLoad,
    ImageView,
    ImageClick,
    AdStart,
}

/// Raw event names and the handling they alias to
const DEFAULT_ALIASES: [(&str, RawEventKind); 13] = [
    ("play", RawEventKind::Play),
    ("timeupdate", RawEventKind::TimeUpdate),
    ("posterchange", RawEventKind::PosterChange),
    ("image_load", RawEventKind::ImageLoad),
    ("image_view", RawEventKind::ImageView),
    ("image_click", RawEventKind::ImageClick),
    ("adstart", RawEventKind::AdStart),
    ("ads-ad-started", RawEventKind::AdStart),
    ("ad-play", RawEventKind::AdStart),
    ("ima3-started", RawEventKind::AdStart),
    ("adsready", RawEventKind::AdStart),
    ("ima3-ready", RawEventKind::AdStart),
    ("ads-pod-started", RawEventKind::AdStart),
];

/// Finite raw-event-name alias table
#[derive(Debug, Clone)]
pub struct EventRegistry {
    aliases: HashMap<String, RawEventKind>,
}

impl EventRegistry {
    /// Registry without any aliases
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, kind: RawEventKind) -> &mut Self {
        self.aliases.insert(name.into(), kind);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<RawEventKind> {
        self.aliases.get(name).copied()
    }

    /// Registered names, sorted, for subscribing on the player
    pub fn names(&self) -> Vec<(&str, RawEventKind)> {
        let mut names: Vec<_> = self
            .aliases
            .iter()
            .map(|(name, kind)| (name.as_str(), *kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(b.0));
        names
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (name, kind) in DEFAULT_ALIASES {
            registry.register(name, kind);
        }
        registry
    }
}

/// Data carried by a raw player event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPayload {
    /// Explicit images for image events
    pub images: Option<Vec<ImageDescriptor>>,
    /// Autoplay override for plays
    pub autoplay: Option<bool>,
    /// Pass-through fields merged into the event detail
    pub extra: Map<String, Value>,
}

impl EventPayload {
    pub fn with_images(images: Vec<ImageDescriptor>) -> Self {
        Self {
            images: Some(images),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Reads the video id from the player root element
#[derive(Debug, Clone)]
pub struct VideoIdExtractor {
    attribute: String,
    pattern: Option<Regex>,
}

impl VideoIdExtractor {
    pub fn new(attribute: impl Into<String>, pattern: Option<Regex>) -> Self {
        Self {
            attribute: attribute.into(),
            pattern,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Ok(Self::new(
            config.publisher.video_id_attribute.clone(),
            config.video_id_pattern()?,
        ))
    }

    pub fn extract(&self, player: &dyn Player) -> Result<String> {
        let value = player
            .attribute(&self.attribute)
            .ok_or_else(|| Error::MissingVideoIdAttribute {
                attribute: self.attribute.clone(),
            })?;

        match &self.pattern {
            None => Ok(value),
            Some(pattern) => pattern
                .find(&value)
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| Error::VideoIdPatternMismatch {
                    pattern: pattern.as_str().to_string(),
                    value,
                }),
        }
    }
}

/// Output of classifying one raw event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Canonical events, in delivery order
    pub events: Vec<TrackingEvent>,
    /// New current video id, when it changed
    pub video_changed: Option<String>,
}

impl Classification {
    fn push(&mut self, event: TrackingEvent) {
        self.events.push(event);
    }
}

/// Session-aware raw event classifier
#[derive(Debug, Clone)]
pub struct EventClassifier {
    extractor: VideoIdExtractor,
    percent: PercentTracker,
    autoplay_policy: AutoplayPolicy,
}

impl EventClassifier {
    pub fn new(extractor: VideoIdExtractor, percent: PercentTracker, autoplay_policy: AutoplayPolicy) -> Self {
        Self {
            extractor,
            percent,
            autoplay_policy,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Ok(Self::new(
            VideoIdExtractor::from_config(config)?,
            PercentTracker::new(config.tracking.time_update_interval),
            config.tracking.autoplay_policy,
        ))
    }

    /// Classify a raw event against the session. A configuration error
    /// leaves the session untouched.
    pub fn classify(
        &self,
        session: &mut SessionState,
        player: &dyn Player,
        kind: RawEventKind,
        payload: &EventPayload,
    ) -> Result<Classification> {
        let mut out = match kind {
            RawEventKind::PosterChange => self.on_poster(session, player, payload),
            RawEventKind::ImageLoad => Self::on_image(EventType::ImageLoad, player, payload),
            RawEventKind::ImageView => Self::on_image(EventType::ImageView, player, payload),
            RawEventKind::ImageClick => Self::on_image(EventType::ImageClick, player, payload),
            RawEventKind::Play => self.on_play(session, player, payload)?,
            RawEventKind::TimeUpdate => self.on_time_update(session, player)?,
            RawEventKind::AdStart => Self::on_ad_start(session),
        };

        if !payload.extra.is_empty() {
            out.events = out
                .events
                .into_iter()
                .map(|event| event.with_extra(&payload.extra))
                .collect();
        }

        debug!(
            kind = ?kind,
            events = out.events.len(),
            video_changed = ?out.video_changed,
            "Classified player event"
        );
        Ok(out)
    }

    fn on_poster(&self, session: &mut SessionState, player: &dyn Player, payload: &EventPayload) -> Classification {
        let mut out = Classification::default();
        let images = ImageDescriptorResolver::resolve(payload.images.as_deref(), player);
        if images.is_empty() {
            debug!("Poster not resolvable, impression not tracked");
            return out;
        }

        out.push(image_event(EventType::ImageLoad, images.clone()));
        out.push(image_event(EventType::ImageView, images.clone()));
        session.arm_click(images);
        out
    }

    fn on_image(event_type: EventType, player: &dyn Player, payload: &EventPayload) -> Classification {
        let mut out = Classification::default();
        let images = ImageDescriptorResolver::resolve(payload.images.as_deref(), player);
        if !images.is_empty() {
            out.push(image_event(event_type, images));
        }
        out
    }

    fn on_play(&self, session: &mut SessionState, player: &dyn Player, payload: &EventPayload) -> Result<Classification> {
        let mut out = Classification::default();

        if AdStateDetector::is_ad_playing(&player.class_name()) {
            // The click that started the ad still counts
            if let Some(images) = session.take_armed_click() {
                out.push(image_event(EventType::ImageClick, images));
            }
            debug!("Play during ad state suppressed");
            return Ok(out);
        }

        let video_id = self.extractor.extract(player)?;
        let armed = session.take_armed_click();
        if session.record_play(&video_id) {
            out.video_changed = Some(video_id.clone());
        }
        if let Some(images) = armed {
            out.push(image_event(EventType::ImageClick, images));
        }

        let suppressed = self.autoplay_policy == AutoplayPolicy::Exclusive
            && session.autoplayed_video_id() == Some(video_id.as_str());
        if suppressed {
            debug!(video_id = %video_id, "Play after autoplay suppressed");
        } else {
            let aplay = payload.autoplay.unwrap_or_else(|| player.autoplay());
            out.push(
                TrackingEvent::new(EventType::Play)
                    .with("aplay", aplay)
                    .with("adplay", session.has_ad_played()),
            );
        }
        Ok(out)
    }

    fn on_time_update(&self, session: &mut SessionState, player: &dyn Player) -> Result<Classification> {
        let mut out = Classification::default();

        if !session.has_played() && !AdStateDetector::is_ad_playing(&player.class_name()) {
            let video_id = self.extractor.extract(player)?;
            session.record_play(&video_id);
            session.mark_autoplayed(&video_id);
            out.video_changed = Some(video_id);
            out.push(
                TrackingEvent::new(EventType::Autoplay)
                    .with("aplay", true)
                    .with("adplay", session.has_ad_played()),
            );
        }

        if let Some(video_id) = session.current_video_id().map(str::to_string) {
            let crossed = self.percent.thresholds_crossed(
                &video_id,
                player.current_time(),
                player.duration(),
                session.ledger_mut(),
            );
            for percent in crossed {
                out.push(TrackingEvent::new(EventType::TimeUpdate).with("prcnt", percent));
            }
        }
        Ok(out)
    }

    fn on_ad_start(session: &mut SessionState) -> Classification {
        let mut out = Classification::default();
        if session.mark_ad_played() {
            out.push(TrackingEvent::new(EventType::AdPlay).with("aplay", false));
        }
        out
    }
}

fn image_event(event_type: EventType, images: Vec<ImageDescriptor>) -> TrackingEvent {
    let event = match event_type {
        EventType::ImageClick => {
            let bn = images.first().map(|image| basename(&image.url).to_string());
            TrackingEvent::new(event_type).with("bn", bn)
        }
        _ => TrackingEvent::new(event_type).with("bns", ImageDescriptorResolver::basenames_with_size(&images)),
    };
    event.with_images(images)
}
