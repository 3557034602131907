//! Player collaborator interface
//!
//! The tracker never owns the player. It reads playback position, poster
//! state and root element attributes through [`Player`] whenever an event
//! arrives.

use crate::ImageDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Read access to the instrumented player
pub trait Player: Send + Sync {
    /// Current playback position in seconds
    fn current_time(&self) -> f64;

    /// Content duration in seconds, if known
    fn duration(&self) -> Option<f64>;

    /// Poster image URL, if one is set
    fn poster_url(&self) -> Option<String>;

    /// Rendered poster size (width, height)
    fn poster_size(&self) -> Option<(u32, u32)>;

    /// Autoplay flag from the player options
    fn autoplay(&self) -> bool;

    /// Class list of the player root element
    fn class_name(&self) -> String;

    /// Attribute of the player root element
    fn attribute(&self, name: &str) -> Option<String>;

    /// Id of the player root element
    fn id(&self) -> Option<String>;
}

/// Observable player state held by [`ScriptedPlayer`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerSnapshot {
    pub id: Option<String>,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub poster: Option<ImageDescriptor>,
    pub autoplay: bool,
    pub class_name: String,
    pub attributes: HashMap<String, String>,
}

/// In-memory player whose state is driven by the caller
#[derive(Debug, Default)]
pub struct ScriptedPlayer {
    state: Mutex<PlayerSnapshot>,
}

impl ScriptedPlayer {
    pub fn new(snapshot: PlayerSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Player with the video id attribute set
    pub fn with_video_id(attribute: &str, video_id: &str) -> Self {
        let mut snapshot = PlayerSnapshot::default();
        snapshot
            .attributes
            .insert(attribute.to_string(), video_id.to_string());
        Self::new(snapshot)
    }

    fn state(&self) -> MutexGuard<'_, PlayerSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the player state in place
    pub fn update(&self, f: impl FnOnce(&mut PlayerSnapshot)) {
        f(&mut self.state());
    }

    pub fn set_current_time(&self, seconds: f64) {
        self.state().current_time = seconds;
    }

    pub fn set_duration(&self, seconds: Option<f64>) {
        self.state().duration = seconds;
    }

    pub fn set_class_name(&self, class_name: impl Into<String>) {
        self.state().class_name = class_name.into();
    }

    pub fn set_poster(&self, poster: Option<ImageDescriptor>) {
        self.state().poster = poster;
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<String>) {
        self.state().attributes.insert(name.into(), value.into());
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.state().clone()
    }
}

impl Player for ScriptedPlayer {
    fn current_time(&self) -> f64 {
        self.state().current_time
    }

    fn duration(&self) -> Option<f64> {
        self.state().duration
    }

    fn poster_url(&self) -> Option<String> {
        self.state().poster.as_ref().map(|p| p.url.clone())
    }

    fn poster_size(&self) -> Option<(u32, u32)> {
        self.state().poster.as_ref().map(|p| (p.width, p.height))
    }

    fn autoplay(&self) -> bool {
        self.state().autoplay
    }

    fn class_name(&self) -> String {
        self.state().class_name.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.state().attributes.get(name).cloned()
    }

    fn id(&self) -> Option<String> {
        self.state().id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_player_reflects_updates() {
        let player = ScriptedPlayer::with_video_id("data-video-id", "abc-123");
        assert_eq!(player.attribute("data-video-id").as_deref(), Some("abc-123"));
        assert_eq!(player.poster_url(), None);

        player.set_poster(Some(ImageDescriptor::new("http://x/p.jpg", 640, 360)));
        player.set_current_time(12.5);
        player.update(|s| s.autoplay = true);

        assert_eq!(player.poster_size(), Some((640, 360)));
        assert_eq!(player.current_time(), 12.5);
        assert!(player.autoplay());
    }
}
