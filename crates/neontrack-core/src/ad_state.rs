//! Ad playback detection from the player root element's class list

/// Class tokens set on the player root while an ad renders
const AD_STATE_CLASSES: [&str; 2] = ["vjs-ad-playing", "vjs-ad-loading"];

/// Stateless predicate over the player's current class list
#[derive(Debug, Clone, Copy, Default)]
pub struct AdStateDetector;

impl AdStateDetector {
    /// True when a whole class token marks ad playback or loading
    pub fn is_ad_playing(class_name: &str) -> bool {
        class_name
            .split_ascii_whitespace()
            .any(|token| AD_STATE_CLASSES.contains(&token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_match() {
        assert!(AdStateDetector::is_ad_playing("video-js vjs-ad-playing"));
        assert!(AdStateDetector::is_ad_playing("vjs-ad-loading"));
        assert!(AdStateDetector::is_ad_playing("a\tvjs-ad-loading\nb"));
    }

    #[test]
    fn test_substring_is_not_a_match() {
        assert!(!AdStateDetector::is_ad_playing("video-js vjs-ad-playing-done"));
        assert!(!AdStateDetector::is_ad_playing("xvjs-ad-loading"));
        assert!(!AdStateDetector::is_ad_playing("vjs-playing vjs-has-started"));
        assert!(!AdStateDetector::is_ad_playing(""));
    }
}
