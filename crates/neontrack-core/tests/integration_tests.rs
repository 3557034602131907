//! Integration tests for Neontrack Core

use neontrack_core::{
    AggregatorCall, AggregatorSlot, DeliveryOutcome, Error, EventPayload, EventType, ImageDescriptor,
    ManualTimer, MemoryTransport, NoAggregator, PageContext, PlayerSnapshot, RecordingAggregator,
    ScriptedPlayer, Tracker, TrackerConfig, ALLOWED_PARAMS,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Page {
    tracker: Tracker,
    player: Arc<ScriptedPlayer>,
    transport: Arc<MemoryTransport>,
    timer: Arc<ManualTimer>,
}

fn config(json: &str) -> TrackerConfig {
    TrackerConfig::from_json_str(json).unwrap()
}

fn immediate() -> TrackerConfig {
    config(r#"{"publisher": {"id": "pub-42"}, "tracking": {"waitForParentMillis": 0}}"#)
}

fn player(video_id: &str) -> Arc<ScriptedPlayer> {
    let mut attributes = HashMap::new();
    attributes.insert("data-video-id".to_string(), video_id.to_string());
    Arc::new(ScriptedPlayer::new(PlayerSnapshot {
        id: Some("player-1".into()),
        duration: Some(100.0),
        attributes,
        ..Default::default()
    }))
}

fn page_with(config: TrackerConfig, player: Arc<ScriptedPlayer>, slot: Option<Arc<AggregatorSlot>>) -> Page {
    let transport = Arc::new(MemoryTransport::new());
    let timer = Arc::new(ManualTimer::new());
    let mut builder = Tracker::builder(player.clone(), config)
        .page(PageContext::new("http://publisher.example.com/videos").with_referrer("http://google.com/"))
        .transport(transport.clone())
        .timer(timer.clone());
    builder = match slot {
        Some(slot) => builder.aggregator_locator(slot),
        None => builder.aggregator_locator(Arc::new(NoAggregator)),
    };
    Page {
        tracker: builder.build().unwrap(),
        player,
        transport,
        timer,
    }
}

fn time_update(page: &Page, seconds: f64) -> Vec<String> {
    page.player.set_current_time(seconds);
    page.tracker.handle("timeupdate", EventPayload::default()).unwrap();
    page.transport
        .take()
        .iter()
        .filter_map(|r| r.param("prcnt").map(str::to_string))
        .collect()
}

// =============================================================================
// View Percent Tests
// =============================================================================

#[test]
fn test_percent_milestones_catch_up_in_order() {
    let page = page_with(immediate(), player("vid-1"), None);
    page.tracker.handle("play", EventPayload::default()).unwrap();
    page.transport.take();

    assert!(time_update(&page, 10.0).is_empty());
    assert_eq!(time_update(&page, 30.0), vec!["25"]);
    assert_eq!(time_update(&page, 80.0), vec!["50", "75"]);
    assert_eq!(time_update(&page, 96.0), Vec::<String>::new());
    assert_eq!(time_update(&page, 100.0), vec!["100"]);
    assert!(time_update(&page, 100.0).is_empty());

    let snapshot = page.tracker.snapshot();
    assert_eq!(
        snapshot.percent_ledger,
        vec![("vid-1".to_string(), vec![25, 50, 75, 100])]
    );
}

#[test]
fn test_percent_ledger_is_per_video() {
    let page = page_with(immediate(), player("vid-1"), None);
    page.tracker.handle("play", EventPayload::default()).unwrap();
    assert_eq!(time_update(&page, 50.0), vec!["25", "50"]);

    page.player.set_attribute("data-video-id", "vid-2");
    page.player.set_current_time(0.0);
    page.tracker.handle("play", EventPayload::default()).unwrap();
    let play = page.transport.take();
    assert_eq!(play[0].param("pcount"), Some("2"));
    assert_eq!(play[0].param("vid"), Some("vid-2"));

    assert_eq!(time_update(&page, 60.0), vec!["25", "50"]);
}

#[test]
fn test_unknown_duration_reports_nothing() {
    let page = page_with(immediate(), player("vid-1"), None);
    page.player.set_duration(None);
    page.tracker.handle("play", EventPayload::default()).unwrap();
    page.transport.take();
    assert!(time_update(&page, 50.0).is_empty());
}

// =============================================================================
// Play / Autoplay / Ad Tests
// =============================================================================

#[test]
fn test_play_during_ad_never_attributed() {
    let page = page_with(immediate(), player("vid-1"), None);
    page.player.set_class_name("video-js vjs-ad-loading");

    let outcome = page.tracker.handle("play", EventPayload::default()).unwrap();
    assert!(outcome.deliveries.is_empty());
    let snapshot = page.tracker.snapshot();
    assert!(snapshot.played_video_ids.is_empty());
    assert_eq!(snapshot.current_video_id, None);
    assert!(page.transport.requests().is_empty());
}

#[test]
fn test_ad_aliases_latch_once() {
    let page = page_with(immediate(), player("vid-1"), None);
    for name in ["adstart", "ads-ad-started", "ima3-started", "adsready", "ad-play"] {
        page.tracker.handle(name, EventPayload::default()).unwrap();
    }
    assert_eq!(page.transport.actions(), vec!["ap"]);
    assert!(page.tracker.snapshot().has_ad_played);

    page.tracker.handle("play", EventPayload::default()).unwrap();
    let requests = page.transport.take();
    assert_eq!(requests.last().unwrap().param("a"), Some("vp"));
}

#[test]
fn test_autoplay_then_play_counts_once() {
    let page = page_with(immediate(), player("vid-1"), None);
    page.player.set_current_time(1.0);
    let outcome = page.tracker.handle("timeupdate", EventPayload::default()).unwrap();
    assert_eq!(outcome.event_types(), vec![EventType::Autoplay]);

    let autoplay = page.transport.take();
    assert_eq!(autoplay[0].param("a"), Some("vp"));
    assert_eq!(autoplay[0].param("aplay"), Some("true"));
    assert_eq!(autoplay[0].param("pcount"), Some("1"));

    page.tracker.handle("play", EventPayload::default()).unwrap();
    assert_eq!(page.tracker.snapshot().played_video_ids, vec!["vid-1".to_string()]);

    // A later time update is never a second autoplay
    let later = page.tracker.handle("timeupdate", EventPayload::default()).unwrap();
    assert!(!later.event_types().contains(&EventType::Autoplay));
}

#[test]
fn test_exclusive_autoplay_suppresses_genuine_play() {
    let page = page_with(
        config(r#"{"tracking": {"waitForParentMillis": 0, "autoplayPolicy": "exclusive"}}"#),
        player("vid-1"),
        None,
    );
    page.tracker.handle("timeupdate", EventPayload::default()).unwrap();
    let outcome = page.tracker.handle("play", EventPayload::default()).unwrap();
    assert!(outcome.deliveries.is_empty());
    assert_eq!(page.transport.actions(), vec!["vp"]);
}

// =============================================================================
// Video Id Extraction Tests
// =============================================================================

#[test]
fn test_video_id_extraction_patterns() {
    let plain = page_with(immediate(), player("abc-123"), None);
    plain.tracker.handle("play", EventPayload::default()).unwrap();
    assert_eq!(plain.transport.requests()[0].param("vid"), Some("abc-123"));

    let letters = page_with(
        config(r#"{"publisher": {"videoIdAttributeRegex": "^[a-z]+"}, "tracking": {"waitForParentMillis": 0}}"#),
        player("abc-123"),
        None,
    );
    letters.tracker.handle("play", EventPayload::default()).unwrap();
    assert_eq!(letters.transport.requests()[0].param("vid"), Some("abc"));

    let digits = page_with(
        config(r#"{"publisher": {"videoIdAttributeRegex": "^[0-9]+"}, "tracking": {"waitForParentMillis": 0}}"#),
        player("abc-123"),
        None,
    );
    let err = digits.tracker.handle("play", EventPayload::default()).unwrap_err();
    assert!(matches!(err, Error::VideoIdPatternMismatch { .. }));
    assert!(err.is_configuration_error());
    assert!(digits.transport.requests().is_empty());
    assert!(digits.tracker.snapshot().played_video_ids.is_empty());
}

#[test]
fn test_custom_video_id_attribute() {
    let player = player("ignored");
    player.set_attribute("data-bc-id", "bc-777");
    let page = page_with(
        config(r#"{"publisher": {"videoIdAttribute": "data-bc-id"}, "tracking": {"waitForParentMillis": 0}}"#),
        player,
        None,
    );
    page.tracker.handle("play", EventPayload::default()).unwrap();
    assert_eq!(page.transport.requests()[0].param("vid"), Some("bc-777"));
}

// =============================================================================
// Outbound Parameter Tests
// =============================================================================

#[test]
fn test_outbound_params_stay_in_allowlist() {
    let page = page_with(immediate(), player("vid-1"), None);
    let payload = EventPayload::default()
        .with_extra("adelta", 1500)
        .with_extra("secret", "x")
        .with_extra("debug", true);
    page.tracker.handle("play", payload).unwrap();

    let request = &page.transport.requests()[0];
    for (key, _) in &request.params {
        assert!(ALLOWED_PARAMS.contains(&key.as_str()), "unexpected key {key}");
    }
    assert_eq!(request.param("adelta"), Some("1500"));
    assert_eq!(request.param("tai"), Some("pub-42"));
    assert_eq!(request.param("ttype"), Some("BRIGHTCOVE"));
    assert_eq!(request.param("page"), Some("http://publisher.example.com/videos"));
    assert_eq!(request.param("ref"), Some("http://google.com/"));
    assert_eq!(request.param("playerId"), Some("player-1"));
    assert_eq!(request.param("pageid").map(str::len), Some(16));
}

#[test]
fn test_poster_impression_and_click() {
    let player = player("vid-1");
    player.set_poster(Some(ImageDescriptor::new(
        "http://cdn.example.com/thumbs/neontn_abc.jpg?h=360",
        640,
        360,
    )));
    let page = page_with(immediate(), player, None);
    assert_eq!(page.transport.actions(), vec!["il", "iv"]);
    assert_eq!(
        page.transport.requests()[0].param("bns"),
        Some("neontn_abc 640 360")
    );
    page.transport.take();

    page.tracker.handle("play", EventPayload::default()).unwrap();
    let requests = page.transport.take();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].param("a"), Some("ic"));
    assert_eq!(requests[0].param("bn"), Some("neontn_abc"));
    assert_eq!(requests[0].param("vid"), Some("vid-1"));
    assert_eq!(requests[1].param("a"), Some("vp"));
}

#[test]
fn test_poster_change_mid_session_rearms_click() {
    let page = page_with(immediate(), player("vid-1"), None);
    page.tracker.handle("play", EventPayload::default()).unwrap();
    assert_eq!(page.transport.actions(), vec!["vp"]);
    page.transport.take();

    page.player.set_poster(Some(ImageDescriptor::new(
        "http://cdn.example.com/thumbs/next.jpg",
        320,
        180,
    )));
    let outcome = page.tracker.handle("posterchange", EventPayload::default()).unwrap();
    assert_eq!(outcome.event_types(), vec![EventType::ImageLoad, EventType::ImageView]);
    let impressions = page.transport.take();
    assert_eq!(impressions[0].param("bns"), Some("next 320 180"));
    assert_eq!(impressions[1].param("a"), Some("iv"));

    page.tracker.handle("play", EventPayload::default()).unwrap();
    let requests = page.transport.take();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].param("a"), Some("ic"));
    assert_eq!(requests[0].param("bn"), Some("next"));
    assert_eq!(requests[1].param("a"), Some("vp"));
    assert_eq!(requests[1].param("pcount"), Some("1"));
}

// =============================================================================
// Delivery Routing Tests
// =============================================================================

#[test]
fn test_wait_for_aggregator_then_direct_send() {
    let page = page_with(config(r#"{"tracking": {"waitForParentMillis": 5000}}"#), player("vid-1"), None);

    let outcome = page.tracker.handle("adstart", EventPayload::default()).unwrap();
    assert_eq!(
        outcome.deliveries,
        vec![(EventType::AdPlay, DeliveryOutcome::Deferred(Duration::from_millis(5000)))]
    );
    assert_eq!(page.timer.pending(), 1);

    page.timer.advance(Duration::from_millis(5000));
    assert_eq!(page.transport.actions(), vec!["ap"]);
    assert_eq!(page.timer.pending(), 0);

    page.timer.advance(Duration::from_secs(60));
    assert_eq!(page.transport.requests().len(), 1);
}

#[test]
fn test_retry_uses_remaining_budget() {
    let page = page_with(config(r#"{"tracking": {"waitForParentMillis": 5000}}"#), player("vid-1"), None);
    page.timer.advance(Duration::from_millis(2000));

    let outcome = page.tracker.handle("adstart", EventPayload::default()).unwrap();
    assert_eq!(
        outcome.deliveries[0].1,
        DeliveryOutcome::Deferred(Duration::from_millis(3000))
    );
    page.timer.advance(Duration::from_millis(3000));
    assert_eq!(page.transport.actions(), vec!["ap"]);
}

#[test]
fn test_aggregator_found_on_retry() {
    let player = player("vid-1");
    player.set_poster(Some(ImageDescriptor::new("http://cdn.example.com/p.jpg", 320, 180)));
    let slot = Arc::new(AggregatorSlot::new());
    let page = page_with(TrackerConfig::default(), player, Some(slot.clone()));
    assert_eq!(page.timer.pending(), 2);

    page.tracker.handle("play", EventPayload::default()).unwrap();

    page.timer.advance(Duration::from_millis(2500));
    let aggregator = Arc::new(RecordingAggregator::new(Some("sharedpageload01".into())));
    slot.install(aggregator.clone());
    page.timer.advance(Duration::from_millis(2500));

    assert_eq!(
        aggregator.calls(),
        vec![
            AggregatorCall::ImageLoaded {
                base_url: "http://cdn.example.com/p.jpg".into(),
                width: 320,
                height: 180
            },
            AggregatorCall::ImageVisible {
                base_url: "http://cdn.example.com/p.jpg".into()
            },
            AggregatorCall::AddVideoId {
                video_id: "vid-1".into()
            },
            AggregatorCall::ImageClicked {
                base_url: "http://cdn.example.com/p.jpg".into(),
                video_id: Some("vid-1".into())
            },
        ]
    );
    // Play has no aggregator equivalent: sent directly with the shared page id
    let requests = page.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].param("a"), Some("vp"));
    assert_eq!(requests[0].param("pageid"), Some("sharedpageload01"));
}

#[test]
fn test_independent_sessions_share_page_aggregator() {
    let slot = Arc::new(AggregatorSlot::new());
    let aggregator = Arc::new(RecordingAggregator::new(None));
    slot.install(aggregator.clone());

    let first = page_with(immediate(), player("vid-a"), Some(slot.clone()));
    let second = page_with(immediate(), player("vid-b"), Some(slot));

    first.tracker.handle("play", EventPayload::default()).unwrap();
    second.tracker.handle("adstart", EventPayload::default()).unwrap();
    second.tracker.handle("play", EventPayload::default()).unwrap();

    assert!(!first.tracker.snapshot().has_ad_played);
    assert!(second.tracker.snapshot().has_ad_played);
    assert_ne!(
        first.tracker.snapshot().page.page_load_id,
        second.tracker.snapshot().page.page_load_id
    );
    assert_eq!(
        aggregator.calls(),
        vec![
            AggregatorCall::AddVideoId { video_id: "vid-a".into() },
            AggregatorCall::AddVideoId { video_id: "vid-b".into() },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tokio_timer_retry() {
    let transport = Arc::new(MemoryTransport::new());
    let tracker = Tracker::builder(player("vid-1"), TrackerConfig::default())
        .transport(transport.clone())
        .aggregator_locator(Arc::new(NoAggregator))
        .build()
        .unwrap();

    tracker.handle("play", EventPayload::default()).unwrap();
    assert!(transport.requests().is_empty());

    tokio::time::sleep(Duration::from_millis(5001)).await;
    assert_eq!(transport.actions(), vec!["vp"]);
    assert_eq!(tracker.pending_retries(), 0);
}
