//! Benchmark tests for neontrack-core operations
//!
//! Run with: cargo bench -p neontrack-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use neontrack_core::{
    AdStateDetector, DeliveryRouter, EventPayload, EventType, ManualTimer, MemoryTransport,
    NoAggregator, PageContext, PageIdentity, ParameterFilter, PercentLedger, PercentTracker,
    ScriptedPlayer, SessionState, Tracker, TrackerConfig, TrackingEvent,
};

// ============================================================================
// Helpers
// ============================================================================

fn page_identity() -> PageIdentity {
    PageIdentity {
        page_load_id: "0123456789abcdef".to_string(),
        page_url: "http://publisher.example.com/videos/watch?id=42".to_string(),
        referrer_url: Some("http://google.com/".to_string()),
        publisher_id: Some("pub-42".to_string()),
        tracking_type: "BRIGHTCOVE".to_string(),
    }
}

fn raw_params(extra_keys: usize) -> Map<String, Value> {
    let mut params = json!({
        "a": "vvp",
        "pageid": "0123456789abcdef",
        "page": "http://publisher.example.com/videos",
        "tai": "pub-42",
        "ttype": "BRIGHTCOVE",
        "prcnt": 50,
        "vid": "vid-1",
        "pcount": 1,
        "aplay": false,
        "ref": Value::Null,
    })
    .as_object()
    .cloned()
    .unwrap_or_default();
    for i in 0..extra_keys {
        params.insert(format!("extra{}", i), json!(i));
    }
    params
}

// ============================================================================
// Percent Tracking
// ============================================================================

fn bench_percent_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("Percent Tracking");

    for interval in [1u32, 5, 25] {
        group.bench_with_input(BenchmarkId::new("full_playback", interval), &interval, |b, &interval| {
            let tracker = PercentTracker::new(interval);
            b.iter(|| {
                let mut ledger = PercentLedger::new();
                let mut emitted = 0;
                for second in 0..=600 {
                    emitted += tracker
                        .thresholds_crossed("vid-1", second as f64, Some(600.0), &mut ledger)
                        .len();
                }
                black_box(emitted)
            });
        });
    }

    group.bench_function("steady_state_no_crossing", |b| {
        let tracker = PercentTracker::new(25);
        let mut ledger = PercentLedger::new();
        tracker.thresholds_crossed("vid-1", 600.0, Some(600.0), &mut ledger);
        b.iter(|| black_box(tracker.thresholds_crossed("vid-1", black_box(600.0), Some(600.0), &mut ledger)));
    });

    group.finish();
}

// ============================================================================
// Parameter Assembly
// ============================================================================

fn bench_parameter_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parameter Filter");

    for extra in [0usize, 16, 128] {
        let params = raw_params(extra);
        group.bench_with_input(BenchmarkId::new("filter", extra), &params, |b, params| {
            b.iter(|| black_box(ParameterFilter::filter(black_box(params))));
        });
    }

    group.finish();
}

fn bench_parameter_assembly(c: &mut Criterion) {
    let router = DeliveryRouter::new(
        Url::parse("http://tracker.example.com/v2/track").unwrap(),
        std::time::Duration::ZERO,
        Arc::new(NoAggregator),
        Arc::new(MemoryTransport::new()),
    );
    let mut session = SessionState::new(page_identity(), Instant::now());
    session.record_play("vid-1");
    let attribution = session.attribution();
    let event = TrackingEvent::new(EventType::TimeUpdate).with("prcnt", 75);

    c.bench_function("assemble_and_filter", |b| {
        b.iter(|| {
            let params = router.assemble(black_box(&event), &attribution, None, 1_700_000_000_000);
            black_box(ParameterFilter::filter(&params))
        });
    });
}

// ============================================================================
// Classification
// ============================================================================

fn bench_ad_state(c: &mut Criterion) {
    let class_name = "video-js vjs-paused vjs-controls-enabled vjs-workinghover vjs-user-inactive vjs-ad-playing";
    c.bench_function("ad_state_detection", |b| {
        b.iter(|| black_box(AdStateDetector::is_ad_playing(black_box(class_name))));
    });
}

fn bench_tracker_time_updates(c: &mut Criterion) {
    c.bench_function("tracker_time_update_sequence", |b| {
        b.iter(|| {
            let player = Arc::new(ScriptedPlayer::with_video_id("data-video-id", "vid-1"));
            player.set_duration(Some(120.0));
            let transport = Arc::new(MemoryTransport::new());
            let config = TrackerConfig::from_json_str(r#"{"tracking": {"waitForParentMillis": 0}}"#).unwrap();
            let tracker = Tracker::builder(player.clone(), config)
                .page(PageContext::new("http://publisher.example.com/videos"))
                .transport(transport.clone())
                .timer(Arc::new(ManualTimer::new()))
                .aggregator_locator(Arc::new(NoAggregator))
                .build()
                .unwrap();

            tracker.handle("play", EventPayload::default()).unwrap();
            for second in 0..=120 {
                player.set_current_time(second as f64);
                tracker.handle("timeupdate", EventPayload::default()).unwrap();
            }
            black_box(transport.requests().len())
        });
    });
}

criterion_group!(
    benches,
    bench_percent_tracking,
    bench_parameter_filter,
    bench_parameter_assembly,
    bench_ad_state,
    bench_tracker_time_updates,
);

criterion_main!(benches);
