//! Neontrack Core - Playback Event Tracking Engine
//!
//! This crate instruments a video player for engagement analytics:
//! - Poster/thumbnail impressions and clicks
//! - Play starts, with autoplay detection and ad-state suppression
//! - View-percent milestones
//! - Ad plays
//! - Delegation to a page-level aggregator, with bounded-wait fallback to
//!   direct reporting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Neontrack Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   raw player event ──► ┌──────────────┐                         │
//! │                        │   Registry   │  alias → RawEventKind   │
//! │                        └──────┬───────┘                         │
//! │                               │                                 │
//! │  ┌──────────────┐      ┌──────┴───────┐      ┌──────────────┐   │
//! │  │   Ad State   │─────►│   Event      │◄─────│   Percent    │   │
//! │  │   Detector   │      │  Classifier  │      │   Tracker    │   │
//! │  └──────────────┘      └──────┬───────┘      └──────────────┘   │
//! │  ┌──────────────┐             │              ┌──────────────┐   │
//! │  │    Image     │────────────►│◄─────────────│   Session    │   │
//! │  │   Resolver   │             │              │    State     │   │
//! │  └──────────────┘      ┌──────┴───────┐      └──────────────┘   │
//! │                        │   Delivery   │                         │
//! │                        │    Router    │                         │
//! │                        └──┬────────┬──┘                         │
//! │             ┌─────────────┘        └────────────┐               │
//! │      ┌──────┴───────┐                    ┌──────┴───────┐       │
//! │      │  Aggregator  │                    │  Transport   │       │
//! │      └──────────────┘                    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod ad_state;
pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod image;
pub mod params;
pub mod percent;
pub mod player;
pub mod router;
pub mod session;
pub mod timer;
pub mod tracker;
pub mod transport;
pub mod types;

pub use ad_state::AdStateDetector;
pub use aggregator::{
    Aggregator, AggregatorCall, AggregatorLocator, AggregatorSlot, GlobalAggregator, NoAggregator,
    RecordingAggregator,
};
pub use classifier::{Classification, EventClassifier, EventPayload, EventRegistry, RawEventKind, VideoIdExtractor};
pub use config::{AutoplayPolicy, DevConfig, PublisherConfig, TrackerConfig, TrackingConfig};
pub use error::{AggregatorError, Error, Result};
pub use image::ImageDescriptorResolver;
pub use params::{ParameterFilter, ALLOWED_PARAMS};
pub use percent::{PercentLedger, PercentTracker};
pub use player::{Player, PlayerSnapshot, ScriptedPlayer};
pub use router::{Announcement, Attempt, DeliveryOutcome, DeliveryRouter};
pub use session::{Attribution, SessionSnapshot, SessionState};
pub use timer::{ManualTimer, Timer, TimerHandle, TokioTimer};
pub use tracker::{HandleOutcome, Tracker, TrackerBuilder};
pub use transport::{HttpTransport, MemoryTransport, TrackingRequest, Transport};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library initialization
pub fn init() {
    tracing::info!(version = VERSION, "Neontrack Core initialized");
}
