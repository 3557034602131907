//! Delivery routing
//!
//! Each tracking event goes to the page aggregator when one is discoverable,
//! otherwise straight to the tracking endpoint. While the session is still
//! inside its wait-for-aggregator budget, delivery is deferred once by the
//! remaining budget instead.
//!
//! ```text
//!   aggregator found ──► type-specific call ──ok──► Delegated
//!         │                     │ err / no equivalent
//!         │                     ▼
//!         │               direct GET ─────────────► Sent
//!   not found, budget left ─────────────────────────► Deferred(remaining)
//!   not found, budget spent ──► direct GET ─────────► Sent
//! ```

use crate::{
    params::{base_url, merge_layers, ParameterFilter},
    session::{Attribution, SessionState},
    transport::{TrackingRequest, Transport},
    Aggregator, AggregatorError, AggregatorLocator, Error, EventType, ImageDescriptor, ImageDescriptorResolver,
    TrackerConfig, TrackingEvent,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Which call site a delivery comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Initial delivery; may be deferred while waiting for an aggregator
    First,
    /// The single deferred re-invocation; never deferred again
    Retry,
}

/// Result of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handled by the page aggregator
    Delegated,
    /// Sent directly to the tracking endpoint
    Sent(TrackingRequest),
    /// Caller must re-invoke delivery once after this delay
    Deferred(Duration),
}

/// Result of propagating a video id to the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Notified,
    Deferred(Duration),
    /// No aggregator and no budget left, or the aggregator call failed
    Dropped,
}

/// Aggregator-or-direct delivery policy
pub struct DeliveryRouter {
    endpoint: Url,
    wait_budget: Duration,
    locator: Arc<dyn AggregatorLocator>,
    transport: Arc<dyn Transport>,
    verbose: bool,
}

impl DeliveryRouter {
    pub fn new(
        endpoint: Url,
        wait_budget: Duration,
        locator: Arc<dyn AggregatorLocator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            endpoint,
            wait_budget,
            locator,
            transport,
            verbose: false,
        }
    }

    pub fn from_config(
        config: &TrackerConfig,
        locator: Arc<dyn AggregatorLocator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut router = Self::new(
            config.tracking.neon_api_url.clone(),
            config.wait_budget(),
            locator,
            transport,
        );
        router.verbose = config.dev.show_console_logging;
        router
    }

    /// Budget left before giving up on the aggregator, if any
    pub fn remaining_budget(&self, ready_at: Instant, now: Instant) -> Option<Duration> {
        let deadline = ready_at + self.wait_budget;
        deadline
            .checked_duration_since(now)
            .filter(|remaining| !remaining.is_zero())
    }

    /// Cached aggregator, or a fresh lookup remembered on success
    pub fn discover(&self, session: &mut SessionState) -> Option<Arc<dyn Aggregator>> {
        if let Some(aggregator) = session.aggregator() {
            return Some(aggregator);
        }
        let found = self.locator.locate()?;
        session.remember_aggregator(&found);
        debug!("Page aggregator discovered");
        Some(found)
    }

    /// Route one tracking event, attributed from the session as it is now
    pub fn deliver(
        &self,
        session: &mut SessionState,
        event: &TrackingEvent,
        now: Instant,
        attempt: Attempt,
    ) -> DeliveryOutcome {
        let attribution = session.attribution();
        self.deliver_attributed(session, event, &attribution, now, attempt)
    }

    /// Route one tracking event with attribution captured when it was
    /// classified
    pub fn deliver_attributed(
        &self,
        session: &mut SessionState,
        event: &TrackingEvent,
        attribution: &Attribution,
        now: Instant,
        attempt: Attempt,
    ) -> DeliveryOutcome {
        let aggregator = self.discover(session);

        let mut rejected = None;
        match &aggregator {
            Some(aggregator) => match delegate(aggregator.as_ref(), event, attribution.video_id.as_deref()) {
                Delegation::Complete => {
                    self.log_delivery(event.event_type, "aggregator");
                    return DeliveryOutcome::Delegated;
                }
                Delegation::Partial(remainder) => rejected = Some(remainder),
                Delegation::Unsupported => {}
            },
            None if attempt == Attempt::First => {
                if let Some(remaining) = self.remaining_budget(session.ready_at(), now) {
                    debug!(
                        event = %event.event_type,
                        remaining_ms = remaining.as_millis() as u64,
                        "Waiting for page aggregator"
                    );
                    return DeliveryOutcome::Deferred(remaining);
                }
            }
            None => {}
        }
        let event = rejected.as_ref().unwrap_or(event);

        let page_load_id = aggregator.as_ref().and_then(|a| a.page_load_id());
        let params = self.assemble(event, attribution, page_load_id, chrono::Utc::now().timestamp_millis());
        let request = TrackingRequest::new(self.endpoint.clone(), ParameterFilter::filter(&params));
        self.log_delivery(event.event_type, "direct");
        self.transport.send(request.clone());
        DeliveryOutcome::Sent(request)
    }

    /// Outbound parameter set before filtering: page identity, then common
    /// fields, then event detail. Later layers override earlier ones.
    pub fn assemble(
        &self,
        event: &TrackingEvent,
        attribution: &Attribution,
        page_load_id: Option<String>,
        client_timestamp_ms: i64,
    ) -> Map<String, Value> {
        let page = &attribution.page;
        let identity = json!({
            "pageid": page_load_id.unwrap_or_else(|| page.page_load_id.clone()),
            "page": page.page_url,
            "tai": page.publisher_id,
            "ttype": page.tracking_type,
        });
        let common = json!({
            "a": event.event_type.action_code(),
            "cts": client_timestamp_ms,
            "pcount": attribution.play_count,
            "ref": page.referrer_url,
            "vid": attribution.video_id,
            "playerId": attribution.player_id,
        });

        let layers = [identity, common];
        let layers = layers
            .iter()
            .filter_map(Value::as_object)
            .chain(std::iter::once(&event.detail));
        merge_layers(layers)
    }

    /// Tell the aggregator about a newly attributed video
    pub fn announce_video_id(
        &self,
        session: &mut SessionState,
        video_id: &str,
        now: Instant,
        attempt: Attempt,
    ) -> Announcement {
        match self.discover(session) {
            Some(aggregator) => match aggregator.add_video_id(video_id) {
                Ok(()) => Announcement::Notified,
                Err(e) => {
                    warn!(video_id = %video_id, error = %e, "Aggregator rejected video id");
                    Announcement::Dropped
                }
            },
            None if attempt == Attempt::First => self
                .remaining_budget(session.ready_at(), now)
                .map_or(Announcement::Dropped, Announcement::Deferred),
            None => Announcement::Dropped,
        }
    }

    fn log_delivery(&self, event_type: EventType, route: &str) {
        if self.verbose {
            info!(event = %event_type, action = event_type.action_code(), route, "Tracking event delivered");
        } else {
            debug!(event = %event_type, action = event_type.action_code(), route, "Tracking event delivered");
        }
    }
}

/// Result of handing an event to the aggregator
enum Delegation {
    /// The event type has no aggregator equivalent
    Unsupported,
    Complete,
    /// Some images were rejected; the event narrowed to those images
    Partial(TrackingEvent),
}

/// Type-specific aggregator calls, one per image
fn delegate(aggregator: &dyn Aggregator, event: &TrackingEvent, video_id: Option<&str>) -> Delegation {
    if event.images.is_empty() {
        return Delegation::Unsupported;
    }
    let event_type = event.event_type;
    let rejected: Vec<ImageDescriptor> = match event_type {
        EventType::ImageLoad => event
            .images
            .iter()
            .filter(|image| {
                failed(
                    event_type,
                    aggregator.send_image_loaded(base_url(&image.url), image.width, image.height),
                )
            })
            .cloned()
            .collect(),
        EventType::ImageView => event
            .images
            .iter()
            .filter(|image| failed(event_type, aggregator.send_image_visible(base_url(&image.url))))
            .cloned()
            .collect(),
        EventType::ImageClick => {
            let image = &event.images[0];
            if failed(event_type, aggregator.send_image_clicked(base_url(&image.url), video_id)) {
                vec![image.clone()]
            } else {
                Vec::new()
            }
        }
        _ => return Delegation::Unsupported,
    };

    if rejected.is_empty() {
        Delegation::Complete
    } else {
        Delegation::Partial(narrow(event, rejected))
    }
}

fn failed(event_type: EventType, result: Result<(), AggregatorError>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            let err = Error::from(e);
            warn!(
                event = %event_type,
                code = err.error_code(),
                error = %err,
                "Aggregator delegation failed, sending directly"
            );
            true
        }
    }
}

/// `event` restricted to `images`, with `bns` recomputed
fn narrow(event: &TrackingEvent, images: Vec<ImageDescriptor>) -> TrackingEvent {
    let mut narrowed = event.clone();
    if narrowed.detail.contains_key("bns") {
        narrowed = narrowed.with("bns", ImageDescriptorResolver::basenames_with_size(&images));
    }
    narrowed.with_images(images)
}
