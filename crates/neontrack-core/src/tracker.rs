//! Tracker - per-player owner of a tracking session
//!
//! Coordinates:
//! - Raw event name resolution
//! - Classification against the session
//! - Tracked-event filtering
//! - Delivery with the deferred wait-for-aggregator retry
//! - Video id propagation to the aggregator
//! - Teardown of pending deferred work

use crate::{
    classifier::{EventClassifier, EventPayload, EventRegistry, RawEventKind},
    router::{Announcement, Attempt, DeliveryOutcome, DeliveryRouter},
    session::{Attribution, SessionSnapshot, SessionState},
    timer::{Timer, TimerHandle, TokioTimer},
    transport::{HttpTransport, Transport},
    AggregatorLocator, Error, EventType, GlobalAggregator, PageContext, PageIdentity, Player, Result,
    TrackerConfig, TrackingEvent,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Result of handling one raw player event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Tracked events and how each was delivered
    pub deliveries: Vec<(EventType, DeliveryOutcome)>,
    /// Classified events dropped because their type is not tracked
    pub untracked: Vec<EventType>,
}

impl HandleOutcome {
    pub fn event_types(&self) -> Vec<EventType> {
        self.deliveries.iter().map(|(t, _)| *t).collect()
    }
}

/// Builder for [`Tracker`]
pub struct TrackerBuilder {
    player: Arc<dyn Player>,
    config: TrackerConfig,
    page: PageContext,
    transport: Option<Arc<dyn Transport>>,
    locator: Option<Arc<dyn AggregatorLocator>>,
    timer: Option<Arc<dyn Timer>>,
    registry: EventRegistry,
}

impl TrackerBuilder {
    pub fn page(mut self, page: PageContext) -> Self {
        self.page = page;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn aggregator_locator(mut self, locator: Arc<dyn AggregatorLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn registry(mut self, registry: EventRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Create the session. Defaults (HTTP transport, tokio timer) need a
    /// running tokio runtime. An initial poster is tracked immediately.
    pub fn build(self) -> Result<Tracker> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let timer = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TokioTimer::new()?),
        };
        let locator = self.locator.unwrap_or_else(|| Arc::new(GlobalAggregator));

        let page = PageIdentity {
            page_load_id: PageIdentity::generate_page_load_id(),
            page_url: self.page.url,
            referrer_url: self.page.referrer,
            publisher_id: self.config.publisher.id.clone(),
            tracking_type: self.config.tracking.tracking_type.clone(),
        };
        let session = SessionState::new(page, timer.now()).with_player_id(self.player.id());

        info!(
            page_load_id = %session.page().page_load_id,
            player_id = ?session.player_id(),
            "Tracking session ready"
        );

        let inner = Arc::new(TrackerInner {
            classifier: EventClassifier::from_config(&self.config)?,
            router: DeliveryRouter::from_config(&self.config, locator, transport),
            tracked: self.config.tracked_events(),
            registry: self.registry,
            player: self.player,
            timer,
            session: Mutex::new(session),
            pending: Mutex::new(Vec::new()),
            next_task_id: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        });

        if inner.player.poster_url().is_some() {
            inner.dispatch(RawEventKind::PosterChange, &EventPayload::default())?;
        }

        Ok(Tracker { inner })
    }
}

/// Per-player tracking handle
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn builder(player: Arc<dyn Player>, config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder {
            player,
            config,
            page: PageContext::default(),
            transport: None,
            locator: None,
            timer: None,
            registry: EventRegistry::default(),
        }
    }

    /// Handle a raw player event by name. Unregistered names are ignored.
    /// Configuration errors abort the event and are returned to the caller.
    #[instrument(skip(self, payload))]
    pub fn handle(&self, name: &str, payload: EventPayload) -> Result<HandleOutcome> {
        match self.inner.registry.resolve(name) {
            Some(kind) => self.handle_kind(kind, payload),
            None => {
                self.inner.ensure_live()?;
                debug!("Unregistered player event ignored");
                Ok(HandleOutcome::default())
            }
        }
    }

    /// Handle an already resolved event
    pub fn handle_kind(&self, kind: RawEventKind, payload: EventPayload) -> Result<HandleOutcome> {
        self.inner.ensure_live()?;
        self.inner.dispatch(kind, &payload)
    }

    /// Raw event names to subscribe to on the player
    pub fn event_names(&self) -> Vec<String> {
        self.inner
            .registry
            .names()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.session().snapshot()
    }

    /// Deferred deliveries and announcements not yet run
    pub fn pending_retries(&self) -> usize {
        self.inner.pending().len()
    }

    /// Tear down: pending deferred work is cancelled and later events fail
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.cancel_pending();
            info!("Tracking session disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

struct TrackerInner {
    player: Arc<dyn Player>,
    classifier: EventClassifier,
    router: DeliveryRouter,
    registry: EventRegistry,
    tracked: HashSet<EventType>,
    timer: Arc<dyn Timer>,
    session: Mutex<SessionState>,
    pending: Mutex<Vec<(u64, TimerHandle)>>,
    next_task_id: AtomicU64,
    disposed: AtomicBool,
}

impl TrackerInner {
    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<(u64, TimerHandle)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, kind: RawEventKind, payload: &EventPayload) -> Result<HandleOutcome> {
        let mut session = self.session();
        let classification = self
            .classifier
            .classify(&mut session, self.player.as_ref(), kind, payload)?;
        let now = self.timer.now();

        if let Some(video_id) = &classification.video_changed {
            self.announce(&mut session, video_id, now, Attempt::First);
        }

        let attribution = session.attribution();
        let mut outcome = HandleOutcome::default();
        for event in classification.events {
            if !self.tracked.contains(&event.event_type) {
                debug!(event = %event.event_type, "Event type not tracked");
                outcome.untracked.push(event.event_type);
                continue;
            }
            let delivery = self
                .router
                .deliver_attributed(&mut session, &event, &attribution, now, Attempt::First);
            if let DeliveryOutcome::Deferred(delay) = delivery {
                self.schedule_delivery_retry(delay, event.clone(), attribution.clone());
            }
            outcome.deliveries.push((event.event_type, delivery));
        }
        Ok(outcome)
    }

    fn announce(self: &Arc<Self>, session: &mut SessionState, video_id: &str, now: Instant, attempt: Attempt) {
        match self.router.announce_video_id(session, video_id, now, attempt) {
            Announcement::Notified => debug!(video_id, "Video id sent to aggregator"),
            Announcement::Deferred(delay) => {
                let video_id = video_id.to_string();
                self.schedule(delay, move |inner| {
                    let now = inner.timer.now();
                    let mut session = inner.session();
                    inner.announce(&mut session, &video_id, now, Attempt::Retry);
                });
            }
            Announcement::Dropped => {}
        }
    }

    /// Retry with the attribution seen when the event was classified
    fn schedule_delivery_retry(self: &Arc<Self>, delay: Duration, event: TrackingEvent, attribution: Attribution) {
        self.schedule(delay, move |inner| {
            let now = inner.timer.now();
            let mut session = inner.session();
            let outcome = inner
                .router
                .deliver_attributed(&mut session, &event, &attribution, now, Attempt::Retry);
            debug!(event = %event.event_type, outcome = ?outcome, "Deferred delivery ran");
        });
    }

    /// Schedule one deferred run against this session. The task holds only a
    /// weak reference and does nothing once the session is gone or disposed.
    fn schedule(self: &Arc<Self>, delay: Duration, work: impl FnOnce(&Arc<TrackerInner>) + Send + 'static) {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let weak: Weak<TrackerInner> = Arc::downgrade(self);
        // Registered under the lock so a task firing early still finds its entry
        let mut pending = self.pending();
        let handle = self.timer.schedule(
            delay,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.pending().retain(|(task_id, _)| *task_id != id);
                if inner.disposed.load(Ordering::SeqCst) {
                    return;
                }
                work(&inner);
            }),
        );
        pending.push((id, handle));
    }

    fn cancel_pending(&self) {
        for (_, handle) in self.pending().drain(..) {
            handle.cancel();
        }
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
