//! CLI command implementations

use crate::output::{self, OutputFormat};
use anyhow::Context;
use neontrack_core::{
    AggregatorCall, AggregatorLocator, AggregatorSlot, DeliveryOutcome, EventPayload, EventRegistry, EventType,
    HttpTransport, ImageDescriptor, MemoryTransport, NoAggregator, PageContext, PlayerSnapshot, RawEventKind,
    RecordingAggregator, ScriptedPlayer, SessionSnapshot, Tracker, TrackerConfig, TrackingRequest, Transport,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tracing::{info, warn};

/// Poll interval while draining deferred deliveries
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Extra time allowed past the wait budget when draining
const DRAIN_SLACK: Duration = Duration::from_secs(1);

/// Time given to in-flight HTTP sends before the runtime shuts down
const FLUSH_GRACE: Duration = Duration::from_millis(500);

// =============================================================================
// Replay Script
// =============================================================================

/// Recorded player session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    #[serde(default)]
    pub page: ScriptPage,
    #[serde(default)]
    pub player: PlayerSnapshot,
    /// Attach an in-memory page aggregator
    #[serde(default)]
    pub aggregator: bool,
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptPage {
    pub url: String,
    pub referrer: Option<String>,
}

/// One raw player event plus the player state changes preceding it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    pub event: String,
    #[serde(default)]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub poster: Option<ImageDescriptor>,
    #[serde(default)]
    pub payload: EventPayload,
    #[serde(default)]
    pub sleep_millis: Option<u64>,
}

impl ScriptStep {
    fn apply(&self, player: &ScriptedPlayer) {
        if let Some(seconds) = self.current_time {
            player.set_current_time(seconds);
        }
        if let Some(class_name) = &self.class_name {
            player.set_class_name(class_name.clone());
        }
        if let Some(poster) = &self.poster {
            player.set_poster(Some(poster.clone()));
        }
    }
}

impl ReplayScript {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading replay script {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing replay script {}", path.display()))
    }
}

/// Records every request and forwards it over HTTP unless dry-running
struct ReplayTransport {
    recorded: MemoryTransport,
    http: Option<HttpTransport>,
}

impl Transport for ReplayTransport {
    fn send(&self, request: TrackingRequest) {
        if let Some(http) = &self.http {
            http.send(request.clone());
        }
        self.recorded.send(request);
    }
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub steps: Vec<StepReport>,
    pub requests: Vec<RequestRow>,
    pub aggregator_calls: Vec<AggregatorCall>,
    pub session: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub event: String,
    pub delivered: Vec<Delivery>,
    pub untracked: Vec<EventType>,
    pub error: Option<String>,
}

impl StepReport {
    fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return output::warn(&format!("error: {}", error));
        }
        if self.delivered.is_empty() {
            return output::none();
        }
        self.delivered
            .iter()
            .map(|d| format!("{} -> {}", d.event, d.route))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Serialize)]
pub struct Delivery {
    pub event: EventType,
    pub route: String,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct RequestRow {
    pub action: String,
    pub video: String,
    pub url: String,
}

impl From<&TrackingRequest> for RequestRow {
    fn from(request: &TrackingRequest) -> Self {
        Self {
            action: request.param("a").unwrap_or("-").to_string(),
            video: request.param("vid").unwrap_or("-").to_string(),
            url: request.url().to_string(),
        }
    }
}

#[derive(Tabled)]
struct StepRow {
    step: usize,
    event: String,
    delivered: String,
}

#[derive(Serialize, Tabled)]
struct SettingRow {
    setting: String,
    value: String,
}

#[derive(Serialize, Tabled)]
struct AliasRow {
    name: String,
    handling: String,
}

#[derive(Serialize, Tabled)]
struct EventTypeRow {
    event: String,
    action: String,
}

fn route(outcome: &DeliveryOutcome) -> String {
    match outcome {
        DeliveryOutcome::Delegated => "aggregator".to_string(),
        DeliveryOutcome::Sent(_) => "direct".to_string(),
        DeliveryOutcome::Deferred(delay) => format!("deferred {}ms", delay.as_millis()),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn load_config(path: Option<&Path>) -> anyhow::Result<TrackerConfig> {
    let config = match path {
        Some(path) => TrackerConfig::from_file(path)
            .with_context(|| format!("loading tracker config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Replay a script file and print the resulting report
pub async fn replay(
    script_path: &Path,
    config_path: Option<&Path>,
    dry_run: bool,
    drain: bool,
    format: &str,
) -> anyhow::Result<()> {
    let script = ReplayScript::from_file(script_path)?;
    let config = load_config(config_path)?;
    info!(script = %script_path.display(), steps = script.steps.len(), dry_run, "Replaying player session");

    let report = run(script, config, dry_run, drain).await?;
    print_replay(&report, OutputFormat::from(format));
    Ok(())
}

/// Drive a tracker through the script's steps
pub async fn run(
    script: ReplayScript,
    config: TrackerConfig,
    dry_run: bool,
    drain: bool,
) -> anyhow::Result<ReplayReport> {
    let wait_budget = config.wait_budget();
    let transport = Arc::new(ReplayTransport {
        recorded: MemoryTransport::new(),
        http: if dry_run { None } else { Some(HttpTransport::new()?) },
    });

    let recorder = script
        .aggregator
        .then(|| Arc::new(RecordingAggregator::new(None)));
    let locator: Arc<dyn AggregatorLocator> = match &recorder {
        Some(aggregator) => {
            let slot = AggregatorSlot::new();
            slot.install(aggregator.clone());
            Arc::new(slot)
        }
        None => Arc::new(NoAggregator),
    };

    let mut page = PageContext::new(script.page.url.clone());
    if let Some(referrer) = &script.page.referrer {
        page = page.with_referrer(referrer.clone());
    }
    let player = Arc::new(ScriptedPlayer::new(script.player.clone()));
    let tracker = Tracker::builder(player.clone(), config)
        .page(page)
        .transport(transport.clone())
        .aggregator_locator(locator)
        .build()?;

    let mut steps = Vec::with_capacity(script.steps.len());
    for (idx, step) in script.steps.into_iter().enumerate() {
        step.apply(&player);
        let mut report = StepReport {
            step: idx + 1,
            event: step.event.clone(),
            delivered: Vec::new(),
            untracked: Vec::new(),
            error: None,
        };

        match tracker.handle(&step.event, step.payload) {
            Ok(outcome) => {
                report.delivered = outcome
                    .deliveries
                    .iter()
                    .map(|(event, delivery)| Delivery {
                        event: *event,
                        route: route(delivery),
                    })
                    .collect();
                report.untracked = outcome.untracked;
            }
            Err(e) if e.is_configuration_error() => {
                warn!(step = idx + 1, error = %e, "Event rejected by tracker configuration");
                report.error = Some(e.to_string());
            }
            Err(e) => return Err(e.into()),
        }
        steps.push(report);

        if let Some(ms) = step.sleep_millis {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    if drain {
        let deadline = tokio::time::Instant::now() + wait_budget + DRAIN_SLACK;
        while tracker.pending_retries() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
    let abandoned = tracker.pending_retries();
    if abandoned > 0 {
        warn!(abandoned, "Deferred deliveries dropped at exit, rerun with --drain to wait for them");
    }
    if !dry_run {
        tokio::time::sleep(FLUSH_GRACE).await;
    }

    let session = tracker.snapshot();
    tracker.dispose();

    Ok(ReplayReport {
        steps,
        requests: transport.recorded.requests().iter().map(RequestRow::from).collect(),
        aggregator_calls: recorder.map(|a| a.calls()).unwrap_or_default(),
        session,
    })
}

fn print_replay(report: &ReplayReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", output::to_json(report)),
        OutputFormat::Table => {
            let rows = report.steps.iter().map(|s| StepRow {
                step: s.step,
                event: s.event.clone(),
                delivered: s.summary(),
            });
            println!("{}", output::table(rows));
            println!("{}", output::table(report.requests.clone()));
        }
        OutputFormat::Text => {
            println!("{}", output::heading("Steps"));
            for step in &report.steps {
                println!("  {:>3}. {:<16} {}", step.step, step.event, step.summary());
            }

            println!("\n{}", output::heading("Requests"));
            if report.requests.is_empty() {
                println!("  {}", output::none());
            }
            for request in &report.requests {
                println!("  {:<4} {}", request.action, request.url);
            }

            if !report.aggregator_calls.is_empty() {
                println!("\n{}", output::heading("Aggregator"));
                for call in &report.aggregator_calls {
                    println!("  {:?}", call);
                }
            }

            let session = &report.session;
            println!("\n{}", output::heading("Session"));
            println!("  Page load id: {}", session.page.page_load_id);
            println!(
                "  Current video: {}",
                session.current_video_id.clone().unwrap_or_else(output::none)
            );
            println!("  Played videos: {}", session.played_video_ids.join(", "));
            for (video, reported) in &session.percent_ledger {
                let reported: Vec<String> = reported.iter().map(|p| format!("{}%", p)).collect();
                println!("  Milestones {}: {}", video, reported.join(" "));
            }
            let ad = if session.has_ad_played { output::ok("yes") } else { "no".to_string() };
            println!("  Ad played: {}", ad);
        }
    }
}

/// Print the effective configuration
pub fn show_config(config_path: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let publisher = &config.publisher;
    let tracking = &config.tracking;

    let rows = vec![
        SettingRow {
            setting: "publisher.id".into(),
            value: publisher.id.clone().unwrap_or_default(),
        },
        SettingRow {
            setting: "publisher.videoIdAttribute".into(),
            value: publisher.video_id_attribute.clone(),
        },
        SettingRow {
            setting: "publisher.videoIdAttributeRegex".into(),
            value: publisher.video_id_attribute_regex.clone().unwrap_or_default(),
        },
        SettingRow {
            setting: "tracking.neonApiUrl".into(),
            value: tracking.neon_api_url.to_string(),
        },
        SettingRow {
            setting: "tracking.timeUpdateInterval".into(),
            value: tracking.time_update_interval.to_string(),
        },
        SettingRow {
            setting: "tracking.type".into(),
            value: tracking.tracking_type.clone(),
        },
        SettingRow {
            setting: "tracking.events".into(),
            value: tracking
                .events
                .iter()
                .map(EventType::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        },
        SettingRow {
            setting: "tracking.waitForParentMillis".into(),
            value: tracking.wait_for_parent_millis.to_string(),
        },
        SettingRow {
            setting: "tracking.autoplayPolicy".into(),
            value: format!("{:?}", tracking.autoplay_policy).to_lowercase(),
        },
        SettingRow {
            setting: "dev.showConsoleLogging".into(),
            value: config.dev.show_console_logging.to_string(),
        },
    ];

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::to_json(&config)),
        OutputFormat::Table => println!("{}", output::table(rows)),
        OutputFormat::Text => {
            println!("{}", output::heading("Tracker configuration"));
            for row in rows {
                let value = if row.value.is_empty() { output::none() } else { row.value };
                println!("  {:<32} {}", row.setting, value);
            }
        }
    }
    Ok(())
}

/// Print raw event aliases and canonical tracking events
pub fn list_events(format: &str) {
    let registry = EventRegistry::default();
    let aliases: Vec<AliasRow> = registry
        .names()
        .into_iter()
        .map(|(name, kind)| AliasRow {
            name: name.to_string(),
            handling: handling(kind).to_string(),
        })
        .collect();
    let event_types: Vec<EventTypeRow> = EventType::ALL
        .iter()
        .map(|t| EventTypeRow {
            event: t.to_string(),
            action: t.action_code().to_string(),
        })
        .collect();

    match OutputFormat::from(format) {
        OutputFormat::Json => {
            let data = serde_json::json!({ "aliases": aliases, "eventTypes": event_types });
            println!("{}", output::to_json(&data));
        }
        OutputFormat::Table => {
            println!("{}", output::table(aliases));
            println!("{}", output::table(event_types));
        }
        OutputFormat::Text => {
            println!("{}", output::heading("Player events"));
            for alias in &aliases {
                println!("  {:<18} {}", alias.name, alias.handling);
            }
            println!("\n{}", output::heading("Tracking events"));
            for event in &event_types {
                println!("  {:<12} a={}", event.event, event.action);
            }
        }
    }
}

fn handling(kind: RawEventKind) -> &'static str {
    match kind {
        RawEventKind::Play => "play, image click when armed",
        RawEventKind::TimeUpdate => "autoplay guess, view percent",
        RawEventKind::PosterChange => "image load + view, arms click",
        RawEventKind::ImageLoad => "image load",
        RawEventKind::ImageView => "image view",
        RawEventKind::ImageClick => "image click",
        RawEventKind::AdStart => "ad play (first only)",
    }
}
