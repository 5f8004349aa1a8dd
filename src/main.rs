//! Persona Engine CLI
//!
//! Tracks interaction events into a local store and infers the visitor persona.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use persona_engine::{
    config::Config,
    consumer::PersonaConsumer,
    events::{EventData, EventLog, EventName, SyncOutcome},
    inference::InferenceEngine,
    remote::HttpRemote,
    storage::{FileStore, SharedStore},
    telemetry::{create_shared_telemetry_with_persistence, TelemetryLog},
    VERSION,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "persona-engine")]
#[command(version = VERSION)]
#[command(about = "Behavioral persona inference from interaction events", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an interaction event
    Track {
        /// Event name, e.g. page_view or add_to_cart
        event: String,

        /// Event payload as JSON
        #[arg(long, default_value = "{}")]
        data: String,

        /// Page the event happened on
        #[arg(long, default_value = "")]
        url: String,

        #[arg(long, default_value = "")]
        referrer: String,
    },

    /// List captured events
    Events {
        /// Only events with this name
        #[arg(long = "type")]
        event_type: Option<String>,

        /// Only events from the last N minutes
        #[arg(long)]
        recent: Option<i64>,
    },

    /// Show event log statistics
    Stats,

    /// Infer the current persona
    Infer {
        /// Print every nonzero persona score
        #[arg(long)]
        breakdown: bool,
    },

    /// Send the event log to the analytics endpoint
    Sync,

    /// Delete all captured events
    Clear,

    /// Forget the persisted persona and delete all events
    Reset,

    /// Resume event capture
    Enable,

    /// Stop event capture; stored events are kept
    Disable,

    /// Run the recalculation timer and print persona changes
    Watch,

    /// Show configuration
    Config,
}

struct Runtime {
    config: Config,
    store: SharedStore,
    log: Arc<EventLog>,
    telemetry: Arc<TelemetryLog>,
}

impl Runtime {
    fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        config
            .ensure_directories()
            .context("Failed to create data directory")?;

        let store: SharedStore = Arc::new(FileStore::new(config.store_path()));
        let telemetry = create_shared_telemetry_with_persistence(config.telemetry_path());
        let log = Arc::new(
            EventLog::new(store.clone(), &config.tracking)
                .with_session_store(store.clone())
                .with_telemetry(telemetry.clone()),
        );

        Ok(Self {
            config,
            store,
            log,
            telemetry,
        })
    }

    fn engine(&self) -> InferenceEngine {
        InferenceEngine::new(self.log.clone(), self.config.inference.clone())
            .with_telemetry(self.telemetry.clone())
    }

    fn remote(&self) -> Result<HttpRemote> {
        HttpRemote::new(self.config.endpoints.clone()).context("Failed to create HTTP client")
    }

    fn consumer(&self) -> Result<PersonaConsumer<HttpRemote>> {
        Ok(PersonaConsumer::new(
            self.engine(),
            self.store.clone(),
            Arc::new(self.remote()?),
            &self.config.tracking,
        )
        .with_telemetry(self.telemetry.clone()))
    }

    fn finish(&self) {
        if let Err(e) = self.telemetry.save() {
            tracing::warn!("Could not save telemetry: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Track {
            event,
            data,
            url,
            referrer,
        } => cmd_track(&event, &data, url, referrer),
        Commands::Events { event_type, recent } => cmd_events(event_type.as_deref(), recent),
        Commands::Stats => cmd_stats(),
        Commands::Infer { breakdown } => cmd_infer(breakdown),
        Commands::Sync => cmd_sync().await,
        Commands::Clear => cmd_clear(),
        Commands::Reset => cmd_reset(),
        Commands::Enable => cmd_set_enabled(true),
        Commands::Disable => cmd_set_enabled(false),
        Commands::Watch => cmd_watch().await,
        Commands::Config => cmd_config(),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "persona_engine=debug"
    } else {
        "persona_engine=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_track(event: &str, data: &str, url: String, referrer: String) -> Result<()> {
    let name: EventName = event
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .with_context(|| format!("Valid names: {}", event_names()))?;
    let payload: serde_json::Value =
        serde_json::from_str(data).context("Event data is not valid JSON")?;
    let data = EventData::from_parts(name, payload)
        .with_context(|| format!("Invalid payload for {name}"))?;

    let runtime = Runtime::open()?;
    if !runtime.log.is_enabled() {
        println!("Capture is disabled. Run 'persona-engine enable' to resume.");
        return Ok(());
    }

    runtime.log.set_page_context(url, referrer);
    runtime.log.track(data);
    println!("Tracked {name} ({} events in log)", runtime.log.len());

    runtime.finish();
    Ok(())
}

fn cmd_events(event_type: Option<&str>, recent: Option<i64>) -> Result<()> {
    let runtime = Runtime::open()?;

    let mut events = match recent {
        Some(minutes) => runtime.log.recent_events(minutes),
        None => runtime.log.events(),
    };
    if let Some(event_type) = event_type {
        let name: EventName = event_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        events.retain(|e| e.name() == name);
    }

    if events.is_empty() {
        println!("No events captured.");
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

fn cmd_stats() -> Result<()> {
    let runtime = Runtime::open()?;
    let stats = runtime.log.stats();

    println!("Event Log");
    println!("=========");
    println!();
    println!("Capture: {}", enabled_label(runtime.log.is_enabled()));
    println!("Session: {}", runtime.log.session_id());
    println!(
        "Events: {} / {}",
        stats.total_events,
        runtime.log.max_events()
    );

    if let (Some(first), Some(last)) = (stats.first_event, stats.last_event) {
        println!("First event: {}", first.format("%Y-%m-%d %H:%M:%S"));
        println!("Last event: {}", last.format("%Y-%m-%d %H:%M:%S"));
        println!("Session duration: {:.1} min", stats.session_duration_minutes);
    }

    if !stats.events_by_type.is_empty() {
        println!();
        println!("By type:");
        for (name, count) in &stats.events_by_type {
            println!("  {name}: {count}");
        }
    }

    println!();
    println!("{}", runtime.telemetry.summary());
    Ok(())
}

fn cmd_infer(breakdown: bool) -> Result<()> {
    let runtime = Runtime::open()?;
    let engine = runtime.engine();
    let inference = engine.calculate_persona();

    println!("Persona: {}", inference.primary);
    println!("Confidence: {:.2}", inference.confidence);
    println!("Events analyzed: {}", inference.events_analyzed);

    if breakdown {
        println!();
        println!("Scores:");
        let scores = engine.score_breakdown();
        if scores.is_empty() {
            println!("  (none)");
        }
        for (persona, score) in scores {
            println!("  {persona:<20} {score:>8.2}");
        }
    }

    runtime.finish();
    Ok(())
}

async fn cmd_sync() -> Result<()> {
    let runtime = Runtime::open()?;
    let remote = runtime.remote()?;

    println!("Syncing to {}", remote.config().sync_url());
    let outcome = runtime.log.sync_with_server(&remote).await;
    runtime.finish();

    match outcome {
        SyncOutcome::Synced { count } => println!("Synced {count} events."),
        SyncOutcome::Skipped => println!("Nothing to sync."),
        SyncOutcome::Failed { reason } => {
            anyhow::bail!("Sync failed, events kept for retry: {reason}")
        }
    }
    Ok(())
}

fn cmd_clear() -> Result<()> {
    let runtime = Runtime::open()?;
    runtime.log.clear();
    println!("Event log cleared.");
    Ok(())
}

fn cmd_reset() -> Result<()> {
    let runtime = Runtime::open()?;
    let mut consumer = runtime.consumer()?;
    consumer.reset();
    runtime.finish();
    println!("Persona and event log reset.");
    Ok(())
}

fn cmd_set_enabled(enabled: bool) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.tracking.enabled = enabled;
    config.save().context("Error saving config")?;

    if enabled {
        println!("Capture enabled.");
    } else {
        println!("Capture disabled. Stored events are kept.");
    }
    Ok(())
}

async fn cmd_watch() -> Result<()> {
    let runtime = Runtime::open()?;
    let consumer = runtime.consumer()?;

    println!("Persona Engine v{VERSION}");
    println!(
        "  Recalculation interval: {}ms",
        runtime.config.inference.recalculation_interval.as_millis()
    );
    println!(
        "  Analytics sync: {}",
        if runtime.config.tracking.send_to_analytics {
            format!(
                "every {}s to {}",
                runtime.config.tracking.sync_interval.as_secs(),
                runtime.config.endpoints.sync_url()
            )
        } else {
            "disabled".to_string()
        }
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let handle = consumer.spawn();
    let mut updates = handle.subscribe();
    print_persona(&handle.current());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = updates.borrow_and_update().clone();
                print_persona(&current);
            }
        }
    }

    handle.shutdown().await;
    runtime.finish();

    println!();
    println!("{}", runtime.telemetry.summary());
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn print_persona(inference: &persona_engine::inference::PersonaInference) {
    println!(
        "[{}] {} (confidence {:.2}, {} events)",
        Utc::now().format("%H:%M:%S"),
        inference.primary,
        inference.confidence,
        inference.events_analyzed
    );
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn event_names() -> String {
    EventName::ALL
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
