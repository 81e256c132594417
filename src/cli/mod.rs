//! CLI commands for Coalescer using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{load_settings, Settings};
use crate::core::{Admission, Clock, Consumer, InboundEvent, Ingestor, SenderRole, SystemClock};
use crate::guard::{CooldownGuard, GuardedProcessor};
use crate::processor::{BackendResponder, Responder};
use crate::store::{EventStore, SqliteEventStore, SqliteEvictionAudit};
use crate::web::{run_server, AppState};

/// Coalescer - debounced conversation event queue.
#[derive(Parser)]
#[command(name = "coalescer")]
#[command(version = "0.1.0")]
#[command(about = "Batch bursts of chat messages per conversation before replying", long_about = None)]
pub struct Commands {
    /// Settings file (default: ~/.coalescer/settings.json)
    #[arg(long, global = true, env = "COALESCER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the ingestion server and the consumer loop
    Serve,

    /// Run the consumer loop only
    Consume,

    /// Queue one event
    Enqueue {
        /// User identifier
        #[arg(long)]
        user: String,

        /// Channel identifier
        #[arg(long)]
        channel: String,

        /// Sender role: user, automated, human_operator
        #[arg(long, default_value = "user")]
        role: SenderRole,

        /// Message text
        text: String,
    },

    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Show queue statistics
    Stats,

    /// List queued events in arrival order
    List {
        /// Show at most this many entries
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show recently evicted conversations
    Evictions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        let settings = load_settings(self.config.as_deref())
            .context("Failed to load settings")?;

        match &self.command {
            Command::Serve => cmd_serve(&settings).await,
            Command::Consume => cmd_consume(&settings).await,
            Command::Enqueue {
                user,
                channel,
                role,
                text,
            } => cmd_enqueue(&settings, user, channel, *role, text),
            Command::Queue { action } => cmd_queue(&settings, action),
        }
    }
}

// Command implementations

async fn cmd_serve(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    let guard = Arc::new(CooldownGuard::from_settings(&settings.guard));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let consumer = build_consumer(settings, store.clone(), guard.clone(), clock.clone())?;
    let ingestor = Ingestor::new(store, guard, clock);

    let shutdown = shutdown_signal();
    let server = run_server(
        &settings.web,
        AppState { ingestor },
        wait_for_shutdown(shutdown.clone()),
    );
    // The consumer gets its own task so a slow scan never delays the server.
    let mut consumer = tokio::spawn(consumer.run_until(wait_for_shutdown(shutdown)));
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                consumer.abort();
                return Err(e).context("Web server failed");
            }
            consumer.await.context("Consumer task failed")??;
        }
        result = &mut consumer => {
            result.context("Consumer task failed")??;
            server.await?;
        }
    }
    tracing::info!("Coalescer stopped");
    Ok(())
}

async fn cmd_consume(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    let guard = Arc::new(CooldownGuard::from_settings(&settings.guard));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let consumer = build_consumer(settings, store, guard, clock)?;
    consumer
        .run_until(wait_for_shutdown(shutdown_signal()))
        .await?;
    tracing::info!("Consumer stopped");
    Ok(())
}

fn cmd_enqueue(
    settings: &Settings,
    user: &str,
    channel: &str,
    role: SenderRole,
    text: &str,
) -> Result<()> {
    let store = open_store(settings)?;
    let guard = Arc::new(CooldownGuard::from_settings(&settings.guard));
    let ingestor = Ingestor::new(store, guard, Arc::new(SystemClock));

    match ingestor.submit(InboundEvent::new(user, channel, role, text))? {
        Admission::Queued(id) => println!("Enqueued event: {}", id),
        Admission::Echo => println!("Ignored: echo of an automated reply"),
    }
    Ok(())
}

fn cmd_queue(settings: &Settings, action: &QueueCommand) -> Result<()> {
    match action {
        QueueCommand::Stats => {
            let store = open_store(settings)?;
            println!("{}", store.stats()?);
        }
        QueueCommand::List { limit } => {
            let store = open_store(settings)?;
            let entries = store.scan_all()?;
            let shown = limit.unwrap_or(entries.len()).min(entries.len());
            println!("Queued events ({}):", entries.len());
            for entry in entries.iter().take(shown) {
                let body: String = entry.body.chars().take(60).collect();
                println!(
                    "  {} [{}] {} {}",
                    entry.id,
                    format_time(entry.arrival_time),
                    entry.key,
                    body
                );
            }
        }
        QueueCommand::Evictions { limit } => {
            let audit = SqliteEvictionAudit::open(settings.store.resolved_path()?)?;
            let records = audit.recent(*limit)?;
            if records.is_empty() {
                println!("No evictions recorded");
            }
            for record in records {
                let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(record.ts)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| record.ts.to_string());
                println!(
                    "  {} {} after {} attempts, {} events dropped",
                    when, record.conversation_key, record.attempts, record.entry_count
                );
            }
        }
    }

    Ok(())
}

fn open_store(settings: &Settings) -> Result<Arc<SqliteEventStore>> {
    let path = settings.store.resolved_path()?;
    let store = SqliteEventStore::open(&path, Duration::from_millis(settings.store.busy_timeout_ms))
        .with_context(|| format!("Failed to open event store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_consumer(
    settings: &Settings,
    store: Arc<SqliteEventStore>,
    guard: Arc<CooldownGuard>,
    clock: Arc<dyn Clock>,
) -> Result<Consumer> {
    let url = settings
        .backend
        .url
        .as_deref()
        .context("backend.url must be set to consume the queue")?;
    let responder = BackendResponder::new(url, Duration::from_secs(settings.backend.timeout_secs))?;
    tracing::info!("Replies generated by {} at {}", responder.name(), url);

    let processor = GuardedProcessor::new(
        guard,
        responder,
        clock.clone(),
        settings.guard.advisory_message.clone(),
    );
    let mut consumer = Consumer::new(store, Arc::new(processor), clock, &settings.queue);

    if settings.store.audit_evictions {
        let audit = SqliteEvictionAudit::open(settings.store.resolved_path()?)?;
        consumer = consumer.with_audit(Arc::new(audit));
    }
    Ok(consumer)
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C, stopping: {}", e),
        }
        let _ = tx.send(true);
    });
    rx
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn format_time(secs: f64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis((secs * 1000.0) as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{:.3}", secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enqueue() {
        let args = Commands::try_parse_from([
            "coalescer",
            "enqueue",
            "--user",
            "553112345678",
            "--channel",
            "553198765432",
            "--role",
            "hum",
            "Vou assumir",
        ])
        .unwrap();

        match args.command {
            Command::Enqueue {
                user, role, text, ..
            } => {
                assert_eq!(user, "553112345678");
                assert_eq!(role, SenderRole::HumanOperator);
                assert_eq!(text, "Vou assumir");
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_role_defaults_to_user() {
        let args =
            Commands::try_parse_from(["coalescer", "enqueue", "--user", "u", "--channel", "c", "hi"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::Enqueue {
                role: SenderRole::User,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_role() {
        let result = Commands::try_parse_from([
            "coalescer", "enqueue", "--user", "u", "--channel", "c", "--role", "bot", "hi",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_queue_subcommands() {
        let args = Commands::try_parse_from(["coalescer", "queue", "list", "--limit", "5"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Queue {
                action: QueueCommand::List { limit: Some(5) }
            }
        ));
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "1970-01-01 00:00:00.000");
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_on_signal() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_shutdown(rx));
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }
}
