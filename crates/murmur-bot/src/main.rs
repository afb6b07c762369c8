use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{info, warn};

use murmur_agent::{ChatProvider, ChatRequest, CompletionClient, DeepSeekProvider, ProviderError};
use murmur_core::config::{CompletionConfig, FeedConfig, MurmurConfig};
use murmur_sessions::SessionStore;
use murmur_users::PolicyStore;

mod commands;
mod dispatch;
mod feed;

use commands::CommandRouter;
use dispatch::Dispatcher;
use feed::FeedClient;

/// Private-message AI relay bot.
#[derive(Parser, Debug)]
#[command(name = "murmur-bot", version)]
struct Cli {
    /// Path to murmur.toml (default: ~/.murmur/murmur.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "murmur_bot=info,murmur_agent=info,murmur_sessions=info,murmur_users=info".into()
            }),
        )
        .init();

    // config path: --config flag > MURMUR_CONFIG env > ~/.murmur/murmur.toml
    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("MURMUR_CONFIG").ok());
    let config = MurmurConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MurmurConfig::default()
    });

    // build services: constructed once here, shared by handle
    let sessions = Arc::new(SessionStore::new(
        config.sessions.max_history,
        Duration::from_secs(config.sessions.idle_timeout_secs),
    ));
    let policy = Arc::new(PolicyStore::open(
        &config.storage.policy_path,
        &config.bootstrap_ids(),
    )?);
    info!(path = %config.storage.policy_path, enabled = policy.enabled_users().len(), "policy store ready");

    let provider = build_provider(&config.completion);
    let completion = Arc::new(CompletionClient::new(
        provider,
        &config.completion,
        config.bot.default_prompt.clone(),
    ));

    let router = CommandRouter::new(
        Arc::clone(&sessions),
        Arc::clone(&policy),
        config.bot.admin_id.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        router,
        Arc::clone(&sessions),
        Arc::clone(&policy),
        completion,
    ));

    let feed = Arc::new(FeedClient::new(&config.feed));

    // Startup self-check: an unreachable event source is the only fatal
    // startup failure.
    let identity = feed
        .self_info()
        .await
        .context("cannot reach the event feed API; check feed.api_url and feed.access_token")?;
    info!(feed = %config.feed.api_url, identity = %identity, "connected to event feed");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let sweep = spawn_sweep_task(
        Arc::clone(&sessions),
        Duration::from_secs(config.sessions.sweep_period_secs),
        shutdown_rx.clone(),
    );

    run_poll_loop(feed, dispatcher, &config.feed, shutdown_rx).await;

    let _ = sweep.await;
    info!("murmur stopped");
    Ok(())
}

/// Pull event batches and fan each event out to its own task.
///
/// Shutdown stops polling promptly but lets in-flight event tasks finish
/// naturally; aborting mid-event could strand an in-flight marker or tear
/// a policy write.
async fn run_poll_loop(
    feed: Arc<FeedClient>,
    dispatcher: Arc<Dispatcher>,
    config: &FeedConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let poll_pause = Duration::from_secs(config.poll_pause_secs);
    let error_pause = Duration::from_secs(config.error_pause_secs);
    let mut tasks: JoinSet<()> = JoinSet::new();

    info!("event poll loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let batch = tokio::select! {
            result = feed.latest_events() => result,
            _ = shutdown.changed() => break,
        };

        let pause = match batch {
            Ok(events) => {
                for event in events {
                    let feed = Arc::clone(&feed);
                    let dispatcher = Arc::clone(&dispatcher);
                    tasks.spawn(async move {
                        if let Some(reply) = dispatcher.handle_event(event).await {
                            info!(user_id = %reply.user_id, "sending reply");
                            if let Err(e) = feed.send_reply(&reply).await {
                                warn!(error = %e, "reply delivery failed");
                            }
                        }
                    });
                }
                poll_pause
            }
            Err(e) => {
                warn!(error = %e, "event poll failed");
                error_pause
            }
        };

        // Reap whatever already finished so the set doesn't grow unbounded.
        while tasks.try_join_next().is_some() {}

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!(in_flight = tasks.len(), "poll loop stopping, draining event tasks");
    while tasks.join_next().await.is_some() {}
}

/// Periodic expiry sweep, so idle sessions are reclaimed even without
/// traffic. Runs until the shutdown signal flips.
fn spawn_sweep_task(
    sessions: Arc<SessionStore>,
    period: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; skip that first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = sessions.sweep_expired();
                    if purged > 0 {
                        info!(purged, "cleared expired sessions");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Build the completion provider from config.
fn build_provider(config: &CompletionConfig) -> Box<dyn ChatProvider> {
    match config.api_key.as_deref() {
        Some(key) if !key.is_empty() => {
            info!(base_url = %config.base_url, model = %config.model, "completion provider: DeepSeek");
            Box::new(DeepSeekProvider::new(
                key.to_string(),
                Some(config.base_url.clone()),
            ))
        }
        _ => {
            warn!("no completion API key configured, AI replies will be apologies");
            Box::new(NullProvider)
        }
    }
}

/// Placeholder provider when no API key is configured.
struct NullProvider;

#[async_trait::async_trait]
impl ChatProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn complete(&self, _req: &ChatRequest) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable(
            "no completion API key configured; set completion.api_key in murmur.toml".into(),
        ))
    }
}
