use super::config::{resolve_paths, WelcomerConfig};
use super::logging;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use welcomer::bot::WelcomeBot;
use welcomer::dispatch::DedupLedger;
use welcomer::session::{FileCredentialStore, LifecycleEvent, Termination};
use welcomer::shutdown::Shutdown;
use welcomer::transport::BridgeTransport;

/// Run the bot service
///
/// Connects to the gateway, resumes the stored session (or starts pairing
/// when there is none), and greets members added to groups until Ctrl-C.
///
/// ## Configuration Loading
///
/// 1. `--config` flag if provided
/// 2. `config.toml` inside `--data-dir` (default `~/.local/share/welcomer`)
///
/// If the config file doesn't exist, a default one is generated.
///
/// ## Exit status
///
/// Zero after a Ctrl-C shutdown. Non-zero when the network logs the session
/// out, reconnect attempts run out, the ledger cannot be loaded or written,
/// or the gateway rejects the connection outright.
pub async fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, data_dir) = resolve_paths(config_path, data_dir);
    let (config, created) = WelcomerConfig::load_or_create(&config_path, &data_dir)?;
    logging::init(&config.logging)?;

    if created {
        info!(path = %config_path.display(), "Created default configuration");
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        endpoint = %config.transport.endpoint,
        policy = %config.dispatch.dedup_policy,
        "Starting welcomer"
    );

    let ledger_path = config.ledger_path(&data_dir);
    let ledger = DedupLedger::load(&ledger_path, config.dispatch.dedup_policy, &config.addresses)
        .map_err(|e| format!("Failed to load ledger: {}", e))?;
    info!(entries = ledger.len(), path = %ledger_path.display(), "Ledger loaded");

    let store = FileCredentialStore::new(config.credentials_path(&data_dir));
    let transport = BridgeTransport::new(config.bridge_config());
    let bot = WelcomeBot::new(
        transport,
        store,
        config.lifecycle_config(),
        ledger,
        config.addresses.clone(),
        config.dispatch_config(),
    );

    let shutdown = Arc::new(Shutdown::new());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger();
            }
        }
    });
    tokio::spawn(report_lifecycle(bot.handle().subscribe()));

    let termination = bot.run(&shutdown).await?;
    exit_status(termination)
}

/// Operator-facing output for lifecycle events
async fn report_lifecycle(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::PairingChallenge(payload)) => {
                println!("🔗 Pairing required. Pair this payload from the phone app:");
                println!("{}", payload);
            }
            Ok(LifecycleEvent::Opened { own_address }) => {
                println!("✅ Connected as {}", own_address);
            }
            Ok(LifecycleEvent::ReconnectScheduled { attempt, delay }) => {
                println!(
                    "🔄 Connection lost, retry #{} in {}",
                    attempt,
                    humantime::format_duration(delay)
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Lifecycle reporter lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn exit_status(termination: Termination) -> Result<(), Box<dyn std::error::Error>> {
    match termination {
        Termination::Shutdown => {
            println!("👋 Welcomer stopped");
            Ok(())
        }
        Termination::LoggedOut => Err(
            "Session was logged out by the network. Run `welcomer reset-session`, then `welcomer run` to pair again."
                .into(),
        ),
        Termination::RetriesExhausted { attempts } => Err(format!(
            "Gave up after {} reconnect attempts; restart when the gateway is reachable",
            attempts
        )
        .into()),
    }
}
