use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, LoggingConfig, StoreBackend, TurnstileConfig};
use turnstile::http::HttpServer;
use turnstile::ratelimit::{Identity, QuotaOverride, RateLimiter};
use turnstile::store::{CounterStore, MemoryStore, RedisStore};

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Per-identity rate limiting gate")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve HTTP traffic behind the rate limiting gate (default)
    Serve,
    /// Print the effective configuration as YAML
    Config,
    /// Store a quota override for one token or IP
    Override(OverrideArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("identity").required(true).args(["token", "ip"])))]
struct OverrideArgs {
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    ip: Option<String>,

    /// Requests admitted per window
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    limit: Option<u64>,

    /// Window length in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    window: Option<u64>,

    /// Lifetime of the override keys in seconds; 0 keeps them until removed
    #[arg(long, default_value_t = 86_400)]
    ttl: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = TurnstileConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing(&config.logging);
            serve(config).await
        }
        Command::Config => {
            let mut shown = config;
            if shown.store.password.is_some() {
                shown.store.password = Some("***".to_string());
            }
            print!("{}", shown.to_yaml()?);
            Ok(())
        }
        Command::Override(args) => {
            init_tracing(&config.logging);
            store_override(config, args).await
        }
    }
}

/// Install the global subscriber; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// How often expired entries are dropped from the in-memory store.
const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

async fn connect_limiter(config: &TurnstileConfig) -> anyhow::Result<RateLimiter> {
    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.store.addr))?;
            store.ping().await.context("Redis did not answer PING")?;
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory counter store; counters are not shared between instances");
            let store = Arc::new(MemoryStore::new());
            tokio::spawn(purge_expired(store.clone()));
            store
        }
    };

    Ok(RateLimiter::new(
        store,
        config.limits.default_limit,
        config.limits.default_window_secs,
    ))
}

async fn purge_expired(store: Arc<MemoryStore>) {
    let mut ticker = tokio::time::interval(MEMORY_PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        let removed = store.purge_expired();
        if removed > 0 {
            debug!(removed = removed, "Purged expired counters");
        }
    }
}

async fn serve(config: TurnstileConfig) -> anyhow::Result<()> {
    info!("Starting Turnstile rate limiting gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rate_limiter = Arc::new(connect_limiter(&config).await?);
    info!(
        default_limit = config.limits.default_limit,
        default_window_secs = config.limits.default_window_secs,
        "Rate limiter initialized"
    );

    let server = HttpServer::new(
        config.server.http_addr,
        rate_limiter,
        &config.server.token_header,
    )?;

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile stopped");
    Ok(())
}

async fn store_override(config: TurnstileConfig, args: OverrideArgs) -> anyhow::Result<()> {
    if config.store.backend == StoreBackend::Memory {
        anyhow::bail!(
            "overrides need a shared store; the memory backend lives only in this process"
        );
    }

    let identity = match (args.token, args.ip) {
        (Some(token), _) => Identity::Token(token),
        (None, Some(ip)) => Identity::Ip(ip),
        (None, None) => anyhow::bail!("either --token or --ip is required"),
    };
    let quota = QuotaOverride {
        limit: args.limit,
        window_secs: args.window,
    };
    if quota.is_empty() {
        anyhow::bail!("nothing to store: pass --limit and/or --window");
    }

    let rate_limiter = connect_limiter(&config).await?;
    rate_limiter
        .set_override(&identity, quota, args.ttl)
        .await
        .with_context(|| format!("Failed to store override for {}", identity))?;

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["turnstile"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_override_requires_identity() {
        assert!(Cli::try_parse_from(["turnstile", "override", "--limit", "3"]).is_err());
        assert!(
            Cli::try_parse_from(["turnstile", "override", "--token", "t", "--ip", "1.2.3.4"])
                .is_err()
        );
    }

    #[test]
    fn test_override_rejects_zero_limit() {
        assert!(
            Cli::try_parse_from(["turnstile", "override", "--token", "t", "--limit", "0"]).is_err()
        );
    }

    #[tokio::test]
    async fn test_override_refused_for_memory_backend() {
        let mut config = TurnstileConfig::default();
        config.store.backend = StoreBackend::Memory;
        let cli =
            Cli::try_parse_from(["turnstile", "override", "--ip", "10.0.0.1", "--limit", "3"])
                .unwrap();
        let Some(Command::Override(args)) = cli.command else {
            panic!("expected the override command");
        };

        let err = store_override(config, args).await.unwrap_err();
        assert!(err.to_string().contains("memory backend"), "{}", err);
    }

    #[test]
    fn test_override_accepts_zero_ttl() {
        let cli = Cli::try_parse_from([
            "turnstile", "override", "--ip", "10.0.0.1", "--limit", "3", "--ttl", "0",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Override(args)) => assert_eq!(args.ttl, 0),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_override_args() {
        let cli = Cli::try_parse_from([
            "turnstile", "-c", "cfg.yaml", "override", "--token", "abc123", "--limit", "3",
            "--window", "5",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("cfg.yaml")));
        match cli.command {
            Some(Command::Override(args)) => {
                assert_eq!(args.token.as_deref(), Some("abc123"));
                assert_eq!(args.limit, Some(3));
                assert_eq!(args.window, Some(5));
                assert_eq!(args.ttl, 86_400);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
