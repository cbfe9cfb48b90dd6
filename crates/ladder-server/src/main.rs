use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ladder_api::middleware::create_token;
use ladder_api::state::AppStateInner;
use ladder_engine::{Engine, EngineConfig, NotifyingJanitor, Sweeper};

/// Log targets are crate names with `_`, one directive per workspace crate.
const DEFAULT_LOG_FILTER: &str =
    "ladder_server=debug,ladder_engine=debug,ladder_api=debug,ladder_db=debug,tower_http=debug";

/// Well-known placeholder values that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("LADDER_JWT_SECRET").unwrap_or_default();
    if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) || jwt_secret.len() < 16 {
        bail!("LADDER_JWT_SECRET must be set to a real secret of at least 16 characters");
    }

    // `ladder mint-token <service> [hours]` prints a token for a caller and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("mint-token") {
        let service = args
            .get(1)
            .context("usage: ladder mint-token <service> [hours]")?;
        let hours: u64 = match args.get(2) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("'{}' is not a number of hours", raw))?,
            None => 24,
        };
        let token = create_token(&jwt_secret, service, Duration::from_secs(hours * 3600))?;
        println!("{}", token);
        return Ok(());
    }

    let db_path = std::env::var("LADDER_DB_PATH").unwrap_or_else(|_| "ladder.db".into());
    let host = std::env::var("LADDER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = env_or("LADDER_PORT", 3100)?;

    let defaults = EngineConfig::default();
    let config = EngineConfig {
        default_rating: env_or("LADDER_DEFAULT_RATING", defaults.default_rating)?,
        pending_timeout: Duration::from_secs(env_or("LADDER_PENDING_TIMEOUT_HOURS", 6u64)? * 3600),
        sweep_interval: Duration::from_secs(env_or("LADDER_SWEEP_INTERVAL_SECS", 30u64)?.max(1)),
        ..defaults
    };

    // Init database and restore state
    let db = Arc::new(ladder_db::Database::open(&PathBuf::from(&db_path))?);
    let engine = Arc::new(Engine::load(config, db).await?);

    // Lifecycle sweeper
    let cancel = CancellationToken::new();
    let janitor = Arc::new(NotifyingJanitor::new(engine.notifier()));
    let sweeper = tokio::spawn(Sweeper::new(engine.clone(), janitor).run(cancel.clone()));

    // Routes
    let app = ladder_api::router(Arc::new(AppStateInner {
        engine: engine.clone(),
        jwt_secret,
    }))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ladder server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    cancel.cancel();
    let _ = sweeper.await;
    engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_names_every_crate() {
        for target in ["ladder_server", "ladder_engine", "ladder_api", "ladder_db"] {
            assert!(
                DEFAULT_LOG_FILTER.contains(&format!("{target}=")),
                "{target} missing from the default filter"
            );
        }
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
