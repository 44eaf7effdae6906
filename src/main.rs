//! gatekeep server binary.
//!
//! ```text
//!     Client ──▶ request id / trace / timeout (tower-http)
//!                  │
//!                  ▼
//!            panic recovery ──▶ rate limiter ──▶ authenticator ──▶ handler
//!                                    │                 │              │
//!                               client sweep      token store   background runner
//!                                    │                 │              │
//!                                    └─────── structured logger ◀─────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gatekeep::auth::{MemoryStore, Scope, TokenAuthenticator, User};
use gatekeep::config::{load_config, watcher::ConfigWatcher, AppConfig};
use gatekeep::lifecycle::{signals, Shutdown};
use gatekeep::observability::{layer, metrics};
use gatekeep::props;
use gatekeep::resilience::install_panic_hook;
use gatekeep::{HttpServer, Logger};

#[derive(Debug, Parser)]
#[command(name = "gatekeep", version, about = "Rate-limited, token-authenticated API server")]
struct Cli {
    /// Path to a TOML configuration file. Watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    let logger = Arc::new(Logger::stdout(config.logging.min_level));
    if let Err(e) = layer::install(logger.clone(), &config.logging.filter) {
        logger.print_fatal(&e, props!());
    }
    install_panic_hook();

    if config.observability.metrics_enabled {
        let addr: SocketAddr = match config.observability.metrics_address.parse() {
            Ok(addr) => addr,
            Err(e) => logger.print_fatal(
                &e,
                props! {"metrics_address" => config.observability.metrics_address},
            ),
        };
        if let Err(e) = metrics::init_metrics(addr) {
            logger.print_fatal(&e, props! {"metrics_address" => addr});
        }
    }

    let store = Arc::new(MemoryStore::new());
    if config.environment == "development" {
        seed_demo_user(&logger, &store, &config).await;
    }

    let shutdown = Arc::new(Shutdown::new());
    tokio::spawn(signals::wait_for_termination(shutdown.clone()));

    let (config_updates, _watcher) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(watcher) => (updates, Some(watcher)),
                Err(e) => {
                    logger.print_error(&e, props! {"path" => path.display()});
                    (updates, None)
                }
            }
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    let listener = match TcpListener::bind(&config.listener.bind_address).await {
        Ok(listener) => listener,
        Err(e) => logger.print_fatal(&e, props! {"addr" => config.listener.bind_address}),
    };

    let server = HttpServer::new(config, logger.clone(), store);
    if let Err(e) = server.run(listener, config_updates, shutdown.subscribe()).await {
        logger.print_fatal(&e, props!());
    }

    Ok(())
}

/// Development convenience: one inactive user and an activation token to
/// try the activation flow against.
async fn seed_demo_user(logger: &Logger, store: &Arc<MemoryStore>, config: &AppConfig) {
    store.insert_user(User {
        id: 1,
        name: "demo".to_string(),
        activated: false,
    });

    let auth = TokenAuthenticator::new(store.clone(), store.clone());
    let ttl = Duration::from_secs(config.auth.activation_ttl_secs);
    match auth.issue(1, ttl, Scope::Activation).await {
        Ok(issued) => logger.print_info(
            "seeded demo user",
            props! {"user_id" => 1, "activation_token" => issued.plaintext},
        ),
        Err(e) => logger.print_error(&e, props! {"user_id" => 1}),
    }
}
