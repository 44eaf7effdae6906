//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use gatekeep::auth::{MemoryStore, TokenAuthenticator, User};
use gatekeep::http::AppState;
use gatekeep::observability::logging::{Level, SharedBuffer};
use gatekeep::{AppConfig, HttpServer, Logger, Shutdown};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub logs: SharedBuffer,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn authenticator(&self) -> TokenAuthenticator {
        TokenAuthenticator::new(self.store.clone(), self.store.clone())
    }

    pub fn add_user(&self, id: i64, activated: bool) {
        self.store.insert_user(User {
            id,
            name: format!("user-{}", id),
            activated,
        });
    }
}

/// Config with the limiter off, so multi-request flows are not throttled.
#[allow(dead_code)]
pub fn unthrottled_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit.enabled = false;
    config
}

/// Start a server with the built-in routes, or `routes` when given.
pub async fn spawn_server(config: AppConfig, routes: Option<Router<AppState>>) -> TestServer {
    let logs = SharedBuffer::new();
    let logger = Arc::new(Logger::new(logs.clone(), Level::Info));
    let store = Arc::new(MemoryStore::new());

    let server = match routes {
        Some(routes) => HttpServer::with_routes(config, logger, store.clone(), routes),
        None => HttpServer::new(config, logger, store.clone()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    let handle = tokio::spawn(async move { server.run(listener, config_updates, server_shutdown).await });

    TestServer {
        addr,
        store,
        logs,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
