//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Build the shared [`AppState`] from configuration
//! - Wrap routes in the request pipeline and tower-http layers
//! - Run the client sweep and token purge alongside the listener
//! - Apply configuration reloads while serving
//! - Drain background work on graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnFailure, TraceLayer},
};

use crate::auth::{MemoryStore, TokenAuthenticator, UserStore};
use crate::config::AppConfig;
use crate::http::handlers;
use crate::http::middleware::{authenticate, rate_limit, recover_panic};
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::observability::logging::Logger;
use crate::props;
use crate::resilience::BackgroundRunner;
use crate::security::{LimiterSettings, RateLimiter};

/// Application state injected into middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub logger: Arc<Logger>,
    pub limiter: Arc<RateLimiter>,
    pub auth: TokenAuthenticator,
    pub users: Arc<dyn UserStore>,
    pub runner: BackgroundRunner,
}

/// The gatekeep HTTP server.
pub struct HttpServer {
    router: Router,
    state: AppState,
    store: Arc<MemoryStore>,
}

impl HttpServer {
    /// Server exposing the built-in routes.
    pub fn new(config: AppConfig, logger: Arc<Logger>, store: Arc<MemoryStore>) -> Self {
        Self::with_routes(config, logger, store, handlers::routes())
    }

    /// Server exposing `routes` behind the full request pipeline.
    pub fn with_routes(
        config: AppConfig,
        logger: Arc<Logger>,
        store: Arc<MemoryStore>,
        routes: Router<AppState>,
    ) -> Self {
        let state = AppState {
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            auth: TokenAuthenticator::new(store.clone(), store.clone()),
            users: store.clone(),
            runner: BackgroundRunner::new(logger.clone(), &config.background),
            logger,
            config: Arc::new(config),
        };

        let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);
        let router = build_router(routes, state.clone(), request_timeout);
        Self {
            router,
            state,
            store,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.state.config
    }

    /// Serve on `listener` until `shutdown` fires, then wait for in-flight
    /// background tasks up to `background.drain_timeout_secs`.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<AppConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config.clone();
        let logger = self.state.logger.clone();

        let sweeper = self.state.limiter.spawn_sweeper(
            Duration::from_secs(config.rate_limit.sweep_interval_secs),
            Duration::from_secs(config.rate_limit.idle_eviction_secs),
            shutdown.resubscribe(),
        );
        let purger = self.store.spawn_purger(
            Duration::from_secs(config.auth.purge_interval_secs),
            shutdown.resubscribe(),
        );
        tokio::spawn(apply_reloads(
            self.state.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        logger.print_info(
            "starting server",
            props! {"addr" => addr, "env" => config.environment},
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        logger.print_info(
            "completing background tasks",
            props! {"addr" => addr, "in_flight" => self.state.runner.in_flight()},
        );
        let drain = Duration::from_secs(config.background.drain_timeout_secs);
        if !self.state.runner.wait_idle(drain).await {
            logger.print_error(
                &"background tasks still running after drain timeout",
                props! {"in_flight" => self.state.runner.in_flight()},
            );
        }

        let _ = sweeper.await;
        let _ = purger.await;

        logger.print_info("stopped server", props! {"addr" => addr});
        Ok(())
    }
}

/// Wrap `routes` in the request pipeline.
///
/// Outermost first: request id, trace, id propagation, timeout, panic
/// recovery, rate limit, authentication, then the route itself.
///
/// 5xx responses are traced at DEBUG only; the stage that produced the
/// failure has already written its Error entry.
#[allow(deprecated)]
pub fn build_router(routes: Router<AppState>, state: AppState, request_timeout: Duration) -> Router {
    routes
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), recover_panic))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(
            TraceLayer::new_for_http()
                .on_failure(DefaultOnFailure::new().level(tracing::Level::DEBUG)),
        )
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}

/// Apply the reloadable subset of each new configuration.
async fn apply_reloads(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<AppConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(new_config) => apply_reload(&state, &new_config),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

fn apply_reload(state: &AppState, new_config: &AppConfig) {
    let settings = LimiterSettings::from(&new_config.rate_limit);
    state.limiter.update_settings(settings);
    state.logger.set_min_level(new_config.logging.min_level);

    tracing::info!(
        rate_limit_enabled = settings.enabled,
        capacity = settings.capacity,
        refill_rate_per_second = settings.refill_rate_per_second,
        min_level = %new_config.logging.min_level,
        "Configuration reloaded"
    );
}
