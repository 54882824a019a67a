mod api;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tgforwarder_core::{
    Config, Database, DeliveryLogRepository, DispatchConfig, DispatchEngine, DispatcherConfig,
    TelegramBotClient, init_telemetry, migrations,
    rules::RuleRepository,
    run_dispatcher,
    transport::{ListenerConfig, run_update_listener},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Buffered inbound messages between the update listener and the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub(crate) struct AppState {
    db: Database,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::new(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.telegram.poll_timeout_secs + 10))
        .build()?;
    // Config validation guarantees a token whenever the listener is enabled.
    let bot_token = config.telegram.bot_token.clone().unwrap_or_default();
    let bot = TelegramBotClient::new(http, bot_token)
        .with_api_base(config.telegram.api_base.clone());

    let engine = DispatchEngine::new(
        Arc::new(RuleRepository::new(db.clone())),
        Arc::new(bot.clone()),
        Arc::new(DeliveryLogRepository::new(db.clone())),
        DispatchConfig {
            delivery_timeout: config.dispatch.delivery_timeout(),
            fail_open_on_store_error: config.dispatch.fail_open_on_store_error,
        },
    );

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let listener_handle = if config.telegram.enabled {
        match bot.get_me().await {
            Ok(me) => info!(bot_id = me.id, username = ?me.username, "connected to telegram"),
            Err(err) => warn!(error = %err, "getMe failed; polling anyway"),
        }
        Some(tokio::spawn(run_update_listener(
            bot,
            events_tx,
            ListenerConfig {
                poll_timeout_secs: config.telegram.poll_timeout_secs,
                ..Default::default()
            },
            shutdown.child_token(),
        )))
    } else {
        warn!("telegram listener disabled; only the HTTP API is served");
        drop(events_tx);
        None
    };

    let dispatcher_handle = tokio::spawn(run_dispatcher(
        engine,
        events_rx,
        DispatcherConfig {
            max_in_flight: config.dispatch.max_in_flight,
            drain_timeout: config.dispatch.drain_timeout(),
        },
        shutdown.child_token(),
    ));

    let state = AppState { db: db.clone() };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("tgforwarder listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = listener_handle {
        let _ = handle.await;
    }
    let _ = dispatcher_handle.await;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match state.db.health_check().await {
        Ok(_) => "ok",
        Err(_) => "unhealthy",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_status == "ok" {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok_when_database_is_reachable() {
        let db = Database::new(std::path::Path::new(":memory:"))
            .await
            .expect("db");
        let state = AppState { db };
        let (status, Json(body)) = healthz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.database, "ok");
    }

    #[tokio::test]
    async fn api_routes_are_mounted() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("routes.sqlite"))
            .await
            .expect("db");
        migrations::run_migrations(&db).await.expect("migrations");
        let app = router(AppState { db });

        for uri in ["/api/rules", "/api/logs"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let body = to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            assert_eq!(&body[..], b"[]", "{uri}");
        }
    }
}
