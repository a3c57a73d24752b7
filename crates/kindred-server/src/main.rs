mod reaper;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use kindred_api::auth::{self, AppState, AppStateInner};
use kindred_api::middleware::require_auth;
use kindred_api::{admin, groups, matches, notes, reactions};
use kindred_gateway::connection;
use kindred_gateway::dispatcher::Dispatcher;
use kindred_types::models::Ttls;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kindred=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("KINDRED_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: KINDRED_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let db_path = std::env::var("KINDRED_DB_PATH").unwrap_or_else(|_| "kindred.db".into());
    let host = std::env::var("KINDRED_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("KINDRED_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let admin_token = std::env::var("KINDRED_ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

    let ttls = Ttls {
        group_discussion: Duration::from_secs(env_u64("KINDRED_GROUP_TTL_MINS", 30) * 60),
        match_request: Duration::from_secs(env_u64("KINDRED_REQUEST_TTL_HOURS", 24) * 3600),
        private_discussion: Duration::from_secs(env_u64("KINDRED_PRIVATE_TTL_MINS", 120) * 60),
    };
    let sweep_interval_secs = env_u64("KINDRED_SWEEP_INTERVAL_SECS", 300);

    // Init database
    let db = kindred_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: dispatcher.clone(),
        jwt_secret: jwt_secret.clone(),
        ttls,
        admin_token,
    });

    // Background reaper
    tokio::spawn(reaper::run_sweep_loop(app_state.clone(), sweep_interval_secs));

    // Routes
    // Public surface: auth, health, and the lazily-expiring room read.
    // Everything else wants a caller identity.
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .route("/discussions/{discussion_id}", get(groups::get_discussion))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/notes", get(notes::list_notes))
        .route("/notes", post(notes::create_note))
        .route("/notes/user/me", get(notes::my_notes))
        .route("/notes/{note_id}", get(notes::get_note))
        .route("/notes/{note_id}", put(notes::update_note))
        .route("/notes/{note_id}", delete(notes::delete_note))
        .route("/discussions", get(groups::list_discussions))
        .route("/reactions/notes/{note_id}", post(reactions::toggle_reaction))
        .route("/discussions/join", post(groups::join_discussion))
        .route("/discussions/{discussion_id}/messages", get(groups::list_messages))
        .route("/discussions/{discussion_id}/messages", post(groups::post_message))
        .route("/match/request", post(matches::create_request))
        .route("/match/requests/received", get(matches::list_received))
        .route("/match/requests/sent", get(matches::list_sent))
        .route("/match/requests/{request_id}/accept", post(matches::accept_request))
        .route("/match/requests/{request_id}/decline", post(matches::decline_request))
        .route("/match/discussions", get(matches::list_discussions))
        .route("/match/discussions/{discussion_id}", get(matches::get_discussion))
        .route("/match/discussions/{discussion_id}/messages", get(matches::list_messages))
        .route("/match/discussions/{discussion_id}/messages", post(matches::post_message))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state.clone());

    // Token-gated inside the handlers, not by the JWT middleware
    let admin_routes = Router::new()
        .route("/admin/cleanup", post(admin::force_cleanup))
        .route("/admin/stats/expiration", get(admin::expiration_stats))
        .with_state(app_state);

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(ServerState {
        dispatcher: dispatcher.clone(),
        jwt_secret,
    });

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Kindred server listening on {}", addr);
    info!(
        "TTLs: rooms {}s, requests {}s, private {}s; sweep every {}s",
        ttls.group_discussion.as_secs(),
        ttls.match_request.as_secs(),
        ttls.private_discussion.as_secs(),
        sweep_interval_secs
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
