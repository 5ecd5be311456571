use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::{groups, messages, polls, users};
use parley_gateway::auth::AuthVerifier;
use parley_gateway::{Gateway, connection};
use parley_store::{SqliteStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Shared state
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&PathBuf::from(&db_path))?);
    let verifier = AuthVerifier::new(&jwt_secret);
    let gateway = Gateway::new(store.clone(), verifier.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        store,
        engine: gateway.engine.clone(),
        verifier,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/{user_id}/block", post(users::block_user).delete(users::unblock_user))
        .route("/groups", post(groups::create_group))
        .route("/groups/{group_id}", get(groups::get_group).put(groups::update_group))
        .route("/groups/{group_id}/members", post(groups::add_member))
        .route("/groups/{group_id}/members/{user_id}", delete(groups::remove_member))
        .route("/groups/{group_id}/messages", get(messages::group_history))
        .route("/messages", post(messages::send_message))
        .route(
            "/messages/{id}",
            get(messages::direct_history)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/messages/{id}/pin", post(messages::pin_message))
        .route("/messages/{id}/read", post(messages::mark_read))
        .route(
            "/messages/{id}/reactions",
            post(messages::add_reaction).delete(messages::remove_reaction),
        )
        .route("/messages/{id}/reply", post(messages::reply))
        .route("/messages/{id}/forward", post(messages::forward))
        .route("/messages/{id}/thread", get(messages::thread))
        .route("/polls", post(polls::create_poll))
        .route("/polls/{poll_id}", get(polls::get_poll))
        .route("/polls/{poll_id}/votes", post(polls::vote))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}
