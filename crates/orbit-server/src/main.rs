use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use orbit_channel::FsBlobStore;
use orbit_db::Database;
use orbit_directory::{DirectoryActor, Sha256Hasher};

mod error;
mod router;
mod routes;
mod ws;

use router::ActorRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orbit=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("ORBIT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ORBIT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let data_dir = PathBuf::from(std::env::var("ORBIT_DATA_DIR").unwrap_or_else(|_| "data".into()));
    let asset_base =
        std::env::var("ORBIT_ASSET_BASE_URL").unwrap_or_else(|_| "/assets".into());

    std::fs::create_dir_all(&data_dir)?;

    // The directory actor and its store
    let db = Database::open_directory(&data_dir.join("directory.db"))?;
    let directory = DirectoryActor::spawn(db, Arc::new(Sha256Hasher));

    // Attachment storage, served back under /assets
    let assets_dir = data_dir.join("assets");
    let blobs = Arc::new(FsBlobStore::new(assets_dir.clone(), asset_base).await?);

    let actors = ActorRouter::new(directory, blobs, data_dir);

    // Routes
    let public_routes = Router::new()
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .route("/logout", post(routes::logout))
        .route("/users", get(routes::list_users))
        .route("/users/online", get(routes::list_online_users))
        .route(
            "/channels",
            get(routes::list_channels).post(routes::create_channel),
        )
        .route("/channels/{channel_id}/invite", post(routes::invite))
        .route("/channels/{channel_id}/leave", post(routes::leave))
        .with_state(actors.clone());

    let channel_routes = Router::new()
        .route(
            "/channel/messages",
            get(routes::list_messages).post(routes::post_message),
        )
        .route("/channel/upload", post(routes::upload_attachment))
        .layer(middleware::from_fn_with_state(
            actors.clone(),
            routes::require_channel_access,
        ))
        .with_state(actors.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .with_state(actors);

    let app = Router::new()
        .merge(public_routes)
        .merge(channel_routes)
        .merge(ws_route)
        .nest_service("/assets", ServeDir::new(assets_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Orbit server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
