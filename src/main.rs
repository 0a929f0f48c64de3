use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tower_http::cors::CorsLayer;

use minefield_backend::api;
use minefield_backend::config::Config;
use minefield_backend::engine::config::{SECURITY_GC_SECS, SESSION_SWEEP_SECS};
use minefield_backend::engine::game::GameState;
use minefield_backend::engine::server::GameServer;
use minefield_backend::engine::world::{World, WorldParams};
use minefield_backend::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let seed = config
        .world_seed
        .unwrap_or_else(|| rand::thread_rng().gen());
    tracing::info!(seed, "Generating world");
    let world = World::generate(&WorldParams {
        seed,
        ..WorldParams::default()
    });
    tracing::info!(
        size = world.size,
        total_mines = world.total_mines,
        spawn_points = world.spawn_points().len(),
        "World ready"
    );

    let server = Arc::new(GameServer::new(
        GameState::new(world),
        config.session_secret.clone(),
        config.admin_key.clone(),
    ));

    // Chained-detonation scheduler: drains due waves at the tick rate.
    let tick_server = server.clone();
    let tick_interval = Duration::from_millis(1000 / config.tick_rate.max(1) as u64);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            tick_server.tick();
        }
    });

    // Idle-session sweeper: evicts players whose sessions went stale.
    let sweep_server = server.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_SECS));
        loop {
            interval.tick().await;
            sweep_server.sweep_sessions();
        }
    });

    // Security and rate-limit garbage collection.
    let gc_server = server.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SECURITY_GC_SECS));
        loop {
            interval.tick().await;
            gc_server.security_gc();
        }
    });

    let app = api::router(server).layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        });

    tracing::info!("Minefield backend listening on {addr}");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}
