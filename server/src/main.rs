use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use resale_server::backend::postgres::PgBackend;
use resale_server::config::Config;
use resale_server::routes::create_routes;
use resale_server::state::{load_shard_map, AppState};
use resale_server::telemetry;

#[tokio::main]
async fn main() {
    dotenv().ok();
    telemetry::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let backend = Arc::new(PgBackend::new(pool, config.session_ttl));
    let shards = load_shard_map(backend.as_ref()).await;
    let addr = config.bind_addr;

    let app: Router = create_routes(AppState::new(config, backend, shards));

    tracing::info!(%addr, "Server running");

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
