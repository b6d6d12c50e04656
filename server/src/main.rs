mod config;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::auth::{DevTokenVerifier, HttpTokenVerifier, TokenVerifier};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();

    let verifier: Arc<dyn TokenVerifier> = match &config.auth_url {
        Some(url) => {
            tracing::info!(auth_url = %url, "using identity service for admission");
            Arc::new(HttpTokenVerifier::new(url.clone()))
        }
        None => {
            tracing::warn!("AUTH_URL not set, accepting development tokens");
            Arc::new(DevTokenVerifier)
        }
    };

    let state = state::AppState::new(config, verifier);
    let port = state.config.port;

    // Background liveness monitor: presence expiry + connection pings.
    let _monitor = services::monitor::spawn_monitor_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "pulse hub listening");
    axum::serve(listener, app).await.expect("server failed");
}
