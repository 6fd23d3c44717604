use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tally_bot::config::{Config, UpdateMode};
use tally_bot::db::Database;
use tally_bot::session::Coordinator;
use tally_bot::store::SessionStore;
use tally_bot::transport::telegram::{self, TelegramClient};
use tally_bot::{api, metrics};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    metrics::register_metrics();

    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .expect("Failed to initialize database"),
    );
    let store = SessionStore::load(db.clone())
        .await
        .expect("Failed to load session state");

    let client = TelegramClient::new(&config.api_url, &config.bot_token);
    let coordinator = Coordinator::new(Arc::new(store), Arc::new(client.clone()));

    match config.update_mode {
        UpdateMode::Polling => {
            tracing::info!("Receiving updates by long polling");
            telegram::spawn_polling(client, coordinator.clone(), config.poll_timeout_secs);
        }
        UpdateMode::Webhook => {
            tracing::info!("Receiving updates on /telegram/webhook");
        }
    }

    let app = api::router(coordinator, config.webhook_secret.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("Failed to bind HTTP port");

    tracing::info!("Tally bot listening on port {}", config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
        .expect("Failed to start server");

    tracing::info!("Shutting down");
    db.close().await;
}
