//! Unified Ecommerce - shared basket, checkout and refund service

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unified_ecommerce::config::Settings;
use unified_ecommerce::gateway::CybersourceGateway;
use unified_ecommerce::mail::LogMailer;
use unified_ecommerce::services::{events, EventWorker, Services};
use unified_ecommerce::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Arc::new(Settings::from_env()?);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if settings.json_logs {
        tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    }

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await.context("connecting to the database")?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, keeping everything in memory");
            Arc::new(MemoryStore::new())
        }
    };

    if let Err(e) = settings.require_gateway() {
        tracing::warn!(error = %e, "Payment gateway is not fully configured");
    }
    let gateway = Arc::new(CybersourceGateway::new(settings.cybersource.clone(), settings.currency.clone()));

    let (sender, receiver) = events::channel();
    let mut worker = EventWorker::new(store.clone(), Arc::new(LogMailer), settings.clone());
    if let Some(url) = &settings.nats_url {
        match async_nats::connect(url).await {
            Ok(client) => worker = worker.with_nats(client),
            Err(e) => tracing::warn!(error = %e, "Couldn't connect to NATS, events stay local"),
        }
    }
    worker.spawn(receiver);

    let services = Services::new(store, gateway, settings.clone(), sender);
    let app = unified_ecommerce::api::router(services).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", settings.port);
    tracing::info!("🚀 Unified Ecommerce listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
