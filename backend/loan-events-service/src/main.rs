use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use db_pool::{create_pool, PoolState};
use loan_events_service::config::Config;
use loan_events_service::metrics;
use loan_events_service::services::{
    ConsumerSettings, KafkaDeadLetterProducer, KafkaEventSource, LoanEventConsumer,
    PgLoanEventSink,
};
use loan_events_service::telemetry::{init_tracing, shutdown_channel};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

const SERVICE_NAME: &str = "loan-consumer";

async fn health(pool: web::Data<PgPool>) -> HttpResponse {
    let state = PoolState::of(pool.get_ref());
    let connections = serde_json::json!({
        "active": state.active(),
        "idle": state.idle,
        "max": state.max,
        "saturated": state.is_saturated(),
    });

    match sqlx::query("SELECT 1").execute(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "connections": connections,
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unavailable",
            "error": e.to_string(),
            "connections": connections,
        })),
    }
}

async fn metrics_handler() -> HttpResponse {
    match metrics::render() {
        Ok((content_type, body)) => HttpResponse::Ok().content_type(content_type).body(body),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info,loan_events_service=debug,loan_consumer=debug");

    info!("Starting {}", SERVICE_NAME);

    let config = Config::from_env(SERVICE_NAME).context("Invalid configuration")?;
    config.store.log_config();

    let pool = create_pool(config.store.clone())
        .await
        .context("Failed to create database pool")?;

    if config.run_migrations {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Migrations completed successfully");
    }

    let source = KafkaEventSource::new(&config.kafka, config.delivery)
        .context("Failed to create Kafka consumer")?;
    let sink = PgLoanEventSink::new(pool.clone(), config.delivery.write_mode(), SERVICE_NAME);

    let mut consumer = LoanEventConsumer::new(source, sink, ConsumerSettings::from(&config));
    match &config.kafka.dead_letter_topic {
        Some(topic) => {
            let dead_letter = KafkaDeadLetterProducer::new(&config.kafka.brokers, topic)
                .context("Failed to create dead-letter producer")?;
            consumer = consumer.with_dead_letter(Arc::new(dead_letter));
        }
        None => warn!("KAFKA_DLQ_TOPIC not set, events that fail permanently will be dropped"),
    }

    let pool_data = web::Data::new(pool.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(("0.0.0.0", config.metrics_port))
    .with_context(|| format!("Failed to bind metrics port {}", config.metrics_port))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    actix_web::rt::spawn(server);
    info!(port = config.metrics_port, "Metrics server listening");

    let shutdown = shutdown_channel();
    consumer.run(shutdown).await;

    server_handle.stop(true).await;
    pool.close().await;

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
