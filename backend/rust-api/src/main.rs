#![allow(dead_code)]

use digitspan_api::{config::Config, create_router, services::AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _tracer = init_telemetry();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "digitspan_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer())
        .init();

    tracing::info!("Starting digit span API");

    let config = Config::load()?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let app_state = if std::env::var("DIGITSPAN_IN_MEMORY").is_ok() {
        tracing::warn!("Running on in-memory backends, results are not persisted");
        AppState::in_memory(config)
    } else {
        let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
        tracing::info!("MongoDB client created");

        let redis_client = redis::Client::open(config.redis_uri.clone())?;
        AppState::new(config, mongo_client, redis_client).await?
    };

    let bind_addr = app_state.config.bind_addr.clone();
    let app = create_router(Arc::new(app_state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    shutdown_telemetry();
    Ok(())
}

fn init_telemetry() -> Option<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("WARNING: OTLP exporter unavailable, tracing locally only: {}", e);
            return None;
        }
    };

    let resource = Resource::builder_empty()
        .with_service_name("digitspan-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("digitspan-api");
    opentelemetry::global::set_tracer_provider(provider);

    Some(tracer)
}

fn shutdown_telemetry() {
    // dropping the global provider flushes pending spans
    tracing::info!("Shutting down OpenTelemetry");
}
