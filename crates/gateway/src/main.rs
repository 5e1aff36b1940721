//! Antrian gateway server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use antrian_gateway::{
    config::TransportKind,
    conversation::{ConversationEngine, InputClassifier, Questionnaire},
    create_router,
    intake::IntakeService,
    issuer::{IssuerConfig, TicketIssuer},
    lifecycle::{ConnectionLifecycleManager, LifecycleConfig},
    render::PngTicketRenderer,
    sequence::SequenceAllocator,
    store::{PgRecordStore, RecordStore},
    transport::{BridgeTransportConfig, HttpBridgeTransport, LoopbackTransport, TransportAdapter},
    AppState, Config,
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "antrian_gateway=info,tower_http=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = antrian_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    antrian_shared::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool));

    let bridge = match config.transport {
        TransportKind::Bridge => Some(Arc::new(HttpBridgeTransport::new(BridgeTransportConfig {
            base_url: config.bridge_url.clone(),
            api_key: config.bridge_api_key.clone(),
            webhook_secret: config.bridge_webhook_secret.clone(),
            request_timeout: config.delivery_timeout(),
        })?)),
        TransportKind::Loopback => None,
    };
    let transport: Arc<dyn TransportAdapter> = match &bridge {
        Some(bridge) => bridge.clone(),
        None => {
            tracing::warn!("Using loopback transport; no chat network is reachable");
            Arc::new(LoopbackTransport::new())
        }
    };
    tracing::info!(transport = transport.name(), "Chat transport selected");

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let lifecycle = ConnectionLifecycleManager::new(
        transport.clone(),
        store.clone(),
        inbound_tx,
        LifecycleConfig {
            watchdog_interval: config.watchdog_interval(),
            liveness_timeout: config.liveness_timeout(),
            store_timeout: config.store_timeout(),
        },
    );
    let boot_status = lifecycle
        .reconcile_on_boot()
        .await
        .context("Failed to load transport status")?;
    tracing::info!(status = %boot_status.status, "Transport status reconciled");

    let questionnaire = Arc::new(Questionnaire::patient_registration()?);
    let engine = Arc::new(ConversationEngine::new(
        questionnaire,
        InputClassifier::new(&config.restart_keywords, &config.skip_tokens),
        config.conversation_ttl(),
    ));
    let issuer = TicketIssuer::new(
        SequenceAllocator::new(store.clone(), config.clinic_offset()),
        store.clone(),
        Arc::new(PngTicketRenderer::new()),
        transport.clone(),
        IssuerConfig {
            clinic_name: config.clinic_name.clone(),
            offset: config.clinic_offset(),
            restart_keyword: config.primary_restart_keyword(),
            store_timeout: config.store_timeout(),
            delivery_timeout: config.delivery_timeout(),
        },
    );
    let intake = Arc::new(IntakeService::new(engine.clone(), issuer)).spawn(inbound_rx);
    let sweeper = engine.spawn_sweeper(SWEEP_INTERVAL);

    let auto_start = config.auto_start_transport;
    let bind_address = config.bind_address.clone();
    let state = AppState::new(
        config,
        store,
        lifecycle.clone(),
        engine,
        transport,
        bridge,
    );

    if auto_start {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.start().await {
                tracing::warn!(error = %e, "Transport auto-start failed");
            }
        });
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Antrian gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    lifecycle.shutdown().await;
    sweeper.abort();
    intake.abort();
    tracing::info!("Antrian gateway stopped");

    Ok(())
}
