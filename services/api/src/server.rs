use crate::cli::ServeArgs;
use crate::infra::{build_market_service, AppState};
use crate::routes::with_market_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use leaseboost_market::config::AppConfig;
use leaseboost_market::error::AppError;
use leaseboost_market::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let market_service = build_market_service(&config, None)?;

    let warmup = market_service.clone();
    tokio::spawn(async move {
        let snapshot = warmup.cache().ensure_fresh().await;
        info!(
            records = snapshot.map(|snapshot| snapshot.len()).unwrap_or(0),
            "comparables cache warmed"
        );
    });

    let app = with_market_routes(market_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "market intelligence service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
