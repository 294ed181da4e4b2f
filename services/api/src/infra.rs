use leaseboost_market::config::AppConfig;
use leaseboost_market::error::AppError;
use leaseboost_market::market::{CsvFileSource, MarketIntelligenceService};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Market service backed by a local CSV export when one is given, otherwise
/// by the configured dataset URL.
pub(crate) fn build_market_service(
    config: &AppConfig,
    dataset_csv: Option<PathBuf>,
) -> Result<Arc<MarketIntelligenceService>, AppError> {
    let service = match dataset_csv {
        Some(path) => {
            MarketIntelligenceService::with_source(config, Arc::new(CsvFileSource::new(path)))?
        }
        None => MarketIntelligenceService::from_config(config)?,
    };
    Ok(Arc::new(service))
}

pub(crate) fn parse_surface(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("failed to parse '{raw}' as square metres ({err})"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("surface must be positive, got {value}"))
    }
}

pub(crate) fn parse_rent(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("failed to parse '{raw}' as an annual rent ({err})"))?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("annual rent cannot be negative, got {value}"))
    }
}
