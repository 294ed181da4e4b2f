use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::cache::{CacheStatus, DatasetCache};
use super::dataset::{DatasetSource, HttpCsvSource, UnconfiguredSource};
use super::domain::{MarketPosition, TargetQuery};
use super::geocoding::{GeocodingAdapter, InMemoryGeocodeCache, NominatimGeocoder};
use super::normalizer::Normalizer;
use super::regions::RegionCatalog;
use super::resolver::ComparableResolver;
use super::scoring::PositionScorer;
use crate::config::AppConfig;
use crate::error::AppError;

/// Subject property as submitted by callers.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRequest {
    pub city: String,
    #[serde(default)]
    pub address: Option<String>,
    pub surface: f64,
    #[serde(default)]
    pub current_rent: Option<f64>,
}

/// Entry point of the market pipeline: cache, resolver, scorer.
#[derive(Debug, Clone)]
pub struct MarketIntelligenceService {
    cache: Arc<DatasetCache>,
    resolver: ComparableResolver,
    scorer: PositionScorer,
}

impl MarketIntelligenceService {
    pub fn new(cache: Arc<DatasetCache>, resolver: ComparableResolver) -> Self {
        Self {
            cache,
            resolver,
            scorer: PositionScorer::default(),
        }
    }

    /// Wires the HTTP dataset source and the Nominatim geocoder from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let source: Arc<dyn DatasetSource> = match &config.market.dataset_url {
            Some(url) => {
                info!(%url, "comparables dataset source configured");
                Arc::new(HttpCsvSource::new(url.clone(), config.market.fetch_timeout)?)
            }
            None => {
                warn!("no comparables dataset configured; emergency estimates only");
                Arc::new(UnconfiguredSource)
            }
        };
        Self::with_source(config, source)
    }

    pub fn with_source(config: &AppConfig, source: Arc<dyn DatasetSource>) -> Result<Self, AppError> {
        let regions = match &config.market.postal_codes_csv {
            Some(path) => RegionCatalog::from_postal_code_file(path)?,
            None => RegionCatalog::standard(),
        };
        info!(postal_codes = regions.postal_code_count(), "region catalog loaded");

        let geocoder = NominatimGeocoder::new(&config.geocoder).map_err(AppError::Geocoder)?;
        let geocoding = GeocodingAdapter::new(
            Arc::new(geocoder),
            Arc::new(InMemoryGeocodeCache::default()),
            config.geocoder.timeout,
        );

        let cache = DatasetCache::new(
            source,
            Normalizer::new(config.market.max_publication_age),
            config.market.refresh_after,
        );

        Ok(Self::new(
            Arc::new(cache),
            ComparableResolver::new(Arc::new(regions), geocoding),
        ))
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }

    pub fn force_refresh(&self) {
        self.cache.force_refresh();
    }

    pub async fn get_market_position(
        &self,
        city: &str,
        address: Option<&str>,
        surface: f64,
        current_rent: Option<f64>,
    ) -> MarketPosition {
        self.get_market_position_at(city, address, surface, current_rent, Utc::now())
            .await
    }

    pub async fn position_for(&self, request: &PositionRequest) -> MarketPosition {
        self.get_market_position(
            &request.city,
            request.address.as_deref(),
            request.surface,
            request.current_rent,
        )
        .await
    }

    /// Never fails: invalid input and degenerate statistics both yield the
    /// undetermined position.
    pub async fn get_market_position_at(
        &self,
        city: &str,
        address: Option<&str>,
        surface: f64,
        current_rent: Option<f64>,
        now: DateTime<Utc>,
    ) -> MarketPosition {
        let query = match TargetQuery::new(city, surface)
            .map(|query| query.with_address(address.map(str::to_string)))
            .and_then(|query| query.with_current_rent(current_rent))
        {
            Ok(query) => query,
            Err(err) => {
                warn!(%city, error = %err, "rejected market position query");
                return MarketPosition::undetermined(err);
            }
        };

        let snapshot = self.cache.ensure_fresh_at(now).await;

        let coordinates = match query.address.as_deref() {
            Some(address) => self.resolver.geocoding().locate_address(address).await,
            None => None,
        };
        let query = query.with_coordinates(coordinates);

        let comparables = self.resolver.resolve(snapshot.as_deref(), &query).await;
        let position = self.scorer.score(&query, comparables);

        let finite = [
            position.percentile,
            position.market_median_price,
            position.your_estimated_price,
            position.annual_opportunity,
        ]
        .into_iter()
        .flatten()
        .all(f64::is_finite);
        if !finite {
            warn!(%city, surface, "market statistics were not finite");
            return MarketPosition::undetermined("statistiques de marché invalides");
        }

        info!(
            %city,
            comparables = position.comparable_count,
            confidence = position.confidence_percentage,
            position = %position.percentile_position,
            "market position computed"
        );
        position
    }
}
