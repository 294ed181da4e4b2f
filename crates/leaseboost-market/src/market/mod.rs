//! Comparables dataset, tiered resolution, and position scoring.

pub mod cache;
pub mod dataset;
pub mod domain;
pub mod geocoding;
pub mod normalizer;
pub mod quality;
pub mod regions;
pub mod resolver;
pub mod router;
pub mod scoring;
pub mod service;

pub use cache::{CacheStatus, DatasetCache, DatasetSnapshot};
pub use dataset::{
    google_sheet_export_url, rows_from_csv, CsvFileSource, DatasetFetchError, DatasetSource,
    HttpCsvSource, UnconfiguredSource,
};
pub use domain::{
    ComparableRecord, Coordinates, ListingRecord, MarketPosition, QueryError, RawListingRow,
    ScoredComparable, SourceTag, TargetQuery, UNDETERMINED_POSITION,
};
pub use geocoding::{
    DisabledGeocoder, GeocodeCache, GeocodeOutcome, Geocoder, GeocodingAdapter,
    InMemoryGeocodeCache, NominatimGeocoder,
};
pub use normalizer::{normalize_city, NormalizationReport, Normalizer, RowRejection};
pub use quality::{DataQuality, DataQualityEstimator};
pub use regions::{Region, RegionCatalog, RegionCatalogError};
pub use resolver::{ComparableResolver, ResolverState, MAX_COMPARABLES};
pub use router::market_router;
pub use scoring::{PositionBand, PositionScorer};
pub use service::{MarketIntelligenceService, PositionRequest};
