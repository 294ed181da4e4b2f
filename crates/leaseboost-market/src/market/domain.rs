use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::quality::DataQuality;

/// WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

/// Which resolution tier produced a comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Exact,
    Nearby,
    Regional,
    Synthetic,
    Emergency,
}

impl SourceTag {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Nearby => "nearby",
            Self::Regional => "regional",
            Self::Synthetic => "synthetic",
            Self::Emergency => "emergency",
        }
    }

    /// Generated rather than observed.
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Synthetic | Self::Emergency)
    }

    /// Observed listings borrowed from neighbouring cities of the same region.
    pub const fn is_estimate(self) -> bool {
        matches!(self, Self::Regional)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Listing row as delivered by the dataset source; every cell is optional text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawListingRow {
    pub title: Option<String>,
    pub monthly_price: Option<String>,
    pub price_per_sqm: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub last_publication_date: Option<String>,
}

/// Validated listing held in a dataset snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub title: Option<String>,
    /// City label as published, postal suffix included.
    pub city_label: String,
    /// Trimmed, uppercased, postal code stripped.
    pub city_key: String,
    pub area_sqm: f64,
    /// Annual rent per square metre.
    pub price_per_sqm: f64,
    pub coordinates: Option<Coordinates>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_raw: Option<String>,
}

impl ListingRecord {
    pub(crate) fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or("Bien immobilier")
    }

    pub(crate) fn transaction_date(&self) -> String {
        match self.published_raw.as_deref() {
            Some(raw) => raw.chars().take(10).collect(),
            None => "N/A".to_string(),
        }
    }
}

/// Comparable produced for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparableRecord {
    pub address: String,
    pub city_key: String,
    pub surface: f64,
    pub price_per_sqm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub transaction_date: String,
    pub distance_km: f64,
    pub source: SourceTag,
}

impl ComparableRecord {
    pub(crate) fn from_listing(
        listing: &ListingRecord,
        address: String,
        distance_km: f64,
        source: SourceTag,
    ) -> Self {
        Self {
            address,
            city_key: listing.city_key.clone(),
            surface: listing.area_sqm,
            price_per_sqm: listing.price_per_sqm,
            coordinates: listing.coordinates,
            published_at: listing.published_at,
            transaction_date: listing.transaction_date(),
            distance_km,
            source,
        }
    }

    /// Key used to collapse the same listing surfacing from several tiers.
    pub fn dedup_key(&self) -> String {
        format!("{}_{}", self.address, self.price_per_sqm)
    }
}

/// Comparable paired with its similarity to the subject, in (0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredComparable {
    #[serde(flatten)]
    pub record: ComparableRecord,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("city must not be empty")]
    EmptyCity,
    #[error("surface must be a positive number of square metres (got {0})")]
    InvalidSurface(f64),
    #[error("current rent must be a non-negative amount (got {0})")]
    InvalidRent(f64),
}

/// Subject property being positioned against the market.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetQuery {
    pub city: String,
    pub address: Option<String>,
    pub surface: f64,
    pub current_rent: Option<f64>,
    pub coordinates: Option<Coordinates>,
}

impl TargetQuery {
    pub fn new(city: impl Into<String>, surface: f64) -> Result<Self, QueryError> {
        let city = city.into().trim().to_string();
        if city.is_empty() {
            return Err(QueryError::EmptyCity);
        }
        if !surface.is_finite() || surface <= 0.0 {
            return Err(QueryError::InvalidSurface(surface));
        }

        Ok(Self {
            city,
            address: None,
            surface,
            current_rent: None,
            coordinates: None,
        })
    }

    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = address
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    /// A zero rent is treated as unknown.
    pub fn with_current_rent(mut self, current_rent: Option<f64>) -> Result<Self, QueryError> {
        self.current_rent = match current_rent {
            Some(rent) if !rent.is_finite() || rent < 0.0 => {
                return Err(QueryError::InvalidRent(rent))
            }
            Some(rent) if rent > 0.0 => Some(rent),
            _ => None,
        };
        Ok(self)
    }

    pub fn with_coordinates(mut self, coordinates: Option<Coordinates>) -> Self {
        self.coordinates = coordinates;
        self
    }
}

pub const UNDETERMINED_POSITION: &str = "Position non déterminée";

/// Market position of the subject, returned to callers as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketPosition {
    pub percentile_position: String,
    pub percentile: Option<f64>,
    pub market_median_price: Option<f64>,
    pub market_mean_price: Option<f64>,
    pub your_estimated_price: Option<f64>,
    pub annual_opportunity: Option<f64>,
    pub percent_gap: Option<f64>,
    pub immediate_opportunity: String,
    pub confidence_percentage: u8,
    pub data_quality: DataQuality,
    pub comparable_count: usize,
    pub comparables: Vec<ScoredComparable>,
    pub source_distribution: BTreeMap<SourceTag, usize>,
}

impl MarketPosition {
    pub fn undetermined(reason: impl fmt::Display) -> Self {
        Self {
            percentile_position: UNDETERMINED_POSITION.to_string(),
            percentile: None,
            market_median_price: None,
            market_mean_price: None,
            your_estimated_price: None,
            annual_opportunity: None,
            percent_gap: None,
            immediate_opportunity: format!("Analyse impossible: {reason}"),
            confidence_percentage: 0,
            data_quality: DataQuality::default(),
            comparable_count: 0,
            comparables: Vec::new(),
            source_distribution: BTreeMap::new(),
        }
    }

    pub fn is_determined(&self) -> bool {
        self.percentile.is_some()
    }
}

pub(crate) fn source_distribution(comparables: &[ScoredComparable]) -> BTreeMap<SourceTag, usize> {
    let mut distribution = BTreeMap::new();
    for comparable in comparables {
        *distribution.entry(comparable.record.source).or_insert(0) += 1;
    }
    distribution
}
