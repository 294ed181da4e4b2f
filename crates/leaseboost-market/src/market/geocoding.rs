use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::domain::Coordinates;
use crate::config::GeocoderConfig;

const MIN_ADDRESS_CHARS: usize = 5;

/// Result of a single geocoder call.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(Coordinates),
    NotFound,
    /// Network or upstream failure; callers treat it as "no coordinates".
    Transient(String),
}

impl GeocodeOutcome {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            Self::Found(coordinates) => Some(*coordinates),
            Self::NotFound | Self::Transient(_) => None,
        }
    }
}

#[async_trait]
pub trait Geocoder: Debug + Send + Sync {
    async fn geocode(&self, query: &str) -> GeocodeOutcome;
}

/// Memo of resolved coordinates keyed by normalized address text.
pub trait GeocodeCache: Debug + Send + Sync {
    fn get(&self, key: &str) -> Option<Coordinates>;
    fn put(&self, key: String, coordinates: Coordinates);
}

#[derive(Debug, Default)]
pub struct InMemoryGeocodeCache {
    entries: Mutex<HashMap<String, Coordinates>>,
}

impl InMemoryGeocodeCache {
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GeocodeCache for InMemoryGeocodeCache {
    fn get(&self, key: &str) -> Option<Coordinates> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn put(&self, key: String, coordinates: Coordinates) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, coordinates);
    }
}

/// Lowercased, trimmed, single-spaced address text.
pub fn normalize_address_key(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Nominatim-compatible search endpoint.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> GeocodeOutcome {
        let response = match self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return GeocodeOutcome::Transient(err.to_string()),
        };

        if !response.status().is_success() {
            return GeocodeOutcome::Transient(format!(
                "geocoder answered with status {}",
                response.status()
            ));
        }

        let places = match response.json::<Vec<NominatimPlace>>().await {
            Ok(places) => places,
            Err(err) => return GeocodeOutcome::Transient(err.to_string()),
        };

        places
            .first()
            .and_then(|place| {
                let lat = place.lat.parse::<f64>().ok()?;
                let lon = place.lon.parse::<f64>().ok()?;
                Coordinates::new(lat, lon)
            })
            .map_or(GeocodeOutcome::NotFound, GeocodeOutcome::Found)
    }
}

/// Geocoder that never resolves anything, for offline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeocoder;

#[async_trait]
impl Geocoder for DisabledGeocoder {
    async fn geocode(&self, _query: &str) -> GeocodeOutcome {
        GeocodeOutcome::NotFound
    }
}

/// Bounded-time, cached access to a [`Geocoder`].
///
/// Every failure mode (timeout, not found, transport error) degrades to
/// `None`; only successful lookups are cached.
#[derive(Debug, Clone)]
pub struct GeocodingAdapter {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<dyn GeocodeCache>,
    timeout: Duration,
}

impl GeocodingAdapter {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<dyn GeocodeCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            geocoder,
            cache,
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(
            Arc::new(DisabledGeocoder),
            Arc::new(InMemoryGeocodeCache::default()),
            Duration::from_secs(5),
        )
    }

    /// Free-text street address; very short inputs are not worth a lookup.
    pub async fn locate_address(&self, address: &str) -> Option<Coordinates> {
        if address.trim().chars().count() < MIN_ADDRESS_CHARS {
            return None;
        }
        self.lookup(address).await
    }

    /// Centroid of a city label as it appears in the dataset.
    pub async fn locate_city(&self, city_label: &str) -> Option<Coordinates> {
        if city_label.trim().is_empty() {
            return None;
        }
        self.lookup(city_label).await
    }

    async fn lookup(&self, text: &str) -> Option<Coordinates> {
        let key = normalize_address_key(text);
        if let Some(hit) = self.cache.get(&key) {
            return Some(hit);
        }

        let query = format!("{}, France", text.trim());
        let outcome = match tokio::time::timeout(self.timeout, self.geocoder.geocode(&query)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%query, timeout_ms = self.timeout.as_millis() as u64, "geocoding timed out");
                return None;
            }
        };

        match outcome {
            GeocodeOutcome::Found(coordinates) => {
                debug!(%query, lat = coordinates.lat, lon = coordinates.lon, "geocoded");
                self.cache.put(key, coordinates);
                Some(coordinates)
            }
            GeocodeOutcome::NotFound => {
                warn!(%query, "geocoding found no match");
                None
            }
            GeocodeOutcome::Transient(reason) => {
                warn!(%query, %reason, "geocoding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct ScriptedGeocoder {
        outcome: GeocodeOutcome,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedGeocoder {
        fn new(outcome: GeocodeOutcome) -> Self {
            Self {
                outcome,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Geocoder for ScriptedGeocoder {
        async fn geocode(&self, _query: &str) -> GeocodeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }

    fn paris() -> Coordinates {
        Coordinates {
            lat: 48.8566,
            lon: 2.3522,
        }
    }

    #[tokio::test]
    async fn found_results_are_cached_by_normalized_text() {
        let geocoder = Arc::new(ScriptedGeocoder::new(GeocodeOutcome::Found(paris())));
        let cache = Arc::new(InMemoryGeocodeCache::default());
        let adapter = GeocodingAdapter::new(geocoder.clone(), cache.clone(), Duration::from_secs(5));

        assert_eq!(
            adapter.locate_address("12 Rue de Rivoli").await,
            Some(paris())
        );
        assert_eq!(
            adapter.locate_address("  12 rue  de RIVOLI ").await,
            Some(paris())
        );
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn not_found_is_not_cached() {
        let geocoder = Arc::new(ScriptedGeocoder::new(GeocodeOutcome::NotFound));
        let cache = Arc::new(InMemoryGeocodeCache::default());
        let adapter = GeocodingAdapter::new(geocoder.clone(), cache.clone(), Duration::from_secs(5));

        assert_eq!(adapter.locate_city("Atlantis").await, None);
        assert_eq!(adapter.locate_city("Atlantis").await, None);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn short_addresses_skip_the_geocoder() {
        let geocoder = Arc::new(ScriptedGeocoder::new(GeocodeOutcome::Found(paris())));
        let adapter = GeocodingAdapter::new(
            geocoder.clone(),
            Arc::new(InMemoryGeocodeCache::default()),
            Duration::from_secs(5),
        );

        assert_eq!(adapter.locate_address(" 12 ").await, None);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_geocoder_degrades_to_no_coordinates() {
        let mut scripted = ScriptedGeocoder::new(GeocodeOutcome::Found(paris()));
        scripted.delay = Duration::from_secs(30);
        let adapter = GeocodingAdapter::new(
            Arc::new(scripted),
            Arc::new(InMemoryGeocodeCache::default()),
            Duration::from_secs(5),
        );

        assert_eq!(adapter.locate_address("12 Rue de Rivoli").await, None);
    }

    #[tokio::test]
    async fn transient_failures_degrade_to_no_coordinates() {
        let adapter = GeocodingAdapter::new(
            Arc::new(ScriptedGeocoder::new(GeocodeOutcome::Transient(
                "connection reset".to_string(),
            ))),
            Arc::new(InMemoryGeocodeCache::default()),
            Duration::from_secs(5),
        );

        assert_eq!(adapter.locate_address("12 Rue de Rivoli").await, None);
    }

    #[test]
    fn address_keys_collapse_case_and_spacing() {
        assert_eq!(
            normalize_address_key("  12  Rue de RIVOLI "),
            "12 rue de rivoli"
        );
    }
}
