pub mod tiers;

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::cache::DatasetSnapshot;
use super::domain::{ScoredComparable, TargetQuery};
use super::geocoding::GeocodingAdapter;
use super::regions::RegionCatalog;

pub use tiers::{haversine_km, surface_similarity};

pub const MAX_COMPARABLES: usize = 10;
const EXACT_SUFFICIENT: usize = 3;
const NEARBY_SUFFICIENT: usize = 3;
const REGIONAL_SUFFICIENT: usize = 2;

/// Position in the resolution cascade, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Exact,
    Nearby,
    Regional,
    Synthetic,
    Emergency,
}

#[derive(Debug, Default)]
struct TierMatches {
    exact: Vec<ScoredComparable>,
    nearby: Vec<ScoredComparable>,
    regional: Vec<ScoredComparable>,
}

/// Runs the tiered cascade over a dataset snapshot.
#[derive(Debug, Clone)]
pub struct ComparableResolver {
    regions: Arc<RegionCatalog>,
    geocoding: GeocodingAdapter,
}

impl ComparableResolver {
    pub fn new(regions: Arc<RegionCatalog>, geocoding: GeocodingAdapter) -> Self {
        Self { regions, geocoding }
    }

    pub fn regions(&self) -> &RegionCatalog {
        &self.regions
    }

    pub fn geocoding(&self) -> &GeocodingAdapter {
        &self.geocoding
    }

    /// Ranked comparables for `query`, at most [`MAX_COMPARABLES`], best first.
    ///
    /// Without a snapshot the cascade is skipped and a single emergency
    /// estimate is returned. Otherwise the result is never empty: the
    /// synthetic tier always produces records.
    pub async fn resolve(
        &self,
        snapshot: Option<&DatasetSnapshot>,
        query: &TargetQuery,
    ) -> Vec<ScoredComparable> {
        let records = snapshot.map(DatasetSnapshot::records).unwrap_or_default();
        let mut found = TierMatches::default();
        let mut state = match snapshot {
            Some(_) => ResolverState::Exact,
            None => ResolverState::Emergency,
        };

        loop {
            debug!(?state, city = %query.city, "resolving comparables");
            state = match state {
                ResolverState::Exact => {
                    found.exact = tiers::exact_matches(records, query);
                    if found.exact.len() >= EXACT_SUFFICIENT {
                        return rank(found.exact);
                    }
                    ResolverState::Nearby
                }
                ResolverState::Nearby => {
                    if let Some(target) = query.coordinates {
                        found.nearby = tiers::nearby_matches(
                            records,
                            target,
                            query.surface,
                            &self.geocoding,
                        )
                        .await;
                        let combined = dedup(found.exact.iter().chain(&found.nearby));
                        if combined.len() >= NEARBY_SUFFICIENT {
                            return rank(combined);
                        }
                    }
                    ResolverState::Regional
                }
                ResolverState::Regional => {
                    found.regional = tiers::regional_matches(records, query, &self.regions);
                    if found.regional.len() >= REGIONAL_SUFFICIENT {
                        return rank(dedup(found.exact.iter().chain(&found.regional)));
                    }
                    ResolverState::Synthetic
                }
                ResolverState::Synthetic => {
                    let median = snapshot
                        .and_then(DatasetSnapshot::median_price)
                        .unwrap_or_else(|| self.regions.baseline_price_for(&query.city));
                    let mut accumulated = dedup(
                        found
                            .exact
                            .iter()
                            .chain(&found.nearby)
                            .chain(&found.regional),
                    );
                    accumulated.extend(tiers::synthetic_comparables(query, median));
                    return rank(accumulated);
                }
                ResolverState::Emergency => {
                    return vec![tiers::emergency_comparable(query, &self.regions)];
                }
            };
        }
    }
}

/// First occurrence of each `address_price` key wins.
fn dedup<'a>(comparables: impl IntoIterator<Item = &'a ScoredComparable>) -> Vec<ScoredComparable> {
    let mut seen = HashSet::new();
    comparables
        .into_iter()
        .filter(|comparable| seen.insert(comparable.record.dedup_key()))
        .cloned()
        .collect()
}

/// Stable sort by descending similarity, capped at [`MAX_COMPARABLES`].
fn rank(mut comparables: Vec<ScoredComparable>) -> Vec<ScoredComparable> {
    comparables.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    comparables.truncate(MAX_COMPARABLES);
    comparables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::domain::{Coordinates, ListingRecord, SourceTag};
    use crate::market::normalizer::normalize_city;
    use chrono::{TimeZone, Utc};

    fn listing(title: &str, city_label: &str, area_sqm: f64, price_per_sqm: f64) -> ListingRecord {
        ListingRecord {
            title: Some(title.to_string()),
            city_label: city_label.to_string(),
            city_key: normalize_city(city_label),
            area_sqm,
            price_per_sqm,
            coordinates: None,
            published_at: None,
            published_raw: None,
        }
    }

    fn snapshot(records: Vec<ListingRecord>) -> DatasetSnapshot {
        DatasetSnapshot::new(records, Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap())
    }

    fn resolver() -> ComparableResolver {
        ComparableResolver::new(Arc::new(RegionCatalog::standard()), GeocodingAdapter::disabled())
    }

    fn query(city: &str, surface: f64) -> TargetQuery {
        TargetQuery::new(city, surface).expect("valid query")
    }

    #[tokio::test]
    async fn three_exact_matches_stop_the_cascade() {
        let data = snapshot(
            (0..14)
                .map(|i| listing(&format!("Local {i}"), "Lyon 69003", 100.0 + i as f64, 280.0))
                .collect(),
        );
        let comparables = resolver().resolve(Some(&data), &query("Lyon", 100.0)).await;

        assert_eq!(comparables.len(), MAX_COMPARABLES);
        assert!(comparables.iter().all(|c| c.record.source == SourceTag::Exact));
        assert_eq!(comparables[0].similarity_score, 1.0);
        assert!(comparables
            .windows(2)
            .all(|pair| pair[0].similarity_score >= pair[1].similarity_score));
    }

    #[tokio::test]
    async fn unmatched_city_falls_through_to_synthetic() {
        let data = snapshot(vec![
            listing("Bureau", "Lyon 69003", 120.0, 200.0),
            listing("Bureau", "Lille", 120.0, 400.0),
        ]);
        let comparables = resolver().resolve(Some(&data), &query("Rodez", 100.0)).await;

        let scores: Vec<f64> = comparables.iter().map(|c| c.similarity_score).collect();
        assert_eq!(scores, vec![0.6, 0.5, 0.4]);
        assert!(comparables.iter().all(|c| c.record.source == SourceTag::Synthetic));
        // 85% of the 300 dataset median.
        assert_eq!(comparables[0].record.price_per_sqm, 255.0);
    }

    #[tokio::test]
    async fn synthetic_records_are_appended_to_partial_matches() {
        let data = snapshot(vec![
            listing("Boutique", "Lyon 69003", 100.0, 310.0),
            listing("Bureau", "Lille", 100.0, 200.0),
        ]);
        let comparables = resolver().resolve(Some(&data), &query("Lyon", 100.0)).await;

        assert_eq!(comparables.len(), 4);
        assert_eq!(comparables[0].record.source, SourceTag::Exact);
        assert_eq!(
            comparables
                .iter()
                .filter(|c| c.record.source == SourceTag::Synthetic)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn regional_tier_needs_two_matches() {
        let data = snapshot(vec![
            listing("Bureau", "Nanterre", 100.0, 300.0),
            listing("Bureau", "Creteil", 110.0, 280.0),
            listing("Bureau", "Lyon", 100.0, 250.0),
        ]);
        let comparables = resolver().resolve(Some(&data), &query("Montreuil", 100.0)).await;

        assert_eq!(comparables.len(), 2);
        assert!(comparables.iter().all(|c| c.record.source == SourceTag::Regional));
    }

    #[tokio::test]
    async fn regional_tier_counts_the_subject_city_when_it_is_a_member() {
        let data = snapshot(vec![
            listing("Bureau", "Paris 75001", 100.0, 450.0),
            listing("Bureau", "Boulogne-Billancourt", 100.0, 400.0),
        ]);
        let comparables = resolver().resolve(Some(&data), &query("Paris", 100.0)).await;

        let summary: Vec<(SourceTag, &str)> = comparables
            .iter()
            .map(|c| (c.record.source, c.record.address.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (SourceTag::Exact, "Bureau - Paris 75001"),
                (SourceTag::Regional, "Secteur Paris 75001 (données régionales)"),
                (
                    SourceTag::Regional,
                    "Secteur Boulogne-Billancourt (données régionales)"
                ),
            ]
        );
        assert!(comparables.iter().all(|c| !c.record.source.is_fallback()));
    }

    #[tokio::test]
    async fn nearby_tier_uses_listing_coordinates() {
        let mut close = listing("Atelier", "Vincennes", 100.0, 400.0);
        close.coordinates = Some(Coordinates { lat: 48.8474, lon: 2.4396 });
        let mut also_close = listing("Bureau", "Montreuil", 90.0, 380.0);
        also_close.coordinates = Some(Coordinates { lat: 48.8638, lon: 2.4485 });
        let mut far = listing("Entrepot", "Lyon", 100.0, 250.0);
        far.coordinates = Some(Coordinates { lat: 45.764, lon: 4.8357 });
        let data = snapshot(vec![
            listing("Bureau", "Paris 75011", 100.0, 500.0),
            close,
            also_close,
            far,
        ]);

        let target = query("Paris", 100.0)
            .with_coordinates(Some(Coordinates { lat: 48.8566, lon: 2.3522 }));
        let comparables = resolver().resolve(Some(&data), &target).await;

        assert_eq!(comparables.len(), 3);
        assert_eq!(comparables[0].record.source, SourceTag::Exact);
        let nearby: Vec<_> = comparables
            .iter()
            .filter(|c| c.record.source == SourceTag::Nearby)
            .collect();
        assert_eq!(nearby.len(), 2);
        assert!(nearby.iter().all(|c| c.record.distance_km > 0.0 && c.record.distance_km <= 15.0));
    }

    #[tokio::test]
    async fn missing_snapshot_yields_single_emergency_record() {
        let comparables = resolver().resolve(None, &query("Paris", 100.0)).await;

        assert_eq!(comparables.len(), 1);
        assert_eq!(comparables[0].record.source, SourceTag::Emergency);
        assert_eq!(comparables[0].record.price_per_sqm, 450.0);
    }

    #[tokio::test]
    async fn empty_snapshot_uses_baseline_for_synthetic_median() {
        let data = snapshot(Vec::new());
        let comparables = resolver().resolve(Some(&data), &query("Meaux", 100.0)).await;

        let prices: Vec<f64> = comparables.iter().map(|c| c.record.price_per_sqm).collect();
        assert_eq!(prices, vec![187.0, 209.0, 231.0]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let data = [listing("Bureau", "Paris", 100.0, 450.0)];
        let matches = tiers::exact_matches(&data, &query("Paris", 100.0));
        let doubled = dedup(matches.iter().chain(&matches));
        assert_eq!(doubled.len(), 1);
    }
}
