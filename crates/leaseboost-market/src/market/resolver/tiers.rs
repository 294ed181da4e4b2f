use std::collections::HashMap;
use tracing::debug;

use crate::market::domain::{
    ComparableRecord, Coordinates, ListingRecord, ScoredComparable, SourceTag, TargetQuery,
};
use crate::market::geocoding::GeocodingAdapter;
use crate::market::normalizer::normalize_city;
use crate::market::regions::RegionCatalog;

pub const NEARBY_RADIUS_KM: f64 = 15.0;
const EXACT_MIN_SIMILARITY: f64 = 0.3;
const NEARBY_MIN_SCORE: f64 = 0.2;
const NEARBY_SURFACE_WEIGHT: f64 = 0.7;
const NEARBY_DISTANCE_WEIGHT: f64 = 0.3;
const REGIONAL_MIN_SCORE: f64 = 0.2;
const REGIONAL_WEIGHT: f64 = 0.8;
const REGIONAL_DISTANCE_KM: f64 = 8.0;
const MEAN_EARTH_RADIUS_KM: f64 = 6371.0088;

const ESTIMATED_TRANSACTION_DATE: &str = "2024 (estimation)";
const SYNTHETIC_PRICE_FACTORS: [f64; 3] = [0.85, 0.95, 1.05];
const SYNTHETIC_SURFACE_FACTORS: [f64; 3] = [0.9, 1.0, 1.1];
const SYNTHETIC_SCORES: [f64; 3] = [0.6, 0.5, 0.4];
const EMERGENCY_SIMILARITY: f64 = 0.5;

/// `min / max` of two areas; 0 unless both are positive.
pub fn surface_similarity(a: f64, b: f64) -> f64 {
    if !(a > 0.0 && b > 0.0) {
        return 0.0;
    }
    a.min(b) / a.max(b)
}

/// Great-circle distance in kilometres.
pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lon - from.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

fn listing_address(listing: &ListingRecord) -> String {
    format!("{} - {}", listing.display_title(), listing.city_label)
}

fn sort_by_score(comparables: &mut [ScoredComparable]) {
    comparables.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
}

/// Listings in the target's own city, scored on surface alone.
pub fn exact_matches(records: &[ListingRecord], query: &TargetQuery) -> Vec<ScoredComparable> {
    let target_key = normalize_city(&query.city);
    let mut matches: Vec<ScoredComparable> = records
        .iter()
        .filter(|listing| listing.city_key == target_key)
        .filter_map(|listing| {
            let similarity = surface_similarity(query.surface, listing.area_sqm);
            (similarity > EXACT_MIN_SIMILARITY).then(|| ScoredComparable {
                record: ComparableRecord::from_listing(
                    listing,
                    listing_address(listing),
                    0.0,
                    SourceTag::Exact,
                ),
                similarity_score: similarity,
            })
        })
        .collect();
    sort_by_score(&mut matches);
    matches
}

/// Listings within [`NEARBY_RADIUS_KM`] of the subject. Listings without
/// coordinates are placed at their geocoded city centroid; cities that
/// cannot be geocoded are skipped.
pub async fn nearby_matches(
    records: &[ListingRecord],
    target: Coordinates,
    surface: f64,
    geocoding: &GeocodingAdapter,
) -> Vec<ScoredComparable> {
    let mut centroids: HashMap<&str, Option<Coordinates>> = HashMap::new();
    let mut matches = Vec::new();

    for listing in records {
        let position = match listing.coordinates {
            Some(coordinates) => Some(coordinates),
            None => {
                let label = listing.city_label.as_str();
                if !centroids.contains_key(label) {
                    let centroid = geocoding.locate_city(label).await;
                    centroids.insert(label, centroid);
                }
                centroids.get(label).copied().flatten()
            }
        };
        let Some(position) = position else {
            continue;
        };

        let distance = haversine_km(position, target);
        if distance > NEARBY_RADIUS_KM {
            continue;
        }

        let distance_score = (1.0 - distance / NEARBY_RADIUS_KM).max(0.0);
        let score = NEARBY_SURFACE_WEIGHT * surface_similarity(surface, listing.area_sqm)
            + NEARBY_DISTANCE_WEIGHT * distance_score;
        if score > NEARBY_MIN_SCORE {
            matches.push(ScoredComparable {
                record: ComparableRecord::from_listing(
                    listing,
                    listing_address(listing),
                    (distance * 10.0).round() / 10.0,
                    SourceTag::Nearby,
                ),
                similarity_score: score,
            });
        }
    }

    debug!(found = matches.len(), "nearby matches collected");
    sort_by_score(&mut matches);
    matches
}

/// Listings from the reference cities of the subject's region, the subject's
/// own city included when it is one of them.
pub fn regional_matches(
    records: &[ListingRecord],
    query: &TargetQuery,
    regions: &RegionCatalog,
) -> Vec<ScoredComparable> {
    let region = regions.region_for(&query.city);

    let mut matches: Vec<ScoredComparable> = records
        .iter()
        .filter(|listing| regions.is_member(region, &listing.city_key))
        .filter_map(|listing| {
            let score = surface_similarity(query.surface, listing.area_sqm) * REGIONAL_WEIGHT;
            (score > REGIONAL_MIN_SCORE).then(|| ScoredComparable {
                record: ComparableRecord::from_listing(
                    listing,
                    format!("Secteur {} (données régionales)", listing.city_label),
                    REGIONAL_DISTANCE_KM,
                    SourceTag::Regional,
                ),
                similarity_score: score,
            })
        })
        .collect();
    sort_by_score(&mut matches);
    matches
}

/// Three generated comparables spread around `median_price`, best first.
pub fn synthetic_comparables(query: &TargetQuery, median_price: f64) -> Vec<ScoredComparable> {
    let city_key = normalize_city(&query.city);
    let addresses = [
        format!("Secteur {} - Estimation marché", query.city),
        format!("Zone comparable {}", query.city),
        "Référence régional proche".to_string(),
    ];

    addresses
        .into_iter()
        .enumerate()
        .map(|(index, address)| ScoredComparable {
            record: ComparableRecord {
                address,
                city_key: city_key.clone(),
                surface: query.surface * SYNTHETIC_SURFACE_FACTORS[index],
                price_per_sqm: (median_price * SYNTHETIC_PRICE_FACTORS[index]).round(),
                coordinates: None,
                published_at: None,
                transaction_date: ESTIMATED_TRANSACTION_DATE.to_string(),
                distance_km: 2.0 + index as f64,
                source: SourceTag::Synthetic,
            },
            similarity_score: SYNTHETIC_SCORES[index],
        })
        .collect()
}

/// Lone baseline estimate used when no dataset has ever been loaded.
pub fn emergency_comparable(query: &TargetQuery, regions: &RegionCatalog) -> ScoredComparable {
    ScoredComparable {
        record: ComparableRecord {
            address: format!("estimation {}", query.city),
            city_key: normalize_city(&query.city),
            surface: query.surface,
            price_per_sqm: regions.baseline_price_for(&query.city),
            coordinates: None,
            published_at: None,
            transaction_date: ESTIMATED_TRANSACTION_DATE.to_string(),
            distance_km: 0.0,
            source: SourceTag::Emergency,
        },
        similarity_score: EMERGENCY_SIMILARITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(city_label: &str, area_sqm: f64, price_per_sqm: f64) -> ListingRecord {
        ListingRecord {
            title: Some("Bureau".to_string()),
            city_label: city_label.to_string(),
            city_key: normalize_city(city_label),
            area_sqm,
            price_per_sqm,
            coordinates: None,
            published_at: None,
            published_raw: None,
        }
    }

    fn query(city: &str, surface: f64) -> TargetQuery {
        TargetQuery::new(city, surface).expect("valid query")
    }

    #[test]
    fn surface_similarity_is_symmetric_and_bounded() {
        for (a, b) in [(150.0, 100.0), (12.5, 4000.0), (80.0, 80.0)] {
            assert_eq!(surface_similarity(a, b), surface_similarity(b, a));
            let value = surface_similarity(a, b);
            assert!(value > 0.0 && value <= 1.0);
        }
        assert_eq!(surface_similarity(80.0, 80.0), 1.0);
        assert!(surface_similarity(80.0, 81.0) < 1.0);
        assert_eq!(surface_similarity(0.0, 80.0), 0.0);
        assert_eq!(surface_similarity(80.0, 0.0), 0.0);
        assert_eq!(surface_similarity(-5.0, 80.0), 0.0);
    }

    #[test]
    fn haversine_matches_known_distance() {
        let paris = Coordinates { lat: 48.8566, lon: 2.3522 };
        let versailles = Coordinates { lat: 48.8049, lon: 2.1204 };
        let distance = haversine_km(paris, versailles);
        assert!((distance - 17.9).abs() < 0.3, "got {distance}");
        assert_eq!(haversine_km(paris, paris), 0.0);
    }

    #[test]
    fn exact_tier_keeps_same_city_sorted_by_similarity() {
        let records = vec![
            listing("Paris 75001", 100.0, 450.0),
            listing("Paris 75008", 150.0, 520.0),
            listing("Lyon 69003", 150.0, 290.0),
        ];
        let matches = exact_matches(&records, &query("Paris", 150.0));

        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.record.source == SourceTag::Exact));
        assert_eq!(matches[0].record.price_per_sqm, 520.0);
        assert_eq!(matches[0].similarity_score, 1.0);
        assert_eq!(matches[0].record.address, "Bureau - Paris 75008");
        assert_eq!(matches[0].record.distance_km, 0.0);
    }

    #[test]
    fn exact_tier_drops_dissimilar_surfaces() {
        let records = vec![listing("Paris", 40.0, 450.0)];
        assert!(exact_matches(&records, &query("Paris", 150.0)).is_empty());
    }

    #[test]
    fn regional_tier_uses_member_cities_and_discounts_score() {
        let regions = RegionCatalog::standard();
        let records = vec![
            listing("Créteil 94000", 100.0, 260.0),
            listing("Nanterre", 100.0, 300.0),
            listing("Montreuil", 100.0, 310.0),
            listing("Lyon", 100.0, 250.0),
        ];
        let matches = regional_matches(&records, &query("Montreuil", 100.0), &regions);

        assert_eq!(matches.len(), 3);
        assert!(matches.iter().all(|m| (m.similarity_score - 0.8).abs() < 1e-9));
        assert!(matches
            .iter()
            .any(|m| m.record.address == "Secteur Créteil 94000 (données régionales)"));
        assert!(matches
            .iter()
            .any(|m| m.record.address == "Secteur Montreuil (données régionales)"));
        assert!(matches.iter().all(|m| m.record.city_key != "LYON"));
        assert!(matches.iter().all(|m| m.record.distance_km == 8.0));
    }

    #[test]
    fn synthetic_records_bracket_the_median() {
        let synthetic = synthetic_comparables(&query("Rodez", 100.0), 200.0);
        let prices: Vec<f64> = synthetic.iter().map(|s| s.record.price_per_sqm).collect();
        let scores: Vec<f64> = synthetic.iter().map(|s| s.similarity_score).collect();

        assert_eq!(prices, vec![170.0, 190.0, 210.0]);
        assert_eq!(scores, vec![0.6, 0.5, 0.4]);
        assert_eq!(synthetic[0].record.address, "Secteur Rodez - Estimation marché");
        assert_eq!(synthetic[2].record.distance_km, 4.0);
        assert!(synthetic.iter().all(|s| s.record.source == SourceTag::Synthetic));
    }

    #[test]
    fn emergency_uses_regional_baseline() {
        let emergency = emergency_comparable(&query("Versailles", 80.0), &RegionCatalog::standard());
        assert_eq!(emergency.record.price_per_sqm, 220.0);
        assert_eq!(emergency.record.address, "estimation Versailles");
        assert_eq!(emergency.similarity_score, 0.5);
        assert_eq!(emergency.record.source, SourceTag::Emergency);
    }
}
