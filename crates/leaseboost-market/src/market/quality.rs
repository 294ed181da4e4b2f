use serde::Serialize;

use super::domain::ScoredComparable;

const FULL_CONFIDENCE_COUNT: f64 = 8.0;
const MAX_CONFIDENCE: f64 = 95.0;
const FALLBACK_SOURCE_QUALITY: f64 = 0.7;
const ESTIMATE_SOURCE_QUALITY: f64 = 0.8;

/// Breakdown of the confidence attached to a market position.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DataQuality {
    pub confidence_percentage: u8,
    pub count_factor: f64,
    pub avg_similarity: f64,
    pub source_quality: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataQualityEstimator;

impl DataQualityEstimator {
    pub fn estimate(&self, comparables: &[ScoredComparable]) -> DataQuality {
        let count_factor = (comparables.len() as f64 / FULL_CONFIDENCE_COUNT).min(1.0);

        let avg_similarity = if comparables.is_empty() {
            0.0
        } else {
            comparables.iter().map(|c| c.similarity_score).sum::<f64>() / comparables.len() as f64
        };

        let source_quality = if comparables.iter().any(|c| c.record.source.is_fallback()) {
            FALLBACK_SOURCE_QUALITY
        } else if comparables.iter().any(|c| c.record.source.is_estimate()) {
            ESTIMATE_SOURCE_QUALITY
        } else {
            1.0
        };

        let raw = (100.0 * count_factor * avg_similarity * source_quality).round();
        let confidence = if raw.is_finite() {
            raw.clamp(0.0, MAX_CONFIDENCE)
        } else {
            0.0
        };

        DataQuality {
            confidence_percentage: confidence as u8,
            count_factor,
            avg_similarity,
            source_quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::domain::{ComparableRecord, SourceTag};

    fn scored(source: SourceTag, similarity_score: f64) -> ScoredComparable {
        ScoredComparable {
            record: ComparableRecord {
                address: format!("{source} listing"),
                city_key: "LYON".to_string(),
                surface: 100.0,
                price_per_sqm: 250.0,
                coordinates: None,
                published_at: None,
                transaction_date: "N/A".to_string(),
                distance_km: 0.0,
                source,
            },
            similarity_score,
        }
    }

    #[test]
    fn empty_set_has_zero_confidence() {
        let quality = DataQualityEstimator.estimate(&[]);
        assert_eq!(quality.confidence_percentage, 0);
        assert_eq!(quality.avg_similarity, 0.0);
    }

    #[test]
    fn confidence_is_capped_at_ninety_five() {
        let comparables: Vec<_> = (0..12).map(|_| scored(SourceTag::Exact, 1.0)).collect();
        let quality = DataQualityEstimator.estimate(&comparables);
        assert_eq!(quality.count_factor, 1.0);
        assert_eq!(quality.confidence_percentage, 95);
    }

    #[test]
    fn fallback_sources_outrank_estimates_in_penalty() {
        let comparables = vec![
            scored(SourceTag::Regional, 0.8),
            scored(SourceTag::Synthetic, 0.6),
        ];
        let quality = DataQualityEstimator.estimate(&comparables);
        assert_eq!(quality.source_quality, 0.7);
        // 100 * 0.25 * 0.7 * 0.7 = 12.25
        assert_eq!(quality.confidence_percentage, 12);
    }

    #[test]
    fn regional_only_uses_estimate_quality() {
        let comparables: Vec<_> = (0..4).map(|_| scored(SourceTag::Regional, 0.5)).collect();
        let quality = DataQualityEstimator.estimate(&comparables);
        assert_eq!(quality.source_quality, 0.8);
        assert_eq!(quality.confidence_percentage, 20);
    }

    #[test]
    fn confidence_stays_in_range_across_inputs() {
        for count in 0..20 {
            for step in 1..=10 {
                let similarity = step as f64 / 10.0;
                let comparables: Vec<_> = (0..count)
                    .map(|_| scored(SourceTag::Nearby, similarity))
                    .collect();
                let confidence = DataQualityEstimator.estimate(&comparables).confidence_percentage;
                assert!(confidence <= 95, "count {count} similarity {similarity}");
            }
        }
    }
}
