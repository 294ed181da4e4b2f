use serde::Serialize;

use super::domain::{source_distribution, MarketPosition, ScoredComparable, TargetQuery};
use super::quality::DataQualityEstimator;

const TRIM_THRESHOLD: usize = 4;
/// Below this yearly gap per square metre a mid-band subject counts as aligned.
const ALIGNED_GAP_PER_SQM: f64 = 50.0;

/// Median of an ascending slice.
pub(crate) fn median(sorted: &[f64]) -> Option<f64> {
    let len = sorted.len();
    match len {
        0 => None,
        _ if len % 2 == 1 => Some(sorted[len / 2]),
        _ => Some((sorted[len / 2 - 1] + sorted[len / 2]) / 2.0),
    }
}

/// Central tendency of comparable prices once outliers are trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedStatistics {
    pub median: f64,
    pub mean: f64,
    pub kept: usize,
}

/// Drops `max(1, n / 10)` prices from each end when more than four are given.
pub fn trimmed_statistics(prices: &[f64]) -> Option<TrimmedStatistics> {
    let mut sorted = prices.to_vec();
    sorted.sort_by(f64::total_cmp);

    let trimmed = if sorted.len() > TRIM_THRESHOLD {
        let trim = (sorted.len() / 10).max(1);
        &sorted[trim..sorted.len() - trim]
    } else {
        &sorted[..]
    };

    let median = median(trimmed)?;
    let mean = trimmed.iter().sum::<f64>() / trimmed.len() as f64;
    Some(TrimmedStatistics {
        median,
        mean,
        kept: trimmed.len(),
    })
}

/// Rent assumed for a subject without a known rent: small units are
/// typically let further below market than large ones.
pub fn undervaluation_factor(surface: f64) -> f64 {
    if surface > 500.0 {
        0.88
    } else if surface > 200.0 {
        0.85
    } else {
        0.82
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionBand {
    LargelyUndervalued,
    Undervalued,
    InLine,
    AboveMarket,
}

impl PositionBand {
    pub fn from_percentile(percentile: f64) -> Self {
        if percentile <= 15.0 {
            Self::LargelyUndervalued
        } else if percentile <= 35.0 {
            Self::Undervalued
        } else if percentile <= 65.0 {
            Self::InLine
        } else {
            Self::AboveMarket
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::LargelyUndervalued => "LARGEMENT SOUS-ÉVALUÉ",
            Self::Undervalued => "SOUS-ÉVALUÉ",
            Self::InLine => "Dans la norme",
            Self::AboveMarket => "Au-dessus du marché",
        }
    }

    fn narrative(self, annual_opportunity: f64, percent_gap: f64, surface: f64) -> String {
        match self {
            Self::LargelyUndervalued if annual_opportunity > 0.0 => format!(
                "Opportunité majeure: +{}€/an (+{percent_gap:.0}%)",
                format_amount(annual_opportunity)
            ),
            Self::LargelyUndervalued => "Déjà très bien positionné".to_string(),
            Self::Undervalued if annual_opportunity > 0.0 => format!(
                "Potentiel: +{}€/an (+{percent_gap:.0}%)",
                format_amount(annual_opportunity)
            ),
            Self::Undervalued => "Correctement positionné".to_string(),
            Self::InLine if annual_opportunity.abs() < surface * ALIGNED_GAP_PER_SQM => {
                "Prix aligné sur le marché".to_string()
            }
            Self::InLine if annual_opportunity > 0.0 => {
                format!("Légère opportunité: +{}€/an", format_amount(annual_opportunity))
            }
            Self::InLine => {
                format!("Légèrement au-dessus: {}€/an", format_amount(annual_opportunity))
            }
            Self::AboveMarket if annual_opportunity < 0.0 => format!(
                "Risque: {}€/an au dessus du marché",
                format_amount(annual_opportunity.abs())
            ),
            Self::AboveMarket => "Dans le haute de la fourchette".to_string(),
        }
    }
}

/// Whole euros with `,` thousands separators, e.g. `-12,345`.
pub fn format_amount(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if rounded < 0.0 {
        grouped.insert(0, '-');
    }
    grouped
}

/// Places the subject within the distribution of its comparables.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionScorer {
    quality: DataQualityEstimator,
}

impl PositionScorer {
    pub fn score(&self, query: &TargetQuery, comparables: Vec<ScoredComparable>) -> MarketPosition {
        let prices: Vec<f64> = comparables
            .iter()
            .map(|comparable| comparable.record.price_per_sqm)
            .collect();
        let Some(stats) = trimmed_statistics(&prices) else {
            return MarketPosition::undetermined("No comparables found");
        };

        let subject_price = match query.current_rent {
            Some(rent) => rent / query.surface,
            None => stats.median * undervaluation_factor(query.surface),
        };

        let below = prices.iter().filter(|price| **price < subject_price).count();
        let percentile = below as f64 / prices.len() as f64 * 100.0;

        let gap = stats.median - subject_price;
        let annual_opportunity = gap * query.surface;
        let percent_gap = if stats.median > 0.0 {
            gap / stats.median * 100.0
        } else {
            0.0
        };

        let band = PositionBand::from_percentile(percentile);
        let data_quality = self.quality.estimate(&comparables);

        MarketPosition {
            percentile_position: format!("{}ème percentile - {}", percentile.trunc(), band.label()),
            percentile: Some(percentile),
            market_median_price: Some(stats.median),
            market_mean_price: Some(stats.mean),
            your_estimated_price: Some(subject_price),
            annual_opportunity: Some(annual_opportunity),
            percent_gap: Some(percent_gap),
            immediate_opportunity: band.narrative(annual_opportunity, percent_gap, query.surface),
            confidence_percentage: data_quality.confidence_percentage,
            data_quality,
            comparable_count: comparables.len(),
            source_distribution: source_distribution(&comparables),
            comparables,
        }
    }
}
