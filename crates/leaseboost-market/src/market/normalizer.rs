use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use super::domain::{Coordinates, ListingRecord, RawListingRow};

pub const MIN_PRICE_PER_SQM: f64 = 5.0;
pub const MAX_PRICE_PER_SQM: f64 = 2000.0;
pub const MIN_AREA_SQM: f64 = 10.0;
pub const MAX_AREA_SQM: f64 = 5000.0;
const MIN_CITY_CHARS: usize = 3;

/// Why a raw row did not make it into the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRejection {
    MissingPrice,
    PriceOutOfRange,
    MissingArea,
    AreaOutOfRange,
    MissingCity,
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationReport {
    pub records: Vec<ListingRecord>,
    pub rejected: BTreeMap<RowRejection, usize>,
}

impl NormalizationReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Turns raw dataset rows into validated listings.
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_publication_age: Duration,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Duration::weeks(8))
    }
}

impl Normalizer {
    pub fn new(max_publication_age: Duration) -> Self {
        Self {
            max_publication_age,
        }
    }

    /// Rows with a missing or unparseable publication date are kept; only a
    /// readable date older than the window drops a row.
    pub fn normalize(&self, rows: &[RawListingRow], now: DateTime<Utc>) -> NormalizationReport {
        let cutoff = now - self.max_publication_age;
        let mut report = NormalizationReport::default();

        for row in rows {
            match self.normalize_row(row, cutoff) {
                Ok(record) => report.records.push(record),
                Err(reason) => *report.rejected.entry(reason).or_insert(0) += 1,
            }
        }

        info!(
            raw = rows.len(),
            usable = report.records.len(),
            rejected = report.rejected_total(),
            stale = report.rejected.get(&RowRejection::Stale).copied().unwrap_or(0),
            "normalized comparables dataset"
        );
        report
    }

    fn normalize_row(
        &self,
        row: &RawListingRow,
        cutoff: DateTime<Utc>,
    ) -> Result<ListingRecord, RowRejection> {
        let area = parse_number(row.area.as_deref());
        let price_per_sqm = derive_price_per_sqm(row, area).ok_or(RowRejection::MissingPrice)?;
        if !(price_per_sqm > MIN_PRICE_PER_SQM && price_per_sqm < MAX_PRICE_PER_SQM) {
            return Err(RowRejection::PriceOutOfRange);
        }

        let area = area.ok_or(RowRejection::MissingArea)?;
        if !(area > MIN_AREA_SQM && area < MAX_AREA_SQM) {
            return Err(RowRejection::AreaOutOfRange);
        }

        let city_label = row
            .city
            .as_deref()
            .map(str::trim)
            .filter(|city| city.chars().count() >= MIN_CITY_CHARS)
            .ok_or(RowRejection::MissingCity)?;

        let published_raw = row
            .last_publication_date
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty());
        let published_at = published_raw.and_then(parse_publication_date);
        if matches!(published_at, Some(published) if published < cutoff) {
            return Err(RowRejection::Stale);
        }

        let coordinates = match (
            parse_number(row.lat.as_deref()),
            parse_number(row.lng.as_deref()),
        ) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon),
            _ => None,
        };

        Ok(ListingRecord {
            title: row.title.as_deref().map(str::trim).map(str::to_string),
            city_label: city_label.to_string(),
            city_key: normalize_city(city_label),
            area_sqm: area,
            price_per_sqm,
            coordinates,
            published_at,
            published_raw: published_raw.map(str::to_string),
        })
    }
}

fn derive_price_per_sqm(row: &RawListingRow, area: Option<f64>) -> Option<f64> {
    if let Some(explicit) = parse_number(row.price_per_sqm.as_deref()).filter(|value| *value > 0.0)
    {
        return Some(explicit);
    }

    match (parse_number(row.monthly_price.as_deref()), area) {
        (Some(monthly), Some(area)) if monthly > 0.0 && area > 0.0 => Some(monthly * 12.0 / area),
        _ => None,
    }
}

/// Uppercased city key without postal codes, e.g. `"Paris 75001"` -> `"PARIS"`.
pub fn normalize_city(label: &str) -> String {
    label
        .split_whitespace()
        .enumerate()
        .filter(|(index, token)| *index == 0 || !is_postal_code(token))
        .map(|(_, token)| token)
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn is_postal_code(token: &str) -> bool {
    token.len() == 5 && token.bytes().all(|byte| byte.is_ascii_digit())
}

/// Accepts `1 234,5`, `1234.5` and surrounding whitespace.
fn parse_number(raw: Option<&str>) -> Option<f64> {
    let cleaned: String = raw?
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub(crate) fn parse_publication_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
