use serde::{Deserialize, Deserializer};
use std::io::Read;
use tracing::warn;

use crate::market::domain::RawListingRow;

/// Reads listing rows from CSV, skipping rows that cannot be decoded.
///
/// Header cells are trimmed so `" CITY "` still maps to `CITY`; empty cells
/// become `None`. A malformed header or an I/O failure aborts the read.
pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<RawListingRow>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (index, record) in csv_reader.records().enumerate() {
        let decoded =
            record.and_then(|record| record.deserialize::<CsvListingRow>(Some(&headers)));
        match decoded {
            Ok(row) => rows.push(row.into()),
            Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => return Err(err),
            Err(err) => {
                skipped += 1;
                warn!(line = index + 2, error = %err, "skipping unreadable dataset row");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, kept = rows.len(), "dataset rows skipped while parsing");
    }
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct CsvListingRow {
    #[serde(rename = "TITLE", default, deserialize_with = "empty_string_as_none")]
    title: Option<String>,
    #[serde(rename = "PRICE", default, deserialize_with = "empty_string_as_none")]
    price: Option<String>,
    #[serde(
        rename = "PRICE PER SQUARE METER",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    price_per_sqm: Option<String>,
    #[serde(rename = "CITY", default, deserialize_with = "empty_string_as_none")]
    city: Option<String>,
    #[serde(rename = "AREA", default, deserialize_with = "empty_string_as_none")]
    area: Option<String>,
    #[serde(rename = "LAT", default, deserialize_with = "empty_string_as_none")]
    lat: Option<String>,
    #[serde(rename = "LNG", default, deserialize_with = "empty_string_as_none")]
    lng: Option<String>,
    #[serde(
        rename = "LAST PUBLICATION DATE",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    last_publication_date: Option<String>,
}

impl From<CsvListingRow> for RawListingRow {
    fn from(row: CsvListingRow) -> Self {
        Self {
            title: row.title,
            monthly_price: row.price,
            price_per_sqm: row.price_per_sqm,
            city: row.city,
            area: row.area,
            lat: row.lat,
            lng: row.lng,
            last_publication_date: row.last_publication_date,
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn maps_dataset_columns_and_ignores_extras() {
        let csv = "ID,TITLE,PRICE,PRICE PER SQUARE METER,CITY,AREA,LAT,LNG,LAST PUBLICATION DATE,REGION\n\
test1,Local commercial 150 m²,5625,,Paris 75001,150,48.8566,2.3522,2025-09-24T10:00:00Z,Ile-de-France\n";
        let rows = parse_rows(Cursor::new(csv)).expect("parse");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.title.as_deref(), Some("Local commercial 150 m²"));
        assert_eq!(row.monthly_price.as_deref(), Some("5625"));
        assert_eq!(row.price_per_sqm, None);
        assert_eq!(row.city.as_deref(), Some("Paris 75001"));
        assert_eq!(row.lat.as_deref(), Some("48.8566"));
        assert_eq!(
            row.last_publication_date.as_deref(),
            Some("2025-09-24T10:00:00Z")
        );
    }

    #[test]
    fn trims_header_cells() {
        let csv = " CITY , AREA \nLyon 69003,180\n";
        let rows = parse_rows(Cursor::new(csv)).expect("parse");
        assert_eq!(rows[0].city.as_deref(), Some("Lyon 69003"));
        assert_eq!(rows[0].area.as_deref(), Some("180"));
        assert_eq!(rows[0].monthly_price, None);
    }

    #[test]
    fn undecodable_row_is_skipped_without_losing_the_others() {
        let mut csv = b"TITLE,PRICE,CITY,AREA\nBureau A,3000,Lyon 69003,120\n".to_vec();
        csv.extend_from_slice(b"Bad \xff\xfe,3100,Lyon 69003,125\n");
        csv.extend_from_slice(b"Bureau B,2500,Lille,100\n");

        let rows = parse_rows(Cursor::new(csv)).expect("bad row does not abort the read");

        let titles: Vec<_> = rows.iter().map(|row| row.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("Bureau A"), Some("Bureau B")]);
        assert_eq!(rows[1].city.as_deref(), Some("Lille"));
    }

    #[test]
    fn short_rows_keep_missing_cells_empty() {
        let csv = "TITLE,PRICE,CITY,AREA\nBureau,4350\n";
        let rows = parse_rows(Cursor::new(csv)).expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].city, None);
        assert_eq!(rows[0].area, None);
    }
}
