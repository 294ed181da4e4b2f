mod parser;

use async_trait::async_trait;
use std::fmt::Debug;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use super::domain::RawListingRow;

#[derive(Debug, thiserror::Error)]
pub enum DatasetFetchError {
    #[error("no dataset source configured")]
    Unconfigured,
    #[error("dataset request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("dataset endpoint answered with status {status}")]
    Status { status: u16 },
    #[error("dataset is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read dataset file: {0}")]
    Io(#[from] std::io::Error),
}

/// Origin of the raw comparables table.
#[async_trait]
pub trait DatasetSource: Debug + Send + Sync {
    async fn fetch_rows(&self) -> Result<Vec<RawListingRow>, DatasetFetchError>;
}

/// CSV export URL of a publicly shared spreadsheet tab.
pub fn google_sheet_export_url(sheet_id: &str, gid: u64) -> String {
    format!("https://docs.google.com/spreadsheets/d/{sheet_id}/export?format=csv&gid={gid}")
}

/// Downloads the dataset as CSV over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCsvSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCsvSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DatasetFetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DatasetSource for HttpCsvSource {
    async fn fetch_rows(&self) -> Result<Vec<RawListingRow>, DatasetFetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DatasetFetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(parser::parse_rows(Cursor::new(body))?)
    }
}

/// Reads the dataset from a local CSV export.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DatasetSource for CsvFileSource {
    async fn fetch_rows(&self) -> Result<Vec<RawListingRow>, DatasetFetchError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(parser::parse_rows(Cursor::new(bytes))?)
    }
}

/// Stand-in when no dataset location is configured; every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredSource;

#[async_trait]
impl DatasetSource for UnconfiguredSource {
    async fn fetch_rows(&self) -> Result<Vec<RawListingRow>, DatasetFetchError> {
        Err(DatasetFetchError::Unconfigured)
    }
}

/// Parses CSV text already in memory, e.g. a dataset posted by a client.
pub fn rows_from_csv(text: &str) -> Result<Vec<RawListingRow>, DatasetFetchError> {
    Ok(parser::parse_rows(Cursor::new(text.as_bytes()))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sheet_export_url() {
        assert_eq!(
            google_sheet_export_url("1EMbc", 0),
            "https://docs.google.com/spreadsheets/d/1EMbc/export?format=csv&gid=0"
        );
    }

    #[tokio::test]
    async fn file_source_propagates_io_errors() {
        let source = CsvFileSource::new("./does-not-exist.csv");
        match source.fetch_rows().await {
            Err(DatasetFetchError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_source_always_fails() {
        let error = UnconfiguredSource
            .fetch_rows()
            .await
            .expect_err("no source configured");
        assert!(matches!(error, DatasetFetchError::Unconfigured));
    }

    #[test]
    fn rows_from_csv_reads_in_memory_text() {
        let rows = rows_from_csv("CITY,AREA,PRICE\nLyon 69003,180,4350\n").expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].monthly_price.as_deref(), Some("4350"));
    }
}
