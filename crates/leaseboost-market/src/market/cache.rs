use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::dataset::DatasetSource;
use super::domain::ListingRecord;
use super::normalizer::{NormalizationReport, Normalizer, RowRejection};
use super::scoring::median;

const MINOR_CHANGE_THRESHOLD: usize = 5;

/// Immutable, fully cleaned dataset. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    records: Vec<ListingRecord>,
    refreshed_at: DateTime<Utc>,
    rejected: BTreeMap<RowRejection, usize>,
}

impl DatasetSnapshot {
    pub fn new(records: Vec<ListingRecord>, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            records,
            refreshed_at,
            rejected: BTreeMap::new(),
        }
    }

    fn from_report(report: NormalizationReport, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            records: report.records,
            refreshed_at,
            rejected: report.rejected,
        }
    }

    pub fn records(&self) -> &[ListingRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn rejected(&self) -> &BTreeMap<RowRejection, usize> {
        &self.rejected
    }

    /// Median annual price per square metre across every listing.
    pub fn median_price(&self) -> Option<f64> {
        let mut prices: Vec<f64> = self.records.iter().map(|r| r.price_per_sqm).collect();
        prices.sort_by(f64::total_cmp);
        median(&prices)
    }

    pub fn distinct_cities(&self) -> usize {
        self.records
            .iter()
            .map(|record| record.city_key.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshReason {
    FirstLoad,
    Scheduled,
    Forced,
}

impl RefreshReason {
    const fn label(self) -> &'static str {
        match self {
            Self::FirstLoad => "first_load",
            Self::Scheduled => "scheduled",
            Self::Forced => "force_refresh",
        }
    }
}

/// Freshness report for operators and the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub last_refresh: Option<DateTime<Utc>>,
    pub age_days: Option<i64>,
    pub record_count: usize,
    pub stale: bool,
    pub data_available: bool,
    pub next_refresh_due: Option<DateTime<Utc>>,
    pub summary: String,
}

/// Holds the last good snapshot and refreshes it when it goes stale.
///
/// Readers clone the current `Arc` and never observe a partial update. At
/// most one fetch runs at a time; while it runs, callers that already have a
/// snapshot keep using it, and callers without one wait for the outcome.
#[derive(Debug)]
pub struct DatasetCache {
    source: Arc<dyn DatasetSource>,
    normalizer: Normalizer,
    refresh_after: Duration,
    snapshot: RwLock<Option<Arc<DatasetSnapshot>>>,
    force: AtomicBool,
    attempts: AtomicU64,
    refresh_guard: tokio::sync::Mutex<()>,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn DatasetSource>, normalizer: Normalizer, refresh_after: Duration) -> Self {
        Self {
            source,
            normalizer,
            refresh_after,
            snapshot: RwLock::new(None),
            force: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            refresh_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<DatasetSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests a refresh on the next `ensure_fresh` call.
    pub fn force_refresh(&self) {
        self.force.store(true, Ordering::SeqCst);
        info!("dataset refresh forced for the next request");
    }

    pub async fn ensure_fresh(&self) -> Option<Arc<DatasetSnapshot>> {
        self.ensure_fresh_at(Utc::now()).await
    }

    pub async fn ensure_fresh_at(&self, now: DateTime<Utc>) -> Option<Arc<DatasetSnapshot>> {
        if self.refresh_reason(now).is_none() {
            return self.snapshot();
        }

        let attempts_seen = self.attempts.load(Ordering::SeqCst);
        let _guard = if self.snapshot().is_some() {
            match self.refresh_guard.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("dataset refresh already in flight; serving previous snapshot");
                    return self.snapshot();
                }
            }
        } else {
            let guard = self.refresh_guard.lock().await;
            if self.attempts.load(Ordering::SeqCst) != attempts_seen {
                return self.snapshot();
            }
            guard
        };

        if let Some(reason) = self.refresh_reason(now) {
            self.refresh(reason, now).await;
        }
        self.snapshot()
    }

    pub fn status(&self) -> CacheStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> CacheStatus {
        let Some(snapshot) = self.snapshot() else {
            return CacheStatus {
                last_refresh: None,
                age_days: None,
                record_count: 0,
                stale: true,
                data_available: false,
                next_refresh_due: None,
                summary: "No data loaded".to_string(),
            };
        };

        let age = now - snapshot.refreshed_at();
        let age_days = age.num_days();
        let stale = age >= self.refresh_after;
        let summary = if snapshot.is_empty() {
            "Empty data".to_string()
        } else if stale {
            format!("Refresh needed ({age_days} days old)")
        } else {
            format!("Data is fresh ({} records)", snapshot.len())
        };

        CacheStatus {
            last_refresh: Some(snapshot.refreshed_at()),
            age_days: Some(age_days),
            record_count: snapshot.len(),
            stale,
            data_available: !snapshot.is_empty(),
            next_refresh_due: Some(snapshot.refreshed_at() + self.refresh_after),
            summary,
        }
    }

    fn refresh_reason(&self, now: DateTime<Utc>) -> Option<RefreshReason> {
        match self.snapshot() {
            None => Some(RefreshReason::FirstLoad),
            Some(snapshot) if now - snapshot.refreshed_at() >= self.refresh_after => {
                Some(RefreshReason::Scheduled)
            }
            Some(_) if self.force.load(Ordering::SeqCst) => Some(RefreshReason::Forced),
            Some(_) => None,
        }
    }

    async fn refresh(&self, reason: RefreshReason, now: DateTime<Utc>) {
        self.force.store(false, Ordering::SeqCst);
        info!(reason = reason.label(), "refreshing comparables dataset");
        self.fetch_and_swap(now).await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    async fn fetch_and_swap(&self, now: DateTime<Utc>) {
        let rows = match self.source.fetch_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                self.log_failed_refresh(&err.to_string());
                return;
            }
        };

        let report = self.normalizer.normalize(&rows, now);
        if report.records.is_empty() {
            self.log_failed_refresh(&format!(
                "no usable listings among {} fetched rows",
                rows.len()
            ));
            return;
        }

        let snapshot = Arc::new(DatasetSnapshot::from_report(report, now));
        if let Some(previous) = self.snapshot() {
            let (old, new) = (previous.len(), snapshot.len());
            if old.abs_diff(new) < MINOR_CHANGE_THRESHOLD {
                info!(old, new, "minor dataset changes detected");
            } else {
                info!(old, new, "major dataset changes detected");
            }
        }
        info!(
            records = snapshot.len(),
            cities = snapshot.distinct_cities(),
            "dataset refreshed"
        );

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn log_failed_refresh(&self, reason: &str) {
        match self.snapshot() {
            Some(previous) => warn!(
                %reason,
                kept_records = previous.len(),
                "dataset refresh failed; keeping previous snapshot"
            ),
            None => warn!(
                %reason,
                "dataset refresh failed and no snapshot exists; emergency estimates will be used"
            ),
        }
    }
}
