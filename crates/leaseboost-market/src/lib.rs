//! Market comparables resolution and rent position scoring.
//!
//! The [`market`] module owns the whole pipeline: a periodically refreshed
//! comparables dataset, a tiered resolver, percentile scoring, and a
//! confidence estimate. [`market::MarketIntelligenceService`] is the entry
//! point used by the HTTP service and the CLI.

pub mod config;
pub mod error;
pub mod market;
pub mod telemetry;
