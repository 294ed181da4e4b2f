use crate::infra::{build_market_service, parse_rent, parse_surface};
use clap::Args;
use leaseboost_market::config::AppConfig;
use leaseboost_market::error::AppError;
use leaseboost_market::market::{CacheStatus, MarketPosition};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct PositionArgs {
    /// City of the property, e.g. "Paris" or "Nanterre"
    #[arg(long)]
    pub(crate) city: String,
    /// Surface in square metres
    #[arg(long, value_parser = parse_surface)]
    pub(crate) surface: f64,
    /// Street address, geocoded to enable the nearby tier
    #[arg(long)]
    pub(crate) address: Option<String>,
    /// Current annual rent in euros
    #[arg(long, value_parser = parse_rent)]
    pub(crate) current_rent: Option<f64>,
    /// Read comparables from a local CSV export instead of the configured URL
    #[arg(long)]
    pub(crate) dataset_csv: Option<PathBuf>,
    /// Print the position as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct StatusArgs {
    /// Read comparables from a local CSV export instead of the configured URL
    #[arg(long)]
    pub(crate) dataset_csv: Option<PathBuf>,
}

pub(crate) async fn run_position(args: PositionArgs) -> Result<(), AppError> {
    let PositionArgs {
        city,
        surface,
        address,
        current_rent,
        dataset_csv,
        json,
    } = args;

    let config = AppConfig::load()?;
    let service = build_market_service(&config, dataset_csv)?;
    let position = service
        .get_market_position(&city, address.as_deref(), surface, current_rent)
        .await;

    if json {
        match serde_json::to_string_pretty(&position) {
            Ok(body) => println!("{body}"),
            Err(err) => eprintln!("failed to serialise position: {err}"),
        }
    } else {
        print!("{}", render_position(&city, surface, &position));
    }
    Ok(())
}

pub(crate) async fn run_status(args: StatusArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let service = build_market_service(&config, args.dataset_csv)?;
    service.cache().ensure_fresh().await;
    print!("{}", render_status(&service.status()));
    Ok(())
}

pub(crate) fn render_position(city: &str, surface: f64, position: &MarketPosition) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Market position for {surface} m² in {city}");
    let _ = writeln!(out, "Position: {}", position.percentile_position);
    let _ = writeln!(out, "Opportunity: {}", position.immediate_opportunity.trim());

    if let (Some(median), Some(estimated)) =
        (position.market_median_price, position.your_estimated_price)
    {
        let _ = writeln!(
            out,
            "Market median {median:.0} €/m²/an | Your price {estimated:.2} €/m²/an"
        );
    }

    let quality = &position.data_quality;
    let _ = writeln!(
        out,
        "Confidence: {}% (count {:.2}, similarity {:.2}, sources {:.1})",
        position.confidence_percentage,
        quality.count_factor,
        quality.avg_similarity,
        quality.source_quality
    );

    if position.comparables.is_empty() {
        let _ = writeln!(out, "\nComparables: none");
        return out;
    }

    let _ = writeln!(out, "\nComparables ({})", position.comparable_count);
    for comparable in &position.comparables {
        let record = &comparable.record;
        let _ = writeln!(
            out,
            "- [{}] {} | {:.0} €/m²/an | {:.0} m² | {:.1} km | score {:.2} | {}",
            record.source,
            record.address,
            record.price_per_sqm,
            record.surface,
            record.distance_km,
            comparable.similarity_score,
            record.transaction_date
        );
    }
    out
}

pub(crate) fn render_status(status: &CacheStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Dataset cache: {}", status.summary);
    match status.last_refresh {
        Some(refreshed) => {
            let _ = writeln!(
                out,
                "Last refresh: {} ({} days ago)",
                refreshed.format("%Y-%m-%d %H:%M UTC"),
                status.age_days.unwrap_or(0)
            );
        }
        None => {
            let _ = writeln!(out, "Last refresh: never");
        }
    }
    if let Some(due) = status.next_refresh_due {
        let _ = writeln!(out, "Next refresh due: {}", due.format("%Y-%m-%d %H:%M UTC"));
    }
    let _ = writeln!(
        out,
        "Records: {} | stale: {}",
        status.record_count,
        if status.stale { "yes" } else { "no" }
    );
    out
}
