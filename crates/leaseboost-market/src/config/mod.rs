use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::market::dataset::google_sheet_export_url;

const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub market: MarketConfig,
    pub geocoder: GeocoderConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            market: MarketConfig::from_env()?,
            geocoder: GeocoderConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the comparables dataset comes from and how long a snapshot stays fresh.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub dataset_url: Option<String>,
    pub refresh_after: chrono::Duration,
    pub fetch_timeout: Duration,
    pub max_publication_age: chrono::Duration,
    pub postal_codes_csv: Option<PathBuf>,
}

impl MarketConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let sheet_gid = parse_var::<u64>("MARKET_SHEET_GID", 0)?;
        let dataset_url = non_empty_var("MARKET_DATASET_URL").or_else(|| {
            non_empty_var("MARKET_SHEET_ID").map(|id| google_sheet_export_url(&id, sheet_gid))
        });

        Ok(Self {
            dataset_url,
            refresh_after: chrono::Duration::days(parse_var("MARKET_REFRESH_DAYS", 3)?),
            fetch_timeout: Duration::from_secs(parse_var("MARKET_FETCH_TIMEOUT_SECS", 10)?),
            max_publication_age: chrono::Duration::weeks(parse_var(
                "MARKET_MAX_PUBLICATION_AGE_WEEKS",
                8,
            )?),
            postal_codes_csv: non_empty_var("MARKET_POSTAL_CODES_CSV").map(PathBuf::from),
        })
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            dataset_url: None,
            refresh_after: chrono::Duration::days(3),
            fetch_timeout: Duration::from_secs(10),
            max_publication_age: chrono::Duration::weeks(8),
            postal_codes_csv: None,
        }
    }
}

/// Geocoder endpoint settings.
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl GeocoderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: non_empty_var("GEOCODER_URL")
                .unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            user_agent: non_empty_var("GEOCODER_USER_AGENT")
                .unwrap_or_else(|| "leaseboost-market".to_string()),
            timeout: Duration::from_secs(parse_var("GEOCODER_TIMEOUT_SECS", 5)?),
        })
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODER_URL.to_string(),
            user_agent: "leaseboost-market".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
