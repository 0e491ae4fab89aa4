use std::str::FromStr;
use std::time::Duration;

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Directory containing `airports.csv`.
    pub data_dir: String,
    pub yr_user_agent: String,
    pub yr_base_url: String,
    pub awc_base_url: String,
    /// Query aviationweather.gov PIREPs in addition to yr.no.
    pub enable_pireps: bool,
    /// METAR and TAF for the endpoint airports.
    pub enable_airport_weather: bool,
    /// SIGMETs and G-AIRMETs along the corridor.
    pub enable_advisories: bool,
    pub http_timeout_secs: u64,
    /// Overall budget for one forecast request's provider fan-out.
    pub max_request_secs: u64,
    pub fetch_max_retries: u32,
    pub fetch_backoff_ms: u64,
    pub fetch_concurrency: usize,
    /// Fraction of sample points allowed to have no observation at all.
    pub max_missing_fraction: f64,
    pub sample_interval_nm: f64,
    pub corridor_half_width_nm: f64,
    pub default_groundspeed_kt: f64,
    pub forecast_window_minutes: i64,
    pub pirep_age_hours: f64,
    pub cache_ttl_secs: u64,
    pub map_ttl_secs: u64,
    pub rate_limit_per_minute: u32,
    /// "json" for structured logs, anything else for the human-readable format.
    pub log_format: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 8080),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            yr_user_agent: std::env::var("YR_USER_AGENT").unwrap_or_else(|_| {
                "AvWeather/0.1 github.com/avweather/avweather-api".to_string()
            }),
            yr_base_url: std::env::var("YR_BASE_URL")
                .unwrap_or_else(|_| crate::services::yr::YR_API_URL.to_string()),
            awc_base_url: std::env::var("AWC_BASE_URL")
                .unwrap_or_else(|_| crate::services::awc::AWC_API_URL.to_string()),
            enable_pireps: env_parse("ENABLE_PIREPS", true),
            enable_airport_weather: env_parse("ENABLE_AIRPORT_WEATHER", true),
            enable_advisories: env_parse("ENABLE_ADVISORIES", true),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 12),
            max_request_secs: env_parse("MAX_REQUEST_SECS", 25),
            fetch_max_retries: env_parse("FETCH_MAX_RETRIES", 2),
            fetch_backoff_ms: env_parse("FETCH_BACKOFF_MS", 250),
            fetch_concurrency: env_parse("FETCH_CONCURRENCY", 8),
            max_missing_fraction: env_parse("MAX_MISSING_FRACTION", 0.5),
            sample_interval_nm: env_parse("SAMPLE_INTERVAL_NM", 25.0),
            corridor_half_width_nm: env_parse("CORRIDOR_HALF_WIDTH_NM", 50.0),
            default_groundspeed_kt: env_parse("DEFAULT_GROUNDSPEED_KT", 450.0),
            forecast_window_minutes: env_parse("FORECAST_WINDOW_MINUTES", 90),
            pirep_age_hours: env_parse("PIREP_AGE_HOURS", 3.0),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", 120),
            map_ttl_secs: env_parse("MAP_TTL_SECS", 3600),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 30),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.max_request_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn map_ttl(&self) -> Duration {
        Duration::from_secs(self.map_ttl_secs)
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
///
/// Panics on a value that is set but does not parse.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{} must be a valid {}", key, std::any::type_name::<T>())),
        Err(_) => default,
    }
}
