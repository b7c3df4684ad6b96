use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

const DEFAULT_SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";
const DEFAULT_WIKIBASE_API: &str = "https://www.wikidata.org/w/api.php";

fn default_user_agent() -> String {
    format!(
        "kg-gate/{} (https://github.com/kg-gate/kg-gate; ops@kg-gate.dev)",
        env!("CARGO_PKG_VERSION")
    )
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Numeric keys are validated rather than silently defaulted: a typo in a
/// limit or TTL should stop startup, not run with a surprise value.
fn profiled_env_num<T: FromStr>(profile: &str, key: &str, default: T) -> Result<T, ConfigError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Errors raised while loading or validating configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is not a valid URL: {value}")]
    InvalidUrl { key: String, value: String },

    #[error("{key} must be a number, got '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("KG_HTTP2 must be one of auto|on|off, got '{0}'")]
    InvalidHttp2Mode(String),

    #[error("{0}")]
    Invalid(String),
}

// ── HTTP/2 toggle ─────────────────────────────────────────────

/// Transport-level HTTP version selection. Orthogonal to the request
/// method/format fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Http2Mode {
    /// Negotiate via ALPN; HTTP/2 when the server offers it.
    Auto,
    /// Speak HTTP/2 from the first byte.
    On,
    /// Force HTTP/1.1.
    Off,
}

impl FromStr for Http2Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "on" | "true" | "1" | "yes" => Ok(Self::On),
            "off" | "false" | "0" | "no" => Ok(Self::Off),
            other => Err(ConfigError::InvalidHttp2Mode(other.to_string())),
        }
    }
}

impl fmt::Display for Http2Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub endpoint: EndpointConfig,
    pub server: ServerConfig,
    pub query: QueryPolicyConfig,
    pub cache: CacheConfig,
    pub rate: RateConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `KG_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_or("KG_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build and validate config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let config = Self {
            profile: p.to_string(),
            endpoint: EndpointConfig::from_env_profiled(p)?,
            server: ServerConfig::from_env_profiled(p)?,
            query: QueryPolicyConfig::from_env_profiled(p)?,
            cache: CacheConfig::from_env_profiled(p)?,
            rate: RateConfig::from_env_profiled(p)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks. Individual keys are already parsed at this point.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("SPARQL_ENDPOINT", &self.endpoint.sparql_url)?;
        check_url("WIKIBASE_API", &self.endpoint.api_url)?;
        if self.endpoint.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("KG_USER_AGENT must not be empty".into()));
        }
        if self.query.limit_cap == 0 || self.query.limit_max == 0 {
            return Err(ConfigError::Invalid("LIMIT caps must be at least 1".into()));
        }
        if self.query.limit_cap > self.query.limit_max {
            return Err(ConfigError::Invalid(format!(
                "KG_LIMIT_CAP ({}) exceeds KG_LIMIT_MAX ({})",
                self.query.limit_cap, self.query.limit_max
            )));
        }
        if self.rate.max_delay_ms < self.rate.base_delay_ms {
            return Err(ConfigError::Invalid(
                "KG_RATE_MAX_MS must be >= KG_RATE_BASE_MS".into(),
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  endpoint:  sparql={}, api={}", self.endpoint.sparql_url, self.endpoint.api_url);
        tracing::info!("  http:      http2={}, user_agent={}", self.endpoint.http2, self.endpoint.user_agent);
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  query:     limit_cap={}, limit_max={}, max_rows={}",
            self.query.limit_cap, self.query.limit_max, self.query.max_rows
        );
        tracing::info!(
            "  cache:     search={}s, schema={}s, results={}s",
            self.cache.search_ttl_secs, self.cache.schema_ttl_secs, self.cache.result_ttl_secs
        );
        tracing::info!(
            "  rate:      base={}ms, max={}ms, min_interval={}ms",
            self.rate.base_delay_ms, self.rate.max_delay_ms, self.rate.min_interval_ms
        );
    }
}

fn check_url(key: &str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

// ── Endpoint / outbound HTTP ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub sparql_url: String,
    pub api_url: String,
    pub user_agent: String,
    pub http2: Http2Mode,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub dry_run_timeout_secs: u64,
}

impl EndpointConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            sparql_url: profiled_env_or(p, "SPARQL_ENDPOINT", DEFAULT_SPARQL_ENDPOINT),
            api_url: profiled_env_or(p, "WIKIBASE_API", DEFAULT_WIKIBASE_API),
            user_agent: profiled_env_opt(p, "KG_USER_AGENT").unwrap_or_else(default_user_agent),
            http2: profiled_env_or(p, "KG_HTTP2", "auto").parse()?,
            connect_timeout_secs: profiled_env_num(p, "KG_CONNECT_TIMEOUT_SECS", 10)?,
            query_timeout_secs: profiled_env_num(p, "KG_QUERY_TIMEOUT_SECS", 30)?,
            dry_run_timeout_secs: profiled_env_num(p, "KG_DRY_RUN_TIMEOUT_SECS", 15)?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn dry_run_timeout(&self) -> Duration {
        Duration::from_secs(self.dry_run_timeout_secs)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sparql_url: DEFAULT_SPARQL_ENDPOINT.to_string(),
            api_url: DEFAULT_WIKIBASE_API.to_string(),
            user_agent: default_user_agent(),
            http2: Http2Mode::Auto,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            dry_run_timeout_secs: 15,
        }
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Deadline for a single tool call, including every network attempt.
    pub tool_timeout_secs: u64,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_num(p, "PORT", 8080)?,
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            tool_timeout_secs: profiled_env_num(p, "KG_TOOL_TIMEOUT_SECS", 90)?,
        })
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origin: "*".to_string(),
            tool_timeout_secs: 90,
        }
    }
}

// ── Query policy ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPolicyConfig {
    /// LIMIT injected or enforced when the caller does not ask for less.
    pub limit_cap: u32,
    /// Ceiling for caller-requested limits.
    pub limit_max: u32,
    /// Rows kept from a response even if the endpoint ignored LIMIT.
    pub max_rows: usize,
    /// Label-service queries above this LIMIT get a timeout warning.
    pub label_service_limit: u32,
    /// Soft triple-pattern count before a complexity warning.
    pub max_triples: usize,
}

impl QueryPolicyConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            limit_cap: profiled_env_num(p, "KG_LIMIT_CAP", 200)?,
            limit_max: profiled_env_num(p, "KG_LIMIT_MAX", 500)?,
            max_rows: profiled_env_num(p, "KG_MAX_ROWS", 500)?,
            label_service_limit: profiled_env_num(p, "KG_LABEL_SERVICE_LIMIT", 50)?,
            max_triples: profiled_env_num(p, "KG_MAX_TRIPLES", 12)?,
        })
    }

    /// Clamp a caller-requested limit into `1..=limit_max`, defaulting to the cap.
    pub fn effective_cap(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.limit_cap)
            .clamp(1, self.limit_max.max(1))
    }
}

impl Default for QueryPolicyConfig {
    fn default() -> Self {
        Self {
            limit_cap: 200,
            limit_max: 500,
            max_rows: 500,
            label_service_limit: 50,
            max_triples: 12,
        }
    }
}

// ── Caches ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub search_ttl_secs: u64,
    pub schema_ttl_secs: u64,
    pub result_ttl_secs: u64,
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            search_ttl_secs: profiled_env_num(p, "KG_SEARCH_TTL_SECS", 600)?,
            schema_ttl_secs: profiled_env_num(p, "KG_SCHEMA_TTL_SECS", 900)?,
            result_ttl_secs: profiled_env_num(p, "KG_RESULT_TTL_SECS", 300)?,
        })
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: 600,
            schema_ttl_secs: 900,
            result_ttl_secs: 300,
        }
    }
}

// ── Rate governor ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Spacing enforced between consecutive requests to one endpoint.
    pub min_interval_ms: u64,
}

impl RateConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_delay_ms: profiled_env_num(p, "KG_RATE_BASE_MS", 1_000)?,
            max_delay_ms: profiled_env_num(p, "KG_RATE_MAX_MS", 32_000)?,
            min_interval_ms: profiled_env_num(p, "KG_MIN_INTERVAL_MS", 1_000)?,
        })
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            min_interval_ms: 1_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            endpoint: EndpointConfig::default(),
            server: ServerConfig::default(),
            query: QueryPolicyConfig::default(),
            cache: CacheConfig::default(),
            rate: RateConfig::default(),
        }
    }
}
