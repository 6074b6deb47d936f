//! Boot configuration loaded from YAML.
//!
//! # Layout
//!
//! A boot file holds a list of axum entries. Every key is optional and
//! falls back to a sensible default, so the smallest useful file is:
//!
//! ```yaml
//! axum:
//!   - name: greeter
//!     port: 8080
//!     enabled: true
//! ```
//!
//! A fuller example enabling the middleware chain:
//!
//! ```yaml
//! axum:
//!   - name: greeter
//!     port: 8080
//!     enabled: true
//!     commonService:
//!       enabled: true          # /rk/v1/ready, /rk/v1/alive, /rk/v1/info
//!     prom:
//!       enabled: true          # /metrics
//!     static:
//!       enabled: true
//!       path: /static/
//!       sourcePath: ./public
//!     middleware:
//!       ignore: ["/rk/v1/"]
//!       logging:
//!         enabled: true
//!       timeout:
//!         enabled: true
//!         timeoutMs: 5000
//!         paths:
//!           - path: /v1/slow
//!             timeoutMs: 30000
//!       rateLimit:
//!         enabled: true
//!         reqPerSec: 100
//! ```
//!
//! # Environment
//!
//! The binary reads the boot file path from `BOOT_CONFIG` (default:
//! `boot.yaml`), optionally loaded from a `.env` file.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BootError, BootResult};

/// Default port when an entry doesn't specify one.
pub const DEFAULT_PORT: u16 = 8080;

/// Default timeout applied when `timeoutMs` is missing or zero.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level boot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootConfig {
    pub axum: Vec<EntryConfig>,
}

impl BootConfig {
    /// Parse a boot file from a YAML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `BootError::ConfigParse` for malformed YAML and
    /// `BootError::ConfigError` if validation fails.
    pub fn from_yaml_str(raw: &str) -> BootResult<Self> {
        let config: Self = serde_yml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a boot file from disk.
    ///
    /// # Errors
    ///
    /// Returns `BootError::ConfigRead` if the file can't be read, otherwise
    /// the same errors as [`BootConfig::from_yaml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> BootResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| BootError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Entries with `enabled: true`, in file order.
    pub fn enabled_entries(&self) -> impl Iterator<Item = &EntryConfig> {
        self.axum.iter().filter(|e| e.enabled)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// Only enabled entries are checked; disabled ones are never booted.
    ///
    /// # Errors
    ///
    /// Returns `BootError::ConfigError` if validation fails.
    pub fn validate(&self) -> BootResult<()> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for entry in self.enabled_entries() {
            let name = entry.entry_name();
            if !names.insert(name.clone()) {
                return Err(BootError::ConfigError(format!(
                    "duplicate entry name '{name}'"
                )));
            }

            // Port 0 asks the OS for an ephemeral port and may repeat
            if entry.port != 0 && !ports.insert(entry.port) {
                return Err(BootError::ConfigError(format!(
                    "entry '{name}' reuses port {}",
                    entry.port
                )));
            }

            entry.validate()?;
        }

        Ok(())
    }
}

/// One axum server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryConfig {
    pub enabled: bool,
    /// Entry name (default: `axum-<port>`)
    pub name: String,
    pub port: u16,
    pub description: String,
    pub common_service: CommonServiceConfig,
    pub prom: PromConfig,
    #[serde(rename = "static")]
    pub static_files: StaticConfig,
    pub middleware: MiddlewareConfig,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: String::new(),
            port: DEFAULT_PORT,
            description: String::new(),
            common_service: CommonServiceConfig::default(),
            prom: PromConfig::default(),
            static_files: StaticConfig::default(),
            middleware: MiddlewareConfig::default(),
        }
    }
}

impl EntryConfig {
    /// Configured name, or `axum-<port>` when empty.
    pub fn entry_name(&self) -> String {
        if self.name.is_empty() {
            format!("axum-{}", self.port)
        } else {
            self.name.clone()
        }
    }

    fn validate(&self) -> BootResult<()> {
        let name = self.entry_name();
        let fail = |msg: String| -> BootResult<()> {
            Err(BootError::ConfigError(format!("entry '{name}': {msg}")))
        };

        if self.static_files.enabled && self.static_files.source_path.is_empty() {
            return fail("static.sourcePath must not be empty".to_string());
        }

        let mw = &self.middleware;

        if mw.auth.enabled {
            if mw.auth.basic.is_empty() && mw.auth.api_key.is_empty() {
                return fail("auth is enabled but no basic or apiKey credentials are set".into());
            }
            if let Some(bad) = mw.auth.basic.iter().find(|c| !c.contains(':')) {
                return fail(format!("auth.basic credential '{bad}' must be user:pass"));
            }
        }

        if mw.csrf.enabled {
            if TokenLookup::parse(&mw.csrf.token_lookup).is_none() {
                return fail(format!(
                    "csrf.tokenLookup '{}' must be header:<name> or query:<name>",
                    mw.csrf.token_lookup
                ));
            }
            if mw.csrf.token_length == 0 {
                return fail("csrf.tokenLength must be greater than 0".into());
            }
        }

        if mw.jwt.enabled && TokenLookup::parse(&mw.jwt.token_lookup).is_none() {
            return fail(format!(
                "jwt.tokenLookup '{}' must be header:<name> or query:<name>",
                mw.jwt.token_lookup
            ));
        }

        if mw.rate_limit.enabled && mw.rate_limit.paths.iter().any(|p| p.path.is_empty()) {
            return fail("rateLimit.paths entries need a path".into());
        }

        if mw.timeout.enabled && mw.timeout.paths.iter().any(|p| p.path.is_empty()) {
            return fail("timeout.paths entries need a path".into());
        }

        Ok(())
    }
}

// =============================================================================
// Auxiliary Endpoints
// =============================================================================

/// Ready/alive/info endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonServiceConfig {
    pub enabled: bool,
    /// Prefix for every common endpoint (default: "/rk/v1/")
    pub path_prefix: String,
}

impl Default for CommonServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path_prefix: "/rk/v1/".to_string(),
        }
    }
}

/// Prometheus scrape endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for PromConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/metrics".to_string(),
        }
    }
}

/// Static file handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticConfig {
    pub enabled: bool,
    /// URL prefix (default: "/static/")
    pub path: String,
    /// Local directory to serve (default: ".")
    pub source_path: String,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/static/".to_string(),
            source_path: ".".to_string(),
        }
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Middleware chain configuration.
///
/// `ignore` is a global list of path prefixes that bypass logging, metrics,
/// auth, CSRF, rate limiting and timeout. Each middleware may add its own
/// `ignore` list on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiddlewareConfig {
    pub ignore: Vec<String>,
    /// CIDR ranges whose forwarding headers are trusted for client IPs.
    /// Empty trusts every peer.
    pub trusted_proxies: Vec<String>,
    pub logging: LoggingConfig,
    pub prom: MiddlewareToggle,
    pub trace: MiddlewareToggle,
    pub auth: AuthConfig,
    pub jwt: JwtConfig,
    pub cors: CorsConfig,
    pub meta: MetaConfig,
    pub secure: SecureConfig,
    pub csrf: CsrfConfig,
    pub rate_limit: RateLimitConfig,
    pub timeout: TimeoutConfig,
}

/// Middleware that only needs an on/off switch and an ignore list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiddlewareToggle {
    pub enabled: bool,
    pub ignore: Vec<String>,
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoding {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    pub encoding: LogEncoding,
}

/// Basic and API key authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    /// Credentials in `user:pass` form
    pub basic: Vec<String>,
    /// Accepted values for the `X-API-Key` header
    pub api_key: Vec<String>,
}

/// Bearer token validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JwtConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    /// Signing algorithm name, e.g. `HS256`, `RS256`, `ES256` (default: HS256)
    pub algorithm: String,
    /// Shared secret for the `HS*` algorithms
    pub secret: String,
    /// PEM public key for the asymmetric algorithms
    pub public_key: String,
    /// `header:<name>` or `query:<name>` (default: header:Authorization)
    pub token_lookup: String,
    /// Scheme stripped from header values (default: Bearer)
    pub auth_scheme: String,
    /// Clock skew tolerated on `exp`/`nbf`, in seconds
    pub leeway_sec: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ignore: Vec::new(),
            algorithm: "HS256".to_string(),
            secret: String::new(),
            public_key: String::new(),
            token_lookup: "header:Authorization".to_string(),
            auth_scheme: "Bearer".to_string(),
            leeway_sec: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsConfig {
    pub enabled: bool,
    /// Allowed origins, `*` for any (default: ["*"])
    pub allow_origins: Vec<String>,
    /// Allowed methods, empty for any
    pub allow_methods: Vec<String>,
    /// Allowed request headers, empty for any
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache duration in seconds (0 = not sent)
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: vec!["*".to_string()],
            allow_methods: Vec::new(),
            allow_headers: Vec::new(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaConfig {
    pub enabled: bool,
    /// Header prefix, producing `X-<prefix>-App-Name` etc. (default: "RK")
    pub prefix: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: "RK".to_string(),
        }
    }
}

/// Security response headers. Empty strings disable the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecureConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    pub xss_protection: String,
    pub content_type_nosniff: String,
    pub x_frame_options: String,
    /// `Strict-Transport-Security` max-age in seconds (0 = disabled)
    pub hsts_max_age: u64,
    pub hsts_exclude_subdomains: bool,
    pub hsts_preload_enabled: bool,
    pub content_security_policy: String,
    pub csp_report_only: bool,
    pub referrer_policy: String,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ignore: Vec::new(),
            xss_protection: "1; mode=block".to_string(),
            content_type_nosniff: "nosniff".to_string(),
            x_frame_options: "SAMEORIGIN".to_string(),
            hsts_max_age: 0,
            hsts_exclude_subdomains: false,
            hsts_preload_enabled: false,
            content_security_policy: String::new(),
            csp_report_only: false,
            referrer_policy: String::new(),
        }
    }
}

/// Double-submit cookie CSRF protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CsrfConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    /// Token length in characters (default: 32)
    pub token_length: usize,
    /// Where unsafe requests carry the token: `header:<name>` or `query:<name>`
    pub token_lookup: String,
    pub cookie_name: String,
    pub cookie_domain: String,
    pub cookie_path: String,
    /// Cookie lifetime in seconds (default: 86400)
    pub cookie_max_age: u64,
    pub cookie_http_only: bool,
    /// `lax`, `strict` or `none` (default: lax)
    pub cookie_same_site: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ignore: Vec::new(),
            token_length: 32,
            token_lookup: "header:X-CSRF-Token".to_string(),
            cookie_name: "_csrf".to_string(),
            cookie_domain: String::new(),
            cookie_path: "/".to_string(),
            cookie_max_age: 86_400,
            cookie_http_only: false,
            cookie_same_site: "lax".to_string(),
        }
    }
}

/// Parsed `tokenLookup` value, shared by CSRF and JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Header(String),
    Query(String),
}

impl TokenLookup {
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, name) = raw.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        match kind.trim() {
            "header" => Some(Self::Header(name.to_string())),
            "query" => Some(Self::Query(name.to_string())),
            _ => None,
        }
    }
}

/// Per-IP rate limiting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    /// Requests per second for paths without an override (0 = unlimited)
    pub req_per_sec: u32,
    /// Burst capacity above the sustained rate (0 = same as the rate)
    pub burst: u32,
    pub paths: Vec<PathRateLimit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathRateLimit {
    pub path: String,
    pub req_per_sec: u32,
}

/// Request timeout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub enabled: bool,
    pub ignore: Vec<String>,
    /// Global timeout in milliseconds (0 = 5000)
    pub timeout_ms: u64,
    pub paths: Vec<PathTimeout>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathTimeout {
    pub path: String,
    pub timeout_ms: u64,
}

/// Convert a configured millisecond value to a timeout, treating 0 as the default.
pub fn timeout_from_millis(ms: u64) -> Duration {
    if ms == 0 {
        DEFAULT_TIMEOUT
    } else {
        Duration::from_millis(ms)
    }
}
