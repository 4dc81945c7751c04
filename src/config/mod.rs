use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub auth: AuthConfig,
    pub analytics: AnalyticsConfig,
    pub tracking: TrackingConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Jwt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

/// Settings for validating access tokens issued by the hosted auth provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub issuer_url: String,
    pub audience: String,
    /// JWKS endpoint; derived from the issuer when unset
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// Shared HS256 secret, used instead of JWKS when set
    #[serde(default)]
    pub shared_secret: Option<String>,
    #[serde(default = "JwtConfig::default_cache_ttl_secs")]
    pub jwks_cache_ttl_secs: u64,
}

impl JwtConfig {
    const fn default_cache_ttl_secs() -> u64 {
        300
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Walk Forwarded / X-Forwarded-For
    Standard,
    /// Trust CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Optional GeoLite2-City database; takes precedence over the HTTP service
    pub geoip_city_db_path: Option<String>,
    /// Base URL of the ipapi-compatible geolocation service
    pub geoip_service_url: String,
    pub geoip_cache_entries: u64,
    pub geoip_cache_ttl_secs: u64,
    pub ip_anonymization: bool,
    pub trusted_proxy_mode: TrustedProxyMode,
    /// CIDR ranges of proxies allowed to append to X-Forwarded-For
    pub trusted_proxies: Vec<String>,
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub ignored_ips: Vec<String>,
    pub ignored_referrer_patterns: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            ignored_ips: vec!["172.58.132.69".to_string(), "172.58.135.90".to_string()],
            ignored_referrer_patterns: vec!["webcontainer-api.io".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./mopsagent.db?mode=rwc".to_string());
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("API_PORT must be a valid port number")?;

        let mut auth_mode = std::env::var("AUTH_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase();

        if env_flag("DISABLE_AUTH") {
            auth_mode = "none".to_string();
        }

        let auth_mode = match auth_mode.as_str() {
            "none" => AuthMode::None,
            "jwt" => AuthMode::Jwt,
            other => {
                tracing::warn!(
                    "Unknown AUTH_MODE '{other}', falling back to 'none'. Supported values: none, jwt"
                );
                AuthMode::None
            }
        };

        let jwt = if matches!(auth_mode, AuthMode::Jwt) {
            let issuer_url = std::env::var("AUTH_ISSUER_URL")
                .context("AUTH_ISSUER_URL must be set when AUTH_MODE=jwt")?;
            let audience =
                std::env::var("AUTH_AUDIENCE").unwrap_or_else(|_| "authenticated".to_string());
            let jwks_url = std::env::var("AUTH_JWKS_URL").ok();
            let shared_secret = std::env::var("AUTH_JWT_SECRET").ok();
            let jwks_cache_ttl_secs = std::env::var("AUTH_JWKS_CACHE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or_else(JwtConfig::default_cache_ttl_secs);

            Some(JwtConfig {
                issuer_url,
                audience,
                jwks_url,
                shared_secret,
                jwks_cache_ttl_secs,
            })
        } else {
            None
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            "none" => TrustedProxyMode::None,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let analytics = AnalyticsConfig {
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            geoip_service_url: std::env::var("GEOIP_SERVICE_URL")
                .unwrap_or_else(|_| "https://ipapi.co".to_string()),
            geoip_cache_entries: std::env::var("GEOIP_CACHE_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            geoip_cache_ttl_secs: std::env::var("GEOIP_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            ip_anonymization: env_flag("ANALYTICS_IP_ANONYMIZATION"),
            trusted_proxy_mode,
            trusted_proxies: env_list("TRUSTED_PROXIES").unwrap_or_default(),
            num_trusted_proxies: std::env::var("NUM_TRUSTED_PROXIES")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        let tracking_defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            ignored_ips: env_list("TRACKING_IGNORED_IPS").unwrap_or(tracking_defaults.ignored_ips),
            ignored_referrer_patterns: env_list("TRACKING_IGNORED_REFERRERS")
                .unwrap_or(tracking_defaults.ignored_referrer_patterns),
        };

        let chat_defaults = ChatConfig::default();
        let chat = ChatConfig {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            api_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(chat_defaults.api_base_url),
            model: std::env::var("OPENAI_MODEL").unwrap_or(chat_defaults.model),
            max_tokens: std::env::var("OPENAI_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(chat_defaults.max_tokens),
            temperature: std::env::var("OPENAI_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(chat_defaults.temperature),
            timeout_secs: std::env::var("OPENAI_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(chat_defaults.timeout_secs),
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            auth: AuthConfig {
                mode: auth_mode,
                jwt,
            },
            analytics,
            tracking,
            chat,
        })
    }
}
