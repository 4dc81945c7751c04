//! IP geolocation for visit logging
//!
//! Two backends are available: an offline MaxMind GeoLite2-City database
//! (preferred when configured) and an ipapi-compatible HTTP service whose
//! answers are cached per address. Callers treat any lookup failure as
//! "no location" rather than an error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AnalyticsConfig;

/// Resolved location of a visitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Country name, e.g. "United States"
    pub country: Option<String>,
    pub city: Option<String>,
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation>;
}

/// Pick the locator the configuration asks for
pub fn locator_from_config(config: &AnalyticsConfig) -> Result<Arc<dyn GeoLocator>> {
    if let Some(path) = config.geoip_city_db_path.as_deref() {
        info!("Using MaxMind GeoIP database: {}", path);
        return Ok(Arc::new(MaxMindLocator::open(path)?));
    }

    info!("Using geolocation service: {}", config.geoip_service_url);
    Ok(Arc::new(IpApiLocator::new(
        &config.geoip_service_url,
        config.geoip_cache_entries,
        Duration::from_secs(config.geoip_cache_ttl_secs),
    )?))
}

/// Response body of `GET {base}/{ip}/json/`
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Geolocation through an ipapi.co-compatible HTTP API
pub struct IpApiLocator {
    base_url: String,
    client: Client,
    cache: Cache<IpAddr, GeoLocation>,
}

impl IpApiLocator {
    pub fn new(base_url: &str, max_entries: u64, ttl: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("mopsagent-geoip/0.1.0")
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build HTTP client for geolocation")?;

        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            cache,
        })
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoLocation> {
        let url = format!("{}/{}/json/", self.base_url, ip);
        let body: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to request geolocation")?
            .error_for_status()
            .context("geolocation service returned an error status")?
            .json()
            .await
            .context("failed to parse geolocation response")?;

        if body.error {
            bail!(
                "geolocation service rejected {ip}: {}",
                body.reason.as_deref().unwrap_or("unknown reason")
            );
        }

        Ok(GeoLocation {
            country: body.country_name.filter(|c| !c.is_empty()),
            city: body.city.filter(|c| !c.is_empty()),
        })
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        if let Some(cached) = self.cache.get(&ip).await {
            return Ok(cached);
        }

        let location = self.fetch(ip).await?;
        self.cache.insert(ip, location.clone()).await;
        Ok(location)
    }
}

/// Offline geolocation from a GeoLite2-City / GeoIP2-City database
#[derive(Clone)]
pub struct MaxMindLocator {
    reader: Arc<Reader<Mmap>>,
}

impl MaxMindLocator {
    pub fn open(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    pub fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let result = self
            .reader
            .lookup(ip)
            .with_context(|| format!("GeoIP lookup failed for {ip}"))?;

        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            return Ok(GeoLocation {
                country: city.country.names.english.map(|s| s.to_string()),
                city: city.city.names.english.map(|s| s.to_string()),
            });
        }

        // Country-only databases still carry the country record
        match result.decode::<geoip2::Country>() {
            Ok(Some(country)) => Ok(GeoLocation {
                country: country.country.names.english.map(|s| s.to_string()),
                city: None,
            }),
            _ => bail!("no GeoIP record for {ip}"),
        }
    }
}

#[async_trait]
impl GeoLocator for MaxMindLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        self.lookup(ip)
    }
}
