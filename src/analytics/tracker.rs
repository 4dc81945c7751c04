//! Page visit logging

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::geoip::{GeoLocation, GeoLocator};
use crate::analytics::ip_extractor::anonymize_ip;
use crate::auth::SessionContext;
use crate::config::TrackingConfig;
use crate::models::{NewVisit, VisitRecord};
use crate::storage::{format_timestamp, Storage};

/// One page view as reported by the client
#[derive(Debug, Clone)]
pub struct PageVisit<'a> {
    pub page: &'a str,
    pub session: &'a SessionContext,
    pub client_ip: Option<IpAddr>,
    pub referrer: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    BlockedIp,
    BlockedReferrer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Recorded(VisitRecord),
    Ignored(IgnoreReason),
}

pub struct VisitTracker {
    storage: Arc<dyn Storage>,
    locator: Option<Arc<dyn GeoLocator>>,
    ignored_ips: Vec<IpAddr>,
    ignored_referrer_patterns: Vec<String>,
    anonymize: bool,
}

impl VisitTracker {
    pub fn new(
        storage: Arc<dyn Storage>,
        locator: Option<Arc<dyn GeoLocator>>,
        config: &TrackingConfig,
        anonymize: bool,
    ) -> Self {
        let ignored_ips = config
            .ignored_ips
            .iter()
            .filter_map(|ip| match ip.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Ignoring invalid blocklisted IP '{ip}'");
                    None
                }
            })
            .collect();

        Self {
            storage,
            locator,
            ignored_ips,
            ignored_referrer_patterns: config.ignored_referrer_patterns.clone(),
            anonymize,
        }
    }

    fn ignore_reason(&self, ip: Option<IpAddr>, referrer: Option<&str>) -> Option<IgnoreReason> {
        if ip.is_some_and(|ip| self.ignored_ips.contains(&ip)) {
            return Some(IgnoreReason::BlockedIp);
        }

        if referrer.is_some_and(|r| {
            self.ignored_referrer_patterns
                .iter()
                .any(|pattern| r.contains(pattern.as_str()))
        }) {
            return Some(IgnoreReason::BlockedReferrer);
        }

        None
    }

    async fn locate(&self, ip: Option<IpAddr>) -> GeoLocation {
        let (Some(ip), Some(locator)) = (ip, self.locator.as_ref()) else {
            return GeoLocation::default();
        };

        match locator.locate(ip).await {
            Ok(location) => location,
            Err(e) => {
                debug!(%ip, error = %e, "geolocation failed, recording visit without location");
                GeoLocation::default()
            }
        }
    }

    /// Record a page view unless its address or referrer is blocklisted
    pub async fn track(&self, visit: PageVisit<'_>) -> Result<TrackOutcome> {
        let referrer = visit.referrer.filter(|r| !r.is_empty());

        if let Some(reason) = self.ignore_reason(visit.client_ip, referrer) {
            debug!(
                page = visit.page,
                ip = ?visit.client_ip,
                referrer,
                ?reason,
                "page visit ignored"
            );
            return Ok(TrackOutcome::Ignored(reason));
        }

        // Geolocate the real address, store the anonymized one
        let location = self.locate(visit.client_ip).await;
        let stored_ip = visit
            .client_ip
            .map(|ip| if self.anonymize { anonymize_ip(ip) } else { ip });

        let row = NewVisit {
            page: visit.page.to_string(),
            timestamp: format_timestamp(Utc::now()),
            user_id: visit.session.user_id().map(str::to_string),
            ip_address: stored_ip.map(|ip| ip.to_string()),
            referrer: referrer.map(str::to_string),
            user_agent: visit.user_agent.map(str::to_string),
            country: location.country,
            city: location.city,
        };

        let record = self.storage.record_visit(&row).await?;
        Ok(TrackOutcome::Recorded(record))
    }
}
