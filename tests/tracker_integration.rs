//! Integration tests for page visit logging against a real SQLite store

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use mopsagent::analytics::{
    GeoLocation, GeoLocator, IgnoreReason, PageVisit, TrackOutcome, VisitTracker,
};
use mopsagent::auth::{SessionContext, SessionUser};
use mopsagent::config::TrackingConfig;
use mopsagent::storage::{SqliteStorage, Storage};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Locator that answers from a fixed location and records what it was asked
struct FixedLocator {
    location: Option<GeoLocation>,
    lookups: AtomicUsize,
    last_ip: std::sync::Mutex<Option<IpAddr>>,
}

impl FixedLocator {
    fn new(location: Option<GeoLocation>) -> Arc<Self> {
        Arc::new(Self {
            location,
            lookups: AtomicUsize::new(0),
            last_ip: std::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl GeoLocator for FixedLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        *self.last_ip.lock().unwrap() = Some(ip);
        self.location
            .clone()
            .ok_or_else(|| anyhow!("geolocation service unreachable"))
    }
}

fn ip(s: &str) -> Option<IpAddr> {
    Some(s.parse().unwrap())
}

fn united_states() -> GeoLocation {
    GeoLocation {
        country: Some("United States".to_string()),
        city: Some("Austin".to_string()),
    }
}

async fn stored_visits(storage: &Arc<dyn Storage>) -> usize {
    storage
        .visits_since(Utc::now() - Duration::hours(1))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_records_visit_with_location() {
    let storage = create_test_storage().await;
    let locator = FixedLocator::new(Some(united_states()));
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        Some(locator.clone()),
        &TrackingConfig::default(),
        false,
    );
    let session = SessionContext::anonymous();

    let outcome = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: ip("203.0.113.10"),
            referrer: Some("https://google.com/search"),
            user_agent: Some("Mozilla/5.0"),
        })
        .await
        .unwrap();

    let TrackOutcome::Recorded(record) = outcome else {
        panic!("visit should be recorded");
    };
    assert_eq!(record.page, "/");
    assert_eq!(record.ip_address.as_deref(), Some("203.0.113.10"));
    assert_eq!(record.country.as_deref(), Some("United States"));
    assert_eq!(record.city.as_deref(), Some("Austin"));
    assert_eq!(record.referrer.as_deref(), Some("https://google.com/search"));
    assert_eq!(record.user_id, None);
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(stored_visits(&storage).await, 1);
}

#[tokio::test]
async fn test_blocklisted_ip_is_ignored() {
    let storage = create_test_storage().await;
    let locator = FixedLocator::new(Some(united_states()));
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        Some(locator.clone()),
        &TrackingConfig::default(),
        false,
    );
    let session = SessionContext::anonymous();

    let outcome = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: ip("172.58.132.69"),
            referrer: None,
            user_agent: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome, TrackOutcome::Ignored(IgnoreReason::BlockedIp));
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 0);
    assert_eq!(stored_visits(&storage).await, 0);
}

#[tokio::test]
async fn test_blocklisted_referrer_is_ignored() {
    let storage = create_test_storage().await;
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        None,
        &TrackingConfig::default(),
        false,
    );
    let session = SessionContext::anonymous();

    let outcome = tracker
        .track(PageVisit {
            page: "/pricing",
            session: &session,
            client_ip: ip("198.51.100.4"),
            referrer: Some("https://abc123.webcontainer-api.io/preview"),
            user_agent: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome, TrackOutcome::Ignored(IgnoreReason::BlockedReferrer));
    assert_eq!(stored_visits(&storage).await, 0);
}

#[tokio::test]
async fn test_geolocation_failure_still_records() {
    let storage = create_test_storage().await;
    let locator = FixedLocator::new(None);
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        Some(locator.clone()),
        &TrackingConfig::default(),
        false,
    );
    let session = SessionContext::anonymous();

    let outcome = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: ip("203.0.113.11"),
            referrer: None,
            user_agent: None,
        })
        .await
        .unwrap();

    let TrackOutcome::Recorded(record) = outcome else {
        panic!("visit should be recorded");
    };
    assert_eq!(record.country, None);
    assert_eq!(record.city, None);
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_client_ip_skips_geolocation() {
    let storage = create_test_storage().await;
    let locator = FixedLocator::new(Some(united_states()));
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        Some(locator.clone()),
        &TrackingConfig::default(),
        false,
    );
    let session = SessionContext::anonymous();

    let outcome = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: None,
            referrer: Some(""),
            user_agent: None,
        })
        .await
        .unwrap();

    let TrackOutcome::Recorded(record) = outcome else {
        panic!("visit should be recorded");
    };
    assert_eq!(record.ip_address, None);
    assert_eq!(record.referrer, None, "empty referrer is stored as absent");
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_anonymization_stores_truncated_address() {
    let storage = create_test_storage().await;
    let locator = FixedLocator::new(Some(united_states()));
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        Some(locator.clone()),
        &TrackingConfig::default(),
        true,
    );
    let session = SessionContext::anonymous();

    let outcome = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: ip("203.0.113.77"),
            referrer: None,
            user_agent: None,
        })
        .await
        .unwrap();

    let TrackOutcome::Recorded(record) = outcome else {
        panic!("visit should be recorded");
    };
    assert_eq!(record.ip_address.as_deref(), Some("203.0.113.0"));
    // Lookup still uses the full address
    assert_eq!(*locator.last_ip.lock().unwrap(), ip("203.0.113.77"));
}

#[tokio::test]
async fn test_signed_in_visit_carries_user_id() {
    let storage = create_test_storage().await;
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        None,
        &TrackingConfig::default(),
        false,
    );
    let session = SessionContext::authenticated(
        SessionUser {
            id: "user-42".to_string(),
            email: Some("ops@example.com".to_string()),
        },
        "fingerprint".to_string(),
        Utc::now().timestamp() + 3600,
    );

    let outcome = tracker
        .track(PageVisit {
            page: "/dashboard",
            session: &session,
            client_ip: ip("203.0.113.12"),
            referrer: None,
            user_agent: None,
        })
        .await
        .unwrap();

    let TrackOutcome::Recorded(record) = outcome else {
        panic!("visit should be recorded");
    };
    assert_eq!(record.user_id.as_deref(), Some("user-42"));
}

#[tokio::test]
async fn test_custom_blocklist_replaces_defaults() {
    let storage = create_test_storage().await;
    let tracker = VisitTracker::new(
        Arc::clone(&storage),
        None,
        &TrackingConfig {
            ignored_ips: vec!["10.0.0.1".to_string(), "not-an-ip".to_string()],
            ignored_referrer_patterns: vec![],
        },
        false,
    );
    let session = SessionContext::anonymous();

    let blocked = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: ip("10.0.0.1"),
            referrer: None,
            user_agent: None,
        })
        .await
        .unwrap();
    assert_eq!(blocked, TrackOutcome::Ignored(IgnoreReason::BlockedIp));

    let allowed = tracker
        .track(PageVisit {
            page: "/",
            session: &session,
            client_ip: ip("172.58.132.69"),
            referrer: Some("https://x.webcontainer-api.io"),
            user_agent: None,
        })
        .await
        .unwrap();
    assert!(matches!(allowed, TrackOutcome::Recorded(_)));
}
