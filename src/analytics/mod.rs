//! Visit analytics
//!
//! Visit logging (client IP resolution, blocklists, geolocation) on the
//! write side, and the dashboard's aggregation and refresh on the read side.

pub mod aggregator;
pub mod display;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod refresh;
pub mod tracker;

pub use aggregator::{VisitAggregator, VisitorKey};
pub use display::{Chart, DashboardCharts};
pub use geoip::{locator_from_config, GeoLocation, GeoLocator, IpApiLocator, MaxMindLocator};
pub use ip_extractor::extract_client_ip;
pub use models::{AggregationWindow, CountryVisits, DailyVisits, ReferrerVisits, VisitStats};
pub use refresh::{DashboardSnapshot, DashboardState, RefreshOutcome, RefreshToken, StatsRefresher};
pub use tracker::{IgnoreReason, PageVisit, TrackOutcome, VisitTracker};
