use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One logged page view as returned by the record store
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct VisitRecord {
    pub id: i64,
    pub page: String,
    /// Raw timestamp text; parsed during aggregation
    pub timestamp: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Row shape for inserting a page visit
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewVisit {
    pub page: String,
    pub timestamp: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackVisitRequest {
    pub page: String,
    #[serde(default)]
    pub referrer: Option<String>,
}
