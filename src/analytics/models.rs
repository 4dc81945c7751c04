//! Data models for visit analytics

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Visits recorded on one calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyVisits {
    pub date: NaiveDate,
    pub visits: u64,
}

/// Visits attributed to one geolocated country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryVisits {
    pub country: String,
    pub visits: u64,
}

/// Visits attributed to one referrer (display label)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerVisits {
    pub referrer: String,
    pub visits: u64,
}

/// Summary of the visits in one aggregation window.
///
/// Recomputed wholesale for every request; never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VisitStats {
    pub total_visits: u64,
    pub unique_visitors: u64,
    pub daily_visits: Vec<DailyVisits>,
    pub top_countries: Vec<CountryVisits>,
    pub top_referrers: Vec<ReferrerVisits>,
    /// Records counted in the totals but left out of `daily_visits`
    /// because their timestamp could not be parsed
    pub unparsed_timestamps: u64,
}

impl VisitStats {
    pub fn is_empty(&self) -> bool {
        self.total_visits == 0
    }
}

/// Trailing window of days ending now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationWindow {
    days: u32,
}

impl AggregationWindow {
    pub const WEEK: AggregationWindow = AggregationWindow { days: 7 };
    pub const MONTH: AggregationWindow = AggregationWindow { days: 30 };

    pub const fn last_days(days: u32) -> Self {
        Self { days }
    }

    /// Parse the dashboard's named ranges (`week`, `month`)
    pub fn from_range(range: &str) -> Option<Self> {
        match range.to_ascii_lowercase().as_str() {
            "week" => Some(Self::WEEK),
            "month" => Some(Self::MONTH),
            _ => None,
        }
    }

    pub const fn days(&self) -> u32 {
        self.days
    }

    /// Inclusive lower bound of the window relative to `now`
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }
}

impl Default for AggregationWindow {
    fn default() -> Self {
        Self::WEEK
    }
}
