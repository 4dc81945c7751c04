//! Visit aggregation for the analytics dashboard
//!
//! Turns the flat list of visit rows for a window into the dashboard's
//! reports: totals, unique visitors, a per-day series and the country and
//! referrer rankings. Aggregation is a pure, synchronous pass over a
//! snapshot; fetching the rows is the caller's job.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::analytics::models::{CountryVisits, DailyVisits, ReferrerVisits, VisitStats};
use crate::models::VisitRecord;

pub const TOP_COUNTRIES_LIMIT: usize = 10;
pub const TOP_REFERRERS_LIMIT: usize = 8;

/// Label for visits without a referrer
pub const DIRECT_REFERRER: &str = "Direct";

const REFERRER_LABEL_MAX_CHARS: usize = 50;
const REFERRER_LABEL_KEEP_CHARS: usize = 47;
const ELLIPSIS: &str = "...";

/// Key used to deduplicate visitors
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum VisitorKey<'a> {
    User(&'a str),
    Ip(&'a str),
    /// Shared bucket for records carrying neither a user id nor an address
    Unknown,
}

impl<'a> VisitorKey<'a> {
    pub fn for_record(record: &'a VisitRecord) -> Self {
        if let Some(user_id) = non_blank(record.user_id.as_deref()) {
            VisitorKey::User(user_id)
        } else if let Some(ip) = non_blank(record.ip_address.as_deref()) {
            VisitorKey::Ip(ip)
        } else {
            VisitorKey::Unknown
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a stored visit timestamp.
///
/// Accepts RFC 3339 as well as the `YYYY-MM-DD HH:MM:SS[.fff]±HH[:MM]` form
/// Postgres emits for `timestamptz::text`. Offset-less values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Display label for a (normalized) referrer
pub fn referrer_label(referrer: &str) -> String {
    if referrer.chars().count() > REFERRER_LABEL_MAX_CHARS {
        let mut label: String = referrer.chars().take(REFERRER_LABEL_KEEP_CHARS).collect();
        label.push_str(ELLIPSIS);
        label
    } else {
        referrer.to_string()
    }
}

/// Counts keyed by string, remembering first-seen order for stable ranking
#[derive(Default)]
struct OrderedCounter<'a> {
    index: HashMap<&'a str, usize>,
    counts: Vec<(&'a str, u64)>,
}

impl<'a> OrderedCounter<'a> {
    fn add(&mut self, key: &'a str) {
        match self.index.get(key) {
            Some(&pos) => self.counts[pos].1 += 1,
            None => {
                self.index.insert(key, self.counts.len());
                self.counts.push((key, 1));
            }
        }
    }

    /// Highest counts first; equal counts keep encounter order
    fn top(mut self, limit: usize) -> Vec<(&'a str, u64)> {
        // sort_by is stable
        self.counts.sort_by(|a, b| b.1.cmp(&a.1));
        self.counts.truncate(limit);
        self.counts
    }
}

/// Builds [`VisitStats`] from visit rows, bucketing days in `Tz`
#[derive(Debug, Clone)]
pub struct VisitAggregator<Tz: TimeZone = Local> {
    tz: Tz,
}

impl VisitAggregator<Local> {
    /// Aggregator that buckets days in the system's local time zone
    pub fn new() -> Self {
        Self { tz: Local }
    }
}

impl Default for VisitAggregator<Local> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tz: TimeZone> VisitAggregator<Tz> {
    pub fn with_time_zone(tz: Tz) -> Self {
        Self { tz }
    }

    /// Calendar date of an instant as seen in the aggregator's time zone
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }

    /// Summarize `records`, which the record store has already limited to
    /// the last `window_days` days.
    pub fn aggregate(&self, records: &[VisitRecord], window_days: u32) -> VisitStats {
        if records.is_empty() {
            return VisitStats::default();
        }

        let mut visitors: HashSet<VisitorKey<'_>> = HashSet::new();
        let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        let mut countries = OrderedCounter::default();
        let mut referrers = OrderedCounter::default();
        let mut unparsed = 0u64;

        for record in records {
            visitors.insert(VisitorKey::for_record(record));

            match parse_timestamp(&record.timestamp) {
                Some(ts) => *daily.entry(self.local_date(ts)).or_insert(0) += 1,
                None => unparsed += 1,
            }

            if let Some(country) = non_blank(record.country.as_deref()) {
                countries.add(country);
            }

            let referrer = record
                .referrer
                .as_deref()
                .filter(|r| !r.is_empty())
                .unwrap_or(DIRECT_REFERRER);
            referrers.add(referrer);
        }

        if unparsed > 0 {
            debug!(
                unparsed,
                window_days, "visits with unparsable timestamps left out of the daily series"
            );
        }

        VisitStats {
            total_visits: records.len() as u64,
            unique_visitors: visitors.len() as u64,
            daily_visits: daily
                .into_iter()
                .map(|(date, visits)| DailyVisits { date, visits })
                .collect(),
            top_countries: countries
                .top(TOP_COUNTRIES_LIMIT)
                .into_iter()
                .map(|(country, visits)| CountryVisits {
                    country: country.to_string(),
                    visits,
                })
                .collect(),
            top_referrers: referrers
                .top(TOP_REFERRERS_LIMIT)
                .into_iter()
                .map(|(referrer, visits)| ReferrerVisits {
                    referrer: referrer_label(referrer),
                    visits,
                })
                .collect(),
            unparsed_timestamps: unparsed,
        }
    }
}
