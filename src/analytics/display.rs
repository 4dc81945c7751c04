//! Bar-chart helpers shared by the dashboard API and the admin CLI

use serde::Serialize;

use crate::analytics::models::{CountryVisits, DailyVisits, ReferrerVisits, VisitStats};

/// Anything rendered as one bar
pub trait ChartEntry {
    fn label(&self) -> String;
    fn visits(&self) -> u64;
}

impl ChartEntry for DailyVisits {
    fn label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    fn visits(&self) -> u64 {
        self.visits
    }
}

impl ChartEntry for CountryVisits {
    fn label(&self) -> String {
        self.country.clone()
    }

    fn visits(&self) -> u64 {
        self.visits
    }
}

impl ChartEntry for ReferrerVisits {
    fn label(&self) -> String {
        self.referrer.clone()
    }

    fn visits(&self) -> u64 {
        self.visits
    }
}

/// Largest visit count in `entries`, never below 1
pub fn max_visits<T: ChartEntry>(entries: &[T]) -> u64 {
    entries.iter().map(ChartEntry::visits).max().unwrap_or(0).max(1)
}

/// Bar length relative to the tallest bar, in `0.0..=1.0`
pub fn bar_fraction(visits: u64, max: u64) -> f64 {
    visits as f64 / max.max(1) as f64
}

pub fn bar_percent(visits: u64, max: u64) -> f64 {
    bar_fraction(visits, max) * 100.0
}

/// CSS height value, e.g. `"50%"`
pub fn bar_height(visits: u64, max: u64) -> String {
    format!("{}%", bar_percent(visits, max))
}

/// Fixed-width text bar for terminal output
pub fn text_bar(visits: u64, max: u64, width: usize) -> String {
    let filled = (bar_fraction(visits, max) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBar {
    pub label: String,
    pub visits: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub max_visits: u64,
    pub bars: Vec<ChartBar>,
}

impl Chart {
    pub fn from_entries<T: ChartEntry>(entries: &[T]) -> Self {
        let max = max_visits(entries);
        Self {
            max_visits: max,
            bars: entries
                .iter()
                .map(|entry| ChartBar {
                    label: entry.label(),
                    visits: entry.visits(),
                    percent: bar_percent(entry.visits(), max),
                })
                .collect(),
        }
    }
}

/// Chart views of every ranking in a [`VisitStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCharts {
    pub daily_visits: Chart,
    pub top_countries: Chart,
    pub top_referrers: Chart,
}

impl From<&VisitStats> for DashboardCharts {
    fn from(stats: &VisitStats) -> Self {
        Self {
            daily_visits: Chart::from_entries(&stats.daily_visits),
            top_countries: Chart::from_entries(&stats.top_countries),
            top_referrers: Chart::from_entries(&stats.top_referrers),
        }
    }
}
