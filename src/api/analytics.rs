//! Analytics dashboard API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::handlers::{api_error, ApiError, AppState};
use crate::analytics::{
    AggregationWindow, DashboardCharts, DashboardSnapshot, DashboardState, VisitStats,
};

pub const NO_DATA_MESSAGE: &str = "No data available yet";

/// Longest window the dashboard may request
const MAX_WINDOW_DAYS: u32 = 366;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQueryParams {
    /// Named range: `week` or `month`
    pub range: Option<String>,

    /// Explicit window length in days (takes precedence over `range`)
    pub days: Option<u32>,
}

impl AnalyticsQueryParams {
    fn window(&self) -> Result<AggregationWindow, String> {
        if let Some(days) = self.days {
            if days == 0 || days > MAX_WINDOW_DAYS {
                return Err(format!("days must be between 1 and {MAX_WINDOW_DAYS}"));
            }
            return Ok(AggregationWindow::last_days(days));
        }

        match self.range.as_deref() {
            None => Ok(AggregationWindow::default()),
            Some(range) => AggregationWindow::from_range(range)
                .ok_or_else(|| format!("unknown range '{range}', expected week or month")),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub window_days: u32,
    pub stats: VisitStats,
    pub charts: DashboardCharts,
}

/// Recompute the dashboard for the requested window
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let window = params
        .window()
        .map_err(|msg| api_error(StatusCode::BAD_REQUEST, msg))?;

    let outcome = state.refresher.refresh(window).await;
    if !outcome.published {
        tracing::debug!(token = ?outcome.token, "analytics refresh superseded by a newer one");
    }

    match outcome.state {
        DashboardState::Ready(stats) => Ok(Json(AnalyticsResponse {
            window_days: window.days(),
            charts: DashboardCharts::from(&stats),
            stats,
        })),
        DashboardState::NoData | DashboardState::Loading => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, NO_DATA_MESSAGE))
        }
    }
}

/// Most recently published dashboard state
pub async fn get_current_analytics(State(state): State<Arc<AppState>>) -> Json<DashboardSnapshot> {
    Json(state.refresher.current().await)
}
