//! Dashboard refresh with stale-result protection
//!
//! Every refresh takes a token from a monotonically increasing counter.
//! A finished computation only replaces the published dashboard state if
//! no newer refresh has been started since, so a slow request for an old
//! window can never overwrite a newer result.

use chrono::{Local, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::analytics::aggregator::VisitAggregator;
use crate::analytics::models::{AggregationWindow, VisitStats};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RefreshToken(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "stats", rename_all = "snake_case")]
pub enum DashboardState {
    /// Nothing published yet
    Loading,
    Ready(VisitStats),
    /// The last fetch failed
    NoData,
}

/// Published dashboard state with the request that produced it
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub token: Option<RefreshToken>,
    pub window: Option<AggregationWindow>,
    #[serde(flatten)]
    pub state: DashboardState,
}

/// Result of one refresh
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub token: RefreshToken,
    pub state: DashboardState,
    /// False when a newer refresh started before this one finished
    pub published: bool,
}

pub struct StatsRefresher<Tz: TimeZone = Local> {
    storage: Arc<dyn Storage>,
    aggregator: VisitAggregator<Tz>,
    latest: AtomicU64,
    snapshot: RwLock<DashboardSnapshot>,
}

impl StatsRefresher<Local> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_aggregator(storage, VisitAggregator::new())
    }
}

impl<Tz: TimeZone> StatsRefresher<Tz> {
    pub fn with_aggregator(storage: Arc<dyn Storage>, aggregator: VisitAggregator<Tz>) -> Self {
        Self {
            storage,
            aggregator,
            latest: AtomicU64::new(0),
            snapshot: RwLock::new(DashboardSnapshot {
                token: None,
                window: None,
                state: DashboardState::Loading,
            }),
        }
    }

    /// Start a new refresh, superseding all earlier ones
    pub fn begin(&self) -> RefreshToken {
        RefreshToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, token: RefreshToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }

    /// Replace the published state if `token` is still the latest.
    ///
    /// Returns false, leaving the previous state in place, for superseded
    /// tokens.
    pub async fn publish(
        &self,
        token: RefreshToken,
        window: AggregationWindow,
        state: DashboardState,
    ) -> bool {
        let mut snapshot = self.snapshot.write().await;

        // Checked under the write lock so two finishing refreshes serialize here
        if !self.is_current(token) || snapshot.token.is_some_and(|t| t >= token) {
            debug!(?token, "dropping superseded dashboard refresh");
            return false;
        }

        *snapshot = DashboardSnapshot {
            token: Some(token),
            window: Some(window),
            state,
        };
        true
    }

    pub async fn current(&self) -> DashboardSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Fetch the window's visits, aggregate them and publish the result
    pub async fn refresh(&self, window: AggregationWindow) -> RefreshOutcome {
        let token = self.begin();
        let since = window.start(Utc::now());

        let state = match self.storage.visits_since(since).await {
            Ok(records) => {
                DashboardState::Ready(self.aggregator.aggregate(&records, window.days()))
            }
            Err(e) => {
                warn!(error = %e, days = window.days(), "failed to fetch visits for analytics");
                DashboardState::NoData
            }
        };

        let published = self.publish(token, window, state.clone()).await;

        RefreshOutcome {
            token,
            state,
            published,
        }
    }
}
