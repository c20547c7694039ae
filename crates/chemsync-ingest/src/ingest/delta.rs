//! Delta resolution for feeds published at two granularities
//!
//! A feed publishes one directory per day under `/Daily` and one per week
//! under `/Weekly`, each named by its date (`YYYY-MM-DD`). Daily retention is
//! short, so a store that fell behind has to catch up through weekly windows
//! before the remaining daily windows can be applied.
//!
//! [`DeltaResolver::resolve`] picks the windows to apply and proves that
//! together they leave no gap between the local marker and the newest daily
//! window. Names of one kind compare lexicographically in temporal order;
//! date arithmetic is only needed for the bridge checks.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Format of every version token and window name
pub const VERSION_FORMAT: &str = "%Y-%m-%d";

/// Weekly windows starting before `oldest daily + 6 days` can bridge to the daily feed
pub const DAILY_BRIDGE_DAYS: i64 = 6;

/// A weekly window named `d` covers `[d - 7 days, d)`
pub const WEEKLY_SPAN_DAYS: i64 = 7;

pub fn parse_version(token: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(token.trim(), VERSION_FORMAT)
        .map_err(|_| IngestError::InvalidVersion(token.to_string()))
}

pub fn format_version(date: NaiveDate) -> String {
    date.format(VERSION_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeltaKind {
    /// Weekly sorts first: coarse windows are applied before fine ones
    Weekly,
    Daily,
}

impl DeltaKind {
    /// Remote and local directory name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKind::Daily => "Daily",
            DeltaKind::Weekly => "Weekly",
        }
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named increment of remote data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaWindow {
    pub kind: DeltaKind,
    pub name: String,
    /// `[start, end)` for weekly windows
    pub covered_span: Option<(NaiveDate, NaiveDate)>,
}

impl DeltaWindow {
    pub fn daily(name: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Daily,
            name: name.into(),
            covered_span: None,
        }
    }

    pub fn weekly(name: impl Into<String>) -> Self {
        let name = name.into();
        let covered_span = parse_version(&name)
            .ok()
            .map(|end| (end - Duration::days(WEEKLY_SPAN_DAYS), end));
        Self {
            kind: DeltaKind::Weekly,
            name,
            covered_span,
        }
    }

    /// `Daily/2024-03-02`, relative to the feed root
    pub fn relative_dir(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl fmt::Display for DeltaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Run-scoped synchronization plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub last_applied_marker: String,
    /// Weekly windows ascending, then daily windows ascending
    pub pending_deltas: Vec<DeltaWindow>,
    pub resolved_final_marker: String,
    pub covered_by_daily: bool,
}

impl SyncState {
    pub fn is_up_to_date(&self) -> bool {
        self.pending_deltas.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaResolver;

impl DeltaResolver {
    /// Compute the ordered deltas leading from the local marker to the newest
    /// daily window
    ///
    /// Fails with [`IngestError::InconsistentServerData`] when the listings
    /// leave a gap, and with [`IngestError::StaleDatabase`] when the local
    /// marker predates every window still published.
    pub fn resolve(
        &self,
        last_version: Option<&str>,
        base_version: &str,
        daily: &[String],
        weekly: &[String],
    ) -> Result<SyncState> {
        let start = last_version.unwrap_or(base_version).trim().to_string();
        let start_date = parse_version(&start)?;

        let mut daily = daily.to_vec();
        daily.sort();
        daily.dedup();
        let mut weekly = weekly.to_vec();
        weekly.sort();
        weekly.dedup();

        let selected_daily: Vec<&String> = daily.iter().filter(|d| d.as_str() > start.as_str()).collect();

        // Daily retention reaches back to the marker, so every later day is listed
        let covered_by_daily = daily.iter().any(|d| d.as_str() <= start.as_str());

        let mut selected_weekly: Vec<&String> = Vec::new();
        if !covered_by_daily {
            let oldest_daily = selected_daily.first().ok_or_else(|| {
                IngestError::InconsistentServerData(
                    "daily window list contains a gap with no lower bound".to_string(),
                )
            })?;
            let limit = parse_version(oldest_daily)? + Duration::days(DAILY_BRIDGE_DAYS);
            let limit = format_version(limit);

            selected_weekly = weekly
                .iter()
                .filter(|w| w.as_str() > start.as_str() && w.as_str() < limit.as_str())
                .collect();

            let oldest_weekly = selected_weekly.first().ok_or_else(|| {
                IngestError::InconsistentServerData(format!(
                    "no weekly window bridges the gap before the oldest daily window {}",
                    oldest_daily
                ))
            })?;
            let first_uncovered = parse_version(oldest_weekly)? - Duration::days(WEEKLY_SPAN_DAYS);
            if first_uncovered > start_date {
                return Err(IngestError::StaleDatabase {
                    local: start,
                    first_uncovered: format_version(first_uncovered),
                });
            }
        }

        let resolved_final_marker = selected_daily
            .last()
            .map(|d| d.to_string())
            .unwrap_or_else(|| start.clone());

        let pending_deltas: Vec<DeltaWindow> = selected_weekly
            .into_iter()
            .map(|w| DeltaWindow::weekly(w.as_str()))
            .chain(selected_daily.into_iter().map(|d| DeltaWindow::daily(d.as_str())))
            .collect();

        debug!(
            start = %start,
            covered_by_daily,
            deltas = pending_deltas.len(),
            final_marker = %resolved_final_marker,
            "Resolved delta plan"
        );

        Ok(SyncState {
            last_applied_marker: start,
            pending_deltas,
            resolved_final_marker,
            covered_by_daily,
        })
    }
}
