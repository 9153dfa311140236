// Tick driver: fetch → consolidate → persist → match → reconcile → publish.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use log::{error, info};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::time::{self, MissedTickBehavior};

use crate::config::Config;
use crate::engine::{PositionEngine, TickReport, Vehicle};
use crate::error::Result;
use crate::feed::{self, FetchOutcome, TripTable};
use crate::schedule::StaticSchedule;
use crate::snapshot;
use crate::track::TrackSet;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickStats {
    pub tick_at: i64,
    pub tick_at_local: String,
    pub sources_ok: usize,
    pub sources_failed: Vec<String>,
    /// Freshest feed header timestamp seen per source
    pub header_timestamps: BTreeMap<String, i64>,
    pub trips: usize,
    pub vehicles: TickReport,
}

/// What HTTP handlers read. Replaced wholesale once per tick.
#[derive(Debug, Clone, Default)]
pub struct PublishedView {
    pub trips: TripTable,
    pub vehicles: BTreeMap<String, Vehicle>,
    pub stats: TickStats,
}

pub type SharedView = Arc<RwLock<PublishedView>>;

pub fn format_timestamp_full(timestamp: i64, tz: &Tz) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("Invalid timestamp: {}", timestamp),
    }
}

pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

pub struct Tracker {
    config: Config,
    tz: Tz,
    schedule: Arc<StaticSchedule>,
    tracks: Arc<TrackSet>,
    trips: TripTable,
    engine: PositionEngine,
    client: Client,
    headers: BTreeMap<String, i64>,
    view: SharedView,
}

impl Tracker {
    pub fn new(
        config: Config,
        schedule: Arc<StaticSchedule>,
        tracks: Arc<TrackSet>,
        restored: TripTable,
    ) -> Result<Self> {
        let tz = config.tz()?;
        let client = feed::create_http_client(&config)?;
        let view = Arc::new(RwLock::new(PublishedView {
            trips: restored.clone(),
            ..Default::default()
        }));

        Ok(Tracker {
            config,
            tz,
            schedule,
            tracks,
            trips: restored,
            engine: PositionEngine::new(),
            client,
            headers: BTreeMap::new(),
            view,
        })
    }

    pub fn view(&self) -> SharedView {
        self.view.clone()
    }

    pub fn trips(&self) -> &TripTable {
        &self.trips
    }

    pub fn engine(&self) -> &PositionEngine {
        &self.engine
    }

    /// One full cycle against the live feeds.
    pub async fn tick(&mut self, now: i64) -> TickStats {
        let outcomes = feed::fetch_all(&self.client, &self.config).await;
        let stats = self.apply(outcomes, now);
        self.persist();
        stats
    }

    /// Everything after fetching: consolidate, reconcile, publish.
    pub fn apply(&mut self, outcomes: Vec<FetchOutcome>, now: i64) -> TickStats {
        feed::summarize(&outcomes);

        for outcome in &outcomes {
            if let Some(ts) = outcome.header_timestamp() {
                let entry = self.headers.entry(outcome.source().to_string()).or_insert(ts);
                *entry = (*entry).max(ts);
            }
        }

        let previous = std::mem::take(&mut self.trips);
        self.trips = feed::consolidate(previous, &outcomes, now, self.config.retention_secs);

        let report = self.engine.tick(&self.trips, &self.schedule, &self.tracks, now);

        let stats = TickStats {
            tick_at: now,
            tick_at_local: format_timestamp_full(now, &self.tz),
            sources_ok: outcomes.iter().filter(|o| o.succeeded()).count(),
            sources_failed: outcomes
                .iter()
                .filter(|o| !o.succeeded())
                .map(|o| o.source().to_string())
                .collect(),
            header_timestamps: self.headers.clone(),
            trips: self.trips.len(),
            vehicles: report,
        };

        self.publish(stats.clone());
        info!(
            "✓ Tick at {}: {} trips, {} vehicles on the map",
            stats.tick_at_local,
            stats.trips,
            self.engine.vehicles().len()
        );
        stats
    }

    fn publish(&self, stats: TickStats) {
        match self.view.write() {
            Ok(mut view) => {
                view.trips = self.trips.clone();
                view.vehicles = self.engine.vehicles().clone();
                view.stats = stats;
            }
            Err(e) => error!("❌ Failed to lock published view: {}", e),
        }
    }

    /// Hand the current table to the blocking pool; the tick does not wait.
    fn persist(&self) {
        let table = self.trips.clone();
        let path = self.config.snapshot_path.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = snapshot::save(&table, &path) {
                error!("❌ Snapshot write failed: {}", e);
            }
        });
    }

    pub async fn run(mut self) {
        let mut interval = time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🔄 Tick loop started, every {}s", self.config.tick_interval_secs);

        loop {
            interval.tick().await;
            self.tick(current_timestamp()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_full() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 2023-11-14 22:13:20 UTC
        assert_eq!(format_timestamp_full(1_700_000_000, &tz), "2023-11-14 17:13:20");
        assert!(format_timestamp_full(i64::MAX, &tz).starts_with("Invalid"));
    }

    #[test]
    fn test_failed_sources_keep_their_trips() {
        let mut restored = TripTable::default();
        restored.trips.insert("t1".into(), crate::feed::TripRecord::new("t1", "G"));

        let mut tracker = Tracker::new(
            Config::default(),
            Arc::new(StaticSchedule::default()),
            Arc::new(TrackSet::default()),
            restored,
        )
        .unwrap();

        let stats = tracker.apply(
            vec![FetchOutcome::Failed {
                source: "G".into(),
                error: crate::error::TrackerError::Network("timeout".into()),
            }],
            1_700_000_000,
        );

        assert_eq!(stats.sources_ok, 0);
        assert_eq!(stats.sources_failed, vec!["G".to_string()]);
        assert_eq!(stats.trips, 1);
        assert!(tracker.view().read().unwrap().trips.get("t1").is_some());
    }
}
