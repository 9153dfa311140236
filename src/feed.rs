// Realtime feed consolidation: fetch every line-group feed, decode it, and fold
// trip updates and vehicle positions into one record per live trip.

use bytes::Bytes;
use futures::future::join_all;
use gtfs_rt::FeedMessage;
use log::{debug, info, warn};
use prost::Message;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::{Config, FeedSource};
use crate::error::{Result, TrackerError};
use crate::ids;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTimeUpdate {
    pub stop_id: String,
    /// Epoch seconds, arrival preferred over departure
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    IncomingAt,
    StoppedAt,
    InTransitTo,
    Unknown,
}

impl VehicleStatus {
    pub fn from_feed(raw: Option<i32>) -> Self {
        match raw {
            Some(0) => VehicleStatus::IncomingAt,
            Some(1) => VehicleStatus::StoppedAt,
            Some(2) => VehicleStatus::InTransitTo,
            _ => VehicleStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleReport {
    pub parent_stop_id: Option<String>,
    pub timestamp: Option<i64>,
    pub current_stop_sequence: Option<u32>,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip_id: String,
    pub short_trip_id: String,
    pub route_id: Option<String>,
    /// Line-group feed that last mentioned this trip
    pub source: String,
    /// One entry per stop, ascending by time: index 0 is the soonest stop.
    pub stop_time_updates: Vec<StopTimeUpdate>,
    pub vehicle: Option<VehicleReport>,
}

impl TripRecord {
    pub fn new(trip_id: &str, source: &str) -> Self {
        TripRecord {
            trip_id: trip_id.to_string(),
            short_trip_id: ids::short_trip_id(trip_id).to_string(),
            route_id: None,
            source: source.to_string(),
            stop_time_updates: Vec::new(),
            vehicle: None,
        }
    }

    pub fn has_vehicle(&self) -> bool {
        self.vehicle.is_some()
    }

    pub fn first_stop(&self) -> Option<&StopTimeUpdate> {
        self.stop_time_updates.first()
    }

    pub fn update_for(&self, stop_id: &str) -> Option<&StopTimeUpdate> {
        self.stop_time_updates.iter().find(|u| u.stop_id == stop_id)
    }

    pub fn parent_stop(&self) -> Option<&str> {
        self.vehicle.as_ref().and_then(|v| v.parent_stop_id.as_deref())
    }

    /// Replace (never accumulate) the stop-time updates. A stop listed twice
    /// keeps its last value.
    pub fn replace_stop_times(&mut self, updates: Vec<StopTimeUpdate>) {
        let mut by_stop: HashMap<String, i64> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for u in updates {
            if by_stop.insert(u.stop_id.clone(), u.time).is_none() {
                order.push(u.stop_id);
            }
        }

        let mut merged: Vec<StopTimeUpdate> = order
            .into_iter()
            .map(|stop_id| {
                let time = by_stop[&stop_id];
                StopTimeUpdate { stop_id, time }
            })
            .collect();
        merged.sort_by_key(|u| u.time);
        self.stop_time_updates = merged;
    }
}

/// The live trip table. Owned by the consolidator, read by everyone else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripTable {
    pub trips: HashMap<String, TripRecord>,
    pub updated_at: i64,
}

impl TripTable {
    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn get(&self, trip_id: &str) -> Option<&TripRecord> {
        self.trips.get(trip_id)
    }

    pub fn with_vehicles(&self) -> impl Iterator<Item = &TripRecord> {
        self.trips.values().filter(|t| t.has_vehicle())
    }
}

// ============================================================================
// Fetching
// ============================================================================

/// Result of pulling one feed source for one tick.
#[derive(Debug)]
pub enum FetchOutcome {
    Data { source: String, message: FeedMessage },
    Empty { source: String, header_timestamp: Option<i64> },
    Failed { source: String, error: TrackerError },
}

impl FetchOutcome {
    pub fn source(&self) -> &str {
        match self {
            FetchOutcome::Data { source, .. }
            | FetchOutcome::Empty { source, .. }
            | FetchOutcome::Failed { source, .. } => source,
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self, FetchOutcome::Failed { .. })
    }

    pub fn header_timestamp(&self) -> Option<i64> {
        match self {
            FetchOutcome::Data { message, .. } => message.header.timestamp.map(|t| t as i64),
            FetchOutcome::Empty { header_timestamp, .. } => *header_timestamp,
            FetchOutcome::Failed { .. } => None,
        }
    }

    /// Classify a raw response body.
    pub fn from_body(source: &str, body: Result<Bytes>) -> Self {
        let source = source.to_string();
        match body.and_then(|b| decode_feed(&b)) {
            Ok(message) if message.entity.is_empty() => FetchOutcome::Empty {
                source,
                header_timestamp: message.header.timestamp.map(|t| t as i64),
            },
            Ok(message) => FetchOutcome::Data { source, message },
            Err(error) => FetchOutcome::Failed { source, error },
        }
    }
}

pub fn decode_feed(body: &[u8]) -> Result<FeedMessage> {
    FeedMessage::decode(body)
        .map_err(|e| TrackerError::Decode(format!("Failed to decode feed: {}", e)))
}

pub fn create_http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| TrackerError::Network(format!("Failed to create HTTP client: {}", e)))
}

async fn fetch_body(client: &Client, source: &FeedSource, api_key: Option<&str>) -> Result<Bytes> {
    let mut request = client.get(&source.url);
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| TrackerError::Network(format!("Failed to fetch {}: {}", source.name, e)))?
        .error_for_status()
        .map_err(|e| TrackerError::Network(format!("{} returned an error: {}", source.name, e)))?;

    response
        .bytes()
        .await
        .map_err(|e| TrackerError::Network(format!("Failed to read {} response: {}", source.name, e)))
}

/// Fetch every source concurrently; returns once all have completed or failed.
pub async fn fetch_all(client: &Client, config: &Config) -> Vec<FetchOutcome> {
    let api_key = config.api_key.as_deref();
    let requests = config.feeds.iter().map(|source| async move {
        let body = fetch_body(client, source, api_key).await;
        FetchOutcome::from_body(&source.name, body)
    });

    let outcomes = join_all(requests).await;
    for outcome in &outcomes {
        if let FetchOutcome::Failed { source, error } = outcome {
            warn!("⚠️  Feed {} skipped this tick: {}", source, error);
        }
    }
    outcomes
}

// ============================================================================
// Consolidation
// ============================================================================

/// Fold this tick's outcomes into the previous table and return the new one.
///
/// Records mentioned by a successful source are updated in place. Records from
/// a successful source that it no longer mentions are dropped unless they carry
/// a vehicle. Records of failed sources are left untouched. Finally the
/// retention cull runs against `now`.
pub fn consolidate(
    previous: TripTable,
    outcomes: &[FetchOutcome],
    now: i64,
    retention_secs: i64,
) -> TripTable {
    let mut trips = previous.trips;
    let mut mentioned: HashSet<String> = HashSet::new();
    let refreshed: HashSet<&str> = outcomes
        .iter()
        .filter(|o| o.succeeded())
        .map(|o| o.source())
        .collect();

    for outcome in outcomes {
        if let FetchOutcome::Data { source, message } = outcome {
            for entity in &message.entity {
                merge_entity(&mut trips, &mut mentioned, source, entity);
            }
        }
    }

    let before = trips.len();
    trips.retain(|trip_id, record| {
        mentioned.contains(trip_id)
            || !refreshed.contains(record.source.as_str())
            || record.has_vehicle()
    });
    let dropped = before - trips.len();

    let mut table = TripTable { trips, updated_at: now };
    let culled = cull(&mut table, now, retention_secs);

    debug!(
        "Consolidated {} trips ({} no longer in feed, {} past retention)",
        table.len(),
        dropped,
        culled
    );

    table
}

fn merge_entity(
    trips: &mut HashMap<String, TripRecord>,
    mentioned: &mut HashSet<String>,
    source: &str,
    entity: &gtfs_rt::FeedEntity,
) {
    if let Some(update) = &entity.trip_update {
        merge_trip_update(trips, mentioned, source, &entity.id, update);
    }

    if let Some(vehicle) = &entity.vehicle {
        merge_vehicle(trips, mentioned, source, &entity.id, vehicle);
    }
}

fn merge_trip_update(
    trips: &mut HashMap<String, TripRecord>,
    mentioned: &mut HashSet<String>,
    source: &str,
    entity_id: &str,
    update: &gtfs_rt::TripUpdate,
) {
    let Some(trip_id) = update.trip.trip_id.as_deref() else {
        debug!("Trip update {} has no trip id", entity_id);
        return;
    };

    let updates = update
        .stop_time_update
        .iter()
        .filter_map(|stu| {
            let stop_id = stu.stop_id.clone()?;
            let time = stu
                .arrival
                .as_ref()
                .and_then(|a| a.time)
                .or_else(|| stu.departure.as_ref().and_then(|d| d.time))?;
            Some(StopTimeUpdate { stop_id, time })
        })
        .collect();

    let record = trips
        .entry(trip_id.to_string())
        .or_insert_with(|| TripRecord::new(trip_id, source));
    record.source = source.to_string();
    if let Some(route_id) = &update.trip.route_id {
        record.route_id = Some(route_id.clone());
    }
    record.replace_stop_times(updates);
    mentioned.insert(trip_id.to_string());
}

fn merge_vehicle(
    trips: &mut HashMap<String, TripRecord>,
    mentioned: &mut HashSet<String>,
    source: &str,
    entity_id: &str,
    vehicle: &gtfs_rt::VehiclePosition,
) {
    let Some(trip) = vehicle.trip.as_ref() else {
        debug!("Vehicle {} has no trip descriptor", entity_id);
        return;
    };
    let Some(trip_id) = trip.trip_id.as_deref() else {
        debug!("Vehicle {} has no trip id", entity_id);
        return;
    };

    let record = trips
        .entry(trip_id.to_string())
        .or_insert_with(|| TripRecord::new(trip_id, source));
    record.source = source.to_string();
    if record.route_id.is_none() {
        record.route_id = trip.route_id.clone();
    }
    record.vehicle = Some(VehicleReport {
        parent_stop_id: vehicle.stop_id.clone(),
        timestamp: vehicle.timestamp.map(|t| t as i64),
        current_stop_sequence: vehicle.current_stop_sequence,
        status: VehicleStatus::from_feed(vehicle.current_status),
    });
    mentioned.insert(trip_id.to_string());
}

/// Drop records whose vehicle timestamp is older than the retention window.
/// Records without a timestamp are kept. Returns how many were dropped.
pub fn cull(table: &mut TripTable, now: i64, retention_secs: i64) -> usize {
    let cutoff = now - retention_secs;
    let before = table.trips.len();
    table.trips.retain(|_, record| {
        match record.vehicle.as_ref().and_then(|v| v.timestamp) {
            Some(ts) => ts >= cutoff,
            None => true,
        }
    });
    before - table.trips.len()
}

pub fn summarize(outcomes: &[FetchOutcome]) {
    let ok = outcomes.iter().filter(|o| o.succeeded()).count();
    info!("📡 Feeds: {}/{} sources fetched", ok, outcomes.len());
    for outcome in outcomes {
        if let Some(ts) = outcome.header_timestamp() {
            debug!("   • {} header timestamp {}", outcome.source(), ts);
        }
    }
}
