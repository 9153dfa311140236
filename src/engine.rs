// Vehicle positions: one canonical transition from (trip record, static route,
// track, now) to a vehicle state, plus the table of live vehicles it feeds.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::feed::{TripRecord, TripTable};
use crate::geometry::{self, Vec2};
use crate::matcher;
use crate::schedule::{StaticRoute, StaticSchedule};
use crate::track::{Track, TrackSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VehicleState {
    Unmatched,
    /// Waiting at its origin; no previous stop to move from.
    Inactive,
    Active,
    PendingDeletion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopRef {
    pub stop_id: String,
    pub time: i64,
    pub pos: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub trip_id: String,
    pub route_trip_id: String,
    pub track_id: String,
    pub state: VehicleState,
    pub prev_stop: Option<StopRef>,
    pub next_stop: Option<StopRef>,
    pub position: Option<Vec2>,
    /// Unit vector from previous to next stop
    pub heading: Option<Vec2>,
    pub heading_degrees: Option<f64>,
    pub updated_at: i64,
}

impl Vehicle {
    /// Interpolated position and heading at an arbitrary instant, using the
    /// prev/next pair chosen at the last tick.
    pub fn pose_at(&self, now: i64) -> Option<(Vec2, Option<Vec2>)> {
        match (&self.prev_stop, &self.next_stop) {
            (Some(prev), Some(next)) => {
                let r = progress(prev.time, next.time, now);
                Some((geometry::lerp(prev.pos, next.pos, r), heading(prev.pos, next.pos)))
            }
            (None, Some(next)) => Some((next.pos, None)),
            _ => None,
        }
    }
}

fn progress(prev_time: i64, next_time: i64, now: i64) -> f64 {
    let span = next_time - prev_time;
    if span <= 0 {
        return 1.0;
    }
    ((now - prev_time) as f64 / span as f64).clamp(0.0, 1.0)
}

fn heading(from: Vec2, to: Vec2) -> Option<Vec2> {
    let d = (to - from).normalize();
    if d == Vec2::ZERO { None } else { Some(d) }
}

/// Time the vehicle left `prev`: its own stop-time update when the feed still
/// carries it, else the scheduled running time back from `next`, else `now`.
fn departure_time(
    record: &TripRecord,
    route: &StaticRoute,
    prev_idx: usize,
    next_idx: usize,
    next_time: i64,
    now: i64,
) -> i64 {
    if let Some(update) = record.update_for(&route.stops[prev_idx].stop_id) {
        return update.time;
    }

    match (route.stops[prev_idx].scheduled_time, route.stops[next_idx].scheduled_time) {
        (Some(a), Some(b)) if b > a => next_time - i64::from(b - a),
        _ => now.min(next_time),
    }
}

/// The single state transition for one vehicle at one tick.
///
/// The next stop is the earliest stop-time update strictly after `now`. Stops
/// the route or track cannot place are skipped in favour of the following
/// update; running out of updates means the trip is over.
pub fn reconcile(record: &TripRecord, route: &StaticRoute, track: &Track, now: i64) -> Vehicle {
    let mut vehicle = Vehicle {
        trip_id: record.trip_id.clone(),
        route_trip_id: route.long_trip_id.clone(),
        track_id: track.route_id.clone(),
        state: VehicleState::PendingDeletion,
        prev_stop: None,
        next_stop: None,
        position: None,
        heading: None,
        heading_degrees: None,
        updated_at: now,
    };

    for next in record.stop_time_updates.iter().filter(|u| u.time > now) {
        let Some(next_idx) = route.stop_index(&next.stop_id) else {
            debug!("{}: stop {} not on route {}", record.trip_id, next.stop_id, route.long_trip_id);
            continue;
        };

        if next_idx == 0 {
            let Some(pos) = track.position_of(&next.stop_id) else {
                warn!("{}: origin {} not on track {}", record.trip_id, next.stop_id, track.route_id);
                continue;
            };
            vehicle.state = VehicleState::Inactive;
            vehicle.position = Some(pos);
            vehicle.next_stop = Some(StopRef { stop_id: next.stop_id.clone(), time: next.time, pos });
            return vehicle;
        }

        let prev_id = &route.stops[next_idx - 1].stop_id;
        let (Some(next_pos), Some(prev_pos)) = (track.position_of(&next.stop_id), track.position_of(prev_id)) else {
            debug!("{}: {} -> {} not on track {}", record.trip_id, prev_id, next.stop_id, track.route_id);
            continue;
        };

        let prev_time = departure_time(record, route, next_idx - 1, next_idx, next.time, now);
        let r = progress(prev_time, next.time, now);

        vehicle.state = VehicleState::Active;
        vehicle.prev_stop = Some(StopRef { stop_id: prev_id.clone(), time: prev_time, pos: prev_pos });
        vehicle.next_stop = Some(StopRef { stop_id: next.stop_id.clone(), time: next.time, pos: next_pos });
        vehicle.position = Some(geometry::lerp(prev_pos, next_pos, r));
        vehicle.heading = heading(prev_pos, next_pos);
        vehicle.heading_degrees = vehicle.heading.map(Vec2::heading_degrees);
        return vehicle;
    }

    vehicle
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub active: usize,
    pub inactive: usize,
    pub unmatched: usize,
    pub removed: usize,
}

/// Owns the live vehicle table. Reads trip records, schedule and tracks;
/// never writes them.
#[derive(Debug, Default)]
pub struct PositionEngine {
    vehicles: BTreeMap<String, Vehicle>,
}

impl PositionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vehicles(&self) -> &BTreeMap<String, Vehicle> {
        &self.vehicles
    }

    pub fn vehicle(&self, trip_id: &str) -> Option<&Vehicle> {
        self.vehicles.get(trip_id)
    }

    pub fn tick(
        &mut self,
        trips: &TripTable,
        schedule: &StaticSchedule,
        tracks: &TrackSet,
        now: i64,
    ) -> TickReport {
        let mut report = TickReport::default();

        let before = self.vehicles.len();
        self.vehicles.retain(|trip_id, _| trips.get(trip_id).is_some_and(TripRecord::has_vehicle));
        report.removed += before - self.vehicles.len();

        let mut records: Vec<&TripRecord> = trips.with_vehicles().collect();
        records.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));

        for record in records {
            let Some((route, track)) = self.bind(record, schedule, tracks) else {
                report.unmatched += 1;
                continue;
            };

            let vehicle = reconcile(record, route, track, now);
            match vehicle.state {
                VehicleState::Active => report.active += 1,
                VehicleState::Inactive => report.inactive += 1,
                VehicleState::Unmatched => report.unmatched += 1,
                VehicleState::PendingDeletion => {
                    if self.vehicles.remove(&record.trip_id).is_some() {
                        report.removed += 1;
                    }
                    continue;
                }
            }
            self.vehicles.insert(record.trip_id.clone(), vehicle);
        }

        info!(
            "🚆 Vehicles: {} active, {} inactive, {} unmatched, {} removed",
            report.active, report.inactive, report.unmatched, report.removed
        );
        report
    }

    /// Reuse the binding made when the vehicle was first matched; otherwise
    /// run the matcher and look up the route's track.
    fn bind<'a>(
        &self,
        record: &TripRecord,
        schedule: &'a StaticSchedule,
        tracks: &'a TrackSet,
    ) -> Option<(&'a StaticRoute, &'a Track)> {
        if let Some(existing) = self.vehicles.get(&record.trip_id) {
            if let (Some(route), Some(track)) =
                (schedule.route(&existing.route_trip_id), tracks.get(&existing.track_id))
            {
                return Some((route, track));
            }
        }

        let matched = matcher::match_trip(record, &schedule.routes)?;
        match tracks.for_route(&matched.route.route_id) {
            Some(track) => Some((matched.route, track)),
            None => {
                warn!(
                    "⚠️  Trip {} matched {} but route {} has no track",
                    record.trip_id, matched.route.long_trip_id, matched.route.route_id
                );
                None
            }
        }
    }
}
