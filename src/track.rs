// Offset tracks: one drawable path per route-direction, with every scheduled
// station pinned to a point on that path.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::Config;
use crate::error::{Result, TrackerError};
use crate::geometry::{self, Projection, Vec2};
use crate::ids;
use crate::schedule::{Shape, StaticRoute, StaticSchedule};

const DEFAULT_COLOR: &str = "EEEEEE";
const COORD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct TrackStation {
    pub stop_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub pos: Vec2,
    /// Index into `Track::waypoints` when the station sits on the offset path;
    /// `None` means `pos` is the raw projected coordinate.
    pub waypoint_index: Option<usize>,
}

impl TrackStation {
    fn answers_to(&self, stop_id: &str) -> bool {
        self.stop_id == stop_id || self.parent_id.as_deref() == Some(stop_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Waypoint {
    pub pos: Vec2,
    pub last_station: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    /// Route-direction, e.g. `1..S03R`
    pub route_id: String,
    pub line: String,
    pub color: String,
    pub offset: f64,
    pub stations: Vec<TrackStation>,
    pub waypoints: Vec<Waypoint>,
}

impl Track {
    /// Build the offset path for `shape` and bind each stop of `route` to it.
    pub fn build(
        shape: &Shape,
        route: &StaticRoute,
        schedule: &StaticSchedule,
        projection: &Projection,
        color: &str,
        offset: f64,
    ) -> Result<Self> {
        if shape.waypoints.len() < 2 {
            return Err(TrackerError::Geometry(format!(
                "shape {} has {} waypoint(s)",
                shape.shape_id,
                shape.waypoints.len()
            )));
        }

        let mut stations: Vec<TrackStation> = route
            .stops
            .iter()
            .filter_map(|stop| match schedule.station(&stop.stop_id) {
                Some(station) => Some(TrackStation {
                    stop_id: station.id.clone(),
                    parent_id: station.parent_id.clone(),
                    name: station.name.clone(),
                    lat: station.lat,
                    lon: station.lon,
                    pos: projection.project(station.lat, station.lon),
                    waypoint_index: None,
                }),
                None => {
                    warn!(
                        "Stop {} of trip {} has no coordinates, left off track {}",
                        stop.stop_id, route.long_trip_id, route.route_id
                    );
                    None
                }
            })
            .collect();

        let projected: Vec<Vec2> = shape
            .waypoints
            .iter()
            .map(|&(lat, lon)| projection.project(lat, lon))
            .collect();
        let vertices = geometry::offset_polyline(&projected, offset)?;

        let mut waypoints = Vec::with_capacity(vertices.len());
        let mut cursor = 0;
        let mut last_station: Option<String> = None;

        for vertex in vertices {
            let (lat, lon) = shape.waypoints[vertex.source];
            let hit = (cursor..stations.len()).find(|&k| {
                (stations[k].lat - lat).abs() <= COORD_EPSILON
                    && (stations[k].lon - lon).abs() <= COORD_EPSILON
            });

            if let Some(k) = hit {
                stations[k].pos = vertex.pos;
                stations[k].waypoint_index = Some(waypoints.len());
                last_station = Some(stations[k].stop_id.clone());
                cursor = k + 1;
            }

            waypoints.push(Waypoint { pos: vertex.pos, last_station: last_station.clone() });
        }

        let unbound = stations.iter().filter(|s| s.waypoint_index.is_none()).count();
        if unbound > 0 {
            debug!(
                "Track {}: {} of {} stations kept raw coordinates",
                route.route_id,
                unbound,
                stations.len()
            );
        }

        Ok(Track {
            route_id: route.route_id.clone(),
            line: ids::line_of(&route.route_id).to_string(),
            color: color.to_string(),
            offset,
            stations,
            waypoints,
        })
    }

    pub fn index_of(&self, stop_id: &str) -> Option<usize> {
        self.stations.iter().position(|s| s.answers_to(stop_id))
    }

    pub fn station(&self, stop_id: &str) -> Option<&TrackStation> {
        self.index_of(stop_id).map(|i| &self.stations[i])
    }

    pub fn position_of(&self, stop_id: &str) -> Option<Vec2> {
        self.station(stop_id).map(|s| s.pos)
    }

    pub fn previous(&self, stop_id: &str) -> Option<&TrackStation> {
        let i = self.index_of(stop_id)?;
        i.checked_sub(1).map(|p| &self.stations[p])
    }

    pub fn next(&self, stop_id: &str) -> Option<&TrackStation> {
        let i = self.index_of(stop_id)?;
        self.stations.get(i + 1)
    }

    /// Straight-line interpolation between two stations' track positions.
    pub fn interp(&self, from: &str, to: &str, r: f64) -> Option<Vec2> {
        Some(geometry::lerp(self.position_of(from)?, self.position_of(to)?, r))
    }

    /// Offset waypoints from one station to another, inclusive. Empty when
    /// either station is not anchored on the path or they are out of order.
    pub fn path_between(&self, from: &str, to: &str) -> Vec<Vec2> {
        let (Some(a), Some(b)) = (
            self.station(from).and_then(|s| s.waypoint_index),
            self.station(to).and_then(|s| s.waypoint_index),
        ) else {
            return Vec::new();
        };

        if a > b {
            return Vec::new();
        }
        self.waypoints[a..=b].iter().map(|w| w.pos).collect()
    }
}

/// Everything produced by one track build, including the set of stations that
/// ended up drawn on some track.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackSet {
    pub tracks: BTreeMap<String, Track>,
    pub drawn_stations: BTreeSet<String>,
    pub skipped: Vec<String>,
}

impl TrackSet {
    pub fn get(&self, route_id: &str) -> Option<&Track> {
        self.tracks.get(route_id)
    }

    /// Track for a route-direction, falling back to any track of the same line
    /// and direction (shape variants such as `1..S03R` / `1..S04R`).
    pub fn for_route(&self, route_id: &str) -> Option<&Track> {
        if let Some(track) = self.tracks.get(route_id) {
            return Some(track);
        }
        let line = ids::line_of(route_id);
        let direction = ids::direction_of(route_id);
        self.tracks.values().find(|t| {
            t.line == line && direction.is_some() && ids::direction_of(&t.route_id) == direction
        })
    }
}

/// Offset per line color: configured value, else the color's rank among all
/// colors in use times the track width.
pub fn offset_table(schedule: &StaticSchedule, config: &Config) -> HashMap<String, f64> {
    let colors: BTreeSet<String> = schedule
        .route_colors
        .values()
        .cloned()
        .chain(std::iter::once(DEFAULT_COLOR.to_string()))
        .collect();

    colors
        .into_iter()
        .enumerate()
        .map(|(rank, color)| {
            let offset = config
                .track_offsets
                .get(&color)
                .copied()
                .unwrap_or((rank + 1) as f64 * config.track_width);
            (color, offset)
        })
        .collect()
}

/// Build one track per shape that has at least one trip. The representative
/// trip is the one with the most stops (first by trip id on ties).
pub fn build_tracks(schedule: &StaticSchedule, config: &Config) -> TrackSet {
    let projection = config.projection();
    let offsets = offset_table(schedule, config);

    let mut representative: HashMap<&str, &StaticRoute> = HashMap::new();
    for route in schedule.routes.values() {
        let entry = representative.entry(route.route_id.as_str()).or_insert(route);
        if route.stops.len() > entry.stops.len() {
            *entry = route;
        }
    }

    let mut set = TrackSet::default();
    let mut shape_ids: Vec<&String> = schedule.shapes.keys().collect();
    shape_ids.sort();

    for shape_id in shape_ids {
        let shape = &schedule.shapes[shape_id];
        let Some(route) = representative.get(shape_id.as_str()) else {
            debug!("Shape {} has no scheduled trips, skipping", shape_id);
            continue;
        };

        let line = ids::line_of(shape_id);
        let color = schedule.color_of_line(line).unwrap_or(DEFAULT_COLOR);
        let offset = offsets.get(color).copied().unwrap_or(config.track_width);

        match Track::build(shape, route, schedule, &projection, color, offset) {
            Ok(track) => {
                set.drawn_stations
                    .extend(track.stations.iter().map(|s| s.stop_id.clone()));
                set.tracks.insert(shape_id.clone(), track);
            }
            Err(e) => {
                warn!("⚠️  Skipping track {}: {}", shape_id, e);
                set.skipped.push(shape_id.clone());
            }
        }
    }

    info!(
        "✓ Built {} tracks ({} skipped), {} stations drawn",
        set.tracks.len(),
        set.skipped.len(),
        set.drawn_stations.len()
    );

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduledStop, Station};
    use approx::assert_relative_eq;

    fn station(id: &str, lat: f64, lon: f64) -> Station {
        Station { id: id.into(), name: id.into(), lat, lon, parent_id: None }
    }

    fn schedule() -> StaticSchedule {
        let mut s = StaticSchedule::default();
        for st in [
            station("A", 0.0, 0.0),
            station("B", 0.0, 0.002),
            station("C", 0.0, 0.004),
            station("Z", 5.0, 5.0),
        ] {
            s.stations.insert(st.id.clone(), st);
        }
        s.shapes.insert(
            "X..N01R".into(),
            Shape {
                shape_id: "X..N01R".into(),
                waypoints: vec![(0.0, 0.0), (0.0, 0.001), (0.0, 0.002), (0.0, 0.003), (0.0, 0.004)],
            },
        );
        let stops = ["A", "B", "C"]
            .iter()
            .map(|id| ScheduledStop { stop_id: id.to_string(), scheduled_time: None })
            .collect();
        let route = StaticRoute::new("SVC_000100_X..N01R", stops);
        s.routes.insert(route.long_trip_id.clone(), route);
        s.route_colors.insert("X".into(), "FF6319".into());
        s
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.projection_center = (0.0, 0.0);
        config.projection_scale = 1000.0;
        config
    }

    #[test]
    fn test_stations_are_bound_to_offset_path() {
        let set = build_tracks(&schedule(), &config());
        let track = set.get("X..N01R").unwrap();

        assert_eq!(track.line, "X");
        assert_eq!(track.color, "FF6319");
        assert_eq!(track.waypoints.len(), 5);
        assert_eq!(track.stations.len(), 3);
        for s in &track.stations {
            let wp = s.waypoint_index.unwrap();
            assert_eq!(track.waypoints[wp].pos, s.pos);
            // travelling +x, so the offset path sits below the raw line
            assert_relative_eq!(s.pos.y, -track.offset, epsilon = 1e-12);
        }
        assert_eq!(track.waypoints[1].last_station.as_deref(), Some("A"));
        assert_eq!(track.waypoints[3].last_station.as_deref(), Some("B"));
        assert!(set.drawn_stations.contains("C"));
    }

    #[test]
    fn test_unmatched_stop_keeps_raw_coordinate() {
        let mut s = schedule();
        s.stations.insert("B".into(), station("B", 0.0005, 0.002));
        let set = build_tracks(&s, &config());
        let track = set.get("X..N01R").unwrap();

        let b = track.station("B").unwrap();
        assert!(b.waypoint_index.is_none());
        assert_eq!(b.pos, config().projection().project(0.0005, 0.002));
        assert!(track.station("C").unwrap().waypoint_index.is_some());
    }

    #[test]
    fn test_short_shape_is_skipped() {
        let mut s = schedule();
        s.shapes.get_mut("X..N01R").unwrap().waypoints.truncate(1);
        let set = build_tracks(&s, &config());
        assert!(set.tracks.is_empty());
        assert_eq!(set.skipped, vec!["X..N01R".to_string()]);
    }

    #[test]
    fn test_navigation_and_paths() {
        let set = build_tracks(&schedule(), &config());
        let track = set.get("X..N01R").unwrap();

        assert_eq!(track.previous("B").unwrap().stop_id, "A");
        assert_eq!(track.next("B").unwrap().stop_id, "C");
        assert!(track.previous("A").is_none());
        assert!(track.next("C").is_none());

        let mid = track.interp("A", "C", 0.5).unwrap();
        assert_relative_eq!(mid.x, track.position_of("B").unwrap().x, epsilon = 1e-9);

        assert_eq!(track.path_between("A", "C").len(), 5);
        assert!(track.path_between("C", "A").is_empty());
    }

    #[test]
    fn test_for_route_falls_back_to_line_and_direction() {
        let set = build_tracks(&schedule(), &config());
        assert_eq!(set.for_route("X..N02R").unwrap().route_id, "X..N01R");
        assert!(set.for_route("X..S01R").is_none());
        assert!(set.for_route("Y..N01R").is_none());
    }

    #[test]
    fn test_offsets_follow_color_rank_and_overrides() {
        let mut s = schedule();
        s.route_colors.insert("A".into(), "0039A6".into());
        let mut cfg = config();
        cfg.track_width = 0.5;

        let offsets = offset_table(&s, &cfg);
        assert_relative_eq!(offsets["0039A6"], 0.5);
        assert_relative_eq!(offsets["EEEEEE"], 1.0);
        assert_relative_eq!(offsets["FF6319"], 1.5);

        cfg.track_offsets.insert("FF6319".into(), -0.25);
        assert_relative_eq!(offset_table(&s, &cfg)["FF6319"], -0.25);
    }
}
