// Static GTFS tables: stations, shapes, per-trip stop sequences and route colors.
// Loaded once at startup from a directory of .txt tables or a GTFS .zip archive.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::error::{Result, TrackerError};
use crate::ids;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub shape_id: String,
    /// (lat, lon) in sequence order
    pub waypoints: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStop {
    pub stop_id: String,
    /// Seconds since service-day midnight; may exceed 24h.
    pub scheduled_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub short_trip_id: String,
    pub long_trip_id: String,
    /// Route-direction segment, e.g. `1..S03R`
    pub route_id: String,
    pub stops: Vec<ScheduledStop>,
}

impl StaticRoute {
    pub fn new(long_trip_id: &str, stops: Vec<ScheduledStop>) -> Self {
        StaticRoute {
            short_trip_id: ids::short_trip_id(long_trip_id).to_string(),
            long_trip_id: long_trip_id.to_string(),
            route_id: ids::route_direction(long_trip_id).to_string(),
            stops,
        }
    }

    pub fn stop_index(&self, stop_id: &str) -> Option<usize> {
        self.stops.iter().position(|s| s.stop_id == stop_id)
    }

    pub fn contains_stop(&self, stop_id: &str) -> bool {
        self.stop_index(stop_id).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticSchedule {
    pub stations: HashMap<String, Station>,
    pub shapes: HashMap<String, Shape>,
    /// Keyed by long trip id; ordered so every scan over it is deterministic.
    pub routes: BTreeMap<String, StaticRoute>,
    /// route_id -> hex color without '#'
    pub route_colors: HashMap<String, String>,
}

impl StaticSchedule {
    /// Load from a directory of GTFS tables or from a GTFS `.zip` archive.
    pub fn load(path: &Path) -> Result<Self> {
        let mut source = TableSource::open(path)?;

        let stops = source
            .read("stops.txt")?
            .ok_or_else(|| TrackerError::File(format!("stops.txt not found in {:?}", path)))?;
        let stop_times = source
            .read("stop_times.txt")?
            .ok_or_else(|| TrackerError::File(format!("stop_times.txt not found in {:?}", path)))?;

        let shapes = match source.read("shapes.txt")? {
            Some(text) => parse_shapes(&text)?,
            None => {
                warn!("shapes.txt not found in {:?}, no tracks will be drawn", path);
                HashMap::new()
            }
        };

        let route_colors = match source.read("routes.txt")? {
            Some(text) => parse_route_colors(&text)?,
            None => HashMap::new(),
        };

        let schedule = StaticSchedule {
            stations: parse_stops(&stops)?,
            shapes,
            routes: parse_stop_times(&stop_times)?,
            route_colors,
        };

        info!(
            "✓ Static schedule loaded: {} stations, {} shapes, {} trips, {} route colors",
            schedule.stations.len(),
            schedule.shapes.len(),
            schedule.routes.len(),
            schedule.route_colors.len()
        );

        Ok(schedule)
    }

    pub fn station(&self, stop_id: &str) -> Option<&Station> {
        self.stations.get(stop_id)
    }

    pub fn route(&self, long_trip_id: &str) -> Option<&StaticRoute> {
        self.routes.get(long_trip_id)
    }

    pub fn color_of_line(&self, line: &str) -> Option<&str> {
        self.route_colors.get(line).map(String::as_str)
    }
}

// ============================================================================
// Table access
// ============================================================================

enum TableSource {
    Dir(PathBuf),
    Zip(ZipArchive<File>),
}

impl TableSource {
    fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(TableSource::Dir(path.to_path_buf()));
        }

        let file = File::open(path)
            .map_err(|e| TrackerError::File(format!("Failed to open {:?}: {}", path, e)))?;
        let archive = ZipArchive::new(file)
            .map_err(|e| TrackerError::File(format!("Failed to read archive {:?}: {}", path, e)))?;
        Ok(TableSource::Zip(archive))
    }

    fn read(&mut self, name: &str) -> Result<Option<String>> {
        match self {
            TableSource::Dir(dir) => {
                let path = dir.join(name);
                if !path.exists() {
                    return Ok(None);
                }
                fs::read_to_string(&path)
                    .map(Some)
                    .map_err(|e| TrackerError::File(format!("Failed to read {}: {}", name, e)))
            }
            TableSource::Zip(archive) => {
                let mut file = match archive.by_name(name) {
                    Ok(file) => file,
                    Err(_) => return Ok(None),
                };
                let mut contents = String::new();
                file.read_to_string(&mut contents)
                    .map_err(|e| TrackerError::File(format!("Failed to read {}: {}", name, e)))?;
                Ok(Some(contents))
            }
        }
    }
}

/// Header-name lookup so column order in the published tables does not matter.
struct Columns {
    headers: csv::StringRecord,
}

impl Columns {
    fn required(&self, table: &str, name: &str) -> Result<usize> {
        self.optional(name).ok_or_else(|| {
            TrackerError::Parse(format!("{} is missing required column '{}'", table, name))
        })
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name)
    }
}

fn reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

fn columns(rdr: &mut csv::Reader<&[u8]>, table: &str) -> Result<Columns> {
    let headers = rdr
        .headers()
        .map_err(|e| TrackerError::Parse(format!("Failed to read {} header: {}", table, e)))?
        .clone();
    Ok(Columns { headers })
}

fn field<'a>(record: &'a csv::StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| record.get(i)).filter(|s| !s.is_empty())
}

// ============================================================================
// Parsers
// ============================================================================

pub fn parse_stops(text: &str) -> Result<HashMap<String, Station>> {
    let mut rdr = reader(text);
    let cols = columns(&mut rdr, "stops.txt")?;
    let id_idx = cols.required("stops.txt", "stop_id")?;
    let name_idx = cols.optional("stop_name");
    let lat_idx = cols.required("stops.txt", "stop_lat")?;
    let lon_idx = cols.required("stops.txt", "stop_lon")?;
    let parent_idx = cols.optional("parent_station");

    let mut stations = HashMap::new();
    let mut skipped = 0usize;

    for record in rdr.records().flatten() {
        let parsed = (
            field(&record, Some(id_idx)),
            field(&record, Some(lat_idx)).and_then(|s| s.parse::<f64>().ok()),
            field(&record, Some(lon_idx)).and_then(|s| s.parse::<f64>().ok()),
        );

        match parsed {
            (Some(id), Some(lat), Some(lon)) => {
                stations.insert(
                    id.to_string(),
                    Station {
                        id: id.to_string(),
                        name: field(&record, name_idx).unwrap_or_default().to_string(),
                        lat,
                        lon,
                        parent_id: field(&record, parent_idx).map(str::to_string),
                    },
                );
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed rows in stops.txt", skipped);
    }

    Ok(stations)
}

pub fn parse_shapes(text: &str) -> Result<HashMap<String, Shape>> {
    let mut rdr = reader(text);
    let cols = columns(&mut rdr, "shapes.txt")?;
    let id_idx = cols.required("shapes.txt", "shape_id")?;
    let seq_idx = cols.required("shapes.txt", "shape_pt_sequence")?;
    let lat_idx = cols.required("shapes.txt", "shape_pt_lat")?;
    let lon_idx = cols.required("shapes.txt", "shape_pt_lon")?;

    let mut points: HashMap<String, Vec<(u32, f64, f64)>> = HashMap::new();

    for record in rdr.records().flatten() {
        if let (Some(shape_id), Some(seq), Some(lat), Some(lon)) = (
            field(&record, Some(id_idx)),
            field(&record, Some(seq_idx)).and_then(|s| s.parse::<u32>().ok()),
            field(&record, Some(lat_idx)).and_then(|s| s.parse::<f64>().ok()),
            field(&record, Some(lon_idx)).and_then(|s| s.parse::<f64>().ok()),
        ) {
            points
                .entry(shape_id.to_string())
                .or_insert_with(Vec::new)
                .push((seq, lat, lon));
        }
    }

    Ok(points
        .into_iter()
        .map(|(shape_id, mut pts)| {
            pts.sort_by_key(|p| p.0);
            let waypoints = pts.into_iter().map(|(_, lat, lon)| (lat, lon)).collect();
            (shape_id.clone(), Shape { shape_id, waypoints })
        })
        .collect())
}

pub fn parse_stop_times(text: &str) -> Result<BTreeMap<String, StaticRoute>> {
    let mut rdr = reader(text);
    let cols = columns(&mut rdr, "stop_times.txt")?;
    let trip_idx = cols.required("stop_times.txt", "trip_id")?;
    let stop_idx = cols.required("stop_times.txt", "stop_id")?;
    let seq_idx = cols.required("stop_times.txt", "stop_sequence")?;
    let arrival_idx = cols.optional("arrival_time");
    let departure_idx = cols.optional("departure_time");

    let mut trips: BTreeMap<String, Vec<(u32, ScheduledStop)>> = BTreeMap::new();
    let mut skipped = 0usize;

    for record in rdr.records().flatten() {
        let (Some(trip_id), Some(stop_id), Some(seq)) = (
            field(&record, Some(trip_idx)),
            field(&record, Some(stop_idx)),
            field(&record, Some(seq_idx)).and_then(|s| s.parse::<u32>().ok()),
        ) else {
            skipped += 1;
            continue;
        };

        let scheduled_time = field(&record, arrival_idx)
            .or_else(|| field(&record, departure_idx))
            .and_then(parse_gtfs_time);

        trips.entry(trip_id.to_string()).or_default().push((
            seq,
            ScheduledStop { stop_id: stop_id.to_string(), scheduled_time },
        ));
    }

    if skipped > 0 {
        debug!("Skipped {} malformed rows in stop_times.txt", skipped);
    }

    Ok(trips
        .into_iter()
        .map(|(trip_id, mut stops)| {
            stops.sort_by_key(|s| s.0);
            let route = StaticRoute::new(&trip_id, stops.into_iter().map(|(_, s)| s).collect());
            (trip_id, route)
        })
        .collect())
}

pub fn parse_route_colors(text: &str) -> Result<HashMap<String, String>> {
    let mut rdr = reader(text);
    let cols = columns(&mut rdr, "routes.txt")?;
    let id_idx = cols.required("routes.txt", "route_id")?;
    let color_idx = cols.optional("route_color");

    Ok(rdr
        .records()
        .flatten()
        .filter_map(|record| {
            let id = field(&record, Some(id_idx))?;
            let color = field(&record, color_idx)?;
            Some((id.to_string(), color.trim_start_matches('#').to_uppercase()))
        })
        .collect())
}

/// Parse GTFS time format (HH:MM:SS) to seconds since midnight. Hours past 23
/// are valid for trips running over the end of the service day.
pub fn parse_gtfs_time(time_str: &str) -> Option<u32> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: u32 = parts[0].parse().ok()?;
    let minutes: u32 = parts[1].parse().ok()?;
    let seconds: u32 = parts[2].parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)
}
