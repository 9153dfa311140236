// Durable copy of the trip table, rewritten after every tick so a restart can
// resume from the last good state.

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TrackerError};
use crate::feed::TripTable;

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Temp file beside `path`, unique per write so overlapping saves never share one.
fn temp_path(path: &Path, table: &TripTable) -> PathBuf {
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("json.{}-{}.tmp", table.updated_at, seq))
}

/// Serialize the whole table and atomically replace the file at `path`.
pub fn save(table: &TripTable, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| TrackerError::File(format!("Failed to create {:?}: {}", dir, e)))?;
    }

    let json = serde_json::to_string(table)
        .map_err(|e| TrackerError::Snapshot(format!("Failed to serialize trip table: {}", e)))?;

    let tmp = temp_path(path, table);
    fs::write(&tmp, json)
        .map_err(|e| TrackerError::File(format!("Failed to write snapshot: {}", e)))?;
    if let Err(e) = fs::rename(&tmp, path) {
        fs::remove_file(&tmp).ok();
        return Err(TrackerError::File(format!("Failed to replace snapshot: {}", e)));
    }

    Ok(())
}

/// Read a snapshot written by [`save`].
pub fn load(path: &Path) -> Result<TripTable> {
    let contents = fs::read_to_string(path)
        .map_err(|e| TrackerError::File(format!("Failed to read snapshot {:?}: {}", path, e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| TrackerError::Snapshot(format!("Failed to parse snapshot: {}", e)))
}

/// Startup restore: a missing or unreadable snapshot means starting empty.
pub fn restore(path: &Path) -> TripTable {
    if !path.exists() {
        info!("ℹ️  No realtime snapshot at {:?}, starting empty", path);
        return TripTable::default();
    }

    match load(path) {
        Ok(table) => {
            info!("✓ Restored {} trip records from {:?}", table.len(), path);
            table
        }
        Err(e) => {
            warn!("⚠️  Ignoring snapshot ({}), starting empty", e);
            TripTable::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{StopTimeUpdate, TripRecord, VehicleReport, VehicleStatus};
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("subway_pulse_snapshot_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_round_trip_is_field_for_field() {
        let mut record = TripRecord::new("AFA_073550_1..S03R", "1234567");
        record.route_id = Some("1".into());
        record.stop_time_updates = vec![
            StopTimeUpdate { stop_id: "101S".into(), time: 1_700_000_100 },
            StopTimeUpdate { stop_id: "103S".into(), time: 1_700_000_250 },
        ];
        record.vehicle = Some(VehicleReport {
            parent_stop_id: Some("101S".into()),
            timestamp: Some(1_700_000_000),
            current_stop_sequence: Some(2),
            status: VehicleStatus::InTransitTo,
        });

        let mut table = TripTable::default();
        table.trips.insert(record.trip_id.clone(), record);
        table.trips.insert("bare".into(), TripRecord::new("bare", "L"));
        table.updated_at = 1_700_000_030;

        let path = scratch("round_trip.json");
        save(&table, &path).unwrap();
        assert_eq!(load(&path).unwrap(), table);
        assert!(no_temp_files(&path));
    }

    fn no_temp_files(path: &Path) -> bool {
        fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .all(|e| !e.file_name().to_string_lossy().ends_with(".tmp"))
    }

    #[test]
    fn test_overlapping_saves_use_distinct_temp_files() {
        let path = scratch("overlap/realtime_snapshot.json");
        let mut table = TripTable::default();
        table.updated_at = 1_700_000_030;
        assert_ne!(temp_path(&path, &table), temp_path(&path, &table));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                let mut table = table.clone();
                table.trips.insert(format!("t{}", i), TripRecord::new(&format!("t{}", i), "G"));
                std::thread::spawn(move || save(&table, &path))
            })
            .collect();
        for writer in writers {
            writer.join().unwrap().unwrap();
        }

        assert_eq!(load(&path).unwrap().len(), 1);
        assert!(no_temp_files(&path));
    }

    #[test]
    fn test_corrupt_snapshot_restores_empty() {
        let path = scratch("corrupt.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(load(&path).is_err());
        assert!(restore(&path).is_empty());
    }

    #[test]
    fn test_missing_snapshot_restores_empty() {
        assert!(restore(&scratch("does_not_exist.json")).is_empty());
    }
}
