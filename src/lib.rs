// Live subway vehicle positions from GTFS-realtime feeds, placed on per-line
// offset tracks built from the static GTFS schedule.

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod geometry;
pub mod ids;
pub mod matcher;
pub mod schedule;
pub mod snapshot;
pub mod track;
pub mod tracker;

pub use config::Config;
pub use engine::{PositionEngine, Vehicle, VehicleState};
pub use error::{Result, TrackerError};
pub use feed::{FetchOutcome, TripRecord, TripTable};
pub use schedule::StaticSchedule;
pub use track::{Track, TrackSet};
pub use tracker::{PublishedView, SharedView, Tracker};
