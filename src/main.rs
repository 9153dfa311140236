// Subway Pulse server: realtime tick loop plus a read-only JSON API

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;

use subway_pulse::config::Config;
use subway_pulse::schedule::StaticSchedule;
use subway_pulse::track::{self, TrackSet};
use subway_pulse::tracker::{self, SharedView, Tracker};
use subway_pulse::{snapshot, TrackerError};

#[derive(Clone)]
struct AppState {
    view: SharedView,
    tracks: Arc<TrackSet>,
    sources: Vec<String>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
    sources: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T, sources: &[String]) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: tracker::current_timestamp(),
            sources: sources.to_vec(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: tracker::current_timestamp(),
            sources: vec![],
        }
    }
}

fn lock_failed(e: impl std::fmt::Display) -> HttpResponse {
    error!("❌ Failed to lock published view: {}", e);
    HttpResponse::InternalServerError()
        .json(ApiResponse::<String>::error("Failed to read realtime state".to_string()))
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_trips(state: web::Data<AppState>) -> HttpResponse {
    match state.view.read() {
        Ok(view) => {
            let mut trips: Vec<_> = view.trips.trips.values().collect();
            trips.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
            HttpResponse::Ok().json(ApiResponse::success(trips, &state.sources))
        }
        Err(e) => lock_failed(e),
    }
}

async fn get_vehicles(state: web::Data<AppState>) -> HttpResponse {
    match state.view.read() {
        Ok(view) => {
            let vehicles: Vec<_> = view.vehicles.values().collect();
            HttpResponse::Ok().json(ApiResponse::success(vehicles, &state.sources))
        }
        Err(e) => lock_failed(e),
    }
}

async fn get_vehicle_by_trip(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let trip_id = path.into_inner();

    match state.view.read() {
        Ok(view) => match view.vehicles.get(&trip_id) {
            Some(vehicle) => HttpResponse::Ok().json(ApiResponse::success(vehicle, &state.sources)),
            None => HttpResponse::NotFound()
                .json(ApiResponse::<String>::error(format!("Vehicle for trip '{}' not found", trip_id))),
        },
        Err(e) => lock_failed(e),
    }
}

async fn get_tracks(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(state.tracks.as_ref(), &state.sources))
}

async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    match state.view.read() {
        Ok(view) => HttpResponse::Ok().json(ApiResponse::success(&view.stats, &state.sources)),
        Err(e) => lock_failed(e),
    }
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Subway Pulse",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": tracker::current_timestamp(),
    }))
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(config: Config, tracker: Tracker, tracks: Arc<TrackSet>) -> std::io::Result<()> {
    let app_state = AppState {
        view: tracker.view(),
        tracks,
        sources: config.feeds.iter().map(|f| f.name.clone()).collect(),
    };

    tokio::spawn(tracker.run());

    info!("🌐 Server running on: http://{}", config.bind_address);
    info!("📍 Routes: /health, /api/trips, /api/vehicles, /api/vehicles/{{trip_id}}, /api/tracks, /api/stats");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api")
                    .route("/trips", web::get().to(get_trips))
                    .route("/vehicles", web::get().to(get_vehicles))
                    .route("/vehicles/{trip_id}", web::get().to(get_vehicle_by_trip))
                    .route("/tracks", web::get().to(get_tracks))
                    .route("/stats", web::get().to(get_stats)),
            )
    })
    .bind(config.bind_address.as_str())?
    .run()
    .await
}

fn initialize() -> Result<(Config, Tracker, Arc<TrackSet>), TrackerError> {
    let config = Config::load()?;

    info!("📡 Loading static schedule from {:?}...", config.static_path);
    let schedule = StaticSchedule::load(&config.static_path)?;

    let tracks = track::build_tracks(&schedule, &config);
    if !tracks.skipped.is_empty() {
        warn!("⚠️  {} shapes could not be drawn", tracks.skipped.len());
    }
    info!(
        "✓ {} tracks built, {} stations drawn",
        tracks.tracks.len(),
        tracks.drawn_stations.len()
    );

    let restored = snapshot::restore(&config.snapshot_path);
    let tracks = Arc::new(tracks);
    let tracker = Tracker::new(config.clone(), Arc::new(schedule), tracks.clone(), restored)?;
    Ok((config, tracker, tracks))
}

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Subway Pulse v{}", env!("CARGO_PKG_VERSION"));

    let (config, tracker, tracks) = match initialize() {
        Ok(parts) => parts,
        Err(e) => {
            error!("❌ Failed to initialize: {}", e);
            error!("Server cannot start without configuration and a static schedule.");
            std::process::exit(1);
        }
    };

    actix_web::rt::System::new().block_on(run_server(config, tracker, tracks))
}
