//! `triprec` - CLI for triprecorder
//!
//! This binary replays recorded rides through the trip engine and manages the
//! local trip history database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use triprecorder::cli::{Cli, Command, ConfigCommand, HistoryCommand, ReplayCommand};
use triprecorder::history::{MemoryTripHistory, TripHistoryStore};
use triprecorder::replay::{parse_events, replay_events};
use triprecorder::snapshot::{MemorySnapshotStore, Snapshot, SnapshotStore, SNAPSHOT_KEY};
use triprecorder::{
    init_logging, Config, ManualClock, RestoreOutcome, Storage, Trip, TripEngine, TripId,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Replay(cmd) => handle_replay(&config, &cmd).await,
        Command::History(cmd) => handle_history(&config, cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn handle_replay(config: &Config, cmd: &ReplayCommand) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(&cmd.file)
        .with_context(|| format!("reading {}", cmd.file.display()))?;
    let events = parse_events(&input)?;

    let start = events.first().map_or_else(Utc::now, |e| e.at());
    let clock = ManualClock::new(start);
    // A dry run touches nothing on disk. Otherwise the in-flight trip is
    // snapshotted to the database, so a file cut off mid-ride leaves a trip
    // that the next replay picks up.
    let (snapshots, history): (Arc<dyn SnapshotStore>, Arc<dyn TripHistoryStore>) =
        if cmd.dry_run {
            let snapshots: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
            let history: Arc<dyn TripHistoryStore> = Arc::new(MemoryTripHistory::new());
            (snapshots, history)
        } else {
            let storage = Arc::new(Storage::open(config.database_path())?);
            let snapshots: Arc<dyn SnapshotStore> = storage.clone();
            (snapshots, storage)
        };

    let mut engine = TripEngine::new(
        config.engine_options(),
        Arc::new(clock.clone()),
        snapshots,
        history,
    );
    let restored = match engine.restore() {
        RestoreOutcome::Restored { trip_id, is_paused } => {
            info!(trip_id = %trip_id, is_paused, "Continuing interrupted trip");
            Some(trip_id)
        }
        RestoreOutcome::Abandoned { trip_id } => {
            warn!(trip_id = %trip_id, "Interrupted trip too old to continue");
            None
        }
        _ => None,
    };
    let summary = replay_events(&mut engine, &clock, events).await?;

    if cmd.json {
        let output = serde_json::json!({
            "finished": summary.finished,
            "too_short": summary.too_short,
            "discarded": summary.discarded,
            "accepted_samples": summary.accepted_samples,
            "rejected_samples": summary.rejected_samples,
            "ignored_samples": summary.ignored_samples,
            "skipped_events": summary.skipped_events,
            "continued": restored,
            "unfinished": engine.is_tracking(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(trip_id) = &restored {
        println!("Continued interrupted trip {trip_id}");
    }
    println!(
        "Samples: {} accepted, {} rejected, {} ignored",
        summary.accepted_samples, summary.rejected_samples, summary.ignored_samples
    );
    if summary.too_short > 0 {
        println!("Finish refused (too short): {}", summary.too_short);
    }
    if summary.discarded > 0 {
        println!("Discarded: {}", summary.discarded);
    }
    if summary.skipped_events > 0 {
        println!("Skipped events: {}", summary.skipped_events);
    }
    if engine.is_tracking() {
        println!("Replay ended with a trip still {}", engine.state());
        if !cmd.dry_run {
            println!("It is saved as in flight; replay the rest of the ride to continue it.");
        }
    }
    for trip in &summary.finished {
        println!();
        print_trip(trip);
    }
    if !cmd.dry_run && !summary.finished.is_empty() {
        println!();
        println!(
            "Saved {} trip(s) to {}",
            summary.finished.len(),
            config.database_path().display()
        );
    }
    Ok(())
}

fn handle_history(config: &Config, cmd: HistoryCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;

    match cmd {
        HistoryCommand::List { limit, json } => {
            let trips = storage.list_recent(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&trips)?);
            } else if trips.is_empty() {
                println!("No trips recorded.");
            } else {
                println!(
                    "{:<28} {:<24} {:>9} {:>9} {:>8}",
                    "ID", "NAME", "KM", "ACTIVE", "KM/H"
                );
                for trip in &trips {
                    println!(
                        "{:<28} {:<24} {:>9.2} {:>9} {:>8.1}",
                        trip.id,
                        trip.name.as_deref().unwrap_or("-"),
                        trip.distance_km,
                        format_seconds(trip.active_duration_seconds),
                        trip.avg_speed_kmh
                    );
                }
            }
        }
        HistoryCommand::Show { id, json } => {
            let Some(trip) = storage.get(&TripId::from(id.as_str()))? else {
                bail!("no trip with id {id}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&trip)?);
            } else {
                print_trip(&trip);
            }
        }
        HistoryCommand::Delete { id } => {
            if storage.delete(&TripId::from(id.as_str()))? {
                println!("Deleted trip {id}");
            } else {
                bail!("no trip with id {id}");
            }
        }
        HistoryCommand::Clear { yes } => {
            if yes {
                let deleted = storage.clear()?;
                println!("Deleted {deleted} trip(s).");
            } else {
                println!("This will delete every recorded trip.");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let path = config.database_path();
    if !path.exists() {
        if json {
            let status = serde_json::json!({
                "database_path": path,
                "database_exists": false,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            println!("Database:      {} (not created yet)", path.display());
        }
        return Ok(());
    }

    let storage = Storage::open(&path)?;
    let stats = storage.stats()?;
    let snapshot = match SnapshotStore::get(&storage, SNAPSHOT_KEY)? {
        Some(blob) => Some(Snapshot::decode(&blob)),
        None => None,
    };

    let now = Utc::now();
    let in_flight = match &snapshot {
        Some(Ok(s)) => {
            let mut trip = s.trip.clone();
            if s.is_paused {
                trip.pause_started_at.get_or_insert(s.saved_at);
            }
            let durations = trip.durations_at(now);
            let resumable = now - trip.start_time <= config.engine_options().max_resume_age;
            Some(serde_json::json!({
                "trip_id": trip.id,
                "started": trip.start_time,
                "saved_at": s.saved_at,
                "is_paused": s.is_paused,
                "points": trip.coordinates.len(),
                "distance_km": trip.distance_km,
                "duration_seconds": durations.elapsed_seconds,
                "active_duration_seconds": durations.active_seconds,
                "resumable": resumable,
            }))
        }
        Some(Err(e)) => Some(serde_json::json!({ "error": e.to_string() })),
        None => None,
    };

    if json {
        let status = serde_json::json!({
            "database_path": path,
            "database_exists": true,
            "db_size_bytes": stats.db_size_bytes,
            "total_trips": stats.total_trips,
            "total_distance_km": stats.total_distance_km,
            "newest_trip": stats.newest_trip,
            "in_flight": in_flight,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("triprec status");
    println!("--------------");
    println!("Database:      {}", path.display());
    println!("Size:          {} bytes", stats.db_size_bytes);
    println!("Trips:         {}", stats.total_trips);
    println!("Total:         {:.2} km", stats.total_distance_km);
    if let Some(newest) = stats.newest_trip {
        println!("Last ride:     {}", newest.format("%Y-%m-%d %H:%M"));
    }
    match snapshot {
        None => println!("In flight:     none"),
        Some(Err(e)) => println!("In flight:     unreadable ({e})"),
        Some(Ok(s)) => {
            let Some(info) = in_flight else {
                return Ok(());
            };
            println!(
                "In flight:     {} ({}{})",
                s.trip.id,
                if s.is_paused { "paused" } else { "active" },
                if info["resumable"].as_bool().unwrap_or(false) {
                    ""
                } else {
                    ", too old to resume"
                }
            );
            println!("  Distance:    {:.2} km", s.trip.distance_km);
            println!(
                "  Duration:    {} ({} active)",
                format_seconds(info["duration_seconds"].as_i64().unwrap_or(0)),
                format_seconds(info["active_duration_seconds"].as_i64().unwrap_or(0))
            );
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                let t = &config.tracking;
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Tracking]");
                println!("  Max accuracy (m):        {}", t.max_accuracy_m);
                println!("  Min movement (m):        {}", t.min_delta_m);
                println!("  Min finish distance (m): {}", t.min_finish_distance_m);
                println!("  Speed noise (km/h):      {}", t.noise_speed_kmh);
                println!("  Calories per km:         {}", t.calories_per_km);
                println!("  Snapshot every:          {} samples", t.snapshot_every_samples);
                println!("  Max resume age (h):      {}", t.max_resume_age_hours);
                println!(
                    "  Location hints:          {} m / {} ms",
                    t.location_min_distance_m, t.location_interval_ms
                );
                println!("  Default name prefix:     {}", t.default_name_prefix);
                println!();
                println!("[Storage]");
                println!("  Database path:           {}", config.database_path().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_trip(trip: &Trip) {
    println!("{}", trip.name.as_deref().unwrap_or("(unnamed)"));
    println!("  ID:          {}", trip.id);
    println!("  Started:     {}", trip.start_time.format("%Y-%m-%d %H:%M:%S"));
    if let Some(end) = trip.end_time {
        println!("  Finished:    {}", end.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  Distance:    {:.2} km", trip.distance_km);
    println!(
        "  Duration:    {} ({} active, {} paused)",
        format_seconds(trip.duration_seconds),
        format_seconds(trip.active_duration_seconds),
        format_seconds(trip.paused_seconds)
    );
    println!("  Avg speed:   {:.1} km/h", trip.avg_speed_kmh);
    println!("  Max speed:   {:.1} km/h", trip.max_speed_kmh);
    println!("  Calories:    {} kcal", trip.calories_kcal);
    println!("  Points:      {}", trip.coordinates.len());
}

fn format_seconds(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
