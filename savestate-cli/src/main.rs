/*!
Savestate CLI - Command-line interface for emulator save state slots.

This CLI provides utilities for inspecting, verifying and deleting slot files,
and for timing the streaming snapshot pipeline on a synthetic state.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use savestate_core::{
    create_default_engine, observability::init_observability, slot_path, HeaderStatus, RawState,
    SlotInfo, SlotKey, SnapshotConfig, SnapshotError, StreamingPipeline,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "savestate")]
#[command(about = "Inspect and manage emulator save state slots")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Directory holding slot files (overrides config and SAVESTATE_DIR)
    #[arg(short, long, global = true)]
    states_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print collected Prometheus metrics before exiting
    #[cfg(feature = "metrics")]
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct SlotArgs {
    /// Program id in hex, e.g. 0004000000055D00
    #[arg(short, long, value_parser = parse_hex_u64)]
    program: u64,

    /// Movie id in hex, when the slot belongs to a movie
    #[arg(short, long, value_parser = parse_hex_u64, default_value = "0")]
    movie: u64,

    /// Slot number
    #[arg(long)]
    slot: u32,
}

impl SlotArgs {
    fn key(&self) -> SlotKey {
        SlotKey::new(self.program, self.slot).with_movie(self.movie)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the usable slots of a program
    List {
        /// Program id in hex
        #[arg(short, long, value_parser = parse_hex_u64)]
        program: u64,

        /// Movie id in hex
        #[arg(short, long, value_parser = parse_hex_u64, default_value = "0")]
        movie: u64,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the header of one slot
    Show {
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Check the header and decompress the payload of one slot
    Verify {
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Delete one slot
    Delete {
        #[command(flatten)]
        slot: SlotArgs,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Push a synthetic state through the streaming pipeline and time it
    Roundtrip {
        /// State size in MiB
        #[arg(long, default_value_t = 10)]
        size_mb: usize,

        /// Number of save/load cycles
        #[arg(long, default_value_t = 3)]
        iterations: u32,
    },
}

#[derive(Tabled)]
struct SlotRow {
    #[tabled(rename = "Slot")]
    slot: u32,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Build")]
    build: String,
    #[tabled(rename = "Revision")]
    revision: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct TimingRow {
    #[tabled(rename = "Iteration")]
    iteration: u32,
    #[tabled(rename = "Compressed")]
    compressed: String,
    #[tabled(rename = "Ratio")]
    ratio: String,
    #[tabled(rename = "Save")]
    save: String,
    #[tabled(rename = "Load")]
    load: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_observability(cli.json_logs, cli.verbose)?;

    let config = load_config(&cli)?;

    match cli.command {
        Commands::List {
            program,
            movie,
            json,
        } => list_slots(&config, program, movie, json)?,
        Commands::Show { slot } => show_slot(&config, &slot.key())?,
        Commands::Verify { slot } => verify_slot(&config, &slot.key())?,
        Commands::Delete { slot, force } => delete_slot(&config, &slot.key(), force)?,
        Commands::Roundtrip {
            size_mb,
            iterations,
        } => roundtrip(&config, size_mb, iterations)?,
    }

    #[cfg(feature = "metrics")]
    if cli.metrics {
        let text = savestate_core::observability::SnapshotMetrics::global().gather_metrics()?;
        println!("{text}");
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<SnapshotConfig, anyhow::Error> {
    let config = match &cli.config {
        Some(path) => SnapshotConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => SnapshotConfig::default_local(),
    };
    let mut config = config.from_env()?;

    if let Some(dir) = &cli.states_dir {
        config.states_dir = dir.clone();
    }
    Ok(config)
}

fn parse_hex_u64(value: &str) -> Result<u64, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| format!("'{value}' is not a hex id: {e}"))
}

fn list_slots(
    config: &SnapshotConfig,
    program: u64,
    movie: u64,
    json: bool,
) -> Result<(), anyhow::Error> {
    info!(
        states_dir = %config.states_dir.display(),
        program = %format!("{program:016X}"),
        "Listing slots"
    );

    let engine = create_default_engine(config)?;
    let slots = engine.list_slots(program, movie);

    if json {
        let entries: Vec<serde_json::Value> = slots.iter().map(slot_json).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if slots.is_empty() {
        println!("No slots found in {}", config.states_dir.display());
        return Ok(());
    }

    let rows: Vec<SlotRow> = slots
        .iter()
        .map(|info| SlotRow {
            slot: info.key.slot,
            created: format_created(info),
            build: info.build_name.clone().unwrap_or_else(|| "unknown".to_string()),
            revision: revision_label(&info.status),
            size: format_size(info.size_bytes),
        })
        .collect();
    println!("{}", Table::new(rows));

    Ok(())
}

fn show_slot(config: &SnapshotConfig, key: &SlotKey) -> Result<(), anyhow::Error> {
    let engine = create_default_engine(config)?;

    match engine.read_slot_info(key) {
        Ok(info) => {
            println!("Slot Details:");
            println!("  Path: {}", slot_path(&config.states_dir, key));
            println!("  Program: {:016X}", info.key.program_id);
            if info.key.movie_id != 0 {
                println!("  Movie: {:016X}", info.key.movie_id);
            }
            println!("  Slot: {}", info.key.slot);
            println!("  Created: {}", format_created(&info));
            println!(
                "  Build: {}",
                info.build_name.as_deref().unwrap_or("unknown")
            );
            println!("  Revision: {}", revision_label(&info.status));
            println!("  Size: {}", format_size(info.size_bytes));
        }
        Err(e) => {
            error!("Failed to read slot {}: {}", key, e);
            return Err(e.into());
        }
    }

    Ok(())
}

fn verify_slot(config: &SnapshotConfig, key: &SlotKey) -> Result<(), anyhow::Error> {
    info!("Verifying slot: {}", key);

    let engine = create_default_engine(config)?;

    match engine.verify_slot(key) {
        Ok(verification) => {
            println!(
                "✓ Slot {} is valid: {} of state in {}",
                key,
                format_size(verification.state_bytes as u64),
                format_size(verification.info.size_bytes)
            );
            if !verification.info.status.is_exact() {
                println!("  Note: {}", revision_label(&verification.info.status));
            }
        }
        Err(e @ SnapshotError::WrongProgram { .. }) | Err(e @ SnapshotError::Corrupt(_)) => {
            error!("✗ Slot header is invalid: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("✗ Failed to verify slot: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

fn delete_slot(config: &SnapshotConfig, key: &SlotKey, force: bool) -> Result<(), anyhow::Error> {
    let engine = create_default_engine(config)?;

    if !engine.slot_exists(key) {
        println!("Slot {key} is empty");
        return Ok(());
    }

    if !force {
        print!("Are you sure you want to delete slot '{key}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    engine.delete_slot(key)?;
    println!("✓ Slot deleted successfully");

    Ok(())
}

fn roundtrip(config: &SnapshotConfig, size_mb: usize, iterations: u32) -> Result<(), anyhow::Error> {
    let size = size_mb * 1024 * 1024;
    let state = RawState::pattern(size);
    let pipeline = StreamingPipeline::new(config.clone())?;

    // destination sized like an embedding host would: generously
    let mut buffer = vec![0u8; zstd_bound(size + 8)];
    let mut rows = Vec::new();

    for iteration in 1..=iterations {
        let started = Instant::now();
        let len = pipeline.save_to_buffer(&state, &mut buffer)?;
        let save = started.elapsed();

        let mut restored = RawState::default();
        let started = Instant::now();
        pipeline.load_from_buffer(&mut restored, &buffer[..len])?;
        let load = started.elapsed();

        if restored != state {
            anyhow::bail!("Iteration {iteration}: restored state differs from the original");
        }

        rows.push(TimingRow {
            iteration,
            compressed: format_size(len as u64),
            ratio: format!("{:.1}x", size as f64 / len.max(1) as f64),
            save: format_duration(save, size),
            load: format_duration(load, size),
        });
    }

    println!("Streaming round trip of {}:", format_size(size as u64));
    println!("{}", Table::new(rows));
    Ok(())
}

/// Worst case zstd frame size for `len` input bytes.
fn zstd_bound(len: usize) -> usize {
    len + (len >> 8) + 64 * 1024
}

fn slot_json(info: &SlotInfo) -> serde_json::Value {
    let (revision, build_origin) = match &info.status {
        HeaderStatus::Ok => (None, "current"),
        HeaderStatus::RevisionMismatch { revision, origin } => (
            Some(revision.to_hex()),
            match origin {
                savestate_core::BuildOrigin::Embedded(_) => "embedded",
                savestate_core::BuildOrigin::Known(_) => "known",
                savestate_core::BuildOrigin::Unknown => "unknown",
            },
        ),
    };

    serde_json::json!({
        "slot": info.key.slot,
        "program_id": format!("{:016X}", info.key.program_id),
        "movie_id": format!("{:016X}", info.key.movie_id),
        "path": info.path,
        "created_at": info.created_at.map(|t| t.to_rfc3339()),
        "build_name": info.build_name,
        "foreign_revision": revision,
        "build_origin": build_origin,
        "size_bytes": info.size_bytes,
    })
}

fn revision_label(status: &HeaderStatus) -> String {
    match status {
        HeaderStatus::Ok => "current".to_string(),
        HeaderStatus::RevisionMismatch { revision, origin } => match origin.name() {
            Some(name) => format!("different build ({name})"),
            None => format!("different revision {}", &revision.to_hex()[..10]),
        },
    }
}

fn format_created(info: &SlotInfo) -> String {
    use chrono::Local;

    match info.created_at {
        Some(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "unknown".to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_duration(elapsed: Duration, bytes: usize) -> String {
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        bytes as f64 / secs / (1024.0 * 1024.0)
    } else {
        f64::INFINITY
    };
    format!("{:.1} ms ({:.0} MiB/s)", secs * 1000.0, throughput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0004000000055D00"), Ok(0x0004_0000_0005_5D00));
        assert_eq!(parse_hex_u64("0xff"), Ok(255));
        assert!(parse_hex_u64("slot").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(10 * 1024 * 1024), "10.0 MB");
    }

    #[test]
    fn test_cli_parses_slot_arguments() {
        let cli = Cli::try_parse_from([
            "savestate",
            "--states-dir",
            "/tmp/states",
            "show",
            "--program",
            "0004000000055D00",
            "--slot",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.states_dir, Some(PathBuf::from("/tmp/states")));
        match cli.command {
            Commands::Show { slot } => {
                assert_eq!(slot.key(), SlotKey::new(0x0004_0000_0005_5D00, 3));
            }
            _ => panic!("expected show"),
        }
    }
}
