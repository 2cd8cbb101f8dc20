//! scoresync command-line tool
//!
//! Usage:
//!   scoresync cursor <map.json> <time-ms>          - Resolve the cursor at a music time
//!   scoresync seek <map.json> <x> <y>               - Resolve a tap to a music time
//!   scoresync inspect <asset.mid>                   - Summarise a Standard MIDI File
//!   scoresync rewrite-tempo <in.mid> <speed> <out>  - Scale every tempo event
//!   scoresync simulate <map.json> <asset.mid>       - Play a session on a simulated engine

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use scoresync::clock::{elapsed_ms, Clock, ManualClock, SharedClock};
use scoresync::cursor::CursorPosition;
use scoresync::surface::{CallTicket, RenderingSurface};
use scoresync::transport::{Capabilities, SimulatedPlayer, StrategyTransport};
use scoresync::{
    load_map, midi, read_asset, resolve_cursor, resolve_seek, PlaybackState, ScoreSync,
    SeekPolicy, SyncConfig, SyncError, TapPoint,
};

#[derive(Parser)]
#[command(name = "scoresync", about = "Keep a notation cursor in step with audio playback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    FirstMatch,
    NearestToPlayhead,
}

impl From<PolicyArg> for SeekPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FirstMatch => SeekPolicy::FirstMatch,
            PolicyArg::NearestToPlayhead => SeekPolicy::NearestToPlayhead,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    /// Rate control and silent output
    Full,
    /// No rate control: speed by tempo rewrite
    NoRate,
    /// Cannot run silently: mute by virtual clock
    NoSilence,
    /// Neither
    Minimal,
}

impl From<EngineArg> for Capabilities {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Full => Capabilities::FULL,
            EngineArg::NoRate => Capabilities {
                rate_control: false,
                silent_output: true,
            },
            EngineArg::NoSilence => Capabilities {
                rate_control: true,
                silent_output: false,
            },
            EngineArg::Minimal => Capabilities::MINIMAL,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cursor position at a music time as JSON
    Cursor {
        map: PathBuf,
        time_ms: f64,
        /// Space above and below each system
        #[arg(long, default_value_t = 20.0)]
        margin: f64,
    },
    /// Print the music time under a tap
    Seek {
        map: PathBuf,
        x: f64,
        y: f64,
        /// Current playhead, used to pick a pass through repeats
        #[arg(long, default_value_t = 0.0)]
        playhead: f64,
        #[arg(long, value_enum, default_value = "nearest-to-playhead")]
        policy: PolicyArg,
        #[arg(long, default_value_t = 20.0)]
        margin: f64,
    },
    /// Summarise a Standard MIDI File
    Inspect { asset: PathBuf },
    /// Write a copy of a MIDI file that plays `speed` times faster
    RewriteTempo {
        asset: PathBuf,
        speed: f64,
        output: PathBuf,
    },
    /// Run a session against a simulated engine and print surface traffic
    Simulate {
        map: PathBuf,
        asset: PathBuf,
        /// YAML settings file
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long)]
        repeat: Option<u32>,
        #[arg(long)]
        muted: bool,
        #[arg(long, value_enum, default_value = "full")]
        engine: EngineArg,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Cursor {
            map,
            time_ms,
            margin,
        } => cursor(&map, time_ms, margin),
        Commands::Seek {
            map,
            x,
            y,
            playhead,
            policy,
            margin,
        } => seek(&map, x, y, playhead, policy.into(), margin),
        Commands::Inspect { asset } => inspect(&asset),
        Commands::RewriteTempo {
            asset,
            speed,
            output,
        } => rewrite_tempo(&asset, speed, &output),
        Commands::Simulate {
            map,
            asset,
            config,
            speed,
            repeat,
            muted,
            engine,
        } => simulate(&map, &asset, config.as_deref(), speed, repeat, muted, engine.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

fn cursor(map_path: &Path, time_ms: f64, margin: f64) -> Result<(), SyncError> {
    let map = load_map(map_path)?;
    match resolve_cursor(&map, time_ms, margin) {
        Some(position) => println!("{}", to_json(&position)),
        None => println!("null"),
    }
    Ok(())
}

fn seek(
    map_path: &Path,
    x: f64,
    y: f64,
    playhead: f64,
    policy: SeekPolicy,
    margin: f64,
) -> Result<(), SyncError> {
    let map = load_map(map_path)?;
    match resolve_seek(&map, TapPoint::new(x, y), margin, policy, playhead) {
        Some(target) => println!("{:.3}", target),
        None => println!("no measure at ({}, {})", x, y),
    }
    Ok(())
}

fn inspect(asset_path: &Path) -> Result<(), SyncError> {
    let bytes = read_asset(asset_path)?;
    let summary = midi::inspect(&bytes)?;
    println!("format:          {}", summary.format);
    println!("tracks:          {}", summary.track_count);
    println!("ticks/quarter:   {}", summary.ticks_per_quarter);
    println!("tempo changes:   {}", summary.tempo_changes.len());
    println!("initial tempo:   {:.2} bpm", summary.initial_bpm());
    println!("end tick:        {}", summary.end_tick);
    println!("duration:        {:.1} ms", summary.duration_ms());
    Ok(())
}

fn rewrite_tempo(asset_path: &Path, speed: f64, output: &Path) -> Result<(), SyncError> {
    let bytes = read_asset(asset_path)?;
    let rewritten = midi::scale_tempo(&bytes, scoresync::config::clamp_speed(speed))?;
    std::fs::write(output, &rewritten).map_err(|e| SyncError::Io {
        path: output.display().to_string(),
        message: e.to_string(),
    })?;
    let duration = midi::inspect(&rewritten)?.duration_ms();
    eprintln!("Wrote {} ({:.1} ms)", output.display(), duration);
    Ok(())
}

/// Prints every surface call, one per line, stamped with simulated time.
struct PrintSurface {
    clock: ManualClock,
    started: std::time::Instant,
}

impl PrintSurface {
    fn stamp(&self) -> f64 {
        elapsed_ms(self.started, self.clock.now())
    }
}

impl RenderingSurface for PrintSurface {
    fn update_position(&mut self, time_ms: f64, cursor: Option<CursorPosition>, _ticket: CallTicket) {
        let cursor = cursor.map_or_else(|| "null".to_string(), |c| to_json(&c));
        println!("{:>8.0}  update   {:>8.1} {}", self.stamp(), time_ms, cursor);
    }

    fn scroll_to_system(&mut self, system_idx: usize) {
        println!("{:>8.0}  scroll   system {}", self.stamp(), system_idx);
    }

    fn begin_animation(&mut self, from_ms: f64, rate: f64) {
        println!("{:>8.0}  animate  from {:.1} at {}x", self.stamp(), from_ms, rate);
    }

    fn freeze_at(&mut self, at_ms: f64) {
        println!("{:>8.0}  freeze   at {:.1}", self.stamp(), at_ms);
    }
}

fn simulate(
    map_path: &Path,
    asset_path: &Path,
    config_path: Option<&Path>,
    speed: Option<f64>,
    repeat: Option<u32>,
    muted: bool,
    capabilities: Capabilities,
) -> Result<(), SyncError> {
    let map = Arc::new(load_map(map_path)?);
    let asset = read_asset(asset_path)?;
    let mut config = match config_path {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(speed) = speed {
        config.speed = speed;
    }
    if let Some(repeat) = repeat {
        config.repeat_count = repeat;
    }
    config.muted |= muted;
    let config = config.validate()?;

    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let player = SimulatedPlayer::new(Arc::clone(&shared), capabilities);
    let transport = StrategyTransport::new(player, Arc::clone(&shared));
    let surface = PrintSurface {
        clock: clock.clone(),
        started: clock.now(),
    };

    let tick = config.tick_interval();
    let mut sync = ScoreSync::new(map, transport, surface, shared, config);
    let duration = sync.load_asset(&asset)?;

    // every pass at the configured speed, plus settle delays and some slack
    let config = sync.config();
    let budget_ms = duration / config.speed * config.repeat_count as f64
        + (config.restart_delay_ms * config.repeat_count as u64) as f64
        + 1000.0;

    sync.play();
    let mut simulated_ms = 0.0;
    while sync.state() != PlaybackState::Stopped && simulated_ms < budget_ms {
        clock.advance(tick);
        simulated_ms += tick.as_secs_f64() * 1000.0;
        sync.tick();
        for event in sync.take_events() {
            println!("{:>8.0}  event    {}", simulated_ms, to_json(&event));
        }
    }

    if sync.state() != PlaybackState::Stopped {
        log::warn!("simulation did not finish within {:.0} ms", budget_ms);
    }
    eprintln!(
        "Simulated {:.0} ms, {} updates skipped",
        simulated_ms,
        sync.skipped_updates()
    );
    Ok(())
}
