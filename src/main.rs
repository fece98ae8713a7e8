//! Pixie Lane CLI
//!
//! Entry point for the `pixie-lane` command-line tool.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use pixie_lane::artifact::wire;
use pixie_lane::config::LaneConfig;
use pixie_lane::{ErrorKind, Lane, RpcHandler, ToolchainState};
use pixie_protocol::ops::ArtifactMap;

#[derive(Parser)]
#[command(name = "pixie-lane")]
#[command(about = "Compile sketches and flash them to a Pixie M1", version)]
struct Cli {
    /// Path to config file (default: $PIXIE_LANE_CONFIG or ./pixie-lane.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Directory for per-job workspaces
    #[arg(long, global = true)]
    build_root: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-lines RPC on stdin/stdout
    Serve,

    /// Compile a sketch file
    Compile {
        /// Sketch source file
        sketch: PathBuf,

        /// Write the artifact map as JSON, for `flash`
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Flash an artifact map written by `compile --out`
    Flash {
        /// Artifact map JSON file
        artifacts: PathBuf,
    },

    /// Check the toolchain, installing the platform if needed
    Toolchain,

    /// List serial ports and mark known devices
    Ports,
}

/// A command failure: what to print and which kind to report.
struct Failure {
    kind: ErrorKind,
    message: String,
}

impl Failure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };
    let lane = Lane::from_config(config);

    let result = match cli.command {
        Commands::Serve => run_serve(&lane),
        Commands::Compile { sketch, out } => run_compile(&lane, &sketch, out),
        Commands::Flash { artifacts } => run_flash(&lane, &artifacts),
        Commands::Toolchain => run_toolchain(&lane),
        Commands::Ports => run_ports(&lane),
    };

    if let Err(failure) = result {
        eprintln!("Error [{}]: {}", failure.kind, failure.message);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<LaneConfig, pixie_lane::config::ConfigError> {
    let mut config = LaneConfig::resolve(cli.config.as_deref())?;
    if let Some(root) = &cli.build_root {
        config.build_root = root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run_serve(lane: &Lane) -> Result<(), Failure> {
    lane.toolchain()
        .spawn_background()
        .map_err(|e| Failure::new(ErrorKind::Internal, format!("failed to start toolchain install: {}", e)))?;

    log::info!("serving RPC on stdin/stdout");
    RpcHandler::new(lane)
        .serve(io::stdin().lock(), io::stdout())
        .map_err(|e| Failure::new(ErrorKind::Internal, format!("RPC I/O failed: {}", e)))
}

fn ensure_toolchain(lane: &Lane) -> Result<(), Failure> {
    match lane.toolchain().check_or_install() {
        ToolchainState::Ready => Ok(()),
        state => Err(Failure::new(ErrorKind::ToolchainNotReady, state.to_string())),
    }
}

fn run_compile(lane: &Lane, sketch: &Path, out: Option<PathBuf>) -> Result<(), Failure> {
    let source = fs::read_to_string(sketch).map_err(|e| {
        Failure::new(ErrorKind::ValidationError, format!("cannot read {}: {}", sketch.display(), e))
    })?;

    ensure_toolchain(lane)?;

    let firmware = lane
        .builds()
        .compile(&source)
        .map_err(|e| Failure::new(e.kind(), e.to_string()))?;

    println!("Compiled {} in {}ms", firmware.job_id, firmware.duration.as_millis());
    for artifact in firmware.artifacts.iter() {
        println!(
            "  {:<10} {:>8}  {:>8} bytes  {}",
            artifact.kind().wire_name(),
            artifact.offset_hex(),
            artifact.len(),
            artifact.sha256()
        );
    }

    if let Some(path) = out {
        let map = wire::encode(&firmware.artifacts);
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| Failure::new(ErrorKind::Internal, e.to_string()))?;
        fs::write(&path, json).map_err(|e| {
            Failure::new(ErrorKind::Internal, format!("cannot write {}: {}", path.display(), e))
        })?;
        println!("Artifact map written to {}", path.display());
    }
    Ok(())
}

fn run_flash(lane: &Lane, path: &Path) -> Result<(), Failure> {
    let content = fs::read_to_string(path).map_err(|e| {
        Failure::new(ErrorKind::InvalidRequest, format!("cannot read {}: {}", path.display(), e))
    })?;
    let map: ArtifactMap = serde_json::from_str(&content)
        .map_err(|e| Failure::new(ErrorKind::InvalidRequest, format!("invalid artifact map: {}", e)))?;
    let artifacts = wire::decode(&map)
        .map_err(|e| Failure::new(ErrorKind::InvalidRequest, format!("invalid artifacts: {}", e)))?;

    let report = lane
        .flashes()
        .flash(&artifacts)
        .map_err(|e| Failure::new(e.kind(), e.to_string()))?;

    print!("{}", report.device_log);
    println!("{} ({})", report.message, report.port);
    Ok(())
}

fn run_toolchain(lane: &Lane) -> Result<(), Failure> {
    ensure_toolchain(lane)?;
    println!(
        "Toolchain ready: {} ({})",
        lane.config().toolchain.platform,
        lane.config().toolchain.fqbn
    );
    Ok(())
}

fn run_ports(lane: &Lane) -> Result<(), Failure> {
    let ports = lane
        .flashes()
        .locator()
        .list()
        .map_err(|e| Failure::new(ErrorKind::DeviceNotFound, e.to_string()))?;

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    for port in ports {
        let ids = match (port.info.vid, port.info.pid) {
            (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
            _ => "-".to_string(),
        };
        let known = port
            .known
            .map(|k| format!("  <- {}", k.name))
            .unwrap_or_default();
        println!("{:<24} {:<10}{}", port.info.port, ids, known);
    }
    Ok(())
}
