//! gqc: glider quality-control flagging CLI.

use clap::{Args, Parser, Subcommand};
use gqc_common::{Error, Result};
use gqc_config::{list_presets, ConfigBundle, PresetName, QcConfig};
use gqc_core::battery::{BatteryError, ReplayBattery, SubprocessBattery, TestBattery};
use gqc_core::exit_codes::ExitCode;
use gqc_core::logging::{self, LogFormat, Verbosity};
use gqc_core::{Dataset, QcPipeline, VariableRegistry};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gqc", version, about = "Glider QC flag aggregation, overrides, and masking")]
struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flag a dataset and write it back with `<var>_qc` series
    Flag(FlagArgs),
    /// List the versioned presets
    Presets,
    /// Print or validate config bundles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Print the monitored variables in processing order
    Registry,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print a preset as a hashed config bundle
    Show {
        #[arg(long, default_value = "ioos-qartod-v1")]
        preset: String,
    },
    /// Check a config bundle's integrity hash, thresholds and variable names
    Validate { file: PathBuf },
}

#[derive(Args, Debug)]
struct FlagArgs {
    /// Input dataset (JSON)
    #[arg(long)]
    input: PathBuf,

    /// Where to write the flagged dataset
    #[arg(long)]
    output: PathBuf,

    /// Preset to use when no config bundle is given
    #[arg(long, default_value = "ioos-qartod-v1")]
    preset: String,

    /// Config bundle overriding the preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// External battery program speaking the JSON protocol
    #[arg(long, required_unless_present = "replay", conflicts_with = "replay")]
    battery_cmd: Option<PathBuf>,

    /// Argument passed to the battery program (repeatable)
    #[arg(long = "battery-arg", value_name = "ARG", allow_hyphen_values = true)]
    battery_args: Vec<String>,

    /// Battery name recorded in provenance (default: program file stem)
    #[arg(long)]
    battery_name: Option<String>,

    /// Battery version recorded in provenance
    #[arg(long, default_value = "unknown")]
    battery_version: String,

    /// Replay recorded battery results instead of running a program
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Blank values whose flag is worse than the threshold
    #[arg(long)]
    mask: bool,

    /// Per-variable masking threshold (repeatable)
    #[arg(long = "threshold", value_name = "VAR=T", value_parser = parse_threshold)]
    thresholds: Vec<(String, u8)>,

    /// Masking threshold for variables without their own
    #[arg(long)]
    default_threshold: Option<u8>,
}

fn parse_threshold(s: &str) -> std::result::Result<(String, u8), String> {
    let (var, t) = s
        .split_once('=')
        .ok_or_else(|| format!("expected VAR=T, got '{s}'"))?;
    let t: u8 = t
        .trim()
        .parse()
        .map_err(|_| format!("threshold '{t}' is not a flag value"))?;
    Ok((var.trim().to_string(), t))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(ExitCode::ConfigError.as_i32());
        }
    };
    logging::init(cli.log_format, Verbosity::from_flags(cli.verbose, cli.quiet));

    let code = match run(cli.command) {
        Ok(()) => ExitCode::Clean,
        Err(e) => {
            eprintln!("gqc: error {}: {e}", e.code());
            ExitCode::for_error(&e)
        }
    };
    std::process::exit(code.as_i32());
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Flag(args) => run_flag(args),
        Commands::Presets => print_json(&list_presets()),
        Commands::Config { command } => match command {
            ConfigCommands::Show { preset } => {
                let name: PresetName = preset.parse()?;
                let bundle = ConfigBundle::from_preset(name)?;
                print_json(&bundle)
            }
            ConfigCommands::Validate { file } => {
                let bundle = ConfigBundle::load_from_file(&file)?;
                VariableRegistry::glider().check_config(&bundle.config)?;
                print_json(&json!({
                    "valid": true,
                    "preset": bundle.config.preset,
                    "config_hash": bundle.config_hash,
                }))
            }
        },
        Commands::Registry => print_json(VariableRegistry::glider().descriptors()),
    }
}

fn run_flag(args: FlagArgs) -> Result<()> {
    let mut config = load_config(&args.preset, args.config.as_deref())?;
    if args.mask {
        config.masking.enabled = true;
    }
    if let Some(t) = args.default_threshold {
        config.masking.default_threshold = t;
    }
    config
        .masking
        .thresholds
        .extend(args.thresholds.iter().cloned());

    let battery = build_battery(&args)?;
    let mut ds = Dataset::load(&args.input)?;
    info!(input = %args.input.display(), observations = ds.len(), "dataset loaded");

    let pipeline = QcPipeline::new(config, VariableRegistry::glider(), battery);
    let report = pipeline.run(&mut ds)?;

    ds.save(&args.output)?;
    info!(output = %args.output.display(), "flagged dataset written");
    print_json(&report)
}

fn load_config(preset: &str, bundle: Option<&Path>) -> Result<QcConfig> {
    match bundle {
        Some(path) => Ok(ConfigBundle::load_from_file(path)?.config),
        None => {
            let name: PresetName = preset.parse()?;
            Ok(gqc_config::get_preset(name))
        }
    }
}

fn build_battery(args: &FlagArgs) -> Result<Box<dyn TestBattery>> {
    if let Some(path) = &args.replay {
        let battery = ReplayBattery::from_file(path).map_err(|e| battery_error("replay", e))?;
        return Ok(Box::new(battery));
    }
    let program = args
        .battery_cmd
        .as_ref()
        .ok_or_else(|| Error::Config("either --battery-cmd or --replay is required".into()))?;
    let mut battery = SubprocessBattery::new(program, args.battery_args.clone())
        .with_version(&args.battery_version);
    if let Some(name) = &args.battery_name {
        battery = battery.with_name(name);
    }
    Ok(Box::new(battery))
}

fn battery_error(battery: &str, e: BatteryError) -> Error {
    Error::Battery {
        battery: battery.to_string(),
        message: e.to_string(),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
