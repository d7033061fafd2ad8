//! rootenv - privileged toolkit environment inspector
//!
//! The main entry point, handling:
//! - Toolkit probing (version, version code, hide status)
//! - Network availability watching
//! - Reboot detection
//! - Configuration inspection

use clap::{Args, Parser, Subcommand};
use rootenv_common::{Error, OutputFormat, StructuredError, SCHEMA_VERSION};
use rootenv_core::boot::read_boot_id;
use rootenv_core::config::{load_config, AppConfig, ConfigOptions, ResolvedConfig};
use rootenv_core::exit_codes::ExitCode;
use rootenv_core::logging::{
    event_names, generate_run_id, init_logging, LogConfig, LogContext, LogLevel, Stage,
};
use rootenv_core::{log_event, EnvironmentState};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

/// rootenv - inspect a rooted device's toolkit, network and boot state
#[derive(Parser)]
#[command(name = "rootenv")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Override config directory
    #[arg(long, global = true, env = "ROOTENV_CONFIG_DIR")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe the toolkit and report connectivity, reboot and feature availability
    Status,

    /// Probe the toolkit and persist its hide flag
    Probe,

    /// Report whether this is the first run since boot (exit 1 if so)
    Boot,

    /// Stream network availability changes
    WatchNet(WatchNetArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct WatchNetArgs {
    /// Stop after this many changes
    #[arg(long)]
    events: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the resolved configuration (defaults included)
    Show,

    /// Validate a config file or directory
    Validate {
        /// config.toml file or directory containing one
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(
        LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet),
        None,
    );
    init_logging(&log_config);

    let ctx = LogContext::new(generate_run_id());
    log_event!(ctx, DEBUG, event_names::RUN_STARTED, Stage::Init, "rootenv started");

    let result = match &cli.command {
        Commands::Status => run_status(&cli.global),
        Commands::Probe => run_probe(&cli.global),
        Commands::Boot => run_boot(&cli.global),
        Commands::WatchNet(args) => run_watch_net(&cli.global, args),
        Commands::Config(args) => run_config(&cli.global, args),
        Commands::Version => {
            print_version(&cli.global);
            Ok(ExitCode::Clean)
        }
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            log_event!(ctx, DEBUG, event_names::INTERNAL_ERROR, Stage::Init, "command failed",
                code = e.code());
            output_error(&cli.global, &e)
        }
    };

    log_event!(ctx, DEBUG, event_names::RUN_FINISHED, Stage::Init, "rootenv finished",
        exit_code = exit_code.as_i32());
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Commands
// ============================================================================

fn load(global: &GlobalOpts) -> Result<ResolvedConfig, Error> {
    let options = ConfigOptions {
        config_dir: global.config.clone(),
    };
    Ok(load_config(&options)?)
}

fn run_status(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let resolved = load(global)?;
    let state = EnvironmentState::from_config(&resolved.config);
    let report = state.status()?;
    state.shutdown();

    let payload = json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": report.generated_at.to_rfc3339(),
        "status": serde_json::to_value(&report)?,
    });
    emit(
        global,
        &payload,
        || {
            format!(
                "{}\nnetwork: {} | new boot: {} | hide (persisted): {}\n\
                 features: toolkit sections {}, manager hide {}",
                report.snapshot.summary(),
                if report.connected { "up" } else { "down" },
                yes_no(report.new_boot),
                if report.hide_enabled { "on" } else { "off" },
                yes_no(report.availability.toolkit_sections),
                yes_no(report.availability.manager_hide),
            )
        },
        || {
            format!(
                "# Environment Status\n\n\
                 | Field | Value |\n|---|---|\n\
                 | Toolkit version | {} |\n| Version code | {} |\n| State | {} |\n\
                 | Root | {} |\n| Hide (persisted) | {} |\n| Network | {} |\n| New boot | {} |\n\
                 | Toolkit sections | {} |\n| Manager hide | {} |",
                display_version(&report.snapshot.version_string),
                report.snapshot.version_code,
                report.snapshot.state_label(),
                yes_no(report.snapshot.rooted),
                yes_no(report.hide_enabled),
                if report.connected { "up" } else { "down" },
                yes_no(report.new_boot),
                yes_no(report.availability.toolkit_sections),
                yes_no(report.availability.manager_hide),
            )
        },
    );
    Ok(ExitCode::Clean)
}

fn run_probe(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let resolved = load(global)?;
    let state = EnvironmentState::from_config(&resolved.config);
    let snapshot = state.environment_applied()?;

    let payload = json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "snapshot": serde_json::to_value(snapshot.as_ref())?,
    });
    emit(
        global,
        &payload,
        || snapshot.summary(),
        || {
            format!(
                "# Toolkit Probe\n\n- version: {}\n- version code: {} (reported {})\n\
                 - state: {}\n- hide: {}",
                display_version(&snapshot.version_string),
                snapshot.version_code,
                snapshot.raw_version_code,
                snapshot.state_label(),
                if snapshot.hide_enabled { "on" } else { "off" },
            )
        },
    );
    Ok(ExitCode::Clean)
}

fn run_boot(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let resolved = load(global)?;
    let boot_id_path = resolved.config.boot.boot_id_path.clone();
    let state = EnvironmentState::from_config(&resolved.config);
    let new_boot = state.is_new_boot();
    let boot_id = read_boot_id(&boot_id_path).ok();

    let payload = json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "new_boot": new_boot,
        "boot_id": boot_id,
        "boot_id_path": boot_id_path.display().to_string(),
    });
    emit(
        global,
        &payload,
        || format!("new boot: {}", yes_no(new_boot)),
        || format!("# Boot\n\n- new boot: {}", yes_no(new_boot)),
    );

    Ok(if new_boot {
        ExitCode::NewBoot
    } else {
        ExitCode::Clean
    })
}

fn run_watch_net(global: &GlobalOpts, args: &WatchNetArgs) -> Result<ExitCode, Error> {
    let resolved = load(global)?;
    let state = EnvironmentState::from_config(&resolved.config);
    let observer = state.connectivity();
    let changes = observer.subscribe()?;

    let deadline = args.timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last = observer.is_connected_within(resolved.config.connectivity.settle_timeout());
    print_net_event(global, last, "initial");

    let mut seen = 0usize;
    while args.events.map_or(true, |max| seen < max) {
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                deadline - now
            }
            None => Duration::from_secs(60),
        };
        match changes.recv_timeout(wait) {
            Ok(connected) if connected == last => {}
            Ok(connected) => {
                print_net_event(global, connected, "change");
                last = connected;
                seen += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    state.shutdown();
    Ok(ExitCode::Clean)
}

fn print_net_event(global: &GlobalOpts, connected: bool, kind: &str) {
    let ts = chrono::Utc::now().to_rfc3339();
    match global.format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let line = json!({ "ts": ts, "event": kind, "connected": connected });
            println!("{}", line);
        }
        OutputFormat::Summary => {
            println!("{} {} network {}", ts, kind, if connected { "up" } else { "down" });
        }
        OutputFormat::Md => {
            println!("- `{}` {}: network {}", ts, kind, if connected { "up" } else { "down" });
        }
    }
}

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> Result<ExitCode, Error> {
    match &args.command {
        ConfigCommands::Show => run_config_show(global),
        ConfigCommands::Validate { path } => run_config_validate(global, path.as_ref()),
    }
}

/// Display the current configuration (including defaults if no file present).
fn run_config_show(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let resolved = load(global)?;
    let toml_text = resolved
        .config
        .to_toml_string()
        .map_err(|e| Error::Config(e.to_string()))?;

    let payload = json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "config_dir": resolved.config_dir.display().to_string(),
        "source": {
            "path": resolved.path.as_ref().map(|p| p.display().to_string()),
            "using_defaults": resolved.path.is_none(),
        },
        "state_path": resolved.config.state.resolved_path().display().to_string(),
        "config": &resolved.config,
    });
    let source = resolved
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    emit(
        global,
        &payload,
        || format!("# source: {}\n{}", source, toml_text),
        || format!("# Configuration\n\nSource: {}\n\n```toml\n{}```", source, toml_text),
    );
    Ok(ExitCode::Clean)
}

fn run_config_validate(global: &GlobalOpts, path: Option<&PathBuf>) -> Result<ExitCode, Error> {
    let (config_path, _config): (Option<PathBuf>, AppConfig) = match path {
        Some(p) if p.is_dir() => {
            let resolved = load_config(&ConfigOptions {
                config_dir: Some(p.clone()),
            })?;
            (resolved.path, resolved.config)
        }
        Some(p) => (Some(p.clone()), AppConfig::from_file(p)?),
        None => {
            let resolved = load(global)?;
            (resolved.path, resolved.config)
        }
    };

    let shown = config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    let payload = json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "status": "valid",
        "path": config_path.as_ref().map(|p| p.display().to_string()),
    });
    emit(
        global,
        &payload,
        || format!("config OK: {}", shown),
        || format!("# Config Validation\n\n{}: valid", shown),
    );
    Ok(ExitCode::Clean)
}

fn print_version(global: &GlobalOpts) {
    let payload = json!({
        "schema_version": SCHEMA_VERSION,
        "rootenv_version": env!("CARGO_PKG_VERSION"),
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    });
    emit(
        global,
        &payload,
        || format!("rootenv {}\nschema version: {}", env!("CARGO_PKG_VERSION"), SCHEMA_VERSION),
        || format!("# rootenv {}\n\nschema version: {}", env!("CARGO_PKG_VERSION"), SCHEMA_VERSION),
    );
}

// ============================================================================
// Output helpers
// ============================================================================

fn emit(
    global: &GlobalOpts,
    payload: &Value,
    summary: impl FnOnce() -> String,
    md: impl FnOnce() -> String,
) {
    match global.format {
        OutputFormat::Json => println!("{}", pretty(payload)),
        OutputFormat::Jsonl => println!("{}", payload),
        OutputFormat::Summary => println!("{}", summary()),
        OutputFormat::Md => println!("{}", md()),
    }
}

fn output_error(global: &GlobalOpts, error: &Error) -> ExitCode {
    let exit_code = ExitCode::for_error(error);
    let structured = StructuredError::from(error).with_context("exit_code", exit_code.as_i32());

    match global.format {
        OutputFormat::Json => {
            let response = json!({
                "schema_version": SCHEMA_VERSION,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "error": structured,
            });
            eprintln!("{}", pretty(&response));
        }
        OutputFormat::Jsonl => eprintln!("{}", structured.to_json()),
        OutputFormat::Summary | OutputFormat::Md => eprintln!("{}", error.format_human()),
    }

    exit_code
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() {
        "unknown"
    } else {
        version
    }
}
