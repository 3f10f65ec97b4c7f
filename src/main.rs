use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use msv::artifacts::{read_pid_file, token_is_set, RunLog};
use msv::config::{load_endpoint, ConfigError, Settings};
use msv::daemon::{self, Daemonized};
use msv::error::VerifierError;
use msv::health::mongodb::TcpConnector;
use msv::{RunSummary, Verifier};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "master_slave_verifier")]
#[command(about = "Wait in the background until a MongoDB replica set member is reachable")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detach and poll the endpoint until it accepts connections
    Run {
        #[command(flatten)]
        overrides: Overrides,
        /// Stay in the foreground (no fork, no new session)
        #[arg(long)]
        foreground: bool,
    },
    /// Generate an example settings file
    Settings {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate the settings and show the endpoint that would be monitored
    Validate {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Show version information
    Version,
}

#[derive(clap::Args)]
struct Overrides {
    /// TOML settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,
    /// Endpoint file (address=, port=)
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    pid_file: Option<PathBuf>,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    token_file: Option<PathBuf>,
    /// Seconds between connection attempts
    #[arg(long)]
    interval_secs: Option<u64>,
    /// Give up after this many attempts
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl Overrides {
    fn resolve(self) -> Result<Settings, ConfigError> {
        let mut settings = match &self.settings {
            Some(path) => Settings::load_from_file(path)?,
            None => Settings::default(),
        };

        let artifacts = &mut settings.artifacts;
        if let Some(path) = self.config {
            artifacts.config_file = path;
        }
        if let Some(path) = self.pid_file {
            artifacts.pid_file = path;
        }
        if let Some(path) = self.log_file {
            artifacts.log_file = path;
        }
        if let Some(path) = self.token_file {
            artifacts.token_file = path;
        }
        if let Some(secs) = self.interval_secs {
            settings.retry.interval_sec = secs;
            settings.retry.max_interval_sec = settings.retry.max_interval_sec.max(secs);
        }
        if let Some(max) = self.max_attempts {
            settings.retry.max_attempts = Some(max);
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            overrides,
            foreground,
        } => run_verifier(overrides, foreground),
        Commands::Settings { output } => generate_settings(output),
        Commands::Validate { overrides } => validate_settings(overrides),
        Commands::Version => {
            show_version();
            Ok(0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_verifier(overrides: Overrides, foreground: bool) -> anyhow::Result<u8> {
    let mut settings = overrides.resolve().context("Failed to load settings")?;
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    settings.absolutize(&cwd);

    if foreground {
        init_logging(&settings, None);
        let pid = daemon::record_foreground(&settings.artifacts.pid_file)?;
        info!("Running in the foreground as pid {}", pid);
    } else {
        match daemon::daemonize(&settings.artifacts.pid_file)? {
            Daemonized::Launcher { child } => {
                println!("process_id of child process {}", child);
                return Ok(0);
            }
            Daemonized::Worker => {}
        }
    }

    // Only the worker reaches this point.
    let run_log = RunLog::open_or_disabled(&settings.artifacts.log_file);
    if !foreground {
        init_logging(&settings, run_log.try_clone_file());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    let outcome: Result<RunSummary, VerifierError> = runtime.block_on(async {
        let shutdown = daemon::shutdown_on_signals()?;
        let connector = TcpConnector::new(settings.retry.connect_timeout());
        Verifier::new(settings).run(&connector, run_log, shutdown).await
    });

    match outcome {
        Ok(summary) => {
            info!(
                "{} reachable after {} attempt(s), token published",
                summary.endpoint, summary.attempts
            );
            Ok(0)
        }
        Err(e) => {
            log_ending(&e);
            Ok(e.exit_code() as u8)
        }
    }
}

fn log_ending(e: &VerifierError) {
    match e.exit_code() {
        0 => info!("[{}] {}", e.severity(), e),
        _ => error!("[{}] {}", e.severity(), e),
    }
    if e.is_recoverable() && e.exit_code() != 0 {
        info!("Relaunch the verifier to keep waiting for the endpoint");
    }
}

fn generate_settings(output: PathBuf) -> anyhow::Result<u8> {
    println!("Generating settings file: {:?}", output);

    Settings::create_example_settings(&output)
        .with_context(|| format!("Failed to generate settings at {:?}", output))?;

    println!("Settings file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  master_slave_verifier run --settings {:?}", output);

    Ok(0)
}

fn validate_settings(overrides: Overrides) -> anyhow::Result<u8> {
    let settings = match overrides.resolve() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("✗ Settings validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Ok(1);
        }
    };

    let (endpoint, report) = load_endpoint(&settings.artifacts.config_file);
    println!("✓ Settings are valid");
    println!("  Endpoint file: {:?}", settings.artifacts.config_file);
    for issue in &report.issues {
        println!("    ! {}", issue);
    }
    println!("  Endpoint: {}", endpoint);
    match read_pid_file(&settings.artifacts.pid_file) {
        Some(pid) => println!("  PID file: {:?} (pid {})", settings.artifacts.pid_file, pid),
        None => println!("  PID file: {:?}", settings.artifacts.pid_file),
    }
    println!("  Log file: {:?}", settings.artifacts.log_file);
    println!(
        "  Token file: {:?} ({})",
        settings.artifacts.token_file,
        if token_is_set(&settings.artifacts.token_file) {
            "set"
        } else {
            "not set"
        }
    );
    println!(
        "  Retry: every {}s, multiplier {}, cap {}s, {}",
        settings.retry.interval_sec,
        settings.retry.multiplier,
        settings.retry.max_interval_sec,
        match settings.retry.max_attempts {
            Some(max) => format!("at most {} attempts", max),
            None => "unbounded".to_string(),
        }
    );

    Ok(0)
}

fn show_version() {
    println!("master_slave_verifier v{}", env!("CARGO_PKG_VERSION"));
    println!("Waits for a MongoDB replica set member and publishes a reachability token");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
}

/// Ambient logging: stderr in the foreground, the run log file when detached
fn init_logging(settings: &Settings, log_file: Option<std::fs::File>) {
    let log_level = match settings.logging.level.as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).parse_default_env();
    if let Some(file) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    if builder.try_init().is_ok() {
        info!("Logging initialized at level: {:?}", log_level);
    }
}
