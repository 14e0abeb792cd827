//! Stellar CLI - Command-line interface for Stellar Screen
//!
//! Commands:
//! - config: Print the difficulty configuration for an age
//! - simulate: Play all three games with a scripted player
//! - aggregate: Merge session records into the canonical feature row
//! - export: Render the local CSV export of session records
//! - predict: Send aggregated records to the prediction endpoint
//! - doctor: Diagnose prediction configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use stellar_screen::config::{validate_age, GameConfig};
use stellar_screen::export::{ExportOptions, DEFAULT_MISSING_RATE};
use stellar_screen::predict::{PredictionClient, PredictionConfig, PredictionEncoding};
use stellar_screen::sim::{simulate_screening, PlayerProfile};
use stellar_screen::types::{GameKind, SessionMetrics};
use stellar_screen::{codec, ScreeningError, ScreeningSession};
use stellar_screen::{PRODUCER_NAME, STELLAR_VERSION};
use tracing_subscriber::EnvFilter;

/// Stellar - scoring engine for game-based attention screening
#[derive(Parser)]
#[command(name = "stellar")]
#[command(version = STELLAR_VERSION)]
#[command(about = "Score attention-screening minigames and request predictions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the difficulty configuration for an age
    Config {
        /// Child's age in years (4-17)
        #[arg(long, allow_hyphen_values = true)]
        age: i64,

        /// Only print this game's configuration
        #[arg(long, value_enum)]
        game: Option<GameArg>,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Play all three games with a scripted player and print the records
    Simulate {
        /// Child's age in years (4-17)
        #[arg(long, allow_hyphen_values = true)]
        age: i64,

        /// Player behaviour
        #[arg(long, value_enum, default_value = "attentive")]
        profile: ProfileArg,

        /// Seed for the player and the game engines
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Merge session records into the canonical feature row
    Aggregate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Row encoding
        #[arg(long, default_value = "csv")]
        format: RowFormat,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Render the local CSV export of session records
    Export {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Value written to the adhd_status column
        #[arg(long, default_value = "0")]
        label: f64,

        /// Blank random fields to produce test data with missing values
        #[arg(long)]
        missing_values: bool,

        /// Per-field blanking probability (implies --missing-values)
        #[arg(long)]
        missing_rate: Option<f64>,

        /// Seed for missing-value simulation
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Send aggregated records to the prediction endpoint
    Predict {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Endpoint URL (overrides STELLAR_PREDICT_URL)
        #[arg(long)]
        url: Option<String>,

        /// Payload encoding (overrides STELLAR_PREDICT_ENCODING)
        #[arg(long)]
        encoding: Option<RowFormat>,

        /// Request timeout in milliseconds (overrides STELLAR_PREDICT_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Diagnose prediction configuration and environment
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GameArg {
    TargetPop,
    SignalGating,
    ThreatLock,
}

impl From<GameArg> for GameKind {
    fn from(game: GameArg) -> Self {
        match game {
            GameArg::TargetPop => GameKind::TargetPop,
            GameArg::SignalGating => GameKind::SignalGating,
            GameArg::ThreatLock => GameKind::ThreatLock,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    Attentive,
    Impulsive,
    Inattentive,
}

impl From<ProfileArg> for PlayerProfile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::Attentive => PlayerProfile::Attentive,
            ProfileArg::Impulsive => PlayerProfile::Impulsive,
            ProfileArg::Inattentive => PlayerProfile::Inattentive,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one session record per line)
    Ndjson,
    /// JSON array of session records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one session record per line)
    Ndjson,
    /// JSON array of session records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum RowFormat {
    /// Header line plus one data line
    Csv,
    /// JSON object keyed by feature name
    Json,
}

impl From<RowFormat> for PredictionEncoding {
    fn from(format: RowFormat) -> Self {
        match format {
            RowFormat::Csv => PredictionEncoding::Csv,
            RowFormat::Json => PredictionEncoding::Json,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine readable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), StellarCliError> {
    match cli.command {
        Commands::Config { age, game, pretty } => cmd_config(age, game, pretty),

        Commands::Simulate {
            age,
            profile,
            seed,
            output,
            output_format,
        } => cmd_simulate(age, profile.into(), seed, &output, &output_format),

        Commands::Aggregate {
            input,
            input_format,
            format,
            output,
        } => cmd_aggregate(&input, &input_format, format, &output),

        Commands::Export {
            input,
            input_format,
            label,
            missing_values,
            missing_rate,
            seed,
            output,
        } => {
            let missing_rate = match (missing_rate, missing_values) {
                (Some(rate), _) => Some(rate),
                (None, true) => Some(DEFAULT_MISSING_RATE),
                (None, false) => None,
            };
            let options = ExportOptions {
                label_placeholder: label,
                missing_rate,
                seed,
            };
            cmd_export(&input, &input_format, &options, &output)
        }

        Commands::Predict {
            input,
            input_format,
            url,
            encoding,
            timeout_ms,
        } => cmd_predict(&input, &input_format, url, encoding, timeout_ms),

        Commands::Doctor { json } => cmd_doctor(json),
    }
}

fn cmd_config(age: i64, game: Option<GameArg>, pretty: bool) -> Result<(), StellarCliError> {
    validate_age(age)?;
    let value = match game {
        Some(game) => serde_json::to_value(GameConfig::resolve(game.into(), age))?,
        None => serde_json::to_value(GameConfig::resolve_all(age))?,
    };
    if pretty {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", serde_json::to_string(&value)?);
    }
    Ok(())
}

fn cmd_simulate(
    age: i64,
    profile: PlayerProfile,
    seed: u64,
    output: &Path,
    output_format: &OutputFormat,
) -> Result<(), StellarCliError> {
    let session = simulate_screening(age, profile, seed)?;
    tracing::info!(
        screening_id = %session.id(),
        %profile,
        seed,
        "simulated screening"
    );
    let output_data = format_output(session.records(), output_format)?;
    write_output(output, &output_data)
}

fn cmd_aggregate(
    input: &Path,
    input_format: &InputFormat,
    format: RowFormat,
    output: &Path,
) -> Result<(), StellarCliError> {
    let session = load_session(input, input_format)?;
    let row = session.aggregate();
    let output_data = match format {
        RowFormat::Csv => codec::to_csv(&row)?,
        RowFormat::Json => codec::to_json(&row)? + "\n",
    };
    write_output(output, &output_data)
}

fn cmd_export(
    input: &Path,
    input_format: &InputFormat,
    options: &ExportOptions,
    output: &Path,
) -> Result<(), StellarCliError> {
    let session = load_session(input, input_format)?;
    let output_data = session.export_csv(options)?;
    write_output(output, &output_data)
}

fn cmd_predict(
    input: &Path,
    input_format: &InputFormat,
    url: Option<String>,
    encoding: Option<RowFormat>,
    timeout_ms: Option<u64>,
) -> Result<(), StellarCliError> {
    let session = load_session(input, input_format)?;

    let mut config = PredictionConfig::from_env()?;
    if let Some(url) = url {
        config = config.with_endpoint(url);
    }
    if let Some(encoding) = encoding {
        config = config.with_encoding(encoding.into());
    }
    if let Some(ms) = timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }

    let client = PredictionClient::new(config)?;
    let result = session.predict(&client)?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn cmd_doctor(json: bool) -> Result<(), StellarCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "stellar_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Stellar version {}", STELLAR_VERSION),
    });

    match PredictionConfig::from_env() {
        Ok(config) => {
            checks.push(match &config.endpoint {
                Some(endpoint) => DoctorCheck {
                    name: "prediction_endpoint".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} ({}, timeout {} ms)",
                        endpoint,
                        config.encoding.as_str(),
                        config.timeout.as_millis()
                    ),
                },
                None => DoctorCheck {
                    name: "prediction_endpoint".to_string(),
                    status: CheckStatus::Warning,
                    message: "STELLAR_PREDICT_URL is not set; predict needs --url".to_string(),
                },
            });
        }
        Err(e) => checks.push(DoctorCheck {
            name: "prediction_endpoint".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass records with --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: STELLAR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Stellar Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(StellarCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn read_input(input: &Path) -> Result<String, StellarCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), StellarCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn parse_records(data: &str, format: &InputFormat) -> Result<Vec<SessionMetrics>, StellarCliError> {
    match format {
        InputFormat::Ndjson => {
            let mut records = Vec::new();
            for (line_no, line) in data.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record = serde_json::from_str(line).map_err(|e| {
                    StellarCliError::ParseError(format!("line {}: {}", line_no + 1, e))
                })?;
                records.push(record);
            }
            Ok(records)
        }
        InputFormat::Json => Ok(serde_json::from_str(data)?),
    }
}

/// Collect records into a screening; all records must share one age
fn load_session(input: &Path, format: &InputFormat) -> Result<ScreeningSession, StellarCliError> {
    let records = parse_records(&read_input(input)?, format)?;
    let Some(first) = records.first() else {
        return Err(StellarCliError::NoRecords);
    };

    let mut session = ScreeningSession::new(first.age as i64)?;
    for record in records {
        session.record(record)?;
    }
    Ok(session)
}

fn format_output(records: &[SessionMetrics], format: &OutputFormat) -> Result<String, StellarCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error handling

#[derive(Debug)]
enum StellarCliError {
    Io(io::Error),
    Screening(ScreeningError),
    Json(serde_json::Error),
    NoRecords,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for StellarCliError {
    fn from(e: io::Error) -> Self {
        StellarCliError::Io(e)
    }
}

impl From<ScreeningError> for StellarCliError {
    fn from(e: ScreeningError) -> Self {
        StellarCliError::Screening(e)
    }
}

impl From<serde_json::Error> for StellarCliError {
    fn from(e: serde_json::Error) -> Self {
        StellarCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StellarCliError> for CliError {
    fn from(e: StellarCliError) -> Self {
        match e {
            StellarCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StellarCliError::Screening(e) => screening_error(e),
            StellarCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StellarCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No session records found in input".to_string(),
                hint: Some("Generate records with 'stellar simulate'".to_string()),
            },
            StellarCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report above".to_string()),
            },
            StellarCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be one session record".to_string()),
            },
        }
    }
}

fn screening_error(e: ScreeningError) -> CliError {
    let retryable = e.is_retryable();
    let (code, hint) = match &e {
        ScreeningError::AgeOutOfRange(_) => ("AGE_OUT_OF_RANGE", Some("Ages 4 to 17 are supported")),
        ScreeningError::AgeMismatch { .. } => (
            "AGE_MISMATCH",
            Some("Every record in a screening must come from the same age"),
        ),
        ScreeningError::SessionNotFinished(_) => (
            "SESSION_NOT_FINISHED",
            Some("Record all three games before predicting"),
        ),
        ScreeningError::ConfigError(_) => (
            "CONFIG_ERROR",
            Some("Run 'stellar doctor' to inspect the configuration"),
        ),
        ScreeningError::PredictionTransport(_)
        | ScreeningError::PredictionStatus { .. }
        | ScreeningError::InvalidPrediction(_) => ("PREDICTION_FAILED", None),
        ScreeningError::JsonError(_) => ("JSON_ERROR", Some("Check JSON syntax")),
        _ => ("PAYLOAD_ERROR", None),
    };
    let hint = if retryable {
        Some("The prediction service may be starting up; try again".to_string())
    } else {
        hint.map(str::to_string)
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint,
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
