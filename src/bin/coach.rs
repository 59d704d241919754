//! Coach CLI - Command-line interface for Synheart Coach
//!
//! Commands:
//! - ingest: Run raw signals through the pipeline for one user (batch mode)
//! - validate: Normalize raw signals and report rejects
//! - assess: Assess a behavior stage from indicator values
//! - catalog: Print the built-in phenotype, playbook, lever or stage catalogs
//! - doctor: Diagnose configuration and catalog health

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_coach::config::CoachConfig;
use synheart_coach::intervention::{InterventionPlan, InterventionPlanSummary};
use synheart_coach::logging::init_logging;
use synheart_coach::phenotype::phenotypes;
use synheart_coach::stage::stage_profiles;
use synheart_coach::types::RawSignalInput;
use synheart_coach::{
    BehaviorStageAssessor, CoachError, Dashboard, Orchestrator, PlaybookCatalog,
    ProcessSignalsResult, SignalNormalizer, StageIndicators, COACH_VERSION, PRODUCER_NAME,
};

/// Coach - Signal-to-intervention engine for behavior-change coaching
#[derive(Parser)]
#[command(name = "coach")]
#[command(author = "Synheart AI Inc")]
#[command(version = COACH_VERSION)]
#[command(about = "Turn device readings into coaching interventions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run raw signals through the pipeline for one user
    Ingest {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// User the signals belong to
        #[arg(long)]
        user_id: String,

        /// Trajectory window in days
        #[arg(long)]
        window_days: Option<u32>,

        /// Stage indicators JSON file used for the assessment
        #[arg(long)]
        indicators: Option<PathBuf>,

        /// Also generate recommendations and activate a plan
        #[arg(long)]
        plan: bool,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Normalize raw signals and report rejects
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assess a behavior stage from indicator values
    Assess {
        #[arg(long, default_value = "cli-user")]
        user_id: String,

        /// Problem awareness (0-100)
        #[arg(long, default_value = "50")]
        awareness: f64,

        /// Motivation to change (0-100)
        #[arg(long, default_value = "50")]
        motivation: f64,

        /// Confidence in the ability to change (0-100)
        #[arg(long, default_value = "50")]
        self_efficacy: f64,

        /// Recent concrete actions
        #[arg(long, default_value = "0")]
        action_frequency: f64,

        /// Days the behavior has been sustained
        #[arg(long, default_value = "0")]
        days_maintained: f64,
    },

    /// Print a built-in catalog
    Catalog {
        #[arg(value_enum)]
        kind: CatalogKind,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and catalog health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one signal per line)
    Ndjson,
    /// JSON array of signals
    Json,
}

#[derive(Clone, ValueEnum)]
enum CatalogKind {
    Phenotypes,
    Playbooks,
    Levers,
    Stages,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CoachConfig::from_env();
    init_logging(&config.logging);

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let envelope = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{}", envelope);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: CoachConfig) -> Result<(), CoachCliError> {
    match cli.command {
        Commands::Ingest {
            input,
            output,
            input_format,
            user_id,
            window_days,
            indicators,
            plan,
            pretty,
        } => {
            let config = match window_days {
                Some(days) => config.with_trajectory_window_days(days),
                None => config,
            };
            cmd_ingest(
                &input,
                &output,
                input_format,
                &user_id,
                config,
                indicators.as_deref(),
                plan,
                pretty,
            )
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Assess {
            user_id,
            awareness,
            motivation,
            self_efficacy,
            action_frequency,
            days_maintained,
        } => {
            let indicators = StageIndicators {
                awareness,
                motivation,
                self_efficacy,
                action_frequency,
                days_maintained,
            };
            let assessment = BehaviorStageAssessor::new().assess_stage(&user_id, &indicators);
            println!("{}", serde_json::to_string_pretty(&assessment)?);
            Ok(())
        }

        Commands::Catalog { kind, json } => cmd_catalog(kind, json),

        Commands::Doctor { json } => cmd_doctor(config, json),
    }
}

fn read_input(input: &Path) -> Result<String, CoachCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_signals(data: &str, format: InputFormat) -> Result<Vec<RawSignalInput>, CoachCliError> {
    let signals = match format {
        InputFormat::Json => serde_json::from_str::<Vec<RawSignalInput>>(data)?,
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<RawSignalInput>(line.trim()).map_err(|e| {
                    CoachCliError::ParseError(format!("line {}: {}", n + 1, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    if signals.is_empty() {
        return Err(CoachCliError::NoSignals);
    }
    Ok(signals)
}

#[allow(clippy::too_many_arguments)]
fn cmd_ingest(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    user_id: &str,
    config: CoachConfig,
    indicators: Option<&Path>,
    plan: bool,
    pretty: bool,
) -> Result<(), CoachCliError> {
    let signals = parse_signals(&read_input(input)?, input_format)?;
    let indicators = match indicators {
        Some(path) => Some(serde_json::from_str::<StageIndicators>(&fs::read_to_string(path)?)?),
        None => None,
    };

    let orchestrator = Orchestrator::from_config(config);
    orchestrator.initialize()?;

    let processed = orchestrator.process_signals(user_id, &signals)?;
    if !processed.success {
        return Err(CoachCliError::NoSignals);
    }

    let (intervention, active_plan) = if plan || indicators.is_some() {
        let summary = orchestrator.generate_intervention(user_id, indicators.as_ref())?;
        let active = if plan {
            orchestrator.activate_intervention_plan(user_id, None)?
        } else {
            None
        };
        (summary, active)
    } else {
        (None, None)
    };

    let report = IngestReport {
        producer: PRODUCER_NAME,
        version: COACH_VERSION,
        processed,
        intervention,
        plan: active_plan,
        dashboard: orchestrator.get_dashboard(user_id)?,
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };

    if output.to_string_lossy() == "-" {
        println!("{}", rendered);
    } else {
        fs::write(output, rendered + "\n")?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), CoachCliError> {
    let signals = parse_signals(&read_input(input)?, input_format)?;
    let batch = SignalNormalizer::normalize_batch(&signals);

    let report = ValidationReport {
        total_signals: signals.len(),
        valid_signals: batch.statistics.valid_count,
        noise_signals: batch.statistics.noise_count,
        invalid_signals: batch.errors.len(),
        errors: batch.errors.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total signals:   {}", report.total_signals);
        println!("Valid signals:   {}", report.valid_signals);
        println!("  of which noise: {}", report.noise_signals);
        println!("Invalid signals: {}", report.invalid_signals);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Signal {}: {}", err.index, err.error);
            }
        }
    }

    if report.invalid_signals > 0 {
        Err(CoachCliError::ValidationFailed(report.invalid_signals))
    } else {
        Ok(())
    }
}

fn cmd_catalog(kind: CatalogKind, json: bool) -> Result<(), CoachCliError> {
    let playbooks = PlaybookCatalog::builtin();

    if json {
        let rendered = match kind {
            CatalogKind::Phenotypes => serde_json::to_string_pretty(phenotypes())?,
            CatalogKind::Playbooks => serde_json::to_string_pretty(playbooks.playbooks())?,
            CatalogKind::Levers => serde_json::to_string_pretty(playbooks.levers())?,
            CatalogKind::Stages => serde_json::to_string_pretty(stage_profiles())?,
        };
        println!("{}", rendered);
        return Ok(());
    }

    match kind {
        CatalogKind::Phenotypes => {
            for p in phenotypes() {
                println!("{:<28} {} ({:?} risk)", p.id, p.name, p.risk_level);
                println!("    levers: {}", p.recommended_levers.join(", "));
            }
        }
        CatalogKind::Playbooks => {
            for p in playbooks.playbooks() {
                let stages: Vec<&str> = p.target_stages.iter().map(|s| s.as_str()).collect();
                println!("{:<26} {}", p.id, p.name);
                println!("    phenotypes: {}", p.target_phenotypes.join(", "));
                println!("    stages:     {}", stages.join(", "));
                println!("    levers:     {}", p.levers.join(", "));
            }
        }
        CatalogKind::Levers => {
            for l in playbooks.levers() {
                println!(
                    "{:<22} {} [{:?}, {} days]",
                    l.id, l.name, l.frequency, l.duration_days
                );
            }
        }
        CatalogKind::Stages => {
            for s in stage_profiles() {
                println!("{:<18} {} - {}", s.stage.as_str(), s.name, s.focus);
                println!("    {}", s.description);
            }
        }
    }

    Ok(())
}

fn cmd_doctor(config: CoachConfig, json: bool) -> Result<(), CoachCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "coach_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Coach version {}", COACH_VERSION),
    });

    let config_status = if config.max_recommendations == 0 || config.immediate_actions_cap == 0 {
        CheckStatus::Warning
    } else {
        CheckStatus::Ok
    };
    checks.push(DoctorCheck {
        name: "config".to_string(),
        status: config_status,
        message: format!(
            "window {} days, session max age {} h, {} recommendations, {} immediate actions",
            config.trajectory_window_days,
            config.session_max_age_hours,
            config.max_recommendations,
            config.immediate_actions_cap
        ),
    });

    // Catalog integrity is what initialize validates
    let orchestrator = Orchestrator::from_config(config);
    checks.push(match orchestrator.initialize() {
        Ok(()) => DoctorCheck {
            name: "catalogs".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} phenotypes, {} playbooks, {} levers",
                phenotypes().len(),
                PlaybookCatalog::builtin().playbooks().len(),
                PlaybookCatalog::builtin().levers().len()
            ),
        },
        Err(e) => DoctorCheck {
            name: "catalogs".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input FILE)".to_string(),
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
        version: COACH_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Coach Doctor Report");
        println!("===================");
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
        Err(CoachCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum CoachCliError {
    Io(io::Error),
    Coach(CoachError),
    Json(serde_json::Error),
    NoSignals,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for CoachCliError {
    fn from(e: io::Error) -> Self {
        CoachCliError::Io(e)
    }
}

impl From<CoachError> for CoachCliError {
    fn from(e: CoachError) -> Self {
        CoachCliError::Coach(e)
    }
}

impl From<serde_json::Error> for CoachCliError {
    fn from(e: serde_json::Error) -> Self {
        CoachCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CoachCliError> for CliError {
    fn from(e: CoachCliError) -> Self {
        match e {
            CoachCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CoachCliError::Coach(e) => CliError {
                code: "COACH_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CoachCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CoachCliError::NoSignals => CliError {
                code: "NO_SIGNALS".to_string(),
                message: "No usable signals found in input".to_string(),
                hint: Some("Run 'coach validate' for details".to_string()),
            },
            CoachCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} signals failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            CoachCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            CoachCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each NDJSON line must be one raw signal object".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct IngestReport {
    producer: &'static str,
    version: &'static str,
    processed: ProcessSignalsResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    intervention: Option<InterventionPlanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<InterventionPlan>,
    dashboard: Dashboard,
}

#[derive(Serialize)]
struct ValidationReport {
    total_signals: usize,
    valid_signals: usize,
    noise_signals: usize,
    invalid_signals: usize,
    errors: Vec<synheart_coach::normalizer::BatchItemError>,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
