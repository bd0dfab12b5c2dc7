use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::PathBuf;

use biva::error::ErrorSeverity;
use biva::history::HistoryStore;
use biva::logging::{init_logging, LogFormat, LogLevel};
use biva::report::{render_kpi_table, PatientProfile, ReportPayload};
use biva::trend::{AsymmetrySide, TrendAnalyzer, TrendDirection};
use biva::{AppConfig, HistoryEntry, MetricsEngine, MetricsOutcome, Sex};

/// biva - Bioimpedance body-composition CLI
///
/// Computes body-composition metrics from resistance/reactance readings,
/// compares them with the patient's previous visit and checks bilateral
/// phase-angle asymmetry.
#[derive(Parser)]
#[command(name = "biva")]
#[command(version)]
#[command(about = "Bioimpedance body-composition analysis", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute metrics for a visit and compare with history
    Compute {
        /// Resistance Rz in ohms (right side in bilateral mode)
        #[arg(long)]
        rz: f64,

        /// Reactance Xc in ohms (right side in bilateral mode)
        #[arg(long)]
        xc: f64,

        /// Height in centimeters
        #[arg(long)]
        height: f64,

        /// Weight in kilograms
        #[arg(long)]
        weight: f64,

        /// Age in years
        #[arg(long)]
        age: u32,

        /// Sex (M or F)
        #[arg(long)]
        sex: Sex,

        /// Left-side resistance, enables bilateral mode
        #[arg(long, requires = "xc_left")]
        rz_left: Option<f64>,

        /// Left-side reactance
        #[arg(long, requires = "rz_left")]
        xc_left: Option<f64>,

        /// Patient name used to look up and archive visits
        #[arg(short, long)]
        patient: Option<String>,

        /// History CSV (defaults to the configured archive)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Activity or sport
        #[arg(long)]
        activity: Option<String>,

        /// Clinical notes passed to the report payload
        #[arg(long)]
        notes: Option<String>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Write the report payload JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append this visit to the archive
        #[arg(long, requires = "patient")]
        archive: bool,
    },

    /// Show a patient's archived visits
    History {
        /// Patient name
        #[arg(short, long)]
        patient: String,

        /// History CSV (defaults to the configured archive)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show or initialise the configuration file
    Config {
        /// Print the effective configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_file(path),
        None => Ok(AppConfig::load_or_default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let mut log_config = config.logging.clone();
    if cli.verbose > 0 {
        log_config.level = LogLevel::from_verbosity(cli.verbose);
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config)?;

    match cli.command {
        Commands::Compute {
            rz,
            xc,
            height,
            weight,
            age,
            sex,
            rz_left,
            xc_left,
            patient,
            history,
            activity,
            notes,
            format,
            output,
            archive,
        } => {
            let profile = PatientProfile {
                name: patient.clone().unwrap_or_default(),
                sex,
                age_years: age,
                height_cm: height,
                weight_kg: weight,
                activity,
                clinical_notes: notes,
            };

            let engine = MetricsEngine::with_config(config.engine.clone());
            let analyzer = TrendAnalyzer::with_config(config.trend.clone());

            let measurement = profile.measurement(rz, xc);
            let (right, left) = match (rz_left, xc_left) {
                (Some(rz_left), Some(xc_left)) => {
                    let (right, left) = engine.compute_bilateral(&measurement, rz_left, xc_left);
                    (right, Some(left))
                }
                _ => (engine.compute(&measurement), None),
            };

            let primary = match right {
                MetricsOutcome::Valid(record) => record,
                MetricsOutcome::Degraded { reason, .. } => {
                    eprintln!(
                        "{}",
                        format!("✗ Cannot compute metrics: {}", reason.description()).red()
                    );
                    std::process::exit(2);
                }
            };

            let contralateral = match left {
                Some(MetricsOutcome::Valid(record)) => Some(record),
                Some(MetricsOutcome::Degraded { reason, .. }) => {
                    eprintln!(
                        "{}",
                        format!("⚠ Left side ignored: {}", reason.description()).yellow()
                    );
                    None
                }
                None => None,
            };

            let store = HistoryStore::new(
                history.unwrap_or_else(|| config.history.archive_path.clone()),
            );
            let visits: Vec<HistoryEntry> = match &patient {
                Some(name) => match store.load_patient(name) {
                    Ok(visits) => visits,
                    Err(err) if err.severity() == ErrorSeverity::Warning => {
                        tracing::warn!(error = %err, "History unavailable");
                        eprintln!("{}", err.user_message().dimmed());
                        Vec::new()
                    }
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("Failed to read history {}", store.path().display())
                        })
                    }
                },
                None => Vec::new(),
            };

            let trend = analyzer.analyze(&primary, &visits, contralateral.as_ref());
            let previous = TrendAnalyzer::latest(&visits);

            if archive {
                if let Some(name) = &patient {
                    store
                        .append_visit(name, Local::now().date_naive(), &primary)
                        .with_context(|| {
                            format!("Failed to archive visit to {}", store.path().display())
                        })?;
                }
            }

            let payload = ReportPayload::new(profile, primary, contralateral, trend);

            if let Some(path) = &output {
                payload
                    .export_json(path)
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
            }

            match format {
                OutputFormat::Json => println!("{}", payload.to_json()?),
                OutputFormat::Table => print_summary(&payload, previous),
            }

            if archive {
                println!("{}", "✓ Visit archived".green());
            }
        }

        Commands::History { patient, file } => {
            let store = HistoryStore::new(file.unwrap_or(config.history.archive_path));
            let visits = store
                .load_patient(&patient)
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;

            if visits.is_empty() {
                println!("{}", format!("No visits for {}", patient).yellow());
            }
            for visit in &visits {
                let values: Vec<String> = visit
                    .values
                    .iter()
                    .map(|(metric, value)| format!("{}={}", metric, value))
                    .collect();
                println!("{}  {}", visit.date_text.bold(), values.join("  "));
            }
        }

        Commands::Config { show, init } => {
            let path = cli.config.unwrap_or_else(AppConfig::default_config_path);
            if init {
                AppConfig::default().save_to_file(&path)?;
                println!("{}", format!("✓ Wrote {}", path.display()).green());
            }
            if show || !init {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn print_summary(payload: &ReportPayload, previous: Option<&HistoryEntry>) {
    let header = if payload.patient.name.is_empty() {
        "BODY COMPOSITION".to_string()
    } else {
        format!("BODY COMPOSITION: {}", payload.patient.name)
    };
    println!("{}", header.bold());

    match previous {
        Some(visit) => println!("Baseline: {}", visit.date_text),
        None => println!("{}", "Baseline: none (first visit)".dimmed()),
    }

    println!("{}", render_kpi_table(&payload.primary, previous, &payload.trend.deltas));

    for (metric, direction) in &payload.trend.directions {
        let label = match direction {
            TrendDirection::Improving => "improving".green(),
            TrendDirection::Worsening => "worsening".red(),
            TrendDirection::Stable => "stable".normal(),
            TrendDirection::Unrated => "changed".normal(),
        };
        println!("  {:<8} {}", metric.to_string(), label);
    }

    if let Some(asymmetry) = &payload.trend.asymmetry {
        let message = format!(
            "PhA asymmetry {:+.2}° ({:+.1}%)",
            asymmetry.diff_degrees, asymmetry.relative_percent
        );
        match asymmetry.side_flagged {
            AsymmetrySide::None => println!("{}", format!("✓ {}, symmetric", message).green()),
            AsymmetrySide::Left => println!("{}", format!("⚠ {}, left side deficient", message).yellow()),
            AsymmetrySide::Right => println!("{}", format!("⚠ {}, right side deficient", message).yellow()),
        }
    }
}
