mod classes;
mod config;
mod scenarios;

use std::{
    fmt::{self, Display},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::*;
use peerref_core::{attach, context::BackendKind};
use peerref_vm::{Runtime, RuntimeStats};
use serde::Serialize;

use scenarios::{Outcome, Report, SCENARIOS};

#[derive(Parser, Debug)]
#[command(name = "peerref", version, about = "Runs handle scenarios against a managed runtime")]
struct Cli {
    /// Where new peers live
    #[arg(long, value_enum, default_value_t = Backend::Managed, global = true)]
    backend: Backend,

    /// Runtime configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Human, global = true)]
    format: Format,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in scenarios
    List,
    /// Run scenarios by name (all of them when none are given)
    Run { scenarios: Vec<String> },
    /// Run every scenario and print runtime statistics
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Managed,
    Native,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Managed => BackendKind::Managed,
            Backend::Native => BackendKind::Native,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Human,
    Json,
}

#[derive(Debug)]
pub enum CliError {
    Config { path: PathBuf, message: String },
    UnknownScenario(String),
    Failed(usize),
    Json(serde_json::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config { path, message } => {
                write!(f, "Invalid configuration {}: {}", path.display(), message)
            }
            CliError::UnknownScenario(name) => {
                write!(f, "Unknown scenario '{}' (try `peerref list`)", name)
            }
            CliError::Failed(count) => write!(f, "{} scenario run(s) failed", count),
            CliError::Json(err) => write!(f, "JSON Error: {}", err),
        }
    }
}

impl std::error::Error for CliError {}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Json(err)
    }
}

#[derive(Serialize)]
struct RunOutput<'a> {
    reports: &'a [Report],
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a RuntimeStats>,
}

#[cfg(feature = "logging")]
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}

#[cfg(not(feature = "logging"))]
fn init_logging(_verbose: u8) {}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::List => {
            list(cli.format)?;
            Ok(())
        }
        Command::Run { scenarios } => {
            let selected = select(scenarios)?;
            run(cli, &selected, false)
        }
        Command::Stats => {
            let all: Vec<_> = SCENARIOS.iter().collect();
            run(cli, &all, true)
        }
    }
}

fn select(names: &[String]) -> Result<Vec<&'static scenarios::Scenario>, CliError> {
    if names.is_empty() {
        return Ok(SCENARIOS.iter().collect());
    }
    names
        .iter()
        .map(|name| scenarios::find(name).ok_or_else(|| CliError::UnknownScenario(name.clone())))
        .collect()
}

fn list(format: Format) -> Result<(), CliError> {
    match format {
        Format::Json => {
            let names: Vec<_> = SCENARIOS
                .iter()
                .map(|s| serde_json::json!({ "name": s.name, "summary": s.summary }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&names)?);
        }
        Format::Human => {
            for scenario in SCENARIOS {
                println!("{:<18} {}", scenario.name.cyan().bold(), scenario.summary.dimmed());
            }
        }
    }
    Ok(())
}

fn run(cli: &Cli, selected: &[&scenarios::Scenario], with_stats: bool) -> Result<(), CliError> {
    let runtime_config = config::load_config(cli.config.as_deref())?;
    let runtime = Runtime::new(runtime_config);
    attach::set_vm(Some(Arc::clone(&runtime)));

    let backend = BackendKind::from(cli.backend);
    let reports: Vec<Report> = selected
        .iter()
        .map(|scenario| scenarios::run(scenario, &runtime, backend))
        .collect();
    runtime.collect();
    let stats = with_stats.then(|| runtime.stats());

    match cli.format {
        Format::Json => {
            let output = RunOutput {
                reports: &reports,
                stats: stats.as_ref(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Human => {
            for report in &reports {
                print_report(report);
            }
            if let Some(stats) = &stats {
                print_stats(stats);
            }
        }
    }

    attach::detach_current_thread();
    attach::set_vm(None);

    let failed = reports
        .iter()
        .filter(|report| report.outcome == Outcome::Failed)
        .count();
    if failed > 0 {
        return Err(CliError::Failed(failed));
    }
    Ok(())
}

fn print_report(report: &Report) {
    let status = match report.outcome {
        Outcome::Passed => report.outcome.to_string().green().bold(),
        Outcome::Failed => report.outcome.to_string().red().bold(),
    };
    println!(
        "{} {} [{}]",
        status,
        report.scenario.cyan().bold(),
        report.backend.dimmed()
    );
    for step in &report.steps {
        println!("    {}", step);
    }
    if let Some(error) = &report.error {
        println!("    {}", error.red());
    }
}

fn print_stats(stats: &RuntimeStats) {
    println!("{}", "Runtime statistics".yellow().bold());
    println!("    attached threads:   {}", stats.attached_threads);
    println!("    global refs:        {}", stats.global_refs);
    println!("    weak global refs:   {}", stats.weak_global_refs);
    println!("    allocations:        {}", stats.allocations);
    println!("    collections:        {}", stats.collections);
    println!("    finalizers run:     {}", stats.finalizers_run);
    println!("    pending finalizers: {}", stats.pending_finalizers);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "peerref",
            "run",
            "weak-expiry",
            "--backend",
            "native",
            "--format",
            "json",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.backend, Backend::Native);
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Run { ref scenarios } if scenarios == &["weak-expiry"]));
    }

    #[test]
    fn test_unknown_scenario_is_rejected() {
        let names = vec!["string-generator".to_string(), "bogus".to_string()];
        assert!(matches!(
            select(&names),
            Err(CliError::UnknownScenario(name)) if name == "bogus"
        ));
        assert_eq!(select(&[]).unwrap().len(), SCENARIOS.len());
    }
}
