#![warn(missing_docs)]
//! RaceBench CLI Library
//!
//! Host side of a benchmark binary: parses the command line, launches the
//! sandbox, drives it through a [`HostController`] and renders the report.
//! The same binary serves as the sandbox when started with
//! `--racebench-worker`.
//!
//! # Example
//!
//! ```ignore
//! use racebench::prelude::*;
//!
//! fn suite() -> Suite {
//!     let mut suite = Suite::new("strings");
//!     suite.add(Candidate::sync("push_str", || { /* ... */ })).unwrap();
//!     suite
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     racebench_cli::run(suite)
//! }
//! ```

mod config;
mod controller;
mod formatting;
mod metadata;
mod supervisor;

pub use config::*;
pub use controller::{BenchStatus, CandidateView, HostController, HostView};
pub use formatting::{format_human_output, format_rate};
pub use metadata::build_report_meta;
pub use supervisor::*;

use clap::{Parser, Subcommand};
use racebench_core::{SamplerConfig, SandboxOptions, Suite, run_process_sandbox};
use racebench_report::{
    CandidateInfo, OutputFormat, Report, generate_csv_report, generate_json_report,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// RaceBench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "racebench")]
#[command(author, version, about = "RaceBench - compare the speed of candidate snippets")]
pub struct Cli {
    /// Optional subcommand (List, Run); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format: human, json, csv (defaults to racebench.toml)
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the report into the configured output directory
    #[arg(long)]
    pub save: bool,

    /// Minimum sampling time per candidate (e.g. "1s")
    #[arg(long)]
    pub min_time: Option<String>,

    /// Hard sampling limit per candidate (e.g. "5s")
    #[arg(long)]
    pub max_time: Option<String>,

    /// Minimum number of samples per candidate
    #[arg(long)]
    pub min_samples: Option<u32>,

    /// Target relative margin of error in percent
    #[arg(long)]
    pub target_rme: Option<f64>,

    /// Run the sandbox in a worker process (default: true)
    /// Use --isolated=false to run it on a thread of this process
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub isolated: bool,

    /// How long to wait for the sandbox to come up (e.g. "10s")
    #[arg(long)]
    pub ready_timeout: Option<String>,

    /// Kill the sandbox if the run takes longer than this (e.g. "10m")
    #[arg(long)]
    pub worker_timeout: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: run as sandbox process (used by the supervisor)
    #[arg(long, hide = true)]
    pub racebench_worker: bool,

    /// Internal: absorb cargo bench's --bench flag
    #[arg(long, hide = true)]
    pub bench: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the candidates of the suite
    List,
    /// Run the suite once and print the report (default)
    Run,
}

/// Run the RaceBench CLI for the suite produced by `build_suite`.
/// This is the main entry point for benchmark binaries.
///
/// `build_suite` is called in every process that needs the suite: the host
/// (for titles), and the sandbox.
pub fn run<F>(build_suite: F) -> anyhow::Result<()>
where
    F: Fn() -> Suite + Send + 'static,
{
    let cli = Cli::parse();
    run_with_cli(cli, build_suite)
}

/// Run the RaceBench CLI with pre-parsed arguments.
pub fn run_with_cli<F>(cli: Cli, build_suite: F) -> anyhow::Result<()>
where
    F: Fn() -> Suite + Send + 'static,
{
    // Handle worker mode first (before any other initialization)
    if cli.racebench_worker {
        return run_worker_mode(&cli, build_suite);
    }

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("racebench=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("racebench=info")
            .init();
    }

    // Discover racebench.toml configuration (CLI flags override)
    let config = RaceConfig::discover().unwrap_or_default();

    match cli.command {
        Some(Commands::List) => list_candidates(&build_suite()),
        Some(Commands::Run) | None => run_suite(&cli, &config, build_suite),
    }
}

/// Run as a sandbox process (IPC mode)
fn run_worker_mode<F>(cli: &Cli, build_suite: F) -> anyhow::Result<()>
where
    F: Fn() -> Suite,
{
    // stdout may be the IPC channel; logs go to the inherited stderr
    let filter = if cli.verbose {
        "racebench=debug"
    } else {
        "racebench=warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = RaceConfig::discover().unwrap_or_default();
    let options = SandboxOptions {
        config: resolve_sampler_config(cli, &config)?,
        ..SandboxOptions::default()
    };
    run_process_sandbox(build_suite(), &options)
        .map_err(|e| anyhow::anyhow!("Sandbox error: {}", e))
}

fn list_candidates(suite: &Suite) -> anyhow::Result<()> {
    println!("RaceBench Suite: {}", suite.name());
    for candidate in suite.candidates().iter() {
        let kind = if candidate.is_async() { " [async]" } else { "" };
        println!("├── {} {}{}", candidate.id(), candidate.title(), kind);
    }
    println!("{} candidates found.", suite.candidates().len());
    Ok(())
}

/// Sampler settings by layering: racebench.toml → CLI overrides.
fn resolve_sampler_config(cli: &Cli, config: &RaceConfig) -> anyhow::Result<SamplerConfig> {
    let mut sampler = config.to_sampler_config()?;
    if let Some(min_time) = &cli.min_time {
        sampler.min_time = RaceConfig::duration(min_time)?;
    }
    if let Some(max_time) = &cli.max_time {
        sampler.max_time = RaceConfig::duration(max_time)?;
    }
    if let Some(min_samples) = cli.min_samples {
        sampler.min_samples = min_samples;
    }
    if let Some(target_rme) = cli.target_rme {
        sampler.target_rme_percent = target_rme;
    }
    sampler.validate()?;
    Ok(sampler)
}

fn resolve_timeout(
    flag: &Option<String>,
    configured: anyhow::Result<Duration>,
) -> anyhow::Result<Duration> {
    match flag {
        Some(value) => RaceConfig::duration(value),
        None => configured,
    }
}

fn run_suite<F>(cli: &Cli, config: &RaceConfig, build_suite: F) -> anyhow::Result<()>
where
    F: Fn() -> Suite + Send + 'static,
{
    let sampler = resolve_sampler_config(cli, config)?;
    let format: OutputFormat = cli
        .format
        .as_deref()
        .unwrap_or(&config.output.format)
        .parse()
        .unwrap_or(OutputFormat::Human);
    let isolation = if cli.isolated {
        config.runner.isolation
    } else {
        IsolationMode::Thread
    };
    let ready_timeout = resolve_timeout(&cli.ready_timeout, config.ready_timeout())?;
    let worker_timeout = resolve_timeout(&cli.worker_timeout, config.worker_timeout())?;

    // The host builds its own copy only to learn names
    let local = build_suite();
    let suite_name = local.name().to_string();
    let views: Vec<CandidateView> = local
        .candidates()
        .iter()
        .map(|c| CandidateView::new(c.id(), c.title()))
        .collect();
    drop(local);

    let options = SandboxOptions {
        config: sampler.clone(),
        pin_cpu: isolation.is_isolated().then_some(0),
    };
    let worker_args: Vec<String> = if cli.verbose {
        vec!["--verbose".to_string()]
    } else {
        Vec::new()
    };
    let (sandbox, endpoint) = launch_sandbox(isolation, build_suite, options, &worker_args)?;

    let mut controller = HostController::new(endpoint).with_candidates(views);
    let start_time = Instant::now();
    let outcome = drive(&mut controller, &sampler, ready_timeout, worker_timeout, cli.verbose);

    controller.shutdown();
    if let Err(e) = sandbox.finish(SHUTDOWN_GRACE) {
        tracing::warn!("sandbox did not shut down cleanly: {}", e);
    }
    let ranked = outcome?;

    let candidates: Vec<CandidateInfo> = controller
        .candidates()
        .iter()
        .map(|c| CandidateInfo {
            id: c.id,
            name: c.title.clone(),
            status: c.status,
        })
        .collect();
    let meta = build_report_meta(&suite_name, &sampler, isolation);
    let mut report = Report::from_suite(meta, &ranked, &candidates);
    report.summary.total_duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;

    let output = match format {
        OutputFormat::Json => generate_json_report(&report)?,
        OutputFormat::Csv => generate_csv_report(&report),
        OutputFormat::Human => format_human_output(&report),
    };

    if let Some(ref path) = cli.output {
        let mut file = std::fs::File::create(path)?;
        file.write_all(output.as_bytes())?;
        println!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
    }

    if cli.save {
        let dir = PathBuf::from(&config.output.directory);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.{}", suite_name, format.extension()));
        std::fs::write(&path, output.as_bytes())?;
        println!("Report saved to: {}", path.display());
    }

    if report.has_errors() {
        eprintln!("\n{} candidate(s) failed", report.summary.errored);
        std::process::exit(1);
    }

    Ok(())
}

/// Wait for `ready`, run once, wait for the report.
fn drive(
    controller: &mut HostController,
    sampler: &SamplerConfig,
    ready_timeout: Duration,
    worker_timeout: Duration,
    verbose: bool,
) -> anyhow::Result<racebench_ipc::SuiteReport> {
    controller.wait_until_ready(ready_timeout)?;
    if !controller.start(Some(sampler.to_options()))? {
        anyhow::bail!("sandbox refused to start a run");
    }

    // Progress bar would interleave with debug logs
    let pb = (!verbose).then(|| controller.progress_bar());
    let report = controller.wait_for_completion(worker_timeout, pb.as_ref());
    if let Some(pb) = &pb {
        if !pb.is_finished() {
            pb.abandon();
        }
    }
    report?.ok_or_else(|| anyhow::anyhow!("run stopped before completion"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("racebench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        assert!(cli.isolated);
        assert!(!cli.racebench_worker);
        assert!(cli.format.is_none());
    }

    #[test]
    fn test_worker_and_bench_flags() {
        let cli = parse(&["--racebench-worker", "--bench"]);
        assert!(cli.racebench_worker);
        assert!(cli.bench);
    }

    #[test]
    fn test_subcommands() {
        assert!(matches!(parse(&["list"]).command, Some(Commands::List)));
        assert!(matches!(parse(&["run"]).command, Some(Commands::Run)));
        assert!(!parse(&["--isolated=false", "run"]).isolated);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = parse(&["--min-time", "200ms", "--min-samples", "9", "--target-rme", "2.5"]);
        let sampler = resolve_sampler_config(&cli, &RaceConfig::default()).unwrap();
        assert_eq!(sampler.min_time, Duration::from_millis(200));
        assert_eq!(sampler.max_time, Duration::from_secs(5));
        assert_eq!(sampler.min_samples, 9);
        assert_eq!(sampler.target_rme_percent, 2.5);
    }

    #[test]
    fn test_inconsistent_override_is_rejected() {
        let cli = parse(&["--min-time", "10s"]);
        assert!(resolve_sampler_config(&cli, &RaceConfig::default()).is_err());
    }

    #[test]
    fn test_timeout_flag_wins() {
        let flag = Some("250ms".to_string());
        assert_eq!(
            resolve_timeout(&flag, Ok(Duration::from_secs(1))).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            resolve_timeout(&None, Ok(Duration::from_secs(1))).unwrap(),
            Duration::from_secs(1)
        );
    }
}
