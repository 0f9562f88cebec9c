//! nlfw - netlink firewall configuration sync
//!
//! Command line front end for the filter kernel module.
//!
//! # Usage
//!
//! ```bash
//! nlfw show                    # Print the rules the kernel enforces
//! nlfw show --format json      # Same, as a wire-format JSON array
//! nlfw check rules.json        # Validate a rule file locally
//! nlfw apply rules.json        # Replace the kernel rule table and verify it
//! nlfw diff rules.json         # Compare a rule file with the kernel
//! ```
//!
//! `apply` exits with 0 when the write was verified, 2 when it was applied but
//! the read-back differed, and 1 when it was rejected or failed.

use clap::{Parser, Subcommand, ValueEnum};
use nlfw::audit;
use nlfw::config::{self, AppConfig};
use nlfw::core::codec;
use nlfw::core::error::SyncError;
use nlfw::core::rule::RuleRecord;
use nlfw::core::sync::{ApplyFailure, ApplyOutcome, ConfigSyncService, TracingObserver};
use nlfw::core::worker::SyncWorker;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "nlfw")]
#[command(about = "Sync firewall rules with the kernel filter module", long_about = None)]
#[command(long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Netlink family of the kernel module (overrides config.json)
    #[arg(long, global = true, value_name = "FAMILY")]
    family: Option<i32>,
    /// Receive timeout in milliseconds (overrides config.json)
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print the kernel configuration
    Show {
        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Validate a JSON rule file without contacting the kernel
    Check { file: PathBuf },
    /// Apply a JSON rule file and verify the kernel stored it
    Apply { file: PathBuf },
    /// Show differences between a rule file and the kernel configuration
    Diff { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Json,
}

const EXIT_WARNING: u8 = 2;

fn main() -> ExitCode {
    let _ = nlfw::utils::ensure_dirs();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = runtime.block_on(config::load_config());
    if let Some(family) = cli.family {
        config.netlink_family = family;
    }
    if let Some(ms) = cli.timeout_ms {
        config.receive_timeout_ms = ms;
    }
    init_logging(&config);

    match runtime.block_on(handle_cli(cli.command, &config)) {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &AppConfig) {
    let level = config.tracing_level();
    if let Some(mut log_path) = nlfw::utils::get_state_dir() {
        log_path.push("nlfw.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(error: &nlfw::Error) {
    eprintln!("Error: {error}");
    if let nlfw::Error::Sync(SyncError::Transport(transport)) = error {
        let hint = transport.hint();
        eprintln!("{}", hint.user_message);
        for suggestion in hint.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

fn start_worker(config: &AppConfig) -> SyncWorker {
    SyncWorker::spawn(ConfigSyncService::connect(
        config.to_channel_config(),
        Box::new(TracingObserver),
    ))
}

async fn handle_cli(command: Commands, config: &AppConfig) -> nlfw::Result<ExitCode> {
    match command {
        Commands::Check { file } => {
            let rules = codec::read_rule_file(&file).await?;
            println!("✓ {} rules valid in {}", rules.len(), file.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { format } => {
            let worker = start_worker(config);
            let rules = fetch(&worker, config).await;
            worker.shutdown();
            let rules = rules?;
            match format {
                Format::Table => {
                    println!("Kernel rules: {}", rules.len());
                    for rule in &rules {
                        println!("  {rule}");
                    }
                }
                Format::Json => println!("{}", to_pretty_json(&rules)?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Apply { file } => {
            let rules = codec::read_rule_file(&file).await?;
            let payload = codec::encode(&rules).map_err(SyncError::Encoding)?;

            println!("Applying {} rules from {}...", rules.len(), file.display());
            let worker = start_worker(config);
            let outcome = worker.apply(rules.clone()).await;
            worker.shutdown();
            let outcome = outcome?;

            if config.enable_event_log {
                audit::log_apply(rules.len(), &payload, &outcome).await;
            }
            Ok(report_outcome(&outcome))
        }
        Commands::Diff { file } => {
            let wanted = codec::read_rule_file(&file).await?;
            let worker = start_worker(config);
            let current = fetch(&worker, config).await;
            worker.shutdown();
            let current = current?;

            print_diff(&current, &wanted, &file);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn fetch(worker: &SyncWorker, config: &AppConfig) -> nlfw::Result<Vec<RuleRecord>> {
    let result = worker.fetch().await;
    if config.enable_event_log {
        match &result {
            Ok(rules) => audit::log_fetch(Some(rules.len()), None).await,
            Err(e) => audit::log_fetch(None, Some(e.to_string())).await,
        }
    }
    Ok(result?)
}

fn report_outcome(outcome: &ApplyOutcome) -> ExitCode {
    match outcome {
        ApplyOutcome::AppliedAndVerified => {
            println!("✓ {outcome}");
            ExitCode::SUCCESS
        }
        ApplyOutcome::AppliedWithWarning(_) => {
            eprintln!("⚠ {outcome}");
            eprintln!("The kernel accepted the write; review `nlfw show` before retrying.");
            ExitCode::from(EXIT_WARNING)
        }
        ApplyOutcome::Rejected(reason) => {
            eprintln!("✗ {outcome}");
            if let ApplyFailure::Transport(e) = reason {
                for suggestion in e.hint().suggestions {
                    eprintln!("  - {suggestion}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn to_pretty_json(rules: &[RuleRecord]) -> nlfw::Result<String> {
    let dicts: Vec<serde_json::Value> = rules
        .iter()
        .map(|r| serde_json::Value::Object(r.to_wire_dict()))
        .collect();
    Ok(serde_json::to_string_pretty(&dicts)?)
}

fn print_diff(current: &[RuleRecord], wanted: &[RuleRecord], file: &Path) {
    let render = |rules: &[RuleRecord]| -> String {
        rules.iter().map(|r| format!("{r}\n")).collect()
    };
    let old_text = render(current);
    let new_text = render(wanted);

    if old_text == new_text {
        println!("Kernel configuration matches {}", file.display());
        return;
    }

    println!("--- kernel");
    println!("+++ {}", file.display());
    let diff = similar::TextDiff::from_lines(&old_text, &new_text);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => "- ",
            similar::ChangeTag::Insert => "+ ",
            similar::ChangeTag::Equal => "  ",
        };
        print!("{sign}{change}");
    }
}
