mod config;
mod serve;
mod service;

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use bugflow_storage::{BugReport, ReportFilter, ReportId, ReportStatus};

use crate::config::BugflowConfig;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Bug report intake, triage and issue dispatch.
#[derive(Parser)]
#[command(
    name = "bugflow",
    version,
    about = "Bug report intake, triage and issue dispatch"
)]
struct Cli {
    /// Path to the configuration file (default: ./bugflow.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Port to listen on (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,
        /// Keep reports in memory instead of the configured database
        #[arg(long)]
        memory: bool,
    },

    /// List stored reports, newest first
    List {
        /// Only reports in this status (e.g. failed, sent)
        #[arg(long, value_parser = parse_status)]
        status: Option<ReportStatus>,
        /// Maximum number of reports to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one stored report
    Show {
        /// Report id
        id: String,
    },

    /// Reopen a failed report and run the pipeline for it again
    Retry {
        /// Report id
        id: String,
    },

    /// Reprocess every report left unfinished, then exit
    Recover,

    /// Redact a diagnostics JSON document and print it
    Redact {
        /// Path to the JSON file (reads stdin when omitted)
        file: Option<PathBuf>,
    },
}

fn parse_status(s: &str) -> Result<ReportStatus, String> {
    s.parse::<ReportStatus>().map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match BugflowConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            report_error(&e.to_string(), cli.output);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { port, memory } => {
            let port = port.unwrap_or(config.server.port);
            if let Err(e) = block_on(serve::start_server(config, port, memory), cli.output) {
                report_error(&format!("Server error: {}", e), cli.output);
                process::exit(1);
            }
        }
        Commands::List { status, limit } => {
            cmd_list(&config, status, limit, cli.output);
        }
        Commands::Show { id } => {
            cmd_show(&config, &id, cli.output);
        }
        Commands::Retry { id } => {
            cmd_retry(&config, &id, cli.output);
        }
        Commands::Recover => {
            cmd_recover(&config, cli.output);
        }
        Commands::Redact { file } => {
            cmd_redact(&config, file.as_deref(), cli.output);
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Run a future on a fresh multi-threaded runtime, exiting on runtime failure.
fn block_on<F: Future>(future: F, output: OutputFormat) -> F::Output {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(future),
        Err(e) => {
            report_error(&format!("failed to start async runtime: {}", e), output);
            process::exit(1);
        }
    }
}

fn cmd_list(
    config: &BugflowConfig,
    status: Option<ReportStatus>,
    limit: usize,
    output: OutputFormat,
) {
    let reports = block_on(
        async {
            let store = service::open_store(config, false)?;
            store
                .list_reports(&ReportFilter {
                    status,
                    limit: Some(limit),
                })
                .await
        },
        output,
    );
    let reports = match reports {
        Ok(r) => r,
        Err(e) => {
            report_error(&e.to_string(), output);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => print_json(&reports, output),
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("no reports");
                return;
            }
            for report in &reports {
                println!(
                    "{}  {:<13}  {:<8}  {}  {}",
                    report.id,
                    report.status,
                    report.severity,
                    report.created_at,
                    preview(&report.notes, 60)
                );
            }
        }
    }
}

fn cmd_show(config: &BugflowConfig, id: &str, output: OutputFormat) {
    let id = ReportId::from(id);
    let report = block_on(
        async {
            let store = service::open_store(config, false)?;
            store.get_report(&id).await
        },
        output,
    );
    match report {
        Ok(report) => match output {
            OutputFormat::Json => print_json(&report, output),
            OutputFormat::Text => print_report(&report),
        },
        Err(e) => {
            report_error(&e.to_string(), output);
            process::exit(1);
        }
    }
}

fn cmd_retry(config: &BugflowConfig, id: &str, output: OutputFormat) {
    let id = ReportId::from(id);
    let result = block_on(
        async {
            let service = service::build_service(config, false)?;
            service.retry_failed(&id).await
        },
        output,
    );
    match result {
        Ok(status) => match output {
            OutputFormat::Json => {
                print_json(&serde_json::json!({ "id": id, "status": status }), output)
            }
            OutputFormat::Text => println!("{}: {}", id, status),
        },
        Err(e) => {
            report_error(&e.to_string(), output);
            process::exit(1);
        }
    }
}

fn cmd_recover(config: &BugflowConfig, output: OutputFormat) {
    let result = block_on(
        async {
            let service = service::build_service(config, false)?;
            service.recover().await
        },
        output,
    );
    match result {
        Ok(count) => match output {
            OutputFormat::Json => print_json(&serde_json::json!({ "recovered": count }), output),
            OutputFormat::Text => println!("recovered {} report(s)", count),
        },
        Err(e) => {
            report_error(&e.to_string(), output);
            process::exit(1);
        }
    }
}

fn cmd_redact(config: &BugflowConfig, file: Option<&Path>, output: OutputFormat) {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("error reading {}: {}", path.display(), e)),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map(|_| buf)
                .map_err(|e| format!("error reading stdin: {}", e))
        }
    };
    let value = text.and_then(|t| {
        serde_json::from_str::<serde_json::Value>(&t).map_err(|e| format!("invalid JSON: {}", e))
    });
    match value {
        Ok(value) => {
            let redacted = config.diagnostics.redaction_policy().redact_value(value);
            println!("{}", redacted.to_pretty_json());
        }
        Err(msg) => {
            report_error(&msg, output);
            process::exit(1);
        }
    }
}

// ── Output helpers ───────────────────────────────────────────────────────────

fn print_json<T: serde::Serialize + ?Sized>(value: &T, output: OutputFormat) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            report_error(&format!("error serializing output: {}", e), output);
            process::exit(1);
        }
    }
}

fn print_report(report: &BugReport) {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("id:             {}", report.id);
    println!("status:         {}", report.status);
    println!("severity:       {}", report.severity);
    println!("category:       {}", report.category);
    println!("created:        {}", report.created_at);
    println!("updated:        {}", report.updated_at);
    match (report.classification, report.confidence) {
        (Some(c), Some(conf)) => println!("classification: {} ({:.2})", c, conf),
        _ => println!("classification: -"),
    }
    if let Some(escalate) = report.escalate {
        println!("escalated:      {}", escalate);
    }
    println!("issue:          {}", opt(&report.github_issue_url));
    println!("pull request:   {}", opt(&report.github_pr_url));
    println!("preview:        {}", opt(&report.preview_url));
    if let Some(reason) = &report.failure_reason {
        println!("failure:        {}", reason);
    }
    println!();
    println!("{}", report.notes);
}

/// First `max` characters of the first line.
fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        format!("{}...", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
