use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_runner::{ResultStore, SweepDefinition};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Resumable parameter sweep runner")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configuration of a matrix that is not recorded yet
    Run {
        definition: PathBuf,
        #[arg(long)]
        matrix: Option<String>,
        /// Ignore recorded results and overwrite them
        #[arg(long)]
        fresh: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show how much of a matrix is already recorded
    Describe {
        definition: PathBuf,
        #[arg(long)]
        matrix: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List recorded results
    Results {
        definition: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write a starter sweep.yaml and config template
    Init {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            definition,
            matrix,
            fresh,
            json,
        } => {
            let def = SweepDefinition::load(&definition)?;
            let report = sweep_runner::run_definition(&def, matrix.as_deref(), !fresh)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "matrix": matrix_label(matrix.as_deref()),
                    "resume": !fresh,
                    "report": {
                        "total": report.total,
                        "skipped": report.skipped,
                        "launched": report.launched,
                        "succeeded": report.succeeded,
                        "failed": report.failed,
                        "results_path": report.results_path.display().to_string(),
                    }
                })));
            }
            println!("matrix: {}", matrix_label(matrix.as_deref()));
            println!("total: {}", report.total);
            println!("skipped: {}", report.skipped);
            println!("launched: {}", report.launched);
            println!("succeeded: {}", report.succeeded);
            println!("failed: {}", report.failed);
            println!("results: {}", report.results_path.display());
        }
        Commands::Describe {
            definition,
            matrix,
            json,
        } => {
            let def = SweepDefinition::load(&definition)?;
            let selected = def.matrix(matrix.as_deref())?;
            let store = ResultStore::new(def.results_path());
            let status = sweep_runner::describe_sweep(selected, &store)?;
            let parameters: Vec<Value> = selected
                .parameters()
                .map(|(name, values)| json!({ "name": name, "values": values }))
                .collect();
            let matrices: Vec<&str> = def.matrix_names().collect();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "matrix": matrix_label(matrix.as_deref()),
                    "matrices": matrices,
                    "parameters": parameters,
                    "total": status.total,
                    "recorded": status.recorded,
                    "failed": status.failed,
                    "pending": status.pending,
                    "results_path": store.path().display().to_string(),
                    "template": def.template_path().display().to_string(),
                    "command_line": def.launch.command,
                })));
            }
            println!("matrix: {}", matrix_label(matrix.as_deref()));
            for (name, values) in selected.parameters() {
                println!("  {}: {:?}", name, values);
            }
            println!("total: {}", status.total);
            println!("recorded: {}", status.recorded);
            println!("failed: {}", status.failed);
            println!("pending: {}", status.pending);
            println!("results: {}", store.path().display());
        }
        Commands::Results { definition, json } => {
            let def = SweepDefinition::load(&definition)?;
            let store = ResultStore::new(def.results_path());
            let results = store.load()?;
            let failed = results.iter().filter(|r| r.is_failed()).count();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "results",
                    "results_path": store.path().display().to_string(),
                    "count": results.len(),
                    "failed": failed,
                    "results": results,
                })));
            }
            for result in &results {
                println!("{} time={}", result.config, result.time);
            }
            println!("count: {}", results.len());
            println!("failed: {}", failed);
        }
        Commands::Init { dir, force } => {
            std::fs::create_dir_all(&dir)?;
            write_starter(&dir.join("sweep.yaml"), sweep_runner::STARTER_DEFINITION, force)?;
            write_starter(
                &dir.join("profile-template.yml"),
                sweep_runner::STARTER_TEMPLATE,
                force,
            )?;
            println!(
                "next: edit {} to point launch.command at your training job",
                dir.join("sweep.yaml").display()
            );
            println!(
                "next: sweep run {} --matrix test",
                dir.join("sweep.yaml").display()
            );
        }
    }
    Ok(None)
}

fn write_starter(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("exists: {} (use --force to overwrite)", path.display());
        return Ok(());
    }
    std::fs::write(path, contents)?;
    println!("wrote: {}", path.display());
    Ok(())
}

fn matrix_label(name: Option<&str>) -> &str {
    name.unwrap_or(sweep_runner::definition::DEFAULT_MATRIX)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

/// Messages lead with a `code:` prefix; anything else is a generic failure.
fn error_code(err: &anyhow::Error) -> &'static str {
    const KNOWN: &[&str] = &[
        "operation_in_progress",
        "results_unreadable",
        "results_malformed",
        "results_unwritable",
        "definition_unreadable",
        "template_unreadable",
        "empty_candidates",
        "duplicate_parameter",
        "reserved_parameter",
        "unconsumed_parameter",
        "missing_template_field",
        "unknown_placeholder",
        "malformed_template",
        "schema_version",
        "empty_matrix",
        "unknown_matrix",
        "empty_command",
    ];
    let message = err.to_string();
    KNOWN
        .iter()
        .find(|code| message.starts_with(&format!("{}:", code)))
        .copied()
        .unwrap_or("command_failed")
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Results { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}
