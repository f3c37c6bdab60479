use anyhow::Context;
use clap::{Parser, Subcommand};
use foldwise::config::JobSpec;
use foldwise::registry::FunctionRegistry;
use foldwise::scheduler::LocalExecutor;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Combiner-based aggregation over delimited record files
#[derive(Parser)]
#[command(name = "foldwise")]
#[command(about = "Run map/combine/reduce aggregation jobs on local worker threads", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job described by a JSON spec file
    Run {
        /// Path to the job spec
        #[arg(short, long)]
        spec: PathBuf,

        /// Override the number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// List the registered initializer and merge functions
    Functions,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(spec_path: PathBuf, workers: Option<usize>) -> anyhow::Result<bool> {
    let mut spec = JobSpec::from_file(&spec_path)
        .and_then(JobSpec::apply_env)
        .with_context(|| format!("loading job spec {}", spec_path.display()))?;
    if let Some(workers) = workers {
        spec.workers = workers;
    }
    debug!(?spec, "effective job spec");

    let report = LocalExecutor::new(FunctionRegistry::with_builtins()).run(&spec)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.succeeded())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Run { spec, workers } => run(spec, workers),
        Commands::Functions => {
            let registry = FunctionRegistry::with_builtins();
            println!("initializers:");
            for id in registry.init_ids() {
                println!("  {id}");
            }
            println!("merge functions:");
            for id in registry.merge_ids() {
                println!("  {id}");
            }
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
