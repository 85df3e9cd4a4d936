use crate::config::loader::SandboxConfig;
use crate::config::policy::{PolicyConfig, PolicyStore};
use crate::config::types::{ExecutionMode, ExecutionRequest, ResourceBudget};
use crate::config::validator::validate_config;
use crate::core::IsolationChannel;
use crate::exec::{serve, Executor};
use crate::kernel::Enforcement;
use crate::scanner::scan_mode;
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Worker role: execute one statement-block request read from stdin
    Exec(WorkerArgs),
    /// Worker role: evaluate one single-expression request read from stdin
    Eval(WorkerArgs),
    /// Submit code to a fresh worker and print the result as JSON
    Run {
        /// Execution mode (exec or eval)
        #[arg(long, default_value = "exec")]
        mode: ExecutionMode,
        #[command(flatten)]
        source: SourceArgs,
        /// Simulated stdin for the guest
        #[arg(long, default_value = "")]
        stdin: String,
        /// Skip policy checks (trusted operators only)
        #[arg(long)]
        unrestricted: bool,
        /// Controller configuration file (defaults to ./scriptbox.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Scan code and report what the policy would decide, without running it
    Check {
        /// Execution mode (exec or eval)
        #[arg(long, default_value = "exec")]
        mode: ExecutionMode,
        #[command(flatten)]
        source: SourceArgs,
        /// Directory holding the policy documents
        #[arg(long)]
        policy_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct WorkerArgs {
    /// Wall clock limit in seconds
    #[arg(long)]
    wall: Option<f64>,
    /// CPU time limit in seconds
    #[arg(long)]
    cpu: Option<f64>,
    /// Memory growth limit in bytes
    #[arg(long)]
    memory: Option<u64>,
    /// Captured output limit in bytes
    #[arg(long)]
    output: Option<usize>,
    /// Directory holding the policy documents
    #[arg(long)]
    policy_dir: Option<PathBuf>,
}

impl WorkerArgs {
    fn budget(&self) -> ResourceBudget {
        let defaults = ResourceBudget::default();
        ResourceBudget {
            max_wall_seconds: self.wall.unwrap_or(defaults.max_wall_seconds),
            max_cpu_seconds: self.cpu.unwrap_or(defaults.max_cpu_seconds),
            max_memory_bytes: self.memory.unwrap_or(defaults.max_memory_bytes),
            max_output_bytes: self.output.unwrap_or(defaults.max_output_bytes),
        }
    }
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Guest source text
    #[arg(long)]
    code: Option<String>,
    /// File holding the guest source
    #[arg(long)]
    file: Option<PathBuf>,
}

impl SourceArgs {
    fn read(&self) -> Result<String> {
        match (&self.code, &self.file) {
            (Some(code), _) => Ok(code.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display())),
            (None, None) => Err(anyhow!("either --code or --file is required")),
        }
    }
}

fn load_policy(dir: Option<&Path>) -> Result<Arc<PolicyConfig>> {
    let store = PolicyStore::from_optional_dir(dir);
    log::debug!("policy source: {}", store.describe());
    Ok(Arc::new(PolicyConfig::load(&store)?))
}

/// Worker role. stdout carries only the framed response; logs go to stderr.
fn run_worker(mode: ExecutionMode, args: &WorkerArgs) -> Result<()> {
    let policy = load_policy(args.policy_dir.as_deref())?;
    let executor = Executor::new(policy, args.budget(), Enforcement::Os);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&executor, mode, stdin.lock(), stdout.lock())
        .with_context(|| format!("{} worker failed", mode.as_arg()))
}

fn run_controller(
    mode: ExecutionMode,
    code: String,
    stdin: String,
    unrestricted: bool,
    config: Option<&Path>,
) -> Result<()> {
    let config = match config {
        Some(path) => SandboxConfig::load_from_file(path)?,
        None => SandboxConfig::load_default()?,
    };
    let report = validate_config(&config)?;
    for error in &report.errors {
        log::error!("config: {}", error);
    }

    let channel = IsolationChannel::new(config)?;
    let request = ExecutionRequest::new(code, mode)
        .with_input(stdin)
        .with_restricted(!unrestricted);

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let result = runtime.block_on(channel.submit(&request))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_check(mode: ExecutionMode, code: &str, policy_dir: Option<&Path>) -> Result<()> {
    let policy = load_policy(policy_dir)?;
    let report = match scan_mode(code, mode) {
        Ok(scan) => {
            let verdict = match scan.check(&policy) {
                Ok(()) => serde_json::Value::from("allowed"),
                Err(denied) => serde_json::Value::from(denied.to_string()),
            };
            serde_json::json!({
                "imported_modules": scan.imported_modules,
                "reserved_attributes": scan.reserved_attributes,
                "denied_modules": scan.denied_modules(&policy),
                "denied_reserved": scan.denied_reserved(&policy),
                "verdict": verdict,
            })
        }
        Err(err) => serde_json::json!({ "verdict": format!("SyntaxError: {}", err) }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(unix) {
        return Err(anyhow!("scriptbox requires a Unix-like system for resource limits"));
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Exec(args) => run_worker(ExecutionMode::StatementBlock, &args),
        Commands::Eval(args) => run_worker(ExecutionMode::SingleExpression, &args),
        Commands::Run {
            mode,
            source,
            stdin,
            unrestricted,
            config,
        } => run_controller(mode, source.read()?, stdin, unrestricted, config.as_deref()),
        Commands::Check {
            mode,
            source,
            policy_dir,
        } => run_check(mode, &source.read()?, policy_dir.as_deref()),
    }
}
