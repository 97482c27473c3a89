use anyhow::bail;
use clap::{Parser, Subcommand};
use colored::*;
use sandcastle_cli::config::{load_dotenv, load_settings, Overrides};
use sandcastle_cli::logging::init_tracing;
use sandcastle_sandbox::SandboxOrchestrator;
use std::process;

mod cli;

#[derive(Subcommand)]
enum Commands {
    /// Show the sandbox instance status
    Status,
    /// Stop the running sandbox instance
    Stop,
    /// Check whether the execution service answers
    Ping,
}

#[derive(Parser)]
#[command(name = "sandcastle")]
#[command(about = "Run requests in a hardened Docker sandbox and stream the results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Force a rebuild of the sandbox image
    #[arg(long)]
    build: bool,

    /// Send a single request and exit
    #[arg(long, short)]
    message: Option<String>,

    /// Read requests from the terminal until `exit`
    #[arg(long, short)]
    interactive: bool,

    /// CPU limit (docker --cpus)
    #[arg(long)]
    cpu: Option<String>,

    /// Memory limit (docker --memory)
    #[arg(long)]
    memory: Option<String>,

    /// Session timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Image name
    #[arg(long)]
    image: Option<String>,

    /// Host port of the execution service
    #[arg(long)]
    port: Option<u16>,

    /// Log every frame and enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            image: self.image.clone(),
            cpu: self.cpu.clone(),
            memory: self.memory.clone(),
            timeout: self.timeout,
            port: self.port,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let env_file = load_dotenv();
    init_tracing(cli.debug);
    if let Err(e) = env_file {
        tracing::warn!("Failed to load .env file: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&args.overrides())?;
    let orchestrator = SandboxOrchestrator::from_settings(&settings)?;

    match args.command {
        Some(Commands::Status) => return cli::instance::status(&orchestrator).await,
        Some(Commands::Stop) => return cli::instance::stop(&orchestrator).await,
        Some(Commands::Ping) => return cli::instance::ping(&orchestrator).await,
        None => {}
    }

    if !orchestrator.is_runtime_available().await {
        bail!(
            "Container runtime '{}' is not available. Is Docker installed and running?",
            settings.docker_bin
        );
    }

    cli::instance::prepare_image(&orchestrator, &settings.image, args.build).await?;

    if let Some(message) = args.message {
        let success = cli::session::run_once(&orchestrator, &message).await;
        if !success {
            process::exit(1);
        }
    } else if args.interactive || !args.build {
        cli::session::interactive(&orchestrator).await?;
    }

    Ok(())
}
