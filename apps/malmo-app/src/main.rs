//! MalmoEnv session CLI.
//!
//! Provides these modes of operation:
//! - `run`: Drive N episodes with a random agent and print statistics
//! - `status`: Query the service status string
//! - `reinit`: Reset the experiment's episode count on the service
//! - `resync`: Wait until the service answers on both endpoints
//! - `info`: Print versions and what the configured mission declares

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use malmo_client::prelude::*;
use malmo_client::MALMO_VERSION;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Drive MalmoEnv simulation sessions.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Environment configuration (TOML).
    #[arg(short, long, global = true, default_value = "malmo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run episodes with a random agent and print statistics.
    Run {
        /// Number of episodes to run.
        #[arg(short = 'n', long, default_value_t = 1)]
        episodes: u32,

        /// Maximum steps per episode.
        #[arg(short, long, default_value_t = 1000)]
        max_steps: u32,

        /// Random seed for action sampling.
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Print the service status.
    Status {
        /// Ask the assigned node instead of the head node.
        #[arg(long)]
        secondary: bool,
    },

    /// Reset the experiment's episode count on the service.
    Reinit,

    /// Wait until the service answers on both endpoints.
    Resync,

    /// Print versions and mission information.
    Info,
}

type CliResult = Result<(), MalmoError>;

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn open(config: &Path) -> Result<MalmoEnv, MalmoError> {
    let config = EnvConfig::from_file(config)?;
    MalmoEnv::new(config)
}

fn run_episodes(env: &mut MalmoEnv, episodes: u32, max_steps: u32, seed: Option<u64>) -> CliResult {
    let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let action_space = env.action_space().clone();
    let mut total_steps = 0u64;

    for ep in 0..episodes {
        env.reset()?;
        let mut steps = 0u32;
        let mut reward = 0.0;
        while steps < max_steps {
            let action = Action::sample(&action_space, &mut rng);
            let result = env.step(&action)?;
            steps += 1;
            reward += result.reward;
            if result.done {
                break;
            }
        }
        total_steps += u64::from(steps);
        println!("episode {}: steps={steps}, reward={reward:.3}", ep + 1);
    }

    println!("\ntotal: episodes={episodes}, steps={total_steps}");
    Ok(())
}

fn run(config: &Path, episodes: u32, max_steps: u32, seed: Option<u64>) -> CliResult {
    let mut env = open(config)?;
    info!(experiment_id = %env.experiment_id(), episodes, "running random agent");
    let result = run_episodes(&mut env, episodes, max_steps, seed);
    env.close();
    result
}

fn run_status(config: &Path, secondary: bool) -> CliResult {
    let mut env = open(config)?;
    println!("{}", env.status(!secondary)?);
    Ok(())
}

fn run_reinit(config: &Path) -> CliResult {
    let mut env = open(config)?;
    let acknowledged = env.reinit()?;
    println!("reinit {}", if acknowledged { "acknowledged" } else { "refused" });
    Ok(())
}

fn run_resync(config: &Path) -> CliResult {
    open(config)?.resync()?;
    println!("service reachable");
    Ok(())
}

fn run_info(config: &Path) {
    println!("malmo v{}", env!("CARGO_PKG_VERSION"));
    println!("protocol: MalmoEnv {MALMO_VERSION}");
    println!();

    let env = match open(config) {
        Ok(env) => env,
        Err(e) => {
            println!("config {}: {e}", config.display());
            return;
        }
    };
    let session = env.session();
    let geometry = session.geometry();
    println!("config:      {}", config.display());
    println!("mission:     {}", env.config().mission_file.display());
    println!("agents:      {}", session.agent_count());
    println!("role:        {}", session.role());
    println!("turn based:  {}", env.template().is_turn_based());
    println!(
        "frame:       {}x{}x{}",
        geometry.width, geometry.height, geometry.depth
    );
    println!("step opts:   {}", session.step_options());
    println!("primary:     {}", env.config().instance.primary());
    println!("secondary:   {}", env.config().instance.secondary());
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            episodes,
            max_steps,
            seed,
        } => run(&cli.config, episodes, max_steps, seed),
        Commands::Status { secondary } => run_status(&cli.config, secondary),
        Commands::Reinit => run_reinit(&cli.config),
        Commands::Resync => run_resync(&cli.config),
        Commands::Info => {
            run_info(&cli.config);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
