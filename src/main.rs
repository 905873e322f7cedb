use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use robot_engine::commands::{execute_robot, next_run, serve};
use robot_engine::context::AppContext;
use std::env;

#[derive(Parser)]
#[command(name = "robot-engine")]
#[command(about = "Synthetic trade generation and scheduling engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm timers for all active robots and run until interrupted
    Serve,
    /// Execute one robot immediately, outside its daily cadence
    ExecuteRobot {
        /// Robot ID to run
        robot_id: String,
    },
    /// Print the next computed fire instant for a robot
    NextRun {
        /// Robot ID to inspect
        robot_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let database_url = env::var("DATABASE_URL").ok();
    if database_url.is_none() {
        return Err(anyhow!("DATABASE_URL must be set to run the robot engine."));
    }
    let app_context = AppContext::initialize(database_url).await?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting robot engine.");

    match cli.command {
        Commands::Serve => serve::run(&app_context).await?,
        Commands::ExecuteRobot { robot_id } => execute_robot::run(&app_context, &robot_id).await?,
        Commands::NextRun { robot_id } => next_run::run(&app_context, &robot_id).await?,
    }

    Ok(())
}
