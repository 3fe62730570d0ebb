//! Controller Command Client
//!
//! Command-line interface for sending commands to a controller's
//! bin-picking task and watching its status feed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctrlclient::{ConsoleObserver, ControllerClient, Dispatch, Route, TaskParameters};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command line arguments for the controller command client
#[derive(Parser)]
#[command(name = "ctrl-command")]
#[command(about = "Send commands to a bin-picking controller")]
#[command(version)]
struct Args {
    /// Path to the controller configuration file
    #[arg(short, long, default_value = "config/controller.yaml", global = true)]
    config: String,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Bin-picking task name (default: binpickingtask1)
    #[arg(long, global = true)]
    task: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get the robot's current joint values
    JointValues,
    /// Send an arbitrary task command
    Execute {
        /// Command name, e.g. GetTransform
        #[arg(long)]
        command: String,
        /// Extra parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Send over the command queue instead of the web API
        #[arg(long)]
        queue: bool,
        /// Overall timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Delete every job on the controller
    ClearJobs,
    /// Print status messages for a while
    StatusFeed {
        /// How long to listen, in seconds
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging based on verbosity
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("ctrl_command=debug,ctrlclient=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("ctrl_command=info,ctrlclient=warn")
            .init();
    }

    let controller = ControllerClient::connect_with_config(&args.config)
        .await
        .with_context(|| format!("Failed to connect using {}", args.config))?
        .with_observer(Arc::new(ConsoleObserver::new()));
    let binpicking = controller.binpicking(args.task.as_deref());

    match args.command {
        Commands::JointValues => {
            let output = binpicking.get_joint_values(None).await?;
            print_json(&output)?;
        }
        Commands::Execute {
            command,
            params,
            queue,
            timeout,
        } => {
            let mut parameters = match params {
                Some(raw) => {
                    let value: Value = serde_json::from_str(&raw).context("--params must be valid JSON")?;
                    TaskParameters::try_from(value)?
                }
                None => TaskParameters::new(),
            };
            parameters.insert("command", command);

            let route = if queue { Route::Queue } else { Route::WebApi };
            let timeout = timeout
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("--timeout must be a non-negative number of seconds")?;
            let output = binpicking.send_command_via(parameters, route, timeout).await?;
            print_json(&output)?;
        }
        Commands::ClearJobs => {
            controller.delete_all_jobs().await?;
            info!("All jobs deleted");
        }
        Commands::StatusFeed { seconds } => {
            let mut feed = controller.start_status_feed().await?;
            let listen = async {
                while let Some(snapshot) = feed.next().await {
                    if let Ok(line) = serde_json::to_string(&snapshot) {
                        println!("{}", line);
                    }
                }
            };
            // Stops listening after the requested duration
            let _ = tokio::time::timeout(Duration::from_secs(seconds), listen).await;
            feed.stop().await?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
