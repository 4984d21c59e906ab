// ABOUTME: Entry point for canopy-server - loads config and .env, installs
// ABOUTME: tracing, then runs a task headless, serves the feed, or lists agents.

mod cli;
mod run;
mod serve;
mod wiring;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use canopy::config::CanopyConfig;
use clap::Parser;

use cli::{Cli, Commands};
use wiring::Runtime;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = CanopyConfig::load_or_default(&cli.config)?;
    if let Some(model) = &cli.model {
        config.override_model(model);
    }

    match cli.command {
        Commands::Agents => {
            let catalog = config.agent_catalog()?;
            for name in catalog.names() {
                if let Some(spec) = catalog.get(&name) {
                    println!("{} (model {}, max {} steps)", spec.name, spec.model, spec.max_steps);
                    println!("    {}", spec.description);
                    if !spec.tools.is_empty() {
                        println!("    tools: {}", spec.tools.join(", "));
                    }
                    if !spec.managed_agents.is_empty() {
                        println!("    manages: {}", spec.managed_agents.join(", "));
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { agent, task, json } => {
            let runtime = Runtime::start(&config).await?;
            let outcome = run::run(&runtime, &agent, &task, json).await;
            runtime.shutdown(SHUTDOWN_GRACE).await;

            let outcome = outcome?;
            match outcome.into_result() {
                Ok(answer) => {
                    println!("\n{}", answer);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("\n{}", e);
                    if let Some(partial) = &e.partial {
                        eprintln!("Partial answer:\n{}", partial);
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Serve { addr } => {
            let runtime = Runtime::start(&config).await?;
            let served = serve::serve(runtime.dispatcher.clone(), addr).await;
            runtime.shutdown(SHUTDOWN_GRACE).await;
            served.map(|_| ExitCode::SUCCESS)
        }
    }
}
