use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use health_forum_pipeline::config::Config;
use health_forum_pipeline::pipeline::{Pipeline, Task};

const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() {
    let Some(task) = parse_task() else {
        std::process::exit(EXIT_USAGE);
    };

    if let Err(e) = run(task).await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

/// Read the task name from the command line, printing usage on failure.
fn parse_task() -> Option<Task> {
    let mut args = std::env::args().skip(1);
    let (Some(name), None) = (args.next(), args.next()) else {
        print_usage();
        return None;
    };
    match name.parse::<Task>() {
        Ok(task) => Some(task),
        Err(e) => {
            eprintln!("error: {e}");
            print_usage();
            None
        }
    }
}

fn print_usage() {
    eprintln!("usage: health-forum-pipeline <task>\n\ntasks:");
    for task in Task::ALL {
        eprintln!("  {task}");
    }
}

async fn run(task: Task) -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        base_url = %config.base_url,
        community = %config.community,
        database = %config.database_path.display(),
        "Configuration loaded"
    );

    let pipeline = Pipeline::from_config(config).await?;
    let result = pipeline.run(task).await;
    pipeline.database().close().await;
    result
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,health_forum_pipeline=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
