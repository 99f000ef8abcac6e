//! Profiler - records build sessions and inspects saved ones

mod commands;

use clap::Parser;
use commands::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profiler=info,convenient_profiler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            output,
            config,
            define,
            command,
        } => {
            let config = commands::load_config(&define, config.as_deref())?;
            let code = commands::run::execute(config, &command, &output).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Summary { file, format } => {
            commands::summary::execute(&commands::env_config(), &file, &format)?;
        }
        Commands::Series {
            file,
            name,
            host,
            from,
            to,
        } => {
            commands::series::execute(&file, &name, host, from, to)?;
        }
    }

    Ok(())
}
