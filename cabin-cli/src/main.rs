use anyhow::Result;
use cabin_cli::cli::{Cli, Commands};
use cabin_cli::{CliConfig, console};
use cabin_telemetry::LogFormat;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from: {}", path.display());
    }

    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if cli.json_logs {
        config.log_format = LogFormat::Json;
    }
    cabin_telemetry::init_with_format("cabin-cli", config.log_format).map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Console(args) => {
            config.apply(&args);
            console::run_console(config, args.audio).await
        }
        Commands::Config => {
            println!("{}", config.render()?);
            Ok(())
        }
    }
}
