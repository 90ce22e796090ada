use clap::Parser;

use drivefuse::cli::{Args, Commands};
use drivefuse::commands::{self, Context};
use drivefuse::error;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> error::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("DRIVEFUSE_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let args = Args::parse();
    let ctx = Context::resolve(&args)?;

    match args.command {
        None | Some(Commands::Mount) => commands::run_mount(&ctx, args.blocksync).await,
        Some(Commands::Unmount) => {
            commands::run_unmount(&ctx)?;
            Ok(0)
        }
        Some(Commands::Config { action }) => {
            commands::handle_config_command(&ctx, action)?;
            Ok(0)
        }
    }
}
