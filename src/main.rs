use clap::{Parser, Subcommand};
use kubecost_optima::config::resolve_config_path;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kubecost-optima")]
#[command(about = "Export Kubecost allocation data to Flexera Optima", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the invoice window and upload complete months (default)
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a commented starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kubecost_optima=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Some(Commands::Run) | None => {
            let config_path = resolve_config_path(cli.config.as_deref());
            kubecost_optima::cli::run::run(config_path)
                .await
                .map_err(Into::into)
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => kubecost_optima::cli::config::init(stdout)
                .map(|written| {
                    if let Some(path) = written {
                        info!(path = %path.display(), "Config file written");
                    }
                })
                .map_err(Into::into),
        },
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
