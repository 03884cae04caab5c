use blobgate_server::config::Config;
use blobgate_server::server::run_server;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "blobgate")]
#[command(about = "Blob storage gateway over heterogeneous backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("starting blobgate server with config: {}", config);

            let cfg = match Config::from_file(&config) {
                Ok(cfg) => cfg,
                Err(error) => {
                    tracing::error!("failed to load config: {}", error);
                    std::process::exit(1);
                }
            };

            if let Err(error) = run_server(cfg).await {
                tracing::error!("server error: {}", error);
                std::process::exit(1);
            }
        }
    }
}
