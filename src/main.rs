use std::path::PathBuf;
use std::process::ExitCode;

use artiproxy::config::ServiceConfig;
use artiproxy::server::Server;
use artiproxy::service::Service;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Caching proxy for APT, Helm, Go module and R package repositories.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Address to listen on; overrides `listen` in the configuration.
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "artiproxy exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("artiproxy={default_level},warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServiceConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let service = Service::from_config(&config)?;
    service.start()?;

    let server = Server::bind(&config.listen).await?;
    info!(
        address = %server.local_addr(),
        repositories = config.repositories.len(),
        "serving repositories"
    );

    let served = server
        .run_until(service.handler(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    service.shutdown();
    served?;
    Ok(())
}
