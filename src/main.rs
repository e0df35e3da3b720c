use std::fs::File;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kddsniff::api::{self, AppState};
use kddsniff::config::{Cli, Command};
use kddsniff::Detector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = cli.settings;
    let detector = Detector::from_artifacts(&settings.model_dir, settings.unk_policy)?
        .with_debug_dump(settings.debug_dump.clone());

    match cli.command {
        Command::Serve { bind } => {
            let state = Arc::new(AppState {
                detector: Arc::new(detector),
                source: Arc::new(settings.source(None)),
                limits: settings.limits(),
                upload_limit: settings.upload_limit(),
            });

            info!(%bind, "serving detection API");
            axum::Server::bind(&bind)
                .serve(api::router(state).into_make_service())
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.ok();
                })
                .await?;
        }
        Command::Predict { file } => {
            let report = detector.classify_csv(File::open(&file)?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Live { pcap } => {
            let source = settings.source(pcap);
            let report = detector.classify_live(&source, settings.limits())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
