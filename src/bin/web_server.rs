use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use progress_server::{
    api::{ApiDoc, router},
    config::Config,
    database,
    service::ProgressService,
    utils::init_log,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Parser)]
#[command(disable_help_flag = true)]
struct Args {
    #[arg(short, long, default_value = "progress.toml")]
    config: PathBuf,
    /// Overrides `database_url`
    #[arg(short, long)]
    database: Option<String>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Directory for rolling log files
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(Some(&args.config))?;
    if let Some(database) = args.database {
        config.database_url = database;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(log_dir) = args.log_dir {
        config.log_dir = Some(log_dir);
    }
    let _guard = init_log(config.log_dir.clone())?;

    let database = database::connect(&config.database_url).await?;
    let service = Arc::new(ProgressService::from_database(database, &config));

    let app = router(service)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Starting server at http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
