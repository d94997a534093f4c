use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod advisor;
mod config;
mod error;
mod labels;
mod model;
mod pages;
mod routes;
mod state;
mod utils;

use advisor::{Advisor, AdvisorConfig};
use config::Config;
use labels::LabelTable;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    if let Err(err) = utils::ensure_model_present(&config.model_path, config.model_url.as_deref()).await {
        warn!("Could not download model: {}", err);
    }

    let labels = LabelTable::load_or_default(config.class_list_path.as_deref());

    info!("Loading model from: {}", config.model_path.display());
    let classifier = match model::load_classifier(
        &config.model_path,
        &config.model_input_op,
        &config.model_output_op,
    ) {
        Ok(classifier) => {
            info!("Model loaded, {} classes", labels.len());
            Some(classifier)
        }
        Err(err) => {
            error!("Error loading model: {}. Prediction is disabled", err);
            None
        }
    };

    let uploads_dir = config.uploads_dir();
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .with_context(|| format!("creating {}", uploads_dir.display()))?;

    let advisor = Advisor::new(AdvisorConfig {
        api_key: config.api_key(),
        endpoint: config.openrouter_url.clone(),
        model: config.openrouter_model.clone(),
        timeout: config.advisor_timeout(),
        max_retries: config.advisor_max_retries,
    })?;
    if !advisor.is_configured() {
        warn!("OPENROUTER_API_KEY is not set, disease details will show placeholder text");
    }

    let shared_state = Arc::new(AppState {
        classifier,
        labels,
        advisor,
        uploads_dir,
    });

    let app = routes::router(shared_state, &config.static_dir, config.body_limit_bytes());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
