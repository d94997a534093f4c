use std::path::Path;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::IdentifyError;
use crate::model::{preprocess_image, top_prediction};
use crate::pages::{self, ResultView};
use crate::state::{AppState, SharedState};
use crate::utils::save_upload;

const IMAGE_FIELD: &str = "image";

pub fn router(state: SharedState, static_dir: &Path, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/", get(pages::landing))
        .route("/scanner", get(pages::scanner))
        .route("/about", get(pages::about))
        .route("/identify", post(identify))
        .route("/health", get(health_check))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Renders the result page, or the upload form with an error message.
pub async fn identify(State(state): State<SharedState>, multipart: Multipart) -> Html<String> {
    match run_identify(&state, multipart).await {
        Ok(page) => page,
        Err(err) => {
            if err.is_user_error() {
                tracing::warn!(error = %err, "rejected upload");
            } else {
                tracing::error!(error = %err, "identify failed");
            }
            pages::scanner_page(Some(err.user_message()))
        }
    }
}

async fn run_identify(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Html<String>, IdentifyError> {
    let classifier = state
        .classifier
        .clone()
        .ok_or(IdentifyError::ModelUnavailable)?;

    let image_data = read_image_field(&mut multipart).await?;
    let filename = save_upload(&state.uploads_dir, &image_data).await?;

    let scores = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, IdentifyError> {
        let tensor = preprocess_image(&image_data)?;
        Ok(classifier.classify(&tensor)?)
    })
    .await??;

    let prediction = top_prediction(&scores, &state.labels)?;
    tracing::info!(
        label = %prediction.label,
        confidence = prediction.confidence,
        file = %filename,
        "leaf classified"
    );

    let details = state.advisor.details(&prediction.label).await;

    let image_url = format!("/static/uploads/{}", filename);
    let disease_name = prediction.display_name();
    let confidence = prediction.confidence_percent();
    Ok(pages::result_page(&ResultView {
        image_url: &image_url,
        disease_name: &disease_name,
        confidence: &confidence,
        description: &details.description,
        treatments: &details.treatments,
    }))
}

/// An empty file part counts as no upload, which is what browsers send
/// when the file input was left blank.
async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, IdentifyError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field.bytes().await?;
            if bytes.is_empty() {
                break;
            }
            return Ok(bytes.to_vec());
        }
    }
    Err(IdentifyError::MissingImage)
}

async fn health_check(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "model_loaded": state.classifier.is_some(),
    }))
}
