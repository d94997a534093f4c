use std::path::PathBuf;
use std::sync::Arc;

use crate::advisor::Advisor;
use crate::labels::LabelTable;
use crate::model::Classifier;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    /// `None` when the model failed to load; prediction is then disabled.
    pub classifier: Option<Arc<dyn Classifier>>,
    pub labels: LabelTable,
    pub advisor: Advisor,
    pub uploads_dir: PathBuf,
}

pub type SharedState = Arc<AppState>;
