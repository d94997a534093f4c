use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use thiserror::Error;

use crate::labels::{self, LabelTable};

pub const IMAGE_SIZE: u32 = 224;
const CHANNELS: usize = 3;
pub const INPUT_SHAPE: [u64; 4] = [1, IMAGE_SIZE as u64, IMAGE_SIZE as u64, CHANNELS as u64];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("tensorflow: {0}")]
    Runtime(String),

    #[error("operation '{0}' not found in graph")]
    MissingOperation(String),

    #[error("invalid label table: {0}")]
    Labels(String),

    #[error("model produced {scores} scores but {labels} labels are configured")]
    OutputMismatch { scores: usize, labels: usize },

    #[error("model produced no usable scores")]
    EmptyOutput,

    #[cfg(not(feature = "tensorflow"))]
    #[error("built without TensorFlow support")]
    Unsupported,
}

#[cfg(feature = "tensorflow")]
impl From<tensorflow::Status> for ModelError {
    fn from(status: tensorflow::Status) -> Self {
        ModelError::Runtime(status.to_string())
    }
}

#[derive(Debug, Error)]
#[error("could not decode image: {0}")]
pub struct PreprocessError(#[from] image::ImageError);

/// NHWC batch of one RGB image scaled to [0, 1].
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn shape(&self) -> [u64; 4] {
        INPUT_SHAPE
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

pub fn preprocess_image(image_data: &[u8]) -> Result<ImageTensor, PreprocessError> {
    let img = image::load_from_memory(image_data)?;

    // Grayscale and RGBA uploads are flattened to plain RGB.
    let rgb = img.to_rgb8();
    let resized = imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom);

    let mut data = Vec::with_capacity((IMAGE_SIZE * IMAGE_SIZE) as usize * CHANNELS);
    for pixel in resized.pixels() {
        data.push(pixel[0] as f32 / 255.0);
        data.push(pixel[1] as f32 / 255.0);
        data.push(pixel[2] as f32 / 255.0);
    }

    Ok(ImageTensor { data })
}

/// Anything that turns a preprocessed image into per-class probabilities.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn display_name(&self) -> String {
        labels::display_name(&self.label)
    }

    pub fn confidence_percent(&self) -> String {
        format!("{:.2}%", f64::from(self.confidence) * 100.0)
    }
}

/// Arg-max over `scores`. The first maximum wins ties and NaN never wins.
pub fn top_prediction(scores: &[f32], labels: &LabelTable) -> Result<Prediction, ModelError> {
    if scores.len() != labels.len() {
        return Err(ModelError::OutputMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }

    let (index, confidence) = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((i, score)),
        })
        .ok_or(ModelError::EmptyOutput)?;

    let label = labels
        .get(index)
        .ok_or(ModelError::EmptyOutput)?
        .to_string();

    Ok(Prediction {
        index,
        label,
        confidence,
    })
}

/// Frozen-graph TensorFlow classifier.
#[cfg(feature = "tensorflow")]
pub struct Model {
    session: tensorflow::Session,
    graph: tensorflow::Graph,
    input_op: String,
    output_op: String,
}

#[cfg(feature = "tensorflow")]
impl Model {
    pub fn new(model_path: &Path, input_op: &str, output_op: &str) -> Result<Self, ModelError> {
        use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions};

        let model_bytes = std::fs::read(model_path)?;

        let mut graph = Graph::new();
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        let model = Model {
            session,
            graph,
            input_op: input_op.to_string(),
            output_op: output_op.to_string(),
        };
        // Fail at startup rather than on the first request.
        model.operation(&model.input_op)?;
        model.operation(&model.output_op)?;

        Ok(model)
    }

    fn operation(&self, name: &str) -> Result<tensorflow::Operation, ModelError> {
        self.graph
            .operation_by_name(name)?
            .ok_or_else(|| ModelError::MissingOperation(name.to_string()))
    }
}

#[cfg(feature = "tensorflow")]
impl Classifier for Model {
    fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        use tensorflow::{SessionRunArgs, Tensor};

        let mut tensor = Tensor::<f32>::new(&input.shape());
        tensor.copy_from_slice(input.data());

        let input_operation = self.operation(&self.input_op)?;
        let output_operation = self.operation(&self.output_op)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        self.session.run(&mut args)?;

        let output: Tensor<f32> = args.fetch(output_token)?;
        Ok(output.to_vec())
    }
}

/// Loads the classifier for the process lifetime.
pub fn load_classifier(
    model_path: &Path,
    input_op: &str,
    output_op: &str,
) -> Result<Arc<dyn Classifier>, ModelError> {
    #[cfg(feature = "tensorflow")]
    {
        Ok(Arc::new(Model::new(model_path, input_op, output_op)?))
    }
    #[cfg(not(feature = "tensorflow"))]
    {
        let _ = (model_path, input_op, output_op);
        Err(ModelError::Unsupported)
    }
}
