//! Learned verdict: a sequence model over the feature sequence plus the
//! index -> label table.
//!
//! The classifier is loaded once at startup and shared read-only across
//! requests.

pub mod cache;
pub mod cnn;
#[cfg(feature = "backend-tract")]
pub mod tract;

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureVector, FEATURE_WIDTH};

pub use cnn::{Cnn1dModel, Cnn1dWeights};

/// Label for class indices missing from the table.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Class index -> label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable(BTreeMap<usize, String>);

impl LabelTable {
    /// Read a JSON object keyed by decimal class index.
    ///
    /// A missing file yields an empty table, so every prediction maps to
    /// `UNKNOWN_LABEL`. An unreadable or malformed file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!(
                    "label table {} not found; all predictions will be '{}'",
                    path.display(),
                    UNKNOWN_LABEL
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read label table {}", path.display()))
            }
        };
        let entries: BTreeMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("parse label table {}", path.display()))?;
        let mut table = BTreeMap::new();
        for (key, label) in entries {
            let index = key
                .trim()
                .parse::<usize>()
                .map_err(|_| anyhow!("label table key '{}' is not a class index", key))?;
            table.insert(index, label);
        }
        Ok(Self(table))
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(i, s)| (i, s.into())).collect())
    }

    /// Label for `index`, `UNKNOWN_LABEL` when absent.
    pub fn label(&self, index: usize) -> &str {
        self.0.get(&index).map(String::as_str).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A trained model scoring one feature sequence.
pub trait SequenceModel: Send + Sync {
    /// Model identifier.
    fn name(&self) -> &'static str;

    fn num_classes(&self) -> usize;

    /// One score per class for a `(frames, FEATURE_WIDTH)` input.
    fn scores(&self, features: &Array2<f32>) -> Result<Vec<f32>>;
}

/// Outcome of the learned classifier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub scores: Vec<f32>,
}

pub struct SequenceClassifier {
    model: Box<dyn SequenceModel>,
    labels: LabelTable,
}

impl SequenceClassifier {
    pub fn new(model: Box<dyn SequenceModel>, labels: LabelTable) -> Self {
        Self { model, labels }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Predict the class of a non-empty feature sequence.
    pub fn classify(&self, features: &[FeatureVector]) -> PipelineResult<Prediction> {
        if features.is_empty() {
            return Err(PipelineError::EmptyFeatureSequence);
        }
        let flat: Vec<f32> = features.iter().flat_map(|f| f.to_array()).collect();
        let input = Array2::from_shape_vec((features.len(), FEATURE_WIDTH), flat)
            .map_err(|e| PipelineError::inference(e.to_string()))?;
        let scores = self
            .model
            .scores(&input)
            .map_err(|e| PipelineError::inference(format!("{}: {:#}", self.model.name(), e)))?;
        if scores.len() != self.model.num_classes() {
            return Err(PipelineError::inference(format!(
                "{} returned {} scores for {} classes",
                self.model.name(),
                scores.len(),
                self.model.num_classes()
            )));
        }
        let index = argmax(&scores).ok_or_else(|| {
            PipelineError::inference(format!("{} returned no scores", self.model.name()))
        })?;
        let label = self.labels.label(index).to_string();
        log::debug!(
            "{}: {} frames -> class {} ({})",
            self.model.name(),
            features.len(),
            index,
            label
        );
        Ok(Prediction {
            index,
            label,
            scores,
        })
    }
}

/// Index of the first maximum; NaN never wins.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        let score = if score.is_nan() { f32::NEG_INFINITY } else { score };
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// JSON weights, forward pass in ndarray.
    #[default]
    Native,
    /// ONNX export run through tract (feature: backend-tract).
    Tract,
}

impl FromStr for ClassifierBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown classifier backend '{}'; expected native or tract",
                other
            )),
        }
    }
}

/// Load the label table and model named by `settings`.
///
/// With a non-empty label table the model must produce exactly one score per
/// label. With an empty table the class count comes from the model itself.
pub fn load_classifier(settings: &ClassifierSettings) -> Result<SequenceClassifier> {
    let labels = LabelTable::load(&settings.class_map_path)?;
    let model: Box<dyn SequenceModel> = match settings.backend {
        ClassifierBackend::Native => Box::new(Cnn1dModel::load(&settings.weights_path)?),
        ClassifierBackend::Tract => load_tract(&settings.weights_path, &labels)?,
    };
    if !labels.is_empty() && model.num_classes() != labels.len() {
        return Err(anyhow!(
            "classifier {} has {} classes but label table {} has {} entries",
            settings.weights_path.display(),
            model.num_classes(),
            settings.class_map_path.display(),
            labels.len()
        ));
    }
    log::info!(
        "classifier: {} backend, {} classes, {} labels",
        model.name(),
        model.num_classes(),
        labels.len()
    );
    Ok(SequenceClassifier::new(model, labels))
}

#[cfg(feature = "backend-tract")]
fn load_tract(path: &Path, labels: &LabelTable) -> Result<Box<dyn SequenceModel>> {
    if labels.is_empty() {
        return Err(anyhow!(
            "the tract backend needs a label table to know the class count"
        ));
    }
    Ok(Box::new(tract::TractSequenceModel::load(path, labels.len())?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_path: &Path, _labels: &LabelTable) -> Result<Box<dyn SequenceModel>> {
    Err(anyhow!(
        "classifier backend 'tract' requires the backend-tract feature"
    ))
}
