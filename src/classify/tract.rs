#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use tract_onnx::prelude::*;

use super::cache::{PlanCache, DEFAULT_PLAN_CAPACITY};
use super::SequenceModel;
use crate::features::FEATURE_WIDTH;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>>;

/// ONNX export of the temporal CNN, run with tract.
///
/// The export takes `(1, frames, FEATURE_WIDTH)` with a free time axis, so a
/// runnable plan is built per sequence length. The most recently used plans
/// are kept.
pub struct TractSequenceModel {
    model: InferenceModel,
    num_classes: usize,
    plans: PlanCache<Plan>,
}

impl TractSequenceModel {
    pub fn load<P: AsRef<Path>>(model_path: P, num_classes: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;
        Ok(Self {
            model,
            num_classes,
            plans: PlanCache::new(DEFAULT_PLAN_CAPACITY),
        })
    }

    fn plan(&self, frames: usize) -> Result<Arc<Plan>> {
        self.plans.get_or_build(frames, || {
            let plan = self
                .model
                .clone()
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec!(1, frames, FEATURE_WIDTH)),
                )
                .context("failed to set input fact")?
                .into_optimized()
                .context("failed to optimize ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?;
            log::debug!("tract: built plan for {} frames", frames);
            Ok(plan)
        })
    }
}

impl SequenceModel for TractSequenceModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn scores(&self, features: &Array2<f32>) -> Result<Vec<f32>> {
        let frames = features.nrows();
        if features.ncols() != FEATURE_WIDTH {
            return Err(anyhow!(
                "expected {} features per frame, got {}",
                FEATURE_WIDTH,
                features.ncols()
            ));
        }
        let input = tract_ndarray::Array3::from_shape_fn((1, frames, FEATURE_WIDTH), |(_, t, c)| {
            features[[t, c]]
        });
        let outputs = self
            .plan(frames)?
            .run(tvec!(input.into_tensor().into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }
}
