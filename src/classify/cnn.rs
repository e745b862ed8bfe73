//! Native forward pass of the temporal CNN.
//!
//! Network: conv1d(9 -> 64, k=3, same padding) -> ReLU -> conv1d(64 -> 128,
//! k=3, same padding) -> ReLU -> max over time -> linear(128 -> classes).
//!
//! Weights are read from a JSON export of the trained state dict, keyed by
//! the usual parameter names (`conv1.weight`, `fc.bias`, ...).

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::SequenceModel;
use crate::features::FEATURE_WIDTH;

pub const CONV1_CHANNELS: usize = 64;
pub const CONV2_CHANNELS: usize = 128;
pub const KERNEL_SIZE: usize = 3;

/// Serialized parameters, nested `[out][in][k]` for convolutions and
/// `[out][in]` for the projection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cnn1dWeights {
    #[serde(rename = "conv1.weight")]
    pub conv1_weight: Vec<Vec<Vec<f32>>>,
    #[serde(rename = "conv1.bias")]
    pub conv1_bias: Vec<f32>,
    #[serde(rename = "conv2.weight")]
    pub conv2_weight: Vec<Vec<Vec<f32>>>,
    #[serde(rename = "conv2.bias")]
    pub conv2_bias: Vec<f32>,
    #[serde(rename = "fc.weight")]
    pub fc_weight: Vec<Vec<f32>>,
    #[serde(rename = "fc.bias")]
    pub fc_bias: Vec<f32>,
}

impl Cnn1dWeights {
    /// All-zero parameters for `num_classes` outputs.
    pub fn zeroed(num_classes: usize) -> Self {
        Self {
            conv1_weight: vec![vec![vec![0.0; KERNEL_SIZE]; FEATURE_WIDTH]; CONV1_CHANNELS],
            conv1_bias: vec![0.0; CONV1_CHANNELS],
            conv2_weight: vec![vec![vec![0.0; KERNEL_SIZE]; CONV1_CHANNELS]; CONV2_CHANNELS],
            conv2_bias: vec![0.0; CONV2_CHANNELS],
            fc_weight: vec![vec![0.0; CONV2_CHANNELS]; num_classes],
            fc_bias: vec![0.0; num_classes],
        }
    }
}

pub struct Cnn1dModel {
    conv1_weight: Array3<f32>,
    conv1_bias: Array1<f32>,
    conv2_weight: Array3<f32>,
    conv2_bias: Array1<f32>,
    fc_weight: Array2<f32>,
    fc_bias: Array1<f32>,
}

impl Cnn1dModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read classifier weights {}", path.display()))?;
        let weights: Cnn1dWeights = serde_json::from_str(&raw)
            .with_context(|| format!("parse classifier weights {}", path.display()))?;
        Self::from_weights(weights).with_context(|| format!("load {}", path.display()))
    }

    /// Check every tensor against the network shape.
    pub fn from_weights(weights: Cnn1dWeights) -> Result<Self> {
        let conv1_weight = tensor3(
            "conv1.weight",
            weights.conv1_weight,
            (CONV1_CHANNELS, FEATURE_WIDTH, KERNEL_SIZE),
        )?;
        let conv1_bias = tensor1("conv1.bias", weights.conv1_bias, CONV1_CHANNELS)?;
        let conv2_weight = tensor3(
            "conv2.weight",
            weights.conv2_weight,
            (CONV2_CHANNELS, CONV1_CHANNELS, KERNEL_SIZE),
        )?;
        let conv2_bias = tensor1("conv2.bias", weights.conv2_bias, CONV2_CHANNELS)?;

        let classes = weights.fc_weight.len();
        if classes == 0 {
            return Err(anyhow!("fc.weight has no output rows"));
        }
        let fc_weight = tensor2("fc.weight", weights.fc_weight, (classes, CONV2_CHANNELS))?;
        let fc_bias = tensor1("fc.bias", weights.fc_bias, classes)?;

        Ok(Self {
            conv1_weight,
            conv1_bias,
            conv2_weight,
            conv2_bias,
            fc_weight,
            fc_bias,
        })
    }
}

impl SequenceModel for Cnn1dModel {
    fn name(&self) -> &'static str {
        "cnn1d"
    }

    fn num_classes(&self) -> usize {
        self.fc_bias.len()
    }

    fn scores(&self, features: &Array2<f32>) -> Result<Vec<f32>> {
        if features.ncols() != FEATURE_WIDTH {
            return Err(anyhow!(
                "expected {} features per frame, got {}",
                FEATURE_WIDTH,
                features.ncols()
            ));
        }
        if features.nrows() == 0 {
            return Err(anyhow!("empty feature sequence"));
        }
        // (time, features) -> (channels, time)
        let mut hidden = conv1d(features.t(), &self.conv1_weight, &self.conv1_bias);
        hidden.mapv_inplace(relu);
        let mut hidden = conv1d(hidden.view(), &self.conv2_weight, &self.conv2_bias);
        hidden.mapv_inplace(relu);

        let pooled = hidden.map_axis(Axis(1), |row| {
            row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
        });
        let logits = self.fc_weight.dot(&pooled) + &self.fc_bias;
        Ok(logits.to_vec())
    }
}

fn relu(v: f32) -> f32 {
    v.max(0.0)
}

/// Same-length 1-D convolution over `(channels, time)` input.
fn conv1d(input: ArrayView2<'_, f32>, weight: &Array3<f32>, bias: &Array1<f32>) -> Array2<f32> {
    let (out_channels, _, kernel) = weight.dim();
    let len = input.ncols();
    let pad = kernel / 2;
    let mut out = Array2::<f32>::zeros((out_channels, len));
    for k in 0..kernel {
        // output t reads input t + k - pad
        let lo = pad.saturating_sub(k);
        let hi = (len + pad).saturating_sub(k).min(len);
        if lo >= hi {
            continue;
        }
        let tap = weight.slice(s![.., .., k]);
        let contribution = tap.dot(&input.slice(s![.., lo + k - pad..hi + k - pad]));
        let mut window = out.slice_mut(s![.., lo..hi]);
        window += &contribution;
    }
    out += &bias.view().insert_axis(Axis(1));
    out
}

fn tensor1(name: &str, data: Vec<f32>, len: usize) -> Result<Array1<f32>> {
    if data.len() != len {
        return Err(anyhow!("{} has {} values, expected {}", name, data.len(), len));
    }
    Ok(Array1::from(data))
}

fn tensor2(name: &str, rows: Vec<Vec<f32>>, shape: (usize, usize)) -> Result<Array2<f32>> {
    if rows.len() != shape.0 {
        return Err(anyhow!("{} has {} rows, expected {}", name, rows.len(), shape.0));
    }
    let mut flat = Vec::with_capacity(shape.0 * shape.1);
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != shape.1 {
            return Err(anyhow!(
                "{}[{}] has {} values, expected {}",
                name,
                i,
                row.len(),
                shape.1
            ));
        }
        flat.extend(row);
    }
    Array2::from_shape_vec(shape, flat).with_context(|| format!("reshape {}", name))
}

fn tensor3(
    name: &str,
    data: Vec<Vec<Vec<f32>>>,
    shape: (usize, usize, usize),
) -> Result<Array3<f32>> {
    if data.len() != shape.0 {
        return Err(anyhow!(
            "{} has {} output channels, expected {}",
            name,
            data.len(),
            shape.0
        ));
    }
    let mut flat = Vec::with_capacity(shape.0 * shape.1 * shape.2);
    for (o, channel) in data.into_iter().enumerate() {
        if channel.len() != shape.1 {
            return Err(anyhow!(
                "{}[{}] has {} input channels, expected {}",
                name,
                o,
                channel.len(),
                shape.1
            ));
        }
        for (i, taps) in channel.into_iter().enumerate() {
            if taps.len() != shape.2 {
                return Err(anyhow!(
                    "{}[{}][{}] has kernel size {}, expected {}",
                    name,
                    o,
                    i,
                    taps.len(),
                    shape.2
                ));
            }
            flat.extend(taps);
        }
    }
    Array3::from_shape_vec(shape, flat).with_context(|| format!("reshape {}", name))
}
