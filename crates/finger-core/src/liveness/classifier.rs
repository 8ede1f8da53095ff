//! Ten-crop ResNet-18 liveness classifier.
//!
//! The network mirrors torchvision's `resnet18` with the fully connected
//! layer replaced by `Linear(512, 256) -> ReLU -> Dropout -> Linear(256, 2)
//! -> LogSoftmax`. Parameter names follow the torchvision state dict so a
//! checkpoint saved from PyTorch loads without renaming.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder};
use tracing::{debug, info};

use crate::capture::CapturedImage;
use crate::errors::{AppError, AppResult};
use crate::liveness::preprocess::{crops_to_tensor, ten_crop};
use crate::liveness::{Classify, LivenessVerdict};

const BATCH_NORM_EPS: f64 = 1e-5;
const DISTRIBUTED_PREFIX: &str = "module.";

/// Maps a `(N, 3, 224, 224)` batch of crops to `(N, 2)` class scores.
pub trait LivenessModel: Send + Sync {
    fn forward(&self, crops: &Tensor) -> candle_core::Result<Tensor>;
}

struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl BasicBlock {
    fn new(c_in: usize, c_out: usize, stride: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv3x3 = |stride| Conv2dConfig {
            padding: 1,
            stride,
            ..Default::default()
        };
        let conv1 = conv2d_no_bias(c_in, c_out, 3, conv3x3(stride), vb.pp("conv1"))?;
        let bn1 = batch_norm(c_out, BATCH_NORM_EPS, vb.pp("bn1"))?;
        let conv2 = conv2d_no_bias(c_out, c_out, 3, conv3x3(1), vb.pp("conv2"))?;
        let bn2 = batch_norm(c_out, BATCH_NORM_EPS, vb.pp("bn2"))?;
        let downsample = if stride != 1 || c_in != c_out {
            let cfg = Conv2dConfig {
                stride,
                ..Default::default()
            };
            let conv = conv2d_no_bias(c_in, c_out, 1, cfg, vb.pp("downsample.0"))?;
            let bn = batch_norm(c_out, BATCH_NORM_EPS, vb.pp("downsample.1"))?;
            Some((conv, bn))
        } else {
            None
        };
        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let ys = xs
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .apply(&self.conv2)?
            .apply_t(&self.bn2, false)?;
        let shortcut = match &self.downsample {
            Some((conv, bn)) => xs.apply(conv)?.apply_t(bn, false)?,
            None => xs.clone(),
        };
        (ys + shortcut)?.relu()
    }
}

pub struct ResNet18 {
    conv1: Conv2d,
    bn1: BatchNorm,
    layers: Vec<BasicBlock>,
    fc_hidden: Linear,
    fc_out: Linear,
}

impl ResNet18 {
    pub fn new(vb: VarBuilder) -> candle_core::Result<Self> {
        let stem = Conv2dConfig {
            padding: 3,
            stride: 2,
            ..Default::default()
        };
        let conv1 = conv2d_no_bias(3, 64, 7, stem, vb.pp("conv1"))?;
        let bn1 = batch_norm(64, BATCH_NORM_EPS, vb.pp("bn1"))?;

        let mut layers = Vec::with_capacity(8);
        let stages = [(64, 64, 1), (64, 128, 2), (128, 256, 2), (256, 512, 2)];
        for (stage, (c_in, c_out, stride)) in stages.into_iter().enumerate() {
            let vb_layer = vb.pp(format!("layer{}", stage + 1));
            layers.push(BasicBlock::new(c_in, c_out, stride, vb_layer.pp("0"))?);
            layers.push(BasicBlock::new(c_out, c_out, 1, vb_layer.pp("1"))?);
        }

        // fc.1 is the ReLU and fc.2 the dropout; neither has parameters.
        let fc_hidden = linear(512, 256, vb.pp("fc.0"))?;
        let fc_out = linear(256, 2, vb.pp("fc.3"))?;
        Ok(Self {
            conv1,
            bn1,
            layers,
            fc_hidden,
            fc_out,
        })
    }
}

impl LivenessModel for ResNet18 {
    fn forward(&self, crops: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = crops
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .pad_with_same(D::Minus1, 1, 1)?
            .pad_with_same(D::Minus2, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;
        for block in &self.layers {
            xs = block.forward(&xs)?;
        }
        let pooled = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        let logits = pooled
            .apply(&self.fc_hidden)?
            .relu()?
            .apply(&self.fc_out)?;
        candle_nn::ops::log_softmax(&logits, D::Minus1)
    }
}

/// Drops the `module.` prefix that `DataParallel` checkpoints carry.
pub fn strip_distributed_prefix(tensors: HashMap<String, Tensor>) -> HashMap<String, Tensor> {
    tensors
        .into_iter()
        .map(|(name, tensor)| match name.strip_prefix(DISTRIBUTED_PREFIX) {
            Some(stripped) => (stripped.to_string(), tensor),
            None => (name, tensor),
        })
        .collect()
}

fn read_weights(path: &Path, device: &Device) -> candle_core::Result<HashMap<String, Tensor>> {
    let is_safetensors = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("safetensors"))
        .unwrap_or(false);
    if is_safetensors {
        candle_core::safetensors::load(path, device)
    } else {
        let tensors = candle_core::pickle::read_all(path)?;
        tensors
            .into_iter()
            .map(|(name, tensor)| Ok((name, tensor.to_device(device)?)))
            .collect()
    }
}

pub struct ImageClassifier {
    model: Box<dyn LivenessModel>,
    device: Device,
}

impl ImageClassifier {
    /// Loads the ResNet-18 weights once; any failure is `ClassifierLoad`.
    pub fn load(path: &Path) -> AppResult<Self> {
        let load_err = |message: String| AppError::ClassifierLoad {
            path: path.to_path_buf(),
            message,
        };
        if !path.is_file() {
            return Err(load_err("model file not found".into()));
        }
        let device = Device::cuda_if_available(0).map_err(|err| load_err(err.to_string()))?;
        let tensors = read_weights(path, &device).map_err(|err| load_err(err.to_string()))?;
        let tensors = strip_distributed_prefix(tensors);
        debug!(parameters = tensors.len(), "liveness weights read");
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = ResNet18::new(vb).map_err(|err| load_err(err.to_string()))?;
        info!(
            path = %path.display(),
            device = if device.is_cuda() { "cuda" } else { "cpu" },
            "liveness model loaded"
        );
        Ok(Self {
            model: Box::new(model),
            device,
        })
    }

    pub fn with_model(model: Box<dyn LivenessModel>, device: Device) -> Self {
        Self {
            model,
            device,
        }
    }

    /// Per-crop class scores, one row per crop in `ten_crop` order.
    pub fn crop_scores(&self, image: &CapturedImage) -> AppResult<Vec<Vec<f32>>> {
        let crops = ten_crop(&image.to_rgb());
        let batch = crops_to_tensor(&crops, &self.device)?;
        let scores = self.model.forward(&batch)?;
        Ok(scores.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

/// Averages the crop rows and picks the higher class; ties go to fake.
pub fn ensemble_verdict(scores: &[Vec<f32>]) -> AppResult<LivenessVerdict> {
    if scores.is_empty() {
        return Err(AppError::Inference("model produced no crop scores".into()));
    }
    let mut totals = [0f32; 2];
    for row in scores {
        if row.len() != 2 {
            return Err(AppError::Inference(format!(
                "expected 2 class scores per crop, got {}",
                row.len()
            )));
        }
        totals[0] += row[0];
        totals[1] += row[1];
    }
    let count = scores.len() as f32;
    let (fake, live) = (totals[0] / count, totals[1] / count);
    let class = if live > fake { 1 } else { 0 };
    Ok(LivenessVerdict::from_class(class))
}

impl Classify for ImageClassifier {
    fn predict(&self, image: &CapturedImage) -> AppResult<LivenessVerdict> {
        let scores = self.crop_scores(image)?;
        let verdict = ensemble_verdict(&scores)?;
        debug!(?verdict, crops = scores.len(), "liveness classified");
        Ok(verdict)
    }
}
