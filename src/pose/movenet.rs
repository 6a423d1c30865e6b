use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::estimator::PoseEstimator;
use super::keypoint::{Keypoint, KeypointIndex};
use crate::camera::Frame;

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: u32 = 192;

/// RGB フレームを MoveNet用の入力テンソルに変換
///
/// - 192x192 にリサイズ
/// - [1, 192, 192, 3] の f32 テンソルに変換 (0.0-255.0)
pub fn preprocess_for_movenet(frame: &Frame) -> Result<Array4<f32>> {
    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .context("frame buffer does not match its dimensions")?;
    let resized = imageops::resize(&rgb, MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE, FilterType::Triangle);

    let size = MOVENET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
        }
    }
    Ok(tensor)
}

/// ONNX Runtime で MoveNet を実行する推定器
pub struct MoveNetEstimator {
    model_path: PathBuf,
    session: Option<Session>,
}

impl MoveNetEstimator {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            session: None,
        }
    }
}

impl PoseEstimator for MoveNetEstimator {
    fn prepare_backend(&mut self) -> Result<()> {
        ort::init().commit().context("Failed to initialize ONNX Runtime")?;
        Ok(())
    }

    fn load_model(&mut self) -> Result<()> {
        if !self.model_path.exists() {
            bail!("model file not found: {}", self.model_path.display());
        }
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&self.model_path)
            .context("Failed to load ONNX model")?;
        self.session = Some(session);
        Ok(())
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Keypoint>> {
        let session = self.session.as_mut().context("model is not loaded")?;
        let input = preprocess_for_movenet(frame)?;
        let input_tensor = Tensor::from_array(input)?;
        let outputs = session
            .run(ort::inputs!["serving_default_input_0" => input_tensor])
            .context("Inference failed")?;

        // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)
        let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
            .try_extract_array()
            .context("Failed to extract output tensor")?;

        let keypoints = (0..KeypointIndex::COUNT)
            .map(|i| Keypoint::new(output[[0, 0, i, 1]], output[[0, 0, i, 0]], output[[0, 0, i, 2]]))
            .collect();
        Ok(keypoints)
    }

    fn name(&self) -> &str {
        "movenet"
    }
}
