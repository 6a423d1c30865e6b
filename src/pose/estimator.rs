use anyhow::Result;

use super::keypoint::Keypoint;
use crate::camera::Frame;

/// キーポイント推定モデルのインターフェース
///
/// The detector calls `prepare_backend` and `load_model` once, then `estimate`
/// once per throttled tick. All of them run on the blocking pool and never
/// overlap.
pub trait PoseEstimator: Send + 'static {
    /// 計算バックエンドの準備
    fn prepare_backend(&mut self) -> Result<()> {
        Ok(())
    }

    fn load_model(&mut self) -> Result<()>;

    /// 1人分のキーポイントを推定。順序は [`KeypointIndex`](super::KeypointIndex) に従う
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Keypoint>>;

    fn name(&self) -> &str {
        "pose-estimator"
    }
}

impl<T: PoseEstimator + ?Sized> PoseEstimator for Box<T> {
    fn prepare_backend(&mut self) -> Result<()> {
        (**self).prepare_backend()
    }

    fn load_model(&mut self) -> Result<()> {
        (**self).load_model()
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Keypoint>> {
        (**self).estimate(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
