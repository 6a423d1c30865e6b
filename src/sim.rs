//! Simulated camera and scripted pose estimator.
//!
//! Used by the tests and by `posefit --simulate` to run the whole pipeline
//! without a webcam or a model file.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::{CameraConstraints, Frame, FrameSource, MediaStream, ReadyState, StreamSettings};
use crate::error::CameraError;
use crate::pose::{Keypoint, KeypointIndex, PoseEstimator};

/// カメラ側の計測カウンタ
#[derive(Debug, Default)]
pub struct SimStats {
    attempts: AtomicU32,
    live: AtomicUsize,
}

impl SimStats {
    /// `open` の呼び出し回数
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 停止されていないストリーム数
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// シミュレーションカメラ
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    frame_rate: f32,
    reject_first: u32,
    reject_first_name: String,
    reject_rest: Option<String>,
    stats: Arc<SimStats>,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_rate: 30.0,
            reject_first: 0,
            reject_first_name: String::new(),
            reject_rest: None,
            stats: Arc::new(SimStats::default()),
        }
    }

    /// 最初の `n` 回の `open` を指定のエラー名で失敗させる
    pub fn reject_attempts(mut self, n: u32, platform_name: &str) -> Self {
        self.reject_first = n;
        self.reject_first_name = platform_name.to_string();
        self
    }

    /// `reject_attempts` の後の試行をすべて失敗させる
    pub fn reject_with(mut self, platform_name: &str) -> Self {
        self.reject_rest = Some(platform_name.to_string());
        self
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }
}

impl FrameSource for SimulatedCamera {
    fn open(&mut self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, CameraError> {
        let attempt = self.stats.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.reject_first {
            return Err(CameraError::from_platform(
                &self.reject_first_name,
                format!("simulated rejection of {}", constraints.label()),
            ));
        }
        if let Some(name) = &self.reject_rest {
            return Err(CameraError::from_platform(name, "simulated camera is unavailable"));
        }

        // ideal 値より大きい解像度は出さない
        let width = constraints.width.map_or(self.width, |w| w.min(self.width));
        let height = constraints.height.map_or(self.height, |h| h.min(self.height));
        let frame_rate = constraints
            .frame_rate
            .map_or(self.frame_rate, |f| (f as f32).min(self.frame_rate));

        let mut stream = SimulatedStream::new(width, height);
        stream.settings.frame_rate = frame_rate;
        stream.stats = Some(Arc::clone(&self.stats));
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(stream))
    }
}

#[derive(Debug)]
struct StreamShared {
    ready: Mutex<ReadyState>,
    ended: AtomicBool,
    stopped: AtomicBool,
}

/// テストからストリームを操作するハンドル
#[derive(Debug, Clone)]
pub struct StreamControl {
    shared: Arc<StreamShared>,
}

impl StreamControl {
    pub fn set_ready_state(&self, state: ReadyState) {
        *self.shared.ready.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// トラック終了（デバイス抜去など）
    pub fn end(&self) {
        self.shared.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

pub struct SimulatedStream {
    settings: StreamSettings,
    shared: Arc<StreamShared>,
    stats: Option<Arc<SimStats>>,
    frame_count: u32,
}

impl SimulatedStream {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            settings: StreamSettings {
                width,
                height,
                frame_rate: 30.0,
            },
            shared: Arc::new(StreamShared {
                ready: Mutex::new(ReadyState::EnoughData),
                ended: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
            stats: None,
            frame_count: 0,
        }
    }

    pub fn control(&self) -> StreamControl {
        StreamControl {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MediaStream for SimulatedStream {
    fn settings(&self) -> StreamSettings {
        self.settings
    }

    fn is_live(&self) -> bool {
        !self.shared.ended.load(Ordering::SeqCst) && !self.shared.stopped.load(Ordering::SeqCst)
    }

    fn ready_state(&self) -> ReadyState {
        *self.shared.ready.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.is_live() {
            bail!("stream has ended");
        }
        if !self.ready_state().is_playable() {
            return Ok(None);
        }
        self.frame_count = self.frame_count.wrapping_add(1);
        let mut frame = Frame::blank(self.settings.width, self.settings.height);
        // 1画素目にフレーム番号を書き込む
        if let Some(px) = frame.data.get_mut(..3) {
            px.copy_from_slice(&[(self.frame_count & 0xff) as u8, 0, 0]);
        }
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stats) = &self.stats {
            stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 推定器側の計測カウンタ
#[derive(Debug, Default)]
pub struct EstimatorStats {
    load_calls: AtomicU32,
    estimate_calls: AtomicU32,
}

impl EstimatorStats {
    pub fn load_calls(&self) -> u32 {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn estimate_calls(&self) -> u32 {
        self.estimate_calls.load(Ordering::SeqCst)
    }
}

/// 正面を向いて立っている姿勢
pub fn standing_pose() -> Vec<Keypoint> {
    const POINTS: [(f32, f32); KeypointIndex::COUNT] = [
        (0.50, 0.12), // nose
        (0.48, 0.10),
        (0.52, 0.10),
        (0.46, 0.11),
        (0.54, 0.11),
        (0.42, 0.22), // shoulders
        (0.58, 0.22),
        (0.38, 0.36), // elbows
        (0.62, 0.36),
        (0.37, 0.49), // wrists
        (0.63, 0.49),
        (0.45, 0.52), // hips
        (0.55, 0.52),
        (0.45, 0.70), // knees
        (0.55, 0.70),
        (0.45, 0.88), // ankles
        (0.55, 0.88),
    ];
    POINTS.iter().map(|&(x, y)| Keypoint::new(x, y, 0.9)).collect()
}

/// 台本どおりのキーポイントを返す推定器
pub struct ScriptedEstimator {
    poses: Vec<Vec<Keypoint>>,
    cursor: usize,
    absent_for: u32,
    fail_loads: u32,
    fail_estimates: u32,
    load_delay: Duration,
    estimate_delay: Duration,
    jitter: f32,
    rng: StdRng,
    stats: Arc<EstimatorStats>,
}

impl ScriptedEstimator {
    /// 順番に（最後まで行ったら先頭から）返す
    pub fn with_poses(poses: Vec<Vec<Keypoint>>) -> Self {
        Self {
            poses,
            cursor: 0,
            absent_for: 0,
            fail_loads: 0,
            fail_estimates: 0,
            load_delay: Duration::ZERO,
            estimate_delay: Duration::ZERO,
            jitter: 0.0,
            rng: StdRng::seed_from_u64(7),
            stats: Arc::new(EstimatorStats::default()),
        }
    }

    pub fn standing() -> Self {
        Self::with_poses(vec![standing_pose()])
    }

    /// 最初の `n` フレームは誰も映っていない
    pub fn absent_for(mut self, n: u32) -> Self {
        self.absent_for = n;
        self
    }

    pub fn fail_first_loads(mut self, n: u32) -> Self {
        self.fail_loads = n;
        self
    }

    /// 最初の `n` 回の推定を失敗させる（`u32::MAX` で常に失敗）
    pub fn failing_estimates(mut self, n: u32) -> Self {
        self.fail_estimates = n;
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn estimate_delay(mut self, delay: Duration) -> Self {
        self.estimate_delay = delay;
        self
    }

    /// 座標に ±`amount` の一様ノイズを加える
    pub fn jitter(mut self, amount: f32, seed: u64) -> Self {
        self.jitter = amount.abs();
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn stats(&self) -> Arc<EstimatorStats> {
        Arc::clone(&self.stats)
    }
}

impl PoseEstimator for ScriptedEstimator {
    fn load_model(&mut self) -> Result<()> {
        let call = self.stats.load_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        if call <= self.fail_loads {
            bail!("simulated model load failure #{}", call);
        }
        Ok(())
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Vec<Keypoint>> {
        let call = self.stats.estimate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.estimate_delay.is_zero() {
            std::thread::sleep(self.estimate_delay);
        }
        if call <= self.fail_estimates {
            bail!("simulated inference failure #{}", call);
        }
        if call <= self.absent_for || self.poses.is_empty() {
            return Ok(vec![Keypoint::default(); KeypointIndex::COUNT]);
        }

        let mut points = self.poses[self.cursor % self.poses.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        if self.jitter > 0.0 {
            for p in points.iter_mut() {
                p.x = (p.x + self.rng.gen_range(-self.jitter..=self.jitter)).clamp(0.0, 1.0);
                p.y = (p.y + self.rng.gen_range(-self.jitter..=self.jitter)).clamp(0.0, 1.0);
            }
        }
        Ok(points)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{DetectionFloor, PoseFrame};
    use std::time::Instant;

    #[test]
    fn test_standing_pose_is_detected() {
        let frame = PoseFrame::from_slice(&standing_pose(), &DetectionFloor::default(), Instant::now());
        assert!(frame.is_detected);
    }

    #[test]
    fn test_absent_then_present() {
        let mut est = ScriptedEstimator::standing().absent_for(2);
        let blank = Frame::blank(4, 4);
        assert!(est.estimate(&blank).unwrap().iter().all(|k| k.confidence == 0.0));
        assert!(est.estimate(&blank).unwrap().iter().all(|k| k.confidence == 0.0));
        assert_eq!(est.estimate(&blank).unwrap(), standing_pose());
        assert_eq!(est.stats().estimate_calls(), 3);
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let mut est = ScriptedEstimator::standing().jitter(0.01, 1);
        let base = standing_pose();
        let points = est.estimate(&Frame::blank(4, 4)).unwrap();
        for (p, b) in points.iter().zip(base.iter()) {
            assert!((p.x - b.x).abs() <= 0.01 + 1e-6);
            assert!((p.y - b.y).abs() <= 0.01 + 1e-6);
        }
    }

    #[test]
    fn test_stream_stop_counts_once() {
        let mut camera = SimulatedCamera::new(640, 480);
        let stats = camera.stats();
        let mut stream = camera.open(&CameraConstraints::bare(0)).unwrap();
        assert_eq!(stats.live_streams(), 1);
        stream.stop();
        stream.stop();
        drop(stream);
        assert_eq!(stats.live_streams(), 0);
    }

    #[test]
    fn test_ended_stream_errors_on_read() {
        let mut stream = SimulatedStream::new(8, 8);
        let control = stream.control();
        assert!(stream.read_frame().unwrap().is_some());
        control.end();
        assert!(!stream.is_live());
        assert!(stream.read_frame().is_err());
    }
}
