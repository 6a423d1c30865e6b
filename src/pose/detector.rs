use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::estimator::PoseEstimator;
use super::keypoint::{DetectionFloor, PoseFrame};
use crate::camera::{Frame, SinkFrame, VideoSink};
use crate::config::DetectorConfig;
use crate::error::{DetectionError, PoseInitError};
use crate::logging::DIAG_TARGET;

/// 検出器の状態スナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub model_loaded: bool,
    pub video_ready: bool,
    pub stream_active: bool,
    pub loop_running: bool,
    pub consecutive_errors: u32,
}

#[derive(Default)]
struct LoopStatus {
    running: AtomicBool,
    consecutive_errors: AtomicU32,
}

struct DetectionTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    status: Arc<LoopStatus>,
}

fn lock<E>(m: &Mutex<E>) -> MutexGuard<'_, E> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 推論ループを管理する姿勢検出器
///
/// The estimator is shared with blocking workers (model load, health check)
/// and with the detection task, so it lives behind `Arc<Mutex<_>>`.
pub struct PoseDetector<E: PoseEstimator> {
    estimator: Arc<Mutex<E>>,
    config: DetectorConfig,
    floor: DetectionFloor,
    sink: Option<VideoSink>,
    model_loaded: bool,
    init_attempts: u32,
    last_init_error: Option<String>,
    pending_load: Option<JoinHandle<Result<(), PoseInitError>>>,
    latest: Arc<watch::Sender<PoseFrame>>,
    task: Option<DetectionTask>,
}

impl<E: PoseEstimator> PoseDetector<E> {
    pub fn new(estimator: E, config: DetectorConfig) -> Self {
        let floor = DetectionFloor {
            min_confidence: config.detection_confidence,
            keypoint_confidence: config.keypoint_confidence,
            min_keypoints: config.min_detected_keypoints,
        };
        let (latest, _) = watch::channel(PoseFrame::empty());
        Self {
            estimator: Arc::new(Mutex::new(estimator)),
            config,
            floor,
            sink: None,
            model_loaded: false,
            init_attempts: 0,
            last_init_error: None,
            pending_load: None,
            latest: Arc::new(latest),
            task: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.model_loaded
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|t| t.status.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// バックエンドとモデルを読み込む
    ///
    /// Already initialized: only rebinds the video sink. Each failed attempt is
    /// retried after `init_retry_delay * attempt` until `max_init_attempts`
    /// attempts have been made; from then on every call fails with
    /// `MaxInitAttemptsExceeded` until [`reset`](Self::reset).
    pub async fn initialize(&mut self, sink: VideoSink) -> Result<(), PoseInitError> {
        self.sink = Some(sink);
        if self.model_loaded {
            debug!("pose detector already initialized, video sink rebound");
            return Ok(());
        }

        let max = self.config.max_init_attempts;
        if self.init_attempts >= max {
            return Err(PoseInitError::MaxInitAttemptsExceeded {
                attempts: self.init_attempts,
                last: self.last_init_error.clone().unwrap_or_default(),
            });
        }

        loop {
            self.init_attempts += 1;
            let attempt = self.init_attempts;
            info!("Loading pose model (attempt {}/{})", attempt, max);

            match self.load_once().await {
                Ok(()) => {
                    self.model_loaded = true;
                    self.last_init_error = None;
                    info!("Pose model loaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!("pose model load attempt {} failed: {}", attempt, e);
                    self.last_init_error = Some(e.to_string());
                    if attempt >= max {
                        error!("pose model failed to load after {} attempts", attempt);
                        return Err(PoseInitError::MaxInitAttemptsExceeded {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    tokio::time::sleep(self.config.init_retry_delay() * attempt).await;
                }
            }
        }
    }

    /// A load that outlives its timeout keeps running on the blocking pool.
    /// The next attempt waits on that same job instead of starting a second
    /// load against the locked estimator.
    async fn load_once(&mut self) -> Result<(), PoseInitError> {
        let timeout = self.config.model_load_timeout();
        let mut job = match self.pending_load.take() {
            Some(job) => {
                debug!("waiting on the previous model load");
                job
            }
            None => {
                let estimator = Arc::clone(&self.estimator);
                tokio::task::spawn_blocking(move || {
                    let mut est = lock(&estimator);
                    est.prepare_backend()
                        .map_err(|e| PoseInitError::Backend(format!("{:#}", e)))?;
                    est.load_model().map_err(|e| PoseInitError::Model(format!("{:#}", e)))
                })
            }
        };

        match tokio::time::timeout(timeout, &mut job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(PoseInitError::Model(format!("loader task failed: {}", join))),
            Err(_) => {
                self.pending_load = Some(job);
                Err(PoseInitError::Timeout(timeout))
            }
        }
    }

    /// ユーザーの「再試行」操作で試行回数をリセット
    pub fn reset(&mut self) {
        self.init_attempts = 0;
        self.last_init_error = None;
    }

    /// 推論ループを開始し、PoseFrame の受信側を返す
    ///
    /// The channel holds one frame: the loop waits for the consumer to take
    /// it before the next tick, so every frame is seen exactly once, in order.
    pub fn start_detection(&mut self) -> Result<mpsc::Receiver<PoseFrame>, DetectionError> {
        if !self.model_loaded {
            return Err(DetectionError::NotInitialized);
        }
        let sink = match &self.sink {
            Some(s) if s.has_active_stream() => s.clone(),
            _ => return Err(DetectionError::NoActiveStream),
        };

        self.stop_detection();

        let (frames, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let status = Arc::new(LoopStatus::default());
        status.running.store(true, Ordering::Release);

        let ctx = LoopContext {
            estimator: Arc::clone(&self.estimator),
            sink,
            status: Arc::clone(&status),
            latest: Arc::clone(&self.latest),
            frames,
            cancel: cancel.clone(),
            floor: self.floor,
            target_interval: self.config.target_interval(),
            poll_interval: self.config.poll_interval(),
            max_consecutive_errors: self.config.max_consecutive_errors.max(1),
        };
        let handle = tokio::spawn(detection_loop(ctx));

        info!(
            "Detection started (target interval {}ms)",
            self.config.target_interval_ms
        );
        self.task = Some(DetectionTask { cancel, handle, status });
        Ok(rx)
    }

    /// ループを止めて公開中の結果をクリア。何度呼んでもよい
    pub fn stop_detection(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            task.handle.abort();
            task.status.running.store(false, Ordering::Release);
            info!("Detection stopped");
        }
        self.latest.send_replace(PoseFrame::empty());
    }

    /// 最新の公開結果
    pub fn latest(&self) -> PoseFrame {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoseFrame> {
        self.latest.subscribe()
    }

    pub fn health_status(&self) -> HealthStatus {
        let (video_ready, stream_active) = match &self.sink {
            Some(s) => (s.is_ready(), s.has_active_stream()),
            None => (false, false),
        };
        let (loop_running, consecutive_errors) = match &self.task {
            Some(t) => (
                t.status.running.load(Ordering::Acquire),
                t.status.consecutive_errors.load(Ordering::Acquire),
            ),
            None => (false, 0),
        };
        HealthStatus {
            model_loaded: self.model_loaded,
            video_ready,
            stream_active,
            loop_running,
            consecutive_errors,
        }
    }

    /// 空のフレームで1回推論し、バックエンドが応答するか確認
    pub async fn perform_health_check(&self) -> Result<Duration, DetectionError> {
        if !self.model_loaded {
            return Err(DetectionError::NotInitialized);
        }
        let (width, height) = self
            .sink
            .as_ref()
            .and_then(|s| s.settings())
            .filter(|s| s.width > 0 && s.height > 0)
            .map(|s| (s.width, s.height))
            .unwrap_or((192, 192));
        let estimator = Arc::clone(&self.estimator);
        let timeout = self.config.health_check_timeout();
        let started = Instant::now();

        let job = tokio::task::spawn_blocking(move || {
            let frame = Frame::blank(width, height);
            lock(&estimator).estimate(&frame).map(|_| ())
        });

        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(Ok(()))) => {
                let elapsed = started.elapsed();
                debug!("health check passed in {}ms", elapsed.as_millis());
                Ok(elapsed)
            }
            Ok(Ok(Err(e))) => Err(DetectionError::Inference(format!("{:#}", e))),
            Ok(Err(join)) => Err(DetectionError::Inference(join.to_string())),
            Err(_) => {
                warn!("pose model health check timed out after {}ms", timeout.as_millis());
                Err(DetectionError::Unresponsive(timeout))
            }
        }
    }
}

impl<E: PoseEstimator> Drop for PoseDetector<E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

struct LoopContext<E: PoseEstimator> {
    estimator: Arc<Mutex<E>>,
    sink: VideoSink,
    status: Arc<LoopStatus>,
    latest: Arc<watch::Sender<PoseFrame>>,
    frames: mpsc::Sender<PoseFrame>,
    cancel: CancellationToken,
    floor: DetectionFloor,
    target_interval: Duration,
    poll_interval: Duration,
    max_consecutive_errors: u32,
}

impl<E: PoseEstimator> LoopContext<E> {
    /// 公開。キャンセルされたら false
    async fn publish(&self, frame: PoseFrame) -> bool {
        self.latest.send_replace(frame.clone());
        if self.frames.is_closed() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.frames.send(frame) => true,
        }
    }
}

async fn detection_loop<E: PoseEstimator>(ctx: LoopContext<E>) {
    let mut ticker = tokio::time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_inference: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // 前回の推論から target_interval 経っていなければスキップ
        let now = Instant::now();
        if let Some(t) = last_inference {
            if now.duration_since(t) < ctx.target_interval {
                continue;
            }
        }

        let frame = match ctx.sink.read_frame() {
            Ok(SinkFrame::Ready(frame)) => frame,
            Ok(SinkFrame::NotReady) => continue,
            Ok(SinkFrame::NoStream) => {
                debug!("video stream is gone, detection loop halted");
                break;
            }
            Err(e) => {
                debug!(target: DIAG_TARGET, "frame read failed: {:#}", e);
                continue;
            }
        };
        last_inference = Some(now);

        // 推論はブロッキングなのでランタイムのワーカーから外す
        let estimator = Arc::clone(&ctx.estimator);
        let job = tokio::task::spawn_blocking(move || lock(&estimator).estimate(&frame));
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            joined = job => match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("inference task failed: {}", e)),
            },
        };

        match result {
            Ok(points) => {
                ctx.status.consecutive_errors.store(0, Ordering::Release);
                let pose = PoseFrame::from_slice(&points, &ctx.floor, now);
                if !ctx.publish(pose).await {
                    break;
                }
            }
            Err(e) => {
                let errors = ctx.status.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(target: DIAG_TARGET, "inference failed ({} in a row): {:#}", errors, e);

                if !ctx.sink.has_active_stream() {
                    debug!("video stream is gone, detection loop halted");
                    break;
                }
                if errors >= ctx.max_consecutive_errors {
                    warn!("{} consecutive inference errors, clearing pose results", errors);
                    ctx.status.consecutive_errors.store(0, Ordering::Release);
                    if !ctx.publish(PoseFrame::empty()).await {
                        break;
                    }
                }
            }
        }
    }

    ctx.status.running.store(false, Ordering::Release);
}
