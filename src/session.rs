//! One measurement run: camera -> detector -> trackers -> capture -> size.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::camera::{Camera, FrameSource};
use crate::catalog::Item;
use crate::config::Config;
use crate::measurement::{MeasurementCapture, MeasurementProvider, Measurements};
use crate::pose::{PoseDetector, PoseEstimator, PoseFrame};
use crate::sizing::{self, SizeRecommendation};
use crate::tracker::{RequirementValidator, StabilityTracker};

/// UI に流すイベント
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status {
        message: String,
        /// 要件の平均進捗 (0.0〜1.0)
        progress: f32,
        stable_count: usize,
        total_count: usize,
    },
    /// 全要件を満たした（1秒に1回まで）
    Ready { confidence: f32 },
    /// 待ち時間を超えた。セッションは続行する
    TimedOut { waited: Duration },
    Captured {
        measurements: Measurements,
        recommendation: SizeRecommendation,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub item_id: String,
    pub category: String,
    pub measurements: Measurements,
    pub recommendation: SizeRecommendation,
    pub frames_processed: u64,
    pub elapsed_ms: u64,
}

type EventSender = Option<mpsc::UnboundedSender<SessionEvent>>;

fn emit(events: &EventSender, event: SessionEvent) {
    if let Some(tx) = events {
        // 受信側が閉じていても計測は続ける
        let _ = tx.send(event);
    }
}

/// 計測セッション
pub struct MeasurementSession<S: FrameSource, E: PoseEstimator> {
    config: Config,
    camera: Camera<S>,
    detector: PoseDetector<E>,
    stability: StabilityTracker,
    validator: RequirementValidator,
    capture: MeasurementCapture,
    events: EventSender,
}

impl<S: FrameSource, E: PoseEstimator> MeasurementSession<S, E> {
    pub fn new(config: Config, source: S, estimator: E, provider: Box<dyn MeasurementProvider>) -> Self {
        Self {
            camera: Camera::new(source),
            detector: PoseDetector::new(estimator, config.detector.clone()),
            stability: StabilityTracker::from_config(&config.stability),
            validator: RequirementValidator::new(config.validation.clone()),
            capture: MeasurementCapture::new(&config.capture, provider),
            events: None,
            config,
        }
    }

    /// イベントの受信側を作る
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn camera(&self) -> &Camera<S> {
        &self.camera
    }

    pub fn detector(&self) -> &PoseDetector<E> {
        &self.detector
    }

    /// 姿勢が整うまで待って採寸し、サイズを推薦する
    ///
    /// Detection and the camera are always released before returning,
    /// whether the run succeeds, fails or is cancelled.
    pub async fn run(&mut self, item: &Item, cancel: CancellationToken) -> Result<SessionOutcome> {
        let result = self.run_inner(item, &cancel).await;
        self.shutdown();
        if let Err(e) = &result {
            warn!("Measurement session ended: {:#}", e);
        }
        result
    }

    /// 検出停止とカメラ解放
    pub fn shutdown(&mut self) {
        self.detector.stop_detection();
        self.camera.stop();
    }

    async fn run_inner(&mut self, item: &Item, cancel: &CancellationToken) -> Result<SessionOutcome> {
        let started = Instant::now();
        info!("Measuring for '{}' (category {})", item.title, item.category());

        let settings = self
            .camera
            .start(&self.config.camera.constraint_chain())
            .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;
        debug!("camera settings: {:?}", settings);

        self.detector
            .initialize(self.camera.sink().clone())
            .await
            .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;
        let mut frames = self
            .detector
            .start_detection()
            .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;

        self.validator.configure(&item.category_id);
        self.stability.reset();
        let events = self.events.clone();
        self.validator.set_on_complete(move |state| {
            emit(&events, SessionEvent::Ready { confidence: state.confidence });
        });

        let timeout = self.config.validation.timeout();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut timed_out = false;
        let mut frames_processed = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => bail!("measurement cancelled"),
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    warn!("Pose not ready after {}s, still waiting", timeout.as_secs());
                    emit(&self.events, SessionEvent::TimedOut { waited: timeout });
                    if let Err(e) = self.detector.perform_health_check().await {
                        warn!("health check after timeout failed: {}", e);
                    }
                }
                frame = frames.recv() => {
                    let frame = frame.context("pose detection stopped before a measurement was taken")?;
                    frames_processed += 1;
                    if let Some(measurements) = self.process(&frame)? {
                        let recommendation = sizing::recommend(item, &measurements);
                        info!(
                            "Recommended size {} (confidence {:.2}) for '{}'",
                            recommendation.size, recommendation.confidence, item.title
                        );
                        emit(&self.events, SessionEvent::Captured {
                            measurements,
                            recommendation: recommendation.clone(),
                        });
                        return Ok(SessionOutcome {
                            item_id: item.id.clone(),
                            category: item.category().to_string(),
                            measurements,
                            recommendation,
                            frames_processed,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// 1フレーム分の更新。採寸できたら Some
    fn process(&mut self, frame: &PoseFrame) -> Result<Option<Measurements>> {
        let now = frame.captured_at;
        let stability = self.stability.update_at(frame, now).clone();
        let validation = self.validator.update_at(frame, now).clone();

        emit(
            &self.events,
            SessionEvent::Status {
                message: validation.message.clone(),
                progress: validation.progress,
                stable_count: stability.stable_count,
                total_count: stability.total_count,
            },
        );

        if !self.capture.is_ready(&validation, &stability) {
            return Ok(None);
        }
        let measurements = self.capture.capture(frame, &validation, &stability)?;
        Ok(Some(measurements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CameraErrorKind;
    use crate::measurement::PlaceholderMeasurements;
    use crate::sim::{ScriptedEstimator, SimulatedCamera};

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.detector.target_interval_ms = 20;
        config.detector.poll_interval_ms = 2;
        config.detector.init_retry_delay_ms = 1;
        config
    }

    fn shirt() -> Item {
        Item::from_title("sku-1", "Oxford Shirt", vec![]).with_sizes(["S", "M", "L"])
    }

    #[tokio::test]
    async fn test_session_measures_and_recommends() {
        let source = SimulatedCamera::new(640, 480);
        let stats = source.stats();
        let mut session = MeasurementSession::new(
            fast_config(),
            source,
            ScriptedEstimator::standing().jitter(0.001, 3),
            Box::new(PlaceholderMeasurements),
        );
        let mut events = session.subscribe();

        let outcome = tokio::time::timeout(Duration::from_secs(10), session.run(&shirt(), CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.category, "shirts");
        assert_eq!(outcome.measurements, PlaceholderMeasurements::VALUES);
        // 胸囲 38 -> M
        assert_eq!(outcome.recommendation.size, "M");
        assert!(outcome.elapsed_ms >= 2000);
        assert_eq!(stats.live_streams(), 0);
        assert!(!session.detector().is_running());

        let mut saw_ready = false;
        let mut captured = None;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Ready { .. } => saw_ready = true,
                SessionEvent::Captured { recommendation, .. } => captured = Some(recommendation),
                _ => {}
            }
        }
        assert!(saw_ready);
        assert_eq!(captured, Some(outcome.recommendation));
    }

    #[tokio::test]
    async fn test_timeout_is_not_fatal_and_cancel_releases_camera() {
        let mut config = fast_config();
        config.validation.timeout_ms = 50;
        let source = SimulatedCamera::new(640, 480);
        let stats = source.stats();
        let mut session = MeasurementSession::new(
            config,
            source,
            ScriptedEstimator::standing().absent_for(u32::MAX),
            Box::new(PlaceholderMeasurements),
        );
        let mut events = session.subscribe();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        let watcher = tokio::spawn(async move {
            let mut timeouts = 0;
            let mut last_message = String::new();
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::TimedOut { .. } => {
                        timeouts += 1;
                        canceller.cancel();
                    }
                    SessionEvent::Status { message, .. } => last_message = message,
                    _ => {}
                }
            }
            (timeouts, last_message)
        });

        let result = session.run(&shirt(), cancel).await;
        assert!(result.is_err());
        assert_eq!(stats.live_streams(), 0);
        assert!(!session.camera().is_active());
        drop(session);

        let (timeouts, last_message) = watcher.await.unwrap();
        assert_eq!(timeouts, 1);
        assert_eq!(last_message, crate::tracker::validator::MESSAGE_NOT_DETECTED);
    }

    #[tokio::test]
    async fn test_camera_failure_is_reported() {
        let mut session = MeasurementSession::new(
            fast_config(),
            SimulatedCamera::new(640, 480).reject_with("NotAllowedError"),
            ScriptedEstimator::standing(),
            Box::new(PlaceholderMeasurements),
        );
        let err = session.run(&shirt(), CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().starts_with(CameraErrorKind::PermissionDenied.user_message()));
        assert!(!session.detector().is_initialized());
    }

    #[tokio::test]
    async fn test_model_failure_releases_camera() {
        let mut config = fast_config();
        config.detector.max_init_attempts = 2;
        let source = SimulatedCamera::new(640, 480);
        let stats = source.stats();
        let mut session = MeasurementSession::new(
            config,
            source,
            ScriptedEstimator::standing().fail_first_loads(5),
            Box::new(PlaceholderMeasurements),
        );
        assert!(session.run(&shirt(), CancellationToken::new()).await.is_err());
        assert_eq!(stats.attempts(), 1);
        assert_eq!(stats.live_streams(), 0);
    }
}
