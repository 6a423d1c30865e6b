use log::{debug, info, warn};

use super::sink::VideoSink;
use super::source::{CameraConstraints, FrameSource, StreamSettings};
use crate::error::{CameraError, CameraErrorKind};
use crate::logging::DIAG_TARGET;

#[derive(Debug, Clone, PartialEq)]
pub enum CameraState {
    Idle,
    Loading,
    Active(StreamSettings),
    Error(CameraError),
}

/// カメラの取得と解放
///
/// Holds at most one stream; it lives in the shared [`VideoSink`] so the pose
/// detector can read from it. Dropping the camera releases the stream.
pub struct Camera<S: FrameSource> {
    source: S,
    sink: VideoSink,
    state: CameraState,
}

impl<S: FrameSource> Camera<S> {
    pub fn new(source: S) -> Self {
        Self::with_sink(source, VideoSink::new())
    }

    pub fn with_sink(source: S, sink: VideoSink) -> Self {
        Self {
            source,
            sink,
            state: CameraState::Idle,
        }
    }

    pub fn sink(&self) -> &VideoSink {
        &self.sink
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, CameraState::Active(_)) && self.sink.has_active_stream()
    }

    /// 制約を厳しい順に試し、最初に成功したストリームを使う
    ///
    /// Any active stream is stopped first. If every attempt fails the error
    /// from the last attempt is returned.
    pub fn start(&mut self, chain: &[CameraConstraints]) -> Result<StreamSettings, CameraError> {
        self.stop();
        self.state = CameraState::Loading;

        let fallback = [CameraConstraints::bare(0)];
        let chain = if chain.is_empty() { &fallback[..] } else { chain };

        let mut last_error = None;
        for (attempt, constraints) in chain.iter().enumerate() {
            match self.source.open(constraints) {
                Ok(stream) => {
                    let settings = stream.settings();
                    info!(
                        "Camera started with {} constraints (attempt {}): {}x{} @ {:.0}fps",
                        constraints.label(),
                        attempt + 1,
                        settings.width,
                        settings.height,
                        settings.frame_rate
                    );
                    if let Some(mut stale) = self.sink.attach(stream) {
                        stale.stop();
                    }
                    self.state = CameraState::Active(settings);
                    return Ok(settings);
                }
                Err(e) => {
                    debug!(
                        target: DIAG_TARGET,
                        "camera constraints {} rejected: {:?} ({})",
                        constraints.label(),
                        e.platform_name,
                        e.message
                    );
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| CameraError::new(CameraErrorKind::Other, "no camera constraints tried"));
        warn!("Camera unavailable: {}", err.user_message());
        self.state = CameraState::Error(err.clone());
        Err(err)
    }

    /// 全トラックを解放。何度呼んでもよい
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.sink.detach() {
            stream.stop();
            info!("Camera stopped");
        }
        if !matches!(self.state, CameraState::Error(_)) {
            self.state = CameraState::Idle;
        }
    }
}

impl<S: FrameSource> Drop for Camera<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
