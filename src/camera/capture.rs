use anyhow::{Context, Result};
use log::debug;
use opencv::{
    core::{AlgorithmHint, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};

use super::frame::Frame;
use super::source::{CameraConstraints, FrameSource, MediaStream, ReadyState, StreamSettings};
use crate::error::{CameraError, CameraErrorKind};
use crate::logging::DIAG_TARGET;

/// OpenCVを使用したカメラ
pub struct OpenCvSource;

impl OpenCvSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenCvSource {
    fn default() -> Self {
        Self::new()
    }
}

fn map_cv_error(e: opencv::Error) -> CameraError {
    debug!(target: DIAG_TARGET, "opencv error code={} message={}", e.code, e.message);
    CameraError::new(CameraErrorKind::Other, e.message)
}

impl FrameSource for OpenCvSource {
    fn open(&mut self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, CameraError> {
        let index = constraints.device_index;
        let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32).map_err(map_cv_error)?;

        if !capture.is_opened().map_err(map_cv_error)? {
            return Err(CameraError::from_platform(
                "NotFoundError",
                format!("Camera {} is not available", index),
            ));
        }

        if constraints.facing_mode.is_some() {
            debug!(target: DIAG_TARGET, "facing mode is ignored by the OpenCV backend");
        }

        // 解像度を設定
        if let Some(w) = constraints.width {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, w as f64).map_err(map_cv_error)?;
        }
        if let Some(h) = constraints.height {
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, h as f64).map_err(map_cv_error)?;
        }
        if let Some(f) = constraints.frame_rate {
            capture.set(videoio::CAP_PROP_FPS, f as f64).map_err(map_cv_error)?;
        }
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0).map_err(map_cv_error)?;

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(map_cv_error)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(map_cv_error)? as u32;
        let frame_rate = capture.get(videoio::CAP_PROP_FPS).map_err(map_cv_error)? as f32;

        Ok(Box::new(OpenCvStream {
            capture,
            settings: StreamSettings { width, height, frame_rate },
            stopped: false,
        }))
    }
}

pub struct OpenCvStream {
    capture: VideoCapture,
    settings: StreamSettings,
    stopped: bool,
}

impl OpenCvStream {
    /// BGR の Mat を RGB8 のフレームに変換
    fn to_frame(bgr: &Mat) -> Result<Frame> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0, AlgorithmHint::ALGO_HINT_DEFAULT)?;
        let data = rgb.data_bytes().context("frame is not continuous")?.to_vec();
        Ok(Frame::new(rgb.cols() as u32, rgb.rows() as u32, data))
    }
}

impl MediaStream for OpenCvStream {
    fn settings(&self) -> StreamSettings {
        self.settings
    }

    fn is_live(&self) -> bool {
        !self.stopped && self.capture.is_opened().unwrap_or(false)
    }

    fn ready_state(&self) -> ReadyState {
        // VideoCapture はオープン直後から読み出せる
        if self.is_live() {
            ReadyState::EnoughData
        } else {
            ReadyState::Nothing
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut bgr = Mat::default();
        self.capture.read(&mut bgr).context("Failed to read frame")?;
        if bgr.empty() {
            return Ok(None);
        }
        Self::to_frame(&bgr).map(Some)
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.capture.release() {
            debug!(target: DIAG_TARGET, "camera release failed: {}", e);
        }
    }
}
