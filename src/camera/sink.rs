use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use super::frame::Frame;
use super::source::{MediaStream, ReadyState, StreamSettings};

/// カメラと検出器が共有するビデオ出力先
///
/// The camera attaches and detaches streams; the detector only reads frames.
#[derive(Clone, Default)]
pub struct VideoSink {
    inner: Arc<Mutex<Option<Box<dyn MediaStream>>>>,
}

/// `read_frame` の結果
#[derive(Debug)]
pub enum SinkFrame {
    Ready(Frame),
    /// 再生可能でない、または解像度0（エラーではない）
    NotReady,
    /// ストリームが外された、もしくはトラックが終了した
    NoStream,
}

impl VideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn MediaStream>>> {
        // A panic while holding the lock leaves the stream slot intact.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 新しいストリームを接続。以前のストリームを返す
    pub(crate) fn attach(&self, stream: Box<dyn MediaStream>) -> Option<Box<dyn MediaStream>> {
        self.lock().replace(stream)
    }

    pub(crate) fn detach(&self) -> Option<Box<dyn MediaStream>> {
        self.lock().take()
    }

    pub fn has_active_stream(&self) -> bool {
        self.lock().as_ref().map(|s| s.is_live()).unwrap_or(false)
    }

    pub fn settings(&self) -> Option<StreamSettings> {
        self.lock().as_ref().map(|s| s.settings())
    }

    pub fn ready_state(&self) -> ReadyState {
        self.lock().as_ref().map(|s| s.ready_state()).unwrap_or(ReadyState::Nothing)
    }

    /// 再生可能かつ解像度が0でない
    pub fn is_ready(&self) -> bool {
        let guard = self.lock();
        match guard.as_ref() {
            Some(s) => {
                let settings = s.settings();
                s.is_live() && s.ready_state().is_playable() && settings.width > 0 && settings.height > 0
            }
            None => false,
        }
    }

    pub fn read_frame(&self) -> Result<SinkFrame> {
        let mut guard = self.lock();
        let stream = match guard.as_mut() {
            Some(s) if s.is_live() => s,
            _ => return Ok(SinkFrame::NoStream),
        };
        let settings = stream.settings();
        if !stream.ready_state().is_playable() || settings.width == 0 || settings.height == 0 {
            return Ok(SinkFrame::NotReady);
        }
        match stream.read_frame()? {
            Some(frame) if !frame.is_empty() => Ok(SinkFrame::Ready(frame)),
            _ => Ok(SinkFrame::NotReady),
        }
    }
}
