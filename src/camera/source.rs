//! Camera capability traits.
//!
//! A [`FrameSource`] is the device side (permission prompt, constraint
//! negotiation); a [`MediaStream`] is one opened stream whose tracks must be
//! released with [`MediaStream::stop`].

use anyhow::Result;

use super::frame::Frame;
use crate::error::CameraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// フロントカメラ
    User,
    /// リアカメラ
    Environment,
}

/// 要求する解像度・フレームレート（ideal 値）
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConstraints {
    pub device_index: i32,
    pub facing_mode: Option<FacingMode>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl CameraConstraints {
    pub fn ideal(device_index: i32, facing: FacingMode, width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            device_index,
            facing_mode: Some(facing),
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
        }
    }

    pub fn minimal(device_index: i32, facing: FacingMode) -> Self {
        Self {
            device_index,
            facing_mode: Some(facing),
            width: None,
            height: None,
            frame_rate: None,
        }
    }

    /// 制約なし (`video: true`)
    pub fn bare(device_index: i32) -> Self {
        Self {
            device_index,
            facing_mode: None,
            width: None,
            height: None,
            frame_rate: None,
        }
    }

    pub fn label(&self) -> String {
        match (self.width, self.height, self.facing_mode) {
            (Some(w), Some(h), _) => format!("{}x{}@{}", w, h, self.frame_rate.unwrap_or(0)),
            (_, _, Some(f)) => format!("{:?} only", f),
            _ => "bare".to_string(),
        }
    }
}

/// 実際に得られたストリーム設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
}

/// `HTMLMediaElement.readyState` 相当
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Nothing,
    Metadata,
    CurrentData,
    EnoughData,
}

impl ReadyState {
    pub fn is_playable(&self) -> bool {
        *self >= ReadyState::CurrentData
    }
}

pub trait MediaStream: Send {
    fn settings(&self) -> StreamSettings;

    /// トラックがまだ生きているか
    fn is_live(&self) -> bool;

    fn ready_state(&self) -> ReadyState;

    /// 最新フレームを読む。まだ再生可能でなければ `Ok(None)`
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// 全トラックを解放する。複数回呼んでもよい
    fn stop(&mut self);
}

pub trait FrameSource: Send {
    fn open(&mut self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, CameraError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, CameraError> {
        (**self).open(constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_playable() {
        assert!(!ReadyState::Nothing.is_playable());
        assert!(!ReadyState::Metadata.is_playable());
        assert!(ReadyState::CurrentData.is_playable());
        assert!(ReadyState::EnoughData.is_playable());
    }

    #[test]
    fn test_constraint_labels() {
        assert_eq!(CameraConstraints::ideal(0, FacingMode::User, 640, 480, 30).label(), "640x480@30");
        assert_eq!(CameraConstraints::minimal(0, FacingMode::User).label(), "User only");
        assert_eq!(CameraConstraints::bare(0).label(), "bare");
    }
}
