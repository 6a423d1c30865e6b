//! パイプライン全体のエラー型
//!
//! Raw platform identifiers are kept inside the errors so they can be written
//! to the diagnostic log channel, while `user_message` gives the text that is
//! safe to show on screen.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// カメラエラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraErrorKind {
    PermissionDenied,
    NotFound,
    Busy,
    Unsupported,
    Other,
}

impl CameraErrorKind {
    /// プラットフォームのエラー名から分類
    pub fn from_platform_name(name: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => Self::PermissionDenied,
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => Self::NotFound,
            "NotReadableError" | "TrackStartError" | "AbortError" => Self::Busy,
            "NotSupportedError" | "TypeError" => Self::Unsupported,
            _ => Self::Other,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Camera access was denied. Allow camera access in your settings and try again."
            }
            Self::NotFound => "No camera was found on this device.",
            Self::Busy => "The camera is in use by another application. Close it and try again.",
            Self::Unsupported => "This device does not support camera capture.",
            Self::Other => "The camera could not be started. Please try again.",
        }
    }
}

impl fmt::Display for CameraErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::Busy => "busy",
            Self::Unsupported => "unsupported",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("camera error ({kind}): {message}")]
pub struct CameraError {
    pub kind: CameraErrorKind,
    /// プラットフォームが返したエラー名 (e.g. "NotAllowedError")
    pub platform_name: Option<String>,
    pub message: String,
}

impl CameraError {
    pub fn new(kind: CameraErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            platform_name: None,
            message: message.into(),
        }
    }

    pub fn from_platform(name: &str, message: impl Into<String>) -> Self {
        Self {
            kind: CameraErrorKind::from_platform_name(name),
            platform_name: Some(name.to_string()),
            message: message.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

#[derive(Debug, Error)]
pub enum PoseInitError {
    #[error("compute backend failed to initialize: {0}")]
    Backend(String),

    #[error("pose model failed to load: {0}")]
    Model(String),

    #[error("pose model load timed out after {0:?}")]
    Timeout(Duration),

    #[error("pose model initialization failed {attempts} times, giving up: {last}")]
    MaxInitAttemptsExceeded { attempts: u32, last: String },
}

impl PoseInitError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MaxInitAttemptsExceeded { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MaxInitAttemptsExceeded { .. } => {
                "The pose model could not be loaded. Refresh the page to try again."
            }
            _ => "Loading the pose model, please wait...",
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("pose detector is not initialized")]
    NotInitialized,

    #[error("video sink has no active stream")]
    NoActiveStream,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("pose model did not respond within {0:?}")]
    Unresponsive(Duration),
}

impl DetectionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotInitialized => "The pose model is not ready yet.",
            Self::NoActiveStream => "The camera is not running. Start the camera and try again.",
            Self::Inference(_) => "Pose detection hit an error, retrying...",
            Self::Unresponsive(_) => "The pose model stopped responding. Press retry or refresh.",
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("not ready to capture: {0}")]
    NotReady(String),

    #[error("no pose detected in the capture frame")]
    NoPose,

    #[error("measurement failed: {0}")]
    Measurement(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name_mapping() {
        assert_eq!(CameraErrorKind::from_platform_name("NotAllowedError"), CameraErrorKind::PermissionDenied);
        assert_eq!(CameraErrorKind::from_platform_name("PermissionDeniedError"), CameraErrorKind::PermissionDenied);
        assert_eq!(CameraErrorKind::from_platform_name("NotFoundError"), CameraErrorKind::NotFound);
        assert_eq!(CameraErrorKind::from_platform_name("OverconstrainedError"), CameraErrorKind::NotFound);
        assert_eq!(CameraErrorKind::from_platform_name("NotReadableError"), CameraErrorKind::Busy);
        assert_eq!(CameraErrorKind::from_platform_name("TrackStartError"), CameraErrorKind::Busy);
        assert_eq!(CameraErrorKind::from_platform_name("NotSupportedError"), CameraErrorKind::Unsupported);
        assert_eq!(CameraErrorKind::from_platform_name("SomethingElse"), CameraErrorKind::Other);
    }

    #[test]
    fn test_camera_error_keeps_raw_name() {
        let err = CameraError::from_platform("NotReadableError", "Could not start video source");
        assert_eq!(err.kind, CameraErrorKind::Busy);
        assert_eq!(err.platform_name.as_deref(), Some("NotReadableError"));
        assert!(!err.user_message().contains("NotReadableError"));
    }

    #[test]
    fn test_only_max_attempts_is_fatal() {
        assert!(!PoseInitError::Model("x".into()).is_fatal());
        assert!(PoseInitError::MaxInitAttemptsExceeded { attempts: 3, last: "x".into() }.is_fatal());
    }
}
