pub mod detector;
pub mod estimator;
pub mod keypoint;
#[cfg(feature = "desktop")]
pub mod movenet;

pub use detector::{HealthStatus, PoseDetector};
pub use estimator::PoseEstimator;
pub use keypoint::{DetectionFloor, Keypoint, KeypointIndex, PoseFrame};
#[cfg(feature = "desktop")]
pub use movenet::{preprocess_for_movenet, MoveNetEstimator};
