pub mod acquire;
#[cfg(feature = "desktop")]
pub mod capture;
pub mod frame;
pub mod sink;
pub mod source;

pub use acquire::{Camera, CameraState};
#[cfg(feature = "desktop")]
pub use capture::{OpenCvSource, OpenCvStream};
pub use frame::Frame;
pub use sink::{SinkFrame, VideoSink};
pub use source::{CameraConstraints, FacingMode, FrameSource, MediaStream, ReadyState, StreamSettings};
