pub mod requirements;
pub mod stability;
pub mod validator;

pub use requirements::{requirements_for, Requirement};
pub use stability::{LandmarkStability, StabilityParams, StabilityPhase, StabilityReport, StabilityTracker};
pub use validator::{RequirementStatus, RequirementValidator, ValidationState};
