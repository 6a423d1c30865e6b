//! Measurement capture gated on pose validation and stability.

use anyhow::Result;
use log::info;
use serde::Serialize;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::pose::PoseFrame;
use crate::tracker::{StabilityReport, ValidationState};

/// 体の採寸値（インチ、体重はポンド）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurements {
    pub chest: f32,
    pub waist: f32,
    pub hips: f32,
    pub shoulders: f32,
    pub arm_length: f32,
    pub inseam: f32,
    pub height: f32,
    pub weight: f32,
}

/// キーポイントから採寸値を求める
pub trait MeasurementProvider: Send {
    fn measure(&self, frame: &PoseFrame) -> Result<Measurements>;

    fn name(&self) -> &str;
}

/// 固定値を返す仮の採寸
///
/// Stand-in until a real body-measurement model is plugged in: the pose is
/// ignored and the same values are returned every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderMeasurements;

impl PlaceholderMeasurements {
    pub const VALUES: Measurements = Measurements {
        chest: 38.0,
        waist: 32.0,
        hips: 38.0,
        shoulders: 17.0,
        arm_length: 25.0,
        inseam: 31.0,
        height: 68.0,
        weight: 160.0,
    };
}

impl MeasurementProvider for PlaceholderMeasurements {
    fn measure(&self, _frame: &PoseFrame) -> Result<Measurements> {
        Ok(Self::VALUES)
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

pub struct MeasurementCapture {
    require_stability: bool,
    provider: Box<dyn MeasurementProvider>,
}

impl MeasurementCapture {
    pub fn new(config: &CaptureConfig, provider: Box<dyn MeasurementProvider>) -> Self {
        Self {
            require_stability: config.require_stability,
            provider,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 撮影可能か
    pub fn is_ready(&self, validation: &ValidationState, stability: &StabilityReport) -> bool {
        validation.is_valid && (!self.require_stability || stability.is_stable)
    }

    /// 条件を満たしていれば採寸する
    pub fn capture(
        &self,
        frame: &PoseFrame,
        validation: &ValidationState,
        stability: &StabilityReport,
    ) -> Result<Measurements, CaptureError> {
        if !validation.is_valid {
            return Err(CaptureError::NotReady(validation.message.clone()));
        }
        if self.require_stability && !stability.is_stable {
            return Err(CaptureError::NotReady(format!(
                "Hold still: {}/{} points steady",
                stability.stable_count, stability.total_count
            )));
        }
        if !frame.is_detected {
            return Err(CaptureError::NoPose);
        }

        let measurements = self.provider.measure(frame)?;
        info!(
            "Measurements captured with '{}' provider (chest {:.1}, waist {:.1})",
            self.provider.name(),
            measurements.chest,
            measurements.waist
        );
        Ok(measurements)
    }
}
