use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::camera::{CameraConstraints, FacingMode};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// デバイス番号 (desktop backend)
    #[serde(default)]
    pub device_index: i32,
    /// 理想解像度（幅）
    #[serde(default = "default_ideal_width")]
    pub ideal_width: u32,
    /// 理想解像度（高さ）
    #[serde(default = "default_ideal_height")]
    pub ideal_height: u32,
    #[serde(default = "default_ideal_fps")]
    pub ideal_fps: u32,
    /// "user" (front) or "environment" (rear)
    #[serde(default = "default_facing_mode")]
    pub facing_mode: String,
}

fn default_ideal_width() -> u32 { 640 }
fn default_ideal_height() -> u32 { 480 }
fn default_ideal_fps() -> u32 { 30 }
fn default_facing_mode() -> String { "user".to_string() }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            ideal_fps: default_ideal_fps(),
            facing_mode: default_facing_mode(),
        }
    }
}

impl CameraConfig {
    pub fn facing(&self) -> FacingMode {
        match self.facing_mode.as_str() {
            "environment" | "rear" | "back" => FacingMode::Environment,
            _ => FacingMode::User,
        }
    }

    /// 厳しい順の制約リスト: ideal -> facing のみ -> 制約なし
    pub fn constraint_chain(&self) -> Vec<CameraConstraints> {
        vec![
            CameraConstraints::ideal(
                self.device_index,
                self.facing(),
                self.ideal_width,
                self.ideal_height,
                self.ideal_fps,
            ),
            CameraConstraints::minimal(self.device_index, self.facing()),
            CameraConstraints::bare(self.device_index),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// ONNXモデルのパス (desktop backend)
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// 推論間隔（ミリ秒）。~10Hz
    #[serde(default = "default_target_interval_ms")]
    pub target_interval_ms: u64,
    /// ループのポーリング間隔（ミリ秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_max_init_attempts")]
    pub max_init_attempts: u32,
    #[serde(default = "default_init_retry_delay_ms")]
    pub init_retry_delay_ms: u64,
    #[serde(default = "default_model_load_timeout_ms")]
    pub model_load_timeout_ms: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// PoseFrame全体の信頼度の下限
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    /// キーポイント単位の信頼度の下限
    #[serde(default = "default_keypoint_confidence")]
    pub keypoint_confidence: f32,
    /// 検出とみなす最小キーポイント数
    #[serde(default = "default_min_detected_keypoints")]
    pub min_detected_keypoints: usize,
}

fn default_model_path() -> String { "models/movenet_lightning.onnx".to_string() }
fn default_target_interval_ms() -> u64 { 100 }
fn default_poll_interval_ms() -> u64 { 16 }
fn default_max_consecutive_errors() -> u32 { 5 }
fn default_max_init_attempts() -> u32 { 3 }
fn default_init_retry_delay_ms() -> u64 { 1000 }
fn default_model_load_timeout_ms() -> u64 { 25_000 }
fn default_health_check_timeout_ms() -> u64 { 5_000 }
fn default_detection_confidence() -> f32 { 0.3 }
fn default_keypoint_confidence() -> f32 { 0.3 }
fn default_min_detected_keypoints() -> usize { 5 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            target_interval_ms: default_target_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_init_attempts: default_max_init_attempts(),
            init_retry_delay_ms: default_init_retry_delay_ms(),
            model_load_timeout_ms: default_model_load_timeout_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            detection_confidence: default_detection_confidence(),
            keypoint_confidence: default_keypoint_confidence(),
            min_detected_keypoints: default_min_detected_keypoints(),
        }
    }
}

impl DetectorConfig {
    pub fn target_interval(&self) -> Duration { Duration::from_millis(self.target_interval_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms.max(1)) }
    pub fn init_retry_delay(&self) -> Duration { Duration::from_millis(self.init_retry_delay_ms) }
    pub fn model_load_timeout(&self) -> Duration { Duration::from_millis(self.model_load_timeout_ms) }
    pub fn health_check_timeout(&self) -> Duration { Duration::from_millis(self.health_check_timeout_ms) }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StabilityConfig {
    /// これ以下の信頼度のキーポイントは追跡しない
    #[serde(default = "default_stability_confidence_floor")]
    pub confidence_floor: f32,
    #[serde(default = "default_stability_history_ms")]
    pub history_window_ms: u64,
    /// 速度の閾値（正規化座標/秒）
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: f32,
    #[serde(default = "default_required_stability_ms")]
    pub required_stability_duration_ms: u64,
    #[serde(default = "default_required_stable_ratio")]
    pub required_stable_ratio: f32,
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,
    /// 追跡対象のキーポイント番号。空なら全17点
    #[serde(default)]
    pub tracked_keypoints: Vec<usize>,
}

fn default_stability_confidence_floor() -> f32 { 0.3 }
fn default_stability_history_ms() -> u64 { 3_000 }
fn default_stability_threshold() -> f32 { 0.08 }
fn default_required_stability_ms() -> u64 { 1_500 }
fn default_required_stable_ratio() -> f32 { 0.7 }
fn default_min_update_interval_ms() -> u64 { 100 }

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_stability_confidence_floor(),
            history_window_ms: default_stability_history_ms(),
            stability_threshold: default_stability_threshold(),
            required_stability_duration_ms: default_required_stability_ms(),
            required_stable_ratio: default_required_stable_ratio(),
            min_update_interval_ms: default_min_update_interval_ms(),
            tracked_keypoints: Vec::new(),
        }
    }
}

impl StabilityConfig {
    pub fn history_window(&self) -> Duration { Duration::from_millis(self.history_window_ms) }
    pub fn required_stability_duration(&self) -> Duration { Duration::from_millis(self.required_stability_duration_ms) }
    pub fn min_update_interval(&self) -> Duration { Duration::from_millis(self.min_update_interval_ms) }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_validation_history_ms")]
    pub history_window_ms: u64,
    /// 現在の信頼度として平均するサンプル数
    #[serde(default = "default_recent_samples")]
    pub recent_samples: usize,
    /// 完了通知の最小間隔
    #[serde(default = "default_completion_interval_ms")]
    pub completion_interval_ms: u64,
    /// この時間内に条件を満たせなければタイムアウト扱い（致命的ではない）
    #[serde(default = "default_validation_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_validation_history_ms() -> u64 { 10_000 }
fn default_recent_samples() -> usize { 3 }
fn default_completion_interval_ms() -> u64 { 1_000 }
fn default_validation_timeout_ms() -> u64 { 30_000 }

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            history_window_ms: default_validation_history_ms(),
            recent_samples: default_recent_samples(),
            completion_interval_ms: default_completion_interval_ms(),
            timeout_ms: default_validation_timeout_ms(),
        }
    }
}

impl ValidationConfig {
    pub fn history_window(&self) -> Duration { Duration::from_millis(self.history_window_ms) }
    pub fn completion_interval(&self) -> Duration { Duration::from_millis(self.completion_interval_ms) }
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// 計測前に安定判定も必要とするか
    #[serde(default = "default_require_stability")]
    pub require_stability: bool,
}

fn default_require_stability() -> bool { true }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { require_stability: default_require_stability() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// env_logger のフィルタ文字列 (e.g. "info", "posefit=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// ログファイルの出力先。空ならファイル出力しない
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> String { "logs".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト設定を使う
    ///
    /// The error that made the file be ignored is handed back instead of
    /// logged, since callers load the config before logging is set up.
    /// A missing file is not an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<ConfigError>) {
        let path = path.as_ref();
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::load(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(field: &'static str, v: f32) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason: format!("{} is outside [0, 1]", v) })
            }
        }

        unit("detector.detection_confidence", self.detector.detection_confidence)?;
        unit("detector.keypoint_confidence", self.detector.keypoint_confidence)?;
        unit("stability.confidence_floor", self.stability.confidence_floor)?;
        unit("stability.required_stable_ratio", self.stability.required_stable_ratio)?;

        if self.stability.stability_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "stability.stability_threshold",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(&bad) = self.stability.tracked_keypoints.iter().find(|&&i| i >= crate::pose::KeypointIndex::COUNT) {
            return Err(ConfigError::Invalid {
                field: "stability.tracked_keypoints",
                reason: format!("keypoint index {} does not exist", bad),
            });
        }
        if self.detector.max_init_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "detector.max_init_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.validation.recent_samples == 0 {
            return Err(ConfigError::Invalid {
                field: "validation.recent_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.detector.target_interval_ms, 100);
        assert_eq!(config.detector.max_consecutive_errors, 5);
        assert_eq!(config.detector.model_load_timeout_ms, 25_000);
        assert_eq!(config.stability.min_update_interval_ms, 100);
        assert_eq!(config.validation.completion_interval_ms, 1_000);
        assert!(config.capture.require_stability);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_override() {
        let config: Config = toml::from_str(
            r#"
            [stability]
            required_stable_ratio = 0.5
            tracked_keypoints = [5, 6, 11, 12]

            [camera]
            facing_mode = "environment"
            "#,
        )
        .unwrap();
        assert_eq!(config.stability.required_stable_ratio, 0.5);
        assert_eq!(config.stability.tracked_keypoints, vec![5, 6, 11, 12]);
        assert_eq!(config.stability.stability_threshold, 0.08);
        assert_eq!(config.camera.facing(), FacingMode::Environment);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.stability.required_stable_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stability.tracked_keypoints = vec![17];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_constraint_chain_order() {
        let chain = CameraConfig::default().constraint_chain();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].width.is_some());
        assert!(chain[1].width.is_none() && chain[1].facing_mode.is_some());
        assert!(chain[2].facing_mode.is_none());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let (config, ignored) = Config::load_or_default("does/not/exist.toml");
        assert_eq!(config.camera.ideal_width, 640);
        assert!(ignored.is_none());
    }

    #[test]
    fn test_load_or_default_reports_bad_file() {
        let path = std::env::temp_dir().join(format!("posefit_bad_config_{}.toml", std::process::id()));
        fs::write(&path, "[stability]\nrequired_stable_ratio = 1.5\n").unwrap();
        let (config, ignored) = Config::load_or_default(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(
            ignored,
            Some(ConfigError::Invalid { field: "stability.required_stable_ratio", .. })
        ));
        assert_eq!(config.stability.required_stable_ratio, StabilityConfig::default().required_stable_ratio);
    }
}
