use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;

use super::requirements::{requirements_for, Requirement};
use crate::catalog::GarmentCategory;
use crate::config::ValidationConfig;
use crate::pose::PoseFrame;

pub const MESSAGE_NOT_DETECTED: &str = "Step into the frame so your whole body is visible";
pub const MESSAGE_READY: &str = "Perfect, hold still";

/// 要件ごとの達成状況
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementStatus {
    pub id: &'static str,
    pub description: &'static str,
    pub met: bool,
    /// 0.0〜1.0
    pub progress: f32,
    pub duration: Duration,
    /// 直近サンプルの平均信頼度
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationState {
    pub requirements: Vec<RequirementStatus>,
    pub is_valid: bool,
    pub progress: f32,
    pub confidence: f32,
    pub message: String,
}

impl ValidationState {
    fn initial(requirements: &[Requirement]) -> Self {
        Self {
            requirements: requirements
                .iter()
                .map(|r| RequirementStatus {
                    id: r.id,
                    description: r.description,
                    met: false,
                    progress: 0.0,
                    duration: Duration::ZERO,
                    confidence: 0.0,
                })
                .collect(),
            is_valid: false,
            progress: 0.0,
            confidence: 0.0,
            message: MESSAGE_NOT_DETECTED.to_string(),
        }
    }

    /// 最初の未達要件
    pub fn first_unmet(&self) -> Option<&RequirementStatus> {
        self.requirements.iter().find(|r| !r.met)
    }
}

pub type CompletionCallback = Box<dyn FnMut(&ValidationState) + Send>;

/// 衣類カテゴリ別の姿勢要件チェック
pub struct RequirementValidator {
    config: ValidationConfig,
    category: GarmentCategory,
    requirements: &'static [Requirement],
    histories: Vec<VecDeque<(Instant, f32)>>,
    state: ValidationState,
    on_complete: Option<CompletionCallback>,
    last_completion: Option<Instant>,
}

impl RequirementValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self::with_requirements(config, requirements_for(GarmentCategory::Other))
    }

    /// カテゴリ表を使わず、要件を直接指定する
    pub fn with_requirements(config: ValidationConfig, requirements: &'static [Requirement]) -> Self {
        Self {
            config,
            category: GarmentCategory::Other,
            requirements,
            histories: vec![VecDeque::new(); requirements.len()],
            state: ValidationState::initial(requirements),
            on_complete: None,
            last_completion: None,
        }
    }

    /// カテゴリIDから要件を読み込み、履歴をクリア
    pub fn configure(&mut self, category_id: &str) {
        self.category = GarmentCategory::from_id(category_id);
        self.requirements = requirements_for(self.category);
        debug!(
            "validator configured for '{}' -> {} ({} requirements)",
            category_id,
            self.category,
            self.requirements.len()
        );
        self.reset();
    }

    pub fn category(&self) -> GarmentCategory {
        self.category
    }

    pub fn requirements(&self) -> &'static [Requirement] {
        self.requirements
    }

    pub fn set_on_complete<F>(&mut self, callback: F)
    where
        F: FnMut(&ValidationState) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
    }

    pub fn state(&self) -> &ValidationState {
        &self.state
    }

    pub fn update(&mut self, frame: &PoseFrame) -> &ValidationState {
        self.update_at(frame, Instant::now())
    }

    pub fn update_at(&mut self, frame: &PoseFrame, now: Instant) -> &ValidationState {
        let window = self.config.history_window();
        let recent = self.config.recent_samples.max(1);

        let mut statuses = Vec::with_capacity(self.requirements.len());
        for (req, history) in self.requirements.iter().zip(self.histories.iter_mut()) {
            history.push_back((now, requirement_confidence(req, frame)));
            while let Some(&(t, _)) = history.front() {
                if now.saturating_duration_since(t) > window {
                    history.pop_front();
                } else {
                    break;
                }
            }

            let taken = history.len().min(recent);
            let confidence = history.iter().rev().take(taken).map(|(_, c)| c).sum::<f32>() / taken as f32;

            // 最新サンプルから遡って連続して min 以上の区間
            let run_start = history
                .iter()
                .rev()
                .take_while(|(_, c)| *c >= req.min_confidence)
                .last()
                .map(|(t, _)| *t);
            let duration = run_start
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or(Duration::ZERO);

            let progress = if req.required_duration.is_zero() {
                1.0
            } else {
                (duration.as_secs_f32() / req.required_duration.as_secs_f32()).min(1.0)
            };
            let met = confidence >= req.min_confidence && duration >= req.required_duration;

            statuses.push(RequirementStatus {
                id: req.id,
                description: req.description,
                met,
                progress,
                duration,
                confidence,
            });
        }

        let n = statuses.len().max(1) as f32;
        let is_valid = !statuses.is_empty() && statuses.iter().all(|s| s.met);
        let progress = statuses.iter().map(|s| s.progress).sum::<f32>() / n;
        let confidence = statuses.iter().map(|s| s.confidence).sum::<f32>() / n;

        let mut state = ValidationState {
            requirements: statuses,
            is_valid,
            progress,
            confidence,
            message: String::new(),
        };
        state.message = if !frame.is_detected {
            MESSAGE_NOT_DETECTED.to_string()
        } else if is_valid {
            MESSAGE_READY.to_string()
        } else {
            let pending = state.first_unmet().map(|s| s.description).unwrap_or_default();
            format!("Keep holding the pose: {}", pending)
        };
        self.state = state;

        if is_valid {
            self.notify_complete(now);
        }
        &self.state
    }

    fn notify_complete(&mut self, now: Instant) {
        if let Some(last) = self.last_completion {
            if now.saturating_duration_since(last) < self.config.completion_interval() {
                return;
            }
        }
        self.last_completion = Some(now);
        if let Some(callback) = self.on_complete.as_mut() {
            callback(&self.state);
        }
    }

    pub fn reset(&mut self) {
        self.histories = vec![VecDeque::new(); self.requirements.len()];
        self.state = ValidationState::initial(self.requirements);
        self.last_completion = None;
    }
}

/// 要件のキーポイント平均信頼度（0 は未検出として除外）
fn requirement_confidence(req: &Requirement, frame: &PoseFrame) -> f32 {
    let (sum, count) = req
        .keypoints
        .iter()
        .map(|&idx| frame.get(idx).confidence)
        .filter(|&c| c > 0.0)
        .fold((0.0f32, 0usize), |(s, n), c| (s + c, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}
