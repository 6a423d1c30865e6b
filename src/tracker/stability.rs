use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::StabilityConfig;
use crate::pose::{Keypoint, KeypointIndex, PoseFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StabilityPhase {
    #[default]
    Unstable,
    /// 閾値以下の速度が続いているが、まだ必要時間に達していない
    Accumulating,
    Stable,
}

/// キーポイント単位の安定状態
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LandmarkStability {
    /// 速度（正規化座標/秒）
    pub velocity: f32,
    pub phase: StabilityPhase,
    pub stable_since: Option<Instant>,
    pub stable_duration: Duration,
}

impl LandmarkStability {
    pub fn is_stable(&self) -> bool {
        self.phase == StabilityPhase::Stable
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: f32,
    y: f32,
    t: Instant,
}

/// 1キーポイント分の履歴と安定判定
#[derive(Debug, Clone, Default)]
struct KeypointState {
    history: VecDeque<Sample>,
    stability: LandmarkStability,
}

impl KeypointState {
    fn observe(&mut self, kp: &Keypoint, now: Instant, params: &StabilityParams) {
        if kp.confidence <= params.confidence_floor {
            self.history.clear();
            self.stability = LandmarkStability::default();
            return;
        }

        self.history.push_back(Sample { x: kp.x, y: kp.y, t: now });
        while let Some(front) = self.history.front() {
            if now.saturating_duration_since(front.t) > params.history_window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let n = self.history.len();
        if n < 2 {
            self.stability = LandmarkStability::default();
            return;
        }
        let prev = self.history[n - 2];
        let cur = self.history[n - 1];
        let dt = cur.t.saturating_duration_since(prev.t).as_secs_f32();
        if dt <= 0.0 {
            return;
        }

        let dx = cur.x - prev.x;
        let dy = cur.y - prev.y;
        let velocity = (dx * dx + dy * dy).sqrt() / dt;
        self.stability.velocity = velocity;

        if velocity > params.stability_threshold {
            // 一度でも超えたら即リセット
            self.stability.phase = StabilityPhase::Unstable;
            self.stability.stable_since = None;
            self.stability.stable_duration = Duration::ZERO;
            return;
        }

        // 静止はひとつ前のサンプルの時点から続いている
        let since = *self.stability.stable_since.get_or_insert(prev.t);
        let duration = now.saturating_duration_since(since);
        self.stability.stable_duration = duration;
        self.stability.phase = if duration >= params.required_duration {
            StabilityPhase::Stable
        } else {
            StabilityPhase::Accumulating
        };
    }
}

#[derive(Debug, Clone)]
pub struct StabilityParams {
    pub confidence_floor: f32,
    pub history_window: Duration,
    pub stability_threshold: f32,
    pub required_duration: Duration,
    pub required_stable_ratio: f32,
    pub min_update_interval: Duration,
    pub tracked: Vec<KeypointIndex>,
}

impl StabilityParams {
    pub fn from_config(config: &StabilityConfig) -> Self {
        let tracked = if config.tracked_keypoints.is_empty() {
            KeypointIndex::ALL.to_vec()
        } else {
            config
                .tracked_keypoints
                .iter()
                .filter_map(|&i| KeypointIndex::from_index(i))
                .collect()
        };
        Self {
            confidence_floor: config.confidence_floor,
            history_window: config.history_window(),
            stability_threshold: config.stability_threshold,
            required_duration: config.required_stability_duration(),
            required_stable_ratio: config.required_stable_ratio,
            min_update_interval: config.min_update_interval(),
            tracked,
        }
    }
}

impl Default for StabilityParams {
    fn default() -> Self {
        Self::from_config(&StabilityConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilityReport {
    pub landmarks: [LandmarkStability; KeypointIndex::COUNT],
    pub stable_count: usize,
    pub total_count: usize,
    pub is_stable: bool,
    /// 追跡対象の平均進捗 (0.0〜1.0)
    pub progress: f32,
}

impl StabilityReport {
    fn empty(total_count: usize) -> Self {
        Self {
            landmarks: [LandmarkStability::default(); KeypointIndex::COUNT],
            stable_count: 0,
            total_count,
            is_stable: false,
            progress: 0.0,
        }
    }

    pub fn ratio(&self) -> f32 {
        if self.total_count == 0 {
            0.0
        } else {
            self.stable_count as f32 / self.total_count as f32
        }
    }
}

/// キーポイント速度の安定判定
pub struct StabilityTracker {
    params: StabilityParams,
    states: [KeypointState; KeypointIndex::COUNT],
    last_update: Option<Instant>,
    report: StabilityReport,
}

impl StabilityTracker {
    pub fn new(params: StabilityParams) -> Self {
        let total = params.tracked.len();
        Self {
            params,
            states: std::array::from_fn(|_| KeypointState::default()),
            last_update: None,
            report: StabilityReport::empty(total),
        }
    }

    pub fn from_config(config: &StabilityConfig) -> Self {
        Self::new(StabilityParams::from_config(config))
    }

    pub fn report(&self) -> &StabilityReport {
        &self.report
    }

    pub fn update(&mut self, frame: &PoseFrame) -> &StabilityReport {
        self.update_at(frame, Instant::now())
    }

    /// 新しいフレームで更新
    ///
    /// Calls closer together than `min_update_interval` return the previous
    /// report unchanged.
    pub fn update_at(&mut self, frame: &PoseFrame, now: Instant) -> &StabilityReport {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < self.params.min_update_interval {
                return &self.report;
            }
        }
        self.last_update = Some(now);

        for &idx in &self.params.tracked {
            self.states[idx as usize].observe(&frame.keypoints[idx as usize], now, &self.params);
        }
        self.report = self.summarize();
        &self.report
    }

    fn summarize(&self) -> StabilityReport {
        let mut report = StabilityReport::empty(self.params.tracked.len());
        let required = self.params.required_duration.as_secs_f32();
        let mut progress_sum = 0.0;

        for &idx in &self.params.tracked {
            let s = self.states[idx as usize].stability;
            report.landmarks[idx as usize] = s;
            if s.is_stable() {
                report.stable_count += 1;
            }
            progress_sum += if required > 0.0 {
                (s.stable_duration.as_secs_f32() / required).min(1.0)
            } else if s.is_stable() {
                1.0
            } else {
                0.0
            };
        }

        if report.total_count > 0 {
            report.progress = progress_sum / report.total_count as f32;
            report.is_stable = report.ratio() >= self.params.required_stable_ratio;
        }
        report
    }

    pub fn reset(&mut self) {
        for state in self.states.iter_mut() {
            *state = KeypointState::default();
        }
        self.last_update = None;
        self.report = StabilityReport::empty(self.params.tracked.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::DetectionFloor;

    const STEP: Duration = Duration::from_millis(200);

    fn frame_with(points: [Keypoint; KeypointIndex::COUNT]) -> PoseFrame {
        PoseFrame::new(points, &DetectionFloor::default(), Instant::now())
    }

    fn still_frame(confidence: f32) -> PoseFrame {
        frame_with([Keypoint::new(0.5, 0.5, confidence); KeypointIndex::COUNT])
    }

    fn params() -> StabilityParams {
        StabilityParams {
            confidence_floor: 0.3,
            history_window: Duration::from_secs(3),
            stability_threshold: 0.08,
            required_duration: Duration::from_millis(1500),
            required_stable_ratio: 0.7,
            min_update_interval: Duration::from_millis(100),
            tracked: KeypointIndex::ALL.to_vec(),
        }
    }

    #[test]
    fn test_low_confidence_never_starts_timer() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();
        for i in 0..12 {
            let report = tracker.update_at(&still_frame(0.2), t0 + STEP * i);
            for lm in report.landmarks.iter() {
                assert_eq!(lm.phase, StabilityPhase::Unstable);
                assert!(lm.stable_since.is_none());
                assert_eq!(lm.stable_duration, Duration::ZERO);
            }
            assert!(!report.is_stable);
        }
    }

    #[test]
    fn test_floor_is_exclusive() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();
        tracker.update_at(&still_frame(0.3), t0);
        let report = tracker.update_at(&still_frame(0.3), t0 + STEP);
        assert!(report.landmarks[0].stable_since.is_none());
    }

    #[test]
    fn test_still_keypoint_becomes_stable_then_resets_on_spike() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();

        // 0..=7: 1400ms
        for i in 0..=7 {
            tracker.update_at(&still_frame(0.9), t0 + STEP * i);
        }
        let nose = tracker.report().landmarks[0];
        assert_eq!(nose.phase, StabilityPhase::Accumulating);
        assert_eq!(nose.stable_duration, Duration::from_millis(1400));

        // 1600ms >= 1500ms
        let report = tracker.update_at(&still_frame(0.9), t0 + STEP * 8);
        assert!(report.landmarks[0].is_stable());
        assert!(report.is_stable);
        assert_eq!(report.stable_count, KeypointIndex::COUNT);
        assert!((report.progress - 1.0).abs() < 1e-6);

        // 0.1 / 0.2s = 0.5/s > 0.08/s
        let mut moved = [Keypoint::new(0.5, 0.5, 0.9); KeypointIndex::COUNT];
        moved[0] = Keypoint::new(0.6, 0.5, 0.9);
        let report = tracker.update_at(&frame_with(moved), t0 + STEP * 9);
        let nose = report.landmarks[0];
        assert_eq!(nose.phase, StabilityPhase::Unstable);
        assert_eq!(nose.stable_duration, Duration::ZERO);
        assert!(nose.stable_since.is_none());
        assert!((nose.velocity - 0.5).abs() < 1e-3);
        // 他の点は安定のまま
        assert!(report.landmarks[1].is_stable());
    }

    #[test]
    fn test_velocity_is_per_second() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();
        tracker.update_at(&still_frame(0.9), t0);
        let moved = frame_with([Keypoint::new(0.51, 0.5, 0.9); KeypointIndex::COUNT]);
        let report = tracker.update_at(&moved, t0 + Duration::from_millis(500));
        // 0.01 / 0.5s = 0.02/s
        assert!((report.landmarks[3].velocity - 0.02).abs() < 1e-4);
        assert_eq!(report.landmarks[3].phase, StabilityPhase::Accumulating);
    }

    fn ratio_tracker(ratio: f32) -> (StabilityTracker, Instant) {
        let mut p = params();
        p.tracked = KeypointIndex::ALL[..10].to_vec();
        p.required_stable_ratio = ratio;
        let mut tracker = StabilityTracker::new(p);

        // 0..7 は静止、7..10 は毎回動く
        let t0 = Instant::now();
        for i in 0..10u32 {
            let mut points = [Keypoint::new(0.5, 0.5, 0.9); KeypointIndex::COUNT];
            let offset = if i % 2 == 0 { 0.0 } else { 0.2 };
            for p in points.iter_mut().take(10).skip(7) {
                p.x = 0.3 + offset;
            }
            tracker.update_at(&frame_with(points), t0 + STEP * i);
        }
        (tracker, t0)
    }

    #[test]
    fn test_ratio_exactly_at_threshold_is_stable() {
        let (tracker, _) = ratio_tracker(0.7);
        let report = tracker.report();
        assert_eq!(report.stable_count, 7);
        assert_eq!(report.total_count, 10);
        assert!(report.is_stable);
    }

    #[test]
    fn test_ratio_just_below_threshold_is_not_stable() {
        let (tracker, _) = ratio_tracker(0.7 + 1e-4);
        let report = tracker.report();
        assert_eq!(report.stable_count, 7);
        assert!(!report.is_stable);
    }

    #[test]
    fn test_updates_are_throttled() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();
        tracker.update_at(&still_frame(0.9), t0);
        let before = tracker.report().clone();

        let moved = frame_with([Keypoint::new(0.9, 0.9, 0.9); KeypointIndex::COUNT]);
        let report = tracker.update_at(&moved, t0 + Duration::from_millis(50));
        assert_eq!(*report, before);

        let report = tracker.update_at(&moved, t0 + Duration::from_millis(100));
        assert!(report.landmarks[0].velocity > 0.0);
    }

    #[test]
    fn test_reset_clears_runs() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();
        for i in 0..=8 {
            tracker.update_at(&still_frame(0.9), t0 + STEP * i);
        }
        assert!(tracker.report().is_stable);

        tracker.reset();
        assert!(!tracker.report().is_stable);
        let report = tracker.update_at(&still_frame(0.9), t0 + STEP * 9);
        assert_eq!(report.landmarks[0].phase, StabilityPhase::Unstable);
    }

    #[test]
    fn test_old_samples_are_pruned() {
        let mut tracker = StabilityTracker::new(params());
        let t0 = Instant::now();
        tracker.update_at(&still_frame(0.9), t0);
        tracker.update_at(&still_frame(0.9), t0 + Duration::from_secs(5));
        assert_eq!(tracker.states[0].history.len(), 1);
    }
}
