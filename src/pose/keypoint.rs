use std::time::Instant;

/// MoveNet の 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

/// 検出判定のしきい値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionFloor {
    /// 全体の平均信頼度がこれを超える必要がある
    pub min_confidence: f32,
    /// キーポイント単位の信頼度の下限
    pub keypoint_confidence: f32,
    /// keypoint_confidence を超えるキーポイントの最小数
    pub min_keypoints: usize,
}

impl Default for DetectionFloor {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            keypoint_confidence: 0.3,
            min_keypoints: 5,
        }
    }
}

/// 1回の推論で得られた17キーポイント
#[derive(Debug, Clone, PartialEq)]
pub struct PoseFrame {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
    pub is_detected: bool,
    /// 全キーポイントの平均信頼度
    pub confidence: f32,
    pub captured_at: Instant,
}

impl PoseFrame {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT], floor: &DetectionFloor, captured_at: Instant) -> Self {
        let confidence = average_confidence(&keypoints);
        let confident = keypoints
            .iter()
            .filter(|k| k.confidence > floor.keypoint_confidence)
            .count();
        let is_detected = confidence > floor.min_confidence && confident >= floor.min_keypoints;
        Self {
            keypoints,
            is_detected,
            confidence,
            captured_at,
        }
    }

    /// 推論器の出力（可変長）から構築。足りない点は信頼度0で埋める
    pub fn from_slice(points: &[Keypoint], floor: &DetectionFloor, captured_at: Instant) -> Self {
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for (dst, src) in keypoints.iter_mut().zip(points.iter()) {
            *dst = *src;
        }
        Self::new(keypoints, floor, captured_at)
    }

    /// 未検出フレーム（ソフトリセット・停止時に公開する）
    pub fn empty() -> Self {
        Self {
            keypoints: [Keypoint::default(); KeypointIndex::COUNT],
            is_detected: false,
            confidence: 0.0,
            captured_at: Instant::now(),
        }
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.iter().all(|k| k.confidence == 0.0)
    }
}

fn average_confidence(keypoints: &[Keypoint; KeypointIndex::COUNT]) -> f32 {
    let sum: f32 = keypoints.iter().map(|k| k.confidence).sum();
    sum / KeypointIndex::COUNT as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_index_from_index() {
        assert_eq!(KeypointIndex::from_index(0), Some(KeypointIndex::Nose));
        assert_eq!(KeypointIndex::from_index(16), Some(KeypointIndex::RightAnkle));
        assert_eq!(KeypointIndex::from_index(17), None);
        for (i, kp) in KeypointIndex::ALL.iter().enumerate() {
            assert_eq!(*kp as usize, i);
        }
    }

    #[test]
    fn test_pose_frame_average_confidence() {
        let frame = PoseFrame::new([Keypoint::new(0.0, 0.0, 0.5); KeypointIndex::COUNT], &DetectionFloor::default(), Instant::now());
        assert!((frame.confidence - 0.5).abs() < 0.001);
        assert!(frame.is_detected);
    }

    #[test]
    fn test_detection_needs_enough_confident_points() {
        // 4点だけ高信頼度: 平均は 4*1.0/17 ≒ 0.235 で下限未満
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for kp in keypoints.iter_mut().take(4) {
            kp.confidence = 1.0;
        }
        let frame = PoseFrame::new(keypoints, &DetectionFloor::default(), Instant::now());
        assert!(!frame.is_detected);

        // 平均は十分でも、下限を超える点が少なければ未検出
        let floor = DetectionFloor { min_confidence: 0.1, keypoint_confidence: 0.3, min_keypoints: 5 };
        let frame = PoseFrame::new(keypoints, &floor, Instant::now());
        assert!(!frame.is_detected);

        keypoints[4].confidence = 1.0;
        let frame = PoseFrame::new(keypoints, &floor, Instant::now());
        assert!(frame.is_detected);
    }

    #[test]
    fn test_aggregate_floor_is_exclusive() {
        let floor = DetectionFloor { min_confidence: 0.5, keypoint_confidence: 0.3, min_keypoints: 1 };
        let frame = PoseFrame::new([Keypoint::new(0.0, 0.0, 0.5); KeypointIndex::COUNT], &floor, Instant::now());
        assert!(!frame.is_detected);
    }

    #[test]
    fn test_from_slice_pads_missing_points() {
        let points = vec![Keypoint::new(0.1, 0.2, 0.9); 3];
        let frame = PoseFrame::from_slice(&points, &DetectionFloor::default(), Instant::now());
        assert_eq!(frame.keypoints[2].confidence, 0.9);
        assert_eq!(frame.keypoints[3].confidence, 0.0);
    }

    #[test]
    fn test_empty_frame() {
        let frame = PoseFrame::empty();
        assert!(frame.is_empty());
        assert!(!frame.is_detected);
        assert_eq!(frame.confidence, 0.0);
    }
}
