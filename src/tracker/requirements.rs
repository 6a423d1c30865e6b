use std::time::Duration;

use crate::catalog::GarmentCategory;
use crate::pose::KeypointIndex;
use crate::pose::KeypointIndex::*;

/// 採寸前に満たすべき姿勢要件
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub id: &'static str,
    pub keypoints: &'static [KeypointIndex],
    pub min_confidence: f32,
    pub required_duration: Duration,
    pub description: &'static str,
}

const SHOULDERS: &[KeypointIndex] = &[LeftShoulder, RightShoulder];
const TORSO: &[KeypointIndex] = &[LeftShoulder, RightShoulder, LeftHip, RightHip];
const ARMS: &[KeypointIndex] = &[LeftElbow, RightElbow, LeftWrist, RightWrist];
const HIPS: &[KeypointIndex] = &[LeftHip, RightHip];
const LEGS: &[KeypointIndex] = &[LeftKnee, RightKnee, LeftAnkle, RightAnkle];
const KNEES: &[KeypointIndex] = &[LeftKnee, RightKnee];

const fn req(
    id: &'static str,
    keypoints: &'static [KeypointIndex],
    min_confidence: f32,
    required_ms: u64,
    description: &'static str,
) -> Requirement {
    Requirement {
        id,
        keypoints,
        min_confidence,
        required_duration: Duration::from_millis(required_ms),
        description,
    }
}

static SHIRTS: [Requirement; 3] = [
    req("shoulders", SHOULDERS, 0.6, 2000, "shoulders clearly visible"),
    req("torso", TORSO, 0.5, 2000, "upper body in frame"),
    req("arms", ARMS, 0.4, 1500, "arms relaxed at your sides"),
];

static JACKETS: [Requirement; 3] = [
    req("shoulders", SHOULDERS, 0.6, 2000, "shoulders clearly visible"),
    req("torso", TORSO, 0.5, 2000, "upper body in frame"),
    req("arms", ARMS, 0.5, 2000, "arms and wrists visible"),
];

static PANTS: [Requirement; 2] = [
    req("hips", HIPS, 0.6, 2000, "hips clearly visible"),
    req("legs", LEGS, 0.5, 2000, "legs and ankles in frame"),
];

static SHORTS: [Requirement; 2] = [
    req("hips", HIPS, 0.6, 2000, "hips clearly visible"),
    req("knees", KNEES, 0.5, 1500, "knees in frame"),
];

static DRESSES: [Requirement; 3] = [
    req("shoulders", SHOULDERS, 0.5, 2000, "shoulders visible"),
    req("hips", HIPS, 0.5, 2000, "hips visible"),
    req("knees", KNEES, 0.4, 1500, "knees in frame"),
];

static GENERIC: [Requirement; 1] = [req("full_body", TORSO, 0.5, 2000, "whole body in frame")];

/// カテゴリごとの要件一覧
pub fn requirements_for(category: GarmentCategory) -> &'static [Requirement] {
    match category {
        GarmentCategory::Shirts => &SHIRTS,
        GarmentCategory::Jackets => &JACKETS,
        GarmentCategory::Pants => &PANTS,
        GarmentCategory::Shorts => &SHORTS,
        GarmentCategory::Dresses => &DRESSES,
        GarmentCategory::Other => &GENERIC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        let shirts = requirements_for(GarmentCategory::Shirts);
        assert_eq!(shirts.len(), 3);
        assert_eq!(shirts[2].id, "arms");
        assert_eq!(shirts[2].required_duration, Duration::from_millis(1500));

        let pants = requirements_for(GarmentCategory::Pants);
        assert_eq!(pants[1].keypoints, &[LeftKnee, RightKnee, LeftAnkle, RightAnkle]);

        let generic = requirements_for(GarmentCategory::Other);
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].id, "full_body");
    }

    #[test]
    fn test_every_requirement_has_keypoints() {
        for category in GarmentCategory::ALL {
            for r in requirements_for(category) {
                assert!(!r.keypoints.is_empty(), "{} / {}", category, r.id);
                assert!(r.min_confidence > 0.0 && r.min_confidence < 1.0);
                assert!(r.required_duration > Duration::ZERO);
            }
        }
    }
}
