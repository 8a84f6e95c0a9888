use serde::{Deserialize, Serialize};

use crate::shared::constants::JOINT_COUNT;

/// Certainty of a joint estimate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JointConfidenceLevel {
    /// The joint is out of range.
    None,
    /// Predicted, not observed (usually occluded).
    Low,
    Medium,
    High,
}

/// Unit quaternion, stored w-first.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn dot(&self, other: &Quaternion) -> f32 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Normalized linear blend from `self` (t = 0) to `other` (t = 1),
    /// taking the shorter arc.
    pub fn nlerp(&self, other: &Quaternion, t: f32) -> Quaternion {
        let sign = if self.dot(other) < 0.0 { -1.0 } else { 1.0 };
        let blend = |a: f32, b: f32| a * (1.0 - t) + sign * b * t;
        let q = Quaternion::new(
            blend(self.w, other.w),
            blend(self.x, other.x),
            blend(self.y, other.y),
            blend(self.z, other.z),
        );
        let norm = q.dot(&q).sqrt();
        if norm <= f32::EPSILON {
            return *other;
        }
        Quaternion::new(q.w / norm, q.x / norm, q.y / norm, q.z / norm)
    }
}

/// A tracked body landmark. Immutable once constructed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    position_mm: [f32; 3],
    orientation: Quaternion,
    confidence: JointConfidenceLevel,
}

impl Joint {
    pub fn new(position_mm: [f32; 3], orientation: Quaternion, confidence: JointConfidenceLevel) -> Self {
        Self {
            position_mm,
            orientation,
            confidence,
        }
    }

    pub fn position_mm(&self) -> [f32; 3] {
        self.position_mm
    }

    pub fn orientation(&self) -> Quaternion {
        self.orientation
    }

    pub fn confidence(&self) -> JointConfidenceLevel {
        self.confidence
    }
}

impl Default for Joint {
    fn default() -> Self {
        Self::new([0.0; 3], Quaternion::IDENTITY, JointConfidenceLevel::None)
    }
}

/// The fixed skeleton topology. Discriminants are array indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JointType {
    Pelvis,
    SpineNavel,
    SpineChest,
    Neck,
    ClavicleLeft,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    HandTipLeft,
    ThumbLeft,
    ClavicleRight,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HandTipRight,
    ThumbRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    Head,
    Nose,
    EyeLeft,
    EarLeft,
    EyeRight,
    EarRight,
}

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::Pelvis,
        JointType::SpineNavel,
        JointType::SpineChest,
        JointType::Neck,
        JointType::ClavicleLeft,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::ClavicleRight,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HandTipRight,
        JointType::ThumbRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::Head,
        JointType::Nose,
        JointType::EyeLeft,
        JointType::EarLeft,
        JointType::EyeRight,
        JointType::EarRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_root(self) -> bool {
        self == JointType::Pelvis
    }

    /// Eyes, ears and nose: drawn smaller and without bones.
    pub fn is_face_feature(self) -> bool {
        matches!(
            self,
            JointType::Nose
                | JointType::EyeLeft
                | JointType::EarLeft
                | JointType::EyeRight
                | JointType::EarRight
        )
    }

    /// Parent in the hierarchy; the root is its own parent.
    pub fn parent(self) -> JointType {
        use JointType::*;
        match self {
            Pelvis => Pelvis,
            SpineNavel | HipLeft | HipRight => Pelvis,
            SpineChest => SpineNavel,
            Neck | ClavicleLeft | ClavicleRight => SpineChest,
            ShoulderLeft => ClavicleLeft,
            ElbowLeft => ShoulderLeft,
            WristLeft => ElbowLeft,
            HandLeft | ThumbLeft => WristLeft,
            HandTipLeft => HandLeft,
            ShoulderRight => ClavicleRight,
            ElbowRight => ShoulderRight,
            WristRight => ElbowRight,
            HandRight | ThumbRight => WristRight,
            HandTipRight => HandRight,
            KneeLeft => HipLeft,
            AnkleLeft => KneeLeft,
            FootLeft => AnkleLeft,
            KneeRight => HipRight,
            AnkleRight => KneeRight,
            FootRight => AnkleRight,
            Head => Neck,
            Nose | EyeLeft | EarLeft | EyeRight | EarRight => Head,
        }
    }

    /// `(parent, child)` pairs to draw as bones.
    pub fn bones() -> impl Iterator<Item = (JointType, JointType)> {
        JointType::ALL
            .into_iter()
            .filter(|j| !j.is_root() && !j.is_face_feature())
            .map(|j| (j.parent(), j))
    }

    pub fn name(self) -> &'static str {
        use JointType::*;
        match self {
            Pelvis => "Pelvis",
            SpineNavel => "SpineNavel",
            SpineChest => "SpineChest",
            Neck => "Neck",
            ClavicleLeft => "ClavicleLeft",
            ShoulderLeft => "ShoulderLeft",
            ElbowLeft => "ElbowLeft",
            WristLeft => "WristLeft",
            HandLeft => "HandLeft",
            HandTipLeft => "HandTipLeft",
            ThumbLeft => "ThumbLeft",
            ClavicleRight => "ClavicleRight",
            ShoulderRight => "ShoulderRight",
            ElbowRight => "ElbowRight",
            WristRight => "WristRight",
            HandRight => "HandRight",
            HandTipRight => "HandTipRight",
            ThumbRight => "ThumbRight",
            HipLeft => "HipLeft",
            KneeLeft => "KneeLeft",
            AnkleLeft => "AnkleLeft",
            FootLeft => "FootLeft",
            HipRight => "HipRight",
            KneeRight => "KneeRight",
            AnkleRight => "AnkleRight",
            FootRight => "FootRight",
            Head => "Head",
            Nose => "Nose",
            EyeLeft => "EyeLeft",
            EarLeft => "EarLeft",
            EyeRight => "EyeRight",
            EarRight => "EarRight",
        }
    }
}

/// How a joint should be presented, derived from its confidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JointStyle {
    /// Confidence `None`.
    Hidden,
    /// Confidence `Low`.
    Faint,
    Solid,
}

impl JointStyle {
    pub fn for_confidence(level: JointConfidenceLevel) -> Self {
        match level {
            JointConfidenceLevel::None => JointStyle::Hidden,
            JointConfidenceLevel::Low => JointStyle::Faint,
            JointConfidenceLevel::Medium | JointConfidenceLevel::High => JointStyle::Solid,
        }
    }

    /// Marker radius multiplier for a joint type.
    pub fn radius_scale(joint_type: JointType) -> f32 {
        if joint_type.is_face_feature() {
            0.5
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn test_all_matches_indices() {
        for (i, joint) in JointType::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
    }

    #[test]
    fn test_only_pelvis_is_root() {
        let roots: Vec<_> = JointType::ALL.iter().filter(|j| j.is_root()).collect();
        assert_eq!(roots, vec![&JointType::Pelvis]);
        assert_eq!(JointType::Pelvis.parent(), JointType::Pelvis);
    }

    #[test]
    fn test_every_joint_reaches_root() {
        for joint in JointType::ALL {
            let mut current = joint;
            let mut steps = 0;
            while !current.is_root() {
                current = current.parent();
                steps += 1;
                assert!(steps < JOINT_COUNT, "cycle from {joint:?}");
            }
        }
    }

    #[test]
    fn test_bones_exclude_root_and_face() {
        let bones: Vec<_> = JointType::bones().collect();
        assert_eq!(bones.len(), JOINT_COUNT - 1 - 5);
        assert!(bones.contains(&(JointType::Neck, JointType::Head)));
        assert!(!bones.iter().any(|(_, child)| child.is_face_feature()));
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = JointType::ALL.iter().map(|j| j.name()).collect();
        assert_eq!(names.len(), JOINT_COUNT);
    }

    #[rstest]
    #[case::none(JointConfidenceLevel::None, JointStyle::Hidden)]
    #[case::low(JointConfidenceLevel::Low, JointStyle::Faint)]
    #[case::medium(JointConfidenceLevel::Medium, JointStyle::Solid)]
    #[case::high(JointConfidenceLevel::High, JointStyle::Solid)]
    fn test_confidence_style(#[case] level: JointConfidenceLevel, #[case] expected: JointStyle) {
        assert_eq!(JointStyle::for_confidence(level), expected);
    }

    #[test]
    fn test_styles_are_three_distinct_categories() {
        let all = [
            JointConfidenceLevel::None,
            JointConfidenceLevel::Low,
            JointConfidenceLevel::Medium,
            JointConfidenceLevel::High,
        ];
        let styles: HashSet<_> = all.into_iter().map(JointStyle::for_confidence).collect();
        assert_eq!(styles.len(), 3);
    }

    #[test]
    fn test_face_features_drawn_at_half_radius() {
        assert_relative_eq!(JointStyle::radius_scale(JointType::Nose), 0.5);
        assert_relative_eq!(JointStyle::radius_scale(JointType::Head), 1.0);
    }

    #[test]
    fn test_nlerp_takes_shorter_arc() {
        let a = Quaternion::IDENTITY;
        let negated = Quaternion::new(-1.0, 0.0, 0.0, 0.0);
        let mid = a.nlerp(&negated, 0.5);
        assert_relative_eq!(mid.w.abs(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nlerp_endpoints() {
        let a = Quaternion::IDENTITY;
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let b = Quaternion::new(s, 0.0, s, 0.0);
        let start = a.nlerp(&b, 0.0);
        let end = a.nlerp(&b, 1.0);
        assert_relative_eq!(start.w, 1.0, epsilon = 1e-6);
        assert_relative_eq!(end.y, s, epsilon = 1e-6);
    }
}
