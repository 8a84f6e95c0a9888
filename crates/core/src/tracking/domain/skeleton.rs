use std::ops::{Index, IndexMut};

use crate::shared::capture::{Image, ImageFormat};
use crate::shared::constants::JOINT_COUNT;
use crate::shared::timestamp::Timestamp;

use super::joint::{Joint, JointType};

/// One pose: a joint per entry of the fixed topology.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Skeleton {
    joints: [Joint; JOINT_COUNT],
}

impl Skeleton {
    pub fn new(joints: [Joint; JOINT_COUNT]) -> Self {
        Self { joints }
    }

    pub fn joints(&self) -> &[Joint; JOINT_COUNT] {
        &self.joints
    }

    /// `(type, joint)` pairs in topology order.
    pub fn iter(&self) -> impl Iterator<Item = (JointType, &Joint)> {
        JointType::ALL.into_iter().zip(self.joints.iter())
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new([Joint::default(); JOINT_COUNT])
    }
}

impl Index<JointType> for Skeleton {
    type Output = Joint;

    fn index(&self, joint: JointType) -> &Joint {
        &self.joints[joint.index()]
    }
}

impl IndexMut<JointType> for Skeleton {
    fn index_mut(&mut self, joint: JointType) -> &mut Joint {
        &mut self.joints[joint.index()]
    }
}

/// A tracked person. `id` stays stable while the person remains in view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    pub id: u32,
    pub skeleton: Skeleton,
}

/// Body index map value for pixels that belong to no body.
pub const BODY_INDEX_BACKGROUND: u8 = 255;

/// Tracking result for one capture.
///
/// The optional body index map is a Custom8 image in depth camera
/// coordinates: one byte per depth pixel, holding the position of the body
/// in `bodies` or [`BODY_INDEX_BACKGROUND`]. It is released with the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyFrame {
    timestamp: Timestamp,
    bodies: Vec<Body>,
    body_index_map: Option<Image>,
}

impl BodyFrame {
    pub fn new(timestamp: Timestamp, bodies: Vec<Body>) -> Self {
        Self {
            timestamp,
            bodies,
            body_index_map: None,
        }
    }

    pub fn with_body_index_map(mut self, map: Image) -> Self {
        debug_assert_eq!(map.format(), ImageFormat::Custom8);
        self.body_index_map = Some(map);
        self
    }

    pub fn body_index_map(&self) -> Option<&Image> {
        self.body_index_map.as_ref()
    }

    /// Detaches the map so it can outlive the frame.
    pub fn take_body_index_map(&mut self) -> Option<Image> {
        self.body_index_map.take()
    }

    /// Body under depth pixel `(x, y)`, if the frame carries a map.
    pub fn body_at(&self, x: u32, y: u32) -> Option<&Body> {
        let map = self.body_index_map.as_ref()?;
        if x >= map.width() || y >= map.height() {
            return None;
        }
        let offset = y as usize * map.stride() as usize + x as usize;
        let index = *map.data().get(offset)?;
        if index == BODY_INDEX_BACKGROUND {
            return None;
        }
        self.bodies.get(index as usize)
    }

    pub fn empty(timestamp: Timestamp) -> Self {
        Self::new(timestamp, Vec::new())
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn bodies_mut(&mut self) -> &mut [Body] {
        &mut self.bodies
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn body(&self, id: u32) -> Option<&Body> {
        self.bodies.iter().find(|b| b.id == id)
    }
}
