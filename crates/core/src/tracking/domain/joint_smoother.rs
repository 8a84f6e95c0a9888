use std::collections::HashMap;

use super::joint::Joint;
use super::skeleton::{BodyFrame, Skeleton};

/// EMA smoother over joint positions and orientations, keyed by body id.
///
/// Formula: `smoothed = (1 - factor) * current + factor * previous`.
/// A factor of 0 leaves results untouched.
pub struct JointSmoother {
    factor: f32,
    state: HashMap<u32, Skeleton>,
}

impl JointSmoother {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: factor.clamp(0.0, 1.0),
            state: HashMap::new(),
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Smooths every body in place. Bodies missing from `frame` are forgotten.
    pub fn apply(&mut self, frame: &mut BodyFrame) {
        if self.factor == 0.0 {
            return;
        }
        let mut next = HashMap::with_capacity(frame.body_count());
        for body in frame.bodies_mut() {
            if let Some(prev) = self.state.get(&body.id) {
                body.skeleton = blend(&body.skeleton, prev, self.factor);
            }
            next.insert(body.id, body.skeleton);
        }
        self.state = next;
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }

    pub fn tracked_bodies(&self) -> usize {
        self.state.len()
    }
}

fn blend(current: &Skeleton, previous: &Skeleton, factor: f32) -> Skeleton {
    let mut out = *current;
    for (joint_type, cur) in current.iter() {
        let prev = &previous[joint_type];
        let p = cur.position_mm();
        let q = prev.position_mm();
        let position = [
            (1.0 - factor) * p[0] + factor * q[0],
            (1.0 - factor) * p[1] + factor * q[1],
            (1.0 - factor) * p[2] + factor * q[2],
        ];
        let orientation = cur.orientation().nlerp(&prev.orientation(), factor);
        out[joint_type] = Joint::new(position, orientation, cur.confidence());
    }
    out
}
