//! Places a participant's mono voice in the stereo field.
//!
//! The field is a plane in front of the listener: a pose `(x, y)` puts the
//! source at `(x, y, -0.5)` with the listener at the origin. The speaker
//! points along `(cos a, sin a, 1)`. Three factors make up each channel gain:
//!
//! * equal-power panning by azimuth (`sin(azimuth) = x / distance`)
//! * inverse distance attenuation (reference distance 1, rolloff 1)
//! * a directional cone, full gain on axis, falling linearly to 0.1 at 90°
//!   off axis and staying there behind the speaker

use core::f64::consts::FRAC_PI_2;

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};
use crate::protocol::Pose;

/// Depth of the field plane in front of the listener.
pub const FIELD_DEPTH: f64 = 0.5;
/// Gain outside the cone.
pub const CONE_OUTER_GAIN: f64 = 0.1;
const CONE_OUTER_HALF_ANGLE: f64 = 90.0;
const REF_DISTANCE: f64 = 1.0;
const ROLLOFF: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpatializerMessage {
    SetPose(Pose),
}

/// Left and right gains for a source at `pose`.
pub fn pose_gains(pose: &Pose) -> [f32; 2] {
    let (x, y, z) = (pose.x, pose.y, -FIELD_DEPTH);
    let distance = (x * x + y * y + z * z).sqrt();

    // Equal-power pan over azimuth -90°..90°.
    let azimuth = (x / distance).clamp(-1.0, 1.0).asin();
    let pan = (azimuth + FRAC_PI_2) / 2.0;
    let (left, right) = (pan.cos(), pan.sin());

    let attenuation =
        REF_DISTANCE / (REF_DISTANCE + ROLLOFF * (distance.max(REF_DISTANCE) - REF_DISTANCE));

    // Angle between the speaker axis and the direction to the listener.
    let axis = (pose.angle.cos(), pose.angle.sin(), 1.0);
    let to_listener = (-x, -y, -z);
    let dot = axis.0 * to_listener.0 + axis.1 * to_listener.1 + axis.2 * to_listener.2;
    let norm = (axis.0 * axis.0 + axis.1 * axis.1 + axis.2 * axis.2).sqrt() * distance;
    let off_axis = (dot / norm).clamp(-1.0, 1.0).acos().to_degrees();
    let cone = if off_axis >= CONE_OUTER_HALF_ANGLE {
        CONE_OUTER_GAIN
    } else {
        let f = off_axis / CONE_OUTER_HALF_ANGLE;
        (1.0 - f) + CONE_OUTER_GAIN * f
    };

    let scale = attenuation * cone;
    [(left * scale) as f32, (right * scale) as f32]
}

/// Mono in, stereo out.
pub struct Spatializer {
    target: [f32; 2],
    current: [f32; 2],
    coeff: f32,
}

impl Spatializer {
    pub fn new(pose: Pose) -> Self {
        let gains = pose_gains(&pose);
        Self {
            target: gains,
            current: gains,
            coeff: 0.995,
        }
    }

    pub fn set_pose(&mut self, pose: &Pose) {
        self.target = pose_gains(pose);
    }

    /// Pan `input` into the two `outputs`, ramping towards the target gains.
    pub fn apply(&mut self, input: Option<&Buffer>, outputs: &mut [Buffer]) {
        for (ch, out) in outputs.iter_mut().take(2).enumerate() {
            let target = self.target[ch];
            let mut g = self.current[ch];
            match input {
                Some(input) => {
                    for (o, &i) in out.iter_mut().zip(input.iter()) {
                        g = target + self.coeff * (g - target);
                        *o = i * g;
                    }
                }
                None => {
                    out.iter_mut().for_each(|s| *s = 0.0);
                    g = target;
                }
            }
            self.current[ch] = g;
        }
    }
}

impl AudioNode for Spatializer {
    type Message = SpatializerMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = SpatializerMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for SpatializerMessage::SetPose(pose) in messages {
            self.set_pose(&pose);
        }
        let input = inputs.first().and_then(|i| i.buffers().first());
        self.apply(input, outputs);
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        2
    }
}
