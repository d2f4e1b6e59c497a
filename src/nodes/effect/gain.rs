//! Master volume

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};

/// Range of the volume slider in decibels; full scale is 0 dB.
pub const VOLUME_RANGE_DB: f64 = 72.0;

/// Map a volume slider fraction in `[0, 1]` to a linear gain.
///
/// `db = 72 * (frac - 1)`, so 1 is unity and 0 is -72 dB.
pub fn volume_to_gain(frac: f64) -> f32 {
    let db = VOLUME_RANGE_DB * (frac.clamp(0.0, 1.0) - 1.0);
    10f64.powf(db / 20.0) as f32
}

/// Messages to control gain
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainMessage {
    /// Set the gain multiplier (1.0 = unity, 0.0 = silence)
    SetGain(f32),
}

/// Scales every input channel by a smoothed gain.
pub struct Gain {
    gain: f32,
    smoothed: f32,
    /// 0.0 = instant, closer to 1.0 = slower
    coeff: f32,
    channels: usize,
}

impl Gain {
    /// Stereo gain starting at `gain`
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            smoothed: gain,
            coeff: 0.995, // ~4ms at 48kHz
            channels: 2,
        }
    }

    /// Set the smoothing time constant in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Scale `inputs` into `outputs`, advancing the smoothing ramp.
    pub fn apply(&mut self, inputs: &[Buffer], outputs: &mut [Buffer]) {
        let Some(last) = inputs.last() else {
            outputs
                .iter_mut()
                .for_each(|b| b.iter_mut().for_each(|s| *s = 0.0));
            return;
        };

        let (target, coeff) = (self.gain, self.coeff);
        let mut end = self.smoothed;
        // Channels ramp along the same curve, so each starts from the stored value.
        for (ch, out) in outputs.iter_mut().enumerate() {
            let input = inputs.get(ch).unwrap_or(last);
            let mut g = self.smoothed;
            for (o, &i) in out.iter_mut().zip(input.iter()) {
                g = target + coeff * (g - target);
                *o = i * g;
            }
            end = g;
        }
        self.smoothed = end;
    }
}

impl AudioNode for Gain {
    type Message = GainMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = GainMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                GainMessage::SetGain(g) => self.gain = g,
            }
        }

        let in_buffers = inputs.first().map(|i| i.buffers()).unwrap_or(&[]);
        self.apply(in_buffers, outputs);
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}
