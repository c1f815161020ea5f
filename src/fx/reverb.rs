/// Schroeder reverb with room size, damping and stereo width control
///
/// Classic Schroeder/Freeverb structure per output side:
/// - 4 parallel comb filters with one-pole damping in the feedback path
/// - 2 series allpass filters
/// - Right side delays offset by a fixed stereo spread
///
/// Algorithm based on:
/// - Manfred Schroeder (1962) "Natural Sounding Artificial Reverberation"
/// - Freeverb implementation (public domain)
use super::{write_out, FxMode, ReverbParams, ReverbUnit};

// Comb and allpass lengths in samples at 44.1kHz
const COMB_TUNING: [usize; 4] = [1557, 1617, 1491, 1422];
const ALLPASS_TUNING: [usize; 2] = [225, 556];
const STEREO_SPREAD: usize = 23;

const FIXED_GAIN: f32 = 0.015;
const SCALE_WET: f32 = 3.0;
const SCALE_DAMP: f32 = 0.4;
const SCALE_ROOM: f32 = 0.28;
const OFFSET_ROOM: f32 = 0.7;
const ALLPASS_FEEDBACK: f32 = 0.5;

struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    damping: f32,
    filter_state: f32,
}

impl CombFilter {
    fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
            feedback: 0.84,
            damping: 0.0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];

        // One-pole lowpass in the feedback path
        self.filter_state = delayed * (1.0 - self.damping) + self.filter_state * self.damping;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;

        self.pos += 1;
        if self.pos == self.buffer.len() {
            self.pos = 0;
        }
        delayed
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
    }
}

struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = -input + delayed;
        self.buffer[self.pos] = input + delayed * ALLPASS_FEEDBACK;

        self.pos += 1;
        if self.pos == self.buffer.len() {
            self.pos = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Stereo Schroeder reverb, the default [`ReverbUnit`]
pub struct SchroederReverb {
    combs_left: Vec<CombFilter>,
    combs_right: Vec<CombFilter>,
    allpass_left: Vec<AllpassFilter>,
    allpass_right: Vec<AllpassFilter>,
    wet1: f32,
    wet2: f32,
}

impl SchroederReverb {
    /// Create a reverb with delay lengths scaled for `sample_rate`
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let scaled = |len: usize| ((len as f64) * scale).round() as usize;

        let mut reverb = Self {
            combs_left: COMB_TUNING.iter().map(|&d| CombFilter::new(scaled(d))).collect(),
            combs_right: COMB_TUNING
                .iter()
                .map(|&d| CombFilter::new(scaled(d + STEREO_SPREAD)))
                .collect(),
            allpass_left: ALLPASS_TUNING.iter().map(|&d| AllpassFilter::new(scaled(d))).collect(),
            allpass_right: ALLPASS_TUNING
                .iter()
                .map(|&d| AllpassFilter::new(scaled(d + STEREO_SPREAD)))
                .collect(),
            wet1: 0.0,
            wet2: 0.0,
        };
        reverb.set_params(&ReverbParams::default());
        reverb
    }
}

impl ReverbUnit for SchroederReverb {
    fn set_params(&mut self, params: &ReverbParams) {
        let room = params.roomsize.clamp(0.0, 1.0) as f32;
        let damp = params.damping.clamp(0.0, 1.0) as f32;
        let width = params.width.clamp(0.0, 100.0) as f32;
        let wet = params.level.clamp(0.0, 1.0) as f32 * SCALE_WET;

        // Larger room = longer decay
        let feedback = room * SCALE_ROOM + OFFSET_ROOM;
        for comb in self.combs_left.iter_mut().chain(self.combs_right.iter_mut()) {
            comb.feedback = feedback;
            comb.damping = damp * SCALE_DAMP;
        }

        self.wet1 = wet * (width / 2.0 + 0.5);
        self.wet2 = wet * ((1.0 - width) / 2.0);
    }

    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32], mode: FxMode) {
        debug_assert_eq!(input.len(), left.len(), "Input buffer length mismatch");
        debug_assert_eq!(input.len(), right.len(), "Input buffer length mismatch");

        for i in 0..input.len() {
            let in_sample = input[i] * FIXED_GAIN;

            let mut out_l: f32 = self.combs_left.iter_mut().map(|c| c.process(in_sample)).sum();
            let mut out_r: f32 = self.combs_right.iter_mut().map(|c| c.process(in_sample)).sum();

            for ap in &mut self.allpass_left {
                out_l = ap.process(out_l);
            }
            for ap in &mut self.allpass_right {
                out_r = ap.process(out_r);
            }

            write_out(&mut left[i], out_l * self.wet1 + out_r * self.wet2, mode);
            write_out(&mut right[i], out_r * self.wet1 + out_l * self.wet2, mode);
        }
    }

    fn reset(&mut self) {
        self.combs_left.iter_mut().for_each(CombFilter::clear);
        self.combs_right.iter_mut().for_each(CombFilter::clear);
        self.allpass_left.iter_mut().for_each(AllpassFilter::clear);
        self.allpass_right.iter_mut().for_each(AllpassFilter::clear);
    }
}
