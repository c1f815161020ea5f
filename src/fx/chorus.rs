/// Chorus - multi-voice modulated delay
///
/// Each chorus voice reads the shared delay line at a position swept by its own
/// LFO (phases spread evenly across voices). Voices alternate between the left
/// and right outputs. No feedback, which is what separates chorus from flanger.
use super::{write_out, ChorusParams, ChorusUnit, ChorusWaveform, FxMode};
use std::f32::consts::PI;

// Base delay before modulation
const BASE_DELAY_SECS: f32 = 0.005;
const MAX_DEPTH_MS: f64 = 50.0;
const MAX_VOICES: u32 = 99;
const MIN_SPEED_HZ: f64 = 0.29;
const MAX_SPEED_HZ: f64 = 5.0;

/// Modulated-delay chorus, the default [`ChorusUnit`]
pub struct ModulatedChorus {
    buffer: Vec<f32>,    // Delay buffer
    write_pos: usize,    // Current write position
    phase: f32,          // LFO phase (0.0 to 1.0)
    sample_rate: f32,
    voices: u32,
    level: f32,
    speed: f32,
    depth: f32, // seconds
    waveform: ChorusWaveform,
}

impl ModulatedChorus {
    pub fn new(sample_rate: f64) -> Self {
        let max_delay = BASE_DELAY_SECS as f64 + MAX_DEPTH_MS / 1000.0;
        let buffer_size = (max_delay * sample_rate).ceil() as usize + 2;

        let mut chorus = Self {
            buffer: vec![0.0; buffer_size],
            write_pos: 0,
            phase: 0.0,
            sample_rate: sample_rate as f32,
            voices: 0,
            level: 0.0,
            speed: 0.0,
            depth: 0.0,
            waveform: ChorusWaveform::Sine,
        };
        chorus.set_params(&ChorusParams::default());
        chorus
    }

    /// Get the current LFO phase (0.0 to 1.0)
    pub fn lfo_phase(&self) -> f32 {
        self.phase
    }

    #[inline]
    fn lfo(&self, phase: f32) -> f32 {
        match self.waveform {
            ChorusWaveform::Sine => (phase * 2.0 * PI).sin() * 0.5 + 0.5,
            ChorusWaveform::Triangle => {
                if phase < 0.5 {
                    phase * 2.0
                } else {
                    2.0 - phase * 2.0
                }
            }
        }
    }

    #[inline]
    fn read_delayed(&self, delay_samples: f32) -> f32 {
        let buffer_len = self.buffer.len();
        let read_pos = (self.write_pos as f32 + buffer_len as f32 - delay_samples)
            .rem_euclid(buffer_len as f32);
        let index = read_pos as usize % buffer_len;
        let frac = read_pos - read_pos.floor();
        self.buffer[index] + frac * (self.buffer[(index + 1) % buffer_len] - self.buffer[index])
    }
}

impl ChorusUnit for ModulatedChorus {
    fn set_params(&mut self, params: &ChorusParams) {
        self.voices = params.voices.min(MAX_VOICES);
        self.level = params.level.clamp(0.0, 10.0) as f32;
        self.speed = params.speed.clamp(MIN_SPEED_HZ, MAX_SPEED_HZ) as f32;
        self.depth = (params.depth_ms.clamp(0.0, MAX_DEPTH_MS) / 1000.0) as f32;
        self.waveform = params.waveform;
    }

    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32], mode: FxMode) {
        debug_assert_eq!(input.len(), left.len(), "Input buffer length mismatch");
        debug_assert_eq!(input.len(), right.len(), "Input buffer length mismatch");

        let buffer_len = self.buffer.len();
        let scale = if self.voices > 0 {
            self.level / self.voices as f32
        } else {
            0.0
        };

        for i in 0..input.len() {
            // Write dry signal to buffer (no feedback)
            self.buffer[self.write_pos] = input[i];

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            for v in 0..self.voices {
                let phase = (self.phase + v as f32 / self.voices as f32).fract();
                let delay_time = BASE_DELAY_SECS + self.depth * self.lfo(phase);
                let wet = self.read_delayed(delay_time * self.sample_rate);
                if v % 2 == 0 {
                    out_l += wet;
                } else {
                    out_r += wet;
                }
            }
            if self.voices == 1 {
                out_r = out_l;
            }

            write_out(&mut left[i], out_l * scale, mode);
            write_out(&mut right[i], out_r * scale, mode);

            self.write_pos = (self.write_pos + 1) % buffer_len;

            // Advance phase
            self.phase += self.speed / self.sample_rate;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chorus_delays_signal() {
        let mut chorus = ModulatedChorus::new(44100.0);
        let mut input = vec![0.0f32; 2048];
        input[0] = 1.0;
        let mut left = vec![0.0f32; 2048];
        let mut right = vec![0.0f32; 2048];

        chorus.process(&input, &mut left, &mut right, FxMode::Replace);

        // 5ms base delay = ~220 samples of silence first
        assert!(left[..200].iter().all(|&s| s == 0.0));
        assert!(left.iter().any(|&s| s.abs() > 0.0));
        assert!(right.iter().any(|&s| s.abs() > 0.0));
    }

    #[test]
    fn test_zero_voices_is_silent() {
        let mut chorus = ModulatedChorus::new(44100.0);
        chorus.set_params(&ChorusParams {
            voices: 0,
            ..ChorusParams::default()
        });
        let input = vec![1.0f32; 512];
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        chorus.process(&input, &mut left, &mut right, FxMode::Replace);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_phase_advances_at_speed() {
        let mut chorus = ModulatedChorus::new(1000.0);
        chorus.set_params(&ChorusParams {
            speed: 1.0,
            ..ChorusParams::default()
        });
        let input = vec![0.0f32; 250];
        let mut left = vec![0.0f32; 250];
        let mut right = vec![0.0f32; 250];
        chorus.process(&input, &mut left, &mut right, FxMode::Mix);
        assert!((chorus.lfo_phase() - 0.25).abs() < 1e-3);
    }
}
