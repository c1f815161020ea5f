//! Triangular dither noise for 16-bit output
//!
//! One table per output channel, built once per process on first use.

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Frames in each dither table
pub const DITHER_SIZE: usize = 48000;

const DITHER_SEED: u64 = 0x5EED_D17E;

lazy_static! {
    /// Left and right dither tables
    pub static ref DITHER: [Vec<f32>; 2] = [build_table(DITHER_SEED), build_table(DITHER_SEED + 1)];
}

/// Successive differences of uniform noise, so the table sums to zero over a cycle
fn build_table(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = Vec::with_capacity(DITHER_SIZE);
    let mut prev = 0.0f32;
    for _ in 0..DITHER_SIZE - 1 {
        let d = rng.gen::<f32>() - 0.5;
        table.push(d - prev);
        prev = d;
    }
    table.push(-prev);
    table
}

/// Convert one float sample to 16 bits with dither, rounding and clipping
#[inline]
pub fn to_s16(sample: f32, dither: f32) -> i16 {
    let value = (sample * 32766.0 + dither).round();
    value.clamp(-32768.0, 32767.0) as i16
}
