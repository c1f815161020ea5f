//! Single-sample SoundFont from a WAV file
//!
//! The whole file becomes one unlooped sample with root key 60, mapped across
//! the keyboard as bank 0 program 0. Stereo files are mixed down to mono.

use crate::generator::GenSet;
use crate::sfont::{SampleFont, SamplePreset, SoundFont, SoundFontLoader, Zone};
use crate::voice::Sample;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Key at which a WAV font plays the file at its recorded pitch
pub const WAV_ROOT_KEY: u8 = 60;

/// Loader for `*.wav` files
#[derive(Debug, Default)]
pub struct WavFontLoader;

impl SoundFontLoader for WavFontLoader {
    fn load(&self, filename: &str) -> Option<Box<dyn SoundFont>> {
        let path = Path::new(filename);
        let is_wav = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return None;
        }
        match read_sample(path) {
            Ok(sample) => {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filename.to_string());
                let zone = Zone::full(Arc::new(sample), GenSet::default());
                let preset = SamplePreset::new(&name, 0, 0, vec![zone]);
                Some(Box::new(SampleFont::new(filename, vec![preset])))
            }
            Err(e) => {
                debug!("WAV loader could not read \"{}\": {}", filename, e);
                None
            }
        }
    }
}

fn read_sample(path: &Path) -> Result<Sample, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let data = raw
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok(Sample {
        name: path.display().to_string(),
        data,
        sample_rate: spec.sample_rate as f64,
        root_key: WAV_ROOT_KEY,
        pitch_correction: 0,
        loop_range: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    #[test]
    fn test_loads_stereo_wav_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let font = WavFontLoader.load(path.to_str().unwrap()).unwrap();
        let preset = font.preset(0, 0).unwrap();
        assert_eq!(preset.name(), "tone");

        let sample = read_sample(&path).unwrap();
        assert_eq!(sample.data.len(), 100);
        assert!((sample.data[0] - 0.25).abs() < 1e-4);
        assert_eq!(sample.sample_rate, 22050.0);
    }

    #[test]
    fn test_declines_other_files() {
        assert!(WavFontLoader.load("piano.sf2").is_none());
        assert!(WavFontLoader.load("/nonexistent/missing.wav").is_none());
    }
}
