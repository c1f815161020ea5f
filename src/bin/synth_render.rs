//! synth_render: play a chord or arpeggio through the synth and write a WAV
//!
//! Events are sent from a control handle and picked up by the renderer at
//! block boundaries, the same path a live MIDI thread takes.
//!
//! Usage:
//!   synth_render out.wav --font builtin:sine --pattern arpeggio --cores 4
//!   synth_render out.wav --settings synth.toml --tuning "0,-29,4,16,-14,-2,-31,2,-27,-16,18,-12"

use clap::{Parser, ValueEnum};
use hound::{SampleFormat, WavSpec, WavWriter};
use phonon_synth::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

const CHUNK_FRAMES: usize = 512;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Pattern {
    /// All notes struck together
    Chord,
    /// Notes one after another
    Arpeggio,
}

#[derive(Parser)]
#[command(name = "synth_render")]
#[command(about = "Render notes through the realtime synth to a WAV file", long_about = None)]
struct Cli {
    /// Output WAV file path
    output: PathBuf,

    /// TOML settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// SoundFont to load (may be repeated; the last one ends up on top)
    #[arg(short, long, default_value = BUILTIN_SINE)]
    font: Vec<String>,

    /// Rendering cores (overrides the settings file)
    #[arg(short, long)]
    cores: Option<usize>,

    /// Program to select on channel 0
    #[arg(short, long, default_value = "0")]
    program: u32,

    #[arg(long, value_enum, default_value = "chord")]
    pattern: Pattern,

    /// Keys to play
    #[arg(short, long, value_delimiter = ',', default_value = "60,64,67,72")]
    keys: Vec<u32>,

    /// Seconds each note is held
    #[arg(long, default_value = "1.0")]
    note_length: f64,

    /// Seconds rendered after the last note-off
    #[arg(long, default_value = "1.5")]
    tail: f64,

    /// Twelve cents offsets applied to channel 0 as an octave tuning
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    tuning: Option<Vec<f64>>,

    /// Master gain
    #[arg(short, long)]
    gain: Option<f32>,
}

struct Event {
    frame: usize,
    key: u32,
    on: bool,
}

fn schedule(cli: &Cli, sample_rate: f64) -> Vec<Event> {
    let note_frames = (cli.note_length * sample_rate) as usize;
    let mut events = Vec::new();
    for (i, &key) in cli.keys.iter().enumerate() {
        let start = match cli.pattern {
            Pattern::Chord => 0,
            Pattern::Arpeggio => i * note_frames / 2,
        };
        events.push(Event {
            frame: start,
            key,
            on: true,
        });
        events.push(Event {
            frame: start + note_frames,
            key,
            on: false,
        });
    }
    events.sort_by_key(|e| e.frame);
    events
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => SynthSettings::from_file(path)?,
        None => SynthSettings::default(),
    };
    if let Some(cores) = cli.cores {
        settings.cpu_cores = cores;
    }

    let (mut synth, mut renderer) = Synth::new(&settings)?;
    let sample_rate = synth.settings().sample_rate;
    for font in &cli.font {
        synth.sfload(font, false)?;
    }
    synth.program_reset()?;
    synth.program_change(0, cli.program)?;
    if let Some(gain) = cli.gain {
        synth.set_gain(gain)?;
    }

    if let Some(cents) = &cli.tuning {
        let cents: [f64; 12] = cents
            .as_slice()
            .try_into()
            .map_err(|_| format!("--tuning needs 12 values, got {}", cents.len()))?;
        synth.create_octave_tuning(0, 0, "cli", &cents)?;
        synth.select_tuning(0, 0, 0)?;
    }

    let info = synth.get_channel_info(0)?;
    info!(
        "Channel 0: {} (bank {} program {}), {} core(s)",
        info.name,
        info.bank,
        info.program,
        renderer.cores()
    );

    let events = schedule(&cli, sample_rate);
    let last = events.last().map_or(0, |e| e.frame);
    let total = last + (cli.tail * sample_rate) as usize;

    let spec = WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&cli.output, spec)?;

    let started = Instant::now();
    let mut pending = events.iter().peekable();
    let mut buf = vec![0i16; CHUNK_FRAMES * 2];
    let mut peak_voices = 0;
    let mut frame = 0;
    while frame < total {
        while let Some(event) = pending.next_if(|e| e.frame <= frame) {
            if event.on {
                synth.note_on(0, event.key, 100)?;
            } else {
                synth.note_off(0, event.key)?;
            }
        }

        let frames = CHUNK_FRAMES.min(total - frame);
        renderer.write_s16_interleaved(&mut buf[..frames * 2])?;
        for &sample in &buf[..frames * 2] {
            writer.write_sample(sample)?;
        }
        peak_voices = peak_voices.max(synth.active_voice_count());
        frame += frames;
    }
    writer.finalize()?;

    let elapsed = started.elapsed().as_secs_f64();
    let audio = total as f64 / sample_rate;
    println!("Wrote {} ({:.2}s of audio)", cli.output.display(), audio);
    println!(
        "Rendered in {:.3}s ({:.1}x realtime), peak {} voices, cpu load {:.1}%",
        elapsed,
        audio / elapsed.max(1e-9),
        peak_voices,
        synth.cpu_load()
    );
    Ok(())
}
