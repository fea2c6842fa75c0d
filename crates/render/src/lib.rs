use std::path::Path;

use looper_engine::{Clock, MixerHandler};
use looper_transport::{AudioArc, MAX_IO_CHANS};

/// Render `frames` frames of the session offline, block by block, through
/// the same renderer the audio device drives. Must not run while a device
/// engine renders the same handler: both would advance the sequencer.
pub fn bounce(handler: &MixerHandler, frames: usize) -> AudioArc {
    let (mut renderer, _midi_out) = handler.create_renderer();
    let block_size = renderer.block_size().max(1);
    let mut samples = Vec::with_capacity(frames * MAX_IO_CHANS);

    let mut remaining = frames;
    while remaining > 0 {
        let chunk = remaining.min(block_size);
        let out = renderer.render(chunk);
        for f in 0..chunk {
            samples.extend_from_slice(&out[f]);
        }
        remaining -= chunk;
    }

    AudioArc::new(samples, handler.sample_rate(), MAX_IO_CHANS as u16)
}

/// Bounce `loops` whole sequencer loops from the top, leaving the
/// sequencer stopped and rewound.
pub fn bounce_loops(handler: &MixerHandler, loops: usize) -> AudioArc {
    let clock = handler.clock();
    clock.rewind();
    handler.start_sequencer();
    let frames = clock.frames_in_loop() * loops;
    log::info!("bouncing {loops} loop(s), {frames} frames");

    let audio = bounce(handler, frames);

    handler.stop_sequencer();
    clock.rewind();
    audio
}

pub fn write_wav(audio: &AudioArc, path: &Path) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;

    for &sample in audio.samples() {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;
    use looper_engine::plugin::BuiltinPlugins;
    use looper_engine::{Behaviors, new_session};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn session(collector: &Collector) -> MixerHandler {
        new_session(
            collector,
            44100,
            256,
            Arc::new(BuiltinPlugins),
            Behaviors::default(),
        )
    }

    #[test]
    fn test_bounce_silent_session() {
        let collector = Collector::new();
        let handler = session(&collector);

        let audio = bounce(&handler, 1000);

        assert_eq!(audio.frames(), 1000);
        assert_eq!(audio.channels(), 2);
        assert!(audio.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_bounce_loops_with_metronome() {
        let collector = Collector::new();
        let handler = session(&collector);
        handler.state().set_metronome(true);

        let audio = bounce_loops(&handler, 1);

        assert_eq!(audio.frames(), handler.clock().frames_in_loop());
        assert!(audio.samples().iter().any(|&s| s != 0.0));
        assert!(!handler.clock().is_running());
        assert_eq!(handler.clock().current_frame(), 0);
    }

    #[test]
    fn test_write_wav() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bounce.wav");
        let audio = AudioArc::new(vec![0.5, -0.5, 0.25, -0.25], 48000, 2);

        write_wav(&audio, &path).expect("write");

        let mut reader = hound::WavReader::open(&path).expect("open");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, [0.5, -0.5, 0.25, -0.25]);
    }
}
