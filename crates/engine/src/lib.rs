mod atomic;
pub mod channel;
pub mod clock;
mod data;
mod dispatcher;
mod handler;
pub mod midi;
mod mixer;
mod model;
pub mod plugin;
pub mod recorder;

use std::sync::Arc;

use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use looper_transport::{MAX_IO_CHANS, MidiEvent};

pub use atomic::{AtomicF32, AtomicF64};
pub use channel::{Channel, ChannelStatus, ChannelType};
pub use clock::{Clock, Sequencer};
pub use data::{Data, FrameEvents, RenderContext, RenderScratch};
pub use dispatcher::{DispatchMode, MasterBindings, MidiDispatcher};
pub use handler::{Behaviors, HandlerError, MIDI_OUT_CAPACITY, MixerHandler};
pub use mixer::{Metronome, MixerState, Renderer};
pub use model::{Draft, Model, SwapError};

/// Interleaved input samples buffered between the input and output streams.
const INPUT_RING_SECONDS: usize = 1;

pub struct AudioEngineHandle {
    /// MIDI produced by the renderer (MIDI-out channels, lightning).
    pub midi_out: rtrb::Consumer<MidiEvent>,
    pub sample_rate: u32,
    _stream: cpal::Stream,
    _input: Option<cpal::Stream>,
}

/// Open the default output device (and the default input device when
/// `with_input`) and start rendering `handler`'s session into it.
///
/// The device must run at the handler's sample rate.
pub fn start(handler: &MixerHandler, with_input: bool) -> anyhow::Result<AudioEngineHandle> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let default_config = device.default_output_config()?;
    let sample_format = default_config.sample_format();
    let mut config: cpal::StreamConfig = default_config.into();
    config.sample_rate = cpal::SampleRate(handler.sample_rate());

    let (mut renderer, midi_out) = handler.create_renderer();

    let input = if with_input {
        let (stream, rx) = build_input_stream(&host, handler.sample_rate())?;
        renderer.set_input(rx);
        Some(stream)
    } else {
        None
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;
    if let Some(input) = &input {
        input.play()?;
    }
    log::info!(
        "audio engine started: {} Hz, {} channel(s), block of {} frames",
        handler.sample_rate(),
        config.channels,
        handler.block_size()
    );

    Ok(AudioEngineHandle {
        midi_out,
        sample_rate: handler.sample_rate(),
        _stream: stream,
        _input: input,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let block_size = renderer.block_size();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for chunk in data.chunks_mut(block_size * output_channels) {
                let frames = chunk.len() / output_channels;
                let out = renderer.render(frames);
                for (f, frame) in chunk.chunks_mut(output_channels).enumerate() {
                    for (c, sample) in frame.iter_mut().enumerate() {
                        let value = if c < out.channels() { out[f][c] } else { 0.0 };
                        *sample = T::from_sample(value);
                    }
                }
            }
        },
        |err| log::error!("output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

/// Default input device, converted to interleaved stereo `f32` in a ring
/// the renderer drains.
fn build_input_stream(
    host: &cpal::Host,
    sample_rate: u32,
) -> anyhow::Result<(cpal::Stream, rtrb::Consumer<f32>)> {
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("no input device found"))?;
    let default_config = device.default_input_config()?;
    if default_config.sample_format() != cpal::SampleFormat::F32 {
        anyhow::bail!(
            "unsupported input sample format '{}'",
            default_config.sample_format()
        );
    }
    let mut config: cpal::StreamConfig = default_config.into();
    config.sample_rate = cpal::SampleRate(sample_rate);
    let input_channels = config.channels as usize;

    let (mut tx, rx) =
        rtrb::RingBuffer::new(sample_rate as usize * MAX_IO_CHANS * INPUT_RING_SECONDS);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(input_channels) {
                for c in 0..MAX_IO_CHANS {
                    if tx.push(frame[c % frame.len()]).is_err() {
                        return;
                    }
                }
            }
        },
        |err| log::error!("input stream error: {err}"),
        None,
    )?;
    Ok((stream, rx))
}

/// Shared pieces of a running session, for callers that build their own
/// handler and engine.
pub fn new_session(
    collector: &basedrop::Collector,
    sample_rate: u32,
    block_size: usize,
    factory: Arc<dyn plugin::PluginFactory>,
    behaviors: Behaviors,
) -> MixerHandler {
    let model = Arc::new(Model::new(&collector.handle(), Data::new(block_size)));
    MixerHandler::new(
        model,
        Arc::new(Sequencer::new(sample_rate)),
        factory,
        behaviors,
        block_size,
    )
}
