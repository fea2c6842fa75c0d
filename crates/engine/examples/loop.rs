//! Plays a wave file as a loop on the default output device.
//!
//! `cargo run -p looper_engine --example loop -- path/to/file.wav`

use std::sync::Arc;
use std::time::Duration;

use looper_engine::channel::SampleMode;
use looper_engine::plugin::BuiltinPlugins;
use looper_engine::{Behaviors, ChannelType};
use looper_transport::{DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: loop <file.wav>"))?;

    let mut collector = basedrop::Collector::new();
    let handler = looper_engine::new_session(
        &collector,
        DEFAULT_SAMPLE_RATE,
        DEFAULT_BUFFER_SIZE,
        Arc::new(BuiltinPlugins),
        Behaviors::default(),
    );

    let channel = handler.add_channel(ChannelType::Sample, 0);
    handler.load_channel(channel, &path)?;
    handler.set_mode(channel, SampleMode::LoopBasic)?;
    handler.state().set_metronome(true);

    let _engine = looper_engine::start(&handler, false)?;
    handler.start_sequencer();
    handler.key_press(channel, 127)?;

    for _ in 0..40 {
        std::thread::sleep(Duration::from_millis(250));
        collector.collect();
        log::info!(
            "beat {} peak {:.3}",
            handler.clock().current_beat(),
            handler.state().peak_out()
        );
    }

    handler.stop_sequencer();
    Ok(())
}
