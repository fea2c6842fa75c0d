pub mod config;
pub mod patch;
pub mod session;
pub mod time;

pub use config::{Config, MidiBindingsConfig};
pub use patch::{PatchReport, read_patch, write_patch};
pub use session::Session;
pub use time::{MusicalPosition, TICKS_PER_BEAT, TimeContext};

pub use looper_engine::plugin::{BuiltinPlugins, PluginFactory};
pub use looper_engine::{ChannelStatus, ChannelType, MixerHandler};
pub use looper_project::{Patch, ProjectError};
