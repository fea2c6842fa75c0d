use looper_transport::{MAX_PITCH, MidiEvent};

use crate::handler::{HandlerError, MixerHandler};
use crate::plugin::StackType;

/// Learnt controls for transport and master-bus actions. `0` is unbound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MasterBindings {
    pub rewind: u32,
    pub start_stop: u32,
    pub action_rec: u32,
    pub input_rec: u32,
    pub metronome: u32,
    pub volume_in: u32,
    pub volume_out: u32,
    pub beat_double: u32,
    pub beat_half: u32,
}

type LearnCallback = Box<dyn FnOnce(MidiEvent) + Send>;

pub enum DispatchMode {
    Normal,
    /// The next event (velocity stripped) goes to the callback instead of
    /// being dispatched.
    Learning(LearnCallback),
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Learning(_) => f.write_str("Learning"),
        }
    }
}

/// Routes incoming MIDI to the handler operations bound to it.
#[derive(Debug)]
pub struct MidiDispatcher {
    master: MasterBindings,
    /// Drop events not on this MIDI channel.
    filter: Option<u8>,
    mode: DispatchMode,
}

impl MidiDispatcher {
    pub fn new(master: MasterBindings, filter: Option<u8>) -> Self {
        Self {
            master,
            filter,
            mode: DispatchMode::Normal,
        }
    }

    pub fn master_bindings(&self) -> &MasterBindings {
        &self.master
    }

    pub fn set_master_bindings(&mut self, master: MasterBindings) {
        self.master = master;
    }

    pub fn set_filter(&mut self, filter: Option<u8>) {
        self.filter = filter;
    }

    pub fn start_learn(&mut self, callback: impl FnOnce(MidiEvent) + Send + 'static) {
        self.mode = DispatchMode::Learning(Box::new(callback));
    }

    pub fn stop_learn(&mut self) {
        self.mode = DispatchMode::Normal;
    }

    pub fn is_learning(&self) -> bool {
        matches!(self.mode, DispatchMode::Learning(_))
    }

    /// Handle one raw message from the MIDI input. Note on with velocity 0
    /// counts as note off.
    pub fn dispatch(&mut self, handler: &MixerHandler, bytes: &[u8]) -> Result<(), HandlerError> {
        let Some(event) = MidiEvent::from_slice(bytes) else {
            return Ok(());
        };
        let event = event.fix_velocity_zero();

        if self.is_learning() {
            if let DispatchMode::Learning(callback) =
                std::mem::replace(&mut self.mode, DispatchMode::Normal)
            {
                callback(MidiEvent::from_raw(event.raw_no_velocity()));
            }
            return Ok(());
        }

        if self.filter.is_some_and(|f| f != event.channel()) {
            return Ok(());
        }

        self.dispatch_master(handler, event)?;
        self.dispatch_channels(handler, event)
    }

    fn dispatch_master(&self, handler: &MixerHandler, event: MidiEvent) -> Result<(), HandlerError> {
        let pure = event.raw_no_velocity();
        let m = &self.master;
        let matches = |learnt: u32| learnt != 0 && learnt == pure;

        if matches(m.rewind) {
            handler.rewind_sequencer();
        } else if matches(m.start_stop) {
            handler.toggle_sequencer();
        } else if matches(m.action_rec) {
            handler.toggle_action_rec();
        } else if matches(m.input_rec) {
            handler.toggle_input_rec()?;
        } else if matches(m.metronome) {
            let state = handler.state();
            state.set_metronome(!state.metronome());
        } else if matches(m.volume_in) {
            handler.state().set_in_vol(event.velocity_f32());
        } else if matches(m.volume_out) {
            handler.state().set_out_vol(event.velocity_f32());
        } else if matches(m.beat_double) {
            handler.beat_double();
        } else if matches(m.beat_half) {
            handler.beat_half();
        }
        Ok(())
    }

    fn dispatch_channels(&self, handler: &MixerHandler, event: MidiEvent) -> Result<(), HandlerError> {
        let pure = event.raw_no_velocity();
        let data = handler.model().get();

        for channel in data.channels() {
            let index = channel.index();
            let learn = channel.midi_learn();
            if !learn.accepts(event) {
                continue;
            }
            let matches = |learnt: u32| learnt != 0 && learnt == pure;
            let is_sample = channel.as_sample().is_some();

            if matches(learn.key_press) {
                handler.key_press(index, event.velocity())?;
            } else if matches(learn.key_release) {
                handler.key_release(index)?;
            } else if matches(learn.mute) {
                handler.toggle_mute(index)?;
            } else if matches(learn.kill) {
                handler.kill(index)?;
            } else if matches(learn.arm) {
                handler.toggle_arm(index)?;
            } else if matches(learn.solo) {
                handler.toggle_solo(index)?;
            } else if matches(learn.volume) {
                handler.set_volume(index, event.velocity_f32())?;
            } else if is_sample && matches(learn.pitch) {
                handler.set_pitch(index, event.velocity_f32() * MAX_PITCH)?;
            } else if is_sample && matches(learn.read_actions) {
                handler.toggle_reading_actions(index)?;
            }

            for slot in channel.plugins().iter() {
                for (param, _) in slot
                    .midi_in_params()
                    .iter()
                    .enumerate()
                    .filter(|&(_, &learnt)| matches(learnt))
                {
                    handler.set_parameter(
                        StackType::Channel(index),
                        slot.index(),
                        param,
                        event.velocity_f32(),
                    )?;
                }
            }

            handler.receive_midi(index, event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use basedrop::Collector;

    use super::*;
    use crate::channel::{ChannelStatus, ChannelType};
    use crate::clock::{Clock, Sequencer};
    use crate::data::Data;
    use crate::handler::Behaviors;
    use crate::midi::{MidiBuffer, MidiLearn};
    use crate::model::Model;
    use crate::plugin::testing::factory;

    fn handler(collector: &Collector) -> MixerHandler {
        let model = Arc::new(Model::new(&collector.handle(), Data::new(64)));
        MixerHandler::new(
            model,
            Arc::new(Sequencer::new(44100)),
            factory(),
            Behaviors::default(),
            64,
        )
    }

    #[test]
    fn test_learn_mode_captures_one_event() {
        let collector = Collector::new();
        let h = handler(&collector);
        let mut dispatcher = MidiDispatcher::new(MasterBindings::default(), None);
        let learnt = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&learnt);
        dispatcher.start_learn(move |event| {
            *sink.lock().unwrap() = Some(event);
        });

        dispatcher.dispatch(&h, &[0x91, 36, 100]).unwrap();
        assert!(!dispatcher.is_learning());
        assert_eq!(
            *learnt.lock().unwrap(),
            Some(MidiEvent::from_bytes(0x91, 36, 0))
        );
    }

    #[test]
    fn test_master_start_stop_binding() {
        let collector = Collector::new();
        let h = handler(&collector);
        let master = MasterBindings {
            start_stop: MidiEvent::note_on(0, 10, 0).raw(),
            ..Default::default()
        };
        let mut dispatcher = MidiDispatcher::new(master, None);

        dispatcher.dispatch(&h, &[0x90, 10, 127]).unwrap();
        assert!(h.clock().is_running());
        // Velocity 0 is a note off: a different message.
        dispatcher.dispatch(&h, &[0x90, 10, 0]).unwrap();
        assert!(h.clock().is_running());

        // Filtered out.
        dispatcher.set_filter(Some(5));
        dispatcher.dispatch(&h, &[0x90, 10, 127]).unwrap();
        assert!(h.clock().is_running());
    }

    #[test]
    fn test_channel_bindings() {
        let collector = Collector::new();
        let h = handler(&collector);
        let index = h.add_channel(ChannelType::Midi, 0);
        h.set_midi_learn(
            index,
            MidiLearn {
                enabled: true,
                key_press: MidiEvent::note_on(0, 60, 0).raw(),
                volume: MidiEvent::from_bytes(0xB0, 7, 0).raw(),
                ..Default::default()
            },
        )
        .unwrap();
        let mut dispatcher = MidiDispatcher::new(MasterBindings::default(), None);

        dispatcher.dispatch(&h, &[0x90, 60, 90]).unwrap();
        dispatcher.dispatch(&h, &[0xB0, 7, 127]).unwrap();

        let data = h.model().get();
        let channel = data.channel(index).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Wait);
        assert_eq!(channel.volume(), 1.0);
    }

    #[test]
    fn test_events_reach_armed_midi_channel_plugins() {
        let collector = Collector::new();
        let h = handler(&collector);
        let index = h.add_channel(ChannelType::Midi, 0);
        h.add_plugin(StackType::Channel(index), "gain").unwrap();
        h.set_midi_learn(
            index,
            MidiLearn {
                enabled: true,
                ..Default::default()
            },
        )
        .unwrap();
        let mut dispatcher = MidiDispatcher::new(MasterBindings::default(), None);

        // Not armed: dropped.
        dispatcher.dispatch(&h, &[0x90, 64, 100]).unwrap();
        h.set_armed(index, true).unwrap();
        dispatcher.dispatch(&h, &[0x90, 64, 100]).unwrap();

        let data = h.model().get();
        let mut queued = MidiBuffer::default();
        data.channel(index)
            .unwrap()
            .as_midi()
            .unwrap()
            .drain_into(&mut queued);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued.as_slice()[0].event, MidiEvent::note_on(0, 64, 100));
    }

    #[test]
    fn test_plugin_parameter_binding() {
        let collector = Collector::new();
        let h = handler(&collector);
        let index = h.add_channel(ChannelType::Sample, 0);
        let stack = StackType::Channel(index);
        h.add_plugin(stack, "gain").unwrap();
        let knob = MidiEvent::from_bytes(0xB0, 20, 0).raw();
        h.set_plugin_midi_learn(stack, 0, 0, knob).unwrap();
        h.set_midi_learn(
            index,
            MidiLearn {
                enabled: true,
                ..Default::default()
            },
        )
        .unwrap();
        let mut dispatcher = MidiDispatcher::new(MasterBindings::default(), None);

        dispatcher.dispatch(&h, &[0xB0, 20, 127]).unwrap();
        let data = h.model().get();
        assert_eq!(data.stack(stack).unwrap().get(0).unwrap().params()[0], 1.0);
    }
}
