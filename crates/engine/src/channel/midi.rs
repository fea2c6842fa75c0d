use std::sync::Mutex;

use looper_transport::MidiEvent;

use super::{Channel, ChannelStatus};
use crate::data::FrameEvents;
use crate::midi::{Feedback, MidiBuffer};

/// MIDI-channel payload: where notes go (external port and/or the
/// channel's own instrument plugins).
#[derive(Debug)]
pub struct MidiChannel {
    midi_out: bool,
    midi_out_chan: u8,
    /// Events waiting for the next block's plugin pass.
    queue: Mutex<MidiBuffer>,
}

impl Default for MidiChannel {
    fn default() -> Self {
        Self {
            midi_out: false,
            midi_out_chan: 0,
            queue: Mutex::new(MidiBuffer::default()),
        }
    }
}

impl Clone for MidiChannel {
    fn clone(&self) -> Self {
        Self {
            midi_out: self.midi_out,
            midi_out_chan: self.midi_out_chan,
            queue: Mutex::new(MidiBuffer::default()),
        }
    }
}

impl MidiChannel {
    pub fn midi_out(&self) -> bool {
        self.midi_out
    }

    pub fn midi_out_chan(&self) -> u8 {
        self.midi_out_chan
    }

    pub fn set_midi_out(&mut self, enabled: bool, channel: u8) {
        self.midi_out = enabled;
        self.midi_out_chan = channel & 0x0F;
    }

    /// Queue an event from the MIDI input thread. Returns false when the
    /// queue is full.
    pub fn receive(&self, event: MidiEvent) -> bool {
        match self.queue.lock() {
            Ok(mut queue) => queue.push(event, 0),
            Err(_) => false,
        }
    }

    /// Audio thread: move the queued events into `out`. Leaves the queue
    /// alone when the input thread holds it; those events arrive next block.
    pub fn drain_into(&self, out: &mut MidiBuffer) {
        if let Ok(mut queue) = self.queue.try_lock() {
            out.extend_from(&queue);
            queue.clear();
        }
    }

    fn send(&self, event: MidiEvent, fb: &mut Feedback) {
        if self.midi_out {
            fb.out.send(event.with_channel(self.midi_out_chan));
        }
        if let Ok(mut queue) = self.queue.try_lock() {
            queue.push(event, 0);
        }
    }
}

pub(super) fn start(ch: &Channel, _m: &MidiChannel, fb: &mut Feedback) {
    let next = match ch.status() {
        ChannelStatus::Off => ChannelStatus::Wait,
        ChannelStatus::Wait => ChannelStatus::Off,
        ChannelStatus::Play => ChannelStatus::Ending,
        ChannelStatus::Ending => ChannelStatus::Off,
        ChannelStatus::Empty | ChannelStatus::Missing => return,
    };
    ch.notify_status(next, fb);
}

pub(super) fn kill(ch: &Channel, m: &MidiChannel, fb: &mut Feedback) {
    if ch.is_playing() {
        m.send(MidiEvent::ALL_NOTES_OFF, fb);
    }
    ch.notify_status(ChannelStatus::Off, fb);
}

pub(super) fn rewind_by_seq(ch: &Channel, m: &MidiChannel, fb: &mut Feedback) {
    if ch.is_playing() {
        m.send(MidiEvent::ALL_NOTES_OFF, fb);
    }
}

pub(super) fn parse_events(ch: &Channel, m: &MidiChannel, fe: &FrameEvents, fb: &mut Feedback) {
    if fe.on_first_beat {
        match ch.status() {
            ChannelStatus::Ending => kill(ch, m, fb),
            ChannelStatus::Wait => ch.notify_status(ChannelStatus::Play, fb),
            _ => {}
        }
    }
    if !ch.is_playing() {
        return;
    }
    for action in fe.actions.iter().filter(|a| a.channel == ch.index()) {
        m.send(action.event, fb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelType;
    use crate::midi::MidiMap;

    #[test]
    fn test_queue_drains_once() {
        let m = MidiChannel::default();
        assert!(m.receive(MidiEvent::note_on(0, 60, 100)));
        assert!(m.receive(MidiEvent::note_off(0, 60, 0)));

        let mut out = MidiBuffer::default();
        m.drain_into(&mut out);
        assert_eq!(out.len(), 2);

        out.clear();
        m.drain_into(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_midi_out_rechannels() {
        let mut m = MidiChannel::default();
        m.set_midi_out(true, 3);
        let map = MidiMap::default();
        let mut sink = Vec::new();
        let mut fb = Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        };
        m.send(MidiEvent::note_on(0, 64, 90), &mut fb);
        assert_eq!(sink, vec![MidiEvent::note_on(3, 64, 90)]);
    }

    #[test]
    fn test_clone_has_empty_queue() {
        let m = MidiChannel::default();
        m.receive(MidiEvent::note_on(0, 60, 1));
        let copy = m.clone();
        let mut out = MidiBuffer::default();
        copy.drain_into(&mut out);
        assert!(out.is_empty());
    }

    fn kill_into_vec(ch: &Channel) -> Vec<MidiEvent> {
        let map = MidiMap::default();
        let mut sink = Vec::new();
        let mut fb = Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        };
        ch.kill(&mut fb);
        sink
    }

    #[test]
    fn test_kill_sends_all_notes_off() {
        let mut ch = Channel::new(ChannelType::Midi, 0, 0, 16);
        ch.as_midi_mut().unwrap().set_midi_out(true, 2);

        // Nothing is sounding yet.
        assert!(kill_into_vec(&ch).is_empty());

        ch.set_status(ChannelStatus::Play);
        let sent = kill_into_vec(&ch);
        assert_eq!(ch.status(), ChannelStatus::Off);
        assert_eq!(sent, vec![MidiEvent::ALL_NOTES_OFF.with_channel(2)]);

        // The instrument plugins get it too.
        let mut queued = MidiBuffer::default();
        ch.as_midi().unwrap().drain_into(&mut queued);
        assert_eq!(queued.as_slice()[0].event, MidiEvent::ALL_NOTES_OFF);
    }

    #[test]
    fn test_ending_channel_is_killed_on_first_beat() {
        let ch = Channel::new(ChannelType::Midi, 0, 0, 16);
        ch.set_status(ChannelStatus::Ending);
        let map = MidiMap::default();
        let mut sink = Vec::new();
        let mut fb = Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        };
        let fe = FrameEvents {
            frame_local: 0,
            frame_global: 0,
            on_bar: true,
            on_first_beat: true,
            quanto_passed: false,
            do_quantize: true,
            actions: &[],
        };

        parse_events(&ch, ch.as_midi().unwrap(), &fe, &mut fb);
        assert_eq!(ch.status(), ChannelStatus::Off);
    }
}
