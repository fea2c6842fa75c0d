use std::sync::atomic::{AtomicUsize, Ordering};

use looper_transport::MidiEvent;

use crate::channel::ChannelStatus;

/// Events a MIDI queue can hold before new ones are dropped.
pub const MIDI_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub event: MidiEvent,
    /// Offset inside the block.
    pub frame: usize,
}

/// Event list with a fixed capacity, allocated up front so it can be
/// filled and cleared on the audio thread.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<TimedEvent>,
}

impl MidiBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    /// Returns false, dropping the event, when the buffer is full.
    pub fn push(&mut self, event: MidiEvent, frame: usize) -> bool {
        if self.events.len() == self.events.capacity() {
            return false;
        }
        self.events.push(TimedEvent { event, frame });
        true
    }

    pub fn extend_from(&mut self, other: &MidiBuffer) {
        for e in &other.events {
            if !self.push(e.event, e.frame) {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedEvent> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[TimedEvent] {
        &self.events
    }
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::with_capacity(MIDI_QUEUE_CAPACITY)
    }
}

/// Destination for outgoing MIDI: notes from MIDI channels and lightning
/// feedback. The audio thread writes into an `rtrb` producer.
pub trait MidiSink {
    fn send(&mut self, event: MidiEvent);
}

/// The audio thread's outgoing ring. A full ring drops the event and
/// counts it; the control thread reads the count back.
pub struct RingSink<'a> {
    tx: &'a mut rtrb::Producer<MidiEvent>,
    dropped: &'a AtomicUsize,
}

impl<'a> RingSink<'a> {
    pub fn new(tx: &'a mut rtrb::Producer<MidiEvent>, dropped: &'a AtomicUsize) -> Self {
        Self { tx, dropped }
    }
}

impl MidiSink for RingSink<'_> {
    fn send(&mut self, event: MidiEvent) {
        if self.tx.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MidiSink for Vec<MidiEvent> {
    fn send(&mut self, event: MidiEvent) {
        self.push(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MidiSink for NullSink {
    fn send(&mut self, _event: MidiEvent) {}
}

/// One template message of a controller map. `value == 0` means undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiMapMessage {
    pub channel: u8,
    pub value: u32,
}

impl MidiMapMessage {
    pub fn is_defined(&self) -> bool {
        self.value != 0
    }
}

/// Messages that light a hardware controller's LEDs for each channel state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiMap {
    pub brand: String,
    pub device: String,
    pub init_commands: Vec<MidiMapMessage>,
    pub mute_on: MidiMapMessage,
    pub mute_off: MidiMapMessage,
    pub solo_on: MidiMapMessage,
    pub solo_off: MidiMapMessage,
    pub waiting: MidiMapMessage,
    pub playing: MidiMapMessage,
    pub playing_inaudible: MidiMapMessage,
    pub stopping: MidiMapMessage,
    pub stopped: MidiMapMessage,
}

/// Learnt controls that trigger a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiLearn {
    pub enabled: bool,
    /// Only accept events on this MIDI channel; `None` accepts any.
    pub filter: Option<u8>,
    pub key_press: u32,
    pub key_release: u32,
    pub kill: u32,
    pub arm: u32,
    pub volume: u32,
    pub mute: u32,
    pub solo: u32,
    pub read_actions: u32,
    pub pitch: u32,
}

impl MidiLearn {
    pub fn accepts(&self, event: MidiEvent) -> bool {
        self.enabled && self.filter.is_none_or(|f| f == event.channel())
    }
}

/// Learnt controls whose LEDs mirror a channel's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiLightning {
    pub enabled: bool,
    pub playing: u32,
    pub mute: u32,
    pub solo: u32,
}

/// Outgoing MIDI context for state transitions: the controller map, the
/// sink, and whether any channel is soloed (audibility decides between
/// the "playing" and "playing inaudible" messages).
pub struct Feedback<'a> {
    pub midimap: &'a MidiMap,
    pub out: &'a mut dyn MidiSink,
    pub has_solos: bool,
}

impl Feedback<'_> {
    /// Merge the note/controller number of `learnt` into the map message.
    pub fn send_lightning(&mut self, learnt: u32, message: &MidiMapMessage) {
        if learnt == 0 || !message.is_defined() {
            return;
        }
        let out = MidiEvent::from_raw(message.value | (learnt & 0x00FF_0000))
            .with_channel(message.channel);
        self.out.send(out);
    }

    pub fn send_status(&mut self, lightning: &MidiLightning, status: ChannelStatus, audible: bool) {
        if !lightning.enabled {
            return;
        }
        let map = self.midimap;
        let message = match status {
            ChannelStatus::Off => &map.stopped,
            ChannelStatus::Wait => &map.waiting,
            ChannelStatus::Ending => &map.stopping,
            ChannelStatus::Play if audible => &map.playing,
            ChannelStatus::Play => &map.playing_inaudible,
            ChannelStatus::Empty | ChannelStatus::Missing => return,
        };
        self.send_lightning(lightning.playing, message);
    }

    pub fn send_mute(&mut self, lightning: &MidiLightning, mute: bool) {
        if !lightning.enabled {
            return;
        }
        let map = self.midimap;
        let message = if mute { &map.mute_on } else { &map.mute_off };
        self.send_lightning(lightning.mute, message);
    }

    pub fn send_solo(&mut self, lightning: &MidiLightning, solo: bool) {
        if !lightning.enabled {
            return;
        }
        let map = self.midimap;
        let message = if solo { &map.solo_on } else { &map.solo_off };
        self.send_lightning(lightning.solo, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_buffer_never_grows() {
        let mut buffer = MidiBuffer::with_capacity(2);
        assert!(buffer.push(MidiEvent::note_on(0, 60, 1), 0));
        assert!(buffer.push(MidiEvent::note_on(0, 61, 1), 1));
        assert!(!buffer.push(MidiEvent::note_on(0, 62, 1), 2));
        assert_eq!(buffer.len(), 2);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_ring_counts_dropped_events() {
        let (mut tx, mut rx) = rtrb::RingBuffer::new(1);
        let dropped = AtomicUsize::new(0);
        let mut sink = RingSink::new(&mut tx, &dropped);
        sink.send(MidiEvent::note_on(0, 60, 1));
        sink.send(MidiEvent::note_on(0, 61, 1));
        sink.send(MidiEvent::note_on(0, 62, 1));

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert_eq!(rx.pop().unwrap(), MidiEvent::note_on(0, 60, 1));
    }

    #[test]
    fn test_lightning_merges_learnt_note() {
        let map = MidiMap {
            playing: MidiMapMessage {
                channel: 5,
                value: 0x9000_7F00,
            },
            ..Default::default()
        };
        let lightning = MidiLightning {
            enabled: true,
            playing: MidiEvent::note_on(0, 36, 0).raw(),
            ..Default::default()
        };
        let mut sink = Vec::new();
        let mut fb = Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        };
        fb.send_status(&lightning, ChannelStatus::Play, true);
        // Undefined message: nothing sent.
        fb.send_status(&lightning, ChannelStatus::Wait, true);

        assert_eq!(sink, vec![MidiEvent::from_bytes(0x95, 36, 0x7F)]);
    }

    #[test]
    fn test_lightning_disabled_sends_nothing() {
        let map = MidiMap {
            mute_on: MidiMapMessage {
                channel: 0,
                value: 0xB000_0100,
            },
            ..Default::default()
        };
        let lightning = MidiLightning {
            enabled: false,
            mute: 0xB010_0000,
            ..Default::default()
        };
        let mut sink = Vec::new();
        Feedback {
            midimap: &map,
            out: &mut sink,
            has_solos: false,
        }
        .send_mute(&lightning, true);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_midi_learn_filter() {
        let learn = MidiLearn {
            enabled: true,
            filter: Some(2),
            ..Default::default()
        };
        assert!(learn.accepts(MidiEvent::note_on(2, 1, 1)));
        assert!(!learn.accepts(MidiEvent::note_on(3, 1, 1)));
    }
}
