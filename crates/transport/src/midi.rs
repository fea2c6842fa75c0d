/// A short MIDI message packed into one word.
///
/// Layout is `0xSSNNVV00`: status byte in bits 24..32, first data byte
/// (note or controller) in bits 16..24, second data byte (velocity or
/// value) in bits 8..16. The low byte is unused. Learnt bindings and
/// lightning messages are stored in the same layout, so comparing two
/// events is a plain integer comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MidiEvent(u32);

impl MidiEvent {
    pub const NOTE_ON: u8 = 0x90;
    pub const NOTE_OFF: u8 = 0x80;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    /// Not a wire message: recorded actions use it to mean "kill the channel".
    pub const NOTE_KILL: u8 = 0x70;

    /// Controller 123, all notes off, on channel 0.
    pub const ALL_NOTES_OFF: MidiEvent = MidiEvent((0xB0 << 24) | (0x7B << 16));

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn from_bytes(b0: u8, b1: u8, b2: u8) -> Self {
        Self(((b0 as u32) << 24) | ((b1 as u32) << 16) | ((b2 as u32) << 8))
    }

    pub const fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::from_bytes(Self::NOTE_ON | (channel & 0x0F), note, velocity)
    }

    pub const fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::from_bytes(Self::NOTE_OFF | (channel & 0x0F), note, velocity)
    }

    pub const fn kill() -> Self {
        Self::from_bytes(Self::NOTE_KILL, 0, 0)
    }

    /// Parse raw bytes from a device. Missing data bytes read as zero.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let b0 = *bytes.first()?;
        let b1 = bytes.get(1).copied().unwrap_or(0);
        let b2 = bytes.get(2).copied().unwrap_or(0);
        Some(Self::from_bytes(b0, b1, b2))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn byte(self, n: usize) -> u8 {
        (self.0 >> (24 - n * 8)) as u8
    }

    pub fn bytes(self) -> [u8; 3] {
        [self.byte(0), self.byte(1), self.byte(2)]
    }

    /// Upper nibble of the status byte (`0x90` for note on, ...).
    #[inline]
    pub const fn status(self) -> u8 {
        self.byte(0) & 0xF0
    }

    #[inline]
    pub const fn channel(self) -> u8 {
        self.byte(0) & 0x0F
    }

    #[inline]
    pub const fn note(self) -> u8 {
        self.byte(1)
    }

    #[inline]
    pub const fn velocity(self) -> u8 {
        self.byte(2)
    }

    /// Status and first data byte only, for matching learnt bindings
    /// regardless of velocity or controller value.
    #[inline]
    pub const fn raw_no_velocity(self) -> u32 {
        self.0 & 0xFFFF_0000
    }

    pub const fn with_channel(self, channel: u8) -> Self {
        Self((self.0 & 0xF0FF_FFFF) | (((channel & 0x0F) as u32) << 24))
    }

    pub const fn with_velocity(self, velocity: u8) -> Self {
        Self((self.0 & 0xFFFF_00FF) | ((velocity as u32) << 8))
    }

    /// A note on with velocity 0 is a note off.
    pub const fn fix_velocity_zero(self) -> Self {
        if self.status() == Self::NOTE_ON && self.velocity() == 0 {
            Self::from_bytes(Self::NOTE_OFF | self.channel(), self.note(), 0)
        } else {
            self
        }
    }

    pub const fn is_note_on(self) -> bool {
        self.status() == Self::NOTE_ON
    }

    pub const fn is_note_off(self) -> bool {
        self.status() == Self::NOTE_OFF
    }

    pub const fn is_kill(self) -> bool {
        self.status() == Self::NOTE_KILL
    }

    /// Velocity mapped to `0.0..=1.0`.
    pub fn velocity_f32(self) -> f32 {
        self.velocity() as f32 / 127.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_event_layout() {
        let event = MidiEvent::from_bytes(0x92, 60, 100);
        assert_eq!(event.raw(), 0x923C_6400);
        assert_eq!(event.status(), MidiEvent::NOTE_ON);
        assert_eq!(event.channel(), 2);
        assert_eq!(event.note(), 60);
        assert_eq!(event.velocity(), 100);
        assert_eq!(event.bytes(), [0x92, 60, 100]);
    }

    #[test]
    fn test_midi_event_channel_and_velocity_rewrite() {
        let event = MidiEvent::note_on(0, 64, 127).with_channel(9).with_velocity(1);
        assert_eq!(event.channel(), 9);
        assert_eq!(event.velocity(), 1);
        assert_eq!(event.note(), 64);
    }

    #[test]
    fn test_midi_event_velocity_zero_is_note_off() {
        let event = MidiEvent::note_on(3, 40, 0).fix_velocity_zero();
        assert!(event.is_note_off());
        assert_eq!(event.channel(), 3);
        assert_eq!(event.note(), 40);
    }

    #[test]
    fn test_midi_event_raw_no_velocity() {
        let a = MidiEvent::from_bytes(0xB0, 7, 10);
        let b = MidiEvent::from_bytes(0xB0, 7, 99);
        assert_eq!(a.raw_no_velocity(), b.raw_no_velocity());
    }

    #[test]
    fn test_midi_event_all_notes_off() {
        let event = MidiEvent::ALL_NOTES_OFF.with_channel(4);
        assert_eq!(event.bytes(), [0xB4, 0x7B, 0x00]);
    }

    #[test]
    fn test_midi_event_from_short_slice() {
        assert_eq!(MidiEvent::from_slice(&[]), None);
        let event = MidiEvent::from_slice(&[0xC0, 5]).unwrap();
        assert_eq!(event.bytes(), [0xC0, 5, 0]);
    }
}
