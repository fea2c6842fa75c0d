use std::collections::BTreeMap;

use looper_transport::MidiEvent;

/// One recorded event for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub channel: usize,
    pub frame: usize,
    pub event: MidiEvent,
}

/// Recorded actions keyed by loop frame.
///
/// Lives inside the session snapshot, so the audio thread reads it through
/// the same handle as the channels. Writes happen on drafts only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionMap {
    frames: BTreeMap<usize, Vec<Action>>,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions due at `frame`, in recording order. Does not allocate.
    #[inline]
    pub fn actions_on_frame(&self, frame: usize) -> &[Action] {
        self.frames.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&mut self, action: Action) {
        self.frames.entry(action.frame).or_default().push(action);
    }

    pub fn has_actions(&self, channel: usize) -> bool {
        self.iter().any(|a| a.channel == channel)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.frames.values().flatten()
    }

    pub fn clear_channel(&mut self, channel: usize) {
        self.retain(|a| a.channel != channel);
    }

    pub fn clear_all(&mut self) {
        self.frames.clear();
    }

    /// Drop a deleted channel's actions and shift later channels down so
    /// they keep pointing at the same channel after reindexing.
    pub fn remove_channel(&mut self, channel: usize) {
        self.clear_channel(channel);
        for action in self.frames.values_mut().flatten() {
            if action.channel > channel {
                action.channel -= 1;
            }
        }
    }

    pub fn clone_channel(&mut self, from: usize, to: usize) {
        let copies: Vec<Action> = self
            .iter()
            .filter(|a| a.channel == from)
            .map(|a| Action { channel: to, ..*a })
            .collect();
        for action in copies {
            self.record(action);
        }
    }

    /// Move every action by `ratio`, after a tempo change stretched the loop.
    /// Actions that land past `frames_in_loop` are dropped.
    pub fn rescale(&mut self, ratio: f64, frames_in_loop: usize) {
        let old = std::mem::take(&mut self.frames);
        for action in old.into_values().flatten() {
            let frame = (action.frame as f64 * ratio) as usize;
            if frame < frames_in_loop {
                self.record(Action { frame, ..action });
            }
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&Action) -> bool) {
        for actions in self.frames.values_mut() {
            actions.retain(|a| keep(a));
        }
        self.frames.retain(|_, actions| !actions.is_empty());
    }
}
