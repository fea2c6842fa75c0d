use std::sync::{Arc, Mutex, PoisonError};

use looper_transport::AudioBuffer;

use crate::midi::MidiBuffer;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unknown plugin '{0}'")]
    Unknown(String),

    #[error("failed to instantiate plugin '{id}': {reason}")]
    Instantiate { id: String, reason: String },
}

/// Which bus or channel a plugin stack belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackType {
    MasterIn,
    MasterOut,
    Channel(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Planar buffer handed to plugins. Sized once; `frames` is the part of
/// it that holds the current block.
#[derive(Debug, Clone)]
pub struct PluginBuffer {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl PluginBuffer {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; channels],
            frames: 0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.frames]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index][..self.frames]
    }

    /// Deinterleave the first `frames` frames of `buffer`.
    pub fn load(&mut self, buffer: &AudioBuffer, frames: usize) {
        self.frames = frames.min(buffer.frames()).min(self.capacity());
        for (c, channel) in self.channels.iter_mut().enumerate() {
            for (f, sample) in channel[..self.frames].iter_mut().enumerate() {
                *sample = buffer[f][c % buffer.channels()];
            }
        }
    }

    /// Interleave back into `buffer`, overwriting it.
    pub fn store(&self, buffer: &mut AudioBuffer) {
        let frames = self.frames.min(buffer.frames());
        for f in 0..frames {
            for c in 0..buffer.channels() {
                buffer[f][c] = self.channels[c % self.channels.len()][f];
            }
        }
    }

    fn capacity(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

/// An opaque audio/MIDI processor hosted in a stack.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn process(&mut self, buffer: &mut PluginBuffer, midi: &MidiBuffer);

    fn parameter_count(&self) -> usize;

    fn parameter(&self, index: usize) -> f32;

    fn set_parameter(&mut self, index: usize, value: f32);

    fn program(&self) -> usize {
        0
    }

    fn set_program(&mut self, _program: usize) {}

    /// Suspended plugins are skipped by the stack.
    fn is_suspended(&self) -> bool {
        false
    }
}

/// Creates plugin instances by id. Snapshot cloning asks the factory for a
/// fresh instance and copies the stored parameters onto it.
pub trait PluginFactory: Send + Sync {
    fn create(
        &self,
        id: &str,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn Plugin>, PluginError>;
}

/// Stand-in for a plugin that could not be re-instantiated.
struct Unavailable {
    name: String,
}

impl Plugin for Unavailable {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, _buffer: &mut PluginBuffer, _midi: &MidiBuffer) {}

    fn parameter_count(&self) -> usize {
        0
    }

    fn parameter(&self, _index: usize) -> f32 {
        0.0
    }

    fn set_parameter(&mut self, _index: usize, _value: f32) {}

    fn is_suspended(&self) -> bool {
        true
    }
}

/// A plugin instance plus the state needed to rebuild it.
///
/// `params` mirrors every value set through the slot; the instance lock is
/// only taken by the audio thread (published snapshots) or through
/// `get_mut` (unpublished drafts).
pub struct PluginSlot {
    id: String,
    name: String,
    index: usize,
    bypass: bool,
    params: Vec<f32>,
    program: usize,
    midi_in_params: Vec<u32>,
    factory: Arc<dyn PluginFactory>,
    sample_rate: u32,
    block_size: usize,
    instance: Mutex<Box<dyn Plugin>>,
}

impl PluginSlot {
    pub fn new(
        factory: Arc<dyn PluginFactory>,
        id: &str,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self, PluginError> {
        let instance = factory.create(id, sample_rate, block_size)?;
        let params: Vec<f32> = (0..instance.parameter_count())
            .map(|i| instance.parameter(i))
            .collect();
        Ok(Self {
            id: id.to_owned(),
            name: instance.name().to_owned(),
            index: 0,
            bypass: false,
            midi_in_params: vec![0; params.len()],
            params,
            program: instance.program(),
            factory,
            sample_rate,
            block_size,
            instance: Mutex::new(instance),
        })
    }

    /// Placeholder for a plugin the factory cannot create. Keeps the stored
    /// program and parameters so they survive a save; never processes.
    pub fn unavailable(
        factory: Arc<dyn PluginFactory>,
        id: &str,
        sample_rate: u32,
        block_size: usize,
        params: Vec<f32>,
        program: usize,
    ) -> Self {
        Self {
            id: id.to_owned(),
            name: id.to_owned(),
            index: 0,
            bypass: false,
            midi_in_params: vec![0; params.len()],
            params,
            program,
            factory,
            sample_rate,
            block_size,
            instance: Mutex::new(Box::new(Unavailable {
                name: id.to_owned(),
            })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// False for placeholders and plugins that suspended themselves.
    pub fn is_available(&self) -> bool {
        !self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_suspended()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn program(&self) -> usize {
        self.program
    }

    pub fn midi_in_params(&self) -> &[u32] {
        &self.midi_in_params
    }

    /// Returns false for an out-of-range parameter.
    pub fn set_parameter(&mut self, index: usize, value: f32) -> bool {
        let Some(param) = self.params.get_mut(index) else {
            return false;
        };
        *param = value;
        self.instance_mut().set_parameter(index, value);
        true
    }

    pub fn set_program(&mut self, program: usize) {
        self.program = program;
        self.instance_mut().set_program(program);
        // A program change rewrites every parameter.
        let instance = self.instance_mut();
        let params: Vec<f32> = (0..instance.parameter_count())
            .map(|i| instance.parameter(i))
            .collect();
        self.params = params;
    }

    pub fn set_midi_in_param(&mut self, index: usize, learnt: u32) -> bool {
        match self.midi_in_params.get_mut(index) {
            Some(slot) => {
                *slot = learnt;
                true
            }
            None => false,
        }
    }

    fn instance_mut(&mut self) -> &mut Box<dyn Plugin> {
        self.instance
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Audio thread. Skips the plugin if bypassed, suspended or locked.
    fn process(&self, buffer: &mut PluginBuffer, midi: &MidiBuffer) {
        if self.bypass {
            return;
        }
        let Ok(mut plugin) = self.instance.try_lock() else {
            return;
        };
        if plugin.is_suspended() {
            return;
        }
        plugin.process(buffer, midi);
    }
}

impl Clone for PluginSlot {
    /// A fresh instance from the factory with the stored program and
    /// parameters applied. If the factory fails the copy is suspended.
    fn clone(&self) -> Self {
        let instance = match self
            .factory
            .create(&self.id, self.sample_rate, self.block_size)
        {
            Ok(mut instance) => {
                instance.set_program(self.program);
                for (i, value) in self.params.iter().enumerate() {
                    instance.set_parameter(i, *value);
                }
                instance
            }
            Err(err) => {
                log::warn!("plugin '{}' suspended: {err}", self.id);
                Box::new(Unavailable {
                    name: self.name.clone(),
                }) as Box<dyn Plugin>
            }
        };
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            index: self.index,
            bypass: self.bypass,
            params: self.params.clone(),
            program: self.program,
            midi_in_params: self.midi_in_params.clone(),
            factory: Arc::clone(&self.factory),
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            instance: Mutex::new(instance),
        }
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSlot")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("bypass", &self.bypass)
            .field("params", &self.params)
            .field("program", &self.program)
            .finish()
    }
}

/// Ordered plugin chain. Each slot's `index` matches its position.
#[derive(Debug, Clone, Default)]
pub struct PluginStack {
    slots: Vec<PluginSlot>,
}

impl PluginStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PluginSlot> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PluginSlot> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginSlot> {
        self.slots.iter()
    }

    /// Append and return the new slot's index.
    pub fn push(&mut self, mut slot: PluginSlot) -> usize {
        slot.index = self.slots.len();
        self.slots.push(slot);
        self.slots.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<PluginSlot> {
        if index >= self.slots.len() {
            return None;
        }
        let slot = self.slots.remove(index);
        self.reindex();
        Some(slot)
    }

    /// Exchange two slots. Same index, out-of-range indices and single-slot
    /// stacks leave the stack untouched and return false.
    pub fn swap(&mut self, a: usize, b: usize) -> bool {
        let len = self.slots.len();
        if len < 2 || a == b || a >= len || b >= len {
            return false;
        }
        self.slots.swap(a, b);
        self.reindex();
        true
    }

    /// Move one step towards the front (`Up`) or the back (`Down`).
    /// A no-op at the boundaries.
    pub fn shift(&mut self, index: usize, direction: Direction) -> bool {
        match direction {
            Direction::Up if index > 0 => self.swap(index, index - 1),
            Direction::Down => self.swap(index, index + 1),
            Direction::Up => false,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    fn reindex(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.index = i;
        }
    }

    /// Audio thread: run the chain over the first `frames` frames of
    /// `buffer`. Every plugin sees the same `midi` events.
    pub fn process(
        &self,
        buffer: &mut AudioBuffer,
        frames: usize,
        host: &mut PluginBuffer,
        midi: &MidiBuffer,
    ) {
        if self.slots.is_empty() {
            return;
        }
        host.load(buffer, frames);
        for slot in &self.slots {
            slot.process(host, midi);
        }
        host.store(buffer);
    }
}

/// Volume trim with one parameter, always available.
#[derive(Debug, Clone)]
pub struct GainPlugin {
    gain: f32,
}

impl Plugin for GainPlugin {
    fn name(&self) -> &str {
        "Gain"
    }

    fn process(&mut self, buffer: &mut PluginBuffer, _midi: &MidiBuffer) {
        for c in 0..buffer.num_channels() {
            for sample in buffer.channel_mut(c) {
                *sample *= self.gain;
            }
        }
    }

    fn parameter_count(&self) -> usize {
        1
    }

    fn parameter(&self, _index: usize) -> f32 {
        self.gain
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        if index == 0 {
            self.gain = value.max(0.0);
        }
    }
}

/// Factory for the plugins shipped with the engine. Knows `"gain"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPlugins;

impl PluginFactory for BuiltinPlugins {
    fn create(
        &self,
        id: &str,
        _sample_rate: u32,
        _block_size: usize,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        match id {
            "gain" => Ok(Box::new(GainPlugin { gain: 1.0 })),
            other => Err(PluginError::Unknown(other.to_owned())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn stack_of(gains: &[f32]) -> PluginStack {
        let mut stack = PluginStack::new();
        for g in gains {
            stack.push(gain_slot(*g));
        }
        stack
    }

    fn gains(stack: &PluginStack) -> Vec<f32> {
        stack.iter().map(|s| s.params()[0]).collect()
    }

    fn assert_indices_match(stack: &PluginStack) {
        for (i, slot) in stack.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
    }

    #[test]
    fn test_swap_same_index_is_noop() {
        let mut stack = stack_of(&[1.0, 2.0, 3.0]);
        assert!(!stack.swap(1, 1));
        assert_eq!(gains(&stack), vec![1.0, 2.0, 3.0]);
        assert_indices_match(&stack);
    }

    #[test]
    fn test_swap_first_last_twice_restores_order() {
        let mut stack = stack_of(&[1.0, 2.0, 3.0]);
        assert!(stack.swap(0, 2));
        assert_eq!(gains(&stack), vec![3.0, 2.0, 1.0]);
        assert_indices_match(&stack);
        assert!(stack.swap(0, 2));
        assert_eq!(gains(&stack), vec![1.0, 2.0, 3.0]);
        assert_indices_match(&stack);
    }

    #[test]
    fn test_single_slot_and_boundaries_are_noops() {
        let mut single = stack_of(&[1.0]);
        assert!(!single.swap(0, 0));
        assert!(!single.shift(0, Direction::Down));

        let mut stack = stack_of(&[1.0, 2.0]);
        assert!(!stack.shift(0, Direction::Up));
        assert!(!stack.shift(1, Direction::Down));
        assert!(!stack.swap(0, 5));
        assert!(stack.shift(1, Direction::Up));
        assert_eq!(gains(&stack), vec![2.0, 1.0]);
    }

    #[test]
    fn test_remove_reindexes() {
        let mut stack = stack_of(&[1.0, 2.0, 3.0]);
        let removed = stack.remove(0).unwrap();
        assert_eq!(removed.params()[0], 1.0);
        assert_eq!(gains(&stack), vec![2.0, 3.0]);
        assert_indices_match(&stack);
        assert!(stack.remove(7).is_none());
    }

    #[test]
    fn test_process_skips_bypassed_and_suspended() {
        let mut stack = stack_of(&[2.0, 3.0]);
        stack.get_mut(1).unwrap().set_bypass(true);
        stack.push(PluginSlot::new(factory(), "suspended", 44100, 64).unwrap());

        let mut buffer = AudioBuffer::new(4, 2);
        buffer.set_all(0.5);
        let mut host = PluginBuffer::new(2, 4);
        stack.process(&mut buffer, 4, &mut host, &MidiBuffer::default());

        assert_eq!(buffer.as_slice(), &[1.0; 8]);
    }

    #[test]
    fn test_clone_reapplies_parameters_on_new_instance() {
        let mut slot = gain_slot(0.25);
        slot.set_bypass(true);
        let copy = slot.clone();
        assert_eq!(copy.params(), &[0.25, 0.0]);
        assert!(copy.is_bypassed());

        // The copy processes with the stored gain, independently of the original.
        let mut buffer = AudioBuffer::new(1, 1);
        buffer.set_all(1.0);
        let mut host = PluginBuffer::new(1, 1);
        let mut stack = PluginStack::new();
        let mut copy = copy;
        copy.set_bypass(false);
        stack.push(copy);
        stack.process(&mut buffer, 1, &mut host, &MidiBuffer::default());
        assert_eq!(buffer[0][0], 0.25);
    }

    #[test]
    fn test_set_program_refreshes_params() {
        let mut slot = gain_slot(1.0);
        slot.set_program(3);
        assert_eq!(slot.program(), 3);
        assert_eq!(slot.params(), &[3.0, 0.0]);
        assert!(!slot.set_parameter(9, 1.0));
    }

    #[test]
    fn test_builtin_gain() {
        let slot = PluginSlot::new(Arc::new(BuiltinPlugins), "gain", 44100, 4).unwrap();
        let mut stack = PluginStack::new();
        stack.push(slot);
        stack.get_mut(0).unwrap().set_parameter(0, 0.5);

        let mut buffer = AudioBuffer::new(4, 2);
        buffer.set_all(1.0);
        let mut host = PluginBuffer::new(2, 4);
        stack.process(&mut buffer, 4, &mut host, &MidiBuffer::default());
        assert_eq!(buffer[3], [0.5, 0.5]);
    }

    #[test]
    fn test_unknown_plugin_is_an_error() {
        let err = PluginSlot::new(factory(), "reverb", 44100, 64).unwrap_err();
        assert!(matches!(err, PluginError::Unknown(_)));
    }

    #[test]
    fn test_unavailable_slot_keeps_state() {
        let slot = PluginSlot::unavailable(factory(), "reverb", 44100, 64, vec![0.3, 0.7], 2);
        assert!(!slot.is_available());
        assert_eq!(slot.params(), &[0.3, 0.7]);
        assert_eq!(slot.program(), 2);
        assert_eq!(slot.midi_in_params(), &[0, 0]);
        assert!(gain_slot(1.0).is_available());

        let mut buffer = AudioBuffer::new(4, 2);
        buffer.set_all(1.0);
        let mut stack = PluginStack::new();
        stack.push(slot);
        let mut host = PluginBuffer::new(2, 4);
        stack.process(&mut buffer, 4, &mut host, &MidiBuffer::default());
        assert_eq!(buffer[3], [1.0, 1.0]);
    }
}
