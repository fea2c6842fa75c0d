use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use basedrop::{Handle, Shared, SharedCell};

use crate::channel::ChannelRuntime;
use crate::data::Data;

/// A private deep copy of the published snapshot, edited off the audio
/// thread and then published with [`Model::swap`].
#[derive(Debug)]
pub struct Draft {
    data: Data,
    base: u64,
    /// Channel runtime values as copied, keyed by channel id.
    origin: Vec<(u64, ChannelRuntime)>,
}

impl Draft {
    /// Version of the snapshot this draft was copied from.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn into_inner(self) -> Data {
        self.data
    }
}

impl Deref for Draft {
    type Target = Data;

    fn deref(&self) -> &Data {
        &self.data
    }
}

impl DerefMut for Draft {
    fn deref_mut(&mut self) -> &mut Data {
        &mut self.data
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// Another swap landed after the draft was taken. The draft is handed
    /// back unchanged.
    #[error("draft based on version {} is stale (current is {current})", .draft.base)]
    Stale { draft: Box<Draft>, current: u64 },
}

/// The published session snapshot.
///
/// The audio thread calls [`Model::get`] once per block and renders the
/// snapshot it got for the whole block. Readers never wait on writers:
/// old snapshots are released through the `basedrop` collector, never on
/// the audio thread.
pub struct Model {
    cell: SharedCell<Data>,
    version: AtomicU64,
    publish: Mutex<()>,
    changed: AtomicBool,
    handle: Handle,
}

impl Model {
    pub fn new(handle: &Handle, data: Data) -> Self {
        Self {
            cell: SharedCell::new(Shared::new(handle, data)),
            version: AtomicU64::new(0),
            publish: Mutex::new(()),
            changed: AtomicBool::new(false),
            handle: handle.clone(),
        }
    }

    /// Current snapshot. Lock-free.
    #[inline]
    pub fn get(&self) -> Shared<Data> {
        self.cell.get()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Deep copy of the current snapshot for editing.
    pub fn draft(&self) -> Draft {
        let (current, base) = {
            let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
            (self.cell.get(), self.version())
        };
        let data = (*current).clone();
        let origin = data
            .channels()
            .iter()
            .map(|ch| (ch.id(), ch.runtime()))
            .collect();
        Draft { data, base, origin }
    }

    /// Publish `draft` if nothing was published since it was taken.
    ///
    /// Runtime values (status, mixing parameters, cursors) written to the
    /// published snapshot while the draft was edited are carried into it,
    /// unless the draft changed the same value.
    pub fn swap(&self, draft: Draft) -> Result<(), SwapError> {
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.version();
        if draft.base != current {
            return Err(SwapError::Stale {
                draft: Box::new(draft),
                current,
            });
        }
        let live = self.cell.get();
        for (id, origin) in &draft.origin {
            if let (Some(mine), Some(published)) =
                (draft.data.channel_by_id(*id), live.channel_by_id(*id))
            {
                mine.merge_runtime(origin, &published.runtime());
            }
        }
        self.cell.set(Shared::new(&self.handle, draft.data));
        self.version.store(current + 1, Ordering::Release);
        self.changed.store(true, Ordering::Release);
        Ok(())
    }

    /// Draft, edit and swap, starting over from a fresh draft whenever a
    /// concurrent swap made the edit stale.
    pub fn update<R>(&self, mut edit: impl FnMut(&mut Data) -> R) -> R {
        loop {
            let mut draft = self.draft();
            let result = edit(&mut draft);
            match self.swap(draft) {
                Ok(()) => return result,
                Err(SwapError::Stale { current, .. }) => {
                    log::warn!("model changed while editing (now version {current}), retrying");
                }
            }
        }
    }

    /// Replace the snapshot unconditionally (loading a whole session).
    pub fn reset(&self, data: Data) {
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        self.cell.set(Shared::new(&self.handle, data));
        self.version.fetch_add(1, Ordering::AcqRel);
        self.changed.store(true, Ordering::Release);
    }

    /// True once after each publish; lets the UI refresh lazily.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use basedrop::Collector;

    use super::*;
    use crate::channel::{ChannelStatus, ChannelType};

    fn model(collector: &Collector) -> Model {
        Model::new(&collector.handle(), Data::new(64))
    }

    #[test]
    fn test_snapshot_is_isolated_from_drafts() {
        let collector = Collector::new();
        let model = model(&collector);
        let before = model.get();

        model.update(|data| {
            data.add_channel(ChannelType::Sample, 0);
        });

        assert!(before.channels().is_empty());
        assert_eq!(model.get().channels().len(), 1);
        assert_eq!(model.version(), 1);
        assert!(model.take_changed());
        assert!(!model.take_changed());
    }

    #[test]
    fn test_stale_draft_is_rejected() {
        let collector = Collector::new();
        let model = model(&collector);
        let mut first = model.draft();
        let mut second = model.draft();
        first.add_channel(ChannelType::Sample, 0);
        second.add_channel(ChannelType::Midi, 0);

        model.swap(first).unwrap();
        let Err(SwapError::Stale { draft, current }) = model.swap(second) else {
            panic!("second swap should be stale");
        };
        assert_eq!(current, 1);
        assert_eq!(draft.channels().len(), 1);
        assert_eq!(model.get().channels()[0].channel_type(), ChannelType::Sample);
    }

    #[test]
    fn test_atomics_reach_published_snapshot() {
        let collector = Collector::new();
        let model = model(&collector);
        model.update(|data| {
            data.add_channel(ChannelType::Midi, 0);
        });
        model.get().channels()[0].set_volume(0.25);
        assert_eq!(model.get().channels()[0].volume(), 0.25);
        // Nothing structural changed.
        assert_eq!(model.version(), 1);
    }

    #[test]
    fn test_swap_keeps_runtime_writes_made_while_editing() {
        let collector = Collector::new();
        let model = model(&collector);
        model.update(|data| {
            data.add_channel(ChannelType::Midi, 0);
            data.add_channel(ChannelType::Midi, 0);
        });
        model.get().channels()[0].set_status(ChannelStatus::Ending);

        let mut draft = model.draft();
        draft.channels()[1].set_volume(0.5);
        draft.add_channel(ChannelType::Sample, 0);

        // Fader move from the MIDI thread and an audio-thread transition.
        let published = model.get();
        published.channels()[0].set_volume(0.1);
        published.channels()[0].set_status(ChannelStatus::Off);
        published.channels()[1].set_volume(0.9);
        model.swap(draft).unwrap();

        let data = model.get();
        assert_eq!(data.channels()[0].volume(), 0.1);
        assert_eq!(data.channels()[0].status(), ChannelStatus::Off);
        // The draft's own edit wins over the concurrent one.
        assert_eq!(data.channels()[1].volume(), 0.5);
        assert_eq!(data.channels().len(), 3);
    }

    #[test]
    fn test_swap_matches_channels_by_id() {
        let collector = Collector::new();
        let model = model(&collector);
        model.update(|data| {
            data.add_channel(ChannelType::Midi, 0);
            data.add_channel(ChannelType::Midi, 0);
        });

        let mut draft = model.draft();
        draft.remove_channel(0);
        model.get().channels()[1].set_pan(0.2);
        model.get().channels()[0].set_pan(0.8);
        model.swap(draft).unwrap();

        let data = model.get();
        assert_eq!(data.channels().len(), 1);
        assert_eq!(data.channels()[0].pan(), 0.2);
    }

    #[test]
    fn test_cloned_channel_gets_a_new_id() {
        let mut data = Data::new(64);
        data.add_channel(ChannelType::Sample, 0);
        let copy = data.clone_channel(0).unwrap();
        assert_ne!(data.channels()[0].id(), data.channels()[copy].id());
        assert_eq!(data.clone().channels()[0].id(), data.channels()[0].id());
    }

    #[test]
    fn test_old_snapshots_are_collected() {
        let mut collector = Collector::new();
        let model = model(&collector);
        for _ in 0..3 {
            model.update(|data| {
                data.add_channel(ChannelType::Sample, 0);
            });
        }
        collector.collect();
        assert_eq!(collector.alloc_count(), 1);
    }
}
