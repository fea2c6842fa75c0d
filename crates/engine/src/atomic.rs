use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// `f32` stored as its bit pattern, so GUI, MIDI and audio threads can all
/// read and write it without tearing.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Same as [`AtomicF32`], for playback cursors that need sub-frame precision.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32_roundtrip() {
        let value = AtomicF32::new(0.5);
        assert_eq!(value.load(), 0.5);
        value.store(-1.25);
        assert_eq!(value.load(), -1.25);
    }

    #[test]
    fn test_atomic_f64_default_is_zero() {
        let value = AtomicF64::default();
        assert_eq!(value.load(), 0.0);
        value.store(1234.5);
        assert_eq!(value.load(), 1234.5);
    }
}
