//! Volume-control stages.
//!
//! A [`VolumeControl`] is a gain shared between the control thread (writer) and the output
//! callback (reader). It is lock-free so the callback never waits on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Clone, Debug)]
pub struct VolumeControl {
    gain: Arc<AtomicU32>,
}

impl VolumeControl {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: Arc::new(AtomicU32::new(sanitize(gain).to_bits())),
        }
    }

    pub fn set(&self, gain: f32) {
        self.gain.store(sanitize(gain).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

fn sanitize(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Map a user-facing volume percent onto a perceptually even gain.
///
/// The slider is bent logarithmically so equal steps sound roughly equally loud; 0 and 100 map
/// to silence and unity.
pub fn percent_to_gain(percent: u8) -> f32 {
    if percent == 0 {
        return 0.0;
    }
    let percent = percent.min(100) as f64;
    let shaped = 100.0 - 100.0 * ((100.0 - percent) * 0.09 + 1.0).log10();
    (shaped / 100.0).clamp(0.0, 1.0) as f32
}
