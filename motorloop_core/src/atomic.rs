//! `f64` values shared across threads without locks.
use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern in an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, v: f64, order: Ordering) {
        self.0.store(v.to_bits(), order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_exact_bits() {
        let a = AtomicF64::new(-0.0);
        assert!(a.load(Ordering::Relaxed).is_sign_negative());
        a.store(1.25e-300, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), 1.25e-300);
    }
}
