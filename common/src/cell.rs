use std::sync::atomic::{AtomicU32, Ordering};

/// Quiet NaN payload reserved to mean "no reading yet".
const EMPTY: u32 = 0x7fc0_dead;

/// Single-value handoff of the latest temperature between the device I/O
/// thread (writer) and the control tick (reader).
#[derive(Debug)]
pub struct TemperatureCell {
    bits: AtomicU32,
}

impl Default for TemperatureCell {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureCell {
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(EMPTY),
        }
    }

    /// Stores a reading. Non-finite values are dropped so the last good
    /// reading persists.
    pub fn store(&self, temperature_c: f32) -> bool {
        if !temperature_c.is_finite() {
            return false;
        }
        self.bits.store(temperature_c.to_bits(), Ordering::Release);
        true
    }

    pub fn load(&self) -> Option<f32> {
        match self.bits.load(Ordering::Acquire) {
            EMPTY => None,
            bits => Some(f32::from_bits(bits)),
        }
    }

    pub fn clear(&self) {
        self.bits.store(EMPTY, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn starts_empty_and_keeps_last_good_value() {
        let cell = TemperatureCell::new();
        assert_eq!(cell.load(), None);

        assert!(cell.store(183.25));
        assert!(!cell.store(f32::NAN));
        assert!(!cell.store(f32::INFINITY));

        assert_eq!(cell.load(), Some(183.25));

        cell.clear();
        assert_eq!(cell.load(), None);
    }

    #[test]
    fn writer_thread_hands_off_to_reader() {
        let cell = Arc::new(TemperatureCell::new());
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for step in 0..100 {
                    cell.store(20.0 + step as f32);
                }
            })
        };
        writer.join().unwrap();

        assert_eq!(cell.load(), Some(119.0));
    }
}
