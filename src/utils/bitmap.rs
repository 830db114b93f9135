//! Replica ack bitmap.

use crate::utils::PaxstoreError;

use fixedbitset::FixedBitSet;

/// One bit per replica ID, e.g., the replicas that granted a promise in the
/// current round. Setting a bit twice counts once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap(FixedBitSet);

impl Bitmap {
    /// Creates a bitmap over `size` replicas, all bits set to `ones`.
    pub fn new(size: u8, ones: bool) -> Self {
        let mut bits = FixedBitSet::with_capacity(size as usize);
        if ones {
            bits.insert_range(..);
        }
        Bitmap(bits)
    }

    /// Sets the bit of replica `idx`; errors if `idx` is out of range.
    pub fn set(&mut self, idx: u8, flag: bool) -> Result<(), PaxstoreError> {
        if idx as usize >= self.0.len() {
            return Err(PaxstoreError(format!(
                "replica {} outside bitmap of {}",
                idx,
                self.0.len()
            )));
        }
        self.0.set(idx as usize, flag);
        Ok(())
    }

    /// Number of set bits.
    pub fn count(&self) -> u8 {
        self.0.count_ones(..) as u8
    }
}

#[cfg(test)]
mod bitmap_tests {
    use super::*;

    #[test]
    fn acks_count_once() -> Result<(), PaxstoreError> {
        let mut acks = Bitmap::new(5, false);
        assert_eq!(acks.count(), 0);
        acks.set(0, true)?;
        acks.set(3, true)?;
        acks.set(3, true)?;
        assert_eq!(acks.count(), 2);
        acks.set(0, false)?;
        assert_eq!(acks.count(), 1);
        Ok(())
    }

    #[test]
    fn out_of_range() {
        let mut acks = Bitmap::new(3, false);
        assert!(acks.set(3, true).is_err());
        assert_eq!(acks.count(), 0);
    }

    #[test]
    fn all_ones() {
        assert_eq!(Bitmap::new(7, true).count(), 7);
        assert_eq!(Bitmap::new(0, true).count(), 0);
    }
}
