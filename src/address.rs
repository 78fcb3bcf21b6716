//! Row-address lookup table.
//!
//! The row-select lines share a GPIO port with other signals, so the address
//! is never written directly. Each row index maps to a pair of masks that the
//! transfer engine writes to the port's set and clear registers: together they
//! drive every address pin and leave the rest of the port alone.

use crate::error::ConfigError;

/// Maximum number of address lines (A-E).
pub const MAX_ADDRESS_PINS: usize = 5;

/// GPIO bit positions of the row-address lines, A first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressPins {
    bits: [u8; MAX_ADDRESS_PINS],
    count: u8,
}

impl AddressPins {
    /// Address lines A-D on port bits 0-3.
    pub const ABCD: Self = Self::new([0, 1, 2, 3]);

    /// Create from the port bit of each address line, A first.
    ///
    /// Only the first five bits are stored but the requested count is kept;
    /// [`validate`](Self::validate) rejects empty, too long or out-of-range
    /// configurations.
    #[must_use]
    pub const fn new<const P: usize>(pins: [u8; P]) -> Self {
        let mut bits = [0u8; MAX_ADDRESS_PINS];
        let mut i = 0;
        while i < P && i < MAX_ADDRESS_PINS {
            bits[i] = pins[i];
            i += 1;
        }
        Self {
            bits,
            count: if P > u8::MAX as usize { u8::MAX } else { P as u8 },
        }
    }

    /// Number of address lines.
    #[must_use]
    pub const fn count(&self) -> u8 {
        self.count
    }

    /// Mask covering every address line.
    #[must_use]
    pub fn mask(&self) -> u16 {
        self.pins()
            .iter()
            .fold(0, |mask, &bit| mask | bit_mask(bit))
    }

    /// Number of row indices the address lines can select.
    #[must_use]
    pub const fn addressable_rows(&self) -> usize {
        match 1usize.checked_shl(self.count as u32) {
            Some(rows) => rows,
            None => usize::MAX,
        }
    }

    fn pins(&self) -> &[u8] {
        let stored = self.count as usize;
        &self.bits[..stored.min(MAX_ADDRESS_PINS)]
    }

    /// Check that there are one to five lines, every line sits on the 16-bit
    /// port, and no bit is used twice.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddressPins`] when any of those fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count as usize > MAX_ADDRESS_PINS {
            return Err(ConfigError::InvalidAddressPins);
        }
        let pins = self.pins();
        if pins.is_empty() || pins.iter().any(|&bit| bit >= 16) {
            return Err(ConfigError::InvalidAddressPins);
        }
        if self.mask().count_ones() as usize != pins.len() {
            return Err(ConfigError::InvalidAddressPins);
        }
        Ok(())
    }
}

impl Default for AddressPins {
    fn default() -> Self {
        Self::ABCD
    }
}

fn bit_mask(bit: u8) -> u16 {
    1u16.checked_shl(u32::from(bit)).unwrap_or(0)
}

/// Set/clear mask pair selecting one row.
///
/// Field order matches the order the address update channel copies them
/// into the staging buffer: clear first, then set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct AddressEntry {
    /// Address lines to drive low
    pub bits_to_clear: u16,
    /// Address lines to drive high
    pub bits_to_set: u16,
}

impl AddressEntry {
    /// An entry that touches no pins.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits_to_clear: 0,
            bits_to_set: 0,
        }
    }

    /// Compute the masks selecting `row`.
    #[must_use]
    pub fn for_row(row: usize, pins: &AddressPins) -> Self {
        let bits_to_set = pins
            .pins()
            .iter()
            .enumerate()
            .filter(|(k, _)| row & (1 << k) != 0)
            .fold(0u16, |mask, (_, &bit)| mask | bit_mask(bit));
        Self {
            bits_to_clear: !bits_to_set & pins.mask(),
            bits_to_set,
        }
    }
}

/// Address entries for every row of a frame, computed once at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTable<const NROWS: usize> {
    entries: [AddressEntry; NROWS],
}

impl<const NROWS: usize> AddressTable<NROWS> {
    /// Build the table for `NROWS` rows per frame.
    ///
    /// # Errors
    ///
    /// Fails if the pins are invalid or cannot select `NROWS` distinct rows.
    pub fn build(pins: &AddressPins) -> Result<Self, ConfigError> {
        pins.validate()?;
        if NROWS > pins.addressable_rows() {
            return Err(ConfigError::TooManyRows {
                rows: NROWS,
                pins: pins.count(),
            });
        }
        let mut entries = [AddressEntry::new(); NROWS];
        for (row, entry) in entries.iter_mut().enumerate() {
            *entry = AddressEntry::for_row(row, pins);
        }
        Ok(Self { entries })
    }

    /// Entry for `row`.
    ///
    /// # Panics
    ///
    /// If `row >= NROWS`.
    #[must_use]
    pub fn get(&self, row: usize) -> AddressEntry {
        self.entries[row]
    }

    /// All entries in row order.
    #[must_use]
    pub fn entries(&self) -> &[AddressEntry; NROWS] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abcd_mask() {
        assert_eq!(AddressPins::ABCD.count(), 4);
        assert_eq!(AddressPins::ABCD.mask(), 0b1111);
        assert_eq!(AddressPins::ABCD.addressable_rows(), 16);
    }

    #[test]
    fn test_entries_partition_mask() {
        let pins = AddressPins::new([2, 3, 4, 7]);
        let table = AddressTable::<16>::build(&pins).unwrap();
        for entry in table.entries() {
            assert_eq!(entry.bits_to_set & entry.bits_to_clear, 0);
            assert_eq!(entry.bits_to_set | entry.bits_to_clear, pins.mask());
        }
    }

    #[test]
    fn test_row_bits_follow_pin_order() {
        let pins = AddressPins::new([2, 3, 4, 7]);
        // row 0b1010 -> lines B and D -> port bits 3 and 7
        let entry = AddressEntry::for_row(0b1010, &pins);
        assert_eq!(entry.bits_to_set, (1 << 3) | (1 << 7));
        assert_eq!(entry.bits_to_clear, (1 << 2) | (1 << 4));
    }

    #[test]
    fn test_row_zero_clears_everything() {
        let table = AddressTable::<8>::build(&AddressPins::new([0, 1, 2])).unwrap();
        assert_eq!(table.get(0).bits_to_set, 0);
        assert_eq!(table.get(0).bits_to_clear, 0b111);
        assert_eq!(table.get(7).bits_to_set, 0b111);
        assert_eq!(table.get(7).bits_to_clear, 0);
    }

    #[test]
    fn test_too_many_rows() {
        let pins = AddressPins::new([0, 1, 2]);
        assert_eq!(
            AddressTable::<16>::build(&pins),
            Err(ConfigError::TooManyRows { rows: 16, pins: 3 })
        );
    }

    #[test]
    fn test_invalid_pins() {
        assert_eq!(
            AddressPins::new([]).validate(),
            Err(ConfigError::InvalidAddressPins)
        );
        assert_eq!(
            AddressPins::new([1, 1, 2]).validate(),
            Err(ConfigError::InvalidAddressPins)
        );
        assert_eq!(
            AddressPins::new([0, 16]).validate(),
            Err(ConfigError::InvalidAddressPins)
        );
    }

    #[test]
    fn test_too_many_pins_rejected() {
        let pins = AddressPins::new([0, 1, 2, 3, 4, 5]);
        assert_eq!(pins.count(), 6);
        assert_eq!(pins.validate(), Err(ConfigError::InvalidAddressPins));
        assert_eq!(
            AddressTable::<4>::build(&pins),
            Err(ConfigError::InvalidAddressPins)
        );
        assert_eq!(AddressPins::new([0, 1, 2, 3, 4]).validate(), Ok(()));
    }
}
