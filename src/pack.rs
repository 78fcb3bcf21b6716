//! Bit-plane packing.
//!
//! The six colour lines and the shift clock share one 8-bit GPIO port. For
//! every pixel column the transfer engine writes two bytes per plane to that
//! port: the data with the clock low, then the same data with the clock high.
//! The second write produces the rising edge that shifts the pixel into the
//! panel, so the clock needs no CPU or timer.
//!
//! # Memory layout
//!
//! One [`ColumnWords`] per column:
//!
//! ```text
//! [plane 0 clk][plane 1 clk] ... [plane P-1 clk][plane 0 CLK] ... [plane P-1 CLK]
//! ```
//!
//! The data channel reads with a stride of `PLANES` bytes starting at byte
//! `p`, so one minor loop shifts out plane `p` for the whole row and the next
//! minor loop starts one byte further on.

use crate::error::ConfigError;
use crate::Rgb48;

/// Bit-plane counts the packer supports.
pub const SUPPORTED_BIT_PLANES: [usize; 3] = [8, 12, 16];

/// Check `planes` is a supported bit-plane count.
///
/// # Errors
///
/// [`ConfigError::UnsupportedBitPlanes`] otherwise.
pub fn check_bit_planes(planes: usize) -> Result<(), ConfigError> {
    if SUPPORTED_BIT_PLANES.contains(&planes) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedBitPlanes(planes))
    }
}

/// Right shift that brings a 16-bit channel down to `planes` significant bits.
///
/// Zero for 16 planes or more.
#[must_use]
pub const fn sample_shift(planes: usize) -> u32 {
    if planes >= 16 {
        0
    } else {
        16 - planes as u32
    }
}

/// Bit position of each signal on the output bus.
///
/// This is a property of the board wiring and must match it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusLayout {
    /// Shift clock
    pub clock: u8,
    /// Red, upper half
    pub red1: u8,
    /// Green, upper half
    pub green1: u8,
    /// Blue, upper half
    pub blue1: u8,
    /// Red, lower half
    pub red2: u8,
    /// Green, lower half
    pub green2: u8,
    /// Blue, lower half
    pub blue2: u8,
}

impl BusLayout {
    /// Clock on bit 0, bit 1 unused, then B1 R1 R2 G1 G2 B2.
    pub const DEFAULT: Self = Self {
        clock: 0,
        blue1: 2,
        red1: 3,
        red2: 4,
        green1: 5,
        green2: 6,
        blue2: 7,
    };

    const fn bits(&self) -> [u8; 7] {
        [
            self.clock,
            self.red1,
            self.green1,
            self.blue1,
            self.red2,
            self.green2,
            self.blue2,
        ]
    }

    /// Mask with only the clock bit set.
    #[must_use]
    pub const fn clock_mask(&self) -> u8 {
        1 << self.clock
    }

    /// Mask of the six colour bits.
    #[must_use]
    pub fn data_mask(&self) -> u8 {
        self.bits()[1..].iter().fold(0, |mask, &bit| mask | (1 << bit))
    }

    /// Check that every signal has its own bit on the 8-bit bus.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBusLayout`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bits = self.bits();
        if bits.iter().any(|&bit| bit >= 8) {
            return Err(ConfigError::InvalidBusLayout);
        }
        let mask = bits.iter().fold(0u8, |mask, &bit| mask | (1 << bit));
        if mask.count_ones() as usize != bits.len() {
            return Err(ConfigError::InvalidBusLayout);
        }
        Ok(())
    }

    #[inline]
    fn word(&self, upper: Rgb48, lower: Rgb48, shift: u32) -> u8 {
        let bit = |value: u16, pos: u8| (((value >> shift) & 1) as u8) << pos;
        bit(upper.red, self.red1)
            | bit(upper.green, self.green1)
            | bit(upper.blue, self.blue1)
            | bit(lower.red, self.red2)
            | bit(lower.green, self.green2)
            | bit(lower.blue, self.blue2)
    }
}

impl Default for BusLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Output bytes of one pixel column for every plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ColumnWords<const PLANES: usize> {
    /// Data with the clock low, one byte per plane
    pub clock_low: [u8; PLANES],
    /// Same data with the clock high
    pub clock_high: [u8; PLANES],
}

impl<const PLANES: usize> ColumnWords<PLANES> {
    /// All bytes zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clock_low: [0; PLANES],
            clock_high: [0; PLANES],
        }
    }

    /// Pack one column: `upper` is the pixel on row `r`, `lower` the pixel
    /// on row `r + rows_per_frame`.
    #[must_use]
    pub fn pack(upper: Rgb48, lower: Rgb48, layout: &BusLayout) -> Self {
        let mut words = Self::new();
        words.pack_into(upper, lower, layout);
        words
    }

    fn pack_into(&mut self, upper: Rgb48, lower: Rgb48, layout: &BusLayout) {
        let base = sample_shift(PLANES);
        let clock = layout.clock_mask();
        for plane in 0..PLANES {
            let word = layout.word(upper, lower, base + plane as u32);
            self.clock_low[plane] = word;
            self.clock_high[plane] = word | clock;
        }
    }
}

impl<const PLANES: usize> Default for ColumnWords<PLANES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack a row pair into `out`.
///
/// `upper` and `lower` hold the composited pixels of rows `r` and
/// `r + rows_per_frame`. Columns beyond the shortest of the three slices are
/// left untouched.
pub fn pack_row<const PLANES: usize>(
    upper: &[Rgb48],
    lower: &[Rgb48],
    layout: &BusLayout,
    out: &mut [ColumnWords<PLANES>],
) {
    for ((words, &upper), &lower) in out.iter_mut().zip(upper).zip(lower) {
        words.pack_into(upper, lower, layout);
    }
}
