//! Chained-DMA row refresh engine for HUB75 LED matrix displays.
//!
//! ## How HUB75 LED Displays Work
//!
//! HUB75 RGB LED matrix panels are scanned, time-multiplexed displays that behave like a long
//! daisy-chained shift register rather than a random-access framebuffer.
//!
//! ### Signal names
//! - **R1 G1 B1 / R2 G2 B2** – Serial colour data for the upper and lower halves of the active scan line
//! - **CLK** – Shift-register clock; every rising edge pushes the six colour bits one pixel to the right
//! - **LAT / STB** – Latch; copies the shift-register contents to the LED drivers for the row currently selected by the address lines
//! - **OE** – Output-Enable (active LOW): LEDs are lit while OE is LOW and blanked when it is HIGH
//! - **A B C D (E)** – Row-address select lines (choose which pair of rows is lit)
//!
//! ### Brightness and colour depth (Binary Code Modulation)
//! Each bit-plane of a row is displayed for a period proportional to its binary weight
//! (1, 2, 4, 8 …), yielding 2ⁿ intensity levels per channel. See
//! [Batsocks – LED dimming using Binary Code Modulation](https://www.batsocks.co.uk/readme/art_bcm_1.htm)
//! for a deeper explanation.
//!
//! ## The refresh engine
//!
//! Instead of keeping a whole frame in bit-plane form, this crate prepares one
//! row pair at a time, just ahead of the panel:
//!
//! ```text
//! layers ──► RowCalculator ──► RowQueue ──► OutputChain ──► GPIO
//!              │  pack.rs        (SLOTS)      4 chained transfer channels
//!              └─ address + timing tables
//! ```
//!
//! - A latch timer runs one cycle per bit-plane. Its rising edge applies the
//!   row address, its falling edge loads the next plane's timer values and
//!   kicks a burst that clocks the plane's pixel data onto an 8-bit bus.
//! - The four transfer channels are linked so a whole row is shown without the
//!   CPU. When the last plane has been shifted out, one completion interrupt
//!   retires the row and points the channels at the next queued one.
//! - The completion interrupt pends a lower-priority software interrupt that
//!   runs [`RowCalculator::run_once`] to top up the queue.
//!
//! [`engine::begin`] validates the configuration, fills the queue and arms the
//! chain. It hands back the two halves: the [`RowCalculator`] for the software
//! interrupt and the [`OutputChain`] for the completion interrupt.
//! [`RefreshControls`] carries rotation, brightness and refresh rate changes
//! from application code; they take effect at the next frame boundary.
//!
//! Hardware access goes through the [`TransferEngine`] and [`LatchTimer`]
//! traits, so the engine itself has no dependency on a particular HAL.
//!
//! ## Geometry
//!
//! Panel geometry is fixed at compile time:
//!
//! - `COLS`: panel width in pixels
//! - `NROWS`: row pairs per frame, see [`compute_rows`]
//! - `PLANES`: bit-planes per channel (8, 12 or 16), see [`compute_bit_planes`]
//! - `SLOTS`: rows the queue can hold, at least 2
//!
//! ## Available Feature Flags
//!
//! ### `defmt` Feature
//! Logs start-up and frame boundary events through `defmt` and implements
//! `defmt::Format` for the public configuration types. Without it the logging
//! macros compile to nothing.
#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

// must come first so the macros are visible to the other modules
mod fmt;

pub mod address;
pub mod chain;
pub mod engine;
pub mod error;
pub mod layer;
pub mod pack;
pub mod queue;
pub mod refresh;
pub mod timing;

use embedded_graphics::pixelcolor::{Rgb888, RgbColor};

pub use address::{AddressEntry, AddressPins, AddressTable};
pub use chain::{ChainTargets, LatchTimer, OutputChain, TransferEngine};
pub use engine::{begin, RefreshConfig};
pub use error::ConfigError;
pub use layer::{Canvas, Layer, LayerStack, Rotation};
pub use pack::BusLayout;
pub use queue::{RowQueue, RowSlot};
pub use refresh::{RefreshControls, RowCalculator};
pub use timing::{TimerConfig, TimingEntry, TimingTable};

/// Color type layers draw with
pub type Color = Rgb888;

/// Pixel sample handed to the packer, 16 bits per channel.
///
/// The packer keeps the top `PLANES` bits of each channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rgb48 {
    /// Red channel
    pub red: u16,
    /// Green channel
    pub green: u16,
    /// Blue channel
    pub blue: u16,
}

impl Rgb48 {
    /// All channels off.
    pub const BLACK: Self = Self::new(0, 0, 0);

    /// All channels at full scale.
    pub const WHITE: Self = Self::new(u16::MAX, u16::MAX, u16::MAX);

    /// Create a sample from its channels.
    #[must_use]
    pub const fn new(red: u16, green: u16, blue: u16) -> Self {
        Self { red, green, blue }
    }
}

impl From<Rgb888> for Rgb48 {
    /// Widen each channel by repeating it in the low byte, so 0xff maps to
    /// 0xffff.
    fn from(color: Rgb888) -> Self {
        let widen = |value: u8| (u16::from(value) << 8) | u16::from(value);
        Self::new(widen(color.r()), widen(color.g()), widen(color.b()))
    }
}

/// Computes the NROWS value (row pairs per frame) from the panel height
///
/// # Arguments
///
/// * `rows` - Total number of rows in the display
///
/// # Returns
///
/// Number of row pairs the address lines select between
#[must_use]
pub const fn compute_rows(rows: usize) -> usize {
    rows / 2
}

/// Computes the number of bit-planes for a colour depth
///
/// # Arguments
///
/// * `color_depth_bits` - Bits per pixel across all three channels, e.g. 24
///
/// # Returns
///
/// Bits per channel, which is also the number of BCM bit-planes
#[must_use]
pub const fn compute_bit_planes(color_depth_bits: u8) -> usize {
    color_depth_bits as usize / 3
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::format;

    use super::*;

    #[test]
    fn test_compute_rows() {
        // Test typical panel sizes
        assert_eq!(compute_rows(32), 16);
        assert_eq!(compute_rows(64), 32);
        assert_eq!(compute_rows(16), 8);

        // Test edge cases
        assert_eq!(compute_rows(2), 1);
        assert_eq!(compute_rows(0), 0);
    }

    #[test]
    fn test_compute_bit_planes() {
        assert_eq!(compute_bit_planes(24), 8);
        assert_eq!(compute_bit_planes(36), 12);
        assert_eq!(compute_bit_planes(48), 16);
        for bits in [24, 36, 48] {
            assert!(pack::check_bit_planes(compute_bit_planes(bits)).is_ok());
        }
        assert!(pack::check_bit_planes(compute_bit_planes(30)).is_err());
    }

    #[test]
    fn test_helper_functions_const() {
        const NROWS: usize = compute_rows(16);
        const PLANES: usize = compute_bit_planes(24);
        assert_eq!(NROWS, 8);
        assert_eq!(PLANES, 8);
    }

    #[test]
    fn test_rgb48_from_rgb888() {
        assert_eq!(Rgb48::from(Color::BLACK), Rgb48::BLACK);
        assert_eq!(Rgb48::from(Color::WHITE), Rgb48::WHITE);
        assert_eq!(
            Rgb48::from(Color::new(0x80, 0x01, 0x12)),
            Rgb48::new(0x8080, 0x0101, 0x1212)
        );
    }

    #[test]
    fn test_rgb48_top_byte_survives_eight_planes() {
        let color = Color::new(200, 100, 50);
        let sample = Rgb48::from(color);
        let shift = pack::sample_shift(8);
        assert_eq!(sample.red >> shift, 200);
        assert_eq!(sample.green >> shift, 100);
        assert_eq!(sample.blue >> shift, 50);
    }

    #[test]
    fn test_rgb48_debug() {
        let debug = format!("{:?}", Rgb48::new(1, 2, 3));
        assert_eq!(debug, "Rgb48 { red: 1, green: 2, blue: 3 }");
    }
}
