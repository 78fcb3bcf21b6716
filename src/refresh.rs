//! Row calculation: the producer side of the refresh engine.
//!
//! [`RowCalculator::run_once`] runs in a software interrupt pended by the
//! output chain after every row. It builds rows until the queue is full and
//! returns; it never waits.
//!
//! Settings changed through [`RefreshControls`] are picked up when the next
//! frame starts, so a frame is always shown with one brightness and one
//! orientation.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::address::{AddressPins, AddressTable};
use crate::error::ConfigError;
use crate::layer::{Layer, Rotation};
use crate::pack::{check_bit_planes, pack_row, BusLayout};
use crate::queue::{RowProducer, TransferBlock};
use crate::timing::{TimerConfig, TimingTable, BRIGHTNESS_MAX, DEFAULT_REFRESH_RATE_HZ};
use crate::Rgb48;

/// Runtime settings shared between the application and the row calculator.
///
/// Every setter raises a sticky flag that the row calculator clears when it
/// applies the change at the next frame boundary. Lives in a `static` or
/// anywhere else that outlives the engine.
#[derive(Debug)]
pub struct RefreshControls {
    rotation: AtomicU8,
    brightness: AtomicU8,
    refresh_rate_hz: AtomicU16,
    rotation_changed: AtomicBool,
    brightness_changed: AtomicBool,
    refresh_rate_changed: AtomicBool,
}

impl RefreshControls {
    /// Controls starting at `refresh_rate_hz` and `brightness`, no rotation.
    #[must_use]
    pub const fn new(refresh_rate_hz: u16, brightness: u8) -> Self {
        Self {
            rotation: AtomicU8::new(Rotation::Rotate0 as u8),
            brightness: AtomicU8::new(brightness),
            refresh_rate_hz: AtomicU16::new(refresh_rate_hz),
            rotation_changed: AtomicBool::new(false),
            brightness_changed: AtomicBool::new(false),
            refresh_rate_changed: AtomicBool::new(false),
        }
    }

    /// Rotate the display from the next frame on.
    pub fn set_rotation(&self, rotation: Rotation) {
        self.rotation.store(rotation as u8, Ordering::Relaxed);
        self.rotation_changed.store(true, Ordering::Release);
    }

    /// Change the brightness from the next frame on; [`BRIGHTNESS_MAX`] is
    /// full brightness.
    pub fn set_brightness(&self, brightness: u8) {
        self.brightness.store(brightness, Ordering::Relaxed);
        self.brightness_changed.store(true, Ordering::Release);
    }

    /// Change the frame rate from the next frame on.
    ///
    /// A rate too low for the 16-bit latch timer is ignored when applied and
    /// the previous timing stays in effect.
    pub fn set_refresh_rate(&self, refresh_rate_hz: u16) {
        self.refresh_rate_hz
            .store(refresh_rate_hz, Ordering::Relaxed);
        self.refresh_rate_changed.store(true, Ordering::Release);
    }

    /// Last requested rotation.
    #[must_use]
    pub fn rotation(&self) -> Rotation {
        Rotation::from_bits(self.rotation.load(Ordering::Relaxed))
    }

    /// Last requested brightness.
    #[must_use]
    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    /// Last requested refresh rate.
    #[must_use]
    pub fn refresh_rate(&self) -> u16 {
        self.refresh_rate_hz.load(Ordering::Relaxed)
    }

    /// Store the start-up values without flagging a change.
    pub(crate) fn initialize(&self, refresh_rate_hz: u16, brightness: u8) {
        self.refresh_rate_hz
            .store(refresh_rate_hz, Ordering::Relaxed);
        self.brightness.store(brightness, Ordering::Relaxed);
        self.refresh_rate_changed.store(false, Ordering::Relaxed);
        self.brightness_changed.store(false, Ordering::Release);
    }

    fn take_rotation(&self) -> Option<Rotation> {
        self.rotation_changed
            .swap(false, Ordering::Acquire)
            .then(|| self.rotation())
    }

    fn take_brightness(&self) -> Option<u8> {
        self.brightness_changed
            .swap(false, Ordering::Acquire)
            .then(|| self.brightness())
    }

    fn take_refresh_rate(&self) -> Option<u16> {
        self.refresh_rate_changed
            .swap(false, Ordering::Acquire)
            .then(|| self.refresh_rate())
    }
}

impl Default for RefreshControls {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_RATE_HZ, BRIGHTNESS_MAX)
    }
}

/// Producer side of the refresh engine.
///
/// Owns everything needed to turn layer output into queued rows: the address
/// and timing tables, the bus layout and two row-length scratch buffers.
pub struct RowCalculator<
    'a,
    L,
    const COLS: usize,
    const NROWS: usize,
    const PLANES: usize,
    const SLOTS: usize,
> {
    producer: RowProducer<'a, COLS, PLANES, SLOTS>,
    controls: &'a RefreshControls,
    layers: L,
    addresses: AddressTable<NROWS>,
    timing: TimingTable<PLANES>,
    timer: TimerConfig,
    bus: BusLayout,
    upper: [Rgb48; COLS],
    lower: [Rgb48; COLS],
    row: usize,
    frames: u32,
}

impl<'a, L, const COLS: usize, const NROWS: usize, const PLANES: usize, const SLOTS: usize>
    RowCalculator<'a, L, COLS, NROWS, PLANES, SLOTS>
where
    L: Layer,
{
    /// Build the address and timing tables for the current settings in
    /// `controls`.
    ///
    /// # Errors
    ///
    /// Unsupported bit-plane count, a queue shorter than two slots, invalid
    /// address pins or bus layout, more rows than the pins can address, or
    /// timing that does not fit the latch timer.
    pub fn new(
        producer: RowProducer<'a, COLS, PLANES, SLOTS>,
        controls: &'a RefreshControls,
        layers: L,
        address_pins: &AddressPins,
        bus: BusLayout,
        timer: TimerConfig,
    ) -> Result<Self, ConfigError> {
        check_bit_planes(PLANES)?;
        if SLOTS < 2 {
            return Err(ConfigError::QueueTooShort(SLOTS));
        }
        bus.validate()?;
        let addresses = AddressTable::build(address_pins)?;
        let params = timer.params(controls.refresh_rate(), controls.brightness(), COLS, NROWS)?;
        let timing = TimingTable::build(&params)?;
        Ok(Self {
            producer,
            controls,
            layers,
            addresses,
            timing,
            timer,
            bus,
            upper: [Rgb48::BLACK; COLS],
            lower: [Rgb48::BLACK; COLS],
            row: 0,
            frames: 0,
        })
    }

    /// Build rows until the queue is full.
    pub fn run_once(&mut self) {
        while !self.producer.is_full() {
            if self.row == 0 {
                self.start_frame();
            }
            self.load_row();
            self.row = (self.row + 1) % NROWS;
        }
    }

    fn start_frame(&mut self) {
        if let Some(rotation) = self.controls.take_rotation() {
            debug!("rotation changed to {}", rotation);
            self.layers.on_rotation_change(rotation);
        }
        let refresh_rate = self.controls.take_refresh_rate();
        if let Some(refresh_rate_hz) = refresh_rate {
            debug!("refresh rate changed to {} Hz", refresh_rate_hz);
            self.layers.on_refresh_rate_change(refresh_rate_hz);
        }
        let brightness = self.controls.take_brightness();
        if refresh_rate.is_some() || brightness.is_some() {
            self.update_timing();
        }
        self.layers.on_frame_start();
        self.frames = self.frames.wrapping_add(1);
    }

    fn update_timing(&mut self) {
        let refresh_rate_hz = self.controls.refresh_rate();
        let brightness = self.controls.brightness();
        let result = self
            .timer
            .params(refresh_rate_hz, brightness, COLS, NROWS)
            .and_then(|params| self.timing.rebuild(&params));
        match result {
            Ok(()) => trace!("timing table rebuilt, brightness {}", brightness),
            Err(err) => warn!("keeping previous timing: {}", err),
        }
    }

    fn load_row(&mut self) {
        let row = self.row;
        self.upper.fill(Rgb48::BLACK);
        self.lower.fill(Rgb48::BLACK);
        self.layers.fill_row(row, &mut self.upper);
        self.layers.fill_row(row + NROWS, &mut self.lower);

        let address = self.addresses.get(row);
        let timing = self.timing.entries();
        let (upper, lower, bus) = (&self.upper, &self.lower, &self.bus);
        self.producer.write_with(|slot| {
            for (block, &timing) in slot.blocks_mut().iter_mut().zip(timing) {
                *block = TransferBlock { timing, address };
            }
            pack_row(upper, lower, bus, slot.data_mut());
            slot.set_row(row);
        });
    }

    /// Frames started since the engine began.
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frames
    }

    /// Row the next call to [`run_once`](Self::run_once) builds first.
    #[must_use]
    pub fn next_row(&self) -> usize {
        self.row
    }

    /// Rows waiting in the queue, including the one being shown.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.producer.len()
    }

    /// Timing table currently applied to new rows.
    #[must_use]
    pub fn timing(&self) -> &TimingTable<PLANES> {
        &self.timing
    }

    /// Address table.
    #[must_use]
    pub fn addresses(&self) -> &AddressTable<NROWS> {
        &self.addresses
    }

    /// The layers.
    pub fn layers(&self) -> &L {
        &self.layers
    }

    /// The layers, mutably. Only call this where the row calculator's
    /// interrupt cannot run.
    pub fn layers_mut(&mut self) -> &mut L {
        &mut self.layers
    }
}
