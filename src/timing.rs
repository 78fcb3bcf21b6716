//! Brightness timing table.
//!
//! Each bit-plane of a row is shown for a window proportional to its binary
//! weight (Binary Code Modulation). The latch timer runs one cycle per plane:
//! its period is the plane's window plus the latch dead time, and the output
//! enable compare value (`on_time`) scales the lit part of the window by the
//! global brightness.
//!
//! Planes are ordered from least to most significant. The row therefore ends
//! with its longest window, and that is the slack the row calculator gets to
//! build the next row before the transfer engine needs it.

use crate::error::ConfigError;

/// Brightness value meaning "full on".
pub const BRIGHTNESS_MAX: u8 = 255;

/// Frame rate used when none is configured.
pub const DEFAULT_REFRESH_RATE_HZ: u16 = 135;

/// Timer values for one bit-plane, in timer ticks.
///
/// Field order matches the order the timer update channel writes the
/// registers: on-time compare first, then the period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct TimingEntry {
    /// Ticks from the start of the cycle until output enable turns the LEDs off
    pub on_time: u16,
    /// Length of the timer cycle
    pub period: u16,
}

impl TimingEntry {
    /// An all-zero entry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            on_time: 0,
            period: 0,
        }
    }
}

/// Inputs of the timing table, all in timer ticks except the brightness pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingParams {
    /// Brightness numerator
    pub brightness: u32,
    /// Brightness denominator
    pub brightness_max: u32,
    /// Full-brightness window of the most significant plane
    pub base_half_period_ticks: u32,
    /// Time the latch is held high at the start of every plane
    pub latch_dead_time_ticks: u32,
    /// Shortest period any plane may have
    pub min_period_floor_ticks: u32,
}

impl TimingParams {
    /// Timer values for `plane` out of `planes`.
    ///
    /// Values are computed in 32 bits; [`TimingTable::build`] checks they
    /// fit the timer registers before narrowing.
    #[must_use]
    pub fn entry(&self, plane: usize, planes: usize) -> (u32, u32) {
        let window = self.base_half_period_ticks >> (planes - 1 - plane);
        let lit = if self.brightness_max == 0 {
            0
        } else {
            (u64::from(window) * u64::from(self.brightness) / u64::from(self.brightness_max)) as u32
        };
        let mut on_time = lit + self.latch_dead_time_ticks;
        let mut period = window + self.latch_dead_time_ticks;
        if period < self.min_period_floor_ticks {
            let padding = self.min_period_floor_ticks - period;
            period += padding;
            on_time += padding;
        }
        (on_time, period)
    }

    /// Longest period the table can contain.
    fn max_period(&self) -> u32 {
        self.base_half_period_ticks
            .saturating_add(self.latch_dead_time_ticks)
            .max(self.min_period_floor_ticks)
    }
}

/// Per-plane timer values, least significant plane first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingTable<const PLANES: usize> {
    entries: [TimingEntry; PLANES],
}

impl<const PLANES: usize> TimingTable<PLANES> {
    /// Compute the table.
    ///
    /// # Errors
    ///
    /// [`ConfigError::TimerOverflow`] when a period does not fit in 16 bits.
    pub fn build(params: &TimingParams) -> Result<Self, ConfigError> {
        let mut table = Self {
            entries: [TimingEntry::new(); PLANES],
        };
        table.rebuild(params)?;
        Ok(table)
    }

    /// Recompute in place. On error the table is left unchanged.
    ///
    /// # Errors
    ///
    /// [`ConfigError::TimerOverflow`] when a period does not fit in 16 bits.
    pub fn rebuild(&mut self, params: &TimingParams) -> Result<(), ConfigError> {
        let max_period = params.max_period();
        if u16::try_from(max_period).is_err() {
            return Err(ConfigError::TimerOverflow(max_period));
        }
        for (plane, entry) in self.entries.iter_mut().enumerate() {
            let (on_time, period) = params.entry(plane, PLANES);
            // brightness <= max keeps on_time <= period
            *entry = TimingEntry {
                on_time: on_time.min(period) as u16,
                period: period as u16,
            };
        }
        Ok(())
    }

    /// Entry for `plane`.
    ///
    /// # Panics
    ///
    /// If `plane >= PLANES`.
    #[must_use]
    pub fn get(&self, plane: usize) -> TimingEntry {
        self.entries[plane]
    }

    /// All entries, least significant plane first.
    #[must_use]
    pub fn entries(&self) -> &[TimingEntry; PLANES] {
        &self.entries
    }
}

/// Clocking of the latch timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConfig {
    /// Timer input clock
    pub bus_clock_hz: u32,
    /// Width of the latch pulse, long enough for the address lines to settle
    pub latch_pulse_ns: u32,
    /// Shortest plane period per pixel column, bounded by how fast the
    /// output bus can be driven
    pub min_block_period_per_pixel_ns: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            bus_clock_hz: 48_000_000,
            latch_pulse_ns: 100,
            min_block_period_per_pixel_ns: 27,
        }
    }
}

impl TimerConfig {
    /// Convert nanoseconds to timer ticks, rounding down.
    #[must_use]
    pub fn ns_to_ticks(&self, ns: u32) -> u32 {
        (u64::from(self.bus_clock_hz) * u64::from(ns) / 1_000_000_000) as u32
    }

    /// Latch dead time in ticks.
    #[must_use]
    pub fn latch_ticks(&self) -> u32 {
        self.ns_to_ticks(self.latch_pulse_ns)
    }

    /// Full-brightness window of the most significant plane: half of the
    /// time available for one row.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidClock`] for a zero clock, refresh rate or row count.
    pub fn base_half_period_ticks(
        &self,
        refresh_rate_hz: u16,
        rows_per_frame: usize,
    ) -> Result<u32, ConfigError> {
        if self.bus_clock_hz == 0 || refresh_rate_hz == 0 || rows_per_frame == 0 {
            return Err(ConfigError::InvalidClock);
        }
        let ticks_per_row =
            self.bus_clock_hz / u32::from(refresh_rate_hz) / rows_per_frame as u32;
        Ok(ticks_per_row / 2)
    }

    /// Assemble the timing inputs for a panel `cols` wide with
    /// `rows_per_frame` row pairs.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidClock`] for a zero clock, refresh rate or row count.
    pub fn params(
        &self,
        refresh_rate_hz: u16,
        brightness: u8,
        cols: usize,
        rows_per_frame: usize,
    ) -> Result<TimingParams, ConfigError> {
        Ok(TimingParams {
            brightness: u32::from(brightness),
            brightness_max: u32::from(BRIGHTNESS_MAX),
            base_half_period_ticks: self.base_half_period_ticks(refresh_rate_hz, rows_per_frame)?,
            latch_dead_time_ticks: self.latch_ticks(),
            min_period_floor_ticks: self
                .ns_to_ticks(self.min_block_period_per_pixel_ns)
                .saturating_mul(cols as u32),
        })
    }
}
