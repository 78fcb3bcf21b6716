//! Output chain: four linked transfer channels that show queued rows.
//!
//! The latch timer runs one cycle per bit-plane and drives everything:
//!
//! ```text
//! latch rising  ─► OutputAddress ──link──► UpdateAddress
//!                  staging -> set/clr      next block's masks -> staging
//!
//! latch falling ─► UpdateTimer ──link──► ClockOutData (one minor loop)
//!                  on-time, period        2 * COLS bytes -> data port
//!                                         after PLANES loops: interrupt
//! ```
//!
//! The address is applied from a fixed staging buffer while the blanked latch
//! pulse is high, and the companion channel immediately copies the following
//! plane's masks into staging. The falling edge loads the next plane's timer
//! values and shifts that plane's data into the panel while the current one is
//! lit.
//!
//! Only the end of the data channel's major loop needs the CPU:
//! [`OutputChain::on_transfer_complete`] retires the row, repoints the channels
//! at the next queued row and asks for a refill.
//!
//! The descriptors follow the eDMA transfer control descriptor model; a HAL
//! implements [`TransferEngine`] by writing them to its channel registers.

use core::mem::{offset_of, size_of};

use bitfield::bitfield;

use crate::error::ConfigError;
use crate::queue::{AddressStaging, RowConsumer, RowSlot, TransferBlock};
use crate::timing::TimingEntry;

/// The transfer channels of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Staging buffer to the address set/clear registers
    OutputAddress,
    /// Next transfer block's address masks to the staging buffer
    UpdateAddress,
    /// Next transfer block's timing entry to the latch timer
    UpdateTimer,
    /// Packed pixel data to the output bus
    ClockOutData,
}

impl Channel {
    /// Every channel, in configuration order.
    pub const ALL: [Self; 4] = [
        Self::OutputAddress,
        Self::UpdateAddress,
        Self::UpdateTimer,
        Self::ClockOutData,
    ];

    /// Hardware request that starts the channel, if any. The others only run
    /// when linked.
    #[must_use]
    pub const fn trigger(self) -> Option<Trigger> {
        match self {
            Self::OutputAddress => Some(Trigger::LatchRisingEdge),
            Self::UpdateTimer => Some(Trigger::LatchFallingEdge),
            Self::UpdateAddress | Self::ClockOutData => None,
        }
    }
}

/// Latch timer events a channel can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Start of the latch pulse
    LatchRisingEdge,
    /// End of the latch pulse
    LatchFallingEdge,
}

/// Width of a single read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransferSize {
    /// 8 bits
    Byte = 0,
    /// 16 bits
    HalfWord = 1,
    /// 32 bits
    Word = 2,
}

bitfield! {
    /// Transfer attributes (`ATTR`): read and write sizes.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct Attributes(u16);
    impl Debug;
    pub u8, source_size, set_source_size: 10, 8;
    pub u8, destination_size, set_destination_size: 2, 0;
}

impl Attributes {
    /// Same size for reads and writes.
    #[must_use]
    pub fn new(size: TransferSize) -> Self {
        let mut attributes = Self(0);
        attributes.set_source_size(size as u8);
        attributes.set_destination_size(size as u8);
        attributes
    }
}

bitfield! {
    /// Minor loop byte count with optional offset (`NBYTES_MLOFFYES`).
    ///
    /// The offset is added to the enabled addresses after every minor loop.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct MinorLoop(u32);
    impl Debug;
    pub source_offset_enable, set_source_offset_enable: 31;
    pub destination_offset_enable, set_destination_offset_enable: 30;
    u32, offset_bits, set_offset_bits: 29, 10;
    pub u16, byte_count, set_byte_count: 9, 0;
}

impl MinorLoop {
    /// Largest byte count the field can hold.
    pub const MAX_BYTE_COUNT: usize = (1 << 10) - 1;

    const OFFSET_WIDTH: u32 = 20;

    /// A plain minor loop of `bytes` bytes.
    #[must_use]
    pub fn bytes(bytes: u16) -> Self {
        let mut minor_loop = Self(0);
        minor_loop.set_byte_count(bytes);
        minor_loop
    }

    /// Signed minor loop offset.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn offset(&self) -> i32 {
        let shift = 32 - Self::OFFSET_WIDTH;
        ((self.offset_bits() << shift) as i32) >> shift
    }

    /// Store a signed minor loop offset, truncated to 20 bits.
    pub fn set_offset(&mut self, offset: i32) {
        self.set_offset_bits(offset as u32 & ((1 << Self::OFFSET_WIDTH) - 1));
    }
}

bitfield! {
    /// Control and status (`CSR`).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ControlStatus(u16);
    impl Debug;
    pub u8, major_link_channel, set_major_link_channel: 11, 8;
    pub major_link, set_major_link: 5;
    pub disable_request, set_disable_request: 3;
    pub interrupt_major, set_interrupt_major: 1;
}

impl ControlStatus {
    /// Start `channel` when the major loop completes.
    #[must_use]
    pub fn link_to(channel: u8) -> Self {
        let mut control = Self(0);
        control.set_major_link_channel(channel);
        control.set_major_link(true);
        control
    }
}

/// One channel's transfer control descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// `SADDR`
    pub source: usize,
    /// `SOFF`, added to the source after each read
    pub source_offset: i16,
    /// `ATTR`
    pub attributes: Attributes,
    /// `NBYTES`
    pub minor_loop: MinorLoop,
    /// `SLAST`, added to the source when the major loop completes
    pub source_last_adjust: i32,
    /// `DADDR`
    pub destination: usize,
    /// `DOFF`, added to the destination after each write
    pub destination_offset: i16,
    /// `CITER` and `BITER`
    pub major_iterations: u16,
    /// `DLASTSGA`, added to the destination when the major loop completes
    pub destination_last_adjust: i32,
    /// `CSR`
    pub control: ControlStatus,
}

/// Peripheral register addresses the chain writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChainTargets {
    /// GPIO port set register driving the address lines
    pub address_set: usize,
    /// GPIO port clear register, one word above `address_set`
    pub address_clear: usize,
    /// Timer compare register ending the lit part of a plane
    pub timer_on_time: usize,
    /// Timer modulo register
    pub timer_period: usize,
    /// 8-bit output port carrying colour data and the shift clock
    pub data_output: usize,
}

impl ChainTargets {
    /// Check the register layout matches what the descriptors assume.
    ///
    /// # Errors
    ///
    /// [`ConfigError::AddressRegisterLayout`] unless the clear register sits
    /// one word above the set register, like in [`AddressStaging`].
    /// [`ConfigError::TimerRegisterLayout`] if the timer registers coincide
    /// or are too far apart for a 16-bit offset.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if address_delta(self.address_set, self.address_clear) != Some(staging_spacing()) {
            return Err(ConfigError::AddressRegisterLayout);
        }
        match address_delta(self.timer_on_time, self.timer_period) {
            Some(0) | None => Err(ConfigError::TimerRegisterLayout),
            Some(_) => Ok(()),
        }
    }
}

fn address_delta(from: usize, to: usize) -> Option<i16> {
    i16::try_from(to.wrapping_sub(from) as isize).ok()
}

fn staging_spacing() -> i16 {
    (offset_of!(AddressStaging, bits_to_clear) - offset_of!(AddressStaging, bits_to_set)) as i16
}

/// Access to the transfer controller.
///
/// Implementations write descriptors straight to hardware; all methods are
/// called either before the latch timer starts or from the completion
/// interrupt.
pub trait TransferEngine {
    /// Hardware channel number assigned to `channel`, used for linking.
    fn channel_number(&self, channel: Channel) -> u8;

    /// Load `descriptor` into `channel` and route `trigger` to it.
    fn configure(&mut self, channel: Channel, descriptor: &Descriptor, trigger: Option<Trigger>);

    /// Replace only the source address of `channel`.
    fn set_source(&mut self, channel: Channel, source: usize);

    /// Accept requests on `channel`.
    fn enable(&mut self, channel: Channel);

    /// Pend the lower-priority interrupt that runs
    /// [`RowCalculator::run_once`](crate::RowCalculator::run_once).
    fn request_refill(&mut self);

    /// Clear the completion interrupt of `channel`.
    fn acknowledge(&mut self, channel: Channel);
}

/// The timer generating the latch pulse and output enable.
pub trait LatchTimer {
    /// Program the first cycle. Later cycles are reloaded by the chain.
    fn configure(&mut self, period: u16, latch_pulse: u16, on_time: u16);

    /// Start counting.
    fn start(&mut self);
}

/// Descriptors for all four channels, pointing at the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPlan {
    /// See [`Channel::OutputAddress`]
    pub output_address: Descriptor,
    /// See [`Channel::UpdateAddress`]
    pub update_address: Descriptor,
    /// See [`Channel::UpdateTimer`]
    pub update_timer: Descriptor,
    /// See [`Channel::ClockOutData`]
    pub clock_out_data: Descriptor,
}

impl ChainPlan {
    /// Build the descriptors for a chain showing `slot` first.
    ///
    /// # Errors
    ///
    /// Register layout errors from [`ChainTargets::validate`], and
    /// [`ConfigError::BurstTooLong`] when a row does not fit a minor loop.
    pub fn new<E, const COLS: usize, const PLANES: usize>(
        targets: &ChainTargets,
        staging: usize,
        slot: &RowSlot<COLS, PLANES>,
        engine: &E,
    ) -> Result<Self, ConfigError>
    where
        E: TransferEngine + ?Sized,
    {
        targets.validate()?;
        let burst = 2 * COLS;
        if burst > MinorLoop::MAX_BYTE_COUNT {
            return Err(ConfigError::BurstTooLong(burst));
        }
        let block_step = (size_of::<TransferBlock>() - size_of::<TimingEntry>()) as i32;

        // Start on the clear register and walk down to set, in both staging
        // and the port, then rewind by the same amount.
        let spacing = staging_spacing();
        let rewind = 2 * i32::from(spacing);
        let mut address_loop = MinorLoop::bytes(2 * size_of::<u32>() as u16);
        address_loop.set_source_offset_enable(true);
        address_loop.set_destination_offset_enable(true);
        address_loop.set_offset(rewind);
        let output_address = Descriptor {
            source: staging + offset_of!(AddressStaging, bits_to_clear),
            source_offset: -spacing,
            attributes: Attributes::new(TransferSize::Word),
            minor_loop: address_loop,
            source_last_adjust: rewind,
            destination: targets.address_clear,
            destination_offset: -spacing,
            major_iterations: 1,
            destination_last_adjust: rewind,
            control: ControlStatus::link_to(engine.channel_number(Channel::UpdateAddress)),
        };

        // Copies {clear, set} of the current block into staging and steps to
        // the next block.
        let update_address = Descriptor {
            source: slot.address_source(),
            source_offset: size_of::<u16>() as i16,
            attributes: Attributes::new(TransferSize::HalfWord),
            minor_loop: MinorLoop::bytes(2 * size_of::<u16>() as u16),
            source_last_adjust: block_step,
            destination: staging + offset_of!(AddressStaging, bits_to_clear),
            destination_offset: -spacing,
            major_iterations: 1,
            destination_last_adjust: rewind,
            control: ControlStatus::default(),
        };

        let timer_step = address_delta(targets.timer_on_time, targets.timer_period)
            .ok_or(ConfigError::TimerRegisterLayout)?;
        let update_timer = Descriptor {
            source: slot.timing_source(),
            source_offset: size_of::<u16>() as i16,
            attributes: Attributes::new(TransferSize::HalfWord),
            minor_loop: MinorLoop::bytes(2 * size_of::<u16>() as u16),
            source_last_adjust: block_step,
            destination: targets.timer_on_time,
            destination_offset: timer_step,
            major_iterations: 1,
            destination_last_adjust: -2 * i32::from(timer_step),
            control: ControlStatus::link_to(engine.channel_number(Channel::ClockOutData)),
        };

        // Reads every PLANES-th byte: clock low and clock high for each
        // column of one plane. The offset then moves back to the start of the
        // row, one byte on, for the next plane.
        let mut data_loop = MinorLoop::bytes(burst as u16);
        data_loop.set_source_offset_enable(true);
        data_loop.set_offset(1 - (2 * PLANES * COLS) as i32);
        let mut data_control = ControlStatus::default();
        data_control.set_interrupt_major(true);
        let clock_out_data = Descriptor {
            source: slot.data_source(),
            source_offset: PLANES as i16,
            attributes: Attributes::new(TransferSize::Byte),
            minor_loop: data_loop,
            source_last_adjust: 0,
            destination: targets.data_output,
            destination_offset: 0,
            major_iterations: PLANES as u16,
            destination_last_adjust: 0,
            control: data_control,
        };

        Ok(Self {
            output_address,
            update_address,
            update_timer,
            clock_out_data,
        })
    }

    /// Descriptor for `channel`.
    #[must_use]
    pub fn descriptor(&self, channel: Channel) -> &Descriptor {
        match channel {
            Channel::OutputAddress => &self.output_address,
            Channel::UpdateAddress => &self.update_address,
            Channel::UpdateTimer => &self.update_timer,
            Channel::ClockOutData => &self.clock_out_data,
        }
    }
}

/// Where the chain is within the current bit-plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChainPhase {
    /// Not armed
    #[default]
    Idle,
    /// Waiting for, or applying, the row address on the latch rising edge
    AddressPhase,
    /// Timer reloaded, plane data being shifted out
    DataShiftPhase,
    /// Last plane shifted; the row is waiting to be retired
    Complete,
}

/// Things that move the chain between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChainEvent {
    /// Channels configured and timer started
    Armed,
    /// Latch pulse started
    LatchRising,
    /// Latch pulse ended
    LatchFalling,
    /// Data channel finished its major loop
    BurstComplete,
    /// Channels now point at the next row
    Repointed,
}

impl ChainPhase {
    /// Phase after `event`. Events that do not apply leave the phase alone.
    #[must_use]
    pub fn advance(self, event: ChainEvent) -> Self {
        match (self, event) {
            (Self::Idle, ChainEvent::Armed)
            | (Self::DataShiftPhase, ChainEvent::LatchRising)
            | (Self::Complete, ChainEvent::Repointed) => Self::AddressPhase,
            (Self::AddressPhase, ChainEvent::LatchFalling) => Self::DataShiftPhase,
            (Self::DataShiftPhase | Self::AddressPhase, ChainEvent::BurstComplete) => {
                Self::Complete
            }
            (phase, _) => phase,
        }
    }
}

/// Consumer side of the refresh engine, run from the completion interrupt.
pub struct OutputChain<'a, E, const COLS: usize, const PLANES: usize, const SLOTS: usize> {
    consumer: RowConsumer<'a, COLS, PLANES, SLOTS>,
    engine: E,
    phase: ChainPhase,
    underruns: u32,
}

impl<'a, E, const COLS: usize, const PLANES: usize, const SLOTS: usize>
    OutputChain<'a, E, COLS, PLANES, SLOTS>
where
    E: TransferEngine,
{
    /// Configure and enable all four channels, pointing at the oldest
    /// queued row. The latch timer must not be running yet.
    ///
    /// # Errors
    ///
    /// [`ConfigError::QueueEmpty`] if nothing is queued, otherwise as
    /// [`ChainPlan::new`].
    pub fn arm(
        mut engine: E,
        consumer: RowConsumer<'a, COLS, PLANES, SLOTS>,
        targets: &ChainTargets,
    ) -> Result<Self, ConfigError> {
        let slot = consumer.current().ok_or(ConfigError::QueueEmpty)?;
        let plan = ChainPlan::new(targets, consumer.staging() as usize, slot, &engine)?;
        for channel in Channel::ALL {
            engine.configure(channel, plan.descriptor(channel), channel.trigger());
        }
        for channel in Channel::ALL {
            engine.enable(channel);
        }
        debug!("output chain armed on row {}", slot.row());
        Ok(Self {
            consumer,
            engine,
            phase: ChainPhase::default().advance(ChainEvent::Armed),
            underruns: 0,
        })
    }

    /// Handle the data channel's major loop interrupt.
    ///
    /// Retires the row just shown, points the channels at the next one,
    /// pends a refill and clears the interrupt. If no further row is queued
    /// the current row stays live and is shown again.
    pub fn on_transfer_complete(&mut self) {
        self.phase = self.phase.advance(ChainEvent::BurstComplete);
        if self.consumer.len() > 1 {
            self.consumer.retire();
        } else {
            self.underruns = self.underruns.wrapping_add(1);
            error!("row queue underrun, repeating row");
        }
        if let Some(slot) = self.consumer.current() {
            self.engine
                .set_source(Channel::UpdateAddress, slot.address_source());
            self.engine
                .set_source(Channel::UpdateTimer, slot.timing_source());
            self.engine
                .set_source(Channel::ClockOutData, slot.data_source());
        }
        self.engine.request_refill();
        self.engine.acknowledge(Channel::ClockOutData);
        self.phase = self.phase.advance(ChainEvent::Repointed);
    }

    /// Feed a latch edge seen by the HAL into the phase tracking.
    pub fn observe(&mut self, event: ChainEvent) {
        self.phase = self.phase.advance(event);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    /// Completions that found no next row.
    #[must_use]
    pub fn underruns(&self) -> u32 {
        self.underruns
    }

    /// The row being shown.
    #[must_use]
    pub fn current(&self) -> Option<&RowSlot<COLS, PLANES>> {
        self.consumer.current()
    }

    /// Slot index of the row being shown.
    #[must_use]
    pub fn read_index(&self) -> usize {
        self.consumer.read_index()
    }

    /// The transfer engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The transfer engine, mutably.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}
