//! Row queue shared by the row calculator and the output chain.
//!
//! A fixed arena of [`RowSlot`]s with two cursors. The queue is split once
//! into a [`RowProducer`] and a [`RowConsumer`]; each side advances exactly
//! one cursor, so no lock is needed. A slot counts as live from the moment the
//! producer commits it until the consumer retires it, and the slot the
//! transfer engine is currently reading is always live. The producer therefore
//! never writes memory the engine can see.
//!
//! Slots stay at fixed addresses for the lifetime of the queue: the transfer
//! descriptors point straight into them.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use embedded_dma::ReadBuffer;

use crate::address::AddressEntry;
use crate::pack::ColumnWords;
use crate::timing::TimingEntry;

/// Everything the chain needs to show one bit-plane of a row, except the
/// pixel data.
///
/// The timer and address update channels step through these with a stride
/// of `size_of::<TransferBlock>()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct TransferBlock {
    /// Latch timer values for this plane
    pub timing: TimingEntry,
    /// Row select masks, repeated in every block of the row
    pub address: AddressEntry,
}

impl TransferBlock {
    /// All-zero block.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timing: TimingEntry::new(),
            address: AddressEntry::new(),
        }
    }
}

/// One fully prepared row pair: a transfer block per plane and the packed
/// pixel data.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(4))]
pub struct RowSlot<const COLS: usize, const PLANES: usize> {
    blocks: [TransferBlock; PLANES],
    data: [ColumnWords<PLANES>; COLS],
    row: u16,
}

impl<const COLS: usize, const PLANES: usize> RowSlot<COLS, PLANES> {
    /// An empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: [TransferBlock::new(); PLANES],
            data: [ColumnWords::new(); COLS],
            row: 0,
        }
    }

    /// Row index (`0..rows_per_frame`) this slot was built for.
    #[must_use]
    pub fn row(&self) -> usize {
        self.row as usize
    }

    /// Transfer blocks, least significant plane first.
    #[must_use]
    pub fn blocks(&self) -> &[TransferBlock; PLANES] {
        &self.blocks
    }

    /// Packed pixel data, one entry per column.
    #[must_use]
    pub fn data(&self) -> &[ColumnWords<PLANES>; COLS] {
        &self.data
    }

    pub(crate) fn set_row(&mut self, row: usize) {
        self.row = row as u16;
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [TransferBlock; PLANES] {
        &mut self.blocks
    }

    pub(crate) fn data_mut(&mut self) -> &mut [ColumnWords<PLANES>; COLS] {
        &mut self.data
    }

    /// Address the address update channel starts reading at.
    #[must_use]
    pub fn address_source(&self) -> usize {
        core::ptr::addr_of!(self.blocks[0].address) as usize
    }

    /// Address the timer update channel starts reading at.
    #[must_use]
    pub fn timing_source(&self) -> usize {
        core::ptr::addr_of!(self.blocks[0].timing) as usize
    }

    /// Address the data channel starts reading at.
    #[must_use]
    pub fn data_source(&self) -> usize {
        // SAFETY: only the pointer is taken
        let (ptr, _) = unsafe { self.read_buffer() };
        ptr as usize
    }
}

impl<const COLS: usize, const PLANES: usize> Default for RowSlot<COLS, PLANES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const COLS: usize, const PLANES: usize> core::fmt::Debug for RowSlot<COLS, PLANES> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RowSlot")
            .field("row", &self.row)
            .field("planes", &PLANES)
            .field("data_size", &core::mem::size_of_val(&self.data))
            .finish_non_exhaustive()
    }
}

unsafe impl<const COLS: usize, const PLANES: usize> ReadBuffer for RowSlot<COLS, PLANES> {
    type Word = u8;

    unsafe fn read_buffer(&self) -> (*const u8, usize) {
        let ptr = &self.data as *const _ as *const u8;
        let len = core::mem::size_of_val(&self.data);
        (ptr, len)
    }
}

/// Fixed buffer the output address channel reads from.
///
/// Laid out like the port's set and clear registers so one minor loop offset
/// rewinds both source and destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct AddressStaging {
    /// Written to the port set register
    pub bits_to_set: u32,
    /// Written to the port clear register
    pub bits_to_clear: u32,
}

/// Ring of row slots with independent read and write cursors.
///
/// Cursors count committed and retired rows and wrap with `usize`; the slot
/// index is the cursor modulo `SLOTS`.
pub struct RowQueue<const COLS: usize, const PLANES: usize, const SLOTS: usize> {
    slots: [UnsafeCell<RowSlot<COLS, PLANES>>; SLOTS],
    staging: UnsafeCell<AddressStaging>,
    read: AtomicUsize,
    write: AtomicUsize,
}

// SAFETY: slot access is partitioned by the cursors; see `RowProducer` and
// `RowConsumer`.
unsafe impl<const COLS: usize, const PLANES: usize, const SLOTS: usize> Sync
    for RowQueue<COLS, PLANES, SLOTS>
{
}

impl<const COLS: usize, const PLANES: usize, const SLOTS: usize> RowQueue<COLS, PLANES, SLOTS> {
    /// An empty queue. `const` so it can live in a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { UnsafeCell::new(RowSlot::new()) }; SLOTS],
            staging: UnsafeCell::new(AddressStaging {
                bits_to_set: 0,
                bits_to_clear: 0,
            }),
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        SLOTS
    }

    /// Split into the two handles. Taking `&mut self` guarantees there is
    /// only ever one of each.
    pub fn split(
        &mut self,
    ) -> (
        RowProducer<'_, COLS, PLANES, SLOTS>,
        RowConsumer<'_, COLS, PLANES, SLOTS>,
    ) {
        let queue = &*self;
        (RowProducer { queue }, RowConsumer { queue })
    }

    fn len(&self) -> usize {
        self.write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
    }

    fn slot(&self, cursor: usize) -> *mut RowSlot<COLS, PLANES> {
        self.slots[cursor % SLOTS].get()
    }
}

impl<const COLS: usize, const PLANES: usize, const SLOTS: usize> Default
    for RowQueue<COLS, PLANES, SLOTS>
{
    fn default() -> Self {
        Self::new()
    }
}

/// Writing side of the queue, owned by the row calculator.
pub struct RowProducer<'a, const COLS: usize, const PLANES: usize, const SLOTS: usize> {
    queue: &'a RowQueue<COLS, PLANES, SLOTS>,
}

impl<const COLS: usize, const PLANES: usize, const SLOTS: usize> RowProducer<'_, COLS, PLANES, SLOTS> {
    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` when no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when every slot is live and nothing can be written.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= SLOTS
    }

    /// Slot index the next write goes to.
    #[must_use]
    pub fn write_index(&self) -> usize {
        self.queue.write.load(Ordering::Relaxed) % SLOTS
    }

    /// Fill the slot at the write cursor with `f` and commit it.
    ///
    /// Returns `false` without calling `f` when the queue is full.
    pub fn write_with<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut RowSlot<COLS, PLANES>),
    {
        if self.is_full() {
            return false;
        }
        let write = self.queue.write.load(Ordering::Relaxed);
        // SAFETY: the slot at `write` is not live, so the consumer and the
        // transfer engine do not reference it, and `&mut self` makes this
        // the only producer access.
        let slot = unsafe { &mut *self.queue.slot(write) };
        f(slot);
        self.queue
            .write
            .store(write.wrapping_add(1), Ordering::Release);
        true
    }
}

/// Reading side of the queue, owned by the output chain.
pub struct RowConsumer<'a, const COLS: usize, const PLANES: usize, const SLOTS: usize> {
    queue: &'a RowQueue<COLS, PLANES, SLOTS>,
}

impl<const COLS: usize, const PLANES: usize, const SLOTS: usize> RowConsumer<'_, COLS, PLANES, SLOTS> {
    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` when no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot index of the oldest live row.
    #[must_use]
    pub fn read_index(&self) -> usize {
        self.queue.read.load(Ordering::Relaxed) % SLOTS
    }

    /// The oldest live row, the one being shown.
    #[must_use]
    pub fn current(&self) -> Option<&RowSlot<COLS, PLANES>> {
        if self.is_empty() {
            return None;
        }
        let read = self.queue.read.load(Ordering::Relaxed);
        // SAFETY: the slot is live; the producer does not write it until it
        // is retired.
        Some(unsafe { &*self.queue.slot(read) })
    }

    /// Release the oldest live row back to the producer.
    ///
    /// Returns `false` when the queue is empty.
    pub fn retire(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        let read = self.queue.read.load(Ordering::Relaxed);
        self.queue
            .read
            .store(read.wrapping_add(1), Ordering::Release);
        true
    }

    /// Address of the staging buffer between the address update and output
    /// address channels.
    #[must_use]
    pub fn staging(&self) -> *mut AddressStaging {
        self.queue.staging.get()
    }
}
