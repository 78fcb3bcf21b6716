//! Start-up configuration errors.
//!
//! Once the chain is armed there is no error channel; everything that can go
//! wrong is checked here, before the first row leaves the queue.

/// Reasons [`begin`](crate::engine::begin) refuses to arm the refresh chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The bit-plane count is not one of 8, 12 or 16.
    UnsupportedBitPlanes(usize),
    /// The row queue needs at least two slots.
    QueueTooShort(usize),
    /// Rows per frame cannot be selected with the configured address pins.
    TooManyRows {
        /// Rows per frame requested by the geometry
        rows: usize,
        /// Number of address pins configured
        pins: u8,
    },
    /// Address pin count outside 1..=5, or a pin outside the 16-bit port.
    InvalidAddressPins,
    /// The output bus layout reuses a bit or places one outside the bus.
    InvalidBusLayout,
    /// A row burst does not fit in one minor loop of the transfer engine.
    BurstTooLong(usize),
    /// A timer value does not fit in the 16-bit timer registers.
    TimerOverflow(u32),
    /// Refresh rate or bus clock is zero.
    InvalidClock,
    /// The address set/clear registers are not laid out like the staging buffer.
    AddressRegisterLayout,
    /// The timer on-time and period registers are too far apart for one
    /// transfer descriptor.
    TimerRegisterLayout,
    /// The chain was armed before any row was queued.
    QueueEmpty,
}

impl core::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnsupportedBitPlanes(planes) => {
                write!(f, "unsupported bit-plane count {planes} (expected 8, 12 or 16)")
            }
            Self::QueueTooShort(slots) => write!(f, "row queue has {slots} slots, need at least 2"),
            Self::TooManyRows { rows, pins } => {
                write!(f, "{rows} rows per frame cannot be addressed with {pins} address pins")
            }
            Self::InvalidAddressPins => write!(f, "invalid address pin configuration"),
            Self::InvalidBusLayout => write!(f, "invalid output bus bit layout"),
            Self::BurstTooLong(bytes) => {
                write!(f, "row burst of {bytes} bytes exceeds the minor loop limit")
            }
            Self::TimerOverflow(ticks) => write!(f, "timer value {ticks} does not fit in 16 bits"),
            Self::InvalidClock => write!(f, "bus clock and refresh rate must be non-zero"),
            Self::AddressRegisterLayout => {
                write!(f, "address set/clear registers must be one word apart")
            }
            Self::TimerRegisterLayout => {
                write!(f, "timer registers must be distinct and within 32 KiB of each other")
            }
            Self::QueueEmpty => write!(f, "no row queued when arming the output chain"),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::format;
    use std::string::ToString;

    use super::*;

    #[test]
    fn test_display_mentions_values() {
        assert!(ConfigError::UnsupportedBitPlanes(10)
            .to_string()
            .contains("10"));
        assert!(ConfigError::QueueTooShort(1).to_string().contains('1'));
        let msg = ConfigError::TooManyRows { rows: 32, pins: 4 }.to_string();
        assert!(msg.contains("32") && msg.contains('4'));
    }

    #[test]
    fn test_debug_formatting() {
        let debug = format!("{:?}", ConfigError::TimerOverflow(70_000));
        assert_eq!(debug, "TimerOverflow(70000)");
    }
}
