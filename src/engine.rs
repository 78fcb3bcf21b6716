//! Start-up: validate, fill the queue, arm the chain, start the timer.

use crate::address::AddressPins;
use crate::chain::{ChainTargets, LatchTimer, MinorLoop, OutputChain, TransferEngine};
use crate::error::ConfigError;
use crate::layer::Layer;
use crate::pack::{check_bit_planes, BusLayout};
use crate::queue::RowQueue;
use crate::refresh::{RefreshControls, RowCalculator};
use crate::timing::{TimerConfig, BRIGHTNESS_MAX, DEFAULT_REFRESH_RATE_HZ};

/// Board and timing configuration passed to [`begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RefreshConfig {
    /// Port bits of the row-address lines
    pub address_pins: AddressPins,
    /// Bit positions of the colour lines and clock on the data bus
    pub bus_layout: BusLayout,
    /// Latch timer clocking
    pub timer: TimerConfig,
    /// Initial frame rate
    pub refresh_rate_hz: u16,
    /// Initial brightness, out of [`BRIGHTNESS_MAX`]
    pub brightness: u8,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            address_pins: AddressPins::ABCD,
            bus_layout: BusLayout::DEFAULT,
            timer: TimerConfig::default(),
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            brightness: BRIGHTNESS_MAX,
        }
    }
}

/// The two halves of a running refresh engine.
pub type Engine<
    'a,
    L,
    E,
    const COLS: usize,
    const NROWS: usize,
    const PLANES: usize,
    const SLOTS: usize,
> = (
    RowCalculator<'a, L, COLS, NROWS, PLANES, SLOTS>,
    OutputChain<'a, E, COLS, PLANES, SLOTS>,
);

/// Start refreshing the panel.
///
/// Checks the whole configuration, builds the address and timing tables,
/// fills the queue starting at row 0, arms the four transfer channels and
/// finally starts the latch timer. Nothing is touched on the hardware until
/// every check has passed.
///
/// Call [`RowCalculator::run_once`] from the interrupt pended by
/// [`TransferEngine::request_refill`] and [`OutputChain::on_transfer_complete`]
/// from the data channel's completion interrupt. `controls` stays with the
/// application for brightness, rotation and refresh rate changes.
///
/// # Errors
///
/// Any [`ConfigError`]; the chain is not armed in that case.
#[allow(clippy::type_complexity)]
pub fn begin<
    'a,
    L,
    E,
    T,
    const COLS: usize,
    const NROWS: usize,
    const PLANES: usize,
    const SLOTS: usize,
>(
    queue: &'a mut RowQueue<COLS, PLANES, SLOTS>,
    controls: &'a RefreshControls,
    layers: L,
    engine: E,
    timer: &mut T,
    targets: &ChainTargets,
    config: &RefreshConfig,
) -> Result<Engine<'a, L, E, COLS, NROWS, PLANES, SLOTS>, ConfigError>
where
    L: Layer,
    E: TransferEngine,
    T: LatchTimer + ?Sized,
{
    check_bit_planes(PLANES)?;
    if SLOTS < 2 {
        return Err(ConfigError::QueueTooShort(SLOTS));
    }
    if 2 * COLS > MinorLoop::MAX_BYTE_COUNT {
        return Err(ConfigError::BurstTooLong(2 * COLS));
    }
    targets.validate()?;

    let base = config
        .timer
        .base_half_period_ticks(config.refresh_rate_hz, NROWS)?;
    let first_period = u16::try_from(base).map_err(|_| ConfigError::TimerOverflow(base))?;
    let latch = config.timer.latch_ticks();
    let latch_pulse = u16::try_from(latch).map_err(|_| ConfigError::TimerOverflow(latch))?;

    controls.initialize(config.refresh_rate_hz, config.brightness);
    let (producer, consumer) = queue.split();
    let mut calculator = RowCalculator::new(
        producer,
        controls,
        layers,
        &config.address_pins,
        config.bus_layout,
        config.timer,
    )?;
    calculator.run_once();

    // Blanked for the whole first cycle; the chain loads real values from
    // the first latch on.
    timer.configure(first_period, latch_pulse, first_period);
    let chain = OutputChain::arm(engine, consumer, targets)?;
    timer.start();

    info!(
        "refresh started: {} x {} px, {} planes, {} slots, {} Hz",
        COLS,
        2 * NROWS,
        PLANES,
        SLOTS,
        config.refresh_rate_hz
    );
    Ok((calculator, chain))
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::chain::{Channel, Descriptor, Trigger};
    use crate::layer::Canvas;

    const TARGETS: ChainTargets = ChainTargets {
        address_set: 0x1000,
        address_clear: 0x1004,
        timer_on_time: 0x2010,
        timer_period: 0x2000,
        data_output: 0x3000,
    };

    #[derive(Default)]
    struct CountingEngine {
        configured: usize,
        enabled: usize,
    }

    impl TransferEngine for CountingEngine {
        fn channel_number(&self, channel: Channel) -> u8 {
            channel as u8
        }

        fn configure(&mut self, _: Channel, _: &Descriptor, _: Option<Trigger>) {
            self.configured += 1;
        }

        fn set_source(&mut self, _: Channel, _: usize) {}

        fn enable(&mut self, _: Channel) {
            self.enabled += 1;
        }

        fn request_refill(&mut self) {}

        fn acknowledge(&mut self, _: Channel) {}
    }

    #[derive(Default)]
    struct RecordingTimer {
        calls: Vec<(u16, u16, u16)>,
        started: bool,
    }

    impl LatchTimer for RecordingTimer {
        fn configure(&mut self, period: u16, latch_pulse: u16, on_time: u16) {
            self.calls.push((period, latch_pulse, on_time));
        }

        fn start(&mut self) {
            self.started = true;
        }
    }

    fn try_begin<const COLS: usize, const NROWS: usize, const PLANES: usize, const SLOTS: usize>(
        config: &RefreshConfig,
        targets: &ChainTargets,
    ) -> (Result<(), ConfigError>, RecordingTimer) {
        let mut queue = RowQueue::<COLS, PLANES, SLOTS>::new();
        let controls = RefreshControls::default();
        let mut timer = RecordingTimer::default();
        let result = begin::<_, _, _, COLS, NROWS, PLANES, SLOTS>(
            &mut queue,
            &controls,
            Canvas::<COLS, 8>::new(),
            CountingEngine::default(),
            &mut timer,
            targets,
            config,
        )
        .map(|_| ());
        (result, timer)
    }

    #[test]
    fn test_begin_programs_timer() {
        let (result, timer) = try_begin::<8, 4, 8, 2>(&RefreshConfig::default(), &TARGETS);
        assert_eq!(result, Ok(()));
        // 48 MHz / 135 Hz / 4 rows / 2
        assert_eq!(timer.calls, [(44_444, 4, 44_444)]);
        assert!(timer.started);
    }

    #[test]
    fn test_begin_hands_back_running_engine() {
        let mut queue = RowQueue::<8, 8, 3>::new();
        let controls = RefreshControls::default();
        let mut timer = RecordingTimer::default();
        let (calculator, chain) = begin::<_, _, _, 8, 4, 8, 3>(
            &mut queue,
            &controls,
            Canvas::<8, 8>::new(),
            CountingEngine::default(),
            &mut timer,
            &TARGETS,
            &RefreshConfig::default(),
        )
        .unwrap();
        assert_eq!(calculator.queued(), 3);
        assert_eq!(calculator.frame_count(), 1);
        assert_eq!(chain.engine().configured, 4);
        assert_eq!(chain.engine().enabled, 4);
        assert_eq!(chain.current().map(|slot| slot.row()), Some(0));
    }

    #[test]
    fn test_begin_rejects_bad_geometry() {
        let config = RefreshConfig::default();
        assert_eq!(
            try_begin::<8, 4, 10, 2>(&config, &TARGETS).0,
            Err(ConfigError::UnsupportedBitPlanes(10))
        );
        assert_eq!(
            try_begin::<8, 4, 8, 1>(&config, &TARGETS).0,
            Err(ConfigError::QueueTooShort(1))
        );
        assert_eq!(
            try_begin::<512, 4, 8, 2>(&config, &TARGETS).0,
            Err(ConfigError::BurstTooLong(1024))
        );
    }

    #[test]
    fn test_begin_rejects_bad_wiring() {
        let mut config = RefreshConfig {
            address_pins: AddressPins::new([0]),
            ..RefreshConfig::default()
        };
        assert_eq!(
            try_begin::<8, 4, 8, 2>(&config, &TARGETS).0,
            Err(ConfigError::TooManyRows { rows: 4, pins: 1 })
        );
        config.address_pins = AddressPins::ABCD;
        config.bus_layout.red1 = config.bus_layout.clock;
        assert_eq!(
            try_begin::<8, 4, 8, 2>(&config, &TARGETS).0,
            Err(ConfigError::InvalidBusLayout)
        );
        let mut targets = TARGETS;
        targets.address_clear = targets.address_set;
        let (result, timer) = try_begin::<8, 4, 8, 2>(&RefreshConfig::default(), &targets);
        assert_eq!(result, Err(ConfigError::AddressRegisterLayout));
        assert!(timer.calls.is_empty());
        assert!(!timer.started);
    }

    #[test]
    fn test_begin_rejects_slow_refresh() {
        let config = RefreshConfig {
            refresh_rate_hz: 30,
            ..RefreshConfig::default()
        };
        let (result, timer) = try_begin::<8, 4, 8, 2>(&config, &TARGETS);
        assert_eq!(result, Err(ConfigError::TimerOverflow(200_000)));
        assert!(!timer.started);
    }
}
