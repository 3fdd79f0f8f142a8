//! Mock readout board: transmit core, receive core and the simulated front ends
//! behind them.
//!
//! [`MockTxCore`] queues commands in a FIFO. In [`MockMode::Instant`] each
//! command executes inside `send()`; otherwise a worker thread drains the FIFO
//! with board-like latency, so `is_cmd_empty()` turns true only after the
//! front ends have seen every command. Triggers and injections make the front
//! ends answer with FE-I4 words, which [`MockRxCore`] hands out as
//! [`RawFragment`]s for every channel enabled on the receive side.
//!
//! Every collaborator call is counted ([`CallCounts`]) and checked against the
//! board's [`ErrorConfig`] for fault injection.

use crate::common::{ops, ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::front_end_sim::{FrontEndSim, RegisterSnapshot, SimulationConfig};
use daq_core::data::RawFragment;
use daq_core::driver::{mask_channels, ChannelMask, FrontEndCommand, RxCore, TxCore};
use daq_core::error::DriverError;
use daq_core::handoff::HandoffQueue;
use daq_core::router::ChannelId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const TX_DRIVER: &str = "mock_tx";
const RX_DRIVER: &str = "mock_rx";

// =============================================================================
// Call Counters
// =============================================================================

#[derive(Debug, Default)]
struct CallCounters {
    tx_enable: AtomicU32,
    tx_disable: AtomicU32,
    rx_enable: AtomicU32,
    rx_disable: AtomicU32,
    commands: AtomicU64,
    triggers: AtomicU64,
    fragments: AtomicU64,
}

/// Snapshot of how often each collaborator entry point was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `TxCore::enable` calls
    pub tx_enable: u32,
    /// `TxCore::disable` calls
    pub tx_disable: u32,
    /// `RxCore::enable` calls
    pub rx_enable: u32,
    /// `RxCore::disable` calls
    pub rx_disable: u32,
    /// Commands accepted by `send()`
    pub commands: u64,
    /// Triggers and injections executed
    pub triggers: u64,
    /// Fragments placed in the receive buffer
    pub fragments: u64,
}

impl CallCounters {
    fn snapshot(&self) -> CallCounts {
        CallCounts {
            tx_enable: self.tx_enable.load(Ordering::SeqCst),
            tx_disable: self.tx_disable.load(Ordering::SeqCst),
            rx_enable: self.rx_enable.load(Ordering::SeqCst),
            rx_disable: self.rx_disable.load(Ordering::SeqCst),
            commands: self.commands.load(Ordering::SeqCst),
            triggers: self.triggers.load(Ordering::SeqCst),
            fragments: self.fragments.load(Ordering::SeqCst),
        }
    }
}

// =============================================================================
// Shared Board State
// =============================================================================

struct BoardState {
    front_ends: Mutex<BTreeMap<ChannelId, FrontEndSim>>,
    tx_mask: AtomicU32,
    rx_mask: AtomicU32,
    /// Commands accepted but not yet executed
    pending: AtomicUsize,
    rx_buffer: HandoffQueue<RawFragment>,
    simulation: SimulationConfig,
    timing: TimingConfig,
    rng: MockRng,
    errors: ErrorConfig,
    counters: CallCounters,
}

impl BoardState {
    fn execute(&self, mask: ChannelMask, command: &FrontEndCommand) {
        let (repeat, analog) = match command {
            FrontEndCommand::Trigger { count } => (*count, false),
            FrontEndCommand::Inject { count } => (*count, true),
            other => {
                let mut front_ends = self.front_ends.lock();
                for channel in mask_channels(mask) {
                    if let Some(fe) = front_ends.get_mut(&channel) {
                        fe.apply(other);
                    }
                }
                return;
            }
        };

        for _ in 0..repeat {
            let rx_mask = self.rx_mask.load(Ordering::SeqCst);
            let mut words = Vec::new();
            {
                let mut front_ends = self.front_ends.lock();
                for channel in mask_channels(mask) {
                    if let Some(fe) = front_ends.get_mut(&channel) {
                        let response = fe.respond(analog, &self.simulation, &self.rng);
                        // Receive side drops data of disabled channels
                        if rx_mask & (1 << channel) != 0 {
                            words.extend(response);
                        }
                    }
                }
            }
            self.counters.triggers.fetch_add(1, Ordering::SeqCst);
            if !words.is_empty() {
                self.rx_buffer.push(RawFragment::new(0, 0, words));
                self.counters.fragments.fetch_add(1, Ordering::SeqCst);
            }
            if !self.timing.trigger_period().is_zero() {
                std::thread::sleep(self.timing.trigger_period());
            }
        }
    }
}

// =============================================================================
// MockTxCore
// =============================================================================

/// Simulated transmit core.
pub struct MockTxCore {
    board: Arc<BoardState>,
    commands: Arc<HandoffQueue<(ChannelMask, FrontEndCommand)>>,
    mode: MockMode,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MockTxCore {
    fn new(board: Arc<BoardState>, mode: MockMode) -> Self {
        let commands = Arc::new(HandoffQueue::with_name("mock_tx_fifo"));
        let shutdown = CancellationToken::new();

        let worker = mode.is_asynchronous().then(|| {
            let board = board.clone();
            let commands = commands.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                while let Ok((mask, command)) = commands.pop(&shutdown) {
                    if !board.timing.command_latency().is_zero() {
                        std::thread::sleep(board.timing.command_latency());
                    }
                    board.execute(mask, &command);
                    board.pending.fetch_sub(1, Ordering::SeqCst);
                }
                trace!("Mock command worker stopped");
            })
        });

        Self {
            board,
            commands,
            mode,
            shutdown,
            worker: Mutex::new(worker),
        }
    }

    /// Channels commands are currently routed to.
    pub fn mask(&self) -> ChannelMask {
        self.board.tx_mask.load(Ordering::SeqCst)
    }
}

impl TxCore for MockTxCore {
    fn enable(&self, mask: ChannelMask) -> Result<(), DriverError> {
        self.board.counters.tx_enable.fetch_add(1, Ordering::SeqCst);
        self.board.errors.check_operation(TX_DRIVER, ops::TX_ENABLE)?;
        self.board.tx_mask.store(mask, Ordering::SeqCst);
        debug!(mask = format_args!("{:#x}", mask), "Mock tx enabled");
        Ok(())
    }

    fn disable(&self) -> Result<(), DriverError> {
        self.board.counters.tx_disable.fetch_add(1, Ordering::SeqCst);
        self.board.tx_mask.store(0, Ordering::SeqCst);
        let dropped = self.commands.discard();
        if dropped > 0 {
            self.board.pending.fetch_sub(dropped, Ordering::SeqCst);
            warn!(dropped, "Mock tx disabled with commands still queued");
        }
        self.board.errors.check_operation(TX_DRIVER, ops::TX_DISABLE)
    }

    fn send(&self, command: FrontEndCommand) -> Result<(), DriverError> {
        self.board.errors.check_operation(TX_DRIVER, ops::SEND)?;
        self.board.counters.commands.fetch_add(1, Ordering::SeqCst);
        let mask = self.mask();
        if self.mode.is_asynchronous() {
            self.board.pending.fetch_add(1, Ordering::SeqCst);
            self.commands.push((mask, command));
        } else {
            self.board.execute(mask, &command);
        }
        Ok(())
    }

    fn is_cmd_empty(&self) -> bool {
        self.board.pending.load(Ordering::SeqCst) == 0
    }
}

impl Drop for MockTxCore {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.commands.close();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Mock command worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for MockTxCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTxCore")
            .field("mode", &self.mode)
            .field("mask", &self.mask())
            .field("queued", &self.commands.len())
            .finish()
    }
}

// =============================================================================
// MockRxCore
// =============================================================================

/// Simulated receive core.
pub struct MockRxCore {
    board: Arc<BoardState>,
}

impl MockRxCore {
    /// Channels data is currently accepted from.
    pub fn mask(&self) -> ChannelMask {
        self.board.rx_mask.load(Ordering::SeqCst)
    }

    /// Fragments waiting to be read.
    pub fn buffered(&self) -> usize {
        self.board.rx_buffer.len()
    }

    /// Place a fragment in the receive buffer as if a front end had sent it.
    pub fn inject(&self, fragment: RawFragment) {
        self.board.rx_buffer.push(fragment);
        self.board.counters.fragments.fetch_add(1, Ordering::SeqCst);
    }
}

impl RxCore for MockRxCore {
    fn enable(&self, mask: ChannelMask) -> Result<(), DriverError> {
        self.board.counters.rx_enable.fetch_add(1, Ordering::SeqCst);
        self.board.errors.check_operation(RX_DRIVER, ops::RX_ENABLE)?;
        self.board.rx_mask.store(mask, Ordering::SeqCst);
        debug!(mask = format_args!("{:#x}", mask), "Mock rx enabled");
        Ok(())
    }

    fn disable(&self) -> Result<(), DriverError> {
        self.board.counters.rx_disable.fetch_add(1, Ordering::SeqCst);
        self.board.rx_mask.store(0, Ordering::SeqCst);
        self.board.errors.check_operation(RX_DRIVER, ops::RX_DISABLE)
    }

    fn read_data(&self) -> Result<Option<RawFragment>, DriverError> {
        self.board.errors.check_operation(RX_DRIVER, ops::READ_DATA)?;
        Ok(self.board.rx_buffer.try_pop().ok())
    }
}

impl std::fmt::Debug for MockRxCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRxCore")
            .field("mask", &self.mask())
            .field("buffered", &self.buffered())
            .finish()
    }
}

// =============================================================================
// MockBoard
// =============================================================================

/// Failure probability per operation in chaos mode without an explicit
/// error configuration.
pub const CHAOS_FAILURE_RATE: f64 = 0.01;

/// Builder for [`MockBoard`].
#[derive(Debug, Clone)]
pub struct MockBoardBuilder {
    channels: Vec<ChannelId>,
    mode: MockMode,
    seed: Option<u64>,
    timing: TimingConfig,
    simulation: SimulationConfig,
    errors: ErrorConfig,
}

impl MockBoardBuilder {
    /// Instant mode, one front end on channel 0, no faults.
    pub fn new() -> Self {
        Self {
            channels: vec![0],
            mode: MockMode::Instant,
            seed: None,
            timing: TimingConfig::fei4_board(),
            simulation: SimulationConfig::default(),
            errors: ErrorConfig::none(),
        }
    }

    /// Channels with a front end attached.
    pub fn channels(mut self, channels: impl IntoIterator<Item = ChannelId>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    /// Timing behaviour of the board.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seed for simulated hits and random faults.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Latencies used by the asynchronous modes.
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Charge response of the simulated front ends.
    pub fn simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    /// Faults to inject. Replaces the chaos-mode default.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Create the board.
    pub fn build(self) -> MockBoard {
        MockBoard::from_builder(self)
    }
}

impl Default for MockBoardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A readout board with simulated front ends.
pub struct MockBoard {
    state: Arc<BoardState>,
    tx: Arc<MockTxCore>,
    rx: Arc<MockRxCore>,
}

impl MockBoard {
    /// Instant-mode board with one front end on channel 0.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a board.
    pub fn builder() -> MockBoardBuilder {
        MockBoardBuilder::new()
    }

    fn from_builder(builder: MockBoardBuilder) -> Self {
        let front_ends = builder
            .channels
            .iter()
            .map(|c| (*c, FrontEndSim::new(*c)))
            .collect();
        let timing = if builder.mode.is_asynchronous() {
            builder.timing
        } else {
            TimingConfig::default()
        };
        let errors = if builder.mode == MockMode::Chaos && builder.errors.is_none() {
            ErrorConfig::random_failures_seeded(CHAOS_FAILURE_RATE, builder.seed)
        } else {
            builder.errors
        };
        let state = Arc::new(BoardState {
            front_ends: Mutex::new(front_ends),
            tx_mask: AtomicU32::new(0),
            rx_mask: AtomicU32::new(0),
            pending: AtomicUsize::new(0),
            rx_buffer: HandoffQueue::with_name("mock_rx_buffer"),
            simulation: builder.simulation,
            timing,
            rng: MockRng::new(builder.seed),
            errors,
            counters: CallCounters::default(),
        });
        debug!(
            mode = %builder.mode,
            channels = ?builder.channels,
            "Mock board created"
        );
        Self {
            tx: Arc::new(MockTxCore::new(state.clone(), builder.mode)),
            rx: Arc::new(MockRxCore {
                board: state.clone(),
            }),
            state,
        }
    }

    /// Transmit core, shared with the board.
    pub fn tx(&self) -> Arc<MockTxCore> {
        self.tx.clone()
    }

    /// Receive core, shared with the board.
    pub fn rx(&self) -> Arc<MockRxCore> {
        self.rx.clone()
    }

    /// How often each collaborator entry point was invoked so far.
    pub fn counters(&self) -> CallCounts {
        self.state.counters.snapshot()
    }

    /// Register state of the front end on `channel`.
    pub fn front_end(&self, channel: ChannelId) -> Option<RegisterSnapshot> {
        self.state
            .front_ends
            .lock()
            .get(&channel)
            .map(FrontEndSim::snapshot)
    }

    /// Channels with a front end attached.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.state.front_ends.lock().keys().copied().collect()
    }
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use daq_core::driver::{channel_mask, Register};
    use daq_core::error::DriverErrorKind;
    use std::time::{Duration, Instant};

    fn start_run(board: &MockBoard, channels: &[ChannelId]) {
        let mask = channel_mask(channels.iter().copied());
        board.tx().enable(mask).unwrap();
        board.rx().enable(mask).unwrap();
        board
            .tx()
            .send(FrontEndCommand::SetMaskStage { stage: 0, total: 64 })
            .unwrap();
        board.tx().send(FrontEndCommand::RunMode(true)).unwrap();
    }

    #[test]
    fn test_instant_trigger_produces_fragment_per_trigger() {
        let board = MockBoard::builder().channels([0, 1]).seed(3).build();
        start_run(&board, &[0, 1]);
        board.tx().send(FrontEndCommand::Trigger { count: 5 }).unwrap();

        assert!(board.tx().is_cmd_empty());
        let mut fragments = Vec::new();
        while let Some(f) = board.rx().read_data().unwrap() {
            fragments.push(f);
        }
        assert_eq!(fragments.len(), 5);
        let channels: std::collections::BTreeSet<_> = fragments[0]
            .words
            .iter()
            .map(|w| daq_core::fei4::channel_of(*w))
            .collect();
        assert_eq!(channels.into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(board.counters().triggers, 5);
    }

    #[test]
    fn test_rx_mask_filters_channels() {
        let board = MockBoard::builder().channels([0, 1]).build();
        board.tx().enable(channel_mask([0, 1])).unwrap();
        board.rx().enable(channel_mask([1])).unwrap();
        board.tx().send(FrontEndCommand::RunMode(true)).unwrap();
        board.tx().send(FrontEndCommand::Trigger { count: 1 }).unwrap();

        let fragment = board.rx().read_data().unwrap().unwrap();
        assert!(fragment.words.iter().all(|w| w >> 24 == 1));
    }

    #[test]
    fn test_realistic_mode_drains_asynchronously() {
        let board = MockBoard::builder()
            .mode(MockMode::Realistic)
            .timing_config(TimingConfig {
                command_latency_us: 500,
                trigger_period_us: 0,
            })
            .build();
        board.tx().enable(channel_mask([0])).unwrap();
        for _ in 0..10 {
            board
                .tx()
                .send(FrontEndCommand::WriteRegister {
                    register: Register::PlsrDac,
                    value: 200,
                })
                .unwrap();
        }
        assert!(!board.tx().is_cmd_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !board.tx().is_cmd_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(board.tx().is_cmd_empty());
        assert_eq!(board.front_end(0).unwrap().plsr_dac, 200);
    }

    #[test]
    fn test_disable_counts_even_when_faulted() {
        let board = MockBoard::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: ops::TX_DISABLE,
                count: 0,
            }))
            .build();
        let err = board.tx().disable().unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert_eq!(board.counters().tx_disable, 1);
    }

    #[test]
    fn test_send_fault_is_reported() {
        let board = MockBoard::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: ops::SEND,
                count: 1,
            }))
            .build();
        board.tx().send(FrontEndCommand::Reset).unwrap();
        assert!(board.tx().send(FrontEndCommand::Reset).is_err());
        assert_eq!(board.counters().commands, 1);
    }

    #[test]
    fn test_commands_reach_only_masked_channels() {
        let board = MockBoard::builder().channels([0, 1]).build();
        board.tx().enable(channel_mask([1])).unwrap();
        board
            .tx()
            .send(FrontEndCommand::WriteRegister {
                register: Register::HitDiscCnfg,
                value: 2,
            })
            .unwrap();
        assert_eq!(board.front_end(0).unwrap().hit_disc_cnfg, 0);
        assert_eq!(board.front_end(1).unwrap().hit_disc_cnfg, 2);
    }
}
