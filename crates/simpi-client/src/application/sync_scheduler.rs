//! SyncScheduler: periodic register exchange with the broker.
//!
//! The scheduler owns the run-state machine of a control-panel session and
//! the single periodic timer that drives it.
//!
//! ```text
//!            play()                      terminate() acknowledged
//!   Paused ─────────▶ Running ──────────────────────────────▶ Terminated
//!     ▲                  │                                         ▲
//!     └──── pause() ─────┘ ────────────────────────────────────────┘
//! ```
//!
//! Connection state is orthogonal to run state: it is set by the outcome of
//! each exchange and published as [`SyncEvent::ConnectionChanged`].
//!
//! # Ticks (for beginners)
//!
//! Every tick spawns its own task running [`SyncScheduler::sync_once`], so a
//! slow broker never delays the timer.  Responses may therefore arrive out of
//! order; there are no sequence numbers and the last applied value wins.
//! Pausing stops future ticks but never cancels an exchange already in
//! flight.  Its response is still applied to the bank.
//!
//! A transport that receives replies on its own schedule (the socket) hands
//! the scheduler a channel of decoded frames instead.  A dedicated task
//! applies each batch as it arrives, whatever the run state, and never
//! triggers an exchange.
//!
//! # Locking
//!
//! The bank is a `std::sync::Mutex`, locked only for the synchronous build
//! and apply steps and never across an `.await`.  Register observers run
//! while the lock is held, so they must not lock the bank themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use simpi_core::{
    parse_hex, ApiLevel, Command, HexParsing, ProtocolProfile, RegisterBank, TransferFrame,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::transport::{ControlError, RemoteControl, Transport, TransportError};
use crate::domain::{
    ConnectionState, RemoteAction, RunState, SyncConfig, SyncEvent, BUTTON_REGISTER, LED_REGISTER,
};

/// The register bank as shared between the scheduler, its tick tasks and
/// the control surface.
pub type SharedBank = Arc<Mutex<RegisterBank>>;

/// Locks the bank, recovering the guard if a previous holder panicked.
///
/// Register state stays consistent across a panic because every mutation
/// is a single assignment.
pub fn lock_bank(bank: &Mutex<RegisterBank>) -> MutexGuard<'_, RegisterBank> {
    bank.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors returned by scheduler operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The broker was shut down; the session accepts no more commands.
    #[error("session has terminated")]
    Terminated,

    /// A zero tick period was requested.
    #[error("sync interval must be at least 1 ms")]
    InvalidInterval,

    /// A remote action was not acknowledged.
    #[error(transparent)]
    Remote(#[from] ControlError),
}

// ── Shared tick state ─────────────────────────────────────────────────────────

/// State reachable from spawned tick and reconnect tasks.
struct SyncShared {
    bank: SharedBank,
    transport: Arc<dyn Transport>,
    remote: Arc<dyn RemoteControl>,
    authoritative: Vec<String>,
    profile: ProtocolProfile,
    hex_parsing: HexParsing,
    input_pins: Vec<u8>,
    output_pins: Vec<u8>,
    connection: Mutex<ConnectionState>,
    /// Set while a reconnect task is running.
    reconnecting: AtomicBool,
    /// Bumped on every timer install and cancel; a timer whose generation is
    /// stale stops spawning ticks.
    generation: AtomicU64,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncShared {
    async fn sync_once(self: &Arc<Self>) {
        if self.transport.needs_reconnect() {
            debug!("transport is down; skipping exchange");
            self.spawn_reconnect();
            return;
        }

        let outbound = self.outbound_frames();
        match self.transport.exchange(&outbound).await {
            Ok(inbound) => {
                let applied = self.apply(&inbound);
                debug!("sync tick: sent {} frame(s), applied {applied}", outbound.len());
                self.set_connection(ConnectionState::Connected);
            }
            Err(e) => {
                warn!("sync with broker failed: {e}");
                self.set_connection(ConnectionState::Disconnected);
                if matches!(e, TransportError::Closed) {
                    self.spawn_reconnect();
                }
            }
        }
    }

    fn outbound_frames(&self) -> Vec<TransferFrame> {
        match self.profile.api {
            ApiLevel::Register => self.register_frames(),
            ApiLevel::Pin => self.pin_frames(),
        }
    }

    /// `setreg` frames for registers the panel owns, `getreg` frames for the
    /// rest, in bank order.
    fn register_frames(&self) -> Vec<TransferFrame> {
        let bank = lock_bank(&self.bank);
        let mut frames = Vec::new();
        bank.for_each_register(|register| {
            let frame = if self.is_authoritative(register.key()) {
                TransferFrame::set_register(register.key(), register.read())
            } else {
                TransferFrame::get_register(register.key(), Some(register.read()))
            };
            frames.push(frame);
        });
        frames
    }

    /// `setpin` frames for the button pins, then `getpin` frames for the LEDs.
    fn pin_frames(&self) -> Vec<TransferFrame> {
        let bank = lock_bank(&self.bank);
        let mut frames = Vec::with_capacity(self.input_pins.len() + self.output_pins.len());
        for &pin in &self.input_pins {
            match bank.read_pin(pin, BUTTON_REGISTER) {
                Ok(bit) => frames.push(TransferFrame::set_pin(pin, bit)),
                Err(e) => debug!("not pushing pin {pin}: {e}"),
            }
        }
        frames.extend(self.output_pins.iter().map(|&pin| TransferFrame::get_pin(pin)));
        frames
    }

    /// Writes inbound register values and pin levels into the bank and
    /// returns how many were applied.
    fn apply(&self, frames: &[TransferFrame]) -> usize {
        let mut bank = lock_bank(&self.bank);
        let mut applied = 0;

        for frame in frames {
            // Headerless lines answer whatever this profile asks for.
            let pin_level = match (frame.command, self.profile.api) {
                (Some(Command::GetReg), _) | (None, ApiLevel::Register) => false,
                (Some(Command::GetPin), _) | (None, ApiLevel::Pin) => true,
                // setreg/setpin/action acknowledgements carry no new state.
                _ => continue,
            };
            if !self.profile.is_success(frame) {
                debug!(
                    "broker reported {:?} for {:?}",
                    frame.status.as_deref().unwrap_or_default(),
                    frame.key
                );
                continue;
            }
            let Some(value) = frame.value.as_deref() else {
                continue;
            };
            let written = if pin_level {
                self.apply_pin(&mut bank, &frame.key, value)
            } else {
                self.apply_register(&mut bank, &frame.key, value)
            };
            if written {
                applied += 1;
            }
        }

        applied
    }

    fn apply_register(&self, bank: &mut RegisterBank, key: &str, value: &str) -> bool {
        // The panel's own registers are never overwritten by the broker.
        if self.is_authoritative(key) {
            return false;
        }
        match bank.get_mut(key) {
            Ok(register) => match register.from_hex(value, self.hex_parsing) {
                Ok(_) => true,
                Err(e) => {
                    warn!("ignoring value for {key:?}: {e}");
                    false
                }
            },
            Err(e) => {
                debug!("ignoring inbound frame: {e}");
                false
            }
        }
    }

    /// Sets one LED pin of the `output` register from a `getpin` answer.
    fn apply_pin(&self, bank: &mut RegisterBank, key: &str, value: &str) -> bool {
        if self.is_authoritative(LED_REGISTER) {
            return false;
        }
        let Ok(pin) = key.trim().parse::<u8>() else {
            debug!("ignoring level for non-numeric pin {key:?}");
            return false;
        };
        let level = match parse_hex(value, self.hex_parsing) {
            Ok(level) => level,
            Err(e) => {
                warn!("ignoring level for pin {pin}: {e}");
                return false;
            }
        };
        match bank.write_pin(pin, u8::from(level != 0), LED_REGISTER) {
            Ok(()) => true,
            Err(e) => {
                debug!("ignoring level for pin {pin}: {e}");
                false
            }
        }
    }

    fn is_authoritative(&self, key: &str) -> bool {
        self.authoritative.iter().any(|k| k == key)
    }

    /// Starts a reconnect in the background unless one is already running.
    fn spawn_reconnect(self: &Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.set_connection(ConnectionState::Connecting);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = shared.transport.reconnect().await;
            shared.reconnecting.store(false, Ordering::SeqCst);
            match result {
                Ok(()) => {
                    info!("reconnected to broker");
                    shared.set_connection(ConnectionState::Connected);
                }
                Err(e) => {
                    warn!("reconnect to broker failed: {e}");
                    shared.set_connection(ConnectionState::Disconnected);
                }
            }
        });
    }

    async fn remote_reset(&self) {
        let action = RemoteAction::Reset;
        match self.remote.action(action).await {
            Ok(message) => {
                info!("broker reset acknowledged: {message}");
                self.set_connection(ConnectionState::Connected);
                self.publish(SyncEvent::ActionCompleted { action, message });
            }
            Err(e) => {
                warn!("{e}");
                if e.is_unreachable() {
                    self.set_connection(ConnectionState::Disconnected);
                }
                self.publish(SyncEvent::ActionFailed {
                    action,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn connection(&self) -> ConnectionState {
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_connection(&self, state: ConnectionState) {
        let mut current = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == state {
            return;
        }
        *current = state;
        drop(current);

        info!("broker connection: {state}");
        self.publish(SyncEvent::ConnectionChanged(state));
    }

    fn publish(&self, event: SyncEvent) {
        // The receiver may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Drives the periodic exchange and owns the session state machine.
///
/// Timer operations spawn Tokio tasks and must be called from inside a
/// Tokio runtime.
pub struct SyncScheduler {
    shared: Arc<SyncShared>,
    run_state: RunState,
    interval: Duration,
    /// Present iff `run_state == Running`.
    timer: Option<JoinHandle<()>>,
    /// Applies frames the transport pushes outside an exchange.
    inbound: Option<JoinHandle<()>>,
    terminated: bool,
}

impl SyncScheduler {
    /// Creates a paused scheduler and the receiver for its [`SyncEvent`]s.
    ///
    /// If the transport delivers frames through
    /// [`Transport::take_inbound`], a task applying them is spawned here, so
    /// this must then run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidInterval`] if `config.interval` is zero.
    pub fn new(
        config: SyncConfig,
        bank: SharedBank,
        transport: Arc<dyn Transport>,
        remote: Arc<dyn RemoteControl>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SyncEvent>), SyncError> {
        if config.interval.is_zero() {
            return Err(SyncError::InvalidInterval);
        }
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SyncShared {
            bank,
            transport,
            remote,
            authoritative: config.authoritative,
            profile: config.profile,
            hex_parsing: config.hex_parsing,
            input_pins: config.input_pins,
            output_pins: config.output_pins,
            connection: Mutex::new(ConnectionState::Disconnected),
            reconnecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            events,
        });
        let inbound = shared
            .transport
            .take_inbound()
            .map(|frames| spawn_inbound(Arc::downgrade(&shared), frames));
        let scheduler = Self {
            shared,
            run_state: RunState::Paused,
            interval: config.interval,
            timer: None,
            inbound,
            terminated: false,
        };
        Ok((scheduler, rx))
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// A handle to the bank this scheduler syncs.
    pub fn bank(&self) -> SharedBank {
        Arc::clone(&self.shared.bank)
    }

    /// `Paused -> Running`.  No-op if already running.
    pub fn play(&mut self) -> Result<(), SyncError> {
        if self.terminated {
            return Err(SyncError::Terminated);
        }
        if self.run_state == RunState::Running {
            return Ok(());
        }
        self.run_state = RunState::Running;
        self.install_timer();
        info!("sync running every {:?}", self.interval);
        Ok(())
    }

    /// `Running -> Paused`.  No-op if already paused.
    pub fn pause(&mut self) {
        if self.run_state == RunState::Paused {
            return;
        }
        self.cancel_timer();
        self.run_state = RunState::Paused;
        info!("sync paused");
    }

    /// Changes the tick period.  While running, the old timer is cancelled
    /// before the new one is installed, so no stale-period tick fires.
    pub fn set_interval(&mut self, interval: Duration) -> Result<(), SyncError> {
        if self.terminated {
            return Err(SyncError::Terminated);
        }
        if interval.is_zero() {
            return Err(SyncError::InvalidInterval);
        }
        self.interval = interval;
        if self.run_state == RunState::Running {
            self.cancel_timer();
            self.install_timer();
        }
        info!("sync interval set to {interval:?}");
        Ok(())
    }

    /// Resets the local bank now, then requests a broker reset in the
    /// background.
    ///
    /// The local reset never waits for, and is never rolled back by, the
    /// remote one.  The returned handle completes once the remote outcome
    /// has been published.
    ///
    /// # Errors
    ///
    /// [`SyncError::Terminated`] once the broker has shut down; neither the
    /// bank nor the broker is touched then.
    pub fn reset(&self) -> Result<JoinHandle<()>, SyncError> {
        if self.terminated {
            return Err(SyncError::Terminated);
        }
        lock_bank(&self.shared.bank).reset();
        info!("local registers reset to defaults");

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(async move { shared.remote_reset().await }))
    }

    /// Asks the broker to shut down.
    ///
    /// On acknowledgement the timer is cancelled and the session becomes
    /// terminal.  On failure the run state is left untouched.
    pub async fn terminate(&mut self) -> Result<(), SyncError> {
        if self.terminated {
            return Err(SyncError::Terminated);
        }
        let action = RemoteAction::Terminate;
        match self.shared.remote.action(action).await {
            Ok(message) => {
                self.cancel_timer();
                self.run_state = RunState::Paused;
                self.terminated = true;
                info!("broker terminated: {message}");
                self.shared.publish(SyncEvent::ActionCompleted { action, message });
                self.shared.publish(SyncEvent::Terminated);
                Ok(())
            }
            Err(e) => {
                warn!("{e}");
                if e.is_unreachable() {
                    self.shared.set_connection(ConnectionState::Disconnected);
                }
                self.shared.publish(SyncEvent::ActionFailed {
                    action,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Runs one exchange now, independent of the timer.
    ///
    /// Transport failures are absorbed into the connection state.
    pub async fn sync_once(&self) {
        self.shared.sync_once().await;
    }

    fn install_timer(&mut self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(&self.shared);
        let period = self.interval;

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the immediate first tick.

            loop {
                ticker.tick().await;
                if shared.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                let tick = Arc::clone(&shared);
                tokio::spawn(async move { tick.sync_once().await });
            }
        }));
    }

    fn cancel_timer(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel_timer();
        if let Some(inbound) = self.inbound.take() {
            inbound.abort();
        }
    }
}

/// Applies each pushed batch as it arrives, until the channel closes or the
/// scheduler is dropped.
fn spawn_inbound(
    shared: Weak<SyncShared>,
    mut frames: mpsc::UnboundedReceiver<Vec<TransferFrame>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = frames.recv().await {
            let Some(state) = shared.upgrade() else {
                break;
            };
            let applied = state.apply(&batch);
            debug!("applied {applied} of {} pushed frame(s)", batch.len());
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::MockRemoteControl;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::sync::atomic::AtomicUsize;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<TransferFrame>>>,
        reply: Mutex<Vec<TransferFrame>>,
        delay: Option<Duration>,
        fail: AtomicBool,
        closed: AtomicBool,
        reconnects: AtomicUsize,
        pushed: Mutex<Option<mpsc::UnboundedReceiver<Vec<TransferFrame>>>>,
    }

    impl RecordingTransport {
        fn exchanges(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn reply_with(&self, frames: Vec<TransferFrame>) {
            *self.reply.lock().unwrap() = frames;
        }

        /// Makes the transport push frames on its own, like a socket does.
        fn pushing() -> (Self, mpsc::UnboundedSender<Vec<TransferFrame>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Self {
                pushed: Mutex::new(Some(rx)),
                ..Self::default()
            };
            (transport, tx)
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn exchange(
            &self,
            frames: &[TransferFrame],
        ) -> Result<Vec<TransferFrame>, TransportError> {
            self.sent.lock().unwrap().push(frames.to_vec());
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            Ok(self.reply.lock().unwrap().clone())
        }

        fn needs_reconnect(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn reconnect(&self) -> Result<(), TransportError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            time::sleep(Duration::from_millis(50)).await;
            self.closed.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Vec<TransferFrame>>> {
            self.pushed.lock().unwrap().take()
        }
    }

    fn getreg(status: &str, key: &str, value: &str) -> TransferFrame {
        TransferFrame {
            command: Some(Command::GetReg),
            status: Some(status.to_string()),
            key: key.to_string(),
            value: Some(value.to_string()),
        }
    }

    fn make_scheduler(
        transport: Arc<RecordingTransport>,
        remote: MockRemoteControl,
        interval_ms: u64,
    ) -> (SyncScheduler, mpsc::UnboundedReceiver<SyncEvent>, SharedBank) {
        let config = SyncConfig {
            interval: Duration::from_millis(interval_ms),
            ..SyncConfig::default()
        };
        make_scheduler_with(transport, remote, config)
    }

    fn make_scheduler_with(
        transport: Arc<RecordingTransport>,
        remote: MockRemoteControl,
        config: SyncConfig,
    ) -> (SyncScheduler, mpsc::UnboundedReceiver<SyncEvent>, SharedBank) {
        let bank: SharedBank = Arc::new(Mutex::new(RegisterBank::simpi()));
        let (scheduler, rx) =
            SyncScheduler::new(config, Arc::clone(&bank), transport, Arc::new(remote)).unwrap();
        (scheduler, rx, bank)
    }

    /// Advances the paused clock and lets spawned tick tasks finish.
    async fn advance(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Construction ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_zero_interval_is_rejected_at_construction() {
        let config = SyncConfig {
            interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        let result = SyncScheduler::new(
            config,
            Arc::new(Mutex::new(RegisterBank::simpi())),
            Arc::new(RecordingTransport::default()),
            Arc::new(MockRemoteControl::new()),
        );
        assert!(matches!(result, Err(SyncError::InvalidInterval)));
    }

    #[tokio::test]
    async fn test_new_scheduler_is_paused_and_disconnected() {
        let transport = Arc::new(RecordingTransport::default());
        let (scheduler, _rx, _bank) = make_scheduler(transport, MockRemoteControl::new(), 100);

        assert_eq!(scheduler.run_state(), RunState::Paused);
        assert_eq!(scheduler.connection_state(), ConnectionState::Disconnected);
        assert!(scheduler.timer.is_none());
    }

    // ── Timer ─────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_play_ticks_once_per_interval() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut scheduler, _rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);

        // Act
        scheduler.play().unwrap();
        advance(350).await;

        // Assert: ticks at 100, 200 and 300 ms; none at t=0
        assert_eq!(transport.exchanges(), 3);
        assert!(scheduler.timer.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_twice_keeps_one_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut scheduler, _rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);

        scheduler.play().unwrap();
        scheduler.play().unwrap();
        advance(250).await;

        assert_eq!(transport.exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_further_ticks() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut scheduler, _rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);
        scheduler.play().unwrap();
        advance(150).await;
        assert_eq!(transport.exchanges(), 1);

        // Act
        scheduler.pause();
        advance(1000).await;

        // Assert
        assert_eq!(transport.exchanges(), 1);
        assert_eq!(scheduler.run_state(), RunState::Paused);
        assert!(scheduler.timer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_while_running_replaces_timer() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut scheduler, _rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);
        scheduler.play().unwrap();
        advance(150).await;
        assert_eq!(transport.exchanges(), 1);

        // Act: from t=150 the only ticks are at 450 and 750
        scheduler.set_interval(Duration::from_millis(300)).unwrap();
        advance(350).await;

        // Assert: the old 100 ms timer would have added ticks at 200..500
        assert_eq!(transport.exchanges(), 2);
        advance(300).await;
        assert_eq!(transport.exchanges(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_while_paused_does_not_start_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut scheduler, _rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);

        scheduler.set_interval(Duration::from_millis(20)).unwrap();
        advance(200).await;

        assert_eq!(transport.exchanges(), 0);
        assert_eq!(scheduler.interval(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_set_interval_zero_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut scheduler, _rx, _bank) = make_scheduler(transport, MockRemoteControl::new(), 100);

        assert!(matches!(
            scheduler.set_interval(Duration::ZERO),
            Err(SyncError::InvalidInterval)
        ));
        assert_eq!(scheduler.interval(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_response_after_pause_is_still_applied() {
        // Arrange: the broker takes 150 ms to answer
        let transport = Arc::new(RecordingTransport {
            delay: Some(Duration::from_millis(150)),
            ..RecordingTransport::default()
        });
        transport.reply_with(vec![getreg("SUCC", "output", "0x00040000")]);
        let (mut scheduler, _rx, bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);
        scheduler.play().unwrap();
        advance(120).await;

        // Act: pause while the first exchange is in flight
        scheduler.pause();
        advance(300).await;

        // Assert
        assert_eq!(transport.exchanges(), 1);
        assert_eq!(lock_bank(&bank).get("output").unwrap().read(), 0x0004_0000);
    }

    // ── sync_once ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sync_once_pushes_input_and_pulls_the_rest() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (scheduler, _rx, bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);
        lock_bank(&bank).write_pin(22, 1, "input").unwrap();

        // Act
        scheduler.sync_once().await;

        // Assert
        let sent = transport.sent.lock().unwrap()[0].clone();
        assert_eq!(sent[0], TransferFrame::set_register("input", 1 << 22));
        assert!(sent[1..].iter().all(|f| f.command == Some(Command::GetReg)));
        let keys: Vec<&str> = sent.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, ["input", "output", "config", "pwm", "inten", "int0", "int1"]);
    }

    #[tokio::test]
    async fn test_sync_once_applies_only_successful_getreg_values() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        transport.reply_with(vec![
            getreg("SUCC", "output", "0x00800000"),
            getreg("FAIL~UNKREG", "config", "0x00000000"),
            getreg("SUCC", "bogus", "0x00000001"),
            getreg("SUCC", "input", "0xFFFFFFFF"),
            TransferFrame {
                command: Some(Command::SetReg),
                ..getreg("SUCC", "pwm", "0x00000001")
            },
            TransferFrame {
                command: None,
                ..getreg("SUCC", "inten", "0x00000010")
            },
        ]);
        let (scheduler, mut rx, bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);

        // Act
        scheduler.sync_once().await;

        // Assert
        let bank = lock_bank(&bank);
        assert_eq!(bank.get("output").unwrap().read(), 0x0080_0000);
        assert_eq!(bank.get("config").unwrap().read(), 0xFFFF_FFFF);
        assert_eq!(bank.get("input").unwrap().read(), 0);
        assert_eq!(bank.get("pwm").unwrap().read(), 0);
        assert_eq!(bank.get("inten").unwrap().read(), 0x10);
        assert_eq!(scheduler.connection_state(), ConnectionState::Connected);
        assert_eq!(
            drain(&mut rx),
            vec![SyncEvent::ConnectionChanged(ConnectionState::Connected)]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_marks_connection_off_without_error() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (scheduler, mut rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);
        scheduler.sync_once().await;
        transport.fail.store(true, Ordering::SeqCst);

        // Act
        scheduler.sync_once().await;

        // Assert
        assert_eq!(scheduler.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            drain(&mut rx),
            vec![
                SyncEvent::ConnectionChanged(ConnectionState::Connected),
                SyncEvent::ConnectionChanged(ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_gets_one_reconnect_at_a_time() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        transport.closed.store(true, Ordering::SeqCst);
        let (scheduler, _rx, _bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);

        // Act: two ticks while the first reconnect is still running
        scheduler.sync_once().await;
        scheduler.sync_once().await;

        // Assert
        assert_eq!(transport.exchanges(), 0);
        assert_eq!(scheduler.connection_state(), ConnectionState::Connecting);
        advance(60).await;
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.connection_state(), ConnectionState::Connected);

        scheduler.sync_once().await;
        assert_eq!(transport.exchanges(), 1);
    }

    // ── Pushed frames ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_pushed_reply_is_applied_while_paused() {
        // Arrange
        let (transport, broker) = RecordingTransport::pushing();
        let transport = Arc::new(transport);
        let (scheduler, _rx, bank) =
            make_scheduler(Arc::clone(&transport), MockRemoteControl::new(), 100);
        scheduler.sync_once().await;

        // Act: the reply arrives after the only exchange, with no timer running
        broker
            .send(vec![getreg("SUCC", "output", "0x01000000")])
            .unwrap();
        advance(500).await;

        // Assert
        assert_eq!(scheduler.run_state(), RunState::Paused);
        assert_eq!(lock_bank(&bank).get("output").unwrap().read(), 0x0100_0000);
        assert_eq!(transport.exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushed_frames_follow_the_apply_rules() {
        let (transport, broker) = RecordingTransport::pushing();
        let (_scheduler, _rx, bank) =
            make_scheduler(Arc::new(transport), MockRemoteControl::new(), 100);

        broker
            .send(vec![
                getreg("SUCC", "input", "0x000000FF"),
                getreg("FAIL~UNKREG", "bogus", "0x1"),
                getreg("SUCC", "pwm", "0x00000002"),
            ])
            .unwrap();
        advance(10).await;

        assert_eq!(lock_bank(&bank).get("input").unwrap().read(), 0);
        assert_eq!(lock_bank(&bank).get("pwm").unwrap().read(), 2);
    }

    // ── Pin-level API ─────────────────────────────────────────────────────────

    fn pin_config() -> SyncConfig {
        SyncConfig {
            profile: ProtocolProfile {
                api: ApiLevel::Pin,
                ..ProtocolProfile::default()
            },
            ..SyncConfig::default()
        }
    }

    fn getpin(status: &str, pin: &str, level: &str) -> TransferFrame {
        TransferFrame {
            command: Some(Command::GetPin),
            ..getreg(status, pin, level)
        }
    }

    #[tokio::test]
    async fn test_pin_api_pushes_buttons_and_pulls_leds() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (scheduler, _rx, bank) =
            make_scheduler_with(Arc::clone(&transport), MockRemoteControl::new(), pin_config());
        lock_bank(&bank).write_pin(27, 1, BUTTON_REGISTER).unwrap();

        // Act
        scheduler.sync_once().await;

        // Assert
        let sent = transport.sent.lock().unwrap()[0].clone();
        let summary: Vec<(Option<Command>, &str, Option<&str>)> = sent
            .iter()
            .map(|f| (f.command, f.key.as_str(), f.value.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some(Command::SetPin), "22", Some("0")),
                (Some(Command::SetPin), "27", Some("1")),
                (Some(Command::SetPin), "17", Some("0")),
                (Some(Command::GetPin), "18", None),
                (Some(Command::GetPin), "23", None),
                (Some(Command::GetPin), "24", None),
                (Some(Command::GetPin), "25", None),
            ]
        );
    }

    #[tokio::test]
    async fn test_pin_api_applies_led_levels_to_output() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        transport.reply_with(vec![
            getpin("SUCC", "18", "1"),
            getpin("SUCC", "23", "0"),
            getpin("FAIL~PNF", "24", "1"),
            getpin("SUCC", "99", "1"),
            getpin("SUCC", "led", "1"),
            TransferFrame {
                command: Some(Command::SetPin),
                ..getreg("SUCC", "25", "1")
            },
        ]);
        let (scheduler, _rx, bank) =
            make_scheduler_with(Arc::clone(&transport), MockRemoteControl::new(), pin_config());
        lock_bank(&bank).write_pin(23, 1, LED_REGISTER).unwrap();

        // Act
        scheduler.sync_once().await;

        // Assert: only 18 set and 23 cleared
        assert_eq!(lock_bank(&bank).get(LED_REGISTER).unwrap().read(), 1 << 18);
        assert_eq!(scheduler.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_headerless_lines_answer_the_configured_api() {
        let headerless = |key: &str, value: &str| TransferFrame {
            command: None,
            ..getreg("SUCC", key, value)
        };
        let transport = Arc::new(RecordingTransport::default());
        transport.reply_with(vec![headerless("18", "1")]);
        let (scheduler, _rx, bank) =
            make_scheduler_with(Arc::clone(&transport), MockRemoteControl::new(), pin_config());

        scheduler.sync_once().await;

        assert_eq!(lock_bank(&bank).read_pin(18, LED_REGISTER), Ok(1));
    }

    // ── reset / terminate ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_reset_is_local_first_even_if_remote_fails() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let mut remote = MockRemoteControl::new();
        remote
            .expect_action()
            .with(eq(RemoteAction::Reset))
            .times(1)
            .returning(|action| {
                Err(ControlError::Transport {
                    action,
                    source: TransportError::Connect("refused".to_string()),
                })
            });
        let (scheduler, mut rx, bank) = make_scheduler(transport, remote, 100);
        lock_bank(&bank).get_mut("config").unwrap().write(0);
        lock_bank(&bank).get_mut("input").unwrap().write(0xFF);

        // Act
        let remote_reset = scheduler.reset().unwrap();

        // Assert: local state changed before the remote call resolved
        assert_eq!(lock_bank(&bank).get("config").unwrap().read(), 0xFFFF_FFFF);
        assert_eq!(lock_bank(&bank).get("input").unwrap().read(), 0);

        remote_reset.await.unwrap();
        assert_eq!(lock_bank(&bank).get("config").unwrap().read(), 0xFFFF_FFFF);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SyncEvent::ActionFailed { action: RemoteAction::Reset, .. }]
        ));
    }

    #[tokio::test]
    async fn test_reset_acknowledged_publishes_message() {
        let mut remote = MockRemoteControl::new();
        remote
            .expect_action()
            .with(eq(RemoteAction::Reset))
            .returning(|_| Ok("Reset done.".to_string()));
        let (scheduler, mut rx, _bank) =
            make_scheduler(Arc::new(RecordingTransport::default()), remote, 100);

        scheduler.reset().unwrap().await.unwrap();

        let events = drain(&mut rx);
        assert!(events.contains(&SyncEvent::ActionCompleted {
            action: RemoteAction::Reset,
            message: "Reset done.".to_string(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_acknowledged_ends_session() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let mut remote = MockRemoteControl::new();
        remote
            .expect_action()
            .with(eq(RemoteAction::Terminate))
            .times(1)
            .returning(|_| Ok("Exiting...".to_string()));
        let (mut scheduler, mut rx, _bank) = make_scheduler(Arc::clone(&transport), remote, 100);
        scheduler.play().unwrap();

        // Act
        tokio_test::assert_ok!(scheduler.terminate().await);
        advance(500).await;

        // Assert
        assert!(scheduler.is_terminated());
        assert_eq!(transport.exchanges(), 0);
        assert!(matches!(scheduler.play(), Err(SyncError::Terminated)));
        assert!(matches!(
            scheduler.set_interval(Duration::from_millis(50)),
            Err(SyncError::Terminated)
        ));
        assert!(matches!(scheduler.terminate().await, Err(SyncError::Terminated)));
        assert_eq!(drain(&mut rx).last(), Some(&SyncEvent::Terminated));
    }

    #[tokio::test]
    async fn test_reset_after_terminate_touches_nothing() {
        // Arrange: the only expected broker call is the terminate itself
        let mut remote = MockRemoteControl::new();
        remote
            .expect_action()
            .with(eq(RemoteAction::Terminate))
            .times(1)
            .returning(|_| Ok("Exiting...".to_string()));
        let (mut scheduler, mut rx, bank) =
            make_scheduler(Arc::new(RecordingTransport::default()), remote, 100);
        scheduler.terminate().await.unwrap();
        drain(&mut rx);
        lock_bank(&bank).get_mut("output").unwrap().write(0x0004_0000);

        // Act
        let result = scheduler.reset();

        // Assert
        assert!(matches!(result, Err(SyncError::Terminated)));
        assert_eq!(lock_bank(&bank).get("output").unwrap().read(), 0x0004_0000);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_rejected_leaves_session_running() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let mut remote = MockRemoteControl::new();
        remote.expect_action().returning(|action| {
            Err(ControlError::Rejected {
                action,
                reason: "UNKACT".to_string(),
            })
        });
        let (mut scheduler, _rx, _bank) = make_scheduler(Arc::clone(&transport), remote, 100);
        scheduler.play().unwrap();

        // Act
        let result = scheduler.terminate().await;
        advance(150).await;

        // Assert
        assert!(matches!(
            result,
            Err(SyncError::Remote(ControlError::Rejected { .. }))
        ));
        assert!(!scheduler.is_terminated());
        assert_eq!(scheduler.run_state(), RunState::Running);
        assert_eq!(transport.exchanges(), 1);
    }
}
