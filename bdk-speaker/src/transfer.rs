//! Chunked transfer engine
//!
//! Moves a byte buffer to the device with a START / DATA... / END handshake.
//! Two acknowledgement policies share the same skeleton:
//!
//! - sound upload: every frame waits for SOUND_READY (strict per-chunk)
//! - OTA: every Nth frame is an acknowledged write, the rest are
//!   fire-and-forget with backpressure from OTA_PROGRESS (windowed)
//!
//! All waits go through one mutex/condvar pair per session. The radio
//! layer's callbacks (notifications, write completion, link loss) only ever
//! update the predicate under the lock and signal the condvar.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use bdk_transport::protocol::{error_code, timing};
use bdk_transport::{
    chunk_size, write_with_retry, AckWindow, DeviceCommand, Notification, OtaAbort, OtaBegin,
    OtaData, OtaEnd, RetryPolicy, SoundSlot, SoundUploadData, SoundUploadEnd,
    SoundUploadStart, ThrottleTable, TransferKind, Transport, TransportError, WriteMode,
    WriteOutcome,
};

// =============================================================================
// Configuration
// =============================================================================

/// Timing and flow-control parameters for transfers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub sound_start_timeout_ms: u64,
    pub sound_data_timeout_ms: u64,
    pub sound_end_timeout_ms: u64,
    pub ota_begin_timeout_ms: u64,
    pub ota_begin_settle_ms: u64,
    pub ota_end_timeout_ms: u64,
    pub write_complete_timeout_ms: u64,
    /// Every Nth OTA DATA frame is an acknowledged write
    pub ota_ack_every: u32,
    pub retry: RetryPolicy,
    pub throttle: ThrottleTable,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            sound_start_timeout_ms: timing::SOUND_START_TIMEOUT_MS,
            sound_data_timeout_ms: timing::SOUND_DATA_TIMEOUT_MS,
            sound_end_timeout_ms: timing::SOUND_END_TIMEOUT_MS,
            ota_begin_timeout_ms: timing::OTA_BEGIN_TIMEOUT_MS,
            ota_begin_settle_ms: timing::OTA_BEGIN_SETTLE_MS,
            ota_end_timeout_ms: timing::OTA_END_TIMEOUT_MS,
            write_complete_timeout_ms: timing::WRITE_COMPLETE_TIMEOUT_MS,
            ota_ack_every: timing::OTA_ACK_EVERY,
            retry: RetryPolicy::default(),
            throttle: ThrottleTable::default(),
        }
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

// =============================================================================
// Requests, states and outcomes
// =============================================================================

/// A bulk transfer to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    /// Firmware image, already fetched and decrypted
    Ota { image: Vec<u8> },
    /// Sound file, already encoded to the device's PCM layout
    Sound { slot: SoundSlot, data: Vec<u8> },
}

impl TransferRequest {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Ota { .. } => TransferKind::Ota,
            Self::Sound { .. } => TransferKind::Sound,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            Self::Ota { image } => image,
            Self::Sound { data, .. } => data,
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

/// Why a transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No acknowledgement within the configured bound
    Timeout,
    /// Link layer kept rejecting a frame
    WriteFailed,
    /// Device reported a final size different from what was sent
    SizeMismatch,
    /// Device echoed a different sequence than the one just sent
    SequenceMismatch,
    /// Device reported an error code
    DeviceRejected(u8),
    /// Device has no room for the buffer
    TooLarge,
}

impl FailureReason {
    /// Map a device failure code
    pub fn from_device_code(code: u8) -> Self {
        match code {
            error_code::TOO_LARGE => Self::TooLarge,
            other => Self::DeviceRejected(other),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for the device"),
            Self::WriteFailed => write!(f, "write failed after retries"),
            Self::SizeMismatch => write!(f, "device reported a different size"),
            Self::SequenceMismatch => write!(f, "device acknowledged the wrong chunk"),
            Self::DeviceRejected(code) => write!(
                f,
                "device rejected the transfer: {} (0x{:02X})",
                error_code::name(*code),
                code
            ),
            Self::TooLarge => write!(f, "too large for the device"),
        }
    }
}

/// Why a transfer was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Cancelled through the API
    User,
    /// The link dropped
    Disconnected,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "cancelled"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Terminal result of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOutcome {
    Done,
    Failed(FailureReason),
    Cancelled(CancelReason),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "complete"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Cancelled(reason) => write!(f, "{reason}"),
        }
    }
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    /// START/BEGIN sent, waiting for the device to get ready
    Started,
    Transferring,
    /// END sent, waiting for completion
    Finishing,
    Done,
    Failed(FailureReason),
    Cancelled(CancelReason),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Cancelled(_))
    }

    fn from_outcome(outcome: TransferOutcome) -> Self {
        match outcome {
            TransferOutcome::Done => Self::Done,
            TransferOutcome::Failed(r) => Self::Failed(r),
            TransferOutcome::Cancelled(r) => Self::Cancelled(r),
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Started => write!(f, "Started"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Finishing => write!(f, "Finishing"),
            Self::Done => write!(f, "Done"),
            Self::Failed(r) => write!(f, "Failed ({r})"),
            Self::Cancelled(r) => write!(f, "Cancelled ({r})"),
        }
    }
}

/// Transfer progress observer.
///
/// Callbacks run on the transfer worker thread, except `on_device_progress`,
/// which runs on whichever thread delivered the notification. `on_terminal`
/// is called exactly once per session, after the outcome is recorded: the
/// session no longer counts as active, so a new transfer may be started from
/// inside it.
pub trait TransferObserver: Send + Sync {
    /// State machine moved
    fn on_state(&self, _state: TransferState) {}

    /// Bytes acknowledged (sound) or handed to the link (OTA) so far
    fn on_progress(&self, percent: u8, sent: usize, total: usize);

    /// The device's own progress report (SOUND_PROGRESS / OTA_PROGRESS)
    fn on_device_progress(&self, _percent: u8) {}

    /// Session reached a terminal state
    fn on_terminal(&self, outcome: TransferOutcome);
}

/// Observer that ignores everything
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn on_progress(&self, _percent: u8, _sent: usize, _total: usize) {}
    fn on_terminal(&self, _outcome: TransferOutcome) {}
}

// =============================================================================
// Session (shared between worker and callbacks)
// =============================================================================

/// Monotonic session identifier
pub type SessionId = u64;

/// Everything the worker waits on, guarded by one lock
#[derive(Debug)]
struct SessionInner {
    state: TransferState,
    cancel: Option<CancelReason>,
    /// Result of the last acknowledged write, consumed by the worker
    write_complete: Option<bool>,
    /// Set while an acknowledged write of this session is outstanding
    awaiting_completion: bool,
    /// Last SOUND_READY / OTA_READY (with optional echoed sequence)
    ready: Option<Option<u16>>,
    /// Last SOUND_COMPLETE / OTA_COMPLETE (with optional final size)
    complete: Option<Option<u32>>,
    device_failure: Option<u8>,
    device_consumed: usize,
    offset: usize,
    sequence: u16,
    outcome: Option<TransferOutcome>,
    /// Terminal callbacks have returned
    reported: bool,
}

/// One transfer session
pub struct TransferSession {
    id: SessionId,
    kind: TransferKind,
    total: usize,
    observer: Arc<dyn TransferObserver>,
    inner: Mutex<SessionInner>,
    cond: Condvar,
}

/// Result of a bounded wait
enum Wait<T> {
    Ready(T),
    TimedOut,
    Aborted(Abort),
}

/// Why the worker stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abort {
    Failed(FailureReason),
    Cancelled(CancelReason),
}

impl From<Abort> for TransferOutcome {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::Failed(r) => TransferOutcome::Failed(r),
            Abort::Cancelled(r) => TransferOutcome::Cancelled(r),
        }
    }
}

type Step<T = ()> = Result<T, Abort>;

impl TransferSession {
    pub(crate) fn new(
        id: SessionId,
        kind: TransferKind,
        total: usize,
        observer: Arc<dyn TransferObserver>,
    ) -> Self {
        Self {
            id,
            kind,
            total,
            observer,
            inner: Mutex::new(SessionInner {
                state: TransferState::Idle,
                cancel: None,
                write_complete: None,
                awaiting_completion: false,
                ready: None,
                complete: None,
                device_failure: None,
                device_consumed: 0,
                offset: 0,
                sequence: 0,
                outcome: None,
                reported: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().state
    }

    /// Bytes sent so far
    pub fn offset(&self) -> usize {
        self.inner.lock().offset
    }

    /// Next sequence number to be sent
    pub fn sequence(&self) -> u16 {
        self.inner.lock().sequence
    }

    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.inner.lock().outcome
    }

    /// Whether the session has not yet produced an outcome
    pub fn is_active(&self) -> bool {
        self.inner.lock().outcome.is_none()
    }

    /// Request cancellation. Returns `false` if the session already finished
    /// or was already cancelled.
    pub(crate) fn cancel(&self, reason: CancelReason) -> bool {
        let mut inner = self.inner.lock();
        if inner.outcome.is_some() || inner.cancel.is_some() {
            return false;
        }
        inner.cancel = Some(reason);
        self.cond.notify_all();
        true
    }

    /// Record a link-layer write completion. Completions that arrive while
    /// the session has no acknowledged write outstanding belong to someone
    /// else's frame and are dropped.
    pub(crate) fn on_write_complete(&self, success: bool) {
        let mut inner = self.inner.lock();
        if !inner.awaiting_completion {
            trace!(
                "Session {}: dropping write completion ({}) for a frame it did not send",
                self.id,
                success
            );
            return;
        }
        inner.write_complete = Some(success);
        self.cond.notify_all();
    }

    /// Feed a transfer notification. Returns `false` if it belongs to the
    /// other transfer kind.
    pub(crate) fn on_notification(&self, notification: &Notification) -> bool {
        let mut device_percent = None;
        let mut inner = self.inner.lock();
        match (self.kind, notification) {
            (TransferKind::Ota, Notification::OtaReady) => inner.ready = Some(None),
            (TransferKind::Ota, Notification::OtaProgress(p)) => {
                let consumed = p.consumed_bytes(self.total);
                inner.device_consumed = inner.device_consumed.max(consumed);
                device_percent = Some(p.percent_of(self.total));
            }
            (TransferKind::Ota, Notification::OtaComplete { size }) => {
                inner.complete = Some(*size)
            }
            (TransferKind::Ota, Notification::OtaFailed { code }) => {
                inner.device_failure = Some(*code)
            }
            (TransferKind::Sound, Notification::SoundReady { seq }) => inner.ready = Some(*seq),
            (TransferKind::Sound, Notification::SoundProgress { percent }) => {
                debug!("Device reports sound upload at {}%", percent);
                device_percent = Some((*percent).min(100));
            }
            (TransferKind::Sound, Notification::SoundComplete { size }) => {
                inner.complete = Some(*size)
            }
            (TransferKind::Sound, Notification::SoundFailed { code }) => {
                inner.device_failure = Some(*code)
            }
            _ => return false,
        }
        self.cond.notify_all();
        drop(inner);

        // Outside the lock: the observer may query the session
        if let Some(percent) = device_percent {
            self.observer.on_device_progress(percent);
        }
        true
    }

    /// Block until the session has finished and its terminal callbacks have
    /// returned, or the timeout elapses
    pub fn wait(&self, timeout: Duration) -> Option<TransferOutcome> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.reported {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.outcome.filter(|_| inner.reported)
    }

    fn pending_abort(inner: &SessionInner) -> Option<Abort> {
        if let Some(reason) = inner.cancel {
            return Some(Abort::Cancelled(reason));
        }
        inner
            .device_failure
            .map(|code| Abort::Failed(FailureReason::from_device_code(code)))
    }

    /// Classic predicate wait: re-check after every wake-up, bounded by a deadline
    fn wait_for<T>(
        &self,
        timeout: Duration,
        mut take: impl FnMut(&mut SessionInner) -> Option<T>,
    ) -> Wait<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(abort) = Self::pending_abort(&inner) {
                return Wait::Aborted(abort);
            }
            if let Some(v) = take(&mut inner) {
                return Wait::Ready(v);
            }
            if Instant::now() >= deadline {
                return Wait::TimedOut;
            }
            // Timing out here just loops once more to re-check the predicate
            let _ = self.cond.wait_until(&mut inner, deadline);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock()
    }

    /// Record the outcome. From here on the session is no longer active.
    fn finish(&self, outcome: TransferOutcome) {
        let mut inner = self.inner.lock();
        inner.state = TransferState::from_outcome(outcome);
        inner.outcome = Some(outcome);
        inner.awaiting_completion = false;
    }

    /// Terminal callbacks returned: release `wait`
    fn mark_reported(&self) {
        self.inner.lock().reported = true;
        self.cond.notify_all();
    }

    /// Mark the start of an acknowledged write
    fn expect_completion(&self) {
        let mut inner = self.inner.lock();
        inner.write_complete = None;
        inner.awaiting_completion = true;
    }

    fn take_completion(inner: &mut SessionInner) -> Option<bool> {
        let done = inner.write_complete.take();
        if done.is_some() {
            inner.awaiting_completion = false;
        }
        done
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Run a transfer to completion on the current thread.
///
/// Marks the session terminal, then reports the outcome to the observer
/// exactly once.
pub(crate) fn run_transfer(
    session: Arc<TransferSession>,
    transport: Arc<dyn Transport>,
    config: TransferConfig,
    request: TransferRequest,
) {
    let observer = Arc::clone(&session.observer);
    let engine = Engine {
        session: &session,
        transport: transport.as_ref(),
        config: &config,
        observer: observer.as_ref(),
        data: request.data(),
        ota_begun: Cell::new(false),
    };

    info!(
        "Session {}: starting {} of {} bytes",
        session.id,
        session.kind,
        session.total
    );
    let started = Instant::now();

    let result = match &request {
        TransferRequest::Ota { .. } => engine.run_ota(),
        TransferRequest::Sound { slot, .. } => engine.run_sound(*slot),
    };
    let outcome = match result {
        Ok(()) => TransferOutcome::Done,
        Err(abort) => abort.into(),
    };

    match outcome {
        TransferOutcome::Done => info!(
            "Session {}: {} complete in {:.1}s",
            session.id,
            session.kind,
            started.elapsed().as_secs_f32()
        ),
        TransferOutcome::Failed(reason) => {
            error!("Session {}: {} failed: {}", session.id, session.kind, reason);
            if engine.ota_begun.get() {
                engine.abort_ota();
            }
        }
        TransferOutcome::Cancelled(reason) => {
            warn!("Session {}: {} {}", session.id, session.kind, reason)
        }
    }

    session.finish(outcome);
    observer.on_state(TransferState::from_outcome(outcome));
    observer.on_terminal(outcome);
    session.mark_reported();
}

struct Engine<'a> {
    session: &'a TransferSession,
    transport: &'a dyn Transport,
    config: &'a TransferConfig,
    observer: &'a dyn TransferObserver,
    data: &'a [u8],
    ota_begun: Cell<bool>,
}

impl Engine<'_> {
    fn total(&self) -> usize {
        self.data.len()
    }

    fn set_state(&self, state: TransferState) {
        self.session.lock().state = state;
        debug!("Session {}: -> {}", self.session.id, state);
        self.observer.on_state(state);
    }

    fn check_abort(&self) -> Step {
        match TransferSession::pending_abort(&self.session.lock()) {
            Some(abort) => Err(abort),
            None => Ok(()),
        }
    }

    /// Sleep that wakes early on cancellation or device failure
    fn sleep(&self, duration: Duration) -> Step {
        if duration.is_zero() {
            return self.check_abort();
        }
        match self.session.wait_for(duration, |_| None::<()>) {
            Wait::Aborted(abort) => Err(abort),
            Wait::Ready(()) | Wait::TimedOut => Ok(()),
        }
    }

    fn map_write_error(&self, err: TransportError) -> Abort {
        match err {
            TransportError::Disconnected => Abort::Cancelled(CancelReason::Disconnected),
            TransportError::Interrupted => match self.check_abort() {
                Err(abort) => abort,
                Ok(()) => Abort::Failed(FailureReason::WriteFailed),
            },
            TransportError::WriteRejected { .. } | TransportError::PayloadTooLarge { .. } => {
                Abort::Failed(FailureReason::WriteFailed)
            }
        }
    }

    /// Write a frame with retries. Acknowledged writes also wait for the link
    /// layer's completion. Rejected writes and failed completions draw on the
    /// same attempt budget, so a frame is written at most `attempts` times.
    fn send(&self, frame: &[u8], mode: WriteMode) -> Step {
        let policy = self.config.retry;
        let attempts = policy.attempts.max(1);
        let once = RetryPolicy {
            attempts: 1,
            ..policy
        };
        let timeout = ms(self.config.write_complete_timeout_ms);
        for attempt in 1..=attempts {
            self.check_abort()?;
            if mode == WriteMode::Acknowledged {
                self.session.expect_completion();
            }
            match write_with_retry(self.transport, frame, mode, &once, |_| true) {
                Ok(_) => {}
                Err(TransportError::WriteRejected { .. }) => {
                    warn!("Write rejected (attempt {}/{})", attempt, attempts);
                    if attempt < attempts {
                        self.sleep(policy.backoff(attempt))?;
                    }
                    continue;
                }
                Err(e) => return Err(self.map_write_error(e)),
            }
            if mode == WriteMode::Unacknowledged {
                return Ok(());
            }

            match self.session.wait_for(timeout, TransferSession::take_completion) {
                Wait::Ready(true) => return Ok(()),
                Wait::Ready(false) => {
                    warn!(
                        "Write completion reported failure (attempt {}/{})",
                        attempt, attempts
                    );
                    if attempt < attempts {
                        self.sleep(policy.backoff(attempt))?;
                    }
                }
                Wait::TimedOut => {
                    warn!("No write completion within {:?}", timeout);
                    return Err(Abort::Failed(FailureReason::Timeout));
                }
                Wait::Aborted(abort) => return Err(abort),
            }
        }
        warn!("Giving up on frame after {} attempts", attempts);
        Err(Abort::Failed(FailureReason::WriteFailed))
    }

    /// Send a frame and wait for READY, verifying an echoed sequence if present
    fn send_expect_ready(&self, frame: &[u8], timeout: Duration, seq: Option<u16>) -> Step {
        self.session.lock().ready = None;
        self.send(frame, WriteMode::Acknowledged)?;
        match self.session.wait_for(timeout, |s| s.ready.take()) {
            Wait::Ready(echo) => match (seq, echo) {
                (Some(expected), Some(got)) if expected != got => {
                    warn!("Device acknowledged seq {} but {} was sent", got, expected);
                    Err(Abort::Failed(FailureReason::SequenceMismatch))
                }
                _ => Ok(()),
            },
            Wait::TimedOut => {
                warn!("No READY within {:?}", timeout);
                Err(Abort::Failed(FailureReason::Timeout))
            }
            Wait::Aborted(abort) => Err(abort),
        }
    }

    /// Send END and wait for COMPLETE, verifying a reported final size
    fn send_expect_complete(&self, frame: &[u8], timeout: Duration) -> Step {
        self.session.lock().complete = None;
        self.send(frame, WriteMode::Acknowledged)?;
        match self.session.wait_for(timeout, |s| s.complete.take()) {
            Wait::Ready(Some(size)) if size as usize != self.total() => {
                warn!(
                    "Device reports {} bytes received, {} were sent",
                    size,
                    self.total()
                );
                Err(Abort::Failed(FailureReason::SizeMismatch))
            }
            Wait::Ready(_) => Ok(()),
            Wait::TimedOut => {
                warn!("No COMPLETE within {:?}", timeout);
                Err(Abort::Failed(FailureReason::Timeout))
            }
            Wait::Aborted(abort) => Err(abort),
        }
    }

    /// Next chunk bounds and sequence, sized for the link as it is right now
    fn next_chunk(&self) -> (usize, usize, u16) {
        let negotiated = self.transport.negotiated_payload_size();
        let inner = self.session.lock();
        let size = chunk_size(self.session.kind, negotiated).min(self.total() - inner.offset);
        (inner.offset, size, inner.sequence)
    }

    fn advance(&self, size: usize) {
        let (offset, total) = {
            let mut inner = self.session.lock();
            inner.offset += size;
            inner.sequence = inner.sequence.wrapping_add(1);
            (inner.offset, self.total())
        };
        let percent = (offset * 100 / total.max(1)) as u8;
        self.observer.on_progress(percent, offset, total);
    }

    fn run_sound(&self, slot: SoundSlot) -> Step {
        let cfg = self.config;
        self.set_state(TransferState::Started);
        // Size is bounded by the sound bank limit
        let start = SoundUploadStart::new(slot, self.total() as u32).build();
        self.send_expect_ready(&start, ms(cfg.sound_start_timeout_ms), None)?;

        self.set_state(TransferState::Transferring);
        while self.session.offset() < self.total() {
            self.check_abort()?;
            let (offset, size, seq) = self.next_chunk();
            let frame = SoundUploadData {
                seq,
                chunk: &self.data[offset..offset + size],
            }
            .build();
            self.send_expect_ready(&frame, ms(cfg.sound_data_timeout_ms), Some(seq))?;
            self.advance(size);
        }

        self.check_abort()?;
        self.set_state(TransferState::Finishing);
        self.send_expect_complete(
            &SoundUploadEnd::default().build(),
            ms(cfg.sound_end_timeout_ms),
        )
    }

    fn run_ota(&self) -> Step {
        let cfg = self.config;
        self.set_state(TransferState::Started);
        // Size is bounded by the OTA image limit
        let begin = OtaBegin::new(self.total() as u32).build();
        self.ota_begun.set(true);
        self.send_expect_ready(&begin, ms(cfg.ota_begin_timeout_ms), None)?;
        // Device finishes erasing before it can take data at full rate
        self.sleep(ms(cfg.ota_begin_settle_ms))?;

        self.set_state(TransferState::Transferring);
        let window = AckWindow::new(cfg.ota_ack_every);
        let mut chunk_number: u32 = 0;
        while self.session.offset() < self.total() {
            self.check_abort()?;
            let (offset, size, seq) = self.next_chunk();
            chunk_number += 1;
            let last = offset + size == self.total();
            let mode = window.mode_for(chunk_number, last);
            let frame = OtaData {
                seq,
                chunk: &self.data[offset..offset + size],
            }
            .build();
            self.send(&frame, mode)?;
            self.advance(size);

            if mode == WriteMode::Unacknowledged {
                let (sent, consumed) = {
                    let inner = self.session.lock();
                    (inner.offset, inner.device_consumed)
                };
                self.sleep(cfg.throttle.delay_for(sent, consumed, size))?;
            }
        }

        self.check_abort()?;
        self.set_state(TransferState::Finishing);
        self.send_expect_complete(&OtaEnd::default().build(), ms(cfg.ota_end_timeout_ms))
    }

    /// Best effort: tell the device to drop its partial image
    fn abort_ota(&self) {
        if !self.transport.is_connected() {
            return;
        }
        let frame = OtaAbort::default().build();
        match self.transport.write(&frame, WriteMode::Unacknowledged) {
            WriteOutcome::Queued => info!("Sent OTA_ABORT"),
            WriteOutcome::Rejected => warn!("OTA_ABORT rejected by link"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdk_transport::DeviceProgress;

    fn session(kind: TransferKind, total: usize) -> TransferSession {
        TransferSession::new(1, kind, total, Arc::new(NullObserver))
    }

    /// Link that answers acknowledged writes with a fixed completion result
    struct TestLink {
        session: Arc<TransferSession>,
        complete_with: bool,
        reject_first: Mutex<u32>,
        writes: Mutex<u32>,
    }

    impl TestLink {
        fn new(session: &Arc<TransferSession>, complete_with: bool, reject_first: u32) -> Self {
            Self {
                session: Arc::clone(session),
                complete_with,
                reject_first: Mutex::new(reject_first),
                writes: Mutex::new(0),
            }
        }
    }

    impl Transport for TestLink {
        fn negotiated_payload_size(&self) -> usize {
            247
        }

        fn write_acknowledged(&self, _frame: &[u8]) -> WriteOutcome {
            *self.writes.lock() += 1;
            {
                let mut reject = self.reject_first.lock();
                if *reject > 0 {
                    *reject -= 1;
                    return WriteOutcome::Rejected;
                }
            }
            self.session.on_write_complete(self.complete_with);
            WriteOutcome::Queued
        }

        fn write_unacknowledged(&self, _frame: &[u8]) -> WriteOutcome {
            *self.writes.lock() += 1;
            WriteOutcome::Queued
        }
    }

    fn quick_config() -> TransferConfig {
        TransferConfig {
            write_complete_timeout_ms: 200,
            retry: RetryPolicy {
                attempts: 4,
                short_attempts: 2,
                short_backoff_ms: 1,
                long_backoff_ms: 1,
            },
            ..TransferConfig::default()
        }
    }

    fn engine<'a>(
        session: &'a TransferSession,
        transport: &'a dyn Transport,
        config: &'a TransferConfig,
        data: &'a [u8],
    ) -> Engine<'a> {
        Engine {
            session,
            transport,
            config,
            observer: session.observer.as_ref(),
            data,
            ota_begun: Cell::new(false),
        }
    }

    #[derive(Default)]
    struct DevicePercents(Mutex<Vec<u8>>);

    impl TransferObserver for DevicePercents {
        fn on_progress(&self, _percent: u8, _sent: usize, _total: usize) {}
        fn on_terminal(&self, _outcome: TransferOutcome) {}
        fn on_device_progress(&self, percent: u8) {
            self.0.lock().push(percent);
        }
    }

    #[test]
    fn test_failure_reason_from_code() {
        assert_eq!(
            FailureReason::from_device_code(error_code::TOO_LARGE),
            FailureReason::TooLarge
        );
        assert_eq!(
            FailureReason::from_device_code(error_code::FLASH),
            FailureReason::DeviceRejected(error_code::FLASH)
        );
    }

    #[test]
    fn test_outcome_messages_distinct() {
        let messages = [
            TransferOutcome::Cancelled(CancelReason::Disconnected).to_string(),
            TransferOutcome::Cancelled(CancelReason::User).to_string(),
            TransferOutcome::Failed(FailureReason::Timeout).to_string(),
            TransferOutcome::Failed(FailureReason::TooLarge).to_string(),
            TransferOutcome::Failed(FailureReason::DeviceRejected(2)).to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_session_routes_by_kind() {
        let session = session(TransferKind::Sound, 100);
        assert!(!session.on_notification(&Notification::OtaReady));
        assert!(session.on_notification(&Notification::SoundReady { seq: Some(4) }));
        assert_eq!(session.lock().ready, Some(Some(4)));
    }

    #[test]
    fn test_device_progress_is_monotonic() {
        let session = session(TransferKind::Ota, 1000);
        session.on_notification(&Notification::OtaProgress(DeviceProgress::Percent(50)));
        session.on_notification(&Notification::OtaProgress(DeviceProgress::Percent(10)));
        assert_eq!(session.lock().device_consumed, 500);
    }

    #[test]
    fn test_cancel_once() {
        let session = session(TransferKind::Ota, 10);
        assert!(session.cancel(CancelReason::User));
        assert!(!session.cancel(CancelReason::Disconnected));
        session.finish(TransferOutcome::Cancelled(CancelReason::User));
        assert!(!session.cancel(CancelReason::User));
        assert_eq!(
            session.state(),
            TransferState::Cancelled(CancelReason::User)
        );
    }

    #[test]
    fn test_wait_for_times_out() {
        let session = session(TransferKind::Sound, 10);
        let started = Instant::now();
        let res = session.wait_for(Duration::from_millis(20), |s| s.ready.take());
        assert!(matches!(res, Wait::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_for_wakes_on_cancel() {
        let session = Arc::new(session(TransferKind::Sound, 10));
        let s2 = Arc::clone(&session);
        let waiter = std::thread::spawn(move || {
            matches!(
                s2.wait_for(Duration::from_secs(10), |s| s.ready.take()),
                Wait::Aborted(Abort::Cancelled(CancelReason::Disconnected))
            )
        });
        std::thread::sleep(Duration::from_millis(20));
        session.cancel(CancelReason::Disconnected);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_device_failure_aborts_wait() {
        let session = session(TransferKind::Ota, 10);
        session.on_notification(&Notification::OtaFailed {
            code: error_code::VERIFY,
        });
        let res = session.wait_for(Duration::from_secs(1), |s| s.complete.take());
        assert!(matches!(
            res,
            Wait::Aborted(Abort::Failed(FailureReason::DeviceRejected(error_code::VERIFY)))
        ));
    }

    #[test]
    fn test_device_progress_reaches_observer() {
        let percents = Arc::new(DevicePercents::default());
        let sound = TransferSession::new(1, TransferKind::Sound, 100, percents.clone());
        assert!(sound.on_notification(&Notification::SoundProgress { percent: 40 }));
        assert!(!sound.on_notification(&Notification::OtaProgress(DeviceProgress::Percent(5))));

        let ota = TransferSession::new(2, TransferKind::Ota, 1000, percents.clone());
        assert!(ota.on_notification(&Notification::OtaProgress(DeviceProgress::Bytes(250))));
        assert_eq!(*percents.0.lock(), vec![40, 25]);
    }

    #[test]
    fn test_stray_completion_is_dropped() {
        let session = session(TransferKind::Sound, 10);
        session.on_write_complete(true);
        assert_eq!(session.lock().write_complete, None);
        let res = session.wait_for(Duration::from_millis(20), TransferSession::take_completion);
        assert!(matches!(res, Wait::TimedOut));

        session.expect_completion();
        session.on_write_complete(false);
        let res = session.wait_for(Duration::from_millis(20), TransferSession::take_completion);
        assert!(matches!(res, Wait::Ready(false)));

        // Taken: a second completion is someone else's again
        session.on_write_complete(true);
        assert_eq!(session.lock().write_complete, None);
    }

    #[test]
    fn test_failed_completions_share_attempt_budget() {
        let config = quick_config();
        let session = Arc::new(session(TransferKind::Sound, 10));
        let link = TestLink::new(&session, false, 0);
        let engine = engine(&session, &link, &config, &[0u8; 10]);

        assert_eq!(
            engine.send(&[1, 2, 3], WriteMode::Acknowledged),
            Err(Abort::Failed(FailureReason::WriteFailed))
        );
        assert_eq!(*link.writes.lock(), config.retry.attempts);
    }

    #[test]
    fn test_rejections_and_failed_completions_share_budget() {
        let config = quick_config();
        let session = Arc::new(session(TransferKind::Sound, 10));
        let link = TestLink::new(&session, false, 2);
        let engine = engine(&session, &link, &config, &[0u8; 10]);

        assert!(engine.send(&[1, 2, 3], WriteMode::Acknowledged).is_err());
        assert_eq!(*link.writes.lock(), config.retry.attempts);
    }

    #[test]
    fn test_rejections_then_success() {
        let config = quick_config();
        let session = Arc::new(session(TransferKind::Sound, 10));
        let link = TestLink::new(&session, true, 3);
        let engine = engine(&session, &link, &config, &[0u8; 10]);

        assert_eq!(engine.send(&[1, 2, 3], WriteMode::Acknowledged), Ok(()));
        assert_eq!(*link.writes.lock(), 4);
    }

    #[test]
    fn test_sequence_wraps_to_zero() {
        let config = quick_config();
        let session = Arc::new(session(TransferKind::Sound, 10));
        session.lock().sequence = u16::MAX - 1;
        let link = TestLink::new(&session, true, 0);
        let data = [0u8; 10];
        let engine = engine(&session, &link, &config, &data);

        let mut seqs = Vec::new();
        for _ in 0..3 {
            let (_, _, seq) = engine.next_chunk();
            seqs.push(seq);
            engine.advance(1);
        }
        assert_eq!(seqs, vec![u16::MAX - 1, u16::MAX, 0]);
        assert_eq!(session.sequence(), 1);
        assert_eq!(session.offset(), 3);
    }

    #[test]
    fn test_wait_returns_after_report() {
        let session = Arc::new(session(TransferKind::Ota, 10));
        session.finish(TransferOutcome::Done);
        assert!(!session.is_active());
        assert_eq!(session.outcome(), Some(TransferOutcome::Done));
        assert_eq!(session.wait(Duration::from_millis(20)), None);

        let s2 = Arc::clone(&session);
        let waiter = std::thread::spawn(move || s2.wait(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        session.mark_reported();
        assert_eq!(waiter.join().unwrap(), Some(TransferOutcome::Done));
    }
}
