//! Session supervisor: at most one bulk transfer at a time
//!
//! The device shares one command channel between sound uploads, OTA and
//! ordinary commands, and cannot interleave the two transfer kinds. The
//! supervisor owns the single active session, routes transfer notifications
//! and write completions to it, and cancels it when the link drops.
//!
//! The supervisor itself does not gate ordinary commands; `Speaker::send`
//! refuses them while a session is active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use bdk_transport::{Notification, TransferKind, Transport};

use crate::error::SessionError;
use crate::transfer::{
    run_transfer, CancelReason, SessionId, TransferConfig, TransferObserver, TransferOutcome,
    TransferRequest, TransferSession, TransferState,
};

/// Handle to a started transfer
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<TransferSession>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn kind(&self) -> TransferKind {
        self.session.kind()
    }

    pub fn state(&self) -> TransferState {
        self.session.state()
    }

    /// (bytes sent, total bytes)
    pub fn progress(&self) -> (usize, usize) {
        (self.session.offset(), self.session.total())
    }

    /// Outcome if the session already finished
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.session.outcome()
    }

    /// Block until the session finishes or the timeout elapses
    pub fn wait(&self, timeout: Duration) -> Option<TransferOutcome> {
        self.session.wait(timeout)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

/// Owns the single active transfer session
pub struct SessionSupervisor {
    transport: Arc<dyn Transport>,
    config: Mutex<TransferConfig>,
    active: Mutex<Option<Arc<TransferSession>>>,
    next_id: AtomicU64,
}

impl SessionSupervisor {
    pub fn new(transport: Arc<dyn Transport>, config: TransferConfig) -> Self {
        Self {
            transport,
            config: Mutex::new(config),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the configuration used by future sessions
    pub fn set_config(&self, config: TransferConfig) {
        *self.config.lock() = config;
    }

    pub fn config(&self) -> TransferConfig {
        self.config.lock().clone()
    }

    /// Start a transfer on a dedicated worker thread.
    ///
    /// Fails immediately with `AlreadyInProgress` if another session has not
    /// finished; the running session is left untouched.
    pub fn start_transfer(
        &self,
        request: TransferRequest,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<SessionHandle, SessionError> {
        let kind = request.kind();
        if request.is_empty() {
            return Err(SessionError::EmptyPayload);
        }
        if request.len() > kind.max_size() {
            return Err(SessionError::TooLarge {
                kind,
                size: request.len(),
                max: kind.max_size(),
            });
        }
        if !self.transport.is_connected() {
            return Err(SessionError::Disconnected);
        }

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref().filter(|s| s.is_active()) {
            debug!(
                "Rejecting {} while session {} ({}) is {}",
                kind,
                current.id(),
                current.kind(),
                current.state()
            );
            return Err(SessionError::AlreadyInProgress {
                active: current.kind(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(TransferSession::new(id, kind, request.len(), observer));
        let worker_session = Arc::clone(&session);
        let transport = Arc::clone(&self.transport);
        let config = self.config();
        let thread_name = match kind {
            TransferKind::Ota => "bdk-ota-worker",
            TransferKind::Sound => "bdk-sound-worker",
        };

        // Registered before the worker runs so its first completions route here
        *active = Some(Arc::clone(&session));
        if let Err(e) = std::thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || run_transfer(worker_session, transport, config, request))
        {
            *active = None;
            return Err(SessionError::Spawn(e.to_string()));
        }

        info!("Session {} started ({})", id, kind);
        Ok(SessionHandle { session })
    }

    /// Cancel a session. Returns `false` if it already finished.
    pub fn cancel(&self, handle: &SessionHandle) -> bool {
        let cancelled = handle.session.cancel(CancelReason::User);
        if cancelled {
            info!("Session {} cancel requested", handle.id());
        }
        cancelled
    }

    /// Link dropped: cancel the active session with `Disconnected`
    pub fn on_link_lost(&self) {
        if let Some(session) = self.active_session() {
            if session.cancel(CancelReason::Disconnected) {
                info!("Session {} cancelled: link lost", session.id());
            }
        }
    }

    /// Forward a write completion to the active session
    pub fn on_write_complete(&self, success: bool) {
        match self.active_session() {
            Some(session) => session.on_write_complete(success),
            None => trace!("Write complete ({}) with no active transfer", success),
        }
    }

    /// Forward a transfer notification. Returns `true` if a session took it.
    pub fn route_notification(&self, notification: &Notification) -> bool {
        match self.active_session() {
            Some(session) => {
                let taken = session.on_notification(notification);
                if !taken {
                    debug!(
                        "Session {} ({}) ignoring {:?}",
                        session.id(),
                        session.kind(),
                        notification
                    );
                }
                taken
            }
            None => {
                debug!("No active transfer for {:?}", notification);
                false
            }
        }
    }

    /// Handle to the running session, if any
    pub fn active(&self) -> Option<SessionHandle> {
        self.active_session()
            .map(|session| SessionHandle { session })
    }

    /// Whether a session is running
    pub fn is_busy(&self) -> bool {
        self.active_session().is_some()
    }

    fn active_session(&self) -> Option<Arc<TransferSession>> {
        self.active
            .lock()
            .as_ref()
            .filter(|s| s.is_active())
            .cloned()
    }
}
