//! High-level speaker interface
//!
//! [`Speaker`] ties a [`Transport`] to the status aggregator and the session
//! supervisor. The radio layer owns an `Arc<Speaker>` as its
//! [`LinkHandler`] and feeds it every notification, write completion and
//! link loss.

pub mod eq;
pub mod error;
pub mod led;
pub mod session;
pub mod status;
pub mod transfer;

pub use error::{SessionError, SpeakerError};
pub use eq::{EqPreset, PRESETS};
pub use session::{SessionHandle, SessionSupervisor};
pub use status::{CommandResult, StatusAggregator, StatusChange, StatusEvent, StatusSnapshot};
pub use transfer::{
    CancelReason, FailureReason, NullObserver, SessionId, TransferConfig, TransferObserver,
    TransferOutcome, TransferRequest, TransferState,
};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use bdk_transport::protocol::{cmd, split_frame};
use bdk_transport::{
    decode, write_with_retry, ControlFlags, DeviceCommand, EqLevels, GetStatus, LedEffect,
    LinkHandler, Ping, RetryPolicy, SetControl, SetEq, SetEqPreset, SetLed, SetLedBrightness,
    SetLedEffect, SetName, SoundDelete, SoundMute, SoundSlot, Transport, WriteMode,
};

/// Speaker controller over any transport
pub struct Speaker {
    transport: Arc<dyn Transport>,
    status: StatusAggregator,
    supervisor: SessionSupervisor,
    retry: Mutex<RetryPolicy>,
}

impl Speaker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, TransferConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: TransferConfig) -> Self {
        let retry = config.retry.clone();
        Self {
            supervisor: SessionSupervisor::new(Arc::clone(&transport), config),
            transport,
            status: StatusAggregator::new(),
            retry: Mutex::new(retry),
        }
    }

    /// Replace the transfer configuration; the retry policy also applies to
    /// ordinary commands
    pub fn set_config(&self, config: TransferConfig) {
        *self.retry.lock() = config.retry.clone();
        self.supervisor.set_config(config);
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    /// Last reported device state
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandResult> {
        self.status.subscribe_commands()
    }

    // === Commands ===

    /// Send one command with an acknowledged write.
    ///
    /// Refused while a transfer is running: a stray frame would land between
    /// two chunks of the transfer.
    pub fn send<C: DeviceCommand>(&self, command: &C) -> Result<(), SpeakerError> {
        if let Some(active) = self.supervisor.active() {
            return Err(SessionError::AlreadyInProgress {
                active: active.kind(),
            }
            .into());
        }
        let frame = command.build();
        let policy = self.retry.lock().clone();
        debug!("Sending {} ({} bytes)", cmd::name(C::OPCODE), frame.len());
        write_with_retry(
            self.transport.as_ref(),
            &frame,
            WriteMode::Acknowledged,
            &policy,
            |delay| {
                std::thread::sleep(delay);
                true
            },
        )?;
        Ok(())
    }

    /// Set EQ gains in dB (clamped to ±12)
    pub fn set_eq(&self, bass: i32, mid: i32, treble: i32) -> Result<(), SpeakerError> {
        self.send(&SetEq::new(bass, mid, treble))
    }

    pub fn set_eq_levels(&self, levels: EqLevels) -> Result<(), SpeakerError> {
        self.send(&SetEq(levels))
    }

    pub fn set_eq_preset(&self, index: u8) -> Result<(), SpeakerError> {
        self.send(&SetEqPreset::new(index)?)
    }

    pub fn set_control(&self, flags: ControlFlags) -> Result<(), SpeakerError> {
        self.send(&SetControl(flags))
    }

    /// Rename the device (truncated to the device limit)
    pub fn set_name(&self, name: &str) -> Result<(), SpeakerError> {
        self.send(&SetName::new(name)?)
    }

    pub fn set_led(&self, led: &SetLed) -> Result<(), SpeakerError> {
        self.send(led)
    }

    pub fn set_led_effect(&self, effect: LedEffect) -> Result<(), SpeakerError> {
        self.send(&SetLedEffect(effect))
    }

    pub fn set_led_brightness(&self, brightness: u8) -> Result<(), SpeakerError> {
        self.send(&SetLedBrightness(brightness))
    }

    pub fn sound_mute(&self, muted: bool) -> Result<(), SpeakerError> {
        self.send(&SoundMute(muted))
    }

    pub fn sound_delete(&self, slot: SoundSlot) -> Result<(), SpeakerError> {
        self.send(&SoundDelete(slot))
    }

    /// Ask the device to push a full status snapshot
    pub fn request_status(&self) -> Result<(), SpeakerError> {
        self.send(&GetStatus::default())
    }

    pub fn ping(&self) -> Result<(), SpeakerError> {
        self.send(&Ping::default())
    }

    // === Transfers ===

    /// Upload a sound file into a bank slot
    pub fn upload_sound(
        &self,
        slot: SoundSlot,
        data: Vec<u8>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<SessionHandle, SpeakerError> {
        info!("Uploading {} bytes to sound slot {}", data.len(), slot);
        Ok(self
            .supervisor
            .start_transfer(TransferRequest::Sound { slot, data }, observer)?)
    }

    /// Start a firmware update
    pub fn start_ota(
        &self,
        image: Vec<u8>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<SessionHandle, SpeakerError> {
        info!("Starting OTA of {} bytes", image.len());
        Ok(self
            .supervisor
            .start_transfer(TransferRequest::Ota { image }, observer)?)
    }

    /// Cancel a transfer. Returns `false` if it already finished.
    pub fn cancel(&self, handle: &SessionHandle) -> bool {
        self.supervisor.cancel(handle)
    }

    /// Wait for the running transfer, if any
    pub fn wait_idle(&self, timeout: Duration) -> Option<TransferOutcome> {
        self.supervisor.active().and_then(|h| h.wait(timeout))
    }
}

impl LinkHandler for Speaker {
    fn on_notify(&self, frame: &[u8]) {
        let Some((id, payload)) = split_frame(frame) else {
            trace!("Ignoring empty notification");
            return;
        };
        let Some(notification) = decode(id, payload) else {
            return;
        };
        if notification.is_transfer() {
            self.supervisor.route_notification(&notification);
        } else {
            self.status.apply(&notification);
        }
    }

    fn on_write_complete(&self, success: bool) {
        self.supervisor.on_write_complete(success);
    }

    fn on_link_lost(&self) {
        info!("Link lost");
        self.supervisor.on_link_lost();
    }
}
