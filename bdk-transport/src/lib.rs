//! Wire codec and transport port for BLE speaker communication
//!
//! The speaker exposes a single command characteristic (writes) and a single
//! notification characteristic (pushes). This crate defines:
//!
//! - the frame layout of every command and notification (`command`, `notification`)
//! - the contract the radio layer implements (`Transport`) and the callbacks it
//!   drives (`LinkHandler`)
//! - retry, chunk sizing and backpressure helpers (`flow_control`)

pub mod command;
pub mod error;
pub mod flow_control;
pub mod notification;
pub mod protocol;
pub mod types;

pub use command::{
    DeviceCommand, DeviceName, FirmwareVersion, FullStatus, GetStatus, OtaAbort, OtaBegin,
    OtaData, OtaEnd, ParseError, Ping, SetControl, SetEq, SetEqPreset, SetLed,
    SetLedBrightness, SetLedEffect, SetName, SimpleCommand, SoundDelete, SoundMute,
    SoundUploadData, SoundUploadEnd, SoundUploadStart, StatusPayload,
};
pub use error::TransportError;
pub use flow_control::{
    chunk_size, write_with_retry, AckWindow, RetryPolicy, ThrottleTable, ThrottleTier,
};
pub use notification::{decode, decode_frame, DeviceProgress, Notification};
pub use types::{
    AudioLevels, ControlFlags, EqLevels, Gradient, LedEffect, LedState, Rgb, SoundBank,
    SoundSlot, TransferKind, WriteMode, WriteOutcome,
};

/// The port the radio layer implements
///
/// Writes never block on the device: they return as soon as the link layer
/// has queued or refused the frame. Completion of acknowledged writes and all
/// incoming notifications are delivered through a [`LinkHandler`], usually on
/// the radio stack's own thread.
pub trait Transport: Send + Sync {
    /// Largest application payload a single write may carry right now.
    ///
    /// May change at any time when the link renegotiates its MTU.
    fn negotiated_payload_size(&self) -> usize;

    /// Write-with-response; the link layer later reports
    /// [`LinkHandler::on_write_complete`]
    fn write_acknowledged(&self, frame: &[u8]) -> WriteOutcome;

    /// Write-without-response (fire and forget)
    fn write_unacknowledged(&self, frame: &[u8]) -> WriteOutcome;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool {
        true
    }

    /// Write using the given mode
    fn write(&self, frame: &[u8], mode: WriteMode) -> WriteOutcome {
        match mode {
            WriteMode::Acknowledged => self.write_acknowledged(frame),
            WriteMode::Unacknowledged => self.write_unacknowledged(frame),
        }
    }
}

/// Callbacks the radio layer drives
pub trait LinkHandler: Send + Sync {
    /// One incoming notification frame
    fn on_notify(&self, frame: &[u8]);

    /// Completion of the most recent acknowledged write
    fn on_write_complete(&self, success: bool);

    /// The link dropped
    fn on_link_lost(&self);
}
