//! Speaker interface error types

use bdk_transport::{ParseError, TransferKind, TransportError};
use thiserror::Error;

/// Errors from speaker operations
#[derive(Error, Debug)]
pub enum SpeakerError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid command argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[from] ParseError),

    /// Transfer session could not be started
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors from starting or addressing a transfer session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Another transfer is still running
    #[error("A {active} transfer is already in progress")]
    AlreadyInProgress { active: TransferKind },

    /// Nothing to send
    #[error("Transfer payload is empty")]
    EmptyPayload,

    /// Buffer exceeds what the device accepts for this kind
    #[error("{kind} of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        kind: TransferKind,
        size: usize,
        max: usize,
    },

    /// Link is down
    #[error("Device disconnected")]
    Disconnected,

    /// Worker thread could not be started
    #[error("Failed to start transfer worker: {0}")]
    Spawn(String),
}
