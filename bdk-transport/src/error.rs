//! Transport error types

use thiserror::Error;

/// Errors that can occur when writing to the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device disconnected")]
    Disconnected,

    #[error("Write rejected by link layer after {attempts} attempts")]
    WriteRejected { attempts: u32 },

    #[error("Frame of {len} bytes exceeds link payload of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Write interrupted")]
    Interrupted,
}
