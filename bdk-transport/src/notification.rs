//! Notification decoding
//!
//! The speaker pushes one frame per notification: `[resp_id, payload...]`.
//! Known identifiers with a payload too short (or otherwise malformed) for
//! their shape decode to `None`; callers ignore those frames. Identifiers the
//! app does not know about decode to [`Notification::Unknown`] so newer
//! firmware keeps working.

use tracing::debug;

use crate::command::{DeviceName, FirmwareVersion, FullStatus, StatusPayload};
use crate::protocol::{self, resp};
use crate::types::{AudioLevels, ControlFlags, EqLevels, LedState, SoundBank};

/// Device-reported consumption progress during OTA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProgress {
    /// Percent of the image written to flash
    Percent(u8),
    /// Bytes of the image written to flash
    Bytes(u32),
}

impl DeviceProgress {
    /// Convert to a byte count against the image size
    pub fn consumed_bytes(self, total: usize) -> usize {
        match self {
            Self::Percent(p) => total * usize::from(p.min(100)) / 100,
            Self::Bytes(b) => (b as usize).min(total),
        }
    }

    /// Convert to a percent of the image size
    pub fn percent_of(self, total: usize) -> u8 {
        match self {
            Self::Percent(p) => p.min(100),
            Self::Bytes(_) => (self.consumed_bytes(total) * 100 / total.max(1)) as u8,
        }
    }
}

/// Decoded device notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    // Status pushes
    Eq(EqLevels),
    Control(ControlFlags),
    Name(String),
    Firmware(String),
    Led(LedState),
    Sound(SoundBank),
    Levels(AudioLevels),
    FullStatus(Box<FullStatus>),

    // Command acknowledgements
    AckOk { opcode: u8 },
    AckError { opcode: u8, code: u8 },

    // Firmware update
    OtaProgress(DeviceProgress),
    OtaReady,
    OtaComplete { size: Option<u32> },
    OtaFailed { code: u8 },

    // Sound upload
    SoundProgress { percent: u8 },
    SoundReady { seq: Option<u16> },
    SoundComplete { size: Option<u32> },
    SoundFailed { code: u8 },

    Pong,

    /// Response id not known to this version
    Unknown { id: u8, payload: Vec<u8> },
}

impl Notification {
    /// Whether this notification belongs to a bulk transfer
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Self::OtaProgress(_)
                | Self::OtaReady
                | Self::OtaComplete { .. }
                | Self::OtaFailed { .. }
                | Self::SoundProgress { .. }
                | Self::SoundReady { .. }
                | Self::SoundComplete { .. }
                | Self::SoundFailed { .. }
        )
    }

    /// Whether this notification acknowledges an ordinary command
    pub fn is_command_result(&self) -> bool {
        matches!(self, Self::AckOk { .. } | Self::AckError { .. } | Self::Pong)
    }
}

fn parse<T: StatusPayload>(payload: &[u8]) -> Option<T> {
    match T::parse(payload) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("Dropping malformed {}: {}", resp::name(T::RESP_ID), e);
            None
        }
    }
}

fn u16_le(payload: &[u8]) -> Option<u16> {
    payload.get(..2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_le(payload: &[u8]) -> Option<u32> {
    payload
        .get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn first(payload: &[u8], id: u8) -> Option<u8> {
    let v = payload.first().copied();
    if v.is_none() {
        debug!("Dropping empty {}", resp::name(id));
    }
    v
}

/// Decode a notification payload by response id.
///
/// Returns `None` for a known id whose payload is malformed.
pub fn decode(id: u8, payload: &[u8]) -> Option<Notification> {
    let n = match id {
        resp::STATUS_EQ => Notification::Eq(parse(payload)?),
        resp::STATUS_CONTROL => Notification::Control(parse(payload)?),
        resp::STATUS_NAME => Notification::Name(parse::<DeviceName>(payload)?.0),
        resp::STATUS_FW => Notification::Firmware(parse::<FirmwareVersion>(payload)?.0),
        resp::STATUS_LED => Notification::Led(parse(payload)?),
        resp::STATUS_SOUND => Notification::Sound(parse(payload)?),
        resp::STATUS_LEVELS => Notification::Levels(parse(payload)?),
        resp::FULL_STATUS => Notification::FullStatus(Box::new(parse(payload)?)),

        resp::ACK_OK => Notification::AckOk {
            opcode: first(payload, id)?,
        },
        resp::ACK_ERROR => {
            if payload.len() < 2 {
                debug!("Dropping short ACK_ERROR ({} bytes)", payload.len());
                return None;
            }
            Notification::AckError {
                opcode: payload[0],
                code: payload[1],
            }
        }

        resp::OTA_PROGRESS => {
            let progress = match u32_le(payload) {
                Some(bytes) => DeviceProgress::Bytes(bytes),
                None => DeviceProgress::Percent(first(payload, id)?),
            };
            Notification::OtaProgress(progress)
        }
        resp::OTA_READY => Notification::OtaReady,
        resp::OTA_COMPLETE => Notification::OtaComplete {
            size: u32_le(payload),
        },
        resp::OTA_FAILED => Notification::OtaFailed {
            code: payload.first().copied().unwrap_or(0),
        },

        resp::SOUND_PROGRESS => Notification::SoundProgress {
            percent: first(payload, id)?,
        },
        resp::SOUND_READY => Notification::SoundReady {
            seq: u16_le(payload),
        },
        resp::SOUND_COMPLETE => Notification::SoundComplete {
            size: u32_le(payload),
        },
        resp::SOUND_FAILED => Notification::SoundFailed {
            code: payload.first().copied().unwrap_or(0),
        },

        resp::PONG => Notification::Pong,

        _ => Notification::Unknown {
            id,
            payload: payload.to_vec(),
        },
    };
    Some(n)
}

/// Decode a complete frame (`[resp_id, payload...]`)
pub fn decode_frame(frame: &[u8]) -> Option<Notification> {
    let (id, payload) = protocol::split_frame(frame)?;
    decode(id, payload)
}
