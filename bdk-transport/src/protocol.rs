//! Protocol constants and frame helpers for the speaker's unified command channel.
//!
//! Every frame is `[id, payload...]`. Command opcodes live below 0x80 and
//! response identifiers at 0x80 and above so the two spaces never overlap.

/// Command opcodes (app -> device)
pub mod cmd {
    // Audio settings (0x01 - 0x0F)
    pub const SET_EQ: u8 = 0x01;
    pub const SET_EQ_PRESET: u8 = 0x02;
    pub const SET_CONTROL: u8 = 0x03;
    pub const SET_NAME: u8 = 0x04;

    // LED engine (0x10 - 0x1F)
    pub const SET_LED: u8 = 0x10;
    pub const SET_LED_EFFECT: u8 = 0x11;
    pub const SET_LED_BRIGHTNESS: u8 = 0x12;

    // Sound bank (0x20 - 0x2F)
    pub const SOUND_MUTE: u8 = 0x20;
    pub const SOUND_DELETE: u8 = 0x21;
    pub const SOUND_UP_START: u8 = 0x22;
    pub const SOUND_UP_DATA: u8 = 0x23;
    pub const SOUND_UP_END: u8 = 0x24;

    // Firmware update (0x40 - 0x4F)
    pub const OTA_BEGIN: u8 = 0x40;
    pub const OTA_DATA: u8 = 0x41;
    pub const OTA_END: u8 = 0x42;
    pub const OTA_ABORT: u8 = 0x43;

    // Housekeeping (0x50 - 0x5F)
    pub const GET_STATUS: u8 = 0x50;
    pub const PING: u8 = 0x51;

    /// Get human-readable name for a command opcode
    pub fn name(op: u8) -> &'static str {
        match op {
            SET_EQ => "SET_EQ",
            SET_EQ_PRESET => "SET_EQ_PRESET",
            SET_CONTROL => "SET_CONTROL",
            SET_NAME => "SET_NAME",
            SET_LED => "SET_LED",
            SET_LED_EFFECT => "SET_LED_EFFECT",
            SET_LED_BRIGHTNESS => "SET_LED_BRIGHTNESS",
            SOUND_MUTE => "SOUND_MUTE",
            SOUND_DELETE => "SOUND_DELETE",
            SOUND_UP_START => "SOUND_UP_START",
            SOUND_UP_DATA => "SOUND_UP_DATA",
            SOUND_UP_END => "SOUND_UP_END",
            OTA_BEGIN => "OTA_BEGIN",
            OTA_DATA => "OTA_DATA",
            OTA_END => "OTA_END",
            OTA_ABORT => "OTA_ABORT",
            GET_STATUS => "GET_STATUS",
            PING => "PING",
            _ => "UNKNOWN",
        }
    }
}

/// Response identifiers (device -> app)
pub mod resp {
    // Status pushes (0x80 - 0x8F)
    pub const STATUS_EQ: u8 = 0x81;
    pub const STATUS_CONTROL: u8 = 0x82;
    pub const STATUS_NAME: u8 = 0x83;
    pub const STATUS_FW: u8 = 0x84;
    pub const STATUS_LED: u8 = 0x85;
    pub const STATUS_SOUND: u8 = 0x86;
    /// Live audio meter: bass, mid, treble energy (0-255 each)
    pub const STATUS_LEVELS: u8 = 0x87;
    pub const FULL_STATUS: u8 = 0x8F;

    // Command acknowledgements (0xA0 - 0xAF)
    /// Payload: echoed opcode
    pub const ACK_OK: u8 = 0xA0;
    /// Payload: echoed opcode, error code
    pub const ACK_ERROR: u8 = 0xA1;

    // Firmware update (0xB0 - 0xBF)
    pub const OTA_PROGRESS: u8 = 0xB0;
    pub const OTA_READY: u8 = 0xB1;
    pub const OTA_COMPLETE: u8 = 0xB2;
    pub const OTA_FAILED: u8 = 0xB3;

    // Sound upload (0xC0 - 0xCF)
    pub const SOUND_PROGRESS: u8 = 0xC0;
    pub const SOUND_READY: u8 = 0xC1;
    pub const SOUND_COMPLETE: u8 = 0xC2;
    pub const SOUND_FAILED: u8 = 0xC3;

    pub const PONG: u8 = 0xD0;

    /// Get human-readable name for a response identifier
    pub fn name(id: u8) -> &'static str {
        match id {
            STATUS_EQ => "STATUS_EQ",
            STATUS_CONTROL => "STATUS_CONTROL",
            STATUS_NAME => "STATUS_NAME",
            STATUS_FW => "STATUS_FW",
            STATUS_LED => "STATUS_LED",
            STATUS_SOUND => "STATUS_SOUND",
            STATUS_LEVELS => "STATUS_LEVELS",
            FULL_STATUS => "FULL_STATUS",
            ACK_OK => "ACK_OK",
            ACK_ERROR => "ACK_ERROR",
            OTA_PROGRESS => "OTA_PROGRESS",
            OTA_READY => "OTA_READY",
            OTA_COMPLETE => "OTA_COMPLETE",
            OTA_FAILED => "OTA_FAILED",
            SOUND_PROGRESS => "SOUND_PROGRESS",
            SOUND_READY => "SOUND_READY",
            SOUND_COMPLETE => "SOUND_COMPLETE",
            SOUND_FAILED => "SOUND_FAILED",
            PONG => "PONG",
            _ => "UNKNOWN",
        }
    }

    /// Responses that belong to an in-flight bulk transfer
    pub fn is_transfer(id: u8) -> bool {
        matches!(id, OTA_PROGRESS..=OTA_FAILED | SOUND_PROGRESS..=SOUND_FAILED)
    }
}

/// Error codes carried by ACK_ERROR, OTA_FAILED and SOUND_FAILED
pub mod error_code {
    pub const UNSPECIFIED: u8 = 0x00;
    /// Image or file does not fit the target partition
    pub const TOO_LARGE: u8 = 0x01;
    /// Flash erase or write failed
    pub const FLASH: u8 = 0x02;
    /// Image verification failed
    pub const VERIFY: u8 = 0x03;
    /// Device busy with another operation
    pub const BUSY: u8 = 0x04;
    /// Malformed or out-of-order frame
    pub const BAD_FRAME: u8 = 0x05;
    /// Argument out of range
    pub const INVALID_ARG: u8 = 0x06;

    pub fn name(code: u8) -> &'static str {
        match code {
            UNSPECIFIED => "unspecified",
            TOO_LARGE => "too large",
            FLASH => "flash error",
            VERIFY => "verification failed",
            BUSY => "busy",
            BAD_FRAME => "bad frame",
            INVALID_ARG => "invalid argument",
            _ => "unknown",
        }
    }
}

/// Frame size limits and payload lengths
pub mod limits {
    /// BLE ATT minimum usable payload (default MTU 23 minus 3 bytes ATT header)
    pub const MIN_NEGOTIATED_PAYLOAD: usize = 20;
    /// Hard ceiling for a single characteristic write (ATT max attribute length)
    pub const MAX_WRITE_LEN: usize = 512;
    /// SOUND_UP_DATA header: opcode, seq (u16), len (u16)
    pub const SOUND_DATA_HEADER_LEN: usize = 5;
    /// OTA_DATA header: opcode, seq (u16)
    pub const OTA_DATA_HEADER_LEN: usize = 3;
    /// LED state payload (SET_LED / STATUS_LED)
    pub const LED_STATE_LEN: usize = 10;
    /// EQ payload (SET_EQ / STATUS_EQ)
    pub const EQ_LEN: usize = 3;
    /// Device name limit in UTF-8 bytes
    pub const MAX_NAME_LEN: usize = 31;
    /// Symmetric EQ gain range in dB
    pub const EQ_DB_MAX: i8 = 12;
    /// Number of sound bank slots
    pub const SOUND_SLOTS: u8 = 4;
    /// Largest sound file accepted by the device
    pub const SOUND_MAX_BYTES: usize = 200 * 1024;
    /// Largest firmware image accepted by the device
    pub const OTA_MAX_BYTES: usize = 4 * 1024 * 1024;
    /// Number of built-in EQ presets
    pub const EQ_PRESET_COUNT: u8 = 12;
    /// Reserved LED effect id meaning "LEDs off"
    pub const LED_EFFECT_OFF: u8 = 255;
    /// Sound bank status bit for the mute state
    pub const SOUND_MUTED_BIT: u8 = 0x80;
}

/// Default timing for transfers
pub mod timing {
    /// Sound upload: wait for SOUND_READY after START (ms)
    pub const SOUND_START_TIMEOUT_MS: u64 = 5_000;
    /// Sound upload: wait for SOUND_READY after each DATA (ms)
    pub const SOUND_DATA_TIMEOUT_MS: u64 = 5_000;
    /// Sound upload: wait for SOUND_COMPLETE after END (ms)
    pub const SOUND_END_TIMEOUT_MS: u64 = 10_000;
    /// OTA: wait for OTA_READY after BEGIN (ms), flash erase happens here
    pub const OTA_BEGIN_TIMEOUT_MS: u64 = 10_000;
    /// OTA: settle time after OTA_READY before the first DATA frame (ms)
    pub const OTA_BEGIN_SETTLE_MS: u64 = 300;
    /// OTA: wait for OTA_COMPLETE after END (ms), image verification happens here
    pub const OTA_END_TIMEOUT_MS: u64 = 10_000;
    /// Wait for the link layer to confirm an acknowledged write (ms)
    pub const WRITE_COMPLETE_TIMEOUT_MS: u64 = 5_000;
    /// Attempts for a rejected write before the transfer fails
    pub const WRITE_RETRIES: u32 = 10;
    /// Backoff for the first few retries (ms)
    pub const RETRY_SHORT_BACKOFF_MS: u64 = 10;
    /// Backoff once the short retries are used up (ms)
    pub const RETRY_LONG_BACKOFF_MS: u64 = 30;
    /// Retries that use the short backoff
    pub const RETRY_SHORT_ATTEMPTS: u32 = 3;
    /// OTA: every Nth DATA frame is an acknowledged write
    pub const OTA_ACK_EVERY: u32 = 8;
    /// OTA: base delay between DATA frames (ms)
    pub const OTA_BASE_DELAY_MS: u64 = 2;
}

/// Build a frame from an identifier byte and payload
pub fn build_frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(id);
    buf.extend_from_slice(payload);
    buf
}

/// Split a received frame into identifier and payload.
///
/// Returns `None` for an empty buffer.
pub fn split_frame(frame: &[u8]) -> Option<(u8, &[u8])> {
    frame.split_first().map(|(id, payload)| (*id, payload))
}

/// Format bytes as space-separated uppercase hex
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex bytes, tolerating spaces, colons and an optional `0x` prefix per byte
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let cleaned: String = s
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if cleaned.is_empty() || !cleaned.is_ascii() || cleaned.len() % 2 != 0 {
        return None;
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_spaces_disjoint() {
        for op in 0u8..=0xFF {
            if cmd::name(op) != "UNKNOWN" {
                assert_eq!(resp::name(op), "UNKNOWN", "0x{op:02X} used by both");
                assert!(op < 0x80);
            }
        }
    }

    #[test]
    fn test_transfer_responses() {
        assert!(resp::is_transfer(resp::OTA_READY));
        assert!(resp::is_transfer(resp::SOUND_COMPLETE));
        assert!(!resp::is_transfer(resp::ACK_OK));
        assert!(!resp::is_transfer(resp::STATUS_LED));
    }

    #[test]
    fn test_split_frame() {
        assert_eq!(split_frame(&[]), None);
        assert_eq!(split_frame(&[0x81]), Some((0x81, &[][..])));
        assert_eq!(split_frame(&[0x81, 1, 2]), Some((0x81, &[1u8, 2][..])));
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(format_hex(&[0x01, 0xAB]), "01 AB");
        assert_eq!(parse_hex("01 ab"), Some(vec![0x01, 0xAB]));
        assert_eq!(parse_hex("0x01:0xFF"), Some(vec![0x01, 0xFF]));
        assert_eq!(parse_hex("01ab"), Some(vec![0x01, 0xAB]));
        assert_eq!(parse_hex("0"), None);
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_hex(""), None);
    }
}
