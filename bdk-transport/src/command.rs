//! Type-safe command builders and status payload parsers
//!
//! Commands clamp numeric input instead of failing; only values with no
//! sensible clamp (unknown effect ids, out-of-range slots) are rejected at
//! construction time.

use std::fmt;

use crate::protocol::{self, cmd, limits, resp};
use crate::types::{
    AudioLevels, ControlFlags, EqLevels, Gradient, LedEffect, LedState, Rgb, SoundBank,
    SoundSlot,
};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

// =============================================================================
// Core Traits
// =============================================================================

/// A command that can be serialized to a frame
pub trait DeviceCommand {
    /// Opcode byte (e.g., 0x10 for SET_LED)
    const OPCODE: u8;

    /// Serialize the payload (excluding the opcode)
    fn to_payload(&self) -> Vec<u8>;

    /// Build the complete frame
    fn build(&self) -> Vec<u8> {
        protocol::build_frame(Self::OPCODE, &self.to_payload())
    }
}

/// A status payload that can be parsed from a notification
pub trait StatusPayload: Sized {
    /// Response identifier carrying this payload
    const RESP_ID: u8;

    /// Minimum payload length required
    const MIN_LEN: usize;

    /// Parse from payload bytes (excluding the response id)
    fn from_payload(payload: &[u8]) -> Result<Self, ParseError>;

    /// Parse with length validation
    fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() < Self::MIN_LEN {
            return Err(ParseError::TooShort {
                expected: Self::MIN_LEN,
                got: payload.len(),
            });
        }
        Self::from_payload(payload)
    }
}

/// Parse or argument error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    TooShort { expected: usize, got: usize },
    InvalidValue { field: &'static str, value: u8 },
    InvalidName(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { expected, got } => {
                write!(f, "Payload too short: expected {expected} bytes, got {got}")
            }
            Self::InvalidValue { field, value } => {
                write!(f, "Invalid value for {field}: {value}")
            }
            Self::InvalidName(reason) => write!(f, "Invalid device name: {reason}"),
        }
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// Audio Settings
// =============================================================================

/// SET_EQ / STATUS_EQ wire layout: three signed dB values
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct EqWire {
    bass: i8,
    mid: i8,
    treble: i8,
}

/// SET_EQ (0x01) - three-band gain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEq(pub EqLevels);

impl SetEq {
    /// Build from raw dB values, clamped to ±12
    pub fn new(bass: i32, mid: i32, treble: i32) -> Self {
        Self(EqLevels::new(bass, mid, treble))
    }
}

impl DeviceCommand for SetEq {
    const OPCODE: u8 = cmd::SET_EQ;
    fn to_payload(&self) -> Vec<u8> {
        let eq = EqLevels::new(self.0.bass.into(), self.0.mid.into(), self.0.treble.into());
        EqWire {
            bass: eq.bass,
            mid: eq.mid,
            treble: eq.treble,
        }
        .as_bytes()
        .to_vec()
    }
}

impl StatusPayload for EqLevels {
    const RESP_ID: u8 = resp::STATUS_EQ;
    const MIN_LEN: usize = limits::EQ_LEN;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let (wire, _) = EqWire::read_from_prefix(payload).map_err(|_| ParseError::TooShort {
            expected: limits::EQ_LEN,
            got: payload.len(),
        })?;
        // Device firmware clamps too; a stray out-of-range byte is clamped, not rejected
        Ok(EqLevels::new(wire.bass.into(), wire.mid.into(), wire.treble.into()))
    }
}

/// SET_EQ_PRESET (0x02) - select a built-in preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEqPreset {
    index: u8,
}

impl SetEqPreset {
    pub fn new(index: u8) -> Result<Self, ParseError> {
        if index >= limits::EQ_PRESET_COUNT {
            return Err(ParseError::InvalidValue {
                field: "eq preset",
                value: index,
            });
        }
        Ok(Self { index })
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

impl DeviceCommand for SetEqPreset {
    const OPCODE: u8 = cmd::SET_EQ_PRESET;
    fn to_payload(&self) -> Vec<u8> {
        vec![self.index]
    }
}

/// SET_CONTROL (0x03) - control flag bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetControl(pub ControlFlags);

impl DeviceCommand for SetControl {
    const OPCODE: u8 = cmd::SET_CONTROL;
    fn to_payload(&self) -> Vec<u8> {
        vec![self.0.bits()]
    }
}

impl StatusPayload for ControlFlags {
    const RESP_ID: u8 = resp::STATUS_CONTROL;
    const MIN_LEN: usize = 1;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        Ok(ControlFlags::from_bits_retain(payload[0]))
    }
}

/// SET_NAME (0x04) - raw UTF-8, no terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetName {
    name: String,
}

impl SetName {
    /// Create a name command, truncating on a character boundary to the device limit
    pub fn new(name: &str) -> Result<Self, ParseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::InvalidName("empty".to_string()));
        }
        if name.chars().any(char::is_control) {
            return Err(ParseError::InvalidName(
                "contains control characters".to_string(),
            ));
        }
        Ok(Self {
            name: truncate_utf8(name, limits::MAX_NAME_LEN).to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl DeviceCommand for SetName {
    const OPCODE: u8 = cmd::SET_NAME;
    fn to_payload(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Device name as reported by STATUS_NAME
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName(pub String);

impl StatusPayload for DeviceName {
    const RESP_ID: u8 = resp::STATUS_NAME;
    const MIN_LEN: usize = 0;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let bytes = &payload[..payload.len().min(limits::MAX_NAME_LEN)];
        Ok(Self(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// Firmware version string as reported by STATUS_FW
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion(pub String);

impl StatusPayload for FirmwareVersion {
    const RESP_ID: u8 = resp::STATUS_FW;
    const MIN_LEN: usize = 1;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let text = String::from_utf8_lossy(payload);
        Ok(Self(text.trim_end_matches('\0').trim().to_string()))
    }
}

// =============================================================================
// LED Engine
// =============================================================================

/// SET_LED / STATUS_LED wire layout (10 bytes)
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct LedStateWire {
    brightness: u8,
    r1: u8,
    g1: u8,
    b1: u8,
    r2: u8,
    g2: u8,
    b2: u8,
    gradient: u8,
    speed: u8,
    effect: u8,
}

/// SET_LED (0x10) - full LED state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLed {
    state: LedState,
}

impl Default for SetLed {
    fn default() -> Self {
        Self::new()
    }
}

impl SetLed {
    pub fn new() -> Self {
        Self {
            state: LedState {
                effect: LedEffect::SpectrumBars,
                brightness: 128,
                speed: 128,
                primary: Rgb::new(255, 255, 255),
                secondary: Rgb::new(0, 0, 255),
                gradient: Gradient::None,
            },
        }
    }

    /// Start from an existing state (e.g., the current snapshot)
    pub fn from_state(state: LedState) -> Self {
        Self { state }
    }

    pub fn effect(mut self, effect: LedEffect) -> Self {
        self.state.effect = effect;
        self
    }

    pub fn brightness(mut self, brightness: u8) -> Self {
        self.state.brightness = brightness;
        self
    }

    pub fn speed(mut self, speed: u8) -> Self {
        self.state.speed = speed;
        self
    }

    pub fn primary(mut self, color: Rgb) -> Self {
        self.state.primary = color;
        self
    }

    pub fn secondary(mut self, color: Rgb) -> Self {
        self.state.secondary = color;
        self
    }

    pub fn gradient(mut self, gradient: Gradient) -> Self {
        self.state.gradient = gradient;
        self
    }

    pub fn state(&self) -> &LedState {
        &self.state
    }
}

impl DeviceCommand for SetLed {
    const OPCODE: u8 = cmd::SET_LED;
    fn to_payload(&self) -> Vec<u8> {
        let s = &self.state;
        LedStateWire {
            brightness: s.brightness,
            r1: s.primary.r,
            g1: s.primary.g,
            b1: s.primary.b,
            r2: s.secondary.r,
            g2: s.secondary.g,
            b2: s.secondary.b,
            gradient: s.gradient as u8,
            speed: s.speed,
            effect: s.effect.id(),
        }
        .as_bytes()
        .to_vec()
    }
}

impl StatusPayload for LedState {
    const RESP_ID: u8 = resp::STATUS_LED;
    const MIN_LEN: usize = limits::LED_STATE_LEN;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let (w, _) =
            LedStateWire::read_from_prefix(payload).map_err(|_| ParseError::TooShort {
                expected: limits::LED_STATE_LEN,
                got: payload.len(),
            })?;
        let effect = LedEffect::from_u8(w.effect).ok_or(ParseError::InvalidValue {
            field: "led effect",
            value: w.effect,
        })?;
        let gradient = Gradient::from_u8(w.gradient).ok_or(ParseError::InvalidValue {
            field: "gradient",
            value: w.gradient,
        })?;
        Ok(LedState {
            effect,
            brightness: w.brightness,
            speed: w.speed,
            primary: Rgb::new(w.r1, w.g1, w.b1),
            secondary: Rgb::new(w.r2, w.g2, w.b2),
            gradient,
        })
    }
}

/// SET_LED_EFFECT (0x11) - change effect only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLedEffect(pub LedEffect);

impl SetLedEffect {
    /// Build from a raw id, rejecting ids that are not real effects or `Off`
    pub fn from_id(id: u8) -> Result<Self, ParseError> {
        LedEffect::from_u8(id)
            .map(Self)
            .ok_or(ParseError::InvalidValue {
                field: "led effect",
                value: id,
            })
    }
}

impl DeviceCommand for SetLedEffect {
    const OPCODE: u8 = cmd::SET_LED_EFFECT;
    fn to_payload(&self) -> Vec<u8> {
        vec![self.0.id()]
    }
}

/// SET_LED_BRIGHTNESS (0x12)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLedBrightness(pub u8);

impl DeviceCommand for SetLedBrightness {
    const OPCODE: u8 = cmd::SET_LED_BRIGHTNESS;
    fn to_payload(&self) -> Vec<u8> {
        vec![self.0]
    }
}

// =============================================================================
// Sound Bank
// =============================================================================

/// SOUND_MUTE (0x20)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundMute(pub bool);

impl DeviceCommand for SoundMute {
    const OPCODE: u8 = cmd::SOUND_MUTE;
    fn to_payload(&self) -> Vec<u8> {
        vec![u8::from(self.0)]
    }
}

/// SOUND_DELETE (0x21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundDelete(pub SoundSlot);

impl DeviceCommand for SoundDelete {
    const OPCODE: u8 = cmd::SOUND_DELETE;
    fn to_payload(&self) -> Vec<u8> {
        vec![self.0.index()]
    }
}

impl StatusPayload for SoundBank {
    const RESP_ID: u8 = resp::STATUS_SOUND;
    const MIN_LEN: usize = 1;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        Ok(SoundBank(payload[0]))
    }
}

/// SOUND_UP_START (0x22) wire layout: type, size (LE), 4 reserved bytes
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SoundUploadStart {
    file_type: u8,
    size: U32,
    _reserved: [u8; 4],
}

impl SoundUploadStart {
    pub fn new(slot: SoundSlot, size: u32) -> Self {
        Self {
            file_type: slot.index(),
            size: U32::new(size),
            _reserved: [0; 4],
        }
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }
}

impl DeviceCommand for SoundUploadStart {
    const OPCODE: u8 = cmd::SOUND_UP_START;
    fn to_payload(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// SOUND_UP_DATA header: seq (LE), chunk length (LE)
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SoundDataHeader {
    pub seq: U16,
    pub len: U16,
}

/// SOUND_UP_DATA (0x23)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundUploadData<'a> {
    pub seq: u16,
    pub chunk: &'a [u8],
}

impl DeviceCommand for SoundUploadData<'_> {
    const OPCODE: u8 = cmd::SOUND_UP_DATA;
    fn to_payload(&self) -> Vec<u8> {
        // Chunks are bounded by the write ceiling, far below u16::MAX
        let header = SoundDataHeader {
            seq: U16::new(self.seq),
            len: U16::new(self.chunk.len() as u16),
        };
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(self.chunk);
        data
    }
}

// =============================================================================
// Firmware Update
// =============================================================================

/// OTA_BEGIN (0x40) - binary image size (LE)
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct OtaBegin {
    size: U32,
}

impl OtaBegin {
    pub fn new(size: u32) -> Self {
        Self {
            size: U32::new(size),
        }
    }
}

impl DeviceCommand for OtaBegin {
    const OPCODE: u8 = cmd::OTA_BEGIN;
    fn to_payload(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// OTA_DATA (0x41) - seq (LE) followed by the chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaData<'a> {
    pub seq: u16,
    pub chunk: &'a [u8],
}

impl DeviceCommand for OtaData<'_> {
    const OPCODE: u8 = cmd::OTA_DATA;
    fn to_payload(&self) -> Vec<u8> {
        let mut data = U16::new(self.seq).as_bytes().to_vec();
        data.extend_from_slice(self.chunk);
        data
    }
}

// =============================================================================
// Full Status
// =============================================================================

/// FULL_STATUS snapshot: eq(3), control(1), led(10), sound(1), name_len(1),
/// name, firmware version (remaining bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullStatus {
    pub eq: EqLevels,
    pub control: ControlFlags,
    pub led: LedState,
    pub sound: SoundBank,
    pub name: String,
    pub firmware: String,
}

/// Offset of name_len inside the FULL_STATUS payload
const FULL_STATUS_FIXED_LEN: usize = limits::EQ_LEN + 1 + limits::LED_STATE_LEN + 1;

impl StatusPayload for FullStatus {
    const RESP_ID: u8 = resp::FULL_STATUS;
    const MIN_LEN: usize = FULL_STATUS_FIXED_LEN + 1;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let eq = EqLevels::parse(&payload[..limits::EQ_LEN])?;
        let control = ControlFlags::from_bits_retain(payload[limits::EQ_LEN]);
        let led_start = limits::EQ_LEN + 1;
        let led = LedState::parse(&payload[led_start..led_start + limits::LED_STATE_LEN])?;
        let sound = SoundBank(payload[led_start + limits::LED_STATE_LEN]);

        let name_len = usize::from(payload[FULL_STATUS_FIXED_LEN]);
        let name_start = FULL_STATUS_FIXED_LEN + 1;
        let name_end = name_start + name_len;
        if payload.len() < name_end {
            return Err(ParseError::TooShort {
                expected: name_end,
                got: payload.len(),
            });
        }
        let name = DeviceName::from_payload(&payload[name_start..name_end])?.0;
        let firmware = if payload.len() > name_end {
            FirmwareVersion::from_payload(&payload[name_end..])?.0
        } else {
            String::new()
        };

        Ok(Self {
            eq,
            control,
            led,
            sound,
            name,
            firmware,
        })
    }
}

impl FullStatus {
    /// Serialize in FULL_STATUS layout (used by the device simulator)
    pub fn to_payload(&self) -> Vec<u8> {
        let mut data = SetEq(self.eq).to_payload();
        data.push(self.control.bits());
        data.extend(SetLed::from_state(self.led).to_payload());
        data.push(self.sound.0);
        let name = truncate_utf8(&self.name, limits::MAX_NAME_LEN);
        // bounded by MAX_NAME_LEN
        data.push(name.len() as u8);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(self.firmware.as_bytes());
        data
    }
}

impl StatusPayload for AudioLevels {
    const RESP_ID: u8 = resp::STATUS_LEVELS;
    const MIN_LEN: usize = 3;

    fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        Ok(AudioLevels {
            bass: payload[0],
            mid: payload[1],
            treble: payload[2],
        })
    }
}

// =============================================================================
// Payload-less Commands
// =============================================================================

/// Generic command with no payload
#[derive(Debug, Clone, Copy)]
pub struct SimpleCommand<const OP: u8>;

impl<const OP: u8> Default for SimpleCommand<OP> {
    fn default() -> Self {
        Self
    }
}

impl<const OP: u8> DeviceCommand for SimpleCommand<OP> {
    const OPCODE: u8 = OP;
    fn to_payload(&self) -> Vec<u8> {
        vec![]
    }
}

pub type SoundUploadEnd = SimpleCommand<{ cmd::SOUND_UP_END }>;
pub type OtaEnd = SimpleCommand<{ cmd::OTA_END }>;
pub type OtaAbort = SimpleCommand<{ cmd::OTA_ABORT }>;
pub type GetStatus = SimpleCommand<{ cmd::GET_STATUS }>;
pub type Ping = SimpleCommand<{ cmd::PING }>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_eq_layout() {
        let frame = SetEq::new(-3, 0, 12).build();
        assert_eq!(frame, vec![cmd::SET_EQ, 0xFD, 0x00, 0x0C]);
    }

    #[test]
    fn test_set_eq_clamps() {
        let frame = SetEq::new(-100, 50, 13).build();
        assert_eq!(frame[1] as i8, -12);
        assert_eq!(frame[2] as i8, 12);
        assert_eq!(frame[3] as i8, 12);
    }

    proptest! {
        #[test]
        fn prop_eq_round_trip(bass in -12i32..=12, mid in -12i32..=12, treble in -12i32..=12) {
            let frame = SetEq::new(bass, mid, treble).build();
            let decoded = EqLevels::parse(&frame[1..]).unwrap();
            prop_assert_eq!(i32::from(decoded.bass), bass);
            prop_assert_eq!(i32::from(decoded.mid), mid);
            prop_assert_eq!(i32::from(decoded.treble), treble);
        }
    }

    #[test]
    fn test_eq_preset_bounds() {
        assert_eq!(SetEqPreset::new(11).unwrap().build(), vec![cmd::SET_EQ_PRESET, 11]);
        assert!(SetEqPreset::new(12).is_err());
    }

    #[test]
    fn test_set_led_layout() {
        let frame = SetLed::new()
            .brightness(200)
            .primary(Rgb::new(1, 2, 3))
            .secondary(Rgb::new(4, 5, 6))
            .gradient(Gradient::Radial)
            .speed(77)
            .effect(LedEffect::Fire)
            .build();
        assert_eq!(frame, vec![cmd::SET_LED, 200, 1, 2, 3, 4, 5, 6, 3, 77, 3]);
    }

    #[test]
    fn test_led_state_parse() {
        let payload = [50, 10, 20, 30, 40, 50, 60, 1, 90, 255];
        let led = LedState::parse(&payload).unwrap();
        assert_eq!(led.effect, LedEffect::Off);
        assert_eq!(led.brightness, 50);
        assert_eq!(led.primary, Rgb::new(10, 20, 30));
        assert_eq!(led.secondary, Rgb::new(40, 50, 60));
        assert_eq!(led.gradient, Gradient::Horizontal);
        assert_eq!(led.speed, 90);
    }

    #[test]
    fn test_led_state_too_short() {
        let payload = [50, 10, 20, 30, 40, 50, 60, 1, 90];
        assert_eq!(
            LedState::parse(&payload),
            Err(ParseError::TooShort {
                expected: 10,
                got: 9
            })
        );
    }

    #[test]
    fn test_led_state_rejects_unknown_effect() {
        let payload = [50, 0, 0, 0, 0, 0, 0, 0, 0, 200];
        assert!(matches!(
            LedState::parse(&payload),
            Err(ParseError::InvalidValue { field: "led effect", value: 200 })
        ));
    }

    #[test]
    fn test_set_led_effect_from_id() {
        assert_eq!(SetLedEffect::from_id(21).unwrap().build(), vec![cmd::SET_LED_EFFECT, 21]);
        assert_eq!(SetLedEffect::from_id(255).unwrap().0, LedEffect::Off);
        assert!(SetLedEffect::from_id(22).is_err());
    }

    #[test]
    fn test_set_name_truncates_on_char_boundary() {
        // 15 two-byte chars = 30 bytes, plus a 3-byte char crosses the limit
        let name = format!("{}€", "é".repeat(15));
        let cmd = SetName::new(&name).unwrap();
        assert_eq!(cmd.name().len(), 30);
        let frame = cmd.build();
        assert_eq!(frame[0], cmd::SET_NAME);
        assert!(std::str::from_utf8(&frame[1..]).is_ok());
    }

    #[test]
    fn test_set_name_rejects_empty() {
        assert!(SetName::new("   ").is_err());
        assert!(SetName::new("a\nb").is_err());
    }

    #[test]
    fn test_sound_upload_start_layout() {
        let frame = SoundUploadStart::new(SoundSlot::Pairing, 50_000).build();
        assert_eq!(
            frame,
            vec![cmd::SOUND_UP_START, 1, 0x50, 0xC3, 0x00, 0x00, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_sound_upload_data_layout() {
        let frame = SoundUploadData {
            seq: 0x0102,
            chunk: &[0xAA, 0xBB, 0xCC],
        }
        .build();
        assert_eq!(frame, vec![cmd::SOUND_UP_DATA, 0x02, 0x01, 3, 0, 0xAA, 0xBB, 0xCC]);
        assert_eq!(frame.len() - 3, limits::SOUND_DATA_HEADER_LEN);
    }

    #[test]
    fn test_ota_frames() {
        assert_eq!(
            OtaBegin::new(300_000).build(),
            vec![cmd::OTA_BEGIN, 0xE0, 0x93, 0x04, 0x00]
        );
        let data = OtaData {
            seq: 7,
            chunk: &[1, 2],
        }
        .build();
        assert_eq!(data, vec![cmd::OTA_DATA, 7, 0, 1, 2]);
        assert_eq!(OtaEnd::default().build(), vec![cmd::OTA_END]);
        assert_eq!(OtaAbort::default().build(), vec![cmd::OTA_ABORT]);
    }

    #[test]
    fn test_sound_bank_commands() {
        assert_eq!(SoundMute(true).build(), vec![cmd::SOUND_MUTE, 1]);
        assert_eq!(SoundDelete(SoundSlot::MaxVolume).build(), vec![cmd::SOUND_DELETE, 3]);
    }

    #[test]
    fn test_full_status_round_trip() {
        let status = FullStatus {
            eq: EqLevels::new(3, -2, 1),
            control: ControlFlags::BASS_BOOST | ControlFlags::MUTE,
            led: *SetLed::new().effect(LedEffect::Plasma).state(),
            sound: SoundBank(0x83),
            name: "Boombox".to_string(),
            firmware: "1.4.2".to_string(),
        };
        let payload = status.to_payload();
        assert_eq!(FullStatus::parse(&payload).unwrap(), status);
    }

    #[test]
    fn test_full_status_truncated_name() {
        let mut payload = vec![0u8; FULL_STATUS_FIXED_LEN];
        payload.push(10);
        payload.extend_from_slice(b"abc");
        assert!(matches!(
            FullStatus::parse(&payload),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn test_firmware_version_trims_nul() {
        let fw = FirmwareVersion::parse(b"2.0.1\0\0").unwrap();
        assert_eq!(fw.0, "2.0.1");
    }
}
