//! Shared types for transport and device state

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::protocol::limits;

/// Result of handing a frame to the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Frame accepted into the link layer's queue
    Queued,
    /// Link layer refused the frame (busy, not connected)
    Rejected,
}

/// How a frame is written to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write-with-response; completion arrives via `on_write_complete`
    Acknowledged,
    /// Write-without-response
    Unacknowledged,
}

/// Kind of bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Firmware image
    Ota,
    /// Sound bank file
    Sound,
}

impl TransferKind {
    /// Bytes of DATA frame header preceding the chunk payload
    pub fn frame_overhead(self) -> usize {
        match self {
            Self::Ota => limits::OTA_DATA_HEADER_LEN,
            Self::Sound => limits::SOUND_DATA_HEADER_LEN,
        }
    }

    /// Largest buffer the device accepts for this kind
    pub fn max_size(self) -> usize {
        match self {
            Self::Ota => limits::OTA_MAX_BYTES,
            Self::Sound => limits::SOUND_MAX_BYTES,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ota => write!(f, "OTA"),
            Self::Sound => write!(f, "sound upload"),
        }
    }
}

/// RGB color value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Format as `#RRGGBB`
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Three-band EQ gains in dB, each within ±12
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EqLevels {
    pub bass: i8,
    pub mid: i8,
    pub treble: i8,
}

impl EqLevels {
    /// Create levels, clamping each band to the device range
    pub fn new(bass: i32, mid: i32, treble: i32) -> Self {
        Self {
            bass: clamp_db(bass),
            mid: clamp_db(mid),
            treble: clamp_db(treble),
        }
    }

    pub const FLAT: Self = Self {
        bass: 0,
        mid: 0,
        treble: 0,
    };
}

fn clamp_db(v: i32) -> i8 {
    let max = i32::from(limits::EQ_DB_MAX);
    // clamped into i8 range above
    v.clamp(-max, max) as i8
}

bitflags! {
    /// Audio control flags. Bits the app does not know about are kept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ControlFlags: u8 {
        const BASS_BOOST = 0x01;
        const CHANNEL_FLIP = 0x02;
        const BYPASS_DSP = 0x04;
        const MUTE = 0x08;
    }
}

/// LED animation effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedEffect {
    #[default]
    SpectrumBars = 0,
    BeatPulse = 1,
    Ripple = 2,
    Fire = 3,
    Plasma = 4,
    MatrixRain = 5,
    VuMeter = 6,
    Starfield = 7,
    Wave = 8,
    Fireworks = 9,
    RainbowWave = 10,
    ParticleBurst = 11,
    Kaleidoscope = 12,
    FrequencySpiral = 13,
    BassReactor = 14,
    MeteorShower = 15,
    Breathing = 16,
    DnaHelix = 17,
    AudioScope = 18,
    BouncingBalls = 19,
    LavaLamp = 20,
    Ambient = 21,
    Off = 255,
}

impl LedEffect {
    /// All real effects in id order (excludes `Off`)
    pub const ALL: [Self; 22] = [
        Self::SpectrumBars,
        Self::BeatPulse,
        Self::Ripple,
        Self::Fire,
        Self::Plasma,
        Self::MatrixRain,
        Self::VuMeter,
        Self::Starfield,
        Self::Wave,
        Self::Fireworks,
        Self::RainbowWave,
        Self::ParticleBurst,
        Self::Kaleidoscope,
        Self::FrequencySpiral,
        Self::BassReactor,
        Self::MeteorShower,
        Self::Breathing,
        Self::DnaHelix,
        Self::AudioScope,
        Self::BouncingBalls,
        Self::LavaLamp,
        Self::Ambient,
    ];

    /// Get effect from wire id; unknown ids are `None`
    pub fn from_u8(v: u8) -> Option<Self> {
        if v == limits::LED_EFFECT_OFF {
            return Some(Self::Off);
        }
        Self::ALL.get(usize::from(v)).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::SpectrumBars => "Spectrum Bars",
            Self::BeatPulse => "Beat Pulse",
            Self::Ripple => "Ripple",
            Self::Fire => "Fire",
            Self::Plasma => "Plasma",
            Self::MatrixRain => "Matrix Rain",
            Self::VuMeter => "VU Meter",
            Self::Starfield => "Starfield",
            Self::Wave => "Wave",
            Self::Fireworks => "Fireworks",
            Self::RainbowWave => "Rainbow Wave",
            Self::ParticleBurst => "Particle Burst",
            Self::Kaleidoscope => "Kaleidoscope",
            Self::FrequencySpiral => "Frequency Spiral",
            Self::BassReactor => "Bass Reactor",
            Self::MeteorShower => "Meteor Shower",
            Self::Breathing => "Breathing",
            Self::DnaHelix => "DNA Helix",
            Self::AudioScope => "Audio Scope",
            Self::BouncingBalls => "Bouncing Balls",
            Self::LavaLamp => "Lava Lamp",
            Self::Ambient => "Ambient",
            Self::Off => "Off",
        }
    }
}

impl fmt::Display for LedEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the two LED colors are blended across the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Gradient {
    #[default]
    None = 0,
    Horizontal = 1,
    Vertical = 2,
    Radial = 3,
    Diagonal = 4,
}

impl Gradient {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Horizontal),
            2 => Some(Self::Vertical),
            3 => Some(Self::Radial),
            4 => Some(Self::Diagonal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Horizontal => "Horizontal",
            Self::Vertical => "Vertical",
            Self::Radial => "Radial",
            Self::Diagonal => "Diagonal",
        }
    }
}

/// Full LED engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LedState {
    pub effect: LedEffect,
    pub brightness: u8,
    pub speed: u8,
    pub primary: Rgb,
    pub secondary: Rgb,
    pub gradient: Gradient,
}

/// Sound bank slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SoundSlot {
    Startup = 0,
    Pairing = 1,
    Connected = 2,
    MaxVolume = 3,
}

impl SoundSlot {
    pub const ALL: [Self; 4] = [Self::Startup, Self::Pairing, Self::Connected, Self::MaxVolume];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(usize::from(v)).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
            Self::MaxVolume => "max-volume",
        }
    }
}

impl fmt::Display for SoundSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sound bank status byte: bit i = slot i has a file, bit 7 = muted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoundBank(pub u8);

impl SoundBank {
    pub fn has_file(self, slot: SoundSlot) -> bool {
        self.0 & (1 << slot.index()) != 0
    }

    pub fn is_muted(self) -> bool {
        self.0 & limits::SOUND_MUTED_BIT != 0
    }

    /// Slots that currently hold a file
    pub fn present(self) -> impl Iterator<Item = SoundSlot> {
        SoundSlot::ALL.into_iter().filter(move |s| self.has_file(*s))
    }
}

/// Live audio meter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioLevels {
    pub bass: u8,
    pub mid: u8,
    pub treble: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_levels_clamp() {
        let eq = EqLevels::new(-40, 5, 200);
        assert_eq!(eq, EqLevels { bass: -12, mid: 5, treble: 12 });
    }

    #[test]
    fn test_led_effect_ids() {
        for (i, effect) in LedEffect::ALL.iter().enumerate() {
            assert_eq!(effect.id() as usize, i);
            assert_eq!(LedEffect::from_u8(i as u8), Some(*effect));
        }
        assert_eq!(LedEffect::from_u8(255), Some(LedEffect::Off));
        assert_eq!(LedEffect::from_u8(22), None);
        assert_eq!(LedEffect::from_u8(254), None);
    }

    #[test]
    fn test_gradient_from_u8() {
        assert_eq!(Gradient::from_u8(3), Some(Gradient::Radial));
        assert_eq!(Gradient::from_u8(5), None);
    }

    #[test]
    fn test_control_flags_keep_unknown_bits() {
        let flags = ControlFlags::from_bits_retain(0x41);
        assert!(flags.contains(ControlFlags::BASS_BOOST));
        assert_eq!(flags.bits(), 0x41);
    }

    #[test]
    fn test_sound_bank_bits() {
        let bank = SoundBank(0b1000_0101);
        assert!(bank.is_muted());
        assert!(bank.has_file(SoundSlot::Startup));
        assert!(!bank.has_file(SoundSlot::Pairing));
        assert!(bank.has_file(SoundSlot::Connected));
        assert_eq!(
            bank.present().collect::<Vec<_>>(),
            vec![SoundSlot::Startup, SoundSlot::Connected]
        );
    }
}
