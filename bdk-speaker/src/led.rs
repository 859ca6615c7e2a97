//! LED effect and color utilities

use bdk_transport::{Gradient, LedEffect, LedState, Rgb};
use thiserror::Error;

/// Brightness/speed values are percentages
pub const PERCENT_MAX: u8 = 100;

/// Default secondary color used by the app
pub const DEFAULT_SECONDARY: Rgb = Rgb::new(0x00, 0xAA, 0xFF);

/// Named colors offered by the color picker
pub const NAMED_COLORS: [(&str, Rgb); 10] = [
    ("white", Rgb::new(255, 255, 255)),
    ("red", Rgb::new(255, 0, 0)),
    ("orange", Rgb::new(0xFF, 0x66, 0x00)),
    ("yellow", Rgb::new(255, 255, 0)),
    ("green", Rgb::new(0, 255, 0)),
    ("cyan", Rgb::new(0, 255, 255)),
    ("blue", Rgb::new(0, 0, 255)),
    ("purple", Rgb::new(0x99, 0x00, 0xFF)),
    ("pink", Rgb::new(0xFF, 0x00, 0xAA)),
    ("warm-white", Rgb::new(0xFF, 0xE4, 0xB5)),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedParseError {
    #[error("unknown color '{0}' (use #RRGGBB or a color name)")]
    Color(String),
    #[error("unknown LED effect '{0}'")]
    Effect(String),
    #[error("unknown gradient '{0}'")]
    Gradient(String),
}

/// State the app starts with before the first status arrives
pub fn default_state() -> LedState {
    LedState {
        effect: LedEffect::SpectrumBars,
        brightness: PERCENT_MAX,
        speed: 50,
        primary: Rgb::new(255, 255, 255),
        secondary: DEFAULT_SECONDARY,
        gradient: Gradient::None,
    }
}

/// Create color from HSV values (h in degrees, s/v in 0..=1)
pub fn from_hsv(h: f32, s: f32, v: f32) -> Rgb {
    let h = h.rem_euclid(360.0);
    let s = s.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Rgb::new(
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    )
}

/// Parse `#RRGGBB`, `RRGGBB` or a name from [`NAMED_COLORS`]
pub fn parse_color(s: &str) -> Result<Rgb, LedParseError> {
    let trimmed = s.trim();
    let key = normalize(trimmed);
    if let Some((_, rgb)) = NAMED_COLORS.iter().find(|(name, _)| normalize(name) == key) {
        return Ok(*rgb);
    }

    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(LedParseError::Color(s.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| LedParseError::Color(s.to_string()))
    };
    Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
}

/// Find an effect by display name or numeric id ("off" selects `Off`)
pub fn parse_effect(s: &str) -> Result<LedEffect, LedParseError> {
    if let Ok(id) = s.trim().parse::<u8>() {
        return LedEffect::from_u8(id).ok_or_else(|| LedParseError::Effect(s.to_string()));
    }
    let key = normalize(s);
    LedEffect::ALL
        .into_iter()
        .chain(std::iter::once(LedEffect::Off))
        .find(|e| normalize(e.name()) == key)
        .ok_or_else(|| LedParseError::Effect(s.to_string()))
}

pub fn parse_gradient(s: &str) -> Result<Gradient, LedParseError> {
    let key = normalize(s);
    (0..=4)
        .filter_map(Gradient::from_u8)
        .find(|g| normalize(g.name()) == key)
        .ok_or_else(|| LedParseError::Gradient(s.to_string()))
}

/// Whether the effect reacts to audio input
pub fn is_audio_reactive(effect: LedEffect) -> bool {
    matches!(
        effect,
        LedEffect::SpectrumBars
            | LedEffect::BeatPulse
            | LedEffect::VuMeter
            | LedEffect::FrequencySpiral
            | LedEffect::BassReactor
            | LedEffect::AudioScope
    )
}

// Case, spaces, dashes and underscores are ignored when matching names
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#FF6600").unwrap(), Rgb::new(0xFF, 0x66, 0x00));
        assert_eq!(parse_color("00aaff").unwrap(), DEFAULT_SECONDARY);
        assert_eq!(parse_color("Warm White").unwrap(), Rgb::new(0xFF, 0xE4, 0xB5));
        assert!(parse_color("#FF66").is_err());
        assert!(parse_color("#GG0000").is_err());
        assert!(parse_color("#ÿÿÿ").is_err());
    }

    #[test]
    fn test_parse_effect() {
        assert_eq!(parse_effect("dna-helix").unwrap(), LedEffect::DnaHelix);
        assert_eq!(parse_effect("VU Meter").unwrap(), LedEffect::VuMeter);
        assert_eq!(parse_effect("off").unwrap(), LedEffect::Off);
        assert_eq!(parse_effect("255").unwrap(), LedEffect::Off);
        assert_eq!(parse_effect("4").unwrap(), LedEffect::Plasma);
        assert!(parse_effect("22").is_err());
        assert!(parse_effect("disco").is_err());
    }

    #[test]
    fn test_parse_gradient() {
        assert_eq!(parse_gradient("radial").unwrap(), Gradient::Radial);
        assert!(parse_gradient("spiral").is_err());
    }

    #[test]
    fn test_from_hsv() {
        assert_eq!(from_hsv(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(from_hsv(120.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(from_hsv(240.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        assert_eq!(from_hsv(-120.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        assert_eq!(from_hsv(0.0, 0.0, 0.0), Rgb::default());
    }
}
